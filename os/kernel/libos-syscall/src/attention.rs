use libos_info::deferred::attention;

/// Attention ids understood by [`DelegatedCalls`](crate::DelegatedCalls).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u64)]
pub enum AttentionId {
    DbPull = attention::DB_PULL,
    Extended = attention::EXTENDED,
    NtfyComplete = attention::NTFY_COMPLETE,
    Short = attention::SHORT,
}

impl TryFrom<u64> for AttentionId {
    type Error = u64;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        match id {
            attention::DB_PULL => Ok(Self::DbPull),
            attention::EXTENDED => Ok(Self::Extended),
            attention::NTFY_COMPLETE => Ok(Self::NtfyComplete),
            attention::SHORT => Ok(Self::Short),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_match_the_wire_values() {
        assert_eq!(AttentionId::try_from(3), Ok(AttentionId::DbPull));
        assert_eq!(AttentionId::try_from(4), Ok(AttentionId::Extended));
        assert_eq!(AttentionId::try_from(5), Ok(AttentionId::NtfyComplete));
        assert_eq!(AttentionId::try_from(6), Ok(AttentionId::Short));
        assert_eq!(AttentionId::try_from(7), Err(7));
        assert_eq!(AttentionId::NtfyComplete as u64, 5);
    }
}
