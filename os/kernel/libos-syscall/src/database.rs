//! Named kernel callbacks exposed to the controlled process.
//!
//! The process enumerates them with `DB_PULL`, which serializes every entry
//! as one record:
//!
//! ```text
//! +0  id        u32 LE
//! +4  kind      u8     (1 = short, 2 = extended)
//! +5  name_len  u8
//! +6  name      name_len bytes, no terminator
//! ```

use crate::error::DispatchError;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use libos_info::deferred::MAX_WORK_PARAMETERS;

/// Takes four register-passed words.
pub type ShortCallback = Arc<dyn Fn(&[u64; MAX_WORK_PARAMETERS]) -> u64 + Send + Sync>;

/// Works on a copy of a user buffer that is written back afterwards.
pub type ExtendedCallback = Arc<dyn Fn(&mut [u8]) -> u64 + Send + Sync>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum CallbackKind {
    Short = 1,
    Extended = 2,
}

#[derive(Clone)]
pub(crate) enum Callback {
    Short(ShortCallback),
    Extended(ExtendedCallback),
}

impl Callback {
    const fn kind(&self) -> CallbackKind {
        match self {
            Self::Short(_) => CallbackKind::Short,
            Self::Extended(_) => CallbackKind::Extended,
        }
    }
}

struct Entry {
    name: String,
    callback: Callback,
}

const RECORD_HEADER: usize = 6;

pub struct CallbackDatabase {
    entries: BTreeMap<u32, Entry>,
    next_id: u32,
}

impl CallbackDatabase {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// # Errors
    /// See [`register`](Self::register).
    pub fn register_short(
        &mut self,
        name: &str,
        callback: ShortCallback,
    ) -> Result<u32, DispatchError> {
        self.register(name, Callback::Short(callback))
    }

    /// # Errors
    /// See [`register`](Self::register).
    pub fn register_extended(
        &mut self,
        name: &str,
        callback: ExtendedCallback,
    ) -> Result<u32, DispatchError> {
        self.register(name, Callback::Extended(callback))
    }

    /// Add `callback` under `name`, returning its id.
    ///
    /// # Errors
    /// * [`DispatchError::BadName`] for an empty name or one over 255 bytes.
    /// * [`DispatchError::DuplicateName`] if `name` is taken.
    /// * [`DispatchError::DatabaseFull`] once ids run out.
    fn register(&mut self, name: &str, callback: Callback) -> Result<u32, DispatchError> {
        if name.is_empty() || u8::try_from(name.len()).is_err() {
            return Err(DispatchError::BadName);
        }
        if self.entries.values().any(|e| e.name == name) {
            return Err(DispatchError::DuplicateName);
        }

        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(DispatchError::DatabaseFull)?;
        self.entries.insert(
            id,
            Entry {
                name: String::from(name),
                callback,
            },
        );
        Ok(id)
    }

    /// Remove callback `id`. Returns whether it existed.
    pub fn unregister(&mut self, id: u32) -> bool {
        self.entries.remove(&id).is_some()
    }

    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find_map(|(&id, e)| (e.name == name).then_some(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, id: u32) -> Result<Callback, DispatchError> {
        self.entries
            .get(&id)
            .map(|e| e.callback.clone())
            .ok_or(DispatchError::UnknownCallback(id))
    }

    /// Bytes needed to serialize every record.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        self.entries
            .values()
            .map(|e| RECORD_HEADER + e.name.len())
            .sum()
    }

    /// Serialize as many whole records as fit in `limit` bytes.
    #[must_use]
    pub fn serialize(&self, limit: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for (&id, entry) in &self.entries {
            let record = RECORD_HEADER + entry.name.len();
            if out.len() + record > limit {
                break;
            }
            out.extend_from_slice(&id.to_le_bytes());
            out.push(entry.callback.kind() as u8);
            #[allow(clippy::cast_possible_truncation)]
            out.push(entry.name.len() as u8);
            out.extend_from_slice(entry.name.as_bytes());
        }
        out
    }
}

impl Default for CallbackDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short() -> ShortCallback {
        Arc::new(|args: &[u64; MAX_WORK_PARAMETERS]| args.iter().sum::<u64>())
    }

    #[test]
    fn records_follow_the_wire_layout() {
        let mut db = CallbackDatabase::new();
        let a = db.register_short("add", short()).unwrap();
        let b = db
            .register_extended("fill", Arc::new(|buf: &mut [u8]| buf.len() as u64))
            .unwrap();
        assert_eq!((a, b), (1, 2));

        let bytes = db.serialize(usize::MAX);
        assert_eq!(bytes.len(), db.serialized_len());
        assert_eq!(
            bytes,
            [
                1, 0, 0, 0, 1, 3, b'a', b'd', b'd', //
                2, 0, 0, 0, 2, 4, b'f', b'i', b'l', b'l',
            ]
        );
    }

    #[test]
    fn truncation_keeps_whole_records() {
        let mut db = CallbackDatabase::new();
        db.register_short("one", short()).unwrap();
        db.register_short("two", short()).unwrap();
        assert_eq!(db.serialize(9).len(), 9);
        assert_eq!(db.serialize(17).len(), 9);
        assert!(db.serialize(8).is_empty());
    }

    #[test]
    fn names_are_validated() {
        let mut db = CallbackDatabase::new();
        assert_eq!(db.register_short("", short()), Err(DispatchError::BadName));
        let long = "x".repeat(256);
        assert_eq!(db.register_short(&long, short()), Err(DispatchError::BadName));
        assert!(db.register_short(&long[..255], short()).is_ok());

        db.register_short("dup", short()).unwrap();
        assert_eq!(
            db.register_extended("dup", Arc::new(|_: &mut [u8]| 0u64)),
            Err(DispatchError::DuplicateName)
        );
    }

    #[test]
    fn unregistered_ids_are_gone() {
        let mut db = CallbackDatabase::new();
        let id = db.register_short("add", short()).unwrap();
        assert_eq!(db.id_of("add"), Some(id));
        assert!(db.unregister(id));
        assert!(!db.unregister(id));
        assert!(db.is_empty());
        assert!(matches!(db.get(id), Err(DispatchError::UnknownCallback(_))));
    }
}
