use crate::error::DispatchError;

/// Access to the calling process's memory (`copy_from_user` and friends).
pub trait UserMemory: Send + Sync {
    /// # Errors
    /// [`DispatchError::BadUserAddress`] if any byte is inaccessible.
    fn copy_from_user(&self, dst: &mut [u8], src: u64) -> Result<(), DispatchError>;

    /// # Errors
    /// [`DispatchError::BadUserAddress`] if any byte is inaccessible.
    fn copy_to_user(&self, dst: u64, src: &[u8]) -> Result<(), DispatchError>;
}
