use crate::attention::AttentionId;
use crate::database::{Callback, CallbackDatabase};
use crate::error::DispatchError;
use crate::user_memory::UserMemory;
use alloc::sync::Arc;
use alloc::vec;
use libos_deferred::DeferredExecution;
use libos_info::deferred::{DELEGATED_MAX_ARGS, DELEGATED_MAX_BUFFER, MAX_WORK_PARAMETERS};
use libos_info::status::STATUS_OK;
use libos_sync::SpinLock;
use libos_task::{TaskOps, UserRegisters};
use log::{trace, warn};

type Args = [u64; DELEGATED_MAX_ARGS];

/// Entry point for every delegated call of a controlled process.
pub struct DelegatedCalls {
    database: SpinLock<CallbackDatabase>,
    engine: Arc<DeferredExecution>,
    memory: Arc<dyn UserMemory>,
    tasks: Arc<dyn TaskOps>,
}

impl DelegatedCalls {
    #[must_use]
    pub fn new(
        engine: Arc<DeferredExecution>,
        memory: Arc<dyn UserMemory>,
        tasks: Arc<dyn TaskOps>,
    ) -> Self {
        Self {
            database: SpinLock::new(CallbackDatabase::new()),
            engine,
            memory,
            tasks,
        }
    }

    /// Run `f` on the callback database.
    pub fn with_database<R>(&self, f: impl FnOnce(&mut CallbackDatabase) -> R) -> R {
        self.database.with_lock(f)
    }

    /// Handle attention `id` from the current task.
    ///
    /// `frame` is the caller's saved user state. The returned word goes back
    /// to user mode in `rax`.
    pub fn dispatch(&self, id: u64, args: Args, frame: &mut UserRegisters) -> u64 {
        let Ok(attention) = AttentionId::try_from(id) else {
            warn!("ignoring unknown delegated call {id}");
            #[allow(clippy::cast_sign_loss)]
            return STATUS_OK as u64;
        };
        trace!("delegated call {attention:?}");

        let result = match attention {
            AttentionId::DbPull => self.db_pull(args[0], args[1]),
            AttentionId::Extended => self.extended(&args),
            AttentionId::Short => self.short(&args),
            AttentionId::NtfyComplete => self.notify_complete(args[0], frame),
        };
        result.unwrap_or_else(|e| {
            warn!("delegated call {attention:?} failed: {e}");
            e.kind().status_word()
        })
    }

    /// Without a buffer: bytes needed. With one: bytes written, whole
    /// records only.
    fn db_pull(&self, buffer: u64, length: u64) -> Result<u64, DispatchError> {
        if buffer == 0 || length == 0 {
            let needed = self.database.lock().serialized_len();
            return Ok(needed as u64);
        }

        let limit = usize::try_from(length).unwrap_or(usize::MAX);
        let records = self.database.lock().serialize(limit);
        self.memory.copy_to_user(buffer, &records)?;
        Ok(records.len() as u64)
    }

    fn extended(&self, args: &Args) -> Result<u64, DispatchError> {
        let [id, buffer, length, ..] = *args;
        let callback = match self.lookup(id)? {
            Callback::Extended(callback) => callback,
            Callback::Short(_) => return Err(DispatchError::WrongKind(callback_id(id)?)),
        };

        let length = usize::try_from(length)
            .ok()
            .filter(|&l| l <= DELEGATED_MAX_BUFFER)
            .ok_or(DispatchError::BufferTooLarge(length))?;
        let mut data = vec![0u8; length];
        if length > 0 {
            self.memory.copy_from_user(&mut data, buffer)?;
        }
        let response = callback(&mut data);
        if length > 0 {
            self.memory.copy_to_user(buffer, &data)?;
        }
        Ok(response)
    }

    fn short(&self, args: &Args) -> Result<u64, DispatchError> {
        let callback = match self.lookup(args[0])? {
            Callback::Short(callback) => callback,
            Callback::Extended(_) => return Err(DispatchError::WrongKind(callback_id(args[0])?)),
        };
        let mut params = [0u64; MAX_WORK_PARAMETERS];
        params.copy_from_slice(&args[1..=MAX_WORK_PARAMETERS]);
        Ok(callback(&params))
    }

    /// The injected work of the current thread returned `response`.
    ///
    /// On success the frame now describes where the thread continues, so
    /// its own `rax` is handed back to keep it intact.
    fn notify_complete(&self, response: u64, frame: &mut UserRegisters) -> Result<u64, DispatchError> {
        let current = self.tasks.current();
        self.engine.finish(current, response, frame)?;
        Ok(frame.rax)
    }

    fn lookup(&self, id: u64) -> Result<Callback, DispatchError> {
        let id = callback_id(id)?;
        self.database.lock().get(id)
    }
}

fn callback_id(raw: u64) -> Result<u32, DispatchError> {
    u32::try_from(raw).map_err(|_| DispatchError::CallbackIdOutOfRange(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_ids_keep_their_value() {
        assert_eq!(callback_id(7), Ok(7));
        assert_eq!(callback_id(u64::from(u32::MAX)), Ok(u32::MAX));
        assert_eq!(
            callback_id(0x1_0000_0002),
            Err(DispatchError::CallbackIdOutOfRange(0x1_0000_0002))
        );
    }
}
