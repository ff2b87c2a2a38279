use crate::calling_convention::CallingConvention;
use crate::error::DeferredError;
use alloc::boxed::Box;
use core::fmt;
use libos_info::deferred::MAX_WORK_PARAMETERS;
use libos_sync::{Completion, SpinLock};
use libos_task::TaskRef;

/// A function to run in a target thread.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Work {
    /// User address of the entry point.
    pub address: u64,
    pub convention: CallingConvention,
    pub parameters: [u64; MAX_WORK_PARAMETERS],
}

impl Work {
    #[must_use]
    pub const fn new(address: u64, convention: CallingConvention) -> Self {
        Self {
            address,
            convention,
            parameters: [0; MAX_WORK_PARAMETERS],
        }
    }

    #[must_use]
    pub const fn with_parameters(mut self, parameters: [u64; MAX_WORK_PARAMETERS]) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Life cycle of a work item.
///
/// `Created → Scheduled → Installed → Completed`; any state moves to
/// `Detached` when the owning [`Job`](crate::Job) is dropped.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WorkState {
    Created,
    Scheduled,
    Installed,
    Completed,
    Detached,
}

pub type CompletionCallback = Box<dyn FnOnce(Result<u64, DeferredError>) + Send>;

/// How the scheduler hears about completion.
pub enum Notify {
    /// Block on [`Job::wait`](crate::Job::wait).
    Wait,
    /// Called once with the result, outside every engine lock.
    Callback(CompletionCallback),
}

impl fmt::Debug for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait => f.write_str("Wait"),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Outcome {
    Pending,
    Completed(u64),
    Discarded,
}

impl Outcome {
    pub(crate) const fn result(self) -> Option<Result<u64, DeferredError>> {
        match self {
            Self::Pending => None,
            Self::Completed(response) => Some(Ok(response)),
            Self::Discarded => Some(Err(DeferredError::Discarded)),
        }
    }
}

struct HandlerState {
    state: WorkState,
    installed: bool,
    outcome: Outcome,
    callback: Option<CompletionCallback>,
}

/// A pending callback, fired once the caller dropped its locks.
#[must_use]
pub(crate) struct Delivery {
    callback: CompletionCallback,
    result: Result<u64, DeferredError>,
}

impl Delivery {
    pub(crate) fn fire(self) {
        (self.callback)(self.result);
    }
}

/// Engine-side record of one work item.
///
/// Shared between the thread's queue and the [`Job`](crate::Job); keeps a
/// reference on the target task for as long as it exists.
pub struct WorkHandler {
    work: Work,
    task: TaskRef,
    inner: SpinLock<HandlerState>,
    done: Completion,
}

impl WorkHandler {
    #[must_use]
    pub fn new(work: Work, task: TaskRef, notify: Notify) -> Self {
        let callback = match notify {
            Notify::Wait => None,
            Notify::Callback(callback) => Some(callback),
        };
        Self {
            work,
            task,
            inner: SpinLock::new(HandlerState {
                state: WorkState::Created,
                installed: false,
                outcome: Outcome::Pending,
                callback,
            }),
            done: Completion::new(),
        }
    }

    #[inline]
    #[must_use]
    pub const fn work(&self) -> &Work {
        &self.work
    }

    #[inline]
    #[must_use]
    pub const fn task(&self) -> &TaskRef {
        &self.task
    }

    #[must_use]
    pub fn state(&self) -> WorkState {
        self.inner.lock().state
    }

    /// `Created → Scheduled`. False if the job was already dropped.
    pub(crate) fn mark_scheduled(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == WorkState::Detached {
            return false;
        }
        inner.state = WorkState::Scheduled;
        true
    }

    /// The thread's registers now point at this work.
    pub(crate) fn mark_installed(&self) {
        let mut inner = self.inner.lock();
        inner.installed = true;
        if inner.state == WorkState::Scheduled {
            inner.state = WorkState::Installed;
        }
    }

    /// Detached before it ever ran; safe to drop from the queue.
    pub(crate) fn is_dead(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == WorkState::Detached && !inner.installed
    }

    pub(crate) fn outcome(&self) -> Outcome {
        self.inner.lock().outcome
    }

    pub(crate) const fn completion(&self) -> &Completion {
        &self.done
    }

    /// Record the function's return value.
    pub(crate) fn complete(&self, response: u64) -> Option<Delivery> {
        self.finish(Outcome::Completed(response))
    }

    /// Record that the work will never run.
    pub(crate) fn discard(&self) -> Option<Delivery> {
        self.finish(Outcome::Discarded)
    }

    fn finish(&self, outcome: Outcome) -> Option<Delivery> {
        let delivery = {
            let mut inner = self.inner.lock();
            if inner.outcome != Outcome::Pending {
                return None;
            }
            inner.outcome = outcome;
            if inner.state == WorkState::Detached {
                None
            } else {
                inner.state = WorkState::Completed;
                let result = match outcome {
                    Outcome::Completed(response) => Ok(response),
                    Outcome::Pending | Outcome::Discarded => Err(DeferredError::Discarded),
                };
                inner
                    .callback
                    .take()
                    .map(|callback| Delivery { callback, result })
            }
        };
        self.done.complete();
        delivery
    }

    /// The job went away; nobody is listening any more.
    pub(crate) fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.state = WorkState::Detached;
        inner.callback = None;
    }
}

impl fmt::Debug for WorkHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkHandler")
            .field("work", &self.work)
            .field("task", &self.task)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use libos_task::{ExitHook, Pid, TaskOps, TaskPtr};
    use std::sync::Mutex;

    struct NoTasks;

    impl TaskOps for NoTasks {
        fn get_task(&self, _: TaskPtr) {}
        fn put_task(&self, _: TaskPtr) {}
        fn pid(&self, _: TaskPtr) -> Pid {
            1
        }
        fn tgid(&self, _: TaskPtr) -> Pid {
            1
        }
        fn current(&self) -> TaskPtr {
            TaskPtr::new(0x1000)
        }
        fn find_task(&self, _: Pid) -> Option<TaskPtr> {
            None
        }
        fn is_running(&self, _: TaskPtr) -> bool {
            false
        }
        fn wake_up(&self, _: TaskPtr) {}
        fn add_exit_hook(&self, _: ExitHook) {}
    }

    fn handler(notify: Notify) -> WorkHandler {
        let ops: Arc<dyn TaskOps> = Arc::new(NoTasks);
        let task = TaskRef::acquire(ops, TaskPtr::new(0x1000));
        WorkHandler::new(Work::new(0x1000, CallingConvention::SysV), task, notify)
    }

    #[test]
    fn walks_the_happy_path() {
        let h = handler(Notify::Wait);
        assert_eq!(h.state(), WorkState::Created);
        assert!(h.mark_scheduled());
        h.mark_installed();
        assert_eq!(h.state(), WorkState::Installed);
        assert!(h.complete(7).is_none());
        assert_eq!(h.state(), WorkState::Completed);
        assert_eq!(h.outcome(), Outcome::Completed(7));
        assert!(h.completion().is_complete());
    }

    #[test]
    fn callback_fires_once_with_the_result() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let h = handler(Notify::Callback(Box::new(move |r| {
            *sink.lock().unwrap() = Some(r);
        })));
        h.mark_scheduled();
        h.complete(3).unwrap().fire();
        assert!(h.complete(4).is_none());
        assert!(h.discard().is_none());
        assert_eq!(*seen.lock().unwrap(), Some(Ok(3)));
    }

    #[test]
    fn detached_handlers_complete_silently() {
        let seen = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&seen);
        let h = handler(Notify::Callback(Box::new(move |_| {
            *sink.lock().unwrap() = true;
        })));
        h.detach();
        assert!(!h.mark_scheduled());
        assert!(h.is_dead());
        assert!(h.discard().is_none());
        assert_eq!(h.state(), WorkState::Detached);
        assert!(!*seen.lock().unwrap());
    }

    #[test]
    fn installed_work_is_not_dead_after_detach() {
        let h = handler(Notify::Wait);
        h.mark_scheduled();
        h.mark_installed();
        h.detach();
        assert!(!h.is_dead());
    }
}
