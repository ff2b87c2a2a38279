use crate::{Pid, TaskOps, TaskPtr};
use alloc::sync::Arc;
use core::fmt;

/// A counted reference on a host task.
pub struct TaskRef {
    ops: Arc<dyn TaskOps>,
    task: TaskPtr,
}

impl TaskRef {
    /// Take a new reference on `task`.
    #[must_use]
    pub fn acquire(ops: Arc<dyn TaskOps>, task: TaskPtr) -> Self {
        ops.get_task(task);
        Self { ops, task }
    }

    /// Wrap a reference the host already took on our behalf.
    #[must_use]
    pub const fn adopt(ops: Arc<dyn TaskOps>, task: TaskPtr) -> Self {
        Self { ops, task }
    }

    /// Referenced lookup by thread id.
    #[must_use]
    pub fn find(ops: &Arc<dyn TaskOps>, tid: Pid) -> Option<Self> {
        let task = ops.find_task(tid)?;
        Some(Self::adopt(Arc::clone(ops), task))
    }

    /// Referenced handle on the calling task.
    #[must_use]
    pub fn current(ops: &Arc<dyn TaskOps>) -> Self {
        let task = ops.current();
        Self::acquire(Arc::clone(ops), task)
    }

    #[inline]
    #[must_use]
    pub const fn ptr(&self) -> TaskPtr {
        self.task
    }

    #[inline]
    #[must_use]
    pub fn ops(&self) -> &Arc<dyn TaskOps> {
        &self.ops
    }

    #[inline]
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.ops.pid(self.task)
    }

    #[inline]
    #[must_use]
    pub fn tgid(&self) -> Pid {
        self.ops.tgid(self.task)
    }

    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ops.is_running(self.task)
    }

    #[inline]
    pub fn wake_up(&self) {
        self.ops.wake_up(self.task);
    }
}

impl Clone for TaskRef {
    fn clone(&self) -> Self {
        Self::acquire(Arc::clone(&self.ops), self.task)
    }
}

impl Drop for TaskRef {
    fn drop(&mut self) {
        self.ops.put_task(self.task);
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        self.task == other.task
    }
}

impl Eq for TaskRef {}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef").field("task", &self.task).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExitHook;
    use std::sync::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Counting {
        refs: Mutex<HashMap<usize, i64>>,
    }

    impl TaskOps for Counting {
        fn get_task(&self, task: TaskPtr) {
            *self.refs.lock().unwrap().entry(task.as_usize()).or_default() += 1;
        }
        fn put_task(&self, task: TaskPtr) {
            *self.refs.lock().unwrap().entry(task.as_usize()).or_default() -= 1;
        }
        fn pid(&self, task: TaskPtr) -> Pid {
            i32::try_from(task.as_usize()).unwrap()
        }
        fn tgid(&self, task: TaskPtr) -> Pid {
            self.pid(task)
        }
        fn current(&self) -> TaskPtr {
            TaskPtr::new(1)
        }
        fn find_task(&self, tid: Pid) -> Option<TaskPtr> {
            let task = TaskPtr::new(usize::try_from(tid).ok()?);
            self.get_task(task);
            Some(task)
        }
        fn is_running(&self, _task: TaskPtr) -> bool {
            false
        }
        fn wake_up(&self, _task: TaskPtr) {}
        fn add_exit_hook(&self, _hook: ExitHook) {}
    }

    #[test]
    fn references_balance_on_every_path() {
        let counting = Arc::new(Counting::default());
        let ops: Arc<dyn TaskOps> = counting.clone();

        {
            let a = TaskRef::find(&ops, 7).unwrap();
            let b = a.clone();
            let c = TaskRef::current(&ops);
            assert_eq!(a, b);
            assert_ne!(a, c);
            assert_eq!(counting.refs.lock().unwrap()[&7], 2);
            assert_eq!(counting.refs.lock().unwrap()[&1], 1);
        }

        let refs = counting.refs.lock().unwrap();
        assert!(refs.values().all(|&n| n == 0));
    }

    #[test]
    fn failed_lookup_takes_nothing() {
        let counting = Arc::new(Counting::default());
        let ops: Arc<dyn TaskOps> = counting.clone();
        assert!(TaskRef::find(&ops, -1).is_none());
        assert!(counting.refs.lock().unwrap().is_empty());
    }
}
