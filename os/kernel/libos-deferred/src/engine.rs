use crate::calling_convention::calling_convention;
use crate::error::DeferredError;
use crate::job::Job;
use crate::private_stack::PrivateStack;
use crate::registry::{ProcessRegistry, ProcessState, StubMapping, ThreadState};
use crate::return_stub::{Arch, return_stub};
use crate::stack::{StackBuilder, StackPusher};
use crate::work::{Notify, Work, WorkHandler};
use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use hashbrown::hash_map::Entry;
use libos_alloc::PageAllocator;
use libos_info::deferred::EngineConfig;
use libos_sync::{Sleeper, SpinLock};
use libos_task::{Pid, TaskOps, TaskPtr, TaskRef, UserRegisters};
use libos_vmem::{MemoryInterface, VirtualAddress};
use log::{debug, info, warn};

/// Call frames start on a 16 byte boundary.
const STACK_ALIGNMENT: u64 = 16;

/// Host services the engine runs on.
#[derive(Clone)]
pub struct EngineHost {
    pub tasks: Arc<dyn TaskOps>,
    pub memory: MemoryInterface,
    pub allocator: Arc<PageAllocator>,
    pub sleeper: Arc<dyn Sleeper + Send>,
}

/// Runs work items in the threads of controlled processes.
///
/// Every thread has a FIFO of work; only its front item is ever installed
/// in the thread's registers. When the item returns through the return
/// stub, [`finish`](Self::finish) pops it, reports the result and either
/// starts the next item or restores the thread's original state.
pub struct DeferredExecution {
    host: EngineHost,
    config: EngineConfig,
    arch: Arch,
    registry: SpinLock<ProcessRegistry>,
    detach: Arc<SpinLock<()>>,
}

impl DeferredExecution {
    /// Create the engine and hook process exit.
    #[must_use]
    pub fn new(host: EngineHost, config: EngineConfig) -> Arc<Self> {
        let engine = Arc::new(Self {
            host,
            config,
            arch: Arch::host(),
            registry: SpinLock::new(ProcessRegistry::default()),
            detach: Arc::new(SpinLock::new(())),
        });

        let weak: Weak<Self> = Arc::downgrade(&engine);
        engine.host.tasks.add_exit_hook(Box::new(move |tgid| {
            if let Some(engine) = weak.upgrade() {
                engine.free_process(tgid);
            }
        }));
        engine
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue `work` on thread `tid`.
    ///
    /// # Errors
    /// * [`DeferredError::ConventionsUninitialized`] before
    ///   [`init_calling_conventions`](crate::init_calling_conventions).
    /// * [`DeferredError::NoSuchThread`] if `tid` does not exist.
    /// * Allocation and mapping failures while preparing the thread.
    pub fn schedule(&self, work: Work, tid: Pid, notify: Notify) -> Result<Job, DeferredError> {
        calling_convention(work.convention)?;
        let task = TaskRef::find(&self.host.tasks, tid).ok_or(DeferredError::NoSuchThread(tid))?;

        let handler = Arc::new(WorkHandler::new(work, task, notify));
        let job = Job::new(
            Arc::clone(&handler),
            Arc::clone(&self.detach),
            Arc::clone(&self.host.sleeper),
        );
        // On failure the job is dropped, detaching the handler.
        self.append_work(&handler)?;
        Ok(job)
    }

    /// Put `handler` at the back of its thread's queue, installing it if the
    /// queue was empty.
    ///
    /// # Errors
    /// Allocation and mapping failures; the queue is left as it was.
    pub fn append_work(&self, handler: &Arc<WorkHandler>) -> Result<(), DeferredError> {
        let task = handler.task();
        let (tgid, tid) = (task.tgid(), task.pid());

        let mut stale = None;
        let result = {
            let mut registry = self.registry.lock();
            self.append_locked(&mut registry, handler, tgid, tid, &mut stale)
        };

        if let Some(thread) = stale {
            self.discard_all(thread.into_queue());
        }
        result
    }

    fn append_locked(
        &self,
        registry: &mut ProcessRegistry,
        handler: &Arc<WorkHandler>,
        tgid: Pid,
        tid: Pid,
        stale: &mut Option<ThreadState>,
    ) -> Result<(), DeferredError> {
        let task = handler.task();

        let process = match registry.processes.entry(tgid) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let stub = return_stub(self.arch).ok_or(DeferredError::NoReturnStub(self.arch))?;
                let mapping = StubMapping::create(
                    &self.host.memory,
                    &self.host.allocator,
                    task,
                    &self.config,
                    stub,
                )?;
                entry.insert(ProcessState::new(mapping))
            }
        };
        let stub = process.stub.address();

        if process.threads.get(&tid).is_some_and(|t| t.task != *task) {
            info!("thread id {tid} of process {tgid} was reused, dropping its old state");
            *stale = process.threads.remove(&tid);
        }

        let thread = match process.threads.entry(tid) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let stack = PrivateStack::new(
                    &self.host.memory,
                    &self.host.allocator,
                    task,
                    &self.config,
                )?;
                entry.insert(ThreadState::new(task.clone(), stack))
            }
        };

        if !handler.mark_scheduled() {
            debug!("work for thread {tid} dropped before it was queued");
            return Ok(());
        }

        let idle = thread.queue.is_empty();
        thread.queue.push_back(Arc::clone(handler));
        if idle {
            match self.preempt_execution_for_work(thread, handler.work(), stub) {
                Ok(regs) => Self::install(thread, handler, regs),
                Err(e) => {
                    thread.queue.pop_back();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Build the call frame for `work` on the thread's private stack and
    /// return the registers that enter it.
    ///
    /// # Errors
    /// [`DeferredError::OutOfReach`] if the stub or stack lie beyond the
    /// convention's word size, [`DeferredError::StackExhausted`] or a failed
    /// write to the stack.
    pub(crate) fn preempt_execution_for_work(
        &self,
        thread: &ThreadState,
        work: &Work,
        stub: VirtualAddress,
    ) -> Result<UserRegisters, DeferredError> {
        let convention = calling_convention(work.convention)?;
        let word = convention.word_size();
        let stack_end = thread.stack.user_top().as_u64().saturating_sub(1);
        if let Some(address) = [stub.as_u64(), stack_end]
            .into_iter()
            .find(|&a| !word.reaches(a))
        {
            return Err(DeferredError::OutOfReach(address));
        }

        let mut frame = StackBuilder::new(thread.stack.user_top(), thread.stack.user_bottom());
        frame.align_down(STACK_ALIGNMENT)?;
        convention.setup_stack(work, &mut frame)?;
        frame.push(stub.as_u64(), word)?;
        thread.stack.write(frame.sp(), &frame.image())?;

        let mut regs = UserRegisters::default();
        convention.setup_registers(work, &mut regs);
        regs.rsp = frame.sp();
        Ok(regs)
    }

    fn install(thread: &ThreadState, handler: &WorkHandler, regs: UserRegisters) {
        thread.preempt.install(regs);
        handler.mark_installed();
        if !thread.task.is_running() {
            thread.task.wake_up();
        }
    }

    /// Host hook on every return to user mode of `task`.
    ///
    /// Returns whether `regs` was redirected.
    pub fn on_return_to_user(&self, task: TaskPtr, regs: &mut UserRegisters) -> bool {
        let ops = &self.host.tasks;
        let (tgid, tid) = (ops.tgid(task), ops.pid(task));
        let registry = self.registry.lock();
        registry
            .thread(tgid, tid)
            .filter(|thread| thread.task.ptr() == task)
            .is_some_and(|thread| thread.preempt.apply(regs))
    }

    /// The front work item of `current` returned `response`.
    ///
    /// `frame` is the thread's live register state; it is pointed at the
    /// next queued item, or back at the state the thread had before the
    /// first redirection.
    ///
    /// # Errors
    /// [`DeferredError::NoWorkInFlight`] if the thread has nothing queued.
    pub fn finish(
        &self,
        current: TaskPtr,
        response: u64,
        frame: &mut UserRegisters,
    ) -> Result<(), DeferredError> {
        let ops = &self.host.tasks;
        let (tgid, tid) = (ops.tgid(current), ops.pid(current));

        let mut failed = Vec::new();
        let done = {
            let mut registry = self.registry.lock();
            let process = registry
                .processes
                .get_mut(&tgid)
                .ok_or(DeferredError::NoWorkInFlight(tid))?;
            let stub = process.stub.address();
            let thread = process
                .threads
                .get_mut(&tid)
                .filter(|thread| thread.task.ptr() == current)
                .ok_or(DeferredError::NoWorkInFlight(tid))?;
            let done = thread
                .queue
                .pop_front()
                .ok_or(DeferredError::NoWorkInFlight(tid))?;

            let mut next = None;
            while let Some(candidate) = thread.queue.front().cloned() {
                if candidate.is_dead() {
                    thread.queue.pop_front();
                    continue;
                }
                match self.preempt_execution_for_work(thread, candidate.work(), stub) {
                    Ok(regs) => {
                        candidate.mark_installed();
                        next = Some(regs);
                        break;
                    }
                    Err(e) => {
                        warn!("cannot start queued work on thread {tid}: {e}");
                        thread.queue.pop_front();
                        failed.push(candidate);
                    }
                }
            }

            match next {
                Some(regs) => thread.preempt.chain(frame, regs),
                None => {
                    if let Some(original) = thread.preempt.take_original() {
                        *frame = original;
                    }
                }
            }
            done
        };

        self.deliver(&done, Some(response));
        self.discard_all(failed);
        Ok(())
    }

    /// Forget process `tgid`, discarding all of its queued work.
    pub fn free_process(&self, tgid: Pid) {
        let Some(mut process) = self.registry.lock().processes.remove(&tgid) else {
            return;
        };
        let queued = process.drain();
        info!(
            "process {tgid} released, {} work item(s) discarded",
            queued.len()
        );
        drop(process);
        self.discard_all(queued);
    }

    /// User address of the return stub of process `tgid`.
    #[must_use]
    pub fn return_stub_address(&self, tgid: Pid) -> Option<VirtualAddress> {
        self.registry
            .lock()
            .processes
            .get(&tgid)
            .map(|process| process.stub.address())
    }

    /// Number of items queued on thread `tid` of process `tgid`.
    #[must_use]
    pub fn pending_work(&self, tgid: Pid, tid: Pid) -> usize {
        self.registry
            .lock()
            .thread(tgid, tid)
            .map_or(0, |thread| thread.queue.len())
    }

    fn deliver(&self, handler: &WorkHandler, response: Option<u64>) {
        let delivery = {
            let _guard = self.detach.lock();
            match response {
                Some(response) => handler.complete(response),
                None => handler.discard(),
            }
        };
        if let Some(delivery) = delivery {
            delivery.fire();
        }
    }

    fn discard_all(&self, handlers: impl IntoIterator<Item = Arc<WorkHandler>>) {
        for handler in handlers {
            debug!("discarding {:?}", handler.work());
            self.deliver(&handler, None);
        }
    }
}

impl Drop for DeferredExecution {
    fn drop(&mut self) {
        let processes: Vec<ProcessState> = self
            .registry
            .get_mut()
            .processes
            .drain()
            .map(|(_, process)| process)
            .collect();
        for mut process in processes {
            let queued = process.drain();
            let ProcessState { stub, .. } = process;
            stub.leak();
            self.discard_all(queued);
        }
    }
}
