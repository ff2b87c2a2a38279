use libos_alloc::{BuddyAllocator, PageAllocator};
use libos_deferred::{
    CallingConvention, DeferredExecution, EngineHost, Notify, Work, init_calling_conventions,
};
use libos_info::deferred::{DELEGATED_MAX_BUFFER, EngineConfig, attention};
use libos_info::status::{ErrorKind, STATUS_OK};
use libos_sync::Sleeper;
use libos_syscall::{DelegatedCalls, DispatchError, UserMemory};
use libos_task::UserRegisters;
use libos_vmem::MemoryInterface;
use libos_vmem::fake::FakeKernel;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const USER_BASE: u64 = 0x1000_0000;

/// One flat region of user memory starting at `USER_BASE`.
struct FlatMemory(Mutex<Vec<u8>>);

impl FlatMemory {
    fn new(len: usize) -> Self {
        Self(Mutex::new(vec![0; len]))
    }

    fn range(&self, at: u64, len: usize) -> Result<std::ops::Range<usize>, DispatchError> {
        let size = self.0.lock().unwrap().len();
        at.checked_sub(USER_BASE)
            .and_then(|o| usize::try_from(o).ok())
            .filter(|&o| o + len <= size)
            .map(|o| o..o + len)
            .ok_or(DispatchError::BadUserAddress(at))
    }

    fn bytes(&self, at: u64, len: usize) -> Vec<u8> {
        let range = self.range(at, len).unwrap();
        self.0.lock().unwrap()[range].to_vec()
    }
}

impl UserMemory for FlatMemory {
    fn copy_from_user(&self, dst: &mut [u8], src: u64) -> Result<(), DispatchError> {
        let range = self.range(src, dst.len())?;
        dst.copy_from_slice(&self.0.lock().unwrap()[range]);
        Ok(())
    }

    fn copy_to_user(&self, dst: u64, src: &[u8]) -> Result<(), DispatchError> {
        let range = self.range(dst, src.len())?;
        self.0.lock().unwrap()[range].copy_from_slice(src);
        Ok(())
    }
}

struct StdSleeper(Instant);

impl Sleeper for StdSleeper {
    fn now(&self) -> Duration {
        self.0.elapsed()
    }

    fn relax(&self) {
        std::thread::yield_now();
    }
}

struct Rig {
    host: Arc<FakeKernel>,
    engine: Arc<DeferredExecution>,
    memory: Arc<FlatMemory>,
    calls: DelegatedCalls,
}

fn rig() -> Rig {
    init_calling_conventions();
    let host = Arc::new(FakeKernel::new());
    let buddy: Arc<dyn BuddyAllocator> = host.clone();
    let engine = DeferredExecution::new(
        EngineHost {
            tasks: host.clone(),
            memory: MemoryInterface::new(host.clone(), host.clone()),
            allocator: Arc::new(PageAllocator::new(buddy)),
            sleeper: Arc::new(StdSleeper(Instant::now())),
        },
        EngineConfig::default(),
    );
    let memory = Arc::new(FlatMemory::new(2 * DELEGATED_MAX_BUFFER));
    let calls = DelegatedCalls::new(Arc::clone(&engine), memory.clone(), host.clone());
    Rig {
        host,
        engine,
        memory,
        calls,
    }
}

fn status(kind: ErrorKind) -> u64 {
    kind.status_word()
}

#[test]
fn db_pull_is_two_phase() {
    let rig = rig();
    rig.calls.with_database(|db| {
        db.register_short("sum", Arc::new(|a: &[u64; 4]| a.iter().sum::<u64>()))
            .unwrap();
        db.register_extended("upper", Arc::new(|b: &mut [u8]| {
            b.make_ascii_uppercase();
            b.len() as u64
        }))
        .unwrap();
    });
    let mut frame = UserRegisters::default();

    let needed = rig
        .calls
        .dispatch(attention::DB_PULL, [0, 0, 0, 0, 0], &mut frame);
    assert_eq!(needed, 6 + 3 + 6 + 5);

    let written = rig
        .calls
        .dispatch(attention::DB_PULL, [USER_BASE, needed, 0, 0, 0], &mut frame);
    assert_eq!(written, needed);
    let records = rig.memory.bytes(USER_BASE, 20);
    assert_eq!(&records[..9], &[1, 0, 0, 0, 1, 3, b's', b'u', b'm']);
    assert_eq!(&records[9..], &[2, 0, 0, 0, 2, 5, b'u', b'p', b'p', b'e', b'r']);

    // Undersized buffers only get whole records.
    let written = rig
        .calls
        .dispatch(attention::DB_PULL, [USER_BASE, 12, 0, 0, 0], &mut frame);
    assert_eq!(written, 9);
}

#[test]
fn short_calls_pass_four_words() {
    let rig = rig();
    let id = rig.calls.with_database(|db| {
        db.register_short("sum", Arc::new(|a: &[u64; 4]| a.iter().sum::<u64>()))
            .unwrap()
    });
    let mut frame = UserRegisters::default();
    let r = rig
        .calls
        .dispatch(attention::SHORT, [u64::from(id), 1, 2, 3, 4], &mut frame);
    assert_eq!(r, 10);
}

#[test]
fn extended_calls_round_trip_the_buffer() {
    let rig = rig();
    let id = rig.calls.with_database(|db| {
        db.register_extended("upper", Arc::new(|b: &mut [u8]| {
            b.make_ascii_uppercase();
            b.len() as u64
        }))
        .unwrap()
    });
    rig.memory.copy_to_user(USER_BASE + 64, b"hello").unwrap();

    let mut frame = UserRegisters::default();
    let r = rig.calls.dispatch(
        attention::EXTENDED,
        [u64::from(id), USER_BASE + 64, 5, 0, 0],
        &mut frame,
    );
    assert_eq!(r, 5);
    assert_eq!(rig.memory.bytes(USER_BASE + 64, 5), b"HELLO");
}

#[test]
fn bad_requests_come_back_as_status_words() {
    let rig = rig();
    let (short, extended) = rig.calls.with_database(|db| {
        (
            db.register_short("nop", Arc::new(|_: &[u64; 4]| 0u64)).unwrap(),
            db.register_extended("nop2", Arc::new(|_: &mut [u8]| 0u64))
                .unwrap(),
        )
    });
    let mut frame = UserRegisters::default();

    let unknown = rig
        .calls
        .dispatch(attention::SHORT, [99, 0, 0, 0, 0], &mut frame);
    assert_eq!(unknown, status(ErrorKind::IllegalArgument));

    let wrong = rig
        .calls
        .dispatch(attention::SHORT, [u64::from(extended), 0, 0, 0, 0], &mut frame);
    assert_eq!(wrong, status(ErrorKind::IllegalArgument));

    let wrong = rig.calls.dispatch(
        attention::EXTENDED,
        [u64::from(short), USER_BASE, 1, 0, 0],
        &mut frame,
    );
    assert_eq!(wrong, status(ErrorKind::IllegalArgument));

    let too_big = rig.calls.dispatch(
        attention::EXTENDED,
        [u64::from(extended), USER_BASE, DELEGATED_MAX_BUFFER as u64 + 1, 0, 0],
        &mut frame,
    );
    assert_eq!(too_big, status(ErrorKind::IllegalArgument));

    let faulting = rig.calls.dispatch(
        attention::EXTENDED,
        [u64::from(extended), 0x10, 4, 0, 0],
        &mut frame,
    );
    assert_eq!(faulting, status(ErrorKind::IllegalArgument));
}

#[test]
fn unknown_attention_ids_are_ignored() {
    let rig = rig();
    let mut frame = UserRegisters {
        rip: 0x1234,
        ..UserRegisters::default()
    };
    let r = rig.calls.dispatch(42, [1, 2, 3, 4, 5], &mut frame);
    assert_eq!(r, STATUS_OK as u64);
    assert_eq!(frame.rip, 0x1234);
}

#[test]
fn completion_notice_finishes_the_running_work() {
    let rig = rig();
    let t = rig.host.spawn_task(10, 10);
    let job = rig
        .engine
        .schedule(
            Work::new(0x40_1000, CallingConvention::SysV),
            10,
            Notify::Wait,
        )
        .unwrap();

    let original = UserRegisters {
        rip: 0x0040_5555,
        rax: 0x77,
        cs: 0x33,
        ss: 0x2b,
        rflags: 0x246,
        ..UserRegisters::default()
    };
    let mut frame = original;
    assert!(rig.engine.on_return_to_user(t, &mut frame));

    rig.host.set_current(t);
    let r = rig
        .calls
        .dispatch(attention::NTFY_COMPLETE, [99, 0, 0, 0, 0], &mut frame);
    assert_eq!(r, 0x77);
    assert_eq!(frame, original);
    assert_eq!(job.wait(Some(Duration::from_secs(1))), Ok(99));

    // Nothing left in flight.
    let r = rig
        .calls
        .dispatch(attention::NTFY_COMPLETE, [1, 0, 0, 0, 0], &mut frame);
    assert_eq!(r, status(ErrorKind::IllegalState));
}
