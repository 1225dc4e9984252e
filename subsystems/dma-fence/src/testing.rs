//! Test helpers: a capturing logger and a configurable driver.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

use crate::{ContextAllocator, Fence, FenceLock, FenceOps, Timestamp};

// =============================================================================
// LOG CAPTURE
// =============================================================================

struct CaptureLogger;

static RECORDS: Mutex<Vec<(ThreadId, Level, String)>> = Mutex::new(Vec::new());
static LOGGER: CaptureLogger = CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        RECORDS
            .lock()
            .push((thread::current().id(), record.level(), format!("{}", record.args())));
    }

    fn flush(&self) {}
}

/// Records logged by the capturing thread from now on
pub(crate) struct LogCapture {
    thread: ThreadId,
    start: usize,
}

/// Start capturing log output of the calling thread
pub(crate) fn capture() -> LogCapture {
    static INIT: Once<()> = Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    });
    LogCapture {
        thread: thread::current().id(),
        start: RECORDS.lock().len(),
    }
}

impl LogCapture {
    pub(crate) fn messages(&self, level: Level) -> Vec<String> {
        RECORDS.lock()[self.start..]
            .iter()
            .filter(|(t, l, _)| *t == self.thread && *l == level)
            .map(|(_, _, m)| m.clone())
            .collect()
    }

    pub(crate) fn count_containing(&self, needle: &str) -> usize {
        RECORDS.lock()[self.start..]
            .iter()
            .filter(|(t, _, m)| *t == self.thread && m.contains(needle))
            .count()
    }
}

// =============================================================================
// TEST DRIVER
// =============================================================================

/// Driver with observable hooks
pub(crate) struct TestOps {
    pub(crate) arm: AtomicBool,
    pub(crate) hw_done: AtomicBool,
    pub(crate) enable_calls: AtomicUsize,
    pub(crate) release_calls: AtomicUsize,
    pub(crate) deadlines: Mutex<Vec<Timestamp>>,
}

impl TestOps {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            arm: AtomicBool::new(true),
            hw_done: AtomicBool::new(false),
            enable_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
            deadlines: Mutex::new(Vec::new()),
        })
    }
}

impl FenceOps for TestOps {
    fn driver_name<'a>(&'a self, _fence: &'a Fence) -> &'a str {
        "test-driver"
    }

    fn timeline_name<'a>(&'a self, _fence: &'a Fence) -> &'a str {
        "test-timeline"
    }

    fn enable_signaling(&self, _fence: &Fence) -> bool {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        self.arm.load(Ordering::SeqCst)
    }

    fn signaled(&self, _fence: &Fence) -> bool {
        self.hw_done.load(Ordering::SeqCst)
    }

    fn release(&self, _fence: &Fence) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn set_deadline(&self, _fence: &Fence, deadline: Timestamp) {
        self.deadlines.lock().push(deadline);
    }
}

/// Fresh fence on its own context and lock
pub(crate) fn test_fence(seqno: u64) -> (Arc<Fence>, Arc<TestOps>) {
    static CONTEXTS: ContextAllocator = ContextAllocator::new();
    let ops = TestOps::new();
    let lock = Arc::new(FenceLock::new("test"));
    let fence = Fence::new(ops.clone(), lock, CONTEXTS.alloc(1), seqno);
    (fence, ops)
}
