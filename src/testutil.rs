//! Shared fixtures for unit tests

use crate::error::{VscsiError, VscsiResult};
use crate::io::{Completion, IoReq, ReqCompleter};
use crate::medium::VscsiMedium;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct LogInner {
    enqueued: Vec<IoReq>,
    locks: Vec<bool>,
}

/// What a [`MockMedium`] was asked to do
#[derive(Clone, Default)]
pub struct MediumLog {
    inner: Arc<Mutex<LogInner>>,
}

impl MediumLog {
    /// I/O requests enqueued so far; the caller now owns them
    pub fn take_enqueued(&self) -> Vec<IoReq> {
        std::mem::take(&mut self.inner.lock().unwrap().enqueued)
    }

    pub fn locks(&self) -> Vec<bool> {
        self.inner.lock().unwrap().locks.clone()
    }
}

/// Medium that parks every I/O request for the test to complete
pub struct MockMedium {
    size: Option<u64>,
    present: bool,
    log: MediumLog,
}

impl MockMedium {
    pub fn new(size: u64) -> (Self, MediumLog) {
        let log = MediumLog::default();
        let medium = MockMedium {
            size: Some(size),
            present: true,
            log: log.clone(),
        };
        (medium, log)
    }

    /// Empty drive
    pub fn absent() -> (Self, MediumLog) {
        let (mut medium, log) = Self::new(0);
        medium.present = false;
        (medium, log)
    }

    /// Medium whose size query fails
    pub fn failing_size() -> (Self, MediumLog) {
        let (mut medium, log) = Self::new(0);
        medium.size = None;
        (medium, log)
    }
}

impl VscsiMedium for MockMedium {
    fn size(&self) -> VscsiResult<u64> {
        self.size
            .ok_or_else(|| VscsiError::Backend("size unavailable".into()))
    }

    fn enqueue(&mut self, io: IoReq) {
        self.log.inner.lock().unwrap().enqueued.push(io);
    }

    fn set_lock(&mut self, locked: bool) -> VscsiResult<()> {
        self.log.inner.lock().unwrap().locks.push(locked);
        Ok(())
    }

    fn is_present(&self) -> bool {
        self.present
    }
}

/// Completer that records every completion
pub fn collector() -> (ReqCompleter, Arc<Mutex<Vec<Completion>>>) {
    let done = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&done);
    let completer = ReqCompleter::new(move |c| sink.lock().unwrap().push(c));
    (completer, done)
}
