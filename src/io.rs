//! Transfer and completion protocol
//!
//! Data-moving commands leave the LUN as an [`IoReq`] owned by the medium.
//! Every request, synchronous or not, ends at [`ReqCompleter::complete`],
//! which keeps the device's current sense data and notifies the submitter.

use crate::error::{VscsiError, VscsiResult};
use crate::medium::VscsiMedium;
use crate::request::{Enqueued, ReqCompletion, ReqDisposition, Request};
use crate::scsi::{asc, scsi_status, sense_key};
use crate::sense::SenseData;
use crate::sgbuf::SgBuf;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Transfer direction of an I/O request
///
/// The MMC class only reads. `Write` is there for writable LUN classes;
/// a failed write completes as MEDIUM ERROR / WRITE ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxDir {
    /// Medium to initiator
    Read,
    /// Initiator to medium
    Write,
}

/// A finished request as delivered to the submitter
#[derive(Debug)]
pub struct Completion {
    pub req: Request,
    /// SCSI status byte
    pub status: u8,
    /// Whether the request went through the backend
    pub was_enqueued: bool,
    /// Result reported by the backend, always `Ok` for synchronous requests
    pub backend_status: VscsiResult<()>,
}

/// Callback receiving finished requests
pub type CompletionFn = dyn Fn(Completion) + Send + Sync;

struct CompleterInner {
    sense: Mutex<SenseData>,
    on_complete: Box<CompletionFn>,
}

/// Completion entry point shared by a device and its in-flight I/O
#[derive(Clone)]
pub struct ReqCompleter {
    inner: Arc<CompleterInner>,
}

impl fmt::Debug for ReqCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqCompleter")
            .field("sense", &self.current_sense())
            .finish_non_exhaustive()
    }
}

impl ReqCompleter {
    pub fn new<F>(on_complete: F) -> Self
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        Self::from_boxed(Box::new(on_complete))
    }

    pub(crate) fn from_boxed(on_complete: Box<CompletionFn>) -> Self {
        ReqCompleter {
            inner: Arc::new(CompleterInner {
                sense: Mutex::new(SenseData::no_sense()),
                on_complete,
            }),
        }
    }

    /// Deliver a finished request
    ///
    /// CHECK CONDITION becomes the current sense data, GOOD clears it.
    pub fn complete(&self, done: ReqCompletion, was_enqueued: bool, backend_status: VscsiResult<()>) {
        let (req, status) = done.into_parts();

        {
            let mut sense = self.inner.sense.lock().unwrap_or_else(PoisonError::into_inner);
            *sense = if status == scsi_status::CHECK_CONDITION {
                req.outcome().to_sense_data()
            } else {
                SenseData::no_sense()
            };
        }

        log::debug!(
            "Request {} on LUN {} complete: status={:#04x} outcome={:?} enqueued={}",
            req.tag(),
            req.lun(),
            status,
            req.outcome(),
            was_enqueued
        );

        (self.inner.on_complete)(Completion {
            req,
            status,
            was_enqueued,
            backend_status,
        });
    }

    pub fn current_sense(&self) -> SenseData {
        self.inner.sense.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Return the current sense data and reset it to NO SENSE
    pub fn take_sense(&self) -> SenseData {
        let mut sense = self.inner.sense.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *sense)
    }
}

/// A byte-range transfer owned by the medium until completed
pub struct IoReq {
    // `None` only once completed
    req: Option<Request>,
    dir: TxDir,
    offset: u64,
    len: usize,
    completer: ReqCompleter,
}

impl fmt::Debug for IoReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoReq")
            .field("tag", &self.req.as_ref().map(Request::tag))
            .field("dir", &self.dir)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl IoReq {
    pub fn dir(&self) -> TxDir {
        self.dir
    }

    /// Byte offset into the medium
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the transfer in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn request(&self) -> &Request {
        match &self.req {
            Some(req) => req,
            None => unreachable!("I/O request used after completion"),
        }
    }

    /// Data buffer of the originating request
    pub fn sg_buf_mut(&mut self) -> &mut SgBuf {
        match &mut self.req {
            Some(req) => req.sg_buf_mut(),
            None => unreachable!("I/O request used after completion"),
        }
    }

    /// Finish the transfer
    ///
    /// A backend error turns into a MEDIUM ERROR for the guest.
    pub fn complete(mut self, result: VscsiResult<()>) {
        if let Some(req) = self.req.take() {
            self.finish(req, result);
        }
    }

    fn finish(&self, req: Request, result: VscsiResult<()>) {
        let done = match &result {
            Ok(()) => req.set_ok(),
            Err(e) => {
                log::warn!(
                    "{:?} of {} bytes at offset {} failed: {}",
                    self.dir,
                    self.len,
                    self.offset,
                    e
                );
                let code = match self.dir {
                    TxDir::Read => asc::UNRECOVERED_READ_ERROR,
                    TxDir::Write => asc::WRITE_ERROR,
                };
                req.set_error(sense_key::MEDIUM_ERROR, code, 0)
            }
        };
        self.completer.complete(done, true, result);
    }
}

impl Drop for IoReq {
    fn drop(&mut self) {
        if let Some(req) = self.req.take() {
            log::error!("I/O request {} dropped by the backend without completion", req.tag());
            let err = VscsiError::Aborted(format!("request {} dropped", req.tag()));
            self.finish(req, Err(err));
        }
    }
}

/// Hand a non-empty, in-bounds transfer to the medium
pub fn enqueue_transfer(
    medium: &mut dyn VscsiMedium,
    completer: &ReqCompleter,
    req: Request,
    dir: TxDir,
    offset: u64,
    len: usize,
) -> ReqDisposition {
    debug_assert!(len > 0, "zero-length transfers complete synchronously");

    log::trace!(
        "Enqueue {:?} for request {}: offset={} len={}",
        dir,
        req.tag(),
        offset,
        len
    );

    medium.enqueue(IoReq {
        req: Some(req),
        dir,
        offset,
        len,
        completer: completer.clone(),
    });

    ReqDisposition::Enqueued(Enqueued::new())
}
