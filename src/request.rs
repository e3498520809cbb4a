//! SCSI requests and their terminal disposition
//!
//! A [`Request`] is consumed by whichever path finishes it. Handlers either
//! turn it into a [`ReqCompletion`] through [`Request::set_ok`] /
//! [`Request::set_error`], or give it to the transfer layer which hands back
//! an [`Enqueued`] token. [`ReqDisposition`] holds exactly one of the two, so
//! a handler cannot complete a request twice or forget to complete it.

use crate::scsi::{asc, cdb_len, scsi_status, sense_key};
use crate::sense::SenseOutcome;
use crate::sgbuf::SgBuf;

/// A SCSI command submitted to a virtual device
#[derive(Debug)]
pub struct Request {
    tag: u64,
    lun: u32,
    cdb: Vec<u8>,
    sg_buf: SgBuf,
    outcome: SenseOutcome,
}

impl Request {
    /// Create a request for `lun`
    ///
    /// `tag` identifies the request to the submitter when it completes; the
    /// capacity of `sg_buf` bounds the data phase.
    pub fn new(tag: u64, lun: u32, cdb: impl Into<Vec<u8>>, sg_buf: SgBuf) -> Self {
        Request {
            tag,
            lun,
            cdb: cdb.into(),
            sg_buf,
            outcome: SenseOutcome::Ok,
        }
    }

    pub fn tag(&self) -> u64 {
        self.tag
    }

    pub fn lun(&self) -> u32 {
        self.lun
    }

    pub fn cdb(&self) -> &[u8] {
        &self.cdb
    }

    pub fn sg_buf(&self) -> &SgBuf {
        &self.sg_buf
    }

    pub fn sg_buf_mut(&mut self) -> &mut SgBuf {
        &mut self.sg_buf
    }

    pub fn into_sg_buf(self) -> SgBuf {
        self.sg_buf
    }

    pub fn outcome(&self) -> SenseOutcome {
        self.outcome
    }

    /// Finish the request with GOOD status
    pub fn set_ok(mut self) -> ReqCompletion {
        self.outcome = SenseOutcome::Ok;
        ReqCompletion {
            req: self,
            status: scsi_status::GOOD,
        }
    }

    /// Finish the request with CHECK CONDITION and the given sense triple
    pub fn set_error(mut self, key: u8, asc: u8, ascq: u8) -> ReqCompletion {
        self.outcome = SenseOutcome::Error { key, asc, ascq };
        ReqCompletion {
            req: self,
            status: scsi_status::CHECK_CONDITION,
        }
    }

    /// Reject CDBs too short for their opcode before anything indexes them
    pub(crate) fn validate_cdb(self) -> Result<Self, ReqCompletion> {
        let Some(&opcode) = self.cdb.first() else {
            log::warn!("Request {} has an empty CDB", self.tag);
            return Err(self.set_error(sense_key::ILLEGAL_REQUEST, asc::ILLEGAL_OPCODE, 0));
        };

        let needed = cdb_len(opcode);
        if self.cdb.len() < needed {
            log::warn!(
                "CDB for opcode {:#04x} too short: got {} bytes, need {}",
                opcode,
                self.cdb.len(),
                needed
            );
            return Err(self.set_error(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB, 0));
        }

        Ok(self)
    }
}

/// A request finished without backend I/O
#[derive(Debug)]
pub struct ReqCompletion {
    req: Request,
    status: u8,
}

impl ReqCompletion {
    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn request(&self) -> &Request {
        &self.req
    }

    pub fn into_parts(self) -> (Request, u8) {
        (self.req, self.status)
    }
}

/// Proof that a request was handed to the storage backend
///
/// Only the transfer layer can create one.
#[derive(Debug)]
pub struct Enqueued {
    _private: (),
}

impl Enqueued {
    pub(crate) fn new() -> Self {
        Enqueued { _private: () }
    }
}

/// How a LUN disposed of a request
#[must_use]
#[derive(Debug)]
pub enum ReqDisposition {
    /// Finished synchronously; the caller delivers the completion
    Completed(ReqCompletion),
    /// Owned by the backend, which completes it later
    Enqueued(Enqueued),
}
