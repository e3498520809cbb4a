//! Storage backend interface
//!
//! Implement [`VscsiMedium`] to put a disc image (or anything else that
//! behaves like one) behind a LUN.

use crate::error::VscsiResult;
use crate::io::IoReq;

/// Backing medium of a logical unit
///
/// Transfers are asynchronous: [`enqueue`](VscsiMedium::enqueue) takes
/// ownership of the I/O request and must eventually call
/// [`IoReq::complete`] on it, from any thread. Dropping an `IoReq` without
/// completing it completes the request as failed.
pub trait VscsiMedium: Send {
    /// Size of the medium in bytes
    fn size(&self) -> VscsiResult<u64>;

    /// Start moving data for `io`
    fn enqueue(&mut self, io: IoReq);

    /// Lock or unlock the medium against ejection
    fn set_lock(&mut self, _locked: bool) -> VscsiResult<()> {
        Ok(())
    }

    /// Whether a medium is currently inserted
    fn is_present(&self) -> bool {
        true
    }

    /// Vendor identification (8 chars max)
    fn vendor_id(&self) -> &str {
        "VSCSI"
    }

    /// Product identification (16 chars max)
    fn product_id(&self) -> &str {
        "CD-ROM"
    }

    /// Product revision (4 chars max)
    fn product_rev(&self) -> &str {
        "1.0"
    }
}
