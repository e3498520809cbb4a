//! Virtual SCSI logical unit emulation
//!
//! This library emulates SCSI logical units on top of user-supplied storage.
//! A [`VscsiDevice`] holds a table of LUNs, answers the device-level commands
//! and routes everything else to the LUN's class processor. The only class
//! so far is MMC, a read-only CD/DVD-ROM drive with 2048 byte sectors.
//!
//! Users implement [`VscsiMedium`] to provide the disc contents. Sector reads
//! are handed to the medium as [`IoReq`]s and may be completed from any
//! thread; every request reaches the device's completion callback exactly
//! once.
//!
//! # Example
//!
//! ```no_run
//! use vscsi::{IoReq, LunType, Request, SgBuf, VscsiDevice, VscsiMedium, VscsiResult};
//!
//! struct IsoImage {
//!     data: Vec<u8>,
//! }
//!
//! impl VscsiMedium for IsoImage {
//!     fn size(&self) -> VscsiResult<u64> {
//!         Ok(self.data.len() as u64)
//!     }
//!
//!     fn enqueue(&mut self, mut io: IoReq) {
//!         let start = io.offset() as usize;
//!         let end = start + io.len();
//!         io.sg_buf_mut().copy_from_buf(&self.data[start..end]);
//!         io.complete(Ok(()));
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = VscsiDevice::builder()
//!     .on_complete(|done| println!("request {} -> status {:#04x}", done.req.tag(), done.status))
//!     .build()?;
//!
//! let image = IsoImage { data: vec![0u8; 2048 * 64] };
//! device.attach_lun(0, LunType::Mmc, Box::new(image))?;
//!
//! // READ(10) of one sector at LBA 16
//! let cdb = [0x28, 0, 0, 0, 0, 16, 0, 0, 1, 0];
//! device.enqueue_request(Request::new(1, 0, cdb, SgBuf::with_len(2048)));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod device;
pub mod error;
pub mod io;
pub mod lun;
pub mod medium;
pub mod mmc;
pub mod request;
pub mod scsi;
pub mod sense;
pub mod sgbuf;

#[cfg(test)]
mod testutil;

pub use device::{VscsiDevice, VscsiDeviceBuilder};
pub use error::{VscsiError, VscsiResult};
pub use io::{Completion, IoReq, ReqCompleter, TxDir};
pub use lun::{Lun, LunCore, LunDesc, LunOps, LunRegistry, LunType};
pub use medium::VscsiMedium;
pub use request::{ReqCompletion, ReqDisposition, Request};
pub use sense::{SenseData, SenseOutcome};
pub use sgbuf::SgBuf;

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
