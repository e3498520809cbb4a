//! Virtual SCSI device: LUN table, device-level commands and completion
//!
//! The device owns one lock per LUN. Commands that do not depend on a
//! particular unit (REPORT LUNS, REQUEST SENSE) and commands addressed to a
//! LUN that is not attached are answered here; everything else is handed to
//! the LUN's class processor.

use crate::codec::{read_be32, write_be32};
use crate::error::{VscsiError, VscsiResult};
use crate::io::{Completion, CompletionFn, ReqCompleter};
use crate::lun::{Lun, LunRegistry, LunType};
use crate::medium::VscsiMedium;
use crate::request::{ReqCompletion, ReqDisposition, Request};
use crate::scsi::{asc, peripheral, sense_key, ScsiOpcode};
use crate::sense::SenseData;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Default number of addressable LUNs
pub const DEFAULT_MAX_LUNS: u32 = 256;

/// Flat space addressing covers 14 bits of LUN number
const MAX_FLAT_LUNS: u32 = 1 << 14;

const REPORT_LUNS_HEADER_LEN: usize = 8;
const REPORT_LUNS_ENTRY_LEN: usize = 8;
const ABSENT_INQUIRY_LEN: usize = 36;

type LunSlot = Arc<Mutex<Lun>>;

/// A virtual SCSI target with a set of logical units
pub struct VscsiDevice {
    registry: LunRegistry,
    luns: RwLock<BTreeMap<u32, LunSlot>>,
    max_luns: u32,
    completer: ReqCompleter,
}

impl std::fmt::Debug for VscsiDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VscsiDevice")
            .field("luns", &self.lun_ids())
            .field("max_luns", &self.max_luns)
            .finish_non_exhaustive()
    }
}

fn lock_lun(slot: &LunSlot) -> MutexGuard<'_, Lun> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VscsiDevice {
    /// Create a new builder for configuring the device
    pub fn builder() -> VscsiDeviceBuilder {
        VscsiDeviceBuilder::new()
    }

    pub fn max_luns(&self) -> u32 {
        self.max_luns
    }

    /// Attached LUN numbers in ascending order
    pub fn lun_ids(&self) -> Vec<u32> {
        self.luns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    fn lun(&self, id: u32) -> Option<LunSlot> {
        self.luns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Create a LUN of `lun_type` backed by `medium` at number `id`
    pub fn attach_lun(&self, id: u32, lun_type: LunType, medium: Box<dyn VscsiMedium>) -> VscsiResult<()> {
        if id >= self.max_luns {
            return Err(VscsiError::Config(format!(
                "LUN {} out of range (max {})",
                id, self.max_luns
            )));
        }

        let mut luns = self.luns.write().unwrap_or_else(PoisonError::into_inner);
        if luns.contains_key(&id) {
            return Err(VscsiError::LunExists(id));
        }

        let lun = self.registry.create_lun(lun_type, medium)?;
        log::info!("Attached {} LUN {}", lun_type, id);
        luns.insert(id, Arc::new(Mutex::new(lun)));
        Ok(())
    }

    /// Destroy LUN `id` and hand back its medium
    ///
    /// Fails with [`VscsiError::LunBusy`] while a request is being processed
    /// on the LUN.
    pub fn detach_lun(&self, id: u32) -> VscsiResult<Box<dyn VscsiMedium>> {
        let slot = {
            let mut luns = self.luns.write().unwrap_or_else(PoisonError::into_inner);
            let slot = luns.remove(&id).ok_or(VscsiError::LunNotFound(id))?;
            match Arc::try_unwrap(slot) {
                Ok(slot) => slot,
                Err(slot) => {
                    luns.insert(id, slot);
                    return Err(VscsiError::LunBusy(id));
                }
            }
        };

        let lun = slot.into_inner().unwrap_or_else(PoisonError::into_inner);
        let medium = self.registry.destroy_lun(lun)?;
        log::info!("Detached LUN {}", id);
        Ok(medium)
    }

    /// A new medium was loaded into LUN `id`
    pub fn media_inserted(&self, id: u32) -> VscsiResult<()> {
        let slot = self.lun(id).ok_or(VscsiError::LunNotFound(id))?;
        let mut lun = lock_lun(&slot);
        lun.media_inserted()
    }

    /// The medium of LUN `id` was ejected
    pub fn media_removed(&self, id: u32) -> VscsiResult<()> {
        let slot = self.lun(id).ok_or(VscsiError::LunNotFound(id))?;
        lock_lun(&slot).media_removed();
        Ok(())
    }

    /// Current sense data of the device
    pub fn sense(&self) -> SenseData {
        self.completer.current_sense()
    }

    /// Submit a request
    ///
    /// The completion callback runs exactly once for every request: before
    /// this returns for requests answered without the medium, otherwise when
    /// the medium completes the transfer. A medium that completes inline does
    /// so while the LUN is locked.
    pub fn enqueue_request(&self, req: Request) {
        log::trace!(
            "Request {} LUN {}: CDB {}",
            req.tag(),
            req.lun(),
            hex::encode(req.cdb())
        );

        let req = match req.validate_cdb() {
            Ok(req) => req,
            Err(done) => return self.completer.complete(done, false, Ok(())),
        };

        if let ReqDisposition::Completed(done) = self.dispatch(req) {
            self.completer.complete(done, false, Ok(()));
        }
    }

    fn dispatch(&self, req: Request) -> ReqDisposition {
        let opcode = ScsiOpcode::from_u8(req.cdb()[0]);

        match opcode {
            Some(ScsiOpcode::ReportLuns) => return ReqDisposition::Completed(self.report_luns(req)),
            Some(ScsiOpcode::RequestSense) => return ReqDisposition::Completed(self.request_sense(req)),
            _ => {}
        }

        let Some(slot) = self.lun(req.lun()) else {
            return ReqDisposition::Completed(Self::absent_lun(opcode, req));
        };

        let mut lun = lock_lun(&slot);
        if opcode == Some(ScsiOpcode::TestUnitReady) && lun.is_ready() {
            return ReqDisposition::Completed(req.set_ok());
        }
        lun.process_validated(req, &self.completer)
    }

    fn report_luns(&self, mut req: Request) -> ReqCompletion {
        let alloc_len = read_be32(&req.cdb()[6..10]) as usize;
        let ids = self.lun_ids();

        let mut data = vec![0u8; REPORT_LUNS_HEADER_LEN + ids.len() * REPORT_LUNS_ENTRY_LEN];
        write_be32(&mut data[0..4], (ids.len() * REPORT_LUNS_ENTRY_LEN) as u32);

        for (entry, &id) in data[REPORT_LUNS_HEADER_LEN..]
            .chunks_exact_mut(REPORT_LUNS_ENTRY_LEN)
            .zip(&ids)
        {
            if id < 256 {
                // Peripheral device addressing
                entry[1] = id as u8;
            } else {
                // Flat space addressing
                entry[0] = 0x40 | (id >> 8) as u8;
                entry[1] = id as u8;
            }
        }

        log::debug!("REPORT LUNS: {:?}", ids);
        let len = data.len().min(alloc_len);
        req.sg_buf_mut().copy_from_buf(&data[..len]);
        req.set_ok()
    }

    fn request_sense(&self, mut req: Request) -> ReqCompletion {
        let alloc_len = usize::from(req.cdb()[4]);
        let data = self.completer.take_sense().to_bytes();

        let len = data.len().min(alloc_len);
        req.sg_buf_mut().copy_from_buf(&data[..len]);
        req.set_ok()
    }

    fn absent_lun(opcode: Option<ScsiOpcode>, mut req: Request) -> ReqCompletion {
        if opcode != Some(ScsiOpcode::Inquiry) {
            log::debug!("Request {} for absent LUN {}", req.tag(), req.lun());
            return req.set_error(
                sense_key::ILLEGAL_REQUEST,
                asc::LUN_DOES_NOT_RESPOND_TO_SELECTION,
                0,
            );
        }

        let mut data = [0u8; ABSENT_INQUIRY_LEN];
        data[0] = (peripheral::QUALIFIER_NOT_SUPPORTED << 5) | peripheral::DEVICE_TYPE_UNKNOWN;
        data[2] = 0x05;
        data[4] = (ABSENT_INQUIRY_LEN - 5) as u8;

        req.sg_buf_mut().copy_from_buf(&data);
        req.set_ok()
    }
}

/// Builder for configuring a virtual SCSI device
pub struct VscsiDeviceBuilder {
    registry: Option<LunRegistry>,
    max_luns: u32,
    on_complete: Option<Box<CompletionFn>>,
}

impl Default for VscsiDeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VscsiDeviceBuilder {
    fn new() -> Self {
        VscsiDeviceBuilder {
            registry: None,
            max_luns: DEFAULT_MAX_LUNS,
            on_complete: None,
        }
    }

    /// LUN classes available to `attach_lun` (default: all built-in ones)
    pub fn registry(mut self, registry: LunRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Number of addressable LUNs
    pub fn max_luns(mut self, max_luns: u32) -> Self {
        self.max_luns = max_luns;
        self
    }

    /// Callback receiving every completed request
    pub fn on_complete<F>(mut self, on_complete: F) -> Self
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        self.on_complete = Some(Box::new(on_complete));
        self
    }

    /// Build the device
    pub fn build(self) -> VscsiResult<VscsiDevice> {
        let on_complete = self
            .on_complete
            .ok_or_else(|| VscsiError::Config("Completion callback not specified".to_string()))?;

        if self.max_luns == 0 || self.max_luns > MAX_FLAT_LUNS {
            return Err(VscsiError::Config(format!(
                "max_luns must be between 1 and {}, got {}",
                MAX_FLAT_LUNS, self.max_luns
            )));
        }

        log::debug!("Virtual SCSI device with up to {} LUNs", self.max_luns);

        Ok(VscsiDevice {
            registry: self.registry.unwrap_or_default(),
            luns: RwLock::new(BTreeMap::new()),
            max_luns: self.max_luns,
            completer: ReqCompleter::from_boxed(on_complete),
        })
    }
}
