//! MMC logical unit (CD/DVD-ROM)
//!
//! Read-only optical drive with 2048 byte sectors. Replies that describe the
//! disc (inquiry, capacity, mode pages, TOC) are fabricated here; sector
//! reads go to the medium as asynchronous transfers.
//!
//! A LUN is not ready until it has reported the medium change: the first
//! command after a medium shows up gets UNIT ATTENTION, and only INQUIRY is
//! let through before that.

use crate::codec::{lba_to_msf, pad_ascii, read_be16, read_be32, read_be64, write_be16, write_be32, write_be64};
use crate::error::VscsiResult;
use crate::io::{enqueue_transfer, ReqCompleter, TxDir};
use crate::lun::{LunCore, LunDesc, LunOps, LunType};
use crate::request::{ReqCompletion, ReqDisposition, Request};
use crate::scsi::{asc, peripheral, sense_key, service_action_in, ScsiOpcode};

/// Sector size of the device class
pub const MMC_SECTOR_SIZE: u32 = 2048;

const INQUIRY_DATA_LEN: usize = 96;
const MODE_SENSE_6_REPLY_LEN: usize = 24;
const READ_CAPACITY_16_REPLY_LEN: usize = 32;

const TRACK_LEADOUT: u8 = 0xAA;
/// ADR 1 (current position), CONTROL 4 (data track)
const ADR_CONTROL_DATA: u8 = 0x14;

/// Opcodes answered while a unit attention is pending
const UNIT_ATTENTION_EXEMPT: &[ScsiOpcode] = &[ScsiOpcode::Inquiry];

pub static MMC_LUN_DESC: LunDesc = LunDesc {
    lun_type: LunType::Mmc,
    name: "MMC",
    instance_size: std::mem::size_of::<MmcLun>(),
    create: create_mmc_lun,
};

fn create_mmc_lun() -> Box<dyn LunOps> {
    Box::new(MmcLun::default())
}

#[derive(Debug, Default)]
struct MmcLun {
    total_sectors: u64,
    sector_size: u32,
    locked: bool,
}

impl LunOps for MmcLun {
    fn init(&mut self, core: &mut LunCore) -> VscsiResult<()> {
        self.refresh_geometry(core)
    }

    fn destroy(&mut self, _core: &mut LunCore) -> VscsiResult<()> {
        Ok(())
    }

    fn process(&mut self, core: &mut LunCore, req: Request, completer: &ReqCompleter) -> ReqDisposition {
        let opcode = ScsiOpcode::from_u8(req.cdb()[0]);

        if !core.is_ready() && !opcode.is_some_and(|op| UNIT_ATTENTION_EXEMPT.contains(&op)) {
            return ReqDisposition::Completed(Self::not_ready(core, req));
        }

        let cdb = req.cdb();
        let (lba, sectors) = match opcode {
            Some(ScsiOpcode::Read6) => {
                let lba = (u64::from(cdb[1] & 0x1F) << 16) | (u64::from(cdb[2]) << 8) | u64::from(cdb[3]);
                (lba, u32::from(cdb[4]))
            }
            Some(ScsiOpcode::Read10) => (u64::from(read_be32(&cdb[2..6])), u32::from(read_be16(&cdb[7..9]))),
            Some(ScsiOpcode::Read12) => (u64::from(read_be32(&cdb[2..6])), read_be32(&cdb[6..10])),
            Some(ScsiOpcode::Read16) => (read_be64(&cdb[2..10]), read_be32(&cdb[10..14])),
            other => return ReqDisposition::Completed(self.dispatch(other, core, req)),
        };

        self.read_sectors(core, req, completer, lba, sectors)
    }

    fn medium_inserted(&mut self, core: &mut LunCore) -> VscsiResult<()> {
        self.refresh_geometry(core)
    }

    fn medium_removed(&mut self, _core: &mut LunCore) {
        self.total_sectors = 0;
        self.locked = false;
    }
}

impl MmcLun {
    fn refresh_geometry(&mut self, core: &LunCore) -> VscsiResult<()> {
        self.sector_size = MMC_SECTOR_SIZE;
        let size = core.medium().size()?;
        self.total_sectors = size / u64::from(self.sector_size);
        log::debug!(
            "MMC geometry: {} sectors of {} bytes",
            self.total_sectors,
            self.sector_size
        );
        Ok(())
    }

    /// Report the pending medium change once, or the missing medium
    fn not_ready(core: &mut LunCore, req: Request) -> ReqCompletion {
        if core.media_present() {
            log::debug!("MMC: reporting medium change");
            core.set_ready(true);
            req.set_error(sense_key::UNIT_ATTENTION, asc::MEDIUM_MAY_HAVE_CHANGED, 0)
        } else {
            req.set_error(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT, 0)
        }
    }

    /// Commands answered without touching the medium's data
    fn dispatch(&mut self, opcode: Option<ScsiOpcode>, core: &mut LunCore, req: Request) -> ReqCompletion {
        let Some(opcode) = opcode else {
            log::debug!("MMC: unsupported opcode {:#04x}", req.cdb()[0]);
            return req.set_error(sense_key::ILLEGAL_REQUEST, asc::ILLEGAL_OPCODE, 0);
        };

        log::debug!("MMC: {}", opcode.name());

        match opcode {
            ScsiOpcode::TestUnitReady => {
                // The device answers TEST UNIT READY for ready LUNs
                req.set_error(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT, 0)
            }
            ScsiOpcode::Inquiry => Self::inquiry(core, req),
            ScsiOpcode::ReadCapacity10 => self.read_capacity_10(req),
            ScsiOpcode::ServiceActionIn16 => self.service_action_in_16(req),
            ScsiOpcode::ModeSense6 => Self::mode_sense_6(req),
            // Mode pages are fixed; nothing to apply
            ScsiOpcode::ModeSelect6 => req.set_ok(),
            ScsiOpcode::ReadBuffer => Self::read_buffer(req),
            ScsiOpcode::Verify10 | ScsiOpcode::StartStopUnit => req.set_ok(),
            ScsiOpcode::LogSense => Self::log_sense(req),
            ScsiOpcode::PreventAllowMediumRemoval => self.prevent_allow_medium_removal(core, req),
            ScsiOpcode::ReadTocPmaAtip => self.read_toc(req),
            ScsiOpcode::Read6 | ScsiOpcode::Read10 | ScsiOpcode::Read12 | ScsiOpcode::Read16 => {
                unreachable!("reads take the transfer path")
            }
            ScsiOpcode::RequestSense | ScsiOpcode::ReportLuns => {
                // Device-level commands; only seen when the LUN is driven directly
                req.set_error(sense_key::ILLEGAL_REQUEST, asc::ILLEGAL_OPCODE, 0)
            }
        }
    }

    /// Bounds-check a read and hand it to the medium
    fn read_sectors(
        &self,
        core: &mut LunCore,
        req: Request,
        completer: &ReqCompleter,
        lba: u64,
        sectors: u32,
    ) -> ReqDisposition {
        log::trace!("MMC read: lba={} sectors={}", lba, sectors);

        let in_range = lba
            .checked_add(u64::from(sectors))
            .is_some_and(|end| end <= self.total_sectors);
        let byte_len = usize::try_from(u64::from(sectors) * u64::from(self.sector_size));

        let len = match (in_range, byte_len) {
            (true, Ok(len)) => len,
            _ => {
                log::warn!(
                    "MMC read beyond medium: lba={} sectors={} total={}",
                    lba,
                    sectors,
                    self.total_sectors
                );
                return ReqDisposition::Completed(req.set_error(
                    sense_key::ILLEGAL_REQUEST,
                    asc::LOGICAL_BLOCK_OUT_OF_RANGE,
                    0,
                ));
            }
        };

        // A zero transfer length is not an error
        if len == 0 {
            return ReqDisposition::Completed(req.set_ok());
        }

        let offset = lba * u64::from(self.sector_size);
        enqueue_transfer(core.medium_mut(), completer, req, TxDir::Read, offset, len)
    }

    fn inquiry(core: &LunCore, mut req: Request) -> ReqCompletion {
        let mut data = [0u8; INQUIRY_DATA_LEN];

        data[0] = (peripheral::QUALIFIER_CONNECTED << 5) | peripheral::DEVICE_TYPE_CD_DVD;
        // RMB: removable medium
        data[1] = 0x80;
        data[2] = 0x05;
        data[4] = 31;
        // WBus16 | CmdQue
        data[7] = 0x22;

        let medium = core.medium();
        pad_ascii(&mut data[8..16], medium.vendor_id());
        pad_ascii(&mut data[16..32], medium.product_id());
        pad_ascii(&mut data[32..36], medium.product_rev());

        req.sg_buf_mut().copy_from_buf(&data);
        req.set_ok()
    }

    fn last_lba(&self) -> u64 {
        self.total_sectors.saturating_sub(1)
    }

    fn read_capacity_10(&self, mut req: Request) -> ReqCompletion {
        let mut data = [0u8; 8];

        // Too big for 4 bytes: all ones tells the initiator to use READ CAPACITY(16)
        let last_lba = if self.total_sectors > u64::from(u32::MAX) {
            u32::MAX
        } else {
            self.last_lba() as u32
        };
        write_be32(&mut data[0..4], last_lba);
        write_be32(&mut data[4..8], self.sector_size);

        req.sg_buf_mut().copy_from_buf(&data);
        req.set_ok()
    }

    fn service_action_in_16(&self, mut req: Request) -> ReqCompletion {
        let action = req.cdb()[1] & 0x1F;
        if action != service_action_in::READ_CAPACITY_16 {
            log::warn!("MMC: unsupported SERVICE ACTION IN {:#04x}", action);
            return req.set_error(sense_key::ILLEGAL_REQUEST, asc::ILLEGAL_OPCODE, 0);
        }

        let mut data = [0u8; READ_CAPACITY_16_REPLY_LEN];
        write_be64(&mut data[0..8], self.last_lba());
        write_be32(&mut data[8..12], self.sector_size);

        req.sg_buf_mut().copy_from_buf(&data);
        req.set_ok()
    }

    fn mode_sense_6(mut req: Request) -> ReqCompletion {
        let page = req.cdb()[2] & 0x3F;

        let mut data = [0u8; MODE_SENSE_6_REPLY_LEN];
        data[0] = 4; // Mode data length
        data[1] = 0; // Default medium type
        data[2] = 0x10; // Caching supported
        data[3] = 0; // Block descriptor length

        match page {
            0x08 | 0x3F => {
                // Caching page
                data[4] = 0x08;
                data[5] = 0x12;
                data[6] = 0x04; // WCE
            }
            0x00 => {}
            _ => {
                log::debug!("MMC: unknown mode page {:#04x}", page);
                return req.set_error(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB, 0);
            }
        }

        req.sg_buf_mut().copy_from_buf(&data);
        req.set_ok()
    }

    fn read_buffer(mut req: Request) -> ReqCompletion {
        match req.cdb()[1] & 0x1F {
            0x0B => {
                // Echo buffer descriptor; there is no echo buffer
                req.sg_buf_mut().copy_from_buf(&[0u8; 4]);
                req.set_ok()
            }
            0x00..=0x03 | 0x0A | 0x1A | 0x1C => req.set_ok(),
            mode => {
                log::warn!("MMC: invalid READ BUFFER mode {:#04x}", mode);
                req.set_error(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB, 0)
            }
        }
    }

    fn log_sense(mut req: Request) -> ReqCompletion {
        let cdb = req.cdb();
        let max_len = usize::from(read_be16(&cdb[7..9]));
        let page = cdb[2] & 0x3F;
        let sub_page = cdb[3];

        if page != 0x00 || sub_page != 0x00 {
            return req.set_error(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB, 0);
        }

        let data = [0u8; 4];
        req.sg_buf_mut().copy_from_buf(&data[..data.len().min(max_len)]);
        req.set_ok()
    }

    fn prevent_allow_medium_removal(&mut self, core: &mut LunCore, req: Request) -> ReqCompletion {
        let lock = req.cdb()[4] & 0x01 != 0;
        if lock != self.locked {
            log::debug!("MMC: medium {}", if lock { "locked" } else { "unlocked" });
        }
        self.locked = lock;
        core.set_locked(lock);

        if let Err(e) = core.medium_mut().set_lock(lock) {
            log::warn!("MMC: failed to forward medium lock={}: {}", lock, e);
        }

        req.set_ok()
    }

    fn read_toc(&self, mut req: Request) -> ReqCompletion {
        let cdb = req.cdb();
        let format = cdb[2] & 0x0F;
        let msf = (cdb[1] >> 1) & 0x01 != 0;
        let start_track = cdb[6];
        let max_len = usize::from(read_be16(&cdb[7..9]));

        let reply = match format {
            0x00 => self.toc_normal(start_track, msf),
            0x01 => Self::toc_multi_session(msf),
            _ => {
                log::debug!("MMC: unsupported READ TOC format {:#04x}", format);
                return req.set_error(sense_key::ILLEGAL_REQUEST, asc::INVALID_FIELD_IN_CDB, 0);
            }
        };

        let len = reply.len().min(max_len);
        req.sg_buf_mut().copy_from_buf(&reply[..len]);
        req.set_ok()
    }

    /// Single data track followed by the lead-out
    fn toc_normal(&self, start_track: u8, msf: bool) -> Vec<u8> {
        // Length (filled in below), first track, last track
        let mut reply = vec![0, 0, 1, 1];

        if start_track <= 1 {
            push_track_descriptor(&mut reply, 1, 0, msf);
        }
        let leadout = u32::try_from(self.total_sectors).unwrap_or(u32::MAX);
        push_track_descriptor(&mut reply, TRACK_LEADOUT, leadout, msf);

        finish_toc(&mut reply);
        reply
    }

    /// One complete session starting at track 1
    fn toc_multi_session(msf: bool) -> Vec<u8> {
        // Length, first and last complete session
        let mut reply = vec![0, 0, 1, 1];
        // Standard descriptor layout: MSF goes in bytes 9..11 after the
        // reserved byte 8, unlike drives that write it from byte 8.
        push_track_descriptor(&mut reply, 1, 0, msf);
        finish_toc(&mut reply);
        reply
    }
}

fn push_track_descriptor(reply: &mut Vec<u8>, track: u8, lba: u32, msf: bool) {
    let mut desc = [0u8; 8];
    desc[1] = ADR_CONTROL_DATA;
    desc[2] = track;
    if msf {
        // desc[4] stays reserved
        lba_to_msf(&mut desc[5..8], lba);
    } else {
        write_be32(&mut desc[4..8], lba);
    }
    reply.extend_from_slice(&desc);
}

/// The TOC data length does not count itself
fn finish_toc(reply: &mut [u8]) {
    let len = (reply.len() - 2) as u16;
    write_be16(&mut reply[0..2], len);
}
