//! SCSI protocol constants
//!
//! Opcodes, status bytes, sense keys and additional sense codes used by the
//! virtual device and its logical units (SPC / MMC subsets).

/// SCSI command opcodes handled by the device or one of its LUN types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiOpcode {
    TestUnitReady = 0x00,
    RequestSense = 0x03,
    Read6 = 0x08,
    Inquiry = 0x12,
    ModeSelect6 = 0x15,
    ModeSense6 = 0x1A,
    StartStopUnit = 0x1B,
    PreventAllowMediumRemoval = 0x1E,
    ReadCapacity10 = 0x25,
    Read10 = 0x28,
    Verify10 = 0x2F,
    ReadBuffer = 0x3C,
    ReadTocPmaAtip = 0x43,
    LogSense = 0x4D,
    Read16 = 0x88,
    ServiceActionIn16 = 0x9E, // READ CAPACITY 16 uses this
    ReportLuns = 0xA0,
    Read12 = 0xA8,
}

impl ScsiOpcode {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0x00 => Some(ScsiOpcode::TestUnitReady),
            0x03 => Some(ScsiOpcode::RequestSense),
            0x08 => Some(ScsiOpcode::Read6),
            0x12 => Some(ScsiOpcode::Inquiry),
            0x15 => Some(ScsiOpcode::ModeSelect6),
            0x1A => Some(ScsiOpcode::ModeSense6),
            0x1B => Some(ScsiOpcode::StartStopUnit),
            0x1E => Some(ScsiOpcode::PreventAllowMediumRemoval),
            0x25 => Some(ScsiOpcode::ReadCapacity10),
            0x28 => Some(ScsiOpcode::Read10),
            0x2F => Some(ScsiOpcode::Verify10),
            0x3C => Some(ScsiOpcode::ReadBuffer),
            0x43 => Some(ScsiOpcode::ReadTocPmaAtip),
            0x4D => Some(ScsiOpcode::LogSense),
            0x88 => Some(ScsiOpcode::Read16),
            0x9E => Some(ScsiOpcode::ServiceActionIn16),
            0xA0 => Some(ScsiOpcode::ReportLuns),
            0xA8 => Some(ScsiOpcode::Read12),
            _ => None,
        }
    }

    /// Human readable command name for logging
    pub fn name(self) -> &'static str {
        match self {
            ScsiOpcode::TestUnitReady => "TEST UNIT READY",
            ScsiOpcode::RequestSense => "REQUEST SENSE",
            ScsiOpcode::Read6 => "READ(6)",
            ScsiOpcode::Inquiry => "INQUIRY",
            ScsiOpcode::ModeSelect6 => "MODE SELECT(6)",
            ScsiOpcode::ModeSense6 => "MODE SENSE(6)",
            ScsiOpcode::StartStopUnit => "START STOP UNIT",
            ScsiOpcode::PreventAllowMediumRemoval => "PREVENT ALLOW MEDIUM REMOVAL",
            ScsiOpcode::ReadCapacity10 => "READ CAPACITY(10)",
            ScsiOpcode::Read10 => "READ(10)",
            ScsiOpcode::Verify10 => "VERIFY(10)",
            ScsiOpcode::ReadBuffer => "READ BUFFER",
            ScsiOpcode::ReadTocPmaAtip => "READ TOC/PMA/ATIP",
            ScsiOpcode::LogSense => "LOG SENSE",
            ScsiOpcode::Read16 => "READ(16)",
            ScsiOpcode::ServiceActionIn16 => "SERVICE ACTION IN(16)",
            ScsiOpcode::ReportLuns => "REPORT LUNS",
            ScsiOpcode::Read12 => "READ(12)",
        }
    }
}

/// Minimum CDB length implied by the group code (top three bits) of an opcode
///
/// Reserved and vendor-specific groups return 6 so that only the opcode byte
/// and the common control byte are assumed present.
pub fn cdb_len(opcode: u8) -> usize {
    match opcode >> 5 {
        0 => 6,
        1 | 2 => 10,
        4 => 16,
        5 => 12,
        _ => 6,
    }
}

/// SERVICE ACTION IN(16) service actions
pub mod service_action_in {
    pub const READ_CAPACITY_16: u8 = 0x10;
}

/// SCSI status codes
pub mod scsi_status {
    pub const GOOD: u8 = 0x00;
    pub const CHECK_CONDITION: u8 = 0x02;
}

/// SCSI sense key codes
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
}

/// Additional Sense Code (ASC) values
pub mod asc {
    pub const NO_ADDITIONAL_SENSE: u8 = 0x00;
    pub const LUN_DOES_NOT_RESPOND_TO_SELECTION: u8 = 0x05;
    pub const WRITE_ERROR: u8 = 0x0C;
    pub const UNRECOVERED_READ_ERROR: u8 = 0x11;
    pub const ILLEGAL_OPCODE: u8 = 0x20;
    pub const LOGICAL_BLOCK_OUT_OF_RANGE: u8 = 0x21;
    pub const INVALID_FIELD_IN_CDB: u8 = 0x24;
    pub const MEDIUM_MAY_HAVE_CHANGED: u8 = 0x28;
    pub const MEDIUM_NOT_PRESENT: u8 = 0x3A;
}

/// INQUIRY peripheral device types and qualifiers
pub mod peripheral {
    pub const DEVICE_TYPE_CD_DVD: u8 = 0x05;
    pub const DEVICE_TYPE_UNKNOWN: u8 = 0x1F;
    pub const QUALIFIER_CONNECTED: u8 = 0x00;
    pub const QUALIFIER_NOT_SUPPORTED: u8 = 0x03;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_roundtrips_known_opcodes() {
        for op in [0x00u8, 0x03, 0x08, 0x12, 0x1A, 0x25, 0x28, 0x43, 0x88, 0x9E, 0xA0, 0xA8] {
            let parsed = ScsiOpcode::from_u8(op).unwrap();
            assert_eq!(parsed as u8, op);
        }
        assert_eq!(ScsiOpcode::from_u8(0x2A), None); // WRITE(10) is not supported
    }

    #[test]
    fn test_cdb_len_by_group() {
        assert_eq!(cdb_len(0x08), 6);
        assert_eq!(cdb_len(0x28), 10);
        assert_eq!(cdb_len(0x4D), 10);
        assert_eq!(cdb_len(0xA8), 12);
        assert_eq!(cdb_len(0x88), 16);
        assert_eq!(cdb_len(0x9E), 16);
    }
}
