//! Sense data and command outcome

use crate::scsi::{asc, sense_key};

/// Outcome of a single command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenseOutcome {
    #[default]
    Ok,
    Error { key: u8, asc: u8, ascq: u8 },
}

impl SenseOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SenseOutcome::Ok)
    }

    /// Sense data describing this outcome, `NO SENSE` for `Ok`
    pub fn to_sense_data(&self) -> SenseData {
        match *self {
            SenseOutcome::Ok => SenseData::no_sense(),
            SenseOutcome::Error { key, asc, ascq } => SenseData::new(key, asc, ascq),
        }
    }
}

/// SCSI sense data (fixed format)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenseData {
    pub sense_key: u8,
    pub asc: u8,        // Additional Sense Code
    pub ascq: u8,       // Additional Sense Code Qualifier
}

impl Default for SenseData {
    fn default() -> Self {
        Self::no_sense()
    }
}

impl SenseData {
    /// Length of fixed format sense data
    pub const FIXED_LEN: usize = 18;

    pub fn new(sense_key: u8, asc: u8, ascq: u8) -> Self {
        SenseData {
            sense_key,
            asc,
            ascq,
        }
    }

    pub fn no_sense() -> Self {
        SenseData::new(sense_key::NO_SENSE, asc::NO_ADDITIONAL_SENSE, 0)
    }

    pub fn is_error(&self) -> bool {
        self.sense_key != sense_key::NO_SENSE
    }

    /// Serialize to fixed format sense data (18 bytes)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; Self::FIXED_LEN];

        // Response code: 0x70 = current error, fixed format
        data[0] = 0x70;

        data[2] = self.sense_key & 0x0F;

        // Information field (bytes 3..7) stays zero

        // Remaining bytes after this field
        data[7] = 10;

        data[12] = self.asc;
        data[13] = self.ascq;

        data
    }
}
