//! Binary field helpers
//!
//! Every multi-byte SCSI field is big-endian. Optical media additionally
//! address sectors as minute/second/frame timecodes, 75 frames per second,
//! with the first data sector sitting behind a two second (150 frame) pre-gap.

use byteorder::{BigEndian, ByteOrder};

/// Frames of lead-in before LBA 0 on an optical disc
pub const MSF_PREGAP_FRAMES: u32 = 150;

const FRAMES_PER_SECOND: u32 = 75;
const SECONDS_PER_MINUTE: u32 = 60;

pub fn write_be16(buf: &mut [u8], val: u16) {
    BigEndian::write_u16(buf, val);
}

pub fn write_be32(buf: &mut [u8], val: u32) {
    BigEndian::write_u32(buf, val);
}

pub fn write_be64(buf: &mut [u8], val: u64) {
    BigEndian::write_u64(buf, val);
}

pub fn read_be16(buf: &[u8]) -> u16 {
    BigEndian::read_u16(buf)
}

pub fn read_be32(buf: &[u8]) -> u32 {
    BigEndian::read_u32(buf)
}

pub fn read_be64(buf: &[u8]) -> u64 {
    BigEndian::read_u64(buf)
}

/// Encode `lba` as a 3-byte MSF timecode, pre-gap included
///
/// Minutes wrap at 256; an LBA that large is beyond any real disc.
pub fn lba_to_msf(buf: &mut [u8], lba: u32) {
    let lba = lba.wrapping_add(MSF_PREGAP_FRAMES);
    buf[0] = ((lba / FRAMES_PER_SECOND) / SECONDS_PER_MINUTE) as u8;
    buf[1] = ((lba / FRAMES_PER_SECOND) % SECONDS_PER_MINUTE) as u8;
    buf[2] = (lba % FRAMES_PER_SECOND) as u8;
}

/// Decode a 3-byte MSF timecode
///
/// The pre-gap is not subtracted, so `msf_to_lba` of `lba_to_msf(x)` is
/// `x + 150`.
pub fn msf_to_lba(buf: &[u8]) -> u32 {
    (buf[0] as u32 * SECONDS_PER_MINUTE + buf[1] as u32) * FRAMES_PER_SECOND + buf[2] as u32
}

/// Copy `s` into a fixed-width ASCII field, space padded and truncated
pub fn pad_ascii(dst: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    for (i, b) in dst.iter_mut().enumerate() {
        *b = bytes.get(i).copied().unwrap_or(b' ');
    }
}
