//! Scatter/gather data buffer for the data phase of a request

/// A list of byte segments with a copy cursor
///
/// Copies never grow the buffer: anything past the total capacity is
/// dropped, which is how over-long fabricated replies get truncated to what
/// the initiator asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SgBuf {
    segs: Vec<Vec<u8>>,
    seg_idx: usize,
    seg_off: usize,
}

impl SgBuf {
    pub fn new(segs: Vec<Vec<u8>>) -> Self {
        SgBuf {
            segs,
            seg_idx: 0,
            seg_off: 0,
        }
    }

    /// Single zero-filled segment of `len` bytes
    pub fn with_len(len: usize) -> Self {
        Self::new(vec![vec![0u8; len]])
    }

    /// Total capacity in bytes
    pub fn len(&self) -> usize {
        self.segs.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes left between the cursor and the end of the buffer
    pub fn remaining(&self) -> usize {
        let consumed: usize = self.segs[..self.seg_idx.min(self.segs.len())]
            .iter()
            .map(Vec::len)
            .sum();
        self.len() - consumed - self.seg_off
    }

    pub fn reset(&mut self) {
        self.seg_idx = 0;
        self.seg_off = 0;
    }

    /// Copy `src` into the buffer at the cursor, returns bytes copied
    pub fn copy_from_buf(&mut self, src: &[u8]) -> usize {
        let mut copied = 0;
        while copied < src.len() {
            let Some(seg) = self.segs.get_mut(self.seg_idx) else {
                break;
            };
            let n = (seg.len() - self.seg_off).min(src.len() - copied);
            seg[self.seg_off..self.seg_off + n].copy_from_slice(&src[copied..copied + n]);
            copied += n;
            self.advance(n);
        }
        copied
    }

    /// Copy from the buffer at the cursor into `dst`, returns bytes copied
    pub fn copy_to_buf(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some(seg) = self.segs.get(self.seg_idx) else {
                break;
            };
            let n = (seg.len() - self.seg_off).min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&seg[self.seg_off..self.seg_off + n]);
            copied += n;
            self.advance(n);
        }
        copied
    }

    /// Flatten all segments, ignoring the cursor
    pub fn to_vec(&self) -> Vec<u8> {
        self.segs.concat()
    }

    fn advance(&mut self, n: usize) {
        self.seg_off += n;
        // Skip exhausted (and empty) segments so the cursor always points at
        // writable space or past the end.
        while let Some(seg) = self.segs.get(self.seg_idx) {
            if self.seg_off < seg.len() {
                break;
            }
            self.seg_off -= seg.len();
            self.seg_idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_spans_segments() {
        let mut sg = SgBuf::new(vec![vec![0u8; 3], vec![], vec![0u8; 4]]);
        assert_eq!(sg.len(), 7);

        let copied = sg.copy_from_buf(&[1, 2, 3, 4, 5]);
        assert_eq!(copied, 5);
        assert_eq!(sg.remaining(), 2);
        assert_eq!(sg.to_vec(), vec![1, 2, 3, 4, 5, 0, 0]);
    }

    #[test]
    fn test_copy_truncates_at_capacity() {
        let mut sg = SgBuf::with_len(4);
        let copied = sg.copy_from_buf(&[9u8; 32]);
        assert_eq!(copied, 4);
        assert_eq!(sg.remaining(), 0);
        assert_eq!(sg.copy_from_buf(&[1]), 0);
    }

    #[test]
    fn test_copy_to_buf_after_reset() {
        let mut sg = SgBuf::new(vec![vec![0u8; 2], vec![0u8; 2]]);
        sg.copy_from_buf(&[7, 8, 9, 10]);
        sg.reset();

        let mut out = [0u8; 6];
        assert_eq!(sg.copy_to_buf(&mut out), 4);
        assert_eq!(out, [7, 8, 9, 10, 0, 0]);
    }

    #[test]
    fn test_empty_buffer() {
        let mut sg = SgBuf::default();
        assert!(sg.is_empty());
        assert_eq!(sg.copy_from_buf(&[1, 2, 3]), 0);
        assert_eq!(sg.remaining(), 0);
    }
}
