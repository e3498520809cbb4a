//! Integration tests for the virtual SCSI device
//!
//! The medium here behaves like a real backend: transfers are served by a
//! worker thread and completed from there, so completions arrive
//! asynchronously and out of the submitting thread.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use vscsi::scsi::{asc, scsi_status, sense_key};
use vscsi::{
    Completion, IoReq, LunType, Request, SenseOutcome, SgBuf, TxDir, VscsiDevice, VscsiError, VscsiMedium,
    VscsiResult,
};

static LOGGER: Lazy<()> = Lazy::new(|| {
    let _ = env_logger::builder().is_test(true).try_init();
});

fn init_logging() {
    Lazy::force(&LOGGER);
}

const SECTOR: usize = 2048;
const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Threaded backend
// ============================================================================

/// Disc image served by a worker thread
///
/// Sector `n` is filled with the byte `n as u8`. Reads that touch
/// `bad_sector` fail.
struct ThreadedImage {
    sectors: u64,
    tx: Sender<IoReq>,
}

impl ThreadedImage {
    fn spawn(sectors: u64, bad_sector: Option<u64>) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || serve(rx, bad_sector));
        ThreadedImage { sectors, tx }
    }
}

fn serve(rx: Receiver<IoReq>, bad_sector: Option<u64>) {
    for mut io in rx {
        assert_eq!(io.dir(), TxDir::Read);
        let first = io.offset() / SECTOR as u64;
        let count = (io.len() / SECTOR) as u64;

        if bad_sector.is_some_and(|bad| (first..first + count).contains(&bad)) {
            io.complete(Err(VscsiError::Backend("unreadable sector".into())));
            continue;
        }

        for lba in first..first + count {
            io.sg_buf_mut().copy_from_buf(&[lba as u8; SECTOR]);
        }
        // Let several requests pile up in flight
        thread::sleep(Duration::from_millis(1));
        io.complete(Ok(()));
    }
}

impl VscsiMedium for ThreadedImage {
    fn size(&self) -> VscsiResult<u64> {
        Ok(self.sectors * SECTOR as u64)
    }

    fn enqueue(&mut self, io: IoReq) {
        // A send error hands the request back and dropping it completes it
        // as aborted.
        if let Err(mpsc::SendError(io)) = self.tx.send(io) {
            drop(io);
        }
    }

    fn vendor_id(&self) -> &str {
        "TESTVEND"
    }

    fn product_id(&self) -> &str {
        "THREADED IMAGE"
    }
}

// ============================================================================
// Completion collector
// ============================================================================

#[derive(Clone, Default)]
struct Completions {
    inner: Arc<(Mutex<Vec<Completion>>, Condvar)>,
}

impl Completions {
    fn push(&self, done: Completion) {
        let (list, cond) = &*self.inner;
        list.lock().unwrap().push(done);
        cond.notify_all();
    }

    /// Wait until `count` completions arrived and take them
    fn wait_for(&self, count: usize) -> Vec<Completion> {
        let (list, cond) = &*self.inner;
        let guard = list.lock().unwrap();
        let (mut guard, timeout) = cond
            .wait_timeout_while(guard, WAIT, |list| list.len() < count)
            .unwrap();
        assert!(
            !timeout.timed_out(),
            "timed out waiting for {} completions, got {}",
            count,
            guard.len()
        );
        std::mem::take(&mut *guard)
    }
}

fn device() -> (VscsiDevice, Completions) {
    init_logging();
    let completions = Completions::default();
    let sink = completions.clone();
    let device = VscsiDevice::builder()
        .on_complete(move |done| sink.push(done))
        .build()
        .expect("device with a completion callback builds");
    (device, completions)
}

fn read10(tag: u64, lba: u32, sectors: u16) -> Request {
    let mut cdb = vec![0x28, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&sectors.to_be_bytes());
    Request::new(tag, 0, cdb, SgBuf::with_len(usize::from(sectors) * SECTOR))
}

fn test_unit_ready(tag: u64) -> Request {
    Request::new(tag, 0, vec![0x00, 0, 0, 0, 0, 0], SgBuf::default())
}

/// Clear the pending unit attention of LUN 0
fn acknowledge_attention(device: &VscsiDevice, completions: &Completions) {
    device.enqueue_request(test_unit_ready(0));
    let done = completions.wait_for(1);
    assert_eq!(
        done[0].req.outcome(),
        SenseOutcome::Error {
            key: sense_key::UNIT_ATTENTION,
            asc: asc::MEDIUM_MAY_HAVE_CHANGED,
            ascq: 0
        }
    );
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_inquiry_identifies_cdrom() {
    let (device, completions) = device();
    device
        .attach_lun(0, LunType::Mmc, Box::new(ThreadedImage::spawn(100, None)))
        .unwrap();

    device.enqueue_request(Request::new(1, 0, vec![0x12, 0, 0, 0, 96, 0], SgBuf::with_len(96)));
    let done = completions.wait_for(1);
    assert_eq!(done[0].status, scsi_status::GOOD);
    assert!(!done[0].was_enqueued);

    let data = done[0].req.sg_buf().to_vec();
    assert_eq!(data[0] & 0x1F, 0x05, "peripheral device type should be CD/DVD");
    assert_eq!(data[1] & 0x80, 0x80, "medium should be removable");
    assert_eq!(&data[8..16], b"TESTVEND");
    assert_eq!(&data[16..32], b"THREADED IMAGE  ");
}

#[test]
fn test_reads_complete_exactly_once_from_worker() {
    let (device, completions) = device();
    device
        .attach_lun(0, LunType::Mmc, Box::new(ThreadedImage::spawn(100, None)))
        .unwrap();
    acknowledge_attention(&device, &completions);

    for tag in 1..=20u64 {
        device.enqueue_request(read10(tag, tag as u32, 2));
    }

    let done = completions.wait_for(20);
    let mut seen: HashMap<u64, usize> = HashMap::new();
    for c in &done {
        *seen.entry(c.req.tag()).or_default() += 1;
        assert_eq!(c.status, scsi_status::GOOD);
        assert!(c.was_enqueued);
        assert!(c.backend_status.is_ok());

        let data = c.req.sg_buf().to_vec();
        let lba = c.req.tag() as u8;
        assert!(data[..SECTOR].iter().all(|&b| b == lba));
        assert!(data[SECTOR..].iter().all(|&b| b == lba + 1));
    }
    assert_eq!(seen.len(), 20);
    assert!(seen.values().all(|&n| n == 1), "duplicate completion: {:?}", seen);

    // Nothing trickles in afterwards
    thread::sleep(Duration::from_millis(50));
    assert!(completions.inner.0.lock().unwrap().is_empty());
}

#[test]
fn test_out_of_range_read_completes_synchronously() {
    let (device, completions) = device();
    device
        .attach_lun(0, LunType::Mmc, Box::new(ThreadedImage::spawn(100, None)))
        .unwrap();
    acknowledge_attention(&device, &completions);

    device.enqueue_request(read10(7, 99, 2));
    let done = completions.wait_for(1);
    assert!(!done[0].was_enqueued);
    assert_eq!(
        done[0].req.outcome(),
        SenseOutcome::Error {
            key: sense_key::ILLEGAL_REQUEST,
            asc: asc::LOGICAL_BLOCK_OUT_OF_RANGE,
            ascq: 0
        }
    );
}

#[test]
fn test_backend_failure_reports_medium_error() {
    let (device, completions) = device();
    device
        .attach_lun(0, LunType::Mmc, Box::new(ThreadedImage::spawn(100, Some(50))))
        .unwrap();
    acknowledge_attention(&device, &completions);

    device.enqueue_request(read10(3, 49, 2));
    let done = completions.wait_for(1);
    assert!(done[0].was_enqueued);
    assert!(matches!(done[0].backend_status, Err(VscsiError::Backend(_))));
    assert_eq!(done[0].status, scsi_status::CHECK_CONDITION);

    // The failure is what REQUEST SENSE reports next
    device.enqueue_request(Request::new(4, 0, vec![0x03, 0, 0, 0, 18, 0], SgBuf::with_len(18)));
    let sense = completions.wait_for(1);
    let data = sense[0].req.sg_buf().to_vec();
    assert_eq!(data[2], sense_key::MEDIUM_ERROR);
    assert_eq!(data[12], asc::UNRECOVERED_READ_ERROR);
}

#[test]
fn test_media_change_sequence() {
    let (device, completions) = device();
    device
        .attach_lun(0, LunType::Mmc, Box::new(ThreadedImage::spawn(100, None)))
        .unwrap();

    // Only the first command after attach sees the unit attention
    acknowledge_attention(&device, &completions);
    device.enqueue_request(test_unit_ready(1));
    assert_eq!(completions.wait_for(1)[0].status, scsi_status::GOOD);

    device.media_removed(0).unwrap();
    device.enqueue_request(test_unit_ready(2));
    assert_eq!(
        completions.wait_for(1)[0].req.outcome(),
        SenseOutcome::Error {
            key: sense_key::NOT_READY,
            asc: asc::MEDIUM_NOT_PRESENT,
            ascq: 0
        }
    );

    device.media_inserted(0).unwrap();
    acknowledge_attention(&device, &completions);
    device.enqueue_request(read10(3, 0, 1));
    assert_eq!(completions.wait_for(1)[0].status, scsi_status::GOOD);
}

#[test]
fn test_luns_are_independent() {
    let (device, completions) = device();
    for id in [0, 1] {
        device
            .attach_lun(id, LunType::Mmc, Box::new(ThreadedImage::spawn(10 + u64::from(id), None)))
            .unwrap();
    }

    // Acknowledging LUN 0 leaves LUN 1's unit attention pending
    acknowledge_attention(&device, &completions);
    device.enqueue_request(Request::new(1, 1, vec![0x00, 0, 0, 0, 0, 0], SgBuf::default()));
    assert_eq!(
        completions.wait_for(1)[0].status,
        scsi_status::CHECK_CONDITION
    );

    let mut cdb = vec![0xA0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    cdb[6..10].copy_from_slice(&64u32.to_be_bytes());
    device.enqueue_request(Request::new(2, 9, cdb, SgBuf::with_len(64)));
    let done = completions.wait_for(1);
    let data = done[0].req.sg_buf().to_vec();
    assert_eq!(&data[0..4], &16u32.to_be_bytes());
    assert_eq!(data[9], 0);
    assert_eq!(data[17], 1);
}

#[test]
fn test_detach_returns_medium() {
    let (device, completions) = device();
    device
        .attach_lun(0, LunType::Mmc, Box::new(ThreadedImage::spawn(32, None)))
        .unwrap();

    let medium = device.detach_lun(0).unwrap();
    assert_eq!(medium.size().unwrap(), 32 * SECTOR as u64);

    device.enqueue_request(test_unit_ready(1));
    assert_eq!(
        completions.wait_for(1)[0].req.outcome(),
        SenseOutcome::Error {
            key: sense_key::ILLEGAL_REQUEST,
            asc: asc::LUN_DOES_NOT_RESPOND_TO_SELECTION,
            ascq: 0
        }
    );
}
