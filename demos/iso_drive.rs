//! Virtual CD-ROM drive backed by an ISO image
//!
//! Attaches the image as an MMC LUN served by a reader thread, then plays the
//! part of an initiator: clears the unit attention, asks for the capacity
//! and the TOC, and reads the ISO 9660 primary volume descriptor.
//!
//! Usage: cargo run --example iso_drive -- <image.iso>

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use vscsi::scsi::scsi_status;
use vscsi::{Completion, IoReq, LunType, Request, SgBuf, VscsiDevice, VscsiError, VscsiMedium, VscsiResult};

const SECTOR_SIZE: usize = 2048;
const PVD_LBA: u32 = 16;

/// ISO image read by a dedicated thread
struct IsoImage {
    size: u64,
    tx: Sender<IoReq>,
}

impl IsoImage {
    fn open(path: &str) -> VscsiResult<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || reader_thread(file, rx));
        Ok(IsoImage { size, tx })
    }
}

fn read_range(file: &mut File, io: &mut IoReq) -> VscsiResult<()> {
    let mut data = vec![0u8; io.len()];
    file.seek(SeekFrom::Start(io.offset()))?;
    file.read_exact(&mut data)?;
    io.sg_buf_mut().copy_from_buf(&data);
    Ok(())
}

fn reader_thread(mut file: File, rx: Receiver<IoReq>) {
    for mut io in rx {
        log::debug!("Reading {} bytes at offset {}", io.len(), io.offset());
        let result = read_range(&mut file, &mut io);
        io.complete(result);
    }
    log::debug!("Reader thread exiting");
}

impl VscsiMedium for IsoImage {
    fn size(&self) -> VscsiResult<u64> {
        Ok(self.size)
    }

    fn enqueue(&mut self, io: IoReq) {
        if let Err(mpsc::SendError(io)) = self.tx.send(io) {
            log::error!("Reader thread is gone");
            io.complete(Err(VscsiError::Backend("reader thread is gone".to_string())));
        }
    }

    fn set_lock(&mut self, locked: bool) -> VscsiResult<()> {
        log::info!("Tray {}", if locked { "locked" } else { "unlocked" });
        Ok(())
    }
}

/// Submit one request and wait for its completion
fn submit(device: &VscsiDevice, done: &Receiver<Completion>, tag: u64, cdb: Vec<u8>, len: usize) -> Completion {
    device.enqueue_request(Request::new(tag, 0, cdb, SgBuf::with_len(len)));
    match done.recv() {
        Ok(completion) => completion,
        Err(_) => {
            eprintln!("Device went away before completing request {}", tag);
            std::process::exit(1);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("Usage: {} <image.iso>", args[0]);
        std::process::exit(1);
    };

    let (tx, done) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    let device = VscsiDevice::builder()
        .on_complete(move |completion| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(completion);
            }
        })
        .build()?;

    device.attach_lun(0, LunType::Mmc, Box::new(IsoImage::open(path)?))?;
    println!("Attached {} as LUN 0", path);

    // The first command reports the freshly inserted medium
    let attention = submit(&device, &done, 1, vec![0x00, 0, 0, 0, 0, 0], 0);
    println!("TEST UNIT READY: {:?}", attention.req.outcome());
    let ready = submit(&device, &done, 2, vec![0x00, 0, 0, 0, 0, 0], 0);
    println!("TEST UNIT READY: {:?}", ready.req.outcome());

    let capacity = submit(&device, &done, 3, vec![0x25, 0, 0, 0, 0, 0, 0, 0, 0, 0], 8);
    let data = capacity.req.sg_buf().to_vec();
    let last_lba = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let block_len = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    println!("Capacity: {} blocks of {} bytes", u64::from(last_lba) + 1, block_len);

    // READ TOC, format 0, MSF addresses
    let toc = submit(&device, &done, 4, vec![0x43, 0x02, 0, 0, 0, 0, 1, 0, 20, 0], 20);
    println!("TOC: {}", hex::encode(toc.req.sg_buf().to_vec()));

    let mut cdb = vec![0x28, 0, 0, 0, 0, 0, 0, 0, 1, 0];
    cdb[2..6].copy_from_slice(&PVD_LBA.to_be_bytes());
    let pvd = submit(&device, &done, 5, cdb, SECTOR_SIZE);
    if pvd.status != scsi_status::GOOD {
        println!("Reading the volume descriptor failed: {:?}", pvd.req.outcome());
        return Ok(());
    }

    let data = pvd.req.sg_buf().to_vec();
    if &data[1..6] == b"CD001" {
        let volume_id = String::from_utf8_lossy(&data[40..72]);
        println!("Volume: {}", volume_id.trim_end());
    } else {
        println!("No ISO 9660 volume descriptor at LBA {}", PVD_LBA);
    }

    let medium = device.detach_lun(0)?;
    println!("Detached LUN 0 ({} bytes)", medium.size()?);
    Ok(())
}
