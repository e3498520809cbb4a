//! Logical units: shared core state, type descriptors and the registry
//!
//! Each LUN class (only MMC for now) is described by a static [`LunDesc`]
//! whose `create` hook builds a [`LunOps`] instance. The registry maps a
//! [`LunType`] to its descriptor; [`Lun`] pairs the instance with the
//! [`LunCore`] state every class shares.

use crate::error::{VscsiError, VscsiResult};
use crate::io::ReqCompleter;
use crate::medium::VscsiMedium;
use crate::mmc::MMC_LUN_DESC;
use crate::request::{ReqDisposition, Request};
use std::fmt;

/// LUN classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LunType {
    /// Multimedia device (CD/DVD-ROM)
    Mmc,
}

impl fmt::Display for LunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LunType::Mmc => write!(f, "MMC"),
        }
    }
}

/// State shared by every LUN class
pub struct LunCore {
    ready: bool,
    media_present: bool,
    locked: bool,
    medium: Box<dyn VscsiMedium>,
}

impl fmt::Debug for LunCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LunCore")
            .field("ready", &self.ready)
            .field("media_present", &self.media_present)
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

impl LunCore {
    /// A LUN starts out not ready so the first command after attach
    /// observes the medium as freshly inserted.
    pub fn new(medium: Box<dyn VscsiMedium>) -> Self {
        let media_present = medium.is_present();
        LunCore {
            ready: false,
            media_present,
            locked: false,
            medium,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn media_present(&self) -> bool {
        self.media_present
    }

    pub fn is_locked(&self) -> bool {
        self.media_present && self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn medium(&self) -> &dyn VscsiMedium {
        self.medium.as_ref()
    }

    pub fn medium_mut(&mut self) -> &mut dyn VscsiMedium {
        self.medium.as_mut()
    }

    fn into_medium(self) -> Box<dyn VscsiMedium> {
        self.medium
    }
}

/// Operations a LUN class implements
pub trait LunOps: Send {
    /// Set up class state, typically from the medium geometry
    fn init(&mut self, core: &mut LunCore) -> VscsiResult<()>;

    fn destroy(&mut self, core: &mut LunCore) -> VscsiResult<()>;

    /// Process one request; every path must end in exactly one disposition
    fn process(&mut self, core: &mut LunCore, req: Request, completer: &ReqCompleter) -> ReqDisposition;

    /// A new medium was inserted
    fn medium_inserted(&mut self, _core: &mut LunCore) -> VscsiResult<()> {
        Ok(())
    }

    /// The medium was removed
    fn medium_removed(&mut self, _core: &mut LunCore) {}
}

/// Static description of a LUN class
pub struct LunDesc {
    pub lun_type: LunType,
    pub name: &'static str,
    /// Size of the class instance in bytes
    pub instance_size: usize,
    pub create: fn() -> Box<dyn LunOps>,
}

impl fmt::Debug for LunDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LunDesc")
            .field("lun_type", &self.lun_type)
            .field("name", &self.name)
            .field("instance_size", &self.instance_size)
            .finish_non_exhaustive()
    }
}

/// Table of LUN classes available for instantiation
#[derive(Debug)]
pub struct LunRegistry {
    descs: Vec<&'static LunDesc>,
}

impl Default for LunRegistry {
    /// Registry with all built-in LUN classes
    fn default() -> Self {
        LunRegistry {
            descs: vec![&MMC_LUN_DESC],
        }
    }
}

impl LunRegistry {
    /// Empty registry
    pub fn new() -> Self {
        LunRegistry { descs: Vec::new() }
    }

    pub fn register(&mut self, desc: &'static LunDesc) -> VscsiResult<()> {
        if self.lookup(desc.lun_type).is_some() {
            return Err(VscsiError::Config(format!(
                "LUN type {} is already registered",
                desc.lun_type
            )));
        }
        log::debug!("Registered LUN type {} ({})", desc.lun_type, desc.name);
        self.descs.push(desc);
        Ok(())
    }

    pub fn lookup(&self, lun_type: LunType) -> Option<&'static LunDesc> {
        self.descs.iter().copied().find(|desc| desc.lun_type == lun_type)
    }

    /// Instantiate and initialize a LUN on top of `medium`
    pub fn create_lun(&self, lun_type: LunType, medium: Box<dyn VscsiMedium>) -> VscsiResult<Lun> {
        let desc = self
            .lookup(lun_type)
            .ok_or_else(|| VscsiError::UnknownLunType(lun_type.to_string()))?;

        log::debug!("Creating {} LUN ({} bytes)", desc.name, desc.instance_size);

        let mut core = LunCore::new(medium);
        let mut ops = (desc.create)();
        ops.init(&mut core)
            .map_err(|e| VscsiError::LunInit(format!("{}: {}", desc.name, e)))?;

        Ok(Lun { desc, core, ops })
    }

    /// Tear down a LUN, handing its medium back
    pub fn destroy_lun(&self, mut lun: Lun) -> VscsiResult<Box<dyn VscsiMedium>> {
        log::debug!("Destroying {} LUN", lun.desc.name);
        lun.ops.destroy(&mut lun.core)?;
        Ok(lun.core.into_medium())
    }
}

/// A live logical unit
pub struct Lun {
    desc: &'static LunDesc,
    core: LunCore,
    ops: Box<dyn LunOps>,
}

impl fmt::Debug for Lun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lun")
            .field("type", &self.desc.lun_type)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl Lun {
    pub fn lun_type(&self) -> LunType {
        self.desc.lun_type
    }

    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    pub fn core(&self) -> &LunCore {
        &self.core
    }

    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    /// Dispatch a request to the LUN class
    pub fn process_request(&mut self, req: Request, completer: &ReqCompleter) -> ReqDisposition {
        match req.validate_cdb() {
            Ok(req) => self.process_validated(req, completer),
            Err(done) => ReqDisposition::Completed(done),
        }
    }

    /// Dispatch a request whose CDB the device already checked
    pub(crate) fn process_validated(&mut self, req: Request, completer: &ReqCompleter) -> ReqDisposition {
        self.ops.process(&mut self.core, req, completer)
    }

    /// A medium was inserted: arm the unit attention and refresh geometry
    pub fn media_inserted(&mut self) -> VscsiResult<()> {
        log::info!("{} LUN: medium inserted", self.desc.name);
        self.core.media_present = true;
        self.core.ready = false;
        self.ops.medium_inserted(&mut self.core)
    }

    pub fn media_removed(&mut self) {
        log::info!("{} LUN: medium removed", self.desc.name);
        self.core.media_present = false;
        self.core.ready = false;
        self.core.locked = false;
        self.ops.medium_removed(&mut self.core);
    }
}
