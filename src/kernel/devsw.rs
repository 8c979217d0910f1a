use conquer_once::spin::OnceCell;

use crate::fs::vfs::{FileError, FileResult};
use crate::param::NDEV;

pub type DevRead = fn(&mut [u8]) -> FileResult<usize>;
pub type DevWrite = fn(&[u8]) -> FileResult<usize>;

/// A driver's entry points.
#[derive(Clone, Copy)]
pub struct DevSw {
    pub read: Option<DevRead>,
    pub write: Option<DevWrite>,
}

impl DevSw {
    pub const EMPTY: DevSw = DevSw {
        read: None,
        write: None,
    };
}

/// Maps major device numbers to device functions.
pub struct DeviceRegistry {
    table: [DevSw; NDEV],
}

impl DeviceRegistry {
    pub const fn new() -> Self {
        Self {
            table: [DevSw::EMPTY; NDEV],
        }
    }

    /// Installs `devsw` at `major`. Only usable while building the registry,
    /// before it is published.
    pub fn register(mut self, major: usize, devsw: DevSw) -> FileResult<Self> {
        let Some(slot) = self.table.get_mut(major) else {
            log::error!("devsw: major {} out of range (NDEV = {})", major, NDEV);
            return Err(FileError::UnregisteredDevice);
        };
        *slot = devsw;
        Ok(self)
    }

    pub fn lookup(&self, major: i16) -> Option<&DevSw> {
        usize::try_from(major).ok().and_then(|m| self.table.get(m))
    }

    pub fn reader(&self, major: i16) -> FileResult<DevRead> {
        self.lookup(major)
            .and_then(|d| d.read)
            .ok_or(FileError::UnregisteredDevice)
    }

    pub fn writer(&self, major: i16) -> FileResult<DevWrite> {
        self.lookup(major)
            .and_then(|d| d.write)
            .ok_or(FileError::UnregisteredDevice)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static DEVSW: OnceCell<DeviceRegistry> = OnceCell::uninit();

/// Publishes the boot-time device table. Later calls keep the first table.
pub fn initDevsw(registry: DeviceRegistry) -> &'static DeviceRegistry {
    let mut installed = false;
    let table = DEVSW.get_or_init(|| {
        installed = true;
        registry
    });
    if !installed {
        log::error!("Device table already initialized.");
    }
    table
}

pub fn devsw() -> Option<&'static DeviceRegistry> {
    DEVSW.get()
}
