pub mod devsw;

use conquer_once::spin::OnceCell;

use crate::fs::file::FileTable;
use crate::fs::vfs::{FileError, FileResult};
use crate::param::{BSIZE, MAXOPBLOCKS, NFILE, WRITE_OVERHEAD_BLOCKS};

/// Sizing of the open-file layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileConfig {
    /// open-file table capacity
    pub nfile: usize,
    /// blocks one log transaction may write
    pub maxOpBlocks: usize,
    pub blockSize: usize,
    /// largest file the encryption toggle will buffer
    pub maxCryptBytes: usize,
}

impl FileConfig {
    pub const fn new_default() -> Self {
        let mut config = FileConfig {
            nfile: NFILE,
            maxOpBlocks: MAXOPBLOCKS,
            blockSize: BSIZE,
            maxCryptBytes: 0,
        };
        config.maxCryptBytes = config.maxChunk();
        config
    }

    /// Bytes one transaction of an inode write may carry.
    pub const fn maxChunk(&self) -> usize {
        (self.maxOpBlocks.saturating_sub(WRITE_OVERHEAD_BLOCKS) / 2) * self.blockSize
    }

    pub fn validate(&self) -> FileResult<()> {
        if self.nfile == 0 {
            log::error!("file config: empty file table");
            return Err(FileError::InvalidConfig);
        }
        if self.maxChunk() == 0 {
            log::error!(
                "file config: {} blocks per transaction can't carry data past {} overhead blocks",
                self.maxOpBlocks,
                WRITE_OVERHEAD_BLOCKS
            );
            return Err(FileError::InvalidConfig);
        }
        if self.maxCryptBytes > self.maxChunk() {
            log::error!(
                "file config: encryption bound {} exceeds one transaction ({} bytes)",
                self.maxCryptBytes,
                self.maxChunk()
            );
            return Err(FileError::InvalidConfig);
        }
        Ok(())
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self::new_default()
    }
}

static FTABLE: OnceCell<FileTable> = OnceCell::uninit();

/// Publishes the system-wide file table. Later calls keep the first table.
pub fn fileinit(table: FileTable) -> &'static FileTable {
    let mut installed = false;
    let ftable = FTABLE.get_or_init(|| {
        installed = true;
        table
    });
    if installed {
        log::info!("ftable: {} slots", ftable.capacity());
    } else {
        log::error!("File table already initialized.");
    }
    ftable
}

pub fn ftable() -> &'static FileTable {
    FTABLE.get().expect("File table not initialized")
}
