use alloc::{sync::Arc, vec::Vec};
use core::cmp::min;
use core::sync::atomic::{AtomicU32, Ordering};
use hashbrown::HashMap;
use spin::Mutex;

use super::inode::{Inode, InodeMeta, LockedInode};
use super::journal::MemLog;
use super::vfs::{FileError, FileResult, InodeStore, InodeType};
use crate::param::{BSIZE, MAXFILE, NDIRECT};

/// Inodes per block.
const IPB: u32 = (BSIZE / 64) as u32;
const INODE_START: u32 = 2;
const BITMAP_BLOCK: u32 = 64;
const DATA_START: u32 = 65;

/// The "on-disk" copy of an inode.
struct DiskInode {
    fileType: InodeType,
    major: i16,
    minor: i16,
    nlink: i16,
    size: u32,
    encrypted: bool,
    addrs: [u32; NDIRECT + 1],
    /// contents of the indirect block
    indirect: Vec<u32>,
    data: Vec<u8>,
}

impl DiskInode {
    fn new(fileType: InodeType, major: i16, minor: i16) -> Self {
        Self {
            fileType,
            major,
            minor,
            nlink: 1,
            size: 0,
            encrypted: false,
            addrs: [0; NDIRECT + 1],
            indirect: Vec::new(),
            data: Vec::new(),
        }
    }
}

/// Memory-backed inode storage.
///
/// Keeps a table of cached in-memory inodes (`iget`/`iput`) on top of a
/// map of disk inodes, and reports every block it dirties to the log when
/// one is attached.
pub struct RamFs {
    dev: u32,
    disk: Mutex<HashMap<u32, DiskInode>>,
    itable: Mutex<Vec<Arc<Inode>>>,
    nextInum: AtomicU32,
    nextBlock: AtomicU32,
    maxFileBytes: usize,
    log: Option<Arc<MemLog>>,
}

impl RamFs {
    pub fn new(dev: u32) -> Self {
        Self {
            dev,
            disk: Mutex::new(HashMap::new()),
            itable: Mutex::new(Vec::new()),
            nextInum: AtomicU32::new(1),
            nextBlock: AtomicU32::new(DATA_START),
            maxFileBytes: MAXFILE * BSIZE,
            log: None,
        }
    }

    pub fn withLog(mut self, log: Arc<MemLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Caps file size below the default `MAXFILE * BSIZE`. Writes past the
    /// cap come back short, the way a full disk would.
    pub fn withMaxFileBytes(mut self, maxFileBytes: usize) -> Self {
        self.maxFileBytes = maxFileBytes;
        self
    }

    /// Creates an inode directly on disk, outside the log (like mkfs), and
    /// returns a referenced, unlocked in-memory copy.
    pub fn create(&self, fileType: InodeType) -> Arc<Inode> {
        self.allocate(DiskInode::new(fileType, 0, 0))
    }

    pub fn mknod(&self, major: i16, minor: i16) -> Arc<Inode> {
        self.allocate(DiskInode::new(InodeType::Device, major, minor))
    }

    fn allocate(&self, dip: DiskInode) -> Arc<Inode> {
        let inum = self.nextInum.fetch_add(1, Ordering::AcqRel);
        self.disk.lock().insert(inum, dip);
        let mut itable = self.itable.lock();
        let ip = Arc::new(Inode::new(self.dev, inum));
        itable.push(Arc::clone(&ip));
        ip
    }

    /// Finds inode `inum` and returns a new reference to it.
    pub fn iget(&self, inum: u32) -> Option<Arc<Inode>> {
        let mut itable = self.itable.lock();
        if let Some(ip) = itable.iter().find(|ip| ip.inum() == inum && ip.refs() > 0) {
            return Some(ip.idup());
        }
        if !self.disk.lock().contains_key(&inum) {
            return None;
        }
        let ip = Arc::new(Inode::new(self.dev, inum));
        itable.push(Arc::clone(&ip));
        Some(ip)
    }

    /// Snapshot of inode `inum`'s bytes as stored.
    pub fn contents(&self, inum: u32) -> Option<Vec<u8>> {
        let disk = self.disk.lock();
        let dip = disk.get(&inum)?;
        Some(dip.data[..dip.size as usize].to_vec())
    }

    /// Number of in-memory inodes currently referenced.
    pub fn cached(&self) -> usize {
        self.itable.lock().len()
    }

    fn logWrite(&self, blockno: u32) {
        if let Some(log) = &self.log {
            log.logWrite(blockno);
        }
    }

    fn inodeBlock(inum: u32) -> u32 {
        INODE_START + inum / IPB
    }

    /// Allocates a zeroed disk block.
    fn balloc(&self) -> u32 {
        let bn = self.nextBlock.fetch_add(1, Ordering::AcqRel);
        self.logWrite(BITMAP_BLOCK);
        self.logWrite(bn);
        bn
    }

    /// Disk block holding the `bn`th block of the file, allocated on demand.
    fn bmap(&self, meta: &mut InodeMeta, dip: &mut DiskInode, bn: usize) -> u32 {
        if bn < NDIRECT {
            if meta.addrs[bn] == 0 {
                meta.addrs[bn] = self.balloc();
            }
            return meta.addrs[bn];
        }

        let bn = bn - NDIRECT;
        if meta.addrs[NDIRECT] == 0 {
            meta.addrs[NDIRECT] = self.balloc();
        }
        if dip.indirect.len() <= bn {
            dip.indirect.resize(bn + 1, 0);
        }
        if dip.indirect[bn] == 0 {
            dip.indirect[bn] = self.balloc();
            self.logWrite(meta.addrs[NDIRECT]);
        }
        dip.indirect[bn]
    }

    /// Discards the inode's contents. Caller holds the inode lock.
    fn itrunc(&self, inode: &mut LockedInode<'_>) {
        let inum = inode.inode().inum();
        if let Some(dip) = self.disk.lock().get_mut(&inum) {
            dip.data.clear();
            dip.indirect.clear();
        }
        self.logWrite(BITMAP_BLOCK);
        let meta = inode.metaMut();
        meta.addrs = [0; NDIRECT + 1];
        meta.size = 0;
        inode.update();
    }
}

impl InodeStore for RamFs {
    fn load(&self, ip: &Inode, meta: &mut InodeMeta) -> FileResult<()> {
        let disk = self.disk.lock();
        let dip = disk.get(&ip.inum()).ok_or(FileError::InodeNotLoaded)?;
        if dip.fileType == InodeType::Free {
            return Err(FileError::InodeNotLoaded);
        }
        meta.fileType = dip.fileType;
        meta.major = dip.major;
        meta.minor = dip.minor;
        meta.nlink = dip.nlink;
        meta.size = dip.size;
        meta.encrypted = dip.encrypted;
        meta.addrs = dip.addrs;
        meta.valid = true;
        Ok(())
    }

    fn readi(&self, ip: &Inode, meta: &InodeMeta, off: u32, dst: &mut [u8]) -> usize {
        let off = off as usize;
        let size = meta.size as usize;
        if off > size {
            return 0;
        }

        let disk = self.disk.lock();
        let Some(dip) = disk.get(&ip.inum()) else {
            return 0;
        };
        let n = min(dst.len(), min(size, dip.data.len()).saturating_sub(off));
        dst[..n].copy_from_slice(&dip.data[off..off + n]);
        n
    }

    fn writei(&self, ip: &Inode, meta: &mut InodeMeta, off: u32, src: &[u8]) -> usize {
        let off = off as usize;
        if off > meta.size as usize || src.is_empty() {
            return 0;
        }
        let end = min(off + src.len(), self.maxFileBytes);
        if end <= off {
            log::warn!("writei: inode {} at maximum size", ip.inum());
            return 0;
        }

        {
            let mut disk = self.disk.lock();
            let Some(dip) = disk.get_mut(&ip.inum()) else {
                return 0;
            };
            for bn in off / BSIZE..=(end - 1) / BSIZE {
                let blockno = self.bmap(meta, dip, bn);
                self.logWrite(blockno);
            }
            if dip.data.len() < end {
                dip.data.resize(end, 0);
            }
            dip.data[off..end].copy_from_slice(&src[..end - off]);
        }

        if end > meta.size as usize {
            meta.size = end as u32;
        }
        // write the i-node back to disk even if the size didn't change
        // because the loop above might have allocated new blocks.
        self.iupdate(ip, meta);
        end - off
    }

    fn iupdate(&self, ip: &Inode, meta: &InodeMeta) {
        let mut disk = self.disk.lock();
        let Some(dip) = disk.get_mut(&ip.inum()) else {
            log::error!("iupdate: inode {} not on disk", ip.inum());
            return;
        };
        dip.fileType = meta.fileType;
        dip.major = meta.major;
        dip.minor = meta.minor;
        dip.nlink = meta.nlink;
        dip.size = meta.size;
        dip.encrypted = meta.encrypted;
        dip.addrs = meta.addrs;
        drop(disk);
        self.logWrite(Self::inodeBlock(ip.inum()));
    }

    fn iput(&self, ip: Arc<Inode>) {
        let mut itable = self.itable.lock();

        if ip.refs() == 1 {
            // ref == 1 means no other thread can have ip locked,
            // so this lock won't block.
            let mut inode = ip.lock(self);
            if inode.meta().valid && inode.meta().nlink == 0 {
                self.itrunc(&mut inode);
                inode.metaMut().fileType = InodeType::Free;
                inode.update();
                inode.metaMut().valid = false;
                self.disk.lock().remove(&ip.inum());
                log::trace!("iput: freed inode {}", ip.inum());
            }
        }

        if ip.releaseRef() == 0 {
            itable.retain(|cached| !Arc::ptr_eq(cached, &ip));
        }
    }
}
