//! Whole-file XOR toggle.
//!
//! XOR with a single-byte key is its own inverse, so `decrypt` is `encrypt`
//! with the opposite precondition on the inode's `encrypted` flag. Nothing
//! checks that the key matches the one used to encrypt.

use alloc::vec::Vec;

use super::fd::Descriptors;
use super::file::{FileKind, FileTable};
use super::journal::Transaction;
use super::vfs::{FileError, FileResult};

pub fn xorBytes(buf: &mut [u8], key: u8) {
    for b in buf.iter_mut() {
        *b ^= key;
    }
}

impl FileTable {
    /// XORs the contents of the file open at `fd` with `key` and marks it
    /// encrypted. An empty file just has its flag set.
    pub fn encrypt(&self, fds: &dyn Descriptors, fd: i32, key: u8) -> FileResult<()> {
        self.toggle(fds, fd, key, true)
    }

    /// Reverses `encrypt` and clears the mark.
    pub fn decrypt(&self, fds: &dyn Descriptors, fd: i32, key: u8) -> FileResult<()> {
        self.toggle(fds, fd, key, false)
    }

    fn toggle(&self, fds: &dyn Descriptors, fd: i32, key: u8, encrypt: bool) -> FileResult<()> {
        let handle = fds.lookup(fd).ok_or(FileError::BadDescriptor)?;
        let file = self.get(handle)?;
        let FileKind::Inode { ip, .. } = file.kind() else {
            return Err(FileError::UnsupportedOperation);
        };
        if !file.readable() {
            return Err(FileError::NotReadable);
        }
        if !file.writable() {
            return Err(FileError::NotWritable);
        }

        let _tx = Transaction::begin(self.journal());
        let mut inode = ip.lock(self.inodes());
        inode.ensureValid()?;
        match (encrypt, inode.meta().encrypted) {
            (true, true) => return Err(FileError::AlreadyEncrypted),
            (false, false) => return Err(FileError::NotEncrypted),
            _ => {}
        }

        let size = inode.meta().size as usize;
        if size > self.config().maxCryptBytes {
            log::warn!(
                "crypt: inode {} is {} bytes, limit {}",
                ip.inum(),
                size,
                self.config().maxCryptBytes
            );
            return Err(FileError::FileTooLarge);
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| FileError::FileTooLarge)?;
        buf.resize(size, 0);

        let n = inode.read(0, &mut buf);
        if n != size {
            log::error!("crypt: inode {} read {} of {} bytes", ip.inum(), n, size);
            return Err(FileError::ShortIO);
        }
        xorBytes(&mut buf, key);
        let w = inode.write(0, &buf);
        if w != n {
            // the first w bytes are already transformed
            log::error!("crypt: inode {} wrote {} of {} bytes", ip.inum(), w, n);
            return Err(FileError::ShortIO);
        }

        inode.metaMut().encrypted = encrypt;
        inode.update();
        log::trace!(
            "crypt: inode {} {} ({} bytes)",
            ip.inum(),
            if encrypt { "encrypted" } else { "decrypted" },
            n
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::file::OpenFile;
    use crate::fs::inode::{Inode, InodeMeta};
    use crate::fs::journal::MemLog;
    use crate::fs::pipe::RamPipe;
    use crate::fs::ramfs::RamFs;
    use crate::fs::vfs::{InodeStore, InodeType, OpenFlags};
    use crate::kernel::devsw::DeviceRegistry;
    use crate::kernel::FileConfig;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicBool, Ordering};
    use lazy_static::lazy_static;

    lazy_static! {
        static ref NODEVS: DeviceRegistry = DeviceRegistry::new();
    }

    fn fixture() -> (FileTable, Arc<RamFs>) {
        let log = Arc::new(MemLog::new());
        let fs = Arc::new(RamFs::new(1).withLog(Arc::clone(&log)));
        let table = FileTable::new(FileConfig::new_default(), &NODEVS, fs.clone(), log).unwrap();
        (table, fs)
    }

    #[test]
    fn test_xor_is_involution() {
        let mut buf = *b"hello";
        xorBytes(&mut buf, 0x5a);
        assert_ne!(&buf, b"hello");
        xorBytes(&mut buf, 0x5a);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let (table, fs) = fixture();
        let ip = fs.create(InodeType::File);
        let inum = ip.inum();
        let h = table
            .open(OpenFile::inode(ip, OpenFlags::READ | OpenFlags::WRITE))
            .unwrap();
        table.write(h, b"attack at dawn").unwrap();
        let fds = [Some(h)];

        table.encrypt(&fds, 0, 0x2a).unwrap();
        assert!(table.stat(h).unwrap().encrypted);
        let scrambled = fs.contents(inum).unwrap();
        assert_eq!(scrambled[0], b'a' ^ 0x2a);

        assert_eq!(table.encrypt(&fds, 0, 0x2a), Err(FileError::AlreadyEncrypted));
        assert_eq!(fs.contents(inum).unwrap(), scrambled);

        table.decrypt(&fds, 0, 0x2a).unwrap();
        assert!(!table.stat(h).unwrap().encrypted);
        assert_eq!(fs.contents(inum).unwrap(), b"attack at dawn");
        assert_eq!(table.decrypt(&fds, 0, 0x2a), Err(FileError::NotEncrypted));
    }

    #[test]
    fn test_requires_read_write_inode() {
        let (table, fs) = fixture();
        let ro = table
            .open(OpenFile::inode(fs.create(InodeType::File), OpenFlags::READ))
            .unwrap();
        let (r, _w) = table.openPipe(RamPipe::new()).unwrap();
        let fds = [Some(ro), Some(r), None];
        assert_eq!(table.encrypt(&fds, 0, 1), Err(FileError::NotWritable));
        assert_eq!(table.encrypt(&fds, 1, 1), Err(FileError::UnsupportedOperation));
        assert_eq!(table.encrypt(&fds, 2, 1), Err(FileError::BadDescriptor));
        assert_eq!(table.encrypt(&fds, 7, 1), Err(FileError::BadDescriptor));
    }

    #[test]
    fn test_rejects_file_over_bound() {
        let (table, fs) = fixture();
        let h = table
            .open(OpenFile::inode(fs.create(InodeType::File), OpenFlags::READ | OpenFlags::WRITE))
            .unwrap();
        let big = alloc::vec![1u8; table.config().maxCryptBytes + 1];
        table.write(h, &big).unwrap();
        assert_eq!(table.encrypt(&[Some(h)], 0, 3), Err(FileError::FileTooLarge));
        assert!(!table.stat(h).unwrap().encrypted);
    }

    #[test]
    fn test_empty_file_toggles() {
        let (table, fs) = fixture();
        let h = table
            .open(OpenFile::inode(fs.create(InodeType::File), OpenFlags::READ | OpenFlags::WRITE))
            .unwrap();
        table.encrypt(&[Some(h)], 0, 9).unwrap();
        assert!(table.stat(h).unwrap().encrypted);
    }

    /// `RamFs` that can be told to move only half of each read or write.
    struct HalfIoFs {
        fs: RamFs,
        shortReads: AtomicBool,
        shortWrites: AtomicBool,
    }

    impl InodeStore for HalfIoFs {
        fn load(&self, ip: &Inode, meta: &mut InodeMeta) -> FileResult<()> {
            self.fs.load(ip, meta)
        }

        fn readi(&self, ip: &Inode, meta: &InodeMeta, off: u32, dst: &mut [u8]) -> usize {
            let len = if self.shortReads.load(Ordering::SeqCst) {
                dst.len() / 2
            } else {
                dst.len()
            };
            self.fs.readi(ip, meta, off, &mut dst[..len])
        }

        fn writei(&self, ip: &Inode, meta: &mut InodeMeta, off: u32, src: &[u8]) -> usize {
            let len = if self.shortWrites.load(Ordering::SeqCst) {
                src.len() / 2
            } else {
                src.len()
            };
            self.fs.writei(ip, meta, off, &src[..len])
        }

        fn iupdate(&self, ip: &Inode, meta: &InodeMeta) {
            self.fs.iupdate(ip, meta)
        }

        fn iput(&self, ip: Arc<Inode>) {
            self.fs.iput(ip)
        }
    }

    fn halfIoFixture(data: &[u8]) -> (FileTable, Arc<HalfIoFs>, crate::fs::file::FileHandle, u32) {
        let log = Arc::new(MemLog::new());
        let store = Arc::new(HalfIoFs {
            fs: RamFs::new(1).withLog(Arc::clone(&log)),
            shortReads: AtomicBool::new(false),
            shortWrites: AtomicBool::new(false),
        });
        let table = FileTable::new(FileConfig::new_default(), &NODEVS, store.clone(), log).unwrap();
        let ip = store.fs.create(InodeType::File);
        let inum = ip.inum();
        let h = table
            .open(OpenFile::inode(ip, OpenFlags::READ | OpenFlags::WRITE))
            .unwrap();
        assert_eq!(table.write(h, data), Ok(data.len()));
        (table, store, h, inum)
    }

    #[test]
    fn test_short_write_keeps_flag_and_prefix() {
        let (table, store, h, inum) = halfIoFixture(b"abcdefgh");
        store.shortWrites.store(true, Ordering::SeqCst);

        assert_eq!(table.encrypt(&[Some(h)], 0, 1), Err(FileError::ShortIO));
        assert!(!table.stat(h).unwrap().encrypted);
        // no rollback: the written half stays transformed
        assert_eq!(store.fs.contents(inum).unwrap(), [96, 99, 98, 101, b'e', b'f', b'g', b'h']);
    }

    #[test]
    fn test_short_read_changes_nothing() {
        let (table, store, h, inum) = halfIoFixture(b"abcdefgh");
        store.shortReads.store(true, Ordering::SeqCst);

        assert_eq!(table.encrypt(&[Some(h)], 0, 1), Err(FileError::ShortIO));
        assert!(!table.stat(h).unwrap().encrypted);
        assert_eq!(store.fs.contents(inum).unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_short_write_on_decrypt_keeps_flag() {
        let (table, store, h, inum) = halfIoFixture(b"abcd");
        table.encrypt(&[Some(h)], 0, 0x20).unwrap();
        store.shortWrites.store(true, Ordering::SeqCst);

        assert_eq!(table.decrypt(&[Some(h)], 0, 0x20), Err(FileError::ShortIO));
        assert!(table.stat(h).unwrap().encrypted);
        assert_eq!(store.fs.contents(inum).unwrap(), [b'a', b'b', b'c' ^ 0x20, b'd' ^ 0x20]);
    }

    #[test]
    fn test_missing_inode_not_loaded() {
        let (table, _) = fixture();
        let ghost = Arc::new(Inode::new(1, 999));
        let h = table
            .open(OpenFile::inode(ghost, OpenFlags::READ | OpenFlags::WRITE))
            .unwrap();
        assert_eq!(table.encrypt(&[Some(h)], 0, 1), Err(FileError::InodeNotLoaded));
        assert_eq!(table.decrypt(&[Some(h)], 0, 1), Err(FileError::InodeNotLoaded));
        assert_eq!(table.stat(h), Err(FileError::InodeNotLoaded));
    }
}
