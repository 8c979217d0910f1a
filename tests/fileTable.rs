#![allow(non_snake_case)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use lazy_static::lazy_static;
use rOSfile::fs::journal::MemLog;
use rOSfile::fs::pipe::RamPipe;
use rOSfile::fs::ramfs::RamFs;
use rOSfile::fs::vfs::Pipe;
use rOSfile::kernel::devsw::{DevSw, DeviceRegistry};
use rOSfile::param::CONSOLE;
use rOSfile::{FileConfig, FileError, FileHandle, FileResult, FileTable, InodeType, OpenFile, OpenFlags};

static CONSOLE_BYTES: AtomicUsize = AtomicUsize::new(0);

fn consoleRead(dst: &mut [u8]) -> FileResult<usize> {
    let n = dst.len().min(3);
    dst[..n].copy_from_slice(&b"abc"[..n]);
    Ok(n)
}

fn consoleWrite(src: &[u8]) -> FileResult<usize> {
    CONSOLE_BYTES.fetch_add(src.len(), Ordering::SeqCst);
    Ok(src.len())
}

lazy_static! {
    static ref DEVSW: DeviceRegistry = DeviceRegistry::new()
        .register(
            CONSOLE,
            DevSw {
                read: Some(consoleRead),
                write: Some(consoleWrite),
            },
        )
        .unwrap();
}

fn table(nfile: usize) -> (FileTable, Arc<RamFs>) {
    let log = Arc::new(MemLog::new());
    let fs = Arc::new(RamFs::new(1).withLog(Arc::clone(&log)));
    let config = FileConfig {
        nfile,
        ..FileConfig::new_default()
    };
    (FileTable::new(config, &DEVSW, fs.clone(), log).unwrap(), fs)
}

/// Pipe that counts how often each end is closed.
#[derive(Default)]
struct CountingPipe {
    readCloses: AtomicUsize,
    writeCloses: AtomicUsize,
}

impl Pipe for CountingPipe {
    fn read(&self, _dst: &mut [u8]) -> FileResult<usize> {
        Ok(0)
    }

    fn write(&self, src: &[u8]) -> FileResult<usize> {
        Ok(src.len())
    }

    fn close(&self, writable: bool) {
        if writable {
            self.writeCloses.fetch_add(1, Ordering::SeqCst);
        } else {
            self.readCloses.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn concurrent_allocate_hands_out_distinct_slots() {
    let (table, _) = table(64);
    let table = Arc::new(table);

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let mut got = Vec::new();
                loop {
                    match table.allocate() {
                        Ok(h) => got.push(h),
                        Err(FileError::ExhaustedTable) => return got,
                        Err(e) => panic!("unexpected {:?}", e),
                    }
                }
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        for h in worker.join().unwrap() {
            assert!(seen.insert(h), "slot {} handed out twice", h.index());
        }
    }
    assert_eq!(seen.len(), 64);
    assert_eq!(table.inUse(), 64);
    assert_eq!(table.allocate(), Err(FileError::ExhaustedTable));
}

#[test]
fn concurrent_open_close_keeps_counts() {
    let (table, fs) = table(16);
    let table = Arc::new(table);
    let ip = fs.create(InodeType::File);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let table = Arc::clone(&table);
            let ip = ip.idup();
            thread::spawn(move || {
                let h = table.open(OpenFile::inode(ip, OpenFlags::READ)).unwrap();
                for _ in 0..100 {
                    table.duplicate(h).unwrap();
                    table.close(h).unwrap();
                }
                table.close(h).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(table.inUse(), 0);
    assert_eq!(ip.refs(), 1);
}

#[test]
fn duplicate_then_close_tears_down_once() {
    let (table, _) = table(4);
    let pipe = Arc::new(CountingPipe::default());
    let (r, w) = table.openPipe(pipe.clone()).unwrap();

    assert_eq!(table.duplicate(r), Ok(r));
    assert_eq!(table.refs(r), 2);
    table.close(r).unwrap();
    assert_eq!(pipe.readCloses.load(Ordering::SeqCst), 0);
    table.close(r).unwrap();
    assert_eq!(pipe.readCloses.load(Ordering::SeqCst), 1);

    table.close(w).unwrap();
    assert_eq!(pipe.writeCloses.load(Ordering::SeqCst), 1);
    assert_eq!(table.inUse(), 0);
}

#[test]
fn close_after_last_close_aborts_without_second_teardown() {
    let (table, _) = table(4);
    let pipe = Arc::new(CountingPipe::default());
    let (r, _w) = table.openPipe(pipe.clone()).unwrap();
    table.close(r).unwrap();

    let table = &table;
    let again = thread::scope(|s| s.spawn(move || table.close(r)).join());
    assert!(again.is_err());
    assert_eq!(pipe.readCloses.load(Ordering::SeqCst), 1);
    assert_eq!(table.refs(r), 0);

    // the table lock was released while unwinding
    assert_eq!(table.allocate(), Ok(r));
}

#[test]
#[should_panic(expected = "filedup")]
fn duplicate_freed_slot_aborts() {
    let (table, _) = table(2);
    let h = table.allocate().unwrap();
    table.close(h).unwrap();
    let _ = table.duplicate(h);
}

#[test]
fn capacity_two_reuses_closed_slot() {
    let (table, _) = table(2);
    let s0 = table.allocate().unwrap();
    let _s1 = table.allocate().unwrap();
    assert_eq!(table.allocate(), Err(FileError::ExhaustedTable));
    table.close(s0).unwrap();
    assert_eq!(table.allocate(), Ok(s0));
}

#[test]
fn out_of_range_handle() {
    let (table, _) = table(2);
    let bogus = FileHandle::fromIndex(5);
    assert_eq!(table.duplicate(bogus), Err(FileError::BadDescriptor));
    assert_eq!(table.close(bogus), Err(FileError::BadDescriptor));
    assert_eq!(table.stat(bogus), Err(FileError::BadDescriptor));
}

#[test]
fn write_then_read_back() {
    let (table, fs) = table(4);
    let ip = fs.create(InodeType::File);
    let w = table.open(OpenFile::inode(ip.idup(), OpenFlags::WRITE)).unwrap();
    let r = table.open(OpenFile::inode(ip, OpenFlags::READ)).unwrap();

    let data = b"xv6 file layer round trip";
    assert_eq!(table.write(w, data), Ok(data.len()));
    let mut buf = vec![0u8; data.len()];
    assert_eq!(table.read(r, &mut buf), Ok(data.len()));
    assert_eq!(&buf, data);
    assert_eq!(table.read(r, &mut buf), Ok(0));
}

#[test]
fn stat_reports_size_after_writes() {
    let (table, fs) = table(4);
    let ip = fs.create(InodeType::File);
    let inum = ip.inum();
    let h = table.open(OpenFile::inode(ip, OpenFlags::WRITE)).unwrap();
    table.write(h, &[1u8; 700]).unwrap();
    table.write(h, &[2u8; 300]).unwrap();

    let st = table.stat(h).unwrap();
    assert_eq!(st.size, 1000);
    assert_eq!(st.ino, inum);
    assert_eq!(st.dev, 1);
    assert_eq!(st.fileType, InodeType::File);
    assert!(!st.encrypted);
}

#[test]
fn pipe_stat_and_transfer() {
    let (table, _) = table(4);
    let (r, w) = table.openPipe(RamPipe::new()).unwrap();
    assert_eq!(table.stat(r), Err(FileError::UnsupportedOperation));
    assert_eq!(table.stat(w), Err(FileError::UnsupportedOperation));

    let reader = {
        let mut buf = [0u8; 5];
        let mut got = Vec::new();
        let table = &table;
        thread::scope(|s| {
            s.spawn(|| table.write(w, b"hello").unwrap());
            while got.len() < 5 {
                let n = table.read(r, &mut buf).unwrap();
                got.extend_from_slice(&buf[..n]);
            }
        });
        got
    };
    assert_eq!(reader, b"hello");

    table.close(w).unwrap();
    assert_eq!(table.read(r, &mut [0u8; 4]), Ok(0));
}

#[test]
fn device_dispatch() {
    let (table, fs) = table(4);
    let ip = fs.mknod(CONSOLE as i16, 0);
    let h = table
        .open(OpenFile::device(ip, CONSOLE as i16, OpenFlags::READ | OpenFlags::WRITE))
        .unwrap();

    let before = CONSOLE_BYTES.load(Ordering::SeqCst);
    assert_eq!(table.write(h, b"0123456789"), Ok(10));
    assert!(CONSOLE_BYTES.load(Ordering::SeqCst) >= before + 10);

    let mut buf = [0u8; 8];
    assert_eq!(table.read(h, &mut buf), Ok(3));
    assert_eq!(&buf[..3], b"abc");

    let other = table
        .open(OpenFile::device(fs.mknod(7, 0), 7, OpenFlags::READ))
        .unwrap();
    assert_eq!(table.read(other, &mut buf), Err(FileError::UnregisteredDevice));
    let negative = table
        .open(OpenFile::device(fs.mknod(-1, 0), -1, OpenFlags::READ))
        .unwrap();
    assert_eq!(table.read(negative, &mut buf), Err(FileError::UnregisteredDevice));
}
