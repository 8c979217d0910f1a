#![allow(non_snake_case)]

use std::io::{Read, Write};
use std::sync::Arc;

use conquer_once::spin::OnceCell;
use log::{Level, LevelFilter, Log, Metadata, Record};
use rOSfile::fs::journal::{MemLog, Transaction};
use rOSfile::fs::ramfs::RamFs;
use rOSfile::fs::vfs::InodeStore;
use rOSfile::kernel::devsw::{initDevsw, DevSw, DeviceRegistry};
use rOSfile::kernel::{fileinit, ftable};
use rOSfile::param::CONSOLE;
use rOSfile::{Descriptors, FdTable, FileConfig, FileError, FileResult, FileTable, InodeType, OpenFile, OpenFlags};

const KEY: u8 = 0x5a;

struct StdoutLogger {
    level: Level,
}

impl Log for StdoutLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("[{:5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceCell<StdoutLogger> = OnceCell::uninit();

fn initLogger() {
    let logger = LOGGER.get_or_init(|| StdoutLogger { level: Level::Info });
    if let Err(e) = log::set_logger(logger) {
        eprintln!("initLogger failed: {}", e);
        return;
    }
    log::set_max_level(LevelFilter::Info);
}

fn consoleRead(dst: &mut [u8]) -> FileResult<usize> {
    std::io::stdin().read(dst).map_err(|_| FileError::DeviceIo)
}

fn consoleWrite(src: &[u8]) -> FileResult<usize> {
    let mut out = std::io::stdout();
    out.write_all(src).map_err(|_| FileError::DeviceIo)?;
    out.flush().map_err(|_| FileError::DeviceIo)?;
    Ok(src.len())
}

/// Prints the file at `fd` to the console unless it is encrypted.
fn cat(table: &FileTable, fds: &FdTable, fd: i32, console: i32) -> FileResult<()> {
    let handle = fds.lookup(fd).ok_or(FileError::BadDescriptor)?;
    let out = fds.lookup(console).ok_or(FileError::BadDescriptor)?;
    if table.stat(handle)?.encrypted {
        table.write(out, b"Error: File is encrypted.\n")?;
        return Ok(());
    }

    let mut buf = [0u8; 512];
    loop {
        let n = table.read(handle, &mut buf)?;
        if n == 0 {
            return Ok(());
        }
        table.write(out, &buf[..n])?;
    }
}

fn run() -> FileResult<()> {
    let devsw = initDevsw(DeviceRegistry::new().register(
        CONSOLE,
        DevSw {
            read: Some(consoleRead),
            write: Some(consoleWrite),
        },
    )?);

    let journal = Arc::new(MemLog::new());
    let disk = Arc::new(RamFs::new(1).withLog(Arc::clone(&journal)));
    let console = disk.mknod(CONSOLE as i16, 0);
    let note = disk.create(InodeType::File);
    let inum = note.inum();

    fileinit(FileTable::new(
        FileConfig::new_default(),
        devsw,
        disk.clone(),
        journal.clone(),
    )?);
    let table = ftable();

    let mut fds = FdTable::new();
    let consoleFd = table
        .open(OpenFile::device(console, CONSOLE as i16, OpenFlags::READ | OpenFlags::WRITE))
        .and_then(|h| fds.fdalloc(h).ok_or(FileError::ExhaustedTable))?;
    let writeFd = table
        .open(OpenFile::inode(note.idup(), OpenFlags::READ | OpenFlags::WRITE))
        .and_then(|h| fds.fdalloc(h).ok_or(FileError::ExhaustedTable))?;

    let handle = fds.lookup(writeFd).ok_or(FileError::BadDescriptor)?;
    table.write(handle, b"the quick brown fox jumps over the lazy dog\n")?;

    table.encrypt(&fds, writeFd, KEY)?;
    log::info!("encrypted inode {}: {:02x?}", inum, disk.contents(inum).unwrap_or_default());

    let readFd = table
        .open(OpenFile::inode(note.idup(), OpenFlags::READ))
        .and_then(|h| fds.fdalloc(h).ok_or(FileError::ExhaustedTable))?;
    cat(table, &fds, readFd, consoleFd)?;

    table.decrypt(&fds, writeFd, KEY)?;
    cat(table, &fds, readFd, consoleFd)?;

    for fd in [readFd, writeFd, consoleFd] {
        if let Some(handle) = fds.take(fd) {
            table.close(handle)?;
        }
    }
    {
        let _tx = Transaction::begin(&*journal);
        disk.iput(note);
    }
    log::info!(
        "{} of {} slots in use, {} transactions, {} commits",
        table.inUse(),
        table.capacity(),
        journal.operations(),
        journal.commits()
    );
    Ok(())
}

fn main() {
    initLogger();
    if let Err(e) = run() {
        log::error!("rOSfile: {} ({})", e, e.code());
        std::process::exit(e.errno() as i32);
    }
}
