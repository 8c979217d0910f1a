#![cfg_attr(not(test), no_std)]
#![allow(non_snake_case)]

extern crate alloc;

pub mod fs;
pub mod kernel;
pub mod param;

pub use fs::fd::{Descriptors, FdTable};
pub use fs::file::{FileHandle, FileKind, FileTable, OpenFile};
pub use fs::vfs::{FileError, FileResult, InodeType, OpenFlags, Stat};
pub use kernel::FileConfig;
