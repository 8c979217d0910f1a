pub mod crypt;
pub mod fd;
pub mod file;
pub mod inode;
pub mod journal;
pub mod pipe;
pub mod ramfs;
pub mod vfs;
pub mod writer;
