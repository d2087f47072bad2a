//! A FAT-style filesystem stored in a single host file.
//!
//! The whole image (superblock, allocation table, directory tree and
//! data blocks) is loaded into memory on mount and written back in full
//! after every operation.

pub mod cli;
pub mod codec;
pub mod config;
pub mod disk;
pub mod entry;
pub mod error;
pub mod fat;
pub mod fs;
pub mod host;
pub mod logging;

pub use error::FileSystemError;
pub use fs::{FatFileSystem, FileSystem};
