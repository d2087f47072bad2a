//! Geometry constants and tunables.

use crate::error::FileSystemError;
use log::LevelFilter;

pub const MAX_FILENAME_LENGTH: usize = 255;

/// Image capacity for 0.5 KiB blocks.
pub const MAX_FILE_SYSTEM_SIZE_512: u32 = 2 * 1024 * 1024;
/// Image capacity for 1 KiB blocks.
pub const MAX_FILE_SYSTEM_SIZE_1024: u32 = 4 * 1024 * 1024;

/// Highest block count the 16-bit FAT can address without colliding
/// with the marker values.
pub const MAX_TOTAL_BLOCKS: u32 = 0xFFFC;
pub const MAX_BLOCK_SIZE: u32 = 64 * 1024;

pub const ATTR_FILE: u8 = 0x00;
pub const ATTR_DIRECTORY: u8 = 0x10;

/// Environment variable consulted by `log_level`.
pub const LOG_ENV: &str = "FATDISK_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub total_blocks: u32,
    pub block_size: u32,
}

impl Geometry {
    pub fn new(total_blocks: u32, block_size: u32) -> Result<Self, FileSystemError> {
        if !(1..=MAX_BLOCK_SIZE).contains(&block_size)
            || !(2..=MAX_TOTAL_BLOCKS).contains(&total_blocks)
        {
            return Err(FileSystemError::InvalidGeometry(format!(
                "{} blocks of {} bytes",
                total_blocks, block_size
            )));
        }
        Ok(Geometry {
            total_blocks,
            block_size,
        })
    }

    /// Geometry for the two supported block sizes, given in KiB.
    pub fn from_block_size_kb(kb: &str) -> Result<Self, FileSystemError> {
        let value: f64 = kb
            .trim()
            .parse()
            .map_err(|_| FileSystemError::InvalidGeometry(format!("block size '{}'", kb)))?;

        let (block_size, capacity) = if value == 0.5 {
            (512, MAX_FILE_SYSTEM_SIZE_512)
        } else if value == 1.0 {
            (1024, MAX_FILE_SYSTEM_SIZE_1024)
        } else {
            return Err(FileSystemError::InvalidGeometry(format!(
                "block size must be 0.5 or 1 KB, got '{}'",
                kb
            )));
        };

        Geometry::new(capacity / block_size, block_size)
    }
}

/// What `rmdir` does with a directory that still has children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RmdirPolicy {
    /// Remove the whole subtree and release every file chain in it.
    #[default]
    Recursive,
    RejectNonEmpty,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsOptions {
    pub rmdir: RmdirPolicy,
}

/// Log level from `FATDISK_LOG`, falling back to the build default.
pub fn log_level() -> LevelFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_level())
}

fn default_level() -> LevelFilter {
    #[cfg(debug_assertions)]
    {
        LevelFilter::Info
    }
    #[cfg(not(debug_assertions))]
    {
        LevelFilter::Warn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_block_sizes() {
        let half = Geometry::from_block_size_kb("0.5").expect("0.5");
        assert_eq!(half, Geometry { total_blocks: 4096, block_size: 512 });

        let one = Geometry::from_block_size_kb("1").expect("1");
        assert_eq!(one, Geometry { total_blocks: 4096, block_size: 1024 });
        assert_eq!(Geometry::from_block_size_kb("1.0").expect("1.0"), one);
    }

    #[test]
    fn rejects_other_sizes() {
        assert!(Geometry::from_block_size_kb("2").is_err());
        assert!(Geometry::from_block_size_kb("abc").is_err());
        assert!(Geometry::new(1, 512).is_err());
        assert!(Geometry::new(0x10000, 512).is_err());
        assert!(Geometry::new(16, 0).is_err());
    }
}
