use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("failed to open image {path}: {source}")]
    ImageOpenFailure { path: PathBuf, source: io::Error },
    #[error("failed to read image: {0}")]
    ImageReadFailure(#[source] io::Error),
    #[error("failed to write image: {0}")]
    ImageWriteFailure(#[source] io::Error),
}

/// Backing storage for a whole serialized image.
///
/// The image is always read and written in one piece; there is no
/// partial-write path.
pub trait Disk {
    fn load(&mut self) -> Result<Vec<u8>, DiskError>;
    fn store(&mut self, image: &[u8]) -> Result<(), DiskError>;
}

/// A host file holding one image.
#[derive(Debug)]
pub struct ImageFile {
    path: PathBuf,
    file_handle: File,
    num_loads: u64,
    num_stores: u64,
}

impl ImageFile {
    /// Opens an existing image.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DiskError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| DiskError::ImageOpenFailure {
                path: path.clone(),
                source,
            })?;
        Ok(ImageFile::with_handle(path, file))
    }

    /// Creates (or truncates) an image file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, DiskError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| DiskError::ImageOpenFailure {
                path: path.clone(),
                source,
            })?;
        Ok(ImageFile::with_handle(path, file))
    }

    fn with_handle(path: PathBuf, file_handle: File) -> Self {
        ImageFile {
            path,
            file_handle,
            num_loads: 0,
            num_stores: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_loads(&self) -> u64 {
        self.num_loads
    }

    pub fn num_stores(&self) -> u64 {
        self.num_stores
    }
}

impl Disk for ImageFile {
    fn load(&mut self) -> Result<Vec<u8>, DiskError> {
        self.file_handle
            .seek(SeekFrom::Start(0))
            .map_err(DiskError::ImageReadFailure)?;

        let mut data = Vec::new();
        self.file_handle
            .read_to_end(&mut data)
            .map_err(DiskError::ImageReadFailure)?;

        self.num_loads += 1;
        Ok(data)
    }

    fn store(&mut self, image: &[u8]) -> Result<(), DiskError> {
        self.file_handle
            .seek(SeekFrom::Start(0))
            .map_err(DiskError::ImageWriteFailure)?;
        self.file_handle
            .write_all(image)
            .map_err(DiskError::ImageWriteFailure)?;
        self.file_handle
            .set_len(image.len() as u64)
            .map_err(DiskError::ImageWriteFailure)?;
        self.file_handle
            .flush()
            .map_err(DiskError::ImageWriteFailure)?;

        self.num_stores += 1;
        Ok(())
    }
}

/// Image kept in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryDisk {
    image: Vec<u8>,
}

impl MemoryDisk {
    pub fn new() -> Self {
        MemoryDisk::default()
    }

    pub fn from_bytes(image: Vec<u8>) -> Self {
        MemoryDisk { image }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.image
    }
}

impl Disk for MemoryDisk {
    fn load(&mut self) -> Result<Vec<u8>, DiskError> {
        Ok(self.image.clone())
    }

    fn store(&mut self, image: &[u8]) -> Result<(), DiskError> {
        self.image = image.to_vec();
        Ok(())
    }
}

/// Fixed array of fixed-size data blocks, addressed by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStore {
    block_size: usize,
    blocks: Vec<Vec<u8>>,
}

impl BlockStore {
    pub fn new(total_blocks: usize, block_size: usize) -> Self {
        let blocks = (0..total_blocks).map(|_| vec![0; block_size]).collect();
        BlockStore { block_size, blocks }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, block_number: usize) -> &[u8] {
        &self.blocks[block_number]
    }

    /// Copies `data` into the start of a block; the tail of the block is
    /// left as it was.
    pub fn write(&mut self, block_number: usize, data: &[u8]) {
        let take = data.len().min(self.block_size);
        self.blocks[block_number][..take].copy_from_slice(&data[..take]);
    }

    pub fn zero(&mut self, block_number: usize) {
        self.blocks[block_number].fill(0);
    }

    pub(crate) fn set(&mut self, block_number: usize, data: Vec<u8>) {
        debug_assert_eq!(data.len(), self.block_size);
        self.blocks[block_number] = data;
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.blocks.iter().map(Vec::as_slice)
    }
}
