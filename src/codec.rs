//! Binary image format.
//!
//! Layout, all integers little-endian:
//!
//! 1. superblock: `total_blocks, fat_start, root_dir_start, block_size` (u32 each)
//! 2. FAT: `count: u32`, then `count` u16 entries
//! 3. directory tree, depth-first; per node: `name_len: u32, name,
//!    size: u32, read: u8, write: u8, creation_time: i64,
//!    modification_time: i64, pw_len: u32, password, start_block: u16,
//!    attribute: u8, child_count: u32`, then each child
//! 4. blocks: `total_blocks` records of `block_number: u32` plus
//!    `block_size` raw bytes
//!
//! Every record type implements [`Wire`] once, and the field list drives
//! both directions.

use crate::config::Geometry;
use crate::disk::{BlockStore, DiskError};
use crate::entry::{validate_name, DirEntry, NodeId, Permissions, Tree};
use crate::error::FileSystemError;
use crate::fat::Fat;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read, Write};

/// Fixed geometry header. Offsets are informational; the format is
/// read sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub total_blocks: u32,
    pub fat_start: u32,
    pub root_dir_start: u32,
    pub block_size: u32,
}

pub const SUPERBLOCK_SIZE: u32 = 16;

impl Superblock {
    pub fn new(geometry: Geometry) -> Self {
        let fat_start = SUPERBLOCK_SIZE;
        Superblock {
            total_blocks: geometry.total_blocks,
            fat_start,
            root_dir_start: fat_start + geometry.total_blocks * 2,
            block_size: geometry.block_size,
        }
    }
}

/// Symmetric encode/decode for one record type.
pub trait Wire: Sized {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()>;
    fn decode<R: Read>(r: &mut R) -> io::Result<Self>;
}

impl Wire for u8 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(*self)
    }
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        r.read_u8()
    }
}

impl Wire for u16 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(*self)
    }
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Wire for u32 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(*self)
    }
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Wire for i64 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i64::<LittleEndian>(*self)
    }
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        r.read_i64::<LittleEndian>()
    }
}

impl Wire for bool {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(*self as u8)
    }
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        match r.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(invalid(format!("bad boolean byte {:#04x}", other))),
        }
    }
}

/// Length-prefixed (u32) UTF-8 string.
impl Wire for String {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        (self.len() as u32).encode(w)?;
        w.write_all(self.as_bytes())
    }
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let len = u32::decode(r)? as u64;
        let mut bytes = Vec::new();
        r.by_ref().take(len).read_to_end(&mut bytes)?;
        if bytes.len() as u64 != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
    }
}

impl Wire for Superblock {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        bincode::serialize_into(w, self).map_err(bincode_to_io)
    }
    fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        bincode::deserialize_from(r).map_err(bincode_to_io)
    }
}

macro_rules! wire_struct {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        impl Wire for $name {
            fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
                $( self.$field.encode(w)?; )*
                Ok(())
            }
            fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
                Ok($name {
                    $( $field: <$ty as Wire>::decode(r)?, )*
                })
            }
        }
    };
}

wire_struct!(Permissions {
    read: bool,
    write: bool,
});

wire_struct!(DirEntry {
    name: String,
    size: u32,
    permissions: Permissions,
    creation_time: i64,
    modification_time: i64,
    password: String,
    start_block: u16,
    attribute: u8,
});

/// Everything an image holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageParts {
    pub superblock: Superblock,
    pub fat: Fat,
    pub tree: Tree,
    pub blocks: BlockStore,
}

pub fn encode(
    superblock: &Superblock,
    fat: &Fat,
    tree: &Tree,
    blocks: &BlockStore,
) -> Result<Vec<u8>, FileSystemError> {
    let mut out = Vec::new();
    write_image(&mut out, superblock, fat, tree, blocks)
        .map_err(|e| FileSystemError::HostIo(DiskError::ImageWriteFailure(e)))?;
    Ok(out)
}

fn write_image<W: Write>(
    w: &mut W,
    superblock: &Superblock,
    fat: &Fat,
    tree: &Tree,
    blocks: &BlockStore,
) -> io::Result<()> {
    superblock.encode(w)?;

    (fat.len() as u32).encode(w)?;
    for entry in fat.raw() {
        entry.encode(w)?;
    }

    for id in tree.preorder(tree.root()) {
        tree.entry(id).encode(w)?;
        (tree.children(id).len() as u32).encode(w)?;
    }

    for (number, data) in blocks.iter().enumerate() {
        (number as u32).encode(w)?;
        w.write_all(data)?;
    }
    Ok(())
}

/// Parses a whole image. Any short read or inconsistent count is
/// `CorruptImage`; nothing is recovered.
pub fn decode(bytes: &[u8]) -> Result<ImageParts, FileSystemError> {
    let mut r = Cursor::new(bytes);

    let superblock = Superblock::decode(&mut r).map_err(corrupt)?;
    let geometry = Geometry::new(superblock.total_blocks, superblock.block_size)
        .map_err(|e| FileSystemError::CorruptImage(e.to_string()))?;
    let total_blocks = geometry.total_blocks as usize;
    let block_size = geometry.block_size as usize;

    let fat_len = u32::decode(&mut r).map_err(corrupt)? as usize;
    if fat_len != total_blocks {
        return Err(FileSystemError::CorruptImage(format!(
            "FAT has {} entries, superblock says {} blocks",
            fat_len, total_blocks
        )));
    }
    let mut entries = Vec::with_capacity(fat_len);
    for _ in 0..fat_len {
        entries.push(u16::decode(&mut r).map_err(corrupt)?);
    }
    let fat = Fat::from_raw(entries);

    let tree = read_tree(&mut r)?;

    let mut blocks = BlockStore::new(total_blocks, block_size);
    for expected in 0..total_blocks {
        let number = u32::decode(&mut r).map_err(corrupt)? as usize;
        if number != expected {
            return Err(FileSystemError::CorruptImage(format!(
                "block record {} labelled {}",
                expected, number
            )));
        }
        let mut data = vec![0u8; block_size];
        r.read_exact(&mut data).map_err(corrupt)?;
        blocks.set(number, data);
    }

    let consumed = r.position() as usize;
    if consumed != bytes.len() {
        return Err(FileSystemError::CorruptImage(format!(
            "{} trailing bytes",
            bytes.len() - consumed
        )));
    }

    Ok(ImageParts {
        superblock,
        fat,
        tree,
        blocks,
    })
}

fn read_tree<R: Read>(r: &mut R) -> Result<Tree, FileSystemError> {
    let root = DirEntry::decode(r).map_err(corrupt)?;
    let root_children = u32::decode(r).map_err(corrupt)?;
    if !root.is_directory() {
        return Err(FileSystemError::CorruptImage(
            "root entry is not a directory".to_string(),
        ));
    }

    let mut tree = Tree::new(root);
    // (directory, children still to read)
    let mut pending: Vec<(NodeId, u32)> = vec![(tree.root(), root_children)];
    while let Some((parent, remaining)) = pending.last_mut() {
        if *remaining == 0 {
            pending.pop();
            continue;
        }
        *remaining -= 1;
        let parent = *parent;

        let entry = DirEntry::decode(r).map_err(corrupt)?;
        let child_count = u32::decode(r).map_err(corrupt)?;
        validate_name(&entry.name).map_err(|e| FileSystemError::CorruptImage(e.to_string()))?;

        let is_directory = entry.is_directory();
        if !is_directory && child_count > 0 {
            return Err(FileSystemError::CorruptImage(format!(
                "file {} has {} children",
                entry.name, child_count
            )));
        }

        let id = tree
            .create_child(parent, entry)
            .map_err(|e| FileSystemError::CorruptImage(e.to_string()))?;
        if is_directory {
            pending.push((id, child_count));
        }
    }
    Ok(tree)
}

fn corrupt(err: io::Error) -> FileSystemError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            FileSystemError::CorruptImage("truncated image".to_string())
        }
        _ => FileSystemError::CorruptImage(err.to_string()),
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn bincode_to_io(err: bincode::Error) -> io::Error {
    match *err {
        bincode::ErrorKind::Io(e) => e,
        other => invalid(other.to_string()),
    }
}
