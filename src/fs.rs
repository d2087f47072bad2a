use crate::codec::{self, Superblock};
use crate::config::{FsOptions, Geometry, RmdirPolicy};
use crate::disk::{BlockStore, Disk};
use crate::entry::{split_parent, DirEntry, EntryKind, NodeId, Permissions, Tree};
use crate::error::FileSystemError;
use crate::fat::{Fat, FatEntry};
use log::{debug, info, warn};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the password for a protected entry when an operation needs
/// one. Returning `None` means the caller has nothing to offer.
pub trait Credentials {
    fn password_for(&mut self, path: &str) -> Option<String>;
}

impl<F> Credentials for F
where
    F: FnMut(&str) -> Option<String>,
{
    fn password_for(&mut self, path: &str) -> Option<String> {
        self(path)
    }
}

/// Credentials source that never has a password.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl Credentials for NoCredentials {
    fn password_for(&mut self, _path: &str) -> Option<String> {
        None
    }
}

/// A `chmod` argument: `+r`, `-w`, `+rw`, `-wr` and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionDelta {
    pub grant: bool,
    pub read: bool,
    pub write: bool,
}

impl PermissionDelta {
    pub fn apply(&self, mut permissions: Permissions) -> Permissions {
        if self.read {
            permissions.read = self.grant;
        }
        if self.write {
            permissions.write = self.grant;
        }
        permissions
    }
}

impl FromStr for PermissionDelta {
    type Err = FileSystemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (grant, bits) = if let Some(bits) = s.strip_prefix('+') {
            (true, bits)
        } else if let Some(bits) = s.strip_prefix('-') {
            (false, bits)
        } else {
            return Err(FileSystemError::InvalidPermissions(s.to_string()));
        };
        let (read, write) = match bits {
            "r" => (true, false),
            "w" => (false, true),
            "rw" | "wr" => (true, true),
            _ => return Err(FileSystemError::InvalidPermissions(s.to_string())),
        };
        Ok(PermissionDelta { grant, read, write })
    }
}

/// Metadata for a newly written file. Unset fields default to
/// read/write and the current time.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteMeta {
    pub permissions: Option<Permissions>,
    pub creation_time: Option<i64>,
    pub modification_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub total_blocks: u32,
    pub block_size: u32,
    pub free_blocks: usize,
    pub files: usize,
    /// Root included.
    pub directories: usize,
    /// Every occupied block with the path of the file owning it.
    pub occupied: Vec<(u16, String)>,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Filesystem Information:")?;
        writeln!(f, "Block Count: {}", self.total_blocks)?;
        writeln!(f, "Block Size: {} bytes", self.block_size)?;
        writeln!(f, "Free Blocks: {}", self.free_blocks)?;
        writeln!(f, "Number of Files: {}", self.files)?;
        writeln!(f, "Number of Directories: {}", self.directories)?;
        writeln!(f, "Occupied Blocks:")?;
        for (block, path) in &self.occupied {
            writeln!(f, "Block: {}, Filename: {}", block, path)?;
        }
        Ok(())
    }
}

/// A consistency problem found by [`FatFileSystem::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    ReservedBlockInUse,
    UnterminatedChain { path: String },
    ChainLength { path: String, blocks: usize, expected: usize },
    SharedBlock { block: u16, path: String },
    OrphanBlock { block: u16, entry: FatEntry },
    StaleDirectorySize { path: String, stored: u32, actual: u32 },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::ReservedBlockInUse => write!(f, "reserved block 0 is allocated"),
            Inconsistency::UnterminatedChain { path } => {
                write!(f, "chain of {} does not reach end-of-chain", path)
            }
            Inconsistency::ChainLength {
                path,
                blocks,
                expected,
            } => write!(f, "{} has {} blocks, size needs {}", path, blocks, expected),
            Inconsistency::SharedBlock { block, path } => {
                write!(f, "block {} of {} belongs to another chain", block, path)
            }
            Inconsistency::OrphanBlock { block, entry } => {
                write!(f, "block {} is {:?} but owned by no file", block, entry)
            }
            Inconsistency::StaleDirectorySize {
                path,
                stored,
                actual,
            } => write!(f, "{} records size {}, children sum to {}", path, stored, actual),
        }
    }
}

pub trait FileSystem
where
    Self: Sized,
{
    fn format(geometry: Geometry) -> Self;
    fn mount<D: Disk>(disk: &mut D) -> Result<Self, FileSystemError>;
    fn sync<D: Disk>(&self, disk: &mut D) -> Result<(), FileSystemError>;

    fn mkdir(&mut self, path: &str) -> Result<(), FileSystemError>;
    fn rmdir(
        &mut self,
        path: &str,
        credentials: &mut dyn Credentials,
    ) -> Result<(), FileSystemError>;
    fn write(&mut self, path: &str, data: &[u8], meta: WriteMeta) -> Result<(), FileSystemError>;
    fn read(
        &self,
        path: &str,
        credentials: &mut dyn Credentials,
    ) -> Result<(Vec<u8>, DirEntry), FileSystemError>;
    fn del(&mut self, path: &str, credentials: &mut dyn Credentials) -> Result<(), FileSystemError>;
    fn chmod(
        &mut self,
        path: &str,
        delta: PermissionDelta,
        credentials: &mut dyn Credentials,
    ) -> Result<(), FileSystemError>;
    fn addpw(
        &mut self,
        path: &str,
        password: &str,
        credentials: &mut dyn Credentials,
    ) -> Result<(), FileSystemError>;
    fn list(&self, path: &str) -> Result<Vec<DirEntry>, FileSystemError>;
    fn report(&self) -> Report;
}

/// The whole filesystem held in memory. Callers persist it with
/// [`FileSystem::sync`] after each operation.
///
/// Access to one image is assumed to be exclusive; nothing here guards
/// against two processes rewriting the same file.
#[derive(Debug, Clone)]
pub struct FatFileSystem {
    superblock: Superblock,
    fat: Fat,
    tree: Tree,
    blocks: BlockStore,
    options: FsOptions,
}

impl FileSystem for FatFileSystem {
    fn format(geometry: Geometry) -> Self {
        let superblock = Superblock::new(geometry);
        let total = geometry.total_blocks as usize;
        info!(
            "formatting {} blocks of {} bytes",
            geometry.total_blocks, geometry.block_size
        );
        FatFileSystem {
            superblock,
            fat: Fat::new(total),
            tree: Tree::new(DirEntry::new_directory("/", now())),
            blocks: BlockStore::new(total, geometry.block_size as usize),
            options: FsOptions::default(),
        }
    }

    fn mount<D: Disk>(disk: &mut D) -> Result<Self, FileSystemError> {
        let image = disk.load()?;
        FatFileSystem::from_image(&image)
    }

    fn sync<D: Disk>(&self, disk: &mut D) -> Result<(), FileSystemError> {
        let image = self.to_image()?;
        disk.store(&image)?;
        debug!("wrote {} byte image", image.len());
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), FileSystemError> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.tree.resolve_directory(&parent_path)?;
        self.require_writable(parent, &parent_path)?;

        self.tree
            .create_child(parent, DirEntry::new_directory(&name, now()))
            .map_err(|e| at_path(e, path))?;
        self.tree.refresh_directory_size(parent);
        info!("mkdir {}", path);
        Ok(())
    }

    fn rmdir(
        &mut self,
        path: &str,
        credentials: &mut dyn Credentials,
    ) -> Result<(), FileSystemError> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self
            .tree
            .resolve_directory(&parent_path)
            .map_err(|e| at_path(e, path))?;
        let target = self
            .tree
            .find_child(parent, &name)
            .ok_or_else(|| FileSystemError::NotFound(path.to_string()))?;
        if self.tree.node(target).kind() != EntryKind::Directory {
            return Err(FileSystemError::not_a_directory(path));
        }
        if self.options.rmdir == RmdirPolicy::RejectNonEmpty
            && !self.tree.children(target).is_empty()
        {
            return Err(FileSystemError::DirectoryNotEmpty(path.to_string()));
        }
        self.require_writable(parent, &parent_path)?;

        // every protected file in the subtree has to be unlocked first
        let prefix = format!("{}/{}", parent_path.trim_end_matches('/'), name);
        for (file_path, id) in self.tree.files_under(target, &prefix) {
            check_password(self.tree.entry(id), &file_path, credentials)?;
        }

        let removed = self.tree.remove_child(parent, &name, EntryKind::Directory)?;
        let mut released = 0;
        for entry in removed.iter().filter(|e| !e.is_directory()) {
            released += self.fat.deallocate(entry.start_block, &mut self.blocks);
        }
        self.tree.refresh_directory_size(parent);
        info!(
            "rmdir {} ({} entries, {} blocks released)",
            path,
            removed.len(),
            released
        );
        Ok(())
    }

    fn write(&mut self, path: &str, data: &[u8], meta: WriteMeta) -> Result<(), FileSystemError> {
        let size = u32::try_from(data.len()).map_err(|_| FileSystemError::InsufficientSpace {
            needed: data.len().div_ceil(self.block_size()),
            free: self.fat.free_count(),
        })?;
        let (parent_path, name) = split_parent(path)?;
        let parent = self.tree.resolve_directory(&parent_path)?;
        self.require_writable(parent, &parent_path)?;
        if self.tree.find_child(parent, &name).is_some() {
            return Err(FileSystemError::AlreadyExists(path.to_string()));
        }

        let block_size = self.block_size();
        let head = self.fat.allocate(data.len(), block_size)?;
        for (chunk, block) in data.chunks(block_size).zip(self.fat.chain(head)) {
            self.blocks.write(block as usize, chunk);
        }

        let timestamp = now();
        let mut entry = DirEntry::new_file(&name, size, head, timestamp);
        entry.permissions = meta.permissions.unwrap_or_default();
        entry.creation_time = meta.creation_time.unwrap_or(timestamp);
        entry.modification_time = meta.modification_time.unwrap_or(timestamp);

        if let Err(e) = self.tree.create_child(parent, entry) {
            self.fat.deallocate(head, &mut self.blocks);
            return Err(at_path(e, path));
        }
        self.tree.refresh_directory_size(parent);
        info!("wrote {} ({} bytes)", path, size);
        Ok(())
    }

    fn read(
        &self,
        path: &str,
        credentials: &mut dyn Credentials,
    ) -> Result<(Vec<u8>, DirEntry), FileSystemError> {
        let id = self.tree.resolve(path)?;
        let entry = self.tree.entry(id);
        if entry.is_directory() {
            return Err(FileSystemError::not_a_file(path));
        }
        if !entry.permissions.read {
            return Err(FileSystemError::PermissionDenied(path.to_string()));
        }
        check_password(entry, path, credentials)?;

        let block_size = self.block_size();
        let mut remaining = entry.size as usize;
        let mut data = Vec::with_capacity(remaining);
        for block in self.fat.chain(entry.start_block) {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(block_size);
            data.extend_from_slice(&self.blocks.block(block as usize)[..take]);
            remaining -= take;
        }
        if remaining > 0 {
            return Err(FileSystemError::CorruptImage(format!(
                "chain of {} ends {} bytes short",
                path, remaining
            )));
        }
        debug!("read {} ({} bytes)", path, data.len());
        Ok((data, entry.clone()))
    }

    fn del(&mut self, path: &str, credentials: &mut dyn Credentials) -> Result<(), FileSystemError> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self
            .tree
            .resolve_directory(&parent_path)
            .map_err(|e| at_path(e, path))?;
        let target = self
            .tree
            .find_child(parent, &name)
            .ok_or_else(|| FileSystemError::NotFound(path.to_string()))?;
        let entry = self.tree.entry(target);
        if entry.is_directory() {
            return Err(FileSystemError::not_a_file(path));
        }
        self.require_writable(parent, &parent_path)?;
        check_password(entry, path, credentials)?;

        let removed = self.tree.remove_child(parent, &name, EntryKind::File)?;
        let released: usize = removed
            .iter()
            .map(|e| self.fat.deallocate(e.start_block, &mut self.blocks))
            .sum();
        self.tree.refresh_directory_size(parent);
        info!("deleted {} ({} blocks released)", path, released);
        Ok(())
    }

    fn chmod(
        &mut self,
        path: &str,
        delta: PermissionDelta,
        credentials: &mut dyn Credentials,
    ) -> Result<(), FileSystemError> {
        let id = self.tree.resolve(path)?;
        check_password(self.tree.entry(id), path, credentials)?;

        let entry = self.tree.entry_mut(id);
        entry.permissions = delta.apply(entry.permissions);
        entry.modification_time = now();
        info!("chmod {} -> {}", path, entry.permissions);
        Ok(())
    }

    fn addpw(
        &mut self,
        path: &str,
        password: &str,
        credentials: &mut dyn Credentials,
    ) -> Result<(), FileSystemError> {
        let id = self.tree.resolve(path)?;
        check_password(self.tree.entry(id), path, credentials)?;

        let entry = self.tree.entry_mut(id);
        entry.password = password.to_string();
        entry.modification_time = now();
        info!("password updated for {}", path);
        Ok(())
    }

    fn list(&self, path: &str) -> Result<Vec<DirEntry>, FileSystemError> {
        let dir = self.tree.resolve_directory(path)?;
        Ok(self
            .tree
            .children(dir)
            .iter()
            .map(|&c| self.tree.entry(c).clone())
            .collect())
    }

    fn report(&self) -> Report {
        let occupied = self
            .tree
            .files()
            .into_iter()
            .flat_map(|(path, id)| {
                self.fat
                    .chain(self.tree.entry(id).start_block)
                    .map(move |block| (block, path.clone()))
            })
            .collect();

        Report {
            total_blocks: self.superblock.total_blocks,
            block_size: self.superblock.block_size,
            free_blocks: self.fat.free_count(),
            files: self.tree.count_files(),
            directories: self.tree.count_directories(),
            occupied,
        }
    }
}

impl FatFileSystem {
    pub fn with_options(mut self, options: FsOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_image(image: &[u8]) -> Result<Self, FileSystemError> {
        let parts = codec::decode(image)?;
        let fs = FatFileSystem {
            superblock: parts.superblock,
            fat: parts.fat,
            tree: parts.tree,
            blocks: parts.blocks,
            options: FsOptions::default(),
        };
        for problem in fs.verify() {
            warn!("inconsistent image: {}", problem);
        }
        info!(
            "mounted image: {} blocks of {} bytes, {} free",
            fs.superblock.total_blocks,
            fs.superblock.block_size,
            fs.fat.free_count()
        );
        Ok(fs)
    }

    pub fn to_image(&self) -> Result<Vec<u8>, FileSystemError> {
        codec::encode(&self.superblock, &self.fat, &self.tree, &self.blocks)
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn fat(&self) -> &Fat {
        &self.fat
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn stat(&self, path: &str) -> Result<DirEntry, FileSystemError> {
        let id = self.tree.resolve(path)?;
        Ok(self.tree.entry(id).clone())
    }

    /// Checks the FAT and tree against each other.
    pub fn verify(&self) -> Vec<Inconsistency> {
        let mut problems = Vec::new();
        let block_size = self.block_size();
        let mut owner: Vec<bool> = vec![false; self.fat.len()];

        if !self.fat.is_empty() && self.fat.get(0) != FatEntry::Free {
            problems.push(Inconsistency::ReservedBlockInUse);
        }

        for (path, id) in self.tree.files() {
            let entry = self.tree.entry(id);
            let (chain, terminated) = self.fat.walk(entry.start_block);
            if !terminated {
                problems.push(Inconsistency::UnterminatedChain { path: path.clone() });
            }
            let expected = (entry.size as usize).div_ceil(block_size);
            if chain.len() != expected {
                problems.push(Inconsistency::ChainLength {
                    path: path.clone(),
                    blocks: chain.len(),
                    expected,
                });
            }
            for block in chain {
                if owner[block as usize] {
                    problems.push(Inconsistency::SharedBlock {
                        block,
                        path: path.clone(),
                    });
                }
                owner[block as usize] = true;
            }
        }

        for block in 1..self.fat.len() {
            let entry = self.fat.get(block as u16);
            if entry != FatEntry::Free && !owner[block] {
                problems.push(Inconsistency::OrphanBlock {
                    block: block as u16,
                    entry,
                });
            }
        }

        for (path, id) in self.tree.directories() {
            let stored = self.tree.entry(id).size;
            let actual = self.tree.directory_size(id);
            if stored != actual {
                problems.push(Inconsistency::StaleDirectorySize {
                    path,
                    stored,
                    actual,
                });
            }
        }
        problems
    }

    fn block_size(&self) -> usize {
        self.blocks.block_size()
    }

    fn require_writable(&self, dir: NodeId, path: &str) -> Result<(), FileSystemError> {
        if self.tree.entry(dir).permissions.write {
            Ok(())
        } else {
            Err(FileSystemError::PermissionDenied(path.to_string()))
        }
    }
}

fn check_password(
    entry: &DirEntry,
    path: &str,
    credentials: &mut dyn Credentials,
) -> Result<(), FileSystemError> {
    if !entry.has_password() {
        return Ok(());
    }
    match credentials.password_for(path) {
        Some(given) if given == entry.password => Ok(()),
        _ => Err(FileSystemError::AuthenticationFailed(path.to_string())),
    }
}

/// Replaces the bare name in lookup errors with the full path.
fn at_path(err: FileSystemError, path: &str) -> FileSystemError {
    match err {
        FileSystemError::NotFound(_) => FileSystemError::NotFound(path.to_string()),
        FileSystemError::AlreadyExists(_) => FileSystemError::AlreadyExists(path.to_string()),
        other => other,
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
