//! Moving file contents and metadata between the host and the image.

use crate::disk::DiskError;
use crate::entry::{DirEntry, Permissions};
use crate::fs::Credentials;
use std::fs::{self, File, FileTimes};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(unix)]
use std::os::unix::fs::{MetadataExt, PermissionsExt};

const OWNER_READ: u32 = 0o400;
const OWNER_WRITE: u32 = 0o200;

/// A host file ready to be written into the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFile {
    pub data: Vec<u8>,
    pub permissions: Permissions,
    pub created: i64,
    pub modified: i64,
}

pub fn import<P: AsRef<Path>>(path: P) -> Result<HostFile, DiskError> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|source| DiskError::ImageOpenFailure {
        path: path.to_path_buf(),
        source,
    })?;
    let metadata = fs::metadata(path).map_err(DiskError::ImageReadFailure)?;

    let (permissions, created, modified) = host_metadata(&metadata);
    Ok(HostFile {
        data,
        permissions,
        created,
        modified,
    })
}

#[cfg(unix)]
fn host_metadata(metadata: &fs::Metadata) -> (Permissions, i64, i64) {
    let mode = metadata.permissions().mode();
    let permissions = Permissions {
        read: mode & OWNER_READ != 0,
        write: mode & OWNER_WRITE != 0,
    };
    (permissions, metadata.ctime(), metadata.mtime())
}

#[cfg(not(unix))]
fn host_metadata(metadata: &fs::Metadata) -> (Permissions, i64, i64) {
    let secs = |t: io::Result<SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    };
    let permissions = Permissions {
        read: true,
        write: !metadata.permissions().readonly(),
    };
    (permissions, secs(metadata.created()), secs(metadata.modified()))
}

/// Writes `data` to `path` and carries the entry's permission bits and
/// timestamps over to the host file.
pub fn export<P: AsRef<Path>>(path: P, data: &[u8], entry: &DirEntry) -> Result<(), DiskError> {
    let path = path.as_ref();
    let mut file = File::create(path).map_err(|source| DiskError::ImageOpenFailure {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(data).map_err(DiskError::ImageWriteFailure)?;

    let times = FileTimes::new()
        .set_accessed(to_system_time(entry.creation_time))
        .set_modified(to_system_time(entry.modification_time));
    file.set_times(times).map_err(DiskError::ImageWriteFailure)?;
    drop(file);

    fs::set_permissions(path, host_permissions(path, entry.permissions)?)
        .map_err(DiskError::ImageWriteFailure)
}

#[cfg(unix)]
fn host_permissions(path: &Path, permissions: Permissions) -> Result<fs::Permissions, DiskError> {
    let current = fs::metadata(path)
        .map_err(DiskError::ImageReadFailure)?
        .permissions()
        .mode();
    let mut mode = current & !(OWNER_READ | OWNER_WRITE);
    if permissions.read {
        mode |= OWNER_READ;
    }
    if permissions.write {
        mode |= OWNER_WRITE;
    }
    Ok(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn host_permissions(path: &Path, permissions: Permissions) -> Result<fs::Permissions, DiskError> {
    let mut host = fs::metadata(path)
        .map_err(DiskError::ImageReadFailure)?
        .permissions();
    host.set_readonly(!permissions.write);
    Ok(host)
}

fn to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Asks on stdout for the password of a protected entry and reads one
/// line from stdin.
#[derive(Debug, Default)]
pub struct Prompt;

impl Credentials for Prompt {
    fn password_for(&mut self, path: &str) -> Option<String> {
        let name = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or(path);
        print!("Enter password for {}: ", name);
        io::stdout().flush().ok()?;

        read_password(&mut io::stdin().lock())
    }
}

/// The whole line minus its terminator, so passwords may contain spaces.
/// `None` at end of input.
fn read_password<R: BufRead>(input: &mut R) -> Option<String> {
    let mut line = String::new();
    if input.read_line(&mut line).ok()? == 0 {
        return None;
    }
    Some(line.trim_end_matches(['\n', '\r']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn export_then_import_keeps_metadata() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("out.bin");

        let mut entry = DirEntry::new_file("out.bin", 5, 1, 1_600_000_000);
        entry.modification_time = 1_700_000_000;
        export(&path, b"hello", &entry).expect("export");

        let imported = import(&path).expect("import");
        assert_eq!(imported.data, b"hello");
        assert_eq!(imported.modified, 1_700_000_000);
        assert!(imported.permissions.read);
        assert!(imported.permissions.write);
    }

    #[cfg(unix)]
    #[test]
    fn export_applies_read_only_bit() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("ro.txt");

        let mut entry = DirEntry::new_file("ro.txt", 2, 1, 0);
        entry.permissions.write = false;
        export(&path, b"hi", &entry).expect("export");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & OWNER_WRITE, 0);
        assert_ne!(mode & OWNER_READ, 0);
    }

    #[test]
    fn password_line_keeps_inner_spaces() {
        let mut input = io::Cursor::new("correct horse battery\r\nnext\n");
        assert_eq!(
            read_password(&mut input).as_deref(),
            Some("correct horse battery")
        );
        assert_eq!(read_password(&mut input).as_deref(), Some("next"));
        assert_eq!(read_password(&mut input), None);
    }

    #[test]
    fn import_missing_file_fails() {
        let dir = TempDir::new().expect("tempdir");
        assert!(matches!(
            import(dir.path().join("absent")),
            Err(DiskError::ImageOpenFailure { .. })
        ));
    }
}
