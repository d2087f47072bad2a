//! Argument parsing and dispatch shared by `fatdisk` and `mkfatdisk`.

use crate::config::Geometry;
use crate::disk::ImageFile;
use crate::entry::DirEntry;
use crate::error::FileSystemError;
use crate::fs::{Credentials, FatFileSystem, FileSystem, PermissionDelta, WriteMeta};
use crate::host;
use clap::{App, AppSettings, Arg};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error(transparent)]
    Clap(#[from] clap::Error),
    #[error("usage: {0}")]
    Arity(String),
    #[error(transparent)]
    Geometry(#[from] FileSystemError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Dir { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    Dumpe2fs,
    Write { path: String, host: PathBuf },
    Read { path: String, host: PathBuf },
    Del { path: String },
    Chmod { path: String, permissions: String },
    Addpw { path: String, password: String },
}

impl Op {
    fn from_args(name: &str, args: &[&str]) -> Result<Op, UsageError> {
        let op = match (name, args) {
            ("dir", [path]) => Op::Dir { path: path.to_string() },
            ("mkdir", [path]) => Op::Mkdir { path: path.to_string() },
            ("rmdir", [path]) => Op::Rmdir { path: path.to_string() },
            ("dumpe2fs", []) => Op::Dumpe2fs,
            ("write", [path, host]) => Op::Write {
                path: path.to_string(),
                host: PathBuf::from(host),
            },
            ("read", [path, host]) => Op::Read {
                path: path.to_string(),
                host: PathBuf::from(host),
            },
            ("del", [path]) => Op::Del { path: path.to_string() },
            ("chmod", [path, permissions]) => Op::Chmod {
                path: path.to_string(),
                permissions: permissions.to_string(),
            },
            ("addpw", [path, password]) => Op::Addpw {
                path: path.to_string(),
                password: password.to_string(),
            },
            _ => return Err(UsageError::Arity(usage(name).to_string())),
        };
        Ok(op)
    }
}

fn usage(op: &str) -> &'static str {
    match op {
        "dir" => "fatdisk <image> dir <path>",
        "mkdir" => "fatdisk <image> mkdir <path>",
        "rmdir" => "fatdisk <image> rmdir <path>",
        "dumpe2fs" => "fatdisk <image> dumpe2fs",
        "write" => "fatdisk <image> write <path> <host_file>",
        "read" => "fatdisk <image> read <path> <host_file>",
        "del" => "fatdisk <image> del <path>",
        "chmod" => "fatdisk <image> chmod <path> <permissions>",
        "addpw" => "fatdisk <image> addpw <path> <password>",
        _ => "fatdisk <image> <operation> [parameters]",
    }
}

const OPERATIONS: &[&str] = &[
    "dir", "mkdir", "rmdir", "dumpe2fs", "write", "read", "del", "chmod", "addpw",
];

fn operate_app() -> App<'static, 'static> {
    App::new("fatdisk")
        .about("Operates on a FAT-style virtual disk image")
        .setting(AppSettings::TrailingVarArg)
        .arg(
            Arg::with_name("image")
                .required(true)
                .index(1)
                .help("Virtual disk image file"),
        )
        .arg(
            Arg::with_name("operation")
                .required(true)
                .index(2)
                .possible_values(OPERATIONS)
                .help("Operation to run"),
        )
        .arg(
            Arg::with_name("params")
                .index(3)
                .multiple(true)
                .allow_hyphen_values(true)
                .help("Operation parameters"),
        )
}

fn create_app() -> App<'static, 'static> {
    App::new("mkfatdisk")
        .about("Creates an empty FAT-style virtual disk image")
        .arg(
            Arg::with_name("block_size")
                .required(true)
                .index(1)
                .help("Block size in KB: 0.5 or 1"),
        )
        .arg(
            Arg::with_name("image")
                .required(true)
                .index(2)
                .help("Image file to create"),
        )
}

pub fn parse_operate<I, T>(args: I) -> Result<(PathBuf, Op), UsageError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = operate_app().get_matches_from_safe(args)?;
    let image = PathBuf::from(matches.value_of("image").unwrap_or_default());
    let operation = matches.value_of("operation").unwrap_or_default();
    let params: Vec<&str> = matches
        .values_of("params")
        .map(|v| v.collect())
        .unwrap_or_default();
    Ok((image, Op::from_args(operation, &params)?))
}

pub fn parse_create<I, T>(args: I) -> Result<(Geometry, PathBuf), UsageError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = create_app().get_matches_from_safe(args)?;
    let geometry = Geometry::from_block_size_kb(matches.value_of("block_size").unwrap_or_default())?;
    let image = PathBuf::from(matches.value_of("image").unwrap_or_default());
    Ok((geometry, image))
}

/// Formats a fresh image and writes it to `image`.
pub fn create(geometry: Geometry, image: &Path) -> Result<(), FileSystemError> {
    let mut disk = ImageFile::create(image)?;
    FatFileSystem::format(geometry).sync(&mut disk)
}

/// Loads the image, runs one operation and writes the image back. The
/// image is rewritten even when the operation fails; the operation's
/// outcome is returned after the write.
pub fn operate(
    image: &Path,
    op: Op,
    credentials: &mut dyn Credentials,
) -> Result<Option<String>, FileSystemError> {
    let mut disk = ImageFile::open(image)?;
    let mut fs = FatFileSystem::mount(&mut disk)?;
    let outcome = execute(&mut fs, op, credentials);
    fs.sync(&mut disk)?;
    outcome
}

/// Runs one operation against a mounted filesystem. Returns the text to
/// print, if the operation produces any.
pub fn execute(
    fs: &mut FatFileSystem,
    op: Op,
    credentials: &mut dyn Credentials,
) -> Result<Option<String>, FileSystemError> {
    match op {
        Op::Dir { path } => {
            let entries = fs.list(&path)?;
            return Ok(Some(format_listing(&path, &entries)));
        }
        Op::Dumpe2fs => return Ok(Some(fs.report().to_string())),
        Op::Mkdir { path } => fs.mkdir(&path)?,
        Op::Rmdir { path } => fs.rmdir(&path, credentials)?,
        Op::Write { path, host } => {
            let file = host::import(&host)?;
            let meta = WriteMeta {
                permissions: Some(file.permissions),
                creation_time: Some(file.created),
                modification_time: Some(file.modified),
            };
            fs.write(&path, &file.data, meta)?;
        }
        Op::Read { path, host } => {
            let (data, entry) = fs.read(&path, credentials)?;
            host::export(&host, &data, &entry)?;
        }
        Op::Del { path } => fs.del(&path, credentials)?,
        Op::Chmod { path, permissions } => {
            let delta: PermissionDelta = permissions.parse()?;
            fs.chmod(&path, delta, credentials)?;
        }
        Op::Addpw { path, password } => fs.addpw(&path, &password, credentials)?,
    }
    Ok(None)
}

pub fn format_listing(path: &str, entries: &[DirEntry]) -> String {
    let mut out = format!("Directory listing for {}:\n", path);
    out.push_str(&format!(
        "{:<20}{:<10}{:<10}{:<30}{:<30}\n",
        "Name", "Size", "Perm", "Creation Time", "Mod Time"
    ));
    for entry in entries {
        let flags = format!(
            "{}{}{}",
            if entry.is_directory() { 'D' } else { '-' },
            if entry.permissions.read { 'R' } else { '-' },
            if entry.permissions.write { 'W' } else { '-' },
        );
        out.push_str(&format!(
            "{:<20}{:<10}{:<10}{:<30}{:<30}\n",
            entry.name,
            entry.size,
            flags,
            format_time(entry.creation_time),
            format_time(entry.modification_time)
        ));
    }
    out
}

/// `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_time(secs: i64) -> String {
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

// days since 1970-01-01 to a proleptic Gregorian date
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::NoCredentials;

    #[test]
    fn parses_each_operation_arity() {
        let (image, op) = parse_operate(["fatdisk", "disk.img", "mkdir", "/a"]).expect("mkdir");
        assert_eq!(image, PathBuf::from("disk.img"));
        assert_eq!(op, Op::Mkdir { path: "/a".into() });

        let (_, op) = parse_operate(["fatdisk", "disk.img", "dumpe2fs"]).expect("dumpe2fs");
        assert_eq!(op, Op::Dumpe2fs);

        let (_, op) = parse_operate(["fatdisk", "d.img", "write", "/f", "local.txt"]).expect("write");
        assert_eq!(
            op,
            Op::Write {
                path: "/f".into(),
                host: PathBuf::from("local.txt")
            }
        );
    }

    #[test]
    fn chmod_accepts_leading_hyphen() {
        let (_, op) = parse_operate(["fatdisk", "d.img", "chmod", "/f", "-w"]).expect("chmod");
        assert_eq!(
            op,
            Op::Chmod {
                path: "/f".into(),
                permissions: "-w".into()
            }
        );
    }

    #[test]
    fn wrong_arity_is_usage_error() {
        assert!(matches!(
            parse_operate(["fatdisk", "d.img", "mkdir"]),
            Err(UsageError::Arity(_))
        ));
        assert!(matches!(
            parse_operate(["fatdisk", "d.img", "dumpe2fs", "extra"]),
            Err(UsageError::Arity(_))
        ));
        assert!(matches!(
            parse_operate(["fatdisk", "d.img", "chmod", "/f"]),
            Err(UsageError::Arity(_))
        ));
        assert!(parse_operate(["fatdisk", "d.img", "format"]).is_err());
        assert!(parse_operate(["fatdisk"]).is_err());
    }

    #[test]
    fn parses_create_arguments() {
        let (geometry, image) = parse_create(["mkfatdisk", "0.5", "disk.img"]).expect("create");
        assert_eq!(geometry.block_size, 512);
        assert_eq!(image, PathBuf::from("disk.img"));
        assert!(matches!(
            parse_create(["mkfatdisk", "2", "disk.img"]),
            Err(UsageError::Geometry(_))
        ));
        assert!(parse_create(["mkfatdisk", "1"]).is_err());
    }

    #[test]
    fn execute_lists_and_reports() {
        let mut fs = FatFileSystem::format(Geometry::new(64, 512).expect("geometry"));
        let none = execute(&mut fs, Op::Mkdir { path: "/docs".into() }, &mut NoCredentials)
            .expect("mkdir");
        assert!(none.is_none());

        let listing = execute(&mut fs, Op::Dir { path: "/".into() }, &mut NoCredentials)
            .expect("dir")
            .expect("listing text");
        assert!(listing.starts_with("Directory listing for /:"));
        assert!(listing.contains("docs"));
        assert!(listing.contains("DRW"));

        let report = execute(&mut fs, Op::Dumpe2fs, &mut NoCredentials)
            .expect("dumpe2fs")
            .expect("report text");
        assert!(report.contains("Number of Directories: 2"));

        assert!(execute(
            &mut fs,
            Op::Chmod {
                path: "/docs".into(),
                permissions: "+x".into()
            },
            &mut NoCredentials
        )
        .is_err());
    }

    #[test]
    fn formats_utc_times() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00");
        assert_eq!(format_time(1_700_000_000), "2023-11-14 22:13:20");
        assert_eq!(format_time(951_782_400), "2000-02-29 00:00:00");
        assert_eq!(format_time(-1), "1969-12-31 23:59:59");
    }
}
