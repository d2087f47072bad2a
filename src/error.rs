use crate::disk::DiskError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileSystemError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("{path} is not a {expected}")]
    WrongType { path: String, expected: &'static str },
    #[error("insufficient space: {needed} blocks needed, {free} free")]
    InsufficientSpace { needed: usize, free: usize },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("incorrect password for {0}")]
    AuthenticationFailed(String),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("invalid permissions string: {0}")]
    InvalidPermissions(String),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("corrupt image: {0}")]
    CorruptImage(String),
    #[error(transparent)]
    HostIo(#[from] DiskError),
}

impl FileSystemError {
    pub(crate) fn not_a_directory(path: &str) -> Self {
        FileSystemError::WrongType {
            path: path.to_string(),
            expected: "directory",
        }
    }

    pub(crate) fn not_a_file(path: &str) -> Self {
        FileSystemError::WrongType {
            path: path.to_string(),
            expected: "file",
        }
    }
}
