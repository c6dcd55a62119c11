use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no volume is mounted")]
    NotMounted,
    #[error("invalid volume: bad signature or geometry")]
    InvalidVolume,
    #[error("block device I/O error")]
    IoError,
    #[error("invalid file name")]
    InvalidName,
    #[error("file already exists")]
    AlreadyExists,
    #[error("file not found")]
    NotFound,
    #[error("root directory is full")]
    DirectoryFull,
    #[error("file is open")]
    FileOpen,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("invalid file handle")]
    InvalidHandle,
    #[error("offset past end of file")]
    OffsetOutOfRange,
    #[error("files are still open")]
    FilesStillOpen,
    #[error("no free data blocks left")]
    VolumeFull,
}

pub type Result<T> = core::result::Result<T, FsError>;
