use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Fat32Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Image is not a valid FAT32 volume.")]
    InvalidImage,
    #[error("No free cluster or directory slot left.")]
    OutOfSpace,
    #[error("Name already exists in this directory: {0}")]
    NameExists(String),
    #[error("No such directory: {0}")]
    NotFound(String),
    #[error("Multi-level paths are not supported: {0}")]
    Unsupported(String),
    #[error("Invalid name or path.")]
    BadArgument,
    #[error("Invalid cluster index: {0}")]
    InvalidCluster(u32),
}
