//! Error type for the address manager (spec §7), in the same flat-enum shape
//! as `witnet_p2p`'s own error modules.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddrManError {
    #[error("persisted addrman version {0} is not supported (expected 0)")]
    BadImportVersion(u32),

    #[error("persisted addrman network magic {found:08x} does not match expected {expected:08x}")]
    BadImportMagic { expected: u32, found: u32 },

    #[error("persisted addrman bucket references an unknown or already-claimed entry")]
    BadImportBucket,

    #[error("persisted addrman data has trailing bytes after the expected structure")]
    BadImportTrailingBytes,

    #[error("persisted addrman entry is referenced by neither the used table nor any fresh bucket")]
    BadImportUnreferenced,

    #[error("addrman I/O error: {0}")]
    Io(#[from] std::io::Error),
}
