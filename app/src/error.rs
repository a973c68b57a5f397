use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::MAX_MOTION_TIMEOUT_SECS;
use crate::roof::Direction;

/// A failed or incomplete field-bus transaction.
///
/// The hardware state is unknown after any of these; callers must never read
/// one as "roof safe" or as a particular panel position.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum BusFault {
    #[error("unable to connect to {address}: {detail}")]
    Connect { address: String, detail: String },

    #[error("read of {count} inputs at {start} failed: {detail}")]
    Read {
        start: u16,
        count: usize,
        detail: String,
    },

    #[error("short read at {start}: wanted {wanted} inputs, got {got}")]
    ShortRead {
        start: u16,
        wanted: usize,
        got: usize,
    },

    #[error("write of coil {address} failed: {detail}")]
    Write { address: u16, detail: String },
}

/// Why a motion or configuration request was not carried out.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Rejected {
    #[error("device is not connected")]
    NotConnected,

    #[error("motion timeout is not configured")]
    NoTimeoutConfigured,

    #[error("motion timeout {0}s is out of range (0-{max}s)", max = MAX_MOTION_TIMEOUT_SECS)]
    TimeoutOutOfRange(u32),

    #[error("roof is already fully {}", .0.target())]
    AlreadyAtTarget(Direction),

    #[error("cannot close the roof while the mount interlock is engaged")]
    Locked,

    #[error("roof is moving")]
    MotionActive,

    #[error(transparent)]
    Bus(#[from] BusFault),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("unable to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("unable to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("unable to serialise configuration: {0}")]
    Serialise(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Failure of an operator command forwarded to the control thread.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error(transparent)]
    Bus(#[from] BusFault),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
