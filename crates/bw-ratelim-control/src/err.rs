//! Declare an error type for the bw_ratelim_control crate.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

/// An error that occurred while loading or persisting bandwidth settings.
///
/// None of these errors affect the live limiters.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// We couldn't read the configuration file.
    #[error("Unable to read bandwidth configuration from {}", .path.display())]
    Read {
        /// The file we tried to read.
        path: PathBuf,
        /// What went wrong.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// We couldn't write the configuration file.
    #[error("Unable to write bandwidth configuration to {}", .path.display())]
    Write {
        /// The file we tried to replace.
        path: PathBuf,
        /// What went wrong.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The configuration file exists, but isn't a JSON object we understand.
    #[error("Bandwidth configuration in {} is corrupt", .path.display())]
    Corrupt {
        /// The file we read.
        path: PathBuf,
        /// What went wrong while parsing it.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// We couldn't encode the configuration as JSON.
    #[error("Unable to encode bandwidth configuration")]
    Serialize(#[source] Arc<serde_json::Error>),
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        use Error as E;
        use ErrorKind as EK;
        match self {
            E::Read { .. } | E::Write { .. } => EK::PersistentStateAccessFailed,
            E::Corrupt { .. } => EK::PersistentStateCorrupted,
            E::Serialize(_) => EK::Internal,
        }
    }
}
