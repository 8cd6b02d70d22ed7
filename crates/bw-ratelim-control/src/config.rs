//! Initial bandwidth limits, as stored in the daemon's configuration file.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Direction, Error, Result};

/// The bandwidth limits found in a configuration file.
///
/// Both limits are in bytes per second; zero or less means "unlimited".
/// Missing entries default to zero.
#[derive(Clone, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct BandwidthConfig {
    /// Limit on data we receive.
    pub max_download_bandwidth: i64,
    /// Limit on data we send.
    pub max_upload_bandwidth: i64,
}

impl BandwidthConfig {
    /// Construct a configuration with the given limits.
    pub fn new(max_download_bandwidth: i64, max_upload_bandwidth: i64) -> Self {
        BandwidthConfig {
            max_download_bandwidth,
            max_upload_bandwidth,
        }
    }

    /// Read the limits from the JSON document at `path`.
    ///
    /// Other settings in the document are ignored.  If there is no file at
    /// `path`, both limits are unlimited.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Read {
                    path: path.to_owned(),
                    source: Arc::new(e),
                })
            }
        };
        let corrupt = |e| Error::Corrupt {
            path: path.to_owned(),
            source: Arc::new(e),
        };
        // Only a JSON object will do: serde would also accept the fields as an array.
        let doc: Map<String, Value> = serde_json::from_slice(&bytes).map_err(corrupt)?;
        serde_json::from_value(Value::Object(doc)).map_err(corrupt)
    }

    /// Return the limit for `direction`.
    pub fn limit(&self, direction: Direction) -> i64 {
        match direction {
            Direction::Download => self.max_download_bandwidth,
            Direction::Upload => self.max_upload_bandwidth,
        }
    }
}
