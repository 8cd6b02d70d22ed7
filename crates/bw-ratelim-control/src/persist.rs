//! Saving bandwidth settings so that they survive a restart.

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize as _;
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Something that can durably record a configuration value.
///
/// Implementations must not assume anything about the live limiters: the
/// value has already taken effect by the time it is persisted.
pub trait Persist: Send + Sync {
    /// Record that `key` is now set to `value`.
    fn persist(&self, key: &str, value: Value) -> Result<()>;
}

impl<P: Persist + ?Sized> Persist for Arc<P> {
    fn persist(&self, key: &str, value: Value) -> Result<()> {
        (**self).persist(key, value)
    }
}

impl<P: Persist + ?Sized> Persist for Box<P> {
    fn persist(&self, key: &str, value: Value) -> Result<()> {
        (**self).persist(key, value)
    }
}

/// A [`Persist`] that discards everything.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct NoPersist;

impl Persist for NoPersist {
    fn persist(&self, _key: &str, _value: Value) -> Result<()> {
        Ok(())
    }
}

/// A [`Persist`] that stores values in a JSON configuration file.
///
/// The file holds a single JSON object, which may contain other settings
/// that we don't know about; those are preserved.  Each call reads the
/// file, sets one key, and atomically replaces the file with the result.
#[derive(Debug)]
pub struct JsonConfigFile {
    /// Location of the file.
    path: PathBuf,
    /// Held while we read, modify, and write the file.
    lock: Mutex<()>,
}

impl JsonConfigFile {
    /// Use the configuration file at `path`.  It need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonConfigFile {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Return the location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current document.  A missing file is an empty document.
    fn load(&self) -> Result<Map<String, Value>> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| Error::Corrupt {
                path: self.path.clone(),
                source: Arc::new(e),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(Error::Read {
                path: self.path.clone(),
                source: Arc::new(e),
            }),
        }
    }

    /// Replace the file with `doc`.
    fn store(&self, doc: &Map<String, Value>) -> Result<()> {
        let mut buf = Vec::new();
        let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
        doc.serialize(&mut ser)
            .map_err(|e| Error::Serialize(Arc::new(e)))?;

        write_atomic(&self.path, &buf).map_err(|e| Error::Write {
            path: self.path.clone(),
            source: Arc::new(e),
        })
    }
}

impl Persist for JsonConfigFile {
    fn persist(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().expect("poisoned lock");
        let mut doc = self.load()?;
        doc.insert(key.to_owned(), value);
        self.store(&doc)
    }
}

/// Write `contents` to `path` so that readers see either the old file or
/// the new one, never a mixture.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
