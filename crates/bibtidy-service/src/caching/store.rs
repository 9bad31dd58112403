use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

/// The on-disk cache: one JSON document holding a namespace per cache.
///
/// Every cache owns one namespace and round-trips it through
/// [`take_namespace`](Self::take_namespace) / [`put_namespace`](Self::put_namespace).
/// Namespaces nobody claims are carried along untouched, so a cache added
/// in a newer version does not wipe state written by an older one and vice
/// versa.
///
/// Loading is deliberately forgiving: a missing file is an empty store and
/// a corrupt file is logged and replaced by an empty store, since the cache
/// is always recomputable from the remotes.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    namespaces: BTreeMap<String, serde_json::Value>,
}

impl CacheStore {
    /// Loads the store at `path`, or an empty one if it cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let namespaces = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(namespaces) => namespaces,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %error,
                        "discarding corrupt cache file"
                    );
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "cache file unreadable, starting empty"
                );
                BTreeMap::new()
            }
        };

        Self { path, namespaces }
    }

    /// Creates an empty in-memory store bound to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            namespaces: BTreeMap::new(),
        }
    }

    /// The file this store reads from and writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes a namespace out of the store, deserialized into `T`.
    ///
    /// An absent namespace yields `T::default()`; so does one that fails to
    /// deserialize, after a warning. Either way the namespace is now owned
    /// by the caller and must be handed back via
    /// [`put_namespace`](Self::put_namespace) before saving.
    pub fn take_namespace<T>(&mut self, name: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        let Some(value) = self.namespaces.remove(name) else {
            return T::default();
        };
        match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(
                    namespace = name,
                    error = %error,
                    "discarding undecodable cache namespace"
                );
                T::default()
            }
        }
    }

    /// Puts a namespace back, replacing any previous contents.
    pub fn put_namespace<T>(&mut self, name: &str, value: &T) -> Result<(), serde_json::Error>
    where
        T: Serialize,
    {
        self.namespaces
            .insert(name.to_owned(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Atomically writes the store back to its file.
    ///
    /// The document is written to a temporary file next to the target and
    /// moved into place, so a crash mid-write never leaves a truncated
    /// cache behind.
    pub fn save(&self) -> io::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut file, &self.namespaces)?;
        file.persist(&self.path).map_err(|error| error.error)?;
        Ok(())
    }
}
