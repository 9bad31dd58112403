use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Entry;

/// Errors raised when loading or saving a bibliography database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The database file could not be read or written.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The database file is not valid YAML/JSON.
    #[error("malformed database file: {0}")]
    Malformed(String),
    /// Two entries share the same citation key.
    #[error("duplicate citation key `{0}`")]
    DuplicateKey(String),
}

/// An ordered bibliography database.
///
/// Entries keep the order in which they were inserted (or appeared in the
/// source file); lookups by citation key are still cheap. Filters mutate
/// entries and the entry set in place during a pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DatabaseRepr", into = "DatabaseRepr")]
pub struct BibDatabase {
    order: Vec<String>,
    entries: BTreeMap<String, Entry>,
}

/// The on-disk representation: a plain entry list, which preserves order in
/// both YAML and JSON.
#[derive(Serialize, Deserialize)]
struct DatabaseRepr {
    entries: Vec<KeyedEntry>,
}

#[derive(Serialize, Deserialize)]
struct KeyedEntry {
    key: String,
    #[serde(flatten)]
    entry: Entry,
}

impl TryFrom<DatabaseRepr> for BibDatabase {
    type Error = DatabaseError;

    fn try_from(repr: DatabaseRepr) -> Result<Self, Self::Error> {
        let mut db = BibDatabase::default();
        for KeyedEntry { key, entry } in repr.entries {
            if db.entries.contains_key(&key) {
                return Err(DatabaseError::DuplicateKey(key));
            }
            db.insert(key, entry);
        }
        Ok(db)
    }
}

impl From<BibDatabase> for DatabaseRepr {
    fn from(db: BibDatabase) -> Self {
        let BibDatabase { order, mut entries } = db;
        let entries = order
            .into_iter()
            .filter_map(|key| {
                let entry = entries.remove(&key)?;
                Some(KeyedEntry { key, entry })
            })
            .collect();
        DatabaseRepr { entries }
    }
}

impl BibDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the database contains no entries.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The citation keys in database order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Iterates over `(key, entry)` pairs in database order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.order
            .iter()
            .filter_map(|key| Some((key.as_str(), self.entries.get(key)?)))
    }

    /// Looks up an entry by citation key.
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Looks up an entry for mutation.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.entries.get_mut(key)
    }

    /// Inserts an entry, replacing any previous entry with the same key.
    ///
    /// A replaced entry keeps its original position in the order.
    pub fn insert(&mut self, key: impl Into<String>, entry: Entry) {
        let key = key.into();
        if self.entries.insert(key.clone(), entry).is_none() {
            self.order.push(key);
        }
    }

    /// Removes an entry by key.
    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry)
    }

    /// Reorders the database according to the given key sequence.
    ///
    /// Keys not present in the database are ignored; entries not mentioned
    /// keep their relative order after the mentioned ones.
    pub fn reorder(&mut self, keys: impl IntoIterator<Item = String>) {
        let mut new_order: Vec<String> = keys
            .into_iter()
            .filter(|k| self.entries.contains_key(k))
            .collect();
        for key in &self.order {
            if !new_order.contains(key) {
                new_order.push(key.clone());
            }
        }
        self.order = new_order;
    }

    /// Loads a database from a YAML (or, for `.json` paths, JSON) file.
    pub fn load(path: &Path) -> Result<Self, DatabaseError> {
        let buf = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&buf).map_err(|e| DatabaseError::Malformed(e.to_string()))
        } else {
            serde_yaml::from_str(&buf).map_err(|e| DatabaseError::Malformed(e.to_string()))
        }
    }

    /// Saves the database, atomically replacing the target file.
    pub fn save(&self, path: &Path) -> Result<(), DatabaseError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
        let buf = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)
                .map_err(|e| DatabaseError::Malformed(e.to_string()))?
        } else {
            serde_yaml::to_string(self).map_err(|e| DatabaseError::Malformed(e.to_string()))?
        };
        temp_file.write_all(buf.as_bytes())?;
        temp_file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
