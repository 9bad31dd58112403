use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::Person;

/// A single bibliographic entry.
///
/// Field names are case-insensitive: they are folded to lowercase on
/// deserialization and on every mutation, so `entry.field("DOI")` and
/// `entry.field("doi")` refer to the same value.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// The entry type tag, e.g. `article` or `book`.
    #[serde(rename = "type")]
    pub entry_type: String,

    /// Field name → raw field value.
    #[serde(default, deserialize_with = "deserialize_lowercase_keys")]
    pub fields: BTreeMap<String, String>,

    /// Role name → ordered person list.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub persons: BTreeMap<String, Vec<Person>>,
}

impl Entry {
    /// Creates an empty entry of the given type.
    pub fn new(entry_type: &str) -> Self {
        Entry {
            entry_type: entry_type.to_owned(),
            ..Default::default()
        }
    }

    /// Looks up a field value, case-insensitively.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Sets a field value, folding the name to lowercase.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        self.fields.insert(name.to_lowercase(), value.into());
    }

    /// Removes a field, returning its previous value if any.
    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        self.fields.remove(&name.to_lowercase())
    }

    /// The ordered person list for a role, empty if the role is absent.
    pub fn persons(&self, role: &str) -> &[Person] {
        self.persons
            .get(&role.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Replaces the person list for a role.
    pub fn set_persons(&mut self, role: &str, persons: Vec<Person>) {
        self.persons.insert(role.to_lowercase(), persons);
    }
}

fn deserialize_lowercase_keys<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect())
}
