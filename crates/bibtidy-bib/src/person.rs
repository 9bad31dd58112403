use serde::{Deserialize, Serialize};

/// A structured person name.
///
/// Every name part is an ordered list of word tokens. Parts that do not
/// apply are simply left empty; an all-empty `Person` is valid but renders
/// to the empty string.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Person {
    /// First name tokens, e.g. `["Jean"]`.
    pub first: Vec<String>,
    /// Middle name tokens.
    pub middle: Vec<String>,
    /// Nobiliary particles, e.g. `["de", "la"]`.
    pub prelast: Vec<String>,
    /// Last name tokens.
    pub last: Vec<String>,
    /// Lineage suffix tokens, e.g. `["Jr."]`.
    pub lineage: Vec<String>,
}

impl Person {
    /// Creates a person from first and last name tokens only.
    pub fn new(first: &str, last: &str) -> Self {
        let tokens = |s: &str| {
            s.split_whitespace()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        };
        Person {
            first: tokens(first),
            last: tokens(last),
            ..Default::default()
        }
    }

    /// The canonical string rendering of this name.
    ///
    /// Follows the "von Last, Jr, First Middle" convention. Empty parts and
    /// their separating commas are omitted.
    pub fn plain(&self) -> String {
        let last_part = join_tokens(self.prelast.iter().chain(&self.last));
        let first_part = join_tokens(self.first.iter().chain(&self.middle));
        let lineage = join_tokens(self.lineage.iter());

        let mut out = last_part;
        for part in [lineage, first_part] {
            if part.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(&part);
        }
        out
    }
}

impl std::fmt::Display for Person {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.plain())
    }
}

fn join_tokens<'a>(tokens: impl Iterator<Item = &'a String>) -> String {
    let mut out = String::new();
    for token in tokens {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(token);
    }
    out
}
