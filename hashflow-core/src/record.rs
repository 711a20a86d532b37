use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A hash stored under a single key. The unit of transfer for both pipelines.
///
/// An empty field map on the read path means the key is not present in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    key: String,
    #[serde(default)]
    fields: HashMap<String, String>,
}

impl Record {
    pub fn new(key: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }

    /// A record with no fields, which is what a read of a missing key yields.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::new(key, HashMap::new())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields sorted by name, for output that does not depend on hash order.
    pub fn sorted_fields(&self) -> Vec<(&str, &str)> {
        let mut fields: Vec<_> = self
            .fields
            .iter()
            .map(|(f, v)| (f.as_str(), v.as_str()))
            .collect();
        fields.sort_unstable();
        fields
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.key)?;
        for (i, (field, value)) in self.sorted_fields().into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}: {value}")?;
        }
        write!(f, "}}")
    }
}
