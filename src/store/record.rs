//! SimulationRecord: the value stored in both fingerprint stores.

use crate::types::{Location, SearchField, SimId, LOCALHOST};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

fn default_host() -> String {
    LOCALHOST.to_string()
}

/// A simulation directory, identified by its uuid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub uuid: SimId,
    #[serde(default)]
    pub name: String,
    /// Order-insensitive tag set, written as a sorted list
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeSet<String>,
    #[serde(default, deserialize_with = "deserialize_simcode")]
    pub simcode: Option<String>,
    pub path: PathBuf,
    #[serde(default = "default_host")]
    pub host: String,
}

impl SimulationRecord {
    pub fn new(uuid: impl Into<SimId>, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            tags: BTreeSet::new(),
            simcode: None,
            path: path.into(),
            host: default_host(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_simcode(mut self, simcode: impl Into<String>) -> Self {
        self.simcode = Some(simcode.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn is_local(&self) -> bool {
        self.host == LOCALHOST
    }

    pub fn location(&self) -> Location {
        Location::new(self.host.clone(), self.path.clone())
    }

    /// Tags joined the way they are displayed.
    pub fn joined_tags(&self) -> String {
        self.tags.iter().cloned().collect::<Vec<_>>().join(", ")
    }

    /// Textual values of a field a search pattern is evaluated against.
    pub fn field_values(&self, field: SearchField) -> Vec<String> {
        match field {
            SearchField::Uuid => vec![self.uuid.clone()],
            SearchField::Name => vec![self.name.clone()],
            SearchField::Tags => {
                let mut values: Vec<String> = self.tags.iter().cloned().collect();
                values.push(self.joined_tags());
                values
            }
            SearchField::Simcode => vec![self.simcode.clone().unwrap_or_default()],
            SearchField::Path => vec![self.path.to_string_lossy().into_owned()],
            SearchField::Host => vec![self.host.clone()],
        }
    }

    /// Single display value of a field.
    pub fn field_display(&self, field: SearchField) -> String {
        match field {
            SearchField::Tags => self.joined_tags(),
            SearchField::Path => self.location().to_string(),
            other => self.field_values(other).into_iter().next().unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagsRepr {
    List(Vec<String>),
    Joined(String),
}

/// Accept both a list and the older `"a, b"` joined string.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = Option::<TagsRepr>::deserialize(deserializer)?;
    let tags = match repr {
        None => BTreeSet::new(),
        Some(TagsRepr::List(tags)) => tags.into_iter().filter(|t| !t.is_empty()).collect(),
        Some(TagsRepr::Joined(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
    };
    Ok(tags)
}

fn deserialize_simcode<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
