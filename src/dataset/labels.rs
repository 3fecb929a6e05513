//! Label codec: bijection between material names and dense class indices.
//!
//! Indices are assigned by sorting the distinct names lexicographically, so
//! the same set of materials always produces the same mapping regardless of
//! record order in the store.

use std::collections::BTreeMap;
use std::path::Path;

use crate::utils::error::{MatStudioError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCodec {
    classes: Vec<String>,
}

impl LabelCodec {
    /// Build a codec from raw label strings and encode them in one pass.
    ///
    /// Returns the dense index for each input label alongside the codec.
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> (Vec<usize>, Self) {
        let mut classes: Vec<String> = labels
            .iter()
            .map(|l| l.as_ref().to_string())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        classes.sort();

        let codec = Self { classes };
        let indices = labels
            .iter()
            .map(|l| {
                codec
                    .encode(l.as_ref())
                    .expect("label seen during fit must encode")
            })
            .collect();
        (indices, codec)
    }

    /// Construct from an already-ordered class list.
    pub fn from_classes(classes: Vec<String>) -> Self {
        Self { classes }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Dense index for a material name, if known.
    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }

    /// Material name for an index. Unknown indices produce a generated
    /// placeholder rather than failing, so a stale artifact still yields a
    /// usable prediction document.
    pub fn decode(&self, index: usize) -> String {
        self.classes
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }

    /// Strict decode for callers that must not see placeholders.
    pub fn try_decode(&self, index: usize) -> Result<&str> {
        self.classes
            .get(index)
            .map(|s| s.as_str())
            .ok_or(MatStudioError::UnknownIndex(index))
    }

    /// Index -> name map in the shape persisted as labels.json.
    pub fn to_index_map(&self) -> BTreeMap<String, String> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, name)| (i.to_string(), name.clone()))
            .collect()
    }

    /// Write labels.json.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_index_map())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read labels.json back into a codec.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let map: BTreeMap<String, String> = serde_json::from_str(&json)?;

        let mut entries: Vec<(usize, String)> = map
            .into_iter()
            .map(|(k, v)| {
                k.parse::<usize>()
                    .map(|i| (i, v))
                    .map_err(|_| MatStudioError::Dataset(format!("bad label index key: {}", k)))
            })
            .collect::<Result<_>>()?;
        entries.sort_by_key(|(i, _)| *i);

        Ok(Self {
            classes: entries.into_iter().map(|(_, v)| v).collect(),
        })
    }
}
