//! Label id ↔ person name mapping, persisted as `id,name` CSV.

use crate::staging;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct LabelRow {
    id: i32,
    name: String,
}

/// Person names keyed by the label id the classifier emits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: BTreeMap<i32, String>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` under the next sequential id and return that id.
    pub fn push(&mut self, name: impl Into<String>) -> i32 {
        let id = self.names.keys().next_back().map_or(0, |last| last + 1);
        self.names.insert(id, name.into());
        id
    }

    pub fn name(&self, id: i32) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> {
        self.names.iter().map(|(&id, name)| (id, name.as_str()))
    }

    /// Write the map as `id,name` CSV into `writer`.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), LabelError> {
        let mut writer = csv::Writer::from_writer(writer);
        for (id, name) in self.iter() {
            writer.serialize(LabelRow {
                id,
                name: name.to_string(),
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), LabelError> {
        let mut tmp = staging::beside(path)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Load a label file. A missing file yields an empty map; rows that do
    /// not parse are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self, LabelError> {
        let mut map = Self::new();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "label file missing, using empty label map");
            return Ok(map);
        }

        let mut reader = csv::Reader::from_path(path)?;
        for row in reader.deserialize::<LabelRow>() {
            match row {
                Ok(row) => {
                    map.names.insert(row.id, row.name);
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping label row"),
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_assigns_sequential_ids() {
        let mut labels = LabelMap::new();
        assert_eq!(labels.push("alice"), 0);
        assert_eq!(labels.push("bob"), 1);
        assert_eq!(labels.name(1), Some("bob"));
        assert_eq!(labels.name(2), None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");

        let mut labels = LabelMap::new();
        labels.push("alice");
        labels.push("bob, jr.");
        labels.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,name\n0,alice\n"));

        assert_eq!(LabelMap::load(&path).unwrap(), labels);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LabelMap::load(&dir.path().join("nope.csv")).unwrap().is_empty());
    }

    #[test]
    fn test_load_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.csv");
        std::fs::write(&path, "id,name\n0,alice\nnot-a-number,bob\n2,carol\n").unwrap();

        let labels = LabelMap::load(&path).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.name(2), Some("carol"));
    }
}
