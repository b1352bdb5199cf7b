//! Synthetic event identifiers.
//!
//! HypoDD only accepts integer event ids that fit its fixed-width fields, so
//! every source id gets a dense synthetic id starting at [`SYNTHETIC_ID_BASE`],
//! in first-seen order. The mapping is persisted as a two-column CSV so that the
//! result decoder can undo it in a later, independent run.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::records::normalize_id;

pub const SYNTHETIC_ID_BASE: u64 = 100_000;

const SOURCE_COLUMNS: [&str; 2] = ["original_id", "event_id"];
const SYNTHETIC_COLUMNS: [&str; 2] = ["synthetic_id", "hypodd_id"];

/// The identifier written into an engine file. Falls back to the raw source id
/// when the registry has no entry, so encoding keeps going with degraded
/// traceability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineId {
    Synthetic(u64),
    Raw(String),
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // `pad` so that width/alignment flags apply.
        match self {
            EngineId::Synthetic(id) => f.pad(&id.to_string()),
            EngineId::Raw(raw) => f.pad(raw),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct IdentifierRegistry {
    by_source: HashMap<String, u64>,
    by_synthetic: HashMap<u64, String>,
    order: Vec<u64>,
    next: u64,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self {
            next: SYNTHETIC_ID_BASE,
            ..Self::default()
        }
    }

    pub fn from_source_ids<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut registry = Self::new();
        registry.assign(ids);
        registry
    }

    /// Assigns synthetic ids to every id not seen before, in iteration order.
    /// Returns how many new ids were handed out.
    pub fn assign<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut added = 0;
        for id in ids {
            if self.by_source.contains_key(id) {
                continue;
            }
            let synthetic = self.next;
            self.next += 1;
            self.insert(id.to_string(), synthetic);
            added += 1;
        }
        added
    }

    fn insert(&mut self, source: String, synthetic: u64) {
        self.by_synthetic.insert(synthetic, source.clone());
        self.by_source.insert(source, synthetic);
        self.order.push(synthetic);
    }

    pub fn resolve(&self, synthetic: u64) -> Option<&str> {
        self.by_synthetic.get(&synthetic).map(String::as_str)
    }

    pub fn synthetic_for(&self, source: &str) -> Option<u64> {
        self.by_source.get(source).copied()
    }

    pub fn engine_id(&self, source: &str) -> EngineId {
        match self.synthetic_for(source) {
            Some(id) => EngineId::Synthetic(id),
            None => {
                tracing::warn!("No synthetic id for event {source}; writing the raw id");
                EngineId::Raw(source.to_string())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pairs in assignment (or file) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.order
            .iter()
            .map(move |id| (self.by_synthetic[id].as_str(), *id))
    }

    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| Error::csv(path, e))?;
        writer
            .write_record(["original_id", "synthetic_id"])
            .map_err(|e| Error::csv(path, e))?;
        for (source, synthetic) in self.iter() {
            writer
                .write_record([source, &synthetic.to_string()])
                .map_err(|e| Error::csv(path, e))?;
        }
        writer.flush().map_err(|e| Error::io(path, e))?;
        if let (Some(first), Some(last)) = (self.order.first(), self.order.last()) {
            tracing::info!(
                "Mapped {} events (ids {first} to {last}) -> {}",
                self.len(),
                path.display()
            );
        }
        Ok(path.to_path_buf())
    }

    /// Reloads a persisted mapping. Either legacy column pair is accepted; an
    /// unrecognised header gives an empty registry and a warning.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| Error::csv(path, e))?;
        let headers = reader.headers().map_err(|e| Error::csv(path, e))?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        // Columns are matched as pairs, not individually.
        let pair = SOURCE_COLUMNS
            .iter()
            .zip(SYNTHETIC_COLUMNS.iter())
            .find_map(|(src, syn)| Some((column(*src)?, column(*syn)?)));

        let mut registry = Self::new();
        let Some((source_idx, synthetic_idx)) = pair else {
            tracing::warn!(
                "Unexpected columns in mapping file {}: {:?}",
                path.display(),
                headers.iter().collect::<Vec<_>>()
            );
            return Ok(registry);
        };

        for record in reader.records() {
            let record = record.map_err(|e| Error::csv(path, e))?;
            let (Some(source), Some(synthetic_raw)) =
                (record.get(source_idx), record.get(synthetic_idx))
            else {
                continue;
            };
            let Ok(synthetic) = normalize_id(synthetic_raw).parse::<u64>() else {
                tracing::warn!("Skipping mapping row with non-integer id '{synthetic_raw}'");
                continue;
            };
            let source = normalize_id(source);
            if registry.by_source.contains_key(&source)
                || registry.by_synthetic.contains_key(&synthetic)
            {
                tracing::warn!("Duplicate mapping row {source} <-> {synthetic}; keeping the first");
                continue;
            }
            let Some(after) = synthetic.checked_add(1) else {
                tracing::warn!("Skipping mapping row {source} with out-of-range id {synthetic}");
                continue;
            };
            registry.next = registry.next.max(after);
            registry.insert(source, synthetic);
        }
        tracing::debug!("Loaded {} id mappings from {}", registry.len(), path.display());
        Ok(registry)
    }
}
