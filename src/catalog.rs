use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::records::{read_table, CatalogRow};

/// Reference solution for one catalog event. Absent uncertainties are stored
/// as zero, which the engine reads as "not provided".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CatalogEntry {
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    pub magnitude: f64,
    pub horiz_uncertainty: f64,
    pub depth_uncertainty: f64,
}

#[derive(Clone, Debug, Default)]
pub struct CatalogIndex {
    entries: HashMap<String, CatalogEntry>,
}

impl CatalogIndex {
    pub fn from_rows(rows: Vec<CatalogRow>) -> Self {
        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            if entries.contains_key(&row.event_id) {
                tracing::warn!("Duplicate catalog entry for {}; keeping the first", row.event_id);
                continue;
            }
            entries.insert(
                row.event_id,
                CatalogEntry {
                    latitude: row.latitude,
                    longitude: row.longitude,
                    depth: row.depth,
                    magnitude: row.magnitude,
                    horiz_uncertainty: row.uncertainty_x.unwrap_or(0.0),
                    depth_uncertainty: row.uncertainty_z.unwrap_or(0.0),
                },
            );
        }
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let index = Self::from_rows(read_table(path)?);
        tracing::info!("Loaded catalog with {} events", index.len());
        Ok(index)
    }

    pub fn get(&self, event_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(event_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
