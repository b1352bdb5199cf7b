//! Cross-correlation differential times (`dt.cc`).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::records::{PhasePick, PhaseType};
use crate::registry::{EngineId, IdentifierRegistry};

/// Quality gate for correlation measurements. With no threshold every
/// observation that has both a lag and a coefficient survives.
#[derive(Clone, Copy, Debug, Default)]
pub struct CcFilter {
    pub min_cc: Option<f64>,
}

impl CcFilter {
    pub fn with_min_cc(min_cc: f64) -> Self {
        Self {
            min_cc: Some(min_cc),
        }
    }

    fn accepts(&self, cc: f64) -> bool {
        self.min_cc.map_or(true, |min| cc >= min)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiffObservation {
    pub station: String,
    pub differential_time: f64,
    pub weight: f64,
    pub phase: PhaseType,
}

#[derive(Clone, Debug)]
pub struct DifferentialPair {
    pub id1: EngineId,
    pub id2: EngineId,
    pub event_id: String,
    pub template_id: String,
    pub observations: Vec<DiffObservation>,
}

pub fn surviving_observations(pick: &PhasePick, filter: &CcFilter) -> Vec<DiffObservation> {
    [PhaseType::P, PhaseType::S]
        .into_iter()
        .filter_map(|phase| {
            let lag = pick.lag_time(phase)?;
            let cc = pick.cc(phase)?;
            filter.accepts(cc).then(|| DiffObservation {
                station: pick.station.clone(),
                differential_time: lag,
                weight: cc,
                phase,
            })
        })
        .collect()
}

/// One pair per (detection, template) in first-seen order. Template anchor
/// rows never form pairs, and pairs left without observations are dropped.
pub fn build_pairs(
    picks: &[PhasePick],
    registry: &IdentifierRegistry,
    filter: &CcFilter,
) -> Vec<DifferentialPair> {
    let mut slot_by_pair: HashMap<(&str, &str), usize> = HashMap::new();
    let mut pairs: Vec<DifferentialPair> = Vec::new();

    for pick in picks.iter().filter(|p| p.is_detection()) {
        let key = (pick.event_id.as_str(), pick.template_id.as_str());
        let slot = *slot_by_pair.entry(key).or_insert_with(|| {
            pairs.push(DifferentialPair {
                id1: registry.engine_id(&pick.event_id),
                id2: registry.engine_id(&pick.template_id),
                event_id: pick.event_id.clone(),
                template_id: pick.template_id.clone(),
                observations: Vec::new(),
            });
            pairs.len() - 1
        });
        pairs[slot]
            .observations
            .extend(surviving_observations(pick, filter));
    }

    pairs.retain(|pair| {
        let keep = !pair.observations.is_empty();
        if !keep {
            tracing::debug!(
                "Dropping pair {}/{}: no observation passes the cc filter",
                pair.event_id,
                pair.template_id
            );
        }
        keep
    });
    pairs
}

pub fn format_pair_header(pair: &DifferentialPair) -> String {
    format!("# {:>9} {:>9} 0.000000", pair.id1, pair.id2)
}

pub fn format_observation(obs: &DiffObservation) -> String {
    format!(
        "{:<7} {:9.6} {:5.3} {}",
        obs.station, obs.differential_time, obs.weight, obs.phase
    )
}

pub struct CcWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    pairs_written: usize,
}

impl CcWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            pairs_written: 0,
        })
    }

    /// Writes nothing for a pair without observations.
    pub fn write_pair(&mut self, pair: &DifferentialPair) -> Result<()> {
        if pair.observations.is_empty() {
            return Ok(());
        }
        let path = &self.path;
        writeln!(self.writer, "{}", format_pair_header(pair)).map_err(|e| Error::io(path, e))?;
        for obs in &pair.observations {
            writeln!(self.writer, "{}", format_observation(obs))
                .map_err(|e| Error::io(path, e))?;
        }
        self.pairs_written += 1;
        Ok(())
    }

    pub fn finalize(mut self) -> Result<(PathBuf, usize)> {
        self.writer.flush().map_err(|e| Error::io(&self.path, e))?;
        Ok((self.path, self.pairs_written))
    }
}

pub fn write_cc_file(path: &Path, pairs: &[DifferentialPair]) -> Result<PathBuf> {
    let mut writer = CcWriter::create(path)?;
    for pair in pairs {
        writer.write_pair(pair)?;
    }
    let (path, count) = writer.finalize()?;
    tracing::info!("Created {} with {count} event pairs", path.display());
    Ok(path)
}
