//! Absolute-time phase file (`.pha`).
//!
//! One header per event followed by one line per usable P or S pick. Column
//! widths follow ncsn2pha.f and are part of the file contract.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::catalog::{CatalogEntry, CatalogIndex};
use crate::error::{Error, Result};
use crate::records::{parse_origin_time, PhasePick, PhaseType};
use crate::registry::{EngineId, IdentifierRegistry};

#[derive(Clone, Copy, Debug, Default)]
pub struct PhaseEncodeConfig {
    /// Shift detection travel times by their correlation lag. Used for the
    /// catalog (lag-corrected) strategy; the cross-correlation strategy keeps
    /// raw travel times.
    pub lag_correction: bool,
}

/// Where an event's starting hypocenter came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocationSource {
    OwnCatalog,
    InheritedFromTemplate(String),
    Unresolved,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Hypocenter {
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    pub magnitude: f64,
    pub horiz_uncertainty: f64,
    pub depth_uncertainty: f64,
}

impl From<&CatalogEntry> for Hypocenter {
    fn from(entry: &CatalogEntry) -> Self {
        Self {
            latitude: entry.latitude,
            longitude: entry.longitude,
            depth: entry.depth,
            magnitude: entry.magnitude,
            horiz_uncertainty: entry.horiz_uncertainty,
            depth_uncertainty: entry.depth_uncertainty,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PhaseLine {
    pub station: String,
    pub travel_time: f64,
    pub weight: f64,
    pub phase: PhaseType,
}

#[derive(Clone, Debug)]
pub struct EncodedEvent {
    pub id: EngineId,
    pub source_id: String,
    pub origin_time: NaiveDateTime,
    pub hypocenter: Hypocenter,
    pub location_source: LocationSource,
    pub phases: Vec<PhaseLine>,
}

/// Own entry first, then the template's location with magnitude and
/// uncertainties zeroed, then all zeros.
pub fn resolve_location(
    event_id: &str,
    template_id: &str,
    catalog: &CatalogIndex,
) -> (Hypocenter, LocationSource) {
    if let Some(entry) = catalog.get(event_id) {
        return (Hypocenter::from(entry), LocationSource::OwnCatalog);
    }
    if let Some(entry) = catalog.get(template_id) {
        let inherited = Hypocenter {
            latitude: entry.latitude,
            longitude: entry.longitude,
            depth: entry.depth,
            ..Hypocenter::default()
        };
        return (
            inherited,
            LocationSource::InheritedFromTemplate(template_id.to_string()),
        );
    }
    (Hypocenter::default(), LocationSource::Unresolved)
}

pub fn phase_lines(pick: &PhasePick, cfg: &PhaseEncodeConfig) -> Vec<PhaseLine> {
    [PhaseType::P, PhaseType::S]
        .into_iter()
        .filter_map(|phase| {
            let mut travel_time = pick.travel_time(phase)?;
            if cfg.lag_correction && pick.is_detection() {
                if let Some(lag) = pick.lag_time(phase) {
                    travel_time += lag;
                }
            }
            Some(PhaseLine {
                station: pick.station.clone(),
                travel_time,
                weight: pick.cc(phase).unwrap_or(1.0),
                phase,
            })
        })
        .collect()
}

/// Groups picks by event in first-seen order and resolves each event.
pub fn encode_events(
    picks: &[PhasePick],
    catalog: &CatalogIndex,
    registry: &IdentifierRegistry,
    cfg: &PhaseEncodeConfig,
) -> Result<Vec<EncodedEvent>> {
    let mut slot_by_event: HashMap<&str, usize> = HashMap::new();
    let mut events: Vec<EncodedEvent> = Vec::new();

    for pick in picks {
        let slot = match slot_by_event.get(pick.event_id.as_str()) {
            Some(&slot) => slot,
            None => {
                let origin_time = parse_origin_time(&pick.event_id, &pick.origin_time)?;
                let (hypocenter, location_source) =
                    resolve_location(&pick.event_id, &pick.template_id, catalog);
                events.push(EncodedEvent {
                    id: registry.engine_id(&pick.event_id),
                    source_id: pick.event_id.clone(),
                    origin_time,
                    hypocenter,
                    location_source,
                    phases: Vec::new(),
                });
                slot_by_event.insert(pick.event_id.as_str(), events.len() - 1);
                events.len() - 1
            }
        };
        events[slot].phases.extend(phase_lines(pick, cfg));
    }
    Ok(events)
}

pub fn format_event_header(event: &EncodedEvent) -> String {
    let t = &event.origin_time;
    let seconds = t.second() as f64 + t.nanosecond() as f64 / 1e9;
    let h = &event.hypocenter;
    let rms = 0.0;
    format!(
        "#{:>5} {:>2} {:>2} {:>2} {:>2} {:5.2} {:8.4} {:9.4} {:7.2}{:6.2}{:6.2}{:6.2}{:6.2} {:>10}",
        t.year(),
        t.month(),
        t.day(),
        t.hour(),
        t.minute(),
        seconds,
        h.latitude,
        h.longitude,
        h.depth,
        h.magnitude,
        h.horiz_uncertainty,
        h.depth_uncertainty,
        rms,
        event.id
    )
}

pub fn format_phase_line(line: &PhaseLine) -> String {
    format!(
        "{:<7} {:8.3} {:6.3} {}",
        line.station, line.travel_time, line.weight, line.phase
    )
}

pub struct PhaWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    events_written: usize,
}

impl PhaWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            events_written: 0,
        })
    }

    pub fn write_event(&mut self, event: &EncodedEvent) -> Result<()> {
        let path = &self.path;
        writeln!(self.writer, "{}", format_event_header(event)).map_err(|e| Error::io(path, e))?;
        for line in &event.phases {
            writeln!(self.writer, "{}", format_phase_line(line))
                .map_err(|e| Error::io(path, e))?;
        }
        self.events_written += 1;
        Ok(())
    }

    pub fn finalize(mut self) -> Result<(PathBuf, usize)> {
        self.writer.flush().map_err(|e| Error::io(&self.path, e))?;
        Ok((self.path, self.events_written))
    }
}

pub fn write_phase_file(path: &Path, events: &[EncodedEvent]) -> Result<PathBuf> {
    let mut writer = PhaWriter::create(path)?;
    for event in events {
        writer.write_event(event)?;
    }
    let (path, count) = writer.finalize()?;
    tracing::info!("Created {} with {count} events", path.display());
    Ok(path)
}
