//! Typed rows for the source tables.
//!
//! Optional numeric cells are `Option<f64>`. Empty cells, unparsable cells and
//! NaN all read as absent, so formatting code never has to second-guess a
//! zero.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseType {
    P,
    S,
}

impl PhaseType {
    pub fn letter(self) -> char {
        match self {
            PhaseType::P => 'P',
            PhaseType::S => 'S',
        }
    }
}

impl fmt::Display for PhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PhasePick {
    #[serde(deserialize_with = "de_id")]
    pub event_id: String,
    #[serde(deserialize_with = "de_id")]
    pub template_id: String,
    pub station: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub travel_time_p: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub travel_time_s: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub lag_time_p: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub lag_time_s: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub cc_p: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub cc_s: Option<f64>,
    pub origin_time: String,
}

impl PhasePick {
    /// A template's own anchor row carries its own id as the template id.
    pub fn is_detection(&self) -> bool {
        self.event_id != self.template_id
    }

    pub fn travel_time(&self, phase: PhaseType) -> Option<f64> {
        match phase {
            PhaseType::P => self.travel_time_p,
            PhaseType::S => self.travel_time_s,
        }
    }

    pub fn lag_time(&self, phase: PhaseType) -> Option<f64> {
        match phase {
            PhaseType::P => self.lag_time_p,
            PhaseType::S => self.lag_time_s,
        }
    }

    pub fn cc(&self, phase: PhaseType) -> Option<f64> {
        match phase {
            PhaseType::P => self.cc_p,
            PhaseType::S => self.cc_s,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CatalogRow {
    #[serde(deserialize_with = "de_id")]
    pub event_id: String,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
    #[serde(alias = "depth_km")]
    pub depth: f64,
    #[serde(alias = "mag")]
    pub magnitude: f64,
    #[serde(
        default,
        alias = "horizontal_uncertainty",
        alias = "eh",
        deserialize_with = "de_opt_f64"
    )]
    pub uncertainty_x: Option<f64>,
    #[serde(
        default,
        alias = "depth_uncertainty",
        alias = "ez",
        deserialize_with = "de_opt_f64"
    )]
    pub uncertainty_z: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StationRecord {
    #[serde(alias = "sta", alias = "Station")]
    pub station: String,
    #[serde(alias = "lat", alias = "Latitude")]
    pub latitude: f64,
    #[serde(alias = "lon", alias = "Longitude")]
    pub longitude: f64,
    #[serde(alias = "elevation_m", alias = "Elevation")]
    pub elevation: f64,
}

pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| Error::csv(path, e))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|e| Error::csv(path, e))
}

pub fn load_picks(path: &Path) -> Result<Vec<PhasePick>> {
    let picks: Vec<PhasePick> = read_table(path)?;
    tracing::info!("Loaded {} phase picks from {}", picks.len(), path.display());
    Ok(picks)
}

pub fn load_stations(path: &Path) -> Result<Vec<StationRecord>> {
    read_table(path)
}

/// Parses an ISO-8601 origin time. An explicit offset is accepted but the wall
/// clock fields are kept as written; no zone conversion happens.
pub fn parse_origin_time(event_id: &str, value: &str) -> Result<NaiveDateTime> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.naive_local());
    }
    let naive = trimmed.trim_end_matches('Z');
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, pattern) {
            return Ok(dt);
        }
    }
    Err(Error::InvalidTimestamp {
        event_id: event_id.to_string(),
        value: value.to_string(),
    })
}

fn de_opt_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| !v.is_nan()))
}

// Ids written by pandas from an integer column may come back as "123.0".
fn de_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(normalize_id(&raw))
}

pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_suffix(".0") {
        Some(head) if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) => {
            head.to_string()
        }
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_and_nan_cells_are_absent() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "event_id,template_id,station,travel_time_p,travel_time_s,lag_time_p,lag_time_s,cc_p,cc_s,origin_time,network"
        )
        .unwrap();
        writeln!(file, "E1,E1,STA1,1.25,,,NaN,,,2022-12-20T10:34:24.5Z,NC").unwrap();
        file.flush().unwrap();

        let picks = load_picks(file.path()).unwrap();
        assert_eq!(picks.len(), 1);
        let pick = &picks[0];
        assert_eq!(pick.travel_time_p, Some(1.25));
        assert_eq!(pick.travel_time_s, None);
        assert_eq!(pick.lag_time_s, None);
        assert!(!pick.is_detection());
    }

    #[test]
    fn catalog_accepts_short_column_names() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "event_id,lat,lon,depth,mag,eh").unwrap();
        writeln!(file, "E1,40.0,-120.0,5.0,2.1,0.3").unwrap();
        file.flush().unwrap();

        let rows: Vec<CatalogRow> = read_table(file.path()).unwrap();
        assert_eq!(rows[0].latitude, 40.0);
        assert_eq!(rows[0].uncertainty_x, Some(0.3));
        assert_eq!(rows[0].uncertainty_z, None);
    }

    #[test]
    fn origin_time_keeps_wall_clock_fields() {
        let with_offset = parse_origin_time("E1", "2022-12-20T10:34:24.250+02:00").unwrap();
        assert_eq!(with_offset.to_string(), "2022-12-20 10:34:24.250");
        let bare = parse_origin_time("E1", "2022-12-20 10:34:24").unwrap();
        assert_eq!(bare.to_string(), "2022-12-20 10:34:24");
        assert!(parse_origin_time("E1", "yesterday").is_err());
    }

    #[test]
    fn integer_ids_written_as_floats_are_normalized() {
        assert_eq!(normalize_id("73818801.0"), "73818801");
        assert_eq!(normalize_id(" nc73818801 "), "nc73818801");
        assert_eq!(normalize_id("1.05"), "1.05");
    }
}
