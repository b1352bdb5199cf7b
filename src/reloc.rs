//! HypoDD relocation output (`hypoDD.reloc`) back to CSV.
//!
//! Each line holds at least 24 whitespace-separated fields:
//! `ID LAT LON DEPTH X Y Z EX EY EZ YR MO DY HR MI SC MAG NCCP NCCS NCTP NCTS RCC RCT CID`.
//! Lines that are short or fail to parse are skipped rather than repaired.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::{Error, Result};
use crate::registry::IdentifierRegistry;

pub const RELOC_MIN_FIELDS: usize = 24;

const ORIGIN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PickCounts {
    pub cc_p: u32,
    pub cc_s: u32,
    pub cat_p: u32,
    pub cat_s: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResidualRms {
    pub cc: f64,
    pub cat: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockFields {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelocatedEvent {
    pub hypodd_id: u64,
    pub source_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    /// Cluster-centroid cartesian offsets in metres.
    pub local_xyz: [f64; 3],
    pub local_xyz_uncertainty: [f64; 3],
    pub clock: ClockFields,
    pub origin_time: NaiveDateTime,
    pub magnitude: f64,
    pub pick_counts: PickCounts,
    pub rms: ResidualRms,
    pub cluster_id: i64,
}

#[derive(Clone, Debug, Default)]
pub struct DecodeOutcome {
    pub events: Vec<RelocatedEvent>,
    pub skipped_lines: usize,
}

impl DecodeOutcome {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Builds a timestamp from the discrete clock fields. Seconds are rounded to
/// microseconds and may overflow into the next minute (HypoDD can print 60.00).
pub fn reconstruct_origin_time(clock: &ClockFields) -> Option<NaiveDateTime> {
    if !clock.second.is_finite() {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(clock.year, clock.month, clock.day)?
        .and_hms_opt(clock.hour, clock.minute, 0)?;
    let micros = (clock.second * 1e6).round() as i64;
    base.checked_add_signed(Duration::microseconds(micros))
}

pub fn parse_line(line: &str) -> Option<RelocatedEvent> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < RELOC_MIN_FIELDS {
        return None;
    }
    let f = |idx: usize| parts[idx].parse::<f64>().ok();
    let u = |idx: usize| parts[idx].parse::<u32>().ok();

    let clock = ClockFields {
        year: parts[10].parse().ok()?,
        month: u(11)?,
        day: u(12)?,
        hour: u(13)?,
        minute: u(14)?,
        second: f(15)?,
    };
    Some(RelocatedEvent {
        hypodd_id: parts[0].parse().ok()?,
        source_id: None,
        latitude: f(1)?,
        longitude: f(2)?,
        depth: f(3)?,
        local_xyz: [f(4)?, f(5)?, f(6)?],
        local_xyz_uncertainty: [f(7)?, f(8)?, f(9)?],
        origin_time: reconstruct_origin_time(&clock)?,
        clock,
        magnitude: f(16)?,
        pick_counts: PickCounts {
            cc_p: u(17)?,
            cc_s: u(18)?,
            cat_p: u(19)?,
            cat_s: u(20)?,
        },
        rms: ResidualRms {
            cc: f(21)?,
            cat: f(22)?,
        },
        cluster_id: parts[23].parse().ok()?,
    })
}

pub fn parse(text: &str) -> DecodeOutcome {
    let mut outcome = DecodeOutcome::default();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(event) => outcome.events.push(event),
            None => {
                tracing::debug!("Skipping malformed relocation line {}", lineno + 1);
                outcome.skipped_lines += 1;
            }
        }
    }
    if outcome.is_empty() {
        tracing::warn!("No events found in relocation output");
    }
    outcome
}

/// Restores source ids in place. Ids missing from the registry stay `None`.
pub fn attach_source_ids(events: &mut [RelocatedEvent], registry: &IdentifierRegistry) -> usize {
    let mut missing = 0;
    for event in events.iter_mut() {
        event.source_id = registry.resolve(event.hypodd_id).map(str::to_string);
        if event.source_id.is_none() {
            missing += 1;
        }
    }
    if missing > 0 {
        tracing::warn!("{missing} relocated events have no entry in the id mapping");
    }
    missing
}

pub fn read_reloc_file(path: &Path) -> Result<DecodeOutcome> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(parse(&text))
}

pub fn format_origin_time(t: &NaiveDateTime) -> String {
    t.format(ORIGIN_TIME_FORMAT).to_string()
}

const TABLE_COLUMNS: [&str; 25] = [
    "hypodd_id",
    "latitude",
    "longitude",
    "depth",
    "x_m",
    "y_m",
    "z_m",
    "ex_m",
    "ey_m",
    "ez_m",
    "year",
    "month",
    "day",
    "hour",
    "minute",
    "second",
    "magnitude",
    "n_cc_p",
    "n_cc_s",
    "n_cat_p",
    "n_cat_s",
    "rms_cc",
    "rms_cat",
    "cluster_id",
    "origin_time",
];

/// Float cells always carry a decimal point: `5.0`, never `5`.
fn float_cell(value: f64) -> String {
    format!("{value:?}")
}

fn table_row(event: &RelocatedEvent) -> Vec<String> {
    let c = &event.clock;
    vec![
        event.hypodd_id.to_string(),
        float_cell(event.latitude),
        float_cell(event.longitude),
        float_cell(event.depth),
        float_cell(event.local_xyz[0]),
        float_cell(event.local_xyz[1]),
        float_cell(event.local_xyz[2]),
        float_cell(event.local_xyz_uncertainty[0]),
        float_cell(event.local_xyz_uncertainty[1]),
        float_cell(event.local_xyz_uncertainty[2]),
        c.year.to_string(),
        c.month.to_string(),
        c.day.to_string(),
        c.hour.to_string(),
        c.minute.to_string(),
        float_cell(c.second),
        float_cell(event.magnitude),
        event.pick_counts.cc_p.to_string(),
        event.pick_counts.cc_s.to_string(),
        event.pick_counts.cat_p.to_string(),
        event.pick_counts.cat_s.to_string(),
        float_cell(event.rms.cc),
        float_cell(event.rms.cat),
        event.cluster_id.to_string(),
        format_origin_time(&event.origin_time),
    ]
}

/// Writes the relocation table. With `with_source_ids` the restored id comes
/// first as `event_id`; unknown ids leave that cell empty.
pub fn write_table(
    path: &Path,
    events: &[RelocatedEvent],
    with_source_ids: bool,
) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| Error::csv(path, e))?;
    let mut header: Vec<&str> = Vec::with_capacity(TABLE_COLUMNS.len() + 1);
    if with_source_ids {
        header.push("event_id");
    }
    header.extend(TABLE_COLUMNS);
    writer.write_record(&header).map_err(|e| Error::csv(path, e))?;

    for event in events {
        let mut row = Vec::with_capacity(header.len());
        if with_source_ids {
            row.push(event.source_id.clone().unwrap_or_default());
        }
        row.extend(table_row(event));
        writer.write_record(&row).map_err(|e| Error::csv(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))?;
    Ok(path.to_path_buf())
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelocSummary {
    pub events: usize,
    pub latitude: (f64, f64),
    pub longitude: (f64, f64),
    pub depth: (f64, f64),
    pub clusters: usize,
}

pub fn summarize(events: &[RelocatedEvent]) -> Option<RelocSummary> {
    if events.is_empty() {
        return None;
    }
    let range = |get: fn(&RelocatedEvent) -> f64| {
        events.iter().map(get).fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        })
    };
    let clusters: HashSet<i64> = events.iter().map(|e| e.cluster_id).collect();
    Some(RelocSummary {
        events: events.len(),
        latitude: range(|e| e.latitude),
        longitude: range(|e| e.longitude),
        depth: range(|e| e.depth),
        clusters: clusters.len(),
    })
}

pub fn log_summary(summary: &RelocSummary) {
    tracing::info!("Converted {} relocated events", summary.events);
    tracing::info!(
        "Latitude range:  {:.5} to {:.5}",
        summary.latitude.0,
        summary.latitude.1
    );
    tracing::info!(
        "Longitude range: {:.5} to {:.5}",
        summary.longitude.0,
        summary.longitude.1
    );
    tracing::info!(
        "Depth range:     {:.2} to {:.2} km",
        summary.depth.0,
        summary.depth.1
    );
    tracing::info!("Clusters:        {}", summary.clusters);
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "   100001   40.66270 -123.87430     5.123   -12.3    45.6   -7.8    10.1   11.2   12.3 2022 12 20 10 34 24.50  2.30   12    8    4    3  0.012  0.034     1";

    #[test]
    fn parses_a_full_line() {
        let event = parse_line(LINE).unwrap();
        assert_eq!(event.hypodd_id, 100_001);
        assert_eq!(event.latitude, 40.6627);
        assert_eq!(event.local_xyz, [-12.3, 45.6, -7.8]);
        assert_eq!(
            event.pick_counts,
            PickCounts {
                cc_p: 12,
                cc_s: 8,
                cat_p: 4,
                cat_s: 3
            }
        );
        assert_eq!(event.rms.cat, 0.034);
        assert_eq!(event.cluster_id, 1);
        assert_eq!(event.source_id, None);
        assert_eq!(format_origin_time(&event.origin_time), "2022-12-20T10:34:24.500Z");
    }

    #[test]
    fn short_lines_are_skipped_without_error() {
        let short = "100001 40.0 -120.0 5.0 0 0 0 0 0 0 2022 12 20 10 34 24.5 2.3 1 1 1 1 0.1 0.1";
        assert_eq!(short.split_whitespace().count(), 23);
        assert!(parse_line(short).is_none());

        let text = format!("{short}\n\n{LINE}\ngarbage\n");
        let outcome = parse(&text);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.skipped_lines, 2);
    }

    #[test]
    fn empty_input_is_an_empty_result() {
        let outcome = parse("only header text\n");
        assert!(outcome.is_empty());
        assert_eq!(outcome.skipped_lines, 1);
    }

    #[test]
    fn sixty_seconds_rolls_into_the_next_minute() {
        let clock = ClockFields {
            year: 2022,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 60.0,
        };
        let t = reconstruct_origin_time(&clock).unwrap();
        assert_eq!(format_origin_time(&t), "2023-01-01T00:00:00.000Z");
    }

    #[test]
    fn impossible_dates_are_malformed() {
        let bad = LINE.replace(" 2022 12 20 ", " 2022 13 20 ");
        assert!(parse_line(&bad).is_none());
    }

    #[test]
    fn unknown_ids_stay_unlabelled() {
        let registry = IdentifierRegistry::from_source_ids(["E1"]);
        let first = parse_line(LINE).unwrap();
        let second = RelocatedEvent {
            hypodd_id: 100_000,
            ..first.clone()
        };
        let mut events = vec![first, second];
        assert_eq!(attach_source_ids(&mut events, &registry), 1);
        assert_eq!(events[0].source_id, None);
        assert_eq!(events[1].source_id.as_deref(), Some("E1"));
    }

    #[test]
    fn table_puts_restored_id_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hypoDD_cc.csv");
        let mut event = parse_line(LINE).unwrap();
        event.source_id = Some("D1".to_string());
        write_table(&path, &[event.clone()], true).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("event_id,hypodd_id,latitude,"));
        assert!(header.ends_with(",cluster_id,origin_time"));
        assert!(lines.next().unwrap().starts_with("D1,100001,40.6627,"));

        write_table(&path, &[event], false).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("hypodd_id,latitude,"));
    }

    #[test]
    fn whole_floats_keep_their_decimal_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hypoDD.csv");
        let mut event = parse_line(LINE).unwrap();
        event.depth = 5.0;
        event.clock.second = 24.0;
        event.rms.cc = -9.0;
        write_table(&path, &[event], false).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let row: Vec<&str> = text.lines().nth(1).unwrap().split(',').collect();
        assert_eq!(row[3], "5.0");
        assert_eq!(row[15], "24.0");
        assert_eq!(row[16], "2.3");
        assert_eq!(row[21], "-9.0");
        assert_eq!(row[23], "1");
    }

    #[test]
    fn summary_reports_ranges_and_clusters() {
        let a = parse_line(LINE).unwrap();
        let mut b = a.clone();
        b.latitude = 40.7;
        b.depth = 7.5;
        b.cluster_id = 2;
        let summary = summarize(&[a, b]).unwrap();
        assert_eq!(summary.latitude, (40.6627, 40.7));
        assert_eq!(summary.depth, (5.123, 7.5));
        assert_eq!(summary.clusters, 2);
        assert!(summarize(&[]).is_none());
    }
}
