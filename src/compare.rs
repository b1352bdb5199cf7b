//! Location differences between two relocation runs of the same events.

use std::collections::HashMap;

use crate::reloc::RelocatedEvent;

/// Metres per degree of latitude (flat-earth approximation).
pub const METERS_PER_DEGREE: f64 = 111_000.0;
pub const DEFAULT_LARGE_DIFF_M: f64 = 10.0;

#[derive(Clone, Debug, PartialEq)]
pub struct EventDiff {
    pub hypodd_id: u64,
    pub source_id: Option<String>,
    pub dlat_m: f64,
    pub dlon_m: f64,
    pub ddepth_m: f64,
}

impl EventDiff {
    pub fn horizontal_m(&self) -> f64 {
        self.dlat_m.hypot(self.dlon_m)
    }

    pub fn total_m(&self) -> f64 {
        (self.dlat_m * self.dlat_m + self.dlon_m * self.dlon_m + self.ddepth_m * self.ddepth_m)
            .sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stats {
    pub mean: f64,
    pub median: f64,
    pub max: f64,
    pub min: f64,
}

impl Stats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
        };
        Some(Self {
            mean: sorted.iter().sum::<f64>() / n as f64,
            median,
            max: sorted[n - 1],
            min: sorted[0],
        })
    }
}

#[derive(Clone, Debug)]
pub struct Comparison {
    pub diffs: Vec<EventDiff>,
    pub horizontal: Stats,
    pub depth: Stats,
    pub total: Stats,
}

impl Comparison {
    pub fn exceeding(&self, threshold_m: f64) -> impl Iterator<Item = &EventDiff> + '_ {
        self.diffs.iter().filter(move |d| d.total_m() > threshold_m)
    }
}

/// Joins both runs on `hypodd_id` in the order of `first`. Returns `None`
/// when the runs have no event in common.
pub fn compare(first: &[RelocatedEvent], second: &[RelocatedEvent]) -> Option<Comparison> {
    let by_id: HashMap<u64, &RelocatedEvent> = second.iter().map(|e| (e.hypodd_id, e)).collect();

    let diffs: Vec<EventDiff> = first
        .iter()
        .filter_map(|a| {
            let b = by_id.get(&a.hypodd_id)?;
            Some(EventDiff {
                hypodd_id: a.hypodd_id,
                source_id: a.source_id.clone().or_else(|| b.source_id.clone()),
                dlat_m: (b.latitude - a.latitude) * METERS_PER_DEGREE,
                dlon_m: (b.longitude - a.longitude) * METERS_PER_DEGREE * a.latitude.to_radians().cos(),
                ddepth_m: (b.depth - a.depth) * 1000.0,
            })
        })
        .collect();

    let horizontal: Vec<f64> = diffs.iter().map(EventDiff::horizontal_m).collect();
    let depth: Vec<f64> = diffs.iter().map(|d| d.ddepth_m).collect();
    let total: Vec<f64> = diffs.iter().map(EventDiff::total_m).collect();

    Some(Comparison {
        horizontal: Stats::from_values(&horizontal)?,
        depth: Stats::from_values(&depth)?,
        total: Stats::from_values(&total)?,
        diffs,
    })
}

fn log_stats(label: &str, stats: &Stats) {
    tracing::info!(
        "{label} differences (m): mean {:8.3} median {:8.3} max {:8.3} min {:8.3}",
        stats.mean,
        stats.median,
        stats.max,
        stats.min
    );
}

pub fn log_comparison(label1: &str, label2: &str, cmp: &Comparison, threshold_m: f64) {
    tracing::info!("Comparing relocations: {label1} vs {label2}");
    tracing::info!("Number of relocated events compared: {}", cmp.diffs.len());
    log_stats("Horizontal", &cmp.horizontal);
    log_stats("Depth", &cmp.depth);
    log_stats("3D", &cmp.total);

    let large: Vec<&EventDiff> = cmp.exceeding(threshold_m).collect();
    if large.is_empty() {
        tracing::info!("All events agree within {threshold_m} m");
        return;
    }
    tracing::warn!("{} events with 3D difference > {threshold_m} m", large.len());
    for diff in large {
        let label = diff
            .source_id
            .clone()
            .unwrap_or_else(|| diff.hypodd_id.to_string());
        tracing::warn!("  event {label}: {:.2} m", diff.total_m());
    }
}
