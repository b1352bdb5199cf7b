//! End-to-end steps over an explicit run directory.
//!
//! Every strategy owns its own [`RunLayout`], so the engine always finds its
//! inputs under the fixed names it expects and two strategies never share or
//! swap files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::CatalogIndex;
use crate::cc::{build_pairs, write_cc_file, CcFilter};
use crate::control::{write_control, DataSelection, HypoddControl, Ph2dtControl};
use crate::engine::EngineCommand;
use crate::error::{Error, Result};
use crate::pha::{encode_events, write_phase_file, LocationSource, PhaseEncodeConfig};
use crate::records::{load_picks, load_stations};
use crate::registry::IdentifierRegistry;
use crate::reloc::{
    attach_source_ids, log_summary, read_reloc_file, summarize, write_table, RelocatedEvent,
};
use crate::station::write_station_file;

pub const PHASE_FILE: &str = "detections.pha";
pub const CC_FILE: &str = "dt.cc";
pub const STATION_FILE: &str = "station.dat";
pub const MAPPING_FILE: &str = "event_id_mapping.csv";
pub const PH2DT_CONTROL: &str = "ph2dt.inp";
pub const HYPODD_CONTROL: &str = "hypoDD.inp";
pub const RELOC_FILE: &str = "hypoDD.reloc";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunLayout {
    pub root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn for_strategy(base: &Path, strategy: Strategy) -> Self {
        Self::new(base.join(strategy.name()))
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.root, e))
    }

    pub fn phase_file(&self) -> PathBuf {
        self.root.join(PHASE_FILE)
    }

    pub fn cc_file(&self) -> PathBuf {
        self.root.join(CC_FILE)
    }

    pub fn station_file(&self) -> PathBuf {
        self.root.join(STATION_FILE)
    }

    pub fn mapping_file(&self) -> PathBuf {
        self.root.join(MAPPING_FILE)
    }

    pub fn ph2dt_control(&self) -> PathBuf {
        self.root.join(PH2DT_CONTROL)
    }

    pub fn hypodd_control(&self) -> PathBuf {
        self.root.join(HYPODD_CONTROL)
    }

    pub fn reloc_file(&self) -> PathBuf {
        self.root.join(RELOC_FILE)
    }

    /// Copy of the engine result that survives a rerun of another strategy.
    pub fn strategy_reloc_file(&self, strategy: Strategy) -> PathBuf {
        self.root.join(format!("hypoDD_{}.reloc", strategy.name()))
    }
}

/// How the relocation uses the correlation measurements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Raw travel times; differential times from dt.cc only.
    CrossCorrelation,
    /// Travel times shifted by their lag; catalog differential times only.
    LagCorrected,
}

impl Strategy {
    pub fn name(self) -> &'static str {
        match self {
            Strategy::CrossCorrelation => "cc",
            Strategy::LagCorrected => "lag",
        }
    }

    pub fn phase_config(self) -> PhaseEncodeConfig {
        PhaseEncodeConfig {
            lag_correction: self == Strategy::LagCorrected,
        }
    }

    pub fn data_selection(self) -> DataSelection {
        match self {
            Strategy::CrossCorrelation => DataSelection::CrossCorrelation,
            Strategy::LagCorrected => DataSelection::Catalog,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceTables {
    pub picks: PathBuf,
    pub catalog: PathBuf,
    pub stations: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PrepareOptions {
    pub min_cc: Option<f64>,
    pub loose_ph2dt: bool,
}

#[derive(Clone, Debug)]
pub struct PrepareReport {
    pub layout: RunLayout,
    pub strategy: Strategy,
    pub events: usize,
    pub own_catalog: usize,
    pub inherited: usize,
    pub unresolved: usize,
    pub pairs: usize,
}

impl PrepareReport {
    pub fn log(&self) {
        tracing::info!(
            "[{}] {} events ({} catalog, {} inherited, {} unresolved), {} cc pairs in {}",
            self.strategy.name(),
            self.events,
            self.own_catalog,
            self.inherited,
            self.unresolved,
            self.pairs,
            self.layout.root.display()
        );
    }
}

/// ph2dt.inp and hypoDD.inp naming the layout's files.
pub fn write_control_files(layout: &RunLayout, data: DataSelection, loose: bool) -> Result<()> {
    layout.ensure()?;
    let mut ph2dt = Ph2dtControl::new(STATION_FILE, PHASE_FILE);
    if loose {
        ph2dt = ph2dt.loose();
    }
    write_control(&layout.ph2dt_control(), &ph2dt.render())?;
    let mut hypodd = HypoddControl::new(data);
    hypodd.cc_file = CC_FILE.to_string();
    hypodd.station_file = STATION_FILE.to_string();
    write_control(&layout.hypodd_control(), &hypodd.render())?;
    Ok(())
}

/// Writes every engine input for one strategy into `layout`.
pub fn prepare(
    tables: &SourceTables,
    layout: &RunLayout,
    strategy: Strategy,
    options: &PrepareOptions,
) -> Result<PrepareReport> {
    layout.ensure()?;
    let picks = load_picks(&tables.picks)?;
    let catalog = CatalogIndex::load(&tables.catalog)?;
    if catalog.is_empty() {
        tracing::warn!(
            "Catalog {} has no entries; every event starts from zero",
            tables.catalog.display()
        );
    }

    let registry = IdentifierRegistry::from_source_ids(picks.iter().map(|p| p.event_id.as_str()));
    registry.save(&layout.mapping_file())?;

    let events = encode_events(&picks, &catalog, &registry, &strategy.phase_config())?;
    write_phase_file(&layout.phase_file(), &events)?;
    for event in events
        .iter()
        .filter(|e| e.location_source == LocationSource::Unresolved)
    {
        tracing::warn!(
            "No catalog location for {} or its template; starting from zero",
            event.source_id
        );
    }

    let filter = options
        .min_cc
        .map_or_else(CcFilter::default, CcFilter::with_min_cc);
    let pairs = build_pairs(&picks, &registry, &filter);
    write_cc_file(&layout.cc_file(), &pairs)?;

    match &tables.stations {
        Some(path) => {
            write_station_file(&layout.station_file(), &load_stations(path)?)?;
        }
        None => tracing::warn!(
            "No station table given; {} must be provided before running ph2dt",
            layout.station_file().display()
        ),
    }

    write_control_files(layout, strategy.data_selection(), options.loose_ph2dt)?;

    let count = |want: fn(&LocationSource) -> bool| {
        events.iter().filter(|e| want(&e.location_source)).count()
    };
    let report = PrepareReport {
        layout: layout.clone(),
        strategy,
        events: events.len(),
        own_catalog: count(|s| matches!(s, LocationSource::OwnCatalog)),
        inherited: count(|s| matches!(s, LocationSource::InheritedFromTemplate(_))),
        unresolved: count(|s| matches!(s, LocationSource::Unresolved)),
        pairs: pairs.len(),
    };
    report.log();
    Ok(report)
}

/// Prepares both strategies side by side under `base/cc` and `base/lag`.
pub fn prepare_both(
    tables: &SourceTables,
    base: &Path,
    options: &PrepareOptions,
) -> Result<(PrepareReport, PrepareReport)> {
    let cc_layout = RunLayout::for_strategy(base, Strategy::CrossCorrelation);
    let lag_layout = RunLayout::for_strategy(base, Strategy::LagCorrected);
    let (cc, lag) = rayon::join(
        || prepare(tables, &cc_layout, Strategy::CrossCorrelation, options),
        || prepare(tables, &lag_layout, Strategy::LagCorrected, options),
    );
    Ok((cc?, lag?))
}

#[derive(Clone, Debug)]
pub struct ConvertReport {
    pub output: PathBuf,
    pub events: usize,
    pub skipped_lines: usize,
    pub unlabelled: usize,
    pub labelled: bool,
}

impl ConvertReport {
    pub fn log(&self) {
        tracing::info!(
            "Saved {} relocated events to {}",
            self.events,
            self.output.display()
        );
        if self.skipped_lines > 0 {
            tracing::warn!("{} malformed result lines were skipped", self.skipped_lines);
        }
        if !self.labelled {
            tracing::info!("No usable id mapping; output keeps hypodd ids only");
        } else if self.unlabelled > 0 {
            tracing::warn!(
                "{} of {} events written without a source id",
                self.unlabelled,
                self.events
            );
        }
    }
}

/// Loads the id mapping, or `None` with a warning when it cannot be read.
pub fn try_load_registry(path: &Path) -> Option<IdentifierRegistry> {
    match IdentifierRegistry::load(path) {
        Ok(registry) => {
            if registry.is_empty() {
                tracing::warn!("Id mapping {} holds no usable rows", path.display());
            }
            Some(registry)
        }
        Err(err) => {
            tracing::warn!("Could not load id mapping ({err}); writing hypodd ids only");
            None
        }
    }
}

/// Decodes a relocation result file into the output table. A missing or
/// unreadable mapping only drops the `event_id` column.
pub fn convert(reloc: &Path, mapping: Option<&Path>, output: &Path) -> Result<ConvertReport> {
    let mut outcome = read_reloc_file(reloc)?;

    let registry = mapping.and_then(try_load_registry);
    let unlabelled = match &registry {
        Some(registry) => attach_source_ids(&mut outcome.events, registry),
        None => 0,
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    write_table(output, &outcome.events, registry.is_some())?;
    if let Some(summary) = summarize(&outcome.events) {
        log_summary(&summary);
    }

    Ok(ConvertReport {
        output: output.to_path_buf(),
        events: outcome.events.len(),
        skipped_lines: outcome.skipped_lines,
        unlabelled,
        labelled: registry.is_some(),
    })
}

/// Result files directly in `dir`, sorted by name.
pub fn find_reloc_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "reloc") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Converts every `*.reloc` in a run directory and in its per-strategy
/// subdirectories. Each CSV lands next to its source file; each directory
/// uses its own mapping unless `mapping` is given.
pub fn convert_run_dir(base: &Path, mapping: Option<&Path>) -> Result<Vec<ConvertReport>> {
    let dirs = [
        base.to_path_buf(),
        RunLayout::for_strategy(base, Strategy::CrossCorrelation).root,
        RunLayout::for_strategy(base, Strategy::LagCorrected).root,
    ];
    let mut reports = Vec::new();
    for dir in dirs.iter().filter(|d| d.is_dir()) {
        let own_mapping = RunLayout::new(dir).mapping_file();
        let mapping = mapping.unwrap_or(own_mapping.as_path());
        for reloc in find_reloc_files(dir)? {
            reports.push(convert(&reloc, Some(mapping), &reloc.with_extension("csv"))?);
        }
    }
    if reports.is_empty() {
        tracing::warn!("No .reloc files found in {}", base.display());
    }
    Ok(reports)
}

/// Reads two result files for comparison. The first set gets source ids when
/// the mapping loads; otherwise events are reported by hypodd id.
pub fn load_for_comparison(
    first: &Path,
    second: &Path,
    mapping: Option<&Path>,
) -> Result<(Vec<RelocatedEvent>, Vec<RelocatedEvent>)> {
    let mut a = read_reloc_file(first)?.events;
    let b = read_reloc_file(second)?.events;
    if let Some(registry) = mapping.and_then(try_load_registry) {
        attach_source_ids(&mut a, &registry);
    }
    Ok((a, b))
}

#[derive(Clone, Debug)]
pub struct EngineBinaries {
    pub ph2dt: PathBuf,
    pub hypodd: PathBuf,
}

impl Default for EngineBinaries {
    fn default() -> Self {
        Self {
            ph2dt: PathBuf::from("ph2dt"),
            hypodd: PathBuf::from("hypoDD"),
        }
    }
}

/// Runs ph2dt then hypoDD in the layout, keeps a strategy-named copy of the
/// result and converts it. Any engine failure stops before decoding.
pub fn relocate(
    layout: &RunLayout,
    strategy: Strategy,
    binaries: &EngineBinaries,
) -> Result<ConvertReport> {
    EngineCommand::new(&binaries.ph2dt, PH2DT_CONTROL, &layout.root).run()?;
    EngineCommand::new(&binaries.hypodd, HYPODD_CONTROL, &layout.root).run()?;

    let reloc = layout.reloc_file();
    let kept = layout.strategy_reloc_file(strategy);
    fs::copy(&reloc, &kept).map_err(|e| Error::io(&reloc, e))?;
    tracing::info!("Saved results to {}", kept.display());

    let output = layout
        .root
        .join(format!("relocated_events_{}.csv", strategy.name()));
    convert(&kept, Some(&layout.mapping_file()), &output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    const PICKS: &str = "\
event_id,template_id,station,travel_time_p,travel_time_s,lag_time_p,lag_time_s,cc_p,cc_s,origin_time
E1,E1,STA1,2.0,3.5,,,,,2022-12-20T10:34:20Z
E1,E1,STA2,2.5,4.1,,,,,2022-12-20T10:34:20Z
D1,E1,STA1,2.0,3.5,0.05,-0.02,0.85,0.7,2022-12-20T10:34:24.5Z
D1,E1,STA2,2.5,,0.01,,0.55,,2022-12-20T10:34:24.5Z
D2,E9,STA1,1.8,,,,,,2022-12-21T01:00:00Z
";

    const CATALOG: &str = "\
event_id,lat,lon,depth_km,mag,eh,ez
E1,40.0,-120.0,5.0,2.1,0.3,0.6
";

    const STATIONS: &str = "\
station,latitude,longitude,elevation
STA1,40.1,-120.1,100
STA2,39.9,-119.9,250
";

    fn tables(dir: &Path) -> SourceTables {
        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            fs::write(&path, body).unwrap();
            path
        };
        SourceTables {
            picks: write("picks.csv", PICKS),
            catalog: write("catalog.csv", CATALOG),
            stations: Some(write("stations.csv", STATIONS)),
        }
    }

    fn options() -> PrepareOptions {
        PrepareOptions {
            min_cc: Some(0.6),
            loose_ph2dt: false,
        }
    }

    #[test]
    fn prepares_an_isolated_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let tables = tables(dir.path());
        let layout = RunLayout::new(dir.path().join("run"));

        let report = prepare(&tables, &layout, Strategy::CrossCorrelation, &options()).unwrap();
        assert_eq!(report.events, 3);
        assert_eq!(report.own_catalog, 1);
        assert_eq!(report.inherited, 1);
        assert_eq!(report.unresolved, 1);
        assert_eq!(report.pairs, 1);

        for path in [
            layout.phase_file(),
            layout.cc_file(),
            layout.station_file(),
            layout.mapping_file(),
            layout.ph2dt_control(),
            layout.hypodd_control(),
        ] {
            assert!(path.exists(), "{} missing", path.display());
        }

        let cc = fs::read_to_string(layout.cc_file()).unwrap();
        assert_eq!(
            cc,
            "#    100001    100000 0.000000\n\
             STA1     0.050000 0.850 P\n\
             STA1    -0.020000 0.700 S\n"
        );

        let pha = fs::read_to_string(layout.phase_file()).unwrap();
        assert!(pha.contains("STA1       2.000  0.850 P"));
        // E9 is missing from the catalog.
        assert!(pha.contains(" 0.00   0.0000    0.0000    0.00  0.00  0.00  0.00  0.00     100002"));
    }

    #[test]
    fn strategies_prepare_into_separate_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let tables = tables(dir.path());
        let base = dir.path().join("runs");

        let (cc, lag) = prepare_both(&tables, &base, &options()).unwrap();
        assert_eq!(cc.layout.root, base.join("cc"));
        assert_eq!(lag.layout.root, base.join("lag"));

        let raw = fs::read_to_string(cc.layout.phase_file()).unwrap();
        let corrected = fs::read_to_string(lag.layout.phase_file()).unwrap();
        assert!(raw.contains("STA1       2.000  0.850 P"));
        assert!(corrected.contains("STA1       2.050  0.850 P"));
        // Anchor rows are identical in both files.
        assert!(corrected.contains("STA1       2.000  1.000 P"));

        let cc_inp = fs::read_to_string(cc.layout.hypodd_control()).unwrap();
        let lag_inp = fs::read_to_string(lag.layout.hypodd_control()).unwrap();
        assert!(cc_inp.contains("\n1 3 1\n"));
        assert!(lag_inp.contains("\n2 3 1\n"));
    }

    #[test]
    fn encode_then_decode_restores_source_ids() {
        let dir = tempfile::tempdir().unwrap();
        let tables = tables(dir.path());
        let layout = RunLayout::new(dir.path().join("run"));
        prepare(&tables, &layout, Strategy::CrossCorrelation, &options()).unwrap();

        let registry = IdentifierRegistry::load(&layout.mapping_file()).unwrap();
        let mut reloc = String::new();
        for (source, id) in registry.iter() {
            assert!(!source.is_empty());
            writeln!(
                reloc,
                "{id:>9} 40.01000 -120.01000 5.100 1.0 2.0 3.0 10.0 10.0 20.0 2022 12 20 10 34 60.00 0.00 3 2 0 0 0.010 -9.000 1"
            )
            .unwrap();
        }
        reloc.push_str("garbage line\n");
        fs::write(layout.reloc_file(), reloc).unwrap();

        let output = layout.root.join("relocated.csv");
        let report = convert(&layout.reloc_file(), Some(&layout.mapping_file()), &output).unwrap();
        assert_eq!(report.events, 3);
        assert_eq!(report.skipped_lines, 1);
        assert_eq!(report.unlabelled, 0);

        let mut reader = csv::Reader::from_path(&output).unwrap();
        assert_eq!(&reader.headers().unwrap()[0], "event_id");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        let ids: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
        assert_eq!(ids, ["E1", "D1", "D2"]);
        assert_eq!(&rows[0][25], "2022-12-20T10:35:00.000Z");
    }

    #[test]
    fn missing_mapping_drops_the_label_column() {
        let dir = tempfile::tempdir().unwrap();
        let reloc = dir.path().join("hypoDD.reloc");
        fs::write(
            &reloc,
            "100000 40.0 -120.0 5.0 0 0 0 1 1 1 2022 12 20 10 34 24.50 0.0 3 2 0 0 0.01 -9 1\n",
        )
        .unwrap();
        let output = dir.path().join("out.csv");

        let report = convert(&reloc, Some(&dir.path().join("absent.csv")), &output).unwrap();
        assert!(!report.labelled);
        let mut reader = csv::Reader::from_path(&output).unwrap();
        assert_eq!(&reader.headers().unwrap()[0], "hypodd_id");
    }

    const RELOC_LINE: &str =
        "100000 40.0 -120.0 5.0 0 0 0 1 1 1 2022 12 20 10 34 24.50 0.0 3 2 0 0 0.01 -9 1\n";

    #[test]
    fn out_of_range_mapping_row_does_not_abort_convert() {
        let dir = tempfile::tempdir().unwrap();
        let reloc = dir.path().join("hypoDD.reloc");
        fs::write(&reloc, RELOC_LINE).unwrap();
        let mapping = dir.path().join("event_id_mapping.csv");
        fs::write(&mapping, "original_id,synthetic_id\nE1,18446744073709551615\n").unwrap();
        let output = dir.path().join("out.csv");

        let report = convert(&reloc, Some(&mapping), &output).unwrap();
        assert!(report.labelled);
        assert_eq!(report.events, 1);
        assert_eq!(report.unlabelled, 1);
    }

    #[test]
    fn comparison_tolerates_an_unreadable_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("hypoDD_cc.reloc");
        let second = dir.path().join("hypoDD_lag.reloc");
        fs::write(&first, RELOC_LINE).unwrap();
        fs::write(&second, RELOC_LINE).unwrap();
        let mapping = dir.path().join("event_id_mapping.csv");
        fs::write(&mapping, "original_id,synthetic_id\nE1,100000,extra\n").unwrap();

        let (a, b) = load_for_comparison(&first, &second, Some(&mapping)).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].source_id, None);

        let (a, _) =
            load_for_comparison(&first, &second, Some(&dir.path().join("absent.csv"))).unwrap();
        assert_eq!(a[0].source_id, None);
    }

    #[test]
    fn run_dir_conversion_covers_every_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("runs");
        for strategy in [Strategy::CrossCorrelation, Strategy::LagCorrected] {
            let layout = RunLayout::for_strategy(&base, strategy);
            layout.ensure().unwrap();
            IdentifierRegistry::from_source_ids([strategy.name()])
                .save(&layout.mapping_file())
                .unwrap();
            fs::write(layout.strategy_reloc_file(strategy), RELOC_LINE).unwrap();
        }
        fs::write(base.join("notes.txt"), "not a result").unwrap();

        let reports = convert_run_dir(&base, None).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.labelled && r.unlabelled == 0));

        for (sub, name, id) in [("cc", "hypoDD_cc.csv", "cc"), ("lag", "hypoDD_lag.csv", "lag")] {
            let mut reader = csv::Reader::from_path(base.join(sub).join(name)).unwrap();
            let row = reader.records().next().unwrap().unwrap();
            assert_eq!(&row[0], id);
        }
    }

    #[test]
    fn empty_run_dir_converts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(convert_run_dir(dir.path(), None).unwrap().is_empty());
    }

    #[test]
    fn control_files_can_request_both_data_sets() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(dir.path().join("run"));
        write_control_files(&layout, DataSelection::Both, false).unwrap();
        let text = fs::read_to_string(layout.hypodd_control()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[3], "dt.cc");
        assert_eq!(lines[5], "dt.ct");
        assert!(text.contains("\n3 3 1\n"));
    }

    #[test]
    fn layout_names_are_fixed() {
        let layout = RunLayout::for_strategy(Path::new("/tmp/runs"), Strategy::LagCorrected);
        assert_eq!(layout.cc_file(), PathBuf::from("/tmp/runs/lag/dt.cc"));
        assert_eq!(
            layout.mapping_file(),
            PathBuf::from("/tmp/runs/lag/event_id_mapping.csv")
        );
    }
}
