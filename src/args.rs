use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use crate::compare::DEFAULT_LARGE_DIFF_M;
use crate::control::DataSelection;
use crate::error::{Error, Result};
use crate::pipeline::{EngineBinaries, PrepareOptions, SourceTables, Strategy};
use crate::runfile::RunFile;

pub const DEFAULT_RUN_DIR: &str = "hypodd_run";

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Translate CSV picks and catalogs to HypoDD inputs and relocations back to CSV",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  hypodd_bridge prepare --picks picks.csv --catalog catalog.csv --stations stations.csv --run-dir run --min-cc 0.6\n  hypodd_bridge --runfile run.txt relocate --strategy both\n  hypodd_bridge convert run/cc/hypoDD.reloc --mapping run/cc/event_id_mapping.csv --output relocated.csv\n  hypodd_bridge convert --run-dir run\n  hypodd_bridge compare run/cc/hypoDD_cc.reloc run/lag/hypoDD_lag.reloc --label1 cc --label2 lag\n"
)]
pub struct Args {
    /// key = value run file; command-line flags override its entries
    #[arg(long, global = true)]
    pub runfile: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Write phase, cc, station, mapping and control files for a run
    Prepare(PrepareArgs),
    /// Convert a hypoDD.reloc file to CSV, restoring source event ids
    Convert(ConvertArgs),
    /// Write station.dat from a station table
    Stations(StationsArgs),
    /// Write ph2dt.inp and hypoDD.inp into a run directory
    Control(ControlArgs),
    /// Run ph2dt and hypoDD on prepared run directories and convert the result
    Relocate(RelocateArgs),
    /// Compare two relocation result files
    Compare(CompareArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    /// Raw travel times with dt.cc
    Cc,
    /// Lag-corrected travel times with catalog differential times
    Lag,
    /// Both, each in its own subdirectory
    Both,
}

impl StrategyArg {
    pub fn strategies(self) -> Vec<Strategy> {
        match self {
            StrategyArg::Cc => vec![Strategy::CrossCorrelation],
            StrategyArg::Lag => vec![Strategy::LagCorrected],
            StrategyArg::Both => vec![Strategy::CrossCorrelation, Strategy::LagCorrected],
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataArg {
    /// dt.cc only (IDAT=1)
    Cc,
    /// dt.ct only (IDAT=2)
    Catalog,
    /// dt.cc and dt.ct (IDAT=3)
    Both,
}

impl DataArg {
    pub fn selection(self) -> DataSelection {
        match self {
            DataArg::Cc => DataSelection::CrossCorrelation,
            DataArg::Catalog => DataSelection::Catalog,
            DataArg::Both => DataSelection::Both,
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct PrepareArgs {
    /// Pick table (CSV)
    #[arg(long)]
    pub picks: Option<PathBuf>,

    /// Catalog table (CSV)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Station table (CSV)
    #[arg(long)]
    pub stations: Option<PathBuf>,

    /// Output run directory
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    /// Which strategy to prepare (default: from lag_correction in the run file, else both)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Minimum correlation coefficient kept in dt.cc
    #[arg(long)]
    pub min_cc: Option<f64>,

    /// Use the loose ph2dt preset for sparse networks
    #[arg(long)]
    pub loose: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ConvertArgs {
    /// hypoDD.reloc file (default: every *.reloc under the run directory)
    pub reloc: Option<PathBuf>,

    /// Run directory scanned when no file is given
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    /// Event id mapping written by `prepare`
    #[arg(long)]
    pub mapping: Option<PathBuf>,

    /// Output CSV (default: <reloc>.csv next to the input)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct StationsArgs {
    /// Station table (CSV)
    #[arg(long)]
    pub stations: Option<PathBuf>,

    /// Output station.dat
    #[arg(long, default_value = "station.dat")]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ControlArgs {
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = StrategyArg::Both)]
    pub strategy: StrategyArg,

    /// Differential data for hypoDD.inp (default: the strategy's own)
    #[arg(long, value_enum)]
    pub data: Option<DataArg>,

    #[arg(long)]
    pub loose: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RelocateArgs {
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = StrategyArg::Both)]
    pub strategy: StrategyArg,

    /// ph2dt executable
    #[arg(long)]
    pub ph2dt: Option<PathBuf>,

    /// hypoDD executable
    #[arg(long)]
    pub hypodd: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CompareArgs {
    pub first: PathBuf,
    pub second: PathBuf,

    #[arg(long, default_value = "Method 1")]
    pub label1: String,

    #[arg(long, default_value = "Method 2")]
    pub label2: String,

    /// Event id mapping used to label large differences
    #[arg(long)]
    pub mapping: Option<PathBuf>,

    /// 3D difference (m) above which an event is listed
    #[arg(long, default_value_t = DEFAULT_LARGE_DIFF_M)]
    pub threshold: f64,
}

fn required(cli: Option<&PathBuf>, file: Option<&PathBuf>, name: &'static str) -> Result<PathBuf> {
    cli.or(file).cloned().ok_or(Error::MissingSetting(name))
}

pub fn run_dir(cli: Option<&PathBuf>, rf: &RunFile) -> PathBuf {
    cli.or(rf.run_dir.as_ref())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RUN_DIR))
}

impl PrepareArgs {
    pub fn tables(&self, rf: &RunFile) -> Result<SourceTables> {
        Ok(SourceTables {
            picks: required(self.picks.as_ref(), rf.picks.as_ref(), "picks")?,
            catalog: required(self.catalog.as_ref(), rf.catalog.as_ref(), "catalog")?,
            stations: self.stations.clone().or_else(|| rf.stations.clone()),
        })
    }

    pub fn options(&self, rf: &RunFile) -> PrepareOptions {
        PrepareOptions {
            min_cc: self.min_cc.or(rf.min_cc),
            loose_ph2dt: self.loose || rf.loose_ph2dt.unwrap_or(false),
        }
    }

    pub fn strategy(&self, rf: &RunFile) -> StrategyArg {
        self.strategy.unwrap_or(match rf.lag_correction {
            Some(true) => StrategyArg::Lag,
            Some(false) => StrategyArg::Cc,
            None => StrategyArg::Both,
        })
    }
}

impl ConvertArgs {
    pub fn output_path(&self, reloc: &Path) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| reloc.with_extension("csv"))
    }
}

impl ControlArgs {
    pub fn data_for(&self, strategy: Strategy) -> DataSelection {
        self.data
            .map_or_else(|| strategy.data_selection(), DataArg::selection)
    }
}

impl StationsArgs {
    pub fn input(&self, rf: &RunFile) -> Result<PathBuf> {
        required(self.stations.as_ref(), rf.stations.as_ref(), "stations")
    }
}

impl RelocateArgs {
    pub fn binaries(&self, rf: &RunFile) -> EngineBinaries {
        let defaults = EngineBinaries::default();
        EngineBinaries {
            ph2dt: self
                .ph2dt
                .clone()
                .or_else(|| rf.ph2dt_bin.clone())
                .unwrap_or(defaults.ph2dt),
            hypodd: self
                .hypodd
                .clone()
                .or_else(|| rf.hypodd_bin.clone())
                .unwrap_or(defaults.hypodd),
        }
    }
}

/// Subdirectory per strategy when more than one runs, the run dir itself
/// otherwise.
pub fn strategy_root(base: &Path, choice: StrategyArg, strategy: Strategy) -> PathBuf {
    match choice {
        StrategyArg::Both => base.join(strategy.name()),
        _ => base.to_path_buf(),
    }
}
