mod args;
mod catalog;
mod cc;
mod compare;
mod control;
mod engine;
mod error;
mod logging;
mod pha;
mod pipeline;
mod records;
mod registry;
mod reloc;
mod runfile;
mod station;

use std::path::Path;

use clap::{CommandFactory, Parser};

use args::{
    run_dir, strategy_root, Args, Commands, CompareArgs, ControlArgs, ConvertArgs, PrepareArgs,
    RelocateArgs, StationsArgs, StrategyArg,
};
use error::DynError;
use pipeline::RunLayout;
use runfile::RunFile;

fn run_prepare(cmd: &PrepareArgs, rf: &RunFile) -> Result<(), DynError> {
    let tables = cmd.tables(rf)?;
    let options = cmd.options(rf);
    let base = run_dir(cmd.run_dir.as_ref(), rf);
    match cmd.strategy(rf) {
        StrategyArg::Both => {
            pipeline::prepare_both(&tables, &base, &options)?;
        }
        choice => {
            for strategy in choice.strategies() {
                pipeline::prepare(&tables, &RunLayout::new(&base), strategy, &options)?;
            }
        }
    }
    Ok(())
}

fn run_convert(cmd: &ConvertArgs, rf: &RunFile) -> Result<(), DynError> {
    let mapping = cmd.mapping.as_ref().or(rf.mapping.as_ref());
    let mapping = mapping.map(|p| p.as_path());
    match &cmd.reloc {
        Some(reloc) => pipeline::convert(reloc, mapping, &cmd.output_path(reloc))?.log(),
        None => {
            if cmd.output.is_some() {
                tracing::warn!("--output applies to a single file; writing CSVs next to each .reloc");
            }
            let base = run_dir(cmd.run_dir.as_ref(), rf);
            for report in pipeline::convert_run_dir(&base, mapping)? {
                report.log();
            }
        }
    }
    Ok(())
}

fn run_stations(cmd: &StationsArgs, rf: &RunFile) -> Result<(), DynError> {
    let stations = records::load_stations(&cmd.input(rf)?)?;
    station::write_station_file(&cmd.output, &stations)?;
    Ok(())
}

fn run_control(cmd: &ControlArgs, rf: &RunFile) -> Result<(), DynError> {
    let base = run_dir(cmd.run_dir.as_ref(), rf);
    let loose = cmd.loose || rf.loose_ph2dt.unwrap_or(false);
    for strategy in cmd.strategy.strategies() {
        let layout = RunLayout::new(strategy_root(&base, cmd.strategy, strategy));
        pipeline::write_control_files(&layout, cmd.data_for(strategy), loose)?;
    }
    Ok(())
}

fn run_relocate(cmd: &RelocateArgs, rf: &RunFile) -> Result<(), DynError> {
    let base = run_dir(cmd.run_dir.as_ref(), rf);
    let binaries = cmd.binaries(rf);
    let mut kept = Vec::new();
    for strategy in cmd.strategy.strategies() {
        let layout = RunLayout::new(strategy_root(&base, cmd.strategy, strategy));
        tracing::info!("[{}] relocating in {}", strategy.name(), layout.root.display());
        pipeline::relocate(&layout, strategy, &binaries)?.log();
        kept.push((strategy, layout));
    }

    if let [(s1, l1), (s2, l2)] = kept.as_slice() {
        compare_files(
            &l1.strategy_reloc_file(*s1),
            &l2.strategy_reloc_file(*s2),
            s1.name(),
            s2.name(),
            Some(l1.mapping_file().as_path()),
            compare::DEFAULT_LARGE_DIFF_M,
        )?;
    }
    Ok(())
}

fn compare_files(
    first: &Path,
    second: &Path,
    label1: &str,
    label2: &str,
    mapping: Option<&Path>,
    threshold_m: f64,
) -> Result<(), DynError> {
    let (a, b) = pipeline::load_for_comparison(first, second, mapping)?;
    let Some(comparison) = compare::compare(&a, &b) else {
        return Err(format!(
            "no common events in {} and {}",
            first.display(),
            second.display()
        )
        .into());
    };
    compare::log_comparison(label1, label2, &comparison, threshold_m);
    Ok(())
}

fn run_compare(cmd: &CompareArgs, rf: &RunFile) -> Result<(), DynError> {
    let mapping = cmd.mapping.as_ref().or(rf.mapping.as_ref());
    compare_files(
        &cmd.first,
        &cmd.second,
        &cmd.label1,
        &cmd.label2,
        mapping.map(|p| p.as_path()),
        cmd.threshold,
    )
}

fn main() -> Result<(), DynError> {
    if std::env::args_os().len() == 1 {
        Args::command().print_help()?;
        println!();
        return Ok(());
    }

    let args = Args::parse();
    logging::init_logging(args.debug);

    let rf = match &args.runfile {
        Some(path) => runfile::parse_runfile(path)?,
        None => RunFile::default(),
    };
    tracing::debug!("run file settings: {rf:?}");

    match &args.command {
        Commands::Prepare(cmd) => run_prepare(cmd, &rf),
        Commands::Convert(cmd) => run_convert(cmd, &rf),
        Commands::Stations(cmd) => run_stations(cmd, &rf),
        Commands::Control(cmd) => run_control(cmd, &rf),
        Commands::Relocate(cmd) => run_relocate(cmd, &rf),
        Commands::Compare(cmd) => run_compare(cmd, &rf),
    }
}
