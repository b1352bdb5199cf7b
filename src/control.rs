//! Control files for `ph2dt` and `hypoDD`.
//!
//! Both programs read free-form numeric parameter lines interleaved with `*`
//! comment lines; only the parameter lines are positional.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Ph2dtControl {
    pub station_file: String,
    pub phase_file: String,
    pub min_weight: f64,
    pub max_dist_km: f64,
    pub max_sep_km: f64,
    pub max_neighbors: u32,
    pub min_links: u32,
    pub min_obs: u32,
    pub max_obs: u32,
}

impl Ph2dtControl {
    pub fn new(station_file: impl Into<String>, phase_file: impl Into<String>) -> Self {
        Self {
            station_file: station_file.into(),
            phase_file: phase_file.into(),
            min_weight: 0.0,
            max_dist_km: 200.0,
            max_sep_km: 10.0,
            max_neighbors: 10,
            min_links: 8,
            min_obs: 8,
            max_obs: 20,
        }
    }

    /// Wider search for sparse networks.
    pub fn loose(mut self) -> Self {
        self.max_dist_km = 500.0;
        self.max_sep_km = 15.0;
        self.min_links = 4;
        self.min_obs = 4;
        self
    }

    pub fn render(&self) -> String {
        format!(
            "* ph2dt.inp - input control file for program ph2dt
* Input station file:
{station}
* Input phase file:
{phase}
*MINWGHT: min. pick weight allowed [0]
*MAXDIST: max. distance in km between event pair and stations [200]
*MAXSEP: max. hypocentral separation in km [10]
*MAXNGH: max. number of neighbors per event [10]
*MINLNK: min. number of links required to define a neighbor [8]
*MINOBS: min. number of links per pair saved [8]
*MAXOBS: max. number of links per pair saved [20]
*MINWGHT MAXDIST MAXSEP MAXNGH MINLNK MINOBS MAXOBS
{:8.0} {:8.1} {:8.1} {:5} {:6} {:6} {:6}
",
            self.min_weight,
            self.max_dist_km,
            self.max_sep_km,
            self.max_neighbors,
            self.min_links,
            self.min_obs,
            self.max_obs,
            station = self.station_file,
            phase = self.phase_file,
        )
    }
}

/// Which differential-time data sets the relocation uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataSelection {
    CrossCorrelation,
    Catalog,
    Both,
}

impl DataSelection {
    /// IDAT value in hypoDD.inp.
    pub fn idat(self) -> u8 {
        match self {
            DataSelection::CrossCorrelation => 1,
            DataSelection::Catalog => 2,
            DataSelection::Both => 3,
        }
    }

    fn uses_cc(self) -> bool {
        matches!(self, DataSelection::CrossCorrelation | DataSelection::Both)
    }

    fn uses_catalog(self) -> bool {
        matches!(self, DataSelection::Catalog | DataSelection::Both)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VelocityLayer {
    pub vp_km_s: f64,
    pub vp_vs_ratio: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HypoddControl {
    pub data: DataSelection,
    pub cc_file: String,
    pub ct_file: String,
    pub event_file: String,
    pub station_file: String,
    pub output_dir: String,
    /// 1 = P, 2 = S, 3 = P and S.
    pub iphase: u8,
    pub max_dist_km: f64,
    pub max_sep_km: f64,
    pub istart: u8,
    pub isolv: u8,
    pub weights: [f64; 4],
    pub distance_weights: [f64; 2],
    pub niter: u32,
    pub damp: f64,
    pub layers: Vec<VelocityLayer>,
}

impl HypoddControl {
    pub fn new(data: DataSelection) -> Self {
        Self {
            data,
            cc_file: "dt.cc".to_string(),
            ct_file: "dt.ct".to_string(),
            event_file: "event.dat".to_string(),
            station_file: "station.dat".to_string(),
            output_dir: ".".to_string(),
            iphase: 3,
            max_dist_km: 500.0,
            max_sep_km: 10.0,
            istart: 1,
            isolv: 2,
            weights: [1.0, 0.5, 1.0, 0.5],
            distance_weights: [8.0, 8.0],
            niter: 5,
            damp: 100.0,
            layers: vec![VelocityLayer {
                vp_km_s: 6.0,
                vp_vs_ratio: 1.73,
            }],
        }
    }

    pub fn render(&self) -> String {
        let out = &self.output_dir;
        let cc = if self.data.uses_cc() { self.cc_file.as_str() } else { "" };
        let ct = if self.data.uses_catalog() { self.ct_file.as_str() } else { "" };
        let [wtccp, wtccs, wtctp, wtcts] = self.weights;
        let [wdcc, wdct] = self.distance_weights;
        let mut model = format!("{}\n", self.layers.len());
        for layer in &self.layers {
            model.push_str(&format!("{:.2} {:.2}\n", layer.vp_km_s, layer.vp_vs_ratio));
        }

        format!(
            "* hypoDD.inp - input control file for hypoDD
* Input file names
* cross correlation diff times:
{cc}
* catalog travel time diff times:
{ct}
* event file:
{event}
* station file:
{station}
*
* Output file names
* original locations:
{out}/hypoDD.loc
* relocations:
{out}/hypoDD.reloc
* station information:
{out}/hypoDD.sta
* residuals:
{out}/hypoDD.res
* source parameters:
{out}/hypoDD.src
*
* Data type and phase
* IDAT IPHASE MINOBS
{idat} {iphase} 1
*
* Distance and clustering parameters
* MAXDIST MAXSEP MINOBS MAXNGH
{maxdist:.1} {maxsep:.1} 8 10
*
* Iteration control
* ISTART ISOLV
{istart} {isolv}
*
* Weighting
* WTCCP WTCCS WTCTP WTCTS WDCC WDCT WRCC WRCT
{wtccp:.2} {wtccs:.2} {wtctp:.2} {wtcts:.2} {wdcc:.1} {wdct:.1} -9 -9
*
* Iteration parameters
* NITER DAMP
{niter} {damp:.1}
*
* 1D Velocity model
* # of layers, Vp, Vp/Vs
{model}",
            event = self.event_file,
            station = self.station_file,
            idat = self.data.idat(),
            iphase = self.iphase,
            maxdist = self.max_dist_km,
            maxsep = self.max_sep_km,
            istart = self.istart,
            isolv = self.isolv,
            niter = self.niter,
            damp = self.damp,
        )
    }
}

pub fn write_control(path: &Path, contents: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| Error::io(path, e))?;
    tracing::info!("Created control file: {}", path.display());
    Ok(path.to_path_buf())
}
