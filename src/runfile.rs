use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Settings read from a `key = value` run file. Keys are case-insensitive and
/// ignore underscores, so `min_cc`, `MinCC` and `mincc` are the same key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFile {
    pub picks: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub stations: Option<PathBuf>,
    pub run_dir: Option<PathBuf>,
    pub mapping: Option<PathBuf>,
    pub min_cc: Option<f64>,
    pub lag_correction: Option<bool>,
    pub ph2dt_bin: Option<PathBuf>,
    pub hypodd_bin: Option<PathBuf>,
    pub loose_ph2dt: Option<bool>,
}

struct Params<'a> {
    path: &'a Path,
    values: HashMap<String, String>,
}

impl Params<'_> {
    fn raw<'k>(&self, keys: &[&'k str]) -> Option<(&'k str, &str)> {
        keys.iter()
            .find_map(|key| self.values.get(*key).map(|v| (*key, v.as_str())))
    }

    fn invalid(&self, key: &str, value: &str) -> Error {
        Error::InvalidSetting {
            path: self.path.to_path_buf(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn file(&self, keys: &[&str]) -> Option<PathBuf> {
        self.raw(keys).map(|(_, v)| PathBuf::from(v))
    }

    fn f64(&self, keys: &[&str]) -> Result<Option<f64>> {
        match self.raw(keys) {
            None => Ok(None),
            Some((key, value)) => value
                .parse::<f64>()
                .map(Some)
                .map_err(|_| self.invalid(key, value)),
        }
    }

    fn flag(&self, keys: &[&str]) -> Result<Option<bool>> {
        match self.raw(keys) {
            None => Ok(None),
            Some((key, value)) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(self.invalid(key, value)),
            },
        }
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace(['_', '-'], "")
}

fn read_params(path: &Path) -> Result<HashMap<String, String>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut params = HashMap::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| Error::io(path, e))?;
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            params.insert(normalize_key(key), value.to_string());
        }
    }
    Ok(params)
}

pub fn parse_runfile(path: &Path) -> Result<RunFile> {
    let params = Params {
        path,
        values: read_params(path)?,
    };
    Ok(RunFile {
        picks: params.file(&["picks", "pickcsv", "detections", "input"]),
        catalog: params.file(&["catalog", "catalogcsv"]),
        stations: params.file(&["stations", "stationcsv", "station"]),
        run_dir: params.file(&["rundir", "workdir", "outdir"]),
        mapping: params.file(&["mapping", "eventidmapping", "idmap"]),
        min_cc: params.f64(&["mincc", "ccthreshold"])?,
        lag_correction: params.flag(&["lagcorrection", "applylagcorrection", "lag"])?,
        ph2dt_bin: params.file(&["ph2dt", "ph2dtbin"]),
        hypodd_bin: params.file(&["hypodd", "hypoddbin"]),
        loose_ph2dt: params.flag(&["loose", "looseph2dt"])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn runfile(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.txt");
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn keys_ignore_case_and_underscores() {
        let (_dir, path) = runfile(
            "# detection run\n\
             Pick_CSV = picks.csv\n\
             catalog='catalog.csv'   # reference solutions\n\
             RUN_DIR = \"runs/a\"\n\
             Min_CC = 0.6\n\
             apply_lag_correction = yes\n\
             ; disabled = 1\n",
        );
        let rf = parse_runfile(&path).unwrap();
        assert_eq!(rf.picks, Some(PathBuf::from("picks.csv")));
        assert_eq!(rf.catalog, Some(PathBuf::from("catalog.csv")));
        assert_eq!(rf.run_dir, Some(PathBuf::from("runs/a")));
        assert_eq!(rf.min_cc, Some(0.6));
        assert_eq!(rf.lag_correction, Some(true));
        assert_eq!(rf.stations, None);
        assert_eq!(rf.hypodd_bin, None);
    }

    #[test]
    fn first_alias_wins() {
        let (_dir, path) = runfile("idmap = b.csv\nmapping = a.csv\n");
        let rf = parse_runfile(&path).unwrap();
        assert_eq!(rf.mapping, Some(PathBuf::from("a.csv")));
    }

    #[test]
    fn bad_number_names_the_key() {
        let (_dir, path) = runfile("min_cc = high\n");
        match parse_runfile(&path) {
            Err(Error::InvalidSetting { key, value, .. }) => {
                assert_eq!(key, "mincc");
                assert_eq!(value, "high");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bad_flag_is_rejected() {
        let (_dir, path) = runfile("loose = maybe\n");
        assert!(matches!(
            parse_runfile(&path),
            Err(Error::InvalidSetting { .. })
        ));
    }
}
