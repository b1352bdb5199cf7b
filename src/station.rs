use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::records::StationRecord;

pub fn format_station_line(station: &StationRecord) -> String {
    format!(
        "{:<7} {:9.5} {:10.5} {:6.1}",
        station.station, station.latitude, station.longitude, station.elevation
    )
}

/// Writes `station.dat`; elevation is in metres.
pub fn write_station_file(path: &Path, stations: &[StationRecord]) -> Result<PathBuf> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for station in stations {
        writeln!(writer, "{}", format_station_line(station)).map_err(|e| Error::io(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))?;
    tracing::info!(
        "Created station file: {} with {} stations",
        path.display(),
        stations.len()
    );
    Ok(path.to_path_buf())
}
