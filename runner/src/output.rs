//! Metadata written next to the results of a sweep.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use serde::{Serialize, Serializer};

/// A wall-clock timestamp, formatted so that it sorts and can appear in file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub DateTime<Local>);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Local::now())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d-%H-%M-%S"))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Everything needed to tell later what produced a results file.
#[derive(Debug, Serialize)]
pub struct SweepInfo<'a> {
    pub experiment: &'a str,
    pub config: &'a serde_json::Value,
    pub local_git_hash: Option<String>,
    pub started: Timestamp,
}

/// The parameters file for the given results file, e.g. `results.csv.params.json`.
pub fn params_path(results: &Path) -> PathBuf {
    let mut path = results.as_os_str().to_owned();
    path.push(".params.json");
    PathBuf::from(path)
}

/// Write `info` as pretty JSON next to `results`, replacing an older parameters file.
pub fn write_params_file(results: &Path, info: &SweepInfo<'_>) -> Result<PathBuf, failure::Error> {
    let path = params_path(results);
    std::fs::write(&path, serde_json::to_string_pretty(info)?)?;
    Ok(path)
}
