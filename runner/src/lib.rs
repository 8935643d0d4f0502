//! A library of routines for sweeping distributed join benchmarks across a cluster.
//!
//! An experiment is a parameter grid plus a cluster description. For every combination of the
//! grid, the cluster is configured and rebuilt, one benchmark process per node is started, all
//! processes are released at the same instant once every one of them reports ready, and their
//! telemetry is reduced into one record per node and appended to a CSV results table.

// Must be imported first because the other submodules use the macros defined therein.
#[macro_use]
mod macros;

pub mod cli;
pub mod error;
pub mod experiment;
pub mod extract;
pub mod grid;
pub mod launch;
pub mod matcher;
pub mod output;
pub mod record;
pub mod remote;
pub mod server;
pub mod session;
pub mod table;

pub mod exp00000;
pub mod exp00001;

/// Given an array of timings, generate a human-readable string.
pub fn timings_str(timings: &[(&str, std::time::Duration)]) -> String {
    let mut s = String::new();
    for (label, d) in timings.iter() {
        s.push_str(&format!("{}: {:?}\n", label, d));
    }
    s
}

/// Get the git hash of the repository the runner is run from. Returns `"dirty"` if it has
/// uncommitted changes and `None` if it is not a git repository or git is unavailable.
pub fn local_git_hash() -> Option<String> {
    let diff = std::process::Command::new("git")
        .args(&["diff", "--quiet"])
        .status()
        .ok()?;

    match diff.code() {
        Some(0) => {}
        Some(1) => return Some("dirty".into()),
        _ => return None,
    }

    let output = std::process::Command::new("git")
        .args(&["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let hash = std::str::from_utf8(&output.stdout).ok()?.trim();
    if hash.is_empty() {
        None
    } else {
        Some(hash.into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    #[test]
    fn timings() {
        let s = super::timings_str(&[
            ("Build", Duration::from_secs(3)),
            ("Join", Duration::from_millis(1500)),
        ]);
        assert_eq!(s, "Build: 3s\nJoin: 1.5s\n");
    }
}
