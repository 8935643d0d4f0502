//! Running an experiment once per combination of its parameter grid.
//!
//! An invocation either produces one record per benchmark process or fails as a whole. A failed
//! invocation is logged and skipped; the sweep always carries on with the next combination. The
//! results file is rewritten after every successful invocation.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use serde::Deserialize;

use crate::error::InvocationError;
use crate::extract::Schema;
use crate::grid::{ParameterGrid, Params};
use crate::launch::{Launch, LaunchOptions};
use crate::matcher::Pattern;
use crate::output::{self, SweepInfo, Timestamp};
use crate::record::Record;
use crate::server::{Placement, ServerList};
use crate::session::{LocalSession, RemoteSession, SshSession};
use crate::table::ResultsTable;

/// Prefix that runs the benchmark under gdb without drowning the output in thread events.
pub const GDB_PREFIX: &str = "gdb -ex 'set print thread-events off' -ex run --args";

/// Printed by the join benchmarks once they are set up and blocked on stdin.
pub const READY_PHRASE: &str = "Press any key to run...";

/// Matches a telemetry number, e.g. `12` or `3.25`.
pub const NUM: &str = r"\d+(?:\.\d+)?";

/// Options shared by all sweeping subcommands.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// The experiment file.
    pub config: PathBuf,
    /// The CSV file results are appended to.
    pub results: PathBuf,
    /// `None` waits for readiness forever.
    pub barrier_timeout: Option<Duration>,
    pub launch: LaunchOptions,
    /// Run every server as a local shell instead of over SSH.
    pub local: bool,
    /// Assume the benchmark is already configured and built.
    pub skip_build: bool,
}

/// The non-server settings of an experiment file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// NUMA regions to run one process in, on every server.
    pub numa_regions: Vec<usize>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_random_order")]
    pub random_order: bool,
    /// The port the DFI runtime listens on, on every node.
    #[serde(default = "default_dfi_port")]
    pub dfi_port: u16,
    #[serde(default = "default_cmake_args")]
    pub cmake_args: String,
    pub grid: ParameterGrid,
}

fn default_threads() -> usize {
    14
}

fn default_random_order() -> bool {
    true
}

fn default_dfi_port() -> u16 {
    7400
}

fn default_cmake_args() -> String {
    "-DCMAKE_BUILD_TYPE=Release".into()
}

/// A parsed experiment file.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub servers: ServerList,
    pub settings: Settings,
    /// The file as read, kept for the parameters file.
    pub raw: serde_json::Value,
}

impl Experiment {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| failure::format_err!("Unable to read {}: {}", path.display(), e))?;
        let raw: serde_json::Value = serde_json::from_str(&contents)?;
        Self::from_json(raw)
    }

    pub fn from_json(raw: serde_json::Value) -> Result<Self, failure::Error> {
        let servers = ServerList::from_json(&raw)?;
        let settings: Settings = serde_json::from_value(raw.clone())?;

        if settings.numa_regions.is_empty() {
            failure::bail!("`numa_regions` must name at least one region");
        }

        Ok(Experiment {
            servers,
            settings,
            raw,
        })
    }

    /// Node placements for one invocation.
    pub fn placements(&self) -> Vec<Placement<'_>> {
        self.servers.placements(&self.settings.numa_regions)
    }
}

/// Everything an invocation needs besides its parameters.
pub struct Context<'a> {
    pub session: &'a dyn RemoteSession,
    pub experiment: &'a Experiment,
    pub options: &'a SweepOptions,
}

impl Context<'_> {
    pub fn launch<'p>(&self, ready: &'p Pattern, schema: &'p Schema) -> Launch<'p> {
        Launch {
            ready,
            schema,
            barrier_timeout: self.options.barrier_timeout,
            options: self.options.launch,
        }
    }

    /// The relation sizes of an invocation: `left_size` and `left_size * ratio`.
    pub fn relation_sizes(&self, params: &Params) -> Result<(u64, u64), InvocationError> {
        let left_size = param_u64(params, "left_size")?;
        let ratio = param_u64(params, "ratio")?;
        let right_size = left_size
            .checked_mul(ratio)
            .ok_or_else(|| InvocationError::Configuration {
                server: "*".into(),
                reason: format!("right relation size {} * {} overflows", left_size, ratio),
            })?;

        Ok((left_size, right_size))
    }

    pub fn join_args<'b>(&self, binary: &'b str, nodes: usize, sizes: (u64, u64)) -> JoinArgs<'b> {
        JoinArgs {
            binary,
            nodes,
            threads: self.experiment.settings.threads,
            left_size: sizes.0,
            right_size: sizes.1,
            random_order: self.experiment.settings.random_order,
            gdb: self.options.launch.contains(LaunchOptions::GDB),
        }
    }
}

/// A non-negative integer parameter of the invocation.
pub fn param_u64(params: &Params, name: &str) -> Result<u64, InvocationError> {
    params
        .get_u64(name)
        .map_err(|e| InvocationError::Configuration {
            server: "*".into(),
            reason: e.to_string(),
        })
}

/// Command line of one join benchmark process:
/// `nodeId nodeCount threadCount leftSize rightSize randomOrder numaRegion`.
#[derive(Debug, Clone)]
pub struct JoinArgs<'a> {
    pub binary: &'a str,
    pub nodes: usize,
    pub threads: usize,
    pub left_size: u64,
    pub right_size: u64,
    pub random_order: bool,
    pub gdb: bool,
}

impl JoinArgs<'_> {
    pub fn command(&self, placement: &Placement<'_>) -> String {
        format!(
            "{}{}{} {} {} {} {} {} {} {}",
            if self.gdb { GDB_PREFIX } else { "" },
            if self.gdb { " " } else { "" },
            self.binary,
            placement.node_id,
            self.nodes,
            self.threads,
            self.left_size,
            self.right_size,
            if self.random_order { "t" } else { "f" },
            placement.region,
        )
    }

    /// The fields identifying this invocation in every record.
    pub fn identity(&self, params: &Params, started: Timestamp) -> Record {
        let mut record = params.as_record().clone();
        record.insert("threads", self.threads);
        record.insert("left_size", self.left_size);
        record.insert("right_size", self.right_size);
        record.insert("random_order", if self.random_order { "t" } else { "f" });
        record.insert("timestamp", started.to_string());
        record
    }
}

/// The outcome of a sweep.
#[derive(Debug, Default)]
pub struct SweepSummary {
    pub succeeded: usize,
    pub failed: Vec<(Params, InvocationError)>,
}

/// Call `invocation` once per grid combination, appending the records of each successful
/// invocation to `table` and persisting it to `results`.
///
/// Invocation failures never stop the sweep. Only failing to write the results does.
pub fn run_sweep<F>(
    grid: &ParameterGrid,
    table: &mut ResultsTable,
    results: &Path,
    mut invocation: F,
) -> Result<SweepSummary, failure::Error>
where
    F: FnMut(&Params) -> Result<Vec<Record>, InvocationError>,
{
    let total = grid.len();
    let mut summary = SweepSummary::default();

    if total == 0 {
        warn!("The parameter grid is empty. Nothing to do.");
        return Ok(summary);
    }

    for (i, params) in grid.iter().enumerate() {
        info!("== Invocation {}/{}: {}", i + 1, total, params);
        let start = Instant::now();

        match invocation(&params) {
            Ok(records) => {
                info!(
                    "Invocation {}/{} succeeded after {:?} with {} records",
                    i + 1,
                    total,
                    start.elapsed(),
                    records.len()
                );
                table.append(records);
                table.persist(results)?;
                summary.succeeded += 1;
            }
            Err(e) => {
                error!(
                    "Invocation {}/{} FAILED after {:?} ({}): {}",
                    i + 1,
                    total,
                    start.elapsed(),
                    params,
                    e
                );
                summary.failed.push((params, e));
            }
        }
    }

    Ok(summary)
}

/// Load the experiment file, connect, and sweep `invocation` over the grid.
pub fn run_experiment<F>(name: &str, options: &SweepOptions, mut invocation: F) -> Result<(), failure::Error>
where
    F: FnMut(&Context<'_>, &Params) -> Result<Vec<Record>, InvocationError>,
{
    let experiment = Experiment::load(&options.config)?;

    let session: Box<dyn RemoteSession> = if options.local {
        Box::new(LocalSession)
    } else {
        Box::new(SshSession::connect(&experiment.servers)?)
    };

    let ctx = Context {
        session: &*session,
        experiment: &experiment,
        options,
    };

    let mut table = ResultsTable::load(&options.results)?;
    let params_file = output::write_params_file(
        &options.results,
        &SweepInfo {
            experiment: name,
            config: &experiment.raw,
            local_git_hash: crate::local_git_hash(),
            started: Timestamp::now(),
        },
    )?;
    info!("Parameters written to {}", params_file.display());

    let summary = run_sweep(
        &experiment.settings.grid,
        &mut table,
        &options.results,
        |params| invocation(&ctx, params),
    )?;

    println!("RESULTS: {}", options.results.display());

    if !summary.failed.is_empty() {
        for (params, e) in summary.failed.iter() {
            println!("FAILED: {}: {}", params, e);
        }
        failure::bail!(
            "{} of {} invocations failed",
            summary.failed.len(),
            summary.failed.len() + summary.succeeded
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::server::Server;

    fn experiment_json() -> serde_json::Value {
        serde_json::json!({
            "working_directory": "/home/lab/dfi",
            "servers": [
                { "name": "node01", "address": "c01.lab", "interfaces": { "1": "172.18.94.11" } },
                { "name": "node02", "address": "c02.lab", "interfaces": { "1": "172.18.94.21" } }
            ],
            "numa_regions": [1],
            "grid": { "ratio": [1], "left_size": [2048000000], "network_part_bits": [0] }
        })
    }

    #[test]
    fn experiment_file_defaults() {
        let exp = Experiment::from_json(experiment_json()).unwrap();

        assert_eq!(exp.servers.len(), 2);
        assert_eq!(exp.settings.threads, 14);
        assert_eq!(exp.settings.dfi_port, 7400);
        assert!(exp.settings.random_order);
        assert_eq!(exp.settings.grid.len(), 1);
        assert_eq!(exp.placements().len(), 2);
    }

    #[test]
    fn experiment_needs_regions() {
        let mut json = experiment_json();
        json["numa_regions"] = serde_json::json!([]);
        assert!(Experiment::from_json(json).is_err());
    }

    #[test]
    fn experiment_file_keeps_grid_order() {
        let text = r#"{
            "servers": [{ "name": "node01", "address": "c01.lab", "working_directory": "/w" }],
            "numa_regions": [0],
            "grid": { "ratio": [1, 2], "left_size": [1000, 3000] }
        }"#;
        let exp = Experiment::from_json(serde_json::from_str(text).unwrap()).unwrap();
        let grid = &exp.settings.grid;

        assert_eq!(grid.names().collect::<Vec<_>>(), vec!["ratio", "left_size"]);
        let combos: Vec<(u64, u64)> = grid
            .iter()
            .map(|p| (p.get_u64("ratio").unwrap(), p.get_u64("left_size").unwrap()))
            .collect();
        assert_eq!(combos, vec![(1, 1000), (1, 3000), (2, 1000), (2, 3000)]);
    }

    #[test]
    fn join_command_line() {
        let server = Server::new("node01", "c01.lab", "/w");
        let list = ServerList::new(vec![server]);
        let placements = list.placements(&[1]);

        let mut args = JoinArgs {
            binary: "./build/bin/distributed_radix_join_flow",
            nodes: 4,
            threads: 14,
            left_size: 2048,
            right_size: 4096,
            random_order: true,
            gdb: false,
        };
        assert_eq!(
            args.command(&placements[0]),
            "./build/bin/distributed_radix_join_flow 0 4 14 2048 4096 t 1"
        );

        args.gdb = true;
        args.random_order = false;
        assert_eq!(
            args.command(&placements[0]),
            "gdb -ex 'set print thread-events off' -ex run --args \
             ./build/bin/distributed_radix_join_flow 0 4 14 2048 4096 f 1"
        );
    }

    #[test]
    fn sweep_survives_failed_invocations() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results.csv");
        let grid = ParameterGrid::new().param("x", vec![1i64, 2, 3]);
        let mut table = ResultsTable::new();

        let summary = run_sweep(&grid, &mut table, &results, |params| {
            let x = params.get_u64("x").unwrap();
            if x == 2 {
                Err(InvocationError::Process {
                    server: "node01".into(),
                    node: 0,
                    command: "bench".into(),
                    exit: 1,
                })
            } else {
                Ok(vec![
                    Record::new().with("x", x).with("node", 0usize),
                    Record::new().with("x", x).with("node", 1usize),
                ])
            }
        })
        .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0.get_u64("x").unwrap(), 2);

        // No rows from the failed invocation.
        let xs: Vec<_> = table
            .rows()
            .iter()
            .map(|r| r.get("x").and_then(|x| x.as_u64()).unwrap())
            .collect();
        assert_eq!(xs, vec![1, 1, 3, 3]);
        assert_eq!(ResultsTable::load(&results).unwrap().len(), 4);
    }

    #[test]
    fn empty_grid_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results.csv");
        let grid = ParameterGrid::new().param("x", Vec::<i64>::new());
        let mut table = ResultsTable::new();
        let mut calls = 0;

        let summary = run_sweep(&grid, &mut table, &results, |_| {
            calls += 1;
            Ok(vec![])
        })
        .unwrap();

        assert_eq!(calls, 0);
        assert_eq!(summary.succeeded, 0);
        assert!(summary.failed.is_empty());
        assert!(!results.exists());
    }
}
