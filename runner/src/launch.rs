//! Barrier-synchronized launch of one benchmark process per placement.
//!
//! Every process gets its own draining thread that feeds each output line to a readiness
//! `Matcher` and a telemetry `Extractor`. Once every matcher has fired, a single newline is
//! written to every process's stdin, and then every process is waited on. The invocation only
//! yields records if every process exits with 0.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use bitflags::bitflags;

use log::{debug, error, info, warn};

use crate::error::{ExtractionError, InvocationError};
use crate::extract::{Extractor, Schema};
use crate::matcher::{Matcher, Pattern};
use crate::record::Record;
use crate::server::Placement;
use crate::session::{ProcessHandle, RemoteSession};

/// What gets written to every process to start it.
pub const RELEASE: &[u8] = b"\n";

bitflags! {
    pub struct LaunchOptions: u32 {
        /// Run the benchmark under `gdb`.
        const GDB = 1;

        /// Wait for the operator to press enter before releasing the processes.
        const MANUAL_RELEASE = 1 << 1;
    }
}

/// How to recognize readiness and harvest telemetry for one invocation.
#[derive(Debug, Clone)]
pub struct Launch<'a> {
    pub ready: &'a Pattern,
    pub schema: &'a Schema,
    /// `None` waits forever.
    pub barrier_timeout: Option<Duration>,
    pub options: LaunchOptions,
}

enum Event {
    Ready(usize),
    Closed(usize),
}

struct Running<'s> {
    placement: Placement<'s>,
    command: String,
    handle: Box<dyn ProcessHandle>,
}

impl Running<'_> {
    fn describe(&self) -> String {
        format!(
            "{} (node {})",
            self.placement.server.name, self.placement.node_id
        )
    }
}

/// Launch `command(placement)` for every placement, release them together once all are ready,
/// and return one record per placement in placement order.
///
/// Each record starts with `node`, `nodes`, `server`, and `numa_region`, followed by the fields
/// of `identity` and then the extracted telemetry. Later fields replace earlier ones with the
/// same name.
pub fn run_synchronized<'s, S, F>(
    session: &S,
    placements: &[Placement<'s>],
    launch: &Launch<'_>,
    identity: &Record,
    mut command: F,
) -> Result<Vec<Record>, InvocationError>
where
    S: RemoteSession + ?Sized,
    F: FnMut(&Placement<'s>) -> String,
{
    let nodes = placements.len();
    let schema = launch.schema;

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        let mut running: Vec<Running<'s>> = Vec::with_capacity(nodes);
        let mut drains = Vec::with_capacity(nodes);

        for (idx, placement) in placements.iter().enumerate() {
            let cmd = command(placement);
            info!(
                "{} (node {}/{}): {}",
                placement.server.name, placement.node_id, nodes, cmd
            );

            let spawned = session.spawn(placement.server, &cmd).and_then(|mut handle| {
                match handle.take_stdout() {
                    Some(stdout) => Ok((handle, stdout)),
                    None => Err(failure::format_err!("process has no output stream")),
                }
            });

            let (handle, stdout) = match spawned {
                Ok(spawned) => spawned,
                Err(e) => {
                    abort(&mut running);
                    return Err(InvocationError::Launch {
                        server: placement.server.name.clone(),
                        command: cmd,
                        cause: e.to_string(),
                    });
                }
            };

            let tx = tx.clone();
            let matcher = Matcher::new(launch.ready.clone());
            drains.push(scope.spawn(move || drain(idx, stdout, matcher, schema.extractor(), tx)));

            running.push(Running {
                placement: *placement,
                command: cmd,
                handle,
            });
        }

        // Only the draining threads may keep the channel open.
        drop(tx);

        if let Err(e) = await_ready(&rx, &running, launch.barrier_timeout) {
            abort(&mut running);
            return Err(e);
        }

        if launch.options.contains(LaunchOptions::MANUAL_RELEASE) {
            println!("All {} processes are ready. Press enter to release them.", nodes);
            let mut line = String::new();
            if let Err(e) = std::io::stdin().read_line(&mut line) {
                warn!("Unable to read from stdin ({}); releasing anyway", e);
            }
        }

        info!("All {} processes ready. Releasing.", nodes);
        for r in running.iter_mut() {
            if let Err(e) = r.handle.write_stdin(RELEASE) {
                warn!("Unable to release {}: {}", r.describe(), e);
            }
        }

        let exits: Vec<i32> = running
            .iter_mut()
            .map(|r| match r.handle.wait() {
                Ok(code) => code,
                Err(e) => {
                    error!("Unable to wait for {}: {}", r.describe(), e);
                    -1
                }
            })
            .collect();

        let telemetry: Vec<Result<Record, ExtractionError>> = drains
            .into_iter()
            .map(|d| d.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect();

        let mut failure = None;
        for (r, &exit) in running.iter().zip(exits.iter()) {
            if exit != 0 {
                error!("{} exited with {}: `{}`", r.describe(), exit, r.command);
                failure.get_or_insert(InvocationError::Process {
                    server: r.placement.server.name.clone(),
                    node: r.placement.node_id,
                    command: r.command.clone(),
                    exit,
                });
            }
        }
        if let Some(failure) = failure {
            return Err(failure);
        }

        running
            .iter()
            .zip(telemetry.into_iter())
            .map(|(r, telemetry)| {
                let telemetry = telemetry.map_err(|cause| InvocationError::Extraction {
                    server: r.placement.server.name.clone(),
                    node: r.placement.node_id,
                    cause,
                })?;

                let mut record = Record::new()
                    .with("node", r.placement.node_id)
                    .with("nodes", nodes)
                    .with("server", r.placement.server.name.as_str())
                    .with("numa_region", r.placement.region);
                record.merge(identity);
                record.merge(&telemetry);

                Ok(record)
            })
            .collect()
    })
}

/// Read `stdout` until it closes, feeding every line to the matcher and the extractor.
fn drain(
    idx: usize,
    mut stdout: Box<dyn BufRead + Send>,
    mut matcher: Matcher,
    mut extractor: Extractor<'_>,
    tx: Sender<Event>,
) -> Result<Record, ExtractionError> {
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match stdout.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("[{}] error reading output: {}", idx, e);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
        debug!("[{}] {}", idx, line);

        if matcher.feed(line) {
            // The coordinator only goes away after joining us, so this cannot fail.
            let _ = tx.send(Event::Ready(idx));
        }
        extractor.feed(line);
    }

    let _ = tx.send(Event::Closed(idx));
    extractor.finish()
}

/// Block until every process has signalled readiness.
fn await_ready(
    rx: &Receiver<Event>,
    running: &[Running<'_>],
    timeout: Option<Duration>,
) -> Result<(), InvocationError> {
    let total = running.len();
    let mut ready = vec![false; total];
    let mut count = 0;
    let deadline = timeout.map(|t| Instant::now() + t);

    let waiting_on = |ready: &[bool]| {
        running
            .iter()
            .zip(ready.iter())
            .filter(|(_, is_ready)| !**is_ready)
            .map(|(r, _)| r.describe())
            .collect::<Vec<_>>()
            .join(", ")
    };

    while count < total {
        let event = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(left) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(InvocationError::BarrierTimeout {
                            timeout: timeout.unwrap_or_default(),
                            ready: count,
                            total,
                            waiting: waiting_on(&ready),
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(event) => event,
                Err(_) => break,
            },
        };

        match event {
            Event::Ready(i) => {
                if !ready[i] {
                    ready[i] = true;
                    count += 1;
                    debug!("{} is ready ({}/{})", running[i].describe(), count, total);
                }
            }
            Event::Closed(i) if !ready[i] => {
                let r = &running[i];
                return Err(InvocationError::ExitedBeforeReady {
                    server: r.placement.server.name.clone(),
                    node: r.placement.node_id,
                    command: r.command.clone(),
                });
            }
            Event::Closed(_) => {}
        }
    }

    if count < total {
        // Every output stream closed, but some never matched. Each drain reports `Closed`, so
        // this is only reachable if a drain thread died.
        let i = ready.iter().position(|r| !r).unwrap_or(0);
        let r = &running[i];
        return Err(InvocationError::ExitedBeforeReady {
            server: r.placement.server.name.clone(),
            node: r.placement.node_id,
            command: r.command.clone(),
        });
    }

    Ok(())
}

/// Kill and reap everything launched so far.
fn abort(running: &mut [Running<'_>]) {
    for r in running.iter_mut() {
        warn!("Killing {}", r.describe());
        if let Err(e) = r.handle.kill() {
            warn!("Unable to kill {}: {}", r.describe(), e);
        }
    }
    for r in running.iter_mut() {
        if let Err(e) = r.handle.wait() {
            warn!("Unable to wait for {}: {}", r.describe(), e);
        }
    }
}
