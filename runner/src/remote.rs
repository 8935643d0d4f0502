//! Pushing configuration to every server and building the benchmark there.
//!
//! Every step here is all-or-nothing: a command runs on all servers at once, and if any server
//! fails, the step fails and nothing after it runs. Comparing timings across nodes is only
//! meaningful if every node was configured identically.

use std::thread;

use log::{error, info};

use crate::error::InvocationError;
use crate::server::{Placement, ServerList};
use crate::session::{quote, RemoteSession};

/// The DFI cluster configuration file, relative to the working directory.
pub const DFI_CONF: &str = "src/conf/DFI.conf";

/// The cmake build directory, relative to the working directory.
pub const BUILD_DIR: &str = "build";

/// Size of one tuple of a relation in bytes.
pub const TUPLE_BYTES: u64 = 8;

/// Run `command` on every server concurrently. Fails with the first failing server (in list
/// order) if any server fails; every failure is logged.
pub fn run_on_all<S>(session: &S, servers: &ServerList, command: &str) -> Result<(), InvocationError>
where
    S: RemoteSession + ?Sized,
{
    info!("On all servers: {}", command);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = servers
            .iter()
            .map(|server| (server, scope.spawn(move || session.run(server, command))))
            .collect();

        handles
            .into_iter()
            .map(|(server, h)| {
                (
                    server,
                    h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)),
                )
            })
            .collect()
    });

    let mut first = None;
    for (server, result) in results {
        if let Err(e) = result {
            error!("{}: `{}` failed: {}", server.name, command, e);
            first.get_or_insert(InvocationError::ConfigurationPush {
                server: server.name.clone(),
                command: command.to_owned(),
                cause: e.to_string(),
            });
        }
    }

    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// A `sed` command replacing every match of the extended regex `pattern` in `file` with the
/// literal `replacement`.
pub fn sed_command(file: &str, pattern: &str, replacement: &str) -> String {
    let replacement = replacement
        .replace('\\', r"\\")
        .replace('&', r"\&")
        .replace('/', r"\/");
    let expr = format!("s/{}/{}/g", pattern.replace('/', r"\/"), replacement);

    format!("sed -i -E {} {}", quote(&expr), quote(file))
}

/// Apply the same substitution to `file` on every server.
pub fn substitute_all<S>(
    session: &S,
    servers: &ServerList,
    file: &str,
    pattern: &str,
    replacement: &str,
) -> Result<(), InvocationError>
where
    S: RemoteSession + ?Sized,
{
    run_on_all(session, servers, &sed_command(file, pattern, replacement))
}

/// The number of radix bits needed so that partitions of a `working_set_bytes` relation fit in
/// `target_bytes`: `floor(log2(working_set_bytes / target_bytes))`, or 0 if the relation already
/// fits. A zero target means no partitioning, so it also gives 0.
pub fn partition_bits(working_set_bytes: u64, target_bytes: u64) -> u32 {
    let ratio = working_set_bytes.checked_div(target_bytes).unwrap_or(0);
    if ratio == 0 {
        0
    } else {
        63 - ratio.leading_zeros()
    }
}

/// How the radix bits are split between the network partitioning pass and the local pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionBits {
    pub network: u32,
    pub local: u32,
}

impl PartitionBits {
    /// Split `total` bits. With `network: None` the network pass gets half (rounded down) and the
    /// local pass gets the rest.
    pub fn split(total: u32, network: Option<u32>) -> Result<Self, String> {
        let network = network.unwrap_or(total / 2);
        if network > total {
            return Err(format!(
                "{} network partition bits requested, but only {} bits are needed in total",
                network, total
            ));
        }

        Ok(PartitionBits {
            network,
            local: total - network,
        })
    }
}

/// `ip:port` for every node, in node-id order, using each server's interface for the node's
/// region.
pub fn dfi_nodes(placements: &[Placement<'_>], port: u16) -> Result<Vec<String>, InvocationError> {
    placements
        .iter()
        .map(|p| match p.server.interface(p.region) {
            Some(ip) => Ok(format!("{}:{}", ip, port)),
            None => Err(InvocationError::Configuration {
                server: p.server.name.clone(),
                reason: format!("no interface address for NUMA region {}", p.region),
            }),
        })
        .collect()
}

/// Write the node list and registry server into `DFI_CONF` on every server. The first node
/// hosts the registry.
pub fn push_dfi_conf<S>(
    session: &S,
    servers: &ServerList,
    placements: &[Placement<'_>],
    port: u16,
) -> Result<(), InvocationError>
where
    S: RemoteSession + ?Sized,
{
    let nodes = dfi_nodes(placements, port)?;
    let registry = match placements.first() {
        Some(p) => p.server.interface(p.region).unwrap_or_default(),
        None => {
            return Err(InvocationError::Configuration {
                server: "*".into(),
                reason: "no nodes to configure".into(),
            })
        }
    };

    info!("DFI nodes: {}", nodes.join(","));

    substitute_all(
        session,
        servers,
        DFI_CONF,
        "^DFI_NODES.*=.+",
        &format!("DFI_NODES = {}", nodes.join(",")),
    )?;
    substitute_all(
        session,
        servers,
        DFI_CONF,
        "^DFI_REGISTRY_SERVER.*=.+",
        &format!("DFI_REGISTRY_SERVER = {}", registry),
    )?;

    Ok(())
}

/// Configure with cmake and build `target` on every server.
pub fn build<S>(
    session: &S,
    servers: &ServerList,
    cmake_args: &str,
    target: &str,
) -> Result<(), InvocationError>
where
    S: RemoteSession + ?Sized,
{
    run_on_all(
        session,
        servers,
        &format!(
            "mkdir -p {0} && cd {0} && cmake {1} ..",
            BUILD_DIR, cmake_args
        ),
    )?;
    run_on_all(
        session,
        servers,
        &format!("cd {} && make {} -j", BUILD_DIR, target),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Server;

    #[test]
    fn bits_for_two_gigatuple_relation() {
        let total = partition_bits(2_048_000_000 * TUPLE_BYTES, 4 * 32 * 1024);
        assert_eq!(total, 16);
        assert_eq!(
            PartitionBits::split(total, None),
            Ok(PartitionBits {
                network: 8,
                local: 8
            })
        );
        // Deterministic.
        assert_eq!(partition_bits(2_048_000_000 * TUPLE_BYTES, 4 * 32 * 1024), total);
    }

    #[test]
    fn odd_totals_give_the_remainder_to_the_local_pass() {
        assert_eq!(
            PartitionBits::split(17, None),
            Ok(PartitionBits {
                network: 8,
                local: 9
            })
        );
        assert_eq!(
            PartitionBits::split(17, Some(10)),
            Ok(PartitionBits {
                network: 10,
                local: 7
            })
        );
        assert!(PartitionBits::split(4, Some(5)).is_err());
    }

    #[test]
    fn small_relations_need_no_bits() {
        assert_eq!(partition_bits(1000, 16 * 1024), 0);
        assert_eq!(partition_bits(16 * 1024, 16 * 1024), 0);
        assert_eq!(partition_bits(32 * 1024, 16 * 1024), 1);
        assert_eq!(partition_bits(32 * 1024, 0), 0);
    }

    #[test]
    fn sed_escapes_replacement() {
        assert_eq!(
            sed_command("src/conf/DFI.conf", "^DFI_NODES.*=.+", "DFI_NODES = a/b&c"),
            r"sed -i -E 's/^DFI_NODES.*=.+/DFI_NODES = a\/b\&c/g' 'src/conf/DFI.conf'"
        );
    }

    #[test]
    fn dfi_nodes_follow_node_ids() {
        let list = ServerList::new(vec![
            Server::new("node01", "c01", "/w")
                .with_interface(0, "10.0.0.10")
                .with_interface(1, "10.0.0.11"),
            Server::new("node02", "c02", "/w")
                .with_interface(0, "10.0.0.20")
                .with_interface(1, "10.0.0.21"),
        ]);

        let nodes = dfi_nodes(&list.placements(&[0, 1]), 7400).unwrap();
        assert_eq!(
            nodes,
            vec![
                "10.0.0.10:7400",
                "10.0.0.11:7400",
                "10.0.0.20:7400",
                "10.0.0.21:7400"
            ]
        );

        assert!(matches!(
            dfi_nodes(&list.placements(&[2]), 7400),
            Err(InvocationError::Configuration { .. })
        ));
    }
}
