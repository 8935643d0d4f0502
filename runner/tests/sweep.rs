//! Configuration pushes and whole sweeps against local "servers".

use std::fs;
use std::path::Path;
use std::time::Duration;

use runner::error::InvocationError;
use runner::experiment::{self, SweepOptions, READY_PHRASE};
use runner::extract::{Reduction, Schema};
use runner::launch::{run_synchronized, LaunchOptions};
use runner::matcher::Pattern;
use runner::remote;
use runner::server::{Server, ServerList};
use runner::session::LocalSession;
use runner::table::ResultsTable;

const CONF: &str = "# DFI cluster\nDFI_NODES = 127.0.0.1:7400\nDFI_REGISTRY_SERVER = 127.0.0.1\n\
                    DFI_PORT_OFFSET = 2\n";

fn server_dir(root: &Path, name: &str) -> String {
    let wd = root.join(name);
    fs::create_dir_all(wd.join("src/conf")).unwrap();
    fs::write(wd.join(remote::DFI_CONF), CONF).unwrap();
    wd.to_str().unwrap().to_owned()
}

#[test]
fn dfi_conf_is_pushed_to_every_server() {
    let root = tempfile::tempdir().unwrap();
    let list = ServerList::new(vec![
        Server::new("node01", "c01", &server_dir(root.path(), "a"))
            .with_interface(0, "172.18.94.10")
            .with_interface(1, "172.18.94.11"),
        Server::new("node02", "c02", &server_dir(root.path(), "b"))
            .with_interface(0, "172.18.94.20")
            .with_interface(1, "172.18.94.21"),
    ]);
    let placements = list.placements(&[0, 1]);

    remote::push_dfi_conf(&LocalSession, &list, &placements, 7400).unwrap();

    for name in &["a", "b"] {
        let conf = fs::read_to_string(root.path().join(name).join(remote::DFI_CONF)).unwrap();
        assert_eq!(
            conf,
            "# DFI cluster\n\
             DFI_NODES = 172.18.94.10:7400,172.18.94.11:7400,172.18.94.20:7400,172.18.94.21:7400\n\
             DFI_REGISTRY_SERVER = 172.18.94.10\n\
             DFI_PORT_OFFSET = 2\n"
        );
    }
}

#[test]
fn partition_bits_are_substituted() {
    let root = tempfile::tempdir().unwrap();
    let wd = server_dir(root.path(), "a");
    let settings = Path::new(&wd).join("Settings.h");
    fs::write(
        &settings,
        "static const size_t NETWORK_PARTITION_BITS = 4;\n\
         static const size_t LOCAL_PARTITION_BITS = 12;\n",
    )
    .unwrap();
    let list = ServerList::new(vec![Server::new("node01", "c01", &wd)]);

    remote::substitute_all(
        &LocalSession,
        &list,
        "Settings.h",
        "NETWORK_PARTITION_BITS = [0-9]+;",
        "NETWORK_PARTITION_BITS = 8;",
    )
    .unwrap();

    assert_eq!(
        fs::read_to_string(&settings).unwrap(),
        "static const size_t NETWORK_PARTITION_BITS = 8;\n\
         static const size_t LOCAL_PARTITION_BITS = 12;\n"
    );
}

#[test]
fn configuration_is_all_or_nothing() {
    let root = tempfile::tempdir().unwrap();
    let a = server_dir(root.path(), "a");
    let b = server_dir(root.path(), "b");
    fs::write(Path::new(&a).join("CMakeLists.txt"), "").unwrap();
    let list = ServerList::new(vec![
        Server::new("node01", "c01", &a),
        Server::new("node02", "c02", &b),
    ]);

    match remote::run_on_all(&LocalSession, &list, "test -f CMakeLists.txt") {
        Err(InvocationError::ConfigurationPush { server, command, .. }) => {
            assert_eq!(server, "node02");
            assert_eq!(command, "test -f CMakeLists.txt");
        }
        other => panic!("expected a configuration failure, got {:?}", other),
    }

    let unconfigured = ServerList::new(vec![Server::new("node01", "c01", &a)]);
    assert!(matches!(
        remote::push_dfi_conf(&LocalSession, &unconfigured, &unconfigured.placements(&[1]), 7400),
        Err(InvocationError::Configuration { .. })
    ));
}

#[test]
fn sweep_keeps_going_and_persists() {
    let root = tempfile::tempdir().unwrap();
    let a = server_dir(root.path(), "a");
    let b = server_dir(root.path(), "b");

    let config = root.path().join("cluster.json");
    fs::write(
        &config,
        serde_json::to_string_pretty(&serde_json::json!({
            "servers": [
                { "name": "node01", "address": "c01", "working_directory": &a,
                  "interfaces": { "1": "10.0.0.11" } },
                { "name": "node02", "address": "c02", "working_directory": &b,
                  "interfaces": { "1": "10.0.0.21" } }
            ],
            "numa_regions": [1],
            "threads": 4,
            "grid": { "ratio": [1, 2], "left_size": [1000, 3000] }
        }))
        .unwrap(),
    )
    .unwrap();

    let results = root.path().join("results.csv");
    let options = SweepOptions {
        config,
        results: results.clone(),
        barrier_timeout: Some(Duration::from_secs(30)),
        launch: LaunchOptions::empty(),
        local: true,
        skip_build: true,
    };

    let ready = Pattern::substr(READY_PHRASE);
    let schema = Schema::parse(&[(r"total_time=(?P<total_time>\d+)", Reduction::Last)]).unwrap();
    let mut seen = vec![];

    let result = experiment::run_experiment("test", &options, |ctx, params| {
        let sizes = ctx.relation_sizes(params)?;
        seen.push(sizes);
        let placements = ctx.experiment.placements();
        remote::push_dfi_conf(ctx.session, &ctx.experiment.servers, &placements, 7400)?;

        let args = ctx.join_args("./bench", placements.len(), sizes);
        let identity = args.identity(params, runner::output::Timestamp::now());

        // The second node crashes on the largest right relation.
        run_synchronized(
            ctx.session,
            &placements,
            &ctx.launch(&ready, &schema),
            &identity,
            |p| {
                let crash = p.node_id == 1 && sizes.1 == 6000;
                format!(
                    "echo '{}'; read go; echo total_time={}; exit {}",
                    READY_PHRASE,
                    sizes.1,
                    if crash { 7 } else { 0 }
                )
            },
        )
    });

    // One invocation failed, so the sweep reports failure, but after running everything.
    assert!(result.is_err());
    assert_eq!(seen, vec![(1000, 1000), (3000, 3000), (1000, 2000), (3000, 6000)]);

    let table = ResultsTable::load(&results).unwrap();
    assert_eq!(table.len(), 6);
    let totals: Vec<_> = table
        .rows()
        .iter()
        .map(|r| r.get("total_time").and_then(|v| v.as_u64()).unwrap())
        .collect();
    assert_eq!(totals, vec![1000, 1000, 3000, 3000, 2000, 2000]);

    let columns = table.columns();
    for column in &[
        "node",
        "nodes",
        "server",
        "numa_region",
        "ratio",
        "left_size",
        "threads",
        "right_size",
        "random_order",
        "timestamp",
        "total_time",
    ] {
        assert!(columns.iter().any(|c| c == column), "missing {}", column);
    }
    assert_eq!(table.rows()[0].get("threads").and_then(|v| v.as_u64()), Some(4));

    let params: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(root.path().join("results.csv.params.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(params["experiment"], "test");
    assert_eq!(params["config"]["threads"], 4);

    let conf = fs::read_to_string(Path::new(&b).join(remote::DFI_CONF)).unwrap();
    assert!(conf.contains("DFI_NODES = 10.0.0.11:7400,10.0.0.21:7400\n"));
}
