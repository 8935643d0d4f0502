//! Run the distributed radix join over every combination of the experiment's parameter grid and
//! record the telemetry of every node.
//!
//! Grid parameters: `ratio` (right relation = left relation * ratio), `left_size` (tuples), and
//! `network_part_bits` (0 picks half of the needed radix bits).
//!
//! Before every invocation, the DFI node list is pushed to every server, the partition bits are
//! written into the join's settings, and the join is rebuilt. `--skip_build` skips the last two.

use std::convert::TryFrom;

use clap::clap_app;

use log::info;

use crate::{
    cli::sweep,
    error::InvocationError,
    experiment::{self, param_u64, Context, NUM, READY_PHRASE},
    extract::{Reduction, Schema},
    grid::Params,
    launch::run_synchronized,
    matcher::Pattern,
    output::Timestamp,
    record::Record,
    remote::{self, partition_bits, PartitionBits, TUPLE_BYTES},
};

/// The join's compile-time settings, relative to the working directory.
pub const SETTINGS_H: &str = "src/use-cases/distributed-radix-join-flow/Settings.h";

pub const BUILD_TARGET: &str = "distributed_radix_join_flow";

/// Both partitioning passes together should produce partitions of this size.
pub const PARTITION_BYTES: u64 = 4 * 32 * 1024;

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { exp00000 =>
        (about: "Sweep the distributed radix join over a parameter grid on a cluster.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
    };

    sweep::add_cli_options(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let options = sweep::parse_cli_options(sub_m);
    let schema = schema()?;
    let ready = Pattern::substr(READY_PHRASE);

    experiment::run_experiment("exp00000", &options, |ctx, params| {
        run_inner(ctx, &ready, &schema, params)
    })
}

/// The telemetry printed by every radix join node.
pub fn schema() -> Result<Schema, failure::Error> {
    let num = |name: &str, field: &str| format!("{}=(?P<{}>{})", name, field, NUM);

    let rules = vec![
        (r"node=(?P<node>\d+)".to_owned(), Reduction::Last),
        (r"nodes=(?P<nodes>\d+)".to_owned(), Reduction::Last),
        (num("full_left_rel", "full_left_rel"), Reduction::Last),
        (num("full_right_rel", "full_right_rel"), Reduction::Last),
        (r"network_parts=(?P<network_parts>\S+)".to_owned(), Reduction::Last),
        (num("part_threads", "part_threads"), Reduction::Last),
        (num("dfi_segment_width", "dfi_segment_width"), Reduction::Last),
        (num("bandwidth_left", "bandwidth_left"), Reduction::Last),
        (num("bandwidth_right", "bandwidth_right"), Reduction::Last),
        (num("time_network_part_left", "time_network_part_left"), Reduction::Last),
        (num("time_network_part_right", "time_network_part_right"), Reduction::Last),
        (num("time_local_part", "time_local_part"), Reduction::Last),
        (num("time_build_probe", "time_build_probe"), Reduction::Last),
        (num("total_time", "total_time"), Reduction::Last),
        (r"random_order=(?P<random_order>\S+?)".to_owned(), Reduction::Last),
        (r"sum_consume_count=(?P<sum_consume_count>\d+)".to_owned(), Reduction::Last),
        (r"sum_join_count=(?P<sum_join_count>\d+)".to_owned(), Reduction::Last),
        (r"sender_stalls=(?P<sender_stalls>\d+)".to_owned(), Reduction::Sum),
        (
            num("sender_stall_sent_ratio", "sender_stall_sent_ratio_mean"),
            Reduction::Mean,
        ),
        (r"non_temp_writes=(?P<non_temp_writes>\S+)".to_owned(), Reduction::Last),
    ];

    let rules: Vec<_> = rules.iter().map(|(p, r)| (p.as_str(), *r)).collect();
    Ok(Schema::parse(&rules)?)
}

/// Radix bits for a left relation of `left_size` tuples. `network_part_bits == 0` picks the
/// split automatically.
pub fn radix_bits(left_size: u64, network_part_bits: u64) -> Result<PartitionBits, String> {
    let total = partition_bits(left_size.saturating_mul(TUPLE_BYTES), PARTITION_BYTES);
    let network = match network_part_bits {
        0 => None,
        n => Some(u32::try_from(n).map_err(|_| format!("{} network bits is too many", n))?),
    };

    PartitionBits::split(total, network)
}

fn run_inner(
    ctx: &Context<'_>,
    ready: &Pattern,
    schema: &Schema,
    params: &Params,
) -> Result<Vec<Record>, InvocationError> {
    let started = Timestamp::now();
    let mut timers = vec![];

    let experiment = ctx.experiment;
    let servers = &experiment.servers;
    let placements = experiment.placements();

    let sizes = ctx.relation_sizes(params)?;
    let network_part_bits = param_u64(params, "network_part_bits")?;

    time!(
        timers,
        "Push DFI configuration",
        remote::push_dfi_conf(
            ctx.session,
            servers,
            &placements,
            experiment.settings.dfi_port
        )?
    );

    if !ctx.options.skip_build {
        let bits = radix_bits(sizes.0, network_part_bits).map_err(|reason| {
            InvocationError::Configuration {
                server: "*".into(),
                reason,
            }
        })?;

        info!(
            "Compiling with {} network bits and {} local bits",
            bits.network, bits.local
        );

        time!(timers, "Set partition bits", {
            remote::substitute_all(
                ctx.session,
                servers,
                SETTINGS_H,
                "NETWORK_PARTITION_BITS = [0-9]+;",
                &format!("NETWORK_PARTITION_BITS = {};", bits.network),
            )?;
            remote::substitute_all(
                ctx.session,
                servers,
                SETTINGS_H,
                "LOCAL_PARTITION_BITS = [0-9]+;",
                &format!("LOCAL_PARTITION_BITS = {};", bits.local),
            )?;
        });

        time!(
            timers,
            "Build",
            remote::build(
                ctx.session,
                servers,
                &experiment.settings.cmake_args,
                BUILD_TARGET
            )?
        );
    }

    let binary = dir!(".", remote::BUILD_DIR, "bin", BUILD_TARGET);
    let args = ctx.join_args(&binary, placements.len(), sizes);
    let identity = args.identity(params, started);

    let records = time!(
        timers,
        "Join",
        run_synchronized(
            ctx.session,
            &placements,
            &ctx.launch(ready, schema),
            &identity,
            |p| args.command(p)
        )?
    );

    info!("Timings:\n{}", crate::timings_str(timers.as_slice()));

    Ok(records)
}
