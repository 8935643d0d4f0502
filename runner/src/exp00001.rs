//! Run the distributed replicate join over every combination of the experiment's parameter grid
//! and record the telemetry of every node.
//!
//! Grid parameters: `ratio` (right relation = left relation * ratio) and `left_size` (tuples).
//! The replicate join only partitions locally, so there is a single bit count to set.

use clap::clap_app;

use log::info;

use crate::{
    cli::sweep,
    error::InvocationError,
    experiment::{self, Context, NUM, READY_PHRASE},
    extract::{Reduction, Schema},
    grid::Params,
    launch::run_synchronized,
    matcher::Pattern,
    output::Timestamp,
    record::Record,
    remote::{self, partition_bits, TUPLE_BYTES},
};

/// The join's compile-time settings, relative to the working directory.
pub const SETTINGS_H: &str = "src/use-cases/distributed-replicate-join-flow/Settings.h";

pub const BUILD_TARGET: &str = "distributed_replicate_join_flow";

/// Local partitions should fit in L1.
pub const PARTITION_BYTES: u64 = 16 * 1024;

/// Upper bound on the local partition bits.
pub const MAX_PARTITION_BITS: u32 = 11;

pub fn cli_options() -> clap::App<'static, 'static> {
    let app = clap_app! { exp00001 =>
        (about: "Sweep the distributed replicate join over a parameter grid on a cluster.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
    };

    sweep::add_cli_options(app)
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let options = sweep::parse_cli_options(sub_m);
    let schema = schema()?;
    let ready = Pattern::substr(READY_PHRASE);

    experiment::run_experiment("exp00001", &options, |ctx, params| {
        run_inner(ctx, &ready, &schema, params)
    })
}

/// The telemetry printed by every replicate join node.
pub fn schema() -> Result<Schema, failure::Error> {
    let num = |name: &str, field: &str| format!("{}=(?P<{}>{})", name, field, NUM);

    let rules = vec![
        (r"node=(?P<node>\d+)".to_owned(), Reduction::Last),
        (r"nodes=(?P<nodes>\d+)".to_owned(), Reduction::Last),
        (num("full_left_rel", "full_left_rel"), Reduction::Last),
        (num("full_right_rel", "full_right_rel"), Reduction::Last),
        (r"local_parts=(?P<local_parts>\S+)".to_owned(), Reduction::Last),
        (num("part_threads", "part_threads"), Reduction::Last),
        (num("dfi_segment_width", "dfi_segment_width"), Reduction::Last),
        (num("bandwidth", "bandwidth_left"), Reduction::Last),
        (num("time_network", "time_network"), Reduction::Last),
        (num("time_local_part", "time_local_part"), Reduction::Last),
        (num("time_build_probe", "time_build_probe"), Reduction::Last),
        (num("total_time", "total_time"), Reduction::Last),
        (r"random_order=(?P<random_order>\S+?)".to_owned(), Reduction::Last),
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

/// Local partition bits for a left relation of `left_size` tuples.
pub fn local_bits(left_size: u64) -> u32 {
    partition_bits(left_size.saturating_mul(TUPLE_BYTES), PARTITION_BYTES).min(MAX_PARTITION_BITS)
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
        let bits = local_bits(sizes.0);
        info!("Compiling with {} bits for the local partition pass", bits);

        // Matches every `*_PARTITION_BITS` setting.
        time!(
            timers,
            "Set partition bits",
            remote::substitute_all(
                ctx.session,
                servers,
                SETTINGS_H,
                "_PARTITION_BITS = [0-9]+;",
                &format!("_PARTITION_BITS = {};", bits),
            )?
        );

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_are_capped() {
        // 2048000 * 8 / 16384 = 1000
        assert_eq!(local_bits(2_048_000), 9);
        assert_eq!(local_bits(2_048_000_000), MAX_PARTITION_BITS);
        assert_eq!(local_bits(100), 0);
    }

    #[test]
    fn schema_renames_bandwidth() {
        let schema = schema().unwrap();
        assert!(schema.fields().any(|f| f == "time_network"));
        assert!(!schema.fields().any(|f| f == "sum_consume_count"));

        let mut extractor = schema.extractor();
        extractor.feed("bandwidth=5.5 time_network=1.25 local_parts=2048");
        let record = extractor.finish().unwrap();

        assert_eq!(record.get("bandwidth_left").and_then(|v| v.as_f64()), Some(5.5));
        assert_eq!(record.get("time_network").and_then(|v| v.as_f64()), Some(1.25));
        assert_eq!(record.get("local_parts").and_then(|v| v.as_u64()), Some(2048));
    }
}
