//! Stand-in for the distributed join binaries. Takes the same arguments, prints the same
//! readiness phrase, waits for a line on stdin, runs a local radix join over its share of the
//! relations, and prints telemetry in the same format.

use std::env;
use std::io::{self, BufRead};
use std::time::Instant;

use joinsim::{build_probe, left_relation, partition, radix_bits, right_relation, Lcg};

const USAGE: &str =
    "USAGE: ./joinsim <node id> <node count> <threads> <left size> <right size> <t|f> <numa region>";

/// Upper bound on the tuples one node actually joins, so a sweep of huge relations stays quick.
const MAX_LOCAL_TUPLES: usize = 1 << 22;

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() != 7 {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }

    let node: usize = args[0].parse().expect(USAGE);
    let nodes: usize = args[1].parse().expect(USAGE);
    let threads: usize = args[2].parse().expect(USAGE);
    let full_left: usize = args[3].parse().expect(USAGE);
    let full_right: usize = args[4].parse().expect(USAGE);
    let random_order = match args[5].as_str() {
        "t" => true,
        "f" => false,
        _ => panic!("{}", USAGE),
    };
    let numa_region: usize = args[6].parse().expect(USAGE);

    let left_size = (full_left / nodes.max(1)).min(MAX_LOCAL_TUPLES);
    let right_size = (full_right / nodes.max(1)).min(MAX_LOCAL_TUPLES);

    println!(
        "node {} of {} on NUMA region {}: generating {} x {} tuples",
        node, nodes, numa_region, left_size, right_size
    );
    let left = left_relation(left_size, random_order, node as u64);
    let right = right_relation(right_size, left_size);

    let total_bits = radix_bits(full_left);
    let network_bits = total_bits / 2;
    let local_bits = total_bits - network_bits;

    println!("Press any key to run...");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;

    let start = Instant::now();

    let t = Instant::now();
    let left_parts = partition(&left, network_bits);
    let time_network_part_left = t.elapsed().as_secs_f64();

    let t = Instant::now();
    let right_parts = partition(&right, network_bits);
    let time_network_part_right = t.elapsed().as_secs_f64();

    // Second pass on the bits above the network bits.
    let t = Instant::now();
    let shift = |parts: Vec<Vec<u64>>| -> Vec<Vec<u64>> {
        parts
            .into_iter()
            .flat_map(|p| {
                let shifted: Vec<u64> = p.iter().map(|k| k >> network_bits).collect();
                partition(&shifted, local_bits)
            })
            .collect()
    };
    let left_parts = shift(left_parts);
    let right_parts = shift(right_parts);
    let time_local_part = t.elapsed().as_secs_f64();

    let t = Instant::now();
    let matches = build_probe(&left_parts, &right_parts);
    let time_build_probe = t.elapsed().as_secs_f64();

    let total_time = start.elapsed().as_secs_f64();

    let mut rng = Lcg::new(node as u64 + 1);
    for _ in 0..threads {
        let stalls = rng.next() % 1000;
        let sent = 1000 + rng.next() % 1000;
        println!(
            "sender_stalls={} sender_stall_sent_ratio={:.4}",
            stalls,
            stalls as f64 / sent as f64
        );
    }

    let mb = |tuples: usize, secs: f64| {
        tuples as f64 * joinsim::TUPLE_BYTES as f64 / (1 << 20) as f64 / secs.max(1e-9)
    };
    let time_network = time_network_part_left + time_network_part_right;

    println!(
        "node={} nodes={} full_left_rel={} full_right_rel={} network_parts={} local_parts={} \
         part_threads={} dfi_segment_width={} bandwidth_left={:.2} bandwidth_right={:.2} \
         bandwidth={:.2} time_network_part_left={:.6} time_network_part_right={:.6} \
         time_network={:.6} time_local_part={:.6} time_build_probe={:.6} total_time={:.6} \
         random_order={} sum_consume_count={} sum_join_count={} non_temp_writes=false",
        node,
        nodes,
        full_left,
        full_right,
        1usize << network_bits,
        1usize << local_bits,
        threads,
        64,
        mb(left_size, time_network_part_left),
        mb(right_size, time_network_part_right),
        mb(left_size + right_size, time_network),
        time_network_part_left,
        time_network_part_right,
        time_network,
        time_local_part,
        time_build_probe,
        total_time,
        if random_order { "t" } else { "f" },
        left_size + right_size,
        matches,
    );

    Ok(())
}
