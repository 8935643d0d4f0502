//! Some routines for adding common CLI options in a consistent, less boilerplatey way.

/// Validators for `clap` arguments.
pub mod validator {
    use std::str::FromStr;

    /// Accepts any value that parses as a `T`.
    pub fn is<T: FromStr>(s: String) -> Result<(), String> {
        s.parse::<T>()
            .map(|_| ())
            .map_err(|_| format!("invalid value \"{}\"", s))
    }
}

/// CLI options shared by every experiment that sweeps a parameter grid across the cluster.
pub mod sweep {
    use std::path::PathBuf;
    use std::time::Duration;

    use clap::{App, Arg, ArgMatches};

    use super::validator;
    use crate::experiment::SweepOptions;
    use crate::launch::LaunchOptions;

    /// Barrier timeout when none is given, in seconds.
    pub const DEFAULT_BARRIER_TIMEOUT: &str = "600";

    pub fn add_cli_options<'a, 'b>(app: App<'a, 'b>) -> App<'a, 'b> {
        app.arg(
            Arg::with_name("CONFIG")
                .required(true)
                .takes_value(true)
                .help("The JSON experiment file listing the servers and the parameter grid"),
        )
        .arg(
            Arg::with_name("RESULTS")
                .long("results")
                .takes_value(true)
                .default_value("results.csv")
                .help("The CSV file to append results to. It is rewritten after every invocation."),
        )
        .arg(
            Arg::with_name("BARRIER_TIMEOUT")
                .long("barrier_timeout")
                .takes_value(true)
                .default_value(DEFAULT_BARRIER_TIMEOUT)
                .validator(validator::is::<u64>)
                .help(
                    "Seconds to wait for every process to become ready before giving up on the \
                     invocation. 0 waits forever.",
                ),
        )
        .arg(
            Arg::with_name("MANUAL")
                .long("manual")
                .help("Wait for enter on the terminal before releasing the processes."),
        )
        .arg(
            Arg::with_name("GDB")
                .long("gdb")
                .help("Run the benchmark under gdb on every node."),
        )
        .arg(
            Arg::with_name("LOCAL")
                .long("local")
                .help("Run the commands for every server in a local shell instead of over SSH."),
        )
        .arg(
            Arg::with_name("SKIP_BUILD")
                .long("skip_build")
                .help("Do not reconfigure or rebuild the benchmark before each invocation."),
        )
    }

    /// Parse and return the values added by `add_cli_options`.
    pub fn parse_cli_options(sub_m: &ArgMatches<'_>) -> SweepOptions {
        let barrier_timeout = sub_m
            .value_of("BARRIER_TIMEOUT")
            .unwrap_or(DEFAULT_BARRIER_TIMEOUT)
            .parse::<u64>()
            .unwrap();

        let mut launch = LaunchOptions::empty();
        if sub_m.is_present("GDB") {
            launch |= LaunchOptions::GDB;
        }
        if sub_m.is_present("MANUAL") {
            launch |= LaunchOptions::MANUAL_RELEASE;
        }

        SweepOptions {
            config: PathBuf::from(sub_m.value_of("CONFIG").unwrap()),
            results: PathBuf::from(sub_m.value_of("RESULTS").unwrap()),
            barrier_timeout: if barrier_timeout == 0 {
                None
            } else {
                Some(Duration::from_secs(barrier_timeout))
            },
            launch,
            local: sub_m.is_present("LOCAL"),
            skip_build: sub_m.is_present("SKIP_BUILD"),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn parse(args: &[&str]) -> SweepOptions {
            let app = add_cli_options(App::new("exp"));
            let matches = app.get_matches_from(args.to_vec());
            parse_cli_options(&matches)
        }

        #[test]
        fn defaults() {
            let opts = parse(&["exp", "cluster.json"]);
            assert_eq!(opts.config, PathBuf::from("cluster.json"));
            assert_eq!(opts.results, PathBuf::from("results.csv"));
            assert_eq!(opts.barrier_timeout, Some(Duration::from_secs(600)));
            assert!(opts.launch.is_empty());
            assert!(!opts.local);
            assert!(!opts.skip_build);
        }

        #[test]
        fn flags() {
            let opts = parse(&[
                "exp",
                "cluster.json",
                "--results",
                "out.csv",
                "--barrier_timeout",
                "0",
                "--gdb",
                "--manual",
                "--local",
                "--skip_build",
            ]);
            assert_eq!(opts.results, PathBuf::from("out.csv"));
            assert_eq!(opts.barrier_timeout, None);
            assert!(opts
                .launch
                .contains(LaunchOptions::GDB | LaunchOptions::MANUAL_RELEASE));
            assert!(opts.local);
            assert!(opts.skip_build);
        }
    }
}
