//! This program sweeps distributed join benchmarks over a parameter grid on a cluster. Which join
//! is chosen by passing different subcommands; all of them take an experiment file.

fn run() -> Result<(), failure::Error> {
    let matches = clap::App::new("runner")
        .about(
            "This program sweeps distributed join benchmarks over a parameter grid on a cluster. \
             Which join is chosen by passing different subcommands.",
        )
        .subcommand(runner::exp00000::cli_options())
        .subcommand(runner::exp00001::cli_options())
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .setting(clap::AppSettings::DisableVersion)
        .get_matches();

    match matches.subcommand() {
        ("exp00000", Some(sub_m)) => runner::exp00000::run(sub_m),
        ("exp00001", Some(sub_m)) => runner::exp00001::run(sub_m),

        _ => {
            unreachable!();
        }
    }
}

fn main() {
    use console::style;

    env_logger::init();

    // Always collect backtraces; the cost is irrelevant next to the experiments themselves.
    std::env::set_var("RUST_BACKTRACE", "1");

    // If an error occurred, try to print something helpful.
    if let Err(err) = run() {
        const MESSAGE: &str = r#"== ERROR ==================================================================================
`runner` encountered an error. The log above may offer clues. Setting RUST_LOG=debug shows every
remote command and every line of benchmark output. Results of the invocations that succeeded are
already in the results file.
"#;

        println!("{}", style(MESSAGE).red().bold());

        // Errors from SSH commands
        if err.downcast_ref::<spurs::SshError>().is_some() {
            println!("An error occurred while attempting to run a command over SSH");
        }

        // Print error and backtrace
        println!(
            "`runner` encountered the following error:\n{}\n{}",
            err.as_fail(),
            err.backtrace(),
        );

        std::process::exit(101);
    }
}
