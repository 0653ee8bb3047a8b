//! `play`: a command line audio player.
//!
//! Decodes a local file with Symphonia, converts it to 16-bit stereo at the device rate, and
//! streams it to a CPAL output through a small ring of queued buffers.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use play::cli;
use play::config::PlayConfig;
use play::runtime;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,play=info,play_core=info")),
        )
        .init();

    println!("{}", cli::BANNER);

    let args = match cli::Args::try_parse() {
        Ok(args) => args,
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("Error: {}.", cli::usage_error_message(&err));
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = ctrlc::set_handler(|| std::process::exit(130)) {
        tracing::warn!("failed to install Ctrl-C handler: {err}");
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}.");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &cli::Args) -> anyhow::Result<()> {
    if args.list_devices {
        return runtime::list_devices();
    }
    let config = PlayConfig::from_args(args);
    runtime::run_play(&config)?;
    Ok(())
}
