//! folio CLI application
//!
//! Maintenance front end for the folio page cache.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use folio_cli::cli::{
    self, Cli, CliError, Commands, EXIT_OK, EXIT_SIGINT, exit_code_for, render_error,
};
use folio_cli::tracing::{Level, TracingConfig, init_tracing};
use folio_cli::{commands, command_span, shutdown, watch};

fn main() {
    // Tracing may be unusable during a panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    let tracing_config = TracingConfig {
        format: cli.log_format,
        level: Level::from(cli.level),
        ..Default::default()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("{e:?}");
    }

    let exit_code = if cli.command.requires_async_runtime() {
        run_with_tokio(cli)
    } else {
        run_sync(&cli)
    };
    std::process::exit(exit_code);
}

/// Run a one-shot command without a tokio runtime
fn run_sync(cli: &Cli) -> i32 {
    let _ = ctrlc::set_handler(|| std::process::exit(EXIT_SIGINT));

    let span = command_span!(cli.command.name());
    let _enter = span.enter();

    let result = commands::open_cache(&cli.cache)
        .and_then(|cache| commands::execute(&cli.command, &cache))
        .and_then(|output| output.render(cli.json));
    match result {
        Ok(text) => {
            if !text.is_empty() {
                println!("{text}");
            }
            EXIT_OK
        }
        Err(err) => {
            render_error(&err, cli.json);
            exit_code_for(&err)
        }
    }
}

/// Create tokio runtime and run the scheduler
fn run_with_tokio(cli: Cli) -> i32 {
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let err = CliError::other(format!("Failed to create tokio runtime: {e}"));
            render_error(&err, cli.json);
            return exit_code_for(&err);
        }
    };

    match rt.block_on(run_watch(&cli)) {
        Ok(()) => EXIT_OK,
        Err(err) => {
            render_error(&err, cli.json);
            exit_code_for(&err)
        }
    }
}

async fn run_watch(cli: &Cli) -> Result<(), CliError> {
    let Commands::Watch {
        sweep_interval,
        eviction_interval,
    } = &cli.command
    else {
        return Err(CliError::other("not an async command"));
    };

    let cache = commands::open_cache(&cli.cache)?;
    let schedule = watch::Schedule::from_cache(&cache, *sweep_interval, *eviction_interval);
    let coordinator = shutdown::install_signal_handlers();

    let summary = watch::run(cache, schedule, coordinator).await;
    if cli.json {
        let envelope = cli::OkEnvelope::new(summary);
        let json = serde_json::to_string(&envelope)
            .map_err(|e| CliError::other(format!("JSON serialization failed: {e}")))?;
        println!("{json}");
    } else {
        println!(
            "Stopped after {} sweeps and {} evictions, freed {}",
            summary.sweeps,
            summary.evictions,
            commands::format_bytes(summary.bytes_freed)
        );
    }
    Ok(())
}
