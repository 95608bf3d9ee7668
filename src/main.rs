mod cli;

use streamvault::{
    abr::AbrManager,
    config,
    session::StreamSource,
    sweep,
    timeshift::TimeshiftManager,
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;

async fn run_stream(
    stream_id: u32,
    url: String,
    with_abr: bool,
    json: bool,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    tracing::info!(stream_id, url = %url, "Starting streamvault");

    let timeshift = Arc::new(TimeshiftManager::new(&config));
    let abr = with_abr.then(|| Arc::new(AbrManager::new(&config)));

    let mut sweep_roots = vec![timeshift.buffer_root().to_path_buf()];
    if let Some(abr) = &abr {
        sweep_roots.push(abr.output_root().to_path_buf());
    }
    sweep::start_stale_dir_sweep(config.sweep.clone(), sweep_roots);

    timeshift.start(StreamSource::new(stream_id, url.clone()))?;
    if let Some(abr) = &abr {
        abr.start(StreamSource::new(stream_id, url), None)?;
    }

    let mut status_interval = tokio::time::interval(config.timeshift.poll_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupt received, stopping sessions");
                break;
            }
            _ = status_interval.tick() => {
                print_status(&timeshift, abr.as_deref(), stream_id, json)?;
            }
        }
    }

    timeshift.stop(stream_id)?;
    if let Some(abr) = &abr {
        abr.stop(stream_id)?;
    }

    Ok(())
}

fn print_status(
    timeshift: &TimeshiftManager,
    abr: Option<&AbrManager>,
    stream_id: u32,
    json: bool,
) -> Result<()> {
    let session = timeshift.get_session(stream_id)?;
    let position = timeshift.get_position(stream_id)?;

    if json {
        let mut value = serde_json::json!({
            "session": session.summary(),
            "position": position,
        });
        if let Some(abr) = abr {
            value["master_manifest"] =
                serde_json::to_value(abr.master_manifest_path(stream_id)?)?;
        }
        println!("{}", serde_json::to_string(&value)?);
    } else {
        let range = position.available_range;
        print!(
            "[{}] {} buffered {:.0}s-{:.0}s",
            stream_id,
            session.status(),
            range.start,
            range.end
        );
        if let Some(abr) = abr {
            match abr.master_manifest_path(stream_id)? {
                Some(path) => print!("  abr: {}", path.display()),
                None => print!("  abr: warming up"),
            }
        }
        println!();
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "streamvault=trace".to_string()
        } else {
            "streamvault=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Run {
            stream_id,
            url,
            abr,
            json,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_stream(stream_id, url, abr, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("streamvault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    println!("Checking external tools...\n");

    match which::which(&config.transcoder.binary) {
        Ok(path) => {
            println!("✓ {} - {}", config.transcoder.binary, path.display());
            println!("\nAll required tools are available!");
        }
        Err(_) => {
            println!("✗ {}", config.transcoder.binary);
            println!("\nTranscoder not found. Install it or set transcoder.binary in the config.");
        }
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Transcoder: {}", config.transcoder.binary);
            println!("  Buffer root: {}", config.timeshift.buffer_root.display());
            println!(
                "  Timeshift: {}s segments, {}s retention",
                config.timeshift.segment_duration_secs, config.timeshift.retention_secs
            );
            println!("  ABR root: {}", config.abr.output_root.display());
            println!("  Sweep enabled: {}", config.sweep.enabled);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Transcoder: {}", config.transcoder.binary);
            println!("  Buffer root: {}", config.timeshift.buffer_root.display());
        }
    }

    Ok(())
}
