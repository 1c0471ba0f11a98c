// crates/nlagent-rs-linux/src/main.rs

use clap::Parser;
use clap::error::ErrorKind;
use log::{LevelFilter, debug, error, info};
use nlagent_rs_linux::agent::Agent;
use nlagent_rs_linux::config;
use std::path::PathBuf;
use std::process;

/// Netlink routing-information relay.
#[derive(Debug, Parser)]
#[command(name = "nlagent")]
struct Cli {
    /// Configuration file.
    #[arg(short = 'c', value_name = "FILE", default_value = config::DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Trace file; traces go to stdout when absent.
    #[arg(short = 'f', value_name = "FILE")]
    trace_file: Option<PathBuf>,

    /// Trace level: 0=ERR, 1=NOTICE, 2=WARN, 3=INFO, 4=DEBUG.
    #[arg(short = 't', value_name = "LEVEL", default_value_t = 0)]
    trace_level: u8,

    /// Stay in the foreground; process supervision is left to the
    /// service manager.
    #[arg(short = 'N')]
    dont_daemonize: bool,

    /// Print version and exit.
    #[arg(short = 'v')]
    version: bool,
}

fn init_logging(cli: &Cli) -> std::io::Result<()> {
    let level = match cli.trace_level {
        0 => LevelFilter::Error,
        1 | 2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Some(path) = &cli.trace_file {
        let file = std::fs::File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            match error.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => process::exit(0),
                _ => process::exit(1),
            }
        }
    };

    if cli.version {
        println!("nlagent version {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if let Err(error) = init_logging(&cli) {
        eprintln!("failed to open trace file: {}", error);
        process::exit(1);
    }

    if cli.dont_daemonize {
        debug!("running in the foreground");
    }

    let config = match config::load(&cli.config_file) {
        Ok(config) => config,
        Err(error) => {
            error!("failed to read config {}: {}", cli.config_file.display(), error);
            process::exit(1);
        }
    };

    let agent = match Agent::new(&config) {
        Ok(agent) => agent,
        Err(error) => {
            error!("failed to set up modules: {}", error);
            process::exit(1);
        }
    };

    info!("nlagent starting");
    if let Err(error) = agent.run().await {
        error!("agent failed: {}", error);
        process::exit(1);
    }

    println!("done");
}
