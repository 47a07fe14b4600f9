use std::{env, net::SocketAddr, path::Path, sync::Arc};

use clap::{Args, Parser, Subcommand};
use metricdb::Repository;
use metricdb_server::{
    config::{self, Config, Telemetry},
    httpd,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{net::TcpListener, runtime::Builder, signal};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load metricdb config: {0}")]
    Config(#[from] config::Error),
    #[error("metricdb HTTP API failed: {0}")]
    Httpd(#[from] httpd::Error),
}

fn default_config_path() -> String {
    "/etc/metricdb/metricdb.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API with the specified configuration
    Run(RunCommand),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckCommand),
}

#[derive(Args)]
struct RunCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// address to bind the HTTP API to, overrides the configuration file
    #[clap(long)]
    binding_addr: Option<SocketAddr>,
}

#[derive(Args)]
struct ConfigCheckCommand {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

/// Load configuration from the `METRICDB_CONFIG` environment variable if set,
/// else from `config_path`.
fn load_config(config_path: &str) -> Result<Config, Error> {
    let config = if let Ok(contents) = env::var("METRICDB_CONFIG") {
        debug!("Using config from env var 'METRICDB_CONFIG'");
        Config::from_yaml(&contents)
    } else {
        debug!("Attempting to open configuration file at: {config_path}");
        Config::load(Path::new(config_path))
    };
    config.map_err(|err| {
        error!("Configuration validation failed: {err}");
        Error::Config(err)
    })
}

fn get_config(args: &RunCommand) -> Result<Config, Error> {
    let mut config = load_config(&args.config_path)?;
    if let Some(addr) = args.binding_addr {
        config.binding_addr = addr;
    }
    Ok(config)
}

fn install_telemetry(telemetry: Option<Telemetry>) {
    match telemetry {
        None => debug!("No telemetry configured"),
        Some(Telemetry::Prometheus {
            addr,
            global_labels,
        }) => {
            let mut builder = PrometheusBuilder::new().with_http_listener(addr);
            for (k, v) in global_labels {
                builder = builder.add_global_label(k, v);
            }
            match builder.install() {
                Ok(()) => info!("Prometheus exporter listening on {addr}"),
                Err(err) => error!("Failed to install prometheus recorder: {err}"),
            }
        }
    }
}

async fn inner_main(config: Config) -> Result<(), Error> {
    install_telemetry(config.telemetry);

    let repository = Arc::new(Repository::new(config.backend));
    let listener = TcpListener::bind(config.binding_addr).await?;

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c"),
            Err(err) => error!("Unable to listen for ctrl-c, shutting down: {err}"),
        }
    };

    metricdb_server::serve(
        listener,
        config.concurrent_requests_max,
        repository,
        shutdown,
    )
    .await?;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let args = match Cli::parse().command {
        Commands::Run(run_cmd) => run_cmd,
        Commands::ConfigCheck(config_check_cmd) => {
            match load_config(&config_check_cmd.config_path) {
                Ok(_) => {
                    info!("Configuration file is valid");
                    std::process::exit(0)
                }
                Err(_) => std::process::exit(1),
            }
        }
    };

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting metricdb {version}.");

    let config = get_config(&args)?;
    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    info!("Bye. :)");
    res
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Commands};

    #[test]
    fn run_parses_overrides() {
        let cli = Cli::parse_from([
            "metricdbd",
            "run",
            "--config-path",
            "/tmp/metricdb.yaml",
            "--binding-addr",
            "127.0.0.1:9999",
        ]);
        match cli.command {
            Commands::Run(run) => {
                assert_eq!(run.config_path, "/tmp/metricdb.yaml");
                assert_eq!(
                    run.binding_addr.map(|a| a.to_string()).as_deref(),
                    Some("127.0.0.1:9999")
                );
            }
            Commands::ConfigCheck(_) => panic!("expected run"),
        }
    }

    #[test]
    fn config_check_defaults_path() {
        let cli = Cli::parse_from(["metricdbd", "config-check"]);
        match cli.command {
            Commands::ConfigCheck(check) => {
                assert_eq!(check.config_path, "/etc/metricdb/metricdb.yaml");
            }
            Commands::Run(_) => panic!("expected config-check"),
        }
    }
}
