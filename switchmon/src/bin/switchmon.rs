use std::{
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use switchmon::{
    chart::{self, Plot},
    config::{self, Config},
    poller::{self, Poller},
    port::{self, PortId},
    signals::Shutdown,
    store::{self, CounterStore, Postgres},
    switch::{self, Switch},
};
use tokio::{runtime::Builder, signal, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::Error),
    #[error("Invalid port: {0}")]
    Port(#[from] port::Error),
    #[error("Store error: {0}")]
    Store(#[from] store::Error),
    #[error("Switch error: {0}")]
    Switch(#[from] switch::Error),
    #[error("Poll failed: {0}")]
    Poller(#[from] poller::Error),
    #[error("Chart error: {0}")]
    Chart(#[from] chart::Error),
    #[error("Failed to install Prometheus exporter: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
    #[error("Invalid choice '{0}', enter 'single' or 'all'")]
    Choice(String),
}

fn default_config_path() -> String {
    "/etc/switchmon/switchmon.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// path on disk to the configuration file
    #[clap(long, global = true, default_value_t = default_config_path())]
    config_path: String,
    /// seconds to wait for in-flight work when shutting down
    #[clap(long, global = true, default_value_t = 30)]
    max_shutdown_delay: u16,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the switch and store its interface counters
    Poll(PollCommand),
    /// Chart stored counters as SVG
    Plot(PlotCommand),
    /// List ports that have carried traffic
    Ports,
    /// Validate configuration file and exit
    ConfigCheck,
}

#[derive(Args)]
struct PollCommand {
    /// poll once and exit, non-zero if the poll failed
    #[clap(long)]
    once: bool,
}

#[derive(Args)]
struct PlotCommand {
    /// where to write the chart
    #[clap(long, global = true)]
    output: Option<PathBuf>,
    /// chart one port or all of them, prompted for if absent
    #[command(subcommand)]
    mode: Option<PlotMode>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum PlotMode {
    /// Chart one port, given as MODULE/SUBMODULE/PORT
    Single { port: String },
    /// Overlay every port that has carried traffic
    All,
}

fn prompt(question: &str) -> Result<String, Error> {
    let mut stdout = io::stdout().lock();
    write!(stdout, "{question}")?;
    stdout.flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

fn parse_choice(
    choice: &str,
    port: impl FnOnce() -> Result<String, Error>,
) -> Result<PlotMode, Error> {
    match choice.to_lowercase().as_str() {
        "single" => Ok(PlotMode::Single { port: port()? }),
        "all" => Ok(PlotMode::All),
        _ => Err(Error::Choice(choice.to_string())),
    }
}

fn prompt_plot_mode() -> Result<PlotMode, Error> {
    let choice = prompt(
        "Do you want to plot data for a single port or all ports? Enter 'single' or 'all': ",
    )?;
    parse_choice(&choice, || prompt("Enter the port in format X/X/X: "))
}

fn default_output(mode: &PlotMode, port: Option<PortId>) -> PathBuf {
    match (mode, port) {
        (PlotMode::Single { .. }, Some(p)) => PathBuf::from(format!(
            "switchinfo-{}-{}-{}.svg",
            p.module, p.submodule, p.port
        )),
        _ => PathBuf::from("switchinfo-all.svg"),
    }
}

async fn plot(
    store: &impl CounterStore,
    mode: &PlotMode,
    output: Option<&Path>,
) -> Result<(), Error> {
    match mode {
        PlotMode::Single { port } => {
            let port: PortId = port.parse()?;
            let path = output.map_or_else(|| default_output(mode, Some(port)), Path::to_path_buf);
            let samples = store.fetch(port).await?;
            info!("Fetched {} samples for port {port}", samples.len());
            chart::render_port(&Plot::from_series(port, &samples), &path)?;
        }
        PlotMode::All => {
            let ports = store.fetch_all_port_ids().await?;
            if ports.is_empty() {
                warn!("No active ports found.");
                return Ok(());
            }
            let mut plots = Vec::with_capacity(ports.len());
            for port in ports {
                let samples = store.fetch(port).await?;
                plots.push(Plot::from_series(port, &samples));
            }
            let path = output.map_or_else(|| default_output(mode, None), Path::to_path_buf);
            chart::render_all(&plots, &path)?;
        }
    }
    Ok(())
}

async fn inner_main(
    config: Config,
    command: Commands,
    plot_mode: Option<PlotMode>,
) -> Result<(), Error> {
    if let Some(addr) = config.telemetry.prometheus_addr {
        info!("Exposing Prometheus metrics on {addr}");
        PrometheusBuilder::new().with_http_listener(addr).install()?;
    }

    let store = Postgres::connect(&config.database).await?;
    let res = match command {
        Commands::Poll(cmd) => poll(&config, store.clone(), cmd.once).await,
        Commands::Plot(cmd) => match plot_mode {
            Some(mode) => plot(&store, &mode, cmd.output.as_deref()).await,
            None => Ok(()),
        },
        Commands::Ports => {
            let ports = store.fetch_all_port_ids().await?;
            let mut stdout = io::stdout().lock();
            for port in ports {
                writeln!(stdout, "{port}")?;
            }
            Ok(())
        }
        Commands::ConfigCheck => Ok(()),
    };
    store.close().await;
    res
}

async fn poll(config: &Config, store: Postgres, once: bool) -> Result<(), Error> {
    store.ensure_schema().await?;
    let switch = Switch::new(&config.switch)?;
    let shutdown = Shutdown::new();
    let poller = Poller::new(config.poll.clone(), switch, store, shutdown.clone());

    if once {
        let rows = poller.poll_once().await?;
        info!("Stored {rows} readings");
        return Ok(());
    }

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c");
                shutdown.signal();
            }
            Err(err) => error!("Unable to listen for ctrl-c: {err}"),
        }
    });
    poller.run().await?;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting switchmon {version}.");

    let cli = Cli::parse();
    let config_path = Path::new(&cli.config_path);

    if let Commands::ConfigCheck = cli.command {
        match config::load(config_path) {
            Ok(_) => {
                info!("Configuration at {} is valid", config_path.display());
                std::process::exit(0)
            }
            Err(err) => {
                error!("Configuration is invalid: {err}");
                std::process::exit(1)
            }
        }
    }

    let config = config::load(config_path)?;
    let plot_mode = match &cli.command {
        Commands::Plot(cmd) => Some(match &cmd.mode {
            Some(mode) => mode.clone(),
            None => prompt_plot_mode()?,
        }),
        _ => None,
    };

    let max_shutdown_delay = Duration::from_secs(cli.max_shutdown_delay.into());
    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config, cli.command, plot_mode));
    info!(
        "Shutting down runtime with a {} second delay.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye. :)");
    res
}
