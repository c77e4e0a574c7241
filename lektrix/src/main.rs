use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lektrix::config::{ArchiveSettings, Settings};
use lektrix::{
    logging, Archiver, ImageServer, Ingestor, Rclone, Renderer, Schedule, Store, UniformSignal,
};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "lektrix", version)]
#[command(about = "Sample a signal, chart the last hour, serve the chart, back up the store")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the store file and schema, then exit
    Init,

    /// Sample the signal and append it to the store until interrupted
    Ingest,

    /// Back up the store on a schedule, or once with --once
    Archive {
        /// Take a single backup and exit
        #[arg(long)]
        once: bool,

        /// Push the backup directory to the remote after the backup (with --once)
        #[arg(long, requires = "once")]
        push: bool,
    },

    /// Render the chart on a schedule, or once with --once
    Render {
        /// Render a single chart and exit
        #[arg(long)]
        once: bool,
    },

    /// Serve the chart over HTTP until interrupted
    Serve {
        /// Address to bind (loopback unless --expose)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Listen on all interfaces
        #[arg(long)]
        expose: bool,
    },

    /// Print the effective configuration as JSON and exit
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init().context("failed to install logger")?;

    let mut settings = Settings::load(args.config.as_deref()).context("failed to load configuration")?;
    let store = Store::new(&settings.store.path).with_busy_timeout(settings.store.busy_timeout);

    match args.command {
        Command::Init => {
            store
                .initialize()
                .with_context(|| format!("failed to initialize {}", store.path().display()))?;
            info!(path = %store.path().display(), "store ready");
            Ok(())
        }
        Command::Ingest => run_ingest(store, &settings).await,
        Command::Archive { once, push } => {
            let archiver = build_archiver(store, &settings.archive);
            archiver.prepare()?;
            if once {
                archiver.run_once(push || settings.archive.push);
                Ok(())
            } else {
                run_archive_daemon(archiver, &settings.archive).await
            }
        }
        Command::Render { once } => {
            let renderer = Renderer::new(store, &settings.render.chart_path)
                .with_window(settings.render.window)
                .with_size(settings.render.width, settings.render.height);
            if once {
                renderer.render_once();
                Ok(())
            } else {
                let handle = Schedule::new(settings.render.interval).spawn(renderer);
                shutdown_signal().await;
                handle.shutdown().await.context("render schedule failed")?;
                Ok(())
            }
        }
        Command::Serve { host, port, expose } => {
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            settings.server.expose |= expose;
            run_server(&settings).await
        }
        Command::Config => {
            let json = serde_json::to_string_pretty(&settings)?;
            println!("{json}");
            Ok(())
        }
    }
}

async fn run_ingest(store: Store, settings: &Settings) -> Result<()> {
    // A store that cannot be created yet is retried by every cycle.
    if let Err(e) = store.initialize() {
        warn!(component = "ingest", error = %e, "store not ready, will retry");
    }

    let source = UniformSignal::new(settings.ingest.min, settings.ingest.max);
    let handle = Schedule::new(settings.ingest.interval).spawn(Ingestor::new(store, source));
    shutdown_signal().await;
    handle.shutdown().await.context("ingest schedule failed")?;
    Ok(())
}

fn build_archiver(store: Store, settings: &ArchiveSettings) -> Archiver {
    let archiver = Archiver::new(store, &settings.dir, settings.label.clone());
    match &settings.remote {
        Some(remote) => archiver.with_remote(Box::new(Rclone::new(&settings.rclone, remote.clone()))),
        None => archiver,
    }
}

async fn run_archive_daemon(archiver: Archiver, settings: &ArchiveSettings) -> Result<()> {
    if settings.push_on_start {
        archiver.push();
    }

    let handle = Schedule::new(settings.interval).spawn(archiver);
    shutdown_signal().await;
    let (archiver, _) = handle.shutdown().await.context("archive schedule failed")?;

    if settings.push_on_shutdown {
        archiver.push();
    }
    Ok(())
}

async fn run_server(settings: &Settings) -> Result<()> {
    let addr = settings.server.bind_addr()?;
    let server = ImageServer::bind(addr, &settings.render.chart_path)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(stop_rx));
    shutdown_signal().await;
    let _ = stop_tx.send(true);
    task.await.context("server task failed")?;
    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}
