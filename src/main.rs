use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use stint_sync::config::ServerConfig;
use stint_sync::{Config, HeadlessEnvironment, SyncEngine, SyncView};

#[derive(Parser, Debug)]
#[command(name = "stint-sync")]
#[command(about = "Headless sync monitor for the Stint time tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./stint.yaml, then $XDG_CONFIG_HOME/stint/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Server base URL, overriding the config file
  #[arg(short, long)]
  server: Option<String>,

  /// Probe once, print the verdict, and exit (0 online, 1 offline)
  #[arg(long)]
  check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_target(false)
    .init();

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let config = if let Some(url) = args.server {
    Config {
      server: ServerConfig { url, ..config.server },
      ..config
    }
  } else {
    config
  };

  let env = HeadlessEnvironment::new(config.data_dir.clone());
  let engine = SyncEngine::start(config, &env).await?;

  if args.check {
    let online = engine.status().is_online;
    println!("{}", if online { "online" } else { "offline" });
    engine.dispose();
    std::process::exit(if online { 0 } else { 1 });
  }

  watch_loop(&engine).await;

  engine.dispose();
  Ok(())
}

/// Print the sync view on every change until Ctrl-C.
async fn watch_loop(engine: &SyncEngine) {
  let mut view_rx = engine.subscribe_view();
  print_view(&view_rx.borrow_and_update().clone());

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        tracing::info!("shutting down");
        break;
      }
      changed = view_rx.changed() => {
        if changed.is_err() {
          break;
        }
        print_view(&view_rx.borrow_and_update().clone());
      }
    }
  }
}

fn print_view(view: &SyncView) {
  let connectivity = if view.is_online { "online" } else { "offline" };
  let freshness = match view.last_update_label() {
    Some(label) => format!("last update {}", label),
    None => "no data yet".to_string(),
  };
  let state = if view.is_refreshing {
    "refreshing"
  } else if view.is_stale {
    "stale"
  } else {
    "fresh"
  };
  println!("[{}] {} ({})", connectivity, state, freshness);
}
