//! Headless harness for the plugin engine.
//!
//! Discovers plugins, starts the scheduler, and streams every published
//! menu tree as one JSON object per line on stdout until Ctrl-C. Useful
//! for developing plugins without a rendering frontend:
//!
//! ```text
//! barista --dir ~/plugins
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use barista::{EngineState, Scheduler, ScriptRunner, config, plugins};

struct Args {
    plugin_dir: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args { plugin_dir: None };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--dir" | "-d" => {
                let value = iter.next().context("--dir requires a path")?;
                args.plugin_dir = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                println!("usage: barista [--dir <plugin directory>]");
                std::process::exit(0);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let mut app_config = config::load_app_config();
    if let Some(dir) = args.plugin_dir {
        app_config.plugin_dir = Some(dir);
    }

    let plugin_dir = app_config
        .plugin_dir
        .clone()
        .context("no plugin directory configured; pass --dir or set pluginDir in config.json")?;
    let default_interval = app_config.default_refresh_secs.map(Duration::from_secs);
    let timeout = Duration::from_secs(app_config.exec_timeout_secs);

    let sources = plugins::discover(&plugin_dir, default_interval)
        .map_err(|e| anyhow::anyhow!(e))?;
    if sources.is_empty() {
        tracing::warn!(dir = %plugin_dir.display(), "no plugins found");
    }

    let state = EngineState::new(app_config);
    let scheduler = Scheduler::new(state, ScriptRunner::new(timeout));

    for source in sources {
        let id = source.id.clone();
        tracing::info!(
            plugin = %id,
            interval_secs = ?source.refresh_secs,
            "registering plugin"
        );
        scheduler.register(source);
        let Some(mut rx) = scheduler.subscribe(&id) else {
            continue;
        };
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let tree = rx.borrow_and_update().clone();
                let record = serde_json::json!({ "plugin": id, "tree": &*tree });
                match serde_json::to_string(&record) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::error!(plugin = %id, error = %e, "failed to encode tree"),
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    scheduler.shutdown();
    Ok(())
}
