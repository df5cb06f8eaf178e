use anyhow::Result;
use clap::Parser;
use tracing::{debug, warn};

use neighbourhood::config::{Cli, Config};
use neighbourhood::screens::cli::{self, Command};
use neighbourhood::session::{self, Session};
use neighbourhood::App;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let app = App::open(cfg, Session::global())?;
    if let Some(token) = session::load_token(&app.config.data_dir) {
        match app.auth().restore(&token) {
            Ok(Some(profile)) => debug!(uid = %profile.uid, "session restored"),
            Ok(None) => session::clear_token(&app.config.data_dir)?,
            Err(e) => warn!(error = %e, "could not restore session"),
        }
    }
    cli::run(&app, cli.command.unwrap_or(Command::Whoami)).await
}
