use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod catalog;
mod cli;
mod config;
mod describe;
mod images;
mod providers;
mod search;
#[cfg(test)]
mod tests;
mod web;

use config::Settings;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let settings = Settings::load()?;

    match args.command {
        cli::Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind_addr.clone());
            log::info!("starting {} ({})", settings.app_name, settings.app_env);

            let state = app::AppFactory::build(settings)?;
            web::start_daemon(state, &bind)
        }

        cli::Command::Settings {} => {
            print!("{}", settings.to_redacted_yaml()?);
            Ok(())
        }
    }
}
