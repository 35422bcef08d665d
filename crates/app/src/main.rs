mod cli;
mod commands;
mod config;
mod session;
mod telemetry;

use std::io;

use anyhow::Result;
use backend_link::ApiClient;
use clap::Parser;

use crate::{
    cli::{Cli, Command},
    config::WatchConfig,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::enter_runtime(&cli.telemetry());
    let backend = cli.backend.to_config();

    match cli.command {
        Command::Watch(args) => session::run(backend, WatchConfig::try_from(args)?),
        command => {
            let api = ApiClient::new(backend)?;
            commands::run(command, &api, &mut io::stdout().lock())
        }
    }
}
