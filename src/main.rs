/*
 * grelay - SMTP to Microsoft Graph relay
 * Copyright (C) 2026 The grelay Authors
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/
use grelay::config::{get_logger_config, Config};
use grelay::log_channels;
use grelay::server::ServerRelay;

#[derive(Debug, clap::Parser, PartialEq, Eq)]
#[command(about, version, author)]
struct Args {
    /// path of the toml configuration
    #[arg(short, long)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, clap::Subcommand, PartialEq, Eq)]
enum Commands {
    /// Show the loaded config (as json, secrets redacted)
    ConfigShow,
}

fn main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();
    println!("Loading configuration at path='{}'", args.config);

    let config = Config::from_toml(&std::fs::read_to_string(&args.config)?)?;

    if let Some(Commands::ConfigShow) = args.command {
        println!(
            "Loaded configuration: {}",
            serde_json::to_string_pretty(&config)?
        );
        return Ok(());
    }

    log4rs::init_config(get_logger_config(&config)?)?;
    log::info!(
        target: log_channels::SERVER,
        "grelay {} starting",
        env!("CARGO_PKG_VERSION")
    );

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            let config = std::sync::Arc::new(config);

            let (shutdown_sender, shutdown_receiver) = tokio::sync::watch::channel(false);

            let server = ServerRelay::new(config).await?;
            let sweeper = server.token_cache().start_sweeper(shutdown_receiver.clone());

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!(
                        target: log_channels::SERVER,
                        "interrupt received, shutting down"
                    );
                    let _ = shutdown_sender.send(true);
                }
            });

            let served = server.listen_and_serve(shutdown_receiver).await;
            let _ = sweeper.await;
            served
        })
}
