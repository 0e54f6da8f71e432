use std::{fs::File, sync::Arc};

use anyhow::{Context, Result, bail};
use bank_ledger::{
    adapter::{ReplayService, http::HttpServer, socket::SocketServer, websocket::WebSocketServer},
    config::ServerConfig,
    dispatcher::CommandDispatcher,
    store::in_memory_store::InMemoryAccountStore,
    updates::UpdateFeed,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "usage: bank-ledger <socket|http|websocket> [addr] | bank-ledger replay <file.csv>";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bank_ledger=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let mode = args.next().context(USAGE)?;
    match mode.as_str() {
        "socket" => {
            let config = ServerConfig::from_env(args.next().as_deref())?;
            SocketServer::bind(&config, dispatcher())?.run()
        }
        "http" => {
            let config = ServerConfig::from_env(args.next().as_deref())?;
            HttpServer::bind(&config, dispatcher())?.run()
        }
        "websocket" => {
            let config = ServerConfig::from_env(args.next().as_deref())?;
            websocket(&config)
        }
        "replay" => {
            let filename = args.next().context(USAGE)?;
            replay(&filename)
        }
        other => bail!("Unknown mode `{other}`, {USAGE}"),
    }
}

fn dispatcher() -> CommandDispatcher<InMemoryAccountStore> {
    CommandDispatcher::new(Arc::new(InMemoryAccountStore::default()))
}

fn websocket(config: &ServerConfig) -> Result<()> {
    let feed = Arc::new(UpdateFeed::default());
    let dispatcher = dispatcher().with_updates(Arc::clone(&feed));
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    runtime.block_on(async {
        WebSocketServer::bind(config, dispatcher, &feed)
            .await?
            .run()
            .await
    })
}

fn replay(filename: &str) -> Result<()> {
    let file = File::open(filename).with_context(|| format!("Failed to open `{filename}`"))?;

    let service = ReplayService {
        input: file,
        output: &mut std::io::stdout(),
        error_printer: Box::new(|line, err| {
            // refusals are ordinary ledger outcomes, only script errors are worth a warning
            if err.is_malformed() {
                warn!(line, %err, "skipped script row");
            } else {
                debug!(line, %err, "command refused");
            }
        }),
    };
    service.run()
}
