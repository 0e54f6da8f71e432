//! Transport glue. Each adapter turns bytes into one command, hands it to the
//! [`CommandDispatcher`] and turns the reply back into bytes. None of them
//! touch the store directly.

use std::{
    io::{self, Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use anyhow::Result;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    account::AccountNumber,
    command::{CommandKind, ErrorKind, Request, Response},
    dispatcher::CommandDispatcher,
    store::in_memory_store::InMemoryAccountStore,
};
use csv_report::{AccountRow, write_balance_sheet};
use csv_script::{ScriptCommand, ScriptReader};

pub mod csv_report;
pub mod csv_script;
pub mod http;
pub mod socket;
pub mod websocket;

/// A read that gave up after the configured read timeout. Platforms disagree
/// on which kind they report.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Accepts connections forever, serving each on its own thread. A failing
/// connection is logged and dropped; it never stops the listener.
pub(crate) fn accept_loop<F>(listener: TcpListener, transport: &'static str, handler: F) -> Result<()>
where
    F: Fn(TcpStream) -> Result<()> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    info!(transport, addr = ?listener.local_addr().ok(), "listening");
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(transport, %err, "failed to accept connection");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        info!(transport, ?peer, "new connection");
        let handler = Arc::clone(&handler);
        let spawned = thread::Builder::new()
            .name(format!("{transport}-conn"))
            .spawn(move || {
                if let Err(err) = handler(stream) {
                    error!(transport, ?peer, "connection failed: {err:#}");
                }
            });
        if let Err(err) = spawned {
            error!(transport, %err, "failed to spawn connection thread");
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Parse(#[from] csv::Error),
    #[error("Column `{field}` is required for {command:?}")]
    MissingField {
        command: ScriptCommand,
        field: &'static str,
    },
    #[error("{kind:?} refused: {error:?}")]
    Refused { kind: CommandKind, error: ErrorKind },
    #[error("Account {0} could not be closed")]
    NotClosed(AccountNumber),
}

impl ReplayError {
    /// Script problems, as opposed to the ledger refusing a well-formed command.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::MissingField { .. })
    }
}

/// Replays a CSV command script against a fresh ledger and prints every
/// account as CSV once the script is exhausted.
pub struct ReplayService<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub error_printer: Box<dyn FnMut(u64, ReplayError)>,
}

impl<'w, R, W> ReplayService<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let dispatcher = CommandDispatcher::new(Arc::new(InMemoryAccountStore::default()));

        for (line, request) in ScriptReader::new(self.input) {
            let request = match request {
                Ok(request) => request,
                Err(err) => {
                    (self.error_printer)(line, err);
                    continue;
                }
            };
            let response = dispatcher.dispatch(&request);
            if let Some(err) = refusal(&request, &response) {
                (self.error_printer)(line, err);
            }
        }

        write_balance_sheet(
            self.output,
            dispatcher.store().accounts().iter().map(AccountRow::from),
        )
    }
}

fn refusal(request: &Request, response: &Response) -> Option<ReplayError> {
    match (request, response) {
        (Request::CloseAccount { number }, Response::CloseAccount { closed: false }) => {
            Some(ReplayError::NotClosed(*number))
        }
        (_, Response::GetAccount { found: false, .. }) => Some(ReplayError::Refused {
            kind: CommandKind::GetAccount,
            error: ErrorKind::AccountNotFound,
        }),
        _ => response.error_kind().map(|error| ReplayError::Refused {
            kind: response.kind(),
            error,
        }),
    }
}
