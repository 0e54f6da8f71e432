//! Websocket transport. Text frames carry the same JSON envelopes as the other
//! transports. On top of the replies, every connection is pushed an
//! [`UpdateNotice`] for each account changed by any client.

use std::{net::SocketAddr, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::{
    net::TcpListener,
    sync::broadcast::{self, error::RecvError},
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    account::AccountNumber,
    codec,
    command::PROTOCOL_VERSION,
    config::ServerConfig,
    dispatcher::CommandDispatcher,
    store::AccountStore,
    updates::{UpdateFeed, UpdateNotice},
};

pub const WEBSOCKET_PATH: &str = "/ws";

/// Updates a slow client may fall behind by before it starts missing some.
const UPDATE_BUFFER: usize = 256;

struct Shared<S> {
    dispatcher: CommandDispatcher<S>,
    updates: broadcast::Sender<AccountNumber>,
    read_timeout: Duration,
    max_frame_bytes: usize,
}

pub struct WebSocketServer<S> {
    listener: TcpListener,
    shared: Arc<Shared<S>>,
}

impl<S> WebSocketServer<S>
where
    S: AccountStore + 'static,
{
    /// `feed` must be the feed `dispatcher` publishes into, otherwise clients
    /// never hear about changes.
    pub async fn bind(
        config: &ServerConfig,
        dispatcher: CommandDispatcher<S>,
        feed: &UpdateFeed,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind websocket server to {}", config.bind_addr))?;
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        forward_updates(feed, updates.clone())?;
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                dispatcher,
                updates,
                read_timeout: config.read_timeout,
                max_frame_bytes: config.max_frame_bytes,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> Result<()> {
        let Self { listener, shared } = self;
        info!(transport = "websocket", addr = ?listener.local_addr().ok(), "listening");
        let app = Router::new()
            .route(WEBSOCKET_PATH, get(upgrade::<S>))
            .with_state(shared);
        axum::serve(listener, app)
            .await
            .context("Websocket server stopped")
    }
}

/// The feed delivers on a std channel, so a plain thread moves its numbers
/// onto the broadcast channel every connection subscribes to.
fn forward_updates(feed: &UpdateFeed, updates: broadcast::Sender<AccountNumber>) -> Result<()> {
    let changed = feed.subscribe();
    thread::Builder::new()
        .name("websocket-updates".to_string())
        .spawn(move || {
            for number in changed {
                // fails only while no client is connected
                let _ = updates.send(number);
            }
        })
        .context("Failed to spawn the update forwarder")?;
    Ok(())
}

async fn upgrade<S>(ws: WebSocketUpgrade, State(shared): State<Arc<Shared<S>>>) -> impl IntoResponse
where
    S: AccountStore + 'static,
{
    ws.max_message_size(shared.max_frame_bytes)
        .on_upgrade(move |socket| serve_socket(socket, shared))
}

async fn serve_socket<S: AccountStore>(socket: WebSocket, shared: Arc<Shared<S>>) {
    // subscribe before the welcome, so nothing published after it is missed
    let mut updates = shared.updates.subscribe();
    let (mut sender, mut receiver) = socket.split();
    info!("new websocket connection");

    let welcome = UpdateNotice::Welcome {
        version: PROTOCOL_VERSION,
    };
    if let Err(err) = send_notice(&mut sender, &welcome).await {
        warn!("websocket closed before the welcome: {err:#}");
        return;
    }

    let idle = sleep(shared.read_timeout);
    tokio::pin!(idle);
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(number) => {
                    if let Err(err) = send_notice(&mut sender, &UpdateNotice::AccountChanged { number }).await {
                        warn!("failed to push account update: {err:#}");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client fell behind on account updates");
                }
                Err(RecvError::Closed) => break,
            },
            message = receiver.next() => {
                idle.as_mut().reset(Instant::now() + shared.read_timeout);
                let payload = match message {
                    Some(Ok(Message::Text(text))) => text.as_str().as_bytes().to_vec(),
                    Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    // pings are answered by axum
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => {
                        warn!(%err, "websocket read failed");
                        break;
                    }
                };
                debug!(bytes = payload.len(), "websocket request received");
                let reply = shared.dispatcher.handle(&payload);
                if let Err(err) = send_text(&mut sender, reply).await {
                    warn!("failed to send websocket reply: {err:#}");
                    break;
                }
            }
            () = &mut idle => {
                info!(timeout = ?shared.read_timeout, "closing idle websocket connection");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }
    debug!("websocket connection closed");
}

async fn send_notice(
    sender: &mut SplitSink<WebSocket, Message>,
    notice: &UpdateNotice,
) -> Result<()> {
    send_text(sender, codec::encode_notice(notice)?).await
}

async fn send_text(sender: &mut SplitSink<WebSocket, Message>, payload: Vec<u8>) -> Result<()> {
    let text = String::from_utf8(payload).context("Frame is not valid UTF-8")?;
    sender
        .send(Message::Text(text.into()))
        .await
        .context("Failed to write websocket frame")
}
