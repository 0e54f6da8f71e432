use std::{
    net::SocketAddr,
    sync::Arc,
    thread,
    time::Duration,
};

use bank_ledger::{
    account::AccountNumber,
    adapter::{
        socket::{SocketClient, SocketServer},
        websocket::{WEBSOCKET_PATH, WebSocketServer},
    },
    codec,
    command::{ErrorKind, PROTOCOL_VERSION, Request, RequestEnvelope, Response, ResponseEnvelope},
    config::ServerConfig,
    dispatcher::CommandDispatcher,
    store::in_memory_store::InMemoryAccountStore,
    updates::{UpdateFeed, UpdateNotice},
};
use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_FRAME: usize = 64 * 1024;
const PATIENCE: Duration = Duration::from_secs(5);

fn local_config() -> ServerConfig {
    ServerConfig {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        max_frame_bytes: MAX_FRAME,
        read_timeout: Duration::from_secs(30),
    }
}

/// Websocket server plus the dispatcher feeding it, so other transports can
/// share the same ledger.
async fn spawn_server(config: ServerConfig) -> (SocketAddr, CommandDispatcher<InMemoryAccountStore>) {
    let feed = Arc::new(UpdateFeed::default());
    let dispatcher = CommandDispatcher::new(Arc::new(InMemoryAccountStore::default()))
        .with_updates(Arc::clone(&feed));
    let server = WebSocketServer::bind(&config, dispatcher.clone(), &feed)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, dispatcher)
}

/// Connected client that has already seen the welcome.
async fn connect(addr: SocketAddr) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}{WEBSOCKET_PATH}"))
        .await
        .unwrap();
    assert_eq!(
        next_notice(&mut client).await,
        UpdateNotice::Welcome {
            version: PROTOCOL_VERSION
        }
    );
    client
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let message = timeout(PATIENCE, client.next())
            .await
            .expect("no frame in time")
            .expect("connection ended")
            .unwrap();
        if message.is_text() {
            return message.to_text().unwrap().to_owned();
        }
    }
}

async fn next_notice(client: &mut Client) -> UpdateNotice {
    codec::decode_notice(next_text(client).await.as_bytes()).unwrap()
}

/// Skips notices pushed in between, a client also hears about its own changes.
async fn next_reply(client: &mut Client) -> ResponseEnvelope {
    loop {
        if let Ok(reply) = codec::decode_response(next_text(client).await.as_bytes()) {
            return reply;
        }
    }
}

async fn send(client: &mut Client, envelope: &RequestEnvelope) -> ResponseEnvelope {
    let payload = String::from_utf8(codec::encode_request(envelope).unwrap()).unwrap();
    client.send(Message::text(payload)).await.unwrap();
    next_reply(client).await
}

#[tokio::test(flavor = "multi_thread")]
async fn websocket_round_trip() {
    let (addr, _) = spawn_server(local_config()).await;
    let mut client = connect(addr).await;

    let reply = send(
        &mut client,
        &RequestEnvelope::new(
            1,
            Request::CreateAccount {
                owner: "Alice".to_string(),
            },
        ),
    )
    .await;
    assert_eq!(reply.id, Some(1));
    assert_eq!(
        reply.reply,
        Response::CreateAccount {
            account_number: AccountNumber(1)
        }
    );

    let reply = send(
        &mut client,
        &RequestEnvelope::new(
            2,
            Request::Withdraw {
                number: AccountNumber(1),
                amount: dec!(1),
            },
        ),
    )
    .await;
    assert_eq!(reply.reply.error_kind(), Some(ErrorKind::Overdrawn));

    client
        .send(Message::text("garbage".to_string()))
        .await
        .unwrap();
    let reply = next_reply(&mut client).await;
    assert_eq!(reply.id, None);
    assert_eq!(reply.reply.error_kind(), Some(ErrorKind::Malformed));
}

#[tokio::test(flavor = "multi_thread")]
async fn account_changes_reach_every_connected_client() {
    let (addr, dispatcher) = spawn_server(local_config()).await;
    let mut watcher = connect(addr).await;
    let mut actor = connect(addr).await;

    send(
        &mut actor,
        &RequestEnvelope::new(
            1,
            Request::CreateAccount {
                owner: "Alice".to_string(),
            },
        ),
    )
    .await;
    assert_eq!(
        next_notice(&mut watcher).await,
        UpdateNotice::AccountChanged {
            number: AccountNumber(1)
        }
    );

    // a refused command changes nothing, so the next notice is the deposit
    send(
        &mut actor,
        &RequestEnvelope::new(
            2,
            Request::Withdraw {
                number: AccountNumber(1),
                amount: dec!(5),
            },
        ),
    )
    .await;
    send(
        &mut actor,
        &RequestEnvelope::new(
            3,
            Request::Deposit {
                number: AccountNumber(1),
                amount: dec!(5),
            },
        ),
    )
    .await;
    assert_eq!(
        next_notice(&mut watcher).await,
        UpdateNotice::AccountChanged {
            number: AccountNumber(1)
        }
    );

    // commands arriving over another transport are pushed as well
    let socket = SocketServer::bind(&local_config(), dispatcher).unwrap();
    let socket_addr = socket.local_addr().unwrap();
    thread::spawn(move || socket.run());
    let created = tokio::task::spawn_blocking(move || {
        let mut client = SocketClient::connect(socket_addr, MAX_FRAME).unwrap();
        client
            .send(&RequestEnvelope::new(
                4,
                Request::CreateAccount {
                    owner: "Bob".to_string(),
                },
            ))
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(
        created.reply,
        Response::CreateAccount {
            account_number: AccountNumber(2)
        }
    );
    assert_eq!(
        next_notice(&mut watcher).await,
        UpdateNotice::AccountChanged {
            number: AccountNumber(2)
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_websocket_is_closed() {
    let config = ServerConfig {
        read_timeout: Duration::from_millis(200),
        ..local_config()
    };
    let (addr, _) = spawn_server(config).await;
    let mut client = connect(addr).await;

    let message = timeout(PATIENCE, client.next())
        .await
        .expect("idle connection was kept open");
    assert!(matches!(
        message,
        None | Some(Err(_)) | Some(Ok(Message::Close(_)))
    ));
}
