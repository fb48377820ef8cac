//! End-to-end tests over an in-memory tokio stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use wsengine::{
    CloseCode, CloseFrame, Config, Connection, ExtensionRegistry, Message, MessageListener,
    Processor, StreamTransport, Transport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Sends every message straight back.
struct Echo;

impl MessageListener for Echo {
    fn on_message(&self, connection: &Connection, message: &Message) -> anyhow::Result<()> {
        connection.send(message)?;
        Ok(())
    }
}

/// Forwards what it sees as short strings.
struct Forward(mpsc::UnboundedSender<String>);

impl MessageListener for Forward {
    fn on_message(&self, _: &Connection, message: &Message) -> anyhow::Result<()> {
        let text = message
            .as_text()
            .ok_or_else(|| anyhow::anyhow!("expected text"))?;
        let _ = self.0.send(format!("msg:{text}"));
        Ok(())
    }

    fn on_closed(&self, _: &Connection, close: Option<&CloseFrame>) {
        let code = close.map_or(0, |c| c.code.as_u16());
        let _ = self.0.send(format!("closed:{code}"));
    }
}

async fn wait_open(connection: &Connection) {
    while !connection.is_open() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn test_echo_over_stream() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let registry = Arc::new(ExtensionRegistry::new());

    let server_transport = StreamTransport::new();
    let server = Connection::server(Config::new(), Arc::clone(&registry), server_transport.clone());
    let server_processor = Processor::new(server.clone());
    server_processor.add_listener(Arc::new(Echo));
    server_processor.start().unwrap();
    let server_task = server_transport.spawn(server_io, server.clone());

    let client_transport = StreamTransport::new();
    let client = Connection::client(
        "localhost",
        "/echo",
        Config::new(),
        registry,
        client_transport.clone(),
    )
    .unwrap();
    let (tx, mut seen) = mpsc::unbounded_channel();
    let client_processor = Processor::new(client.clone());
    client_processor.add_listener(Arc::new(Forward(tx)));
    client_processor.start().unwrap();
    let client_task = client_transport.spawn(client_io, client.clone());

    tokio::time::timeout(Duration::from_secs(5), async {
        wait_open(&client).await;
        assert!(client_transport.is_connected());

        client.send_text("round trip").unwrap();
        assert_eq!(seen.recv().await.unwrap(), "msg:round trip");

        let big = "x".repeat(250_000);
        client.send_text(&big).unwrap();
        assert_eq!(seen.recv().await.unwrap(), format!("msg:{big}"));

        let pong = client.ping(b"rtt".to_vec()).await.unwrap();
        assert_eq!(pong, Some(b"rtt".to_vec()));

        client.close(CloseCode::Normal, "done").unwrap();
        assert_eq!(seen.recv().await.unwrap(), "closed:1000");

        client_task.await.unwrap().unwrap();
        server_task.await.unwrap().unwrap();
    })
    .await
    .unwrap();

    assert_eq!(server.close_code(), Some(1000));
    assert_eq!(server.close_reason(), b"done");
    assert!(!client_transport.is_connected());
}

#[tokio::test]
async fn test_vanished_peer_closes_abnormally() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(1024);
    drop(server_io);

    let transport = StreamTransport::new();
    let client = Connection::client(
        "localhost",
        "/",
        Config::new().with_close_timeout(Duration::from_millis(50)),
        Arc::new(ExtensionRegistry::new()),
        transport.clone(),
    )
    .unwrap();
    let (tx, mut seen) = mpsc::unbounded_channel();
    let processor = Processor::new(client.clone());
    processor.add_listener(Arc::new(Forward(tx)));
    processor.start().unwrap();
    let _task = transport.spawn(client_io, client.clone());

    let closed = tokio::time::timeout(Duration::from_secs(5), seen.recv())
        .await
        .unwrap();
    assert_eq!(closed.as_deref(), Some("closed:0"));
    assert_eq!(client.close_code(), None);
}
