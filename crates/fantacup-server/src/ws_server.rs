// WebSocket server for the frontend's queries and admin actions.

use std::fmt::Display;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::api::Api;
use crate::protocol::Response;

/// Bind the listener on `127.0.0.1:{port}`. Port 0 picks a free port.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    info!("WebSocket server listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept connections forever, serving each one on its own task.
pub async fn run(listener: TcpListener, api: Arc<Api>) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let api = Arc::clone(&api);
        tokio::spawn(async move {
            serve_connection(stream, addr.to_string(), api).await;
        });
    }
}

async fn serve_connection(stream: TcpStream, addr: String, api: Arc<Api>) {
    info!("Accepted TCP connection from {addr}");
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (write, read) = ws_stream.split();
    if let Err(e) = process_requests(read, write, &api, &addr).await {
        warn!("Connection to {addr} ended with error: {e}");
    }
    info!("Client {addr} disconnected");
}

/// Answer every text frame from `read` with exactly one frame on `write`.
///
/// Generic over the stream and sink so it can be driven by in-memory
/// message lists in tests.
pub async fn process_requests<St, Si>(
    mut read: St,
    mut write: Si,
    api: &Api,
    addr: &str,
) -> Result<(), Si::Error>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                debug!("Request from {addr}: {}", text.as_str());
                let response = api.handle_text(text.as_str()).await;
                write.send(encode(&response)).await?;
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}

fn encode(response: &Response) -> Message {
    match serde_json::to_string(response) {
        Ok(json) => Message::text(json),
        Err(e) => {
            error!("failed to serialize response: {e}");
            Message::text(r#"{"type":"ERROR","message":"internal serialization error"}"#)
        }
    }
}
