//! Websocket endpoint streaming tracking snapshots to observers.
//!
//! Clients connect to `/` and receive one JSON text message per delivered
//! snapshot. Anything the client sends is ignored apart from Close.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use velocity_core::ObserverRegistry;

#[derive(Clone)]
struct ObserverState {
    registry: ObserverRegistry,
    shutdown: CancellationToken,
}

pub fn router(registry: ObserverRegistry, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .with_state(ObserverState { registry, shutdown })
}

async fn ws_handler(State(state): State<ObserverState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ObserverState) {
    let (mut sender, mut receiver) = socket.split();

    let mut observer = match state.registry.register() {
        Ok(observer) => observer,
        Err(e) => {
            tracing::debug!(error = %e, "observer rejected");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let id = observer.id();
    tracing::debug!(observer = id, "observer connected");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            payload = observer.next() => {
                let Some(payload) = payload else {
                    // Registry closed
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                if sender.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!(observer = id, "observer disconnected");
}

/// Accept observer connections on an already bound listener until
/// `shutdown` fires.
pub async fn serve_observers(
    listener: TcpListener,
    registry: ObserverRegistry,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "snapshot websocket listening");

    let app = router(registry, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
