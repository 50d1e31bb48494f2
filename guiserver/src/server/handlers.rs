//! HTTP and WebSocket handlers

use std::sync::{Arc, RwLock};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::authn::middleware::AuthMiddleware;
use crate::authn::user::User;
use crate::bundles::middleware::DeployMiddleware;
use crate::protocol::{self, ResponseSender};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "guiserver".to_string(),
        version: version_info().version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Upgrade the connection and serve RPC requests over it
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn reply(tx: &ResponseSender, request_id: Value, error: String) {
    if tx.send(protocol::response(request_id, Err(error))).is_err() {
        debug!("Connection closed before the response was sent");
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    info!("WebSocket connection opened");
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let text = match serde_json::to_string(&response) {
                Ok(text) => text,
                Err(e) => {
                    error!("Unable to encode response: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!("Unable to write to the WebSocket: {}", e);
                break;
            }
        }
    });

    let user = Arc::new(RwLock::new(User::anonymous()));
    let auth = AuthMiddleware::new(user.clone(), state.authenticator.clone(), tx.clone());
    let deploy = Arc::new(DeployMiddleware::new(user, state.deployer.clone(), tx.clone()));

    // Dropping the set on disconnect aborts the requests still waiting.
    let mut requests = JoinSet::new();

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket read error: {}", e);
                break;
            }
        };

        let message: Value = match serde_json::from_str(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                reply(&tx, Value::Null, format!("invalid request: {}", e));
                continue;
            }
        };

        if auth.requested(&message) {
            if let Err(e) = auth.process_request(&message).await {
                warn!("Login request failed: {}", e);
                break;
            }
        } else if deploy.requested(&message) {
            let deploy = deploy.clone();
            requests.spawn(async move { deploy.process_request(message).await });
        } else {
            reply(&tx, protocol::request_id(&message), "unsupported request".to_string());
        }

        while let Some(result) = requests.try_join_next() {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Deployer request not answered: {}", e),
                Err(e) => error!("Deployer request task failed: {}", e),
            }
        }
    }

    requests.shutdown().await;
    drop(auth);
    drop(deploy);
    drop(tx);
    if let Err(e) = writer.await {
        error!("WebSocket writer failed: {}", e);
    }
    info!("WebSocket connection closed");
}
