//! Server functionality for the fleet runtime
//!
//! Binding, graceful shutdown, and the `/…/ws` subscription transport.
//! Borrows its `create_router`/`serve`/`serve_with_graceful_shutdown` shape
//! directly from this crate's original single-route HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router as AxumRouter;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::agent::AgentHandle;
use crate::error::ApiError;
use crate::protocol::{ClientMessage, ServerEvent};
use crate::router::Router;

/// Build the Axum application: the catch-all REST dispatcher plus the
/// `/…/ws` subscription upgrade, sharing one [`Router`] as state.
#[must_use]
pub fn create_router(router: Router) -> AxumRouter {
    AxumRouter::new()
        .route("/{*path}", any(crate::rest_api::dispatch))
        .route("/", any(crate::rest_api::dispatch))
        .with_state(router)
}

/// Bind `addr` and return the listener, for callers that want to log the
/// actual bound port before serving.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Serve `app` on `listener` until it is aborted.
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve(listener: TcpListener, app: AxumRouter) -> std::io::Result<()> {
    axum::serve(listener, app).await.map_err(std::io::Error::other)
}

/// Serve `app` on `listener` until `shutdown_token` is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails during operation.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    app: AxumRouter,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let shutdown_signal = async move { shutdown_token.cancelled().await };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(std::io::Error::other)
}

/// Complete a subscription upgrade already extracted by the REST dispatcher,
/// handing the resulting socket off to [`handle_socket`].
pub fn upgrade(ws: WebSocketUpgrade, router: &Router, handle: Arc<AgentHandle>) -> Response {
    let config = router.config().clone();
    ws.on_upgrade(move |socket| async move {
        handle_socket(socket, handle, config.ping_interval_secs.as_duration(), config.idle_max_secs.as_duration())
            .await;
    })
}

#[instrument(skip(socket, handle))]
async fn handle_socket(
    socket: WebSocket,
    handle: Arc<AgentHandle>,
    ping_interval: std::time::Duration,
    idle_max: std::time::Duration,
) {
    let (mut sink, mut stream) = futures::StreamExt::split(socket);
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(64);

    let Ok((sub_id, state, history, stats)) = handle.subscribe(tx.clone()).await else {
        return;
    };

    let opening = [
        ServerEvent::State { counter: state.counter, children: state.children },
        ServerEvent::ChatStats {
            messages_today: stats.messages_today,
            actions_executed: stats.actions_executed,
            success_rate: stats.success_rate,
        },
    ];
    for event in opening {
        if send_event(&mut sink, &event).await.is_err() {
            handle.unsubscribe(sub_id).await;
            return;
        }
    }
    for msg in history {
        let event = ServerEvent::Message { from: msg.from_agent, content: msg.content };
        if send_event(&mut sink, &event).await.is_err() {
            handle.unsubscribe(sub_id).await;
            return;
        }
    }

    let mut ping_tick = tokio::time::interval(ping_interval);
    let mut idle_deadline = Box::pin(tokio::time::sleep(idle_max));

    loop {
        tokio::select! {
            incoming = futures::StreamExt::next(&mut stream) => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        idle_deadline.as_mut().reset(tokio::time::Instant::now() + idle_max);
                        if handle_client_message(&handle, &text, &mut sink).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        idle_deadline.as_mut().reset(tokio::time::Instant::now() + idle_max);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(err)) => {
                        warn!(%err, "subscription read error");
                        break;
                    }
                }
            }
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_tick.tick() => {
                if send_event(&mut sink, &ServerEvent::Pong).await.is_err() {
                    break;
                }
            }
            () = &mut idle_deadline => {
                info!("subscription idle timeout");
                break;
            }
        }
    }

    handle.unsubscribe(sub_id).await;
}

async fn send_event(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    futures::SinkExt::send(sink, Message::Text(text.into())).await
}

async fn handle_client_message(
    handle: &AgentHandle,
    raw: &str,
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> Result<(), axum::Error> {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(raw);
    let Ok(message) = parsed else {
        let err = ApiError::Validation("unrecognized message type".to_string());
        return send_event(sink, &to_error_event(&err)).await;
    };

    let result = dispatch_client_message(handle, message).await;
    match result {
        Ok(Some(event)) => send_event(sink, &event).await?,
        Ok(None) => {}
        Err(err) => send_event(sink, &to_error_event(&err)).await?,
    }
    Ok(())
}

async fn dispatch_client_message(
    handle: &AgentHandle,
    message: ClientMessage,
) -> crate::error::ApiResult<Option<ServerEvent>> {
    match message {
        ClientMessage::Increment => {
            handle.increment().await?;
        }
        ClientMessage::CreateAgent { name } => {
            let segment = crate::agent::validate_child_segment(&name)?;
            handle.create_child(segment).await?;
        }
        ClientMessage::DeleteAgent { name } => {
            let segment = crate::agent::validate_child_segment(&name)?;
            handle.delete_child(segment).await?;
        }
        ClientMessage::DirectMessage { agent_name, message } => {
            let segment = crate::agent::validate_child_segment(&agent_name)?;
            handle.direct_message(segment, message).await?;
        }
        ClientMessage::Broadcast { message } => {
            handle.broadcast(message).await?;
        }
        ClientMessage::Ping => {
            handle.ping().await?;
        }
        ClientMessage::Pong => {}
        ClientMessage::StockUpdate { sku, quantity, operation } => {
            let sku = crate::agent::validate_sku_string(&sku)?;
            handle.stock_op(sku, quantity, operation).await?;
        }
        ClientMessage::StockQuery { sku } => {
            let sku = crate::agent::validate_sku_string(&sku)?;
            let result = handle.stock_query(sku.clone()).await?;
            let event = match result {
                Some((quantity, location)) => ServerEvent::StockResponse {
                    sku: sku.to_string(),
                    quantity: Some(quantity),
                    location,
                    available: true,
                },
                None => ServerEvent::StockResponse {
                    sku: sku.to_string(),
                    quantity: None,
                    location: handle.owner().path.to_string(),
                    available: false,
                },
            };
            return Ok(Some(event));
        }
        ClientMessage::InventorySync { updates } => {
            let mut parsed = Vec::with_capacity(updates.len());
            for update in updates {
                let sku = crate::agent::validate_sku_string(&update.sku)?;
                parsed.push((sku, update.quantity, update.operation));
            }
            handle.inventory_sync(parsed).await?;
        }
        ClientMessage::ChatMessage { content, user_id } => {
            handle.chat_message(content, user_id).await?;
        }
        ClientMessage::TestPersistence => {
            handle.get_state().await?;
        }
        ClientMessage::TestPersistence25s => {
            tokio::time::sleep(std::time::Duration::from_secs(25)).await;
            handle.get_state().await?;
        }
    }
    Ok(None)
}

fn to_error_event(err: &ApiError) -> ServerEvent {
    let envelope = err.envelope();
    ServerEvent::Error {
        code: envelope.code.to_string(),
        message: envelope.message,
        details: envelope.details,
        timestamp: envelope.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_router_builds_without_panic() {
        let config = crate::config::FleetConfig::for_testing(std::path::PathBuf::from("/tmp"));
        let collaborators = crate::router::Collaborators {
            model: Arc::new(crate::collaborators::NullModelClient),
            vector: Arc::new(crate::collaborators::NullVectorStore),
            workflow: Arc::new(crate::collaborators::NullWorkflowDispatcher),
            bus: Arc::new(crate::collaborators::NullMessageBus),
            approval: Arc::new(crate::collaborators::AutoApproveHook::new(
                crate::config::ApprovalWaitSecs::try_new(0).unwrap(),
            )),
        };
        let router = Router::new(config, collaborators);
        let app = create_router(router);
        assert!(!format!("{app:?}").is_empty());
    }
}
