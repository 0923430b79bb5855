//! REST surface for the fleet runtime.
//!
//! A single catch-all route backs every tenant/path combination (there is
//! no way to enumerate routes statically when paths are arbitrary-depth),
//! so `dispatch` does by hand what a declarative route table would
//! otherwise do: derive the tenant, classify the remaining path into an
//! `(AgentPath, ApiEndpoint)`, check the HTTP method, and either complete a
//! subscription upgrade or call straight into the resolved `AgentHandle`.

use std::collections::HashMap;

use axum::body::to_bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{Method, Uri};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::agent::{validate_child_segment, validate_sku_string};
use crate::domain_types::{OwnerKey, StockOperation};
use crate::error::ApiError;
use crate::protocol::StockUpdateWire;
use crate::router::{ApiEndpoint, Router, classify_endpoint, derive_tenant};

const MAX_BODY_BYTES: usize = 1_048_576;

/// The front door for every HTTP and subscription-upgrade request.
///
/// # Panics
///
/// Does not panic; malformed input is always turned into an [`ApiError`]
/// response.
pub async fn dispatch(State(router): State<Router>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();
    let host = parts.headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok());
    let (tenant, remaining) = derive_tenant(host, parts.uri.path());

    let (agent_path, endpoint) = match classify_endpoint(&remaining) {
        Ok(v) => v,
        Err(err) => return err.into_response(),
    };
    let owner = OwnerKey::new(tenant, agent_path);

    if endpoint == ApiEndpoint::Subscription {
        return handle_subscription(&mut parts, &router, owner).await;
    }

    if parts.method != expected_method(endpoint) {
        return ApiError::MethodNotAllowed.into_response();
    }

    let handle = match router.handle_for(owner).await {
        Ok(handle) => handle,
        Err(err) => return err.into_response(),
    };

    let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::Validation("request body too large or unreadable".to_string()).into_response(),
    };

    let result: Result<Response, ApiError> = match endpoint {
        ApiEndpoint::State => handle.get_state().await.map(|s| ok_json(StateBody::from(s))),
        ApiEndpoint::Increment => handle.increment().await.map(|s| ok_json(StateBody::from(s))),
        ApiEndpoint::Messages => {
            let (limit, offset) = pagination(&parts.uri);
            handle.get_messages(limit, offset).await.map(|(messages, total)| {
                ok_json(MessagesResponse {
                    messages: messages.into_iter().map(MessageBody::from).collect(),
                    total,
                    has_more: offset + limit < total,
                })
            })
        }
        ApiEndpoint::Message => match parse_json::<SendMessageBody>(&body_bytes) {
            Ok(payload) => send_message(&handle, payload).await.map(|()| ok_json(Ack::default())),
            Err(err) => Err(err),
        },
        ApiEndpoint::DeleteSubtree => handle.delete_subtree().await.map(|()| ok_json(Ack::default())),
        ApiEndpoint::InventoryStock => match parse_json::<StockOpBody>(&body_bytes) {
            Ok(payload) => apply_stock(&handle, payload).await.map(|()| ok_json(Ack::default())),
            Err(err) => Err(err),
        },
        ApiEndpoint::InventoryQuery => match query_params(&parts.uri).get("sku").cloned() {
            Some(raw) => stock_query(&handle, &raw).await,
            None => Err(ApiError::Validation("missing sku query parameter".to_string())),
        },
        ApiEndpoint::InventorySync => match parse_json::<InventorySyncBody>(&body_bytes) {
            Ok(payload) => inventory_sync(&handle, payload).await,
            Err(err) => Err(err),
        },
        ApiEndpoint::InventoryAlerts => handle.get_alerts().await.map(|alerts| {
            ok_json(AlertsResponse { alerts: alerts.into_iter().map(AlertBody::from).collect() })
        }),
        ApiEndpoint::AiAnalyze => match parse_json::<AiAnalyzeBody>(&body_bytes) {
            Ok(payload) => match validate_sku_string(&payload.sku) {
                Ok(sku) => handle.ai_analyze(sku).await.map(ok_json),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        },
        ApiEndpoint::AiForecast => handle.ai_forecast().await.map(|forecasts| {
            ok_json(ForecastsResponse { forecasts: forecasts.into_iter().map(ForecastBody::from).collect() })
        }),
        ApiEndpoint::AiInsights => handle.ai_insights().await.map(|(analyses, decisions, forecasts)| {
            let summary = format!(
                "{} recent analyses, {} decisions, {} forecasts",
                analyses.len(),
                decisions.len(),
                forecasts.len()
            );
            ok_json(InsightsResponse {
                analyses: analyses.into_iter().map(AnalysisBody::from).collect(),
                decisions: decisions.into_iter().map(DecisionBody::from).collect(),
                forecasts: forecasts.into_iter().map(ForecastBody::from).collect(),
                summary,
            })
        }),
        ApiEndpoint::DebugLocations => Ok(ok_json(DebugLocations { locations: router.registered_owners() })),
        ApiEndpoint::DebugDb => Ok(ok_json(serde_json::json!({
            "owner": handle.owner().canonical(),
            "dataDir": router.config().data_dir.display().to_string(),
        }))),
        ApiEndpoint::Subscription => unreachable!("handled by handle_subscription above"),
    };

    result.unwrap_or_else(IntoResponse::into_response)
}

async fn handle_subscription(
    parts: &mut axum::http::request::Parts,
    router: &Router,
    owner: OwnerKey,
) -> Response {
    if parts.method != Method::GET {
        return ApiError::MethodNotAllowed.into_response();
    }
    let ws = match <WebSocketUpgrade as FromRequestParts<Router>>::from_request_parts(parts, router).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let handle = match router.handle_for(owner).await {
        Ok(handle) => handle,
        Err(err) => return err.into_response(),
    };
    crate::server::upgrade(ws, router, handle)
}

fn expected_method(endpoint: ApiEndpoint) -> Method {
    match endpoint {
        ApiEndpoint::State
        | ApiEndpoint::Messages
        | ApiEndpoint::InventoryQuery
        | ApiEndpoint::InventoryAlerts
        | ApiEndpoint::AiForecast
        | ApiEndpoint::AiInsights
        | ApiEndpoint::DebugLocations
        | ApiEndpoint::DebugDb => Method::GET,
        ApiEndpoint::Increment
        | ApiEndpoint::Message
        | ApiEndpoint::DeleteSubtree
        | ApiEndpoint::InventoryStock
        | ApiEndpoint::InventorySync
        | ApiEndpoint::AiAnalyze => Method::POST,
        ApiEndpoint::Subscription => Method::GET,
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|e| ApiError::Validation(format!("invalid request body: {e}")))
}

fn ok_json<T: Serialize>(value: T) -> Response {
    Json(value).into_response()
}

fn query_params(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or_default();
            if key.is_empty() { None } else { Some((key.to_string(), value.to_string())) }
        })
        .collect()
}

fn pagination(uri: &Uri) -> (i64, i64) {
    let params = query_params(uri);
    let limit = params.get("limit").and_then(|v| v.parse::<i64>().ok()).unwrap_or(50).clamp(1, 100);
    let offset = params.get("offset").and_then(|v| v.parse::<i64>().ok()).unwrap_or(0).max(0);
    (limit, offset)
}

async fn send_message(handle: &crate::agent::AgentHandle, payload: SendMessageBody) -> Result<(), ApiError> {
    match payload.to {
        Some(name) => {
            let segment = validate_child_segment(&name)?;
            handle.direct_message(segment, payload.message).await
        }
        None => handle.broadcast(payload.message).await,
    }
}

async fn apply_stock(handle: &crate::agent::AgentHandle, payload: StockOpBody) -> Result<(), ApiError> {
    let sku = validate_sku_string(&payload.sku)?;
    handle.stock_op(sku, payload.quantity, payload.operation).await
}

async fn stock_query(handle: &crate::agent::AgentHandle, raw_sku: &str) -> Result<Response, ApiError> {
    let sku = validate_sku_string(raw_sku)?;
    let result = handle.stock_query(sku.clone()).await?;
    match result {
        Some((quantity, location)) => Ok(ok_json(StockQueryResponse {
            sku: sku.to_string(),
            quantity: Some(quantity),
            location,
            available: true,
        })),
        None => Err(ApiError::NotFound(format!("unknown sku: {sku}"))),
    }
}

async fn inventory_sync(handle: &crate::agent::AgentHandle, payload: InventorySyncBody) -> Result<Response, ApiError> {
    let mut updates = Vec::with_capacity(payload.updates.len());
    for update in payload.updates {
        let sku = validate_sku_string(&update.sku)?;
        updates.push((sku, update.quantity, update.operation));
    }
    let outcomes = handle.inventory_sync(updates).await?;
    Ok(ok_json(SyncResponse {
        results: outcomes
            .into_iter()
            .map(|o| match o {
                crate::agent::SyncOutcome::Ok => SyncResult { ok: true, error: None },
                crate::agent::SyncOutcome::Err(message) => SyncResult { ok: false, error: Some(message) },
            })
            .collect(),
    }))
}

#[derive(Debug, Serialize)]
struct StateBody {
    counter: u64,
    children: Vec<String>,
}

impl From<crate::agent::StateSnapshot> for StateBody {
    fn from(s: crate::agent::StateSnapshot) -> Self {
        Self { counter: s.counter, children: s.children }
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageBody {
    #[serde(default)]
    to: Option<String>,
    message: String,
}

#[derive(Debug, Serialize, Default)]
struct Ack {
    ok: bool,
}

#[derive(Debug, Deserialize)]
struct StockOpBody {
    sku: String,
    quantity: u32,
    operation: StockOperation,
}

#[derive(Debug, Serialize)]
struct StockQueryResponse {
    sku: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantity: Option<u32>,
    location: String,
    available: bool,
}

#[derive(Debug, Deserialize)]
struct InventorySyncBody {
    updates: Vec<StockUpdateWire>,
}

#[derive(Debug, Serialize)]
struct SyncResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    results: Vec<SyncResult>,
}

#[derive(Debug, Serialize)]
struct AlertBody {
    sku: String,
    current_stock: u32,
    threshold: u32,
    severity: &'static str,
}

impl From<crate::agent::AlertEntry> for AlertBody {
    fn from(a: crate::agent::AlertEntry) -> Self {
        Self { sku: a.sku.to_string(), current_stock: a.current_stock, threshold: a.threshold, severity: a.severity }
    }
}

#[derive(Debug, Serialize)]
struct AlertsResponse {
    alerts: Vec<AlertBody>,
}

#[derive(Debug, Deserialize)]
struct AiAnalyzeBody {
    sku: String,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    from: String,
    to: Option<String>,
    content: String,
    #[serde(rename = "type")]
    kind: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<crate::agent::StoredMessage> for MessageBody {
    fn from(m: crate::agent::StoredMessage) -> Self {
        Self {
            from: m.from_agent,
            to: m.to_agent,
            content: m.content,
            kind: m.message_type.to_string(),
            timestamp: m.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesResponse {
    messages: Vec<MessageBody>,
    total: i64,
    has_more: bool,
}

#[derive(Debug, Serialize)]
struct DebugLocations {
    locations: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ForecastBody {
    sku: String,
    predicted_demand: f64,
    confidence: f64,
    trend_direction: String,
    reasoning: String,
    forecast_date: chrono::DateTime<chrono::Utc>,
}

impl From<crate::store::analysis::ForecastRow> for ForecastBody {
    fn from(f: crate::store::analysis::ForecastRow) -> Self {
        Self {
            sku: f.sku,
            predicted_demand: f.predicted_demand,
            confidence: f.confidence,
            trend_direction: f.trend_direction,
            reasoning: f.reasoning,
            forecast_date: f.forecast_date,
        }
    }
}

#[derive(Debug, Serialize)]
struct ForecastsResponse {
    forecasts: Vec<ForecastBody>,
}

#[derive(Debug, Serialize)]
struct AnalysisBody {
    sku: String,
    location: String,
    analysis: serde_json::Value,
    confidence: f64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<crate::store::analysis::AnalysisRow> for AnalysisBody {
    fn from(a: crate::store::analysis::AnalysisRow) -> Self {
        Self { sku: a.sku, location: a.location, analysis: a.analysis, confidence: a.confidence, timestamp: a.timestamp }
    }
}

#[derive(Debug, Serialize)]
struct DecisionBody {
    sku: String,
    location: String,
    decision_type: String,
    reasoning: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<crate::store::analysis::DecisionRow> for DecisionBody {
    fn from(d: crate::store::analysis::DecisionRow) -> Self {
        Self {
            sku: d.sku,
            location: d.location,
            decision_type: d.decision_type,
            reasoning: d.reasoning,
            timestamp: d.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
struct InsightsResponse {
    analyses: Vec<AnalysisBody>,
    decisions: Vec<DecisionBody>,
    forecasts: Vec<ForecastBody>,
    summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_clamps_limit() {
        let uri: Uri = "/wh/messages?limit=500&offset=-5".parse().unwrap();
        let (limit, offset) = pagination(&uri);
        assert_eq!(limit, 100);
        assert_eq!(offset, 0);
    }

    #[test]
    fn query_params_parses_simple_pairs() {
        let uri: Uri = "/wh/inventory/query?sku=SKU-1".parse().unwrap();
        let params = query_params(&uri);
        assert_eq!(params.get("sku"), Some(&"SKU-1".to_string()));
    }
}
