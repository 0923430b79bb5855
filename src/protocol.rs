//! The subscription channel's wire protocol.
//!
//! One tagged sum type per direction, dispatched at a single point at the
//! Agent boundary. A message with an unrecognized `type` tag fails to
//! deserialize into `ClientMessage`, and the dispatcher answers with a
//! non-fatal error frame instead of killing the connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain_types::StockOperation;

/// One inbound item of an `inventorySync` batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StockUpdateWire {
    /// Stock-keeping unit.
    pub sku: String,
    /// Operand quantity.
    pub quantity: u32,
    /// Operation to apply.
    pub operation: StockOperation,
}

/// Messages a client may send over the subscription channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Increment this Agent's counter.
    Increment,
    /// Create a direct child named `name`.
    CreateAgent {
        /// The new child's segment name.
        name: String,
    },
    /// Delete the child named `name`, cascading to its descendants.
    DeleteAgent {
        /// The child's segment name.
        name: String,
    },
    /// Send `message` to the child `agent_name`.
    DirectMessage {
        /// The target child's segment name.
        agent_name: String,
        /// Message body.
        message: String,
    },
    /// Fan `message` out to every direct child.
    Broadcast {
        /// Message body.
        message: String,
    },
    /// Liveness probe; replied to with `pong` plus a state snapshot.
    Ping,
    /// Reply to a server-initiated `pong` (accepted, otherwise ignored).
    Pong,
    /// Apply a stock mutation.
    StockUpdate {
        /// Stock-keeping unit.
        sku: String,
        /// Operand quantity.
        quantity: u32,
        /// Operation to apply.
        operation: StockOperation,
    },
    /// Look up current stock for a SKU.
    StockQuery {
        /// Stock-keeping unit.
        sku: String,
    },
    /// Apply a batch of stock mutations sequentially.
    InventorySync {
        /// The updates to apply, in order.
        updates: Vec<StockUpdateWire>,
    },
    /// Submit a chat turn.
    ChatMessage {
        /// User-entered content.
        content: String,
        /// Optional client-supplied user id.
        #[serde(default)]
        user_id: Option<String>,
    },
    /// Diagnostic: round-trip this Agent's state through the store.
    TestPersistence,
    /// Diagnostic: round-trip after a 25s delay, exercising idle handling.
    TestPersistence25s,
}

/// Messages an Agent may send over the subscription channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Current counter and direct children.
    State {
        /// Monotonic operation counter.
        counter: u64,
        /// Direct child segment names.
        children: Vec<String>,
    },
    /// A child was created.
    AgentCreated {
        /// The new child's segment name.
        name: String,
    },
    /// A child was deleted.
    AgentDeleted {
        /// The deleted child's segment name.
        name: String,
    },
    /// A stored message arriving from a peer, broadcast, or system notice.
    Message {
        /// Display sender label (may carry a prefix such as "📢").
        from: String,
        /// Message body.
        content: String,
    },
    /// Reply to a client `ping`.
    Pong,
    /// A non-fatal error frame: the `{code, message, details?, timestamp}`
    /// envelope, flattened onto this variant.
    Error {
        /// Machine-readable error kind.
        code: String,
        /// Human-readable message.
        message: String,
        /// Optional extra detail.
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        /// When the error was produced.
        timestamp: DateTime<Utc>,
    },
    /// Echo of an applied stock mutation.
    StockUpdate {
        /// Stock-keeping unit.
        sku: String,
        /// Operand quantity.
        quantity: u32,
        /// Operation that was applied.
        operation: StockOperation,
    },
    /// Reply to a `stockQuery`.
    StockResponse {
        /// Stock-keeping unit.
        sku: String,
        /// Current on-hand quantity (omitted when unknown).
        #[serde(skip_serializing_if = "Option::is_none")]
        quantity: Option<u32>,
        /// This Agent's canonical path.
        location: String,
        /// Whether the SKU is known here.
        available: bool,
    },
    /// A SKU crossed its low-stock threshold.
    LowStockAlert {
        /// Stock-keeping unit.
        sku: String,
        /// Current on-hand quantity.
        current_stock: u32,
        /// The configured threshold.
        threshold: u32,
        /// This Agent's canonical path.
        location: String,
    },
    /// One turn of an assistant chat reply.
    ChatResponse {
        /// `"user"` or `"assistant"`.
        role: String,
        /// Turn content.
        content: String,
        /// When the turn was produced.
        timestamp: DateTime<Utc>,
        /// Optional structured metadata (e.g. intent shortcut taken).
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// Today's chat statistics.
    ChatStats {
        /// Messages received today.
        messages_today: u32,
        /// Actions attempted today.
        actions_executed: u32,
        /// `successful_actions / actions_executed * 100`, or 0.
        success_rate: f64,
    },
}
