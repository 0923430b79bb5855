//! The single-writer actor that owns one `(tenant, path)` Agent.
//! `AgentHandle` is a cheap, cloneable front for a `tokio::mpsc`
//! mailbox, modeled directly on `message_router::router::MessageRouterImpl`'s
//! `inbound_queue` + single-consumer `RoutingTask` loop: there, one shared
//! queue fans out to worker tasks; here, one queue *per* `OwnerKey` enforces
//! the single-writer property structurally rather than by locking.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{Instrument, Span, info, instrument, warn};

use crate::collaborators::{ApprovalDecision, ChatTurn};
use crate::config::FleetConfig;
use crate::domain_types::{
    AgentType, MessageId, MessageKind, OwnerKey, PathSegment, Sku, StockOperation,
};
use crate::error::{ApiError, ApiResult};
use crate::hierarchy;
use crate::protocol::ServerEvent;
use crate::router::Router;
use crate::store::Store;
use crate::store::analysis::{AnalysisRow, DecisionRow, ForecastRow};
use crate::store::chat_stats::ChatStatsRow;
use crate::store::fleet_state::FleetStateRow;
use crate::store::inventory::{InventoryItemRow, TransactionRow};
use crate::store::messages::StoredMessageRow;

/// Lifecycle states an Agent passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLifecycleState {
    /// Registered but not yet initializing.
    Created,
    /// Loading migrations and persisted state.
    Initializing,
    /// Accepting reads and writes.
    Ready,
    /// Closing subscriptions, rejecting new work.
    Draining,
    /// Fully torn down; no longer in the registry.
    Terminated,
}

/// An illegal lifecycle transition was attempted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cannot accept work in state {0:?}")]
pub struct StateTransitionError(pub AgentLifecycleState);

/// One in-memory inventory item.
#[derive(Debug, Clone)]
pub struct InventoryItem {
    /// Human-readable name.
    pub name: String,
    /// Current on-hand quantity.
    pub current_stock: u32,
    /// Threshold at or below which a low-stock alert fires.
    pub low_stock_threshold: u32,
    /// Last time this item changed.
    pub last_updated: chrono::DateTime<Utc>,
}

/// One in-memory stored message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Unique message id.
    pub id: MessageId,
    /// When recorded.
    pub timestamp: chrono::DateTime<Utc>,
    /// Sender label.
    pub from_agent: String,
    /// Recipient, `None` for broadcast.
    pub to_agent: Option<String>,
    /// Message body.
    pub content: String,
    /// Direct, broadcast, or system.
    pub message_type: MessageKind,
}

/// The counter/children snapshot returned by `get state` and embedded in
/// every `state` broadcast.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Monotonic operation counter.
    pub counter: u64,
    /// Direct child segment names, sorted.
    pub children: Vec<String>,
}

/// Today's chat statistics, in wire-ready form.
#[derive(Debug, Clone, Copy)]
pub struct ChatStatsSnapshot {
    /// Messages received today.
    pub messages_today: u32,
    /// Actions attempted today.
    pub actions_executed: u32,
    /// `successful_actions / actions_executed * 100`, or 0.
    pub success_rate: f64,
}

/// A low-stock alert entry.
#[derive(Debug, Clone)]
pub struct AlertEntry {
    /// Stock-keeping unit.
    pub sku: Sku,
    /// Current on-hand quantity.
    pub current_stock: u32,
    /// Configured threshold.
    pub threshold: u32,
    /// `"critical"` when stock is zero, else `"warning"`.
    pub severity: &'static str,
}

/// Outcome of applying one item of an `/inventory/sync` batch.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Applied successfully.
    Ok,
    /// Rejected; message explains why.
    Err(String),
}

/// A live subscriber: an id plus the bounded, drop-on-full sender the
/// per-connection task reads from.
struct Subscription {
    id: u64,
    sender: mpsc::Sender<ServerEvent>,
}

/// All in-memory state private to one Agent.
struct FleetState {
    counter: u64,
    children: BTreeSet<PathSegment>,
    agent_type: AgentType,
    inventory: HashMap<Sku, InventoryItem>,
    subscriptions: Vec<Subscription>,
    messages: VecDeque<StoredMessage>,
    chat_date: chrono::NaiveDate,
    chat_stats: ChatStatsRow,
}

impl FleetState {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            counter: self.counter,
            children: self.children.iter().map(PathSegment::to_string).collect(),
        }
    }

    fn chat_snapshot(&self) -> ChatStatsSnapshot {
        ChatStatsSnapshot {
            messages_today: self.chat_stats.messages_today,
            actions_executed: self.chat_stats.actions_executed,
            success_rate: self.chat_stats.success_rate(),
        }
    }

    /// Deliver `event` to every live subscription, dropping (and removing)
    /// any whose buffer is full rather than let the actor stall (spec
    /// section 5).
    fn publish(&mut self, event: &ServerEvent) {
        self.subscriptions.retain(|sub| match sub.sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscription = sub.id, "dropping slow subscription");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn push_message(&mut self, msg: StoredMessage, ring: usize) {
        self.messages.push_back(msg);
        while self.messages.len() > ring {
            self.messages.pop_front();
        }
    }
}

/// A cheap, cloneable front for an Agent's single-writer mailbox.
pub struct AgentHandle {
    owner: OwnerKey,
    tx: mpsc::Sender<Envelope>,
    state: Arc<RwLock<AgentLifecycleState>>,
    next_sub_id: AtomicU64,
}

enum Envelope {
    Command(AgentCommand, Span),
}

/// Every operation an Agent can execute, dispatched one at a time in the
/// actor's `run` loop.
enum AgentCommand {
    GetState(oneshot::Sender<StateSnapshot>),
    Increment(oneshot::Sender<StateSnapshot>),
    CreateChild(PathSegment, oneshot::Sender<ApiResult<StateSnapshot>>),
    DeleteChild(PathSegment, oneshot::Sender<ApiResult<StateSnapshot>>),
    DeleteSubtree(oneshot::Sender<()>),
    DirectMessage(PathSegment, String, oneshot::Sender<ApiResult<()>>),
    Broadcast(String, oneshot::Sender<()>),
    InboundMessage {
        from: String,
        content: String,
        kind: MessageKind,
        reply: oneshot::Sender<ApiResult<()>>,
    },
    StockOp {
        sku: Sku,
        quantity: u32,
        operation: StockOperation,
        reply: oneshot::Sender<ApiResult<()>>,
    },
    StockQuery(Sku, oneshot::Sender<Option<(u32, String)>>),
    InventorySync(Vec<(Sku, u32, StockOperation)>, oneshot::Sender<Vec<SyncOutcome>>),
    GetAlerts(oneshot::Sender<Vec<AlertEntry>>),
    GetMessages {
        limit: i64,
        offset: i64,
        reply: oneshot::Sender<ApiResult<(Vec<StoredMessage>, i64)>>,
    },
    ChatMessage {
        content: String,
        user_id: Option<String>,
        reply: oneshot::Sender<(ServerEvent, ChatStatsSnapshot)>,
    },
    Subscribe {
        sender: mpsc::Sender<ServerEvent>,
        id: u64,
        reply: oneshot::Sender<(StateSnapshot, Vec<StoredMessage>, ChatStatsSnapshot)>,
    },
    Unsubscribe(u64),
    Ping(oneshot::Sender<StateSnapshot>),
    AiAnalyze(Sku, oneshot::Sender<ApiResult<Value>>),
    AiForecast(oneshot::Sender<Vec<ForecastRow>>),
    AiInsights(oneshot::Sender<(Vec<AnalysisRow>, Vec<DecisionRow>, Vec<ForecastRow>)>),
}

impl AgentHandle {
    /// Open this Agent's store (applying migrations and loading persisted
    /// state), then spawn its single-writer task.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the persisted state cannot be loaded.
    #[instrument(skip(store, router), fields(owner = %owner))]
    pub async fn spawn(owner: OwnerKey, store: Store, router: Router) -> ApiResult<Self> {
        let persisted = store.load_fleet_state().await?;
        let (counter, children, agent_type) = match persisted {
            Some(row) => (u64::try_from(row.counter).unwrap_or(0), row.children, row.agent_type),
            None => (0, BTreeSet::new(), router.config().default_agent_type),
        };

        let today = Utc::now().date_naive();
        let chat_stats = store
            .load_chat_stats(&owner.canonical(), today)
            .await?
            .unwrap_or(ChatStatsRow {
                messages_today: 0,
                actions_executed: 0,
                successful_actions: 0,
            });

        let mut inventory = HashMap::new();
        for row in store.list_inventory_items().await? {
            inventory.insert(
                row.sku,
                InventoryItem {
                    name: row.name,
                    current_stock: row.current_stock,
                    low_stock_threshold: row.low_stock_threshold,
                    last_updated: row.last_updated,
                },
            );
        }

        let state = FleetState {
            counter,
            children,
            agent_type,
            inventory,
            subscriptions: Vec::new(),
            messages: VecDeque::new(),
            chat_date: today,
            chat_stats,
        };

        let (tx, rx) = mpsc::channel(256);
        let lifecycle = Arc::new(RwLock::new(AgentLifecycleState::Ready));

        let owner_for_task = owner.clone();
        let lifecycle_for_task = Arc::clone(&lifecycle);
        tokio::spawn(
            run(owner_for_task, state, store, router, rx, lifecycle_for_task)
                .instrument(tracing::info_span!("agent", owner = %owner)),
        );

        Ok(Self {
            owner,
            tx,
            state: lifecycle,
            next_sub_id: AtomicU64::new(1),
        })
    }

    /// This handle's owner key.
    #[must_use]
    pub fn owner(&self) -> &OwnerKey {
        &self.owner
    }

    /// Current lifecycle state.
    pub async fn lifecycle_state(&self) -> AgentLifecycleState {
        *self.state.read().await
    }

    async fn send(&self, cmd: AgentCommand) -> ApiResult<()> {
        if matches!(
            self.lifecycle_state().await,
            AgentLifecycleState::Draining | AgentLifecycleState::Terminated
        ) {
            return Err(ApiError::NotFound(format!("{} is no longer active", self.owner)));
        }
        self.tx
            .send(Envelope::Command(cmd, Span::current()))
            .await
            .map_err(|_| ApiError::Internal("agent task no longer running".to_string()))
    }

    /// `get state`.
    pub async fn get_state(&self) -> ApiResult<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::GetState(reply)).await?;
        rx.await.map_err(reply_dropped)
    }

    /// `increment`.
    pub async fn increment(&self) -> ApiResult<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::Increment(reply)).await?;
        rx.await.map_err(reply_dropped)
    }

    /// `create child`.
    pub async fn create_child(&self, segment: PathSegment) -> ApiResult<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::CreateChild(segment, reply)).await?;
        rx.await.map_err(reply_dropped)?
    }

    /// `delete child`.
    pub async fn delete_child(&self, segment: PathSegment) -> ApiResult<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::DeleteChild(segment, reply)).await?;
        rx.await.map_err(reply_dropped)?
    }

    /// `delete subtree`. Drives this Agent `READY -> DRAINING -> TERMINATED`.
    pub async fn delete_subtree(&self) -> ApiResult<()> {
        {
            let mut state = self.state.write().await;
            *state = AgentLifecycleState::Draining;
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Command(AgentCommand::DeleteSubtree(reply), Span::current()))
            .await
            .map_err(|_| ApiError::Internal("agent task no longer running".to_string()))?;
        rx.await.map_err(reply_dropped)?;
        {
            let mut state = self.state.write().await;
            *state = AgentLifecycleState::Terminated;
        }
        Ok(())
    }

    /// `direct message`.
    pub async fn direct_message(&self, segment: PathSegment, text: String) -> ApiResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::DirectMessage(segment, text, reply)).await?;
        rx.await.map_err(reply_dropped)?
    }

    /// `broadcast`.
    pub async fn broadcast(&self, text: String) -> ApiResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::Broadcast(text, reply)).await?;
        rx.await.map_err(reply_dropped)
    }

    /// `inbound message`.
    pub async fn inbound_message(&self, from: String, content: String, kind: MessageKind) -> ApiResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::InboundMessage { from, content, kind, reply }).await?;
        rx.await.map_err(reply_dropped)?
    }

    /// `stock op`.
    pub async fn stock_op(&self, sku: Sku, quantity: u32, operation: StockOperation) -> ApiResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::StockOp { sku, quantity, operation, reply }).await?;
        rx.await.map_err(reply_dropped)?
    }

    /// `stock query`.
    pub async fn stock_query(&self, sku: Sku) -> ApiResult<Option<(u32, String)>> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::StockQuery(sku, reply)).await?;
        rx.await.map_err(reply_dropped)
    }

    /// `inventory sync`.
    pub async fn inventory_sync(
        &self,
        updates: Vec<(Sku, u32, StockOperation)>,
    ) -> ApiResult<Vec<SyncOutcome>> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::InventorySync(updates, reply)).await?;
        rx.await.map_err(reply_dropped)
    }

    /// `get alerts`.
    pub async fn get_alerts(&self) -> ApiResult<Vec<AlertEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::GetAlerts(reply)).await?;
        rx.await.map_err(reply_dropped)
    }

    /// `get messages`.
    pub async fn get_messages(&self, limit: i64, offset: i64) -> ApiResult<(Vec<StoredMessage>, i64)> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::GetMessages { limit, offset, reply }).await?;
        rx.await.map_err(reply_dropped)?
    }

    /// `chat message`.
    pub async fn chat_message(
        &self,
        content: String,
        user_id: Option<String>,
    ) -> ApiResult<(ServerEvent, ChatStatsSnapshot)> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::ChatMessage { content, user_id, reply }).await?;
        rx.await.map_err(reply_dropped)
    }

    /// `/ai/analyze`.
    pub async fn ai_analyze(&self, sku: Sku) -> ApiResult<Value> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::AiAnalyze(sku, reply)).await?;
        rx.await.map_err(reply_dropped)?
    }

    /// `/ai/forecast`.
    pub async fn ai_forecast(&self) -> ApiResult<Vec<ForecastRow>> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::AiForecast(reply)).await?;
        rx.await.map_err(reply_dropped)
    }

    /// `/ai/insights`.
    pub async fn ai_insights(&self) -> ApiResult<(Vec<AnalysisRow>, Vec<DecisionRow>, Vec<ForecastRow>)> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::AiInsights(reply)).await?;
        rx.await.map_err(reply_dropped)
    }

    /// Open a subscription, returning the on-open sequence (state, chat
    /// history, chat stats) the caller must send before forwarding further
    /// events.
    pub async fn subscribe(
        &self,
        sender: mpsc::Sender<ServerEvent>,
    ) -> ApiResult<(u64, StateSnapshot, Vec<StoredMessage>, ChatStatsSnapshot)> {
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::Subscribe { sender, id, reply }).await?;
        let (state, history, stats) = rx.await.map_err(reply_dropped)?;
        Ok((id, state, history, stats))
    }

    /// Close a subscription.
    pub async fn unsubscribe(&self, id: u64) {
        let _ = self.tx.send(Envelope::Command(AgentCommand::Unsubscribe(id), Span::current())).await;
    }

    /// `ping` heartbeat: returns the current state to send alongside `pong`.
    pub async fn ping(&self) -> ApiResult<StateSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(AgentCommand::Ping(reply)).await?;
        rx.await.map_err(reply_dropped)
    }
}

fn reply_dropped(_: oneshot::error::RecvError) -> ApiError {
    ApiError::Internal("agent dropped reply channel".to_string())
}

/// Validate and trim a raw child-name/SKU-bearing segment string into a
/// [`PathSegment`].
///
/// # Errors
///
/// Returns [`ApiError::Validation`] if the trimmed value fails the
/// character-class/length check.
pub fn validate_child_segment(raw: &str) -> ApiResult<PathSegment> {
    PathSegment::try_new(raw.trim()).map_err(|e| ApiError::Validation(e.to_string()))
}

/// Validate and trim a raw SKU string into a [`Sku`].
///
/// # Errors
///
/// Returns [`ApiError::Validation`] if the trimmed value fails the
/// length check.
pub fn validate_sku_string(raw: &str) -> ApiResult<Sku> {
    Sku::try_new(raw.trim()).map_err(|e| ApiError::Validation(e.to_string()))
}

#[allow(clippy::too_many_lines)]
async fn run(
    owner: OwnerKey,
    mut state: FleetState,
    store: Store,
    router: Router,
    mut rx: mpsc::Receiver<Envelope>,
    lifecycle: Arc<RwLock<AgentLifecycleState>>,
) {
    info!("agent ready");
    let config = router.config().clone();
    let mut request_count: u64 = 0;

    while let Some(Envelope::Command(cmd, span)) = rx.recv().await {
        request_count += 1;
        async {
        if request_count % 100 == 0 {
            let cutoff = Utc::now() - chrono::Duration::days(config.msg_retention_days.into_inner());
            if let Err(err) = store.purge_messages_older_than(cutoff).await {
                warn!(%err, "message purge failed");
            }
        }

        match cmd {
            AgentCommand::GetState(reply) => {
                let _ = reply.send(state.snapshot());
            }
            AgentCommand::Increment(reply) => {
                state.counter += 1;
                persist_fleet_state(&store, &state).await;
                let snapshot = state.snapshot();
                state.publish(&ServerEvent::State {
                    counter: snapshot.counter,
                    children: snapshot.children.clone(),
                });
                let _ = reply.send(snapshot);
            }
            AgentCommand::CreateChild(segment, reply) => {
                let result = if state.children.contains(&segment) {
                    Err(ApiError::AgentExists(segment.to_string()))
                } else {
                    state.children.insert(segment.clone());
                    state.counter += 1;
                    persist_fleet_state(&store, &state).await;
                    let snapshot = state.snapshot();
                    state.publish(&ServerEvent::AgentCreated { name: segment.to_string() });
                    state.publish(&ServerEvent::State {
                        counter: snapshot.counter,
                        children: snapshot.children.clone(),
                    });
                    Ok(snapshot)
                };
                let _ = reply.send(result);
            }
            AgentCommand::DeleteChild(segment, reply) => {
                let result = if !state.children.contains(&segment) {
                    Err(ApiError::NotFound(segment.to_string()))
                } else {
                    let child_owner = Router::child_owner(&owner.tenant, &owner.path, &segment);
                    if let Err(err) = hierarchy::delete_subtree(&router, &child_owner).await {
                        warn!(%err, child = %segment, "cascade delete failed; removing local entry anyway");
                        state.push_message(
                            system_notice(format!("partial cascade deleting {segment}: {err}")),
                            config.msg_mem_ring.into_inner(),
                        );
                    }
                    state.children.remove(&segment);
                    state.counter += 1;
                    persist_fleet_state(&store, &state).await;
                    let snapshot = state.snapshot();
                    state.publish(&ServerEvent::AgentDeleted { name: segment.to_string() });
                    state.publish(&ServerEvent::State {
                        counter: snapshot.counter,
                        children: snapshot.children.clone(),
                    });
                    Ok(snapshot)
                };
                let _ = reply.send(result);
            }
            AgentCommand::DeleteSubtree(reply) => {
                let children: Vec<PathSegment> = state.children.iter().cloned().collect();
                for child in &children {
                    let child_owner = Router::child_owner(&owner.tenant, &owner.path, child);
                    if let Err(err) = hierarchy::delete_subtree(&router, &child_owner).await {
                        warn!(%err, child = %child, "per-child cascade failure, not fatal");
                    }
                }
                state.children.clear();
                state.inventory.clear();
                state.counter = 0;
                if let Err(err) = store.clear_all().await {
                    warn!(%err, "failed to clear persisted rows on subtree delete");
                }
                persist_fleet_state(&store, &state).await;
                state.subscriptions.clear();
                router.remove(&owner);
                let _ = reply.send(());
            }
            AgentCommand::DirectMessage(segment, text, reply) => {
                let result = if !state.children.contains(&segment) {
                    Err(ApiError::NotFound(segment.to_string()))
                } else {
                    let child_owner = Router::child_owner(&owner.tenant, &owner.path, &segment);
                    let from = owner.canonical();
                    match hierarchy::send_direct(&router, &child_owner, from.clone(), text.clone()).await {
                        Err(err) => Err(ApiError::NotFound(format!("{segment}: {err}"))),
                        Ok(()) => {
                            let msg = StoredMessage {
                                id: MessageId::generate(),
                                timestamp: Utc::now(),
                                from_agent: from,
                                to_agent: Some(child_owner.canonical()),
                                content: text.clone(),
                                message_type: MessageKind::Direct,
                            };
                            persist_message(&store, &owner, &msg).await;
                            state.push_message(msg, config.msg_mem_ring.into_inner());
                            state.publish(&ServerEvent::Message { from: owner.canonical(), content: text });
                            Ok(())
                        }
                    }
                };
                let _ = reply.send(result);
            }
            AgentCommand::Broadcast(text, reply) => {
                let from_label = format!("📢 {}", owner.path);
                let children: Vec<PathSegment> = state.children.iter().cloned().collect();
                for child in &children {
                    let child_owner = Router::child_owner(&owner.tenant, &owner.path, child);
                    if let Err(err) =
                        hierarchy::send_direct(&router, &child_owner, from_label.clone(), text.clone()).await
                    {
                        warn!(%err, child = %child, "broadcast delivery to child failed");
                    }
                }
                let msg = StoredMessage {
                    id: MessageId::generate(),
                    timestamp: Utc::now(),
                    from_agent: owner.canonical(),
                    to_agent: None,
                    content: text.clone(),
                    message_type: MessageKind::Broadcast,
                };
                persist_message(&store, &owner, &msg).await;
                state.push_message(msg, config.msg_mem_ring.into_inner());
                state.publish(&ServerEvent::Message { from: from_label, content: text });
                let _ = reply.send(());
            }
            AgentCommand::InboundMessage { from, content, kind, reply } => {
                let prefix = match kind {
                    MessageKind::Direct => "📨",
                    MessageKind::Broadcast => "📢",
                    MessageKind::System => "⚙️",
                };
                let msg = StoredMessage {
                    id: MessageId::generate(),
                    timestamp: Utc::now(),
                    from_agent: from.clone(),
                    to_agent: Some(owner.canonical()),
                    content: content.clone(),
                    message_type: kind,
                };
                persist_message(&store, &owner, &msg).await;
                state.push_message(msg, config.msg_mem_ring.into_inner());
                state.publish(&ServerEvent::Message { from: format!("{prefix} {from}"), content });
                let _ = reply.send(Ok(()));
            }
            AgentCommand::StockOp { sku, quantity, operation, reply } => {
                let result =
                    apply_stock_op(&owner, &mut state, &store, &router, &config, sku, quantity, operation)
                        .await;
                let _ = reply.send(result);
            }
            AgentCommand::StockQuery(sku, reply) => {
                let result = state
                    .inventory
                    .get(&sku)
                    .map(|item| (item.current_stock, owner.path.to_string()));
                let _ = reply.send(result);
            }
            AgentCommand::InventorySync(updates, reply) => {
                let mut outcomes = Vec::with_capacity(updates.len());
                for (sku, quantity, operation) in updates {
                    let outcome =
                        apply_stock_op(&owner, &mut state, &store, &router, &config, sku, quantity, operation)
                            .await;
                    outcomes.push(match outcome {
                        Ok(()) => SyncOutcome::Ok,
                        Err(err) => SyncOutcome::Err(err.to_string()),
                    });
                }
                let _ = reply.send(outcomes);
            }
            AgentCommand::GetAlerts(reply) => {
                let alerts = state
                    .inventory
                    .iter()
                    .filter(|(_, item)| item.current_stock <= item.low_stock_threshold)
                    .map(|(sku, item)| AlertEntry {
                        sku: sku.clone(),
                        current_stock: item.current_stock,
                        threshold: item.low_stock_threshold,
                        severity: if item.current_stock == 0 { "critical" } else { "warning" },
                    })
                    .collect();
                let _ = reply.send(alerts);
            }
            AgentCommand::GetMessages { limit, offset, reply } => {
                let result = store
                    .list_messages(&owner.canonical(), limit.clamp(1, 100), offset.max(0))
                    .await
                    .map(|(rows, total)| (rows.into_iter().map(row_to_in_memory).collect(), total))
                    .map_err(ApiError::from);
                let _ = reply.send(result);
            }
            AgentCommand::ChatMessage { content, user_id, reply } => {
                let (event, stats) =
                    handle_chat_message(&owner, &mut state, &store, &router, content, user_id).await;
                let _ = reply.send((event, stats));
            }
            AgentCommand::Subscribe { sender, id, reply } => {
                state.subscriptions.push(Subscription { id, sender });
                let history: Vec<StoredMessage> = state.messages.iter().cloned().collect();
                let _ = reply.send((state.snapshot(), history, state.chat_snapshot()));
            }
            AgentCommand::Unsubscribe(id) => {
                state.subscriptions.retain(|s| s.id != id);
            }
            AgentCommand::Ping(reply) => {
                let _ = reply.send(state.snapshot());
            }
            AgentCommand::AiAnalyze(sku, reply) => {
                let result = run_analysis(&router, &owner, &store, &state, &sku).await;
                let _ = reply.send(result);
            }
            AgentCommand::AiForecast(reply) => {
                let forecasts = run_forecast(&router, &owner, &store, &state).await;
                let _ = reply.send(forecasts);
            }
            AgentCommand::AiInsights(reply) => {
                let analyses = store.recent_analyses(&owner.canonical(), 20).await.unwrap_or_default();
                let decisions = store.recent_decisions(&owner.canonical(), 20).await.unwrap_or_default();
                let forecasts = store.recent_forecasts(&owner.canonical(), 20).await.unwrap_or_default();
                let _ = reply.send((analyses, decisions, forecasts));
            }
        }
        }
        .instrument(span)
        .await;
    }

    let mut lifecycle = lifecycle.write().await;
    *lifecycle = AgentLifecycleState::Terminated;
    info!("agent task exiting");
}

fn system_notice(content: String) -> StoredMessage {
    StoredMessage {
        id: MessageId::generate(),
        timestamp: Utc::now(),
        from_agent: "system".to_string(),
        to_agent: None,
        content,
        message_type: MessageKind::System,
    }
}

fn row_to_in_memory(row: StoredMessageRow) -> StoredMessage {
    StoredMessage {
        id: row.id,
        timestamp: row.timestamp,
        from_agent: row.from_agent,
        to_agent: row.to_agent,
        content: row.content,
        message_type: row.message_type,
    }
}

async fn persist_fleet_state(store: &Store, state: &FleetState) {
    let row = FleetStateRow {
        counter: i64::try_from(state.counter).unwrap_or(i64::MAX),
        children: state.children.clone(),
        agent_type: state.agent_type,
    };
    if let Err(err) = store.save_fleet_state(&row).await {
        warn!(%err, "failed to persist fleet state");
    }
}

async fn persist_message(store: &Store, owner: &OwnerKey, msg: &StoredMessage) {
    let row = StoredMessageRow {
        id: msg.id,
        timestamp: msg.timestamp,
        from_agent: msg.from_agent.clone(),
        to_agent: msg.to_agent.clone(),
        content: msg.content.clone(),
        message_type: msg.message_type,
        location: owner.canonical(),
    };
    if let Err(err) = store.insert_message(&row).await {
        warn!(%err, "failed to persist message");
    }
}

trait InventoryOrDefault {
    fn or_default_item(self) -> InventoryItem;
}

impl InventoryOrDefault for Option<&InventoryItem> {
    fn or_default_item(self) -> InventoryItem {
        self.cloned().unwrap_or(InventoryItem {
            name: String::new(),
            current_stock: 0,
            low_stock_threshold: 0,
            last_updated: Utc::now(),
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn apply_stock_op(
    owner: &OwnerKey,
    state: &mut FleetState,
    store: &Store,
    router: &Router,
    config: &FleetConfig,
    sku: Sku,
    quantity: u32,
    operation: StockOperation,
) -> ApiResult<()> {
    let existing = state.inventory.get(&sku).or_default_item();
    let new_stock = match operation {
        StockOperation::Set => quantity,
        StockOperation::Increment => existing.current_stock.saturating_add(quantity),
        StockOperation::Decrement => existing.current_stock.saturating_sub(quantity),
    };

    let crossed_threshold = new_stock <= existing.low_stock_threshold;
    let item = InventoryItem {
        name: existing.name,
        current_stock: new_stock,
        low_stock_threshold: existing.low_stock_threshold,
        last_updated: Utc::now(),
    };
    state.inventory.insert(sku.clone(), item.clone());

    let item_row = InventoryItemRow {
        sku: sku.clone(),
        name: item.name.clone(),
        current_stock: item.current_stock,
        low_stock_threshold: item.low_stock_threshold,
        location: owner.canonical(),
        last_updated: item.last_updated,
    };
    let txn_row = TransactionRow { sku: sku.clone(), operation, quantity, location: owner.canonical(), timestamp: Utc::now() };
    store.save_inventory_item_and_transaction(&item_row, &txn_row).await?;

    state.publish(&ServerEvent::StockUpdate { sku: sku.to_string(), quantity, operation });

    if crossed_threshold {
        state.publish(&ServerEvent::LowStockAlert {
            sku: sku.to_string(),
            current_stock: item.current_stock,
            threshold: item.low_stock_threshold,
            location: owner.path.to_string(),
        });
        handle_threshold_crossing(owner, store, router, config, &sku, &item).await;
    }

    if let Some(parent) = owner.path.parent() {
        let parent_owner = OwnerKey::new(owner.tenant.clone(), parent);
        if let Err(err) = hierarchy::propagate_stock_update(router, &parent_owner, sku, quantity, operation).await
        {
            warn!(%err, "stock propagation to parent failed");
        }
    }

    Ok(())
}

async fn handle_threshold_crossing(
    owner: &OwnerKey,
    store: &Store,
    router: &Router,
    config: &FleetConfig,
    sku: &Sku,
    item: &InventoryItem,
) {
    let collaborators = router.collaborators();
    let messages = [ChatTurn {
        role: "user".to_string(),
        content: format!(
            "SKU {sku} at {} is at {} units, threshold {}. Recommend an action.",
            owner.path, item.current_stock, item.low_stock_threshold
        ),
    }];
    let response = crate::collaborators::with_deadline(Duration::from_secs(5), async {
        collaborators.model.run("inventory-trend", &messages, None).await
    })
    .await
    .unwrap_or_else(|err| crate::collaborators::ModelResponse {
        parsed: None,
        text: format!("analysis unavailable: {err}"),
    });

    let should_reorder = response.text.to_lowercase().contains("reorder") || item.current_stock == 0;
    let reorder_quantity = item.low_stock_threshold.saturating_mul(2).max(1);
    let urgency_critical = item.current_stock == 0;

    let analysis_row = AnalysisRow {
        sku: sku.to_string(),
        location: owner.canonical(),
        analysis: json!({ "text": response.text, "should_reorder": should_reorder }),
        confidence: 0.5,
        timestamp: Utc::now(),
    };
    if let Err(err) = store.insert_analysis(&analysis_row).await {
        warn!(%err, "failed to persist analysis");
    }

    if should_reorder {
        let needs_approval =
            urgency_critical || reorder_quantity > config.approval_amount_threshold.into_inner();
        let decision_type = if needs_approval {
            match collaborators.approval.request_approval(sku.as_ref(), reorder_quantity).await {
                ApprovalDecision::Approved => "reorder-approved",
                ApprovalDecision::Denied => "reorder-denied",
            }
        } else {
            "reorder-auto"
        };

        let decision_row = DecisionRow {
            sku: sku.to_string(),
            location: owner.canonical(),
            decision_type: decision_type.to_string(),
            reasoning: response.text.clone(),
            timestamp: Utc::now(),
        };
        if let Err(err) = store.insert_decision(&decision_row).await {
            warn!(%err, "failed to persist decision");
        }

        if decision_type != "reorder-denied" {
            let payload = json!({
                "sku": sku.to_string(),
                "location": owner.canonical(),
                "quantity": reorder_quantity,
            });
            if let Err(err) = collaborators.workflow.create("reorder-workflow", payload).await {
                warn!(%err, "failed to enqueue reorder workflow");
            }
        }
    }

    let _ = collaborators
        .bus
        .send("inventory.low-stock", json!({ "sku": sku.to_string(), "location": owner.canonical() }))
        .await;
}

async fn run_analysis(
    router: &Router,
    owner: &OwnerKey,
    store: &Store,
    state: &FleetState,
    sku: &Sku,
) -> ApiResult<Value> {
    let item = state.inventory.get(sku).ok_or_else(|| ApiError::NotFound(sku.to_string()))?;
    let collaborators = router.collaborators();
    let messages = [ChatTurn {
        role: "user".to_string(),
        content: format!("Analyze demand trend for SKU {sku} at {}", owner.path),
    }];
    let response = crate::collaborators::with_deadline(Duration::from_secs(5), async {
        collaborators.model.run("inventory-trend", &messages, None).await
    })
    .await
    .unwrap_or_else(|err| crate::collaborators::ModelResponse {
        parsed: None,
        text: format!("analysis unavailable: {err}"),
    });
    let row = AnalysisRow {
        sku: sku.to_string(),
        location: owner.canonical(),
        analysis: json!({ "text": response.text, "current_stock": item.current_stock }),
        confidence: 0.5,
        timestamp: Utc::now(),
    };
    store.insert_analysis(&row).await?;
    Ok(json!({ "insights": response.text }))
}

async fn run_forecast(router: &Router, owner: &OwnerKey, store: &Store, state: &FleetState) -> Vec<ForecastRow> {
    let collaborators = router.collaborators();
    let mut forecasts = Vec::new();
    for (sku, item) in &state.inventory {
        let messages = [ChatTurn {
            role: "user".to_string(),
            content: format!("Forecast demand for SKU {sku} given current stock {}", item.current_stock),
        }];
        let response = crate::collaborators::with_deadline(Duration::from_secs(5), async {
            collaborators.model.run("demand-forecast", &messages, None).await
        })
        .await
        .unwrap_or_default();
        let row = ForecastRow {
            sku: sku.to_string(),
            location: owner.canonical(),
            predicted_demand: f64::from(item.current_stock) * 1.1,
            confidence: 0.4,
            trend_direction: "flat".to_string(),
            reasoning: response.text,
            forecast_date: Utc::now(),
        };
        if store.insert_forecast(&row).await.is_ok() {
            forecasts.push(row);
        }
    }
    forecasts
}

async fn handle_chat_message(
    owner: &OwnerKey,
    state: &mut FleetState,
    store: &Store,
    router: &Router,
    content: String,
    user_id: Option<String>,
) -> (ServerEvent, ChatStatsSnapshot) {
    let ring = router.config().msg_mem_ring.into_inner();
    let today = Utc::now().date_naive();
    if state.chat_date != today {
        state.chat_date = today;
        state.chat_stats =
            ChatStatsRow { messages_today: 0, actions_executed: 0, successful_actions: 0 };
    }
    state.chat_stats.messages_today += 1;

    let user_msg = StoredMessage {
        id: MessageId::generate(),
        timestamp: Utc::now(),
        from_agent: user_id.unwrap_or_else(|| "user".to_string()),
        to_agent: Some(owner.canonical()),
        content: content.clone(),
        message_type: MessageKind::Direct,
    };
    persist_message(store, owner, &user_msg).await;
    state.push_message(user_msg, ring);

    let collaborators = router.collaborators();
    let messages = [ChatTurn { role: "user".to_string(), content: content.clone() }];
    state.chat_stats.actions_executed += 1;
    let (reply_text, succeeded) = match crate::collaborators::with_deadline(Duration::from_secs(5), async {
        collaborators.model.run("chat", &messages, None).await
    })
    .await
    {
        Ok(response) => (response.text, true),
        Err(err) => (format!("I couldn't reach the assistant right now ({err}); please retry."), false),
    };
    if succeeded {
        state.chat_stats.successful_actions += 1;
    }

    let assistant_msg = StoredMessage {
        id: MessageId::generate(),
        timestamp: Utc::now(),
        from_agent: "assistant".to_string(),
        to_agent: None,
        content: reply_text.clone(),
        message_type: MessageKind::System,
    };
    persist_message(store, owner, &assistant_msg).await;
    state.push_message(assistant_msg, ring);

    if let Err(err) = store.save_chat_stats(&owner.canonical(), today, state.chat_stats).await {
        warn!(%err, "failed to persist chat stats");
    }

    let stats = state.chat_snapshot();
    state.publish(&ServerEvent::ChatStats {
        messages_today: stats.messages_today,
        actions_executed: stats.actions_executed,
        success_rate: stats.success_rate,
    });

    let event = ServerEvent::ChatResponse {
        role: "assistant".to_string(),
        content: reply_text,
        timestamp: Utc::now(),
        metadata: None,
    };
    state.publish(&event);
    (event, stats)
}
