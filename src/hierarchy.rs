//! In-process RPC between Agents: every "send to a peer" operation resolves
//! the peer's `AgentHandle` through the shared `Router` registry (lazily
//! spawning it if this is the first time this process has touched that
//! `OwnerKey`) and then calls straight into it. There is no wire hop — the
//! tree lives in one process's address space, and `Router::handle_for`
//! already serializes initialization the way a real RPC client would
//! serialize a connection handshake.

use crate::domain_types::{MessageKind, OwnerKey, Sku, StockOperation};
use crate::error::ApiResult;
use crate::router::Router;

/// Deliver a direct message to `target`, creating its Agent if this is the
/// first time this process has addressed it.
///
/// # Errors
///
/// Returns an [`crate::error::ApiError`] if `target`'s store cannot be opened.
pub async fn send_direct(router: &Router, target: &OwnerKey, from: String, content: String) -> ApiResult<()> {
    let handle = router.handle_for(target.clone()).await?;
    handle.inbound_message(from, content, MessageKind::Direct).await
}

/// Cascade-delete `owner`'s entire subtree. Resolves (and thereby may spawn)
/// the target before draining it, since a subtree that was never touched in
/// this process still needs its on-disk state cleared.
///
/// # Errors
///
/// Returns an [`crate::error::ApiError`] if `owner`'s store cannot be opened.
pub async fn delete_subtree(router: &Router, owner: &OwnerKey) -> ApiResult<()> {
    let handle = router.handle_for(owner.clone()).await?;
    handle.delete_subtree().await
}

/// Best-effort propagation of a stock change up to `parent`, recorded there
/// as an ordinary `Increment`/`Decrement`/`Set` against the same SKU. A
/// failure here never rolls back the child's own write; the caller logs and
/// moves on.
///
/// # Errors
///
/// Returns an [`crate::error::ApiError`] if `parent`'s store cannot be opened.
pub async fn propagate_stock_update(
    router: &Router,
    parent: &OwnerKey,
    sku: Sku,
    quantity: u32,
    operation: StockOperation,
) -> ApiResult<()> {
    let handle = router.handle_for(parent.clone()).await?;
    handle.stock_op(sku, quantity, operation).await
}
