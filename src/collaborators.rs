//! External collaborator interfaces
//!
//! Thin, constructor-injected ports to the four non-core dependencies: a
//! language model, a vector similarity index, a background workflow queue,
//! and an audit/notification bus. Every port is `Send + Sync` trait object
//! friendly so the Agent can hold `Arc<dyn Trait>` fields and swap a stub
//! for a real binding without touching call sites, the same way
//! `AgentLifecycleManager` injects `DeploymentManager`/`HotReloadManager`.
//!
//! Each port additionally ships a deterministic stub implementation used as
//! the default runtime binding, so the system never hard-fails when a
//! collaborator is unavailable.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::ApprovalWaitSecs;

/// Errors from an external collaborator call. These are always logged and
/// never propagated as a user-facing failure.
#[derive(Debug, Error, Clone)]
pub enum CollaboratorError {
    /// The call did not complete within its deadline.
    #[error("collaborator call timed out")]
    Timeout,
    /// The collaborator returned an error.
    #[error("collaborator error: {0}")]
    Failed(String),
}

/// A chat message role, mirroring typical chat-completion request shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// Turn content.
    pub content: String,
}

/// The result of a `ModelClient::run` call.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    /// Parsed structured output, if a response schema was supplied and the
    /// model's output matched it.
    pub parsed: Option<Value>,
    /// Raw text output.
    pub text: String,
}

/// Turns prompts into JSON or plain text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run a chat-style completion, optionally validating against a JSON
    /// response schema. Must be deadline-bounded by the caller.
    async fn run(
        &self,
        model: &str,
        messages: &[ChatTurn],
        response_schema: Option<&Value>,
    ) -> Result<ModelResponse, CollaboratorError>;
}

/// A nearest-neighbor match returned by [`VectorStore::query`].
#[derive(Debug, Clone)]
pub struct VectorMatch {
    /// The id supplied at insert time.
    pub id: String,
    /// Similarity score, higher is closer.
    pub score: f32,
    /// Metadata attached at insert time, if requested.
    pub metadata: Option<Value>,
}

/// Nearest-neighbor lookup over embedding vectors.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a vector under `id`.
    async fn insert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: Option<Value>,
    ) -> Result<(), CollaboratorError>;

    /// Return the `top_k` nearest matches to `vector`.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        return_metadata: bool,
    ) -> Result<Vec<VectorMatch>, CollaboratorError>;

    /// Remove vectors by id.
    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), CollaboratorError>;
}

/// Status of a dispatched workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    /// Accepted but not yet started.
    Queued,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Dropped (e.g. unknown workflow name) or failed.
    Failed,
}

/// Enqueues named background jobs.
#[async_trait]
pub trait WorkflowDispatcher: Send + Sync {
    /// Enqueue `name` with `payload`, returning an opaque workflow id.
    /// Must be non-blocking; unknown names are logged and dropped rather
    /// than erroring.
    async fn create(&self, name: &str, payload: Value) -> Result<String, CollaboratorError>;

    /// Look up the status of a previously created workflow.
    async fn status(&self, workflow_id: &str) -> Result<WorkflowStatus, CollaboratorError>;

    /// Best-effort cancellation.
    async fn cancel(&self, workflow_id: &str) -> Result<(), CollaboratorError>;
}

/// Best-effort audit/notification publishing.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` under `topic`. Failures are logged, never fatal.
    async fn send(&self, topic: &str, payload: Value) -> Result<(), CollaboratorError>;
}

/// The outcome of a human-approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// The action may proceed.
    Approved,
    /// The action must not proceed.
    Denied,
}

/// Pluggable human-in-the-loop approval gate: a default auto-approve
/// binding behind a swappable interface.
#[async_trait]
pub trait ApprovalHook: Send + Sync {
    /// Request approval for a reorder of `quantity` units of `sku`.
    async fn request_approval(&self, sku: &str, quantity: u32) -> ApprovalDecision;
}

/// Deterministic stub `ModelClient`: never calls out, returns a canned
/// intent-shortcut reply so chat flows remain testable offline.
#[derive(Debug, Default, Clone)]
pub struct NullModelClient;

#[async_trait]
impl ModelClient for NullModelClient {
    async fn run(
        &self,
        _model: &str,
        messages: &[ChatTurn],
        _response_schema: Option<&Value>,
    ) -> Result<ModelResponse, CollaboratorError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(ModelResponse {
            parsed: None,
            text: format!("acknowledged: {last_user}"),
        })
    }
}

/// Deterministic stub `VectorStore`: queries always return empty.
#[derive(Debug, Default, Clone)]
pub struct NullVectorStore;

#[async_trait]
impl VectorStore for NullVectorStore {
    async fn insert(
        &self,
        _id: &str,
        _vector: &[f32],
        _metadata: Option<Value>,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn query(
        &self,
        _vector: &[f32],
        _top_k: usize,
        _return_metadata: bool,
    ) -> Result<Vec<VectorMatch>, CollaboratorError> {
        Ok(Vec::new())
    }

    async fn delete_by_ids(&self, _ids: &[String]) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Deterministic stub `WorkflowDispatcher`: accepts and immediately reports
/// every job as `Completed`.
#[derive(Debug, Default, Clone)]
pub struct NullWorkflowDispatcher;

#[async_trait]
impl WorkflowDispatcher for NullWorkflowDispatcher {
    async fn create(&self, _name: &str, _payload: Value) -> Result<String, CollaboratorError> {
        Ok(uuid::Uuid::new_v4().to_string())
    }

    async fn status(&self, _workflow_id: &str) -> Result<WorkflowStatus, CollaboratorError> {
        Ok(WorkflowStatus::Completed)
    }

    async fn cancel(&self, _workflow_id: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Deterministic stub `MessageBus`: drops every message after logging it.
#[derive(Debug, Default, Clone)]
pub struct NullMessageBus;

#[async_trait]
impl MessageBus for NullMessageBus {
    async fn send(&self, topic: &str, payload: Value) -> Result<(), CollaboratorError> {
        tracing::debug!(topic, %payload, "message bus publish (null sink)");
        Ok(())
    }
}

/// Default approval hook: waits `approval_wait` then auto-approves.
#[derive(Debug, Clone, Copy)]
pub struct AutoApproveHook {
    wait: ApprovalWaitSecs,
}

impl AutoApproveHook {
    /// Build a hook that waits `wait` before approving.
    #[must_use]
    pub fn new(wait: ApprovalWaitSecs) -> Self {
        Self { wait }
    }
}

#[async_trait]
impl ApprovalHook for AutoApproveHook {
    async fn request_approval(&self, _sku: &str, _quantity: u32) -> ApprovalDecision {
        tokio::time::sleep(self.wait.as_duration()).await;
        ApprovalDecision::Approved
    }
}

/// Run a collaborator future with a deadline, mapping a timeout to
/// [`CollaboratorError::Timeout`]. Every external call in the Agent must go
/// through this helper.
pub async fn with_deadline<T, F>(duration: Duration, fut: F) -> Result<T, CollaboratorError>
where
    F: std::future::Future<Output = Result<T, CollaboratorError>>,
{
    timeout(duration, fut)
        .await
        .unwrap_or(Err(CollaboratorError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_model_client_echoes_last_user_turn() {
        let client = NullModelClient;
        let response = client
            .run(
                "any",
                &[ChatTurn {
                    role: "user".to_string(),
                    content: "hello".to_string(),
                }],
                None,
            )
            .await
            .unwrap();
        assert!(response.text.contains("hello"));
    }

    #[tokio::test]
    async fn auto_approve_hook_approves_after_wait() {
        let hook = AutoApproveHook::new(ApprovalWaitSecs::try_new(0).unwrap());
        assert_eq!(
            hook.request_approval("SKU-1", 10).await,
            ApprovalDecision::Approved
        );
    }

    #[tokio::test]
    async fn with_deadline_times_out() {
        let result: Result<(), CollaboratorError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(CollaboratorError::Timeout)));
    }
}
