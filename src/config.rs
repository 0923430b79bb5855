//! Runtime configuration for the fleet core
//!
//! Mirrors the validated-numeric-newtype + preset-constructor pattern used
//! throughout this codebase's message router configuration: every tunable
//! is a `nutype`-validated value so an out-of-range setting is rejected at
//! construction rather than silently clamped at use.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// In-memory message ring size per agent. Spec default 100.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 100
)]
pub struct MsgMemRing(usize);

/// Server-side message purge age, in days. Spec default 30.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3650),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 30
)]
pub struct MsgRetentionDays(i64);

/// Subscription heartbeat interval, in seconds. Spec default 10s.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 600),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 10
)]
pub struct PingIntervalSecs(u64);

/// Subscription idle timeout, in seconds. Spec default 120s.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 3600),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 120
)]
pub struct IdleMaxSecs(u64);

/// Read-through cache TTL for `/state`, in seconds. Spec default 30s.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 3600),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 30
)]
pub struct CacheTtlStateSecs(u64);

/// Read-through cache TTL for `/inventory/stock`, in seconds. Spec default 60s.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 3600),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 60
)]
pub struct CacheTtlInventorySecs(u64);

/// Reorder quantity above which human approval is requested regardless of
/// urgency. Spec default 1000.
#[nutype(
    validate(greater_or_equal = 1),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 1000
)]
pub struct ApprovalAmountThreshold(u32);

/// Bounded wait before the default approval hook auto-approves. Spec default 2s.
#[nutype(
    validate(greater_or_equal = 0, less_or_equal = 60),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default),
    default = 2
)]
pub struct ApprovalWaitSecs(u64);

impl ApprovalWaitSecs {
    /// This bound as a [`Duration`].
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}

impl PingIntervalSecs {
    /// This bound as a [`Duration`].
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}

impl IdleMaxSecs {
    /// This bound as a [`Duration`].
    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into_inner())
    }
}

/// Top-level configuration for the fleet core, covering every knob listed
/// a fleet installation exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// In-memory message ring size per agent.
    pub msg_mem_ring: MsgMemRing,
    /// Server-side message purge age.
    pub msg_retention_days: MsgRetentionDays,
    /// Subscription heartbeat interval.
    pub ping_interval_secs: PingIntervalSecs,
    /// Subscription idle timeout.
    pub idle_max_secs: IdleMaxSecs,
    /// `/state` cache TTL.
    pub cache_ttl_state_secs: CacheTtlStateSecs,
    /// `/inventory/stock` cache TTL.
    pub cache_ttl_inventory_secs: CacheTtlInventorySecs,
    /// Reorder quantity threshold forcing human approval.
    pub approval_amount_threshold: ApprovalAmountThreshold,
    /// Bounded auto-approval wait.
    pub approval_wait_secs: ApprovalWaitSecs,
    /// Default agent type assigned to newly created children.
    pub default_agent_type: crate::domain_types::AgentType,
    /// Connection pool size for each Agent's SQLite store.
    pub store_pool_size: crate::store::StorePoolSize,
    /// Directory holding one SQLite file per `OwnerKey`.
    pub data_dir: std::path::PathBuf,
    /// HTTP listen port.
    pub port: u16,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            msg_mem_ring: MsgMemRing::default(),
            msg_retention_days: MsgRetentionDays::default(),
            ping_interval_secs: PingIntervalSecs::default(),
            idle_max_secs: IdleMaxSecs::default(),
            cache_ttl_state_secs: CacheTtlStateSecs::default(),
            cache_ttl_inventory_secs: CacheTtlInventorySecs::default(),
            approval_amount_threshold: ApprovalAmountThreshold::default(),
            approval_wait_secs: ApprovalWaitSecs::default(),
            default_agent_type: crate::domain_types::AgentType::default(),
            store_pool_size: crate::store::StorePoolSize::default(),
            data_dir: std::path::PathBuf::from("./data"),
            port: 8080,
        }
    }
}

impl FleetConfig {
    /// A configuration tuned for fast, deterministic tests: short waits, a
    /// temp-style data directory the caller is expected to override.
    #[must_use]
    pub fn for_testing(data_dir: std::path::PathBuf) -> Self {
        Self {
            approval_wait_secs: ApprovalWaitSecs::try_new(0)
                .expect("0 is within ApprovalWaitSecs bounds"),
            ping_interval_secs: PingIntervalSecs::try_new(1)
                .expect("1 is within PingIntervalSecs bounds"),
            idle_max_secs: IdleMaxSecs::try_new(5).expect("5 is within IdleMaxSecs bounds"),
            cache_ttl_state_secs: CacheTtlStateSecs::try_new(0)
                .expect("0 is within CacheTtlStateSecs bounds"),
            cache_ttl_inventory_secs: CacheTtlInventorySecs::try_new(0)
                .expect("0 is within CacheTtlInventorySecs bounds"),
            data_dir,
            port: 0,
            ..Self::default()
        }
    }
}
