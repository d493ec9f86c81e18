#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredSubscription {
    pub channel_id: String,
    pub topic: String,
    pub version: String,
    pub transport: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatus {
    Enabled,
    Pending,
    /// Upstream reported the subscription revoked or failed; retained until
    /// the reconciler either recreates or drops it per the Desired row.
    Failed,
}

impl ActiveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ActiveStatus::Enabled => "enabled",
            ActiveStatus::Pending => "pending",
            ActiveStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "enabled" => ActiveStatus::Enabled,
            "pending" => ActiveStatus::Pending,
            _ => ActiveStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub channel_id: String,
    pub topic: String,
    pub upstream_id: String,
    pub status: ActiveStatus,
    pub cost: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Online,
    Stale,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Stale => "stale",
            WorkerStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "online" => WorkerStatus::Online,
            "stale" => WorkerStatus::Stale,
            _ => WorkerStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub ts: String,
    pub event: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    pub channel: String,
    pub pid: u32,
    pub features_json: String,
    pub registered_at: String,
    pub last_heartbeat: String,
    pub status: WorkerStatus,
}
