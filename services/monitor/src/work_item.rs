/// A validated unit of work headed for the durable registry. Constructed by
/// the connection reader after parsing and field-validating an IPC frame;
/// the writer task is the only thing that touches the registry.
#[derive(Debug, Clone)]
pub enum WorkItem {
    Register {
        channel: String,
        pid: u32,
        features_json: String,
    },
    Heartbeat {
        channel: String,
        pid: u32,
        rss_mb: Option<f64>,
        cpu_pct: Option<f64>,
    },
    Unregister {
        channel: String,
        pid: u32,
    },
    LlmUsage {
        channel: String,
        model: String,
        feature: String,
        tokens_in: u64,
        tokens_out: u64,
        latency_ms: u64,
        estimated_cost: f64,
    },
}

impl WorkItem {
    /// Build a work item from a decoded IPC message, or `None` if the frame
    /// isn't one the Monitor accepts (hello/subscribe/etc. are Hub-bound).
    pub fn from_message(msg: &ipc_protocol::Message) -> Option<Self> {
        use ipc_protocol::Message as M;
        match msg {
            M::Register(r) => Some(WorkItem::Register {
                channel: r.channel.clone(),
                pid: r.pid,
                features_json: serde_json::to_string(&r.features).unwrap_or_else(|_| "{}".to_owned()),
            }),
            M::Heartbeat(h) => Some(WorkItem::Heartbeat {
                channel: h.channel.clone(),
                pid: h.pid,
                rss_mb: h.rss_mb,
                cpu_pct: h.cpu_pct,
            }),
            M::Unregister(u) => Some(WorkItem::Unregister {
                channel: u.channel.clone(),
                pid: u.pid,
            }),
            M::LlmUsage(l) => Some(WorkItem::LlmUsage {
                channel: l.channel.clone(),
                model: l.model.clone(),
                feature: l.feature.clone(),
                tokens_in: l.tokens_in,
                tokens_out: l.tokens_out,
                latency_ms: l.latency_ms,
                estimated_cost: l.estimated_cost,
            }),
            M::Hello(_) | M::Subscribe(_) | M::Unsubscribe(_) | M::EventsubEvent(_) | M::Ping => None,
        }
    }
}
