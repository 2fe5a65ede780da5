//! Event names carried on the wire.
//!
//! Keep these in sync with the producers; an unknown name stops the consumer.

pub const EVENT_ACTIVITY: &str = "Event";
pub const EVENT_CLUSTER_STATE: &str = "ClusterState";
pub const EVENT_HOST_STATE: &str = "HostState";
pub const EVENT_INFRA_ENV_STATE: &str = "InfraEnv";

/// Routing tag derived from an event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Point-in-time activity that is enriched and stored.
    Activity,
    ClusterState,
    HostState,
    InfraEnvState,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            EVENT_ACTIVITY => Some(Self::Activity),
            EVENT_CLUSTER_STATE => Some(Self::ClusterState),
            EVENT_HOST_STATE => Some(Self::HostState),
            EVENT_INFRA_ENV_STATE => Some(Self::InfraEnvState),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => EVENT_ACTIVITY,
            Self::ClusterState => EVENT_CLUSTER_STATE,
            Self::HostState => EVENT_HOST_STATE,
            Self::InfraEnvState => EVENT_INFRA_ENV_STATE,
        }
    }

    /// State events overwrite a snapshot and are acknowledged right away.
    pub fn is_state(self) -> bool {
        !matches!(self, Self::Activity)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
