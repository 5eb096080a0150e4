//! Event types for audience observability
//!
//! Events give consumers (trigger systems, debug tooling) a stream of
//! membership and ownership changes without polling.

use crate::{AudienceRef, ClientId, ResourceTypeId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping every audience event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// The actual event
    pub event: AudienceEvent,
}

impl AudienceEventEnvelope {
    pub fn new(event: AudienceEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event,
        }
    }
}

/// Audience events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudienceEvent {
    /// A client came online and was offered to the root audiences
    ClientConnected(ClientId),

    /// A client went offline and was evicted everywhere
    ClientDisconnected(ClientId),

    /// An audience node was installed into the tree
    AudienceInstalled(AudienceRef),

    /// An audience node was removed and disposed
    AudienceUninstalled(AudienceRef),

    /// A slot was created for its first interested audience
    SlotCreated {
        resource: ResourceTypeId,
        client: ClientId,
        slot: String,
    },

    /// Ownership of a slot moved (either side may be empty)
    OwnershipChanged {
        resource: ResourceTypeId,
        client: ClientId,
        slot: String,
        previous: Option<AudienceRef>,
        current: Option<AudienceRef>,
    },

    /// A slot lost its last interested audience and was destroyed
    SlotDestroyed {
        resource: ResourceTypeId,
        client: ClientId,
        slot: String,
    },
}

impl AudienceEvent {
    /// The client an event concerns, if any
    pub fn client(&self) -> Option<&ClientId> {
        match self {
            AudienceEvent::ClientConnected(client) | AudienceEvent::ClientDisconnected(client) => {
                Some(client)
            }
            AudienceEvent::SlotCreated { client, .. }
            | AudienceEvent::OwnershipChanged { client, .. }
            | AudienceEvent::SlotDestroyed { client, .. } => Some(client),
            AudienceEvent::AudienceInstalled(_) | AudienceEvent::AudienceUninstalled(_) => None,
        }
    }
}
