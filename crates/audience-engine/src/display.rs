//! Displays: live membership with edge-triggered lifecycle hooks.
//!
//! A display tracks which clients are currently "in" it. It activates when
//! its first member arrives and deactivates when its last member leaves;
//! implementors react through the `on_*` hooks and never touch the member
//! set directly.

use std::sync::atomic::{AtomicBool, Ordering};

use audience_types::{AudienceRef, ClientId, DisplayState};
use dashmap::DashSet;
use parking_lot::Mutex;
use tracing::debug;

use crate::filter::AudienceFilter;

/// Concurrent member set plus the activation flag of one display.
///
/// Membership changes and the empty/non-empty edge are decided together
/// under `edge`, so an add racing the removal of the last member can never
/// be swept out or leave the flag behind.
#[derive(Debug, Default)]
pub struct Membership {
    members: DashSet<ClientId>,
    active: AtomicBool,
    edge: Mutex<()>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, client: &ClientId) -> bool {
        self.members.contains(client)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members in stable order.
    pub fn snapshot(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self.members.iter().map(|c| *c).collect();
        clients.sort();
        clients
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// `None` if already a member, otherwise whether this insert activated
    /// the set.
    fn insert(&self, client: ClientId) -> Option<bool> {
        let _edge = self.edge.lock();
        if !self.members.insert(client) {
            return None;
        }
        Some(!self.active.swap(true, Ordering::SeqCst))
    }

    /// `None` if not a member, otherwise whether this removal emptied an
    /// active set.
    fn remove(&self, client: &ClientId) -> Option<bool> {
        let _edge = self.edge.lock();
        self.members.remove(client)?;
        Some(self.members.is_empty() && self.active.swap(false, Ordering::SeqCst))
    }

    fn set_active(&self, active: bool) -> bool {
        let _edge = self.edge.lock();
        self.active.swap(active, Ordering::SeqCst)
    }
}

/// A node of the audience tree that clients can be in.
pub trait AudienceDisplay: Send + Sync {
    /// The declared rule this display belongs to.
    fn audience(&self) -> &AudienceRef;

    /// Raw (considered) membership.
    fn membership(&self) -> &Membership;

    /// Called after a client entered the membership.
    fn on_client_add(&self, client: &ClientId);

    /// Called after a client left the membership.
    fn on_client_remove(&self, client: &ClientId);

    /// Called when the display starts having members.
    fn on_activate(&self) {}

    /// Called when the display no longer has members.
    fn on_deactivate(&self) {}

    /// Called once when the display is taken out of service.
    fn on_dispose(&self) {}

    /// Called every engine tick.
    fn tick(&self) {}

    fn as_filter(&self) -> Option<&dyn AudienceFilter> {
        None
    }

    fn is_active(&self) -> bool {
        self.membership().is_active()
    }

    /// Idempotent.
    fn activate(&self) {
        if !self.membership().set_active(true) {
            debug!(audience = %self.audience(), "Display activated");
            self.on_activate();
        }
    }

    /// Idempotent. Removes any member still tracked so every add is matched
    /// by a remove. Plain removals never sweep; only an explicit call does.
    fn deactivate(&self) {
        if !self.membership().set_active(false) {
            return;
        }
        for client in self.membership().snapshot() {
            self.remove_client(&client);
        }
        debug!(audience = %self.audience(), "Display deactivated");
        self.on_deactivate();
    }

    fn add_client(&self, client: &ClientId) {
        let Some(activated) = self.membership().insert(*client) else {
            return;
        };
        if activated {
            debug!(audience = %self.audience(), "Display activated");
            self.on_activate();
        }
        self.on_client_add(client);
    }

    fn remove_client(&self, client: &ClientId) {
        let Some(deactivated) = self.membership().remove(client) else {
            return;
        };
        self.on_client_remove(client);
        if deactivated {
            debug!(audience = %self.audience(), "Display deactivated");
            self.on_deactivate();
        }
    }

    /// Whether the client is in the audience. Filters answer with their
    /// passing set rather than the considered set.
    fn contains(&self, client: &ClientId) -> bool {
        match self.as_filter() {
            Some(filter) => filter.passes(client),
            None => self.membership().contains(client),
        }
    }

    /// Clients in the audience, in stable order.
    fn players(&self) -> Vec<ClientId> {
        match self.as_filter() {
            Some(filter) => filter.filter_state().passing(),
            None => self.membership().snapshot(),
        }
    }

    fn display_state(&self, client: &ClientId) -> DisplayState {
        if self.contains(client) {
            return DisplayState::InAudience;
        }
        match self.as_filter() {
            Some(filter) if filter.can_consider(client) => DisplayState::Blocked,
            _ => DisplayState::NotConsidered,
        }
    }

    /// Remove every member, deactivate and run the disposal hook.
    fn dispose(&self) {
        for client in self.membership().snapshot() {
            self.remove_client(&client);
        }
        self.deactivate();
        self.on_dispose();
    }
}

/// Display without behaviour of its own, used as a grouping node.
#[derive(Debug)]
pub struct PassThroughDisplay {
    audience: AudienceRef,
    membership: Membership,
}

impl PassThroughDisplay {
    pub fn new(audience: AudienceRef) -> Self {
        Self {
            audience,
            membership: Membership::new(),
        }
    }
}

impl AudienceDisplay for PassThroughDisplay {
    fn audience(&self) -> &AudienceRef {
        &self.audience
    }

    fn membership(&self) -> &Membership {
        &self.membership
    }

    fn on_client_add(&self, _client: &ClientId) {}

    fn on_client_remove(&self, _client: &ClientId) {}
}
