//! Filters: displays that narrow their considered clients by a predicate.
//!
//! A filter is a display whose members are only *considered*; the subset
//! that also satisfies the predicate is the *passing* set. Only passing
//! clients are cascaded to the filter's children.

use std::sync::Arc;

use audience_types::{AudienceRef, ClientId};
use dashmap::DashSet;
use tracing::{debug, warn};

use crate::display::{AudienceDisplay, Membership};
use crate::error::AudienceResult;
use crate::manager::ManagerHandle;

/// Per-filter passing set and tree plumbing.
pub struct FilterState {
    audience: AudienceRef,
    inverted: bool,
    filtered: DashSet<ClientId>,
    manager: ManagerHandle,
}

impl FilterState {
    pub fn new(audience: AudienceRef, manager: ManagerHandle) -> Self {
        Self {
            audience,
            inverted: false,
            filtered: DashSet::new(),
            manager,
        }
    }

    /// Flip the predicate: clients pass when it evaluates to false.
    pub fn inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }

    pub fn audience(&self) -> &AudienceRef {
        &self.audience
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Passing clients in stable order.
    pub fn passing(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self.filtered.iter().map(|c| *c).collect();
        clients.sort();
        clients
    }

    fn cascade_add(&self, client: &ClientId) {
        match self.manager.get() {
            Some(manager) => manager.cascade_add(client, &self.audience),
            None => debug!(audience = %self.audience, "No manager attached, skipping cascade"),
        }
    }

    fn cascade_remove(&self, client: &ClientId) {
        match self.manager.get() {
            Some(manager) => manager.cascade_remove(client, &self.audience),
            None => debug!(audience = %self.audience, "No manager attached, skipping cascade"),
        }
    }
}

/// A display that gates its children by a per-client predicate.
pub trait AudienceFilter: AudienceDisplay {
    fn filter_state(&self) -> &FilterState;

    /// Raw predicate, before inversion.
    fn predicate(&self, client: &ClientId) -> AudienceResult<bool>;

    /// Called after a client joined the passing set.
    fn on_filter_added(&self, _client: &ClientId) {}

    /// Called after a client left the passing set.
    fn on_filter_removed(&self, _client: &ClientId) {}

    fn can_consider(&self, client: &ClientId) -> bool {
        self.membership().contains(client)
    }

    fn passes(&self, client: &ClientId) -> bool {
        self.filter_state().filtered.contains(client)
    }

    /// Move the client in or out of the passing set. Edge-triggered: the
    /// hooks and the cascade fire only when membership actually changes.
    fn update_filter(&self, client: &ClientId, passes: bool) {
        let state = self.filter_state();
        let allow = (passes != state.inverted) && self.can_consider(client);

        if !allow {
            if state.filtered.remove(client).is_some() {
                self.on_filter_removed(client);
                state.cascade_remove(client);
            }
            return;
        }

        if state.filtered.insert(*client) {
            self.on_filter_added(client);
            state.cascade_add(client);
            // Lost a race with a concurrent removal of the client.
            if !self.can_consider(client) {
                self.update_filter(client, state.inverted);
            }
        }
    }

    /// Re-evaluate the predicate for one client. A failing predicate counts
    /// as "does not pass", inversion included.
    fn refresh(&self, client: &ClientId) {
        let state = self.filter_state();
        match self.predicate(client) {
            Ok(passes) => self.update_filter(client, passes),
            Err(error) => {
                warn!(
                    audience = %state.audience,
                    client = %client,
                    error = %error,
                    "Predicate failed, treating client as not passing"
                );
                self.update_filter(client, state.inverted);
            }
        }
    }

    fn refresh_all(&self) {
        for client in self.membership().snapshot() {
            self.refresh(&client);
        }
    }
}

/// Filter that passes every considered client.
pub struct PassThroughFilter {
    membership: Membership,
    state: FilterState,
}

impl PassThroughFilter {
    pub fn new(state: FilterState) -> Self {
        Self {
            membership: Membership::new(),
            state,
        }
    }
}

impl AudienceDisplay for PassThroughFilter {
    fn audience(&self) -> &AudienceRef {
        &self.state.audience
    }

    fn membership(&self) -> &Membership {
        &self.membership
    }

    fn on_client_add(&self, client: &ClientId) {
        self.refresh(client);
    }

    fn on_client_remove(&self, client: &ClientId) {
        self.update_filter(client, false);
    }

    fn as_filter(&self) -> Option<&dyn AudienceFilter> {
        Some(self)
    }
}

impl AudienceFilter for PassThroughFilter {
    fn filter_state(&self) -> &FilterState {
        &self.state
    }

    fn predicate(&self, _client: &ClientId) -> AudienceResult<bool> {
        Ok(true)
    }
}

/// Predicate closure used by [`PredicateFilter`].
pub type Predicate = Arc<dyn Fn(&ClientId) -> AudienceResult<bool> + Send + Sync>;

/// Filter over an arbitrary client predicate.
///
/// The predicate is re-evaluated for every considered client on each tick.
/// Hosts that learn about a relevant change earlier can call
/// [`AudienceFilter::refresh`] directly.
pub struct PredicateFilter {
    membership: Membership,
    state: FilterState,
    predicate: Predicate,
}

impl PredicateFilter {
    pub fn new<F>(state: FilterState, predicate: F) -> Self
    where
        F: Fn(&ClientId) -> AudienceResult<bool> + Send + Sync + 'static,
    {
        Self {
            membership: Membership::new(),
            state,
            predicate: Arc::new(predicate),
        }
    }
}

impl AudienceDisplay for PredicateFilter {
    fn audience(&self) -> &AudienceRef {
        &self.state.audience
    }

    fn membership(&self) -> &Membership {
        &self.membership
    }

    fn on_client_add(&self, client: &ClientId) {
        self.refresh(client);
    }

    fn on_client_remove(&self, client: &ClientId) {
        self.update_filter(client, false);
    }

    fn tick(&self) {
        self.refresh_all();
    }

    fn as_filter(&self) -> Option<&dyn AudienceFilter> {
        Some(self)
    }
}

impl AudienceFilter for PredicateFilter {
    fn filter_state(&self) -> &FilterState {
        &self.state
    }

    fn predicate(&self, client: &ClientId) -> AudienceResult<bool> {
        (self.predicate)(client)
    }
}
