//! Arbitration filter with one slot per client.

use std::sync::{Arc, Weak};

use audience_types::{AudienceRef, Claim, ClientId, Priority};
use tracing::debug;

use crate::display::{AudienceDisplay, Membership};
use crate::domain::{ApplierFactory, ArbitrationDomain, Contender, ResourceApplier};
use crate::error::AudienceResult;
use crate::filter::{AudienceFilter, FilterState};

/// A filter that competes for a per-client exclusive resource.
///
/// Every considered client is offered to the domain. The filter's passing
/// set is exactly the clients whose slot it currently owns, and only those
/// slots are ticked.
pub struct SingleFilter {
    membership: Membership,
    state: FilterState,
    priority: Priority,
    domain: Arc<ArbitrationDomain<ClientId>>,
    factory: ApplierFactory<ClientId>,
}

impl SingleFilter {
    /// Build the filter and register it with the domain as a contender.
    pub fn new<F>(
        state: FilterState,
        priority: impl Into<Priority>,
        domain: Arc<ArbitrationDomain<ClientId>>,
        factory: F,
    ) -> Arc<Self>
    where
        F: Fn(&ClientId) -> Box<dyn ResourceApplier> + Send + Sync + 'static,
    {
        let filter = Arc::new(Self {
            membership: Membership::new(),
            state,
            priority: priority.into(),
            domain,
            factory: Arc::new(factory),
        });
        let contender = Arc::downgrade(&filter);
        let contender: Weak<dyn Contender<ClientId>> = contender;
        filter
            .domain
            .register(filter.state.audience().clone(), contender);
        filter
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn domain(&self) -> &Arc<ArbitrationDomain<ClientId>> {
        &self.domain
    }

    fn bid(&self, client: &ClientId) {
        self.domain.offer(client, &self.claim(), &self.factory);
        self.refresh(client);
        if !self.can_consider(client) {
            debug!(audience = %self.audience(), client = %client, "Client left during offer");
            self.domain.withdraw(client, self.audience());
        }
    }
}

impl AudienceDisplay for SingleFilter {
    fn audience(&self) -> &AudienceRef {
        self.state.audience()
    }

    fn membership(&self) -> &Membership {
        &self.membership
    }

    fn on_client_add(&self, client: &ClientId) {
        self.bid(client);
    }

    fn on_client_remove(&self, client: &ClientId) {
        self.update_filter(client, false);
        self.domain.withdraw(client, self.audience());
        if self.can_consider(client) {
            debug!(
                audience = %self.audience(),
                client = %client,
                "Client returned during withdraw"
            );
            self.bid(client);
        }
    }

    fn tick(&self) {
        self.refresh_all();
        for client in self.state.passing() {
            self.domain.tick_slot(&client, self.audience());
        }
    }

    fn on_dispose(&self) {
        self.domain.deregister(self.audience());
    }

    fn as_filter(&self) -> Option<&dyn AudienceFilter> {
        Some(self)
    }
}

impl AudienceFilter for SingleFilter {
    fn filter_state(&self) -> &FilterState {
        &self.state
    }

    fn predicate(&self, client: &ClientId) -> AudienceResult<bool> {
        Ok(self.domain.owner(client).as_ref() == Some(self.audience()))
    }
}

impl Contender<ClientId> for SingleFilter {
    fn claim(&self) -> Claim {
        Claim::new(self.audience().clone(), self.priority)
    }

    fn is_interested(&self, slot: &ClientId) -> bool {
        self.can_consider(slot)
    }

    fn ownership_changed(&self, client: &ClientId) {
        self.refresh(client);
    }
}
