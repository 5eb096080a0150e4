//! Arbitration filter over (client, key) slots.
//!
//! Used when a client has several independent instances of a resource, such
//! as inventory slots. Each audience picks one key per client at a time; the
//! key may change between ticks, in which case the audience withdraws from
//! the old slot and bids for the new one.

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use audience_types::{AudienceRef, Claim, ClientId, MultiKey, Priority};
use dashmap::DashMap;
use tracing::debug;

use crate::display::{AudienceDisplay, Membership};
use crate::domain::{ApplierFactory, ArbitrationDomain, Contender, ResourceApplier};
use crate::error::AudienceResult;
use crate::filter::{AudienceFilter, FilterState};

/// Chooses the sub-key a client's slot lives at.
pub type KeyFn<K> = Arc<dyn Fn(&ClientId) -> K + Send + Sync>;

/// A filter competing for keyed per-client slots.
pub struct SingleKeyedFilter<K>
where
    K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    membership: Membership,
    state: FilterState,
    priority: Priority,
    domain: Arc<ArbitrationDomain<MultiKey<ClientId, K>>>,
    factory: ApplierFactory<MultiKey<ClientId, K>>,
    key_fn: KeyFn<K>,
    previous_keys: DashMap<ClientId, K>,
}

impl<K> SingleKeyedFilter<K>
where
    K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    pub fn new<KF, F>(
        state: FilterState,
        priority: impl Into<Priority>,
        domain: Arc<ArbitrationDomain<MultiKey<ClientId, K>>>,
        key_fn: KF,
        factory: F,
    ) -> Arc<Self>
    where
        KF: Fn(&ClientId) -> K + Send + Sync + 'static,
        F: Fn(&MultiKey<ClientId, K>) -> Box<dyn ResourceApplier> + Send + Sync + 'static,
    {
        let filter = Arc::new(Self {
            membership: Membership::new(),
            state,
            priority: priority.into(),
            domain,
            factory: Arc::new(factory),
            key_fn: Arc::new(key_fn),
            previous_keys: DashMap::new(),
        });
        let contender = Arc::downgrade(&filter);
        let contender: Weak<dyn Contender<MultiKey<ClientId, K>>> = contender;
        filter
            .domain
            .register(filter.state.audience().clone(), contender);
        filter
    }

    /// The key the client was last offered at.
    pub fn cached_key(&self, client: &ClientId) -> Option<K> {
        self.previous_keys.get(client).map(|key| key.value().clone())
    }

    pub fn domain(&self) -> &Arc<ArbitrationDomain<MultiKey<ClientId, K>>> {
        &self.domain
    }

    fn key_of(&self, client: &ClientId) -> K {
        self.cached_key(client)
            .unwrap_or_else(|| (self.key_fn)(client))
    }

    fn offer(&self, client: &ClientId, key: K) {
        self.domain
            .offer(&MultiKey::new(*client, key), &self.claim(), &self.factory);
    }

    fn withdraw(&self, client: &ClientId, key: K) {
        self.domain
            .withdraw(&MultiKey::new(*client, key), self.audience());
    }

    fn bid(&self, client: &ClientId) {
        let key = (self.key_fn)(client);
        self.previous_keys.insert(*client, key.clone());
        self.offer(client, key);
        self.refresh(client);
        self.abandon_if_gone(client);
    }

    /// The client left while we were bidding for it.
    fn abandon_if_gone(&self, client: &ClientId) {
        if self.can_consider(client) {
            return;
        }
        if let Some((_, key)) = self.previous_keys.remove(client) {
            debug!(audience = %self.audience(), client = %client, "Client left during offer");
            self.withdraw(client, key);
        }
    }

    fn follow_key_change(&self, client: &ClientId) {
        let Some(old) = self.cached_key(client) else {
            return;
        };
        let new = (self.key_fn)(client);
        if old == new {
            return;
        }

        debug!(
            audience = %self.audience(),
            client = %client,
            from = %old,
            to = %new,
            "Slot key changed"
        );
        self.previous_keys.insert(*client, new.clone());
        self.withdraw(client, old);
        self.offer(client, new);
        self.abandon_if_gone(client);
    }
}

impl<K> AudienceDisplay for SingleKeyedFilter<K>
where
    K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
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
        let key = match self.previous_keys.remove(client) {
            Some((_, key)) => key,
            None => (self.key_fn)(client),
        };
        self.withdraw(client, key);
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
        for client in self.membership.snapshot() {
            self.follow_key_change(&client);
            self.refresh(&client);
        }
        for client in self.state.passing() {
            if let Some(key) = self.cached_key(&client) {
                self.domain
                    .tick_slot(&MultiKey::new(client, key), self.audience());
            }
        }
    }

    fn on_dispose(&self) {
        self.domain.deregister(self.audience());
        self.previous_keys.clear();
    }

    fn as_filter(&self) -> Option<&dyn AudienceFilter> {
        Some(self)
    }
}

impl<K> AudienceFilter for SingleKeyedFilter<K>
where
    K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    fn filter_state(&self) -> &FilterState {
        &self.state
    }

    fn predicate(&self, client: &ClientId) -> AudienceResult<bool> {
        let key = self.key_of(client);
        Ok(self.domain.owner_at(client, &key).as_ref() == Some(self.audience()))
    }
}

impl<K> Contender<MultiKey<ClientId, K>> for SingleKeyedFilter<K>
where
    K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    fn claim(&self) -> Claim {
        Claim::new(self.audience().clone(), self.priority)
    }

    fn is_interested(&self, slot: &MultiKey<ClientId, K>) -> bool {
        self.can_consider(slot.first())
            && self
                .previous_keys
                .get(slot.first())
                .map_or(false, |key| key.value() == slot.second())
    }

    fn ownership_changed(&self, client: &ClientId) {
        self.refresh(client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainHandle, NoOpApplier};
    use crate::manager::ManagerHandle;
    use audience_types::{ResourceTypeId, TieBreak};
    use parking_lot::Mutex;
    use tokio::sync::broadcast;

    type SlotDomain = ArbitrationDomain<MultiKey<ClientId, u8>>;

    fn item_slots() -> Arc<SlotDomain> {
        let (event_tx, _) = broadcast::channel(16);
        Arc::new(ArbitrationDomain::new(
            ResourceTypeId::new("item_slot"),
            TieBreak::RefOrder,
            event_tx,
        ))
    }

    fn keyed(
        domain: &Arc<SlotDomain>,
        id: &str,
        priority: i32,
        slot: Arc<Mutex<u8>>,
    ) -> Arc<SingleKeyedFilter<u8>> {
        SingleKeyedFilter::new(
            FilterState::new(AudienceRef::new(id), ManagerHandle::detached()),
            priority,
            Arc::clone(domain),
            move |_: &ClientId| *slot.lock(),
            |_: &MultiKey<ClientId, u8>| Box::new(NoOpApplier) as Box<dyn ResourceApplier>,
        )
    }

    #[test]
    fn test_different_keys_do_not_compete() {
        let domain = item_slots();
        let compass = keyed(&domain, "compass", 1, Arc::new(Mutex::new(3)));
        let sword = keyed(&domain, "sword", 9, Arc::new(Mutex::new(0)));
        let client = ClientId::generate();

        compass.add_client(&client);
        sword.add_client(&client);

        assert!(compass.passes(&client));
        assert!(sword.passes(&client));
        assert_eq!(domain.owner_at(&client, &3), Some(AudienceRef::new("compass")));
        assert_eq!(domain.owner_at(&client, &0), Some(AudienceRef::new("sword")));
    }

    #[test]
    fn test_key_change_moves_the_claim() {
        let domain = item_slots();
        let slot = Arc::new(Mutex::new(3));
        let compass = keyed(&domain, "compass", 1, Arc::clone(&slot));
        let client = ClientId::generate();
        compass.add_client(&client);

        *slot.lock() = 5;
        compass.tick();

        assert_eq!(compass.cached_key(&client), Some(5));
        assert_eq!(domain.owner_at(&client, &3), None);
        assert_eq!(domain.owner_at(&client, &5), Some(AudienceRef::new("compass")));
        assert!(compass.passes(&client));
    }

    #[test]
    fn test_key_change_onto_stronger_claim_blocks() {
        let domain = item_slots();
        let compass_slot = Arc::new(Mutex::new(3));
        let compass = keyed(&domain, "compass", 1, Arc::clone(&compass_slot));
        let sword = keyed(&domain, "sword", 9, Arc::new(Mutex::new(5)));
        let client = ClientId::generate();
        compass.add_client(&client);
        sword.add_client(&client);

        *compass_slot.lock() = 5;
        compass.tick();

        assert!(!compass.passes(&client));
        assert!(compass.can_consider(&client));
        assert_eq!(domain.owner_at(&client, &3), None);

        sword.remove_client(&client);
        assert!(compass.passes(&client));
        assert_eq!(domain.owner_at(&client, &5), Some(AudienceRef::new("compass")));
    }

    #[test]
    fn test_remove_uses_cached_key() {
        let domain = item_slots();
        let slot = Arc::new(Mutex::new(3));
        let compass = keyed(&domain, "compass", 1, Arc::clone(&slot));
        let client = ClientId::generate();
        compass.add_client(&client);

        *slot.lock() = 7;
        compass.remove_client(&client);

        assert_eq!(domain.slot_count(), 0);
        assert_eq!(compass.cached_key(&client), None);
    }
}
