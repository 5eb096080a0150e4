//! Exclusive-resource arbitration.
//!
//! An [`ArbitrationDomain`] owns every slot of one resource type. A slot is
//! the per-client (or per client and sub-key) unit of exclusivity, and it is
//! held by at most one audience at a time: the highest-ranked interested
//! claim. Transitions on one slot are serialized by that slot's mutex, so an
//! applier never observes two owners applied at once. Different slots
//! proceed independently.
//!
//! Owners learn about transitions through [`Contender::ownership_changed`],
//! which the domain calls after the slot lock has been released.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use audience_types::{
    AudienceEvent, AudienceEventEnvelope, AudienceRef, Claim, ClientId, KeyPair, MultiKey,
    ResourceTypeId, TieBreak,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::AudienceResult;

/// Address of one ownership slot.
pub trait SlotKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// The client this slot belongs to.
    fn client(&self) -> &ClientId;
}

impl SlotKey for ClientId {
    fn client(&self) -> &ClientId {
        self
    }
}

impl<K> SlotKey for MultiKey<ClientId, K>
where
    K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    fn client(&self) -> &ClientId {
        self.first()
    }
}

/// Applies and reverts the effect an owner has on one slot.
///
/// Hooks run while the slot is locked and must not call back into the
/// domain. A failing hook is logged; the transition still completes.
pub trait ResourceApplier: Send {
    /// First use of the slot, before any owner is set up.
    fn initialize(&mut self) -> AudienceResult<()> {
        Ok(())
    }

    fn setup(&mut self, owner: &AudienceRef) -> AudienceResult<()>;

    fn tick(&mut self, _owner: &AudienceRef) -> AudienceResult<()> {
        Ok(())
    }

    fn tear_down(&mut self, owner: &AudienceRef) -> AudienceResult<()>;

    /// The slot is being destroyed.
    fn dispose(&mut self) -> AudienceResult<()> {
        Ok(())
    }
}

/// Applier with no effect.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpApplier;

impl ResourceApplier for NoOpApplier {
    fn setup(&mut self, _owner: &AudienceRef) -> AudienceResult<()> {
        Ok(())
    }

    fn tear_down(&mut self, _owner: &AudienceRef) -> AudienceResult<()> {
        Ok(())
    }
}

/// Builds the applier for a freshly created slot. Runs with the slot table
/// entry locked, so it should be cheap and must not touch the domain.
pub type ApplierFactory<S> = Arc<dyn Fn(&S) -> Box<dyn ResourceApplier> + Send + Sync>;

/// An audience taking part in arbitration.
pub trait Contender<S: SlotKey>: Send + Sync {
    fn claim(&self) -> Claim;

    /// Whether this audience currently wants the slot.
    fn is_interested(&self, slot: &S) -> bool;

    /// Ownership of one of the client's slots changed.
    fn ownership_changed(&self, client: &ClientId);
}

/// Outcome of an offer, withdrawal or eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Created {
        owner: AudienceRef,
    },
    Handoff {
        previous: AudienceRef,
        current: AudienceRef,
    },
    Destroyed {
        previous: AudienceRef,
    },
}

impl Transition {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Transition::Unchanged)
    }
}

struct SlotState {
    owner: Option<Claim>,
    applier: Box<dyn ResourceApplier>,
}

struct Slot {
    retired: AtomicBool,
    state: Mutex<SlotState>,
}

impl Slot {
    fn new(applier: Box<dyn ResourceApplier>) -> Self {
        Self {
            retired: AtomicBool::new(false),
            state: Mutex::new(SlotState {
                owner: None,
                applier,
            }),
        }
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }
}

/// Type-erased view of a domain, as kept by the manager.
pub trait DomainHandle: Send + Sync {
    fn resource(&self) -> &ResourceTypeId;

    /// Destroy every slot belonging to the client. Returns how many.
    fn evict_client(&self, client: &ClientId) -> usize;

    fn slot_count(&self) -> usize;

    fn contender_count(&self) -> usize;
}

/// Slot table and contender registry for one resource type.
pub struct ArbitrationDomain<S: SlotKey> {
    resource: ResourceTypeId,
    tie_break: TieBreak,
    contenders: DashMap<AudienceRef, Weak<dyn Contender<S>>>,
    slots: DashMap<S, Arc<Slot>>,
    /// Live slot keys per client. Only written while holding the slot
    /// table shard of the key concerned.
    by_client: DashMap<ClientId, HashSet<S>>,
    event_tx: broadcast::Sender<AudienceEventEnvelope>,
}

impl<S: SlotKey> ArbitrationDomain<S> {
    pub fn new(
        resource: ResourceTypeId,
        tie_break: TieBreak,
        event_tx: broadcast::Sender<AudienceEventEnvelope>,
    ) -> Self {
        Self {
            resource,
            tie_break,
            contenders: DashMap::new(),
            slots: DashMap::new(),
            by_client: DashMap::new(),
            event_tx,
        }
    }

    pub fn resource_type(&self) -> &ResourceTypeId {
        &self.resource
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    pub fn register(&self, audience: AudienceRef, contender: Weak<dyn Contender<S>>) {
        debug!(resource = %self.resource, audience = %audience, "Registered contender");
        self.contenders.insert(audience, contender);
    }

    pub fn deregister(&self, audience: &AudienceRef) {
        if self.contenders.remove(audience).is_some() {
            debug!(resource = %self.resource, audience = %audience, "Deregistered contender");
        }
    }

    /// Live contenders. Dropped ones are pruned on the way.
    pub fn contenders(&self) -> Vec<Arc<dyn Contender<S>>> {
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for entry in self.contenders.iter() {
            match entry.value().upgrade() {
                Some(contender) => live.push(contender),
                None => dead.push(entry.key().clone()),
            }
        }
        for audience in dead {
            self.contenders
                .remove_if(&audience, |_, contender| contender.strong_count() == 0);
        }
        live
    }

    fn contender(&self, audience: &AudienceRef) -> Option<Arc<dyn Contender<S>>> {
        self.contenders
            .get(audience)
            .and_then(|entry| entry.value().upgrade())
    }

    fn slot(&self, key: &S) -> Option<Arc<Slot>> {
        self.slots.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn slot_or_create(&self, key: &S, factory: &ApplierFactory<S>) -> Arc<Slot> {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_retired() {
                    return Arc::clone(entry.get());
                }
                let slot = Arc::new(Slot::new(factory(key)));
                entry.insert(Arc::clone(&slot));
                self.index(key);
                slot
            }
            Entry::Vacant(entry) => {
                let slot = Arc::new(Slot::new(factory(key)));
                entry.insert(Arc::clone(&slot));
                self.index(key);
                slot
            }
        }
    }

    fn index(&self, key: &S) {
        self.by_client
            .entry(*key.client())
            .or_insert_with(HashSet::new)
            .insert(key.clone());
    }

    fn unindex(&self, key: &S) {
        if let Entry::Occupied(mut entry) = self.by_client.entry(*key.client()) {
            entry.get_mut().remove(key);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Current owner of a slot.
    pub fn owner(&self, key: &S) -> Option<AudienceRef> {
        let slot = self.slot(key)?;
        let state = slot.state.lock();
        state.owner.as_ref().map(|claim| claim.audience.clone())
    }

    /// Put a claim forward for a slot, creating it if needed.
    ///
    /// A vacant slot is taken outright. An occupied slot changes hands only
    /// when the claim outranks the current owner.
    pub fn offer(&self, key: &S, claim: &Claim, factory: &ApplierFactory<S>) -> Transition {
        let transition = loop {
            let slot = self.slot_or_create(key, factory);
            let mut state = slot.state.lock();
            if slot.is_retired() {
                continue;
            }
            break self.arbitrate_offer(key, &mut state, claim);
        };
        self.settle(key, &transition);
        transition
    }

    fn arbitrate_offer(&self, key: &S, state: &mut SlotState, claim: &Claim) -> Transition {
        let Some(current) = state.owner.clone() else {
            let result = state.applier.initialize();
            self.check(key, &claim.audience, "initialize", result);
            let result = state.applier.setup(&claim.audience);
            self.check(key, &claim.audience, "setup", result);
            state.owner = Some(claim.clone());
            return Transition::Created {
                owner: claim.audience.clone(),
            };
        };

        if current.audience == claim.audience {
            return Transition::Unchanged;
        }
        if !claim.outranks(&current, self.tie_break) {
            debug!(
                resource = %self.resource,
                slot = %key,
                owner = %current,
                rejected = %claim,
                "Offer rejected by current owner"
            );
            return Transition::Unchanged;
        }

        let result = state.applier.tear_down(&current.audience);
        self.check(key, &current.audience, "tear_down", result);
        let result = state.applier.setup(&claim.audience);
        self.check(key, &claim.audience, "setup", result);
        state.owner = Some(claim.clone());
        Transition::Handoff {
            previous: current.audience,
            current: claim.audience.clone(),
        }
    }

    /// The audience no longer wants the slot. If it was the owner, the slot
    /// goes to the best remaining interested contender, or is destroyed.
    pub fn withdraw(&self, key: &S, audience: &AudienceRef) -> Transition {
        let Some(slot) = self.slot(key) else {
            return Transition::Unchanged;
        };

        let transition = {
            let mut state = slot.state.lock();
            if slot.is_retired() {
                return Transition::Unchanged;
            }
            match &state.owner {
                Some(owner) if owner.audience == *audience => {}
                _ => return Transition::Unchanged,
            }

            match self.next_owner(key, audience) {
                Some(next) => {
                    let result = state.applier.tear_down(audience);
                    self.check(key, audience, "tear_down", result);
                    let result = state.applier.setup(&next.audience);
                    self.check(key, &next.audience, "setup", result);
                    state.owner = Some(next.clone());
                    Transition::Handoff {
                        previous: audience.clone(),
                        current: next.audience,
                    }
                }
                None => {
                    self.destroy(key, &slot, &mut state);
                    Transition::Destroyed {
                        previous: audience.clone(),
                    }
                }
            }
        };

        self.settle(key, &transition);
        transition
    }

    fn next_owner(&self, key: &S, leaving: &AudienceRef) -> Option<Claim> {
        self.contenders()
            .into_iter()
            .map(|contender| (contender.claim(), contender))
            .filter(|(claim, _)| claim.audience != *leaving)
            .filter(|(_, contender)| contender.is_interested(key))
            .map(|(claim, _)| claim)
            .max()
    }

    /// Tear down, dispose and unlink a slot. Caller holds its lock.
    fn destroy(&self, key: &S, slot: &Arc<Slot>, state: &mut SlotState) {
        if let Some(owner) = state.owner.take() {
            let result = state.applier.tear_down(&owner.audience);
            self.check(key, &owner.audience, "tear_down", result);
        }
        if let Err(error) = state.applier.dispose() {
            warn!(
                resource = %self.resource,
                slot = %key,
                error = %error,
                "Resource applier failed to dispose"
            );
        }
        slot.retire();
        self.slots.remove_if(key, |_, current| {
            let unlinked = Arc::ptr_eq(current, slot);
            if unlinked {
                self.unindex(key);
            }
            unlinked
        });
    }

    /// Run the owner's per-tick effect. Ignored unless `audience` owns the slot.
    pub fn tick_slot(&self, key: &S, audience: &AudienceRef) {
        let Some(slot) = self.slot(key) else {
            return;
        };
        let mut state = slot.state.lock();
        if slot.is_retired() {
            return;
        }
        match &state.owner {
            Some(owner) if owner.audience == *audience => {}
            _ => return,
        }
        let result = state.applier.tick(audience);
        self.check(key, audience, "tick", result);
    }

    /// Destroy every slot of a client regardless of interest.
    pub fn evict(&self, client: &ClientId) -> usize {
        let keys: Vec<S> = self
            .by_client
            .get(client)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default();

        let mut evicted = 0;
        for key in keys {
            let Some(slot) = self.slot(&key) else {
                continue;
            };
            let transition = {
                let mut state = slot.state.lock();
                if slot.is_retired() {
                    continue;
                }
                let previous = state.owner.as_ref().map(|claim| claim.audience.clone());
                self.destroy(&key, &slot, &mut state);
                match previous {
                    Some(previous) => Transition::Destroyed { previous },
                    None => Transition::Unchanged,
                }
            };
            evicted += 1;
            self.settle(&key, &transition);
        }

        if evicted > 0 {
            debug!(resource = %self.resource, client = %client, evicted, "Evicted client slots");
        }
        evicted
    }

    /// Owners of every live slot, in no particular order.
    pub fn snapshot(&self) -> Vec<(S, Option<AudienceRef>)> {
        let slots: Vec<(S, Arc<Slot>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        slots
            .into_iter()
            .filter(|(_, slot)| !slot.is_retired())
            .map(|(key, slot)| {
                let owner = slot
                    .state
                    .lock()
                    .owner
                    .as_ref()
                    .map(|claim| claim.audience.clone());
                (key, owner)
            })
            .collect()
    }

    fn check(
        &self,
        key: &S,
        audience: &AudienceRef,
        hook: &'static str,
        result: AudienceResult<()>,
    ) {
        if let Err(error) = result {
            warn!(
                resource = %self.resource,
                slot = %key,
                audience = %audience,
                hook,
                error = %error,
                "Resource applier hook failed"
            );
        }
    }

    /// Publish events and notify the affected owners. Runs unlocked.
    fn settle(&self, key: &S, transition: &Transition) {
        let (previous, current) = match transition {
            Transition::Unchanged => return,
            Transition::Created { owner } => {
                self.publish(AudienceEvent::SlotCreated {
                    resource: self.resource.clone(),
                    client: *key.client(),
                    slot: key.to_string(),
                });
                (None, Some(owner))
            }
            Transition::Handoff { previous, current } => (Some(previous), Some(current)),
            Transition::Destroyed { previous } => (Some(previous), None),
        };

        debug!(
            resource = %self.resource,
            slot = %key,
            previous = ?previous.map(AudienceRef::as_str),
            current = ?current.map(AudienceRef::as_str),
            "Slot ownership changed"
        );

        self.publish(AudienceEvent::OwnershipChanged {
            resource: self.resource.clone(),
            client: *key.client(),
            slot: key.to_string(),
            previous: previous.cloned(),
            current: current.cloned(),
        });
        if current.is_none() {
            self.publish(AudienceEvent::SlotDestroyed {
                resource: self.resource.clone(),
                client: *key.client(),
                slot: key.to_string(),
            });
        }

        for audience in previous.into_iter().chain(current) {
            if let Some(contender) = self.contender(audience) {
                contender.ownership_changed(key.client());
            }
        }
    }

    fn publish(&self, event: AudienceEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(AudienceEventEnvelope::new(event));
    }
}

impl<K> ArbitrationDomain<MultiKey<ClientId, K>>
where
    K: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// Owner of the `(client, key)` slot without building a [`MultiKey`].
    pub fn owner_at(&self, client: &ClientId, key: &K) -> Option<AudienceRef> {
        let lookup = (client, key);
        let slot = self
            .slots
            .get(&lookup as &dyn KeyPair<ClientId, K>)
            .map(|entry| Arc::clone(entry.value()))?;
        let state = slot.state.lock();
        state.owner.as_ref().map(|claim| claim.audience.clone())
    }
}

impl<S: SlotKey> DomainHandle for ArbitrationDomain<S> {
    fn resource(&self) -> &ResourceTypeId {
        &self.resource
    }

    fn evict_client(&self, client: &ClientId) -> usize {
        self.evict(client)
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn contender_count(&self) -> usize {
        self.contenders().len()
    }
}
