//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use audience_engine::{
    ArbitrationDomain, AudienceConfig, AudienceResult, InMemoryAudienceManager, ResourceApplier,
    SingleFilter, SingleKeyedFilter,
};
use audience_types::{AudienceRef, ClientId, MultiKey};
use parking_lot::Mutex;

/// Records every applier call and which owners are applied per slot.
#[derive(Default)]
pub struct EffectLedger {
    applied: Mutex<HashMap<String, Vec<AudienceRef>>>,
    log: Mutex<Vec<String>>,
    violations: Mutex<Vec<String>>,
}

impl EffectLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn applier(self: &Arc<Self>, slot: impl ToString) -> Box<dyn ResourceApplier> {
        Box::new(RecordingApplier {
            slot: slot.to_string(),
            ledger: Arc::clone(self),
        })
    }

    /// Owner whose effect is currently applied on the slot.
    pub fn applied(&self, slot: impl ToString) -> Option<AudienceRef> {
        self.applied
            .lock()
            .get(&slot.to_string())
            .and_then(|owners| owners.first().cloned())
    }

    pub fn applied_slots(&self) -> usize {
        self.applied
            .lock()
            .values()
            .filter(|owners| !owners.is_empty())
            .count()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().push(entry);
    }
}

struct RecordingApplier {
    slot: String,
    ledger: Arc<EffectLedger>,
}

impl ResourceApplier for RecordingApplier {
    fn setup(&mut self, owner: &AudienceRef) -> AudienceResult<()> {
        self.ledger
            .record(format!("setup {} {}", owner.as_str(), self.slot));
        let mut applied = self.ledger.applied.lock();
        let owners = applied.entry(self.slot.clone()).or_default();
        if !owners.is_empty() {
            self.ledger.violations.lock().push(format!(
                "{} set up on {} while {:?} applied",
                owner, self.slot, owners
            ));
        }
        owners.push(owner.clone());
        Ok(())
    }

    fn tick(&mut self, owner: &AudienceRef) -> AudienceResult<()> {
        self.ledger
            .record(format!("tick {} {}", owner.as_str(), self.slot));
        Ok(())
    }

    fn tear_down(&mut self, owner: &AudienceRef) -> AudienceResult<()> {
        self.ledger
            .record(format!("teardown {} {}", owner.as_str(), self.slot));
        let mut applied = self.ledger.applied.lock();
        let owners = applied.entry(self.slot.clone()).or_default();
        match owners.iter().position(|applied| applied == owner) {
            Some(index) => {
                owners.remove(index);
            }
            None => self.ledger.violations.lock().push(format!(
                "{} torn down on {} without being applied",
                owner, self.slot
            )),
        }
        Ok(())
    }
}

pub fn manager() -> Arc<InMemoryAudienceManager> {
    init_tracing();
    InMemoryAudienceManager::new(AudienceConfig::default()).expect("default config is valid")
}

/// Keyed arbitration filter whose key is read from a shared cell.
pub fn keyed(
    manager: &InMemoryAudienceManager,
    domain: &Arc<ArbitrationDomain<MultiKey<ClientId, u8>>>,
    ledger: &Arc<EffectLedger>,
    id: &str,
    priority: i32,
    key: Arc<Mutex<u8>>,
) -> Arc<SingleKeyedFilter<u8>> {
    let ledger = Arc::clone(ledger);
    SingleKeyedFilter::new(
        manager.filter_state(aref(id)),
        priority,
        Arc::clone(domain),
        move |_: &ClientId| *key.lock(),
        move |slot: &MultiKey<ClientId, u8>| ledger.applier(slot),
    )
}

pub fn single(
    manager: &InMemoryAudienceManager,
    domain: &Arc<ArbitrationDomain<ClientId>>,
    ledger: &Arc<EffectLedger>,
    id: &str,
    priority: i32,
) -> Arc<SingleFilter> {
    let ledger = Arc::clone(ledger);
    SingleFilter::new(
        manager.filter_state(aref(id)),
        priority,
        Arc::clone(domain),
        move |slot: &ClientId| ledger.applier(slot),
    )
}

pub fn aref(id: &str) -> AudienceRef {
    AudienceRef::new(id)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
