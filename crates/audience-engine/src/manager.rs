//! Audience tree management.
//!
//! The manager owns the installed audience nodes, the set of online
//! clients and the arbitration domains. It routes clients from root nodes
//! down the tree: a filter forwards a client to its children exactly while
//! the client passes it.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use audience_types::{
    AudienceEvent, AudienceEventEnvelope, AudienceRef, ClientId, DisplayState, ResourceTypeId,
};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace};

use crate::config::AudienceConfig;
use crate::display::AudienceDisplay;
use crate::domain::{ArbitrationDomain, DomainHandle, SlotKey};
use crate::error::{AudienceError, AudienceResult};
use crate::filter::FilterState;

/// What filters need from the tree they are installed in.
pub trait AudienceManager: Send + Sync {
    /// Look up an installed display.
    fn resolve(&self, audience: &AudienceRef) -> Option<Arc<dyn AudienceDisplay>>;

    /// `client` started passing `parent`; forward it to the children.
    fn cascade_add(&self, client: &ClientId, parent: &AudienceRef);

    /// `client` stopped passing `parent`; take it out of children that no
    /// other parent still feeds.
    fn cascade_remove(&self, client: &ClientId, parent: &AudienceRef);
}

/// Non-owning link from a filter back to its manager.
#[derive(Clone, Default)]
pub struct ManagerHandle(Option<Weak<dyn AudienceManager>>);

impl ManagerHandle {
    pub fn new(manager: Weak<dyn AudienceManager>) -> Self {
        Self(Some(manager))
    }

    /// A handle that is not attached to any tree. Cascades become no-ops.
    pub fn detached() -> Self {
        Self(None)
    }

    pub fn get(&self) -> Option<Arc<dyn AudienceManager>> {
        self.0.as_ref().and_then(Weak::upgrade)
    }
}

/// A display together with its position in the tree.
pub struct AudienceNode {
    display: Arc<dyn AudienceDisplay>,
    children: Vec<AudienceRef>,
    child_only: bool,
}

impl AudienceNode {
    pub fn new(display: Arc<dyn AudienceDisplay>) -> Self {
        Self {
            display,
            children: Vec::new(),
            child_only: false,
        }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = AudienceRef>) -> Self {
        self.children.extend(children);
        self
    }

    /// Never treat this node as a root, even while no parent references it.
    pub fn child_only(mut self) -> Self {
        self.child_only = true;
        self
    }
}

/// In-memory audience manager.
pub struct InMemoryAudienceManager {
    me: Weak<InMemoryAudienceManager>,
    config: AudienceConfig,
    nodes: DashMap<AudienceRef, AudienceNode>,
    parents: DashMap<AudienceRef, Vec<AudienceRef>>,
    online: DashSet<ClientId>,
    domains: DashMap<ResourceTypeId, Arc<dyn DomainHandle>>,
    event_tx: broadcast::Sender<AudienceEventEnvelope>,
}

impl InMemoryAudienceManager {
    pub fn new(config: AudienceConfig) -> AudienceResult<Arc<Self>> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            nodes: DashMap::new(),
            parents: DashMap::new(),
            online: DashSet::new(),
            domains: DashMap::new(),
            event_tx,
        }))
    }

    pub fn config(&self) -> &AudienceConfig {
        &self.config
    }

    pub fn handle(&self) -> ManagerHandle {
        let me: Weak<dyn AudienceManager> = self.me.clone();
        ManagerHandle::new(me)
    }

    /// Filter state attached to this manager.
    pub fn filter_state(&self, audience: AudienceRef) -> FilterState {
        FilterState::new(audience, self.handle())
    }

    /// Subscribe to membership and ownership events.
    pub fn subscribe(&self) -> broadcast::Receiver<AudienceEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Create the arbitration domain for a resource type.
    pub fn arbitration_domain<S: SlotKey>(
        &self,
        resource: ResourceTypeId,
    ) -> AudienceResult<Arc<ArbitrationDomain<S>>> {
        match self.domains.entry(resource.clone()) {
            Entry::Occupied(_) => Err(AudienceError::DomainAlreadyExists(resource)),
            Entry::Vacant(entry) => {
                let domain = Arc::new(ArbitrationDomain::new(
                    resource.clone(),
                    self.config.tie_break,
                    self.event_tx.clone(),
                ));
                let handle: Arc<dyn DomainHandle> = domain.clone();
                entry.insert(handle);
                info!(resource = %resource, "Arbitration domain created");
                Ok(domain)
            }
        }
    }

    pub fn domain(&self, resource: &ResourceTypeId) -> Option<Arc<dyn DomainHandle>> {
        self.domains
            .get(resource)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Install a node and route the currently online clients into it.
    #[instrument(skip(self, node), fields(audience = %node.display.audience()))]
    pub fn install(&self, node: AudienceNode) -> AudienceResult<()> {
        let audience = node.display.audience().clone();
        if !node.children.is_empty() && node.display.as_filter().is_none() {
            return Err(AudienceError::ConfigurationError(format!(
                "{audience} has children but is not a filter"
            )));
        }
        let children = node.children.clone();

        match self.nodes.entry(audience.clone()) {
            Entry::Occupied(_) => return Err(AudienceError::AudienceAlreadyInstalled(audience)),
            Entry::Vacant(entry) => {
                entry.insert(node);
            }
        }
        for child in &children {
            self.parents
                .entry(child.clone())
                .or_insert_with(Vec::new)
                .push(audience.clone());
        }

        info!(children = children.len(), "Audience installed");
        self.publish(AudienceEvent::AudienceInstalled(audience.clone()));

        self.resync(&audience);
        for child in &children {
            self.resync(child);
        }
        Ok(())
    }

    /// Remove a node, dispose its display and re-route its children.
    #[instrument(skip(self))]
    pub fn uninstall(&self, audience: &AudienceRef) -> AudienceResult<()> {
        let (_, node) = self
            .nodes
            .remove(audience)
            .ok_or_else(|| AudienceError::AudienceNotFound(audience.clone()))?;

        for child in &node.children {
            if let Some(mut parents) = self.parents.get_mut(child) {
                parents.retain(|parent| parent != audience);
            }
        }

        node.display.dispose();
        info!("Audience uninstalled");
        self.publish(AudienceEvent::AudienceUninstalled(audience.clone()));

        for child in &node.children {
            self.resync(child);
        }
        Ok(())
    }

    /// Check that every referenced child is installed.
    pub fn validate(&self) -> AudienceResult<()> {
        let edges: Vec<(AudienceRef, AudienceRef)> = self
            .nodes
            .iter()
            .flat_map(|entry| {
                let parent = entry.key().clone();
                entry
                    .value()
                    .children
                    .iter()
                    .map(move |child| (parent.clone(), child.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (parent, child) in edges {
            if !self.nodes.contains_key(&child) {
                return Err(AudienceError::UnknownChild { parent, child });
            }
        }
        Ok(())
    }

    /// A client came online.
    #[instrument(skip(self))]
    pub fn connect(&self, client: ClientId) {
        if !self.online.insert(client) {
            debug!("Client already online");
            return;
        }
        info!(client = %client, "Client connected");
        self.publish(AudienceEvent::ClientConnected(client));

        for display in self.roots() {
            self.settle_member(&display, &client);
        }
    }

    /// A client went offline. Every slot it held is torn down and it leaves
    /// every display. Returns the number of slots destroyed.
    #[instrument(skip(self))]
    pub fn disconnect(&self, client: &ClientId) -> usize {
        if self.online.remove(client).is_none() {
            debug!("Client was not online");
            return 0;
        }

        // Evict first so leaving owners do not hand slots to each other.
        let mut evicted = self.evict(client);
        for display in self.displays() {
            display.remove_client(client);
        }
        evicted += self.evict(client);

        info!(client = %client, evicted, "Client disconnected");
        self.publish(AudienceEvent::ClientDisconnected(*client));
        evicted
    }

    fn evict(&self, client: &ClientId) -> usize {
        let domains: Vec<Arc<dyn DomainHandle>> = self
            .domains
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        domains
            .iter()
            .map(|domain| domain.evict_client(client))
            .sum()
    }

    /// Advance every display by one tick.
    pub fn tick(&self) {
        let displays = self.displays();
        trace!(displays = displays.len(), "Tick");
        for display in displays {
            display.tick();
        }
    }

    pub fn is_online(&self, client: &ClientId) -> bool {
        self.online.contains(client)
    }

    /// Online clients in stable order.
    pub fn online_clients(&self) -> Vec<ClientId> {
        let mut clients: Vec<ClientId> = self.online.iter().map(|c| *c).collect();
        clients.sort();
        clients
    }

    pub fn display_state(
        &self,
        audience: &AudienceRef,
        client: &ClientId,
    ) -> AudienceResult<DisplayState> {
        self.resolve(audience)
            .map(|display| display.display_state(client))
            .ok_or_else(|| AudienceError::AudienceNotFound(audience.clone()))
    }

    pub fn players(&self, audience: &AudienceRef) -> AudienceResult<Vec<ClientId>> {
        self.resolve(audience)
            .map(|display| display.players())
            .ok_or_else(|| AudienceError::AudienceNotFound(audience.clone()))
    }

    /// Comma separated audience members, empty for unknown audiences.
    pub fn players_label(&self, audience: &AudienceRef) -> String {
        self.players(audience)
            .map(|players| {
                players
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default()
    }

    pub fn audience_count(&self) -> usize {
        self.nodes.len()
    }

    fn displays(&self) -> Vec<Arc<dyn AudienceDisplay>> {
        self.nodes
            .iter()
            .map(|entry| Arc::clone(&entry.value().display))
            .collect()
    }

    fn roots(&self) -> Vec<Arc<dyn AudienceDisplay>> {
        let nodes: Vec<(AudienceRef, Arc<dyn AudienceDisplay>, bool)> = self
            .nodes
            .iter()
            .map(|entry| {
                let node = entry.value();
                (entry.key().clone(), Arc::clone(&node.display), node.child_only)
            })
            .collect();

        nodes
            .into_iter()
            .filter(|(audience, _, child_only)| !child_only && self.parents_of(audience).is_empty())
            .map(|(_, display, _)| display)
            .collect()
    }

    fn parents_of(&self, audience: &AudienceRef) -> Vec<AudienceRef> {
        self.parents
            .get(audience)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn children_of(&self, audience: &AudienceRef) -> Vec<AudienceRef> {
        self.nodes
            .get(audience)
            .map(|entry| entry.value().children.clone())
            .unwrap_or_default()
    }

    fn passed_by_any_parent(&self, audience: &AudienceRef, client: &ClientId) -> bool {
        self.parents_of(audience)
            .iter()
            .filter_map(|parent| self.resolve(parent))
            .any(|parent| parent.contains(client))
    }

    /// Bring a node's membership in line with what its position in the
    /// tree says it should hold.
    fn resync(&self, audience: &AudienceRef) {
        let Some((display, child_only)) = self
            .nodes
            .get(audience)
            .map(|entry| (Arc::clone(&entry.value().display), entry.value().child_only))
        else {
            return;
        };

        let is_root = self.parents_of(audience).is_empty();
        let wanted: HashSet<ClientId> = self
            .online_clients()
            .into_iter()
            .filter(|client| {
                if is_root {
                    !child_only
                } else {
                    self.passed_by_any_parent(audience, client)
                }
            })
            .collect();

        for client in display.membership().snapshot() {
            if !wanted.contains(&client) {
                self.settle_member(&display, &client);
            }
        }
        let mut wanted: Vec<ClientId> = wanted.into_iter().collect();
        wanted.sort();
        for client in wanted {
            self.settle_member(&display, &client);
        }
    }

    /// Whether the tree currently places `client` in `audience`: online,
    /// and either the node is a root or some parent passes the client.
    fn belongs(&self, audience: &AudienceRef, client: &ClientId) -> bool {
        if !self.online.contains(client) {
            return false;
        }
        let Some(child_only) = self.nodes.get(audience).map(|entry| entry.value().child_only)
        else {
            return false;
        };
        if self.parents_of(audience).is_empty() {
            !child_only
        } else {
            self.passed_by_any_parent(audience, client)
        }
    }

    /// Add or remove the client until the display agrees with
    /// [`Self::belongs`]. Parents and connectivity change under us, so the
    /// answer is checked again after every step.
    fn settle_member(&self, display: &Arc<dyn AudienceDisplay>, client: &ClientId) {
        let audience = display.audience();
        loop {
            let wanted = self.belongs(audience, client);
            if wanted {
                display.add_client(client);
            } else {
                display.remove_client(client);
            }
            if self.belongs(audience, client) == wanted {
                return;
            }
            trace!(audience = %audience, client = %client, "Membership moved, settling again");
        }
    }

    /// Settle every child of `parent` for one client. The parent's passing
    /// set may already have moved again, so children follow what it says
    /// now rather than which edge triggered the cascade.
    fn cascade(&self, client: &ClientId, parent: &AudienceRef) {
        for child in self.children_of(parent) {
            match self.resolve(&child) {
                Some(display) => self.settle_member(&display, client),
                None => debug!(parent = %parent, child = %child, "Child not installed"),
            }
        }
    }

    fn publish(&self, event: AudienceEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(AudienceEventEnvelope::new(event));
    }
}

impl AudienceManager for InMemoryAudienceManager {
    fn resolve(&self, audience: &AudienceRef) -> Option<Arc<dyn AudienceDisplay>> {
        self.nodes
            .get(audience)
            .map(|entry| Arc::clone(&entry.value().display))
    }

    fn cascade_add(&self, client: &ClientId, parent: &AudienceRef) {
        if !self.online.contains(client) {
            return;
        }
        self.cascade(client, parent);
    }

    fn cascade_remove(&self, client: &ClientId, parent: &AudienceRef) {
        self.cascade(client, parent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Membership, PassThroughDisplay};
    use crate::filter::{AudienceFilter, PassThroughFilter, PredicateFilter};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;

    fn manager() -> Arc<InMemoryAudienceManager> {
        InMemoryAudienceManager::new(AudienceConfig::default()).unwrap()
    }

    fn aref(id: &str) -> AudienceRef {
        AudienceRef::new(id)
    }

    /// Predicate filter over a shared allow-list.
    fn gate(
        manager: &InMemoryAudienceManager,
        id: &str,
    ) -> (Arc<PredicateFilter>, Arc<Mutex<HashSet<ClientId>>>) {
        let allowed = Arc::new(Mutex::new(HashSet::new()));
        let seen = Arc::clone(&allowed);
        let filter = Arc::new(PredicateFilter::new(manager.filter_state(aref(id)), move |c| {
            Ok(seen.lock().contains(c))
        }));
        (filter, allowed)
    }

    #[test]
    fn test_connect_reaches_roots_and_passing_children() {
        let manager = manager();
        let (vip, allowed) = gate(&manager, "vip");
        let lounge = Arc::new(PassThroughDisplay::new(aref("lounge")));
        manager
            .install(AudienceNode::new(vip.clone()).with_children([aref("lounge")]))
            .unwrap();
        manager.install(AudienceNode::new(lounge.clone())).unwrap();

        let guest = ClientId::generate();
        let member = ClientId::generate();
        allowed.lock().insert(member);
        manager.connect(guest);
        manager.connect(member);

        assert!(vip.can_consider(&guest));
        assert!(!vip.passes(&guest));
        assert_eq!(lounge.players(), vec![member]);
        assert_eq!(
            manager.display_state(&aref("vip"), &guest).unwrap(),
            DisplayState::Blocked
        );
    }

    #[test]
    fn test_predicate_change_cascades_on_tick() {
        let manager = manager();
        let (vip, allowed) = gate(&manager, "vip");
        let lounge = Arc::new(PassThroughDisplay::new(aref("lounge")));
        manager
            .install(AudienceNode::new(vip).with_children([aref("lounge")]))
            .unwrap();
        manager.install(AudienceNode::new(lounge.clone())).unwrap();
        let client = ClientId::generate();
        manager.connect(client);

        allowed.lock().insert(client);
        manager.tick();
        assert!(lounge.contains(&client));

        allowed.lock().clear();
        manager.tick();
        assert!(!lounge.contains(&client));
        assert!(!lounge.is_active());
    }

    #[test]
    fn test_child_installed_later_is_gated() {
        let manager = manager();
        let (vip, _allowed) = gate(&manager, "vip");
        let lounge = Arc::new(PassThroughDisplay::new(aref("lounge")));
        let client = ClientId::generate();
        manager.connect(client);

        manager.install(AudienceNode::new(lounge.clone())).unwrap();
        assert!(lounge.contains(&client));

        manager
            .install(AudienceNode::new(vip).with_children([aref("lounge")]))
            .unwrap();
        assert!(!lounge.contains(&client));
    }

    #[test]
    fn test_child_only_node_is_not_a_root() {
        let manager = manager();
        let orphan = Arc::new(PassThroughDisplay::new(aref("orphan")));
        manager.install(AudienceNode::new(orphan.clone()).child_only()).unwrap();

        manager.connect(ClientId::generate());

        assert!(orphan.players().is_empty());
    }

    #[test]
    fn test_multi_parent_child_stays_while_any_parent_passes() {
        let manager = manager();
        let (left, left_allowed) = gate(&manager, "left");
        let (right, right_allowed) = gate(&manager, "right");
        let shared = Arc::new(PassThroughDisplay::new(aref("shared")));
        manager
            .install(AudienceNode::new(left).with_children([aref("shared")]))
            .unwrap();
        manager
            .install(AudienceNode::new(right).with_children([aref("shared")]))
            .unwrap();
        manager.install(AudienceNode::new(shared.clone())).unwrap();

        let client = ClientId::generate();
        left_allowed.lock().insert(client);
        right_allowed.lock().insert(client);
        manager.connect(client);
        assert!(shared.contains(&client));

        left_allowed.lock().clear();
        manager.tick();
        assert!(shared.contains(&client));

        right_allowed.lock().clear();
        manager.tick();
        assert!(!shared.contains(&client));
    }

    #[test]
    fn test_uninstall_disposes_and_regates_children() {
        let manager = manager();
        let all = Arc::new(PassThroughFilter::new(manager.filter_state(aref("all"))));
        let leaf = Arc::new(PassThroughDisplay::new(aref("leaf")));
        manager
            .install(AudienceNode::new(all.clone()).with_children([aref("leaf")]))
            .unwrap();
        manager.install(AudienceNode::new(leaf.clone()).child_only()).unwrap();
        let client = ClientId::generate();
        manager.connect(client);
        assert!(leaf.contains(&client));

        manager.uninstall(&aref("all")).unwrap();

        assert!(!all.is_active());
        assert!(!leaf.contains(&client));
        assert!(matches!(
            manager.uninstall(&aref("all")),
            Err(AudienceError::AudienceNotFound(_))
        ));
    }

    #[test]
    fn test_install_errors() {
        let manager = manager();
        let lobby = Arc::new(PassThroughDisplay::new(aref("lobby")));
        manager.install(AudienceNode::new(lobby.clone())).unwrap();

        assert!(matches!(
            manager.install(AudienceNode::new(lobby.clone())),
            Err(AudienceError::AudienceAlreadyInstalled(_))
        ));

        let leaf_with_children =
            AudienceNode::new(Arc::new(PassThroughDisplay::new(aref("leafy"))))
                .with_children([aref("lobby")]);
        assert!(matches!(
            manager.install(leaf_with_children),
            Err(AudienceError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_validate_reports_unknown_child() {
        let manager = manager();
        let all = Arc::new(PassThroughFilter::new(manager.filter_state(aref("all"))));
        manager
            .install(AudienceNode::new(all).with_children([aref("missing")]))
            .unwrap();

        match manager.validate() {
            Err(AudienceError::UnknownChild { parent, child }) => {
                assert_eq!(parent, aref("all"));
                assert_eq!(child, aref("missing"));
            }
            other => panic!("expected unknown child, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_domain_is_rejected() {
        let manager = manager();
        manager
            .arbitration_domain::<ClientId>(ResourceTypeId::new("clock"))
            .unwrap();

        let again = manager.arbitration_domain::<ClientId>(ResourceTypeId::new("clock"));
        assert!(matches!(again, Err(AudienceError::DomainAlreadyExists(_))));
        assert!(manager.domain(&ResourceTypeId::new("clock")).is_some());
    }

    #[test]
    fn test_disconnect_clears_every_display() {
        let manager = manager();
        let all = Arc::new(PassThroughFilter::new(manager.filter_state(aref("all"))));
        let leaf = Arc::new(PassThroughDisplay::new(aref("leaf")));
        manager
            .install(AudienceNode::new(all.clone()).with_children([aref("leaf")]))
            .unwrap();
        manager.install(AudienceNode::new(leaf.clone())).unwrap();
        let client = ClientId::generate();
        manager.connect(client);

        manager.disconnect(&client);

        assert!(!manager.is_online(&client));
        assert!(!all.can_consider(&client));
        assert!(!leaf.contains(&client));
        assert_eq!(manager.disconnect(&client), 0);
    }

    #[test]
    fn test_players_label() {
        let manager = manager();
        let lobby = Arc::new(PassThroughDisplay::new(aref("lobby")));
        manager.install(AudienceNode::new(lobby)).unwrap();
        let client = ClientId::generate();
        manager.connect(client);

        assert_eq!(manager.players_label(&aref("lobby")), client.to_string());
        assert_eq!(manager.players_label(&aref("nowhere")), "");
    }

    #[test]
    fn test_events_are_published() {
        let manager = manager();
        let mut events = manager.subscribe();
        let lobby = Arc::new(PassThroughDisplay::new(aref("lobby")));
        manager.install(AudienceNode::new(lobby)).unwrap();
        let client = ClientId::generate();
        manager.connect(client);
        manager.disconnect(&client);

        let received: Vec<AudienceEvent> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|envelope| envelope.event)
            .collect();
        assert_eq!(
            received,
            vec![
                AudienceEvent::AudienceInstalled(aref("lobby")),
                AudienceEvent::ClientConnected(client),
                AudienceEvent::ClientDisconnected(client),
            ]
        );
    }

    /// Gate that parks once between admitting a client to its passing set
    /// and cascading it, so a test can change its mind in that window.
    struct HesitantGate {
        membership: Membership,
        state: FilterState,
        open: AtomicBool,
        hesitate: AtomicBool,
        reached: Barrier,
        resume: Barrier,
    }

    impl AudienceDisplay for HesitantGate {
        fn audience(&self) -> &AudienceRef {
            self.state.audience()
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

    impl AudienceFilter for HesitantGate {
        fn filter_state(&self) -> &FilterState {
            &self.state
        }

        fn predicate(&self, _client: &ClientId) -> AudienceResult<bool> {
            Ok(self.open.load(Ordering::SeqCst))
        }

        fn on_filter_added(&self, _client: &ClientId) {
            if self.hesitate.swap(false, Ordering::SeqCst) {
                self.reached.wait();
                self.resume.wait();
            }
        }
    }

    #[test]
    fn test_child_does_not_keep_client_after_late_cascade() {
        let manager = manager();
        let gate = Arc::new(HesitantGate {
            membership: Membership::new(),
            state: manager.filter_state(aref("gate")),
            open: AtomicBool::new(true),
            hesitate: AtomicBool::new(true),
            reached: Barrier::new(2),
            resume: Barrier::new(2),
        });
        let inner = Arc::new(PassThroughDisplay::new(aref("inner")));
        manager
            .install(AudienceNode::new(gate.clone()).with_children([aref("inner")]))
            .unwrap();
        manager.install(AudienceNode::new(inner.clone())).unwrap();

        let client = ClientId::generate();
        std::thread::scope(|scope| {
            let connecting = scope.spawn(|| manager.connect(client));
            gate.reached.wait();
            gate.open.store(false, Ordering::SeqCst);
            gate.refresh(&client);
            gate.resume.wait();
            connecting.join().unwrap();
        });

        assert!(gate.can_consider(&client));
        assert!(!gate.passes(&client));
        assert!(!inner.membership().contains(&client));

        for _ in 0..3 {
            manager.tick();
        }
        assert!(!inner.membership().contains(&client));

        gate.open.store(true, Ordering::SeqCst);
        manager.tick();
        assert!(inner.membership().contains(&client));
    }
}
