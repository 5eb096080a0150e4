//! Audience Engine - Membership tree and exclusive resource arbitration
//!
//! Audiences form a tree. Online clients enter at the roots and flow down
//! through filters, each of which forwards only the clients that pass it.
//! Arbitration filters additionally compete for a per-client exclusive
//! resource; an [`ArbitrationDomain`] guarantees that at most one of them
//! holds each slot and applies its effect.
//!
//! ## Example
//!
//! ```
//! use audience_engine::{
//!     AudienceConfig, AudienceFilter, AudienceNode, InMemoryAudienceManager, NoOpApplier,
//!     ResourceApplier, SingleFilter,
//! };
//! use audience_types::{AudienceRef, ClientId, ResourceTypeId};
//!
//! let manager = InMemoryAudienceManager::new(AudienceConfig::default())?;
//! let clock = manager.arbitration_domain::<ClientId>(ResourceTypeId::new("clock"))?;
//! let no_effect = |_: &ClientId| Box::new(NoOpApplier) as Box<dyn ResourceApplier>;
//!
//! let noon = SingleFilter::new(
//!     manager.filter_state(AudienceRef::new("noon")),
//!     5,
//!     clock.clone(),
//!     no_effect,
//! );
//! let dusk = SingleFilter::new(
//!     manager.filter_state(AudienceRef::new("dusk")),
//!     10,
//!     clock.clone(),
//!     no_effect,
//! );
//! manager.install(AudienceNode::new(noon.clone()))?;
//! manager.install(AudienceNode::new(dusk.clone()))?;
//!
//! let player = ClientId::generate();
//! manager.connect(player);
//! assert!(dusk.passes(&player));
//! assert!(!noon.passes(&player));
//! # Ok::<(), audience_engine::AudienceError>(())
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod display;
pub mod domain;
pub mod error;
pub mod filter;
pub mod manager;
pub mod single;
pub mod single_keyed;
pub mod ticker;

pub use config::{AudienceConfig, EngineProfile};
pub use display::{AudienceDisplay, Membership, PassThroughDisplay};
pub use domain::{
    ApplierFactory, ArbitrationDomain, Contender, DomainHandle, NoOpApplier, ResourceApplier,
    SlotKey, Transition,
};
pub use error::{AudienceError, AudienceResult};
pub use filter::{AudienceFilter, FilterState, PassThroughFilter, Predicate, PredicateFilter};
pub use manager::{AudienceManager, AudienceNode, InMemoryAudienceManager, ManagerHandle};
pub use single::SingleFilter;
pub use single_keyed::{KeyFn, SingleKeyedFilter};
pub use ticker::{TickHandle, TickLoop};
