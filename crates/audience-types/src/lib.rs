//! Audience Types - Core types for client membership and arbitration
//!
//! An *audience* is a declared rule that decides which connected clients it
//! applies to. Some audiences compete for an exclusive per-client resource
//! (a sidebar, the clock, an inventory slot); exactly one of them may hold it
//! at a time.
//!
//! ## Key Concepts
//!
//! - **ClientId**: Identity of a connected client
//! - **AudienceRef**: Stable reference to a declared audience rule
//! - **Claim**: Priority-ordered bid for an exclusive slot
//! - **MultiKey**: Compound (client, sub-resource) slot address
//! - **DisplayState**: In audience / blocked / not considered
//! - **Events**: Membership and ownership change stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod multikey;
pub mod priority;
pub mod state;

// Re-export main types
pub use events::{AudienceEvent, AudienceEventEnvelope};
pub use ids::{AudienceRef, ClientId, ResourceTypeId};
pub use multikey::{KeyPair, MultiKey};
pub use priority::{Claim, Priority, TieBreak};
pub use state::DisplayState;
