//! Compound keys for keyed ownership slots
//!
//! [`MultiKey`] addresses a (client, sub-resource) pair. Maps keyed by it can
//! be looked up with two borrowed components through [`KeyPair`], so hot paths
//! never build a temporary key:
//!
//! ```
//! use std::collections::HashMap;
//! use audience_types::{KeyPair, MultiKey};
//!
//! let mut slots = HashMap::new();
//! slots.insert(MultiKey::new("client-a".to_string(), 3u8), "quest book");
//!
//! let client = "client-a".to_string();
//! let lookup = (&client, &3u8);
//! assert_eq!(slots.get(&lookup as &dyn KeyPair<String, u8>), Some(&"quest book"));
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Immutable pair of key components with structural equality.
///
/// Hashing feeds `first` then `second`, the same sequence as the
/// `dyn KeyPair` implementation below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MultiKey<A, B> {
    first: A,
    second: B,
}

impl<A, B> MultiKey<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }

    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: fmt::Display, B: fmt::Display> fmt::Display for MultiKey<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.first, self.second)
    }
}

/// Borrowed view over the two components of a compound key
pub trait KeyPair<A, B> {
    fn first(&self) -> &A;
    fn second(&self) -> &B;
}

impl<A, B> KeyPair<A, B> for MultiKey<A, B> {
    fn first(&self) -> &A {
        &self.first
    }

    fn second(&self) -> &B {
        &self.second
    }
}

impl<A, B> KeyPair<A, B> for (&A, &B) {
    fn first(&self) -> &A {
        self.0
    }

    fn second(&self) -> &B {
        self.1
    }
}

impl<'a, A: 'a, B: 'a> Borrow<dyn KeyPair<A, B> + 'a> for MultiKey<A, B> {
    fn borrow(&self) -> &(dyn KeyPair<A, B> + 'a) {
        self
    }
}

impl<A: Hash, B: Hash> Hash for dyn KeyPair<A, B> + '_ {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.first().hash(state);
        self.second().hash(state);
    }
}

impl<A: PartialEq, B: PartialEq> PartialEq for dyn KeyPair<A, B> + '_ {
    fn eq(&self, other: &Self) -> bool {
        self.first() == other.first() && self.second() == other.second()
    }
}

impl<A: Eq, B: Eq> Eq for dyn KeyPair<A, B> + '_ {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientId;
    use std::collections::HashMap;

    #[test]
    fn test_structural_equality() {
        let client = ClientId::generate();
        assert_eq!(MultiKey::new(client, 3), MultiKey::new(client, 3));
        assert_ne!(MultiKey::new(client, 3), MultiKey::new(client, 9));
    }

    #[test]
    fn test_borrowed_pair_lookup() {
        let client = ClientId::generate();
        let other = ClientId::generate();
        let mut map = HashMap::new();
        map.insert(MultiKey::new(client, 3u32), "three");
        map.insert(MultiKey::new(client, 9u32), "nine");

        let lookup = (&client, &9u32);
        assert_eq!(map.get(&lookup as &dyn KeyPair<ClientId, u32>), Some(&"nine"));

        let missing = (&other, &3u32);
        assert!(map.get(&missing as &dyn KeyPair<ClientId, u32>).is_none());
    }

    #[test]
    fn test_display_format() {
        let key = MultiKey::new("a", 1);
        assert_eq!(key.to_string(), "[a, 1]");
    }
}
