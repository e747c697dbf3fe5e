//! Tracks which peers claim to hold which objects.
//!
//! The inventory is a map from 32-byte object hash to the set of
//! endpoints that advertised it in an `inv` message. Entries are only
//! added or merged during a node's lifetime, and only the server loop
//! mutates the map.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use thiserror::Error;

use crate::wire::message::{Endpoint, ObjectHash};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("inventory encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed object hash {0:?}")]
    BadHash(String),
    #[error("malformed endpoint {0:?}")]
    BadEndpoint(String),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Inventory {
    objects: BTreeMap<ObjectHash, BTreeSet<Endpoint>>,
}

impl Inventory {
    pub fn new() -> Inventory {
        Inventory::default()
    }

    /// Records that `holder` knows about `hash`. Returns true when the
    /// hash itself was previously unknown, which is the trigger for
    /// requesting the object.
    pub fn add(&mut self, hash: ObjectHash, holder: Endpoint) -> bool {
        match self.objects.entry(hash) {
            Entry::Vacant(entry) => {
                entry.insert(BTreeSet::from([holder]));
                true
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().insert(holder);
                false
            }
        }
    }

    /// Adds every (hash, holder) pair from `other` into this inventory.
    pub fn merge(&mut self, other: Inventory) {
        for (hash, holders) in other.objects {
            self.objects.entry(hash).or_default().extend(holders);
        }
    }

    pub fn contains(&self, hash: &ObjectHash) -> bool {
        self.objects.contains_key(hash)
    }

    pub fn holders(&self, hash: &ObjectHash) -> Option<&BTreeSet<Endpoint>> {
        self.objects.get(hash)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Writes the inventory as JSON: hex hash keys mapping to lists of
    /// `host:port` strings. Self-describing and portable; `load` reads
    /// the same shape back exactly.
    pub fn save<W: Write>(&self, writer: W) -> Result<(), InventoryError> {
        let portable: BTreeMap<String, Vec<String>> = self
            .objects
            .iter()
            .map(|(hash, holders)| {
                (
                    hex::encode(hash),
                    holders.iter().map(Endpoint::to_string).collect(),
                )
            })
            .collect();
        serde_json::to_writer(writer, &portable)?;
        Ok(())
    }

    pub fn load<R: Read>(reader: R) -> Result<Inventory, InventoryError> {
        let portable: BTreeMap<String, Vec<String>> = serde_json::from_reader(reader)?;
        let mut inventory = Inventory::new();
        for (key, holders) in portable {
            let bytes = hex::decode(&key).map_err(|_| InventoryError::BadHash(key.clone()))?;
            let hash: ObjectHash = bytes
                .try_into()
                .map_err(|_| InventoryError::BadHash(key.clone()))?;
            let entry = inventory.objects.entry(hash).or_default();
            for holder in holders {
                let endpoint = holder
                    .parse()
                    .map_err(|_| InventoryError::BadEndpoint(holder.clone()))?;
                entry.insert(endpoint);
            }
        }
        Ok(inventory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    fn sample() -> Inventory {
        let mut inventory = Inventory::new();
        inventory.add([0x11; 32], endpoint("10.0.0.1:8444"));
        inventory.add([0x11; 32], endpoint("10.0.0.2:8444"));
        inventory.add([0x22; 32], endpoint("[2001:db8::1]:9090"));
        inventory
    }

    #[test]
    fn add_reports_new_hashes_only() {
        let mut inventory = Inventory::new();
        assert!(inventory.add([0x11; 32], endpoint("10.0.0.1:8444")));
        assert!(!inventory.add([0x11; 32], endpoint("10.0.0.2:8444")));
        assert_eq!(inventory.holders(&[0x11; 32]).unwrap().len(), 2);
    }

    #[test]
    fn merge_with_itself_is_idempotent() {
        let mut inventory = sample();
        inventory.merge(sample());
        assert_eq!(inventory, sample());
    }

    #[test]
    fn merge_unions_holders() {
        let mut a = Inventory::new();
        a.add([0x11; 32], endpoint("10.0.0.1:8444"));
        let mut b = Inventory::new();
        b.add([0x11; 32], endpoint("10.0.0.2:8444"));
        b.add([0x33; 32], endpoint("10.0.0.3:8444"));
        a.merge(b);
        assert_eq!(a.holders(&[0x11; 32]).unwrap().len(), 2);
        assert!(a.contains(&[0x33; 32]));
    }

    #[test]
    fn save_then_load_is_identity() {
        let inventory = sample();
        let mut buffer = Vec::new();
        inventory.save(&mut buffer).unwrap();
        let loaded = Inventory::load(buffer.as_slice()).unwrap();
        assert_eq!(loaded, inventory);
    }

    #[test]
    fn load_rejects_bad_hash_key() {
        let err = Inventory::load(br#"{"zz": []}"#.as_slice()).unwrap_err();
        assert!(matches!(err, InventoryError::BadHash(_)));
    }

    #[test]
    fn load_rejects_bad_endpoint() {
        let json = format!(r#"{{"{}": ["nonsense"]}}"#, hex::encode([0x11; 32]));
        let err = Inventory::load(json.as_bytes()).unwrap_err();
        assert!(matches!(err, InventoryError::BadEndpoint(_)));
    }
}
