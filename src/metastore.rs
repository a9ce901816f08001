//! Metadata-store collaborator interface: locations, functions and mappings
//! referenced by location id from profile trees. The engine itself only needs
//! the read side, when rendering a stored profile back to a caller.

use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    pub id: u64,
    pub memory_start: u64,
    pub memory_limit: u64,
    pub file_offset: u64,
    pub file: String,
    pub build_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Function {
    pub id: u64,
    pub name: String,
    pub system_name: String,
    pub filename: String,
    pub start_line: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub function_id: u64,
    pub line: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub id: u64,
    pub mapping_id: u64,
    pub address: u64,
    pub lines: Vec<Line>,
    pub is_folded: bool,
}

/// Read-only lookup of profile metadata by id. Ids absent from the store are
/// skipped, not errors; the caller decides how to render unknown locations.
pub trait MetaStore: Send + Sync {
    fn locations_by_ids(&self, ids: &[u64]) -> Result<Vec<Location>, StoreError>;
    fn functions_by_ids(&self, ids: &[u64]) -> Result<Vec<Function>, StoreError>;
    fn mappings_by_ids(&self, ids: &[u64]) -> Result<Vec<Mapping>, StoreError>;
}

/// Map-backed metadata store for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    locations: RwLock<HashMap<u64, Location>>,
    functions: RwLock<HashMap<u64, Function>>,
    mappings: RwLock<HashMap<u64, Mapping>>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_location(&self, location: Location) -> Result<(), StoreError> {
        self.locations.write()?.insert(location.id, location);
        Ok(())
    }

    pub fn add_function(&self, function: Function) -> Result<(), StoreError> {
        self.functions.write()?.insert(function.id, function);
        Ok(())
    }

    pub fn add_mapping(&self, mapping: Mapping) -> Result<(), StoreError> {
        self.mappings.write()?.insert(mapping.id, mapping);
        Ok(())
    }
}

impl MetaStore for InMemoryMetaStore {
    fn locations_by_ids(&self, ids: &[u64]) -> Result<Vec<Location>, StoreError> {
        let map = self.locations.read()?;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    fn functions_by_ids(&self, ids: &[u64]) -> Result<Vec<Function>, StoreError> {
        let map = self.functions.read()?;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    fn mappings_by_ids(&self, ids: &[u64]) -> Result<Vec<Mapping>, StoreError> {
        let map = self.mappings.read()?;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_preserves_request_order_and_skips_unknown_ids() {
        let store = InMemoryMetaStore::new();
        store
            .add_function(Function {
                id: 1,
                name: "main".to_string(),
                ..Default::default()
            })
            .unwrap();
        store
            .add_function(Function {
                id: 2,
                name: "handler".to_string(),
                ..Default::default()
            })
            .unwrap();

        let found = store.functions_by_ids(&[2, 99, 1]).unwrap();
        let names: Vec<&str> = found.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["handler", "main"]);
    }

    #[test]
    fn mappings_round_trip() {
        let store = InMemoryMetaStore::new();
        let mapping = Mapping {
            id: 3,
            memory_start: 0x400000,
            memory_limit: 0x800000,
            file_offset: 0x1000,
            file: "/usr/bin/api-server".to_string(),
            build_id: "abc123".to_string(),
        };
        store.add_mapping(mapping.clone()).unwrap();
        assert_eq!(store.mappings_by_ids(&[3]).unwrap(), vec![mapping]);
        assert!(store.mappings_by_ids(&[4]).unwrap().is_empty());
    }

    #[test]
    fn locations_round_trip() {
        let store = InMemoryMetaStore::new();
        let loc = Location {
            id: 7,
            mapping_id: 1,
            address: 0xdead,
            lines: vec![Line {
                function_id: 1,
                line: 42,
            }],
            is_folded: false,
        };
        store.add_location(loc.clone()).unwrap();
        assert_eq!(store.locations_by_ids(&[7]).unwrap(), vec![loc]);
        assert!(store.locations_by_ids(&[8]).unwrap().is_empty());
    }
}
