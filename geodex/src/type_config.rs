//! Feature type registry and type-set query predicates.
//!
//! Types are registered once at configuration time and get dense,
//! monotonically increasing ids, so membership checks and on-disk type
//! maps can index by id directly.

use std::collections::HashMap;

/// Dense identifier of a feature type.
pub type TypeId = u16;

/// Metadata for a single registered feature type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    name: String,
    optimize_low_zoom: bool,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>) -> TypeInfo {
        TypeInfo {
            name: name.into(),
            optimize_low_zoom: false,
        }
    }

    /// Mark the type as eligible for pre-simplified low-zoom copies.
    /// Only types whose rendering is stable across zoom levels should
    /// set this.
    pub fn with_optimize_low_zoom(mut self) -> TypeInfo {
        self.optimize_low_zoom = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn optimize_low_zoom(&self) -> bool {
        self.optimize_low_zoom
    }
}

/// Registry mapping feature type names to dense ids.
#[derive(Debug, Clone, Default)]
pub struct TypeConfig {
    types: Vec<TypeInfo>,
    name_to_id: HashMap<String, TypeId>,
}

impl TypeConfig {
    pub fn new() -> TypeConfig {
        TypeConfig::default()
    }

    /// Register a type, returning its id. Registering a name twice
    /// returns the existing id and keeps the first registration.
    pub fn register(&mut self, info: TypeInfo) -> TypeId {
        if let Some(id) = self.name_to_id.get(info.name()) {
            return *id;
        }

        let id = self.types.len() as TypeId;
        self.name_to_id.insert(info.name().to_string(), id);
        self.types.push(info);
        id
    }

    /// The largest id handed out so far. Zero for an empty registry.
    pub fn max_type_id(&self) -> TypeId {
        if self.types.is_empty() {
            0
        } else {
            (self.types.len() - 1) as TypeId
        }
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.name_to_id.get(name).copied()
    }

    pub fn type_info(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.get(id as usize)
    }

    pub fn is_valid_id(&self, id: TypeId) -> bool {
        (id as usize) < self.types.len()
    }

    /// Ids of all types flagged for low-zoom optimization, in id order.
    pub fn optimizable_types(&self) -> Vec<TypeId> {
        self.types
            .iter()
            .enumerate()
            .filter(|(_, info)| info.optimize_low_zoom())
            .map(|(id, _)| id as TypeId)
            .collect()
    }
}

/// A set of type ids used as a query predicate.
///
/// Membership is a dense bit vector indexed by id, sized from the owning
/// `TypeConfig`.
#[derive(Debug, Clone, Default)]
pub struct TypeSet {
    member: Vec<bool>,
}

impl TypeSet {
    /// An empty set sized for the given registry.
    pub fn new(config: &TypeConfig) -> TypeSet {
        TypeSet {
            member: vec![false; config.type_count()],
        }
    }

    /// A set containing every registered type.
    pub fn full(config: &TypeConfig) -> TypeSet {
        TypeSet {
            member: vec![true; config.type_count()],
        }
    }

    pub fn insert(&mut self, id: TypeId) {
        if (id as usize) >= self.member.len() {
            self.member.resize(id as usize + 1, false);
        }
        self.member[id as usize] = true;
    }

    pub fn remove(&mut self, id: TypeId) {
        if let Some(slot) = self.member.get_mut(id as usize) {
            *slot = false;
        }
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.member.get(id as usize).copied().unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        !self.member.iter().any(|m| *m)
    }

    pub fn len(&self) -> usize {
        self.member.iter().filter(|m| **m).count()
    }

    /// Member ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.member
            .iter()
            .enumerate()
            .filter(|(_, m)| **m)
            .map(|(id, _)| id as TypeId)
    }

    /// The intersection with another set.
    pub fn intersection(&self, other: &TypeSet) -> TypeSet {
        let len = self.member.len().min(other.member.len());
        let mut member = vec![false; self.member.len().max(other.member.len())];
        for (i, slot) in member.iter_mut().enumerate().take(len) {
            *slot = self.member[i] && other.member[i];
        }
        TypeSet { member }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> TypeConfig {
        let mut config = TypeConfig::new();
        config.register(TypeInfo::new("highway_motorway").with_optimize_low_zoom());
        config.register(TypeInfo::new("building"));
        config.register(TypeInfo::new("natural_coastline"));
        config
    }

    #[test]
    fn test_register_assigns_dense_ids() {
        let config = sample_config();
        assert_eq!(config.type_id("highway_motorway"), Some(0));
        assert_eq!(config.type_id("building"), Some(1));
        assert_eq!(config.type_id("natural_coastline"), Some(2));
        assert_eq!(config.max_type_id(), 2);
    }

    #[test]
    fn test_register_duplicate_keeps_first() {
        let mut config = sample_config();
        let id = config.register(TypeInfo::new("building").with_optimize_low_zoom());
        assert_eq!(id, 1);
        assert!(!config.type_info(1).unwrap().optimize_low_zoom());
        assert_eq!(config.type_count(), 3);
    }

    #[test]
    fn test_optimizable_types() {
        let mut config = sample_config();
        config.register(TypeInfo::new("waterway_river").with_optimize_low_zoom());
        assert_eq!(config.optimizable_types(), vec![0, 3]);
    }

    #[test]
    fn test_type_set_membership() {
        let config = sample_config();
        let mut set = TypeSet::new(&config);
        assert!(set.is_empty());

        set.insert(1);
        assert!(set.contains(1));
        assert!(!set.contains(0));
        assert_eq!(set.len(), 1);

        set.remove(1);
        assert!(set.is_empty());
    }

    #[test]
    fn test_type_set_full_and_iter() {
        let config = sample_config();
        let set = TypeSet::full(&config);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_type_set_out_of_range_contains() {
        let config = sample_config();
        let set = TypeSet::new(&config);
        assert!(!set.contains(999));
    }

    #[test]
    fn test_type_set_intersection() {
        let config = sample_config();
        let mut a = TypeSet::new(&config);
        let mut b = TypeSet::new(&config);
        a.insert(0);
        a.insert(2);
        b.insert(2);
        let both = a.intersection(&b);
        assert_eq!(both.iter().collect::<Vec<_>>(), vec![2]);
    }
}
