//! Dual indexed membership relation between items (nodes) and modules (clusters).
//!
//! One [BipartiteRelation] describes one clusterization, possibly with overlaps.
//! It is populated once (see [from_clusters](BipartiteRelation::from_clusters) or the cnl loader)
//! and is then only read during estimation, so it can be shared between threads without locking.
//!
//! Both access paths keep their values sorted and without duplicates:
//! - item -> modules the item belongs to
//! - module -> items member of the module

use indexmap::IndexMap;

use crate::error::{GecmiError, Result};

/// identifies an item (a node), the same in both clusterizations
pub type ItemId = u32;

/// identifies a module (a cluster) in one clusterization. Ids are assigned from 1.
pub type ModuleId = u32;

/// The (sorted) set of modules an item belongs to
pub type ModuleSet = Vec<ModuleId>;

#[derive(Clone, Debug, Default)]
pub struct BipartiteRelation {
    // item -> sorted modules
    item_modules: IndexMap<ItemId, Vec<ModuleId>>,
    // module -> sorted items
    module_items: IndexMap<ModuleId, Vec<ItemId>>,
    // number of (item, module) couples
    nb_links: usize,
}

impl BipartiteRelation {
    pub fn new() -> Self {
        BipartiteRelation::default()
    }

    /// preallocate for an expected number of items and modules
    pub fn with_capacity(nb_items: usize, nb_modules: usize) -> Self {
        BipartiteRelation {
            item_modules: IndexMap::with_capacity(nb_items),
            module_items: IndexMap::with_capacity(nb_modules),
            nb_links: 0,
        }
    }

    /// Builds a relation from clusters given as lists of members.
    /// The k-th cluster (counting from 0) gets module id k+1.
    /// Clusters beyond the range of [ModuleId] are dropped with an error log.
    pub fn from_clusters<I, C>(clusters: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = ItemId>,
    {
        let mut relation = BipartiteRelation::new();
        for (rank, cluster) in clusters.into_iter().enumerate() {
            let Ok(module) = ModuleId::try_from(rank + 1) else {
                log::error!("from_clusters, too many clusters, stopping at rank {}", rank);
                break;
            };
            for item in cluster {
                relation.insert(item, module);
            }
        }
        relation
    }

    /// inserts the couple (item, module) in both indexes. returns false if it was already present
    pub fn insert(&mut self, item: ItemId, module: ModuleId) -> bool {
        let modules = self.item_modules.entry(item).or_default();
        match modules.binary_search(&module) {
            Ok(_) => return false,
            Err(pos) => modules.insert(pos, module),
        }
        let items = self.module_items.entry(module).or_default();
        if let Err(pos) = items.binary_search(&item) {
            items.insert(pos, item);
        }
        self.nb_links += 1;
        true
    } // end of insert

    /// modules of an item, empty slice if item is not a member of any module
    pub fn modules_of(&self, item: ItemId) -> &[ModuleId] {
        self.item_modules
            .get(&item)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// members of a module, empty slice for an unknown module
    pub fn items_of(&self, module: ModuleId) -> &[ItemId] {
        self.module_items
            .get(&module)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_item(&self, item: ItemId) -> bool {
        self.item_modules.contains_key(&item)
    }

    /// number of unique items
    pub fn nb_items(&self) -> usize {
        self.item_modules.len()
    }

    /// number of unique modules
    pub fn nb_modules(&self) -> usize {
        self.module_items.len()
    }

    /// number of (item, module) couples
    pub fn nb_links(&self) -> usize {
        self.nb_links
    }

    pub fn is_empty(&self) -> bool {
        self.nb_links == 0
    }

    /// largest module id, 0 for an empty relation
    pub fn max_module(&self) -> ModuleId {
        self.module_items.keys().copied().max().unwrap_or(0)
    }

    /// iterates on items in insertion order
    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.item_modules.keys().copied()
    }

    /// iterates on modules in insertion order
    pub fn modules(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.module_items.keys().copied()
    }

    /// average number of modules an item belongs to (1. for a partition without overlap)
    pub fn mean_membership(&self) -> f64 {
        if self.item_modules.is_empty() {
            return 0.;
        }
        self.nb_links as f64 / self.item_modules.len() as f64
    }

    /// Removes all items for which keep returns false. Modules left without members are removed too.
    /// Returns the number of items removed.
    pub fn retain_items<F>(&mut self, keep: F) -> usize
    where
        F: Fn(ItemId) -> bool,
    {
        let nb_before = self.item_modules.len();
        self.item_modules.retain(|item, _| keep(*item));
        let mut nb_links = 0;
        self.module_items.retain(|_, items| {
            items.retain(|item| keep(*item));
            nb_links += items.len();
            !items.is_empty()
        });
        self.nb_links = nb_links;
        nb_before - self.item_modules.len()
    } // end of retain_items

    /// releases memory allocated in excess during population
    pub fn shrink_to_fit(&mut self) {
        self.item_modules.shrink_to_fit();
        self.module_items.shrink_to_fit();
        for modules in self.item_modules.values_mut() {
            modules.shrink_to_fit();
        }
        for items in self.module_items.values_mut() {
            items.shrink_to_fit();
        }
    }
} // end of impl BipartiteRelation

//===================================================================================

/// Synchronizes the item base of two clusterizations.
/// Nodes not present in the relation with less items are removed from the other one, which makes
/// the comparison fair when one collection was built from a subset of the nodes (top K clusters for example).
/// Returns the number of items removed.
pub fn synchronize(rel_a: &mut BipartiteRelation, rel_b: &mut BipartiteRelation) -> Result<usize> {
    let nb_a = rel_a.nb_items();
    let nb_b = rel_b.nb_items();
    if nb_a == nb_b {
        return Ok(0);
    }
    log::warn!(
        "the number of nodes is different in the collections : {} vs {}, nodes will be synchronized by removing non matching ones from the largest collection",
        nb_a,
        nb_b
    );
    let removed = if nb_a < nb_b {
        rel_b.retain_items(|item| rel_a.contains_item(item))
    } else {
        rel_a.retain_items(|item| rel_b.contains_item(item))
    };
    //
    let (nb_a, nb_b) = (rel_a.nb_items(), rel_b.nb_items());
    if nb_a != nb_b {
        log::error!("after synchronization nb items a : {}, nb items b : {}", nb_a, nb_b);
        return Err(GecmiError::Unsynchronizable {
            nb_items_a: nb_a,
            nb_items_b: nb_b,
        });
    }
    log::debug!("synchronization removed {} items", removed);
    Ok(removed)
} // end of synchronize

//===================================================================================

#[cfg(test)]
mod tests {

    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn dual_index_consistent() {
        log_init_test();
        //
        let mut rel = BipartiteRelation::new();
        assert!(rel.insert(3, 2));
        assert!(rel.insert(3, 1));
        assert!(rel.insert(1, 2));
        // duplicate
        assert!(!rel.insert(3, 2));
        //
        assert_eq!(rel.modules_of(3), &[1, 2]);
        assert_eq!(rel.items_of(2), &[1, 3]);
        assert_eq!(rel.items_of(1), &[3]);
        assert_eq!(rel.nb_items(), 2);
        assert_eq!(rel.nb_modules(), 2);
        assert_eq!(rel.nb_links(), 3);
        assert_eq!(rel.max_module(), 2);
        assert!(rel.modules_of(17).is_empty());
        assert!(rel.items_of(17).is_empty());
        // each link seen from both sides
        for item in rel.items() {
            for m in rel.modules_of(item) {
                assert!(rel.items_of(*m).contains(&item));
            }
        }
        assert_eq!(rel.modules().collect::<Vec<ModuleId>>(), vec![2, 1]);
        let nb_links: usize = rel.modules().map(|m| rel.items_of(m).len()).sum();
        assert_eq!(nb_links, rel.nb_links());
    } // end of dual_index_consistent

    #[test]
    fn from_clusters_numbering() {
        log_init_test();
        //
        let rel = BipartiteRelation::from_clusters(vec![vec![1, 2, 3], vec![3, 4, 5]]);
        assert_eq!(rel.nb_modules(), 2);
        assert_eq!(rel.nb_items(), 5);
        assert_eq!(rel.modules_of(3), &[1, 2]);
        assert_eq!(rel.modules_of(5), &[2]);
        assert_eq!(rel.max_module(), 2);
        assert!((rel.mean_membership() - 1.2).abs() < 1.0e-12);
    }

    #[test]
    fn retain_drops_empty_modules() {
        log_init_test();
        //
        let mut rel = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![3], vec![2, 4]]);
        let removed = rel.retain_items(|i| i != 3 && i != 4);
        assert_eq!(removed, 2);
        assert_eq!(rel.nb_items(), 2);
        assert_eq!(rel.nb_modules(), 2);
        assert_eq!(rel.nb_links(), 3);
        assert!(rel.items_of(2).is_empty());
        assert_eq!(rel.items_of(3), &[2]);
    }

    #[test]
    fn synchronize_bases() {
        log_init_test();
        //
        let mut rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let mut rel_b = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![3, 4]]);
        let removed = synchronize(&mut rel_a, &mut rel_b).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(rel_a.nb_items(), 4);
        assert_eq!(rel_a.items_of(2), &[4]);
        // b has an item unknown to a, cannot be fixed by removing from a
        let mut rel_a = BipartiteRelation::from_clusters(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let mut rel_b = BipartiteRelation::from_clusters(vec![vec![1, 2], vec![8, 9]]);
        let res = synchronize(&mut rel_a, &mut rel_b);
        assert!(matches!(res, Err(GecmiError::Unsynchronizable { .. })));
    }
} // end of mod tests
