//! Common-ancestor height assignment.
//!
//! A third pass over the posterior sample: on every sampled tree, each target
//! clade is matched by subset (its taxa need not be monophyletic there) to
//! the lowest node containing them all, and that node's height is
//! accumulated. Afterwards each target node's height is the across-sample
//! mean of those common-ancestor heights.

use rayon::prelude::*;

use crate::bitset::Bitset;
use crate::clades::{CladeSystem, TaxonSet};
use crate::error::{AnnotatorError, Result};
use crate::io::TreeStream;
use crate::tree::SummaryTree;

/// Height of the common ancestor of every target clade on one sampled tree.
///
/// Nodes are visited in pre-order; every superset of a target clade is an
/// ancestor of its MRCA, so the last superset visited is the MRCA itself and
/// its height wins. Each target clade scans independently, which makes the
/// quadratic matching step embarrassingly parallel.
fn common_ancestor_heights(
    system: &CladeSystem,
    target_codes: &[Bitset],
    sampled: &SummaryTree,
) -> Result<Vec<f64>> {
    let order = sampled.pre_order();
    let codes = system.tree_clade_codes(sampled)?;
    let heights = target_codes
        .par_iter()
        .map(|target_code| {
            let mut height = 0.0;
            for &j in &order {
                if target_code.is_subset_of(&codes[j]) {
                    height = sampled.node(j).height;
                }
            }
            height
        })
        .collect();
    Ok(heights)
}

/// Rewrites every node height of `target` as the mean common-ancestor height
/// over the posterior sample. Returns the number of trees used.
pub fn set_heights_by_common_ancestor(
    stream: &TreeStream,
    taxa: &TaxonSet,
    target: &mut SummaryTree,
) -> Result<usize> {
    let system = CladeSystem::new(taxa.clone());
    let target_codes = system.tree_clade_codes(target)?;

    let mut totals = vec![0.0f64; target.node_count()];
    let mut used = 0usize;
    for entry in stream.trees()? {
        let sampled = entry?.tree;
        let heights = common_ancestor_heights(&system, &target_codes, &sampled)?;
        for (total, height) in totals.iter_mut().zip(&heights) {
            *total += height;
        }
        used += 1;
    }
    if used == 0 {
        return Err(AnnotatorError::BurninExceedsSample);
    }
    for (idx, total) in totals.iter().enumerate() {
        target.node_mut(idx).height = total / used as f64;
    }
    Ok(used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::parse_newick;

    fn tree(newick: &str) -> SummaryTree {
        let mut t = parse_newick(newick, false).unwrap();
        t.assign_heights_from_lengths();
        t
    }

    fn node_with_clade(t: &SummaryTree, system: &CladeSystem, taxa: &[&str]) -> usize {
        let codes = system.tree_clade_codes(t).unwrap();
        let mut key = Bitset::for_taxa(system.taxa().len());
        for name in taxa {
            key.set(system.taxa().index_of(name).unwrap());
        }
        codes.iter().position(|c| *c == key).unwrap()
    }

    #[test]
    fn test_monophyletic_clade_takes_its_own_height() {
        let target = tree("((A:1,B:1):1,(C:1,D:1):1);");
        let taxa = TaxonSet::from_tree(&target).unwrap();
        let system = CladeSystem::new(taxa);
        let target_codes = system.tree_clade_codes(&target).unwrap();

        let sampled = tree("((A:3,B:3):1,(C:3,D:3):1);");
        let heights = common_ancestor_heights(&system, &target_codes, &sampled).unwrap();

        let ab = node_with_clade(&target, &system, &["A", "B"]);
        assert_eq!(heights[ab], 3.0);
        assert_eq!(heights[target.root()], 4.0);
        let a = node_with_clade(&target, &system, &["A"]);
        assert_eq!(heights[a], 0.0);
    }

    #[test]
    fn test_non_monophyletic_clade_falls_back_to_mrca() {
        let target = tree("((A:1,B:1):1,(C:1,D:1):1);");
        let taxa = TaxonSet::from_tree(&target).unwrap();
        let system = CladeSystem::new(taxa);
        let target_codes = system.tree_clade_codes(&target).unwrap();

        // Here {A,B} is not a clade; the smallest superset of {A,B} is the
        // whole tree at height 2.
        let sampled = tree("((A:1,C:1):1,(B:1,D:1):1);");
        let heights = common_ancestor_heights(&system, &target_codes, &sampled).unwrap();

        let ab = node_with_clade(&target, &system, &["A", "B"]);
        assert_eq!(heights[ab], 2.0);
    }

    #[test]
    fn test_nested_superset_picks_lowest() {
        let target = tree("(((A:1,B:1):1,C:2):1,D:3);");
        let taxa = TaxonSet::from_tree(&target).unwrap();
        let system = CladeSystem::new(taxa);
        let target_codes = system.tree_clade_codes(&target).unwrap();

        // {A,B} sits below {A,B,C}; its MRCA height must be the inner node,
        // not any ancestor that also contains both tips.
        let sampled = tree("(((A:1,B:1):2,C:3):1,D:4);");
        let heights = common_ancestor_heights(&system, &target_codes, &sampled).unwrap();

        let ab = node_with_clade(&target, &system, &["A", "B"]);
        assert_eq!(heights[ab], 1.0);
        let abc = node_with_clade(&target, &system, &["A", "B", "C"]);
        assert_eq!(heights[abc], 3.0);
    }
}
