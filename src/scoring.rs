//! Log clade credibility scoring and maximum clade credibility selection.

use crate::clades::CladeSystem;
use crate::error::{AnnotatorError, Result};
use crate::io::TreeStream;
use crate::tree::SummaryTree;

/// Sum of `ln(credibility)` over the internal-node clades of `tree`.
///
/// Tips are skipped (they occur in every tree). The root clade also occurs in
/// every tree and so contributes `ln(1) = 0`; pass `include_root = false` to
/// leave it out of the sum entirely. A clade of `tree` missing from the
/// registry is a pipeline inconsistency and fails rather than scoring zero.
pub fn log_clade_credibility(
    system: &CladeSystem,
    tree: &SummaryTree,
    include_root: bool,
) -> Result<f64> {
    let codes = system.tree_clade_codes(tree)?;
    let mut total = 0.0;
    for idx in tree.post_order() {
        if tree.is_leaf(idx) || (!include_root && idx == tree.root()) {
            continue;
        }
        let clade =
            system
                .get_clade(&codes[idx])
                .ok_or_else(|| AnnotatorError::CladeNotFound {
                    clade: system.describe_clade(&codes[idx]),
                })?;
        total += clade.credibility.ln();
    }
    Ok(total)
}

/// The tree selected by [`find_mcc_tree`].
pub struct MccResult {
    pub tree: SummaryTree,
    /// Position of the winning tree within the used (post burn-in) sample,
    /// starting at 1.
    pub tree_number: usize,
    pub score: f64,
}

/// Scans the posterior sample once more and returns the single sampled tree
/// with the highest log clade credibility. Exact ties keep the earlier tree.
pub fn find_mcc_tree(stream: &TreeStream, system: &CladeSystem) -> Result<MccResult> {
    let mut best: Option<MccResult> = None;
    let mut number = 0usize;
    for entry in stream.trees()? {
        let sampled = entry?;
        number += 1;
        let score = log_clade_credibility(system, &sampled.tree, false)?;
        if best.as_ref().is_none_or(|b| score > b.score) {
            best = Some(MccResult {
                tree: sampled.tree,
                tree_number: number,
                score,
            });
        }
    }
    best.ok_or(AnnotatorError::BurninExceedsSample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clades::TaxonSet;
    use crate::io::parse_newick;

    fn tree(newick: &str) -> SummaryTree {
        parse_newick(newick, false).unwrap()
    }

    /// With ((A,B),(C,D)) seen twice and ((A,C),(B,D)) once, the first
    /// topology scores 2·ln(2/3) and the second 2·ln(1/3).
    #[test]
    fn test_majority_topology_scores_higher() {
        let t1 = tree("((A,B),(C,D));");
        let t2 = tree("((A,C),(B,D));");
        let mut system = CladeSystem::new(TaxonSet::from_tree(&t1).unwrap());
        system.add(&t1, true).unwrap();
        system.add(&t1, true).unwrap();
        system.add(&t2, true).unwrap();
        system.calculate_clade_credibilities(3).unwrap();

        let s1 = log_clade_credibility(&system, &t1, false).unwrap();
        let s2 = log_clade_credibility(&system, &t2, false).unwrap();
        assert!((s1 - 2.0 * (2.0f64 / 3.0).ln()).abs() < 1e-12);
        assert!((s2 - 2.0 * (1.0f64 / 3.0).ln()).abs() < 1e-12);
        assert!(s1 > s2);
    }

    #[test]
    fn test_root_contributes_nothing() {
        let t = tree("((A,B),C);");
        let mut system = CladeSystem::new(TaxonSet::from_tree(&t).unwrap());
        system.add(&t, true).unwrap();
        system.calculate_clade_credibilities(1).unwrap();
        let with_root = log_clade_credibility(&system, &t, true).unwrap();
        let without = log_clade_credibility(&system, &t, false).unwrap();
        assert_eq!(with_root, without);
    }

    #[test]
    fn test_unregistered_clade_is_fatal() {
        let t1 = tree("((A,B),(C,D));");
        let t2 = tree("((A,D),(B,C));");
        let mut system = CladeSystem::new(TaxonSet::from_tree(&t1).unwrap());
        system.add(&t1, true).unwrap();
        system.calculate_clade_credibilities(1).unwrap();
        assert!(matches!(
            log_clade_credibility(&system, &t2, false),
            Err(AnnotatorError::CladeNotFound { .. })
        ));
    }
}
