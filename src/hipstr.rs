//! Highest independent posterior subtree reconstruction.
//!
//! Rather than picking one sampled tree, the search assembles the binary
//! topology that maximizes the sum of log clade credibilities, choosing for
//! every clade the best decomposition into two clades that were actually
//! observed as its children somewhere in the sample. Scores are memoized per
//! clade, so the exponential space of topologies collapses to one dynamic
//! program over the registered clades.

use std::collections::HashMap;

use crate::bitset::Bitset;
use crate::clades::CladeSystem;
use crate::error::{AnnotatorError, Result};
use crate::tree::SummaryTree;

/// One best-subtree search run.
///
/// The memoization table is owned by the builder and cleared at the start of
/// every run, so separate summarization runs never see each other's cached
/// scores or stale best splits.
pub struct HipstrBuilder {
    penalty_threshold: f64,
    credibility_cache: HashMap<Bitset, f64>,
}

impl HipstrBuilder {
    /// `penalty_threshold` is added to each clade credibility before the
    /// logarithm, keeping rarely seen clades finite and tunably penalized.
    /// Zero reproduces plain log credibilities.
    pub fn new(penalty_threshold: f64) -> Self {
        HipstrBuilder {
            penalty_threshold,
            credibility_cache: HashMap::new(),
        }
    }

    /// Runs the search over `system` and builds the optimal binary tree.
    ///
    /// Returns the tree and its total log credibility score. Best splits are
    /// recorded on the clade records as a side effect.
    pub fn build(&mut self, system: &mut CladeSystem) -> Result<(SummaryTree, f64)> {
        self.credibility_cache.clear();

        let root_key = Bitset::full(system.taxa().len());
        if system.get_clade(&root_key).is_none() {
            return Err(AnnotatorError::CladeNotFound {
                clade: system.describe_clade(&root_key),
            });
        }
        let score = self.find_best_subtrees(system, &root_key)?;
        let tree = build_tree(system, &root_key)?;
        Ok((tree, score))
    }

    /// Scores every clade reachable from `root_key`, bottom-up with an
    /// explicit work stack (sampled trees can be thousands of tips deep).
    ///
    /// The score of a clade is its own penalized log credibility plus the
    /// best sum of child subtree scores over all observed decompositions.
    /// Tips contribute nothing; a size-2 clade has exactly one decomposition
    /// into two tips. A clade seen only once carries no topological signal
    /// and is scored negative infinity so it can never outrank an observed
    /// alternative.
    fn find_best_subtrees(&mut self, system: &mut CladeSystem, root_key: &Bitset) -> Result<f64> {
        let mut stack: Vec<Bitset> = vec![root_key.clone()];

        while let Some(key) = stack.last().cloned() {
            if self.credibility_cache.contains_key(&key) {
                stack.pop();
                continue;
            }
            let (size, count, credibility, pairs) = {
                let clade =
                    system
                        .get_clade(&key)
                        .ok_or_else(|| AnnotatorError::CladeNotFound {
                            clade: system.describe_clade(&key),
                        })?;
                (
                    clade.size,
                    clade.count,
                    clade.credibility,
                    clade.sub_clades.clone(),
                )
            };

            let mut own_score = (credibility + self.penalty_threshold).ln();
            if count == 1 {
                own_score = f64::NEG_INFINITY;
            }

            if size == 2 {
                // The only decomposition is the two tips, which score zero.
                let split =
                    pairs
                        .first()
                        .cloned()
                        .ok_or_else(|| AnnotatorError::NoDecomposition {
                            clade: system.describe_clade(&key),
                            size,
                        })?;
                self.record(system, &key, split, own_score);
                stack.pop();
                continue;
            }

            if pairs.is_empty() {
                return Err(AnnotatorError::NoDecomposition {
                    clade: system.describe_clade(&key),
                    size,
                });
            }

            let mut pending: Vec<Bitset> = Vec::new();
            for (left, right) in &pairs {
                for child in [left, right] {
                    if child.count_ones() > 1 && !self.credibility_cache.contains_key(child) {
                        pending.push(child.clone());
                    }
                }
            }
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }

            // All children scored: keep the strictly best pair, first found
            // wins on exact ties.
            let mut best_split = pairs[0].clone();
            let mut best_sum = self.child_score(&best_split.0) + self.child_score(&best_split.1);
            for (left, right) in &pairs[1..] {
                let sum = self.child_score(left) + self.child_score(right);
                if sum > best_sum {
                    best_sum = sum;
                    best_split = (left.clone(), right.clone());
                }
            }
            self.record(system, &key, best_split, own_score + best_sum);
            stack.pop();
        }

        self.credibility_cache
            .get(root_key)
            .copied()
            .ok_or_else(|| AnnotatorError::CladeNotFound {
                clade: system.describe_clade(root_key),
            })
    }

    fn child_score(&self, child: &Bitset) -> f64 {
        if child.count_ones() > 1 {
            self.credibility_cache[child]
        } else {
            0.0
        }
    }

    fn record(
        &mut self,
        system: &mut CladeSystem,
        key: &Bitset,
        split: (Bitset, Bitset),
        score: f64,
    ) {
        if let Some(clade) = system.clade_mut(key) {
            clade.best_split = Some(split);
            clade.best_subtree_credibility = Some(score);
        }
        self.credibility_cache.insert(key.clone(), score);
    }
}

/// Expands the recorded best splits into a binary tree, from the root clade
/// down to the tips. Topology only; heights are assigned later by the
/// annotator.
fn build_tree(system: &CladeSystem, root_key: &Bitset) -> Result<SummaryTree> {
    let mut tree = SummaryTree::new();
    let mut stack: Vec<(Bitset, Option<usize>)> = vec![(root_key.clone(), None)];

    while let Some((key, parent)) = stack.pop() {
        let clade = system
            .get_clade(&key)
            .ok_or_else(|| AnnotatorError::CladeNotFound {
                clade: system.describe_clade(&key),
            })?;
        let idx = tree.add_node(parent);
        if parent.is_none() {
            tree.set_root(idx);
        }
        if clade.size == 1 {
            let taxon = clade
                .taxon
                .map(|t| system.taxa().name(t).to_string())
                .ok_or_else(|| AnnotatorError::CladeNotFound {
                    clade: system.describe_clade(&key),
                })?;
            tree.node_mut(idx).taxon = Some(taxon);
        } else {
            let (left, right) =
                clade
                    .best_split
                    .clone()
                    .ok_or_else(|| AnnotatorError::NoDecomposition {
                        clade: system.describe_clade(&key),
                        size: clade.size,
                    })?;
            stack.push((right, Some(idx)));
            stack.push((left, Some(idx)));
        }
    }
    Ok(tree)
}
