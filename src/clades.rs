//! Clade registry accumulated over a stream of posterior trees.
//!
//! The registry maps every bipartition (as a [`Bitset`] over a fixed taxon
//! ordering) to a [`Clade`] record with its occurrence count, credibility,
//! observed parent/child decompositions and collected attribute samples.
//! Trees are streamed through it one at a time, so memory is bounded by the
//! number of distinct clades rather than the number of sampled trees.

use std::collections::HashMap;

use itertools::Itertools;

use crate::bitset::Bitset;
use crate::error::{AnnotatorError, Result};
use crate::tree::{AttributeValue, SummaryTree};

/// The fixed taxon ordering of one analysis.
///
/// Tips are indexed by the rank of their label in the sorted label list, so
/// the same taxa always map to the same bit positions no matter how a
/// particular tree file numbers its nodes.
#[derive(Clone, Debug)]
pub struct TaxonSet {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl TaxonSet {
    /// Builds the taxon ordering from the tips of the first streamed tree.
    pub fn from_tree(tree: &SummaryTree) -> Result<Self> {
        let mut names: Vec<String> = tree.leaf_taxa().map(str::to_string).collect();
        names.sort();
        for (a, b) in names.iter().tuple_windows() {
            if a == b {
                return Err(AnnotatorError::DuplicateTaxon(a.clone()));
            }
        }
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Ok(TaxonSet { names, index })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// A clade record: one bipartition and everything accumulated about it.
#[derive(Clone, Debug)]
pub struct Clade {
    pub key: Bitset,
    /// Number of tips in the clade.
    pub size: usize,
    /// Number of posterior trees in which the clade occurred.
    pub count: usize,
    /// `count / totalTreesUsed`, filled by
    /// [`CladeSystem::calculate_clade_credibilities`].
    pub credibility: f64,
    /// Taxon index, set for size-1 clades only.
    pub taxon: Option<usize>,
    /// Observed decompositions into two child clades, deduplicated with the
    /// smaller child first.
    pub sub_clades: Vec<(Bitset, Bitset)>,
    /// One attribute snapshot per posterior tree the clade occurred in,
    /// aligned by position to the registry's attribute names.
    pub attribute_values: Vec<Vec<Option<AttributeValue>>>,
    /// Optimal decomposition, filled by the best-subtree search.
    pub best_split: Option<(Bitset, Bitset)>,
    /// Log credibility of the optimal subtree rooted here.
    pub best_subtree_credibility: Option<f64>,
}

impl Clade {
    fn new(key: Bitset, taxon: Option<usize>) -> Self {
        let size = key.count_ones();
        Clade {
            key,
            size,
            count: 0,
            credibility: 0.0,
            taxon,
            sub_clades: Vec::new(),
            attribute_values: Vec::new(),
            best_split: None,
            best_subtree_credibility: None,
        }
    }
}

/// Orders a child pair deterministically: smaller clade first, ties broken by
/// the bit pattern. Swapping left and right children of a node therefore
/// never produces a second entry for the same decomposition.
fn ordered_pair(a: Bitset, b: Bitset) -> (Bitset, Bitset) {
    let (sa, sb) = (a.count_ones(), b.count_ones());
    if sa < sb || (sa == sb && a <= b) {
        (a, b)
    } else {
        (b, a)
    }
}

/// Registry of all clades observed across a sample of trees.
pub struct CladeSystem {
    taxa: TaxonSet,
    clades: HashMap<Bitset, Clade>,
    attribute_names: Vec<String>,
}

impl CladeSystem {
    pub fn new(taxa: TaxonSet) -> Self {
        CladeSystem {
            taxa,
            clades: HashMap::new(),
            attribute_names: Vec::new(),
        }
    }

    /// Builds a registry seeded from the target tree itself.
    ///
    /// The seeding scan counts the target tree as if it were one more
    /// posterior sample; callers that stream real samples through
    /// [`collect_attributes`](Self::collect_attributes) afterwards must undo
    /// that extra count with [`remove_clades`](Self::remove_clades) before
    /// computing credibilities.
    pub fn from_target_tree(taxa: TaxonSet, tree: &SummaryTree) -> Result<Self> {
        let mut system = CladeSystem::new(taxa);
        system.add(tree, true)?;
        Ok(system)
    }

    pub fn taxa(&self) -> &TaxonSet {
        &self.taxa
    }

    pub fn clade_count(&self) -> usize {
        self.clades.len()
    }

    pub fn get_clade(&self, key: &Bitset) -> Option<&Clade> {
        self.clades.get(key)
    }

    pub(crate) fn clade_mut(&mut self, key: &Bitset) -> Option<&mut Clade> {
        self.clades.get_mut(key)
    }

    /// The clade spanning the full taxon set, if it has been registered.
    pub fn root_clade(&self) -> Option<&Clade> {
        self.clades.get(&Bitset::full(self.taxa.len()))
    }

    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_names
    }

    pub fn set_attribute_names(&mut self, names: Vec<String>) {
        self.attribute_names = names;
    }

    /// Readable taxon list for a clade key, used in error messages.
    pub fn describe_clade(&self, key: &Bitset) -> String {
        key.iter_ones().map(|i| self.taxa.name(i)).join(",")
    }

    /// The clade bitset of every node of `tree`, indexed by node index.
    ///
    /// Computed bottom-up in post-order: tips seed their own singleton bit,
    /// internal nodes take the union of their children. Fails if the tree is
    /// not over this registry's taxon set.
    pub fn tree_clade_codes(&self, tree: &SummaryTree) -> Result<Vec<Bitset>> {
        let num_taxa = self.taxa.len();
        let mut codes = vec![Bitset::for_taxa(num_taxa); tree.node_count()];
        let mut leaves_seen = 0usize;
        for idx in tree.post_order() {
            let node = tree.node(idx);
            if node.is_leaf() {
                leaves_seen += 1;
                let taxon = node.taxon.as_deref().unwrap_or_default();
                let bit = self
                    .taxa
                    .index_of(taxon)
                    .ok_or_else(|| AnnotatorError::UnknownTaxon {
                        taxon: taxon.to_string(),
                    })?;
                codes[idx].set(bit);
            } else {
                let mut bits = Bitset::for_taxa(num_taxa);
                for &child in &node.children {
                    bits.or_assign(&codes[child]);
                }
                codes[idx] = bits;
            }
        }
        if leaves_seen != num_taxa {
            return Err(AnnotatorError::TaxonCountMismatch {
                expected: num_taxa,
                found: leaves_seen,
            });
        }
        Ok(codes)
    }

    /// Registers every clade of `tree`, incrementing occurrence counts and
    /// recording the parent/child decomposition of each bifurcating node.
    ///
    /// When `include_tips` is false, size-1 clades are not counted (their
    /// bitsets still appear inside parent decompositions).
    pub fn add(&mut self, tree: &SummaryTree, include_tips: bool) -> Result<()> {
        let codes = self.tree_clade_codes(tree)?;
        for idx in tree.post_order() {
            let node = tree.node(idx);
            if node.is_leaf() && !include_tips {
                continue;
            }
            let taxon = if node.is_leaf() {
                self.taxa.index_of(node.taxon.as_deref().unwrap_or_default())
            } else {
                None
            };
            let clade = self
                .clades
                .entry(codes[idx].clone())
                .or_insert_with(|| Clade::new(codes[idx].clone(), taxon));
            clade.count += 1;
            if node.children.len() == 2 {
                let pair = ordered_pair(
                    codes[node.children[0]].clone(),
                    codes[node.children[1]].clone(),
                );
                if !clade.sub_clades.contains(&pair) {
                    clade.sub_clades.push(pair);
                }
            }
        }
        Ok(())
    }

    /// Sets `credibility = count / total_trees` on every registered clade.
    pub fn calculate_clade_credibilities(&mut self, total_trees: usize) -> Result<()> {
        if total_trees == 0 {
            return Err(AnnotatorError::NoTreesUsed);
        }
        for clade in self.clades.values_mut() {
            clade.credibility = clade.count as f64 / total_trees as f64;
        }
        Ok(())
    }

    /// Streams one posterior tree through the registry, appending an
    /// attribute snapshot (and one occurrence count) to every clade of the
    /// tree that is already registered. Clades absent from the registry are
    /// ignored, which keeps an attribute pass seeded from a target tree
    /// bounded by the target's own clades.
    pub fn collect_attributes(&mut self, tree: &SummaryTree) -> Result<()> {
        let codes = self.tree_clade_codes(tree)?;
        for idx in tree.post_order() {
            let Some(clade) = self.clades.get_mut(&codes[idx]) else {
                continue;
            };
            clade.count += 1;
            let node = tree.node(idx);
            let snapshot = self
                .attribute_names
                .iter()
                .map(|name| match name.as_str() {
                    "height" => Some(AttributeValue::Real(node.height)),
                    "length" => node.length.map(AttributeValue::Real),
                    _ => node.attributes.get(name).cloned(),
                })
                .collect();
            clade.attribute_values.push(snapshot);
        }
        Ok(())
    }

    /// Exactly undoes one [`add`](Self::add) (or the seeding scan of
    /// [`from_target_tree`](Self::from_target_tree)) of `tree`: every clade
    /// of the tree loses one occurrence count. Records are kept even at zero
    /// so a target clade never observed in the sample still annotates with
    /// posterior 0 instead of failing the lookup.
    pub fn remove_clades(&mut self, tree: &SummaryTree) -> Result<()> {
        let codes = self.tree_clade_codes(tree)?;
        for idx in tree.post_order() {
            if let Some(clade) = self.clades.get_mut(&codes[idx]) {
                clade.count = clade.count.saturating_sub(1);
            }
        }
        Ok(())
    }
}
