//! Orchestration of one summarization run.
//!
//! The posterior sample is streamed in separate sequential passes: once to
//! register clades and credibilities, once more to pick the target tree (for
//! MCC), once to collect per-clade attribute samples, and optionally once
//! more for common-ancestor heights. Only the registry and the single target
//! tree are ever held in memory.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::annotate::{self, AnnotateOptions, HeightsSummary};
use crate::ca_heights;
use crate::clades::{CladeSystem, TaxonSet};
use crate::error::{AnnotatorError, Result};
use crate::hipstr::HipstrBuilder;
use crate::io::{self, TreeStream};
use crate::scoring;
use crate::tree::SummaryTree;

/// How the target tree is obtained.
#[derive(Clone, Debug)]
pub enum SummaryTarget {
    /// The sampled tree with the highest log clade credibility.
    MaxCladeCredibility,
    /// The highest independent posterior subtree reconstruction.
    Hipstr,
    /// A user-supplied tree to annotate.
    UserTarget(PathBuf),
}

pub struct SummaryOptions {
    pub target: SummaryTarget,
    pub heights: HeightsSummary,
    pub posterior_limit: f64,
    pub hpd_2d: Vec<f64>,
    pub compute_ess: bool,
    /// Credibility penalty added before logs in the HIPSTR search.
    pub penalty_threshold: f64,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        SummaryOptions {
            target: SummaryTarget::MaxCladeCredibility,
            heights: HeightsSummary::Mean,
            posterior_limit: 0.0,
            hpd_2d: vec![0.80],
            compute_ess: false,
            penalty_threshold: 0.0,
        }
    }
}

/// Result of the clade counting pass.
pub struct CladePass {
    pub system: CladeSystem,
    /// All trees in the file, including burned-in ones.
    pub total_trees: usize,
    /// Trees past burn-in that entered the registry.
    pub trees_used: usize,
}

/// First pass: streams every tree into a fresh registry and computes clade
/// credibilities. The taxon ordering is fixed by the first tree.
pub fn read_clades(stream: &TreeStream) -> Result<CladePass> {
    let mut system: Option<CladeSystem> = None;
    let mut total_trees = 0usize;
    let mut trees_used = 0usize;

    for entry in stream.trees()? {
        let sampled = entry?;
        total_trees = sampled.index + 1;
        if system.is_none() {
            system = Some(CladeSystem::new(TaxonSet::from_tree(&sampled.tree)?));
        }
        if let Some(registry) = system.as_mut() {
            registry.add(&sampled.tree, true)?;
            trees_used += 1;
        }
    }

    let mut system = system.ok_or_else(|| no_trees_error(stream))?;
    system.calculate_clade_credibilities(trees_used)?;
    Ok(CladePass {
        system,
        total_trees,
        trees_used,
    })
}

fn no_trees_error(stream: &TreeStream) -> AnnotatorError {
    if stream.burnin_trees > 0 || stream.burnin_states > 0 {
        AnnotatorError::BurninExceedsSample
    } else {
        AnnotatorError::EmptyTreeFile(stream.path().to_path_buf())
    }
}

/// Result of the attribute collection pass.
pub struct AttributePass {
    pub system: CladeSystem,
    pub trees_used: usize,
    /// Highest MCMC state number seen, for reporting.
    pub max_state: u64,
}

/// Second pass: seeds a registry from the target tree's own clades, then
/// streams the sample through it collecting attribute snapshots. Attribute
/// names are "height", "length" and whatever the first streamed tree carries.
/// The seeding scan's extra count is undone before credibilities are
/// computed.
pub fn collect_attributes(
    stream: &TreeStream,
    taxa: &TaxonSet,
    target: &SummaryTree,
) -> Result<AttributePass> {
    let mut system = CladeSystem::from_target_tree(taxa.clone(), target)?;
    let mut trees_used = 0usize;
    let mut max_state = 0u64;

    for entry in stream.trees()? {
        let sampled = entry?;
        if trees_used == 0 {
            system.set_attribute_names(discover_attribute_names(&sampled.tree));
        }
        system.collect_attributes(&sampled.tree)?;
        max_state = max_state.max(sampled.state);
        trees_used += 1;
    }
    if trees_used == 0 {
        return Err(no_trees_error(stream));
    }
    system.remove_clades(target)?;
    system.calculate_clade_credibilities(trees_used)?;
    Ok(AttributePass {
        system,
        trees_used,
        max_state,
    })
}

fn discover_attribute_names(tree: &SummaryTree) -> Vec<String> {
    let mut names = vec!["height".to_string(), "length".to_string()];
    let mut extra: BTreeSet<&str> = BTreeSet::new();
    for idx in 0..tree.node_count() {
        for key in tree.node(idx).attributes.keys() {
            extra.insert(key);
        }
    }
    names.extend(
        extra
            .into_iter()
            .filter(|k| *k != "height" && *k != "length")
            .map(str::to_string),
    );
    names
}

/// Statistics of a completed run.
pub struct SummaryReport {
    pub total_trees: usize,
    pub trees_used: usize,
    pub taxon_count: usize,
    pub unique_clades: usize,
    /// Log clade credibility of the target tree, when one was searched for.
    pub target_score: Option<f64>,
    /// One-based sample position of the MCC tree.
    pub mcc_tree_number: Option<usize>,
}

/// Runs the whole summarization and returns the annotated target tree, the
/// taxon ordering for serialization, and run statistics.
pub fn summarize(
    stream: &TreeStream,
    options: &SummaryOptions,
) -> Result<(SummaryTree, TaxonSet, SummaryReport)> {
    let mut report = SummaryReport {
        total_trees: 0,
        trees_used: 0,
        taxon_count: 0,
        unique_clades: 0,
        target_score: None,
        mcc_tree_number: None,
    };

    let (mut target, taxa) = match &options.target {
        SummaryTarget::UserTarget(path) => {
            let target = io::read_target_tree(path)?;
            let taxa = TaxonSet::from_tree(&target)?;
            (target, taxa)
        }
        SummaryTarget::MaxCladeCredibility => {
            let pass = read_clades(stream)?;
            report.total_trees = pass.total_trees;
            report.trees_used = pass.trees_used;
            report.unique_clades = pass.system.clade_count();
            let taxa = pass.system.taxa().clone();
            let mcc = scoring::find_mcc_tree(stream, &pass.system)?;
            report.target_score = Some(mcc.score);
            report.mcc_tree_number = Some(mcc.tree_number);
            (mcc.tree, taxa)
        }
        SummaryTarget::Hipstr => {
            let mut pass = read_clades(stream)?;
            report.total_trees = pass.total_trees;
            report.trees_used = pass.trees_used;
            report.unique_clades = pass.system.clade_count();
            let taxa = pass.system.taxa().clone();
            let mut builder = HipstrBuilder::new(options.penalty_threshold);
            let (tree, score) = builder.build(&mut pass.system)?;
            report.target_score = Some(score);
            (tree, taxa)
        }
    };
    report.taxon_count = taxa.len();

    let attributes = collect_attributes(stream, &taxa, &target)?;
    if report.trees_used == 0 {
        report.trees_used = attributes.trees_used;
    }

    let annotate_options = AnnotateOptions {
        heights: options.heights,
        posterior_limit: options.posterior_limit,
        hpd_2d: options.hpd_2d.clone(),
        compute_ess: options.compute_ess,
    };
    annotate::annotate_tree(&attributes.system, &mut target, &annotate_options)?;

    if options.heights == HeightsSummary::CommonAncestor {
        ca_heights::set_heights_by_common_ancestor(stream, &taxa, &mut target)?;
    }

    Ok((target, taxa, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::parse_newick;

    #[test]
    fn test_discovered_names_are_stable() {
        let mut t = parse_newick("((A,B),C);", false).unwrap();
        let root = t.root();
        t.set_attribute(root, "rate", crate::tree::AttributeValue::Real(1.0));
        t.set_attribute(root, "state", crate::tree::AttributeValue::Discrete("x".into()));
        let names = discover_attribute_names(&t);
        assert_eq!(names, vec!["height", "length", "rate", "state"]);
    }
}
