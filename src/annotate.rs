//! Writes posterior summary statistics onto the nodes of a target tree.
//!
//! Every node is matched to its clade in the registry by bipartition; the
//! clade's collected attribute samples are then reduced to summary
//! annotations. Numeric attributes get mean, median, HPD interval, range and
//! sign distribution; discrete attributes get a mode and a frequency table;
//! two-dimensional numeric arrays additionally get HPD contour regions.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::clades::CladeSystem;
use crate::contour;
use crate::error::{AnnotatorError, Result};
use crate::stats;
use crate::tree::{AttributeValue, SummaryTree};

/// How node heights of the target tree are summarized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeightsSummary {
    /// Leave the target tree's heights untouched.
    Keep,
    /// Mean of the sampled heights of the node's clade.
    Mean,
    /// Median of the sampled heights of the node's clade.
    Median,
    /// Leave heights to a later common-ancestor pass.
    CommonAncestor,
}

pub struct AnnotateOptions {
    pub heights: HeightsSummary,
    /// Nodes with posterior below this keep their `posterior` value but get
    /// no attribute statistics.
    pub posterior_limit: f64,
    /// Probability masses for bivariate HPD contour regions.
    pub hpd_2d: Vec<f64>,
    pub compute_ess: bool,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        AnnotateOptions {
            heights: HeightsSummary::Mean,
            posterior_limit: 0.0,
            hpd_2d: vec![0.80],
            compute_ess: false,
        }
    }
}

/// Annotates every node of `tree` from the registry's collected attributes.
///
/// Fails if any node's clade is missing from the registry; the stream and the
/// target must be over the same taxon set for the output to mean anything.
pub fn annotate_tree(
    system: &CladeSystem,
    tree: &mut SummaryTree,
    options: &AnnotateOptions,
) -> Result<()> {
    let codes = system.tree_clade_codes(tree)?;
    for idx in tree.post_order() {
        annotate_node(system, tree, idx, &codes[idx], options)?;
    }
    Ok(())
}

fn annotate_node(
    system: &CladeSystem,
    tree: &mut SummaryTree,
    idx: usize,
    code: &crate::bitset::Bitset,
    options: &AnnotateOptions,
) -> Result<()> {
    let clade = system
        .get_clade(code)
        .ok_or_else(|| AnnotatorError::CladeNotFound {
            clade: system.describe_clade(code),
        })?;

    let is_tip = tree.is_leaf(idx);
    let mut filter = false;
    if !is_tip {
        let posterior = clade.credibility;
        tree.set_attribute(idx, "posterior", AttributeValue::Real(posterior));
        if posterior < options.posterior_limit {
            filter = true;
        }
    }

    if clade.attribute_values.is_empty() {
        return Ok(());
    }

    for (pos, name) in system.attribute_names().iter().enumerate() {
        // The first occurrence decides the type; an attribute absent there is
        // not annotated at all.
        let Some(first) = clade.attribute_values[0].get(pos).and_then(|v| v.as_ref()) else {
            continue;
        };
        match first {
            AttributeValue::Real(_) | AttributeValue::Boolean(_) => {
                let is_boolean = matches!(first, AttributeValue::Boolean(_));
                let values: Vec<f64> = clade
                    .attribute_values
                    .iter()
                    .filter_map(|row| row[pos].as_ref().and_then(AttributeValue::as_real))
                    .collect();
                annotate_numeric(tree, idx, name, &values, is_boolean, filter, options);
            }
            AttributeValue::Discrete(_) => {
                if !filter {
                    let values = clade.attribute_values.iter().filter_map(|row| {
                        match row[pos].as_ref() {
                            Some(AttributeValue::Discrete(s)) => Some(s.as_str()),
                            _ => None,
                        }
                    });
                    annotate_discrete(tree, idx, name, values);
                }
            }
            AttributeValue::RealVector(v0) => {
                if !filter {
                    let len = v0.len();
                    let rows = clade.attribute_values.iter().filter_map(|row| {
                        match row[pos].as_ref() {
                            Some(AttributeValue::RealVector(v)) if v.len() == len => Some(v),
                            _ => None,
                        }
                    });
                    annotate_vector(tree, idx, name, len, rows, options);
                }
            }
            AttributeValue::Labels(_) => {}
        }
    }
    Ok(())
}

fn annotate_numeric(
    tree: &mut SummaryTree,
    idx: usize,
    name: &str,
    values: &[f64],
    is_boolean: bool,
    filter: bool,
    options: &AnnotateOptions,
) {
    if values.is_empty() {
        return;
    }

    // Heights are summarized onto the node itself even below the posterior
    // limit.
    if name == "height" {
        match options.heights {
            HeightsSummary::Mean => tree.node_mut(idx).height = stats::mean(values),
            HeightsSummary::Median => tree.node_mut(idx).height = stats::median(values),
            HeightsSummary::Keep | HeightsSummary::CommonAncestor => {}
        }
    }
    if filter {
        return;
    }

    tree.set_attribute(idx, name, AttributeValue::Real(stats::mean(values)));

    let (min, max) = stats::min_max(values);
    if !is_boolean && min < max {
        tree.set_attribute(
            idx,
            &format!("{name}_median"),
            AttributeValue::Real(stats::median(values)),
        );
        let (lower, upper) = stats::hpd_interval(0.95, values);
        tree.set_attribute(
            idx,
            &format!("{name}_95%_HPD"),
            AttributeValue::RealVector(vec![lower, upper]),
        );
        tree.set_attribute(
            idx,
            &format!("{name}_range"),
            AttributeValue::RealVector(vec![min, max]),
        );
        let negative = stats::negative_proportion(values);
        tree.set_attribute(
            idx,
            &format!("{name}_signDistribution"),
            AttributeValue::RealVector(vec![negative, 1.0 - negative]),
        );
        if options.compute_ess {
            tree.set_attribute(
                idx,
                &format!("{name}_ESS"),
                AttributeValue::Real(stats::effective_sample_size(values)),
            );
        }
    }
}

fn annotate_discrete<'a>(
    tree: &mut SummaryTree,
    idx: usize,
    name: &str,
    values: impl Iterator<Item = &'a str>,
) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return;
    }

    let max_count = counts.values().copied().max().unwrap_or(0);
    // Tied modes are joined with '+' in lexicographic order (the map is
    // sorted), and their counts pool into the reported probability.
    let modes: Vec<&str> = counts
        .iter()
        .filter(|&(_, &c)| c == max_count)
        .map(|(&v, _)| v)
        .collect();
    let mode_probability = (max_count * modes.len()) as f64 / total as f64;

    tree.set_attribute(idx, name, AttributeValue::Discrete(modes.join("+")));
    tree.set_attribute(
        idx,
        &format!("{name}.prob"),
        AttributeValue::Real(mode_probability),
    );
    tree.set_attribute(
        idx,
        &format!("{name}.set"),
        AttributeValue::Labels(counts.keys().map(|s| s.to_string()).collect()),
    );
    tree.set_attribute(
        idx,
        &format!("{name}.set.prob"),
        AttributeValue::RealVector(
            counts
                .values()
                .map(|&c| c as f64 / total as f64)
                .collect(),
        ),
    );
}

fn annotate_vector<'a>(
    tree: &mut SummaryTree,
    idx: usize,
    name: &str,
    len: usize,
    rows: impl Iterator<Item = &'a Vec<f64>>,
    options: &AnnotateOptions,
) {
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); len];
    for row in rows {
        for (k, &v) in row.iter().enumerate() {
            columns[k].push(v);
        }
    }
    if columns.iter().any(|c| c.is_empty()) {
        return;
    }

    let ranges: Vec<(f64, f64)> = columns.iter().map(|c| stats::min_max(c)).collect();
    let treat_as_location = len == 2;

    for (k, column) in columns.iter().enumerate() {
        let dim = format!("{}{}", name, k + 1);
        tree.set_attribute(idx, &dim, AttributeValue::Real(stats::mean(column)));

        let (min, max) = ranges[k];
        if min < max {
            tree.set_attribute(
                idx,
                &format!("{dim}_median"),
                AttributeValue::Real(stats::median(column)),
            );
            tree.set_attribute(
                idx,
                &format!("{dim}_range"),
                AttributeValue::RealVector(vec![min, max]),
            );
            tree.set_attribute(
                idx,
                &format!("{dim}_positiveProb"),
                AttributeValue::Real(1.0 - stats::negative_proportion(column)),
            );
            if !treat_as_location {
                let (lower, upper) = stats::hpd_interval(0.95, column);
                tree.set_attribute(
                    idx,
                    &format!("{dim}_95%_HPD"),
                    AttributeValue::RealVector(vec![lower, upper]),
                );
            }
        }
    }

    if !treat_as_location {
        return;
    }
    let varies_1 = ranges[0].0 < ranges[0].1;
    let varies_2 = ranges[1].0 < ranges[1].1;

    // With variation in only one dimension the region degenerates to a 1-D
    // interval on that axis.
    if varies_1 && !varies_2 {
        let (lower, upper) = stats::hpd_interval(0.95, &columns[0]);
        tree.set_attribute(
            idx,
            &format!("{name}1_95%_HPD"),
            AttributeValue::RealVector(vec![lower, upper]),
        );
    }
    if varies_2 && !varies_1 {
        let (lower, upper) = stats::hpd_interval(0.95, &columns[1]);
        tree.set_attribute(
            idx,
            &format!("{name}2_95%_HPD"),
            AttributeValue::RealVector(vec![lower, upper]),
        );
    }
    if varies_1 && varies_2 {
        for &mass in &options.hpd_2d {
            if !(0.0..=1.0).contains(&mass) {
                eprintln!("no HPD for proportion outside [0,1] ({mass})");
                continue;
            }
            annotate_2d_hpd(tree, idx, name, mass, &columns[0], &columns[1]);
        }
    }
}

fn annotate_2d_hpd(
    tree: &mut SummaryTree,
    idx: usize,
    name: &str,
    mass: f64,
    xs: &[f64],
    ys: &[f64],
) {
    let paths = contour::hpd_contours(xs, ys, mass);
    let percent = (mass * 100.0).round() as i64;
    let post = format!("_{percent}%HPD");

    tree.set_attribute(
        idx,
        &format!("{name}{post}_modality"),
        AttributeValue::Real(paths.len() as f64),
    );
    if paths.len() > 1 {
        eprintln!(
            "Warning: a node has a disjoint {percent}% HPD region. This may be an artifact!"
        );
        eprintln!("Try decreasing the enclosed mass or increasing the number of samples.");
    }

    for (i, path) in paths.iter().enumerate() {
        // Closed polygon: the first vertex is repeated at the end.
        let ring = |vs: &[f64]| {
            format!(
                "{{{}}}",
                vs.iter()
                    .chain(vs.first())
                    .map(|v| format!("{v:.8}"))
                    .join(",")
            )
        };
        tree.set_attribute(
            idx,
            &format!("{name}1{post}_{}", i + 1),
            AttributeValue::Discrete(ring(&path.xs)),
        );
        tree.set_attribute(
            idx,
            &format!("{name}2{post}_{}", i + 1),
            AttributeValue::Discrete(ring(&path.ys)),
        );
    }
}
