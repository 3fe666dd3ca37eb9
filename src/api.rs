//! Python binding layer for posterior tree summarization.
//!
//! Provides Python functions for building an annotated summary tree from a
//! BEAST/NEXUS tree log.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::annotate::HeightsSummary;
use crate::io::{self, TreeStream};
use crate::summary::{self, SummaryOptions, SummaryTarget};

fn parse_target(summary: &str, target_tree: Option<String>) -> PyResult<SummaryTarget> {
    if let Some(path) = target_tree {
        return Ok(SummaryTarget::UserTarget(path.into()));
    }
    match summary.to_ascii_lowercase().as_str() {
        "mcc" => Ok(SummaryTarget::MaxCladeCredibility),
        "hipstr" => Ok(SummaryTarget::Hipstr),
        other => Err(PyValueError::new_err(format!(
            "unknown summary type '{other}' (expected 'mcc' or 'hipstr')"
        ))),
    }
}

fn parse_heights(heights: &str) -> PyResult<HeightsSummary> {
    match heights.to_ascii_lowercase().as_str() {
        "keep" => Ok(HeightsSummary::Keep),
        "mean" => Ok(HeightsSummary::Mean),
        "median" => Ok(HeightsSummary::Median),
        "ca" => Ok(HeightsSummary::CommonAncestor),
        other => Err(PyValueError::new_err(format!(
            "unknown heights option '{other}' (expected 'keep', 'mean', 'median' or 'ca')"
        ))),
    }
}

/// Build an annotated summary tree from a BEAST/NEXUS tree log.
///
/// Args:
///     path: Path to the .trees (NEXUS) file, optionally gzipped
///     burnin_trees: Number of trees to skip at the beginning (default: 0)
///     burnin_states: Minimum STATE value to keep trees (default: 0)
///     summary: 'mcc' or 'hipstr' (default: 'mcc')
///     target_tree: Path to a user target tree to annotate instead
///     heights: 'keep', 'mean', 'median' or 'ca' (default: 'mean')
///     posterior_limit: Minimum posterior for node statistics (default: 0.0)
///     penalty: HIPSTR credibility penalty threshold (default: 0.0)
///
/// Returns:
///     The annotated tree as a NEXUS document string.
///
/// Raises:
///     ValueError: If the log cannot be read or the summary fails.
#[pyfunction]
#[pyo3(signature = (path, burnin_trees=0, burnin_states=0, summary="mcc", target_tree=None, heights="mean", posterior_limit=0.0, penalty=0.0))]
#[allow(clippy::too_many_arguments)]
fn summarize_trees(
    path: String,
    burnin_trees: usize,
    burnin_states: u64,
    summary: &str,
    target_tree: Option<String>,
    heights: &str,
    posterior_limit: f64,
    penalty: f64,
) -> PyResult<String> {
    let stream = TreeStream::new(&path).with_burnin(burnin_trees, burnin_states);
    let options = SummaryOptions {
        target: parse_target(summary, target_tree)?,
        heights: parse_heights(heights)?,
        posterior_limit,
        penalty_threshold: penalty,
        ..SummaryOptions::default()
    };

    let (tree, taxa, _report) = summary::summarize(&stream, &options)
        .map_err(|e| PyValueError::new_err(format!("Failed to summarize '{path}': {e}")))?;

    let mut out = Vec::new();
    io::write_nexus(&mut out, &taxa, &tree)
        .map_err(|e| PyValueError::new_err(format!("Failed to serialize tree: {e}")))?;
    String::from_utf8(out).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Log clade credibility score of every tree in the sample.
///
/// Args:
///     path: Path to the .trees (NEXUS) file, optionally gzipped
///     burnin_trees: Number of trees to skip at the beginning (default: 0)
///     burnin_states: Minimum STATE value to keep trees (default: 0)
///
/// Returns:
///     A list of per-tree log clade credibility scores, in sample order.
///
/// Raises:
///     ValueError: If no trees are found or the log cannot be parsed.
#[pyfunction]
#[pyo3(signature = (path, burnin_trees=0, burnin_states=0))]
fn clade_credibility_scores(
    path: String,
    burnin_trees: usize,
    burnin_states: u64,
) -> PyResult<Vec<f64>> {
    let stream = TreeStream::new(&path).with_burnin(burnin_trees, burnin_states);
    let pass = summary::read_clades(&stream)
        .map_err(|e| PyValueError::new_err(format!("Failed to read '{path}': {e}")))?;

    let mut scores = Vec::with_capacity(pass.trees_used);
    let iter = stream
        .trees()
        .map_err(|e| PyValueError::new_err(format!("Failed to reopen '{path}': {e}")))?;
    for entry in iter {
        let sampled = entry.map_err(|e| PyValueError::new_err(e.to_string()))?;
        let score = crate::scoring::log_clade_credibility(&pass.system, &sampled.tree, false)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        scores.push(score);
    }
    Ok(scores)
}

/// Python module definition
#[pymodule]
fn rust_tree_annotator(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(summarize_trees, m)?)?;
    m.add_function(wrap_pyfunction!(clade_credibility_scores, m)?)?;
    Ok(())
}
