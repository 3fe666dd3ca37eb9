//! Error types for posterior tree summarization.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading tree logs, accumulating clades or building the
/// summary tree.
///
/// Taxon and clade mismatches indicate inconsistent input (trees over
/// different taxon sets); a missing clade or decomposition after the counting
/// pass indicates a pipeline bug and is never silently skipped.
#[derive(Debug, Error)]
pub enum AnnotatorError {
    /// A tree in the stream names a taxon the first tree did not contain.
    #[error("unknown taxon '{taxon}' in tree sample")]
    UnknownTaxon { taxon: String },

    /// A tree in the stream has a different number of tips than the first tree.
    #[error("tree has {found} taxa but the sample is over {expected} taxa")]
    TaxonCountMismatch { expected: usize, found: usize },

    /// The same taxon label appears on two tips of one tree.
    #[error("duplicate taxon label '{0}'")]
    DuplicateTaxon(String),

    /// A clade required by the target tree was never registered.
    #[error("clade {{{clade}}} was never observed in the posterior sample")]
    CladeNotFound { clade: String },

    /// A multi-taxon clade has no recorded bifurcation into observed sub-clades.
    #[error("clade {{{clade}}} of {size} taxa has no observed decomposition")]
    NoDecomposition { clade: String, size: usize },

    /// The input file yielded no trees at all.
    #[error("no trees in input file {0}")]
    EmptyTreeFile(PathBuf),

    /// Burn-in removed every tree in the sample.
    #[error("no trees to use: burn-in greater than number of trees in input file")]
    BurninExceedsSample,

    /// Credibilities were requested over an empty sample.
    #[error("clade credibilities require at least one sampled tree")]
    NoTreesUsed,

    /// Malformed tree text in the input stream.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Failure while importing a user-supplied target tree.
    #[error("target tree: {0}")]
    TargetTree(#[from] phylotree::tree::TreeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AnnotatorError>;
