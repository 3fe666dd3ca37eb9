//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `bitset`: compact bitset keys for clades.
//! - `tree`: arena tree structure and typed node attributes.
//! - `clades`: the clade registry accumulated over a posterior tree stream.
//! - `scoring`: log clade credibility and MCC tree selection.
//! - `hipstr`: highest independent posterior subtree reconstruction.
//! - `annotate`: writing summary statistics onto the target tree.
//! - `ca_heights`: common-ancestor node height assignment.
//! - `stats`: mean / median / HPD / ESS helpers.
//! - `contour`: bivariate HPD regions via kernel density estimation.
//! - `io`: BEAST/NEXUS tree stream reading and NEXUS export.
//! - `summary`: multi-pass run orchestration.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).
//!
//! Public API kept stable by re-exporting key items from the modules.

pub mod annotate;
pub mod bitset;
pub mod ca_heights;
pub mod clades;
pub mod contour;
pub mod error;
pub mod hipstr;
pub mod io;
pub mod scoring;
pub mod stats;
pub mod summary;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use annotate::{AnnotateOptions, HeightsSummary};
pub use bitset::Bitset;
pub use clades::{Clade, CladeSystem, TaxonSet};
pub use error::{AnnotatorError, Result};
pub use hipstr::HipstrBuilder;
pub use io::{TreeStream, parse_newick, read_target_tree, write_nexus_file};
pub use summary::{SummaryOptions, SummaryTarget, summarize};
pub use tree::{AttributeValue, SummaryTree};
