//! End-to-end summarization over a synthetic posterior sample.

use std::fs;
use std::path::PathBuf;

use rust_tree_annotator::annotate::HeightsSummary;
use rust_tree_annotator::io::TreeStream;
use rust_tree_annotator::summary::{SummaryOptions, SummaryTarget, summarize};
use rust_tree_annotator::tree::{AttributeValue, SummaryTree};

/// Four taxa, three sampled trees: ((A,B),(C,D)) twice at different scales
/// and ((A,C),(B,D)) once. The {A,B} and {C,D} clades have posterior 2/3.
const TREE_LOG: &str = "#NEXUS\n\
Begin taxa;\n\
\tDimensions ntax=4;\n\
\tTaxlabels\n\
\t\tA\n\t\tB\n\t\tC\n\t\tD\n\t\t;\n\
End;\n\
Begin trees;\n\
\tTranslate\n\
\t\t1 A,\n\
\t\t2 B,\n\
\t\t3 C,\n\
\t\t4 D\n\
\t\t;\n\
tree STATE_0 = [&R] ((1[&rate=0.2]:1,2[&rate=0.3]:1)[&rate=0.5]:1,(3:1,4:1)[&rate=0.6]:1)[&rate=0.9];\n\
tree STATE_1000 = [&R] ((1[&rate=0.4]:2,2[&rate=0.5]:2)[&rate=0.7]:2,(3:2,4:2)[&rate=0.8]:2)[&rate=1.1];\n\
tree STATE_2000 = [&R] ((1[&rate=0.6]:1,3[&rate=0.7]:1)[&rate=0.9]:1,(2:1,4:1)[&rate=1.0]:1)[&rate=1.3];\n\
End;\n";

fn fixture(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("tree-annotate-e2e-{}-{name}", std::process::id()));
    fs::write(&path, TREE_LOG).unwrap();
    path
}

fn internal_clades(tree: &SummaryTree) -> Vec<Vec<String>> {
    let mut clades = Vec::new();
    for idx in tree.post_order() {
        if tree.is_leaf(idx) {
            continue;
        }
        let mut taxa = Vec::new();
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            let node = tree.node(i);
            if node.is_leaf() {
                taxa.push(node.taxon.clone().unwrap());
            } else {
                stack.extend(&node.children);
            }
        }
        taxa.sort();
        clades.push(taxa);
    }
    clades.sort();
    clades
}

fn find_clade(tree: &SummaryTree, taxa: &[&str]) -> usize {
    for idx in tree.post_order() {
        let mut found = Vec::new();
        let mut stack = vec![idx];
        while let Some(i) = stack.pop() {
            let node = tree.node(i);
            if node.is_leaf() {
                found.push(node.taxon.clone().unwrap());
            } else {
                stack.extend(&node.children);
            }
        }
        found.sort();
        if found == taxa {
            return idx;
        }
    }
    panic!("clade {taxa:?} not in tree");
}

fn posterior(tree: &SummaryTree, idx: usize) -> f64 {
    match tree.node(idx).attributes.get("posterior") {
        Some(AttributeValue::Real(p)) => *p,
        other => panic!("missing posterior: {other:?}"),
    }
}

#[test]
fn hipstr_summary_reconstructs_majority_topology() {
    let path = fixture("hipstr.trees");
    let stream = TreeStream::new(&path);
    let options = SummaryOptions {
        target: SummaryTarget::Hipstr,
        ..SummaryOptions::default()
    };

    let (tree, taxa, report) = summarize(&stream, &options).unwrap();

    assert_eq!(report.total_trees, 3);
    assert_eq!(report.trees_used, 3);
    assert_eq!(report.taxon_count, 4);
    assert_eq!(taxa.len(), 4);

    // The majority splits {A,B} and {C,D} must both be in the summary.
    assert_eq!(
        internal_clades(&tree),
        vec![
            vec!["A".to_string(), "B".to_string()],
            vec![
                "A".to_string(),
                "B".to_string(),
                "C".to_string(),
                "D".to_string()
            ],
            vec!["C".to_string(), "D".to_string()],
        ]
    );

    let ab = find_clade(&tree, &["A", "B"]);
    assert!((posterior(&tree, ab) - 2.0 / 3.0).abs() < 1e-12);
    assert_eq!(posterior(&tree, tree.root()), 1.0);

    // ln(1) + ln(2/3) + ln(2/3)
    let expected = 2.0 * (2.0f64 / 3.0).ln();
    assert!((report.target_score.unwrap() - expected).abs() < 1e-12);

    // Mean heights: {A,B} observed at heights 1 and 2.
    assert!((tree.node(ab).height - 1.5).abs() < 1e-12);
    // Root observed at heights 2, 4, 2.
    assert!((tree.node(tree.root()).height - 8.0 / 3.0).abs() < 1e-12);

    // The rate trait was collected on the {A,B} clade in two trees.
    assert_eq!(
        tree.node(ab).attributes.get("rate"),
        Some(&AttributeValue::Real(0.6))
    );

    fs::remove_file(&path).ok();
}

#[test]
fn mcc_summary_picks_a_majority_sample() {
    let path = fixture("mcc.trees");
    let stream = TreeStream::new(&path);
    let options = SummaryOptions {
        target: SummaryTarget::MaxCladeCredibility,
        ..SummaryOptions::default()
    };

    let (tree, _taxa, report) = summarize(&stream, &options).unwrap();

    // Both ((A,B),(C,D)) samples score 2·ln(2/3); the first one wins the tie.
    assert_eq!(report.mcc_tree_number, Some(1));
    let expected = 2.0 * (2.0f64 / 3.0).ln();
    assert!((report.target_score.unwrap() - expected).abs() < 1e-12);

    let ab = find_clade(&tree, &["A", "B"]);
    assert!((posterior(&tree, ab) - 2.0 / 3.0).abs() < 1e-12);

    fs::remove_file(&path).ok();
}

#[test]
fn burnin_by_state_drops_early_samples() {
    let path = fixture("burnin.trees");
    let stream = TreeStream::new(&path).with_burnin(0, 500);
    let options = SummaryOptions {
        target: SummaryTarget::Hipstr,
        ..SummaryOptions::default()
    };

    let (tree, _taxa, report) = summarize(&stream, &options).unwrap();

    // Only STATE_1000 and STATE_2000 survive; each clade was seen once, so
    // every candidate scores -inf but a tree is still produced.
    assert_eq!(report.trees_used, 2);
    assert_eq!(tree.leaf_count(), 4);

    fs::remove_file(&path).ok();
}

#[test]
fn common_ancestor_heights_average_over_sample() {
    let path = fixture("ca.trees");
    let stream = TreeStream::new(&path);
    let options = SummaryOptions {
        target: SummaryTarget::Hipstr,
        heights: HeightsSummary::CommonAncestor,
        ..SummaryOptions::default()
    };

    let (tree, _taxa, _report) = summarize(&stream, &options).unwrap();

    // {A,B}: heights 1, 2 where monophyletic, root height 2 in the third
    // tree where it is not. Mean (1 + 2 + 2) / 3.
    let ab = find_clade(&tree, &["A", "B"]);
    assert!((tree.node(ab).height - 5.0 / 3.0).abs() < 1e-12);

    // Root: (2 + 4 + 2) / 3.
    assert!((tree.node(tree.root()).height - 8.0 / 3.0).abs() < 1e-12);

    // Tips sit at height 0 in every sample.
    for idx in tree.post_order() {
        if tree.is_leaf(idx) {
            assert_eq!(tree.node(idx).height, 0.0);
        }
    }

    fs::remove_file(&path).ok();
}
