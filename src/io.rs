//! Reading BEAST/NEXUS tree logs and writing the annotated summary tree.
//!
//! The stream reader is line based and lazy: a `.trees` log (optionally
//! gzipped) is scanned tree by tree, so a pass over hundreds of thousands of
//! sampled trees never holds more than one tree in memory. Reopening the same
//! file re-yields the identical sequence, which the multi-pass summarization
//! relies on.
//!
//! BEAST embeds node metadata as `[&name=value,...]` comments inside the
//! Newick strings. phylotree cannot keep those, so the stream parser here is
//! annotation aware; phylotree is still used to import user-supplied target
//! trees, which carry no annotations.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use itertools::Itertools;
use phylotree::tree::Tree as PhyloTree;

use crate::clades::TaxonSet;
use crate::error::{AnnotatorError, Result};
use crate::tree::{AttributeValue, SummaryTree};

/// Strip BEAST annotations from Newick strings.
///
/// BEAST format includes annotations like `:[&rate=0.123]2.45` where 2.45 is
/// the actual branch length. This removes the `[&...]` annotations while
/// preserving the branch lengths, for the phylotree-based target tree import.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

fn extract_state(header: &str) -> u64 {
    if let Some(start) = header.to_ascii_uppercase().find("STATE_") {
        let num_start = start + 6; // length of "STATE_"
        let rest = &header[num_start..];
        let state = rest
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>();
        if let Ok(num) = state.parse::<u64>() {
            return num;
        }
    }
    0
}

fn parse_error(message: impl Into<String>) -> AnnotatorError {
    AnnotatorError::Parse {
        line: 0,
        message: message.into(),
    }
}

/// Splits at `sep` occurrences that sit outside braces, brackets and quotes.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => quote = Some(c),
                '{' | '[' => depth += 1,
                '}' | ']' => depth -= 1,
                c if c == sep && depth == 0 => {
                    parts.push(&text[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&text[start..]);
    parts
}

fn unquote(text: &str) -> &str {
    let t = text.trim();
    if t.len() >= 2
        && ((t.starts_with('"') && t.ends_with('"')) || (t.starts_with('\'') && t.ends_with('\'')))
    {
        &t[1..t.len() - 1]
    } else {
        t
    }
}

/// One `name=value` annotation value, typed by inspection.
///
/// Braced lists of numbers become vectors; anything braced that does not
/// parse as numbers is kept verbatim as a string. With `force_discrete`,
/// integer literals are kept as labels instead of numbers.
fn parse_value(text: &str, force_discrete: bool) -> AttributeValue {
    let v = text.trim();
    if v.starts_with('{') && v.ends_with('}') && v.len() >= 2 {
        let inner = &v[1..v.len() - 1];
        let numbers: Option<Vec<f64>> = split_top_level(inner, ',')
            .iter()
            .map(|p| p.trim().parse::<f64>().ok())
            .collect();
        return match numbers {
            Some(values) if !values.is_empty() => AttributeValue::RealVector(values),
            _ => AttributeValue::Discrete(v.to_string()),
        };
    }
    if v.eq_ignore_ascii_case("true") {
        return AttributeValue::Boolean(true);
    }
    if v.eq_ignore_ascii_case("false") {
        return AttributeValue::Boolean(false);
    }
    if v.starts_with('"') || v.starts_with('\'') {
        return AttributeValue::Discrete(unquote(v).to_string());
    }
    if let Ok(number) = v.parse::<f64>() {
        let integral = !v.contains(['.', 'e', 'E']);
        if integral && force_discrete {
            return AttributeValue::Discrete(v.to_string());
        }
        return AttributeValue::Real(number);
    }
    AttributeValue::Discrete(v.to_string())
}

/// Parses the inside of a `[&...]` comment (without the `&`) into attribute
/// pairs. A bare name with no value is a true flag.
fn parse_annotation(text: &str, force_discrete: bool) -> Vec<(String, AttributeValue)> {
    split_top_level(text, ',')
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .map(|part| match part.find('=') {
            Some(eq) => (
                part[..eq].trim().to_string(),
                parse_value(&part[eq + 1..], force_discrete),
            ),
            None => (part.trim().to_string(), AttributeValue::Boolean(true)),
        })
        .collect()
}

fn read_bracket(chars: &[char], pos: &mut usize) -> Result<String> {
    // chars[*pos] == '['
    let mut inner = String::new();
    *pos += 1;
    while *pos < chars.len() {
        let c = chars[*pos];
        *pos += 1;
        if c == ']' {
            return Ok(inner);
        }
        inner.push(c);
    }
    Err(parse_error("unterminated '[' comment"))
}

fn read_label(chars: &[char], pos: &mut usize) -> Result<String> {
    let mut label = String::new();
    if chars[*pos] == '\'' {
        *pos += 1;
        while *pos < chars.len() {
            let c = chars[*pos];
            *pos += 1;
            if c == '\'' {
                return Ok(label);
            }
            label.push(c);
        }
        return Err(parse_error("unterminated quoted label"));
    }
    while *pos < chars.len() {
        let c = chars[*pos];
        if c.is_whitespace() || matches!(c, ',' | '(' | ')' | ':' | ';' | '[') {
            break;
        }
        label.push(c);
        *pos += 1;
    }
    Ok(label)
}

fn read_number(chars: &[char], pos: &mut usize) -> Result<f64> {
    let mut text = String::new();
    while *pos < chars.len() && matches!(chars[*pos], '0'..='9' | '+' | '-' | '.' | 'e' | 'E') {
        text.push(chars[*pos]);
        *pos += 1;
    }
    text.parse::<f64>()
        .map_err(|_| parse_error(format!("invalid branch length '{text}'")))
}

/// Parses one annotated Newick string into a [`SummaryTree`].
///
/// Node and branch `[&...]` comments are merged into the node's attribute
/// map. The scan is iterative; ladder trees of any depth parse in constant
/// stack space.
pub fn parse_newick(text: &str, force_discrete: bool) -> Result<SummaryTree> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut pos = 0usize;

    let mut tree = SummaryTree::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut current: Option<usize> = None;
    let mut root: Option<usize> = None;

    while pos < n {
        let c = chars[pos];
        match c {
            '(' => {
                let parent = stack.last().copied();
                let idx = tree.add_node(parent);
                if root.is_none() {
                    root = Some(idx);
                }
                stack.push(idx);
                current = None;
                pos += 1;
            }
            ',' => {
                current = None;
                pos += 1;
            }
            ')' => {
                current = Some(stack.pop().ok_or_else(|| parse_error("unbalanced ')'"))?);
                pos += 1;
            }
            ';' => break,
            '[' => {
                let inner = read_bracket(&chars, &mut pos)?;
                if let (Some(idx), Some(body)) = (current, inner.strip_prefix('&')) {
                    for (key, value) in parse_annotation(body, force_discrete) {
                        tree.node_mut(idx).attributes.insert(key, value);
                    }
                }
                // Comments before any node, such as the rooting marker [&R],
                // are skipped.
            }
            ':' => {
                pos += 1;
                while pos < n && chars[pos] == '[' {
                    let inner = read_bracket(&chars, &mut pos)?;
                    if let (Some(idx), Some(body)) = (current, inner.strip_prefix('&')) {
                        for (key, value) in parse_annotation(body, force_discrete) {
                            tree.node_mut(idx).attributes.insert(key, value);
                        }
                    }
                }
                let length = read_number(&chars, &mut pos)?;
                let idx = current.ok_or_else(|| parse_error("branch length without a node"))?;
                tree.node_mut(idx).length = Some(length);
            }
            c if c.is_whitespace() => pos += 1,
            _ => {
                let label = read_label(&chars, &mut pos)?;
                if current.is_none() {
                    let parent = stack.last().copied();
                    let idx = tree.add_node(parent);
                    if root.is_none() {
                        root = Some(idx);
                    }
                    tree.node_mut(idx).taxon = Some(label);
                    current = Some(idx);
                }
                // Labels on already-closed internal nodes are not kept.
            }
        }
    }

    if !stack.is_empty() {
        return Err(parse_error("unbalanced '('"));
    }
    let root = root.ok_or_else(|| parse_error("empty tree"))?;
    tree.set_root(root);
    Ok(tree)
}

fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.to_string_lossy().ends_with(".gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// One sampled tree from the stream.
pub struct StreamedTree {
    /// Zero-based position in the file, counting burned-in trees too.
    pub index: usize,
    /// The MCMC state number from the tree name, 0 when absent.
    pub state: u64,
    pub tree: SummaryTree,
}

/// A restartable stream of posterior trees.
///
/// Every call to [`trees`](Self::trees) reopens the file and yields the same
/// sequence, with burn-in applied: a tree is kept when both thresholds are
/// zero, or its index has reached `burnin_trees` (when set), or its state
/// number exceeds `burnin_states` (when set).
pub struct TreeStream {
    path: PathBuf,
    pub burnin_trees: usize,
    pub burnin_states: u64,
    pub force_discrete: bool,
}

impl TreeStream {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        TreeStream {
            path: path.as_ref().to_path_buf(),
            burnin_trees: 0,
            burnin_states: 0,
            force_discrete: false,
        }
    }

    pub fn with_burnin(mut self, trees: usize, states: u64) -> Self {
        self.burnin_trees = trees;
        self.burnin_states = states;
        self
    }

    pub fn with_force_discrete(mut self, force: bool) -> Self {
        self.force_discrete = force;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn trees(&self) -> Result<TreeIter> {
        Ok(TreeIter {
            lines: open_reader(&self.path)?.lines(),
            translate: HashMap::new(),
            index: 0,
            line_no: 0,
            in_trees: false,
            done: false,
            burnin_trees: self.burnin_trees,
            burnin_states: self.burnin_states,
            force_discrete: self.force_discrete,
        })
    }
}

pub struct TreeIter {
    lines: io::Lines<Box<dyn BufRead>>,
    translate: HashMap<String, String>,
    index: usize,
    line_no: usize,
    in_trees: bool,
    done: bool,
    burnin_trees: usize,
    burnin_states: u64,
    force_discrete: bool,
}

impl TreeIter {
    fn keep(&self, index: usize, state: u64) -> bool {
        (self.burnin_trees == 0 && self.burnin_states == 0)
            || (self.burnin_trees > 0 && index >= self.burnin_trees)
            || (self.burnin_states > 0 && state > self.burnin_states)
    }

    fn read_translate(&mut self) -> Result<()> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(());
            };
            let line = line?;
            self.line_no += 1;
            let trimmed = line.trim();
            let (entry, stop) = match trimmed.strip_suffix(';') {
                Some(rest) => (rest.trim(), true),
                None => (trimmed, false),
            };
            // Entries look like: 1 'taxon label',
            let entry = entry.trim_end_matches(',').trim();
            if !entry.is_empty() {
                let mut parts = entry.splitn(2, char::is_whitespace);
                if let (Some(id), Some(label)) = (parts.next(), parts.next()) {
                    self.translate
                        .insert(id.to_string(), unquote(label).to_string());
                }
            }
            if stop {
                return Ok(());
            }
        }
    }

    fn parse_tree_line(&self, line: &str) -> Result<SummaryTree> {
        let body = line
            .splitn(2, '=')
            .nth(1)
            .ok_or_else(|| parse_error("tree line without '='"))?;
        let mut tree = parse_newick(body.trim(), self.force_discrete)?;
        apply_translation(&mut tree, &self.translate);
        tree.assign_heights_from_lengths();
        Ok(tree)
    }

    fn at_line(&self, err: AnnotatorError) -> AnnotatorError {
        match err {
            AnnotatorError::Parse { message, .. } => AnnotatorError::Parse {
                line: self.line_no,
                message,
            },
            other => other,
        }
    }
}

impl Iterator for TreeIter {
    type Item = Result<StreamedTree>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            let trimmed = line.trim();
            let upper = trimmed.to_ascii_uppercase();

            if upper.starts_with("TRANSLATE") {
                if let Err(e) = self.read_translate() {
                    return Some(Err(e));
                }
            } else if upper.starts_with("TREE ") {
                self.in_trees = true;
                let index = self.index;
                self.index += 1;

                let header = trimmed.split('=').next().unwrap_or_default();
                let state = extract_state(header);
                if !self.keep(index, state) {
                    continue;
                }
                return Some(
                    self.parse_tree_line(trimmed)
                        .map(|tree| StreamedTree { index, state, tree })
                        .map_err(|e| self.at_line(e)),
                );
            } else if upper.starts_with("END;") && self.in_trees {
                self.done = true;
                return None;
            }
        }
    }
}

/// Reads a user-supplied target tree (plain Newick, or NEXUS with an optional
/// TRANSLATE block). Annotations are stripped and the text is handed to
/// phylotree, whose parser copes with the odder corners of hand-written
/// Newick.
pub fn read_target_tree<P: AsRef<Path>>(path: P) -> Result<SummaryTree> {
    let content = fs::read_to_string(path.as_ref())?;
    let is_nexus = content.trim_start().to_ascii_uppercase().starts_with("#NEXUS");

    let (newick, translate) = if is_nexus {
        let newick = content
            .lines()
            .find_map(|line| {
                let trimmed = line.trim();
                if trimmed.to_ascii_uppercase().starts_with("TREE ") {
                    trimmed.splitn(2, '=').nth(1).map(str::to_string)
                } else {
                    None
                }
            })
            .ok_or_else(|| AnnotatorError::EmptyTreeFile(path.as_ref().to_path_buf()))?;
        (newick, parse_taxon_block(&content))
    } else {
        (content, HashMap::new())
    };

    let stripped = strip_beast_annotations(&newick);
    let phylo = PhyloTree::from_newick(stripped.trim()).map_err(|e| AnnotatorError::Parse {
        line: 0,
        message: format!("target tree: {e}"),
    })?;

    let mut tree = convert_phylo_tree(&phylo)?;
    apply_translation(&mut tree, &translate);
    tree.assign_heights_from_lengths();
    Ok(tree)
}

/// Renames tips through a TRANSLATE table; tips without an entry keep their
/// label.
fn apply_translation(tree: &mut SummaryTree, translate: &HashMap<String, String>) {
    if translate.is_empty() {
        return;
    }
    for idx in 0..tree.node_count() {
        let node = tree.node_mut(idx);
        if !node.is_leaf() {
            continue;
        }
        let label = node.taxon.as_ref().and_then(|t| translate.get(t)).cloned();
        if let Some(label) = label {
            node.taxon = Some(label);
        }
    }
}

/// Parses a NEXUS TRANSLATE block into an id → label map.
fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(|line| !line.trim().starts_with(';'))
        .filter_map(|line| {
            let line = line.trim().trim_end_matches(',').trim_end_matches(';');
            let mut parts = line.splitn(2, char::is_whitespace);
            let id = parts.next()?.to_string();
            let label = unquote(parts.next()?).to_string();
            Some((id, label))
        })
        .collect()
}

fn convert_phylo_tree(phylo: &PhyloTree) -> Result<SummaryTree> {
    let mut tree = SummaryTree::new();
    let phylo_root = phylo.get_root()?;
    let mut stack: Vec<(usize, Option<usize>)> = vec![(phylo_root, None)];

    while let Some((phylo_id, parent)) = stack.pop() {
        let node = phylo.get(&phylo_id)?;
        let idx = tree.add_node(parent);
        if parent.is_none() {
            tree.set_root(idx);
        }
        tree.node_mut(idx).length = node.parent_edge;
        if node.children.is_empty() {
            tree.node_mut(idx).taxon = node.name.clone();
        }
        for &child in node.children.iter().rev() {
            stack.push((child, Some(idx)));
        }
    }
    Ok(tree)
}

fn quote_label(label: &str) -> String {
    let bare = !label.is_empty()
        && label
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if bare {
        label.to_string()
    } else {
        format!("'{label}'")
    }
}

fn format_value(value: &AttributeValue) -> String {
    match value {
        AttributeValue::Real(x) => format!("{x}"),
        AttributeValue::Boolean(b) => b.to_string(),
        AttributeValue::Discrete(s) => {
            if s.starts_with('{') {
                // Preformatted lists (contour polygons) are written verbatim.
                s.clone()
            } else {
                format!("\"{s}\"")
            }
        }
        AttributeValue::RealVector(values) => {
            format!("{{{}}}", values.iter().map(|v| format!("{v}")).join(","))
        }
        AttributeValue::Labels(labels) => {
            format!("{{{}}}", labels.iter().map(|l| format!("\"{l}\"")).join(","))
        }
    }
}

/// Serializes the annotated tree to Newick, tips as translate-table numbers,
/// branch lengths recomputed from the summarized node heights.
fn format_newick(tree: &SummaryTree, taxa: &TaxonSet) -> io::Result<String> {
    enum Step {
        Visit(usize),
        Close(usize),
        Comma,
    }

    let mut out = String::new();
    let mut stack = vec![Step::Visit(tree.root())];

    while let Some(step) = stack.pop() {
        match step {
            Step::Comma => out.push(','),
            Step::Visit(idx) => {
                let node = tree.node(idx);
                if node.is_leaf() {
                    let name = node.taxon.as_deref().unwrap_or_default();
                    let number = taxa.index_of(name).ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("tip '{name}' is not in the taxon table"),
                        )
                    })? + 1;
                    out.push_str(&number.to_string());
                    append_node_suffix(&mut out, tree, idx);
                } else {
                    out.push('(');
                    stack.push(Step::Close(idx));
                    for (i, &child) in node.children.iter().enumerate().rev() {
                        stack.push(Step::Visit(child));
                        if i > 0 {
                            stack.push(Step::Comma);
                        }
                    }
                }
            }
            Step::Close(idx) => {
                out.push(')');
                append_node_suffix(&mut out, tree, idx);
            }
        }
    }
    Ok(out)
}

fn append_node_suffix(out: &mut String, tree: &SummaryTree, idx: usize) {
    let node = tree.node(idx);
    if !node.attributes.is_empty() {
        out.push_str("[&");
        let mut first = true;
        for (name, value) in &node.attributes {
            if !first {
                out.push(',');
            }
            first = false;
            out.push_str(name);
            out.push('=');
            out.push_str(&format_value(value));
        }
        out.push(']');
    }
    if let Some(parent) = node.parent {
        let length = tree.node(parent).height - node.height;
        out.push(':');
        out.push_str(&format!("{length}"));
    }
}

/// Writes the annotated target tree as a NEXUS document with taxa and
/// translate blocks.
pub fn write_nexus<W: Write>(out: &mut W, taxa: &TaxonSet, tree: &SummaryTree) -> io::Result<()> {
    writeln!(out, "#NEXUS")?;
    writeln!(out)?;
    writeln!(out, "Begin taxa;")?;
    writeln!(out, "\tDimensions ntax={};", taxa.len())?;
    writeln!(out, "\tTaxlabels")?;
    for i in 0..taxa.len() {
        writeln!(out, "\t\t{}", quote_label(taxa.name(i)))?;
    }
    writeln!(out, "\t\t;")?;
    writeln!(out, "End;")?;
    writeln!(out)?;
    writeln!(out, "Begin trees;")?;
    writeln!(out, "\tTranslate")?;
    for i in 0..taxa.len() {
        let sep = if i + 1 == taxa.len() { "" } else { "," };
        writeln!(out, "\t\t{} {}{}", i + 1, quote_label(taxa.name(i)), sep)?;
    }
    writeln!(out, "\t\t;")?;
    writeln!(out, "tree TREE1 = [&R] {};", format_newick(tree, taxa)?)?;
    writeln!(out, "End;")?;
    out.flush()
}

/// Writes the NEXUS document to a file, to stdout when `path` is `None`, and
/// gzip-compressed when the path ends with `.gz`.
pub fn write_nexus_file(
    path: Option<&Path>,
    taxa: &TaxonSet,
    tree: &SummaryTree,
) -> io::Result<()> {
    let mut out: Box<dyn Write> = match path {
        None => Box::new(io::BufWriter::new(io::stdout())),
        Some(p) if p.to_string_lossy().ends_with(".gz") => {
            let file = File::create(p)?;
            let encoder = GzEncoder::new(file, Compression::default());
            Box::new(io::BufWriter::new(encoder))
        }
        Some(p) => Box::new(io::BufWriter::new(File::create(p)?)),
    };
    write_nexus(&mut out, taxa, tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clades::TaxonSet;

    #[test]
    fn test_parse_plain_newick() {
        let t = parse_newick("((A:1.5,B:0.5):2,C:3);", false).unwrap();
        assert_eq!(t.node_count(), 5);
        assert_eq!(t.leaf_count(), 3);
        let taxa: Vec<&str> = t.leaf_taxa().collect();
        assert_eq!(taxa, vec!["A", "B", "C"]);
        let a = (0..t.node_count())
            .find(|&i| t.node(i).taxon.as_deref() == Some("A"))
            .unwrap();
        assert_eq!(t.node(a).length, Some(1.5));
    }

    #[test]
    fn test_parse_annotations() {
        let t = parse_newick(
            "((A[&rate=0.5]:1,B[&state=\"east\",fixed]:1)[&posterior=0.9]:1,C[&location={1.5,-2.5}]:2);",
            false,
        )
        .unwrap();
        let find = |name: &str| {
            (0..t.node_count())
                .find(|&i| t.node(i).taxon.as_deref() == Some(name))
                .unwrap()
        };
        assert_eq!(
            t.node(find("A")).attributes.get("rate"),
            Some(&AttributeValue::Real(0.5))
        );
        assert_eq!(
            t.node(find("B")).attributes.get("state"),
            Some(&AttributeValue::Discrete("east".into()))
        );
        assert_eq!(
            t.node(find("B")).attributes.get("fixed"),
            Some(&AttributeValue::Boolean(true))
        );
        assert_eq!(
            t.node(find("C")).attributes.get("location"),
            Some(&AttributeValue::RealVector(vec![1.5, -2.5]))
        );
        let internal = (0..t.node_count())
            .find(|&i| !t.is_leaf(i) && t.node(i).parent.is_some())
            .unwrap();
        assert_eq!(
            t.node(internal).attributes.get("posterior"),
            Some(&AttributeValue::Real(0.9))
        );
    }

    #[test]
    fn test_parse_branch_annotations_and_rooting_marker() {
        let t = parse_newick("[&R] (A:[&rate=2.0]1,B:1);", false).unwrap();
        let a = (0..t.node_count())
            .find(|&i| t.node(i).taxon.as_deref() == Some("A"))
            .unwrap();
        assert_eq!(
            t.node(a).attributes.get("rate"),
            Some(&AttributeValue::Real(2.0))
        );
        assert_eq!(t.node(a).length, Some(1.0));
    }

    #[test]
    fn test_parse_value_typing() {
        assert_eq!(parse_value("1.5", false), AttributeValue::Real(1.5));
        assert_eq!(parse_value("3", false), AttributeValue::Real(3.0));
        assert_eq!(parse_value("3", true), AttributeValue::Discrete("3".into()));
        assert_eq!(parse_value("1e2", true), AttributeValue::Real(100.0));
        assert_eq!(parse_value("true", false), AttributeValue::Boolean(true));
        assert_eq!(
            parse_value("\"west\"", false),
            AttributeValue::Discrete("west".into())
        );
        assert_eq!(
            parse_value("{1,2,3}", false),
            AttributeValue::RealVector(vec![1.0, 2.0, 3.0])
        );
        // Nested braces do not parse as numbers and stay verbatim
        assert_eq!(
            parse_value("{{1,2},{3,4}}", false),
            AttributeValue::Discrete("{{1,2},{3,4}}".into())
        );
    }

    #[test]
    fn test_parse_quoted_taxa() {
        let t = parse_newick("('taxon one':1,'taxon,two':1);", false).unwrap();
        let taxa: Vec<&str> = t.leaf_taxa().collect();
        assert_eq!(taxa, vec!["taxon one", "taxon,two"]);
    }

    #[test]
    fn test_parse_unbalanced_fails() {
        assert!(parse_newick("((A,B);", false).is_err());
        assert!(parse_newick("(A,B));", false).is_err());
    }

    fn fixture_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tree-annotate-test-{}-{name}", std::process::id()))
    }

    const NEXUS_LOG: &str = "#NEXUS\n\
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
tree STATE_0 = [&R] ((1[&rate=0.5]:1,2:1):1,(3:1,4:1):1);\n\
tree STATE_1000 = [&R] ((1[&rate=0.7]:2,2:2):2,(3:2,4:2):2);\n\
tree STATE_2000 = [&R] ((1[&rate=0.9]:1,3:1):1,(2:1,4:1):1);\n\
End;\n";

    #[test]
    fn test_stream_reads_all_trees_with_translation() {
        let path = fixture_path("stream.trees");
        fs::write(&path, NEXUS_LOG).unwrap();

        let stream = TreeStream::new(&path);
        let trees: Vec<StreamedTree> = stream.trees().unwrap().map(|t| t.unwrap()).collect();
        assert_eq!(trees.len(), 3);
        assert_eq!(trees[0].state, 0);
        assert_eq!(trees[2].state, 2000);

        let mut taxa: Vec<&str> = trees[0].tree.leaf_taxa().collect();
        taxa.sort();
        assert_eq!(taxa, vec!["A", "B", "C", "D"]);

        // Heights derived from branch lengths
        assert_eq!(trees[1].tree.node(trees[1].tree.root()).height, 4.0);

        // Reopening yields the identical sequence
        let again: Vec<StreamedTree> = stream.trees().unwrap().map(|t| t.unwrap()).collect();
        assert_eq!(again.len(), 3);
        assert_eq!(again[0].tree.leaf_count(), 4);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_stream_burnin_by_trees_and_states() {
        let path = fixture_path("burnin.trees");
        fs::write(&path, NEXUS_LOG).unwrap();

        let by_trees: Vec<_> = TreeStream::new(&path)
            .with_burnin(2, 0)
            .trees()
            .unwrap()
            .map(|t| t.unwrap())
            .collect();
        assert_eq!(by_trees.len(), 1);
        assert_eq!(by_trees[0].index, 2);

        let by_states: Vec<_> = TreeStream::new(&path)
            .with_burnin(0, 500)
            .trees()
            .unwrap()
            .map(|t| t.unwrap())
            .collect();
        assert_eq!(by_states.len(), 2);
        assert_eq!(by_states[0].state, 1000);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_target_tree_newick_file() {
        let path = fixture_path("target.nwk");
        fs::write(&path, "((A:1,B:1):1,(C:1,D:1):1);\n").unwrap();

        let target = read_target_tree(&path).unwrap();
        assert_eq!(target.leaf_count(), 4);
        assert_eq!(target.node(target.root()).height, 2.0);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_write_nexus_document() {
        let mut tree = parse_newick("((A:1,B:1):1,C:2);", false).unwrap();
        tree.assign_heights_from_lengths();
        let taxa = TaxonSet::from_tree(&tree).unwrap();
        let root = tree.root();
        tree.set_attribute(root, "posterior", AttributeValue::Real(1.0));

        let mut out = Vec::new();
        write_nexus(&mut out, &taxa, &tree).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("#NEXUS"));
        assert!(text.contains("Dimensions ntax=3;"));
        assert!(text.contains("\t\t1 A,"));
        assert!(text.contains("tree TREE1 = [&R] "));
        assert!(text.contains("[&posterior=1]"));

        // The tree line must parse back with the same topology.
        let line = text
            .lines()
            .find(|l| l.trim_start().starts_with("tree "))
            .unwrap();
        let body = line.splitn(2, '=').nth(1).unwrap();
        let parsed = parse_newick(body.trim(), false).unwrap();
        assert_eq!(parsed.leaf_count(), 3);
        assert_eq!(parsed.node_count(), 5);
    }
}
