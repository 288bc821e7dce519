//! Relevance scoring for schedule hierarchies.
//!
//! Annotates every node of a `ScheduleTree` with a 0-100 score against the
//! keyword buckets extracted from a product description, re-orders siblings
//! for presentation, and picks a best-matching terminal code.

mod lexicon;

pub use lexicon::Lexicon;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use dutyflow_features::{term_matches, term_sounds_like, tokenize};
use dutyflow_model::{HierarchyNode, ProductKeywords, ScheduleTree};
use serde::{Deserialize, Serialize};

/// Configuration for the relevance scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Score every node starts from
    pub baseline: u8,
    /// Label matches the requested product type
    pub product_type_boost: i32,
    /// Label belongs to a different known product type
    pub product_type_penalty: i32,
    /// Label names a requested demographic
    pub demographic_boost: i32,
    /// Label names a requested material
    pub material_boost: i32,
    /// Synonym sets used to expand keywords
    pub lexicon: Lexicon,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            baseline: dutyflow_model::NEUTRAL_SCORE,
            product_type_boost: 30,
            product_type_penalty: 20,
            demographic_boost: 15,
            material_boost: 10,
            lexicon: Lexicon::default(),
        }
    }
}

/// Counts from one scoring pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreSummary {
    pub scored: usize,
    pub boosted: usize,
    pub penalized: usize,
}

/// Expanded terms for one keyword bucket.
struct Terms {
    exact: Vec<String>,
    unresolved: Vec<String>,
    /// Lexicon tokens, which are never treated as misspellings
    known: Vec<String>,
}

impl Terms {
    /// `None` means the bucket was empty and its rule is skipped entirely.
    fn new(map: &BTreeMap<String, Vec<String>>, requested: &[String]) -> Option<Self> {
        let expansion = lexicon::expand(map, requested);
        if expansion.terms.is_empty() {
            return None;
        }
        Some(Self {
            exact: expansion.terms,
            unresolved: expansion.unresolved,
            known: lexicon::vocabulary(map),
        })
    }

    fn matches(&self, tokens: &[String]) -> bool {
        any_match(tokens, &self.exact)
            || self
                .unresolved
                .iter()
                .any(|term| term_sounds_like(tokens, term, &self.known))
    }
}

struct Matcher {
    product_types: Option<Terms>,
    competing_types: Vec<String>,
    demographics: Option<Terms>,
    materials: Option<Terms>,
}

impl Matcher {
    fn new(keywords: &ProductKeywords, lexicon: &Lexicon) -> Self {
        let product_types = Terms::new(&lexicon.product_types, &keywords.product_types);
        let competing_types = product_types
            .as_ref()
            .map(|requested| lexicon::competing(&lexicon.product_types, &requested.exact))
            .unwrap_or_default();

        Self {
            product_types,
            competing_types,
            demographics: Terms::new(&lexicon.demographics, &keywords.demographics),
            materials: Terms::new(&lexicon.materials, &keywords.materials),
        }
    }
}

fn any_match(tokens: &[String], terms: &[String]) -> bool {
    terms.iter().any(|term| term_matches(tokens, term))
}

/// Score every node of the tree and re-order siblings.
///
/// Deterministic for a given keyword set; scores are reset to the baseline
/// first, so re-scoring with different keywords is safe.
pub fn score(tree: &mut ScheduleTree, keywords: &ProductKeywords, config: &RelevanceConfig) -> ScoreSummary {
    let matcher = Matcher::new(keywords, &config.lexicon);
    let mut summary = ScoreSummary::default();

    let mut stack: Vec<&mut HierarchyNode> = tree.roots.iter_mut().collect();
    while let Some(node) = stack.pop() {
        let (value, boosted, penalized) = compute_score(node, &matcher, config);
        node.relevance_score = value;
        summary.scored += 1;
        if boosted {
            summary.boosted += 1;
        }
        if penalized {
            summary.penalized += 1;
        }
        stack.extend(node.children.iter_mut());
    }
    sort_siblings(&mut tree.roots);

    tracing::debug!(
        scored = summary.scored,
        boosted = summary.boosted,
        penalized = summary.penalized,
        "Scored schedule tree"
    );
    summary
}

/// Compute the score for a single node.
fn compute_score(node: &HierarchyNode, matcher: &Matcher, config: &RelevanceConfig) -> (u8, bool, bool) {
    let tokens = tokenize(&node.qualified_label);
    let mut score = i32::from(config.baseline);
    let mut boost = 0;
    let mut penalty = 0;

    // Product type dominates: wrong-type branches are the usual bad pick.
    if let Some(requested) = &matcher.product_types {
        if requested.matches(&tokens) {
            boost += config.product_type_boost;
        } else if any_match(&tokens, &matcher.competing_types) {
            penalty += config.product_type_penalty;
        }
    }

    if let Some(demographics) = &matcher.demographics {
        if demographics.matches(&tokens) {
            boost += config.demographic_boost;
        }
    }

    if let Some(materials) = &matcher.materials {
        if materials.matches(&tokens) {
            boost += config.material_boost;
        }
    }

    if node.is_catch_all {
        boost = 0;
    }
    score += boost - penalty;

    let clamped = score.clamp(0, 100) as u8;
    (clamped, boost > 0, penalty > 0)
}

/// Non-catch-all siblings first, then by score descending; ties keep
/// schedule order.
fn sort_siblings(roots: &mut Vec<HierarchyNode>) {
    let mut stack = vec![roots];
    while let Some(nodes) = stack.pop() {
        nodes.sort_by(|a, b| {
            a.is_catch_all
                .cmp(&b.is_catch_all)
                .then(b.relevance_score.cmp(&a.relevance_score))
        });
        stack.extend(nodes.iter_mut().map(|node| &mut node.children));
    }
}

/// Running total of scores along a root-to-node path.
#[derive(Clone, Copy)]
struct PathScore {
    sum: u64,
    len: u64,
}

impl PathScore {
    fn extend(self, score: u8) -> Self {
        Self {
            sum: self.sum + u64::from(score),
            len: self.len + 1,
        }
    }

    /// Compare path means without floating point.
    fn cmp_mean(&self, other: &Self) -> Ordering {
        (self.sum * other.len).cmp(&(other.sum * self.len))
    }
}

/// Pick the terminal code whose path is most relevant on average.
///
/// Catch-all terminals only win when nothing else is selectable; exact ties
/// go to the lowest code.
pub fn best_match(tree: &ScheduleTree) -> Option<&HierarchyNode> {
    let mut best: Option<(&HierarchyNode, PathScore)> = None;
    let start = PathScore { sum: 0, len: 0 };
    let mut stack: Vec<(&HierarchyNode, PathScore)> = tree.roots.iter().map(|root| (root, start)).collect();

    while let Some((node, path)) = stack.pop() {
        let path = path.extend(node.relevance_score);

        if node.is_terminal {
            let better = match &best {
                None => true,
                Some((current, current_path)) => node
                    .is_catch_all
                    .cmp(&current.is_catch_all)
                    .reverse()
                    .then(path.cmp_mean(current_path))
                    .then(current.id.cmp(&node.id))
                    == Ordering::Greater,
            };
            if better {
                best = Some((node, path));
            }
        }

        stack.extend(node.children.iter().map(|child| (child, path)));
    }
    best.map(|(node, _)| node)
}

/// Drop branches with no node scoring at least `min_score`.
///
/// Returns the number of nodes removed.
pub fn prune(tree: &mut ScheduleTree, min_score: u8) -> usize {
    let before = tree.node_count();
    prune_nodes(&mut tree.roots, min_score);
    before - tree.node_count()
}

fn prune_nodes(roots: &mut Vec<HierarchyNode>, min_score: u8) {
    let mut stack = vec![roots];
    while let Some(nodes) = stack.pop() {
        nodes.retain(|node| node.max_subtree_score() >= min_score);
        stack.extend(nodes.iter_mut().map(|node| &mut node.children));
    }
}
