//! Schedule hierarchy reconstruction.
//!
//! Turns a flat, indent-annotated list of schedule rows into a forest of
//! `HierarchyNode`s. Parent/child links come from the *relative* ordering of
//! indents (a stack of open ancestors), never from indent as an absolute
//! depth. Rates are parsed once here and inherited top-down.

use std::collections::BTreeMap;

use dutyflow_features::{
    clean_label, format_code, is_catch_all, parse_code, parse_rate, ParsedRate,
};
use dutyflow_model::{
    BuildWarning, HierarchyNode, RateValue, ScheduleRow, ScheduleTree, NEUTRAL_SCORE,
};
use serde::{Deserialize, Serialize};

/// Configuration for the hierarchy builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Digits in a full statistical line (terminal codes)
    pub max_code_length: usize,
    /// Shortest accepted code (chapters)
    pub min_code_length: usize,
    /// Deepest allowed nesting; deeper rows are attached higher up
    pub max_depth: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            max_code_length: 10,
            min_code_length: 2,
            max_depth: 32,
        }
    }
}

/// A validated row waiting to be placed in the tree.
struct PendingRow<'a> {
    row: &'a ScheduleRow,
    digits: Option<String>,
    /// Sort key: own code, or the preceding coded row for grouping rows
    anchor: String,
    offset: usize,
    seq: usize,
}

/// Arena slot; parents always precede their children.
struct FlatNode {
    node: HierarchyNode,
    parent: Option<usize>,
}

/// Build the schedule forest from flat rows.
///
/// Malformed codes are dropped and counted; orphans and bad rate text are
/// reported as warnings. This never fails.
pub fn build(rows: &[ScheduleRow], config: &HierarchyConfig) -> ScheduleTree {
    let mut dropped_rows = 0;
    let mut warnings = Vec::new();

    let mut pending = Vec::with_capacity(rows.len());
    let mut anchor = String::new();
    let mut offset = 0;
    for (seq, row) in rows.iter().enumerate() {
        if row.code.trim().is_empty() {
            offset += 1;
            pending.push(PendingRow {
                row,
                digits: None,
                anchor: anchor.clone(),
                offset,
                seq,
            });
            continue;
        }

        match parse_code(&row.code, config.min_code_length, config.max_code_length) {
            Ok(digits) => {
                anchor = digits.clone();
                offset = 0;
                pending.push(PendingRow {
                    row,
                    anchor: digits.clone(),
                    digits: Some(digits),
                    offset,
                    seq,
                });
            }
            Err(error) => {
                tracing::warn!(code = %row.code, %error, "Dropping schedule row with malformed code");
                dropped_rows += 1;
            }
        }
    }

    // Fixed-width digit codes sort correctly by prefix.
    pending.sort_by(|a, b| {
        a.anchor
            .cmp(&b.anchor)
            .then(a.offset.cmp(&b.offset))
            .then(a.seq.cmp(&b.seq))
    });

    let mut arena: Vec<FlatNode> = Vec::with_capacity(pending.len());
    let mut open: Vec<(u32, usize)> = Vec::new();
    let mut seen_ids: BTreeMap<String, usize> = BTreeMap::new();
    let max_depth = config.max_depth.max(1);

    for item in &pending {
        let indent = item.row.indent;
        while open.last().is_some_and(|&(open_indent, _)| open_indent >= indent) {
            open.pop();
        }
        // `open` is the ancestor chain, so its length is the next depth.
        let mut depth_limited = false;
        while open.len() >= max_depth {
            open.pop();
            depth_limited = true;
        }
        let parent = open.last().map(|&(_, idx)| idx);

        let id = unique_id(&mut seen_ids, synthetic_id(item));
        if depth_limited {
            tracing::warn!(id = %id, indent, max_depth, "Schedule row nested too deep, attached higher up");
            warnings.push(BuildWarning::DepthLimited {
                id: id.clone(),
                indent,
            });
        }
        if parent.is_none() && indent > 0 {
            tracing::warn!(id = %id, indent, "Orphaned schedule row attached as root");
            warnings.push(BuildWarning::OrphanRow {
                id: id.clone(),
                indent,
            });
        }

        let own_rate = own_rate(item, &id, &mut warnings);
        let label = clean_label(&item.row.description);
        let qualified_label = match parent.map(|p| &arena[p].node) {
            Some(p) if p.is_grouping && !p.qualified_label.is_empty() => {
                format!("{}: {}", p.qualified_label, label)
            }
            _ => label.clone(),
        };
        let depth = parent.map_or(0, |p| arena[p].node.depth + 1);
        let is_terminal = item
            .digits
            .as_ref()
            .is_some_and(|d| d.len() >= config.max_code_length);

        arena.push(FlatNode {
            node: HierarchyNode {
                id,
                display_code: item.digits.as_deref().map(format_code),
                code: item.digits.clone(),
                is_catch_all: is_catch_all(&label),
                label,
                qualified_label,
                indent,
                depth,
                own_rate,
                effective_rate: RateValue::Unknown,
                is_terminal,
                is_grouping: item.digits.is_none(),
                relevance_score: NEUTRAL_SCORE,
                children: Vec::new(),
            },
            parent,
        });
        open.push((indent, arena.len() - 1));
    }

    inherit_rates(&mut arena);
    let roots = assemble(arena);

    let tree = ScheduleTree {
        roots,
        dropped_rows,
        warnings,
    };
    tracing::debug!(
        nodes = tree.node_count(),
        roots = tree.roots.len(),
        dropped = tree.dropped_rows,
        warnings = tree.warnings.len(),
        "Built schedule tree"
    );
    tree
}

fn synthetic_id(item: &PendingRow<'_>) -> String {
    match &item.digits {
        Some(digits) => digits.clone(),
        None if item.anchor.is_empty() => format!("root#{}", item.offset),
        None => format!("{}#{}", item.anchor, item.offset),
    }
}

/// Duplicate codes still get their own node.
fn unique_id(seen: &mut BTreeMap<String, usize>, id: String) -> String {
    let count = seen.entry(id.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        id
    } else {
        format!("{}~{}", id, count)
    }
}

fn own_rate(item: &PendingRow<'_>, id: &str, warnings: &mut Vec<BuildWarning>) -> Option<f64> {
    let text = item.row.own_rate_text.as_deref()?;
    if item.digits.is_none() {
        if !text.trim().is_empty() {
            warnings.push(BuildWarning::RateOnGroupingRow {
                id: id.to_string(),
                text: text.to_string(),
            });
        }
        return None;
    }

    match parse_rate(text) {
        ParsedRate::Percent(p) => Some(p),
        ParsedRate::Absent => None,
        ParsedRate::Unparseable => {
            tracing::debug!(id, text, "Unparseable rate text, inheriting instead");
            warnings.push(BuildWarning::UnparseableRate {
                id: id.to_string(),
                text: text.to_string(),
            });
            None
        }
    }
}

/// Top-down pass: own rate wins, otherwise the parent's effective rate.
fn inherit_rates(arena: &mut [FlatNode]) {
    for idx in 0..arena.len() {
        let inherited = match arena[idx].parent {
            Some(parent) => arena[parent].node.effective_rate,
            None => RateValue::Unknown,
        };
        let slot = &mut arena[idx].node;
        slot.effective_rate = match slot.own_rate {
            Some(p) => RateValue::Percent(p),
            None => inherited,
        };
    }
}

/// Move arena nodes into their parents' child lists.
///
/// Children always sit after their parent in the arena, so a reverse sweep
/// completes every subtree before it is moved.
fn assemble(arena: Vec<FlatNode>) -> Vec<HierarchyNode> {
    let parents: Vec<Option<usize>> = arena.iter().map(|flat| flat.parent).collect();
    let mut slots: Vec<Option<HierarchyNode>> = arena.into_iter().map(|flat| Some(flat.node)).collect();
    let mut roots = Vec::new();

    for idx in (0..slots.len()).rev() {
        let Some(mut node) = slots[idx].take() else {
            continue;
        };
        node.children.reverse();
        match parents[idx] {
            Some(parent) => {
                if let Some(parent) = slots[parent].as_mut() {
                    parent.children.push(node);
                }
            }
            None => roots.push(node),
        }
    }

    roots.reverse();
    roots
}
