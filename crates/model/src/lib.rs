//! Core domain model for dutyflow tariff analysis.
//!
//! This crate defines the fundamental types used throughout the system:
//! - `ScheduleRow`: A flat, indent-annotated tariff-schedule line item
//! - `HierarchyNode` / `ScheduleTree`: The reconstructed schedule forest
//! - `RateValue`: A parsed duty rate, or the explicit unknown sentinel
//! - `ProgramKind`, `ProgramContribution`, `EffectiveTariffResult`: Duty stacking output
//! - `ProductKeywords`: Keyword buckets extracted upstream from a product description

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relevance score every node starts from before keyword scoring.
pub const NEUTRAL_SCORE: u8 = 50;

/// Program id of the MFN line that heads every tariff breakdown.
pub const BASELINE_PROGRAM_ID: &str = "mfn";

/// A duty rate after parsing.
///
/// `Unknown` means neither the node nor any ancestor carried a usable rate.
/// It is never the same thing as `Percent(0.0)` ("Free").
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "percent")]
pub enum RateValue {
    /// Ad valorem rate in percent
    Percent(f64),
    /// No rate could be resolved
    #[default]
    Unknown,
}

impl RateValue {
    /// The numeric rate, if known.
    pub fn as_percent(&self) -> Option<f64> {
        match self {
            Self::Percent(p) => Some(*p),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Percent(_))
    }
}

impl fmt::Display for RateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(p) if *p == 0.0 => write!(f, "Free"),
            Self::Percent(p) => write!(f, "{}", format_percent(*p)),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Render a percentage without trailing zeros ("16.5%", "25%").
pub fn format_percent(value: f64) -> String {
    let text = format!("{:.4}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{}%", text)
}

/// A flat schedule line item as produced by the ingestion step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    /// Tariff code, possibly dotted ("6109.10.00.04"). Empty for grouping rows.
    #[serde(default)]
    pub code: String,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Source-provided nesting hint (not an absolute depth)
    #[serde(default)]
    pub indent: u32,

    /// Raw rate text ("16.5%", "Free", "")
    #[serde(default, alias = "rate", skip_serializing_if = "Option::is_none")]
    pub own_rate_text: Option<String>,
}

impl ScheduleRow {
    pub fn new(code: impl Into<String>, description: impl Into<String>, indent: u32) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            indent,
            own_rate_text: None,
        }
    }

    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.own_rate_text = Some(rate.into());
        self
    }
}

/// A node of the reconstructed schedule forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// Normalized code, or a synthetic id for grouping rows
    pub id: String,

    /// Normalized digit code (absent for grouping rows)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Dotted display form of the code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_code: Option<String>,

    /// Cleaned description
    pub label: String,

    /// Label with grouping-row context prepended
    pub qualified_label: String,

    /// Raw indent hint from the source row
    pub indent: u32,

    /// Position in the reconstructed tree (roots are 0)
    pub depth: usize,

    /// Rate parsed from this row's own rate text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub own_rate: Option<f64>,

    /// Own rate, or the nearest ancestor's
    pub effective_rate: RateValue,

    /// Full statistical-line code, selectable by users
    pub is_terminal: bool,

    /// Label matches an "other" fallback pattern
    pub is_catch_all: bool,

    /// Pure label row without a code
    pub is_grouping: bool,

    /// 0-100 keyword relevance
    pub relevance_score: u8,

    #[serde(default)]
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Pre-order traversal of this node and its descendants.
    pub fn walk(&self) -> Vec<&HierarchyNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Highest relevance score in this subtree.
    pub fn max_subtree_score(&self) -> u8 {
        self.walk()
            .into_iter()
            .fold(self.relevance_score, |max, node| max.max(node.relevance_score))
    }
}

/// Non-fatal issues found while rebuilding a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum BuildWarning {
    /// Row had indent > 0 but no open ancestor; attached as a root
    OrphanRow { id: String, indent: u32 },

    /// Rate text present but not parseable; treated as absent
    UnparseableRate { id: String, text: String },

    /// A grouping row carried rate text, which was ignored
    RateOnGroupingRow { id: String, text: String },

    /// Row nested past the depth limit; attached to its deepest allowed ancestor
    DepthLimited { id: String, indent: u32 },
}

/// Output of the hierarchy builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTree {
    pub roots: Vec<HierarchyNode>,

    /// Rows skipped because their code was malformed
    pub dropped_rows: usize,

    #[serde(default)]
    pub warnings: Vec<BuildWarning>,
}

impl ScheduleTree {
    /// Pre-order traversal of the whole forest.
    pub fn walk(&self) -> Vec<&HierarchyNode> {
        self.roots.iter().flat_map(HierarchyNode::walk).collect()
    }

    pub fn node_count(&self) -> usize {
        self.walk().len()
    }

    /// Find the node for a code (dotted or plain).
    pub fn find(&self, code: &str) -> Option<&HierarchyNode> {
        let digits = digits_only(code);
        self.walk()
            .into_iter()
            .find(|n| n.code.as_deref() == Some(digits.as_str()))
    }

    /// Root-to-node path for a code, inclusive.
    pub fn path_to(&self, code: &str) -> Vec<&HierarchyNode> {
        let digits = digits_only(code);
        let mut path: Vec<&HierarchyNode> = Vec::new();
        let mut stack: Vec<(&HierarchyNode, usize)> = self.roots.iter().rev().map(|root| (root, 0)).collect();
        while let Some((node, level)) = stack.pop() {
            path.truncate(level);
            path.push(node);
            if node.code.as_deref() == Some(digits.as_str()) {
                return path;
            }
            stack.extend(node.children.iter().rev().map(|child| (child, level + 1)));
        }
        Vec::new()
    }

    /// All selectable statistical lines, in tree order.
    pub fn terminals(&self) -> Vec<&HierarchyNode> {
        self.walk().into_iter().filter(|n| n.is_terminal).collect()
    }
}

fn digits_only(code: &str) -> String {
    code.chars().filter(char::is_ascii_digit).collect()
}

/// Keyword buckets extracted from a product description upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductKeywords {
    #[serde(default)]
    pub materials: Vec<String>,

    #[serde(default)]
    pub demographics: Vec<String>,

    #[serde(default)]
    pub product_types: Vec<String>,
}

impl ProductKeywords {
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty() && self.demographics.is_empty() && self.product_types.is_empty()
    }

    pub fn with_materials(mut self, materials: Vec<String>) -> Self {
        self.materials = materials;
        self
    }

    pub fn with_demographics(mut self, demographics: Vec<String>) -> Self {
        self.demographics = demographics;
        self
    }

    pub fn with_product_types(mut self, product_types: Vec<String>) -> Self {
        self.product_types = product_types;
        self
    }
}

/// Category of a duty program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramKind {
    /// MFN rate or a flat baseline surcharge
    Baseline,
    /// Additive duty keyed to chapters/code lists and partners
    ChapterSurcharge,
    /// Additive duty on essentially all goods from a country
    CountryEmergency,
    /// Waives the baseline for qualifying partners
    TradeAgreement,
    /// Antidumping / countervailing order
    Antidumping,
}

impl ProgramKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Baseline => "Baseline",
            Self::ChapterSurcharge => "Chapter Surcharge",
            Self::CountryEmergency => "Emergency Surcharge",
            Self::TradeAgreement => "Trade Agreement",
            Self::Antidumping => "AD/CVD Order",
        }
    }
}

/// Where the applied program set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Country-specific configuration
    #[default]
    Configured,
    /// Conservative default set for an unknown country
    Fallback,
}

/// One line of an effective-rate breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramContribution {
    pub program_id: String,
    pub name: String,
    pub kind: ProgramKind,

    /// Percentage points added, or removed when `is_waiver`
    pub rate: f64,

    pub is_waiver: bool,

    /// Agreement that zeroed this additive program, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waived_by: Option<String>,

    /// Flag-only entry (case-specific rate not known here)
    #[serde(default)]
    pub advisory: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Result of stacking every applicable program onto a base rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveTariffResult {
    pub code: String,
    pub country: String,
    pub base_rate: f64,
    pub contributions: Vec<ProgramContribution>,
    pub effective_rate: f64,
    pub data_source: DataSource,
}

impl EffectiveTariffResult {
    /// Estimated duty for a shipment of the given customs value.
    pub fn estimate_duty(&self, customs_value: f64) -> DutyEstimate {
        let customs_value = if customs_value.is_finite() { customs_value.max(0.0) } else { 0.0 };
        let duty = customs_value * self.effective_rate / 100.0;
        DutyEstimate {
            customs_value,
            effective_rate: self.effective_rate,
            duty_amount: (duty * 100.0).round() / 100.0,
        }
    }

    pub fn waivers(&self) -> impl Iterator<Item = &ProgramContribution> {
        self.contributions.iter().filter(|c| c.is_waiver)
    }

    pub fn has_advisories(&self) -> bool {
        self.contributions.iter().any(|c| c.advisory)
    }
}

/// Per-shipment duty estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DutyEstimate {
    pub customs_value: f64,
    pub effective_rate: f64,
    pub duty_amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(code: &str, label: &str) -> HierarchyNode {
        HierarchyNode {
            id: code.to_string(),
            code: Some(code.to_string()),
            display_code: None,
            label: label.to_string(),
            qualified_label: label.to_string(),
            indent: 0,
            depth: 0,
            own_rate: None,
            effective_rate: RateValue::Unknown,
            is_terminal: code.len() == 10,
            is_catch_all: false,
            is_grouping: false,
            relevance_score: NEUTRAL_SCORE,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_rate_display() {
        assert_eq!(RateValue::Percent(16.5).to_string(), "16.5%");
        assert_eq!(RateValue::Percent(25.0).to_string(), "25%");
        assert_eq!(RateValue::Percent(0.0).to_string(), "Free");
        assert_eq!(RateValue::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_unknown_is_not_free() {
        assert_ne!(RateValue::Unknown, RateValue::Percent(0.0));
        assert_eq!(RateValue::Unknown.as_percent(), None);
        assert!(!RateValue::Unknown.is_known());
    }

    #[test]
    fn test_row_deserializes_rate_alias() {
        let row: ScheduleRow =
            serde_json::from_str(r#"{"code":"6109","description":"T-shirts","indent":1,"rate":"16.5%"}"#)
                .unwrap();
        assert_eq!(row.own_rate_text.as_deref(), Some("16.5%"));
    }

    #[test]
    fn test_tree_lookup_and_path() {
        let mut heading = leaf("6109", "T-shirts");
        let mut sub = leaf("610910", "Of cotton");
        sub.children.push(leaf("6109100004", "Men's"));
        heading.children.push(sub);
        let tree = ScheduleTree {
            roots: vec![heading],
            ..Default::default()
        };

        assert_eq!(tree.node_count(), 3);
        assert_eq!(tree.find("6109.10.00.04").map(|n| n.label.as_str()), Some("Men's"));
        let path: Vec<_> = tree.path_to("6109.10.00.04").iter().map(|n| n.id.clone()).collect();
        assert_eq!(path, vec!["6109", "610910", "6109100004"]);
        assert_eq!(tree.terminals().len(), 1);
        assert!(tree.path_to("6110").is_empty());
    }

    #[test]
    fn test_estimate_duty() {
        let result = EffectiveTariffResult {
            code: "6109100004".into(),
            country: "CN".into(),
            base_rate: 16.5,
            contributions: Vec::new(),
            effective_rate: 51.5,
            data_source: DataSource::Configured,
        };
        let estimate = result.estimate_duty(1000.0);
        assert_eq!(estimate.duty_amount, 515.0);
        assert_eq!(result.estimate_duty(-5.0).duty_amount, 0.0);
    }
}
