//! Explanation generation for tariff stack results.
//!
//! Converts an `EffectiveTariffResult` into human-readable breakdown lines
//! suitable for display next to a selected code.

use dutyflow_model::{
    format_percent, DataSource, EffectiveTariffResult, ProgramContribution, ProgramKind, RateValue,
    BASELINE_PROGRAM_ID,
};
use serde::{Deserialize, Serialize};

/// How far a displayed rate can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Country-specific data, every rate known
    Full,
    /// Fallback program set or case-specific orders in play
    Reduced,
}

/// A structured explanation for one breakdown line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    /// Short summary (1 line)
    pub summary: String,

    /// Detailed explanation (1-2 sentences)
    pub detail: String,

    /// Signed contribution ("+25%", "-16.5%", "16.5%")
    pub amount: String,

    /// Evidence items supporting this line
    pub evidence: Vec<EvidenceItem>,
}

/// A piece of evidence behind a breakdown line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub kind: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Display text for a schedule rate; unknown is never shown as free.
pub fn describe_rate(rate: &RateValue) -> String {
    match rate {
        RateValue::Percent(_) => rate.to_string(),
        RateValue::Unknown => "Unknown (no rate in schedule)".to_string(),
    }
}

pub fn confidence(result: &EffectiveTariffResult) -> Confidence {
    if result.data_source == DataSource::Fallback || result.has_advisories() {
        Confidence::Reduced
    } else {
        Confidence::Full
    }
}

/// Generate explanations for every line of a result, in display order.
pub fn explain_result(result: &EffectiveTariffResult) -> Vec<Explanation> {
    result
        .contributions
        .iter()
        .map(|c| explain_contribution(c, result))
        .collect()
}

/// Generate the explanation for a single contribution.
pub fn explain_contribution(contribution: &ProgramContribution, result: &EffectiveTariffResult) -> Explanation {
    let rate = format_percent(contribution.rate);
    let evidence = vec![EvidenceItem {
        kind: "program".to_string(),
        value: contribution.program_id.clone(),
        context: Some(contribution.kind.label().to_string()),
    }];

    if contribution.is_waiver {
        return Explanation {
            summary: format!("{} waiver", contribution.name),
            detail: format!(
                "Goods from {} qualifying under {} have {} of the base rate removed. \
                 Other surcharges still apply unless listed as waived.",
                result.country, contribution.name, rate
            ),
            amount: format!("-{}", rate),
            evidence,
        };
    }

    if let Some(agreement) = &contribution.waived_by {
        return Explanation {
            summary: format!("{} (waived)", contribution.name),
            detail: format!(
                "{} is explicitly waived for {} by agreement {}.",
                contribution.name, result.country, agreement
            ),
            amount: "+0%".to_string(),
            evidence: vec![
                evidence[0].clone(),
                EvidenceItem {
                    kind: "waived_by".to_string(),
                    value: agreement.clone(),
                    context: None,
                },
            ],
        };
    }

    if contribution.advisory {
        return Explanation {
            summary: format!("{} may apply", contribution.name),
            detail: format!(
                "An order covers code {} from {}. {}",
                result.code,
                result.country,
                contribution
                    .note
                    .as_deref()
                    .unwrap_or("The rate is case-specific and not included in the total.")
            ),
            amount: "n/a".to_string(),
            evidence,
        };
    }

    match contribution.kind {
        ProgramKind::Baseline if contribution.program_id == BASELINE_PROGRAM_ID => Explanation {
            summary: format!("MFN base rate {}", rate),
            detail: format!("The schedule's general rate for code {}.", result.code),
            amount: rate,
            evidence: vec![EvidenceItem {
                kind: "schedule".to_string(),
                value: result.code.clone(),
                context: None,
            }],
        },
        ProgramKind::Baseline => Explanation {
            summary: format!("{} +{}", contribution.name, rate),
            detail: format!("A flat baseline surcharge applies to goods from {}.", result.country),
            amount: format!("+{}", rate),
            evidence,
        },
        ProgramKind::ChapterSurcharge => Explanation {
            summary: format!("{} +{}", contribution.name, rate),
            detail: format!(
                "Code {} falls in a product list surcharged for goods from {}.",
                result.code, result.country
            ),
            amount: format!("+{}", rate),
            evidence,
        },
        ProgramKind::CountryEmergency => Explanation {
            summary: format!("{} +{}", contribution.name, rate),
            detail: format!(
                "An emergency surcharge applies to essentially all goods from {}.",
                result.country
            ),
            amount: format!("+{}", rate),
            evidence,
        },
        ProgramKind::Antidumping => Explanation {
            summary: format!("{} +{}", contribution.name, rate),
            detail: format!(
                "An antidumping or countervailing order covers code {} from {}.",
                result.code, result.country
            ),
            amount: format!("+{}", rate),
            evidence,
        },
        ProgramKind::TradeAgreement => Explanation {
            summary: contribution.name.clone(),
            detail: "Trade agreement with no baseline reduction for this code.".to_string(),
            amount: format!("+{}", rate),
            evidence,
        },
    }
}

/// One-line summary of the whole stack.
pub fn summarize_result(result: &EffectiveTariffResult) -> String {
    let parts: Vec<String> = result
        .contributions
        .iter()
        .filter(|c| c.rate > 0.0)
        .map(|c| {
            let sign = if c.is_waiver { "-" } else { "+" };
            format!("{} {}{}", c.name, sign, format_percent(c.rate))
        })
        .collect();

    let mut summary = format!("{} effective", format_percent(result.effective_rate));
    if !parts.is_empty() {
        summary.push_str(&format!(" ({})", parts.join(", ")));
    }
    if result.data_source == DataSource::Fallback {
        summary.push_str(" [fallback rates: country data unavailable]");
    }
    if result.has_advisories() {
        summary.push_str(" [additional orders may apply]");
    }
    summary
}

/// Per-shipment duty line ("Duty on 1000.00: 515.00 at 51.5%").
pub fn summarize_estimate(result: &EffectiveTariffResult, customs_value: f64) -> String {
    let estimate = result.estimate_duty(customs_value);
    format!(
        "Duty on {:.2}: {:.2} at {}",
        estimate.customs_value,
        estimate.duty_amount,
        format_percent(estimate.effective_rate)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, kind: ProgramKind, rate: f64, is_waiver: bool) -> ProgramContribution {
        ProgramContribution {
            program_id: id.to_string(),
            name: id.to_uppercase(),
            kind,
            rate,
            is_waiver,
            waived_by: None,
            advisory: false,
            note: None,
        }
    }

    fn china_result() -> EffectiveTariffResult {
        EffectiveTariffResult {
            code: "6109100004".into(),
            country: "CN".into(),
            base_rate: 16.5,
            contributions: vec![
                line(BASELINE_PROGRAM_ID, ProgramKind::Baseline, 16.5, false),
                line("s301", ProgramKind::ChapterSurcharge, 25.0, false),
                line("emergency", ProgramKind::CountryEmergency, 10.0, false),
            ],
            effective_rate: 51.5,
            data_source: DataSource::Configured,
        }
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            summarize_result(&china_result()),
            "51.5% effective (MFN +16.5%, S301 +25%, EMERGENCY +10%)"
        );
    }

    #[test]
    fn test_fallback_lowers_confidence() {
        let mut result = china_result();
        assert_eq!(confidence(&result), Confidence::Full);
        result.data_source = DataSource::Fallback;
        assert_eq!(confidence(&result), Confidence::Reduced);
        assert!(summarize_result(&result).contains("fallback"));
    }

    #[test]
    fn test_explain_lines() {
        let result = china_result();
        let lines = explain_result(&result);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].amount, "16.5%");
        assert!(lines[0].summary.starts_with("MFN base rate"));
        assert_eq!(lines[1].amount, "+25%");
        assert!(lines[2].detail.contains("CN"));
    }

    #[test]
    fn test_explain_waivers() {
        let mut result = china_result();
        result.country = "CA".into();
        result.contributions = vec![
            line(BASELINE_PROGRAM_ID, ProgramKind::Baseline, 16.5, false),
            line("ca-fta", ProgramKind::TradeAgreement, 16.5, true),
            ProgramContribution {
                waived_by: Some("ca-fta".into()),
                ..line("emergency", ProgramKind::CountryEmergency, 0.0, false)
            },
        ];
        result.effective_rate = 0.0;

        let lines = explain_result(&result);
        assert_eq!(lines[1].amount, "-16.5%");
        assert!(lines[2].summary.contains("waived"));
        assert_eq!(lines[2].evidence.len(), 2);
        assert_eq!(summarize_result(&result), "0% effective (MFN +16.5%, CA-FTA -16.5%)");
    }

    #[test]
    fn test_describe_rate() {
        assert_eq!(describe_rate(&RateValue::Percent(0.0)), "Free");
        assert!(describe_rate(&RateValue::Unknown).starts_with("Unknown"));
    }

    #[test]
    fn test_estimate_text() {
        assert_eq!(summarize_estimate(&china_result(), 1000.0), "Duty on 1000.00: 515.00 at 51.5%");
    }
}
