//! Tariff stack resolution.
//!
//! Folds every applicable duty program onto a base rate and produces an
//! ordered, reproducible breakdown plus a single effective rate:
//!
//! `effective = max(0, base - sum(waivers) + sum(additive))`
//!
//! Waivers are capped at the base rate and never offset an additive program
//! unless the agreement explicitly lists it for that partner country.

use std::cmp::Ordering;

use dutyflow_model::{
    EffectiveTariffResult, ProgramContribution, ProgramKind, RateValue, ScheduleTree,
};
use dutyflow_registry::{DutyProgram, ProgramRate, ProgramSource, WaiverExtent};
use thiserror::Error;

pub use dutyflow_model::BASELINE_PROGRAM_ID;

/// Errors from tree-backed resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Code {0} is not in the schedule")]
    CodeNotFound(String),

    #[error("Code {0} has no known base rate")]
    UnknownBaseRate(String),

    #[error("Code {0} is not a selectable statistical line")]
    NotSelectable(String),
}

/// Resolve the effective rate for a code imported from `country`.
///
/// Pure and deterministic: identical inputs give identical contribution
/// lists.
pub fn resolve<S>(source: &S, base_rate: f64, country: &str, code: &str) -> EffectiveTariffResult
where
    S: ProgramSource + ?Sized,
{
    let base_rate = sanitize_base_rate(base_rate, code);
    let selection = source.programs_for(country, code);

    let mut waivers: Vec<(&DutyProgram, WaiverExtent)> = Vec::new();
    let mut additive: Vec<(&DutyProgram, Option<f64>)> = Vec::new();
    for &program in &selection.programs {
        match program.rate(&selection.country, &selection.code) {
            Some(ProgramRate::Waiver(extent)) => waivers.push((program, extent)),
            Some(ProgramRate::Additive(rate)) => additive.push((program, Some(rate))),
            Some(ProgramRate::Advisory) => additive.push((program, None)),
            None => {}
        }
    }
    waivers.sort_by(|a, b| display_order(a.0, b.0));
    additive.sort_by(|a, b| display_order(a.0, b.0));

    let mut contributions = Vec::with_capacity(1 + waivers.len() + additive.len());
    contributions.push(ProgramContribution {
        program_id: BASELINE_PROGRAM_ID.to_string(),
        name: "MFN base rate".to_string(),
        kind: ProgramKind::Baseline,
        rate: base_rate,
        is_waiver: false,
        waived_by: None,
        advisory: false,
        note: None,
    });

    let mut remaining_base = base_rate;
    for (program, extent) in &waivers {
        let requested = match extent {
            WaiverExtent::Full => base_rate,
            WaiverExtent::Points(points) => *points,
        };
        let amount = requested.min(remaining_base).max(0.0);
        remaining_base -= amount;
        contributions.push(contribution(program, amount, true, None));
    }
    let waived_total = base_rate - remaining_base;

    let mut added_total = 0.0;
    for (program, rate) in &additive {
        let waived_by = waivers
            .iter()
            .find(|(agreement, _)| agreement.waives(program.id(), &selection.country))
            .map(|(agreement, _)| agreement.id().to_string());

        let amount = match (rate, &waived_by) {
            (Some(rate), None) => *rate,
            _ => 0.0,
        };
        added_total += amount;

        let mut line = contribution(program, amount, false, waived_by);
        line.advisory = rate.is_none();
        contributions.push(line);
    }

    let effective_rate = round_rate((base_rate - waived_total + added_total).max(0.0));

    tracing::debug!(
        source = source.name(),
        code = %selection.code,
        country = %selection.country,
        base_rate,
        effective_rate,
        programs = contributions.len() - 1,
        data_source = ?selection.data_source,
        "Resolved tariff stack"
    );

    EffectiveTariffResult {
        code: selection.code,
        country: selection.country,
        base_rate,
        contributions,
        effective_rate,
        data_source: selection.data_source,
    }
}

/// Resolve a code using the base rate inherited in a built schedule.
///
/// An unknown base rate is an error, never an implicit "Free".
pub fn resolve_in_tree<S>(
    tree: &ScheduleTree,
    source: &S,
    country: &str,
    code: &str,
) -> Result<EffectiveTariffResult, ResolveError>
where
    S: ProgramSource + ?Sized,
{
    let node = tree
        .find(code)
        .ok_or_else(|| ResolveError::CodeNotFound(code.to_string()))?;
    if !node.is_terminal {
        return Err(ResolveError::NotSelectable(code.to_string()));
    }

    match node.effective_rate {
        RateValue::Percent(base_rate) => Ok(resolve(source, base_rate, country, &node.id)),
        RateValue::Unknown => Err(ResolveError::UnknownBaseRate(code.to_string())),
    }
}

/// Precedence first, id second, so output never depends on config order.
fn display_order(a: &DutyProgram, b: &DutyProgram) -> Ordering {
    a.precedence()
        .cmp(&b.precedence())
        .then_with(|| a.id().cmp(b.id()))
}

fn contribution(program: &DutyProgram, rate: f64, is_waiver: bool, waived_by: Option<String>) -> ProgramContribution {
    ProgramContribution {
        program_id: program.id().to_string(),
        name: program.name().to_string(),
        kind: program.kind(),
        rate,
        is_waiver,
        waived_by,
        advisory: false,
        note: program.advisory_note().map(String::from),
    }
}

fn sanitize_base_rate(base_rate: f64, code: &str) -> f64 {
    if base_rate.is_finite() && base_rate >= 0.0 {
        base_rate
    } else {
        tracing::warn!(code, base_rate, "Invalid base rate, clamping to zero");
        0.0
    }
}

/// Four decimal places keep float noise out of displayed rates.
fn round_rate(rate: f64) -> f64 {
    (rate * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use dutyflow_model::DataSource;
    use dutyflow_registry::{
        CountryScope, DutyProgramRegistry, PrefixTier, ProgramConfig, RateRule, RegistryConfig,
    };
    use pretty_assertions::assert_eq;

    const TSHIRT: &str = "6109.10.00.04";

    fn only(countries: &[&str]) -> CountryScope {
        CountryScope::Only(countries.iter().map(|c| c.to_string()).collect())
    }

    /// Listed out of precedence order on purpose.
    fn registry() -> DutyProgramRegistry {
        let config = RegistryConfig {
            known_countries: vec![],
            programs: vec![
                ProgramConfig::new(
                    "emergency",
                    "Emergency surcharge",
                    ProgramKind::CountryEmergency,
                    RateRule::ByCountry {
                        rates: [("CN", 10.0), ("MX", 25.0), ("CA", 25.0)]
                            .into_iter()
                            .map(|(c, r)| (c.to_string(), r))
                            .collect(),
                        default: None,
                    },
                )
                .with_precedence(30),
                ProgramConfig::new(
                    "s301",
                    "Section 301",
                    ProgramKind::ChapterSurcharge,
                    RateRule::ByCodePrefix {
                        tiers: vec![PrefixTier {
                            prefixes: vec!["61".into()],
                            percent: 25.0,
                        }],
                        default: None,
                    },
                )
                .with_precedence(20)
                .with_countries(only(&["CN"])),
                ProgramConfig::new("mx-fta", "MX agreement", ProgramKind::TradeAgreement, RateRule::FullWaiver)
                    .with_precedence(1)
                    .with_countries(only(&["MX"])),
                ProgramConfig::new("ca-fta", "CA agreement", ProgramKind::TradeAgreement, RateRule::FullWaiver)
                    .with_precedence(1)
                    .with_countries(only(&["CA"]))
                    .also_waiving("emergency", &["CA"]),
                ProgramConfig::new("au-fta", "AU agreement", ProgramKind::TradeAgreement, RateRule::FullWaiver)
                    .with_precedence(1)
                    .with_countries(only(&["AU"])),
                ProgramConfig::new(
                    "au-extra",
                    "AU partial",
                    ProgramKind::TradeAgreement,
                    RateRule::PartialWaiver { points: 10.0 },
                )
                .with_precedence(2)
                .with_countries(only(&["AU"])),
                ProgramConfig::new(
                    "gsp",
                    "Preference program",
                    ProgramKind::TradeAgreement,
                    RateRule::PartialWaiver { points: 3.0 },
                )
                .with_precedence(1)
                .with_countries(only(&["IN"])),
                ProgramConfig::new(
                    "ad-tees",
                    "Antidumping order",
                    ProgramKind::Antidumping,
                    RateRule::Advisory {
                        note: Some("Rate varies by exporter".into()),
                    },
                )
                .with_precedence(40)
                .with_countries(only(&["VN"]))
                .with_code_prefixes(&["6109"]),
            ],
            fallback: vec![ProgramConfig::new(
                "fallback",
                "Default baseline surcharge",
                ProgramKind::Baseline,
                RateRule::Flat { percent: 10.0 },
            )],
        };
        DutyProgramRegistry::new(&config).unwrap()
    }

    fn ids(result: &EffectiveTariffResult) -> Vec<&str> {
        result.contributions.iter().map(|c| c.program_id.as_str()).collect()
    }

    #[test]
    fn test_additive_programs_stack() {
        let result = resolve(&registry(), 16.5, "CN", TSHIRT);
        assert_eq!(result.effective_rate, 51.5);
        assert_eq!(result.code, "6109100004");
        assert_eq!(ids(&result), vec!["mfn", "s301", "emergency"]);
        assert_eq!(result.data_source, DataSource::Configured);
    }

    #[test]
    fn test_full_waiver_zeroes_baseline_only() {
        let result = resolve(&registry(), 16.5, "MX", TSHIRT);
        assert_eq!(ids(&result), vec!["mfn", "mx-fta", "emergency"]);
        assert_eq!(result.contributions[1].rate, 16.5);
        assert!(result.contributions[1].is_waiver);
        assert_eq!(result.contributions[2].rate, 25.0);
        assert_eq!(result.effective_rate, 25.0);
    }

    #[test]
    fn test_explicit_exception_waives_emergency() {
        let result = resolve(&registry(), 16.5, "CA", TSHIRT);
        assert_eq!(result.effective_rate, 0.0);
        let emergency = &result.contributions[2];
        assert_eq!(emergency.program_id, "emergency");
        assert_eq!(emergency.rate, 0.0);
        assert_eq!(emergency.waived_by.as_deref(), Some("ca-fta"));
    }

    #[test]
    fn test_waiver_capped_at_base_rate() {
        let result = resolve(&registry(), 5.0, "AU", TSHIRT);
        let waivers: Vec<_> = result.waivers().map(|c| (c.program_id.as_str(), c.rate)).collect();
        assert_eq!(waivers, vec![("au-fta", 5.0), ("au-extra", 0.0)]);
        assert_eq!(result.effective_rate, 0.0);
    }

    #[test]
    fn test_partial_waiver() {
        let result = resolve(&registry(), 16.5, "IN", TSHIRT);
        assert_eq!(result.effective_rate, 13.5);

        let result = resolve(&registry(), 2.0, "IN", TSHIRT);
        assert_eq!(result.contributions[1].rate, 2.0);
        assert_eq!(result.effective_rate, 0.0);
    }

    #[test]
    fn test_advisory_flagged_without_rate() {
        let result = resolve(&registry(), 16.5, "VN", TSHIRT);
        assert!(result.has_advisories());
        let advisory = &result.contributions[1];
        assert_eq!(advisory.program_id, "ad-tees");
        assert_eq!(advisory.rate, 0.0);
        assert_eq!(advisory.note.as_deref(), Some("Rate varies by exporter"));
        assert_eq!(result.effective_rate, 16.5);
    }

    #[test]
    fn test_unknown_country_is_tagged_fallback() {
        let result = resolve(&registry(), 16.5, "ZZ", TSHIRT);
        assert_eq!(result.data_source, DataSource::Fallback);
        assert_eq!(ids(&result), vec!["mfn", "fallback"]);
        assert_eq!(result.effective_rate, 26.5);
    }

    #[test]
    fn test_never_negative() {
        let registry = registry();
        for base in [0.0, 0.5, 5.0, 16.5, 100.0, -3.0, f64::NAN] {
            for country in ["CN", "MX", "CA", "AU", "IN", "VN", "ZZ", ""] {
                let result = resolve(&registry, base, country, TSHIRT);
                assert!(result.effective_rate >= 0.0, "{} {} -> {}", base, country, result.effective_rate);
                let waived: f64 = result.waivers().map(|c| c.rate).sum();
                assert!(waived <= result.base_rate);
            }
        }
    }

    #[test]
    fn test_invalid_base_rate_clamped() {
        let result = resolve(&registry(), -4.0, "CN", TSHIRT);
        assert_eq!(result.base_rate, 0.0);
        assert_eq!(result.effective_rate, 35.0);
    }

    #[test]
    fn test_output_is_reproducible() {
        let registry = registry();
        let first = resolve(&registry, 16.5, "CN", TSHIRT);
        let second = resolve(&registry, 16.5, "CN", TSHIRT);
        assert_eq!(
            serde_json::to_string(&first.contributions).unwrap(),
            serde_json::to_string(&second.contributions).unwrap()
        );
    }

    #[test]
    fn test_resolves_through_trait_object() {
        let registry = registry();
        let source: &dyn ProgramSource = &registry;
        assert_eq!(resolve(source, 16.5, "CN", TSHIRT).effective_rate, 51.5);
    }
}
