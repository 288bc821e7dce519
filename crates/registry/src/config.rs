//! Static duty-program configuration.
//!
//! The registry is built once from a `RegistryConfig`; nothing here is
//! mutated afterwards. Configuration may come from JSON or from
//! [`RegistryConfig::builtin`].

use std::collections::BTreeMap;

use dutyflow_model::ProgramKind;
use serde::{Deserialize, Serialize};

/// Which partner countries a program covers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "scope", content = "countries", rename_all = "snake_case")]
pub enum CountryScope {
    #[default]
    All,
    Only(Vec<String>),
    Except(Vec<String>),
}

/// A set of code prefixes sharing one surcharge rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixTier {
    pub prefixes: Vec<String>,
    pub percent: f64,
}

/// How a program's contribution is computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateRule {
    /// Same additive rate for every covered code and country
    Flat { percent: f64 },

    /// Longest matching prefix wins (chapter-tiered lists)
    ByCodePrefix {
        tiers: Vec<PrefixTier>,
        #[serde(default)]
        default: Option<f64>,
    },

    /// Rate depends only on the partner country
    ByCountry {
        rates: BTreeMap<String, f64>,
        #[serde(default)]
        default: Option<f64>,
    },

    /// Zeroes the baseline
    FullWaiver,

    /// Removes up to `points` percentage points of the baseline
    PartialWaiver { points: f64 },

    /// Order exists but its case-specific rate is not known here
    Advisory {
        #[serde(default)]
        note: Option<String>,
    },
}

impl RateRule {
    pub fn is_waiver(&self) -> bool {
        matches!(self, Self::FullWaiver | Self::PartialWaiver { .. })
    }

    /// Every configured number, for validation.
    pub(crate) fn values(&self) -> Vec<f64> {
        match self {
            Self::Flat { percent } => vec![*percent],
            Self::ByCodePrefix { tiers, default } => tiers
                .iter()
                .map(|t| t.percent)
                .chain(default.iter().copied())
                .collect(),
            Self::ByCountry { rates, default } => rates.values().copied().chain(default.iter().copied()).collect(),
            Self::PartialWaiver { points } => vec![*points],
            Self::FullWaiver | Self::Advisory { .. } => Vec::new(),
        }
    }
}

/// Explicit exception: an agreement that also zeroes another program for
/// specific partners. Never inferred from the agreement type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaiverException {
    pub program: String,
    pub countries: Vec<String>,
}

/// One duty program as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub id: String,
    pub name: String,
    pub kind: ProgramKind,

    /// Display order within its group
    #[serde(default)]
    pub precedence: i32,

    #[serde(default)]
    pub countries: CountryScope,

    /// Two-digit chapters covered (empty = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<String>,

    /// Code prefixes covered (empty = all)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_prefixes: Vec<String>,

    pub rate: RateRule,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_waives: Vec<WaiverException>,
}

impl ProgramConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ProgramKind, rate: RateRule) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            precedence: 0,
            countries: CountryScope::All,
            chapters: Vec::new(),
            code_prefixes: Vec::new(),
            rate,
            also_waives: Vec::new(),
        }
    }

    pub fn with_precedence(mut self, precedence: i32) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_countries(mut self, countries: CountryScope) -> Self {
        self.countries = countries;
        self
    }

    pub fn with_chapters(mut self, chapters: &[&str]) -> Self {
        self.chapters = chapters.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_code_prefixes(mut self, prefixes: &[&str]) -> Self {
        self.code_prefixes = prefixes.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn also_waiving(mut self, program: &str, countries: &[&str]) -> Self {
        self.also_waives.push(WaiverException {
            program: program.to_string(),
            countries: countries.iter().map(|c| c.to_string()).collect(),
        });
        self
    }
}

/// Complete registry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Countries with complete data even if no program names them
    #[serde(default)]
    pub known_countries: Vec<String>,

    pub programs: Vec<ProgramConfig>,

    /// Conservative set used for countries the registry knows nothing about
    pub fallback: Vec<ProgramConfig>,
}

fn only(countries: &[&str]) -> CountryScope {
    CountryScope::Only(countries.iter().map(|c| c.to_string()).collect())
}

fn tier(prefixes: &[&str], percent: f64) -> PrefixTier {
    PrefixTier {
        prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        percent,
    }
}

impl RegistryConfig {
    /// Parse configuration from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Check the configuration without keeping the compiled registry.
    pub fn validate(&self) -> Result<(), crate::RegistryError> {
        crate::DutyProgramRegistry::new(self).map(|_| ())
    }

    /// Illustrative built-in program table.
    ///
    /// Rates are representative of a US import schedule, not a legal source.
    pub fn builtin() -> Self {
        let programs = vec![
            ProgramConfig::new(
                "reciprocal-baseline",
                "Reciprocal baseline surcharge",
                ProgramKind::Baseline,
                RateRule::Flat { percent: 10.0 },
            )
            .with_precedence(10)
            .with_countries(CountryScope::Except(vec!["MX".into(), "CA".into()])),
            ProgramConfig::new(
                "section-301",
                "Section 301 list surcharge",
                ProgramKind::ChapterSurcharge,
                RateRule::ByCodePrefix {
                    tiers: vec![
                        tier(&["61", "62", "84", "85", "94"], 25.0),
                        tier(&["64", "95"], 7.5),
                        tier(&["8541", "8542"], 50.0),
                    ],
                    default: None,
                },
            )
            .with_precedence(20)
            .with_countries(only(&["CN"])),
            ProgramConfig::new(
                "emergency-surcharge",
                "Emergency country surcharge",
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
                "usmca",
                "USMCA preferential treatment",
                ProgramKind::TradeAgreement,
                RateRule::FullWaiver,
            )
            .with_precedence(1)
            .with_countries(only(&["MX", "CA"]))
            .also_waiving("emergency-surcharge", &["MX", "CA"]),
            ProgramConfig::new("korus", "KORUS FTA", ProgramKind::TradeAgreement, RateRule::FullWaiver)
                .with_precedence(2)
                .with_countries(only(&["KR"])),
            ProgramConfig::new("ausfta", "Australia FTA", ProgramKind::TradeAgreement, RateRule::FullWaiver)
                .with_precedence(2)
                .with_countries(only(&["AU"])),
            ProgramConfig::new("jofta", "Jordan FTA", ProgramKind::TradeAgreement, RateRule::FullWaiver)
                .with_precedence(2)
                .with_countries(only(&["JO"])),
            ProgramConfig::new(
                "adcvd-nails",
                "Antidumping order: steel nails",
                ProgramKind::Antidumping,
                RateRule::Advisory {
                    note: Some("Manufacturer-specific cash deposit rate".into()),
                },
            )
            .with_precedence(40)
            .with_countries(only(&["CN", "VN"]))
            .with_code_prefixes(&["7317"]),
            ProgramConfig::new(
                "cvd-aluminum-extrusions",
                "Countervailing duty: aluminum extrusions",
                ProgramKind::Antidumping,
                RateRule::Flat { percent: 14.0 },
            )
            .with_precedence(41)
            .with_countries(only(&["CN"]))
            .with_code_prefixes(&["7604", "7608"]),
        ];

        let fallback = vec![ProgramConfig::new(
            "fallback-baseline",
            "Default baseline surcharge",
            ProgramKind::Baseline,
            RateRule::Flat { percent: 10.0 },
        )
        .with_precedence(10)];

        Self {
            known_countries: ["US", "GB", "DE", "FR", "IT", "JP", "VN", "IN", "BD", "KH", "ID", "TW", "TH"]
                .into_iter()
                .map(String::from)
                .collect(),
            programs,
            fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_json_shape() {
        let json = r#"{
            "programs": [
                {
                    "id": "s301",
                    "name": "Section 301",
                    "kind": "chapter_surcharge",
                    "precedence": 20,
                    "countries": {"scope": "only", "countries": ["CN"]},
                    "rate": {"type": "by_code_prefix", "tiers": [{"prefixes": ["61"], "percent": 25.0}]}
                },
                {
                    "id": "usmca",
                    "name": "USMCA",
                    "kind": "trade_agreement",
                    "countries": {"scope": "only", "countries": ["MX"]},
                    "rate": {"type": "full_waiver"}
                }
            ],
            "fallback": [
                {"id": "fb", "name": "Fallback", "kind": "baseline", "rate": {"type": "flat", "percent": 10.0}}
            ]
        }"#;

        let config = RegistryConfig::from_json(json).unwrap();
        assert_eq!(config.programs.len(), 2);
        assert_eq!(config.programs[0].countries, CountryScope::Only(vec!["CN".into()]));
        assert!(config.programs[1].rate.is_waiver());
        assert_eq!(config.fallback[0].countries, CountryScope::All);
    }

    #[test]
    fn test_builtin_round_trips_through_json() {
        let config = RegistryConfig::builtin();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(RegistryConfig::from_json(&json).unwrap(), config);
    }
}
