//! Compiled, immutable duty programs.

use std::collections::{BTreeMap, BTreeSet};

use dutyflow_features::{chapter, parse_code};
use dutyflow_model::ProgramKind;

use crate::config::{CountryScope, ProgramConfig, RateRule};
use crate::RegistryError;

/// How much of the baseline a waiver removes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaiverExtent {
    Full,
    Points(f64),
}

/// A program's contribution for one (country, code) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgramRate {
    /// Percentage points added on top of the baseline
    Additive(f64),
    /// Baseline reduction
    Waiver(WaiverExtent),
    /// Applies, but the rate is case-specific
    Advisory,
}

#[derive(Debug, Clone)]
enum Countries {
    All,
    Only(BTreeSet<String>),
    Except(BTreeSet<String>),
}

#[derive(Debug, Clone)]
enum Rule {
    Flat(f64),
    ByCodePrefix {
        tiers: Vec<(String, f64)>,
        default: Option<f64>,
    },
    ByCountry {
        rates: BTreeMap<String, f64>,
        default: Option<f64>,
    },
    FullWaiver,
    PartialWaiver(f64),
    Advisory(Option<String>),
}

/// A duty program with normalized scopes.
#[derive(Debug, Clone)]
pub struct DutyProgram {
    id: String,
    name: String,
    kind: ProgramKind,
    precedence: i32,
    countries: Countries,
    chapters: BTreeSet<String>,
    code_prefixes: Vec<String>,
    rule: Rule,
    /// program id -> partner countries it is also waived for
    also_waives: BTreeMap<String, BTreeSet<String>>,
}

/// Uppercase ISO-2 code, or `None` if malformed.
pub fn normalize_country(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code)
    } else {
        None
    }
}

fn country_set(program: &str, countries: &[String]) -> Result<BTreeSet<String>, RegistryError> {
    countries
        .iter()
        .map(|c| {
            normalize_country(c).ok_or_else(|| RegistryError::InvalidCountry {
                program: program.to_string(),
                country: c.clone(),
            })
        })
        .collect()
}

fn prefix(program: &str, raw: &str) -> Result<String, RegistryError> {
    parse_code(raw, 2, 10).map_err(|_| RegistryError::InvalidCodeScope {
        program: program.to_string(),
        prefix: raw.to_string(),
    })
}

fn check_rate(program: &str, value: f64) -> Result<(), RegistryError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(RegistryError::InvalidRate {
            program: program.to_string(),
            value,
        })
    }
}

impl DutyProgram {
    /// Validate and normalize one configured program.
    pub(crate) fn compile(config: &ProgramConfig) -> Result<Self, RegistryError> {
        let id = config.id.trim();
        if id.is_empty() {
            return Err(RegistryError::MissingId);
        }

        for value in config.rate.values() {
            check_rate(id, value)?;
        }

        let is_agreement = config.kind == ProgramKind::TradeAgreement;
        if config.rate.is_waiver() && !is_agreement {
            return Err(RegistryError::WaiverOnNonAgreement(id.to_string()));
        }
        if is_agreement && !config.rate.is_waiver() {
            return Err(RegistryError::AgreementWithoutWaiver(id.to_string()));
        }
        if !is_agreement && !config.also_waives.is_empty() {
            return Err(RegistryError::WaiverOnNonAgreement(id.to_string()));
        }

        let countries = match &config.countries {
            CountryScope::All => Countries::All,
            CountryScope::Only(list) => Countries::Only(country_set(id, list)?),
            CountryScope::Except(list) => Countries::Except(country_set(id, list)?),
        };

        let chapters = config
            .chapters
            .iter()
            .map(|c| {
                let digits = prefix(id, c)?;
                if digits.len() == 2 {
                    Ok(digits)
                } else {
                    Err(RegistryError::InvalidCodeScope {
                        program: id.to_string(),
                        prefix: c.clone(),
                    })
                }
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        let code_prefixes = config
            .code_prefixes
            .iter()
            .map(|p| prefix(id, p))
            .collect::<Result<Vec<_>, _>>()?;

        let rule = match &config.rate {
            RateRule::Flat { percent } => Rule::Flat(*percent),
            RateRule::ByCodePrefix { tiers, default } => {
                let mut flat = Vec::new();
                for t in tiers {
                    for p in &t.prefixes {
                        flat.push((prefix(id, p)?, t.percent));
                    }
                }
                Rule::ByCodePrefix {
                    tiers: flat,
                    default: *default,
                }
            }
            RateRule::ByCountry { rates, default } => {
                let mut normalized = BTreeMap::new();
                for (country, rate) in rates {
                    let code = normalize_country(country).ok_or_else(|| RegistryError::InvalidCountry {
                        program: id.to_string(),
                        country: country.clone(),
                    })?;
                    normalized.insert(code, *rate);
                }
                Rule::ByCountry {
                    rates: normalized,
                    default: *default,
                }
            }
            RateRule::FullWaiver => Rule::FullWaiver,
            RateRule::PartialWaiver { points } => Rule::PartialWaiver(*points),
            RateRule::Advisory { note } => Rule::Advisory(note.clone()),
        };

        let mut also_waives: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for exception in &config.also_waives {
            also_waives
                .entry(exception.program.trim().to_string())
                .or_default()
                .extend(country_set(id, &exception.countries)?);
        }

        Ok(Self {
            id: id.to_string(),
            name: config.name.clone(),
            kind: config.kind,
            precedence: config.precedence,
            countries,
            chapters,
            code_prefixes,
            rule,
            also_waives,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn precedence(&self) -> i32 {
        self.precedence
    }

    /// True only for trade-agreement programs.
    pub fn waives_baseline(&self) -> bool {
        matches!(self.rule, Rule::FullWaiver | Rule::PartialWaiver(_))
    }

    /// Note attached to advisory programs.
    pub fn advisory_note(&self) -> Option<&str> {
        match &self.rule {
            Rule::Advisory(note) => note.as_deref(),
            _ => None,
        }
    }

    /// Whether this agreement also zeroes `program` for `country`.
    pub fn waives(&self, program: &str, country: &str) -> bool {
        self.also_waives
            .get(program)
            .is_some_and(|countries| countries.contains(country))
    }

    /// Programs named in `also_waives`.
    pub(crate) fn waived_programs(&self) -> impl Iterator<Item = &str> {
        self.also_waives.keys().map(String::as_str)
    }

    /// Countries this program names explicitly.
    pub(crate) fn named_countries(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Countries::Only(set) = &self.countries {
            out.extend(set.iter().map(String::as_str));
        }
        if let Rule::ByCountry { rates, .. } = &self.rule {
            out.extend(rates.keys().map(String::as_str));
        }
        for countries in self.also_waives.values() {
            out.extend(countries.iter().map(String::as_str));
        }
        out
    }

    fn covers_country(&self, country: &str) -> bool {
        match &self.countries {
            Countries::All => true,
            Countries::Only(set) => set.contains(country),
            Countries::Except(set) => !set.contains(country),
        }
    }

    fn covers_code(&self, code: &str) -> bool {
        let chapter_ok = self.chapters.is_empty() || chapter(code).is_some_and(|c| self.chapters.contains(c));
        let prefix_ok = self.code_prefixes.is_empty() || self.code_prefixes.iter().any(|p| code.starts_with(p.as_str()));
        chapter_ok && prefix_ok
    }

    /// Contribution for a normalized country and digit code, or `None` when
    /// the program does not apply.
    pub fn rate(&self, country: &str, code: &str) -> Option<ProgramRate> {
        if !self.covers_country(country) || !self.covers_code(code) {
            return None;
        }

        match &self.rule {
            Rule::Flat(percent) => Some(ProgramRate::Additive(*percent)),
            Rule::ByCodePrefix { tiers, default } => tiers
                .iter()
                .filter(|(p, _)| code.starts_with(p.as_str()))
                .max_by_key(|(p, _)| p.len())
                .map(|(_, rate)| *rate)
                .or(*default)
                .map(ProgramRate::Additive),
            Rule::ByCountry { rates, default } => rates
                .get(country)
                .copied()
                .or(*default)
                .map(ProgramRate::Additive),
            Rule::FullWaiver => Some(ProgramRate::Waiver(WaiverExtent::Full)),
            Rule::PartialWaiver(points) => Some(ProgramRate::Waiver(WaiverExtent::Points(*points))),
            Rule::Advisory(_) => Some(ProgramRate::Advisory),
        }
    }

    pub fn applies_to(&self, country: &str, code: &str) -> bool {
        self.rate(country, code).is_some()
    }
}
