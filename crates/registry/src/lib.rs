//! Duty program registry.
//!
//! Provides the `ProgramSource` trait and its static-configuration
//! implementation. Lookups are pure and in-memory; the registry is
//! immutable once built. Refreshing configuration means building a new
//! registry and swapping it into a [`SharedRegistry`].

mod config;
mod program;

pub use config::{CountryScope, PrefixTier, ProgramConfig, RateRule, RegistryConfig, WaiverException};
pub use program::{normalize_country, DutyProgram, ProgramRate, WaiverExtent};

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use dutyflow_model::DataSource;
use thiserror::Error;

/// Configuration problems. These are fatal at startup, never per request.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid registry JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Registry has no programs")]
    EmptyPrograms,

    #[error("Registry has no fallback programs")]
    EmptyFallback,

    #[error("Program without an id")]
    MissingId,

    #[error("Duplicate program id: {0}")]
    DuplicateId(String),

    #[error("Program {program}: invalid rate {value}")]
    InvalidRate { program: String, value: f64 },

    #[error("Program {program}: invalid country code {country:?}")]
    InvalidCountry { program: String, country: String },

    #[error("Program {program}: invalid code scope {prefix:?}")]
    InvalidCodeScope { program: String, prefix: String },

    #[error("Program {0}: only trade agreements may waive")]
    WaiverOnNonAgreement(String),

    #[error("Program {0}: trade agreement without a waiver rule")]
    AgreementWithoutWaiver(String),

    #[error("Agreement {agreement} waives unknown program {program}")]
    UnknownWaivedProgram { agreement: String, program: String },

    #[error("Agreement {agreement} waives {program}, which is not additive")]
    WaivedProgramNotAdditive { agreement: String, program: String },
}

/// Programs applicable to one (country, code) lookup.
#[derive(Debug, Clone)]
pub struct ProgramSelection<'a> {
    /// Normalized country code, or the raw input if it was malformed
    pub country: String,
    /// Digit-only code
    pub code: String,
    pub programs: Vec<&'a DutyProgram>,
    pub data_source: DataSource,
}

impl ProgramSelection<'_> {
    /// Look up another selected program by id.
    pub fn program(&self, id: &str) -> Option<&DutyProgram> {
        self.programs.iter().copied().find(|p| p.id() == id)
    }
}

/// Trait for program lookups.
///
/// This abstraction lets callers inject test tables or alternative sources
/// without changing resolution logic.
pub trait ProgramSource {
    /// Every program applicable to `country` and `code`.
    fn programs_for(&self, country: &str, code: &str) -> ProgramSelection<'_>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// Immutable registry built from a validated `RegistryConfig`.
#[derive(Debug, Clone)]
pub struct DutyProgramRegistry {
    programs: Vec<DutyProgram>,
    fallback: Vec<DutyProgram>,
    known_countries: BTreeSet<String>,
}

impl DutyProgramRegistry {
    /// Validate configuration and build the registry.
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        if config.programs.is_empty() {
            return Err(RegistryError::EmptyPrograms);
        }
        if config.fallback.is_empty() {
            return Err(RegistryError::EmptyFallback);
        }

        let programs = compile_set(&config.programs)?;
        let fallback = compile_set(&config.fallback)?;
        check_exceptions(&programs)?;
        check_exceptions(&fallback)?;

        let mut known_countries = BTreeSet::new();
        for raw in &config.known_countries {
            let country = normalize_country(raw).ok_or_else(|| RegistryError::InvalidCountry {
                program: "known_countries".to_string(),
                country: raw.clone(),
            })?;
            known_countries.insert(country);
        }
        for program in &programs {
            known_countries.extend(program.named_countries().into_iter().map(String::from));
        }

        tracing::debug!(
            programs = programs.len(),
            fallback = fallback.len(),
            countries = known_countries.len(),
            "Built duty program registry"
        );

        Ok(Self {
            programs,
            fallback,
            known_countries,
        })
    }

    /// Registry over the built-in program table.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(&RegistryConfig::builtin())
    }

    /// Parse and validate JSON configuration.
    pub fn from_json(text: &str) -> Result<Self, RegistryError> {
        let config = RegistryConfig::from_json(text)?;
        Self::new(&config)
    }

    pub fn is_known_country(&self, country: &str) -> bool {
        normalize_country(country).is_some_and(|c| self.known_countries.contains(&c))
    }

    pub fn programs(&self) -> &[DutyProgram] {
        &self.programs
    }

    pub fn fallback_programs(&self) -> &[DutyProgram] {
        &self.fallback
    }
}

fn compile_set(configs: &[ProgramConfig]) -> Result<Vec<DutyProgram>, RegistryError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(configs.len());
    for config in configs {
        let program = DutyProgram::compile(config)?;
        if !seen.insert(program.id().to_string()) {
            return Err(RegistryError::DuplicateId(program.id().to_string()));
        }
        out.push(program);
    }
    Ok(out)
}

/// Every `also_waives` entry must name an additive program in the same set.
fn check_exceptions(programs: &[DutyProgram]) -> Result<(), RegistryError> {
    for agreement in programs {
        for waived in agreement.waived_programs() {
            let target = programs.iter().find(|p| p.id() == waived).ok_or_else(|| {
                RegistryError::UnknownWaivedProgram {
                    agreement: agreement.id().to_string(),
                    program: waived.to_string(),
                }
            })?;
            if target.waives_baseline() {
                return Err(RegistryError::WaivedProgramNotAdditive {
                    agreement: agreement.id().to_string(),
                    program: waived.to_string(),
                });
            }
        }
    }
    Ok(())
}

impl ProgramSource for DutyProgramRegistry {
    fn programs_for(&self, country: &str, code: &str) -> ProgramSelection<'_> {
        let code: String = code.chars().filter(char::is_ascii_digit).collect();

        let known = normalize_country(country).filter(|c| self.known_countries.contains(c));
        let (country, set, data_source) = match known {
            Some(country) => (country, &self.programs, DataSource::Configured),
            None => {
                tracing::warn!(country, code = %code, "Unknown country, using fallback program set");
                let country = normalize_country(country).unwrap_or_else(|| country.trim().to_string());
                (country, &self.fallback, DataSource::Fallback)
            }
        };

        let programs = set.iter().filter(|p| p.applies_to(&country, &code)).collect();

        ProgramSelection {
            country,
            code,
            programs,
            data_source,
        }
    }

    fn name(&self) -> &str {
        "static-registry"
    }
}

/// Cloneable handle to the current registry.
///
/// Readers take a snapshot `Arc` and keep using it for the whole request;
/// `swap` replaces the entire registry at once.
#[derive(Debug, Clone)]
pub struct SharedRegistry {
    inner: Arc<RwLock<Arc<DutyProgramRegistry>>>,
}

impl SharedRegistry {
    pub fn new(registry: DutyProgramRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Snapshot of the current registry.
    pub fn current(&self) -> Arc<DutyProgramRegistry> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Install a new registry, returning the previous one.
    pub fn swap(&self, registry: DutyProgramRegistry) -> Arc<DutyProgramRegistry> {
        let next = Arc::new(registry);
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::debug!("Swapped duty program registry");
        std::mem::replace(&mut *guard, next)
    }
}
