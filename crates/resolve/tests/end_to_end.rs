//! Schedule rows through the builder and into the resolver.

use dutyflow_hierarchy::{build, HierarchyConfig};
use dutyflow_model::{DataSource, ProgramKind, RateValue, ScheduleRow, ScheduleTree};
use dutyflow_registry::{
    CountryScope, DutyProgramRegistry, PrefixTier, ProgramConfig, RateRule, RegistryConfig, SharedRegistry,
};
use dutyflow_resolve::{resolve_in_tree, ResolveError};
use pretty_assertions::assert_eq;

fn schedule() -> ScheduleTree {
    let rows = vec![
        ScheduleRow::new("6109", "T-shirts, singlets, tank tops and similar garments", 0).with_rate("16.5%"),
        ScheduleRow::new("6109.10", "Of cotton", 1),
        ScheduleRow::new("6109.10.00.04", "T-shirts, all white, short hemmed sleeves", 2),
        ScheduleRow::new("6110", "Sweaters, pullovers", 0),
        ScheduleRow::new("6110.20.20.10", "Of cotton", 1),
    ];
    build(&rows, &HierarchyConfig::default())
}

fn registry() -> DutyProgramRegistry {
    let config = RegistryConfig {
        known_countries: vec!["AU".into()],
        programs: vec![
            ProgramConfig::new(
                "chapter-surcharge",
                "Chapter surcharge",
                ProgramKind::ChapterSurcharge,
                RateRule::ByCodePrefix {
                    tiers: vec![PrefixTier {
                        prefixes: vec!["61".into(), "62".into()],
                        percent: 25.0,
                    }],
                    default: None,
                },
            )
            .with_precedence(20)
            .with_countries(CountryScope::Only(vec!["CN".into()])),
            ProgramConfig::new(
                "emergency-baseline",
                "Emergency baseline surcharge",
                ProgramKind::CountryEmergency,
                RateRule::Flat { percent: 10.0 },
            )
            .with_precedence(30)
            .with_countries(CountryScope::Only(vec!["CN".into()])),
            ProgramConfig::new(
                "partner-fta",
                "Partner free trade agreement",
                ProgramKind::TradeAgreement,
                RateRule::FullWaiver,
            )
            .with_precedence(1)
            .with_countries(CountryScope::Only(vec!["AU".into()])),
        ],
        fallback: vec![ProgramConfig::new(
            "fallback-baseline",
            "Default baseline surcharge",
            ProgramKind::Baseline,
            RateRule::Flat { percent: 10.0 },
        )],
    };
    DutyProgramRegistry::new(&config).unwrap()
}

#[test]
fn terminal_inherits_heading_rate() {
    let tree = schedule();
    assert_eq!(tree.find("6109.10.00.04").unwrap().effective_rate, RateValue::Percent(16.5));
}

#[test]
fn china_stacks_chapter_and_emergency_surcharges() {
    let result = resolve_in_tree(&schedule(), &registry(), "CN", "6109.10.00.04").unwrap();
    assert_eq!(result.base_rate, 16.5);
    assert_eq!(result.effective_rate, 51.5);
    let ids: Vec<_> = result.contributions.iter().map(|c| c.program_id.as_str()).collect();
    assert_eq!(ids, vec!["mfn", "chapter-surcharge", "emergency-baseline"]);
}

#[test]
fn full_waiver_partner_pays_nothing() {
    let result = resolve_in_tree(&schedule(), &registry(), "AU", "6109.10.00.04").unwrap();
    assert_eq!(result.effective_rate, 0.0);
    assert_eq!(result.data_source, DataSource::Configured);
    assert_eq!(result.contributions[1].rate, 16.5);
    assert!(result.contributions[1].is_waiver);
}

#[test]
fn unknown_base_rate_is_an_error_not_free() {
    let result = resolve_in_tree(&schedule(), &registry(), "CN", "6110.20.20.10");
    assert_eq!(result, Err(ResolveError::UnknownBaseRate("6110.20.20.10".into())));
}

#[test]
fn lookup_errors() {
    let tree = schedule();
    assert_eq!(
        resolve_in_tree(&tree, &registry(), "CN", "6201.00.00.00"),
        Err(ResolveError::CodeNotFound("6201.00.00.00".into()))
    );
    assert_eq!(
        resolve_in_tree(&tree, &registry(), "CN", "6109.10"),
        Err(ResolveError::NotSelectable("6109.10".into()))
    );
}

#[test]
fn fallback_result_is_flagged_and_estimates_duty() {
    let shared = SharedRegistry::new(registry());
    let snapshot = shared.current();
    let result = resolve_in_tree(&schedule(), snapshot.as_ref(), "ZZ", "6109.10.00.04").unwrap();

    assert_eq!(result.data_source, DataSource::Fallback);
    assert_eq!(result.effective_rate, 26.5);
    assert_eq!(result.estimate_duty(200.0).duty_amount, 53.0);
}

#[test]
fn concurrent_resolution_during_registry_swaps() {
    let tree = schedule();
    let shared = SharedRegistry::new(registry());

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let (tree, shared) = (&tree, shared.clone());
            scope.spawn(move || {
                for _ in 0..100 {
                    let snapshot = shared.current();
                    let result = resolve_in_tree(tree, snapshot.as_ref(), "CN", "6109.10.00.04").unwrap();
                    // 16.5 + 25 + 10 from the test registry, 16.5 + 10 + 25 + 10 from the built-in one
                    assert!(
                        result.effective_rate == 51.5 || result.effective_rate == 61.5,
                        "unexpected rate {}",
                        result.effective_rate
                    );
                }
            });
        }

        let writer = shared.clone();
        scope.spawn(move || {
            for i in 0..50 {
                let next = if i % 2 == 0 { DutyProgramRegistry::builtin().unwrap() } else { registry() };
                writer.swap(next);
            }
        });
    });
}
