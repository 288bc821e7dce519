//! Evaluation CLI for checking schedule and tariff stack output.
//!
//! Usage:
//!     eval tree --rows rows.json --product-type t-shirt --material cotton
//!     eval resolve 6109.10.00.04 --country CN --rows rows.json --value 1000
//!     eval check-registry --registry programs.json

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dutyflow_explain::{confidence, describe_rate, explain_result, summarize_estimate, summarize_result, Explanation};
use dutyflow_hierarchy::{build, HierarchyConfig};
use dutyflow_model::{
    format_percent, EffectiveTariffResult, HierarchyNode, ProductKeywords, ScheduleRow, ScheduleTree,
};
use dutyflow_registry::{DutyProgramRegistry, ProgramSource};
use dutyflow_relevance::{best_match, prune, score, RelevanceConfig};
use dutyflow_resolve::{resolve, resolve_in_tree};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "eval")]
#[command(about = "Evaluate schedule hierarchy and tariff stack output")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Program registry JSON (built-in programs when omitted)
    #[arg(long, global = true)]
    registry: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and score a schedule hierarchy
    Tree {
        /// Path to schedule rows JSON
        #[arg(short, long)]
        rows: String,

        /// Product type keywords (comma-separated)
        #[arg(long)]
        product_type: Option<String>,

        /// Demographic keywords (comma-separated)
        #[arg(long)]
        demographic: Option<String>,

        /// Material keywords (comma-separated)
        #[arg(long)]
        material: Option<String>,

        /// Drop branches scoring below this
        #[arg(long)]
        min_score: Option<u8>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Resolve the effective tariff for a code and origin country
    Resolve {
        /// Schedule code (dots optional)
        code: String,

        /// ISO 3166-1 alpha-2 origin country
        #[arg(short, long)]
        country: String,

        /// MFN base rate in percent
        #[arg(long, conflicts_with = "rows")]
        base_rate: Option<f64>,

        /// Path to schedule rows JSON; the base rate is inherited from it
        #[arg(short, long)]
        rows: Option<String>,

        /// Customs value for a duty estimate
        #[arg(long)]
        value: Option<f64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate a program registry file
    CheckRegistry,
}

#[derive(Serialize)]
struct ResolveReport<'a> {
    result: &'a EffectiveTariffResult,
    explanations: Vec<Explanation>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dutyflow=debug".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Tree {
            rows,
            product_type,
            demographic,
            material,
            min_score,
            format,
        } => {
            let keywords = ProductKeywords::default()
                .with_product_types(split_list(product_type))
                .with_demographics(split_list(demographic))
                .with_materials(split_list(material));
            run_tree(&rows, &keywords, min_score, &format).await?;
        }
        Commands::Resolve {
            code,
            country,
            base_rate,
            rows,
            value,
            format,
        } => {
            let registry = load_registry(cli.registry.as_deref()).await?;
            run_resolve(&registry, &code, &country, base_rate, rows.as_deref(), value, &format).await?;
        }
        Commands::CheckRegistry => {
            run_check_registry(cli.registry.as_deref()).await?;
        }
    }

    Ok(())
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

async fn load_rows(path: &str) -> Result<ScheduleTree> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading rows from {}", path))?;
    let rows: Vec<ScheduleRow> =
        serde_json::from_str(&text).with_context(|| format!("parsing rows in {}", path))?;
    Ok(build(&rows, &HierarchyConfig::default()))
}

async fn load_registry(path: Option<&str>) -> Result<DutyProgramRegistry> {
    match path {
        Some(path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading registry from {}", path))?;
            DutyProgramRegistry::from_json(&text).with_context(|| format!("invalid registry {}", path))
        }
        None => DutyProgramRegistry::builtin().context("built-in registry"),
    }
}

async fn run_tree(rows_path: &str, keywords: &ProductKeywords, min_score: Option<u8>, format: &str) -> Result<()> {
    let mut tree = load_rows(rows_path).await?;
    let summary = score(&mut tree, keywords, &RelevanceConfig::default());
    let removed = min_score.map(|min| prune(&mut tree, min)).unwrap_or(0);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    for root in &tree.roots {
        print_node(root);
    }

    println!("\n---");
    println!(
        "Nodes: {} | Boosted: {} | Penalized: {} | Pruned: {} | Dropped rows: {}",
        tree.node_count(),
        summary.boosted,
        summary.penalized,
        removed,
        tree.dropped_rows
    );
    for warning in &tree.warnings {
        println!("Warning: {:?}", warning);
    }
    if let Some(best) = best_match(&tree) {
        println!("Best match: {} {}", best.display_code.as_deref().unwrap_or(&best.id), best.qualified_label);
    }

    Ok(())
}

fn print_node(node: &HierarchyNode) {
    let code = node.display_code.as_deref().unwrap_or("");
    let marker = if node.is_terminal { "*" } else { " " };
    println!(
        "{}{}{:<14} {:<40} {:>8}  [{}]",
        "  ".repeat(node.depth),
        marker,
        code,
        node.label,
        node.effective_rate.to_string(),
        node.relevance_score
    );
    for child in &node.children {
        print_node(child);
    }
}

async fn run_resolve(
    registry: &DutyProgramRegistry,
    code: &str,
    country: &str,
    base_rate: Option<f64>,
    rows_path: Option<&str>,
    value: Option<f64>,
    format: &str,
) -> Result<()> {
    let result = match (base_rate, rows_path) {
        (Some(rate), _) => resolve(registry, rate, country, code),
        (None, Some(path)) => {
            let tree = load_rows(path).await?;
            if let Some(node) = tree.find(code) {
                tracing::debug!(code, rate = %describe_rate(&node.effective_rate), "Schedule base rate");
            }
            resolve_in_tree(&tree, registry, country, code)?
        }
        (None, None) => anyhow::bail!("either --base-rate or --rows is required"),
    };

    if format == "json" {
        let report = ResolveReport {
            result: &result,
            explanations: explain_result(&result),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Code {} from {} ({})", result.code, result.country, registry.name());
    println!("---");
    for line in explain_result(&result) {
        println!("{:>8}  {}", line.amount, line.summary);
        println!("          {}", line.detail);
    }
    println!("---");
    println!("{}", summarize_result(&result));
    println!("Confidence: {:?}", confidence(&result));
    if let Some(value) = value {
        println!("{}", summarize_estimate(&result, value));
    }

    Ok(())
}

async fn run_check_registry(path: Option<&str>) -> Result<()> {
    print!("Checking {} registry... ", path.unwrap_or("built-in"));

    match load_registry(path).await {
        Ok(registry) => {
            println!("OK");
            for program in registry.programs() {
                println!(
                    "  {:<28} {:<22} precedence {}",
                    program.id(),
                    program.kind().label(),
                    program.precedence()
                );
            }
            println!("  fallback: {} programs", registry.fallback_programs().len());
            let sample = resolve(&registry, 0.0, "US", "6109100004");
            println!(
                "  US sample: {} lines, {} surcharge",
                sample.contributions.len(),
                format_percent(sample.effective_rate)
            );
            Ok(())
        }
        Err(e) => {
            println!("FAILED: {:#}", e);
            std::process::exit(1);
        }
    }
}
