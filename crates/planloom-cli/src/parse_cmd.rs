//! One-shot `planloom parse`: read captured model output, parse it with the
//! plan grammar, and print the admitted plan.

use std::io::Read;

use anyhow::{Context, Result, bail};

use planloom_core::plan::model::ReviewPolicy;
use planloom_core::plan::parser::{PlanParseError, parse_plan_text};
use planloom_core::store::{ArtifactCache, PlanStore};

/// Output format for the parsed plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutput {
    /// Full plan tree as JSON.
    Json,
    /// Compact human-readable outline.
    Outline,
}

/// Parse a plan text file (or stdin when `path` is `-`) and print it.
pub fn run_parse(path: &str, fallback_title: Option<&str>, output: ParseOutput) -> Result<()> {
    let raw = if path == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read plan text from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?
    };

    let fallback = fallback_title.unwrap_or("Untitled plan");
    let parsed = match parse_plan_text(&raw, fallback) {
        Ok(parsed) => parsed,
        Err(PlanParseError::EmptyPlan) => {
            bail!("no phases found: the input does not look like a plan");
        }
    };

    // Admit into a throwaway store so the printed plan carries ids,
    // timestamps, and aggregate metadata, exactly as the server would
    // return it.
    let store = PlanStore::new(ReviewPolicy::Execution, ArtifactCache::new());
    let plan = store.create_plan(parsed);

    match output {
        ParseOutput::Json => {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        ParseOutput::Outline => {
            println!("Plan: {} [{}]", plan.title, plan.status);
            if let Some(description) = &plan.description {
                println!("  {description}");
            }
            for phase in &plan.phases {
                println!();
                match &phase.estimated_time {
                    Some(et) => println!("Phase {}: {} ({et})", phase.order + 1, phase.label),
                    None => println!("Phase {}: {}", phase.order + 1, phase.label),
                }
                for step in &phase.steps {
                    let files = if step.files.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", step.files.join(", "))
                    };
                    println!(
                        "  {}.{} {} ({}){files}",
                        phase.order + 1,
                        step.order + 1,
                        step.label,
                        step.step_type,
                    );
                }
            }
            let total = plan.total_steps();
            println!();
            println!("{} phases, {} steps", plan.phases.len(), total);
        }
    }

    Ok(())
}
