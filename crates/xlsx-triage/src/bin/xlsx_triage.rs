use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use xlsx_triage::{
    apply, build_recipe, classify, diff, gate_check, scan, DiffReport, Finding, GateId,
    GateReport, PatchRecipe, Pattern,
};

#[derive(Parser)]
#[command(about = "Triage XLSX auto-repair triggers and apply byte-level patch recipes.")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ten structural gate checks against a workbook.
    Gate {
        input: PathBuf,
    },
    /// Diff a candidate workbook against its host-repaired counterpart.
    Diff {
        candidate: PathBuf,
        repaired: PathBuf,
    },
    /// Name the repair patterns visible in a candidate/repaired diff.
    Classify {
        candidate: PathBuf,
        repaired: PathBuf,
    },
    /// Build a patch recipe from gate findings, plus the repaired diff when
    /// one is available.
    Recipe {
        candidate: PathBuf,
        #[arg(long)]
        repaired: Option<PathBuf>,
        /// Write the recipe JSON here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply a recipe to a workbook and write the patched archive.
    Apply {
        candidate: PathBuf,
        #[arg(long)]
        recipe: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct GateOutput<'a> {
    path: String,
    pass: bool,
    failing_gates: BTreeMap<GateId, usize>,
    findings: BTreeMap<GateId, Vec<Finding>>,
    triage: Triage<'a>,
}

#[derive(Serialize)]
struct Triage<'a> {
    active_tab: &'a Option<xlsx_triage::gates::ActiveTabInfo>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Gate { input } => {
            let report = run_gates(&input)?;
            let out = GateOutput {
                path: input.display().to_string(),
                pass: report.pass_all(),
                failing_gates: report.failing_gates(),
                findings: report.findings(),
                triage: Triage {
                    active_tab: &report.active_tab,
                },
            };
            print_json(&out)?;
            if !report.pass_all() {
                std::process::exit(1);
            }
        }
        Command::Diff {
            candidate,
            repaired,
        } => {
            let report = run_diff(&candidate, &repaired)?;
            print_json(&report)?;
        }
        Command::Classify {
            candidate,
            repaired,
        } => {
            let report = run_diff(&candidate, &repaired)?;
            let patterns = classify(&report);
            print_json(&patterns)?;
        }
        Command::Recipe {
            candidate,
            repaired,
            output,
        } => {
            let gates = run_gates(&candidate)?;
            let patterns: Option<Vec<Pattern>> = match &repaired {
                Some(repaired) => Some(classify(&run_diff(&candidate, repaired)?)),
                None => None,
            };
            let source_file = candidate
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| candidate.display().to_string());
            let recipe = build_recipe(&source_file, Some(&gates), patterns.as_deref());
            let json = recipe.to_json();
            match output {
                Some(path) => fs::write(&path, json)
                    .with_context(|| format!("write recipe {}", path.display()))?,
                None => println!("{json}"),
            }
        }
        Command::Apply {
            candidate,
            recipe,
            output,
        } => {
            let archive = fs::read(&candidate)
                .with_context(|| format!("read workbook {}", candidate.display()))?;
            let recipe_json = fs::read_to_string(&recipe)
                .with_context(|| format!("read recipe {}", recipe.display()))?;
            let recipe = PatchRecipe::from_json(&recipe_json)
                .with_context(|| "parse recipe json".to_string())?;

            let (patched, skip_log) = apply(&archive, &recipe)?;
            fs::write(&output, patched)
                .with_context(|| format!("write workbook {}", output.display()))?;

            if !skip_log.is_empty() {
                eprintln!(
                    "{} placeholder op(s) skipped; fill them in and re-apply:",
                    skip_log.len()
                );
                for skipped in &skip_log.skipped {
                    eprintln!("  [{}] {} ({})", skipped.id, skipped.part, skipped.field);
                }
            }
        }
    }

    Ok(())
}

fn run_gates(input: &Path) -> Result<GateReport> {
    let bytes =
        fs::read(input).with_context(|| format!("read workbook {}", input.display()))?;
    let parts = scan(&bytes).with_context(|| format!("scan workbook {}", input.display()))?;
    Ok(gate_check(&parts))
}

fn run_diff(candidate: &Path, repaired: &Path) -> Result<DiffReport> {
    let candidate_bytes = fs::read(candidate)
        .with_context(|| format!("read workbook {}", candidate.display()))?;
    let repaired_bytes =
        fs::read(repaired).with_context(|| format!("read workbook {}", repaired.display()))?;
    let candidate_parts = scan(&candidate_bytes)
        .with_context(|| format!("scan workbook {}", candidate.display()))?;
    let repaired_parts = scan(&repaired_bytes)
        .with_context(|| format!("scan workbook {}", repaired.display()))?;
    Ok(diff(&candidate_parts, &repaired_parts))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize report")?;
    println!("{json}");
    Ok(())
}
