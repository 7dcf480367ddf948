//! fabcalc CLI - recalculate fabrication estimates stored as JSON

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fabcalc::prelude::*;
use fabcalc::{CalculationReport, EntityId, Recalculated};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "fabcalc")]
#[command(author, version, about = "Estimate worksheet recalculation tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recalculate an entity and print the recalculated aggregate as JSON
    Recalc {
        /// Revision graph (JSON: one revision or an array of revisions)
        input: PathBuf,

        /// What to recalculate
        #[arg(value_enum)]
        level: Level,

        /// Id of the row, worksheet, package or revision
        id: EntityId,

        /// Write the updated revision graph to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        calc: CalcArgs,
    },

    /// Print the stored column totals of a worksheet
    Totals {
        /// Revision graph
        input: PathBuf,

        /// Worksheet id
        worksheet: EntityId,
    },

    /// Print a stored summary as JSON
    Summary {
        /// Revision graph
        input: PathBuf,

        /// Worksheet, package or revision
        #[arg(value_enum)]
        level: Level,

        /// Id of the entity
        id: EntityId,
    },

    /// Check a formula against the columns of a worksheet
    Validate {
        /// Revision graph
        input: PathBuf,

        /// Worksheet id
        worksheet: EntityId,

        /// Formula text
        formula: String,

        /// Check as the new formula of this column
        #[arg(short, long)]
        column: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Level {
    Row,
    Worksheet,
    Package,
    Revision,
}

#[derive(Args)]
struct CalcArgs {
    /// Fail cells that divide by zero instead of storing 0
    #[arg(long)]
    strict_division: bool,

    /// Fail cells that read non-numeric text instead of reading 0
    #[arg(long)]
    strict_coercion: bool,

    /// Refuse package or revision recalculation over more rows than this
    #[arg(long)]
    max_rows: Option<usize>,
}

impl CalcArgs {
    fn options(&self) -> CalculationOptions {
        CalculationOptions {
            evaluation: EvaluationOptions {
                division_by_zero: if self.strict_division {
                    DivisionByZeroPolicy::Error
                } else {
                    DivisionByZeroPolicy::Zero
                },
                non_numeric: if self.strict_coercion {
                    CoercionPolicy::Error
                } else {
                    CoercionPolicy::Zero
                },
            },
            max_rows: self.max_rows,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RevisionFile {
    Many(Vec<Revision>),
    One(Box<Revision>),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Recalc {
            input,
            level,
            id,
            output,
            calc,
        } => recalc(&input, level, id, output.as_deref(), &calc),
        Commands::Totals { input, worksheet } => show_totals(&input, worksheet),
        Commands::Summary { input, level, id } => show_summary(&input, level, id),
        Commands::Validate {
            input,
            worksheet,
            formula,
            column,
        } => validate(&input, worksheet, &formula, column.as_deref()),
    }
}

fn load_store(path: &Path) -> Result<InMemoryStore> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to open '{}'", path.display()))?;
    let file: RevisionFile = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse '{}'", path.display()))?;

    let revisions = match file {
        RevisionFile::Many(revisions) => revisions,
        RevisionFile::One(revision) => vec![*revision],
    };
    Ok(revisions.into_iter().collect())
}

fn save_store(store: InMemoryStore, path: &Path) -> Result<usize> {
    let revisions = store.into_revisions();
    let json = serde_json::to_string_pretty(&revisions).context("Failed to serialize revisions")?;
    fs::write(path, json).with_context(|| format!("Failed to write '{}'", path.display()))?;
    Ok(revisions.len())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    let mut stdout = io::stdout();
    writeln!(stdout, "{}", json).context("Failed to write to stdout")?;
    Ok(())
}

fn emit<T: Serialize>(
    result: Option<Recalculated<T>>,
    level: Level,
    id: EntityId,
) -> Result<CalculationReport> {
    match result {
        Some(recalculated) => {
            print_json(&recalculated.value)?;
            Ok(recalculated.report)
        }
        None => bail!("{:?} {} not found or deleted", level, id),
    }
}

fn recalc(
    input: &Path,
    level: Level,
    id: EntityId,
    output: Option<&Path>,
    calc: &CalcArgs,
) -> Result<()> {
    let store = load_store(input)?;
    let mut estimator = Estimator::with_options(store, calc.options());

    let report = match level {
        Level::Row => emit(estimator.recalculate_row(id)?, level, id)?,
        Level::Worksheet => emit(estimator.recalculate_worksheet(id)?, level, id)?,
        Level::Package => emit(estimator.recalculate_package(id)?, level, id)
            .context("Package recalculation failed")?,
        Level::Revision => emit(estimator.recalculate_revision(id)?, level, id)
            .context("Revision recalculation failed")?,
    };

    let stats = &report.stats;
    eprintln!(
        "Recalculated {} worksheets, {} rows, {} cells ({} halted, {} failed cells, {} warnings)",
        stats.worksheets_calculated,
        stats.rows_calculated,
        stats.cells_calculated,
        stats.worksheets_halted,
        stats.cells_failed,
        stats.warnings
    );
    for issue in &report.issues {
        eprintln!("  {}", issue);
    }

    if let Some(path) = output {
        let count = save_store(estimator.into_store(), path)?;
        eprintln!("Wrote {} revisions to '{}'", count, path.display());
    }

    Ok(())
}

fn show_totals(input: &Path, worksheet: EntityId) -> Result<()> {
    let estimator = Estimator::new(load_store(input)?);
    let totals = estimator
        .column_totals(worksheet)?
        .with_context(|| format!("Worksheet {} not found or deleted", worksheet))?;

    if totals.is_empty() {
        eprintln!("Warning: worksheet has no totals; recalculate it first");
    }
    for (key, total) in totals {
        println!("{}\t{}", key, total);
    }
    Ok(())
}

fn show_summary(input: &Path, level: Level, id: EntityId) -> Result<()> {
    let estimator = Estimator::new(load_store(input)?);
    let missing = || format!("{:?} {} not found or deleted", level, id);

    match level {
        Level::Row => bail!("Rows have no summary; use the worksheet id"),
        Level::Worksheet => print_json(&estimator.worksheet_summary(id)?.with_context(missing)?),
        Level::Package => print_json(&estimator.package_summary(id)?.with_context(missing)?),
        Level::Revision => print_json(&estimator.revision_summary(id)?.with_context(missing)?),
    }
}

fn validate(input: &Path, worksheet: EntityId, formula: &str, column: Option<&str>) -> Result<()> {
    let estimator = Estimator::new(load_store(input)?);
    let result = estimator
        .validate_formula(worksheet, column, formula)?
        .with_context(|| format!("Worksheet {} not found or deleted", worksheet))?;

    if !result.dependencies.is_empty() {
        println!("Columns: {}", result.dependencies.join(", "));
    }
    if !result.worksheet_references.is_empty() {
        println!("Worksheets: {}", result.worksheet_references.join(", "));
    }

    if result.is_valid {
        println!("Formula is valid");
        return Ok(());
    }

    let message = result.error_message.unwrap_or_default();
    match result.error_position {
        Some(position) => bail!("Invalid formula at position {}: {}", position, message),
        None => bail!("Invalid formula: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision() -> Revision {
        let mut sheet = Worksheet::new(3, 2, "Steel")
            .with_column(ColumnDef::new("qty", ColumnType::Number))
            .unwrap()
            .with_column(ColumnDef::formula("total_cost", "qty * 4"))
            .unwrap();
        sheet.add_row(Row::new(4).with_value("qty", 5));
        let mut package = Package::new(2, 1, "Fab");
        package.add_worksheet(sheet).unwrap();
        let mut revision = Revision::new(1);
        revision.add_package(package);
        revision
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimate.json");

        let mut estimator = Estimator::new([revision()].into_iter().collect::<InMemoryStore>());
        estimator.recalculate_revision(1).unwrap().unwrap();
        assert_eq!(save_store(estimator.into_store(), &path).unwrap(), 1);

        let store = load_store(&path).unwrap();
        let loaded = store.revision(1).unwrap();
        assert_eq!(loaded, &{
            let mut expected = revision();
            let mut engine = CalculationEngine::default();
            engine.calculate_revision(&mut expected).unwrap();
            expected
        });
    }

    #[test]
    fn test_single_revision_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.json");
        fs::write(&path, serde_json::to_string(&revision()).unwrap()).unwrap();

        let store = load_store(&path).unwrap();
        assert!(store.revision(1).is_some());
    }

    #[test]
    fn test_strict_flags() {
        let args = CalcArgs {
            strict_division: true,
            strict_coercion: false,
            max_rows: Some(10),
        };
        let options = args.options();
        assert_eq!(options.evaluation.division_by_zero, DivisionByZeroPolicy::Error);
        assert_eq!(options.evaluation.non_numeric, CoercionPolicy::Zero);
        assert_eq!(options.max_rows, Some(10));
    }
}
