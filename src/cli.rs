use crate::config::types::{HarnessConfig, LanguageConfig};
use crate::config::validator::validate_config;
use crate::harness::Script;
use crate::judge::backend_for;
use crate::query::{self, MacroTable};
use crate::report::{read_rows, render_tree, Report};
use crate::tree::{parse_tree_json, release_tree_json, Forest};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a project's submission with an assessment script
    Run {
        /// Configuration file (defaults to <PROJECT>/gradebox.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Log tracebacks of contained failures
        #[arg(long)]
        debug: bool,
        /// Keep the test-NNN working copies
        #[arg(long)]
        keep: bool,
        /// Assessment script (JSON)
        script: PathBuf,
        /// Project directory holding src/
        project: PathBuf,
    },
    /// Print the matches of a pattern over parse-tree dumps
    Query {
        /// Expand {Macro} placeholders with this language's macro table
        #[arg(long)]
        macros: Option<String>,
        /// Pattern document, or query text with {Macro} placeholders
        pattern: String,
        /// Parse-tree JSON files
        #[arg(required = true)]
        trees: Vec<PathBuf>,
    },
    /// Rebuild report.zip from a project's test archives
    Report {
        project: PathBuf,
    },
    /// Print the check tree stored in a report.zip
    Show {
        report: PathBuf,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            debug,
            keep,
            script,
            project,
        } => {
            let mut config = match config {
                Some(path) => {
                    let mut config = HarnessConfig::load_from_file(&path)?;
                    config.project_dir = project.clone();
                    config
                }
                None => HarnessConfig::load_for_project(&project)?,
            };
            config.debug |= debug;
            config.keep_workdir |= keep;
            let validation = validate_config(&config)?;
            for warning in &validation.warnings {
                eprintln!("Warning: {}", warning);
            }

            let script = Script::load_from_file(&script)
                .with_context(|| format!("loading script {}", script.display()))?;
            eprintln!(
                "Evaluating {} with {} tests ({} backend)",
                project.display(),
                script.tests.len(),
                config.language
            );
            let results = script.evaluate(&config)?;
            for (number, (root, archive)) in results.iter().enumerate() {
                eprintln!(
                    "test {:>3}: {} {} ({})",
                    number + 1,
                    root.status,
                    root.text,
                    archive.display()
                );
            }
            let report = Report::from_checks(&project, results);
            let path = report.save()?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Query {
            macros,
            pattern,
            trees,
        } => {
            let table = match macros {
                Some(language) => backend_for(&language, &LanguageConfig::default())?.macros(),
                None => MacroTable::new(),
            };
            let mut forest = Forest::new();
            let mut roots = Vec::with_capacity(trees.len());
            for path in &trees {
                let bytes =
                    std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
                let json = parse_tree_json(&bytes)
                    .with_context(|| format!("parsing {}", path.display()))?;
                let root = forest.load_json(&json);
                release_tree_json(json);
                roots.push(root?);
            }
            let found = query::run(&forest, &roots, &pattern, &table)?;
            eprintln!("{} matches", found.len());
            println!("{}", serde_json::to_string_pretty(&found.to_json())?);
            Ok(())
        }
        Commands::Report { project } => {
            let report = Report::collect(&project)?;
            if report.is_empty() {
                anyhow::bail!("no test archives in {}", project.display());
            }
            let path = report.save()?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Show { report } => {
            let rows = read_rows(&report)?;
            print!("{}", render_tree(&rows));
            Ok(())
        }
    }
}
