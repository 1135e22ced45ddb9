/// Declarative assessment scripts
///
/// A script is a JSON document listing tests; each test is a sequence of steps
/// interpreted against a fresh [`Submission`]:
///
/// ```json
/// {"tests": [{"text": "sum", "steps": [
///     {"has": "int sum(int, int)"},
///     {"query": {"pattern": {"kind": "{Loop}"}, "min": 1}},
///     {"run": {"stdin": "1 2", "steps": [{"get": "3"}, {"exit_code": 0}]}}
/// ]}]}
/// ```
use crate::check::{describe, BlockKind, Check, Recorder};
use crate::config::types::{HarnessConfig, Result};
use crate::harness::run::Run;
use crate::harness::submission::{evaluate, Submission};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub title: Option<String>,
    pub tests: Vec<TestCase>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub text: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Has(String),
    Query(QueryStep),
    CheckSource(SourceStep),
    AddSource(String),
    DelSource(String),
    Run(RunSpec),
    All(Block),
    Any(Block),
    NotAll(Block),
    NotAny(Block),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryStep {
    /// A pattern document, or a string holding query text with `{Macro}` placeholders
    pub pattern: serde_json::Value,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_min")]
    pub min: usize,
    #[serde(default)]
    pub max: Option<usize>,
}

impl QueryStep {
    fn query_text(&self) -> String {
        match &self.pattern {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    fn admits(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceStep {
    pub regex: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSpec {
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default = "default_eol")]
    pub eol: bool,
    #[serde(default)]
    pub steps: Vec<RunStep>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStep {
    Put(String),
    PutRaw(String),
    Get(String),
    GetRegex(String),
    ExitCode(i32),
    StdoutContains(String),
}

fn default_min() -> usize {
    1
}

fn default_eol() -> bool {
    true
}

impl Script {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Evaluate every test in order; tests are numbered from 1
    pub fn evaluate(&self, config: &HarnessConfig) -> Result<Vec<(Check, PathBuf)>> {
        if let Some(title) = &self.title {
            log::info!("Running script '{}' ({} tests)", title, self.tests.len());
        }
        self.tests
            .iter()
            .enumerate()
            .map(|(index, test)| {
                evaluate(config, index + 1, &test.text, |submission| {
                    apply_steps(submission, &test.steps)
                })
            })
            .collect()
    }
}

pub fn apply_steps(submission: &mut Submission, steps: &[Step]) -> anyhow::Result<()> {
    for step in steps {
        apply_step(submission, step)?;
    }
    Ok(())
}

fn apply_step(submission: &mut Submission, step: &Step) -> anyhow::Result<()> {
    match step {
        Step::Has(signature) => {
            submission.has(signature);
        }
        Step::Query(query) => {
            let text = query.query_text();
            let count = submission.query(&text)?.len();
            let label = query
                .text
                .clone()
                .unwrap_or_else(|| format!("code matches `{}`", describe(&text)));
            log::debug!("query {} matched {} nodes", text, count);
            submission.check(query.admits(count), label);
        }
        Step::CheckSource(source) => {
            let pattern = Regex::new(&source.regex)?;
            let found = submission.source_matches(&pattern)?;
            let label = source
                .text
                .clone()
                .unwrap_or_else(|| format!("source matches `{}`", describe(&source.regex)));
            submission.check(found, label);
        }
        Step::AddSource(text) => {
            submission.add_source(text)?;
        }
        Step::DelSource(name) => {
            if !submission.del_source(name)? {
                log::warn!("no declaration named {} to remove", name);
            }
        }
        Step::Run(spec) => {
            submission.run(spec.stdin.as_deref(), spec.eol, |run| {
                apply_run_steps(run, &spec.steps)
            });
        }
        Step::All(block) => apply_block(submission, BlockKind::All, block),
        Step::Any(block) => apply_block(submission, BlockKind::Any, block),
        Step::NotAll(block) => apply_block(submission, BlockKind::NotAll, block),
        Step::NotAny(block) => apply_block(submission, BlockKind::NotAny, block),
    }
    Ok(())
}

fn apply_block(submission: &mut Submission, kind: BlockKind, block: &Block) {
    let text = block.text.as_deref().unwrap_or(kind.default_text());
    submission.block(kind, text, |inner| apply_steps(inner, &block.steps));
}

fn apply_run_steps(run: &mut Run<'_>, steps: &[RunStep]) -> anyhow::Result<()> {
    for step in steps {
        match step {
            RunStep::Put(text) => {
                run.put(text);
            }
            RunStep::PutRaw(text) => {
                run.put_raw(text);
            }
            RunStep::Get(text) => {
                run.get(text);
            }
            RunStep::GetRegex(pattern) => {
                run.get_regex(pattern);
            }
            RunStep::ExitCode(expected) => {
                let code = run.exit_code()?;
                run.check(
                    code == Some(*expected),
                    format!("program exits with code {}", expected),
                );
            }
            RunStep::StdoutContains(text) => {
                let output = run.stdout()?;
                run.check(
                    output.contains(text.as_str()),
                    format!("program output contains `{}`", describe(text)),
                );
            }
        }
    }
    Ok(())
}
