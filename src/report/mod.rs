//! Report feed
//!
//! Flattens archived check trees into rows keyed by dotted ids (`N`, `N.1`,
//! `N.1.2`) and renders them as CSV, a JSON summary and HTML fragments. All
//! three are bundled with the per-test archives in `report.zip`.

use crate::check::{Check, Status};
use crate::config::types::{GradeError, Result};
use crate::harness::archive::read_checks;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const REPORT_ARCHIVE: &str = "report.zip";
pub const CSV_ENTRY: &str = "report.csv";
pub const JSON_ENTRY: &str = "report.json";

const CSV_HEADER: [&str; 5] = ["id", "status", "auto", "text", "details"];

/// One check, flattened
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub id: String,
    pub status: Status,
    pub auto: bool,
    pub text: String,
    pub details: Option<String>,
}

impl ReportRow {
    /// Nesting depth derived from the dotted id (`3` is 0, `3.1.2` is 2)
    pub fn depth(&self) -> usize {
        self.id.matches('.').count()
    }
}

/// One test's entry in `report.json`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub id: usize,
    pub status: Status,
    pub text: String,
    pub archive: String,
    pub html: String,
}

struct ArchivedTest {
    number: usize,
    root: Check,
    archive: PathBuf,
}

pub struct Report {
    project_dir: PathBuf,
    tests: Vec<ArchivedTest>,
}

fn archive_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^test-(\d+)\.zip$").expect("valid archive name regex"))
}

impl Report {
    /// Read every `test-NNN.zip` in the project, ordered by test number
    pub fn collect(project_dir: &Path) -> Result<Self> {
        let mut tests = Vec::new();
        for entry in std::fs::read_dir(project_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(number) = archive_name_regex()
                .captures(name)
                .and_then(|caps| caps[1].parse::<usize>().ok())
            else {
                continue;
            };
            match read_checks(&path) {
                Ok(root) => tests.push(ArchivedTest {
                    number,
                    root,
                    archive: path,
                }),
                Err(e) => log::warn!("Skipping unreadable archive {}: {}", path.display(), e),
            }
        }
        tests.sort_by_key(|test| test.number);
        log::info!(
            "Collected {} archives from {}",
            tests.len(),
            project_dir.display()
        );
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            tests,
        })
    }

    /// Build a report from trees already in memory
    pub fn from_checks(project_dir: &Path, checks: Vec<(Check, PathBuf)>) -> Self {
        let tests = checks
            .into_iter()
            .enumerate()
            .map(|(index, (root, archive))| ArchivedTest {
                number: index + 1,
                root,
                archive,
            })
            .collect();
        Self {
            project_dir: project_dir.to_path_buf(),
            tests,
        }
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn rows(&self) -> Vec<ReportRow> {
        let mut rows = Vec::new();
        for test in &self.tests {
            rows.extend(flatten(test.number, &test.root));
        }
        rows
    }

    pub fn summaries(&self) -> Vec<TestSummary> {
        self.tests
            .iter()
            .map(|test| TestSummary {
                id: test.number,
                status: test.root.status,
                text: test.root.text.clone(),
                archive: file_name(&test.archive),
                html: html_entry(test.number),
            })
            .collect()
    }

    pub fn to_csv(&self) -> String {
        write_csv(&self.rows())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.summaries())?)
    }

    /// Write `report.zip` into the project directory
    pub fn save(&self) -> Result<PathBuf> {
        let path = self.project_dir.join(REPORT_ARCHIVE);
        let mut zip = ZipWriter::new(File::create(&path)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file(CSV_ENTRY, options)?;
        zip.write_all(self.to_csv().as_bytes())?;
        zip.start_file(JSON_ENTRY, options)?;
        zip.write_all(self.to_json()?.as_bytes())?;

        for test in &self.tests {
            zip.start_file(html_entry(test.number), options)?;
            zip.write_all(html_fragment(&test.root).as_bytes())?;
            if test.archive.is_file() {
                // already deflated
                let stored = options.compression_method(CompressionMethod::Stored);
                zip.start_file(file_name(&test.archive), stored)?;
                let mut file = File::open(&test.archive)?;
                std::io::copy(&mut file, &mut zip)?;
            }
        }
        zip.finish()?;
        log::info!("Wrote report {} ({} tests)", path.display(), self.tests.len());
        Ok(path)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn html_entry(number: usize) -> String {
    format!("test-{:03}.html", number)
}

/// Rows for one test tree; the root's id is the test number
pub fn flatten(number: usize, root: &Check) -> Vec<ReportRow> {
    let mut rows = Vec::new();
    root.walk(&number.to_string(), &mut |id, check| {
        rows.push(ReportRow {
            id: id.to_string(),
            status: check.status,
            auto: check.auto,
            text: check.text.clone(),
            details: check.details.clone(),
        });
    });
    rows
}

fn csv_field(field: &str) -> String {
    if field.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn write_csv(rows: &[ReportRow]) -> String {
    let mut out = CSV_HEADER.join(",");
    out.push_str("\r\n");
    for row in rows {
        let fields = [
            row.id.clone(),
            row.status.as_str().to_string(),
            row.auto.to_string(),
            row.text.clone(),
            row.details.clone().unwrap_or_default(),
        ];
        let line: Vec<String> = fields.iter().map(|field| csv_field(field)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Split RFC-4180 text into records; quoted fields may span lines
fn csv_records(text: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                c => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => quoted = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c => field.push(c),
        }
    }
    if quoted {
        return Err(GradeError::Archive("unterminated quoted CSV field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    Ok(records)
}

pub fn parse_csv(text: &str) -> Result<Vec<ReportRow>> {
    let mut records = csv_records(text)?.into_iter();
    match records.next() {
        Some(header) if header == CSV_HEADER => {}
        Some(header) => {
            return Err(GradeError::Archive(format!(
                "unexpected CSV header: {}",
                header.join(",")
            )))
        }
        None => return Ok(Vec::new()),
    }
    records
        .enumerate()
        .map(|(line, record)| {
            let [id, status, auto, text, details]: [String; 5] =
                record.try_into().map_err(|record: Vec<String>| {
                    GradeError::Archive(format!(
                        "CSV record {} has {} fields",
                        line + 2,
                        record.len()
                    ))
                })?;
            let status = Status::parse(&status).ok_or_else(|| {
                GradeError::Archive(format!("CSV record {}: bad status {}", line + 2, status))
            })?;
            Ok(ReportRow {
                id,
                status,
                auto: auto == "true",
                text,
                details: (!details.is_empty()).then_some(details),
            })
        })
        .collect()
}

/// Rows stored in a saved `report.zip`
pub fn read_rows(report: &Path) -> Result<Vec<ReportRow>> {
    let mut archive = ZipArchive::new(File::open(report)?)?;
    let mut entry = archive.by_name(CSV_ENTRY).map_err(|e| {
        GradeError::Archive(format!("{} in {}: {}", CSV_ENTRY, report.display(), e))
    })?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    parse_csv(&text)
}

/// Indented plain-text rendering of report rows
pub fn render_tree(rows: &[ReportRow]) -> String {
    let mut out = String::new();
    for row in rows {
        let indent = "  ".repeat(row.depth());
        let marker = if row.auto { "*" } else { "" };
        out.push_str(&format!(
            "{}{} [{}]{} {}\n",
            indent,
            row.id,
            row.status.as_str(),
            marker,
            row.text
        ));
        if let Some(details) = &row.details {
            for line in details.lines() {
                out.push_str(&format!("{}    | {}\n", indent, line));
            }
        }
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Nested `<ul>` fragment for one test tree
pub fn html_fragment(root: &Check) -> String {
    let mut out = String::from("<ul class=\"checks\">\n");
    html_item(root, 1, &mut out);
    out.push_str("</ul>\n");
    out
}

fn html_item(check: &Check, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let auto = if check.auto { " auto" } else { "" };
    out.push_str(&format!(
        "{}<li class=\"result-{}{}\"><span class=\"text\">{}</span>",
        indent,
        check.status.as_str(),
        auto,
        escape_html(&check.text)
    ));
    if let Some(details) = &check.details {
        out.push_str(&format!("<pre class=\"details\">{}</pre>", escape_html(details)));
    }
    if check.checks.is_empty() {
        out.push_str("</li>\n");
        return;
    }
    out.push_str(&format!("\n{}<ul>\n", indent));
    for child in &check.checks {
        html_item(child, depth + 1, out);
    }
    out.push_str(&format!("{}</ul></li>\n", indent));
}
