/// Dr. Memory `results.txt` parsing
use crate::judge::adapter::{MemoryFinding, StackFrame};
use regex::Regex;
use std::sync::OnceLock;

fn error_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Error #(\d+):\s+(.*)$").expect("valid error header regex"))
}

fn address_range() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)0x[0-9a-f]+-0x[0-9a-f]+\s*").expect("valid address range regex")
    })
}

fn frame_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^#\s*\d+\s+(\S+)\s*(?:\[(.+):(\d+)\])?").expect("valid frame regex")
    })
}

/// Parse one results file; frame paths are made relative to `workdir_name` when
/// they contain it
pub fn parse_results(text: &str, workdir_name: &str) -> Vec<MemoryFinding> {
    let mut findings = Vec::new();
    let mut current: Option<MemoryFinding> = None;
    for line in text.lines() {
        if let Some(caps) = error_header().captures(line) {
            if let Some(done) = current.take() {
                findings.push(done);
            }
            let description = address_range().replace_all(caps[2].trim(), "");
            current = Some(MemoryFinding {
                description: description.trim().to_string(),
                stack: Vec::new(),
            });
            continue;
        }
        let Some(finding) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = frame_line().captures(line.trim_start()) {
            finding.stack.push(StackFrame {
                function: caps[1].to_string(),
                file: caps.get(2).map(|file| relative_to(file.as_str(), workdir_name)),
                line: caps.get(3).and_then(|n| n.as_str().parse().ok()),
            });
        } else if line.trim().is_empty() || line.starts_with('=') {
            if let Some(done) = current.take() {
                findings.push(done);
            }
        }
    }
    if let Some(done) = current.take() {
        findings.push(done);
    }
    findings
}

fn relative_to(path: &str, workdir_name: &str) -> String {
    let marker = format!("{}/", workdir_name);
    match path.rfind(&marker) {
        Some(at) if !workdir_name.is_empty() => path[at + marker.len()..].to_string(),
        _ => path.to_string(),
    }
}
