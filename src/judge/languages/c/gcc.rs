/// GCC and linker message parsing
use crate::judge::adapter::{Diagnostic, Severity};
use regex::Regex;
use std::sync::OnceLock;

fn message_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(.+?):(\d+):(\d+):\s*(warning|error|fatal error):\s*(.+?)\s*(\[-[^\]]+\])?$",
        )
        .expect("valid gcc message regex")
    })
}

fn undefined_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"undefined reference to [`'‘]([^'’`]+)['’`]").expect("valid linker regex")
    })
}

/// Parse compiler output into diagnostics, in order of appearance
pub fn parse_messages(log: &str) -> Vec<Diagnostic> {
    log.lines()
        .filter_map(|line| {
            let caps = message_line().captures(line)?;
            let severity = match &caps[4] {
                "warning" => Severity::Warning,
                _ => Severity::Error,
            };
            Some(Diagnostic {
                severity,
                message: caps[5].to_string(),
                file: Some(caps[1].to_string()),
                line: caps[2].parse().ok(),
                col: caps[3].parse().ok(),
                flag: caps
                    .get(6)
                    .map(|flag| flag.as_str().trim_matches(|c| c == '[' || c == ']').to_string()),
                raw: None,
            })
        })
        .collect()
}

/// Parse linker output; only undefined references are recognised
pub fn parse_link_messages(log: &str) -> Vec<Diagnostic> {
    let mut seen = Vec::new();
    let mut diagnostics = Vec::new();
    for caps in undefined_reference().captures_iter(log) {
        let symbol = caps[1].to_string();
        if seen.contains(&symbol) {
            continue;
        }
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            message: format!("undefined reference to `{}`", symbol),
            file: None,
            line: None,
            col: None,
            flag: None,
            raw: None,
        });
        seen.push(symbol);
    }
    diagnostics
}
