/// Processing (Java mode) backend
///
/// Sketches are exported with `processing-java` and run on a virtual X display;
/// the stop script closes the sketch windows before the window manager exits.
use crate::config::types::{GradeError, LanguageConfig, Result};
use crate::judge::adapter::{
    clear_run_outputs, read_return_code, run_parser, shell_quote, Declaration, Diagnostic,
    LanguageBackend, MemoryFinding, RenderedScript, Severity,
};
use crate::judge::source::{declaration_name, nodes_of_kind, signature_text};
use crate::query::MacroTable;
use crate::tree::{Forest, ValueId};
use regex::Regex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const JAVA_MODIFIERS: &[&str] = &[
    "public",
    "private",
    "protected",
    "static",
    "final",
    "abstract",
    "synchronized",
    "native",
    "strictfp",
    "default",
];

const BUILD_LOG: &str = "log/build/build.log";
const BUILD_RET: &str = "log/build/build.ret";

/// `path/sketch.pde:12:4:12:9: message` (processing-java) or
/// `Sketch.java:12: error: message` (javac)
fn build_message() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:.*/)?([^/\s:]+\.(?:pde|java)):(\d+):(?:(\d+):\d+:\d+:)?\s*(?:(error|warning):\s*)?(.+)$",
        )
        .expect("valid build message regex")
    })
}

/// Parse `processing-java` output; columns are reported 0-based
pub fn parse_build_log(log: &str) -> Vec<Diagnostic> {
    log.lines()
        .filter_map(|line| {
            let caps = build_message().captures(line.trim_end())?;
            let message = caps[5].trim().to_string();
            let warning = caps.get(4).is_some_and(|m| m.as_str() == "warning")
                || message.starts_with("Warning");
            Some(Diagnostic {
                severity: if warning {
                    Severity::Warning
                } else {
                    Severity::Error
                },
                message,
                file: Some(caps[1].to_string()),
                line: caps[2].parse().ok(),
                col: caps
                    .get(3)
                    .and_then(|col| col.as_str().parse::<usize>().ok())
                    .map(|col| col + 1),
                flag: None,
                raw: None,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct ProcessingBackend {
    config: LanguageConfig,
}

impl ProcessingBackend {
    pub fn new(config: &LanguageConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn processing_java(&self) -> &str {
        self.config.compiler.as_deref().unwrap_or("processing-java")
    }

    /// Sketch name: the stem of the first `.pde` file
    fn sketch_name(sources: &[PathBuf]) -> Option<String> {
        sources
            .iter()
            .find(|path| path.extension().is_some_and(|ext| ext == "pde"))
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
    }

    /// Copy the current sources into a `<sketch>/` folder, as processing-java expects
    fn stage_sketch(workdir: &Path, sketch: &str, sources: &[PathBuf]) -> Result<()> {
        let folder = workdir.join(sketch);
        if folder.exists() {
            std::fs::remove_dir_all(&folder)?;
        }
        std::fs::create_dir_all(&folder)?;
        for source in sources.iter().filter(|p| p.extension().is_some_and(|e| e == "pde")) {
            let Some(name) = source.file_name() else {
                continue;
            };
            std::fs::copy(workdir.join(source), folder.join(name))?;
        }
        Ok(())
    }
}

impl LanguageBackend for ProcessingBackend {
    fn language(&self) -> &'static str {
        "processing"
    }

    fn suffix(&self) -> &'static str {
        ".pde"
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "pde")
    }

    fn macros(&self) -> MacroTable {
        let mut table = MacroTable::new();
        table.insert(
            "Loop".to_string(),
            vec![
                "for_statement".to_string(),
                "enhanced_for_statement".to_string(),
                "while_statement".to_string(),
                "do_statement".to_string(),
            ],
        );
        table.insert(
            "Cond".to_string(),
            vec!["if_statement".to_string(), "switch_expression".to_string()],
        );
        table.insert("Call".to_string(), vec!["method_invocation".to_string()]);
        table
    }

    fn comment_prefix(&self) -> &'static str {
        "//"
    }

    fn render_script(&self, workdir: &Path, sources: &[PathBuf]) -> Result<RenderedScript> {
        clear_run_outputs(workdir)?;
        let sketch = Self::sketch_name(sources)
            .ok_or_else(|| GradeError::Config("no .pde file in the submission".to_string()))?;
        Self::stage_sketch(workdir, &sketch, sources)?;
        let output = format!("{}.out", sketch);

        let mut xstart = String::new();
        let _ = writeln!(xstart, "echo DISPLAY=$DISPLAY > log/run/xstart.env");
        let _ = writeln!(xstart, "echo XAUTHORITY=$XAUTHORITY >> log/run/xstart.env");
        let _ = writeln!(xstart, "jwm > /dev/null 2>&1 &");
        let _ = writeln!(xstart, "echo WM=$! >> log/run/xstart.env");
        let _ = writeln!(xstart, "{}", shell_quote(&format!("{}/{}", output, sketch)));
        let _ = writeln!(xstart, "echo $? > log/run/run.ret");

        let mut script = String::new();
        let _ = writeln!(script, "mkdir -p log/build log/run");
        let _ = writeln!(script, "echo $$ > log/run/make.pid");
        let _ = writeln!(script, "rm -rf {}", shell_quote(&output));
        let mut command = vec![
            self.processing_java().to_string(),
            format!("--sketch={}", shell_quote(&sketch)),
            format!("--output={}", shell_quote(&output)),
            "--export".to_string(),
        ];
        command.extend(self.config.compiler_args.iter().cloned());
        let _ = writeln!(script, "{} > {} 2>&1", command.join(" "), BUILD_LOG);
        let _ = writeln!(script, "echo $? > {}", BUILD_RET);
        let program = shell_quote(&format!("{}/{}", output, sketch));
        let _ = writeln!(script, "if [ -x {} ]; then", program);
        let _ = writeln!(script, "  xvfb-run -a /bin/bash xstart.sh 2> log/run/run.stderr");
        let _ = writeln!(script, "fi");

        let stop = "if [ -f log/run/xstart.env ]; then\n  \
                    . log/run/xstart.env\n  \
                    export DISPLAY XAUTHORITY\n  \
                    for WINID in $(wmctrl -l | awk '{print $1}'); do\n    \
                    wmctrl -i -c \"$WINID\"\n  \
                    done\n  \
                    kill \"$WM\"\n\
                    fi\nexit 0\n";

        std::fs::write(workdir.join("xstart.sh"), xstart)?;
        std::fs::write(workdir.join("make.sh"), script)?;
        std::fs::write(workdir.join("stop.sh"), stop)?;
        Ok(RenderedScript {
            run_script: PathBuf::from("make.sh"),
            stop_script: Some(PathBuf::from("stop.sh")),
        })
    }

    fn build_diagnostics(&self, workdir: &Path) -> Result<Vec<Diagnostic>> {
        let Some(ret) = read_return_code(&workdir.join(BUILD_RET)) else {
            return Ok(Vec::new());
        };
        let log = std::fs::read_to_string(workdir.join(BUILD_LOG)).unwrap_or_default();
        let mut diagnostics = parse_build_log(&log);
        if ret == 0 {
            diagnostics.insert(0, Diagnostic::info("export sketch"));
        } else if !diagnostics.iter().any(|d| d.severity == Severity::Error) {
            diagnostics.push(Diagnostic::unparsed("export of the sketch failed", log));
        }
        Ok(diagnostics)
    }

    fn memory_findings(&self, _workdir: &Path) -> Result<Vec<MemoryFinding>> {
        Ok(Vec::new())
    }

    fn exit_code(&self, workdir: &Path) -> Option<i32> {
        read_return_code(&workdir.join("log/run/run.ret"))
    }

    fn parse_source(&self, path: &Path) -> Result<serde_json::Value> {
        run_parser(self.language(), &self.config, path)
    }

    fn declarations(&self, forest: &Forest, root: ValueId, text: &str) -> Vec<Declaration> {
        nodes_of_kind(forest, root, &["method_declaration"])
            .into_iter()
            .filter_map(|node| {
                let name = declaration_name(forest, node, text)?;
                let range = forest.range(node)?.clone();
                let signature = signature_text(forest, node, text)
                    .map(|header| self.canonical_signature(&header))
                    .unwrap_or_else(|| name.clone());
                Some(Declaration {
                    name,
                    signature,
                    file: PathBuf::new(),
                    node,
                    range,
                })
            })
            .collect()
    }

    /// Drop modifiers, annotations and parameter names:
    /// `public static int add(final int a, int[] b) {` -> `int add(int, int[])`
    fn canonical_signature(&self, text: &str) -> String {
        let text = text.trim().trim_end_matches(['{', ';']).trim();
        let (Some(open), Some(close)) = (text.find('('), text.rfind(')')) else {
            return strip_modifiers(text);
        };
        if close < open {
            return strip_modifiers(text);
        }
        let head = strip_modifiers(&text[..open]);
        let params: Vec<String> = split_parameters(&text[open + 1..close])
            .into_iter()
            .map(strip_parameter_name)
            .filter(|param| !param.is_empty())
            .collect();
        format!("{}({})", head, params.join(", "))
    }
}

fn strip_modifiers(text: &str) -> String {
    text.split_whitespace()
        .filter(|token| !token.starts_with('@') && !JAVA_MODIFIERS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split on commas outside generic arguments and brackets
fn split_parameters(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (at, c) in text.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..at]);
                start = at + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn strip_parameter_name(param: &str) -> String {
    let kept = strip_modifiers(param);
    let mut tokens: Vec<&str> = kept.split_whitespace().collect();
    if tokens.len() > 1 {
        tokens.pop();
    }
    tokens.join(" ").replace(" [", "[").replace("< ", "<")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_signature() {
        let backend = ProcessingBackend::default();
        assert_eq!(
            backend.canonical_signature("public static int add(final int a, int[] b) {"),
            "int add(int, int[])"
        );
        assert_eq!(backend.canonical_signature("void setup()"), "void setup()");
        assert_eq!(
            backend.canonical_signature("@Override float area(Map<String, Integer> m, float... xs)"),
            "float area(Map<String, Integer>, float...)"
        );
        assert_eq!(
            backend.canonical_signature("int add(int, int)"),
            backend.canonical_signature("int   add(int x,int y)")
        );
    }

    #[test]
    fn test_parse_build_log() {
        let log = "/tmp/test-001/sketch/sketch.pde:3:8:3:12: The function \"elipse(int, int)\" does not exist.\n\
                   Sketch.java:7: warning: [deprecation] old() is deprecated\n\
                   Finished.\n";
        let diagnostics = parse_build_log(log);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[0].file.as_deref(), Some("sketch.pde"));
        assert_eq!(diagnostics[0].line, Some(3));
        assert_eq!(diagnostics[0].col, Some(9));
        assert_eq!(diagnostics[1].severity, Severity::Warning);
        assert_eq!(diagnostics[1].col, None);
    }

    #[test]
    fn test_render_script_stages_sketch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clock.pde"), "void setup() {}\n").unwrap();
        std::fs::write(dir.path().join("hands.pde"), "void hand() {}\n").unwrap();
        let rendered = ProcessingBackend::default()
            .render_script(
                dir.path(),
                &[PathBuf::from("clock.pde"), PathBuf::from("hands.pde")],
            )
            .unwrap();
        assert_eq!(rendered.run_script, PathBuf::from("make.sh"));
        assert!(dir.path().join("clock/hands.pde").is_file());

        let script = std::fs::read_to_string(dir.path().join("make.sh")).unwrap();
        assert!(script.contains(
            "processing-java --sketch='clock' --output='clock.out' --export > log/build/build.log 2>&1"
        ));
        assert!(script.contains("echo $? > log/build/build.ret"));
        let xstart = std::fs::read_to_string(dir.path().join("xstart.sh")).unwrap();
        assert!(xstart.contains("'clock.out/clock'\necho $? > log/run/run.ret"));
    }

    #[test]
    fn test_render_script_needs_a_sketch() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcessingBackend::default()
            .render_script(dir.path(), &[])
            .unwrap_err();
        assert!(matches!(err, GradeError::Config(_)));
    }

    #[test]
    fn test_build_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("log/build")).unwrap();
        std::fs::write(dir.path().join(BUILD_RET), "1\n").unwrap();
        std::fs::write(dir.path().join(BUILD_LOG), "Could not find a JDK\n").unwrap();
        let diagnostics = ProcessingBackend::default().build_diagnostics(dir.path()).unwrap();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "export of the sketch failed");
        assert_eq!(diagnostics[0].raw.as_deref(), Some("Could not find a JDK\n"));

        std::fs::write(dir.path().join(BUILD_RET), "0\n").unwrap();
        std::fs::write(dir.path().join(BUILD_LOG), "Finished.\n").unwrap();
        let diagnostics = ProcessingBackend::default().build_diagnostics(dir.path()).unwrap();
        assert_eq!(diagnostics, vec![Diagnostic::info("export sketch")]);
    }

    #[test]
    fn test_declarations() {
        let text = "int twice(int x) {\n  return 2 * x;\n}\n";
        let mut forest = Forest::new();
        let root = forest
            .load_json(&json!({
                "kind": "dynamic_program",
                "children": [{
                    "kind": "method_declaration",
                    "_range": {"start": 0, "end": 33},
                    "type": {"kind": "integral_type", "children": [{"kind": "int"}]},
                    "name": {"kind": "identifier", "val": "twice"},
                    "parameters": {"kind": "formal_parameters"},
                    "body": {"kind": "block", "_range": {"start": 17, "end": 33}}
                }]
            }))
            .unwrap();
        let decls = ProcessingBackend::default().declarations(&forest, root, text);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "twice");
        assert_eq!(decls[0].signature, "int twice(int)");
    }
}
