use crate::config::types::{GradeError, LanguageConfig, Result};
use crate::judge::adapter::{
    clear_run_outputs, log_stem, read_return_code, run_parser, shell_quote, Declaration,
    Diagnostic, LanguageBackend, MemoryFinding, RenderedScript, Severity,
};
use crate::judge::source::{declaration_name, nodes_of_kind, signature_text};
use crate::query::MacroTable;
use crate::tree::{parse_tree_json, Forest, ValueId};
use regex::Regex;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// Dumps the stdlib `ast` of a file as JSON: `kind` is the node class, `_range`
/// holds byte offsets.
const AST_DUMPER: &str = r#"
import ast, json, math, sys
sys.setrecursionlimit(10000)
src = open(sys.argv[1], 'rb').read()
starts = [0]
for i, b in enumerate(src):
    if b == 10:
        starts.append(i + 1)
def conv(node):
    if isinstance(node, ast.AST):
        out = {"kind": type(node).__name__}
        for name, value in ast.iter_fields(node):
            out[name] = conv(value)
        if getattr(node, "end_lineno", None) is not None:
            out["_range"] = {
                "start": starts[node.lineno - 1] + node.col_offset,
                "end": starts[node.end_lineno - 1] + node.end_col_offset,
            }
        return out
    if isinstance(node, list):
        return [conv(item) for item in node]
    if isinstance(node, float) and not math.isfinite(node):
        return repr(node)
    if node is None or isinstance(node, (str, int, float)):
        return node
    return repr(node)
print(json.dumps(conv(ast.parse(src, sys.argv[1]))))
"#;

const FUNCTION_KINDS: &[&str] = &["FunctionDef", "AsyncFunctionDef", "function_definition"];

fn traceback_location() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*File "(.+)", line (\d+)"#).expect("valid traceback location regex")
    })
}

fn traceback_error() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[\w.]+\.)?(\w*(?:Error|Exception)):\s*(.*)$")
            .expect("valid traceback error regex")
    })
}

/// Parse the tracebacks printed by `py_compile`; one diagnostic per error line
pub fn parse_traceback(log: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut location: Option<(String, usize)> = None;
    for line in log.lines() {
        if let Some(caps) = traceback_location().captures(line) {
            location = Some((caps[1].to_string(), caps[2].parse().unwrap_or(0)));
        } else if let Some(caps) = traceback_error().captures(line) {
            let (file, line) = match location.take() {
                Some((file, line)) => (Some(file), Some(line)),
                None => (None, None),
            };
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                message: format!("{}: {}", &caps[1], caps[2].trim()),
                file,
                line,
                col: None,
                flag: None,
                raw: None,
            });
        }
    }
    diagnostics
}

#[derive(Debug, Clone, Default)]
pub struct PythonBackend {
    config: LanguageConfig,
}

impl PythonBackend {
    pub fn new(config: &LanguageConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn interpreter(&self) -> &str {
        self.config.interpreter.as_deref().unwrap_or("python3")
    }

    fn entry_point<'a>(sources: &'a [PathBuf]) -> Option<&'a PathBuf> {
        sources
            .iter()
            .find(|path| path.as_os_str() == "main.py")
            .or_else(|| sources.iter().find(|p| p.extension().is_some_and(|e| e == "py")))
    }
}

impl LanguageBackend for PythonBackend {
    fn language(&self) -> &'static str {
        "python"
    }

    fn suffix(&self) -> &'static str {
        ".py"
    }

    fn is_source(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "py")
    }

    fn macros(&self) -> MacroTable {
        let mut table = MacroTable::new();
        table.insert(
            "Loop".to_string(),
            vec!["For".to_string(), "AsyncFor".to_string(), "While".to_string()],
        );
        table.insert("Cond".to_string(), vec!["If".to_string(), "IfExp".to_string()]);
        table.insert("Call".to_string(), vec!["Call".to_string()]);
        table
    }

    fn comment_prefix(&self) -> &'static str {
        "#"
    }

    fn render_script(&self, workdir: &Path, sources: &[PathBuf]) -> Result<RenderedScript> {
        clear_run_outputs(workdir)?;
        let mut script = String::new();
        let _ = writeln!(script, "mkdir -p log/build log/run");
        let _ = writeln!(script, "echo $$ > log/run/make.pid");
        for source in sources.iter().filter(|p| self.is_source(p)) {
            let log = format!("log/build/{}", log_stem(source));
            let _ = writeln!(
                script,
                "{} -m py_compile {} > {log}.stdout 2> {log}.stderr",
                self.interpreter(),
                shell_quote(&source.to_string_lossy()),
            );
            let _ = writeln!(script, "echo $? > {log}.ret");
        }
        if let Some(entry) = Self::entry_point(sources) {
            let _ = writeln!(
                script,
                "{} -u {}",
                self.interpreter(),
                shell_quote(&entry.to_string_lossy())
            );
            let _ = writeln!(script, "echo $? > log/run/run.ret");
        }
        let stop = "if [ -f log/run/make.pid ]; then\n  \
                    pkill -INT -P \"$(cat log/run/make.pid)\"\n\
                    fi\nexit 0\n";

        std::fs::write(workdir.join("make.sh"), script)?;
        std::fs::write(workdir.join("stop.sh"), stop)?;
        Ok(RenderedScript {
            run_script: PathBuf::from("make.sh"),
            stop_script: Some(PathBuf::from("stop.sh")),
        })
    }

    fn build_diagnostics(&self, workdir: &Path) -> Result<Vec<Diagnostic>> {
        let build = workdir.join("log/build");
        let mut diagnostics = Vec::new();
        let mut rets: Vec<PathBuf> = match std::fs::read_dir(&build) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.extension().is_some_and(|ext| ext == "ret"))
                .collect(),
            Err(_) => return Ok(diagnostics),
        };
        rets.sort();
        for ret_path in rets {
            let Some(ret) = read_return_code(&ret_path) else {
                continue;
            };
            let stem = ret_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stderr = std::fs::read_to_string(build.join(format!("{}.stderr", stem)))
                .unwrap_or_default();
            if ret == 0 {
                diagnostics.push(Diagnostic::info(format!("compile `{}`", stem)));
                continue;
            }
            let messages = parse_traceback(&stderr);
            if messages.is_empty() {
                diagnostics.push(Diagnostic::unparsed(
                    format!("byte-compiling `{}` failed", stem),
                    stderr,
                ));
                continue;
            }
            diagnostics.extend(messages);
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
        if self.config.parser.is_some() {
            return run_parser(self.language(), &self.config, path);
        }
        let output = Command::new(self.interpreter())
            .arg("-c")
            .arg(AST_DUMPER)
            .arg(path)
            .output()?;
        if !output.status.success() {
            return Err(GradeError::ParseTree(format!(
                "cannot parse {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_tree_json(&output.stdout)
    }

    fn declarations(&self, forest: &Forest, root: ValueId, text: &str) -> Vec<Declaration> {
        nodes_of_kind(forest, root, FUNCTION_KINDS)
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

    /// `async def  f(a,b=1) -> int:` -> `f(a, b=1) -> int`
    fn canonical_signature(&self, text: &str) -> String {
        let text = text.trim();
        let text = text.strip_prefix("async ").map(str::trim_start).unwrap_or(text);
        let text = text.strip_prefix("def ").unwrap_or(text);
        let text = text.trim().trim_end_matches(':').trim();
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let (Some(open), Some(close)) = (collapsed.find('('), collapsed.rfind(')')) else {
            return collapsed;
        };
        if close < open {
            return collapsed;
        }
        let params: Vec<String> = split_top_level(&collapsed[open + 1..close])
            .into_iter()
            .map(|param| param.trim().replace(" = ", "=").replace(" :", ":"))
            .filter(|param| !param.is_empty())
            .collect();
        format!(
            "{}({}){}",
            collapsed[..open].trim(),
            params.join(", "),
            collapsed[close + 1..].trim_end()
        )
    }
}

/// Split on commas not nested inside brackets
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (at, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_signature() {
        let backend = PythonBackend::default();
        assert_eq!(backend.canonical_signature("def add(a,b):"), "add(a, b)");
        assert_eq!(
            backend.canonical_signature("async def  fetch( url , retries = 3 ) -> bytes :"),
            "fetch(url, retries=3) -> bytes"
        );
        assert_eq!(
            backend.canonical_signature("def f(x: dict = {'a': 1, 'b': 2}):"),
            "f(x: dict={'a': 1, 'b': 2})"
        );
    }

    #[test]
    fn test_parse_traceback() {
        let log = "  File \"main.py\", line 3\n    def f(:\n          ^\nSyntaxError: invalid syntax\n";
        let diagnostics = parse_traceback(log);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "SyntaxError: invalid syntax");
        assert_eq!(diagnostics[0].file.as_deref(), Some("main.py"));
        assert_eq!(diagnostics[0].line, Some(3));

        let log = "Sorry: IndentationError: unexpected indent (main.py, line 2)\n";
        assert_eq!(parse_traceback(log).len(), 0);
    }

    #[test]
    fn test_render_script_prefers_main() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PythonBackend::default();
        backend
            .render_script(dir.path(), &[PathBuf::from("util.py"), PathBuf::from("main.py")])
            .unwrap();
        let script = std::fs::read_to_string(dir.path().join("make.sh")).unwrap();
        assert!(script.contains("python3 -m py_compile 'util.py' > log/build/util.py.stdout"));
        assert!(script.contains("python3 -u 'main.py'\n"));
    }

    #[test]
    fn test_build_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("log/build");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join("main.py.ret"), "0\n").unwrap();
        std::fs::write(build.join("util.py.ret"), "1\n").unwrap();
        std::fs::write(
            build.join("util.py.stderr"),
            "  File \"util.py\", line 1\n    x = (\n        ^\nSyntaxError: '(' was never closed\n",
        )
        .unwrap();
        let diagnostics = PythonBackend::default().build_diagnostics(dir.path()).unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].message, "compile `main.py`");
        assert_eq!(diagnostics[1].severity, Severity::Error);
        assert_eq!(diagnostics[1].line, Some(1));
    }

    #[test]
    fn test_unparsed_failure_is_reported_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("log/build");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(build.join("a.py.ret"), "1\n").unwrap();
        std::fs::write(build.join("a.py.stderr"), "Sorry: out of memory\n").unwrap();
        std::fs::write(build.join("b.py.ret"), "0\n").unwrap();
        let diagnostics = PythonBackend::default().build_diagnostics(dir.path()).unwrap();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].message, "byte-compiling `a.py` failed");
        assert_eq!(diagnostics[0].raw.as_deref(), Some("Sorry: out of memory\n"));
        assert_eq!(diagnostics[1].message, "compile `b.py`");
    }

    #[test]
    fn test_declarations_from_ast_dump() {
        let text = "def add(a, b):\n    return a + b\n";
        let mut forest = Forest::new();
        let root = forest
            .load_json(&json!({
                "kind": "Module",
                "body": [{
                    "kind": "FunctionDef",
                    "name": "add",
                    "_range": {"start": 0, "end": 31},
                    "body": [{"kind": "Return", "_range": {"start": 19, "end": 31}}]
                }]
            }))
            .unwrap();
        let decls = PythonBackend::default().declarations(&forest, root, text);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "add");
        assert_eq!(decls[0].signature, "add(a, b)");
    }
}
