//! C backend: gcc build, optional Dr. Memory run, external parse trees.

pub mod drmem;
pub mod gcc;

use crate::config::types::{LanguageConfig, Result};
use crate::judge::adapter::{
    clear_run_outputs, log_stem, read_return_code, run_parser, shell_quote, Declaration,
    Diagnostic, LanguageBackend, MemoryFinding, RenderedScript, Severity,
};
use crate::judge::source::{declaration_name, nodes_of_kind, signature_text};
use crate::query::MacroTable;
use crate::tree::{Forest, ValueId};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const COMPILE_FLAGS: &[&str] = &[
    "-c",
    "-g",
    "-fno-inline",
    "-fno-omit-frame-pointer",
    "-Wall",
    "-std=c11",
    "-Wpedantic",
];

const C_KEYWORDS: &[&str] = &[
    "const", "volatile", "unsigned", "signed", "short", "long", "int", "char", "float", "double",
    "void", "struct", "union", "enum", "static", "inline", "extern", "restrict", "_Bool", "bool",
];

#[derive(Debug, Clone, Default)]
pub struct CBackend {
    config: LanguageConfig,
}

impl CBackend {
    pub fn new(config: &LanguageConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn compiler(&self) -> &str {
        self.config.compiler.as_deref().unwrap_or("gcc")
    }

    fn object_for(source: &Path) -> PathBuf {
        source.with_extension("o")
    }
}

impl LanguageBackend for CBackend {
    fn language(&self) -> &'static str {
        "c"
    }

    fn suffix(&self) -> &'static str {
        ".c"
    }

    fn is_source(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("c") | Some("h")
        )
    }

    fn macros(&self) -> MacroTable {
        let mut table = MacroTable::new();
        table.insert(
            "Loop".to_string(),
            vec![
                "for_statement".to_string(),
                "while_statement".to_string(),
                "do_statement".to_string(),
            ],
        );
        table.insert(
            "Cond".to_string(),
            vec!["if_statement".to_string(), "switch_statement".to_string()],
        );
        table.insert("Call".to_string(), vec!["call_expression".to_string()]);
        table
    }

    fn comment_prefix(&self) -> &'static str {
        "//"
    }

    fn render_script(&self, workdir: &Path, sources: &[PathBuf]) -> Result<RenderedScript> {
        clear_run_outputs(workdir)?;
        let mut script = String::new();
        let _ = writeln!(script, "mkdir -p log/build log/run log/memchk");
        let _ = writeln!(script, "echo $$ > log/run/make.pid");

        let mut objects = Vec::new();
        for source in sources.iter().filter(|p| p.extension().is_some_and(|e| e == "c")) {
            let object = Self::object_for(source);
            let log = format!("log/build/{}", log_stem(source));
            let _ = writeln!(script, "rm -f {}", shell_quote(&object.to_string_lossy()));
            let mut command = vec![self.compiler().to_string()];
            command.extend(COMPILE_FLAGS.iter().map(|flag| flag.to_string()));
            command.extend(self.config.compiler_args.iter().cloned());
            let _ = writeln!(
                script,
                "{} {} -o {} > {log}.stdout 2> {log}.stderr",
                command.join(" "),
                shell_quote(&source.to_string_lossy()),
                shell_quote(&object.to_string_lossy()),
            );
            let _ = writeln!(script, "echo $? > {log}.ret");
            objects.push(shell_quote(&object.to_string_lossy()));
        }

        let _ = writeln!(script, "rm -f a.out");
        let _ = writeln!(
            script,
            "{} {} {} -o a.out > log/build/link.stdout 2> log/build/link.stderr",
            self.compiler(),
            objects.join(" "),
            self.config.linker_args.join(" "),
        );
        let _ = writeln!(script, "echo $? > log/build/link.ret");

        let runner = match &self.config.memcheck {
            Some(prefix) => {
                let prefix: Vec<String> = prefix
                    .iter()
                    .map(|arg| arg.replace("{logdir}", "log/memchk"))
                    .collect();
                format!("{} ./a.out", prefix.join(" "))
            }
            None => "./a.out".to_string(),
        };
        let _ = writeln!(script, "if [ -x a.out ]; then");
        let _ = writeln!(script, "  {}", runner);
        let _ = writeln!(script, "  echo $? > log/run/run.ret");
        let _ = writeln!(script, "fi");

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
        let mut sources: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(workdir).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            if entry.path().starts_with(workdir.join("log")) {
                continue;
            }
            if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "c") {
                if let Ok(relative) = entry.path().strip_prefix(workdir) {
                    sources.push(relative.to_path_buf());
                }
            }
        }

        let mut diagnostics = Vec::new();
        for source in &sources {
            let stem = log_stem(source);
            let Some(ret) = read_return_code(&build.join(format!("{}.ret", stem))) else {
                continue;
            };
            let stderr =
                std::fs::read_to_string(build.join(format!("{}.stderr", stem))).unwrap_or_default();
            let messages = gcc::parse_messages(&stderr);
            let failed_without_error = ret != 0
                && !messages
                    .iter()
                    .any(|d| d.severity == Severity::Error);
            if failed_without_error {
                diagnostics.push(Diagnostic::unparsed(
                    format!("compilation of `{}` failed", source.display()),
                    stderr,
                ));
                continue;
            }
            if ret == 0 {
                diagnostics.push(Diagnostic::info(format!("compile `{}`", source.display())));
            }
            diagnostics.extend(messages);
        }

        let Some(link_ret) = read_return_code(&build.join("link.ret")) else {
            if !sources.is_empty() {
                diagnostics.push(Diagnostic::unparsed("build did not complete", ""));
            }
            return Ok(diagnostics);
        };
        let link_log = std::fs::read_to_string(build.join("link.stderr")).unwrap_or_default();
        if link_ret == 0 {
            diagnostics.push(Diagnostic::info("link program"));
        } else {
            let compile_failed = diagnostics
                .iter()
                .any(|d| d.severity == Severity::Error);
            let messages = gcc::parse_link_messages(&link_log);
            if messages.is_empty() && !compile_failed {
                diagnostics.push(Diagnostic::unparsed("linking failed", link_log));
            }
            diagnostics.extend(messages);
        }
        Ok(diagnostics)
    }

    fn memory_findings(&self, workdir: &Path) -> Result<Vec<MemoryFinding>> {
        let logdir = workdir.join("log/memchk");
        if self.config.memcheck.is_none() || !logdir.exists() {
            return Ok(Vec::new());
        }
        let workdir_name = workdir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut findings = Vec::new();
        for entry in WalkDir::new(&logdir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_name() == "results.txt" {
                let text = std::fs::read_to_string(entry.path())?;
                findings.extend(drmem::parse_results(&text, &workdir_name));
            }
        }
        Ok(findings)
    }

    fn exit_code(&self, workdir: &Path) -> Option<i32> {
        read_return_code(&workdir.join("log/run/run.ret"))
    }

    fn parse_source(&self, path: &Path) -> Result<serde_json::Value> {
        run_parser(self.language(), &self.config, path)
    }

    fn declarations(&self, forest: &Forest, root: ValueId, text: &str) -> Vec<Declaration> {
        nodes_of_kind(forest, root, &["function_definition"])
            .into_iter()
            .filter_map(|node| {
                let name = declaration_name(forest, node, text)?;
                let range = forest.range(node)?.clone();
                let signature = self.canonical_signature(&signature_text(forest, node, text)?);
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

    /// Drop parameter names and normalise spacing: `int  add(int a, char *s)` -> `int add(int, char *)`
    fn canonical_signature(&self, text: &str) -> String {
        let text = text.trim().trim_end_matches(['{', ';']).trim();
        let (Some(open), Some(close)) = (text.find('('), text.rfind(')')) else {
            return normalise_tokens(text);
        };
        if close < open {
            return normalise_tokens(text);
        }
        let head = normalise_tokens(&text[..open]);
        let params: Vec<String> = text[open + 1..close]
            .split(',')
            .map(|param| strip_parameter_name(param.trim()))
            .filter(|param| !param.is_empty())
            .collect();
        format!("{}({})", head, params.join(", "))
    }
}

/// Collapse whitespace and give `*` a single space on its left
fn normalise_tokens(text: &str) -> String {
    text.replace('*', " * ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("* ", "*")
        .replace(" *", " *")
}

fn strip_parameter_name(param: &str) -> String {
    let spaced = param.replace('*', " * ").replace('[', " [");
    let mut tokens: Vec<&str> = spaced.split_whitespace().collect();
    let arrays: Vec<&str> = match tokens.iter().position(|t| t.starts_with('[')) {
        Some(at) => tokens.split_off(at),
        None => Vec::new(),
    };
    let type_tokens = tokens.iter().filter(|t| **t != "*").count();
    let tagged = tokens.len() >= 2
        && matches!(tokens[tokens.len() - 2], "struct" | "union" | "enum");
    if let Some(last) = tokens.last() {
        let is_name = *last != "*"
            && !tagged
            && !C_KEYWORDS.contains(last)
            && last.chars().all(|c| c.is_alphanumeric() || c == '_')
            && type_tokens > 1;
        if is_name {
            tokens.pop();
        }
    }
    let mut result = normalise_tokens(&tokens.join(" "));
    for array in arrays {
        result.push_str(&array.replace(|c: char| c.is_alphanumeric() || c == '_', ""));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_signature() {
        let backend = CBackend::default();
        assert_eq!(backend.canonical_signature("int  add(int a, int b)"), "int add(int, int)");
        assert_eq!(
            backend.canonical_signature("char *dup(const char* s)"),
            "char *dup(const char *)"
        );
        assert_eq!(backend.canonical_signature("void f(void)"), "void f(void)");
        assert_eq!(backend.canonical_signature("int sum(int t[], int n) {"), "int sum(int[], int)");
        assert_eq!(
            backend.canonical_signature("int add(int, int)"),
            backend.canonical_signature("int add(int x,int y)")
        );
    }

    #[test]
    fn test_render_script() {
        let dir = tempfile::tempdir().unwrap();
        let backend = CBackend::new(&LanguageConfig {
            memcheck: Some(vec![
                "drmemory".to_string(),
                "-logdir".to_string(),
                "{logdir}".to_string(),
                "--".to_string(),
            ]),
            ..LanguageConfig::default()
        });
        let rendered = backend
            .render_script(dir.path(), &[PathBuf::from("main.c"), PathBuf::from("util.h")])
            .unwrap();
        assert_eq!(rendered.stop_script, Some(PathBuf::from("stop.sh")));
        let script = std::fs::read_to_string(dir.path().join("make.sh")).unwrap();
        assert!(script.contains(
            "gcc -c -g -fno-inline -fno-omit-frame-pointer -Wall -std=c11 -Wpedantic 'main.c' -o 'main.o'"
        ));
        assert!(script.contains("echo $? > log/build/main.c.ret"));
        assert!(!script.contains("util.h"));
        assert!(script.contains("drmemory -logdir log/memchk -- ./a.out"));
        assert!(script.contains("echo $? > log/run/run.ret"));
    }

    #[test]
    fn test_build_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.c"), "int main() { int x; }\n").unwrap();
        std::fs::create_dir_all(dir.path().join("log/build")).unwrap();
        std::fs::write(dir.path().join("log/build/main.c.ret"), "0\n").unwrap();
        std::fs::write(
            dir.path().join("log/build/main.c.stderr"),
            "main.c:1:18: warning: unused variable ‘x’ [-Wunused-variable]\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("log/build/link.ret"), "0\n").unwrap();

        let diagnostics = CBackend::default().build_diagnostics(dir.path()).unwrap();
        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["compile `main.c`", "unused variable ‘x’", "link program"]
        );
    }

    #[test]
    fn test_unparsed_build_failure_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("log/build");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(dir.path().join("a.c"), "int f(void) { return 0; }\n").unwrap();
        std::fs::write(dir.path().join("b.c"), "int main() { int x; }\n").unwrap();
        std::fs::write(build.join("a.c.ret"), "4\n").unwrap();
        std::fs::write(build.join("a.c.stderr"), "gcc: internal compiler error\n").unwrap();
        std::fs::write(build.join("b.c.ret"), "0\n").unwrap();
        std::fs::write(
            build.join("b.c.stderr"),
            "b.c:1:18: warning: unused variable ‘x’ [-Wunused-variable]\n",
        )
        .unwrap();
        std::fs::write(build.join("link.ret"), "1\n").unwrap();
        std::fs::write(build.join("link.stderr"), "collect2: error: ld returned 1\n").unwrap();

        let diagnostics = CBackend::default().build_diagnostics(dir.path()).unwrap();
        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["compilation of `a.c` failed", "compile `b.c`", "unused variable ‘x’"]
        );
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(
            diagnostics[0].raw.as_deref(),
            Some("gcc: internal compiler error\n")
        );
    }

    #[test]
    fn test_unparsed_link_failure() {
        let dir = tempfile::tempdir().unwrap();
        let build = dir.path().join("log/build");
        std::fs::create_dir_all(&build).unwrap();
        std::fs::write(dir.path().join("main.c"), "int main() {}\n").unwrap();
        std::fs::write(build.join("main.c.ret"), "0\n").unwrap();
        std::fs::write(build.join("link.ret"), "1\n").unwrap();
        std::fs::write(build.join("link.stderr"), "ld: cannot find -lm2\n").unwrap();

        let diagnostics = CBackend::default().build_diagnostics(dir.path()).unwrap();
        let last = diagnostics.last().unwrap();
        assert_eq!(last.message, "linking failed");
        assert_eq!(last.raw.as_deref(), Some("ld: cannot find -lm2\n"));
    }

    #[test]
    fn test_declarations() {
        let text = "int add(int a, int b) { return a + b; }\n";
        let mut forest = Forest::new();
        let root = forest
            .load_json(&json!({
                "kind": "translation_unit",
                "children": [{
                    "kind": "function_definition",
                    "_range": {"start": 0, "end": 39},
                    "type": {"kind": "primitive_type", "_range": {"start": 0, "end": 3}},
                    "declarator": {
                        "kind": "function_declarator",
                        "_range": {"start": 4, "end": 21},
                        "declarator": {"kind": "identifier", "_range": {"start": 4, "end": 7}}
                    },
                    "body": {"kind": "compound_statement", "_range": {"start": 22, "end": 39}}
                }]
            }))
            .unwrap();
        let decls = CBackend::default().declarations(&forest, root, text);
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "add");
        assert_eq!(decls[0].signature, "int add(int, int)");
    }
}
