//! Integration tests for declarative assessment scripts
//!
//! Parse trees come from a stand-in parser command that prints a JSON dump kept
//! next to each source file, so no native C parser is needed.

use gradebox::check::Status;
use gradebox::harness::Script;
use gradebox::report::{read_rows, render_tree, Report};
use gradebox::{HarnessConfig, LanguageConfig};
use serde_json::json;
use std::path::Path;

const SOURCE: &str = "int add(int a, int b)\n{\n  return a + b;\n}\nint main() { return 0; }\n";

fn tree() -> serde_json::Value {
    json!({
        "kind": "translation_unit",
        "children": [
            {
                "kind": "function_definition",
                "_range": {"start": 0, "end": 41},
                "declarator": {
                    "kind": "function_declarator",
                    "declarator": {"kind": "identifier", "src": "add"}
                },
                "body": {
                    "kind": "compound_statement",
                    "_range": {"start": 22, "end": 41},
                    "children": [{"kind": "return_statement"}]
                }
            },
            {
                "kind": "function_definition",
                "_range": {"start": 42, "end": 66},
                "declarator": {
                    "kind": "function_declarator",
                    "declarator": {"kind": "identifier", "src": "main"}
                },
                "body": {"kind": "compound_statement", "_range": {"start": 53, "end": 66}}
            }
        ]
    })
}

fn project() -> (tempfile::TempDir, HarnessConfig) {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("main.c"), SOURCE).unwrap();
    std::fs::write(src.join("main.c.json"), tree().to_string()).unwrap();

    let mut config = HarnessConfig {
        project_dir: dir.path().to_path_buf(),
        language: "c".to_string(),
        ..HarnessConfig::default()
    };
    config.languages.insert(
        "c".to_string(),
        LanguageConfig {
            parser: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat \"$0.json\"".to_string(),
                "{file}".to_string(),
            ]),
            ..LanguageConfig::default()
        },
    );
    (dir, config)
}

fn write_script(dir: &Path, script: serde_json::Value) -> Script {
    let path = dir.join("script.json");
    std::fs::write(&path, script.to_string()).unwrap();
    Script::load_from_file(&path).unwrap()
}

#[test]
fn test_static_checks() {
    let (dir, config) = project();
    let script = write_script(
        dir.path(),
        json!({
            "title": "add",
            "tests": [{
                "text": "declarations and structure",
                "steps": [
                    {"has": "int add(int, int)"},
                    {"has": "sub"},
                    {"query": {"pattern": {"kind": "{Loop}"}, "min": 0, "max": 0, "text": "no loops"}},
                    {"query": {"pattern": {"kind": "return_statement"}}},
                    {"check_source": {"regex": "return a \\+ b"}},
                    {"not_any": {"text": "no goto", "steps": [{"check_source": {"regex": "goto"}}]}}
                ]
            }]
        }),
    );

    let results = script.evaluate(&config).unwrap();
    assert_eq!(results.len(), 1);
    let (root, archive) = &results[0];
    assert!(archive.is_file());

    let summary: Vec<(String, Status)> = root
        .checks
        .iter()
        .map(|c| (c.text.clone(), c.status))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("code declares `int add(int, int)`".to_string(), Status::Pass),
            ("code declares `sub`".to_string(), Status::Fail),
            ("no loops".to_string(), Status::Pass),
            (
                "code matches `{\"kind\":\"return_statement\"}`".to_string(),
                Status::Pass
            ),
            ("source matches `return a \\+ b`".to_string(), Status::Pass),
            ("no goto".to_string(), Status::Pass),
        ]
    );
    assert_eq!(root.status, Status::Fail);
}

#[test]
fn test_failures_are_contained_per_block() {
    let (dir, config) = project();
    let script = write_script(
        dir.path(),
        json!({
            "tests": [
                {
                    "text": "bad query inside a block",
                    "steps": [
                        {"all": {"text": "structure", "steps": [{"query": {"pattern": {"kind": "{Nope}"}}}]}},
                        {"has": "add"}
                    ]
                },
                {
                    "text": "bad query outside a block",
                    "steps": [
                        {"query": {"pattern": "{Nope}"}},
                        {"has": "add"}
                    ]
                }
            ]
        }),
    );

    let results = script.evaluate(&config).unwrap();
    assert_eq!(results.len(), 2);

    let first = &results[0].0;
    assert_eq!(first.checks.len(), 2);
    assert_eq!(first.checks[0].text, "structure");
    assert_eq!(first.checks[0].status, Status::Fail);
    assert!(first.checks[0]
        .details
        .as_deref()
        .unwrap()
        .contains("unknown macro {Nope}"));
    assert_eq!(first.checks[1].status, Status::Pass);

    // the second test stops at the error but is still archived
    let second = &results[1].0;
    assert_eq!(second.checks.len(), 1);
    assert_eq!(second.checks[0].text, "evaluation completed");
    assert_eq!(second.checks[0].status, Status::Fail);
    assert!(dir.path().join("test-002.zip").is_file());
}

#[test]
fn test_del_source_and_add_source() {
    let (dir, config) = project();
    let script = write_script(
        dir.path(),
        json!({
            "tests": [{
                "text": "rewrite sources",
                "steps": [
                    {"del_source": "add"},
                    {"check_source": {"regex": "(?m)^// int add", "text": "add is commented out"}},
                    {"add_source": "int add(int a, int b) { return b + a; }\n"},
                    {"check_source": {"regex": "return b \\+ a", "text": "replacement present"}}
                ]
            }]
        }),
    );

    let results = script.evaluate(&config).unwrap();
    let root = &results[0].0;
    assert_eq!(root.status, Status::Pass, "{:#?}", root);
    assert_eq!(root.checks.len(), 2);

    // the project's own sources are never touched
    let original = std::fs::read_to_string(dir.path().join("src/main.c")).unwrap();
    assert_eq!(original, SOURCE);
}

#[test]
fn test_deeply_nested_parse_tree() {
    let (dir, config) = project();
    // an `else if` chain nests one statement per branch
    let mut branch = json!({"kind": "return_statement"});
    for _ in 0..100 {
        branch = json!({"kind": "if_statement", "children": [{"kind": "else_clause", "children": [branch]}]});
    }
    let mut dump = tree();
    dump["children"][0]["body"]["children"] = json!([branch]);
    std::fs::write(dir.path().join("src/main.c.json"), dump.to_string()).unwrap();

    let script = write_script(
        dir.path(),
        json!({
            "tests": [{
                "text": "deep branches",
                "steps": [
                    {"has": "add"},
                    {"query": {"pattern": {"kind": "return_statement"}, "min": 1, "max": 1}}
                ]
            }]
        }),
    );
    let results = script.evaluate(&config).unwrap();
    let root = &results[0].0;
    assert_eq!(root.status, Status::Pass, "{:#?}", root);
    assert!(root.checks.iter().all(|check| check.details.is_none()));
}

#[test]
fn test_report_from_archives() {
    let (dir, config) = project();
    let script = write_script(
        dir.path(),
        json!({
            "tests": [
                {"text": "first", "steps": [{"has": "main"}]},
                {"text": "second", "steps": [{"any": {"steps": [{"has": "sub"}, {"has": "add"}]}}]}
            ]
        }),
    );
    script.evaluate(&config).unwrap();

    let report = Report::collect(dir.path()).unwrap();
    assert_eq!(report.len(), 2);
    let saved = report.save().unwrap();
    let rows = read_rows(&saved).unwrap();
    let ids: Vec<&str> = rows.iter().map(|row| row.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "1.1", "2", "2.1", "2.1.1", "2.1.2"]);

    let text = render_tree(&rows);
    assert!(text.contains("2.1 [pass] any test must pass"));
    assert!(text.contains("    2.1.1 [fail] code declares `sub`"));
}
