// Query engine benchmark
// Measures descendant search with macro expansion over a synthetic parse tree
// Target: p95 < 50ms for a 20k-node tree

use gradebox::query::{self, MacroTable};
use gradebox::tree::Forest;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

const ITERATIONS: usize = 50;
const WARMUP_ITERATIONS: usize = 5;
const FUNCTIONS: usize = 400;
const P95_BUDGET: Duration = Duration::from_millis(50);

struct LatencyStats {
    p50: Duration,
    p95: Duration,
    min: Duration,
    max: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();
        Self {
            p50: samples[len / 2],
            p95: samples[(len as f64 * 0.95) as usize],
            min: samples[0],
            max: samples[len - 1],
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
    }
}

/// A function with a loop around a branch around a call, plus filler statements
fn function(index: usize) -> Value {
    let filler: Vec<Value> = (0..8)
        .map(|n| json!({"kind": "expression_statement", "value": n, "children": [{"kind": "identifier", "src": "x"}]}))
        .collect();
    json!({
        "kind": "function_definition",
        "name": format!("f{}", index),
        "body": {
            "kind": "compound_statement",
            "children": [
                {
                    "kind": if index % 2 == 0 { "for_statement" } else { "while_statement" },
                    "body": {
                        "kind": "if_statement",
                        "consequence": {"kind": "call_expression", "function": "printf", "arguments": [1, 2]}
                    }
                },
                {"kind": "compound_statement", "children": filler}
            ]
        }
    })
}

fn main() {
    println!("=== gradebox query benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let unit = json!({
        "kind": "translation_unit",
        "children": (0..FUNCTIONS).map(function).collect::<Vec<_>>()
    });
    let mut forest = Forest::new();
    let root = match forest.load_json(&unit) {
        Ok(root) => root,
        Err(e) => {
            println!("❌ FAIL: could not load tree: {}", e);
            std::process::exit(1);
        }
    };
    println!("Tree size: {} values", forest.len());

    let mut macros = MacroTable::new();
    macros.insert(
        "Loop".to_string(),
        vec!["for_statement".to_string(), "while_statement".to_string()],
    );
    let text = r#"{"kind": "{Loop}", "body": {"consequence": {"kind": "call_expression"}}}"#;

    let mut samples = Vec::with_capacity(ITERATIONS);
    for iteration in 0..WARMUP_ITERATIONS + ITERATIONS {
        let start = Instant::now();
        let found = match query::run(&forest, &[root], text, &macros) {
            Ok(found) => found.len(),
            Err(e) => {
                println!("❌ FAIL: query error: {}", e);
                std::process::exit(1);
            }
        };
        let elapsed = start.elapsed();
        if found != FUNCTIONS {
            println!("❌ FAIL: expected {} matches, got {}", FUNCTIONS, found);
            std::process::exit(1);
        }
        if iteration >= WARMUP_ITERATIONS {
            samples.push(elapsed);
        }
    }

    let stats = LatencyStats::from_samples(samples);
    stats.print("Descendant search");

    if stats.p95 <= P95_BUDGET {
        println!("✅ PASS");
        std::process::exit(0);
    } else {
        println!("❌ FAIL: p95 {:?} exceeds {:?}", stats.p95, P95_BUDGET);
        std::process::exit(1);
    }
}
