//! Code classification heuristics
//!
//! Pure, deterministic analysis of submitted source code. The pattern table
//! lives in `files/heuristics.toml` so the router can be tuned without a
//! redeploy. Ambiguity is fail-secure: anything we cannot classify is treated
//! as having unsafe operations.

use std::sync::OnceLock;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;

use crate::languages;

/// Estimated computational complexity of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Derived, ephemeral classification of a code string.
///
/// Consumed only by the strategy router; never persisted.
#[derive(Debug, Clone)]
pub struct CodeAnalysis {
    pub has_unsafe_operations: bool,
    /// Names of the matched unsafe-pattern categories, for the rationale
    pub unsafe_categories: Vec<String>,
    pub complexity: Complexity,
    pub estimated_memory_bytes: u64,
    pub estimated_cpu_units: u32,
    pub requires_compilation: bool,
    pub can_run_in_browser: bool,
}

/// Compiled heuristic table
#[derive(Debug)]
pub struct HeuristicTable {
    unsafe_patterns: Vec<(String, Regex)>,
    loop_patterns: Vec<Regex>,
    function_def_patterns: Vec<Regex>,
    medium_threshold: usize,
    high_threshold: usize,
    recursion_weight: usize,
    base_bytes: u64,
    allocation_patterns: Vec<Regex>,
    per_allocation_bytes: u64,
    per_loop_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct RawHeuristics {
    unsafe_patterns: std::collections::BTreeMap<String, Vec<String>>,
    complexity: RawComplexity,
    memory: RawMemory,
}

#[derive(Debug, Deserialize)]
struct RawComplexity {
    loop_patterns: Vec<String>,
    function_def_patterns: Vec<String>,
    medium_threshold: usize,
    high_threshold: usize,
    recursion_weight: usize,
}

#[derive(Debug, Deserialize)]
struct RawMemory {
    base_bytes: u64,
    allocation_patterns: Vec<String>,
    per_allocation_bytes: u64,
    per_loop_bytes: u64,
}

impl HeuristicTable {
    fn from_raw(raw: RawHeuristics) -> anyhow::Result<Self> {
        let compile_all = |patterns: &[String]| -> anyhow::Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| Regex::new(p).with_context(|| format!("Invalid heuristic pattern: {}", p)))
                .collect()
        };

        let mut unsafe_patterns = Vec::new();
        for (category, patterns) in &raw.unsafe_patterns {
            for regex in compile_all(patterns)? {
                unsafe_patterns.push((category.clone(), regex));
            }
        }

        Ok(Self {
            unsafe_patterns,
            loop_patterns: compile_all(&raw.complexity.loop_patterns)?,
            function_def_patterns: compile_all(&raw.complexity.function_def_patterns)?,
            medium_threshold: raw.complexity.medium_threshold,
            high_threshold: raw.complexity.high_threshold,
            recursion_weight: raw.complexity.recursion_weight,
            base_bytes: raw.memory.base_bytes,
            allocation_patterns: compile_all(&raw.memory.allocation_patterns)?,
            per_allocation_bytes: raw.memory.per_allocation_bytes,
            per_loop_bytes: raw.memory.per_loop_bytes,
        })
    }
}

/// Built-in heuristic table used when no config file is provided
pub const DEFAULT_HEURISTICS: &str = include_str!("../../files/heuristics.toml");

static HEURISTICS: OnceLock<HeuristicTable> = OnceLock::new();

/// Initialize the heuristic table from a TOML file
pub fn init_heuristics(path: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read heuristics config at {}", path))?;
    init_heuristics_from_str(&content)
}

/// Initialize the heuristic table from TOML content. Repeated calls are no-ops.
pub fn init_heuristics_from_str(content: &str) -> anyhow::Result<()> {
    let raw: RawHeuristics = toml::from_str(content)?;
    let table = HeuristicTable::from_raw(raw)?;
    let _ = HEURISTICS.set(table);
    Ok(())
}

fn get_table() -> &'static HeuristicTable {
    HEURISTICS.get_or_init(|| {
        let raw: RawHeuristics =
            toml::from_str(DEFAULT_HEURISTICS).expect("built-in heuristics table is valid");
        HeuristicTable::from_raw(raw).expect("built-in heuristic patterns compile")
    })
}

/// Classify a code string. Pure and deterministic for the same inputs.
///
/// Never fails for well-formed input: an unknown language is classified as
/// unsafe and server-bound instead of producing an error.
pub fn analyze(code: &str, language: &str) -> CodeAnalysis {
    let table = get_table();

    let Some(lang) = languages::get_language_config(language) else {
        return CodeAnalysis {
            has_unsafe_operations: true,
            unsafe_categories: vec!["unknown_language".to_string()],
            complexity: Complexity::High,
            estimated_memory_bytes: table.base_bytes,
            estimated_cpu_units: 4,
            requires_compilation: false,
            can_run_in_browser: false,
        };
    };

    let mut unsafe_categories = Vec::new();
    for (category, regex) in &table.unsafe_patterns {
        if regex.is_match(code) && !unsafe_categories.contains(category) {
            unsafe_categories.push(category.clone());
        }
    }

    let loop_count: usize = table
        .loop_patterns
        .iter()
        .map(|r| r.find_iter(code).count())
        .sum();
    let recursive_count = count_recursive_functions(code, &table.function_def_patterns);

    let score = loop_count + recursive_count * table.recursion_weight;
    let complexity = if score >= table.high_threshold {
        Complexity::High
    } else if score >= table.medium_threshold {
        Complexity::Medium
    } else {
        Complexity::Low
    };

    let allocation_sites: usize = table
        .allocation_patterns
        .iter()
        .map(|r| r.find_iter(code).count())
        .sum();
    let estimated_memory_bytes = table.base_bytes
        + allocation_sites as u64 * table.per_allocation_bytes
        + loop_count as u64 * table.per_loop_bytes;

    let estimated_cpu_units = match complexity {
        Complexity::Low => 1,
        Complexity::Medium => 2,
        Complexity::High => 4,
    };

    CodeAnalysis {
        has_unsafe_operations: !unsafe_categories.is_empty(),
        unsafe_categories,
        complexity,
        estimated_memory_bytes,
        estimated_cpu_units,
        requires_compilation: lang.requires_compilation(),
        can_run_in_browser: lang.can_run_in_browser && !lang.requires_compilation(),
    }
}

/// Count functions that reference their own name after definition.
///
/// A name that appears more than once (definition plus at least one other
/// occurrence) is counted as potentially recursive. Deliberately coarse; the
/// bias is toward over-estimating complexity.
fn count_recursive_functions(code: &str, def_patterns: &[Regex]) -> usize {
    let mut count = 0;
    for pattern in def_patterns {
        for caps in pattern.captures_iter(code) {
            if let Some(name) = caps.get(1) {
                let occurrences = code.matches(name.as_str()).count();
                if occurrences >= 2 {
                    count += 1;
                }
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::{init_languages_from_str, DEFAULT_LANGUAGES};

    fn setup() {
        init_languages_from_str(DEFAULT_LANGUAGES).unwrap();
    }

    #[test]
    fn test_trivial_python_is_low_and_safe() {
        setup();
        let analysis = analyze("print(int(input())*2)", "python");
        assert!(!analysis.has_unsafe_operations);
        assert_eq!(analysis.complexity, Complexity::Low);
        assert!(analysis.can_run_in_browser);
        assert!(!analysis.requires_compilation);
        assert!(analysis.estimated_memory_bytes < 100 * 1024 * 1024);
    }

    #[test]
    fn test_network_code_is_unsafe() {
        setup();
        let analysis = analyze("import socket\ns = socket.socket()", "python");
        assert!(analysis.has_unsafe_operations);
        assert!(analysis.unsafe_categories.iter().any(|c| c == "network"));
    }

    #[test]
    fn test_process_spawn_is_unsafe() {
        setup();
        let analysis = analyze("import subprocess\nsubprocess.run(['ls'])", "python");
        assert!(analysis.has_unsafe_operations);
    }

    #[test]
    fn test_loops_raise_complexity() {
        setup();
        let code = r#"
for i in range(100):
    for j in range(100):
        for k in range(100):
            for l in range(100):
                for m in range(100):
                    pass
"#;
        let analysis = analyze(code, "python");
        assert_eq!(analysis.complexity, Complexity::High);
    }

    #[test]
    fn test_recursion_counts_toward_complexity() {
        setup();
        let code = "def fib(n):\n    return n if n < 2 else fib(n-1) + fib(n-2)\n";
        let analysis = analyze(code, "python");
        assert!(analysis.complexity >= Complexity::Medium);
    }

    #[test]
    fn test_unknown_language_is_fail_secure() {
        setup();
        let analysis = analyze("PRINT 42", "cobol");
        assert!(analysis.has_unsafe_operations);
        assert!(!analysis.can_run_in_browser);
    }

    #[test]
    fn test_compiled_language_cannot_run_in_browser() {
        setup();
        let analysis = analyze("int main() { return 0; }", "cpp");
        assert!(analysis.requires_compilation);
        assert!(!analysis.can_run_in_browser);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        setup();
        let code = "while True:\n    pass";
        let a = analyze(code, "python");
        let b = analyze(code, "python");
        assert_eq!(a.has_unsafe_operations, b.has_unsafe_operations);
        assert_eq!(a.complexity, b.complexity);
        assert_eq!(a.estimated_memory_bytes, b.estimated_memory_bytes);
    }
}
