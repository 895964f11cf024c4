//! Strategy router - classifies submissions and picks an execution path
//!
//! Both `analyze` and `select_strategy` are pure functions; the router holds
//! no state and never fails for well-formed input. Every decision carries a
//! rationale string for audit.

pub mod analysis;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use analysis::{analyze, init_heuristics, init_heuristics_from_str, CodeAnalysis, Complexity};

/// Chosen execution path for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Client,
    Server,
    Hybrid,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyKind::Client => "client",
            StrategyKind::Server => "server",
            StrategyKind::Hybrid => "hybrid",
        };
        write!(f, "{}", s)
    }
}

/// Router decision, attached immutably to the submission for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStrategy {
    pub kind: StrategyKind,
    pub rationale: String,
    /// Best-effort relative cost estimate, not a billing unit
    pub estimated_cost_units: u32,
    /// Best-effort latency estimate
    pub estimated_latency_ms: u32,
}

/// Snapshot of system load fed into strategy selection
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLoad {
    /// Fraction of server capacity in use, 0.0..=1.0
    pub server_load: f64,
    pub queue_depth: usize,
    pub active_workers: usize,
}

/// Memory ceiling below which a submission is eligible for the client tier
const BROWSER_MEMORY_CEILING_BYTES: u64 = 100 * 1024 * 1024;
/// Server load above which browser-capable submissions are shed to the client
const LOAD_SHED_THRESHOLD: f64 = 0.8;

/// Select an execution strategy. Pure given its inputs.
///
/// Policy, in priority order: trivially safe browser-capable code goes client;
/// browser-capable code sheds to client under high server load; unsafe or
/// heavy code goes server; medium code goes hybrid (server-side, warm-pool
/// eligible); everything else defaults to server (fail-secure).
pub fn select_strategy(analysis: &CodeAnalysis, load: &SystemLoad) -> ExecutionStrategy {
    if analysis.can_run_in_browser
        && !analysis.has_unsafe_operations
        && analysis.complexity == Complexity::Low
        && analysis.estimated_memory_bytes < BROWSER_MEMORY_CEILING_BYTES
    {
        return strategy(
            StrategyKind::Client,
            format!(
                "low-complexity browser-capable code, estimated memory {} bytes below client ceiling",
                analysis.estimated_memory_bytes
            ),
            analysis,
        );
    }

    if analysis.can_run_in_browser
        && !analysis.has_unsafe_operations
        && load.server_load > LOAD_SHED_THRESHOLD
    {
        return strategy(
            StrategyKind::Client,
            format!(
                "load shedding: server load {:.2} above {:.2}, code is browser-capable and safe",
                load.server_load, LOAD_SHED_THRESHOLD
            ),
            analysis,
        );
    }

    if analysis.has_unsafe_operations || analysis.complexity == Complexity::High {
        let reason = if analysis.has_unsafe_operations {
            format!(
                "unsafe operations detected ({})",
                analysis.unsafe_categories.join(", ")
            )
        } else {
            "high estimated complexity".to_string()
        };
        return strategy(
            StrategyKind::Server,
            format!("{}; full server isolation required", reason),
            analysis,
        );
    }

    if analysis.complexity == Complexity::Medium {
        return strategy(
            StrategyKind::Hybrid,
            "medium complexity; server-side with warm sandbox reuse".to_string(),
            analysis,
        );
    }

    strategy(
        StrategyKind::Server,
        "no client tier eligibility; defaulting to server isolation".to_string(),
        analysis,
    )
}

fn strategy(kind: StrategyKind, rationale: String, analysis: &CodeAnalysis) -> ExecutionStrategy {
    let (mut cost, mut latency) = match kind {
        StrategyKind::Client => (1, 50),
        StrategyKind::Hybrid => (2, 150),
        StrategyKind::Server => (4, 300),
    };
    if analysis.requires_compilation {
        cost += 2;
        latency += 1500;
    }
    ExecutionStrategy {
        kind,
        rationale,
        estimated_cost_units: cost,
        estimated_latency_ms: latency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::{init_languages_from_str, DEFAULT_LANGUAGES};

    fn setup() {
        init_languages_from_str(DEFAULT_LANGUAGES).unwrap();
    }

    #[test]
    fn test_trivial_safe_code_goes_client() {
        setup();
        let analysis = analyze("print(int(input())*2)", "python");
        let s = select_strategy(&analysis, &SystemLoad::default());
        assert_eq!(s.kind, StrategyKind::Client);
        assert!(!s.rationale.is_empty());
    }

    #[test]
    fn test_load_shedding_sends_safe_code_client() {
        setup();
        // Medium complexity keeps it out of rule 1, load pushes it client
        let code = "for i in range(10):\n    for j in range(10):\n        print(i * j)";
        let analysis = analyze(code, "python");
        assert_eq!(analysis.complexity, Complexity::Medium);

        let idle = select_strategy(&analysis, &SystemLoad::default());
        assert_eq!(idle.kind, StrategyKind::Hybrid);

        let loaded = select_strategy(
            &analysis,
            &SystemLoad {
                server_load: 0.95,
                ..Default::default()
            },
        );
        assert_eq!(loaded.kind, StrategyKind::Client);
        assert!(loaded.rationale.contains("load shedding"));
    }

    #[test]
    fn test_unsafe_code_goes_server_even_under_load() {
        setup();
        let analysis = analyze("import socket\nsocket.socket()", "python");
        let s = select_strategy(
            &analysis,
            &SystemLoad {
                server_load: 0.99,
                ..Default::default()
            },
        );
        assert_eq!(s.kind, StrategyKind::Server);
        assert!(s.rationale.contains("unsafe"));
    }

    #[test]
    fn test_compiled_language_never_goes_client() {
        setup();
        let analysis = analyze("int main() { return 0; }", "cpp");
        let s = select_strategy(&analysis, &SystemLoad::default());
        assert_eq!(s.kind, StrategyKind::Server);
    }

    #[test]
    fn test_unknown_language_defaults_server() {
        setup();
        let analysis = analyze("PRINT 42", "cobol");
        let s = select_strategy(&analysis, &SystemLoad::default());
        assert_eq!(s.kind, StrategyKind::Server);
    }

    #[test]
    fn test_selection_is_deterministic() {
        setup();
        let analysis = analyze("print(1)", "python");
        let load = SystemLoad::default();
        assert_eq!(
            select_strategy(&analysis, &load),
            select_strategy(&analysis, &load)
        );
    }
}
