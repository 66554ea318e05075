//! Runs a project's quality gates and turns their output into structured
//! feedback a fixer worker can act on.

use std::path::Path;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

use crate::project::Gate;

const GATE_TIMEOUT: Duration = Duration::from_secs(300);
/// How many trailing lines of a failing gate's combined output to keep
/// for the prompt — enough context without dumping a whole test log.
const RAW_TAIL_LINES: usize = 40;

#[derive(Debug, Clone)]
pub struct GateResult {
    pub name: &'static str,
    pub passed: bool,
    pub errors: Vec<String>,
    pub raw_tail: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IterationFeedback {
    pub total_errors: usize,
    pub gates: Vec<GateResult>,
}

impl IterationFeedback {
    pub fn all_passed(&self) -> bool {
        self.gates.iter().all(|g| g.passed)
    }

    /// Render a fixer-facing summary: failing gates first, each with its
    /// parsed error lines (falling back to the raw tail when nothing
    /// matched the error regex).
    pub fn render(&self) -> String {
        let mut out = String::new();
        for gate in &self.gates {
            if gate.passed {
                continue;
            }
            out.push_str(&format!("## {} FAILED\n", gate.name));
            let lines = if gate.errors.is_empty() { &gate.raw_tail } else { &gate.errors };
            for line in lines {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        out
    }
}

/// Run every gate in order, stopping early on the first failure — later
/// gates (e.g. tests) are skipped while an earlier one (e.g. typecheck)
/// is still red, matching how a human would triage.
pub async fn run_gates(target_dir: &Path, gates: &[Gate]) -> IterationFeedback {
    let mut results = Vec::with_capacity(gates.len());
    let mut stop = false;
    for gate in gates {
        if stop {
            break;
        }
        let result = run_one(target_dir, gate).await;
        stop = !result.passed;
        results.push(result);
    }
    let total_errors = results.iter().map(|g| g.errors.len().max(usize::from(!g.passed))).sum();
    IterationFeedback { total_errors, gates: results }
}

async fn run_one(target_dir: &Path, gate: &Gate) -> GateResult {
    let output = timeout(GATE_TIMEOUT, Command::new(gate.program).args(&gate.args).current_dir(target_dir).output()).await;

    let output = match output {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            return GateResult {
                name: gate.name,
                passed: false,
                errors: vec![format!("failed to launch {}: {e}", gate.program)],
                raw_tail: vec![],
            };
        }
        Err(_) => {
            return GateResult {
                name: gate.name,
                passed: false,
                errors: vec![format!("{} timed out after {:?}", gate.name, GATE_TIMEOUT)],
                raw_tail: vec![],
            };
        }
    };

    let passed = output.status.success();
    let combined = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let errors = if passed { vec![] } else { extract_errors(&combined) };
    let raw_tail = combined.lines().rev().take(RAW_TAIL_LINES).map(str::to_string).collect::<Vec<_>>().into_iter().rev().collect();

    GateResult { name: gate.name, passed, errors, raw_tail }
}

/// Pull out lines that look like a compiler/linter/test-runner
/// diagnostic. Generic across toolchains by pattern rather than one
/// regex per ecosystem: `error[...]`, `error:`, `FAIL`, `Error:`.
fn extract_errors(output: &str) -> Vec<String> {
    let re = Regex::new(r"(?i)^(error(\[[A-Za-z0-9]+\])?:|.*\berror\b.*|FAIL\b.*|.*\bfailed\b.*)").unwrap();
    output.lines().filter(|l| re.is_match(l.trim())).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_errors_matches_rustc_style() {
        let out = "   Compiling x v0.1.0\nerror[E0308]: mismatched types\n  --> src/lib.rs:3:5\nwarning: unused import";
        let errors = extract_errors(out);
        assert!(errors.iter().any(|l| l.contains("E0308")));
        assert!(!errors.iter().any(|l| l.contains("Compiling")));
    }

    #[test]
    fn extract_errors_matches_test_failures() {
        let out = "test foo ... FAIL\ntest bar ... ok\nthread 'foo' panicked, assertion failed";
        let errors = extract_errors(out);
        assert!(errors.iter().any(|l| l.contains("FAIL")));
    }

    #[test]
    fn render_skips_passing_gates() {
        let feedback = IterationFeedback {
            total_errors: 1,
            gates: vec![
                GateResult { name: "cargo-check", passed: true, errors: vec![], raw_tail: vec![] },
                GateResult { name: "cargo-test", passed: false, errors: vec!["FAIL foo".into()], raw_tail: vec![] },
            ],
        };
        let rendered = feedback.render();
        assert!(!rendered.contains("cargo-check"));
        assert!(rendered.contains("cargo-test FAILED"));
        assert!(rendered.contains("FAIL foo"));
    }

    #[test]
    fn all_passed_true_when_no_gates_failed() {
        let feedback = IterationFeedback {
            total_errors: 0,
            gates: vec![GateResult { name: "cargo-check", passed: true, errors: vec![], raw_tail: vec![] }],
        };
        assert!(feedback.all_passed());
    }
}
