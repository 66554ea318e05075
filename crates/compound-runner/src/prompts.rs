//! Prompt-file content and the worker-pane command lines built around it.
//! A fixer always gets the latest gate feedback; verifiers get the diff
//! and the fixer's summary. In simulation mode (`is_live == false`) no
//! worker binary is invoked at all — the pane just echoes completion so
//! the rest of the mission loop can be exercised without Claude access.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::completion::reengage_banner;
use crate::gates::IterationFeedback;
use crate::tmux::worker_command_line;

pub fn fixer_prompt_path(prompt_dir: &Path, iteration: u32) -> PathBuf {
    prompt_dir.join(format!("fixer-iter{iteration}.prompt"))
}

pub fn verifier_prompt_path(prompt_dir: &Path, index: usize, iteration: u32) -> PathBuf {
    prompt_dir.join(format!("verifier-{index}-iter{iteration}.prompt"))
}

pub fn fixer_prompt_body(objective: &str, feedback: &IterationFeedback, iteration: u32) -> String {
    let mut body = String::new();
    if iteration > 1 {
        body.push_str(&reengage_banner(iteration));
        body.push_str("\n\n");
    }
    body.push_str("Objective: ");
    body.push_str(objective);
    body.push_str("\n\n");
    if feedback.gates.is_empty() {
        body.push_str("No gate results yet — make the change described above.\n");
    } else {
        body.push_str("The following quality gates are failing. Fix them.\n\n");
        body.push_str(&feedback.render());
    }
    body.push_str(&format!(
        "\nWhen the fix is complete and committed, print `{}` on its own line.\n",
        super::completion::sentinel_marker()
    ));
    body
}

pub fn verifier_prompt_body(objective: &str, fixer_summary: &str, iteration: u32) -> String {
    let mut body = String::new();
    if iteration > 1 {
        body.push_str(&reengage_banner(iteration));
        body.push_str("\n\n");
    }
    body.push_str("Objective: ");
    body.push_str(objective);
    body.push_str("\n\nReview the following fix for correctness, regressions, and missed edge cases:\n\n");
    body.push_str(fixer_summary);
    body.push_str(&format!(
        "\nWhen review is complete, print `{}` on its own line.\n",
        super::completion::sentinel_marker()
    ));
    body
}

pub async fn write_prompt(path: &Path, body: &str) -> Result<()> {
    tokio::fs::write(path, body).await.with_context(|| format!("writing prompt file {}", path.display()))
}

/// Build the command line a worker pane runs: in live mode, pipe the
/// prompt through the worker binary; in simulation mode, just sleep
/// briefly and echo the completion marker so the mission loop can be
/// exercised end-to-end without a live worker binary.
pub fn worker_launch_command(prompt_path: &Path, binary: &str, is_live: bool) -> String {
    if is_live {
        worker_command_line(prompt_path, binary, &["--print", "--dangerously-skip-permissions"])
    } else {
        format!("sleep 1 && echo '{}'", super::completion::sentinel_marker())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gates::{GateResult, IterationFeedback};

    #[test]
    fn fixer_prompt_includes_reengage_banner_after_first_iteration() {
        let feedback = IterationFeedback::default();
        let body = fixer_prompt_body("fix the bug", &feedback, 3);
        assert!(body.contains("ITERATION 3: RE-ENGAGED"));
    }

    #[test]
    fn fixer_prompt_omits_banner_on_first_iteration() {
        let feedback = IterationFeedback::default();
        let body = fixer_prompt_body("fix the bug", &feedback, 1);
        assert!(!body.contains("RE-ENGAGED"));
    }

    #[test]
    fn fixer_prompt_includes_rendered_gate_failures() {
        let feedback = IterationFeedback {
            total_errors: 1,
            gates: vec![GateResult { name: "cargo-test", passed: false, errors: vec!["FAIL foo".into()], raw_tail: vec![] }],
        };
        let body = fixer_prompt_body("fix the bug", &feedback, 2);
        assert!(body.contains("cargo-test FAILED"));
        assert!(body.contains("FAIL foo"));
    }

    #[test]
    fn simulation_command_never_invokes_worker_binary() {
        let cmd = worker_launch_command(Path::new("/tmp/x.prompt"), "claude", false);
        assert!(!cmd.contains("claude"));
        assert!(cmd.contains("TASK COMPLETE"));
    }
}
