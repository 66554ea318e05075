//! Worker-done detection. A worker may finish its turn by writing a
//! sentinel file, by printing `TASK COMPLETE` in its pane, or both — the
//! sentinel can be lost to a crash before the write lands, and the pane
//! scan can be fooled by the phrase appearing in quoted context, so
//! neither signal alone is trusted; either is sufficient to call a
//! worker done.

use std::path::{Path, PathBuf};

const COMPLETE_MARKER: &str = "TASK COMPLETE";

/// The literal string a worker prints to signal it is done.
pub fn sentinel_marker() -> &'static str {
    COMPLETE_MARKER
}

pub fn sentinel_path(prompt_dir: &Path, handle: &str, iteration: u32) -> PathBuf {
    prompt_dir.join(format!("{handle}-iter{iteration}.done"))
}

/// True once either the sentinel file for `iteration` exists, or the
/// pane's captured text contains the completion marker after the point
/// the iteration was re-engaged (iteration 1 has no re-engagement banner,
/// so the marker anywhere in the capture counts).
pub fn is_complete(sentinel: &Path, pane_text: &str, iteration: u32) -> bool {
    if sentinel.exists() {
        return true;
    }
    marker_seen_after_reengage(pane_text, iteration)
}

fn marker_seen_after_reengage(pane_text: &str, iteration: u32) -> bool {
    if iteration <= 1 {
        return pane_text.contains(COMPLETE_MARKER);
    }
    let banner = reengage_banner(iteration);
    match pane_text.find(&banner) {
        Some(idx) => pane_text[idx..].contains(COMPLETE_MARKER),
        None => false,
    }
}

pub fn reengage_banner(iteration: u32) -> String {
    format!("=== ITERATION {iteration}: RE-ENGAGED ===")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_alone_marks_complete() {
        let dir = std::env::temp_dir().join(format!("compound-runner-completion-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = sentinel_path(&dir, "worker-1", 2);
        std::fs::write(&path, "").unwrap();
        assert!(is_complete(&path, "", 2));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn pane_marker_alone_marks_complete_on_first_iteration() {
        let missing = PathBuf::from("/tmp/does-not-exist-xyz.done");
        assert!(is_complete(&missing, "doing work\nTASK COMPLETE\n", 1));
    }

    #[test]
    fn marker_before_reengage_banner_does_not_count_for_later_iterations() {
        let missing = PathBuf::from("/tmp/does-not-exist-xyz.done");
        let pane = "TASK COMPLETE\n=== ITERATION 2: RE-ENGAGED ===\nstill working";
        assert!(!is_complete(&missing, pane, 2));
    }

    #[test]
    fn marker_after_reengage_banner_counts() {
        let missing = PathBuf::from("/tmp/does-not-exist-xyz.done");
        let pane = "=== ITERATION 2: RE-ENGAGED ===\nfixed it\nTASK COMPLETE";
        assert!(is_complete(&missing, pane, 2));
    }

    #[test]
    fn neither_signal_present_is_incomplete() {
        let missing = PathBuf::from("/tmp/does-not-exist-xyz.done");
        assert!(!is_complete(&missing, "still working", 1));
    }
}
