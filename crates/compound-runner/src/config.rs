use std::path::PathBuf;

/// One invocation's worth of configuration. A compound mission operates on
/// exactly one `target_dir` and runs to completion or exhaustion — there is
/// no notion of reconfiguring a runner mid-mission.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub target_dir: PathBuf,
    pub max_iterations: u32,
    pub num_workers: u32,
    pub port: u16,
    pub server_url: String,
    pub objective: String,
    /// When false, worker panes run a simulation that just prints
    /// "TASK COMPLETE" instead of actually invoking the worker binary.
    pub is_live: bool,
}

impl RunnerConfig {
    pub fn health_url(&self) -> String {
        format!("{}/health", self.server_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_url_strips_trailing_slash() {
        let cfg = RunnerConfig {
            target_dir: PathBuf::from("/tmp/x"),
            max_iterations: 1,
            num_workers: 1,
            port: 4000,
            server_url: "http://127.0.0.1:4000/".to_string(),
            objective: "fix it".to_string(),
            is_live: false,
        };
        assert_eq!(cfg.health_url(), "http://127.0.0.1:4000/health");
    }
}
