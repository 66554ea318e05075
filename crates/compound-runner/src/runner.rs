//! Mission orchestration: the 13-step lifecycle described for the
//! compound runner. `Runner::run` is the single entry point; every other
//! module in this crate exists to support one step of it.

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::completion::{is_complete, sentinel_path};
use crate::config::RunnerConfig;
use crate::gates::{IterationFeedback, run_gates};
use crate::git_stage::GitStage;
use crate::preflight;
use crate::project::{self, ProjectType};
use crate::prompts::{fixer_prompt_body, fixer_prompt_path, verifier_prompt_body, verifier_prompt_path, worker_launch_command, write_prompt};
use crate::result::{MissionResult, MissionStatus};
use crate::server_client::ServerClient;
use crate::tmux::{PaneLayout, TmuxSession};

const WAIT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);
const SERVER_START_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub struct Runner {
    cfg: RunnerConfig,
}

impl Runner {
    pub fn new(cfg: RunnerConfig) -> Self {
        Self { cfg }
    }

    pub async fn run(self) -> MissionResult {
        let mut shutdown = shutdown_signal();

        tokio::select! {
            result = self.run_inner() => result,
            _ = &mut shutdown => {
                warn!("mission interrupted by signal");
                MissionResult::failed_preflight()
            }
        }
    }

    async fn run_inner(&self) -> MissionResult {
        // Step 2: preflight.
        if let Err(e) = preflight::run(&self.cfg).await {
            error!(error = %e, "preflight failed");
            return MissionResult::failed_preflight();
        }

        // Step 3: project detection.
        let Some((project_type, gates)) = project::detect(&self.cfg.target_dir) else {
            error!("could not detect project type");
            return MissionResult::failed_preflight();
        };
        let gates = project::available_gates(gates);
        if gates.is_empty() {
            error!("no quality gates available on PATH for this project type");
            return MissionResult::failed_preflight();
        }

        // Step 4: git staging.
        let now_ms = chrono::Utc::now().timestamp_millis();
        let stage = match GitStage::stage(&self.cfg.target_dir, now_ms).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "git staging failed");
                return MissionResult::failed_preflight();
            }
        };

        let outcome = self.run_staged(project_type, &gates, &stage).await;

        // Step 13: cleanup / restore. Only restore git state on success or
        // a clean failure after staging — the tmux session is left alive
        // for post-mortem unless the mission succeeded.
        stage.restore().await;

        let (status, iterations) = match outcome {
            Ok((status, iterations)) => (status, iterations),
            Err(e) => {
                error!(error = %e, "mission failed");
                (MissionStatus::Failed, 0)
            }
        };

        MissionResult { status, iterations, branch: stage.fleet_branch.clone(), project_type: Some(project_type.as_str().to_string()) }
    }

    async fn run_staged(
        &self,
        project_type: ProjectType,
        gates: &[project::Gate],
        stage: &GitStage,
    ) -> Result<(MissionStatus, u32)> {
        let mission_id = Uuid::new_v4().to_string();
        let swarm_id = format!("fleet-{mission_id}");
        let prompt_dir = std::env::temp_dir().join(format!("fleet-prompts-{mission_id}"));
        tokio::fs::create_dir_all(&prompt_dir).await.context("creating prompt directory")?;

        // Step 5: mission setup.
        let mut client = ServerClient::new(&self.cfg.server_url);

        // Step 6: tmux layout.
        let layout = TmuxSession::create_layout(&self.cfg.target_dir, &mission_id, self.cfg.num_workers).await.context("creating tmux layout")?;

        let cleanup_result = self.drive_mission(project_type, gates, stage, &mission_id, &swarm_id, &prompt_dir, &mut client, &layout).await;

        let _ = tokio::fs::remove_dir_all(&prompt_dir).await;

        match &cleanup_result {
            Ok((MissionStatus::Succeeded, _)) => TmuxSession::kill_session(&layout.session).await,
            Ok((MissionStatus::Failed, _)) | Err(_) => {
                warn!(session = %layout.session, "leaving tmux session alive for post-mortem");
            }
        }

        cleanup_result
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_mission(
        &self,
        _project_type: ProjectType,
        gates: &[project::Gate],
        stage: &GitStage,
        _mission_id: &str,
        swarm_id: &str,
        prompt_dir: &std::path::Path,
        client: &mut ServerClient,
        layout: &PaneLayout,
    ) -> Result<(MissionStatus, u32)> {
        // Step 7: start server.
        let server_cmd = format!("fleet-server --port {}", self.cfg.port);
        TmuxSession::send_command(&layout.server_pane, &server_cmd).await.context("starting server pane")?;

        if tokio::time::timeout(SERVER_START_TIMEOUT, client.wait_until_ready()).await.is_err() {
            let tail = TmuxSession::capture_tail(&layout.server_pane, 200).await.unwrap_or_default();
            anyhow::bail!("server did not become healthy within {:?}; pane tail:\n{tail}", SERVER_START_TIMEOUT);
        }
        client.authenticate().await.context("authenticating against server")?;

        // Step 8: start dashboard (best-effort).
        let _ = TmuxSession::send_command(&layout.dashboard_pane, "fleet-dashboard").await;

        // Step 9: spawn workers.
        let mut iteration = 1u32;
        self.spawn_iteration(layout, prompt_dir, swarm_id, client, &IterationFeedback::default(), iteration).await?;

        // Steps 10-11: output forwarding + compound loop.
        loop {
            self.wait_for_all_workers(layout, prompt_dir, iteration, client).await?;

            stage.commit_if_dirty(&format!("iteration {iteration} fixes")).await.context("committing iteration changes")?;

            let feedback = run_gates(&self.cfg.target_dir, gates).await;
            if feedback.total_errors == 0 {
                return Ok((MissionStatus::Succeeded, iteration));
            }

            if iteration >= self.cfg.max_iterations {
                return Ok((MissionStatus::Failed, iteration));
            }

            iteration += 1;
            self.spawn_iteration(layout, prompt_dir, swarm_id, client, &feedback, iteration).await?;
        }
    }

    async fn spawn_iteration(
        &self,
        layout: &PaneLayout,
        prompt_dir: &std::path::Path,
        swarm_id: &str,
        client: &mut ServerClient,
        feedback: &IterationFeedback,
        iteration: u32,
    ) -> Result<()> {
        let fixer_handle = "fixer";
        let fixer_path = fixer_prompt_path(prompt_dir, iteration);
        let fixer_body = fixer_prompt_body(&self.cfg.objective, feedback, iteration);
        write_prompt(&fixer_path, &fixer_body).await?;
        let cmd = worker_launch_command(&fixer_path, "claude", self.cfg.is_live);
        TmuxSession::send_command(layout.fixer_pane(), &cmd).await?;
        if iteration == 1 {
            client.spawn_external_worker(fixer_handle, swarm_id, &self.cfg.objective).await.context("registering fixer")?;
        }

        for (idx, pane) in layout.verifier_panes().iter().enumerate() {
            let handle = format!("verifier-{idx}");
            let path = verifier_prompt_path(prompt_dir, idx, iteration);
            let body = verifier_prompt_body(&self.cfg.objective, &feedback.render(), iteration);
            write_prompt(&path, &body).await?;
            let cmd = worker_launch_command(&path, "claude", self.cfg.is_live);
            TmuxSession::send_command(pane, &cmd).await?;
            if iteration == 1 {
                client.spawn_external_worker(&handle, swarm_id, &self.cfg.objective).await.context("registering verifier")?;
            }
        }

        info!(iteration, "dispatched worker prompts");
        Ok(())
    }

    /// Step 11a/11b: poll every pane until each worker is done, or the
    /// server's health check fails.
    async fn wait_for_all_workers(&self, layout: &PaneLayout, prompt_dir: &std::path::Path, iteration: u32, client: &ServerClient) -> Result<()> {
        let handles: Vec<(String, &str)> = std::iter::once(("fixer".to_string(), layout.fixer_pane()))
            .chain(layout.verifier_panes().iter().enumerate().map(|(i, p)| (format!("verifier-{i}"), p.as_str())))
            .collect();

        let mut remaining: std::collections::HashSet<String> = handles.iter().map(|(h, _)| h.clone()).collect();

        loop {
            if client.wait_until_ready().await.is_err() {
                anyhow::bail!("server health check failed while waiting for workers");
            }

            for (handle, pane) in &handles {
                if !remaining.contains(handle) {
                    continue;
                }
                let sentinel = sentinel_path(prompt_dir, handle, iteration);
                let pane_text = TmuxSession::capture_tail(pane, 500).await.unwrap_or_default();
                if is_complete(&sentinel, &pane_text, iteration) {
                    remaining.remove(handle);
                }
            }

            if remaining.is_empty() {
                return Ok(());
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

#[cfg(unix)]
fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = term.recv() => {},
            _ = int.recv() => {},
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}
