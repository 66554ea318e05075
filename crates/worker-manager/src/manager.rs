use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use log_parser::{EventType, LogParser, RingBuffer};
use persistence::{Database, WorkerRow};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{Mutex as AsyncMutex, broadcast};

use crate::config::{ManagerConfig, SpawnDecision};
use crate::error::WorkerManagerError;
use crate::prompt::{self, RESUME_CONTINUATION_PROMPT};
use crate::types::{
    Health, HealthStats, RestartStats, SpawnMode, SpawnRequest, TaskRequest, WorkerEvent,
    WorkerState, WorkerSummary, MAX_RESTART_ATTEMPTS, RECENT_OUTPUT_CAPACITY,
};

/// Internal record for a worker the manager is actively tracking. Never
/// exposed outside this crate — callers only ever see [`WorkerSummary`].
struct LiveWorker {
    summary: WorkerSummary,
    recent_output: RingBuffer<String>,
    stdin: Option<Arc<AsyncMutex<ChildStdin>>>,
    pid: Option<i32>,
    last_heartbeat_persisted: i64,
}

pub struct WorkerManager {
    config: ManagerConfig,
    effective_default_spawn_mode: SpawnMode,
    workers: DashMap<String, LiveWorker>,
    handles: DashMap<String, String>,
    db: Option<Database>,
    bus: Arc<message_bus::MessageBus>,
    blackboard: Option<Arc<blackboard::Blackboard>>,
    inbox: Option<Arc<inbox_bridge::InboxBridge>>,
    native: Arc<native_bridge::NativeBridge>,
    events: broadcast::Sender<WorkerEvent>,
    restart_log: AsyncMutex<Vec<i64>>,
    health_monitor_running: AtomicBool,
}

impl WorkerManager {
    pub fn new(
        config: ManagerConfig,
        bus: Arc<message_bus::MessageBus>,
        db: Option<Database>,
        blackboard: Option<Arc<blackboard::Blackboard>>,
        inbox: Option<Arc<inbox_bridge::InboxBridge>>,
    ) -> Self {
        let native = Arc::new(native_bridge::NativeBridge::discover(
            &config.native_base_dir,
            &config.native_binary_name,
        ));
        let effective_default_spawn_mode = if config.default_spawn_mode == SpawnMode::Process
            && native.is_available()
        {
            tracing::info!("native worker binary present on PATH, auto-promoting default spawn mode to native");
            SpawnMode::Native
        } else {
            config.default_spawn_mode
        };
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            effective_default_spawn_mode,
            workers: DashMap::new(),
            handles: DashMap::new(),
            db,
            bus,
            blackboard,
            inbox,
            native,
            events,
            restart_log: AsyncMutex::new(Vec::new()),
            health_monitor_running: AtomicBool::new(false),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// The shared message bus, exposed so the HTTP/WebSocket surface can
    /// subscribe to blackboard topics without this crate re-publishing
    /// events it doesn't otherwise need.
    pub fn bus(&self) -> &Arc<message_bus::MessageBus> {
        &self.bus
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    // ---- restore / crash recovery ----

    /// Restores persisted worker records on startup. For each: if its PID
    /// is still alive, leave it running and just re-adopt the record
    /// in-memory (we lost the stdout pipe but not the bookkeeping); else
    /// if it has a `session_id`, respawn with `--resume`; else mark it
    /// `error`. Also purges worktree directories with no matching live
    /// record.
    pub async fn initialize(self: &Arc<Self>) {
        let Some(db) = &self.db else {
            return;
        };

        let rows = match db.get_all_workers().await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "failed to load persisted workers during restore");
                return;
            }
        };

        for row in rows {
            if let Err(e) = self.restore_one(row.clone()).await {
                tracing::warn!(id = %row.id, handle = %row.handle, error = %e, "failed to restore worker, marking error");
                let mut errored = row;
                errored.state = WorkerState::Error.as_str().to_string();
                if let Some(db) = &self.db {
                    let _ = db.upsert_worker(&errored).await;
                }
            }
        }

        self.purge_orphaned_worktrees().await;
    }

    async fn restore_one(self: &Arc<Self>, row: WorkerRow) -> anyhow::Result<()> {
        if let Some(pid) = row.pid
            && pid_alive(pid)
        {
            tracing::info!(handle = %row.handle, pid, "worker process still alive, re-adopting record without respawn");
            self.adopt_row_without_process(row);
            return Ok(());
        }

        if row.session_id.is_some() {
            tracing::info!(handle = %row.handle, "respawning worker with --resume after restart");
            let req = SpawnRequest {
                handle: row.handle.clone(),
                team_name: Some(row.team_name.clone()),
                working_dir: Some(row.working_dir.clone()),
                session_id: row.session_id.clone(),
                initial_prompt: Some(RESUME_CONTINUATION_PROMPT.to_string()),
                role: Some(row.role.clone()),
                model: None,
                spawn_mode: SpawnMode::parse(&row.spawn_mode),
                swarm_id: row.swarm_id.clone(),
                depth_level: Some(row.depth_level),
            };
            self.spawn_worker(req).await.map_err(|e| anyhow::anyhow!(e.to_string()))?;
            return Ok(());
        }

        anyhow::bail!("no live pid and no session_id to resume from");
    }

    fn adopt_row_without_process(&self, row: WorkerRow) {
        let summary = row_to_summary(&row);
        self.handles.insert(row.handle.clone(), row.id.clone());
        self.workers.insert(
            row.id.clone(),
            LiveWorker {
                summary,
                recent_output: RingBuffer::new(RECENT_OUTPUT_CAPACITY),
                stdin: None,
                pid: row.pid,
                last_heartbeat_persisted: row.last_heartbeat,
            },
        );
    }

    async fn purge_orphaned_worktrees(&self) {
        if !self.config.use_worktrees {
            return;
        }
        let mut entries = match tokio::fs::read_dir(&self.config.worktree_base_dir).await {
            Ok(e) => e,
            Err(_) => return,
        };
        let live_paths: std::collections::HashSet<String> = self
            .workers
            .iter()
            .filter_map(|w| w.summary.worktree_path.clone())
            .collect();

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let path_str = path.to_string_lossy().to_string();
            if !live_paths.contains(&path_str) {
                tracing::info!(path = %path_str, "removing orphaned worktree directory");
                let _ = tokio::fs::remove_dir_all(&path).await;
            }
        }
    }

    // ---- spawn ----

    pub async fn spawn_worker(
        self: &Arc<Self>,
        req: SpawnRequest,
    ) -> Result<WorkerSummary, WorkerManagerError> {
        if self.workers.len() >= self.config.max_workers {
            return Err(WorkerManagerError::MaxWorkersReached { max: self.config.max_workers });
        }

        let role = req.role.clone().unwrap_or_else(|| "worker".to_string());
        let depth_level = req.depth_level.unwrap_or(0);
        if let Some(controller) = &self.config.spawn_controller {
            match controller.check_spawn(&role, depth_level) {
                SpawnDecision::Denied(reason) => return Err(WorkerManagerError::SpawnDenied { reason }),
                SpawnDecision::AllowedWithWarning(w) => {
                    tracing::warn!(handle = %req.handle, warning = %w, "spawn allowed with warning");
                }
                SpawnDecision::Allowed => {}
            }
        }

        if self.handles.contains_key(&req.handle) {
            return Err(WorkerManagerError::DuplicateHandle { handle: req.handle });
        }
        if let Some(db) = &self.db
            && let Ok(Some(existing)) = db.get_worker_by_handle(&req.handle).await
        {
            if existing.state != "dismissed" && existing.state != "error" {
                return Err(WorkerManagerError::DuplicateHandle { handle: req.handle });
            }
            let _ = db.delete_worker(&existing.id).await;
        }

        let mut spawn_mode = req
            .spawn_mode
            .unwrap_or(self.effective_default_spawn_mode);
        if self.config.native_only && spawn_mode == SpawnMode::Process {
            return Err(WorkerManagerError::InvalidModeInNativeOnly { requested: "process" });
        }
        if spawn_mode == SpawnMode::Native && !self.native.is_available() {
            if self.config.native_only {
                return Err(WorkerManagerError::NativeRequiredButUnavailable);
            }
            tracing::warn!(handle = %req.handle, "native binary unavailable, falling back to default spawn mode");
            spawn_mode = self.config.default_spawn_mode;
        }

        let mail = self.pending_mail_block(&req.handle).await;
        let memory = self.agent_memory_block(&req.handle, req.swarm_id.as_deref()).await;
        let prompt = prompt::compose_initial_prompt(&mail, &role, &memory, req.initial_prompt.as_deref());

        let team_name = req.team_name.clone().unwrap_or_else(|| self.config.default_team_name.clone());
        let (working_dir, worktree_path, worktree_branch) = if req.working_dir.is_none() && self.config.use_worktrees {
            match self.allocate_worktree(&req.handle).await {
                Ok((dir, branch)) => (dir.clone(), Some(dir), Some(branch)),
                Err(e) => {
                    tracing::warn!(handle = %req.handle, error = %e, "worktree allocation failed, falling back to default working dir");
                    (std::env::current_dir().map(|p| p.to_string_lossy().to_string()).unwrap_or_else(|_| ".".to_string()), None, None)
                }
            }
        } else {
            (req.working_dir.clone().unwrap_or_else(|| ".".to_string()), None, None)
        };

        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();

        let mut summary = WorkerSummary {
            id: id.clone(),
            handle: req.handle.clone(),
            team_name,
            role: role.clone(),
            swarm_id: req.swarm_id.clone(),
            depth_level,
            spawn_mode,
            state: WorkerState::Starting,
            health: Health::Healthy,
            working_dir,
            worktree_path,
            worktree_branch,
            session_id: req.session_id.clone(),
            last_heartbeat: now,
            spawned_at: now,
            restart_count: 0,
            current_task_id: None,
            pane_id: None,
        };

        match spawn_mode {
            SpawnMode::External => {
                summary.state = WorkerState::Ready;
                self.insert_live(id.clone(), summary.clone(), None, None);
                self.persist(&id).await;
                self.emit(WorkerEvent::Ready { id: id.clone(), handle: req.handle.clone() });
            }
            SpawnMode::Tmux => {
                let pane_id = format!("fleet-{}", req.handle);
                self.spawn_tmux_worker(&pane_id, &summary.working_dir, &prompt).await
                    .map_err(|e| WorkerManagerError::SpawnDenied { reason: e.to_string() })?;
                summary.pane_id = Some(pane_id.clone());
                self.insert_live(id.clone(), summary.clone(), None, None);
                self.persist(&id).await;
                self.spawn_tmux_pump(id.clone(), req.handle.clone(), pane_id);
            }
            SpawnMode::Process | SpawnMode::Native => {
                let (pid, stdin, stdout, stderr, child) = self
                    .spawn_child(spawn_mode, &req.handle, &summary.working_dir, req.session_id.as_deref(), req.model.as_deref())
                    .await
                    .map_err(|e| WorkerManagerError::SpawnDenied { reason: e.to_string() })?;

                self.insert_live(id.clone(), summary.clone(), Some(stdin), Some(pid));
                self.persist(&id).await;

                if let Some(mut stdin) = self.take_stdin_for_write(&id) {
                    let to_write = format!("{prompt}\n");
                    tokio::spawn(async move {
                        if let Err(e) = stdin.write_all(to_write.as_bytes()).await {
                            tracing::warn!(error = %e, "failed writing initial prompt to worker stdin");
                        }
                    });
                }

                self.spawn_process_pump(id.clone(), req.handle.clone(), stdout, stderr, child);
            }
        }

        if let Some(controller) = &self.config.spawn_controller {
            controller.register(&req.handle, &role, depth_level);
        }

        self.emit(WorkerEvent::Spawned { id: id.clone(), handle: req.handle.clone() });
        Ok(summary)
    }

    fn insert_live(&self, id: String, summary: WorkerSummary, stdin: Option<ChildStdin>, pid: Option<i32>) {
        self.handles.insert(summary.handle.clone(), id.clone());
        self.workers.insert(
            id,
            LiveWorker {
                last_heartbeat_persisted: summary.last_heartbeat,
                summary,
                recent_output: RingBuffer::new(RECENT_OUTPUT_CAPACITY),
                stdin: stdin.map(|s| Arc::new(AsyncMutex::new(s))),
                pid,
            },
        );
    }

    /// Clone out the stdin handle so the caller can write without holding
    /// the map's shard lock across an `.await`.
    fn take_stdin_for_write(&self, id: &str) -> Option<OwnedStdinWriter> {
        self.workers.get(id).and_then(|w| w.stdin.clone()).map(OwnedStdinWriter)
    }

    async fn spawn_child(
        &self,
        mode: SpawnMode,
        handle: &str,
        working_dir: &str,
        resume_session_id: Option<&str>,
        model: Option<&str>,
    ) -> anyhow::Result<(i32, ChildStdin, tokio::process::ChildStdout, tokio::process::ChildStderr, tokio::process::Child)> {
        let mut cmd = match mode {
            SpawnMode::Native => {
                self.native.prepare_workspace(handle).await?;
                let binary = self
                    .native
                    .binary_path()
                    .ok_or_else(|| anyhow::anyhow!("native binary unexpectedly unavailable"))?;
                Command::new(binary)
            }
            SpawnMode::Process => Command::new(&self.config.worker_binary),
            _ => unreachable!("spawn_child only handles process/native modes"),
        };

        cmd.arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--dangerously-skip-permissions");
        if let Some(session_id) = resume_session_id {
            cmd.arg("--resume").arg(session_id);
        }
        if let Some(model) = model {
            cmd.arg("--model").arg(model);
        }

        cmd.current_dir(working_dir)
            .env("FORCE_COLOR", "0")
            .env("SERVER_URL", &self.config.server_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if mode == SpawnMode::Native {
            let desc = native_bridge::AgentDescriptor {
                agent_id: handle.to_string(),
                team_name: self.config.default_team_name.clone(),
                agent_name: handle.to_string(),
                agent_type: "worker".to_string(),
                server_url: self.config.server_url.clone(),
                swarm_id: None,
            };
            for (k, v) in self.native.build_env(&desc) {
                cmd.env(k, v);
            }
        }

        let mut child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| anyhow::anyhow!("spawned process has no pid"))? as i32;
        let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("no stdin pipe"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("no stdout pipe"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow::anyhow!("no stderr pipe"))?;

        // The manager signals this process by pid (`kill -TERM`/`-KILL`);
        // the `Child` itself is only kept around so `spawn_process_pump`
        // can await its exit status and reap it.
        Ok((pid, stdin, stdout, stderr, child))
    }

    async fn spawn_tmux_worker(&self, pane_id: &str, working_dir: &str, prompt: &str) -> anyhow::Result<()> {
        let status = Command::new("tmux")
            .args(["new-session", "-d", "-s", pane_id, "-c", working_dir])
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("tmux new-session failed for pane {pane_id}");
        }

        let prompt_file = std::env::temp_dir().join(format!("{pane_id}-prompt.txt"));
        tokio::fs::write(&prompt_file, prompt).await?;
        let cmd_line = format!(
            "cat {} | {} --print --output-format stream-json --dangerously-skip-permissions",
            shell_escape(&prompt_file.to_string_lossy()),
            shell_escape(&self.config.worker_binary),
        );
        Command::new("tmux")
            .args(["send-keys", "-t", pane_id, &cmd_line, "Enter"])
            .status()
            .await?;
        Ok(())
    }

    fn spawn_tmux_pump(self: &Arc<Self>, id: String, handle: String, pane_id: String) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut parser = LogParser::new();
            let mut last_len = 0usize;
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                ticker.tick().await;
                if manager.workers.get(&id).is_none() {
                    break;
                }
                let output = Command::new("tmux")
                    .args(["capture-pane", "-t", &pane_id, "-p"])
                    .output()
                    .await;
                let Ok(output) = output else { break };
                if !output.status.success() {
                    break;
                }
                let text = String::from_utf8_lossy(&output.stdout);
                if text.len() <= last_len {
                    continue;
                }
                let delta = &text[last_len..];
                last_len = text.len();
                for line in delta.lines() {
                    manager.handle_output_line(&id, &handle, line, &mut parser).await;
                }

                if text.len() >= crate::types::TMUX_ROLLOVER_BYTES {
                    match manager.rollover_tmux_pane(&id, &handle, &pane_id).await {
                        Ok(()) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, pane = %pane_id, "tmux context rollover failed, continuing on current pane");
                        }
                    }
                }
            }
        });
    }

    /// Replace an over-budget tmux pane with a fresh one primed with a
    /// continuation summary of the worker's recent output, then migrate
    /// the worker record's `pane_id` to the replacement.
    async fn rollover_tmux_pane(self: &Arc<Self>, id: &str, handle: &str, old_pane_id: &str) -> anyhow::Result<()> {
        let working_dir = self
            .workers
            .get(id)
            .map(|w| w.summary.working_dir.clone())
            .ok_or_else(|| anyhow::anyhow!("worker {id} disappeared before rollover"))?;

        let tail = self.get_worker_output(id);
        let summary_text = if tail.is_empty() {
            "No prior output captured before rollover.".to_string()
        } else {
            tail.join("\n")
        };
        let continuation = format!(
            "{}\n\nSummary of your work so far, for continuity after a context rollover:\n\n{summary_text}",
            prompt::ROLLOVER_CONTINUATION_PROMPT,
        );

        let new_pane_id = format!("{old_pane_id}-r{}", uuid::Uuid::new_v4().simple());
        self.spawn_tmux_worker(&new_pane_id, &working_dir, &continuation).await?;

        if let Some(mut w) = self.workers.get_mut(id) {
            w.summary.pane_id = Some(new_pane_id.clone());
        }
        self.persist(id).await;

        let _ = Command::new("tmux").args(["kill-session", "-t", old_pane_id]).status().await;

        self.emit(WorkerEvent::Rollover { id: id.to_string(), handle: handle.to_string(), new_pane_id: new_pane_id.clone() });
        self.spawn_tmux_pump(id.to_string(), handle.to_string(), new_pane_id);
        Ok(())
    }

    fn spawn_process_pump(
        self: &Arc<Self>,
        id: String,
        handle: String,
        stdout: tokio::process::ChildStdout,
        stderr: tokio::process::ChildStderr,
        mut child: tokio::process::Child,
    ) {
        let manager = self.clone();
        let id_for_stdout = id.clone();
        let handle_for_stdout = handle.clone();
        tokio::spawn(async move {
            let mut parser = LogParser::new();
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        manager
                            .handle_output_line(&id_for_stdout, &handle_for_stdout, &line, &mut parser)
                            .await
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading worker stdout");
                        break;
                    }
                }
            }
        });

        let manager = self.clone();
        let id_for_stderr = id.clone();
        let handle_for_stderr = handle.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() || line.contains("deprecated") {
                    continue;
                }
                manager.push_recent_output(&id_for_stderr, &format!("[stderr] {line}"));
                manager.emit(WorkerEvent::Error {
                    id: id_for_stderr.clone(),
                    handle: handle_for_stderr.clone(),
                    message: line,
                });
            }
        });

        let manager = self.clone();
        tokio::spawn(async move {
            let status = child.wait().await.ok();
            manager.handle_exit(&id, &handle, status.and_then(|s| s.code())).await;
        });
    }

    // ---- output handling ----

    async fn handle_output_line(&self, id: &str, handle: &str, line: &str, parser: &mut LogParser) {
        let now = now_millis();
        self.touch_heartbeat(id, now).await;

        match parser.parse_line(line) {
            Some(event) => {
                match event.event_type {
                    EventType::System if event.subtype.as_deref() == Some("init") => {
                        if let Some(mut w) = self.workers.get_mut(id) {
                            if w.summary.session_id.is_none() {
                                w.summary.session_id = event.session_id.clone();
                            }
                            w.summary.state = WorkerState::Ready;
                        }
                        self.persist(id).await;
                        self.emit(WorkerEvent::Ready { id: id.to_string(), handle: handle.to_string() });
                    }
                    EventType::Assistant => {
                        if let Some(mut w) = self.workers.get_mut(id) {
                            w.summary.state = WorkerState::Working;
                            if let Some(text) = &event.text {
                                w.recent_output.push(text.clone());
                            }
                        }
                    }
                    EventType::Result => {
                        if let Some(mut w) = self.workers.get_mut(id) {
                            w.summary.state = WorkerState::Ready;
                        }
                        self.emit(WorkerEvent::Result {
                            id: id.to_string(),
                            handle: handle.to_string(),
                            text: event.text.clone(),
                            duration_ms: event.duration_ms,
                        });
                    }
                    _ => {}
                }
                self.emit(WorkerEvent::Output { id: id.to_string(), handle: handle.to_string(), event });
            }
            None => {
                self.push_recent_output(id, line);
            }
        }
    }

    fn push_recent_output(&self, id: &str, line: &str) {
        if let Some(mut w) = self.workers.get_mut(id) {
            w.recent_output.push(line.to_string());
        }
    }

    async fn touch_heartbeat(&self, id: &str, now: i64) {
        let mut should_persist = false;
        if let Some(mut w) = self.workers.get_mut(id) {
            w.summary.last_heartbeat = now;
            if w.summary.health != Health::Healthy {
                w.summary.health = Health::Healthy;
            }
            if now - w.last_heartbeat_persisted >= 10_000 {
                w.last_heartbeat_persisted = now;
                should_persist = true;
            }
        }
        if should_persist {
            self.persist(id).await;
        }
    }

    async fn handle_exit(&self, id: &str, handle: &str, code: Option<i32>) {
        let was_stopping = self
            .workers
            .get(id)
            .map(|w| w.summary.state == WorkerState::Stopping)
            .unwrap_or(false);

        let (worktree_path, clean_exit) = {
            let mut wt = None;
            if let Some(mut w) = self.workers.get_mut(id) {
                w.summary.state = WorkerState::Stopped;
                wt = w.summary.worktree_path.clone();
            }
            (wt, code == Some(0))
        };

        let dismissed = was_stopping || clean_exit;
        if let Some(db) = &self.db
            && let Some(w) = self.workers.get(id)
        {
            let mut row = summary_to_row(&w.summary, w.pid);
            row.state = if dismissed { "dismissed".to_string() } else { "error".to_string() };
            let _ = db.upsert_worker(&row).await;
        }

        if dismissed
            && let Some(path) = worktree_path
            && let Some(repo_root) = &self.config.repo_root
        {
            let _ = Command::new("git")
                .args(["-C", repo_root, "worktree", "remove", &path, "--force"])
                .status()
                .await;
        }

        self.workers.remove(id);
        self.handles.remove(handle);
        self.emit(WorkerEvent::Exit { id: id.to_string(), handle: handle.to_string(), code });
    }

    // ---- public operations ----

    pub async fn dismiss_worker(&self, id: &str, cleanup_worktree: bool) {
        let Some(mut entry) = self.workers.get_mut(id) else { return };
        if entry.summary.state == WorkerState::Stopped || entry.summary.state == WorkerState::Stopping {
            return;
        }
        entry.summary.state = WorkerState::Stopping;
        let mode = entry.summary.spawn_mode;
        let pid = entry.pid;
        let pane_id = entry.summary.pane_id.clone();
        let handle = entry.summary.handle.clone();
        let worktree_path = entry.summary.worktree_path.clone();
        drop(entry);

        if mode == SpawnMode::External {
            self.handle_exit(id, &handle, Some(0)).await;
            self.emit(WorkerEvent::Dismissed { id: id.to_string(), handle });
            return;
        }

        if let Some(pid) = pid {
            let _ = Command::new("kill").args(["-TERM", &pid.to_string()]).status().await;
            if !self.wait_for_removed(id, Duration::from_secs(5)).await {
                let _ = Command::new("kill").args(["-KILL", &pid.to_string()]).status().await;
                self.wait_for_removed(id, Duration::from_secs(2)).await;
            }
        } else if let Some(pane) = pane_id {
            let _ = Command::new("tmux").args(["kill-session", "-t", &pane]).status().await;
        }

        // Defensive fallback: if the pump task didn't clean up (e.g. a
        // tmux pane that never produced an exit signal), force it here.
        if self.workers.contains_key(id) {
            self.handle_exit(id, &handle, None).await;
        }

        if cleanup_worktree
            && let Some(path) = worktree_path
            && let Some(repo_root) = &self.config.repo_root
        {
            let _ = Command::new("git")
                .args(["-C", repo_root, "worktree", "remove", &path, "--force"])
                .status()
                .await;
        }

        self.emit(WorkerEvent::Dismissed { id: id.to_string(), handle });
    }

    pub async fn dismiss_worker_by_handle(&self, handle: &str, cleanup_worktree: bool) {
        if let Some(id) = self.handles.get(handle).map(|r| r.clone()) {
            self.dismiss_worker(&id, cleanup_worktree).await;
        }
    }

    async fn wait_for_removed(&self, id: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !self.workers.contains_key(id) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        !self.workers.contains_key(id)
    }

    pub async fn send_to_worker(&self, id: &str, msg: &str) -> bool {
        let Some(writer) = self.take_stdin_for_write(id) else { return false };
        let state_ok = self
            .workers
            .get(id)
            .map(|w| !matches!(w.summary.state, WorkerState::Stopped | WorkerState::Stopping))
            .unwrap_or(false);
        if !state_ok {
            return false;
        }
        let mut guard = writer.0.lock().await;
        let payload = format!("{msg}\n");
        guard.write_all(payload.as_bytes()).await.is_ok()
    }

    pub async fn deliver_task_to_worker(&self, id: &str, task: &TaskRequest) -> bool {
        let payload = serde_json::json!({
            "type": "task",
            "id": task.id,
            "title": task.title,
            "description": task.description,
        });
        let delivered = self.send_to_worker(id, &payload.to_string()).await;
        if delivered
            && let Some(mut w) = self.workers.get_mut(id)
        {
            w.summary.current_task_id = Some(task.id.clone());
        }
        delivered
    }

    pub async fn register_external_worker(
        &self,
        handle: &str,
        team_name: &str,
        working_dir: &str,
        swarm_id: Option<String>,
    ) -> WorkerSummary {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();
        let summary = WorkerSummary {
            id: id.clone(),
            handle: handle.to_string(),
            team_name: team_name.to_string(),
            role: "external".to_string(),
            swarm_id,
            depth_level: 0,
            spawn_mode: SpawnMode::External,
            state: WorkerState::Ready,
            health: Health::Healthy,
            working_dir: working_dir.to_string(),
            worktree_path: None,
            worktree_branch: None,
            session_id: None,
            last_heartbeat: now,
            spawned_at: now,
            restart_count: 0,
            current_task_id: None,
            pane_id: None,
        };
        self.insert_live(id.clone(), summary.clone(), None, None);
        self.persist(&id).await;
        self.emit(WorkerEvent::Ready { id, handle: handle.to_string() });
        summary
    }

    pub async fn inject_worker_output(&self, handle: &str, event: log_parser::Event) {
        let Some(id) = self.handles.get(handle).map(|r| r.clone()) else { return };
        let now = now_millis();
        if let Some(mut w) = self.workers.get_mut(&id) {
            w.summary.last_heartbeat = now;
            if let Some(text) = &event.text {
                w.recent_output.push(text.clone());
            }
        }
        self.emit(WorkerEvent::Output { id, handle: handle.to_string(), event });
    }

    pub fn get_worker(&self, id: &str) -> Option<WorkerSummary> {
        self.workers.get(id).map(|w| w.summary.clone())
    }

    pub fn get_worker_by_handle(&self, handle: &str) -> Option<WorkerSummary> {
        let id = self.handles.get(handle)?.clone();
        self.get_worker(&id)
    }

    pub fn get_workers(&self) -> Vec<WorkerSummary> {
        self.workers.iter().map(|w| w.summary.clone()).collect()
    }

    pub fn get_worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn get_worker_output(&self, id: &str) -> Vec<String> {
        self.workers.get(id).map(|w| w.recent_output.to_vec()).unwrap_or_default()
    }

    pub fn get_health_stats(&self) -> HealthStats {
        let mut stats = HealthStats::default();
        for w in self.workers.iter() {
            stats.total += 1;
            match w.summary.health {
                Health::Healthy => stats.healthy += 1,
                Health::Degraded => stats.degraded += 1,
                Health::Unhealthy => stats.unhealthy += 1,
            }
        }
        stats
    }

    pub async fn get_restart_stats(&self) -> RestartStats {
        let log = self.restart_log.lock().await;
        let cutoff = now_millis() - 3_600_000;
        RestartStats {
            total: log.len(),
            last_hour: log.iter().filter(|&&t| t >= cutoff).count(),
        }
    }

    pub fn get_routing_recommendation(&self, task: &TaskRequest) -> Option<crate::types::RoutingRecommendation> {
        Some(crate::routing::classify(task))
    }

    pub async fn dismiss_all(&self) {
        let ids: Vec<String> = self.workers.iter().map(|w| w.key().clone()).collect();
        for id in ids {
            self.dismiss_worker(&id, true).await;
        }
    }

    // ---- health monitor ----

    pub fn spawn_health_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.health_monitor_running.store(true, Ordering::SeqCst);
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(15));
            loop {
                ticker.tick().await;
                if !manager.health_monitor_running.load(Ordering::SeqCst) {
                    break;
                }
                manager.run_health_tick().await;
            }
        })
    }

    pub fn stop_health_monitor(&self) {
        self.health_monitor_running.store(false, Ordering::SeqCst);
    }

    pub async fn run_health_tick(self: &Arc<Self>) {
        let now = now_millis();
        let candidates: Vec<(String, String, i64, SpawnMode, u32, WorkerState, Option<String>)> = self
            .workers
            .iter()
            .filter(|w| !matches!(w.summary.state, WorkerState::Stopped | WorkerState::Stopping))
            .map(|w| {
                (
                    w.key().clone(),
                    w.summary.handle.clone(),
                    w.summary.last_heartbeat,
                    w.summary.spawn_mode,
                    w.summary.restart_count,
                    w.summary.state,
                    w.summary.current_task_id.clone(),
                )
            })
            .collect();

        for (id, handle, last_heartbeat, spawn_mode, restart_count, state, current_task_id) in candidates {
            let delta_ms = now - last_heartbeat;
            let previous_health = self.workers.get(&id).map(|w| w.summary.health);
            let new_health = if delta_ms > 60_000 {
                Health::Unhealthy
            } else if delta_ms > 30_000 {
                Health::Degraded
            } else {
                Health::Healthy
            };

            if let Some(mut w) = self.workers.get_mut(&id) {
                w.summary.health = new_health;
            }

            if new_health == Health::Unhealthy && previous_health != Some(Health::Unhealthy) {
                self.emit(WorkerEvent::Unhealthy { id: id.clone(), handle: handle.clone() });
                if self.config.auto_restart && spawn_mode != SpawnMode::External && restart_count < MAX_RESTART_ATTEMPTS {
                    self.restart_worker(&id).await;
                }
            }

            if new_health == Health::Healthy
                && state == WorkerState::Ready
                && current_task_id.is_none()
                && self.config.idle_worker_timeout_secs > 0
            {
                let idle_ms = delta_ms.max(0) as u64;
                if idle_ms >= self.config.idle_worker_timeout_secs * 1000 {
                    tracing::info!(handle = %handle, "dismissing idle worker past idle_worker_timeout_secs");
                    self.dismiss_worker(&id, true).await;
                }
            }
        }
    }

    async fn restart_worker(self: &Arc<Self>, id: &str) {
        let Some(snapshot) = self.workers.get(id).map(|w| w.summary.clone()) else { return };
        tracing::info!(handle = %snapshot.handle, "restarting unhealthy worker");
        self.dismiss_worker(id, false).await;

        {
            let mut log = self.restart_log.lock().await;
            log.push(now_millis());
        }

        let req = SpawnRequest {
            handle: snapshot.handle,
            team_name: Some(snapshot.team_name),
            working_dir: Some(snapshot.working_dir),
            session_id: snapshot.session_id,
            initial_prompt: Some(RESUME_CONTINUATION_PROMPT.to_string()),
            role: Some(snapshot.role),
            model: None,
            spawn_mode: Some(snapshot.spawn_mode),
            swarm_id: snapshot.swarm_id,
            depth_level: Some(snapshot.depth_level),
        };

        match self.spawn_worker(req).await {
            Ok(new_summary) => {
                if let Some(id) = self.handles.get(&new_summary.handle).map(|r| r.clone())
                    && let Some(mut w) = self.workers.get_mut(&id)
                {
                    w.summary.restart_count = snapshot.restart_count + 1;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "restart spawn failed");
            }
        }
    }

    // ---- worktrees ----

    async fn allocate_worktree(&self, handle: &str) -> anyhow::Result<(String, String)> {
        let repo_root = self
            .config
            .repo_root
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("use_worktrees is set but no repo_root configured"))?;
        let branch = format!("fleet/{handle}-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        let path = Path::new(&self.config.worktree_base_dir).join(handle);
        tokio::fs::create_dir_all(&self.config.worktree_base_dir).await?;
        let status = Command::new("git")
            .args(["-C", repo_root, "worktree", "add", &path.to_string_lossy(), "-b", &branch])
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("git worktree add failed");
        }
        Ok((path.to_string_lossy().to_string(), branch))
    }

    // ---- prompt composition helpers ----

    async fn pending_mail_block(&self, handle: &str) -> Vec<String> {
        if !self.config.inject_mail {
            return Vec::new();
        }
        let Some(inbox) = &self.inbox else { return Vec::new() };
        match inbox.consume(handle).await {
            Ok(messages) => messages.into_iter().map(|m| m.body.to_string()).collect(),
            Err(e) => {
                tracing::warn!(handle, error = %e, "failed to drain pending mail for spawn prompt");
                Vec::new()
            }
        }
    }

    async fn agent_memory_block(&self, handle: &str, swarm_id: Option<&str>) -> Vec<String> {
        let Some(bb) = &self.blackboard else { return Vec::new() };
        let Some(swarm_id) = swarm_id else { return Vec::new() };
        let opts = blackboard::ReadOptions {
            message_type: Some(blackboard::MessageType::Checkpoint),
            target_handle: Some(handle.to_string()),
            limit: 10,
            ..blackboard::ReadOptions::new()
        };
        match bb.read_messages(swarm_id, &opts).await {
            Ok(msgs) => msgs.into_iter().map(|m| m.payload.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    // ---- persistence glue ----

    async fn persist(&self, id: &str) {
        let Some(db) = &self.db else { return };
        let Some(w) = self.workers.get(id) else { return };
        let row = summary_to_row(&w.summary, w.pid);
        drop(w);
        if let Err(e) = db.upsert_worker(&row).await {
            tracing::error!(error = %e, id, "failed to persist worker record");
        }
    }
}

/// Wrapper so `take_stdin_for_write` returns a concrete type instead of
/// leaking `Arc<AsyncMutex<ChildStdin>>`'s generic shape everywhere.
struct OwnedStdinWriter(Arc<AsyncMutex<ChildStdin>>);

fn shell_escape(s: &str) -> String {
    shell_escape::escape(std::borrow::Cow::Borrowed(s)).into_owned()
}

fn pid_alive(pid: i32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn row_to_summary(row: &WorkerRow) -> WorkerSummary {
    WorkerSummary {
        id: row.id.clone(),
        handle: row.handle.clone(),
        team_name: row.team_name.clone(),
        role: row.role.clone(),
        swarm_id: row.swarm_id.clone(),
        depth_level: row.depth_level,
        spawn_mode: SpawnMode::parse(&row.spawn_mode).unwrap_or(SpawnMode::Process),
        state: match row.state.as_str() {
            "ready" => WorkerState::Ready,
            "working" => WorkerState::Working,
            "stopping" => WorkerState::Stopping,
            "stopped" => WorkerState::Stopped,
            "error" => WorkerState::Error,
            _ => WorkerState::Starting,
        },
        health: match row.health.as_str() {
            "degraded" => Health::Degraded,
            "unhealthy" => Health::Unhealthy,
            _ => Health::Healthy,
        },
        working_dir: row.working_dir.clone(),
        worktree_path: row.worktree_path.clone(),
        worktree_branch: row.worktree_branch.clone(),
        session_id: row.session_id.clone(),
        last_heartbeat: row.last_heartbeat,
        spawned_at: row.spawned_at.timestamp_millis(),
        restart_count: row.restart_count.max(0) as u32,
        current_task_id: row.current_task_id.clone(),
        pane_id: row.pane_id.clone(),
    }
}

fn summary_to_row(summary: &WorkerSummary, pid: Option<i32>) -> WorkerRow {
    WorkerRow {
        id: summary.id.clone(),
        handle: summary.handle.clone(),
        team_name: summary.team_name.clone(),
        role: summary.role.clone(),
        swarm_id: summary.swarm_id.clone(),
        depth_level: summary.depth_level,
        spawn_mode: summary.spawn_mode.as_str().to_string(),
        state: summary.state.as_str().to_string(),
        health: summary.health.as_str().to_string(),
        working_dir: summary.working_dir.clone(),
        worktree_path: summary.worktree_path.clone(),
        worktree_branch: summary.worktree_branch.clone(),
        session_id: summary.session_id.clone(),
        pid,
        pane_id: summary.pane_id.clone(),
        last_heartbeat: summary.last_heartbeat,
        spawned_at: chrono::DateTime::from_timestamp_millis(summary.spawned_at).unwrap_or_else(chrono::Utc::now),
        restart_count: summary.restart_count as i32,
        current_task_id: summary.current_task_id.clone(),
    }
}
