use std::path::PathBuf;

use anyhow::Result;
use compound_runner::{Runner, RunnerConfig};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = RunnerConfig {
        target_dir: PathBuf::from(env_or("FLEET_TARGET_DIR", ".")),
        max_iterations: env_or("FLEET_MAX_ITERATIONS", "5").parse().unwrap_or(5),
        num_workers: env_or("FLEET_NUM_WORKERS", "2").parse().unwrap_or(2),
        port: env_or("FLEET_PORT", "4000").parse().unwrap_or(4000),
        server_url: env_or("FLEET_SERVER_URL", "http://127.0.0.1:4000"),
        objective: env_or("FLEET_OBJECTIVE", "Fix failing quality gates."),
        is_live: env_or("FLEET_LIVE", "false") == "true",
    };

    let result = Runner::new(cfg).run().await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    std::process::exit(result.status.exit_code());
}
