use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Succeeded,
    Failed,
}

impl MissionStatus {
    /// Compound runner binary exit code: 0 on success, 1 on failure.
    pub fn exit_code(self) -> i32 {
        match self {
            MissionStatus::Succeeded => 0,
            MissionStatus::Failed => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MissionResult {
    pub status: MissionStatus,
    pub iterations: u32,
    pub branch: String,
    pub project_type: Option<String>,
}

impl MissionResult {
    pub fn failed_preflight() -> Self {
        Self { status: MissionStatus::Failed, iterations: 0, branch: "none".to_string(), project_type: None }
    }
}
