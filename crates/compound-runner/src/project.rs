//! Project type detection and the ordered gate list it implies. A gate
//! whose command isn't on `PATH` is dropped rather than failing the
//! mission outright — only an empty resulting gate list is fatal.

use std::path::Path;

use which::which;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Rust,
    Node,
    Python,
    Go,
}

impl ProjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectType::Rust => "rust",
            ProjectType::Node => "node",
            ProjectType::Python => "python",
            ProjectType::Go => "go",
        }
    }
}

/// A single quality-gate command (type-checker, linter, tests, build).
#[derive(Debug, Clone)]
pub struct Gate {
    pub name: &'static str,
    pub program: &'static str,
    pub args: Vec<&'static str>,
}

/// Inspect `target_dir` for language markers and return the detected
/// project type plus its candidate gate list, in priority order.
pub fn detect(target_dir: &Path) -> Option<(ProjectType, Vec<Gate>)> {
    if target_dir.join("Cargo.toml").exists() {
        return Some((
            ProjectType::Rust,
            vec![
                Gate { name: "cargo-check", program: "cargo", args: vec!["check", "--all-targets"] },
                Gate { name: "cargo-clippy", program: "cargo", args: vec!["clippy", "--all-targets", "--", "-D", "warnings"] },
                Gate { name: "cargo-test", program: "cargo", args: vec!["test"] },
            ],
        ));
    }
    if target_dir.join("package.json").exists() {
        return Some((
            ProjectType::Node,
            vec![
                Gate { name: "tsc", program: "npx", args: vec!["tsc", "--noEmit"] },
                Gate { name: "eslint", program: "npx", args: vec!["eslint", "."] },
                Gate { name: "npm-test", program: "npm", args: vec!["test", "--", "--ci"] },
            ],
        ));
    }
    if target_dir.join("pyproject.toml").exists() || target_dir.join("setup.py").exists() {
        return Some((
            ProjectType::Python,
            vec![
                Gate { name: "ruff", program: "ruff", args: vec!["check", "."] },
                Gate { name: "pytest", program: "pytest", args: vec![] },
            ],
        ));
    }
    if target_dir.join("go.mod").exists() {
        return Some((
            ProjectType::Go,
            vec![
                Gate { name: "go-vet", program: "go", args: vec!["vet", "./..."] },
                Gate { name: "go-test", program: "go", args: vec!["test", "./..."] },
            ],
        ));
    }
    None
}

/// Drop gates whose command isn't on `PATH`. Returns the filtered list;
/// an empty result is the caller's signal to fail the mission.
pub fn available_gates(gates: Vec<Gate>) -> Vec<Gate> {
    gates.into_iter().filter(|g| which(g.program).is_ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmpdir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("compound-runner-project-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn detects_rust_project_from_cargo_toml() {
        let dir = tmpdir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Cargo.toml"), "[package]\nname=\"x\"").unwrap();
        let (pt, gates) = detect(&dir).unwrap();
        assert_eq!(pt, ProjectType::Rust);
        assert!(gates.iter().any(|g| g.name == "cargo-test"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unrecognized_directory_detects_nothing() {
        let dir = tmpdir();
        std::fs::create_dir_all(&dir).unwrap();
        assert!(detect(&dir).is_none());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn available_gates_drops_missing_binaries() {
        let gates = vec![Gate { name: "ghost", program: "definitely-not-a-real-binary-xyz", args: vec![] }];
        assert!(available_gates(gates).is_empty());
    }
}
