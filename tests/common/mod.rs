// Common test utilities shared across acceptance tests
//
// Each test gets its own temporary project directory holding a kiln.toml and
// the build output folder, so tests can run in parallel without sharing state.

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated project directory for driving the kiln binary
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a workspace with `plan` written to `kiln.toml`
    pub fn with_plan(plan: &str) -> Self {
        let workspace = Self::new();
        workspace.write_file("kiln.toml", plan);
        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Default output folder (`build/` next to kiln.toml)
    pub fn output_dir(&self) -> PathBuf {
        self.path().join("build")
    }

    pub fn cache_file(&self, job: &str) -> PathBuf {
        self.output_dir()
            .join(".buildstate")
            .join(format!("{}.cache", job))
    }

    /// Command for the kiln binary running inside the workspace
    pub fn kiln(&self) -> Command {
        let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_kiln"));
        cmd.current_dir(self.path())
            .env_remove("KILN_CONFIG")
            .env_remove("KILN_OUTPUT_DIR")
            .env_remove("KILN_MAX_WORKERS")
            .env_remove("RUST_LOG")
            .env("KILN_LOG_FORMAT", "compact");
        cmd
    }

    pub fn write_file(&self, path: &str, content: &str) {
        let file_path = self.path().join(path);

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }

        fs::write(file_path, content).unwrap();
    }

    #[allow(dead_code)]
    pub fn read_file(&self, path: &str) -> String {
        fs::read_to_string(self.path().join(path)).unwrap()
    }

    /// Persisted variables of `job`, decoded from its cache file
    #[allow(dead_code)]
    pub fn cache_entries(&self, job: &str) -> serde_json::Map<String, serde_json::Value> {
        let data = fs::read(self.cache_file(job)).unwrap();
        serde_json::from_slice(&data).unwrap()
    }
}
