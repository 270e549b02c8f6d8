//! Common test utilities for cdf integration tests

use std::path::PathBuf;
use tempfile::TempDir;

/// A temporary deployment directory for integration tests
#[allow(dead_code)]
pub struct TestDeployment {
    /// Temporary directory
    #[allow(dead_code)]
    pub temp: TempDir,
    /// Path to the deployment root
    pub path: PathBuf,
}

#[allow(dead_code)]
impl TestDeployment {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let path = temp.path().to_path_buf();
        Self { temp, path }
    }

    /// Write the deployment config (`.cdf.yml`)
    pub fn write_config(&self, content: &str) {
        self.write_file(".cdf.yml", content);
    }

    /// Write a file under the deployment root
    pub fn write_file(&self, path: &str, content: &str) {
        let file_path = self.path.join(path);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
    }

    /// Read a file from the deployment root
    pub fn read_file(&self, path: &str) -> String {
        std::fs::read_to_string(self.path.join(path)).expect("Failed to read file")
    }

    pub fn file_exists(&self, path: &str) -> bool {
        self.path.join(path).exists()
    }

    /// Parse the default state document under the tmp dir
    pub fn state_json(&self) -> serde_json::Value {
        let content = self.read_file(".cdf_tmp/state.json");
        serde_json::from_str(&content).expect("Failed to parse state document")
    }
}
