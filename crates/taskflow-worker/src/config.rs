use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use taskflow_persistence::StoreConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFlowConfig {
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub shard_prefix_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of loop threads
    pub concurrency: usize,
    /// How long one `dequeue` call may block before the loop re-checks its state
    pub dequeue_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        StorageConfig {
            data_dir: store.data_dir,
            shard_prefix_len: store.shard_prefix_len,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            concurrency: 1,
            dequeue_timeout_ms: 1000,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl TaskFlowConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TaskFlowConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_store_config(&self) -> StoreConfig {
        StoreConfig {
            data_dir: self.storage.data_dir.clone(),
            shard_prefix_len: self.storage.shard_prefix_len,
        }
    }
}

impl WorkerConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TaskFlowConfig::default();
        assert_eq!(config.worker.concurrency, 1);
        assert_eq!(config.worker.dequeue_timeout(), Duration::from_secs(1));
        assert_eq!(config.storage.shard_prefix_len, 2);
        assert_eq!(config.monitoring.log_format, LogFormat::Text);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
storage:
  data_dir: /var/lib/taskflow
worker:
  concurrency: 4
monitoring:
  log_format: json
"#;
        let config: TaskFlowConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/taskflow"));
        assert_eq!(config.storage.shard_prefix_len, 2);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.dequeue_timeout_ms, 1000);
        assert_eq!(config.monitoring.log_format, LogFormat::Json);
        assert_eq!(config.monitoring.log_level, "info");

        let store = config.to_store_config();
        assert_eq!(store.data_dir, PathBuf::from("/var/lib/taskflow"));
    }

    #[test]
    fn test_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("taskflow.yaml");
        std::fs::write(&path, "worker:\n  dequeue_timeout_ms: 0\n").unwrap();

        let config = TaskFlowConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.worker.dequeue_timeout(), Duration::from_millis(1));
        assert!(TaskFlowConfig::from_file("/nonexistent/taskflow.yaml").is_err());
    }
}
