//! 설정 파일 관리.
//!
//! 플랫폼별 설정 디렉토리의 `config.json`을 읽는다. 첫 실행이면 기본 설정을 써 둔다.
//! 실행 중 설정은 바뀌지 않으며 명령줄 덮어쓰기는 파일에 저장하지 않는다.

use crate::config::AppConfig;
use crate::error::CoreError;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_FILE_NAME: &str = "config.json";

/// 설정 관리자
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: AppConfig,
    config_path: PathBuf,
    /// 이번 실행에서 기본 설정 파일을 새로 만들었는지
    created: bool,
}

impl ConfigManager {
    /// 플랫폼 기본 경로에서 로드
    pub fn new() -> Result<Self, CoreError> {
        Self::with_path(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// 지정된 경로에서 로드. 파일이 없으면 기본 설정으로 만든다.
    pub fn with_path(config_path: PathBuf) -> Result<Self, CoreError> {
        if config_path.exists() {
            let config = read_config(&config_path)?;
            return Ok(Self {
                config,
                config_path,
                created: false,
            });
        }

        let config = AppConfig::default_config();
        write_default(&config_path, &config)?;
        info!("기본 설정 파일 생성: {}", config_path.display());
        Ok(Self {
            config,
            config_path,
            created: true,
        })
    }

    /// 로드한 설정 (복제본)
    pub fn get(&self) -> AppConfig {
        self.config.clone()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn was_created(&self) -> bool {
        self.created
    }

    /// 플랫폼별 설정 디렉토리 경로
    ///
    /// - macOS: `~/Library/Application Support/io.handsync.handsync/`
    /// - Windows: `%APPDATA%\handsync\handsync\config\`
    /// - Linux: `~/.config/handsync/`
    pub fn config_dir() -> Result<PathBuf, CoreError> {
        ProjectDirs::from("io", "handsync", "handsync")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| CoreError::Config("홈 디렉토리를 찾을 수 없습니다".to_string()))
    }
}

fn read_config(path: &Path) -> Result<AppConfig, CoreError> {
    let content = fs::read_to_string(path).map_err(|e| {
        CoreError::Config(format!("설정 파일 읽기 실패: {}: {e}", path.display()))
    })?;
    let config: AppConfig = serde_json::from_str(&content).map_err(|e| {
        CoreError::Config(format!("설정 파일 파싱 실패: {}: {e}", path.display()))
    })?;
    config.validate()?;
    debug!("설정 파일 로드 완료: {}", path.display());
    Ok(config)
}

fn write_default(path: &Path, config: &AppConfig) -> Result<(), CoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            CoreError::Config(format!("설정 디렉토리 생성 실패: {}: {e}", parent.display()))
        })?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| CoreError::Config(format!("설정 직렬화 실패: {e}")))?;
    fs::write(path, content).map_err(|e| {
        CoreError::Config(format!("설정 파일 저장 실패: {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn first_run_writes_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.json");

        let manager = ConfigManager::with_path(config_path.clone()).unwrap();
        assert!(config_path.exists());
        assert!(manager.was_created());
        assert_eq!(manager.get().notification.capacity, 5);

        let again = ConfigManager::with_path(config_path).unwrap();
        assert!(!again.was_created());
        assert_eq!(
            again.get().sync.poll_interval_ms,
            manager.get().sync.poll_interval_ms
        );
    }

    #[test]
    fn existing_file_is_loaded() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let mut config = AppConfig::default_config();
        config.sync.poll_interval_ms = 1_500;
        config.server.signal_url = Some("ws://localhost:8001/signal".to_string());
        fs::write(&config_path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ConfigManager::with_path(config_path).unwrap().get();
        assert_eq!(loaded.sync.poll_interval_ms, 1_500);
        assert_eq!(
            loaded.server.signal_url.as_deref(),
            Some("ws://localhost:8001/signal")
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        let mut config = AppConfig::default_config();
        config.notification.capacity = 0;
        fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();

        assert!(ConfigManager::with_path(config_path).is_err());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(&config_path, "{ not json").unwrap();

        let err = ConfigManager::with_path(config_path).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }
}
