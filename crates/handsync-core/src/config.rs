//! 애플리케이션 설정 구조체.
//!
//! 서버 URL, 폴링/명령 주기, 알림 큐 크기 등 런타임 설정을 정의한다.
//! [`crate::config_manager::ConfigManager`]가 JSON 파일로 로드/저장한다.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

/// 최상위 애플리케이션 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 서버 연결 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// 상태 동기화 설정
    #[serde(default)]
    pub sync: SyncConfig,
    /// 알림 설정
    #[serde(default)]
    pub notification: NotificationConfig,
}

// ============================================================
// 서버 설정
// ============================================================

/// 서버 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// REST API 기본 URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 브로드캐스트 WebSocket URL (없으면 프로세스 내 버스 사용)
    #[serde(default)]
    pub signal_url: Option<String>,
    /// Bearer 토큰
    #[serde(default)]
    pub api_token: Option<String>,
    /// 요청 타임아웃 (밀리초)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// 재시도 가능한 에러의 최대 재시도 횟수
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            signal_url: None,
            api_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

// ============================================================
// 동기화 설정
// ============================================================

/// 폴링/브로드캐스트/명령 동기화 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 상태 폴링 간격 (밀리초)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 세션 시작 후 첫 스냅샷까지 대기 (밀리초)
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// 브로드캐스트 버전 허용 오차 (로컬 버전보다 이만큼 낮아도 수락)
    #[serde(default = "default_broadcast_tolerance")]
    pub broadcast_tolerance: u64,
    /// 명령 제출 타임아웃 (밀리초)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// 중복 제거용으로 기억할 명령 ID 수
    #[serde(default = "default_dedupe_history")]
    pub dedupe_history: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            broadcast_tolerance: default_broadcast_tolerance(),
            command_timeout_ms: default_command_timeout_ms(),
            dedupe_history: default_dedupe_history(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_broadcast_tolerance() -> u64 {
    2
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_dedupe_history() -> usize {
    256
}

// ============================================================
// 알림 설정
// ============================================================

/// 알림 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// 알림 전체 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 동시에 보관할 최대 알림 수
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// 일반 알림 표시 시간 (밀리초)
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// 높은 우선순위 알림 표시 시간 (밀리초)
    #[serde(default = "default_high_priority_ttl_ms")]
    pub high_priority_ttl_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_capacity(),
            default_ttl_ms: default_ttl_ms(),
            high_priority_ttl_ms: default_high_priority_ttl_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_capacity() -> usize {
    5
}

fn default_ttl_ms() -> u64 {
    5_000
}

fn default_high_priority_ttl_ms() -> u64 {
    8_000
}

impl NotificationConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn high_priority_ttl(&self) -> Duration {
        Duration::from_millis(self.high_priority_ttl_ms)
    }
}

impl AppConfig {
    /// 기본 설정
    pub fn default_config() -> Self {
        Self::default()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.sync.settle_delay_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.command_timeout_ms)
    }

    /// 0 간격/용량처럼 런타임에 문제를 일으키는 값 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        let checks: [(&str, bool); 5] = [
            ("server.base_url", !self.server.base_url.trim().is_empty()),
            ("server.request_timeout_ms", self.server.request_timeout_ms > 0),
            ("sync.poll_interval_ms", self.sync.poll_interval_ms > 0),
            ("sync.command_timeout_ms", self.sync.command_timeout_ms > 0),
            ("notification.capacity", self.notification.capacity > 0),
        ];
        for (field, ok) in checks {
            if !ok {
                return Err(CoreError::Validation {
                    field: field.to_string(),
                    message: "0 또는 빈 값은 허용되지 않습니다".to_string(),
                });
            }
        }
        Ok(())
    }
}
