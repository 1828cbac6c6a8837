//! HTTP REST 백엔드 클라이언트.
//!
//! `BackendClient` 포트 구현. Bearer 토큰 주입 + 재시도 로직.
//! 상태 조회는 폴링 루프가 다음 틱에 다시 시도하므로 여기서 재시도하지 않는다.

use async_trait::async_trait;
use handsync_core::config::ServerConfig;
use handsync_core::error::CoreError;
use handsync_core::models::command::{CommandRequest, CommandResult};
use handsync_core::models::hand::StateSnapshot;
use handsync_core::ports::backend::BackendClient;
use std::time::Duration;
use tracing::{debug, warn};

/// 기본 재시도 횟수
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retry-After 헤더가 없을 때 대기 시간 (초)
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// 재시도 간격 상한
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 호출 종류별로 달라지는 응답 해석
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    State,
    Command,
    SessionStart,
    SessionEnd,
}

/// REST 백엔드 클라이언트
pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    max_retries: u32,
}

impl HttpBackendClient {
    /// 새 HTTP 백엔드 클라이언트 생성
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: None,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// 설정에서 생성
    pub fn from_config(config: &ServerConfig) -> Result<Self, CoreError> {
        Ok(Self::new(
            &config.base_url,
            Duration::from_millis(config.request_timeout_ms),
        )?
        .with_api_token(config.api_token.clone())
        .with_max_retries(config.max_retries))
    }

    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }

    /// 재시도 횟수 설정
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let req = self.client.request(method, &url);
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// 응답 상태 코드 확인 및 에러 매핑
    ///
    /// 성공이면 `Some(resp)`, 세션 시작/종료가 이미 그 상태라서 성공으로 보는 경우 `None`.
    async fn check_response(
        &self,
        resp: reqwest::Response,
        call: Call,
        meeting_id: &str,
    ) -> Result<Option<reqwest::Response>, CoreError> {
        let status = resp.status();

        if status.is_success() {
            return Ok(Some(resp));
        }

        let status_code = status.as_u16();
        match (status_code, call) {
            (409, Call::SessionStart | Call::SessionEnd) => {
                debug!("세션이 이미 요청한 상태: meeting={meeting_id}, {status}");
                return Ok(None);
            }
            (404 | 410, Call::SessionEnd) => {
                debug!("종료할 세션 없음: meeting={meeting_id}");
                return Ok(None);
            }
            _ => {}
        }

        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        let text = resp.text().await.unwrap_or_else(|e| {
            warn!("응답 본문 읽기 실패: {e}");
            String::new()
        });

        match status_code {
            401 | 403 => Err(CoreError::Auth(format!("인증 실패 ({status}): {text}"))),
            404 => Err(CoreError::NotFound {
                resource_type: "Meeting".to_string(),
                id: meeting_id.to_string(),
            }),
            410 => Err(CoreError::SessionEnded(meeting_id.to_string())),
            429 => Err(CoreError::RateLimit {
                retry_after_secs: retry_after,
            }),
            503 => Err(CoreError::ServiceUnavailable(text)),
            _ => Err(CoreError::Internal(format!("API 에러 ({status}): {text}"))),
        }
    }

    /// 재시도가 포함된 요청 실행
    ///
    /// exponential backoff: 1s → 2s → 4s (최대 30s)
    async fn execute_with_retry<F, Fut, T>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempt = 0;

        loop {
            let err = match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= self.max_retries {
                return Err(err);
            }

            // RateLimit의 경우 서버 지정 대기 시간 사용
            let wait = match &err {
                CoreError::RateLimit { retry_after_secs } => {
                    Duration::from_secs(*retry_after_secs).min(MAX_BACKOFF)
                }
                _ => delay,
            };
            warn!(
                "요청 실패 (시도 {}/{}): {err}, {wait:?} 후 재시도",
                attempt + 1,
                self.max_retries + 1
            );

            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(MAX_BACKOFF);
            attempt += 1;
        }
    }

    async fn post_session(&self, meeting_id: &str, call: Call) -> Result<(), CoreError> {
        let action = if call == Call::SessionStart {
            "start"
        } else {
            "end"
        };
        let path = format!("/meetings/{meeting_id}/session/{action}");
        let path = path.as_str();
        debug!("세션 {action} 요청: meeting={meeting_id}");

        self.execute_with_retry(move || async move {
            let resp = self
                .request(reqwest::Method::POST, path)
                .send()
                .await
                .map_err(|e| CoreError::Network(format!("세션 {action} 요청 실패: {e}")))?;
            self.check_response(resp, call, meeting_id).await?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn get_state(&self, meeting_id: &str) -> Result<StateSnapshot, CoreError> {
        let path = format!("/meetings/{meeting_id}/hands");
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| CoreError::Network(format!("상태 조회 실패: {e}")))?;

        let resp = self
            .check_response(resp, Call::State, meeting_id)
            .await?
            .ok_or_else(|| CoreError::Internal("상태 응답 없음".to_string()))?;
        resp.json::<StateSnapshot>()
            .await
            .map_err(|e| CoreError::Internal(format!("상태 응답 파싱 실패: {e}")))
    }

    async fn submit_command(
        &self,
        meeting_id: &str,
        command: &CommandRequest,
    ) -> Result<CommandResult, CoreError> {
        debug!(
            "명령 제출: {} ({})",
            command.kind.as_str(),
            command.command_id
        );
        let path = format!("/meetings/{meeting_id}/hands/commands");
        let path = path.as_str();

        // 같은 command_id로 재전송하므로 서버에서 한 번만 적용된다
        self.execute_with_retry(move || async move {
            let resp = self
                .request(reqwest::Method::POST, path)
                .json(command)
                .send()
                .await
                .map_err(|e| CoreError::Network(format!("명령 제출 실패: {e}")))?;

            let resp = self
                .check_response(resp, Call::Command, meeting_id)
                .await?
                .ok_or_else(|| CoreError::Internal("명령 응답 없음".to_string()))?;
            resp.json::<CommandResult>()
                .await
                .map_err(|e| CoreError::Internal(format!("명령 응답 파싱 실패: {e}")))
        })
        .await
    }

    async fn start_session(&self, meeting_id: &str) -> Result<(), CoreError> {
        self.post_session(meeting_id, Call::SessionStart).await
    }

    async fn end_session(&self, meeting_id: &str) -> Result<(), CoreError> {
        self.post_session(meeting_id, Call::SessionEnd).await
    }
}
