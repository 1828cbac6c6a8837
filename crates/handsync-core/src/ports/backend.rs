//! 백엔드 클라이언트 포트.
//!
//! 구현: `handsync-network` crate (reqwest)

use async_trait::async_trait;

use crate::error::CoreError;
use crate::models::command::{CommandRequest, CommandResult};
use crate::models::hand::StateSnapshot;

/// 회의 상태의 권위 있는 출처
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// 현재 손들기 상태 조회
    ///
    /// 세션이 사라졌으면 `CoreError::is_terminal()`인 에러를 반환해야 한다.
    async fn get_state(&self, meeting_id: &str) -> Result<StateSnapshot, CoreError>;

    /// 변경 명령 제출
    ///
    /// 같은 `command_id`로 다시 보내도 서버에서 한 번만 적용된다.
    async fn submit_command(
        &self,
        meeting_id: &str,
        command: &CommandRequest,
    ) -> Result<CommandResult, CoreError>;

    /// 서버 세션 시작 (이미 시작된 경우도 성공)
    async fn start_session(&self, meeting_id: &str) -> Result<(), CoreError>;

    /// 서버 세션 종료 (이미 종료된 경우도 성공)
    async fn end_session(&self, meeting_id: &str) -> Result<(), CoreError>;
}
