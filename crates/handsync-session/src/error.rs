//! 세션 레이어 에러.

use handsync_core::error::CoreError;
use thiserror::Error;

/// 명령 실패 (호출자에게 전달되는 유일한 에러 종류)
#[derive(Debug, Error)]
pub enum CommandError {
    /// 서버가 명령을 거절함
    #[error("명령 거절: {reason}")]
    Rejected { reason: String },

    /// 제출 중 백엔드 에러
    #[error("백엔드 에러: {0}")]
    Backend(#[from] CoreError),

    /// 제출 타임아웃
    #[error("명령 제출 타임아웃")]
    Timeout,

    /// 호스트 전용 명령
    #[error("권한 없음: {0}은(는) 호스트만 실행할 수 있습니다")]
    NotPermitted(&'static str),

    /// 세션이 활성 상태가 아님
    #[error("세션이 활성 상태가 아닙니다")]
    SessionInactive,
}

/// 세션 수명 주기 에러
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// 초기화 도중 정리(cleanup)됨
    #[error("초기화 중 세션이 정리되었습니다")]
    Cancelled,
}
