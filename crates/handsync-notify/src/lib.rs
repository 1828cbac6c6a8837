//! # handsync-notify
//!
//! 알림 파이프라인.
//! 조정기의 변경 집합과 명령 실패를 사용자 알림으로 변환하고([`presenter`]),
//! 중복 제거·용량 제한 큐([`queue`])에 쌓아
//! 만료 타이머와 우선순위 순서로 렌더링 계층에 전달한다([`center`]).

pub mod center;
pub mod presenter;
pub mod queue;
