//! # handsync-session
//!
//! 회의 한 건의 손들기 상태 동기화.
//!
//! 폴링 결과, 브로드캐스트 신호, 로컬 낙관적 명령을 [`reconciler::StateReconciler`]가
//! 하나의 뷰로 합친다. 나머지 컴포넌트는 [`store::HandStore`]를 통해서만 뷰를 바꾼다.
//!
//! ## 구조
//!
//! - [`reconciler`]: 확정 상태 + 진행 중 명령 오버레이 조정
//! - [`store`]: 조정기 잠금/구독 래퍼
//! - [`polling`]: 주기적 상태 폴링 루프
//! - [`dispatcher`]: 변경 명령 발행 (낙관적 적용 → 제출 → 확정/롤백)
//! - [`pump`]: 브로드캐스트 수신 → 조정기
//! - [`bus`]: 프로세스 내 신호 버스
//! - [`session`]: 세션 수명 주기 상태 기계

pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod polling;
pub mod pump;
pub mod reconciler;
pub mod session;
pub mod store;

pub use dispatcher::{ActionDispatcher, CommandReceipt, ReceiptOutcome};
pub use error::{CommandError, SessionError};
pub use reconciler::{BroadcastOutcome, DiscardReason, StateReconciler};
pub use session::{MeetingSession, SessionPhase};
pub use store::HandStore;
