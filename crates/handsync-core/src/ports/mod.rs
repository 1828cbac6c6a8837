//! 포트 인터페이스 (trait).
//!
//! Hexagonal Architecture의 포트 레이어.
//! 어댑터 crate(`handsync-network`)와 테스트 목(mock)이 이 trait들을 구현하며,
//! `handsync-session`에서 `Arc<dyn T>`로 주입받는다.
//!
//! 모든 async trait은 `async_trait` 매크로를 사용하여 object safety를 보장한다.

pub mod backend;
pub mod signal_transport;
