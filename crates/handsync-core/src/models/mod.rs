//! HANDSYNC 도메인 모델.
//!
//! 손들기 상태, 명령, 브로드캐스트 신호, 알림 구조체를 정의한다.
//! 서버/전송 경계를 넘는 모델은 `serde` Serialize/Deserialize를 구현한다.

pub mod command;
pub mod hand;
pub mod notification;
pub mod signal;
