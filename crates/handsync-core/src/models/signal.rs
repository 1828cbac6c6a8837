//! 브로드캐스트 신호 메시지.
//!
//! 공유 채널을 타고 오는 페이로드는 타입이 없으므로 전송 경계에서
//! `type` 판별자로 검증한 뒤에만 조정기로 넘긴다.
//! 알 수 없는 타입, JSON이 아닌 데이터는 에러 없이 버린다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::command::{AckAction, CommandKind, PendingCommand};
use super::hand::HandState;

/// 신호 본문 (`type` 필드로 구분)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// 손들기/내리기
    HandRaiseUpdate {
        participant_id: String,
        #[serde(default)]
        display_name: String,
        raised: bool,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// 호스트 응답
    HandAcknowledgment {
        participant_id: String,
        action: AckAction,
    },
    /// 전체 손 내리기
    ClearAllHands,
    /// 호스트가 보내는 전체 상태 동기화
    HandStateSync {
        #[serde(default)]
        hands: Vec<HandState>,
    },
}

/// 신호 봉투: 공통 메타데이터 + 본문
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignalEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    /// 원인 명령 ID (중복 제거용)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    /// 발신 시점의 뷰 버전
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(flatten)]
    pub message: SignalMessage,
}

impl SignalEnvelope {
    pub fn new(message: SignalMessage) -> Self {
        Self {
            meeting_id: None,
            command_id: None,
            version: None,
            sender_id: None,
            message,
        }
    }

    pub fn for_meeting(mut self, meeting_id: impl Into<String>) -> Self {
        self.meeting_id = Some(meeting_id.into());
        self
    }

    pub fn with_command_id(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// 원시 페이로드 디코딩. 형식이 맞지 않으면 `None`.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<SignalEnvelope>(payload) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                debug!("신호 페이로드 무시: {e}");
                None
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// 확정된 명령을 동료들에게 알릴 신호로 변환
    pub fn from_command(command: &PendingCommand, display_name: &str) -> Option<Self> {
        let target = command.target_participant_id.clone();
        let message = match (command.kind, target) {
            (CommandKind::Raise, Some(participant_id)) => SignalMessage::HandRaiseUpdate {
                participant_id,
                display_name: display_name.to_string(),
                raised: true,
                timestamp: Some(command.submitted_at),
            },
            (CommandKind::Lower, Some(participant_id)) => SignalMessage::HandRaiseUpdate {
                participant_id,
                display_name: display_name.to_string(),
                raised: false,
                timestamp: Some(command.submitted_at),
            },
            (CommandKind::Acknowledge(action), Some(participant_id)) => {
                SignalMessage::HandAcknowledgment {
                    participant_id,
                    action,
                }
            }
            (CommandKind::ClearAll, _) => SignalMessage::ClearAllHands,
            (_, None) => return None,
        };
        Some(Self::new(message).with_command_id(command.command_id.clone()))
    }
}
