//! 명령 모델.
//!
//! 낙관적으로 적용되는 변경 명령(raise/lower/acknowledge/clear-all)과
//! 백엔드 요청/응답 구조체.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::hand::{HandState, HandStatus, StateSnapshot};

/// 참가자 역할
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Host,
    #[default]
    Participant,
}

/// 명령을 내리는 주체 (이 클라이언트의 사용자)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub participant_id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: ActorRole,
}

impl Actor {
    pub fn participant(participant_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            role: ActorRole::Participant,
        }
    }

    pub fn host(participant_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            role: ActorRole::Host,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == ActorRole::Host
    }
}

/// 호스트 응답 종류
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AckAction {
    Acknowledge,
    Deny,
}

impl AckAction {
    pub fn resulting_status(self) -> HandStatus {
        match self {
            AckAction::Acknowledge => HandStatus::Acknowledged,
            AckAction::Deny => HandStatus::Denied,
        }
    }
}

/// 명령 종류
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case", tag = "kind", content = "action")]
pub enum CommandKind {
    Raise,
    Lower,
    Acknowledge(AckAction),
    ClearAll,
}

impl CommandKind {
    /// 로그/알림 키용 짧은 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Raise => "raise",
            CommandKind::Lower => "lower",
            CommandKind::Acknowledge(AckAction::Acknowledge) => "acknowledge",
            CommandKind::Acknowledge(AckAction::Deny) => "deny",
            CommandKind::ClearAll => "clear_all",
        }
    }

    /// 호스트 권한이 필요한 명령인지
    pub fn requires_host(&self) -> bool {
        matches!(self, CommandKind::Acknowledge(_) | CommandKind::ClearAll)
    }

    /// 현재 맵에 이 명령의 예측 결과를 적용한다.
    ///
    /// raise는 이미 live인 손을 건드리지 않고, acknowledge는 없는 손에 대해 아무 일도 하지 않는다.
    pub fn apply_to(
        &self,
        hands: &mut BTreeMap<String, HandState>,
        target: Option<&str>,
        display_name: Option<&str>,
        at: DateTime<Utc>,
    ) {
        match (self, target) {
            (CommandKind::Raise, Some(pid)) => {
                if !hands.get(pid).is_some_and(HandState::is_live) {
                    hands.insert(
                        pid.to_string(),
                        HandState::waiting(pid, display_name.unwrap_or(pid), at),
                    );
                }
            }
            (CommandKind::Lower, Some(pid)) => {
                hands.remove(pid);
            }
            (CommandKind::Acknowledge(action), Some(pid)) => {
                if let Some(hand) = hands.get_mut(pid) {
                    hand.status = action.resulting_status();
                }
            }
            (CommandKind::ClearAll, _) => hands.clear(),
            (_, None) => {}
        }
    }
}

/// 진행 중인 낙관적 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    /// 클라이언트에서 생성한 고유 ID
    pub command_id: String,
    pub kind: CommandKind,
    pub target_participant_id: Option<String>,
    /// raise 시 표시할 이름
    pub display_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// 대상 참가자의 예측 상태 (None이면 손이 없어질 것으로 예측)
    pub optimistic_snapshot: Option<HandState>,
}

impl PendingCommand {
    pub fn new(kind: CommandKind, target_participant_id: Option<String>) -> Self {
        Self {
            command_id: new_command_id(),
            kind,
            target_participant_id,
            display_name: None,
            submitted_at: Utc::now(),
            optimistic_snapshot: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_command_id(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = command_id.into();
        self
    }

    pub fn submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = at;
        self
    }

    /// 주어진 맵에 이 명령을 적용
    pub fn apply_to(&self, hands: &mut BTreeMap<String, HandState>) {
        self.kind.apply_to(
            hands,
            self.target_participant_id.as_deref(),
            self.display_name.as_deref(),
            self.submitted_at,
        );
    }

    /// 서버 결과가 예측과 일치하는지
    pub fn matches(&self, server: &BTreeMap<String, HandState>) -> bool {
        match self.kind {
            CommandKind::ClearAll => server.values().all(|h| !h.is_live()),
            _ => {
                let Some(pid) = self.target_participant_id.as_deref() else {
                    return true;
                };
                let actual = server.get(pid).map(|h| h.status);
                let predicted = self.optimistic_snapshot.as_ref().map(|h| h.status);
                actual == predicted
            }
        }
    }

    pub fn to_request(&self, actor_id: &str) -> CommandRequest {
        CommandRequest {
            command_id: self.command_id.clone(),
            kind: self.kind,
            actor_id: actor_id.to_string(),
            target_id: self.target_participant_id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// 새 명령 ID 생성 (UUID v4)
pub fn new_command_id() -> String {
    format!("cmd_{}", uuid::Uuid::new_v4().simple())
}

/// 백엔드 명령 요청 (`POST command`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRequest {
    pub command_id: String,
    #[serde(flatten)]
    pub kind: CommandKind,
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// 백엔드 명령 응답
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub accepted: bool,
    /// 명령 적용 후 서버 상태
    #[serde(default)]
    pub result_state: Option<StateSnapshot>,
    /// 거절 사유
    #[serde(default)]
    pub reason: Option<String>,
}

impl CommandResult {
    pub fn accepted(result_state: Option<StateSnapshot>) -> Self {
        Self {
            accepted: true,
            result_state,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>, result_state: Option<StateSnapshot>) -> Self {
        Self {
            accepted: false,
            result_state,
            reason: Some(reason.into()),
        }
    }
}

/// 조정기에 전달되는 명령 최종 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// 서버가 수락함 (결과 상태가 있으면 그것이 서버 진실)
    Confirmed(Option<StateSnapshot>),
    /// 서버가 거절함
    Rejected(Option<StateSnapshot>),
    /// 전송 실패 / 타임아웃
    Failed,
}

impl From<CommandResult> for CommandOutcome {
    fn from(result: CommandResult) -> Self {
        if result.accepted {
            CommandOutcome::Confirmed(result.result_state)
        } else {
            CommandOutcome::Rejected(result.result_state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_does_not_override_live_hand() {
        let now = Utc::now();
        let mut hands = BTreeMap::new();
        hands.insert(
            "p1".to_string(),
            HandState::waiting("p1", "Ana", now).with_status(HandStatus::Acknowledged),
        );
        CommandKind::Raise.apply_to(&mut hands, Some("p1"), Some("Ana"), now);
        assert_eq!(hands["p1"].status, HandStatus::Acknowledged);

        CommandKind::Raise.apply_to(&mut hands, Some("p2"), None, now);
        assert_eq!(hands["p2"].display_name, "p2");
        assert_eq!(hands["p2"].status, HandStatus::Waiting);
    }

    #[test]
    fn acknowledge_missing_hand_is_noop() {
        let mut hands = BTreeMap::new();
        CommandKind::Acknowledge(AckAction::Deny).apply_to(&mut hands, Some("ghost"), None, Utc::now());
        assert!(hands.is_empty());
    }

    #[test]
    fn command_request_wire_format() {
        let cmd = PendingCommand::new(CommandKind::Acknowledge(AckAction::Deny), Some("p1".to_string()))
            .with_command_id("cmd_1");
        let json = serde_json::to_value(cmd.to_request("host")).unwrap();
        assert_eq!(json["command_id"], "cmd_1");
        assert_eq!(json["kind"], "acknowledge");
        assert_eq!(json["action"], "deny");
        assert_eq!(json["actor_id"], "host");
        assert_eq!(json["target_id"], "p1");

        let clear = PendingCommand::new(CommandKind::ClearAll, None).to_request("host");
        let json = serde_json::to_value(&clear).unwrap();
        assert_eq!(json["kind"], "clear_all");
        assert!(json.get("target_id").is_none());
    }

    #[test]
    fn prediction_matching() {
        let now = Utc::now();
        let mut cmd = PendingCommand::new(CommandKind::Raise, Some("p1".to_string()));
        cmd.optimistic_snapshot = Some(HandState::waiting("p1", "Ana", now));

        let mut server = BTreeMap::new();
        assert!(!cmd.matches(&server));
        server.insert("p1".to_string(), HandState::waiting("p1", "Ana", now));
        assert!(cmd.matches(&server));

        let clear = PendingCommand::new(CommandKind::ClearAll, None);
        assert!(!clear.matches(&server));
        assert!(clear.matches(&BTreeMap::new()));
    }

    #[test]
    fn command_ids_are_unique() {
        assert_ne!(new_command_id(), new_command_id());
        assert!(new_command_id().starts_with("cmd_"));
    }

    #[test]
    fn command_result_into_outcome() {
        let outcome: CommandOutcome = CommandResult::rejected("already acknowledged", None).into();
        assert_eq!(outcome, CommandOutcome::Rejected(None));
        let outcome: CommandOutcome = CommandResult::accepted(None).into();
        assert_eq!(outcome, CommandOutcome::Confirmed(None));
    }
}
