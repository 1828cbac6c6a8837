//! 알림 프레젠터.
//!
//! 조정기 변경 집합(ChangeSet), 명령 실패, 세션 종료 → 사용자 알림 변환.
//! 어떤 알림을 만들지는 이 클라이언트 사용자의 역할(호스트/참가자)에 따라 다르다.

use handsync_core::config::NotificationConfig;
use handsync_core::models::command::{Actor, CommandKind};
use handsync_core::models::hand::{ChangeOrigin, ChangeSet, HandChange, HandStatus};
use handsync_core::models::notification::{NotificationItem, NotificationKind, NotificationPriority};

/// 한 변경 집합에서 이만큼 이상 손이 내려가면 "전체 내림" 알림 하나로 합친다
const CLEARED_BATCH_THRESHOLD: usize = 2;

/// 변경 → 알림 변환기
#[derive(Debug, Clone)]
pub struct NotificationPresenter {
    actor: Actor,
    config: NotificationConfig,
}

impl NotificationPresenter {
    pub fn new(actor: Actor, config: NotificationConfig) -> Self {
        Self { actor, config }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// 변경 집합에서 알림 목록 생성
    ///
    /// 자기 자신이 만든 낙관적 변경, 롤백, 로컬 초기화는 알림 대상이 아니다.
    pub fn from_changes(&self, changes: &ChangeSet) -> Vec<NotificationItem> {
        if matches!(
            changes.origin,
            ChangeOrigin::Optimistic | ChangeOrigin::Rollback | ChangeOrigin::Reset
        ) {
            return Vec::new();
        }

        let mut items = Vec::new();
        let removed: Vec<&HandChange> = changes
            .changes
            .iter()
            .filter(|c| c.before.as_ref().is_some_and(|h| h.is_live()) && c.after.is_none())
            .collect();
        let cleared_batch = removed.len() >= CLEARED_BATCH_THRESHOLD;

        if cleared_batch {
            items.push(self.normal(
                NotificationItem::new(
                    NotificationKind::HandsCleared,
                    "손 모두 내림",
                    format!("{}명의 손이 내려갔습니다", removed.len()),
                )
                .for_entity(&changes.version.to_string()),
            ));
        }

        for change in &changes.changes {
            if let Some(item) = self.present_change(change, cleared_batch) {
                items.push(item);
            }
        }
        items
    }

    fn present_change(&self, change: &HandChange, cleared_batch: bool) -> Option<NotificationItem> {
        let pid = change.participant_id.as_str();
        let is_self = pid == self.actor.participant_id;
        let name = display_name(change);

        if self.actor.is_host() && !is_self {
            if change.is_new_raise() {
                return Some(
                    NotificationItem::new(
                        NotificationKind::HandRaised,
                        "손들기",
                        format!("{name}님이 손을 들었습니다"),
                    )
                    .for_entity(pid)
                    .with_priority(NotificationPriority::High)
                    .with_ttl(self.config.high_priority_ttl()),
                );
            }
            if !cleared_batch && change.after.is_none() {
                return Some(self.normal(
                    NotificationItem::new(
                        NotificationKind::HandLowered,
                        "손 내림",
                        format!("{name}님이 손을 내렸습니다"),
                    )
                    .for_entity(pid),
                ));
            }
            return None;
        }

        if !is_self {
            return None;
        }
        let before = change.before.as_ref().map(|h| h.status);
        match change.status_after() {
            HandStatus::Acknowledged if before != Some(HandStatus::Acknowledged) => Some(
                self.normal(
                    NotificationItem::new(
                        NotificationKind::HandAcknowledged,
                        "발언 승인",
                        "호스트가 손들기를 확인했습니다",
                    )
                    .for_entity(pid),
                ),
            ),
            HandStatus::Denied if before != Some(HandStatus::Denied) => Some(
                self.normal(
                    NotificationItem::new(
                        NotificationKind::HandDenied,
                        "발언 거절",
                        "호스트가 손들기를 거절했습니다",
                    )
                    .for_entity(pid),
                ),
            ),
            _ => None,
        }
    }

    /// 명령 실패 알림 (같은 종류의 실패는 하나로 합쳐진다)
    pub fn command_failed(&self, kind: CommandKind, reason: &str) -> NotificationItem {
        NotificationItem::new(
            NotificationKind::CommandFailed,
            format!("{} 실패", command_label(kind)),
            reason.to_string(),
        )
        .for_entity(kind.as_str())
        .with_priority(NotificationPriority::High)
        .with_ttl(self.config.high_priority_ttl())
    }

    /// 세션 종료 알림 (사용자가 닫을 때까지 유지)
    pub fn session_ended(&self, meeting_id: &str) -> NotificationItem {
        NotificationItem::new(
            NotificationKind::SessionEnded,
            "회의 종료",
            "회의 세션이 종료되었습니다",
        )
        .for_entity(meeting_id)
        .with_priority(NotificationPriority::High)
        .persistent()
    }

    fn normal(&self, item: NotificationItem) -> NotificationItem {
        item.with_ttl(self.config.default_ttl())
    }
}

fn display_name(change: &HandChange) -> &str {
    change
        .after
        .as_ref()
        .or(change.before.as_ref())
        .map(|h| h.display_name.as_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(change.participant_id.as_str())
}

fn command_label(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Raise => "손들기",
        CommandKind::Lower => "손 내리기",
        CommandKind::Acknowledge(_) => "손들기 응답",
        CommandKind::ClearAll => "전체 손 내리기",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use handsync_core::models::command::AckAction;
    use handsync_core::models::hand::HandState;

    fn hand(pid: &str, status: HandStatus) -> HandState {
        HandState::waiting(pid, format!("User {pid}"), Utc::now()).with_status(status)
    }

    fn change(pid: &str, before: Option<HandStatus>, after: Option<HandStatus>) -> HandChange {
        HandChange {
            participant_id: pid.to_string(),
            before: before.map(|s| hand(pid, s)),
            after: after.map(|s| hand(pid, s)),
        }
    }

    fn set(origin: ChangeOrigin, changes: Vec<HandChange>) -> ChangeSet {
        ChangeSet {
            version: 7,
            origin,
            changes,
        }
    }

    fn host() -> NotificationPresenter {
        NotificationPresenter::new(Actor::host("h1", "Host"), NotificationConfig::default())
    }

    fn participant() -> NotificationPresenter {
        NotificationPresenter::new(Actor::participant("p1", "Ana"), NotificationConfig::default())
    }

    #[test]
    fn host_gets_high_priority_raise_alert() {
        let items = host().from_changes(&set(
            ChangeOrigin::Broadcast,
            vec![change("p1", None, Some(HandStatus::Waiting))],
        ));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, NotificationKind::HandRaised);
        assert_eq!(items[0].priority, NotificationPriority::High);
        assert_eq!(items[0].dedupe_key, "hand_raised:p1");
        assert!(items[0].message.contains("User p1"));
    }

    #[test]
    fn participant_ignores_other_raises() {
        let items = participant().from_changes(&set(
            ChangeOrigin::Poll,
            vec![change("p2", None, Some(HandStatus::Waiting))],
        ));
        assert!(items.is_empty());
    }

    #[test]
    fn participant_is_told_about_acknowledgment_once() {
        let presenter = participant();
        let ack = set(
            ChangeOrigin::Broadcast,
            vec![change("p1", Some(HandStatus::Waiting), Some(HandStatus::Acknowledged))],
        );
        let items = presenter.from_changes(&ack);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, NotificationKind::HandAcknowledged);

        // 같은 상태를 다시 보는 변경(이름 변경 등)은 알림 없음
        let repeat = set(
            ChangeOrigin::Poll,
            vec![change("p1", Some(HandStatus::Acknowledged), Some(HandStatus::Acknowledged))],
        );
        assert!(presenter.from_changes(&repeat).is_empty());
    }

    #[test]
    fn denial_is_reported() {
        let items = participant().from_changes(&set(
            ChangeOrigin::Poll,
            vec![change("p1", Some(HandStatus::Waiting), Some(HandStatus::Denied))],
        ));
        assert_eq!(items[0].kind, NotificationKind::HandDenied);
    }

    #[test]
    fn batch_removal_collapses_to_cleared() {
        let items = host().from_changes(&set(
            ChangeOrigin::Broadcast,
            vec![
                change("p1", Some(HandStatus::Waiting), None),
                change("p2", Some(HandStatus::Acknowledged), None),
            ],
        ));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, NotificationKind::HandsCleared);
    }

    #[test]
    fn host_sees_single_lowered_hand() {
        let items = host().from_changes(&set(
            ChangeOrigin::Poll,
            vec![change("p1", Some(HandStatus::Waiting), None)],
        ));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, NotificationKind::HandLowered);
    }

    #[test]
    fn local_origins_are_silent() {
        let presenter = host();
        for origin in [ChangeOrigin::Optimistic, ChangeOrigin::Rollback, ChangeOrigin::Reset] {
            let items = presenter.from_changes(&set(
                origin,
                vec![
                    change("p1", None, Some(HandStatus::Waiting)),
                    change("p2", Some(HandStatus::Waiting), None),
                    change("p3", Some(HandStatus::Waiting), None),
                ],
            ));
            assert!(items.is_empty(), "{origin:?}");
        }
    }

    #[test]
    fn command_failure_and_session_end() {
        let presenter = participant();
        let failed = presenter.command_failed(CommandKind::Acknowledge(AckAction::Deny), "timeout");
        assert_eq!(failed.dedupe_key, "command_failed:deny");
        assert_eq!(failed.priority, NotificationPriority::High);
        assert!(!failed.persistent);

        let ended = presenter.session_ended("m1");
        assert_eq!(ended.dedupe_key, "session_ended:m1");
        assert!(ended.persistent);
        assert!(ended.expires_at().is_none());
    }
}
