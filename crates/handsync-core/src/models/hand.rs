//! 손들기 상태 모델.
//!
//! 참가자별 손들기 상태, 서버 스냅샷, 조정된(reconciled) 뷰와 변경 집합.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 손들기 상태
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HandStatus {
    /// 호스트 응답 대기 중
    Waiting,
    /// 호스트가 확인함
    Acknowledged,
    /// 호스트가 거절함
    Denied,
    /// 내림
    Lowered,
}

impl HandStatus {
    /// 살아있는(live) 상태인지: Lowered/Denied가 아닌 경우
    pub fn is_live(self) -> bool {
        matches!(self, HandStatus::Waiting | HandStatus::Acknowledged)
    }
}

/// 참가자 한 명의 손들기 상태
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandState {
    /// 참가자 ID
    pub participant_id: String,
    /// 표시 이름
    #[serde(default)]
    pub display_name: String,
    /// 손을 든 시각
    #[serde(default)]
    pub raised_at: Option<DateTime<Utc>>,
    /// 현재 상태
    pub status: HandStatus,
}

impl HandState {
    /// 대기 상태의 새 손들기
    pub fn waiting(
        participant_id: impl Into<String>,
        display_name: impl Into<String>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            raised_at: Some(raised_at),
            status: HandStatus::Waiting,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    /// 상태만 바꾼 복제본
    pub fn with_status(&self, status: HandStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// 서버 상태 스냅샷 (`GET state` 응답)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateSnapshot {
    #[serde(default)]
    pub hands: Vec<HandState>,
    /// 서버가 매기는 상태 버전 (모든 클라이언트가 공유)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl StateSnapshot {
    pub fn new(hands: Vec<HandState>) -> Self {
        Self {
            hands,
            version: None,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// 참가자 ID 기준 맵으로 변환
    pub fn to_map(&self) -> BTreeMap<String, HandState> {
        collapse_hands(self.hands.iter().cloned())
    }
}

/// 손들기 목록을 참가자별 하나로 합친다.
///
/// Lowered는 버리고, 같은 참가자가 여러 번 나오면 live 항목을 우선하며
/// 둘 다 live면 나중 항목이 이긴다.
pub fn collapse_hands(hands: impl IntoIterator<Item = HandState>) -> BTreeMap<String, HandState> {
    let mut map: BTreeMap<String, HandState> = BTreeMap::new();
    for hand in hands {
        if hand.status == HandStatus::Lowered {
            continue;
        }
        match map.get(&hand.participant_id) {
            Some(existing) if existing.is_live() && !hand.is_live() => {}
            _ => {
                map.insert(hand.participant_id.clone(), hand);
            }
        }
    }
    map
}

/// 조정기(StateReconciler)가 소유하는 정규 뷰
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciledView {
    /// 참가자 ID → 손들기 상태 (Lowered는 포함하지 않음)
    pub hands: BTreeMap<String, HandState>,
    /// 수락된 변경마다 증가하는 단조 카운터
    pub version: u64,
    /// 마지막 폴링 반영 시각
    pub last_poll_at: Option<DateTime<Utc>>,
    /// 마지막 브로드캐스트 반영 시각
    pub last_broadcast_at: Option<DateTime<Utc>>,
}

impl ReconciledView {
    pub fn hand(&self, participant_id: &str) -> Option<&HandState> {
        self.hands.get(participant_id)
    }

    /// 해당 참가자의 손이 올라가 있는지 (Waiting/Acknowledged)
    pub fn is_raised(&self, participant_id: &str) -> bool {
        self.hand(participant_id).is_some_and(HandState::is_live)
    }

    /// 호스트 화면용 대기열: 손든 시각 순
    pub fn waiting_queue(&self) -> Vec<&HandState> {
        let mut waiting: Vec<&HandState> = self
            .hands
            .values()
            .filter(|h| h.status == HandStatus::Waiting)
            .collect();
        waiting.sort_by(|a, b| {
            a.raised_at
                .cmp(&b.raised_at)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        waiting
    }

    pub fn live_count(&self) -> usize {
        self.hands.values().filter(|h| h.is_live()).count()
    }
}

/// 변경 출처
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    Poll,
    Broadcast,
    Optimistic,
    /// 서버가 낙관적 예측을 확인함
    Confirmation,
    /// 서버 결과가 예측과 달라 정정됨
    Correction,
    /// 제출 실패로 낙관적 변경을 되돌림
    Rollback,
    /// 전체 초기화 (clear-all, 세션 종료)
    Reset,
}

/// 참가자 한 명의 변경 전/후
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandChange {
    pub participant_id: String,
    pub before: Option<HandState>,
    pub after: Option<HandState>,
}

impl HandChange {
    /// 새로 손을 들었는지 (대기 상태로 진입)
    pub fn is_new_raise(&self) -> bool {
        let was_waiting = self
            .before
            .as_ref()
            .is_some_and(|h| h.status == HandStatus::Waiting);
        let now_waiting = self
            .after
            .as_ref()
            .is_some_and(|h| h.status == HandStatus::Waiting);
        now_waiting && !was_waiting
    }

    /// 변경 후 상태 (없으면 Lowered로 취급)
    pub fn status_after(&self) -> HandStatus {
        self.after
            .as_ref()
            .map_or(HandStatus::Lowered, |h| h.status)
    }
}

/// 한 번의 조정 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// 적용 후 뷰 버전
    pub version: u64,
    pub origin: ChangeOrigin,
    pub changes: Vec<HandChange>,
}

impl ChangeSet {
    pub fn empty(version: u64, origin: ChangeOrigin) -> Self {
        Self {
            version,
            origin,
            changes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// 상태가 바뀐 참가자 ID 목록
    pub fn participant_ids(&self) -> Vec<&str> {
        self.changes
            .iter()
            .map(|c| c.participant_id.as_str())
            .collect()
    }

    pub fn change_for(&self, participant_id: &str) -> Option<&HandChange> {
        self.changes
            .iter()
            .find(|c| c.participant_id == participant_id)
    }
}

/// 두 맵을 비교해 변경 목록을 만든다 (참가자 ID 순).
pub fn diff_hands(
    before: &BTreeMap<String, HandState>,
    after: &BTreeMap<String, HandState>,
) -> Vec<HandChange> {
    let mut changes = Vec::new();
    for (pid, old) in before {
        match after.get(pid) {
            Some(new) if new == old => {}
            new => changes.push(HandChange {
                participant_id: pid.clone(),
                before: Some(old.clone()),
                after: new.cloned(),
            }),
        }
    }
    for (pid, new) in after {
        if !before.contains_key(pid) {
            changes.push(HandChange {
                participant_id: pid.clone(),
                before: None,
                after: Some(new.clone()),
            });
        }
    }
    changes.sort_by(|a, b| a.participant_id.cmp(&b.participant_id));
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hand(pid: &str, status: HandStatus) -> HandState {
        HandState {
            participant_id: pid.to_string(),
            display_name: pid.to_uppercase(),
            raised_at: Some(Utc::now()),
            status,
        }
    }

    #[test]
    fn live_statuses() {
        assert!(HandStatus::Waiting.is_live());
        assert!(HandStatus::Acknowledged.is_live());
        assert!(!HandStatus::Denied.is_live());
        assert!(!HandStatus::Lowered.is_live());
    }

    #[test]
    fn collapse_drops_lowered_and_prefers_live() {
        let map = collapse_hands(vec![
            hand("p1", HandStatus::Waiting),
            hand("p1", HandStatus::Denied),
            hand("p2", HandStatus::Lowered),
            hand("p3", HandStatus::Denied),
        ]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["p1"].status, HandStatus::Waiting);
        assert_eq!(map["p3"].status, HandStatus::Denied);
    }

    #[test]
    fn snapshot_parses_server_payload() {
        let json = r#"{"hands":[{"participant_id":"p1","display_name":"Ana","raised_at":"2026-01-28T10:00:00Z","status":"waiting"}]}"#;
        let snapshot: StateSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.hands.len(), 1);
        assert_eq!(snapshot.hands[0].status, HandStatus::Waiting);

        assert_eq!(snapshot.version, None);

        let versioned: StateSnapshot = serde_json::from_str(r#"{"hands":[],"version":42}"#).unwrap();
        assert_eq!(versioned.version, Some(42));

        let empty: StateSnapshot = serde_json::from_str("{}").unwrap();
        assert!(empty.hands.is_empty());
    }

    #[test]
    fn diff_reports_added_removed_and_modified() {
        let before = collapse_hands(vec![
            hand("a", HandStatus::Waiting),
            hand("b", HandStatus::Waiting),
        ]);
        let mut after = before.clone();
        after.remove("a");
        after.insert(
            "b".to_string(),
            before["b"].with_status(HandStatus::Acknowledged),
        );
        after.insert("c".to_string(), hand("c", HandStatus::Waiting));

        let changes = diff_hands(&before, &after);
        let ids: Vec<&str> = changes.iter().map(|c| c.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(changes[0].after.is_none());
        assert_eq!(changes[1].status_after(), HandStatus::Acknowledged);
        assert!(changes[2].is_new_raise());
    }

    #[test]
    fn waiting_queue_orders_by_raise_time() {
        let now = Utc::now();
        let mut view = ReconciledView::default();
        let mut late = HandState::waiting("late", "Late", now);
        late.raised_at = Some(now + chrono::Duration::seconds(5));
        view.hands.insert("late".to_string(), late);
        view.hands
            .insert("early".to_string(), HandState::waiting("early", "Early", now));
        view.hands.insert(
            "done".to_string(),
            HandState::waiting("done", "Done", now).with_status(HandStatus::Acknowledged),
        );

        let queue: Vec<&str> = view
            .waiting_queue()
            .iter()
            .map(|h| h.participant_id.as_str())
            .collect();
        assert_eq!(queue, vec!["early", "late"]);
        assert_eq!(view.live_count(), 3);
        assert!(view.is_raised("done"));
    }
}
