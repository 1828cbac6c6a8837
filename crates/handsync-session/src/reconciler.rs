//! 손들기 상태 조정기.
//!
//! 세 가지 입력을 하나의 [`ReconciledView`]로 합친다.
//!
//! - 폴링 스냅샷: 권위 있는 서버 상태. 확정(confirmed) 계층을 통째로 교체한다.
//! - 브로드캐스트 신호: 최선 노력 가속 장치. 확정 계층에 적용되지만 다음 폴링이 항상 이긴다.
//! - 낙관적 명령: 진행 중(pending) 명령을 확정 계층 위에 `submitted_at` 순으로 덧씌운다.
//!
//! 뷰 = 확정 계층 + 대체되지 않은 진행 중 명령 오버레이.
//! 명령이 제출된 뒤에 요청된 폴링이 도착하면 그 명령은 "대체됨"으로 표시되고
//! 오버레이에서 빠진다 (폴링이 이미 명령 결과를 반영했거나, 반영하지 않았다면 폴링이 맞다).

use chrono::{DateTime, Utc};
use handsync_core::config::SyncConfig;
use handsync_core::models::command::{CommandOutcome, PendingCommand};
use handsync_core::models::hand::{
    collapse_hands, diff_hands, ChangeOrigin, ChangeSet, HandState, ReconciledView, StateSnapshot,
};
use handsync_core::models::signal::{SignalEnvelope, SignalMessage};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::debug;

/// 브로드캐스트를 버린 이유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// JSON이 아니거나 알 수 없는 `type`
    Malformed,
    /// 다른 회의의 신호
    ForeignMeeting(String),
    /// 마지막으로 본 서버 버전보다 허용 오차 넘게 오래됨
    Stale { version: u64, latest: u64 },
    /// 이미 반영한 명령 ID
    Duplicate(String),
}

/// 브로드캐스트 적용 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// 수락됨 (변경이 없으면 빈 변경 집합)
    Applied(ChangeSet),
    Discarded(DiscardReason),
}

impl BroadcastOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, BroadcastOutcome::Applied(_))
    }

    pub fn change_set(&self) -> Option<&ChangeSet> {
        match self {
            BroadcastOutcome::Applied(changes) => Some(changes),
            BroadcastOutcome::Discarded(_) => None,
        }
    }
}

/// 최근 반영한 명령 ID (고정 크기, 오래된 것부터 잊음)
#[derive(Debug)]
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            seen: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// 새 ID면 기록하고 true
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    command: PendingCommand,
    /// 제출 이후에 요청된 폴링이 도착함 → 오버레이에서 제외
    superseded: bool,
}

/// 상태 조정기
///
/// 뷰의 `hands`와 `version`을 바꾸는 유일한 주체. 동시 접근은 [`crate::store::HandStore`]가 직렬화한다.
#[derive(Debug)]
pub struct StateReconciler {
    meeting_id: Option<String>,
    confirmed: BTreeMap<String, HandState>,
    pending: Vec<PendingEntry>,
    view: ReconciledView,
    /// 폴링/명령 결과/브로드캐스트로 본 가장 높은 서버 버전
    server_version: Option<u64>,
    tolerance: u64,
    recent: RecentIds,
}

impl StateReconciler {
    pub fn new(tolerance: u64, dedupe_history: usize) -> Self {
        Self {
            meeting_id: None,
            confirmed: BTreeMap::new(),
            pending: Vec::new(),
            view: ReconciledView::default(),
            server_version: None,
            tolerance,
            recent: RecentIds::new(dedupe_history),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.broadcast_tolerance, config.dedupe_history)
    }

    /// 다른 회의 ID가 붙은 신호는 버린다
    pub fn for_meeting(mut self, meeting_id: impl Into<String>) -> Self {
        self.meeting_id = Some(meeting_id.into());
        self
    }

    pub fn view(&self) -> &ReconciledView {
        &self.view
    }

    pub fn version(&self) -> u64 {
        self.view.version
    }

    /// 마지막으로 본 서버 버전 (브로드캐스트 신선도 기준)
    pub fn server_version(&self) -> Option<u64> {
        self.server_version
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, command_id: &str) -> bool {
        self.pending.iter().any(|e| e.command.command_id == command_id)
    }

    /// 폴링 스냅샷 반영
    ///
    /// `requested_at`은 요청을 보낸 시각. 그 이전에 제출된 진행 중 명령은 대체된다.
    /// 확정 계층과 오버레이가 모두 그대로면 버전을 올리지 않는다.
    pub fn apply_poll(&mut self, snapshot: StateSnapshot, requested_at: DateTime<Utc>) -> ChangeSet {
        self.observe_server_version(snapshot.version);
        let server = collapse_hands(snapshot.hands);
        self.view.last_poll_at = Some(Utc::now());

        let mut superseded_any = false;
        for entry in self.pending.iter_mut().filter(|e| !e.superseded) {
            if entry.command.submitted_at <= requested_at {
                entry.superseded = true;
                superseded_any = true;
            }
        }

        if server == self.confirmed && !superseded_any {
            return ChangeSet::empty(self.view.version, ChangeOrigin::Poll);
        }
        self.confirmed = server;
        self.commit(ChangeOrigin::Poll)
    }

    /// 원시 브로드캐스트 페이로드 반영. 형식이 틀려도 에러가 아니다.
    pub fn apply_broadcast(&mut self, payload: &[u8]) -> BroadcastOutcome {
        match SignalEnvelope::decode(payload) {
            Some(envelope) => self.apply_envelope(envelope),
            None => BroadcastOutcome::Discarded(DiscardReason::Malformed),
        }
    }

    /// 디코딩된 신호 반영
    pub fn apply_envelope(&mut self, envelope: SignalEnvelope) -> BroadcastOutcome {
        if let (Some(ours), Some(theirs)) = (&self.meeting_id, &envelope.meeting_id) {
            if ours != theirs {
                return BroadcastOutcome::Discarded(DiscardReason::ForeignMeeting(theirs.clone()));
            }
        }

        // 뷰 버전은 클라이언트마다 다르므로 서버 버전끼리만 비교한다
        if let (Some(version), Some(latest)) = (envelope.version, self.server_version) {
            if version.saturating_add(self.tolerance) < latest {
                return BroadcastOutcome::Discarded(DiscardReason::Stale { version, latest });
            }
        }

        if let Some(command_id) = envelope.command_id.as_deref() {
            if !self.recent.insert(command_id) {
                return BroadcastOutcome::Discarded(DiscardReason::Duplicate(command_id.to_string()));
            }
        }

        self.observe_server_version(envelope.version);
        self.view.last_broadcast_at = Some(Utc::now());
        let mut next = self.confirmed.clone();
        apply_message(&mut next, envelope.message);
        if next == self.confirmed {
            return BroadcastOutcome::Applied(ChangeSet::empty(
                self.view.version,
                ChangeOrigin::Broadcast,
            ));
        }
        self.confirmed = next;
        BroadcastOutcome::Applied(self.commit(ChangeOrigin::Broadcast))
    }

    /// 낙관적 명령 적용
    ///
    /// 예측된 대상 상태를 `optimistic_snapshot`에 기록해 두고 확정 시 서버 결과와 비교한다.
    pub fn apply_optimistic(&mut self, mut command: PendingCommand) -> ChangeSet {
        if self.is_pending(&command.command_id) {
            debug!("이미 진행 중인 명령: {}", command.command_id);
            return ChangeSet::empty(self.view.version, ChangeOrigin::Optimistic);
        }

        let mut predicted = self.view.hands.clone();
        command.apply_to(&mut predicted);
        command.optimistic_snapshot = command
            .target_participant_id
            .as_deref()
            .and_then(|pid| predicted.get(pid).cloned());

        self.recent.insert(&command.command_id);
        self.pending.push(PendingEntry {
            command,
            superseded: false,
        });
        self.commit(ChangeOrigin::Optimistic)
    }

    /// 진행 중 명령 종료
    ///
    /// 이미 정리된 명령이면 `None`. 서버 결과가 예측과 같으면 Confirmation,
    /// 다르면 Correction, 실패면 Rollback 출처의 변경 집합을 낸다.
    /// 대체된 명령의 결과 스냅샷은 이후 폴링보다 오래됐으므로 확정 계층에 반영하지 않는다.
    pub fn resolve_command(&mut self, command_id: &str, outcome: CommandOutcome) -> Option<ChangeSet> {
        let Some(pos) = self
            .pending
            .iter()
            .position(|e| e.command.command_id == command_id)
        else {
            debug!("알 수 없는 명령 결과 무시: {command_id}");
            return None;
        };
        let PendingEntry {
            command,
            superseded,
        } = self.pending.remove(pos);
        self.recent.insert(&command.command_id);

        let origin = match outcome {
            CommandOutcome::Confirmed(Some(_)) if superseded => ChangeOrigin::Confirmation,
            CommandOutcome::Rejected(Some(_)) if superseded => ChangeOrigin::Rollback,
            CommandOutcome::Confirmed(Some(snapshot)) => {
                self.observe_server_version(snapshot.version);
                let server = collapse_hands(snapshot.hands);
                let matched = command.matches(&server);
                self.confirmed = server;
                if matched {
                    ChangeOrigin::Confirmation
                } else {
                    ChangeOrigin::Correction
                }
            }
            CommandOutcome::Confirmed(None) => {
                // 대체된 명령은 이후 폴링이 이미 결과를 담고 있다
                if !superseded {
                    command.apply_to(&mut self.confirmed);
                }
                ChangeOrigin::Confirmation
            }
            CommandOutcome::Rejected(Some(snapshot)) => {
                self.observe_server_version(snapshot.version);
                self.confirmed = collapse_hands(snapshot.hands);
                ChangeOrigin::Correction
            }
            CommandOutcome::Rejected(None) | CommandOutcome::Failed => ChangeOrigin::Rollback,
        };
        Some(self.commit(origin))
    }

    /// 전체 초기화 (진행 중 명령 포함)
    pub fn clear_all(&mut self) -> ChangeSet {
        self.confirmed.clear();
        self.pending.clear();
        self.commit(ChangeOrigin::Reset)
    }

    /// 명령 ID를 이미 반영했는지 (브로드캐스트 에코 판별용)
    pub fn has_seen(&self, command_id: &str) -> bool {
        self.recent.contains(command_id)
    }

    fn observe_server_version(&mut self, version: Option<u64>) {
        if let Some(version) = version {
            self.server_version = Some(self.server_version.map_or(version, |v| v.max(version)));
        }
    }

    fn commit(&mut self, origin: ChangeOrigin) -> ChangeSet {
        self.view.version += 1;
        let before = self.rebuild();
        ChangeSet {
            version: self.view.version,
            origin,
            changes: diff_hands(&before, &self.view.hands),
        }
    }

    /// 뷰 재계산. 이전 hands 반환.
    fn rebuild(&mut self) -> BTreeMap<String, HandState> {
        let mut hands = self.confirmed.clone();
        let mut overlays: Vec<&PendingCommand> = self
            .pending
            .iter()
            .filter(|e| !e.superseded)
            .map(|e| &e.command)
            .collect();
        // 같은 참가자를 건드리면 나중에 제출된 명령이 이긴다
        overlays.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.command_id.cmp(&b.command_id))
        });
        for command in overlays {
            command.apply_to(&mut hands);
        }
        std::mem::replace(&mut self.view.hands, hands)
    }
}

fn apply_message(hands: &mut BTreeMap<String, HandState>, message: SignalMessage) {
    match message {
        SignalMessage::HandRaiseUpdate {
            participant_id,
            display_name,
            raised: true,
            timestamp,
        } => {
            if !hands.get(&participant_id).is_some_and(HandState::is_live) {
                let name = if display_name.is_empty() {
                    participant_id.clone()
                } else {
                    display_name
                };
                let raised_at = timestamp.unwrap_or_else(Utc::now);
                hands.insert(
                    participant_id.clone(),
                    HandState::waiting(participant_id, name, raised_at),
                );
            }
        }
        SignalMessage::HandRaiseUpdate {
            participant_id,
            raised: false,
            ..
        } => {
            hands.remove(&participant_id);
        }
        SignalMessage::HandAcknowledgment {
            participant_id,
            action,
        } => {
            if let Some(hand) = hands.get_mut(&participant_id) {
                hand.status = action.resulting_status();
            }
        }
        SignalMessage::ClearAllHands => hands.clear(),
        SignalMessage::HandStateSync { hands: synced } => *hands = collapse_hands(synced),
    }
}
