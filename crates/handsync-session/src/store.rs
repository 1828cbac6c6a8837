//! 조정기 공유 래퍼.
//!
//! 폴링 루프, 신호 펌프, 디스패처가 같은 조정기를 바꾸므로
//! 모든 변경은 잠금 안에서 끝까지 처리한다. 구독자 알림은 잠금 안에서 커밋 순서대로
//! 대기열에 넣고, 잠금을 놓은 뒤 한 번에 한 스레드만 대기열을 비운다.

use chrono::{DateTime, Utc};
use handsync_core::config::SyncConfig;
use handsync_core::models::command::{CommandOutcome, PendingCommand};
use handsync_core::models::hand::{ChangeSet, ReconciledView, StateSnapshot};
use handsync_core::observer::{Subscribers, Subscription};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::reconciler::{BroadcastOutcome, StateReconciler};

struct StoreInner {
    reconciler: Mutex<StateReconciler>,
    /// 아직 알리지 않은 커밋 (버전 순)
    outbox: Mutex<VecDeque<(ReconciledView, ChangeSet)>>,
    /// 대기열을 비우는 스레드 표시
    delivering: Mutex<()>,
    views: Subscribers<ReconciledView>,
    changes: Subscribers<ChangeSet>,
    watch_tx: watch::Sender<ReconciledView>,
}

/// 손들기 상태 저장소 (복제 가능한 핸들)
#[derive(Clone)]
pub struct HandStore {
    inner: Arc<StoreInner>,
}

impl HandStore {
    pub fn new(reconciler: StateReconciler) -> Self {
        let (watch_tx, _) = watch::channel(reconciler.view().clone());
        Self {
            inner: Arc::new(StoreInner {
                reconciler: Mutex::new(reconciler),
                outbox: Mutex::new(VecDeque::new()),
                delivering: Mutex::new(()),
                views: Subscribers::new(),
                changes: Subscribers::new(),
                watch_tx,
            }),
        }
    }

    pub fn from_config(meeting_id: &str, config: &SyncConfig) -> Self {
        Self::new(StateReconciler::from_config(config).for_meeting(meeting_id))
    }

    /// 현재 뷰 (복제본)
    pub fn view(&self) -> ReconciledView {
        self.inner.reconciler.lock().view().clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.reconciler.lock().version()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.reconciler.lock().pending_count()
    }

    pub fn apply_poll(&self, snapshot: StateSnapshot, requested_at: DateTime<Utc>) -> ChangeSet {
        let changes = {
            let mut reconciler = self.inner.reconciler.lock();
            let before = reconciler.version();
            let changes = reconciler.apply_poll(snapshot, requested_at);
            self.enqueue(&reconciler, before, &changes);
            changes
        };
        self.flush();
        changes
    }

    pub fn apply_broadcast(&self, payload: &[u8]) -> BroadcastOutcome {
        let outcome = {
            let mut reconciler = self.inner.reconciler.lock();
            let before = reconciler.version();
            let outcome = reconciler.apply_broadcast(payload);
            if let BroadcastOutcome::Applied(changes) = &outcome {
                self.enqueue(&reconciler, before, changes);
            }
            outcome
        };
        self.flush();
        outcome
    }

    pub fn apply_optimistic(&self, command: PendingCommand) -> ChangeSet {
        let changes = {
            let mut reconciler = self.inner.reconciler.lock();
            let before = reconciler.version();
            let changes = reconciler.apply_optimistic(command);
            self.enqueue(&reconciler, before, &changes);
            changes
        };
        self.flush();
        changes
    }

    /// 이미 정리된 명령이면 `None`
    pub fn resolve_command(&self, command_id: &str, outcome: CommandOutcome) -> Option<ChangeSet> {
        let changes = {
            let mut reconciler = self.inner.reconciler.lock();
            let before = reconciler.version();
            let changes = reconciler.resolve_command(command_id, outcome)?;
            self.enqueue(&reconciler, before, &changes);
            changes
        };
        self.flush();
        Some(changes)
    }

    pub fn clear_all(&self) -> ChangeSet {
        let changes = {
            let mut reconciler = self.inner.reconciler.lock();
            let before = reconciler.version();
            let changes = reconciler.clear_all();
            self.enqueue(&reconciler, before, &changes);
            changes
        };
        self.flush();
        changes
    }

    /// 뷰 변경 콜백 (버전이 바뀔 때마다)
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ReconciledView) + Send + Sync + 'static,
    {
        self.inner.views.subscribe(handler)
    }

    /// 변경 집합 콜백 (알림 변환용)
    pub fn on_changes<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        self.inner.changes.subscribe(handler)
    }

    /// 최신 뷰를 따라가는 watch 수신기
    pub fn watch(&self) -> watch::Receiver<ReconciledView> {
        self.inner.watch_tx.subscribe()
    }

    /// 조정기 잠금을 쥔 채로 호출. 버전이 바뀐 커밋만 대기열에 넣는다.
    fn enqueue(&self, reconciler: &StateReconciler, before: u64, changes: &ChangeSet) {
        if reconciler.version() == before {
            return;
        }
        self.inner
            .outbox
            .lock()
            .push_back((reconciler.view().clone(), changes.clone()));
    }

    /// 대기열을 커밋 순서대로 비운다.
    ///
    /// 다른 스레드(또는 구독자 콜백 안의 재진입 호출)가 이미 비우는 중이면 그쪽에 맡긴다.
    fn flush(&self) {
        loop {
            let Some(delivering) = self.inner.delivering.try_lock() else {
                return;
            };
            loop {
                let next = self.inner.outbox.lock().pop_front();
                let Some((view, changes)) = next else {
                    break;
                };
                self.deliver(view, &changes);
            }
            drop(delivering);
            // 잠금을 놓기 직전에 들어온 커밋은 다음 바퀴에서 처리
            if self.inner.outbox.lock().is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, view: ReconciledView, changes: &ChangeSet) {
        debug!(
            "뷰 갱신: v{} ({:?}, {}건)",
            view.version,
            changes.origin,
            changes.changes.len()
        );
        self.inner.watch_tx.send_replace(view.clone());
        self.inner.views.notify(&view);
        self.inner.changes.notify(changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handsync_core::models::command::CommandKind;
    use handsync_core::models::hand::{ChangeOrigin, HandState};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn raise_payload(pid: &str) -> Vec<u8> {
        format!(r#"{{"type":"hand_raise_update","participant_id":"{pid}","raised":true}}"#)
            .into_bytes()
    }

    fn store() -> HandStore {
        HandStore::new(StateReconciler::new(2, 16).for_meeting("m1"))
    }

    #[test]
    fn subscribers_see_each_new_version_once() {
        let store = store();
        let versions = Arc::new(Mutex::new(Vec::new()));
        let sink = versions.clone();
        let _sub = store.subscribe(move |view| sink.lock().push(view.version));

        let snapshot = StateSnapshot::new(vec![HandState::waiting("p1", "Ana", Utc::now())]);
        store.apply_poll(snapshot.clone(), Utc::now());
        // 동일 폴링은 알림 없음
        store.apply_poll(snapshot, Utc::now());
        store.apply_broadcast(b"garbage");
        store.clear_all();

        assert_eq!(*versions.lock(), vec![1, 2]);
    }

    #[test]
    fn change_sets_are_forwarded() {
        let store = store();
        let origins = Arc::new(Mutex::new(Vec::new()));
        let sink = origins.clone();
        let _sub = store.on_changes(move |changes| sink.lock().push(changes.origin));

        let command = PendingCommand::new(CommandKind::Raise, Some("p1".to_string()));
        let id = command.command_id.clone();
        store.apply_optimistic(command);
        store.resolve_command(&id, CommandOutcome::Failed);
        assert!(store.resolve_command(&id, CommandOutcome::Failed).is_none());

        assert_eq!(
            *origins.lock(),
            vec![ChangeOrigin::Optimistic, ChangeOrigin::Rollback]
        );
    }

    #[test]
    fn unsubscribed_handler_is_not_called() {
        let store = store();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let sub = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.clear_all();
        sub.unsubscribe();
        store.clear_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn watch_receiver_tracks_latest_view() {
        let store = store();
        let mut rx = store.watch();
        assert_eq!(rx.borrow().version, 0);

        store.apply_broadcast(
            br#"{"type":"hand_raise_update","participant_id":"p1","display_name":"Ana","raised":true}"#,
        );
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_raised("p1"));
    }

    #[test]
    fn concurrent_commits_are_delivered_in_order_without_gaps() {
        let store = store();
        let versions = Arc::new(Mutex::new(Vec::new()));
        let sink = versions.clone();
        let _sub = store.on_changes(move |changes| sink.lock().push(changes.version));

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.apply_broadcast(&raise_payload(&format!("t{t}-{i}")));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(*versions.lock(), (1..=200).collect::<Vec<u64>>());
        assert_eq!(store.watch().borrow().version, 200);
    }

    #[test]
    fn mutation_inside_handler_is_delivered_after_current_one() {
        let store = store();
        let versions = Arc::new(Mutex::new(Vec::new()));
        let sink = versions.clone();
        let inner = store.clone();
        let _sub = store.on_changes(move |changes| {
            sink.lock().push(changes.version);
            if changes.version == 1 {
                inner.apply_broadcast(&raise_payload("p2"));
            }
        });

        store.apply_broadcast(&raise_payload("p1"));
        assert_eq!(*versions.lock(), vec![1, 2]);
        assert!(store.view().is_raised("p2"));
    }
}
