//! 회의 세션 수명 주기.
//!
//! `Uninitialized → Initializing → Active → Cleaning → Closed` 상태 기계.
//! 전이는 한 곳([`MeetingSession::transition`])에서만 일어나므로
//! `initialize`/`cleanup`을 여러 번, 여러 경로에서 불러도 부수 효과는 한 번만 실행된다.

use handsync_core::config::AppConfig;
use handsync_core::models::command::{AckAction, Actor, CommandKind};
use handsync_core::models::hand::ReconciledView;
use handsync_core::models::notification::NotificationItem;
use handsync_core::observer::Subscription;
use handsync_core::ports::backend::BackendClient;
use handsync_core::ports::signal_transport::SignalTransport;
use handsync_notify::center::{NotificationCenter, NotificationEvent};
use handsync_notify::presenter::NotificationPresenter;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::{ActionDispatcher, CommandReceipt};
use crate::error::{CommandError, SessionError};
use crate::gate::SessionGate;
use crate::polling::{PollStatus, PollWorker, PollingDriver};
use crate::pump::SignalPump;
use crate::store::HandStore;

/// 세션 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    Active,
    Cleaning,
    Closed,
}

struct SessionInner {
    meeting_id: String,
    actor: Actor,
    config: AppConfig,
    backend: Arc<dyn BackendClient>,
    transport: Arc<dyn SignalTransport>,
    store: HandStore,
    polling: PollingDriver,
    dispatcher: ActionDispatcher,
    notifications: NotificationCenter,
    presenter: NotificationPresenter,
    gate: SessionGate,
    phase_tx: watch::Sender<SessionPhase>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// 회의 세션 (복제 가능한 핸들)
///
/// 의존성(백엔드, 전송 계층)은 생성 시 주입한다. 회의 하나당 인스턴스 하나.
#[derive(Clone)]
pub struct MeetingSession {
    inner: Arc<SessionInner>,
}

impl MeetingSession {
    pub fn new(
        meeting_id: impl Into<String>,
        actor: Actor,
        config: AppConfig,
        backend: Arc<dyn BackendClient>,
        transport: Arc<dyn SignalTransport>,
    ) -> Self {
        let meeting_id = meeting_id.into();
        let gate = SessionGate::new();
        let store = HandStore::from_config(&meeting_id, &config.sync);
        let polling = PollingDriver::new(PollWorker::new(
            backend.clone(),
            store.clone(),
            meeting_id.clone(),
            gate.clone(),
        ));
        let dispatcher = ActionDispatcher::new(
            backend.clone(),
            store.clone(),
            actor.clone(),
            meeting_id.clone(),
            gate.clone(),
            config.command_timeout(),
        )
        .with_transport(transport.clone());
        let notifications = NotificationCenter::new(&config.notification);
        let presenter = NotificationPresenter::new(actor.clone(), config.notification.clone());

        // 상태 변경 → 알림
        {
            let notifications = notifications.clone();
            let presenter = presenter.clone();
            store
                .on_changes(move |changes| {
                    for item in presenter.from_changes(changes) {
                        notifications.enqueue(item);
                    }
                })
                .detach();
        }

        let (phase_tx, _) = watch::channel(SessionPhase::Uninitialized);
        Self {
            inner: Arc::new(SessionInner {
                meeting_id,
                actor,
                config,
                backend,
                transport,
                store,
                polling,
                dispatcher,
                notifications,
                presenter,
                gate,
                phase_tx,
                pump: Mutex::new(None),
            }),
        }
    }

    /// 세션 시작
    ///
    /// 서버 세션 시작 → 안정화 대기 → 초기 스냅샷 → 신호 구독 → 폴링 시작.
    /// 이미 시작했거나 정리된 세션이면 아무 일도 하지 않고 `Ok(false)`.
    pub async fn initialize(&self) -> Result<bool, SessionError> {
        if !self.transition(&[SessionPhase::Uninitialized], SessionPhase::Initializing) {
            debug!("이미 초기화된 세션: {}", self.inner.meeting_id);
            return Ok(false);
        }
        let inner = &self.inner;
        info!(
            "세션 초기화 시작: meeting={}, actor={} ({:?})",
            inner.meeting_id, inner.actor.participant_id, inner.actor.role
        );
        inner.gate.open();

        if let Err(e) = inner.backend.start_session(&inner.meeting_id).await {
            warn!("서버 세션 시작 실패: {e}");
            inner.gate.close();
            // 다시 시도할 수 있도록 되돌린다
            self.transition(&[SessionPhase::Initializing], SessionPhase::Uninitialized);
            return Err(e.into());
        }

        tokio::time::sleep(inner.config.settle_delay()).await;
        if self.phase() != SessionPhase::Initializing {
            return Err(SessionError::Cancelled);
        }

        match inner.polling.worker().poll_once().await {
            Ok(_) => {}
            Err(e) if e.is_terminal() => {
                self.end_after_terminal(&e.to_string()).await;
                return Err(e.into());
            }
            Err(e) => warn!("초기 스냅샷 실패, 빈 상태로 시작: {e}"),
        }

        let pump = match SignalPump::spawn(
            inner.transport.clone(),
            inner.store.clone(),
            inner.gate.clone(),
        )
        .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("신호 구독 실패, 폴링만 사용: {e}");
                None
            }
        };

        if self.phase() != SessionPhase::Initializing {
            if let Some(handle) = pump {
                handle.abort();
            }
            return Err(SessionError::Cancelled);
        }
        *inner.pump.lock() = pump;
        self.watch_poll_status();
        inner.polling.start(inner.config.poll_interval());

        if !self.transition(&[SessionPhase::Initializing], SessionPhase::Active) {
            return Err(SessionError::Cancelled);
        }
        info!("세션 활성화: {}", inner.meeting_id);
        Ok(true)
    }

    /// 세션 정리
    ///
    /// 폴링 중지 → 신호 구독 해제 → 서버 세션 종료(실패해도 계속) → 메모리 상태 초기화.
    /// 이미 정리 중이거나 끝났으면 `false`.
    pub async fn cleanup(&self) -> bool {
        let mut previous = None;
        self.inner.phase_tx.send_if_modified(|phase| match phase {
            SessionPhase::Cleaning | SessionPhase::Closed => false,
            current => {
                previous = Some(*current);
                *current = SessionPhase::Cleaning;
                true
            }
        });
        let Some(previous) = previous else {
            debug!("이미 정리된 세션: {}", self.inner.meeting_id);
            return false;
        };

        let inner = &self.inner;
        info!("세션 정리 시작: {} ({:?})", inner.meeting_id, previous);
        inner.gate.close();
        inner.polling.stop();
        if let Some(pump) = inner.pump.lock().take() {
            pump.abort();
        }

        if previous != SessionPhase::Uninitialized {
            if let Err(e) = inner.backend.end_session(&inner.meeting_id).await {
                warn!("서버 세션 종료 실패 (무시): {e}");
            }
        }

        inner.store.clear_all();
        inner.notifications.clear_all();
        inner.phase_tx.send_replace(SessionPhase::Closed);
        info!("세션 정리 완료: {}", inner.meeting_id);
        true
    }

    pub async fn raise(&self) -> Result<CommandReceipt, CommandError> {
        let result = self.inner.dispatcher.raise().await;
        self.report(CommandKind::Raise, result)
    }

    pub async fn lower(&self) -> Result<CommandReceipt, CommandError> {
        let result = self.inner.dispatcher.lower().await;
        self.report(CommandKind::Lower, result)
    }

    pub async fn acknowledge(
        &self,
        participant_id: &str,
        action: AckAction,
    ) -> Result<CommandReceipt, CommandError> {
        let result = self.inner.dispatcher.acknowledge(participant_id, action).await;
        self.report(CommandKind::Acknowledge(action), result)
    }

    pub async fn clear_all(&self) -> Result<CommandReceipt, CommandError> {
        let result = self.inner.dispatcher.clear_all().await;
        self.report(CommandKind::ClearAll, result)
    }

    /// 뷰 변경 콜백
    pub fn on_state_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ReconciledView) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(handler)
    }

    /// 알림 전달 콜백
    pub fn on_notification<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NotificationItem) + Send + Sync + 'static,
    {
        self.inner.notifications.subscribe(handler)
    }

    /// 알림 수명 이벤트 콜백 (만료로 사라진 알림을 화면에서 내릴 때)
    pub fn on_notification_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NotificationEvent) + Send + Sync + 'static,
    {
        self.inner.notifications.subscribe_events(handler)
    }

    pub fn watch_view(&self) -> watch::Receiver<ReconciledView> {
        self.inner.store.watch()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn view(&self) -> ReconciledView {
        self.inner.store.view()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase_tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.phase() == SessionPhase::Active
    }

    pub fn poll_status(&self) -> PollStatus {
        self.inner.polling.status()
    }

    pub fn meeting_id(&self) -> &str {
        &self.inner.meeting_id
    }

    pub fn actor(&self) -> &Actor {
        &self.inner.actor
    }

    pub fn store(&self) -> &HandStore {
        &self.inner.store
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.inner.notifications
    }

    /// `from` 중 하나에서 `to`로 전이. 성공하면 true.
    fn transition(&self, from: &[SessionPhase], to: SessionPhase) -> bool {
        let changed = self.inner.phase_tx.send_if_modified(|phase| {
            if from.contains(phase) {
                *phase = to;
                true
            } else {
                false
            }
        });
        if changed {
            debug!("세션 단계 전이: {:?} → {:?}", from, to);
        }
        changed
    }

    /// 명령 실패를 알림으로 보고 (세션 비활성은 제외)
    fn report(
        &self,
        kind: CommandKind,
        result: Result<CommandReceipt, CommandError>,
    ) -> Result<CommandReceipt, CommandError> {
        if let Err(e) = &result {
            if !matches!(e, CommandError::SessionInactive) {
                let item = self.inner.presenter.command_failed(kind, &e.to_string());
                self.inner.notifications.enqueue(item);
            }
        }
        result
    }

    /// 폴링 루프가 세션 종료를 감지하면 정리한다
    fn watch_poll_status(&self) {
        let weak = Arc::downgrade(&self.inner);
        let mut status = self.inner.polling.subscribe_status();
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = status.borrow_and_update().clone();
                match current {
                    PollStatus::Terminated(reason) => {
                        if let Some(inner) = weak.upgrade() {
                            MeetingSession { inner }.end_after_terminal(&reason).await;
                        }
                        break;
                    }
                    PollStatus::Stopped => break,
                    PollStatus::Idle | PollStatus::Running => {}
                }
            }
        });
    }

    async fn end_after_terminal(&self, reason: &str) {
        warn!("서버 세션 종료됨, 정리 시작: {reason}");
        self.cleanup().await;
        let item = self.inner.presenter.session_ended(&self.inner.meeting_id);
        self.inner.notifications.enqueue(item);
    }
}
