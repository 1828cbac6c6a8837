//! 상태 폴링 루프.
//!
//! 세션당 루프는 최대 하나. 이미 돌고 있을 때 `start`를 다시 부르면 아무 일도 하지 않는다.
//! 일시적 에러는 로그만 남기고 다음 틱에 재시도하며, 세션이 사라졌다는 에러를 받으면 스스로 멈춘다.

use chrono::Utc;
use handsync_core::error::CoreError;
use handsync_core::models::hand::ChangeSet;
use handsync_core::ports::backend::BackendClient;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::gate::SessionGate;
use crate::store::HandStore;

/// 폴링 루프 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// 시작 전
    Idle,
    Running,
    /// `stop()`으로 멈춤
    Stopped,
    /// 세션 종료 에러로 멈춤 (사유)
    Terminated(String),
}

/// 한 번의 폴링 (루프와 세션 초기 스냅샷이 공유)
#[derive(Clone)]
pub struct PollWorker {
    backend: Arc<dyn BackendClient>,
    store: HandStore,
    meeting_id: String,
    gate: SessionGate,
}

impl PollWorker {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        store: HandStore,
        meeting_id: impl Into<String>,
        gate: SessionGate,
    ) -> Self {
        Self {
            backend,
            store,
            meeting_id: meeting_id.into(),
            gate,
        }
    }

    /// 상태를 가져와 조정기에 반영
    ///
    /// 응답이 오는 사이 세션이 정리됐으면 반영하지 않고 빈 변경 집합을 돌려준다.
    pub async fn poll_once(&self) -> Result<Option<ChangeSet>, CoreError> {
        let requested_at = Utc::now();
        let snapshot = self.backend.get_state(&self.meeting_id).await?;
        if !self.gate.is_open() {
            debug!("세션 비활성, 폴링 결과 버림");
            return Ok(None);
        }
        Ok(Some(self.store.apply_poll(snapshot, requested_at)))
    }
}

struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// 폴링 드라이버
pub struct PollingDriver {
    worker: PollWorker,
    running: Mutex<Option<LoopHandle>>,
    status_tx: Arc<watch::Sender<PollStatus>>,
}

impl PollingDriver {
    pub fn new(worker: PollWorker) -> Self {
        let (status_tx, _) = watch::channel(PollStatus::Idle);
        Self {
            worker,
            running: Mutex::new(None),
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn worker(&self) -> &PollWorker {
        &self.worker
    }

    /// 루프 시작. 이미 돌고 있으면 `false`.
    ///
    /// 첫 틱은 `interval` 뒤에 온다 (초기 스냅샷은 세션이 직접 가져온다).
    pub fn start(&self, interval: Duration) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|h| !h.task.is_finished()) {
            debug!("폴링 루프가 이미 실행 중");
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let worker = self.worker.clone();
        let status_tx = self.status_tx.clone();
        status_tx.send_replace(PollStatus::Running);
        info!(
            "폴링 루프 시작: meeting={}, 간격={}ms",
            worker.meeting_id,
            interval.as_millis()
        );

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match worker.poll_once().await {
                            Ok(Some(changes)) if !changes.is_empty() => {
                                debug!("폴링 반영: v{}, {}건", changes.version, changes.changes.len());
                            }
                            Ok(_) => {}
                            Err(e) if e.is_terminal() => {
                                warn!("세션 종료 감지, 폴링 중단: {e}");
                                status_tx.send_replace(PollStatus::Terminated(e.to_string()));
                                break;
                            }
                            Err(e) => {
                                // 마지막으로 알려진 뷰는 그대로 유지
                                warn!("상태 폴링 실패: {e}");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("폴링 루프 종료");
                        break;
                    }
                }
            }
        });

        *running = Some(LoopHandle { shutdown_tx, task });
        true
    }

    /// 루프 중지. 돌고 있지 않았으면 `false`.
    ///
    /// 진행 중인 요청도 취소한다. 이미 `Terminated`로 끝난 상태는 덮어쓰지 않는다.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.running.lock().take() else {
            return false;
        };
        let was_running = !handle.task.is_finished();
        let _ = handle.shutdown_tx.send(true);
        handle.task.abort();
        self.status_tx.send_if_modified(|status| {
            if *status == PollStatus::Running {
                *status = PollStatus::Stopped;
                true
            } else {
                false
            }
        });
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    pub fn status(&self) -> PollStatus {
        self.status_tx.borrow().clone()
    }

    /// 상태 변경 구독 (세션이 종료 감지에 사용)
    pub fn subscribe_status(&self) -> watch::Receiver<PollStatus> {
        self.status_tx.subscribe()
    }
}

impl Drop for PollingDriver {
    fn drop(&mut self) {
        if let Some(handle) = self.running.get_mut().take() {
            handle.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::StateReconciler;
    use async_trait::async_trait;
    use handsync_core::models::command::{CommandRequest, CommandResult};
    use handsync_core::models::hand::{HandState, StateSnapshot};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// get_state 호출 횟수를 세고, 지정한 호출부터 에러를 돌려주는 백엔드
    struct CountingBackend {
        calls: AtomicU32,
        fail_from: Option<(u32, fn() -> CoreError)>,
    }

    impl CountingBackend {
        fn ok() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_from: None,
            }
        }

        fn failing_from(call: u32, err: fn() -> CoreError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_from: Some((call, err)),
            }
        }
    }

    #[async_trait]
    impl BackendClient for CountingBackend {
        async fn get_state(&self, _meeting_id: &str) -> Result<StateSnapshot, CoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((from, err)) = self.fail_from {
                if n >= from {
                    return Err(err());
                }
            }
            Ok(StateSnapshot::new(vec![HandState::waiting(
                format!("p{n}"),
                "User",
                Utc::now(),
            )]))
        }

        async fn submit_command(
            &self,
            _meeting_id: &str,
            _command: &CommandRequest,
        ) -> Result<CommandResult, CoreError> {
            Ok(CommandResult::accepted(None))
        }

        async fn start_session(&self, _meeting_id: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn end_session(&self, _meeting_id: &str) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn driver(backend: Arc<CountingBackend>) -> (PollingDriver, HandStore) {
        let store = HandStore::new(StateReconciler::new(2, 16));
        let gate = SessionGate::new();
        gate.open();
        let worker = PollWorker::new(backend, store.clone(), "m1", gate);
        (PollingDriver::new(worker), store)
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_does_not_spawn_another_loop() {
        let backend = Arc::new(CountingBackend::ok());
        let (driver, _store) = driver(backend.clone());

        assert!(driver.start(Duration::from_secs(3)));
        assert!(!driver.start(Duration::from_secs(3)));

        tokio::time::sleep(Duration::from_millis(9_500)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(driver.stop());
        assert!(!driver.stop());
        assert_eq!(driver.status(), PollStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_further_ticks() {
        let backend = Arc::new(CountingBackend::ok());
        let (driver, store) = driver(backend.clone());

        driver.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        driver.stop();
        let version = store.version();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.version(), version);
        assert!(!driver.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_keep_polling_and_state() {
        let backend = Arc::new(CountingBackend::failing_from(2, || {
            CoreError::Network("연결 거부".to_string())
        }));
        let (driver, store) = driver(backend.clone());

        driver.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(store.view().is_raised("p1"));
        assert_eq!(driver.status(), PollStatus::Running);
        driver.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_stops_loop() {
        let backend = Arc::new(CountingBackend::failing_from(2, || {
            CoreError::SessionEnded("m1".to_string())
        }));
        let (driver, _store) = driver(backend.clone());
        let mut status = driver.subscribe_status();

        driver.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(matches!(*status.borrow_and_update(), PollStatus::Terminated(_)));
        assert!(!driver.is_running());
        // 종료 후에는 다시 시작할 수 있다
        assert!(driver.start(Duration::from_secs(1)));
        driver.stop();
    }

    #[tokio::test]
    async fn closed_gate_discards_poll_result() {
        let backend = Arc::new(CountingBackend::ok());
        let store = HandStore::new(StateReconciler::new(2, 16));
        let worker = PollWorker::new(backend, store.clone(), "m1", SessionGate::new());

        assert!(worker.poll_once().await.unwrap().is_none());
        assert_eq!(store.version(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_after_termination_keeps_reason() {
        let backend = Arc::new(CountingBackend::failing_from(1, || {
            CoreError::SessionEnded("m1".to_string())
        }));
        let (driver, _store) = driver(backend);
        let mut status = driver.subscribe_status();

        driver.start(Duration::from_millis(10));
        while !matches!(*status.borrow_and_update(), PollStatus::Terminated(_)) {
            status.changed().await.unwrap();
        }
        // 세션 정리가 곧바로 stop()을 불러도 종료 사유가 남는다
        driver.stop();
        assert_eq!(
            driver.status(),
            PollStatus::Terminated(CoreError::SessionEnded("m1".to_string()).to_string())
        );
    }
}
