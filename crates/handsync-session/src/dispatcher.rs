//! 명령 디스패처.
//!
//! 변경 명령(raise/lower/acknowledge/clear-all)을 발행하는 유일한 경로.
//! 순서: 권한 확인 → 낙관적 적용 → 제출 (타임아웃) → 확정 또는 롤백 → 동료에게 신호 발행.
//! 어떤 경로로 끝나든 낙관적 변경은 반드시 해소된다.

use handsync_core::models::command::{
    AckAction, Actor, CommandKind, CommandOutcome, PendingCommand,
};
use handsync_core::models::hand::ChangeOrigin;
use handsync_core::models::signal::SignalEnvelope;
use handsync_core::ports::backend::BackendClient;
use handsync_core::ports::signal_transport::SignalTransport;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::CommandError;
use crate::gate::SessionGate;
use crate::store::HandStore;

/// 명령 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// 서버가 예측대로 확정
    Confirmed,
    /// 서버가 수락했지만 결과가 예측과 달라 정정됨
    Corrected,
    /// 같은 동작이 이미 진행 중이라 무시됨
    Duplicate,
}

/// 명령 영수증
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReceipt {
    /// 중복으로 무시된 경우 None
    pub command_id: Option<String>,
    pub outcome: ReceiptOutcome,
    /// 처리 후 뷰 버전
    pub version: u64,
}

type InFlightKey = (CommandKind, Option<String>);

/// 진행 중 표시. drop 시 해제된다.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<InFlightKey>>>,
    key: InFlightKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// 명령 디스패처
pub struct ActionDispatcher {
    backend: Arc<dyn BackendClient>,
    transport: Option<Arc<dyn SignalTransport>>,
    store: HandStore,
    actor: Actor,
    meeting_id: String,
    gate: SessionGate,
    command_timeout: Duration,
    in_flight: Arc<Mutex<HashSet<InFlightKey>>>,
}

impl ActionDispatcher {
    pub fn new(
        backend: Arc<dyn BackendClient>,
        store: HandStore,
        actor: Actor,
        meeting_id: impl Into<String>,
        gate: SessionGate,
        command_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            transport: None,
            store,
            actor,
            meeting_id: meeting_id.into(),
            gate,
            command_timeout,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 확정된 명령을 동료에게 알릴 전송 계층 설정
    pub fn with_transport(mut self, transport: Arc<dyn SignalTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// 내 손 들기
    pub async fn raise(&self) -> Result<CommandReceipt, CommandError> {
        let me = self.actor.participant_id.clone();
        self.dispatch(CommandKind::Raise, Some(me)).await
    }

    /// 내 손 내리기
    pub async fn lower(&self) -> Result<CommandReceipt, CommandError> {
        let me = self.actor.participant_id.clone();
        self.dispatch(CommandKind::Lower, Some(me)).await
    }

    /// 참가자 손들기에 응답 (호스트 전용)
    pub async fn acknowledge(
        &self,
        participant_id: &str,
        action: AckAction,
    ) -> Result<CommandReceipt, CommandError> {
        self.dispatch(
            CommandKind::Acknowledge(action),
            Some(participant_id.to_string()),
        )
        .await
    }

    /// 모든 손 내리기 (호스트 전용)
    pub async fn clear_all(&self) -> Result<CommandReceipt, CommandError> {
        self.dispatch(CommandKind::ClearAll, None).await
    }

    /// 같은 동작이 진행 중인지
    pub fn is_in_flight(&self, kind: CommandKind, target: Option<&str>) -> bool {
        self.in_flight
            .lock()
            .contains(&(kind, target.map(str::to_string)))
    }

    async fn dispatch(
        &self,
        kind: CommandKind,
        target: Option<String>,
    ) -> Result<CommandReceipt, CommandError> {
        if !self.gate.is_open() {
            return Err(CommandError::SessionInactive);
        }
        if kind.requires_host() && !self.actor.is_host() {
            return Err(CommandError::NotPermitted(kind.as_str()));
        }

        let Some(_guard) = self.try_begin(kind, target.clone()) else {
            debug!("진행 중인 명령과 중복, 무시: {}", kind.as_str());
            return Ok(CommandReceipt {
                command_id: None,
                outcome: ReceiptOutcome::Duplicate,
                version: self.store.version(),
            });
        };

        let mut command = PendingCommand::new(kind, target);
        if kind == CommandKind::Raise {
            command = command.with_display_name(self.actor.display_name.clone());
        }
        let command_id = command.command_id.clone();
        let request = command.to_request(&self.actor.participant_id);
        self.store.apply_optimistic(command.clone());
        debug!("명령 제출: {} ({})", kind.as_str(), command_id);

        let submitted = tokio::time::timeout(
            self.command_timeout,
            self.backend.submit_command(&self.meeting_id, &request),
        )
        .await;

        if !self.gate.is_open() {
            // 정리 중에 끝난 요청은 뷰를 건드리지 않는다
            debug!("세션 비활성, 명령 결과 버림: {command_id}");
            return Err(CommandError::SessionInactive);
        }

        match submitted {
            Ok(Ok(result)) if result.accepted => {
                let server_version = result.result_state.as_ref().and_then(|s| s.version);
                let changes = self
                    .store
                    .resolve_command(&command_id, CommandOutcome::from(result));
                let version = self.store.version();
                let outcome = match changes.map(|c| c.origin) {
                    Some(ChangeOrigin::Correction) => ReceiptOutcome::Corrected,
                    _ => ReceiptOutcome::Confirmed,
                };
                info!("명령 확정: {} ({command_id}, v{version})", kind.as_str());
                self.announce(&command, server_version).await;
                Ok(CommandReceipt {
                    command_id: Some(command_id),
                    outcome,
                    version,
                })
            }
            Ok(Ok(result)) => {
                let reason = result
                    .reason
                    .clone()
                    .unwrap_or_else(|| "서버가 명령을 거절했습니다".to_string());
                warn!("명령 거절, 롤백: {} ({command_id}): {reason}", kind.as_str());
                self.store
                    .resolve_command(&command_id, CommandOutcome::from(result));
                Err(CommandError::Rejected { reason })
            }
            Ok(Err(e)) => {
                warn!("명령 제출 실패, 롤백: {} ({command_id}): {e}", kind.as_str());
                self.store
                    .resolve_command(&command_id, CommandOutcome::Failed);
                Err(CommandError::Backend(e))
            }
            Err(_) => {
                warn!(
                    "명령 제출 타임아웃 ({}ms), 롤백: {} ({command_id})",
                    self.command_timeout.as_millis(),
                    kind.as_str()
                );
                self.store
                    .resolve_command(&command_id, CommandOutcome::Failed);
                Err(CommandError::Timeout)
            }
        }
    }

    fn try_begin(&self, kind: CommandKind, target: Option<String>) -> Option<InFlightGuard> {
        let key = (kind, target);
        if !self.in_flight.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: self.in_flight.clone(),
            key,
        })
    }

    /// 확정된 명령을 동료에게 알림 (실패해도 로그만)
    ///
    /// 버전은 서버가 결과 스냅샷에 붙인 값만 싣는다. 로컬 뷰 버전은 클라이언트마다 다르다.
    async fn announce(&self, command: &PendingCommand, server_version: Option<u64>) {
        let Some(transport) = &self.transport else {
            return;
        };
        let Some(envelope) = SignalEnvelope::from_command(command, &self.actor.display_name) else {
            return;
        };
        let mut envelope = envelope
            .for_meeting(self.meeting_id.clone())
            .with_sender(self.actor.participant_id.clone());
        if let Some(version) = server_version {
            envelope = envelope.with_version(version);
        }
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("신호 직렬화 실패: {e}");
                return;
            }
        };
        if let Err(e) = transport.publish(payload).await {
            warn!("신호 발행 실패: {e}");
        }
    }
}
