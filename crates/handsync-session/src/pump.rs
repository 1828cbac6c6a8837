//! 신호 펌프.
//!
//! 전송 계층 구독 → 조정기. 형식이 틀린 신호나 다른 회의 신호는 조용히 버린다.

use handsync_core::error::CoreError;
use handsync_core::ports::signal_transport::SignalTransport;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::gate::SessionGate;
use crate::reconciler::BroadcastOutcome;
use crate::store::HandStore;

pub struct SignalPump;

impl SignalPump {
    /// 구독 후 수신 루프를 띄운다.
    ///
    /// 구독이 끊기거나 세션이 비활성화되면 태스크가 끝난다.
    pub async fn spawn(
        transport: Arc<dyn SignalTransport>,
        store: HandStore,
        gate: SessionGate,
    ) -> Result<JoinHandle<()>, CoreError> {
        let mut rx = transport.subscribe().await?;
        Ok(tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if !gate.is_open() {
                    break;
                }
                match store.apply_broadcast(&payload) {
                    BroadcastOutcome::Applied(changes) if !changes.is_empty() => {
                        debug!("신호 반영: v{}, {}건", changes.version, changes.changes.len());
                    }
                    BroadcastOutcome::Applied(_) => {}
                    BroadcastOutcome::Discarded(reason) => {
                        debug!("신호 무시: {reason:?}");
                    }
                }
            }
            info!("신호 수신 루프 종료");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalSignalBus;
    use crate::reconciler::StateReconciler;

    #[tokio::test]
    async fn applies_valid_signals_and_skips_noise() {
        let bus = Arc::new(LocalSignalBus::new(16));
        let store = HandStore::new(StateReconciler::new(2, 16).for_meeting("m1"));
        let gate = SessionGate::new();
        gate.open();
        let mut rx = store.watch();

        let _task = SignalPump::spawn(bus.clone(), store.clone(), gate)
            .await
            .unwrap();

        bus.publish(b"{not json".to_vec()).await.unwrap();
        bus.publish(br#"{"type":"reaction","emoji":"+1"}"#.to_vec())
            .await
            .unwrap();
        bus.publish(
            br#"{"type":"hand_raise_update","meeting_id":"m1","participant_id":"p9","display_name":"Bo","raised":true}"#
                .to_vec(),
        )
        .await
        .unwrap();

        rx.changed().await.unwrap();
        let view = rx.borrow().clone();
        assert!(view.is_raised("p9"));
        assert_eq!(view.version, 1);
    }

    #[tokio::test]
    async fn closed_gate_stops_pump() {
        let bus = Arc::new(LocalSignalBus::new(16));
        let store = HandStore::new(StateReconciler::new(2, 16));
        let gate = SessionGate::new();

        let task = SignalPump::spawn(bus.clone(), store.clone(), gate)
            .await
            .unwrap();
        bus.publish(br#"{"type":"clear_all_hands"}"#.to_vec())
            .await
            .unwrap();
        task.await.unwrap();
        assert_eq!(store.version(), 0);
    }
}
