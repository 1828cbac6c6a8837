//! 프로세스 내 신호 버스.
//!
//! `tokio::broadcast` 기반 [`SignalTransport`] 구현. 원격 신호 서버 없이
//! 같은 프로세스의 여러 세션(또는 테스트)이 신호를 주고받을 때 쓴다.

use async_trait::async_trait;
use handsync_core::error::CoreError;
use handsync_core::ports::signal_transport::{forward_subscription, SignalTransport};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// 프로세스 내 신호 버스 (복제본은 같은 채널을 공유)
#[derive(Clone)]
pub struct LocalSignalBus {
    tx: broadcast::Sender<Vec<u8>>,
}

impl LocalSignalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalSignalBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[async_trait]
impl SignalTransport for LocalSignalBus {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), CoreError> {
        debug!("신호 발행: {}바이트", payload.len());
        // 구독자가 없으면 그냥 사라진다 (최대 1회 전달)
        let _ = self.tx.send(payload);
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, CoreError> {
        Ok(forward_subscription(self.tx.subscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_payload() {
        let bus = LocalSignalBus::new(16);
        let mut a = bus.subscribe().await.unwrap();
        let mut b = bus.clone().subscribe().await.unwrap();

        bus.publish(b"hello".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(b.recv().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = LocalSignalBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.publish(b"lost".to_vec()).await.is_ok());
    }
}
