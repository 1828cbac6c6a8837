//! 브로드캐스트 전송 포트.
//!
//! 구현: `handsync-network` crate (tokio-tungstenite),
//! `handsync-session` crate (프로세스 내 버스)
//!
//! 전송 계층은 최선 노력(best-effort), 최대 1회 전달이며 발신자 간 순서를 보장하지 않는다.
//! 메시지는 전송 수준에서 타입이 없는 바이트열이다.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::CoreError;

/// 구독 채널 버퍼 크기
pub const SUBSCRIPTION_BUFFER: usize = 64;

/// 발행/구독 채널
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// 페이로드 발행 (fire-and-forget)
    async fn publish(&self, payload: Vec<u8>) -> Result<(), CoreError>;

    /// 수신 채널 구독
    ///
    /// 반환된 수신기를 drop하면 구독이 해제된다.
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, CoreError>;
}

/// broadcast 수신기를 구독 전용 mpsc 채널로 이어준다.
///
/// 수신 측이 닫히거나 송신 측이 사라지면 전달 태스크가 종료된다.
/// 느린 구독자가 밀린 메시지는 버린다 (최대 1회 전달).
pub fn forward_subscription(mut source: broadcast::Receiver<Vec<u8>>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    tokio::spawn(async move {
        loop {
            match source.recv().await {
                Ok(payload) => {
                    if tx.send(payload).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("신호 구독자 지연, {skipped}건 유실");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("신호 구독 전달 종료");
    });
    rx
}
