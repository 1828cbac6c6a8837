//! WebSocket 신호 전송.
//!
//! `SignalTransport` 포트 구현. 연결 하나를 공유하며 수신 프레임은 모든 구독자에게 퍼뜨린다.
//! 연결이 끊기면 다음 발행/구독 때 다시 연결한다. 끊긴 동안의 신호는 유실되고 폴링이 메운다.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use handsync_core::error::CoreError;
use handsync_core::ports::signal_transport::{forward_subscription, SignalTransport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 수신 팬아웃 버퍼 크기
const INBOUND_BUFFER: usize = 256;

/// 현재 연결의 송신 절반
struct Connection {
    id: u64,
    write: SplitSink<WsStream, Message>,
}

/// WebSocket 신호 전송
pub struct WsSignalTransport {
    url: String,
    inbound: broadcast::Sender<Vec<u8>>,
    connection: Arc<Mutex<Option<Connection>>>,
    next_id: AtomicU64,
}

impl WsSignalTransport {
    /// 새 전송 생성 (연결은 처음 사용할 때)
    ///
    /// `http(s)://` URL은 `ws(s)://`로 바꾸고, 토큰은 쿼리 파라미터로 붙인다.
    pub fn new(url: &str, token: Option<&str>) -> Self {
        let ws_url = url
            .trim_end_matches('/')
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        let url = match token.filter(|t| !t.is_empty()) {
            Some(token) => format!("{ws_url}?token={token}"),
            None => ws_url,
        };
        let (inbound, _) = broadcast::channel(INBOUND_BUFFER);
        Self {
            url,
            inbound,
            connection: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// 연결 수립 (이미 연결돼 있으면 아무 일도 하지 않음)
    pub async fn connect(&self) -> Result<(), CoreError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Ok(());
        }

        info!("WebSocket 연결: {}", self.display_url());
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| CoreError::Network(format!("WebSocket 연결 실패: {e}")))?;

        let (write, read) = ws_stream.split();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(Self::read_loop(
            read,
            self.inbound.clone(),
            self.connection.clone(),
            id,
        ));
        *connection = Some(Connection { id, write });
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// 연결 종료
    pub async fn close(&self) -> Result<(), CoreError> {
        let Some(mut conn) = self.connection.lock().await.take() else {
            return Ok(());
        };
        conn.write
            .send(Message::Close(None))
            .await
            .map_err(|e| CoreError::Network(format!("WebSocket 종료 실패: {e}")))
    }

    fn display_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    /// 수신 루프
    ///
    /// 종료 시 자신이 만든 연결이 아직 현재 연결이면 비워서 재연결을 허용한다.
    async fn read_loop(
        mut read: SplitStream<WsStream>,
        inbound: broadcast::Sender<Vec<u8>>,
        connection: Arc<Mutex<Option<Connection>>>,
        id: u64,
    ) {
        while let Some(msg) = read.next().await {
            let payload = match msg {
                Ok(Message::Text(text)) => text.to_string().into_bytes(),
                Ok(Message::Binary(data)) => data.to_vec(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue, // Ping/Pong은 자동 처리
                Err(e) => {
                    warn!("WebSocket 수신 에러: {e}");
                    break;
                }
            };
            // 구독자가 없으면 버린다
            let _ = inbound.send(payload);
        }

        let mut current = connection.lock().await;
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
        }
        debug!("WebSocket 수신 루프 종료");
    }
}

#[async_trait]
impl SignalTransport for WsSignalTransport {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), CoreError> {
        self.connect().await?;

        let message = match String::from_utf8(payload) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => Message::Binary(e.into_bytes().into()),
        };

        let mut connection = self.connection.lock().await;
        let Some(conn) = connection.as_mut() else {
            return Err(CoreError::Network("WebSocket 연결 끊김".to_string()));
        };
        if let Err(e) = conn.write.send(message).await {
            *connection = None;
            return Err(CoreError::Network(format!("WebSocket 전송 실패: {e}")));
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<u8>>, CoreError> {
        let rx = self.inbound.subscribe();
        self.connect().await?;
        Ok(forward_subscription(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// 받은 텍스트/바이너리 프레임을 그대로 돌려주는 서버
    async fn echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_text() || msg.is_binary() {
                            if ws.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn url_conversion() {
        let ws = WsSignalTransport::new("https://signal.test/ws/", Some("abc"));
        assert_eq!(ws.url, "wss://signal.test/ws?token=abc");
        assert_eq!(ws.display_url(), "wss://signal.test/ws");

        let ws = WsSignalTransport::new("http://localhost:9000", None);
        assert_eq!(ws.url, "ws://localhost:9000");
    }

    #[tokio::test]
    async fn published_frames_reach_every_subscriber() {
        let url = echo_server().await;
        let transport = WsSignalTransport::new(&url, None);

        let mut first = transport.subscribe().await.unwrap();
        let mut second = transport.subscribe().await.unwrap();
        transport.publish(b"hello".to_vec()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), first.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
        let got = tokio::time::timeout(Duration::from_secs(5), second.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn connect_is_shared_and_close_allows_reconnect() {
        let url = echo_server().await;
        let transport = WsSignalTransport::new(&url, None);

        transport.connect().await.unwrap();
        transport.connect().await.unwrap();
        assert!(transport.is_connected().await);

        transport.close().await.unwrap();
        assert!(!transport.is_connected().await);

        let mut rx = transport.subscribe().await.unwrap();
        transport.publish(vec![0xff, 0x00]).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some(vec![0xff, 0x00]));
    }

    #[tokio::test]
    async fn publish_without_server_fails() {
        let transport = WsSignalTransport::new("ws://127.0.0.1:1", None);
        let err = transport.publish(b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, CoreError::Network(_)));
        assert!(!transport.is_connected().await);
    }
}
