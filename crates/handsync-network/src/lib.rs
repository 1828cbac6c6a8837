//! # handsync-network
//!
//! 네트워크 어댑터.
//! [`http_client::HttpBackendClient`]는 `BackendClient` 포트를 reqwest로,
//! [`ws_transport::WsSignalTransport`]는 `SignalTransport` 포트를 tokio-tungstenite로 구현한다.

pub mod http_client;
pub mod ws_transport;

pub use http_client::HttpBackendClient;
pub use ws_transport::WsSignalTransport;
