//! # handsync-core
//!
//! HANDSYNC 도메인 모델, 포트(trait) 정의, 에러 타입, 설정.
//! 회의 중 손들기 신호 동기화에 쓰이는 모든 crate가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`]: 손들기 상태, 명령, 브로드캐스트 신호, 알림 구조체
//! - [`ports`]: Hexagonal Architecture 포트 인터페이스 (async_trait)
//! - [`error`]: 핵심 에러 타입 (thiserror)
//! - [`config`]: 애플리케이션 설정 구조체
//! - [`config_manager`]: 설정 파일 로드 (첫 실행 시 기본값 저장)
//! - [`observer`]: 콜백 구독 레지스트리

pub mod config;
pub mod config_manager;
pub mod error;
pub mod models;
pub mod observer;
pub mod ports;
