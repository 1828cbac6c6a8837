//! 세션 활성 플래그.
//!
//! 비동기 작업은 await 이후 상태를 바꾸기 전에 반드시 [`SessionGate::is_open`]을 확인한다.
//! 정리(cleanup) 후에 끝난 요청이 뷰를 건드리지 않게 하기 위함이다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    open: Arc<AtomicBool>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
