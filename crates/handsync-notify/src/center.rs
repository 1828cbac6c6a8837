//! 알림 센터.
//!
//! [`NotificationQueue`]를 감싸 만료 타이머, 구독자 전달, 이벤트 브로드캐스트를 담당한다.
//! 한 틱(tick) 안에서 쌓인 알림은 한 번에 우선순위 순으로 전달된다.
//! 만료/밀려남/제거는 수명 이벤트 구독자와 이벤트 스트림 양쪽으로 알린다.

use chrono::Utc;
use handsync_core::config::NotificationConfig;
use handsync_core::models::notification::NotificationItem;
use handsync_core::observer::{Subscribers, Subscription};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::queue::{EnqueueOutcome, NotificationQueue};

/// 알림 수명 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// 구독자에게 전달됨
    Delivered(NotificationItem),
    /// TTL 만료로 제거됨
    Expired(NotificationItem),
    /// 용량 초과로 밀려남
    Evicted(NotificationItem),
    /// 명시적으로 제거됨
    Cleared(NotificationItem),
}

struct CenterInner {
    queue: Mutex<NotificationQueue>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    subscribers: Subscribers<NotificationItem>,
    lifecycle: Subscribers<NotificationEvent>,
    events: broadcast::Sender<NotificationEvent>,
    delivery_scheduled: AtomicBool,
    enabled: bool,
}

/// 알림 센터 (복제 가능한 핸들)
///
/// 타이머와 전달 태스크를 tokio 런타임에 띄우므로 런타임 안에서 사용해야 한다.
#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<CenterInner>,
}

impl NotificationCenter {
    pub fn new(config: &NotificationConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(CenterInner {
                queue: Mutex::new(NotificationQueue::new(config.capacity)),
                timers: Mutex::new(HashMap::new()),
                subscribers: Subscribers::new(),
                lifecycle: Subscribers::new(),
                events,
                delivery_scheduled: AtomicBool::new(false),
                enabled: config.enabled,
            }),
        }
    }

    /// 알림 추가. 버려졌으면 `false`.
    pub fn enqueue(&self, item: NotificationItem) -> bool {
        if !self.inner.enabled {
            debug!("알림 비활성화 상태, 무시: {}", item.dedupe_key);
            return false;
        }

        let id = item.id.clone();
        let ttl = item.ttl;
        let persistent = item.persistent;
        let outcome = self.inner.queue.lock().enqueue(item, Utc::now());

        match outcome {
            EnqueueOutcome::Dropped(item) => {
                warn!("알림 큐 가득 참 (모두 고정 알림), 드롭: {}", item.dedupe_key);
                return false;
            }
            EnqueueOutcome::Replaced(previous) => {
                debug!("중복 알림 교체: {}", previous.dedupe_key);
                self.cancel_timer(&previous.id);
            }
            EnqueueOutcome::Evicted(evicted) => {
                debug!("용량 초과로 알림 밀어냄: {}", evicted.dedupe_key);
                self.cancel_timer(&evicted.id);
                Self::emit(&self.inner, NotificationEvent::Evicted(evicted));
            }
            EnqueueOutcome::Inserted => {}
        }

        if !persistent {
            self.schedule_expiry(id, ttl);
        }
        self.schedule_delivery();
        true
    }

    /// 벽시계 기준 만료 항목 일괄 제거
    pub fn dequeue_expired(&self) -> Vec<NotificationItem> {
        let expired = self.inner.queue.lock().dequeue_expired(Utc::now());
        for item in &expired {
            self.cancel_timer(&item.id);
            Self::emit(&self.inner, NotificationEvent::Expired(item.clone()));
        }
        expired
    }

    /// ID로 알림 제거
    pub fn clear(&self, id: &str) -> bool {
        let removed = self.inner.queue.lock().clear(id);
        match removed {
            Some(item) => {
                self.cancel_timer(id);
                Self::emit(&self.inner, NotificationEvent::Cleared(item));
                true
            }
            None => false,
        }
    }

    /// 전체 제거 (고정 알림 포함), 모든 타이머 취소
    pub fn clear_all(&self) {
        let removed = self.inner.queue.lock().clear_all();
        for (_, timer) in self.inner.timers.lock().drain() {
            timer.abort();
        }
        for item in removed {
            Self::emit(&self.inner, NotificationEvent::Cleared(item));
        }
    }

    /// 전달 콜백 등록
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NotificationItem) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(handler)
    }

    /// 수명 이벤트 콜백 등록 (전달, 만료, 밀려남, 제거)
    pub fn subscribe_events<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&NotificationEvent) + Send + Sync + 'static,
    {
        self.inner.lifecycle.subscribe(handler)
    }

    /// 수명 이벤트 스트림
    pub fn events(&self) -> broadcast::Receiver<NotificationEvent> {
        self.inner.events.subscribe()
    }

    /// 미전달 알림을 지금 바로 우선순위 순으로 전달. 전달 건수 반환.
    pub fn deliver_pending(&self) -> usize {
        Self::deliver(&self.inner)
    }

    /// 현재 큐 내용 (삽입 순)
    pub fn snapshot(&self) -> Vec<NotificationItem> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deliver(inner: &CenterInner) -> usize {
        inner.delivery_scheduled.store(false, Ordering::SeqCst);
        let batch = inner.queue.lock().take_deliverable();
        let count = batch.len();
        for item in batch {
            inner.subscribers.notify(&item);
            Self::emit(inner, NotificationEvent::Delivered(item));
        }
        count
    }

    fn emit(inner: &CenterInner, event: NotificationEvent) {
        inner.lifecycle.notify(&event);
        // 수신자가 없으면 보내지 않아도 된다
        let _ = inner.events.send(event);
    }

    fn schedule_delivery(&self) {
        if self.inner.delivery_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            // 같은 틱에 들어온 알림을 모아서 전달
            tokio::task::yield_now().await;
            if let Some(inner) = weak.upgrade() {
                Self::deliver(&inner);
            }
        });
    }

    fn schedule_expiry(&self, id: String, ttl: std::time::Duration) {
        let weak: Weak<CenterInner> = Arc::downgrade(&self.inner);
        let timer_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.timers.lock().remove(&timer_id);
            let expired = inner.queue.lock().clear(&timer_id);
            if let Some(item) = expired {
                debug!("알림 만료: {}", item.dedupe_key);
                Self::emit(&inner, NotificationEvent::Expired(item));
            }
        });
        if let Some(previous) = self.inner.timers.lock().insert(id, handle) {
            previous.abort();
        }
    }

    fn cancel_timer(&self, id: &str) {
        if let Some(timer) = self.inner.timers.lock().remove(id) {
            timer.abort();
        }
    }
}
