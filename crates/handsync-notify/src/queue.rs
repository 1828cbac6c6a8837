//! 알림 큐.
//!
//! 용량 제한 + 중복 키 기반 교체 + 우선순위 전달 순서.
//! 시계는 호출자가 주입한다 (`now` 인자).

use chrono::{DateTime, Utc};
use handsync_core::models::notification::NotificationItem;
use std::cmp::Reverse;

/// 기본 용량
pub const DEFAULT_CAPACITY: usize = 5;

/// enqueue 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 새로 추가됨
    Inserted,
    /// 같은 중복 키의 기존 항목을 교체함 (기존 항목 반환)
    Replaced(NotificationItem),
    /// 용량 초과로 가장 오래된 일반 항목을 밀어냄 (밀려난 항목 반환)
    Evicted(NotificationItem),
    /// 모든 항목이 고정(persistent)이라 새 항목을 버림
    Dropped(NotificationItem),
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::Dropped(_))
    }
}

#[derive(Debug, Clone)]
struct QueuedNotification {
    item: NotificationItem,
    /// 삽입 순번 (같은 시각 항목의 순서 결정)
    seq: u64,
    delivered: bool,
}

/// 알림 큐 (최대 용량 제한)
#[derive(Debug)]
pub struct NotificationQueue {
    entries: Vec<QueuedNotification>,
    capacity: usize,
    next_seq: u64,
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationQueue {
    /// 새 큐 생성 (0이면 1로 보정)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    /// 알림 추가
    ///
    /// `created_at`은 `now`로 갱신된다. 만료되지 않은 같은 중복 키 항목이 있으면 교체하고,
    /// 가득 찼으면 가장 오래된 일반 항목을 밀어낸다.
    pub fn enqueue(&mut self, mut item: NotificationItem, now: DateTime<Utc>) -> EnqueueOutcome {
        item.created_at = now;
        let seq = self.next_seq;
        self.next_seq += 1;
        let fresh = QueuedNotification {
            item,
            seq,
            delivered: false,
        };

        if let Some(pos) = self.entries.iter().position(|e| {
            e.item.dedupe_key == fresh.item.dedupe_key && !e.item.is_expired(now)
        }) {
            let previous = std::mem::replace(&mut self.entries[pos], fresh);
            return EnqueueOutcome::Replaced(previous.item);
        }

        if self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.item.persistent)
                .min_by_key(|(_, e)| (e.item.created_at, e.seq))
                .map(|(i, _)| i);

            return match oldest {
                Some(pos) => {
                    let evicted = self.entries.remove(pos);
                    self.entries.push(fresh);
                    EnqueueOutcome::Evicted(evicted.item)
                }
                None => EnqueueOutcome::Dropped(fresh.item),
            };
        }

        self.entries.push(fresh);
        EnqueueOutcome::Inserted
    }

    /// 만료된 항목 제거 후 반환
    pub fn dequeue_expired(&mut self, now: DateTime<Utc>) -> Vec<NotificationItem> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.item.is_expired(now));
        self.entries = kept;
        expired.into_iter().map(|e| e.item).collect()
    }

    /// ID로 항목 제거
    pub fn clear(&mut self, id: &str) -> Option<NotificationItem> {
        let pos = self.entries.iter().position(|e| e.item.id == id)?;
        Some(self.entries.remove(pos).item)
    }

    /// 고정 항목 포함 전부 제거
    pub fn clear_all(&mut self) -> Vec<NotificationItem> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|e| e.item)
            .collect()
    }

    /// 아직 전달되지 않은 항목을 전달 순서대로 꺼내고 전달됨으로 표시
    ///
    /// High가 먼저, 같은 우선순위는 생성 순. 이미 전달된 항목은 다시 나오지 않는다.
    pub fn take_deliverable(&mut self) -> Vec<NotificationItem> {
        let mut pending: Vec<&mut QueuedNotification> =
            self.entries.iter_mut().filter(|e| !e.delivered).collect();
        pending.sort_by_key(|e| (Reverse(e.item.priority), e.item.created_at, e.seq));
        pending
            .into_iter()
            .map(|e| {
                e.delivered = true;
                e.item.clone()
            })
            .collect()
    }

    /// 삽입 순서대로 현재 항목 조회
    pub fn iter(&self) -> impl Iterator<Item = &NotificationItem> {
        self.entries.iter().map(|e| &e.item)
    }

    pub fn get(&self, id: &str) -> Option<&NotificationItem> {
        self.iter().find(|item| item.id == id)
    }

    pub fn find_by_key(&self, dedupe_key: &str) -> Option<&NotificationItem> {
        self.iter().find(|item| item.dedupe_key == dedupe_key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
