//! 사용자 알림 모델.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 알림 기본 표시 시간
pub const DEFAULT_NOTIFICATION_TTL: Duration = Duration::from_secs(5);

/// 알림 우선순위
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    #[default]
    Normal,
    High,
}

/// 알림 유형
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    HandRaised,
    HandLowered,
    HandAcknowledged,
    HandDenied,
    HandsCleared,
    CommandFailed,
    SessionEnded,
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::HandRaised => "hand_raised",
            NotificationKind::HandLowered => "hand_lowered",
            NotificationKind::HandAcknowledged => "hand_acknowledged",
            NotificationKind::HandDenied => "hand_denied",
            NotificationKind::HandsCleared => "hands_cleared",
            NotificationKind::CommandFailed => "command_failed",
            NotificationKind::SessionEnded => "session_ended",
            NotificationKind::Info => "info",
        }
    }
}

/// 사용자에게 보여줄 알림 한 건
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationItem {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// 표시 유지 시간 (persistent면 무시)
    #[serde(with = "ttl_millis")]
    pub ttl: Duration,
    #[serde(default)]
    pub priority: NotificationPriority,
    /// true면 만료/용량 초과로 제거되지 않음
    #[serde(default)]
    pub persistent: bool,
    /// 같은 사건에 대한 중복 알림을 하나로 묶는 키
    pub dedupe_key: String,
}

impl NotificationItem {
    /// 새 알림 생성. 중복 키는 유형 이름으로 시작한다.
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: format!("ntf_{}", uuid::Uuid::new_v4().simple()),
            kind,
            title: title.into(),
            message: message.into(),
            created_at: Utc::now(),
            ttl: DEFAULT_NOTIFICATION_TTL,
            priority: NotificationPriority::Normal,
            persistent: false,
            dedupe_key: kind.as_str().to_string(),
        }
    }

    /// 관련 엔티티 ID로 중복 키 지정 (`<kind>:<entity>`)
    pub fn for_entity(mut self, entity_id: &str) -> Self {
        self.dedupe_key = format!("{}:{}", self.kind.as_str(), entity_id);
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// 만료 시각 (persistent면 None)
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.persistent {
            return None;
        }
        // 표현 범위를 넘는 TTL은 만료 없음으로 취급
        let ttl = chrono::Duration::from_std(self.ttl).ok()?;
        self.created_at.checked_add_signed(ttl)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }
}

mod ttl_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_key_includes_entity() {
        let item = NotificationItem::new(NotificationKind::HandRaised, "손들기", "Ana").for_entity("p1");
        assert_eq!(item.dedupe_key, "hand_raised:p1");
        let plain = NotificationItem::new(NotificationKind::HandsCleared, "정리", "");
        assert_eq!(plain.dedupe_key, "hands_cleared");
    }

    #[test]
    fn expiry_respects_persistence() {
        let now = Utc::now();
        let item = NotificationItem::new(NotificationKind::Info, "t", "m")
            .created_at(now)
            .with_ttl(Duration::from_secs(2));
        assert!(!item.is_expired(now + chrono::Duration::seconds(1)));
        assert!(item.is_expired(now + chrono::Duration::seconds(2)));

        let sticky = item.clone().persistent();
        assert!(sticky.expires_at().is_none());
        assert!(!sticky.is_expired(now + chrono::Duration::days(1)));
    }

    #[test]
    fn ttl_serialized_as_millis() {
        let item = NotificationItem::new(NotificationKind::Info, "t", "m")
            .with_ttl(Duration::from_millis(1500))
            .with_priority(NotificationPriority::High);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["ttl"], 1500);
        assert_eq!(json["priority"], "high");
    }

    #[test]
    fn priority_ordering() {
        assert!(NotificationPriority::High > NotificationPriority::Normal);
    }
}
