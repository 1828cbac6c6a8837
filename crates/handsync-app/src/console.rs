//! 콘솔 입출력.
//!
//! 표준 입력 한 줄을 세션 명령으로 해석하고, 뷰/알림을 한 줄 요약으로 만든다.

use handsync_core::models::command::AckAction;
use handsync_core::models::hand::{HandStatus, ReconciledView};
use handsync_core::models::notification::{NotificationItem, NotificationPriority};
use handsync_notify::center::NotificationEvent;

/// 콘솔 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Raise,
    Lower,
    Respond {
        participant_id: String,
        action: AckAction,
    },
    ClearAll,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// 한 줄 해석. 빈 줄이면 `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Ok(None);
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "raise" | "r" => ConsoleCommand::Raise,
            "lower" | "l" => ConsoleCommand::Lower,
            "ack" | "deny" => {
                let participant_id = parts
                    .next()
                    .ok_or_else(|| format!("{head}: 참가자 ID가 필요합니다"))?
                    .to_string();
                let action = if head.eq_ignore_ascii_case("ack") {
                    AckAction::Acknowledge
                } else {
                    AckAction::Deny
                };
                ConsoleCommand::Respond {
                    participant_id,
                    action,
                }
            }
            "clear" => ConsoleCommand::ClearAll,
            "status" | "s" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            other => return Err(format!("알 수 없는 명령: {other}")),
        };

        if parts.next().is_some() {
            return Err(format!("{head}: 인자가 너무 많습니다"));
        }
        Ok(Some(command))
    }
}

pub const HELP: &str = "\
명령:
  raise | r          손들기
  lower | l          손내리기
  ack <참가자ID>     손든 참가자 확인 (호스트)
  deny <참가자ID>    손든 참가자 거절 (호스트)
  clear              모든 손 내리기 (호스트)
  status | s         현재 상태
  quit | q           종료";

/// 뷰 요약
pub fn render_view(view: &ReconciledView) -> String {
    if view.hands.is_empty() {
        return format!("[v{}] 손든 참가자 없음", view.version);
    }

    let mut lines = vec![format!("[v{}] 손든 참가자 {}명", view.version, view.live_count())];
    for (i, hand) in view.waiting_queue().iter().enumerate() {
        lines.push(format!(
            "  {}. {} ({}) 대기",
            i + 1,
            display_name(&hand.display_name, &hand.participant_id),
            hand.participant_id
        ));
    }
    for hand in view.hands.values() {
        let label = match hand.status {
            HandStatus::Waiting => continue,
            HandStatus::Acknowledged => "확인됨",
            HandStatus::Denied => "거절됨",
            HandStatus::Lowered => "내림",
        };
        lines.push(format!(
            "  - {} ({}) {label}",
            display_name(&hand.display_name, &hand.participant_id),
            hand.participant_id
        ));
    }
    lines.join("\n")
}

/// 알림 한 줄
pub fn render_notification(item: &NotificationItem) -> String {
    let marker = match item.priority {
        NotificationPriority::High => "!",
        NotificationPriority::Normal => "*",
    };
    if item.message.is_empty() {
        format!("{marker} {}", item.title)
    } else {
        format!("{marker} {}: {}", item.title, item.message)
    }
}

/// 화면에서 사라지는 알림 한 줄. 전달 이벤트는 `render_notification`이 맡는다.
pub fn render_dismissal(event: &NotificationEvent) -> Option<String> {
    match event {
        NotificationEvent::Expired(item) => Some(format!("~ {} (만료)", item.title)),
        NotificationEvent::Evicted(item) => Some(format!("~ {} (밀려남)", item.title)),
        NotificationEvent::Delivered(_) | NotificationEvent::Cleared(_) => None,
    }
}

fn display_name<'a>(name: &'a str, fallback: &'a str) -> &'a str {
    if name.is_empty() {
        fallback
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handsync_core::models::hand::HandState;
    use handsync_core::models::notification::NotificationKind;

    #[test]
    fn parses_commands() {
        assert_eq!(ConsoleCommand::parse("raise"), Ok(Some(ConsoleCommand::Raise)));
        assert_eq!(ConsoleCommand::parse("  L "), Ok(Some(ConsoleCommand::Lower)));
        assert_eq!(ConsoleCommand::parse(""), Ok(None));
        assert_eq!(
            ConsoleCommand::parse("deny p7"),
            Ok(Some(ConsoleCommand::Respond {
                participant_id: "p7".to_string(),
                action: AckAction::Deny,
            }))
        );
        assert_eq!(ConsoleCommand::parse("q"), Ok(Some(ConsoleCommand::Quit)));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(ConsoleCommand::parse("ack").is_err());
        assert!(ConsoleCommand::parse("raise now").is_err());
        assert!(ConsoleCommand::parse("wave").is_err());
    }

    #[test]
    fn renders_queue_in_raise_order() {
        let t0 = chrono::Utc::now();
        let mut view = ReconciledView {
            version: 4,
            ..ReconciledView::default()
        };
        for hand in [
            HandState::waiting("p2", "Bo", t0 + chrono::Duration::seconds(5)),
            HandState::waiting("p1", "Ana", t0),
            HandState::waiting("p3", "", t0).with_status(HandStatus::Acknowledged),
        ] {
            view.hands.insert(hand.participant_id.clone(), hand);
        }

        let text = render_view(&view);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "[v4] 손든 참가자 3명");
        assert_eq!(lines[1], "  1. Ana (p1) 대기");
        assert_eq!(lines[2], "  2. Bo (p2) 대기");
        assert_eq!(lines[3], "  - p3 (p3) 확인됨");
    }

    #[test]
    fn renders_empty_view() {
        assert_eq!(render_view(&ReconciledView::default()), "[v0] 손든 참가자 없음");
    }

    #[test]
    fn renders_dismissals_only_for_expiry_and_eviction() {
        let item = NotificationItem::new(NotificationKind::HandRaised, "손들기", "Ana");
        assert_eq!(
            render_dismissal(&NotificationEvent::Expired(item.clone())).as_deref(),
            Some("~ 손들기 (만료)")
        );
        assert!(render_dismissal(&NotificationEvent::Delivered(item.clone())).is_none());
        assert!(render_dismissal(&NotificationEvent::Cleared(item)).is_none());
    }

    #[test]
    fn renders_notification_marker() {
        let mut item = NotificationItem::new(NotificationKind::HandRaised, "손들기", "Ana");
        assert_eq!(render_notification(&item), "* 손들기: Ana");
        item.priority = NotificationPriority::High;
        item.message.clear();
        assert_eq!(render_notification(&item), "! 손들기");
    }
}
