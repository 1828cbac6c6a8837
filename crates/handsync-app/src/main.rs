//! # handsync-app
//!
//! HANDSYNC 클라이언트 바이너리 진입점.
//! 설정 로드, 어댑터 조립, 세션 라이프사이클과 콘솔 명령 처리.

mod console;
mod lifecycle;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use handsync_core::config::AppConfig;
use handsync_core::config_manager::ConfigManager;
use handsync_core::models::command::Actor;
use handsync_core::ports::backend::BackendClient;
use handsync_core::ports::signal_transport::SignalTransport;
use handsync_network::{HttpBackendClient, WsSignalTransport};
use handsync_session::bus::LocalSignalBus;
use handsync_session::{CommandError, MeetingSession, ReceiptOutcome, SessionPhase};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::console::{render_dismissal, render_notification, render_view, ConsoleCommand, HELP};
use crate::lifecycle::LifecycleManager;

/// HANDSYNC 손들기 동기화 클라이언트
#[derive(Parser, Debug)]
#[command(name = "handsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 회의 ID
    #[arg(long, short = 'm')]
    meeting: String,

    /// 내 참가자 ID
    #[arg(long, short = 'p')]
    participant: String,

    /// 표시 이름 (기본: 참가자 ID)
    #[arg(long, short = 'n')]
    name: Option<String>,

    /// 호스트로 참여
    #[arg(long)]
    host: bool,

    /// 서버 URL (기본: 설정 파일 값)
    #[arg(long, short = 's')]
    server: Option<String>,

    /// 브로드캐스트 WebSocket URL (없으면 프로세스 내 버스)
    #[arg(long)]
    signal_url: Option<String>,

    /// 폴링 간격 (밀리초)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

impl Args {
    fn actor(&self) -> Actor {
        let name = self.name.clone().unwrap_or_else(|| self.participant.clone());
        if self.host {
            Actor::host(&self.participant, name)
        } else {
            Actor::participant(&self.participant, name)
        }
    }

    /// 명령줄 값으로 설정 덮어쓰기 (파일에는 저장하지 않음)
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(server) = &self.server {
            config.server.base_url = server.clone();
        }
        if let Some(url) = &self.signal_url {
            config.server.signal_url = Some(url.clone());
        }
        if let Some(ms) = self.poll_interval {
            config.sync.poll_interval_ms = ms;
        }
    }
}

/// 설정 로드. 설정 파일을 쓸 수 없으면 기본 설정으로 진행한다.
fn load_config(path: Option<PathBuf>) -> AppConfig {
    let manager = match path {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(),
    };
    match manager {
        Ok(manager) => {
            if manager.was_created() {
                info!(
                    "첫 실행: 기본 설정으로 시작합니다 (서버 주소는 {}에서 바꿀 수 있습니다)",
                    manager.config_path().display()
                );
            } else {
                info!("설정 파일: {}", manager.config_path().display());
            }
            manager.get()
        }
        Err(e) => {
            warn!("설정 로드 실패, 기본 설정 사용: {e}");
            AppConfig::default_config()
        }
    }
}

fn build_transport(config: &AppConfig) -> Arc<dyn SignalTransport> {
    match &config.server.signal_url {
        Some(url) => Arc::new(WsSignalTransport::new(
            url,
            config.server.api_token.as_deref(),
        )),
        None => {
            info!("신호 URL 없음, 프로세스 내 버스 사용");
            Arc::new(LocalSignalBus::default())
        }
    }
}

/// 콘솔 명령 하나 실행. 종료 요청이면 false.
async fn run_command(session: &MeetingSession, command: ConsoleCommand) -> bool {
    let result = match command {
        ConsoleCommand::Raise => session.raise().await,
        ConsoleCommand::Lower => session.lower().await,
        ConsoleCommand::Respond {
            participant_id,
            action,
        } => session.acknowledge(&participant_id, action).await,
        ConsoleCommand::ClearAll => session.clear_all().await,
        ConsoleCommand::Status => {
            println!("{}", render_view(&session.view()));
            return true;
        }
        ConsoleCommand::Help => {
            println!("{HELP}");
            return true;
        }
        ConsoleCommand::Quit => return false,
    };

    match result {
        Ok(receipt) => match receipt.outcome {
            ReceiptOutcome::Duplicate => println!("이미 처리 중인 명령입니다"),
            ReceiptOutcome::Confirmed | ReceiptOutcome::Corrected => {
                info!("명령 완료: v{} ({:?})", receipt.version, receipt.outcome)
            }
        },
        Err(CommandError::NotPermitted(what)) => println!("권한 없음: {what}"),
        Err(CommandError::SessionInactive) => println!("세션이 활성 상태가 아닙니다"),
        // 나머지 실패는 알림으로 표시된다
        Err(e) => warn!("명령 실패: {e}"),
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_filter = format!(
        "handsync={level},handsync_app={level},handsync_core={level},handsync_session={level},handsync_notify={level},handsync_network={level}",
        level = args.log_level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();

    let mut config = load_config(args.config.clone());
    args.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow!("설정 오류: {e}"))?;

    let actor = args.actor();
    info!(
        "HANDSYNC 시작: meeting={}, participant={} ({:?})",
        args.meeting, actor.participant_id, actor.role
    );

    let backend: Arc<dyn BackendClient> = Arc::new(
        HttpBackendClient::from_config(&config.server).context("HTTP 클라이언트 생성 실패")?,
    );
    let transport = build_transport(&config);
    let session = MeetingSession::new(args.meeting.clone(), actor, config, backend, transport);

    let _views = session.on_state_change(|view| println!("{}", render_view(view)));
    let _alerts = session.on_notification(|item| println!("{}", render_notification(item)));
    let _dismissals = session.on_notification_event(|event| {
        if let Some(line) = render_dismissal(event) {
            println!("{line}");
        }
    });

    session
        .initialize()
        .await
        .context("세션 시작 실패")?;
    println!("{HELP}");

    let lifecycle = Arc::new(LifecycleManager::new());
    {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move { lifecycle.wait_for_signal().await });
    }

    let mut shutdown_rx = lifecycle.subscribe();
    let mut phase_rx = session.watch_phase();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                        Ok(Some(command)) => {
                            if !run_command(&session, command).await {
                                lifecycle.shutdown();
                            }
                        }
                        Ok(None) => {}
                        Err(msg) => println!("{msg}"),
                    },
                    Ok(None) => {
                        info!("입력 종료");
                        lifecycle.shutdown();
                    }
                    Err(e) => {
                        error!("입력 읽기 실패: {e}");
                        lifecycle.shutdown();
                    }
                }
            }
            changed = phase_rx.changed() => {
                if changed.is_err() || *phase_rx.borrow_and_update() == SessionPhase::Closed {
                    // 서버 쪽 세션 종료로 정리됨
                    info!("세션이 종료되었습니다");
                    break;
                }
            }
            _ = shutdown_rx.changed() => {}
        }

        if lifecycle.is_shutting_down() {
            break;
        }
    }

    session.cleanup().await;
    info!("HANDSYNC 종료");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["handsync", "--meeting", "m1", "--participant", "p1"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn actor_defaults_to_participant_named_by_id() {
        let actor = args(&[]).actor();
        assert_eq!(actor.display_name, "p1");
        assert!(!actor.is_host());
    }

    #[test]
    fn host_flag_and_name() {
        let actor = args(&["--host", "--name", "Ana"]).actor();
        assert!(actor.is_host());
        assert_eq!(actor.display_name, "Ana");
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut config = AppConfig::default_config();
        args(&[
            "--server",
            "http://api.test",
            "--signal-url",
            "ws://sig.test",
            "--poll-interval",
            "1500",
        ])
        .apply_overrides(&mut config);

        assert_eq!(config.server.base_url, "http://api.test");
        assert_eq!(config.server.signal_url.as_deref(), Some("ws://sig.test"));
        assert_eq!(config.sync.poll_interval_ms, 1500);
    }

    #[test]
    fn load_config_creates_file_at_given_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = load_config(Some(path.clone()));
        assert!(path.exists());
        assert_eq!(
            config.sync.poll_interval_ms,
            AppConfig::default_config().sync.poll_interval_ms
        );
    }
}
