use std::sync::Arc;

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xcrack_slot_racer::api::ApiServer;
use xcrack_slot_racer::config::Config;
use xcrack_slot_racer::core::{Collaborators, Orchestrator};
use xcrack_slot_racer::mocks::is_mock_mode;

fn cli() -> Command {
    Command::new("searcher")
        .version(env!("CARGO_PKG_VERSION"))
        .about("🦀 슬롯 단위 MEV 백런 엔진")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("설정 파일 경로")
                .default_value("config/default.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("로그 레벨 (trace, debug, info, warn, error)")
                .default_value("info"),
        )
        .arg(
            Arg::new("simulation")
                .long("simulation")
                .help("시뮬레이션 모드 (릴레이에 제출하지 않음)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("N")
                .help("평가 워커 수")
                .value_parser(clap::value_parser!(usize)),
        )
}

fn log_filter(level: &str) -> &'static str {
    match level {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn apply_cli(config: &mut Config, matches: &ArgMatches) {
    if matches.get_flag("simulation") {
        warn!("🧪 시뮬레이션 모드 활성화 - 릴레이에 제출하지 않습니다");
        config.relay.simulation_mode = true;
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        info!("👷 워커 수 지정: {}", workers);
        config.engine.workers = Some(*workers);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let matches = cli().get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter(level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config/default.toml");
    info!("📋 설정 파일 로드 중: {}", config_path);

    let mut config = match Config::load_or_default(config_path).await {
        Ok(config) => config,
        Err(e) => {
            error!("❌ 설정 로드 실패: {}", e);
            std::process::exit(1);
        }
    };
    config.apply_env_overrides();
    apply_cli(&mut config, &matches);

    let mock = is_mock_mode();
    if let Err(e) = config.validate(!mock) {
        error!("❌ 설정 검증 실패: {}", e);
        std::process::exit(1);
    }
    info!("✅ 설정 로드 완료 (mock={})", mock);
    let config = Arc::new(config);

    let collaborators = if mock {
        Collaborators::mock(&config).await
    } else {
        Collaborators::connect(&config).await
    };
    let collaborators = match collaborators {
        Ok(collaborators) => collaborators,
        Err(e) => {
            error!("❌ 구성 요소 연결 실패: {}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = match Orchestrator::build(Arc::clone(&config), collaborators).await {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            error!("❌ 엔진 초기화 실패: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = orchestrator.start().await {
        error!("❌ 엔진 시작 실패: {}", e);
        std::process::exit(1);
    }

    ApiServer::new(Arc::clone(&config), Arc::clone(&orchestrator))
        .start()
        .await?;

    let stats_orchestrator = Arc::clone(&orchestrator);
    let interval_secs = config.monitoring.stats_interval_secs.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        interval.tick().await;
        loop {
            interval.tick().await;
            let status = stats_orchestrator.status();
            info!(
                "📊 워커 {}/{} 사용 중, 대기 {}, 제출 {}, 승자 {}, 포함 {}, 미포함 {}, 거절 {}, 다음 시퀀스 {}",
                status.dispatcher.busy_workers,
                status.dispatcher.total_workers,
                status.dispatcher.pending_tasks,
                status.dispatcher.submitted,
                status.dispatcher.winners,
                status.submissions.included,
                status.submissions.not_included,
                status.submissions.rejected,
                status.next_sequence,
            );
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("🛑 종료 신호 수신됨, 안전하게 종료 중...");
            orchestrator.stop().await;
            info!("✅ 엔진이 안전하게 종료되었습니다.");
            std::process::exit(0);
        }
        Err(err) => {
            error!("❌ 신호 처리 오류: {}", err);
            std::process::exit(1);
        }
    }
}

fn print_banner() {
    println!(
        r#"
    ╔══════════════════════════════════════════════════════════════╗
    ║                                                              ║
    ║  🦀 xCrack Slot Racer                                        ║
    ║                                                              ║
    ║  멤풀 이벤트 → 병렬 전략 평가 → 슬롯당 단일 번들 제출       ║
    ║                                                              ║
    ╚══════════════════════════════════════════════════════════════╝
    "#
    );
}
