//! PFT 루프백 데모
//!
//! 인프로세스 채널 쌍으로 엔진 두 개를 연결해 파일을 전송한다.
//! 외부 전송 계층 없이 엔진 동작을 확인하는 용도.
//!
//! 사용법:
//!   cargo run --release --bin pft-loopback -- [OPTIONS] <FILE>...
//!
//! 예시:
//!   # 파일 하나 전송
//!   cargo run --release --bin pft-loopback -- data.bin
//!
//!   # 청크 크기 지정 + 수신 자동 저장
//!   cargo run --release --bin pft-loopback -- --chunk-size 65536 --save data.bin

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pft::channel::LoopbackChannel;
use pft::registry::TransferStatus;
use pft::{Config, Engine};

/// 데모 설정
struct DemoConfig {
    files: Vec<PathBuf>,
    max_message_size: u64,
    save: bool,
    config: Config,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            max_message_size: 1024 * 1024,
            save: false,
            config: Config::default(),
        }
    }
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut demo = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--chunk-size" => {
                if i + 1 < args.len() {
                    demo.config.preferred_chunk_size =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--max-message-size" => {
                if i + 1 < args.len() {
                    demo.max_message_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--download-dir" => {
                if i + 1 < args.len() {
                    demo.config.download_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--save" => {
                demo.save = true;
            }
            "--help" | "-h" => {
                println!("사용법: pft-loopback [--chunk-size N] [--max-message-size N] [--download-dir DIR] [--save] <FILE>...");
                std::process::exit(0);
            }
            other => {
                demo.files.push(PathBuf::from(other));
            }
        }
        i += 1;
    }

    if demo.files.is_empty() {
        eprintln!("전송할 파일을 지정하세요 (--help 참고)");
        std::process::exit(1);
    }

    demo
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("로깅 초기화 실패");

    let demo = parse_args();

    let ((chan_a, inbound_a), (chan_b, inbound_b)) =
        LoopbackChannel::pair(demo.max_message_size);

    let mut recv_config = demo.config.clone();
    recv_config.auto_download = demo.save;

    let sender = Engine::start(chan_a, inbound_a, demo.config);
    let receiver = Engine::start(chan_b, inbound_b, recv_config);

    let ids = sender
        .select_files(demo.files.clone())
        .await
        .expect("파일 큐잉 실패");
    info!("{}개 파일 큐잉", ids.len());

    // 양쪽 모두 종결될 때까지 폴링
    loop {
        tokio::time::sleep(Duration::from_millis(200)).await;

        let views = sender.transfers();
        if views.iter().all(|v| v.status.is_terminal()) {
            break;
        }

        for view in &views {
            if view.status == TransferStatus::Sending {
                info!(
                    "{}: {}% ({} B/s)",
                    view.relative_path, view.progress_percent, view.speed_bps
                );
            }
        }
    }

    // 수신측 드레인 마무리 대기
    tokio::time::sleep(Duration::from_millis(500)).await;

    let sent = sender.metrics();
    let received = receiver.metrics();
    info!("송신 합계: {} bytes", sent.total_sent);
    info!("수신 합계: {} bytes", received.total_received);

    for view in receiver.receives() {
        info!("수신 {}: {}", view.relative_path, view.status_label);
    }
}
