//! # PFT (Peer File Transfer)
//!
//! 순서 보장 메시지 채널 위의 P2P 파일/디렉토리 전송 엔진
//!
//! ## 핵심 특징
//! - **청크 스트리밍**: 파일 전체를 메모리에 올리지 않고 고정 크기 청크로 분할
//! - **LZ4 압축**: 청크 단위 압축 후 바이너리 프레이밍
//! - **백프레셔**: 채널 버퍼 수위 기반 자동 흐름 제어
//! - **일시정지/재개/취소**: 로컬/원격 동일 게이트로 제어
//! - **단일 송신 워커**: 동시 송신 1개로 메모리 사용량 상한 고정
//! - **transferId 역다중화**: 수신측은 전송별로 독립 조립
//!
//! 피어 발견, 연결 협상, 암호화는 외부 협력자 담당.
//! 엔진은 이미 열린 [`MessageChannel`]을 넘겨받는 것만 가정한다.

pub mod channel;
pub mod chunker;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod packet;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod sink;
pub mod stats;

pub use channel::{ChannelState, Frame, MessageChannel};
pub use chunker::ChunkReader;
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use gate::TransferGate;
pub use packet::ControlMessage;
pub use registry::{Registry, TransferStatus};
pub use sink::ByteSink;
pub use stats::Meta;

/// 전송 식별자 (UUID v4 문자열)
pub type TransferId = String;

/// 기본 선호 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// 백프레셔 임계값 배수 (청크 크기 × 8)
pub const BUFFER_THRESHOLD_FACTOR: u64 = 8;

/// 진행률 발행 주기 (밀리초)
pub const PROGRESS_INTERVAL_MS: u64 = 500;

/// 진행률 발행 최소 변화량 (%)
pub const PROGRESS_PERCENT_DELTA: f64 = 5.0;

/// 메모리 싱크 상한 (1.2 GiB) - 초과 시 디스크 스트리밍
pub const MAX_RAM_SINK_SIZE: u64 = 1_288_490_188;
