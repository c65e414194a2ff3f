//! 엔진 설정

use std::path::PathBuf;

use crate::{
    BUFFER_THRESHOLD_FACTOR, DEFAULT_CHUNK_SIZE, MAX_RAM_SINK_SIZE, PROGRESS_INTERVAL_MS,
    PROGRESS_PERCENT_DELTA,
};

/// PFT 엔진 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 선호 청크 크기 (바이트)
    /// 실제 크기는 피어의 최대 메시지 크기에 맞춰 줄어들 수 있음
    pub preferred_chunk_size: usize,

    /// 백프레셔 임계값 배수 (청크 크기 기준)
    pub buffer_threshold_factor: u64,

    /// 진행률 발행 주기 (밀리초)
    pub progress_interval_ms: u64,

    /// 진행률 발행 최소 변화량 (%)
    pub progress_percent_delta: f64,

    /// 메모리 싱크 상한 (바이트)
    /// 선언 크기가 이보다 크면 디스크 스트리밍 싱크 사용
    pub max_ram_sink_size: u64,

    /// 수신 파일 저장 디렉토리
    pub download_dir: PathBuf,

    /// 수신 완료 시 자동 저장 여부
    pub auto_download: bool,

    /// 송신 작업 큐 용량
    pub send_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_chunk_size: DEFAULT_CHUNK_SIZE,       // 256KB
            buffer_threshold_factor: BUFFER_THRESHOLD_FACTOR, // 청크 × 8
            progress_interval_ms: PROGRESS_INTERVAL_MS,     // 500ms
            progress_percent_delta: PROGRESS_PERCENT_DELTA, // 5%
            max_ram_sink_size: MAX_RAM_SINK_SIZE,           // 1.2GiB
            download_dir: std::env::temp_dir().join("pft-downloads"),
            auto_download: false,
            send_queue_capacity: 64,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 유효 청크 크기 계산
    ///
    /// `min(선호 크기, 피어 최대 메시지 크기 × 0.9)` - 프레이밍 헤더 여유분 확보
    pub fn chunk_size_for(&self, peer_max_message_size: u64) -> usize {
        let ceiling = (peer_max_message_size * 9 / 10) as usize;
        self.preferred_chunk_size.min(ceiling).max(1)
    }

    /// 백프레셔 고수위 임계값 (바이트)
    pub fn buffer_threshold(&self, chunk_size: usize) -> u64 {
        chunk_size as u64 * self.buffer_threshold_factor
    }

    /// 저메모리 기기용 설정
    pub fn low_memory() -> Self {
        Self {
            preferred_chunk_size: 64 * 1024,  // 64KB
            buffer_threshold_factor: 4,
            max_ram_sink_size: 128 * 1024 * 1024, // 128MB
            send_queue_capacity: 16,
            ..Self::default()
        }
    }

    /// 고처리량 설정
    pub fn high_throughput() -> Self {
        Self {
            preferred_chunk_size: 1024 * 1024, // 1MB
            buffer_threshold_factor: 16,
            send_queue_capacity: 256,
            ..Self::default()
        }
    }
}
