//! 에러 타입 정의

use thiserror::Error;

/// PFT 전송 엔진 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 에러: {0}")]
    Json(#[from] serde_json::Error),

    #[error("소스 읽기 실패: {reason}")]
    SourceRead { reason: String },

    #[error("채널 사용 불가 (graceful={graceful})")]
    ChannelUnavailable { graceful: bool },

    #[error("프로토콜 에러: {0}")]
    Protocol(String),

    #[error("싱크 쓰기 실패: {reason}")]
    SinkWrite { reason: String },

    #[error("전송 취소됨: transfer_id={transfer_id}")]
    Canceled { transfer_id: String },

    #[error("알 수 없는 전송: transfer_id={transfer_id}")]
    UnknownTransfer { transfer_id: String },

    #[error("메시지 크기 초과: {size} > max {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("알 수 없는 에러: {0}")]
    Unknown(String),
}

impl Error {
    /// 협력적 취소 여부 (사용자에게 실패로 노출하지 않음)
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled { .. })
    }

    /// 정상 종료된 채널로 인한 중단 여부 (재개 가능)
    pub fn is_graceful_close(&self) -> bool {
        matches!(self, Error::ChannelUnavailable { graceful: true })
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
