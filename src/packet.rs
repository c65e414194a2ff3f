//! 패킷 코덱
//!
//! 데이터는 바이너리 프레임, 제어는 텍스트(JSON) 프레임으로 분리된 이중 채널.
//!
//! 바이너리 프레임 레이아웃 (big-endian):
//! `u32 transferIdLen | transferId (UTF-8) | u32 payloadLen | LZ4 압축 페이로드`

use bytes::{BufMut, Bytes, BytesMut};
use lz4_flex::block::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, TransferId};

/// 제어 메시지 (텍스트 채널, JSON)
///
/// `init`은 수신측 싱크 할당에 필요한 메타데이터를 함께 싣는다.
/// `done`은 대칭성/로깅용 - 수신 완료 판정은 바이트 수 기준이다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    #[serde(rename_all = "camelCase")]
    Init {
        transfer_id: TransferId,
        relative_path: String,
        declared_size: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumbnail: Option<String>,
    },

    /// 청크 헤더 마커 (정보성, 조립에는 관여하지 않음)
    #[serde(rename_all = "camelCase")]
    Chunk { transfer_id: TransferId },

    #[serde(rename_all = "camelCase")]
    Pause { transfer_id: TransferId },

    #[serde(rename_all = "camelCase")]
    Resume { transfer_id: TransferId },

    #[serde(rename_all = "camelCase")]
    Cancel { transfer_id: TransferId },

    #[serde(rename_all = "camelCase")]
    Done { transfer_id: TransferId },
}

impl ControlMessage {
    /// 메시지가 가리키는 transferId
    pub fn transfer_id(&self) -> &str {
        match self {
            ControlMessage::Init { transfer_id, .. }
            | ControlMessage::Chunk { transfer_id }
            | ControlMessage::Pause { transfer_id }
            | ControlMessage::Resume { transfer_id }
            | ControlMessage::Cancel { transfer_id }
            | ControlMessage::Done { transfer_id } => transfer_id,
        }
    }

    /// JSON 직렬화
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// JSON 역직렬화
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("잘못된 제어 메시지: {e}")))
    }
}

/// 청크 압축 (LZ4, 원본 크기 선행 기록)
pub fn compress_chunk(chunk: &[u8]) -> Bytes {
    Bytes::from(compress_prepend_size(chunk))
}

/// 청크 압축 해제
///
/// 실패 시 `Protocol` 에러 - 해당 전송만 error 처리, 엔진은 계속 동작
pub fn decompress_chunk(compressed: &[u8]) -> Result<Bytes> {
    decompress_size_prepended(compressed)
        .map(Bytes::from)
        .map_err(|e| Error::Protocol(format!("압축 해제 실패: {e}")))
}

/// 바이너리 프레임 생성
pub fn encode_packet(transfer_id: &str, payload: &[u8]) -> Bytes {
    let id = transfer_id.as_bytes();
    let mut buf = BytesMut::with_capacity(4 + id.len() + 4 + payload.len());

    buf.put_u32(id.len() as u32);
    buf.put_slice(id);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// 바이너리 프레임 해석
///
/// 반환: `(transferId, 압축 페이로드)` - 압축 해제는 호출자 몫
pub fn decode_packet(frame: &[u8]) -> Result<(TransferId, Bytes)> {
    if frame.len() < 4 {
        return Err(Error::Protocol("프레임이 너무 짧음".into()));
    }

    let id_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let mut offset = 4;

    if frame.len() < offset + id_len + 4 {
        return Err(Error::Protocol("transferId 길이 불일치".into()));
    }

    let transfer_id = std::str::from_utf8(&frame[offset..offset + id_len])
        .map_err(|_| Error::Protocol("transferId가 UTF-8이 아님".into()))?
        .to_owned();
    offset += id_len;

    let payload_len =
        u32::from_be_bytes([frame[offset], frame[offset + 1], frame[offset + 2], frame[offset + 3]])
            as usize;
    offset += 4;

    if frame.len() < offset + payload_len {
        return Err(Error::Protocol("페이로드 길이 불일치".into()));
    }

    let payload = Bytes::copy_from_slice(&frame[offset..offset + payload_len]);
    Ok((transfer_id, payload))
}
