//! 세그먼트 리더
//!
//! 파일류 소스를 고정 크기 청크의 지연 시퀀스로 분할한다.
//! 파일 전체를 메모리에 올리지 않고, 다음 청크 하나를 채울 만큼만 버퍼링한다.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

/// 청크 리더
///
/// 마지막 청크를 제외한 모든 청크는 정확히 `chunk_size` 바이트.
/// 읽기 실패는 `SourceRead`로 승격되어 해당 전송을 중단시킨다.
pub struct ChunkReader<R> {
    source: R,
    chunk_size: usize,
    buf: BytesMut,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// 새 청크 리더 생성
    pub fn new(source: R, chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk_size must be positive");
        Self {
            source,
            chunk_size,
            buf: BytesMut::with_capacity(chunk_size * 2),
            eof: false,
        }
    }

    /// 다음 청크 반환. 소진되면 `None`
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        // 버퍼가 청크 하나를 채울 때까지 읽기
        while self.buf.len() < self.chunk_size && !self.eof {
            let n = self
                .source
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| Error::SourceRead {
                    reason: e.to_string(),
                })?;
            if n == 0 {
                self.eof = true;
            }
        }

        if self.buf.len() >= self.chunk_size {
            return Ok(Some(self.buf.split_to(self.chunk_size).freeze()));
        }

        // 마지막 잔여 청크
        if !self.buf.is_empty() {
            return Ok(Some(self.buf.split().freeze()));
        }

        Ok(None)
    }

    /// 설정된 청크 크기
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_chunks(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
        let mut reader = ChunkReader::new(data, chunk_size);
        let mut chunks = Vec::new();
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_exact_multiple() {
        let data = vec![7u8; 300];
        let chunks = collect_chunks(&data, 100).await;

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 100));
    }

    #[tokio::test]
    async fn test_short_final_chunk() {
        let data: Vec<u8> = (0..=255).cycle().take(250).map(|b| b as u8).collect();
        let chunks = collect_chunks(&data, 100).await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 50);

        // 재조립 시 원본과 byte-for-byte 일치
        let rebuilt: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let chunks = collect_chunks(&[], 100).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_million_byte_scenario() {
        // 1,000,000 바이트 / 262144 청크 = 262144 × 3 + 213568
        let data = vec![0xABu8; 1_000_000];
        let chunks = collect_chunks(&data, 262_144).await;

        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![262_144, 262_144, 262_144, 213_568]);
    }
}
