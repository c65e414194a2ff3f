//! 수신 싱크
//!
//! 해제된 청크가 도착 순서대로 기록되는 목적지 추상화.
//! 선언 크기가 메모리 상한 미만이면 메모리 누적, 이상이면 바이트가 메모리에
//! 전부 머무르지 않도록 즉시 열리는 디스크 스트리밍 라이터를 쓴다.

use std::path::{Component, Path, PathBuf};

use bytes::{Bytes, BytesMut};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::warn;

use crate::{Error, Result};

/// 싱크 닫기 결과물
#[derive(Debug)]
pub enum SinkOutput {
    /// 메모리 싱크: 이어붙인 전체 바이트
    Blob(Bytes),

    /// 디스크 싱크: 기록된 파일 경로
    File(PathBuf),
}

/// 바이트 싱크
///
/// 계약: 쓰기는 엄격히 순서대로, 쓰기 실패 후에는 `abort`만 허용
pub enum ByteSink {
    Memory { blocks: Vec<Bytes>, len: u64 },
    Disk { writer: BufWriter<fs::File>, path: PathBuf },
}

impl ByteSink {
    /// 선언 크기에 따라 싱크 선택
    pub async fn for_transfer(
        declared_size: u64,
        max_ram_sink_size: u64,
        download_dir: &Path,
        relative_path: &str,
    ) -> Result<Self> {
        if declared_size < max_ram_sink_size {
            Ok(Self::memory())
        } else {
            Self::disk(download_dir, relative_path).await
        }
    }

    /// 메모리 누적 싱크
    pub fn memory() -> Self {
        ByteSink::Memory {
            blocks: Vec::new(),
            len: 0,
        }
    }

    /// 디스크 스트리밍 싱크. 파일을 즉시 연다
    pub async fn disk(download_dir: &Path, relative_path: &str) -> Result<Self> {
        let path = download_dir.join(sanitize_relative_path(relative_path));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Error::SinkWrite {
                reason: format!("디렉토리 생성 실패: {e}"),
            })?;
        }

        let file = fs::File::create(&path).await.map_err(|e| Error::SinkWrite {
            reason: format!("파일 열기 실패: {e}"),
        })?;

        Ok(ByteSink::Disk {
            writer: BufWriter::new(file),
            path,
        })
    }

    /// 블록 하나 기록 (순서 보장은 호출자 책임)
    pub async fn write(&mut self, block: Bytes) -> Result<()> {
        match self {
            ByteSink::Memory { blocks, len } => {
                *len += block.len() as u64;
                blocks.push(block);
                Ok(())
            }
            ByteSink::Disk { writer, .. } => {
                writer.write_all(&block).await.map_err(|e| Error::SinkWrite {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// 기록된 바이트 수 (메모리 싱크 전용 집계)
    pub fn is_memory(&self) -> bool {
        matches!(self, ByteSink::Memory { .. })
    }

    /// 싱크 닫기. 메모리면 블록을 이어붙여 반환, 디스크면 flush 후 경로 반환
    pub async fn close(self) -> Result<SinkOutput> {
        match self {
            ByteSink::Memory { blocks, len } => {
                let mut all = BytesMut::with_capacity(len as usize);
                for block in blocks {
                    all.extend_from_slice(&block);
                }
                Ok(SinkOutput::Blob(all.freeze()))
            }
            ByteSink::Disk { mut writer, path } => {
                writer.flush().await.map_err(|e| Error::SinkWrite {
                    reason: e.to_string(),
                })?;
                Ok(SinkOutput::File(path))
            }
        }
    }

    /// 싱크 폐기. 디스크 싱크는 부분 파일을 지운다
    pub async fn abort(self) {
        if let ByteSink::Disk { writer, path } = self {
            drop(writer);
            if let Err(e) = fs::remove_file(&path).await {
                warn!("부분 파일 삭제 실패 {:?}: {}", path, e);
            }
        }
    }
}

/// 상대 경로 정리 (상위 탈출/절대 경로 차단)
pub(crate) fn sanitize_relative_path(relative_path: &str) -> PathBuf {
    Path::new(relative_path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}
