//! 송신 파이프라인
//!
//! - 동시 송신 정확히 1개 (단일 워커 태스크 + 작업 큐)
//! - 청크 경계마다 취소/정지 게이트 확인
//! - 채널 버퍼 수위 기반 백프레셔
//! - 500ms / 5% 주기 진행률·속도 발행

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncSeekExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::channel::{ChannelState, Frame, MessageChannel};
use crate::chunker::ChunkReader;
use crate::config::Config;
use crate::gate::TransferGate;
use crate::packet::{compress_chunk, encode_packet, ControlMessage};
use crate::registry::{Registry, TransferStatus};
use crate::stats::{Meta, ProgressSampler};
use crate::{Error, Result, TransferId};

/// 송신 작업 (큐 항목)
#[derive(Debug, Clone)]
pub struct SendJob {
    pub transfer_id: TransferId,
    pub source: PathBuf,
    pub relative_path: String,
    pub total_bytes: u64,

    /// 이어 보내기 시작 오프셋 (처음 보내는 전송은 0)
    pub offset: u64,

    pub thumbnail: Option<String>,
}

/// 송신 워커
///
/// 작업 큐를 순서대로 비우며, 활성 작업은 항상 하나뿐이다.
/// 대기 전송의 백프레셔 상태를 고려할 필요가 없어지는 구조.
pub(crate) struct SenderWorker<C: MessageChannel> {
    channel: Arc<C>,
    config: Config,
    registry: Arc<Registry>,
    meta: Arc<Meta>,
    gates: Arc<DashMap<TransferId, Arc<TransferGate>>>,
}

impl<C: MessageChannel> SenderWorker<C> {
    pub fn new(
        channel: Arc<C>,
        config: Config,
        registry: Arc<Registry>,
        meta: Arc<Meta>,
        gates: Arc<DashMap<TransferId, Arc<TransferGate>>>,
    ) -> Self {
        Self {
            channel,
            config,
            registry,
            meta,
            gates,
        }
    }

    /// 워커 기동. 반환된 송신기로 작업을 넣는다
    pub fn spawn(self) -> mpsc::Sender<SendJob> {
        let (job_tx, mut job_rx) = mpsc::channel::<SendJob>(self.config.send_queue_capacity);

        tokio::spawn(async move {
            while let Some(job) = job_rx.recv().await {
                self.run_job(job).await;
            }
            debug!("송신 워커 종료");
        });

        job_tx
    }

    /// 작업 하나 실행. 에러는 해당 전송 기록에만 반영된다
    async fn run_job(&self, job: SendJob) {
        let id = job.transfer_id.clone();

        let gate = match self.gates.get(&id) {
            Some(g) => g.clone(),
            None => {
                warn!("게이트 없는 작업 무시: {}", id);
                return;
            }
        };

        // 큐 대기 중 취소된 작업
        if gate.is_canceled() {
            self.registry.set_send_status(&id, TransferStatus::Canceled);
            self.gates.remove(&id);
            return;
        }

        // 채널이 닫혀 있으면 재연결 때까지 보류
        if self.channel.state() != ChannelState::Open {
            self.registry.set_send_status(&id, TransferStatus::Paused);
            self.gates.remove(&id);
            return;
        }

        self.registry.set_send_status(&id, TransferStatus::Sending);

        match self.send_file(&job, &gate).await {
            Ok(()) => {
                info!("전송 완료: {} ({} bytes)", job.relative_path, job.total_bytes);
            }
            Err(e) if e.is_canceled() => {
                debug!("전송 취소: {}", id);
            }
            Err(e) if e.is_graceful_close() => {
                // 채널 정상 종료 - 재연결 시 이어갈 수 있도록 paused
                self.registry.set_send_status(&id, TransferStatus::Paused);
                debug!("채널 종료로 전송 보류: {}", id);
            }
            Err(e) => {
                warn!("전송 실패 {}: {}", id, e);
                self.registry.set_send_status(&id, TransferStatus::Error);
            }
        }

        // 작업이 끝난 게이트는 회수한다. 재개는 새 게이트로 재큐잉된다
        self.gates.remove(&id);
    }

    /// 청크 루프 본체
    async fn send_file(&self, job: &SendJob, gate: &TransferGate) -> Result<()> {
        let id = &job.transfer_id;

        let chunk_size = self.config.chunk_size_for(self.channel.max_message_size());
        let threshold = self.config.buffer_threshold(chunk_size);

        let mut file = fs::File::open(&job.source).await.map_err(|e| Error::SourceRead {
            reason: format!("{:?}: {e}", job.source),
        })?;

        // 이어 보내기: 이미 수신측에 도착한 구간은 건너뛴다
        if job.offset > 0 {
            file.seek(SeekFrom::Start(job.offset))
                .await
                .map_err(|e| Error::SourceRead {
                    reason: format!("seek 실패 {:?}: {e}", job.source),
                })?;
        }
        let mut reader = ChunkReader::new(file, chunk_size);

        self.send_control(&ControlMessage::Init {
            transfer_id: id.clone(),
            relative_path: job.relative_path.clone(),
            declared_size: job.total_bytes,
            thumbnail: job.thumbnail.clone(),
        })?;

        let mut sent: u64 = job.offset;
        let mut sampler = ProgressSampler::new(
            job.total_bytes,
            self.config.progress_interval_ms,
            self.config.progress_percent_delta,
        );
        if job.offset > 0 {
            sampler.resume_from(job.offset);
        }

        while let Some(chunk) = reader.next_chunk().await? {
            // 취소는 청크 경계에서 협력적으로 확인
            if gate.is_canceled() {
                return self.abort_canceled(id);
            }

            // 정지 - 게이트 시그널이 올 때까지 잠든다 (타임아웃 없음)
            if let Some(resume_rx) = gate.resume_signal() {
                self.send_control(&ControlMessage::Pause {
                    transfer_id: id.clone(),
                })?;
                self.registry.set_send_status(id, TransferStatus::Paused);

                let _ = resume_rx.await;

                if gate.is_canceled() {
                    return self.abort_canceled(id);
                }

                self.send_control(&ControlMessage::Resume {
                    transfer_id: id.clone(),
                })?;
                self.registry.set_send_status(id, TransferStatus::Sending);
            }

            // 백프레셔 - 버퍼가 저수위로 내려올 때까지 대기
            self.wait_buffer_drain(threshold).await?;

            if self.channel.state() != ChannelState::Open {
                return Err(Error::ChannelUnavailable {
                    graceful: self.channel.state() == ChannelState::Closed,
                });
            }

            let compressed = compress_chunk(&chunk);
            let frame = encode_packet(id, &compressed);
            self.channel.send(Frame::Binary(frame))?;

            sent += chunk.len() as u64;
            self.registry.update_send(id, |r| r.bytes_sent = sent);

            if let Some(sample) = sampler.sample(sent) {
                self.registry.update_send(id, |r| r.speed_bps = sample.speed_bps);
                self.meta.set_speed(sample.speed_bps);
                debug!(
                    "진행률 {}: {}% ({} B/s)",
                    id, sample.percent, sample.speed_bps
                );
            }
        }

        self.send_control(&ControlMessage::Done {
            transfer_id: id.clone(),
        })?;
        self.registry.update_send(id, |r| {
            if !r.status.is_terminal() {
                r.status = TransferStatus::Done;
                r.bytes_sent = job.total_bytes;
            }
        });
        self.meta.add_sent(job.total_bytes);

        Ok(())
    }

    /// 취소 마무리: 원격 통지 후 Canceled로 되감기
    fn abort_canceled(&self, transfer_id: &str) -> Result<()> {
        // 채널이 죽어 있어도 취소 자체는 성립한다
        let _ = self.send_control(&ControlMessage::Cancel {
            transfer_id: transfer_id.to_owned(),
        });
        self.registry.set_send_status(transfer_id, TransferStatus::Canceled);
        Err(Error::Canceled {
            transfer_id: transfer_id.to_owned(),
        })
    }

    /// 버퍼 수위가 임계값 이하로 내려올 때까지 대기
    async fn wait_buffer_drain(&self, threshold: u64) -> Result<()> {
        if self.channel.buffered_amount() <= threshold {
            return Ok(());
        }

        let mut buffered_rx = self.channel.watch_buffered();
        let mut state_rx = self.channel.watch_state();
        loop {
            if self.channel.buffered_amount() <= threshold {
                return Ok(());
            }
            if self.channel.state() != ChannelState::Open {
                return Err(Error::ChannelUnavailable {
                    graceful: self.channel.state() == ChannelState::Closed,
                });
            }

            // 수위 하락 또는 채널 상태 변화 중 먼저 오는 쪽에 깨어난다
            tokio::select! {
                changed = buffered_rx.changed() => {
                    if changed.is_err() {
                        return Err(Error::ChannelUnavailable { graceful: false });
                    }
                }
                _ = state_rx.changed() => {}
            }
        }
    }

    fn send_control(&self, msg: &ControlMessage) -> Result<()> {
        self.channel.send(Frame::Text(msg.to_json()?))
    }
}
