//! 수신 재조립 엔진
//!
//! 인바운드 메시지를 transferId로 역다중화한다. 전송별 상태는 독립적이라
//! 한 전송의 에러가 다른 전송을 중단시키지 않는다.
//!
//! - 바이너리 프레임: 디코드 → 압축 해제 → 대기 큐 적재 → 드레인 태스크 기동
//! - 드레인: 도착 순서 그대로 싱크에 순차 기록 (전송당 드레인 1개,
//!   서로 다른 전송은 동시 진행)
//! - 완료 판정: 수신 바이트 ≥ 선언 크기 (done 메시지가 아님)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::gate::TransferGate;
use crate::packet::{decode_packet, decompress_chunk, ControlMessage};
use crate::registry::{RecvPayload, RecvRecord, Registry, TransferStatus};
use crate::sink::{sanitize_relative_path, ByteSink, SinkOutput};
use crate::stats::{Meta, ProgressSampler};
use crate::TransferId;

/// 수신 중인 전송의 작업 상태
///
/// 전송이 활성인 동안만 존재하고 완료/취소/에러 시 파기된다.
struct IncomingStream {
    declared_size: u64,
    relative_path: String,
    received: AtomicU64,

    /// 도착했지만 아직 기록되지 않은 해제 블록 (도착 순서 유지)
    pending: Mutex<VecDeque<Bytes>>,

    /// 드레인 루프 재진입 방지 플래그
    draining: AtomicBool,

    canceled: AtomicBool,

    /// None이면 이미 닫혔거나 폐기됨
    sink: AsyncMutex<Option<ByteSink>>,

    sampler: Mutex<ProgressSampler>,
}

/// 수신 재조립 엔진
pub(crate) struct ReceiverEngine {
    config: Config,
    registry: Arc<Registry>,
    meta: Arc<Meta>,
    gates: Arc<DashMap<TransferId, Arc<TransferGate>>>,
    incoming: DashMap<TransferId, Arc<IncomingStream>>,

    /// 자동 저장 설정 (UI에서 실시간 토글)
    auto_download: Arc<AtomicBool>,
}

impl ReceiverEngine {
    pub fn new(
        config: Config,
        registry: Arc<Registry>,
        meta: Arc<Meta>,
        gates: Arc<DashMap<TransferId, Arc<TransferGate>>>,
        auto_download: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            registry,
            meta,
            gates,
            incoming: DashMap::new(),
            auto_download,
        }
    }

    /// 텍스트 프레임 (제어 메시지) 처리
    pub async fn handle_control(self: &Arc<Self>, msg: ControlMessage) {
        match msg {
            ControlMessage::Init {
                transfer_id,
                relative_path,
                declared_size,
                thumbnail,
            } => {
                self.handle_init(transfer_id, relative_path, declared_size, thumbnail)
                    .await;
            }

            ControlMessage::Chunk { transfer_id } => {
                // 정보성 마커 - 조립은 바이너리 프레임의 id로 이미 결정된다
                debug!("청크 헤더 수신: {}", transfer_id);
            }

            ControlMessage::Pause { transfer_id } => {
                // 상태 미러링일 뿐, 바이트 흐름은 송신측이 멈춘다
                self.registry.update_recv(&transfer_id, |r| {
                    if r.status == TransferStatus::Receiving {
                        r.status = TransferStatus::Paused;
                    }
                });
            }

            ControlMessage::Resume { transfer_id } => {
                self.registry.update_recv(&transfer_id, |r| {
                    if r.status == TransferStatus::Paused {
                        r.status = TransferStatus::Receiving;
                    }
                });
            }

            ControlMessage::Cancel { transfer_id } => {
                self.handle_cancel(&transfer_id).await;
            }

            ControlMessage::Done { transfer_id } => {
                // 완료 판정은 바이트 수 기준 - 대칭성/로깅용 no-op
                debug!("done 수신: {}", transfer_id);
            }
        }
    }

    /// 바이너리 프레임 (데이터 패킷) 처리
    pub async fn handle_packet(self: &Arc<Self>, frame: &[u8]) {
        let (transfer_id, compressed) = match decode_packet(frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                // transferId를 알 수 없는 프레임은 버린다
                warn!("프레임 해석 실패: {}", e);
                return;
            }
        };

        let stream = match self.incoming.get(&transfer_id) {
            Some(s) => s.clone(),
            None => {
                debug!("알 수 없는 전송의 패킷 무시: {}", transfer_id);
                return;
            }
        };

        let block = match decompress_chunk(&compressed) {
            Ok(b) => b,
            Err(e) => {
                warn!("압축 해제 실패 {}: {}", transfer_id, e);
                self.fail_stream(&transfer_id, &stream).await;
                return;
            }
        };

        stream.pending.lock().push_back(block);
        self.maybe_spawn_drain(&transfer_id, &stream);
    }

    async fn handle_init(
        self: &Arc<Self>,
        transfer_id: TransferId,
        relative_path: String,
        declared_size: u64,
        thumbnail: Option<String>,
    ) {
        if self.incoming.contains_key(&transfer_id) {
            warn!("중복 init 무시: {}", transfer_id);
            return;
        }

        let sink = match ByteSink::for_transfer(
            declared_size,
            self.config.max_ram_sink_size,
            &self.config.download_dir,
            &relative_path,
        )
        .await
        {
            Ok(sink) => sink,
            Err(e) => {
                warn!("싱크 할당 실패 {}: {}", transfer_id, e);
                self.registry.push_recv(RecvRecord {
                    transfer_id,
                    relative_path,
                    declared_size,
                    bytes_received: 0,
                    status: TransferStatus::Error,
                    thumbnail,
                    payload: None,
                });
                return;
            }
        };

        info!(
            "수신 시작: {} ({} bytes, {} 싱크)",
            relative_path,
            declared_size,
            if sink.is_memory() { "메모리" } else { "디스크" }
        );

        let stream = Arc::new(IncomingStream {
            declared_size,
            relative_path: relative_path.clone(),
            received: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            sink: AsyncMutex::new(Some(sink)),
            sampler: Mutex::new(ProgressSampler::new(
                declared_size,
                self.config.progress_interval_ms,
                self.config.progress_percent_delta,
            )),
        });
        self.incoming.insert(transfer_id.clone(), stream.clone());

        self.registry.push_recv(RecvRecord {
            transfer_id: transfer_id.clone(),
            relative_path,
            declared_size,
            bytes_received: 0,
            status: TransferStatus::Receiving,
            thumbnail,
            payload: None,
        });

        // 빈 파일은 바이너리 프레임이 오지 않으므로 init 시점에 바로 완료
        if declared_size == 0 {
            self.finish_stream(&transfer_id, &stream, 0).await;
        }
    }

    /// cancel 제어 메시지 양방향 처리
    async fn handle_cancel(self: &Arc<Self>, transfer_id: &str) {
        // 우리가 수신자인 경우: 스트림 폐기
        if let Some((_, stream)) = self.incoming.remove(transfer_id) {
            self.discard_stream(&stream).await;
            self.registry.set_recv_status(transfer_id, TransferStatus::Canceled);
            info!("수신 취소됨 (원격): {}", transfer_id);
            return;
        }

        // 우리가 송신자인 경우: 게이트에 취소 표시 → 송신 루프가 되감기
        if let Some(gate) = self.gates.get(transfer_id) {
            gate.cancel();
            self.registry.set_send_status(transfer_id, TransferStatus::Canceled);
            info!("송신 취소됨 (원격): {}", transfer_id);
        }
    }

    /// 로컬 수신 취소 (UI 진입점에서 호출)
    pub async fn cancel_incoming(&self, transfer_id: &str) -> bool {
        if let Some((_, stream)) = self.incoming.remove(transfer_id) {
            self.discard_stream(&stream).await;
            self.registry.set_recv_status(transfer_id, TransferStatus::Canceled);
            true
        } else {
            false
        }
    }

    /// 모든 수신 스트림 폐기 (reset 전용)
    pub async fn abort_all(&self) {
        let ids: Vec<TransferId> = self.incoming.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, stream)) = self.incoming.remove(&id) {
                self.discard_stream(&stream).await;
            }
        }
    }

    fn maybe_spawn_drain(self: &Arc<Self>, transfer_id: &str, stream: &Arc<IncomingStream>) {
        if stream
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let this = self.clone();
            let stream = stream.clone();
            let id = transfer_id.to_owned();
            tokio::spawn(async move {
                this.drain(&id, &stream).await;
            });
        }
    }

    /// 드레인 루프: 대기 큐를 도착 순서대로 싱크에 기록
    async fn drain(self: &Arc<Self>, transfer_id: &str, stream: &Arc<IncomingStream>) {
        loop {
            if stream.canceled.load(Ordering::Acquire) {
                stream.draining.store(false, Ordering::Release);
                return;
            }

            let block = stream.pending.lock().pop_front();
            let Some(block) = block else {
                stream.draining.store(false, Ordering::Release);
                // 플래그를 내리는 사이 새 블록이 도착했으면 이어서 처리
                if !stream.pending.lock().is_empty()
                    && stream
                        .draining
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    continue;
                }
                return;
            };

            let block_len = block.len() as u64;
            {
                let mut sink_guard = stream.sink.lock().await;
                let Some(sink) = sink_guard.as_mut() else {
                    stream.draining.store(false, Ordering::Release);
                    return;
                };

                if let Err(e) = sink.write(block).await {
                    warn!("싱크 쓰기 실패 {}: {}", transfer_id, e);
                    if let Some(sink) = sink_guard.take() {
                        sink.abort().await;
                    }
                    drop(sink_guard);

                    // 남은 블록은 즉시 폐기
                    stream.pending.lock().clear();
                    self.incoming.remove(transfer_id);
                    self.registry.set_recv_status(transfer_id, TransferStatus::Error);
                    stream.draining.store(false, Ordering::Release);
                    return;
                }
            }

            let received = stream.received.fetch_add(block_len, Ordering::AcqRel) + block_len;

            let sample = stream.sampler.lock().sample(received);
            if sample.is_some() {
                self.registry.update_recv(transfer_id, |r| {
                    if r.status == TransferStatus::Receiving {
                        r.bytes_received = received;
                    }
                });
            }

            if received >= stream.declared_size {
                self.finish_stream(transfer_id, stream, received).await;
                return;
            }
        }
    }

    /// 수신 완료: 싱크 닫기, done 전이, 전역 집계 합산
    async fn finish_stream(
        self: &Arc<Self>,
        transfer_id: &str,
        stream: &Arc<IncomingStream>,
        received: u64,
    ) {
        let sink = stream.sink.lock().await.take();
        let Some(sink) = sink else { return };

        match sink.close().await {
            Ok(output) => {
                let payload = match output {
                    SinkOutput::Blob(blob) => RecvPayload::Blob(blob),
                    SinkOutput::File(path) => RecvPayload::File(path),
                };

                if self.auto_download.load(Ordering::Relaxed) {
                    self.auto_save(&stream.relative_path, &payload).await;
                }

                self.registry.update_recv(transfer_id, |r| {
                    if !r.status.is_terminal() {
                        r.bytes_received = received;
                        r.status = TransferStatus::Done;
                        r.payload = Some(payload);
                    }
                });
                self.meta.add_received(received);
                info!("수신 완료: {} ({} bytes)", stream.relative_path, received);
            }
            Err(e) => {
                warn!("싱크 닫기 실패 {}: {}", transfer_id, e);
                self.registry.set_recv_status(transfer_id, TransferStatus::Error);
            }
        }

        self.incoming.remove(transfer_id);
        stream.draining.store(false, Ordering::Release);
    }

    /// 프로토콜 에러로 스트림 실패 처리 (다른 전송에는 영향 없음)
    async fn fail_stream(&self, transfer_id: &str, stream: &Arc<IncomingStream>) {
        self.incoming.remove(transfer_id);
        self.discard_stream(stream).await;
        self.registry.set_recv_status(transfer_id, TransferStatus::Error);
    }

    async fn discard_stream(&self, stream: &Arc<IncomingStream>) {
        stream.canceled.store(true, Ordering::Release);
        stream.pending.lock().clear();
        if let Some(sink) = stream.sink.lock().await.take() {
            sink.abort().await;
        }
    }

    /// 자동 저장: 메모리 blob을 다운로드 디렉토리에 기록
    async fn auto_save(&self, relative_path: &str, payload: &RecvPayload) {
        let RecvPayload::Blob(blob) = payload else {
            // 디스크 싱크는 이미 다운로드 디렉토리에 스트리밍됨
            return;
        };

        let path = self.config.download_dir.join(sanitize_relative_path(relative_path));
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("자동 저장 디렉토리 생성 실패: {}", e);
                return;
            }
        }
        if let Err(e) = tokio::fs::write(&path, blob).await {
            warn!("자동 저장 실패 {:?}: {}", path, e);
        } else {
            debug!("자동 저장 완료: {:?}", path);
        }
    }
}
