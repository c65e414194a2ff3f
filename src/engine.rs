//! 전송 엔진
//!
//! 송신 파이프라인, 수신 재조립, 레지스트리, 전역 집계를 하나로 묶고
//! UI 레이어가 쓰는 진입점을 노출한다. 엔진은 채널을 소유하지 않는다 -
//! 외부 협력자가 열어준 채널 핸들과 인바운드 프레임 수신기를 받아 기동한다.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::channel::{ChannelState, Frame, MessageChannel};
use crate::config::Config;
use crate::gate::TransferGate;
use crate::packet::ControlMessage;
use crate::receiver::ReceiverEngine;
use crate::registry::{Registry, SendRecord, TransferStatus, TransferView};
use crate::sender::{SendJob, SenderWorker};
use crate::stats::{Meta, MetaSnapshot};
use crate::{Error, Result, TransferId};

/// 연결 끊김 콜백
pub type DisconnectHandler = Box<dyn Fn() + Send + Sync>;

/// 선택된 파일 하나
#[derive(Debug, Clone)]
pub struct FileSelection {
    /// 로컬 소스 경로
    pub path: PathBuf,

    /// 수신측에 전달되는 상대 경로 (디렉토리 구조 유지용)
    pub relative_path: String,

    /// 선택적 썸네일 (데이터 URL 등, 내용은 불투명)
    pub thumbnail: Option<String>,
}

/// P2P 파일 전송 엔진
pub struct Engine<C: MessageChannel> {
    channel: Arc<C>,
    registry: Arc<Registry>,
    meta: Arc<Meta>,
    gates: Arc<DashMap<TransferId, Arc<TransferGate>>>,
    receiver: Arc<ReceiverEngine>,
    job_tx: mpsc::Sender<SendJob>,
    auto_download: Arc<AtomicBool>,
    on_disconnect: Arc<Mutex<Option<DisconnectHandler>>>,
}

impl<C: MessageChannel> Engine<C> {
    /// 엔진 기동
    ///
    /// `inbound`는 채널에서 도착하는 프레임 스트림. 디스패치 태스크,
    /// 송신 워커, 채널 상태 감시 태스크를 띄운다.
    pub fn start(
        channel: Arc<C>,
        inbound: mpsc::UnboundedReceiver<Frame>,
        config: Config,
    ) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        let meta = Arc::new(Meta::new());
        let gates: Arc<DashMap<TransferId, Arc<TransferGate>>> = Arc::new(DashMap::new());
        let auto_download = Arc::new(AtomicBool::new(config.auto_download));
        let on_disconnect: Arc<Mutex<Option<DisconnectHandler>>> = Arc::new(Mutex::new(None));

        let receiver = Arc::new(ReceiverEngine::new(
            config.clone(),
            registry.clone(),
            meta.clone(),
            gates.clone(),
            auto_download.clone(),
        ));

        let job_tx = SenderWorker::new(
            channel.clone(),
            config,
            registry.clone(),
            meta.clone(),
            gates.clone(),
        )
        .spawn();

        let engine = Arc::new(Self {
            channel,
            registry,
            meta,
            gates,
            receiver,
            job_tx,
            auto_download,
            on_disconnect,
        });

        engine.spawn_dispatcher(inbound);
        engine.spawn_state_watcher();
        engine
    }

    /// 연결 끊김 콜백 등록 (UI 레이어가 재연결 유도 등에 사용)
    pub fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        *self.on_disconnect.lock() = Some(handler);
    }

    /// 인바운드 프레임 디스패처
    fn spawn_dispatcher(self: &Arc<Self>, mut inbound: mpsc::UnboundedReceiver<Frame>) {
        let receiver = self.receiver.clone();

        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                match frame {
                    Frame::Text(text) => match ControlMessage::from_json(&text) {
                        Ok(msg) => receiver.handle_control(msg).await,
                        Err(e) => warn!("제어 메시지 해석 실패: {}", e),
                    },
                    Frame::Binary(data) => receiver.handle_packet(&data).await,
                }
            }
            debug!("인바운드 디스패처 종료");
        });
    }

    /// 채널 상태 감시
    ///
    /// 닫히면 송신 중 전송을 paused로 강제 (error 아님 - 재연결 시 이어가기)
    fn spawn_state_watcher(self: &Arc<Self>) {
        let mut state_rx = self.channel.watch_state();
        let registry = self.registry.clone();
        let on_disconnect = self.on_disconnect.clone();

        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow();
                if state == ChannelState::Open {
                    continue;
                }

                for id in registry.sending_ids() {
                    registry.set_send_status(&id, TransferStatus::Paused);
                }
                info!("채널 끊김 ({:?}) - 송신 중 전송 보류", state);

                if let Some(handler) = on_disconnect.lock().as_ref() {
                    handler();
                }
            }
        });
    }

    /// 파일 선택 (상대 경로 = 파일명)
    pub async fn select_files(&self, paths: Vec<PathBuf>) -> Result<Vec<TransferId>> {
        let selections = paths
            .into_iter()
            .map(|path| {
                let relative_path = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                FileSelection {
                    path,
                    relative_path,
                    thumbnail: None,
                }
            })
            .collect();
        self.select(selections).await
    }

    /// 디렉토리 선택 - 트리를 평탄화해 상대 경로를 유지한 채 전부 큐잉
    pub async fn select_dir(&self, dir: &Path) -> Result<Vec<TransferId>> {
        let base = dir.parent().unwrap_or(dir);
        let mut selections = Vec::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::SourceRead {
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative_path = entry
                .path()
                .strip_prefix(base)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            selections.push(FileSelection {
                path: entry.path().to_path_buf(),
                relative_path,
                thumbnail: None,
            });
        }

        self.select(selections).await
    }

    /// 선택 항목 큐잉. 비종결 기록과 상대 경로가 겹치면 조용히 건너뛴다
    pub async fn select(&self, selections: Vec<FileSelection>) -> Result<Vec<TransferId>> {
        let mut queued = Vec::new();

        for selection in selections {
            if self.registry.has_pending_path(&selection.relative_path) {
                debug!("중복 경로 건너뜀: {}", selection.relative_path);
                continue;
            }

            // 읽을 수 없는 파일은 error 기록으로 남기고 나머지 선택은 이어간다
            let total_bytes = match tokio::fs::metadata(&selection.path).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("메타데이터 읽기 실패 {:?}: {}", selection.path, e);
                    self.registry.push_send(SendRecord {
                        transfer_id: Uuid::new_v4().to_string(),
                        source: selection.path.clone(),
                        relative_path: selection.relative_path.clone(),
                        total_bytes: 0,
                        bytes_sent: 0,
                        status: TransferStatus::Error,
                        speed_bps: 0,
                        thumbnail: selection.thumbnail.clone(),
                    });
                    continue;
                }
            };

            let transfer_id = Uuid::new_v4().to_string();
            self.gates
                .insert(transfer_id.clone(), Arc::new(TransferGate::new()));

            self.registry.push_send(SendRecord {
                transfer_id: transfer_id.clone(),
                source: selection.path.clone(),
                relative_path: selection.relative_path.clone(),
                total_bytes,
                bytes_sent: 0,
                status: TransferStatus::Queued,
                speed_bps: 0,
                thumbnail: selection.thumbnail.clone(),
            });

            let job = SendJob {
                transfer_id: transfer_id.clone(),
                source: selection.path,
                relative_path: selection.relative_path,
                total_bytes,
                offset: 0,
                thumbnail: selection.thumbnail,
            };
            self.job_tx
                .send(job)
                .await
                .map_err(|_| Error::Unknown("송신 작업 큐가 닫힘".into()))?;

            queued.push(transfer_id);
        }

        Ok(queued)
    }

    /// 송신 일시정지
    pub fn pause_transfer(&self, transfer_id: &str) {
        if let Some(gate) = self.gates.get(transfer_id) {
            if gate.pause() {
                self.registry.set_send_status(transfer_id, TransferStatus::Paused);
            }
        }
    }

    /// 송신 재개
    ///
    /// 게이트에 잠든 루프가 있으면 깨우고, 채널 종료로 작업이 죽은 전송이면
    /// 기록된 오프셋부터 이어 보내도록 재큐잉한다
    pub fn resume_transfer(&self, transfer_id: &str) {
        if let Some(gate) = self.gates.get(transfer_id) {
            if gate.resume() {
                self.registry.set_send_status(transfer_id, TransferStatus::Sending);
                return;
            }
        }

        if self.registry.send_status(transfer_id) != Some(TransferStatus::Paused) {
            return;
        }

        // 루프가 살아있지 않은 paused 전송 - 재큐잉
        let record = self
            .registry
            .send_snapshot()
            .into_iter()
            .find(|r| r.transfer_id == transfer_id);
        let Some(record) = record else { return };

        self.gates
            .insert(transfer_id.to_owned(), Arc::new(TransferGate::new()));
        self.registry.set_send_status(transfer_id, TransferStatus::Queued);

        // 수신측 스트림은 이미 bytes_sent까지 쌓여 있으므로 그 지점부터 이어 보낸다.
        // 0부터 다시 보내면 수신측이 중복 바이트를 조립한다
        let job = SendJob {
            transfer_id: record.transfer_id,
            source: record.source,
            relative_path: record.relative_path,
            total_bytes: record.total_bytes,
            offset: record.bytes_sent,
            thumbnail: record.thumbnail,
        };
        if self.job_tx.try_send(job).is_err() {
            warn!("재큐잉 실패 (큐 가득 참): {}", transfer_id);
            self.registry.set_send_status(transfer_id, TransferStatus::Paused);
        }
    }

    /// 송신 취소. 원격에도 통지한다
    pub fn cancel_transfer(&self, transfer_id: &str) {
        if let Some(gate) = self.gates.get(transfer_id) {
            gate.cancel();
        }
        self.registry.set_send_status(transfer_id, TransferStatus::Canceled);
        self.notify_cancel(transfer_id);
    }

    /// 수신 취소. 스트림을 폐기하고 원격 송신자에게 중단을 통지한다
    pub async fn cancel_receive(&self, transfer_id: &str) {
        self.receiver.cancel_incoming(transfer_id).await;
        self.registry.set_recv_status(transfer_id, TransferStatus::Canceled);
        self.notify_cancel(transfer_id);
    }

    fn notify_cancel(&self, transfer_id: &str) {
        if self.channel.state() != ChannelState::Open {
            return;
        }
        let msg = ControlMessage::Cancel {
            transfer_id: transfer_id.to_owned(),
        };
        if let Ok(json) = msg.to_json() {
            let _ = self.channel.send(Frame::Text(json));
        }
    }

    /// 전체 리셋
    ///
    /// 양쪽의 모든 비종결 전송을 취소하고 (정지 대기 루프도 깨워서 되감기),
    /// 기록과 전역 집계를 비운다
    pub async fn reset_all(&self) {
        for entry in self.gates.iter() {
            entry.value().cancel();
        }
        self.gates.clear();

        self.receiver.abort_all().await;
        self.registry.clear();
        self.meta.reset();
        info!("전송 엔진 리셋 완료");
    }

    /// 자동 저장 토글
    pub fn set_auto_download(&self, enabled: bool) {
        self.auto_download.store(enabled, Ordering::Relaxed);
    }

    /// 송신 전송 목록 (UI 표시용)
    pub fn transfers(&self) -> Vec<TransferView> {
        self.registry.send_views()
    }

    /// 수신 전송 목록
    pub fn receives(&self) -> Vec<TransferView> {
        self.registry.recv_views()
    }

    /// 전역 집계 스냅샷
    pub fn metrics(&self) -> MetaSnapshot {
        self.meta.snapshot()
    }

    /// 레지스트리 직접 접근 (읽기 용도)
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
