//! 전송 레지스트리
//!
//! 송신/수신 전송 기록의 유일한 권위 있는 목록. UI 레이어는 여기서
//! 스냅샷을 읽기만 하고, 상태 변경은 각 파이프라인만 수행한다.
//! 상태 문자열이 유일한 에러 보고 표면이다.

use std::path::PathBuf;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::stats::percent;
use crate::TransferId;

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// 송신 대기
    Queued,

    /// 송신 중
    Sending,

    /// 수신 중
    Receiving,

    /// 일시정지
    Paused,

    /// 완료
    Done,

    /// 실패
    Error,

    /// 취소됨
    Canceled,
}

impl TransferStatus {
    /// 종결 상태 여부 (종결 상태에서는 어떤 전이도 불가)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }

    /// UI 표시용 라벨
    pub fn label(self) -> &'static str {
        match self {
            Self::Queued => "Waiting to send",
            Self::Sending => "Transferring",
            Self::Receiving => "Receiving",
            Self::Paused => "Paused",
            Self::Done => "Completed",
            Self::Error => "Failed",
            Self::Canceled => "Canceled",
        }
    }
}

/// 송신측 전송 기록
#[derive(Debug, Clone)]
pub struct SendRecord {
    pub transfer_id: TransferId,
    pub source: PathBuf,
    pub relative_path: String,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    pub status: TransferStatus,
    pub speed_bps: u64,
    pub thumbnail: Option<String>,
}

/// 수신 완료 결과물
#[derive(Debug, Clone)]
pub enum RecvPayload {
    /// 메모리 싱크 결과 (다운로드 가능한 blob)
    Blob(Bytes),

    /// 디스크 싱크 결과 (저장된 경로)
    File(PathBuf),
}

/// 수신측 전송 기록
#[derive(Debug, Clone)]
pub struct RecvRecord {
    pub transfer_id: TransferId,
    pub relative_path: String,
    pub declared_size: u64,
    pub bytes_received: u64,
    pub status: TransferStatus,
    pub thumbnail: Option<String>,
    pub payload: Option<RecvPayload>,
}

/// UI 표시용 전송 뷰
#[derive(Debug, Clone)]
pub struct TransferView {
    pub transfer_id: TransferId,
    pub relative_path: String,
    pub progress_percent: u8,
    pub status: TransferStatus,
    pub status_label: &'static str,
    pub speed_bps: u64,
}

/// 전송 레지스트리
#[derive(Default)]
pub struct Registry {
    sends: RwLock<Vec<SendRecord>>,
    recvs: RwLock<Vec<RecvRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 송신 기록 추가
    pub fn push_send(&self, record: SendRecord) {
        self.sends.write().push(record);
    }

    /// 수신 기록 추가
    pub fn push_recv(&self, record: RecvRecord) {
        self.recvs.write().push(record);
    }

    /// 송신 기록 갱신 (존재하면 true)
    pub fn update_send(&self, transfer_id: &str, f: impl FnOnce(&mut SendRecord)) -> bool {
        let mut sends = self.sends.write();
        match sends.iter_mut().find(|r| r.transfer_id == transfer_id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// 수신 기록 갱신
    pub fn update_recv(&self, transfer_id: &str, f: impl FnOnce(&mut RecvRecord)) -> bool {
        let mut recvs = self.recvs.write();
        match recvs.iter_mut().find(|r| r.transfer_id == transfer_id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// 송신 상태 전이. 종결 상태는 흡수라 덮어쓰지 않는다
    pub fn set_send_status(&self, transfer_id: &str, status: TransferStatus) -> bool {
        self.update_send(transfer_id, |r| {
            if !r.status.is_terminal() {
                r.status = status;
            }
        })
    }

    /// 수신 상태 전이 (종결 상태 흡수)
    pub fn set_recv_status(&self, transfer_id: &str, status: TransferStatus) -> bool {
        self.update_recv(transfer_id, |r| {
            if !r.status.is_terminal() {
                r.status = status;
            }
        })
    }

    /// 해당 송신 기록의 현재 상태
    pub fn send_status(&self, transfer_id: &str) -> Option<TransferStatus> {
        self.sends
            .read()
            .iter()
            .find(|r| r.transfer_id == transfer_id)
            .map(|r| r.status)
    }

    /// 수신 기록의 현재 상태
    pub fn recv_status(&self, transfer_id: &str) -> Option<TransferStatus> {
        self.recvs
            .read()
            .iter()
            .find(|r| r.transfer_id == transfer_id)
            .map(|r| r.status)
    }

    /// 비종결 송신 기록 중 같은 상대 경로가 있는지 (중복 선택 제거용)
    pub fn has_pending_path(&self, relative_path: &str) -> bool {
        self.sends
            .read()
            .iter()
            .any(|r| !r.status.is_terminal() && r.relative_path == relative_path)
    }

    /// 송신 기록 스냅샷 (순서 유지)
    pub fn send_snapshot(&self) -> Vec<SendRecord> {
        self.sends.read().clone()
    }

    /// 수신 기록 스냅샷
    pub fn recv_snapshot(&self) -> Vec<RecvRecord> {
        self.recvs.read().clone()
    }

    /// 현재 송신 중인 transferId 목록
    pub fn sending_ids(&self) -> Vec<TransferId> {
        self.sends
            .read()
            .iter()
            .filter(|r| r.status == TransferStatus::Sending)
            .map(|r| r.transfer_id.clone())
            .collect()
    }

    /// UI용 송신 뷰 목록
    pub fn send_views(&self) -> Vec<TransferView> {
        self.sends
            .read()
            .iter()
            .map(|r| TransferView {
                transfer_id: r.transfer_id.clone(),
                relative_path: r.relative_path.clone(),
                progress_percent: percent(r.bytes_sent, r.total_bytes),
                status: r.status,
                status_label: r.status.label(),
                speed_bps: r.speed_bps,
            })
            .collect()
    }

    /// UI용 수신 뷰 목록
    pub fn recv_views(&self) -> Vec<TransferView> {
        self.recvs
            .read()
            .iter()
            .map(|r| TransferView {
                transfer_id: r.transfer_id.clone(),
                relative_path: r.relative_path.clone(),
                progress_percent: percent(r.bytes_received, r.declared_size),
                status: r.status,
                status_label: r.status.label(),
                speed_bps: 0,
            })
            .collect()
    }

    /// 양쪽 기록 전체 삭제 (reset 전용)
    pub fn clear(&self) {
        self.sends.write().clear();
        self.recvs.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send_record(id: &str, path: &str) -> SendRecord {
        SendRecord {
            transfer_id: id.into(),
            source: PathBuf::from(path),
            relative_path: path.into(),
            total_bytes: 100,
            bytes_sent: 0,
            status: TransferStatus::Queued,
            speed_bps: 0,
            thumbnail: None,
        }
    }

    #[test]
    fn test_terminal_status_is_absorbing() {
        let registry = Registry::new();
        registry.push_send(send_record("t1", "a.bin"));

        registry.set_send_status("t1", TransferStatus::Canceled);
        registry.set_send_status("t1", TransferStatus::Sending);

        assert_eq!(registry.send_status("t1"), Some(TransferStatus::Canceled));
    }

    #[test]
    fn test_pending_path_dedup() {
        let registry = Registry::new();
        registry.push_send(send_record("t1", "a.bin"));
        assert!(registry.has_pending_path("a.bin"));

        registry.set_send_status("t1", TransferStatus::Done);
        // 종결된 기록은 중복 검사에서 제외
        assert!(!registry.has_pending_path("a.bin"));
    }

    #[test]
    fn test_views_report_progress() {
        let registry = Registry::new();
        let mut record = send_record("t1", "a.bin");
        record.bytes_sent = 50;
        record.status = TransferStatus::Sending;
        registry.push_send(record);

        let views = registry.send_views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].progress_percent, 50);
        assert_eq!(views[0].status_label, "Transferring");
    }
}
