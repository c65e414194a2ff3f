//! 전송 제어 게이트
//!
//! 전송별 일시정지/재개/취소 프리미티브. 로컬 UI 조작과 원격 제어 메시지가
//! 같은 게이트를 통과하므로 파이프라인 루프에서는 출처를 구분할 수 없다.
//!
//! 상태 전이: `Active ⇄ Paused`, `cancel()`은 흡수 상태 (되돌릴 수 없음).
//! 재개 시그널은 pause/resume 사이클마다 새로 설치되는 일회성 oneshot이며
//! 정확히 한 번만 발화된다. 플래그 확인과 시그널 전달은 하나의 뮤텍스로
//! 원자화되어 release-before-wait 경합이 없다.

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// 게이트 내부 상태
struct GateInner {
    paused: bool,
    canceled: bool,
    resume_tx: Option<oneshot::Sender<()>>,
    resume_rx: Option<oneshot::Receiver<()>>,
}

/// 전송 제어 게이트 (transferId당 하나)
pub struct TransferGate {
    inner: Mutex<GateInner>,
}

impl TransferGate {
    /// 새 게이트 생성 (Active 상태)
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GateInner {
                paused: false,
                canceled: false,
                resume_tx: None,
                resume_rx: None,
            }),
        }
    }

    /// 일시정지. 새 재개 시그널을 설치한다
    ///
    /// 이미 정지 중이거나 취소된 게이트면 `false`
    pub fn pause(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.paused || inner.canceled {
            return false;
        }

        let (tx, rx) = oneshot::channel();
        inner.paused = true;
        inner.resume_tx = Some(tx);
        inner.resume_rx = Some(rx);
        true
    }

    /// 재개. 대기 중인 루프를 정확히 한 번 깨운다
    pub fn resume(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.paused || inner.canceled {
            return false;
        }

        inner.paused = false;
        inner.resume_rx = None;
        if let Some(tx) = inner.resume_tx.take() {
            let _ = tx.send(());
        }
        true
    }

    /// 취소 (흡수 상태)
    ///
    /// 정지 중이었다면 시그널도 발화해 잠든 루프가 취소를 관찰하고
    /// 되감기할 수 있게 한다
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.canceled = true;
        if inner.paused {
            inner.paused = false;
            if let Some(tx) = inner.resume_tx.take() {
                let _ = tx.send(());
            }
        }
        inner.resume_rx = None;
    }

    /// 정지 중 여부
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// 취소 여부
    pub fn is_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    /// 정지 중이면 재개 시그널 수신기를 꺼낸다
    ///
    /// 루프는 이 수신기를 await하여 잠들고, resume/cancel이 깨운다.
    /// 전송당 루프는 하나뿐이므로 수신기를 가져가는 쪽도 하나다.
    pub fn resume_signal(&self) -> Option<oneshot::Receiver<()>> {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.resume_rx.take()
        } else {
            None
        }
    }
}

impl Default for TransferGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_resume_cycle() {
        let gate = TransferGate::new();

        assert!(gate.pause());
        assert!(gate.is_paused());
        assert!(!gate.pause()); // 중복 정지 무시

        assert!(gate.resume());
        assert!(!gate.is_paused());
        assert!(!gate.resume()); // 중복 재개 무시
    }

    #[test]
    fn test_cancel_is_absorbing() {
        let gate = TransferGate::new();
        gate.cancel();

        assert!(gate.is_canceled());
        assert!(!gate.pause());
        assert!(!gate.resume());
        assert!(!gate.is_paused());
    }

    #[tokio::test]
    async fn test_resume_wakes_waiter() {
        let gate = std::sync::Arc::new(TransferGate::new());
        gate.pause();

        let rx = gate.resume_signal().expect("paused gate has signal");

        let gate2 = gate.clone();
        tokio::spawn(async move {
            gate2.resume();
        });

        // resume이 시그널을 발화하면 복귀
        let _ = rx.await;
        assert!(!gate.is_paused());
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_waiter() {
        let gate = std::sync::Arc::new(TransferGate::new());
        gate.pause();
        let rx = gate.resume_signal().unwrap();

        gate.cancel();

        let _ = rx.await;
        assert!(gate.is_canceled());
    }

    #[test]
    fn test_signal_taken_only_when_paused() {
        let gate = TransferGate::new();
        assert!(gate.resume_signal().is_none());

        gate.pause();
        assert!(gate.resume_signal().is_some());
        // 이미 꺼내간 시그널은 재발급되지 않음
        assert!(gate.resume_signal().is_none());
    }
}
