//! 외부 전송 채널 추상화
//!
//! 엔진은 채널을 직접 만들지 않는다. 피어 발견/협상/암호화를 마친 외부
//! 협력자가 이미 열린 채널을 [`MessageChannel`] 구현으로 넘겨준다.
//! 요구 계약:
//! - 순서 보장, 메시지 단위, 크기 제한 있는 양방향 전송
//! - `buffered_amount`: 아직 나가지 못한 바이트 수 (백프레셔 판단용)
//! - 상태 변화(open/close/error) 통지

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::{Error, Result};

/// 채널로 오가는 메시지 단위
///
/// 컨트롤 메시지는 텍스트(JSON), 데이터 패킷은 바이너리
#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// 채널 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// 열림 (송수신 가능)
    Open,

    /// 정상 종료 (재연결 시 이어보내기 가능)
    Closed,

    /// 에러로 끊김
    Failed,
}

/// 외부 전송 채널 계약
///
/// `send`는 즉시 내부 버퍼에 적재하고 반환한다. 실제 전송 진행은
/// `buffered_amount` 감소로 관찰한다 (RTCDataChannel 모델과 동일).
pub trait MessageChannel: Send + Sync + 'static {
    /// 프레임 전송. 닫힌 채널이면 `ChannelUnavailable`
    fn send(&self, frame: Frame) -> Result<()>;

    /// 버퍼에 쌓여 아직 나가지 못한 바이트 수
    fn buffered_amount(&self) -> u64;

    /// 단일 메시지 최대 크기 (청크 크기 산정에 사용)
    fn max_message_size(&self) -> u64;

    /// 현재 상태
    fn state(&self) -> ChannelState;

    /// 버퍼 수위 변화 구독 (백프레셔 해제 대기용)
    fn watch_buffered(&self) -> watch::Receiver<u64>;

    /// 상태 변화 구독
    fn watch_state(&self) -> watch::Receiver<ChannelState>;
}

/// 인프로세스 루프백 채널 (데모/테스트용)
///
/// 한쪽의 `send`가 상대편 인바운드 큐로 즉시 전달된다.
/// 전달이 즉각적이므로 버퍼 수위는 항상 0으로 보고한다.
pub struct LoopbackChannel {
    peer_tx: mpsc::UnboundedSender<Frame>,
    buffered: Arc<AtomicU64>,
    buffered_tx: watch::Sender<u64>,
    state_tx: Arc<watch::Sender<ChannelState>>,
    max_message_size: u64,
}

impl LoopbackChannel {
    /// 연결된 채널 한 쌍 생성
    ///
    /// 반환: 각 피어의 (채널 핸들, 인바운드 프레임 수신기)
    pub fn pair(
        max_message_size: u64,
    ) -> (
        (Arc<LoopbackChannel>, mpsc::UnboundedReceiver<Frame>),
        (Arc<LoopbackChannel>, mpsc::UnboundedReceiver<Frame>),
    ) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let state_tx = Arc::new(watch::channel(ChannelState::Open).0);

        let make = |peer_tx: mpsc::UnboundedSender<Frame>| {
            let (buffered_tx, _) = watch::channel(0u64);
            Arc::new(LoopbackChannel {
                peer_tx,
                buffered: Arc::new(AtomicU64::new(0)),
                buffered_tx,
                state_tx: state_tx.clone(),
                max_message_size,
            })
        };

        ((make(b_tx), a_rx), (make(a_tx), b_rx))
    }

    /// 양쪽 모두 정상 종료 상태로 전환
    pub fn close(&self) {
        let _ = self.state_tx.send(ChannelState::Closed);
    }
}

impl MessageChannel for LoopbackChannel {
    fn send(&self, frame: Frame) -> Result<()> {
        if self.state() != ChannelState::Open {
            return Err(Error::ChannelUnavailable {
                graceful: self.state() == ChannelState::Closed,
            });
        }

        self.peer_tx
            .send(frame)
            .map_err(|_| Error::ChannelUnavailable { graceful: false })
    }

    fn buffered_amount(&self) -> u64 {
        self.buffered.load(Ordering::Relaxed)
    }

    fn max_message_size(&self) -> u64 {
        self.max_message_size
    }

    fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    fn watch_buffered(&self) -> watch::Receiver<u64> {
        self.buffered_tx.subscribe()
    }

    fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }
}
