//! 테스트 지원: 조작 가능한 가짜 채널
//!
//! 버퍼 수위와 상태를 테스트가 직접 제어한다. 백프레셔/종료 시나리오를
//! 타이밍에 기대지 않고 재현하기 위한 도구.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use pft::channel::{ChannelState, Frame, MessageChannel};
use pft::packet::ControlMessage;
use pft::{Error, Result};

pub struct FakeChannel {
    sent: Mutex<Vec<Frame>>,
    peer_tx: Option<mpsc::UnboundedSender<Frame>>,
    buffered_tx: watch::Sender<u64>,
    state_tx: watch::Sender<ChannelState>,
    max_message_size: u64,

    /// true면 바이너리 송신마다 버퍼 수위가 프레임 크기만큼 증가
    metered: bool,
}

impl FakeChannel {
    fn new(
        peer_tx: Option<mpsc::UnboundedSender<Frame>>,
        max_message_size: u64,
        metered: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            peer_tx,
            buffered_tx: watch::channel(0).0,
            state_tx: watch::channel(ChannelState::Open).0,
            max_message_size,
            metered,
        })
    }

    /// 송신 프레임을 기록만 하는 채널
    pub fn capture(max_message_size: u64) -> Arc<Self> {
        Self::new(None, max_message_size, false)
    }

    /// 기록 + 상대편 인바운드 큐로도 전달하는 채널
    pub fn with_peer(max_message_size: u64) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(Some(tx), max_message_size, false), rx)
    }

    /// 송신이 버퍼 수위를 쌓는 채널 (실제 데이터 채널처럼 동작)
    ///
    /// 수위는 `set_buffered(0)`으로만 빠진다 - 백프레셔 정지 지점이
    /// 타이밍이 아니라 보낸 바이트 수로 결정된다
    pub fn with_peer_metered(max_message_size: u64) -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(Some(tx), max_message_size, true), rx)
    }

    /// 버퍼 수위 조작 (저수위 시그널 발화 포함)
    pub fn set_buffered(&self, amount: u64) {
        self.buffered_tx.send_replace(amount);
    }

    /// 상태 전환
    pub fn set_state(&self, state: ChannelState) {
        self.state_tx.send_replace(state);
    }

    /// 지금까지 보낸 바이너리 프레임들
    pub fn binary_frames(&self) -> Vec<bytes::Bytes> {
        self.sent
            .lock()
            .iter()
            .filter_map(|f| match f {
                Frame::Binary(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    /// 지금까지 보낸 제어 메시지들
    pub fn control_messages(&self) -> Vec<ControlMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|f| match f {
                Frame::Text(t) => ControlMessage::from_json(t).ok(),
                _ => None,
            })
            .collect()
    }
}

impl MessageChannel for FakeChannel {
    fn send(&self, frame: Frame) -> Result<()> {
        if self.state() != ChannelState::Open {
            return Err(Error::ChannelUnavailable {
                graceful: self.state() == ChannelState::Closed,
            });
        }

        if self.metered {
            if let Frame::Binary(data) = &frame {
                let len = data.len() as u64;
                self.buffered_tx.send_modify(|amount| *amount += len);
            }
        }

        self.sent.lock().push(frame.clone());
        if let Some(tx) = &self.peer_tx {
            let _ = tx.send(frame);
        }
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        *self.buffered_tx.borrow()
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

/// 조건이 참이 될 때까지 폴링 (테스트 타임아웃 장치)
pub async fn wait_until(mut cond: impl FnMut() -> bool, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
