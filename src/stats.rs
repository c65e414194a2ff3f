//! 전송 통계
//!
//! 프로세스 전역 집계([`Meta`])와 전송별 진행률/속도 샘플러.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 프로세스 전역 집계
///
/// 엔진 기동 시 초기화되고, 두 파이프라인만 변경하며, 명시적 reset으로만
/// 0으로 돌아간다. 합산은 완료 이벤트 시점의 단일 `fetch_add`라 전송이
/// 빠르게 겹쳐도 갱신이 유실되지 않는다.
#[derive(Debug, Default)]
pub struct Meta {
    total_sent: AtomicU64,
    total_received: AtomicU64,
    speed_bps: AtomicU64,
}

/// Meta 스냅샷 (UI 표시용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaSnapshot {
    pub total_sent: u64,
    pub total_received: u64,
    pub speed_bps: u64,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    /// 송신 완료 바이트 합산
    pub fn add_sent(&self, bytes: u64) {
        self.total_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 수신 완료 바이트 합산
    pub fn add_received(&self, bytes: u64) {
        self.total_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 순간 속도 갱신 (bytes/sec)
    pub fn set_speed(&self, bps: u64) {
        self.speed_bps.store(bps, Ordering::Relaxed);
    }

    /// 현재 값 스냅샷
    pub fn snapshot(&self) -> MetaSnapshot {
        MetaSnapshot {
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_received: self.total_received.load(Ordering::Relaxed),
            speed_bps: self.speed_bps.load(Ordering::Relaxed),
        }
    }

    /// 전체 리셋
    pub fn reset(&self) {
        self.total_sent.store(0, Ordering::Relaxed);
        self.total_received.store(0, Ordering::Relaxed);
        self.speed_bps.store(0, Ordering::Relaxed);
    }
}

/// 진행률 샘플
#[derive(Debug, Clone, Copy)]
pub struct ProgressSample {
    /// 진행률 (0~100)
    pub percent: u8,

    /// 샘플 구간 순간 속도 (bytes/sec)
    pub speed_bps: u64,
}

/// 진행률/속도 샘플러
///
/// 500ms 경과 또는 5% 진행 변화 중 먼저 오는 쪽에서 샘플을 내보낸다.
/// 속도는 직전 샘플 이후 구간으로 계산한다.
pub struct ProgressSampler {
    total_bytes: u64,
    interval: Duration,
    percent_delta: f64,
    last_time: Instant,
    last_bytes: u64,
}

impl ProgressSampler {
    pub fn new(total_bytes: u64, interval_ms: u64, percent_delta: f64) -> Self {
        Self {
            total_bytes,
            interval: Duration::from_millis(interval_ms),
            percent_delta,
            last_time: Instant::now(),
            last_bytes: 0,
        }
    }

    /// 이어 보내기 재개 지점으로 기준 이동
    ///
    /// 다음 샘플의 속도/퍼센트 변화가 재개 이후 구간으로만 계산된다
    pub fn resume_from(&mut self, bytes_done: u64) {
        self.last_bytes = bytes_done;
        self.last_time = Instant::now();
    }

    /// 현재 진행 바이트로 샘플 시도. 발행 조건 미달이면 `None`
    pub fn sample(&mut self, bytes_done: u64) -> Option<ProgressSample> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_time);

        let pct_now = self.percent_of(bytes_done);
        let pct_last = self.percent_of(self.last_bytes);

        if elapsed < self.interval && pct_now - pct_last < self.percent_delta {
            return None;
        }

        let speed_bps = if elapsed.as_secs_f64() > 0.0 {
            ((bytes_done - self.last_bytes) as f64 / elapsed.as_secs_f64()).round() as u64
        } else {
            0
        };

        self.last_time = now;
        self.last_bytes = bytes_done;

        Some(ProgressSample {
            percent: pct_now.round().min(100.0) as u8,
            speed_bps,
        })
    }

    fn percent_of(&self, bytes: u64) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// 진행률 계산 (0~100)
pub fn percent(bytes_done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((bytes_done as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_accumulates_atomically() {
        let meta = Meta::new();
        meta.add_sent(1_000_000);
        meta.add_sent(500);
        meta.add_received(42);

        let snap = meta.snapshot();
        assert_eq!(snap.total_sent, 1_000_500);
        assert_eq!(snap.total_received, 42);

        meta.reset();
        assert_eq!(meta.snapshot().total_sent, 0);
    }

    #[test]
    fn test_sampler_fires_on_percent_delta() {
        let mut sampler = ProgressSampler::new(1000, 60_000, 5.0);

        // 1% 진행 - 시간도 퍼센트도 미달
        assert!(sampler.sample(10).is_none());

        // 6% 진행 - 퍼센트 조건 충족
        let sample = sampler.sample(60).expect("5% delta 초과");
        assert_eq!(sample.percent, 6);

        // 직후 추가 1%는 다시 미달
        assert!(sampler.sample(70).is_none());
    }

    #[test]
    fn test_resume_from_rebases_delta() {
        let mut sampler = ProgressSampler::new(1000, 60_000, 5.0);
        sampler.resume_from(600);

        // 재개 지점 기준 1% 진행은 미달
        assert!(sampler.sample(610).is_none());

        // 재개 지점 기준 6% 진행에서 발행
        let sample = sampler.sample(660).expect("5% delta 초과");
        assert_eq!(sample.percent, 66);
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent(0, 1000), 0);
        assert_eq!(percent(213_568, 1_000_000), 21);
        assert_eq!(percent(1000, 1000), 100);
        assert_eq!(percent(0, 0), 100);
    }
}
