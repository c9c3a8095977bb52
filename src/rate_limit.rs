//! 全局令牌桶限流器。

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Process-wide token bucket shared by every inbound request.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_interval: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// 创建满令牌的桶，每经过 `refill_interval` 补充一个令牌。
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        Self::with_start(capacity, refill_interval, Instant::now())
    }

    fn with_start(capacity: u32, refill_interval: Duration, start: Instant) -> Self {
        Self {
            capacity,
            refill_interval: refill_interval.max(Duration::from_millis(1)),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: start,
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 尝试扣除 `count` 个令牌；不足时返回 false 且不扣除。
    pub fn try_consume(&self, count: u32) -> bool {
        self.try_consume_at(count, Instant::now())
    }

    fn try_consume_at(&self, count: u32, now: Instant) -> bool {
        let mut state = self.lock_state();
        self.refill(&mut state, now);

        if state.tokens < count {
            return false;
        }
        state.tokens -= count;
        true
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let new_tokens = elapsed.as_millis() / self.refill_interval.as_millis();
        if new_tokens > 0 {
            let refilled = (u128::from(state.tokens) + new_tokens).min(u128::from(self.capacity));
            state.tokens = refilled as u32;
            state.last_refill = now;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BucketState> {
        // The critical section never panics midway, so a poisoned state is still consistent.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
