use crate::video::sample::VideoSample;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("sample pool is not initialized")]
    NotInitialized,
}

struct PoolState {
    idle: VecDeque<VideoSample>,
    /// Samples currently outstanding with the controller, scheduler,
    /// backend, or host.
    pending: usize,
    initialized: bool,
}

/// Thread-safe recycler for frame buffers.
///
/// Hands out idle samples without allocating and reclaims them when the
/// host is done compositing. An exhausted pool is the back-pressure
/// signal: [`SamplePool::reuse`] returns `Ok(None)` and the output loop
/// stops pulling frames until something is recycled.
///
/// Reclamation can be signaled from any thread (typically the host's
/// compositing callback), so the whole pool sits behind one mutex. No
/// operation blocks.
pub struct SamplePool {
    state: Mutex<PoolState>,
}

impl SamplePool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                pending: 0,
                initialized: false,
            }),
        }
    }

    /// Replaces the pool contents with a freshly allocated batch,
    /// resetting the pending count. Used after format negotiation.
    pub fn initialize(&self, batch: Vec<VideoSample>) {
        let mut state = self.state.lock().unwrap();
        state.idle = batch.into();
        state.pending = 0;
        state.initialized = true;
        log::debug!("Sample pool initialized with {} buffers", state.idle.len());
    }

    /// Pops one idle sample, marking it outstanding.
    ///
    /// `Ok(None)` means the pool is exhausted — back-pressure, not an
    /// error. Callers try again after the next recycle.
    pub fn reuse(&self) -> Result<Option<VideoSample>, PoolError> {
        let mut state = self.state.lock().unwrap();
        if !state.initialized {
            return Err(PoolError::NotInitialized);
        }
        match state.idle.pop_front() {
            Some(mut sample) => {
                sample.reset_timing();
                state.pending += 1;
                Ok(Some(sample))
            }
            None => Ok(None),
        }
    }

    /// Returns one outstanding sample to the idle pool.
    pub fn recycle(&self, sample: VideoSample) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(
            state.pending > 0,
            "recycle with no samples outstanding - buffer accounting bug"
        );
        if state.pending == 0 {
            log::error!(
                "Recycled sample (slot {}, token {}) with no samples outstanding; dropping",
                sample.slot,
                sample.token
            );
            return;
        }
        state.pending -= 1;
        state.idle.push_back(sample);
    }

    /// Drops all idle samples and resets the accounting. Used on format
    /// or device changes; outstanding stale samples are dropped on return
    /// by the token check, not here.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        let dropped = state.idle.len();
        state.idle.clear();
        state.pending = 0;
        state.initialized = false;
        if dropped > 0 {
            log::debug!("Sample pool cleared ({} idle buffers dropped)", dropped);
        }
    }

    /// True while at least one sample is outstanding. Gates end-of-stream:
    /// the stream is not complete until every in-flight frame has been
    /// displayed and reclaimed.
    pub fn is_pending(&self) -> bool {
        self.state.lock().unwrap().pending > 0
    }

    /// Number of idle samples currently available.
    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }
}

impl Default for SamplePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(token: u64, count: usize) -> Vec<VideoSample> {
        (0..count).map(|slot| VideoSample::new(slot, token)).collect()
    }

    #[test]
    fn test_reuse_before_initialize_is_contract_violation() {
        let pool = SamplePool::new();
        assert_eq!(pool.reuse(), Err(PoolError::NotInitialized));
    }

    #[test]
    fn test_exhaustion_is_backpressure_not_error() {
        let pool = SamplePool::new();
        pool.initialize(batch(1, 2));

        assert!(pool.reuse().unwrap().is_some());
        assert!(pool.reuse().unwrap().is_some());
        // Pool empty: Ok(None), not Err.
        assert_eq!(pool.reuse().unwrap(), None);
    }

    #[test]
    fn test_pending_conservation() {
        let pool = SamplePool::new();
        pool.initialize(batch(1, 3));
        assert!(!pool.is_pending());

        // N reuses followed by M recycles leaves N - M pending.
        let a = pool.reuse().unwrap().unwrap();
        let b = pool.reuse().unwrap().unwrap();
        let c = pool.reuse().unwrap().unwrap();
        assert!(pool.is_pending());

        pool.recycle(a);
        pool.recycle(b);
        assert!(pool.is_pending());

        pool.recycle(c);
        assert!(!pool.is_pending());
        assert_eq!(pool.idle_count(), 3);
    }

    #[test]
    fn test_initialize_resets_pending() {
        let pool = SamplePool::new();
        pool.initialize(batch(1, 2));
        let _out = pool.reuse().unwrap().unwrap();
        assert!(pool.is_pending());

        // Batch replace: the outstanding sample belongs to the old
        // generation and no longer counts.
        pool.initialize(batch(2, 2));
        assert!(!pool.is_pending());
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_clear_drops_idle_and_uninitializes() {
        let pool = SamplePool::new();
        pool.initialize(batch(1, 3));
        pool.clear();
        assert!(!pool.is_pending());
        assert_eq!(pool.reuse(), Err(PoolError::NotInitialized));
    }

    #[test]
    fn test_reused_sample_has_clean_timing() {
        let pool = SamplePool::new();
        pool.initialize(batch(1, 1));
        let mut sample = pool.reuse().unwrap().unwrap();
        sample.pts = Some(common::MediaTime::from_millis(100));
        pool.recycle(sample);

        let again = pool.reuse().unwrap().unwrap();
        assert_eq!(again.pts, None);
    }
}
