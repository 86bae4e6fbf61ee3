use common::MediaTime;

/// Identity of a sample: its buffer slot plus the generation it belongs
/// to. Used to recognize the specific sample a frame step is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleId {
    pub slot: usize,
    pub token: u64,
}

/// A handle to one presentable frame buffer.
///
/// The GPU image itself lives in the render backend's current batch,
/// indexed by `slot`; the handle is what flows through the pool, the
/// controller, the scheduler, and the host.
///
/// `token` is the generation stamp: the controller bumps its counter every
/// time the batch is torn down (format or device change), and a sample
/// whose token no longer matches is stale. Stale samples are dropped on
/// return, never presented and never recycled into the active pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSample {
    pub slot: usize,
    pub token: u64,
    /// Target presentation time, if the source stamped one.
    pub pts: Option<MediaTime>,
    pub duration: Option<MediaTime>,
}

impl VideoSample {
    pub fn new(slot: usize, token: u64) -> Self {
        Self {
            slot,
            token,
            pts: None,
            duration: None,
        }
    }

    pub fn id(&self) -> SampleId {
        SampleId {
            slot: self.slot,
            token: self.token,
        }
    }

    /// Clears per-frame state before the sample is handed back out.
    pub fn reset_timing(&mut self) {
        self.pts = None;
        self.duration = None;
    }
}
