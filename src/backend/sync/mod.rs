//! Completion handles for buffer access
//!
//! A [`Fence`] is handed from a producer to a consumer (acquire) or back (release/retire).
//! It is a cheap, clonable value. The underlying wait primitive is shared through an
//! [`Arc`] and released when the last clone is dropped.
use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use downcast_rs::{impl_downcast, Downcast};
use smallvec::SmallVec;

/// A wait primitive that will be signaled in finite time
pub trait FenceSource: std::fmt::Debug + Send + Sync + Downcast {
    /// Queries the state of the source
    fn is_signaled(&self) -> bool;

    /// Blocks the current thread until the source is signaled or the timeout expires
    ///
    /// Returns `true` if the source was signaled.
    fn wait(&self, timeout: Duration) -> bool;
}
impl_downcast!(FenceSource);

/// Handle to a completion event
///
/// A fence without a source is considered signaled; it is what the engine returns when
/// there is nothing to wait for, e.g. the release fences of the very first frame.
#[derive(Debug, Clone)]
#[must_use = "this `Fence` may guard a buffer that is still in use, dropping it without waiting may result in tearing"]
pub struct Fence {
    source: Option<Arc<dyn FenceSource>>,
}

impl Default for Fence {
    fn default() -> Self {
        Self::signaled()
    }
}

impl Fence {
    /// Create an already signaled fence
    pub fn signaled() -> Self {
        Fence { source: None }
    }

    /// Returns true if this fence is backed by an actual wait primitive
    pub fn is_valid(&self) -> bool {
        self.source.is_some()
    }

    /// Get a reference to the underlying [`FenceSource`] if any
    ///
    /// Returns `None` if the fence does not contain a source
    /// or contains a different type of source
    pub fn get<F: FenceSource + 'static>(&self) -> Option<&F> {
        self.source.as_ref().and_then(|f| f.downcast_ref())
    }

    /// Queries the state of the fence
    ///
    /// Will always return `true` in case the fence does not contain a source
    pub fn is_signaled(&self) -> bool {
        self.source.as_ref().map(|f| f.is_signaled()).unwrap_or(true)
    }

    /// Blocks the current thread until the fence is signaled or `timeout` expired
    ///
    /// If the fence does not contain a source this will never block.
    #[profiling::function]
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.source.as_ref() {
            Some(source) => source.wait(timeout),
            None => true,
        }
    }

    /// Create a fence that signals once both `self` and `other` are signaled
    pub fn merge(&self, other: &Fence) -> Fence {
        let (a, b) = match (&self.source, &other.source) {
            (None, _) => return other.clone(),
            (_, None) => return self.clone(),
            (Some(a), Some(b)) => (a, b),
        };

        if Arc::ptr_eq(a, b) || b.is_signaled() {
            return self.clone();
        }
        if a.is_signaled() {
            return other.clone();
        }

        let mut sources = SmallVec::new();
        for source in [a, b] {
            match source.downcast_ref::<MergedFence>() {
                Some(merged) => {
                    for inner in merged.sources.iter() {
                        if !sources.iter().any(|s| Arc::ptr_eq(s, inner)) {
                            sources.push(inner.clone());
                        }
                    }
                }
                None => {
                    if !sources.iter().any(|s| Arc::ptr_eq(s, source)) {
                        sources.push(source.clone());
                    }
                }
            }
        }

        Fence::from(MergedFence { sources })
    }
}

impl PartialEq for Fence {
    fn eq(&self, other: &Self) -> bool {
        match (&self.source, &other.source) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T: FenceSource + 'static> From<T> for Fence {
    fn from(value: T) -> Self {
        Fence {
            source: Some(Arc::new(value)),
        }
    }
}

impl FromIterator<Fence> for Fence {
    fn from_iter<I: IntoIterator<Item = Fence>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Fence::signaled(), |acc, fence| acc.merge(&fence))
    }
}

/// Several sources awaited as one
#[derive(Debug)]
struct MergedFence {
    sources: SmallVec<[Arc<dyn FenceSource>; 4]>,
}

impl FenceSource for MergedFence {
    fn is_signaled(&self) -> bool {
        self.sources.iter().all(|s| s.is_signaled())
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.sources.iter().all(|source| {
            let remaining = deadline.saturating_duration_since(Instant::now());
            source.wait(remaining)
        })
    }
}

#[derive(Debug, Default)]
struct SignalState {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl FenceSource for SignalState {
    fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap()
    }

    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.signaled.lock().unwrap();
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |signaled| !*signaled)
            .unwrap();
        *guard
    }
}

/// A completion event that is signaled from software
///
/// Drivers use this to report completion of a commit, and tests use it to
/// control when a buffer becomes available.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    state: Arc<SignalState>,
}

impl Signal {
    /// Create a new unsignaled event
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the event as completed, waking up all waiters
    pub fn signal(&self) {
        let mut signaled = self.state.signaled.lock().unwrap();
        *signaled = true;
        self.state.cond.notify_all();
    }

    /// Queries the state of the event
    pub fn is_signaled(&self) -> bool {
        self.state.is_signaled()
    }

    /// Create a [`Fence`] waiting for this event
    pub fn fence(&self) -> Fence {
        Fence {
            source: Some(self.state.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::{Fence, MergedFence, Signal};

    fn is_send<S: Send + Sync>() {}

    #[test]
    fn fence_is_send_sync() {
        is_send::<Fence>();
        is_send::<Signal>();
    }

    #[test]
    fn signaled_fence_never_blocks() {
        let fence = Fence::signaled();
        assert!(!fence.is_valid());
        assert!(fence.is_signaled());
        assert!(fence.wait(Duration::ZERO));
    }

    #[test]
    fn merge_waits_for_both() {
        let a = Signal::new();
        let b = Signal::new();
        let merged = a.fence().merge(&b.fence());
        assert!(merged.is_valid());
        assert!(merged.get::<MergedFence>().is_some());

        a.signal();
        assert!(!merged.is_signaled());
        assert!(!merged.wait(Duration::from_millis(5)));
        b.signal();
        assert!(merged.is_signaled());
        assert!(merged.wait(Duration::ZERO));
    }

    #[test]
    fn merge_skips_noops_and_duplicates() {
        let a = Signal::new();
        let fence = a.fence();
        assert_eq!(fence.merge(&Fence::signaled()), fence);
        assert_eq!(Fence::signaled().merge(&fence), fence);
        assert_eq!(fence.merge(&fence.clone()), fence);

        let b = Signal::new();
        let c = Signal::new();
        let nested = fence.merge(&b.fence()).merge(&c.fence()).merge(&fence);
        let merged = nested.get::<MergedFence>().unwrap();
        assert_eq!(merged.sources.len(), 3);
    }

    #[test]
    fn wait_wakes_up_on_signal() {
        let signal = Signal::new();
        let fence = signal.fence();
        let handle = thread::spawn(move || fence.wait(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(10));
        signal.signal();
        assert!(handle.join().unwrap());
    }
}
