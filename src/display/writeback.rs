//! Capture of virtual display output
//!
//! The composed output of a virtual display lands in a small pool of engine-owned
//! buffers. At any time there is one buffer about to be targeted (*next*), at most one
//! being written by the frame in flight (*drawing*), and a bounded ring of *finished*
//! frames waiting for a consumer. Finished buffers that fall out of the ring go back to
//! the pool.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tracing::{debug, trace, warn};

use crate::{
    backend::{
        allocator::Fourcc,
        driver::{BufferHandle, CrtcId, Driver, DriverError},
        sync::Fence,
    },
    utils::{Buffer as BufferCoords, Size},
};

/// How output gets into the writeback buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritebackPath {
    /// The timing engine captures its own output
    Hardware(CrtcId),
    /// The 2D accelerator copies the composed target
    Accelerator,
}

/// A finished frame of a virtual display
#[derive(Debug, Clone, PartialEq)]
pub struct WritebackFrame {
    /// Buffer holding the frame
    pub buffer: BufferHandle,
    /// Frame number
    pub frame: u64,
    /// Signaled once the buffer is completely written
    pub fence: Fence,
}

/// Buffer ring of a virtual display
#[derive(Debug)]
pub struct Writeback {
    driver: Arc<dyn Driver>,
    path: WritebackPath,
    size: Size<i32, BufferCoords>,
    format: Fourcc,
    ring_size: usize,

    allocated: Vec<BufferHandle>,
    free: Vec<BufferHandle>,
    next: Option<BufferHandle>,
    drawing: Option<BufferHandle>,
    finished: VecDeque<WritebackFrame>,
}

impl Writeback {
    pub(crate) fn new(
        driver: Arc<dyn Driver>,
        path: WritebackPath,
        size: Size<i32, BufferCoords>,
        format: Fourcc,
        ring_size: usize,
    ) -> Result<Self, DriverError> {
        let mut writeback = Writeback {
            driver,
            path,
            size,
            format,
            ring_size: ring_size.max(1),
            allocated: Vec::new(),
            free: Vec::new(),
            next: None,
            drawing: None,
            finished: VecDeque::new(),
        };
        writeback.next = Some(writeback.dequeue()?);
        Ok(writeback)
    }

    /// How output gets captured
    pub fn path(&self) -> WritebackPath {
        self.path
    }

    /// Size of the writeback buffers
    pub fn size(&self) -> Size<i32, BufferCoords> {
        self.size
    }

    fn dequeue(&mut self) -> Result<BufferHandle, DriverError> {
        if let Some(buffer) = self.free.pop() {
            return Ok(buffer);
        }
        let buffer = self.driver.allocate_buffer(self.size, self.format)?;
        trace!(?buffer, total = self.allocated.len() + 1, "Allocated writeback buffer");
        self.allocated.push(buffer);
        Ok(buffer)
    }

    /// Move *next* to *drawing* and return the buffer the current frame should target
    pub(crate) fn begin_frame(&mut self) -> Result<BufferHandle, DriverError> {
        if let Some(stale) = self.drawing.take() {
            // previous frame was never finished
            self.free.push(stale);
        }
        let buffer = match self.next.take() {
            Some(buffer) => buffer,
            None => self.dequeue()?,
        };
        self.drawing = Some(buffer);
        Ok(buffer)
    }

    /// Return *drawing* to *next* after a failed frame
    pub(crate) fn abort_frame(&mut self) {
        if let Some(buffer) = self.drawing.take() {
            match self.next {
                None => self.next = Some(buffer),
                Some(_) => self.free.push(buffer),
            }
        }
    }

    /// Rotate *drawing* into the finished ring and dequeue a fresh *next*
    pub(crate) fn finish_frame(&mut self, frame: u64, fence: Fence) -> Result<(), DriverError> {
        let Some(buffer) = self.drawing.take() else {
            warn!(frame, "Finishing a writeback frame without a target buffer");
            return Ok(());
        };

        if self.finished.len() == self.ring_size {
            if let Some(evicted) = self.finished.pop_front() {
                trace!(frame = evicted.frame, "Evicting unconsumed writeback frame");
                self.free.push(evicted.buffer);
            }
        }
        self.finished.push_back(WritebackFrame { buffer, frame, fence });

        if self.next.is_none() {
            self.next = Some(self.dequeue()?);
        }
        Ok(())
    }

    /// Frames waiting for a consumer, oldest first
    pub fn finished(&self) -> impl Iterator<Item = &WritebackFrame> {
        self.finished.iter()
    }

    /// Hand out the newest finished frame after `last_consumed`
    ///
    /// Falls back to the most recent frame if nothing newer exists. Waits up to `timeout`
    /// for the frame to be completely written and returns `None` if it was not.
    #[profiling::function]
    pub fn take_output(&self, last_consumed: Option<u64>, timeout: Duration) -> Option<WritebackFrame> {
        let newest = self.finished.back()?;
        if let Some(last) = last_consumed.filter(|last| newest.frame <= *last) {
            debug!(last, newest = newest.frame, "No new writeback frame, repeating the most recent one");
        }

        if !newest.fence.wait(timeout) {
            warn!(frame = newest.frame, "Writeback frame did not complete in time");
            return None;
        }
        Some(newest.clone())
    }
}

impl Drop for Writeback {
    fn drop(&mut self) {
        for buffer in self.allocated.drain(..) {
            self.driver.free_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::backend::{sync::Signal, test::VirtualDriver};

    fn writeback(driver: &Arc<VirtualDriver>, ring_size: usize) -> Writeback {
        Writeback::new(
            driver.clone(),
            WritebackPath::Accelerator,
            (64, 64).into(),
            Fourcc::Xbgr8888,
            ring_size,
        )
        .unwrap()
    }

    #[test]
    fn ring_is_bounded_and_recycles() {
        let driver = Arc::new(VirtualDriver::new());
        let mut wb = writeback(&driver, 2);

        for frame in 0..5 {
            wb.begin_frame().unwrap();
            wb.finish_frame(frame, Fence::signaled()).unwrap();
        }

        let frames: Vec<_> = wb.finished().map(|f| f.frame).collect();
        assert_eq!(frames, vec![3, 4]);
        // two finished, one next, at most one recycled spare
        assert!(driver.allocated_buffers() <= 4, "writeback buffers are not recycled");
    }

    #[test]
    fn take_output_prefers_newer_frames() {
        let driver = Arc::new(VirtualDriver::new());
        let mut wb = writeback(&driver, 3);
        assert!(wb.take_output(None, Duration::ZERO).is_none());

        for frame in 0..2 {
            wb.begin_frame().unwrap();
            wb.finish_frame(frame, Fence::signaled()).unwrap();
        }
        assert_eq!(wb.take_output(None, Duration::ZERO).unwrap().frame, 1);
        assert_eq!(wb.take_output(Some(0), Duration::ZERO).unwrap().frame, 1);
        // nothing newer, repeat the most recent one
        assert_eq!(wb.take_output(Some(1), Duration::ZERO).unwrap().frame, 1);
    }

    #[test]
    fn take_output_waits_for_completion() {
        let driver = Arc::new(VirtualDriver::new());
        let mut wb = writeback(&driver, 3);
        let signal = Signal::new();

        wb.begin_frame().unwrap();
        wb.finish_frame(0, signal.fence()).unwrap();
        assert!(wb.take_output(None, Duration::from_millis(1)).is_none());

        signal.signal();
        assert!(wb.take_output(None, Duration::from_millis(1)).is_some());
    }

    #[test]
    fn aborted_frame_keeps_its_buffer() {
        let driver = Arc::new(VirtualDriver::new());
        let mut wb = writeback(&driver, 3);
        let first = wb.begin_frame().unwrap();
        wb.abort_frame();
        assert_eq!(wb.begin_frame().unwrap(), first);
    }

    #[test]
    fn buffers_are_freed_on_drop() {
        let driver = Arc::new(VirtualDriver::new());
        let mut wb = writeback(&driver, 3);
        wb.begin_frame().unwrap();
        wb.finish_frame(0, Fence::signaled()).unwrap();
        assert_eq!(driver.allocated_buffers(), 2);
        drop(wb);
        assert_eq!(driver.allocated_buffers(), 0);
    }
}
