use crate::shared::frame::Frame;

/// Sequential camera or file frame source.
pub trait FrameSource: Send {
    /// Acquires the underlying device. Called once before the frame loop
    /// starts; a failure aborts session start.
    fn open(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        Ok(())
    }

    /// Blocks until the next frame is available. `Ok(None)` means the
    /// source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>>;

    fn close(&mut self) {}
}
