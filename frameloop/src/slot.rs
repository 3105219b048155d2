use std::sync::Arc;

use parking_lot::Mutex;

use crate::Frame;

/**
    What a player currently shows.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerState {
    /// No frame yet; show a placeholder.
    Loading,
    /// Frames are arriving.
    Playing,
    /// The source was exhausted; the last frame stays on screen.
    Ended,
    /// Stopped by the host.
    Cancelled,
    /// A terminal error; show a placeholder.
    Failed(String),
}

/**
    Point-in-time view of a [`FrameSlot`].
*/
#[derive(Clone, Debug)]
pub struct SlotSnapshot {
    pub state: PlayerState,
    pub frame: Option<Arc<Frame>>,
    /// Number of frames installed so far, across restarts.
    pub generation: u64,
}

impl SlotSnapshot {
    pub fn shows_placeholder(&self) -> bool {
        self.frame.is_none() || matches!(self.state, PlayerState::Failed(_))
    }
}

struct SlotInner {
    state: PlayerState,
    frame: Option<Arc<Frame>>,
    generation: u64,
}

/**
    The display side's "last displayed frame".

    Holds at most one frame. Installing a frame releases the previous one
    first; readers get a shared handle, so a frame stays alive for as long
    as someone is still drawing it.
*/
pub struct FrameSlot {
    inner: Mutex<SlotInner>,
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: PlayerState::Loading,
                frame: None,
                generation: 0,
            }),
        }
    }

    /**
        Replace the displayed frame.
    */
    pub fn install(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        drop(inner.frame.take());
        inner.frame = Some(Arc::new(frame));
        inner.generation += 1;
        inner.state = PlayerState::Playing;
    }

    pub fn set_state(&self, state: PlayerState) {
        self.inner.lock().state = state;
    }

    /**
        Drop the displayed frame and go back to the placeholder.
    */
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        drop(inner.frame.take());
        inner.state = PlayerState::Loading;
    }

    /**
        Record a terminal failure. The frame is released so the display
        falls back to its placeholder.
    */
    pub fn fail(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        drop(inner.frame.take());
        inner.state = PlayerState::Failed(message.into());
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().state.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        let inner = self.inner.lock();
        SlotSnapshot {
            state: inner.state.clone(),
            frame: inner.frame.clone(),
            generation: inner.generation,
        }
    }
}
