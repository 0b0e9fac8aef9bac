use rocket::serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Shared playback state for every screen on the deployment. One instance
/// lives in Rocket managed state; there is no per-client state, which is
/// what keeps multiple displays in lock-step.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SlideshowState {
    pub index: usize,
    pub paused: bool,
    pub updated_at: i64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Next,
    Prev,
    Pause,
    Play,
}

pub struct SlideshowCoordinator {
    state: Mutex<SlideshowState>,
}

impl Default for SlideshowCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SlideshowCoordinator {
    /// Fresh state on every process start: first image, playing.
    pub fn new() -> Self {
        SlideshowCoordinator {
            state: Mutex::new(SlideshowState {
                index: 0,
                paused: false,
                updated_at: chrono::Utc::now().timestamp(),
            }),
        }
    }

    fn clamp(index: usize, visible_count: usize) -> usize {
        if visible_count == 0 {
            0
        } else {
            index.min(visible_count - 1)
        }
    }

    /// Read the current state. The visible count is re-checked on every poll
    /// because visibility can change between polls; a stale index is pulled
    /// back into range before anyone sees it.
    pub fn snapshot(&self, visible_count: usize) -> SlideshowState {
        let mut state = self.state.lock().expect("slideshow state poisoned");
        state.index = Self::clamp(state.index, visible_count);
        state.clone()
    }

    /// Commands apply in arrival order; bounds are re-validated against the
    /// live visible count at transition time.
    pub fn apply(&self, action: ControlAction, visible_count: usize) -> SlideshowState {
        let mut state = self.state.lock().expect("slideshow state poisoned");
        state.index = Self::clamp(state.index, visible_count);
        match action {
            ControlAction::Next => {
                if visible_count > 0 {
                    state.index = (state.index + 1) % visible_count;
                }
            }
            ControlAction::Prev => {
                if visible_count > 0 {
                    state.index = (state.index + visible_count - 1) % visible_count;
                }
            }
            ControlAction::Pause => state.paused = true,
            ControlAction::Play => state.paused = false,
        }
        state.updated_at = chrono::Utc::now().timestamp();
        state.clone()
    }
}
