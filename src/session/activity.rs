/// Who is currently talking
///
/// The assistant flag follows model turns; the user flag follows the mic
/// level and is cleared by the controller's debounce timer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeakingActivity {
    pub assistant: bool,
    pub user: bool,
}

impl SpeakingActivity {
    /// Both sides quiet
    pub fn is_silent(&self) -> bool {
        !self.assistant && !self.user
    }

    /// Record a mic level; returns true when it counts as speech
    pub fn observe_volume(&mut self, level: f32, threshold: f32) -> bool {
        let loud = level > threshold;
        if loud {
            self.user = true;
        }
        loud
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
