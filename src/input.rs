use glam::Vec2;
use std::collections::HashSet;

/// Pointer and key state fed by the host window each frame and read by the
/// input leaves (`IsKeyDown`, `HasTouch`, `GetTouchPos`, ...). Key names use
/// the same spellings the behavior DSL does: "A".."Z", "Space", "Escape",
/// "ArrowLeft", "ArrowRight", "ArrowUp", "ArrowDown", "Return", "Shift".
#[derive(Default)]
pub struct Input {
    keys_down: HashSet<String>,
    pub mouse_down: bool,
    pub mouse_pos: Vec2,
    pub has_tap: bool,
    pub has_double_tap: bool,
    pub button_down: Option<String>,
    pub swipe: Option<String>,
}

impl Input {
    pub fn new() -> Input {
        Input::default()
    }

    pub fn key_down(&mut self, key: impl Into<String>) {
        self.keys_down.insert(key.into());
    }

    pub fn key_up(&mut self, key: &str) {
        self.keys_down.remove(key);
    }

    pub fn is_key_down(&self, key: &str) -> bool {
        self.keys_down.contains(key)
    }

    pub fn touch(&mut self, pos: Vec2) {
        self.mouse_down = true;
        self.mouse_pos = pos;
    }

    pub fn release(&mut self) {
        self.mouse_down = false;
        self.button_down = None;
    }

    /// Clears the one-frame gesture flags; called at the end of each tick.
    pub fn end_frame(&mut self) {
        self.has_tap = false;
        self.has_double_tap = false;
        self.swipe = None;
    }

    pub fn reset(&mut self) {
        *self = Input::default();
    }
}
