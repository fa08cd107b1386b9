/// Near-bottom distance used to resume follow mode deterministically.
const AUTO_FOLLOW_RESUME_THRESHOLD: f32 = 24.0;
/// Small delta used to ignore floating-point scroll jitter.
const SCROLL_DELTA_EPSILON: f32 = 1.0;
pub const DEFAULT_NEAR_TOP_THRESHOLD: f32 = 80.0;

/// Viewport follow and anchor logic, independent from message content.
///
/// Offsets are measured from the top of the content; `max_offset` is the
/// offset at which the tail is visible.
#[derive(Debug, Clone)]
pub struct ScrollManager {
    offset: f32,
    viewport_height: f32,
    content_height: f32,
    near_top_threshold: f32,
    follow_bottom: bool,
    pending_scroll_to_bottom: bool,
    /// Content height captured right before older turns were spliced in.
    prepend_anchor: Option<f32>,
}

impl ScrollManager {
    pub fn new(viewport_height: f32, near_top_threshold: f32) -> Self {
        Self {
            offset: 0.0,
            viewport_height: viewport_height.max(0.0),
            content_height: 0.0,
            near_top_threshold: near_top_threshold.max(0.0),
            follow_bottom: true,
            pending_scroll_to_bottom: false,
            prepend_anchor: None,
        }
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    pub fn content_height(&self) -> f32 {
        self.content_height
    }

    pub fn max_offset(&self) -> f32 {
        (self.content_height - self.viewport_height).max(0.0)
    }

    pub fn is_following_bottom(&self) -> bool {
        self.follow_bottom
    }

    pub fn is_near_top(&self) -> bool {
        self.offset <= self.near_top_threshold
    }

    pub fn request_scroll_to_bottom(&mut self) {
        self.pending_scroll_to_bottom = true;
        self.follow_bottom = true;
    }

    pub fn request_scroll_to_bottom_if_following(&mut self) {
        if self.follow_bottom || self.is_near_bottom() {
            self.pending_scroll_to_bottom = true;
        }
    }

    pub fn reset(&mut self) {
        self.offset = 0.0;
        self.content_height = 0.0;
        self.prepend_anchor = None;
        self.follow_bottom = true;
        self.pending_scroll_to_bottom = true;
    }

    /// Records a user scroll. Returns `true` when the new position crosses
    /// into the near-top zone.
    pub fn on_scroll(&mut self, offset: f32) -> bool {
        let was_near_top = self.is_near_top();
        let offset = offset.clamp(0.0, self.max_offset());
        let delta = offset - self.offset;
        self.offset = offset;

        if delta < -SCROLL_DELTA_EPSILON {
            // Pause follow mode only when the user scrolls away from the tail.
            if !self.is_near_bottom() {
                self.follow_bottom = false;
            }
        } else if delta > SCROLL_DELTA_EPSILON && self.is_near_bottom() {
            self.follow_bottom = true;
        }

        (!was_near_top && self.is_near_top()) || (delta < 0.0 && self.offset == 0.0)
    }

    /// Remembers the current content height so the next layout can keep the
    /// reading position after older turns are inserted above it.
    pub fn begin_prepend(&mut self) {
        self.prepend_anchor = Some(self.content_height);
    }

    /// Applies pending adjustments once layout reflects the new content.
    /// Returns the offset change.
    pub fn on_layout(&mut self, content_height: f32) -> f32 {
        let before = self.offset;
        let was_near_bottom = self.is_near_bottom();
        self.content_height = content_height.max(0.0);

        if let Some(previous_height) = self.prepend_anchor.take() {
            self.offset += self.content_height - previous_height;
            self.follow_bottom = false;
        }

        if self.pending_scroll_to_bottom || (self.follow_bottom && was_near_bottom) {
            self.offset = self.max_offset();
            self.follow_bottom = true;
        }
        self.pending_scroll_to_bottom = false;

        self.offset = self.offset.clamp(0.0, self.max_offset());
        self.offset - before
    }

    fn is_near_bottom(&self) -> bool {
        (self.max_offset() - self.offset).abs() <= AUTO_FOLLOW_RESUME_THRESHOLD
    }
}

impl Default for ScrollManager {
    fn default() -> Self {
        Self::new(600.0, DEFAULT_NEAR_TOP_THRESHOLD)
    }
}
