use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use twin_api::ClientMessageId;

pub const DEFAULT_CHARS_PER_TICK: usize = 3;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Outcome of one reveal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reveal {
    /// More characters became visible.
    Advanced,
    /// Everything known so far is visible; waiting for more text.
    CaughtUp,
    /// The final text is fully visible. Reported once per animation.
    Completed,
    Idle,
}

/// Character-paced reveal of a growing target string.
///
/// The target may grow (deltas) or be replaced (final text). Replacing it
/// clamps the visible part to the common prefix of old and new text, so a
/// single final delivery and a delta stream reveal identically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Typewriter {
    target: String,
    revealed: usize,
    active: bool,
    finalized: bool,
    completed: bool,
}

impl Typewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh reveal from empty text.
    pub fn start(&mut self) {
        *self = Self {
            active: true,
            ..Self::default()
        };
    }

    pub fn set_target(&mut self, text: &str) {
        if !self.active || self.completed {
            return;
        }
        self.revealed = self.revealed.min(common_prefix_len(&self.target, text));
        self.target.clear();
        self.target.push_str(text);
    }

    /// Sets the authoritative final text; completion fires once it is shown.
    pub fn finalize(&mut self, text: &str) {
        self.set_target(text);
        if self.active {
            self.finalized = true;
        }
    }

    pub fn tick(&mut self, chars_per_tick: usize) -> Reveal {
        if !self.active || self.completed {
            return Reveal::Idle;
        }

        let rest = &self.target[self.revealed..];
        if rest.is_empty() {
            if self.finalized {
                self.completed = true;
                return Reveal::Completed;
            }
            return Reveal::CaughtUp;
        }

        let step = rest
            .char_indices()
            .nth(chars_per_tick.max(1))
            .map_or(rest.len(), |(index, _)| index);
        self.revealed += step;

        if self.finalized && self.revealed == self.target.len() {
            self.completed = true;
            return Reveal::Completed;
        }
        Reveal::Advanced
    }

    /// Shows the whole target immediately and ends the animation without
    /// reporting completion.
    pub fn stop(&mut self) {
        self.revealed = self.target.len();
        self.active = false;
    }

    pub fn visible(&self) -> &str {
        &self.target[..self.revealed]
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_animating(&self) -> bool {
        self.active && !self.completed
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

fn common_prefix_len(left: &str, right: &str) -> usize {
    let mut len = left
        .bytes()
        .zip(right.bytes())
        .take_while(|(a, b)| a == b)
        .count();
    while !left.is_char_boundary(len) {
        len -= 1;
    }
    len
}

/// Drives a [`Typewriter`] for one turn at a fixed cadence.
///
/// Starting a new animation drops the previous timer, so two reveals never
/// interleave.
#[derive(Debug)]
pub struct Animator {
    typewriter: Typewriter,
    owner: Option<ClientMessageId>,
    interval: Option<Interval>,
    chars_per_tick: usize,
    tick_interval: Duration,
}

/// One reveal step attributed to the turn being animated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationFrame {
    pub owner: ClientMessageId,
    pub reveal: Reveal,
}

impl Animator {
    pub fn new(chars_per_tick: usize, tick_interval: Duration) -> Self {
        Self {
            typewriter: Typewriter::new(),
            owner: None,
            interval: None,
            chars_per_tick: chars_per_tick.max(1),
            tick_interval: tick_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn owner(&self) -> Option<ClientMessageId> {
        self.owner
    }

    pub fn owns(&self, id: ClientMessageId) -> bool {
        self.owner == Some(id)
    }

    /// Begins revealing `id`'s answer from empty, replacing any running
    /// animation.
    pub fn start(&mut self, id: ClientMessageId) {
        self.owner = Some(id);
        self.typewriter.start();
        self.interval = None;
    }

    pub fn set_target(&mut self, id: ClientMessageId, text: &str) {
        if self.owns(id) {
            self.typewriter.set_target(text);
            self.arm();
        }
    }

    pub fn finalize(&mut self, id: ClientMessageId, text: &str) {
        if self.owns(id) {
            self.typewriter.finalize(text);
            self.arm();
        }
    }

    /// Reveals `text` from empty and completes once it is fully shown.
    pub fn animate(&mut self, id: ClientMessageId, text: &str) {
        self.start(id);
        self.finalize(id, text);
    }

    /// Stops the timer and shows whatever text is known.
    pub fn cancel(&mut self) {
        self.typewriter.stop();
        self.interval = None;
    }

    /// Forgets the current turn entirely.
    pub fn reset(&mut self) {
        self.typewriter = Typewriter::new();
        self.owner = None;
        self.interval = None;
    }

    /// Visible text for `id`, or `None` when another turn is animated.
    pub fn visible_for(&self, id: ClientMessageId) -> Option<&str> {
        self.owns(id).then(|| self.typewriter.visible())
    }

    pub fn is_animating(&self, id: ClientMessageId) -> bool {
        self.owns(id) && self.typewriter.is_animating()
    }

    pub fn typewriter(&self) -> &Typewriter {
        &self.typewriter
    }

    /// Waits for the next tick and applies it. Pends forever while idle, so
    /// it can sit in a `select!` loop. Cancel safe.
    pub async fn next_frame(&mut self) -> AnimationFrame {
        let (Some(owner), Some(interval)) = (self.owner, self.interval.as_mut()) else {
            return std::future::pending().await;
        };
        interval.tick().await;

        let reveal = self.typewriter.tick(self.chars_per_tick);
        // Park the timer while caught up; new text re-arms it.
        if matches!(reveal, Reveal::CaughtUp | Reveal::Completed | Reveal::Idle) {
            self.interval = None;
        }
        AnimationFrame { owner, reveal }
    }

    fn arm(&mut self) {
        if self.interval.is_none() && self.typewriter.is_animating() {
            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.interval = Some(interval);
        }
    }
}

impl Default for Animator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TICK, DEFAULT_TICK_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_end(typewriter: &mut Typewriter, chars_per_tick: usize) -> usize {
        let mut completions = 0;
        for _ in 0..10_000 {
            match typewriter.tick(chars_per_tick) {
                Reveal::Completed => completions += 1,
                Reveal::Idle => break,
                Reveal::Advanced | Reveal::CaughtUp => {}
            }
        }
        completions
    }

    #[test]
    fn reveals_exact_text_and_completes_once() {
        for chars_per_tick in [1, 2, 3, 7, 100] {
            let mut typewriter = Typewriter::new();
            typewriter.start();
            typewriter.finalize("Hi there, ünïcode ✓!");

            assert_eq!(run_to_end(&mut typewriter, chars_per_tick), 1);
            assert_eq!(typewriter.visible(), "Hi there, ünïcode ✓!");
        }
    }

    #[test]
    fn waits_for_more_text_until_finalized() {
        let mut typewriter = Typewriter::new();
        typewriter.start();
        typewriter.set_target("Hi");

        assert_eq!(typewriter.tick(3), Reveal::Advanced);
        assert_eq!(typewriter.tick(3), Reveal::CaughtUp);
        assert_eq!(typewriter.visible(), "Hi");

        typewriter.set_target("HiHi");
        assert_eq!(typewriter.tick(1), Reveal::Advanced);
        assert_eq!(typewriter.visible(), "HiH");
    }

    #[test]
    fn final_text_clamps_to_common_prefix() {
        let mut typewriter = Typewriter::new();
        typewriter.start();
        typewriter.set_target("HiHi");
        typewriter.tick(4);
        assert_eq!(typewriter.visible(), "HiHi");

        typewriter.finalize("Hi there!");
        assert_eq!(typewriter.visible(), "Hi");
        assert_eq!(run_to_end(&mut typewriter, 2), 1);
        assert_eq!(typewriter.visible(), "Hi there!");
    }

    #[test]
    fn empty_final_text_completes() {
        let mut typewriter = Typewriter::new();
        typewriter.start();
        typewriter.finalize("");
        assert_eq!(typewriter.tick(3), Reveal::Completed);
        assert_eq!(typewriter.tick(3), Reveal::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn animator_completes_on_the_timer() {
        let id = ClientMessageId::generate();
        let mut animator = Animator::new(2, Duration::from_millis(10));
        animator.animate(id, "abcde");

        let mut completions = 0;
        let mut frames = 0;
        while completions == 0 {
            let frame = animator.next_frame().await;
            assert_eq!(frame.owner, id);
            frames += 1;
            if frame.reveal == Reveal::Completed {
                completions += 1;
            }
        }

        assert_eq!(frames, 3);
        assert_eq!(animator.visible_for(id), Some("abcde"));
        assert!(!animator.is_animating(id));
    }

    #[tokio::test(start_paused = true)]
    async fn starting_again_discards_the_previous_reveal() {
        let first = ClientMessageId::generate();
        let second = ClientMessageId::generate();
        let mut animator = Animator::new(1, Duration::from_millis(10));

        animator.animate(first, "first answer");
        animator.next_frame().await;
        animator.next_frame().await;

        animator.animate(second, "xyz");
        assert_eq!(animator.visible_for(first), None);
        assert_eq!(animator.visible_for(second), Some(""));

        let mut shown = Vec::new();
        loop {
            let frame = animator.next_frame().await;
            assert_eq!(frame.owner, second);
            shown.push(animator.visible_for(second).unwrap().to_string());
            if frame.reveal == Reveal::Completed {
                break;
            }
        }
        assert_eq!(shown, ["x", "xy", "xyz"]);
    }
}
