use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cumulative play time of one item across pause/resume cycles.
#[derive(Debug, Clone, Default)]
pub struct ElapsedTimeTracker {
    last_resume: Option<Instant>,
    running: bool,
    accumulated_secs: u64,
}

impl ElapsedTimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed_at(Instant::now())
    }

    pub fn resume_at(&mut self, now: Instant) {
        self.last_resume = Some(now);
        self.running = true;
    }

    pub fn pause_at(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        self.accumulated_secs = self.accumulated_secs.saturating_add(self.running_secs(now));
        self.running = false;
    }

    pub fn elapsed_at(&self, now: Instant) -> u64 {
        if self.running {
            self.accumulated_secs.saturating_add(self.running_secs(now))
        } else {
            self.accumulated_secs
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn running_secs(&self, now: Instant) -> u64 {
        self.last_resume
            .map(|at| now.saturating_duration_since(at).as_secs())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct QueueEntity {
    pub source_locator: String,
    pub display_title: String,
    /// Zero means unknown or unbounded (live streams).
    pub length_seconds: u64,
    pub requester: Option<ParticipantId>,
    pub origin_channel: Option<ChannelId>,
    pub artwork_url: Option<String>,
    pub canonical_url: Option<String>,
    pub tracker: ElapsedTimeTracker,
}

impl QueueEntity {
    pub fn new(source_locator: impl Into<String>, display_title: impl Into<String>) -> Self {
        Self {
            source_locator: source_locator.into(),
            display_title: display_title.into(),
            length_seconds: 0,
            requester: None,
            origin_channel: None,
            artwork_url: None,
            canonical_url: None,
            tracker: ElapsedTimeTracker::new(),
        }
    }

    pub fn with_length(mut self, length_seconds: u64) -> Self {
        self.length_seconds = length_seconds;
        self
    }

    pub fn requested_by(mut self, requester: ParticipantId, origin: ChannelId) -> Self {
        self.requester = Some(requester);
        self.origin_channel = Some(origin);
        self
    }

    pub fn elapsed_at(&self, now: Instant) -> u64 {
        self.tracker.elapsed_at(now)
    }

    pub fn remaining_at(&self, now: Instant) -> u64 {
        self.length_seconds.saturating_sub(self.elapsed_at(now))
    }

    pub fn is_requested_by(&self, participant: &ParticipantId) -> bool {
        self.requester.as_ref() == Some(participant)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelId, ElapsedTimeTracker, ParticipantId, QueueEntity};
    use std::time::{Duration, Instant};

    #[test]
    fn tracker_accumulates_across_pause_and_resume() {
        let t0 = Instant::now();
        let mut tracker = ElapsedTimeTracker::new();

        tracker.resume_at(t0);
        tracker.pause_at(t0 + Duration::from_secs(30));
        assert_eq!(tracker.elapsed_at(t0 + Duration::from_secs(35)), 30);

        tracker.resume_at(t0 + Duration::from_secs(40));
        assert_eq!(tracker.elapsed_at(t0 + Duration::from_secs(50)), 40);
    }

    #[test]
    fn tracker_never_started_reports_zero() {
        let tracker = ElapsedTimeTracker::new();
        assert_eq!(tracker.elapsed(), 0);
        assert!(!tracker.is_running());
    }

    #[test]
    fn pause_twice_does_not_double_count() {
        let t0 = Instant::now();
        let mut tracker = ElapsedTimeTracker::new();
        tracker.resume_at(t0);
        tracker.pause_at(t0 + Duration::from_secs(10));
        tracker.pause_at(t0 + Duration::from_secs(20));
        assert_eq!(tracker.elapsed_at(t0 + Duration::from_secs(30)), 10);
    }

    #[test]
    fn backwards_clock_clamps_to_accumulated() {
        let t0 = Instant::now() + Duration::from_secs(100);
        let mut tracker = ElapsedTimeTracker::new();
        tracker.resume_at(t0);
        tracker.pause_at(t0 + Duration::from_secs(5));
        tracker.resume_at(t0 + Duration::from_secs(10));

        assert_eq!(tracker.elapsed_at(t0), 5);
    }

    #[test]
    fn remaining_floors_at_zero() {
        let t0 = Instant::now();
        let mut item = QueueEntity::new("stream://a", "A").with_length(20);
        item.tracker.resume_at(t0);

        assert_eq!(item.remaining_at(t0 + Duration::from_secs(5)), 15);
        assert_eq!(item.remaining_at(t0 + Duration::from_secs(45)), 0);
    }

    #[test]
    fn requester_matches_only_attached_identity() {
        let item = QueueEntity::new("stream://a", "A")
            .requested_by(ParticipantId::new("alice"), ChannelId::new("general"));

        assert!(item.is_requested_by(&ParticipantId::new("alice")));
        assert!(!item.is_requested_by(&ParticipantId::new("bob")));
    }
}
