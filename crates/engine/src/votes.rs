use jukebox_core::{ParticipantId, QueueEntity, QuorumConfig};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatedAction {
    Skip,
    Clear,
}

impl GatedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            GatedAction::Skip => "skip",
            GatedAction::Clear => "clear",
        }
    }
}

/// Votes still missing: the smaller of the by-percent and by-count shortfalls.
pub fn remaining_votes(current: usize, listener_count: usize, min_percent: f64, min_count: i64) -> i64 {
    let current = current as i64;
    let by_percent = (listener_count as f64 * min_percent).ceil() as i64 - current;
    let by_count = min_count - current;
    by_percent.min(by_count)
}

#[derive(Debug, Default)]
pub struct VoteCoordinator {
    skip: HashSet<ParticipantId>,
    skip_target: Option<u64>,
    clear: HashSet<ParticipantId>,
}

impl VoteCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_vote(
        &mut self,
        action: GatedAction,
        voter: ParticipantId,
        listener_count: usize,
        min_percent: f64,
        min_count: i64,
    ) -> i64 {
        let voters = self.voters_mut(action);
        voters.insert(voter);
        let remaining = remaining_votes(voters.len(), listener_count, min_percent, min_count);
        debug!(
            action = action.as_str(),
            votes = voters.len(),
            listener_count,
            remaining,
            "vote registered"
        );
        remaining
    }

    pub fn register_with(
        &mut self,
        action: GatedAction,
        voter: ParticipantId,
        listener_count: usize,
        quorum: &QuorumConfig,
    ) -> i64 {
        self.register_vote(action, voter, listener_count, quorum.min_percent, quorum.min_count)
    }

    pub fn bind_skip_target(&mut self, play_id: u64) {
        if self.skip_target != Some(play_id) {
            if !self.skip.is_empty() {
                debug!(play_id, dropped = self.skip.len(), "skip votes were for an earlier item");
            }
            self.skip.clear();
            self.skip_target = Some(play_id);
        }
    }

    pub fn reset(&mut self, action: GatedAction) {
        self.voters_mut(action).clear();
    }

    pub fn reset_all(&mut self) {
        self.skip.clear();
        self.clear.clear();
    }

    pub fn vote_count(&self, action: GatedAction) -> usize {
        match action {
            GatedAction::Skip => self.skip.len(),
            GatedAction::Clear => self.clear.len(),
        }
    }

    pub fn on_current_changed(&mut self, now_idle: bool) {
        self.reset(GatedAction::Skip);
        if now_idle {
            self.reset(GatedAction::Clear);
        }
    }

    fn voters_mut(&mut self, action: GatedAction) -> &mut HashSet<ParticipantId> {
        match action {
            GatedAction::Skip => &mut self.skip,
            GatedAction::Clear => &mut self.clear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    Requester,
    GracePeriodElapsed,
}

#[derive(Debug, Clone, Copy)]
pub struct SkipBypassPolicy {
    pub self_insta_skip: bool,
    /// Zero disables the grace period.
    pub pass_after_secs: u64,
}

pub fn skip_bypass(
    policy: SkipBypassPolicy,
    voter: &ParticipantId,
    current: &QueueEntity,
    elapsed_secs: u64,
) -> Option<BypassReason> {
    if policy.self_insta_skip && current.is_requested_by(voter) {
        return Some(BypassReason::Requester);
    }
    if policy.pass_after_secs > 0 && elapsed_secs >= policy.pass_after_secs {
        return Some(BypassReason::GracePeriodElapsed);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{
        remaining_votes, skip_bypass, BypassReason, GatedAction, SkipBypassPolicy, VoteCoordinator,
    };
    use jukebox_core::{ChannelId, ParticipantId, QueueEntity};

    fn voter(n: usize) -> ParticipantId {
        ParticipantId::new(format!("user{n}"))
    }

    #[test]
    fn count_criterion_passes_before_percent() {
        let mut votes = VoteCoordinator::new();
        let results: Vec<i64> = (1..=3)
            .map(|n| votes.register_vote(GatedAction::Skip, voter(n), 10, 0.5, 3))
            .collect();

        assert_eq!(results, vec![2, 1, 0]);
    }

    #[test]
    fn percent_criterion_can_pass_first() {
        let mut votes = VoteCoordinator::new();
        assert_eq!(votes.register_vote(GatedAction::Clear, voter(1), 2, 0.5, 4), 0);
    }

    #[test]
    fn duplicate_votes_are_idempotent() {
        let mut votes = VoteCoordinator::new();
        let first = votes.register_vote(GatedAction::Skip, voter(1), 10, 0.5, 3);
        let again = votes.register_vote(GatedAction::Skip, voter(1), 10, 0.5, 3);

        assert_eq!(first, again);
        assert_eq!(votes.vote_count(GatedAction::Skip), 1);
    }

    #[test]
    fn actions_keep_separate_voter_sets() {
        let mut votes = VoteCoordinator::new();
        votes.register_vote(GatedAction::Skip, voter(1), 10, 0.5, 3);
        votes.register_vote(GatedAction::Skip, voter(2), 10, 0.5, 3);

        assert_eq!(votes.register_vote(GatedAction::Clear, voter(1), 10, 0.5, 3), 2);
        assert_eq!(votes.vote_count(GatedAction::Skip), 2);
    }

    #[test]
    fn reset_twice_is_a_no_op() {
        let mut votes = VoteCoordinator::new();
        votes.register_vote(GatedAction::Skip, voter(1), 10, 0.5, 3);
        votes.register_vote(GatedAction::Clear, voter(1), 10, 0.5, 3);

        votes.reset(GatedAction::Skip);
        votes.reset(GatedAction::Skip);

        assert_eq!(votes.vote_count(GatedAction::Skip), 0);
        assert_eq!(votes.vote_count(GatedAction::Clear), 1);
    }

    #[test]
    fn zero_listeners_fall_out_of_the_formula() {
        assert_eq!(remaining_votes(1, 0, 0.5, 3), -1);
    }

    #[test]
    fn disabled_criteria_pass_on_one_vote() {
        assert!(remaining_votes(1, 10, 0.0, 0) <= 0);
        assert!(remaining_votes(1, 10, 0.0, 5) <= 0);
        assert!(remaining_votes(1, 10, 0.5, 0) <= 0);
    }

    #[test]
    fn change_of_current_resets_skip_and_idle_resets_clear() {
        let mut votes = VoteCoordinator::new();
        votes.register_vote(GatedAction::Skip, voter(1), 10, 0.5, 3);
        votes.register_vote(GatedAction::Clear, voter(1), 10, 0.5, 3);

        votes.on_current_changed(false);
        assert_eq!(votes.vote_count(GatedAction::Skip), 0);
        assert_eq!(votes.vote_count(GatedAction::Clear), 1);

        votes.on_current_changed(true);
        assert_eq!(votes.vote_count(GatedAction::Clear), 0);
    }

    #[test]
    fn skip_votes_do_not_carry_over_to_another_play() {
        let mut votes = VoteCoordinator::new();
        votes.bind_skip_target(1);
        votes.register_vote(GatedAction::Skip, voter(1), 3, 1.0, 2);
        votes.register_vote(GatedAction::Clear, voter(1), 3, 1.0, 2);

        votes.bind_skip_target(1);
        assert_eq!(votes.vote_count(GatedAction::Skip), 1);

        votes.bind_skip_target(2);
        assert_eq!(votes.vote_count(GatedAction::Skip), 0);
        assert_eq!(votes.vote_count(GatedAction::Clear), 1);
        assert_eq!(votes.register_vote(GatedAction::Skip, voter(2), 3, 1.0, 2), 1);
    }

    #[test]
    fn bypass_for_requester_and_grace_period() {
        let item = QueueEntity::new("stream://a", "A")
            .requested_by(ParticipantId::new("alice"), ChannelId::new("general"));
        let policy = SkipBypassPolicy {
            self_insta_skip: true,
            pass_after_secs: 60,
        };

        assert_eq!(
            skip_bypass(policy, &ParticipantId::new("alice"), &item, 0),
            Some(BypassReason::Requester)
        );
        assert_eq!(skip_bypass(policy, &ParticipantId::new("bob"), &item, 10), None);
        assert_eq!(
            skip_bypass(policy, &ParticipantId::new("bob"), &item, 60),
            Some(BypassReason::GracePeriodElapsed)
        );

        let strict = SkipBypassPolicy {
            self_insta_skip: false,
            pass_after_secs: 0,
        };
        assert_eq!(skip_bypass(strict, &ParticipantId::new("alice"), &item, 10_000), None);
    }
}
