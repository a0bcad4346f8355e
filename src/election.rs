//! `Registering -> Voting -> Closed`. A phase ends at the earlier of its
//! quota or its deadline.

use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Registering,
    Voting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    RegisterRequest,
    VoteRequest,
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionReason {
    QuotaReached,
    DeadlineElapsed,
    /// Registration ended without a single token, so there is nothing to vote with.
    NoTokensIssued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub reason: TransitionReason,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ElectionError {
    #[error("{event:?} is not accepted while the election is {phase:?}")]
    WrongPhase { event: Event, phase: Phase },
}

#[derive(Debug, Clone)]
pub struct ElectionState {
    phase: Phase,
    issued: u64,
    cast: u64,
    registration_quota: u64,
    registration_window: Duration,
    voting_window: Duration,
    phase_started: Instant,
}

impl ElectionState {
    pub fn new(
        registration_quota: u64,
        registration_window: Duration,
        voting_window: Duration,
        now: Instant,
    ) -> Self {
        ElectionState {
            phase: Phase::Registering,
            issued: 0,
            cast: 0,
            registration_quota,
            registration_window,
            voting_window,
            phase_started: now,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Tokens issued during registration.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Votes accepted so far.
    pub fn cast(&self) -> u64 {
        self.cast
    }

    pub fn phase_started(&self) -> Instant {
        self.phase_started
    }

    /// Every issued token may be redeemed once.
    pub fn vote_quota(&self) -> u64 {
        self.issued
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Registering => Some(self.phase_started + self.registration_window),
            Phase::Voting => Some(self.phase_started + self.voting_window),
            Phase::Closed => None,
        }
    }

    /// The transition due at `now`, if any. Does not mutate.
    pub fn next_transition(&self, now: Instant) -> Option<Transition> {
        let deadline_passed = self.deadline().map_or(false, |deadline| now >= deadline);
        let (to, reason) = match self.phase {
            Phase::Registering => {
                let reason = if self.issued >= self.registration_quota {
                    TransitionReason::QuotaReached
                } else if deadline_passed {
                    TransitionReason::DeadlineElapsed
                } else {
                    return None;
                };
                if self.issued == 0 {
                    (Phase::Closed, TransitionReason::NoTokensIssued)
                } else {
                    (Phase::Voting, reason)
                }
            }
            Phase::Voting => {
                if self.cast >= self.vote_quota() {
                    (Phase::Closed, TransitionReason::QuotaReached)
                } else if deadline_passed {
                    (Phase::Closed, TransitionReason::DeadlineElapsed)
                } else {
                    return None;
                }
            }
            Phase::Closed => return None,
        };
        Some(Transition {
            from: self.phase,
            to,
            reason,
        })
    }

    /// Applies the transition due at `now`, restarting the phase clock.
    pub fn poll(&mut self, now: Instant) -> Option<Transition> {
        let transition = self.next_transition(now)?;
        self.phase = transition.to;
        self.phase_started = now;
        Some(transition)
    }

    /// Applies every transition due at `now`. With a zero-length window a
    /// phase can end the moment it starts, so this may step more than once.
    pub fn poll_all(&mut self, now: Instant) -> Vec<Transition> {
        let mut applied = Vec::new();
        while let Some(transition) = self.poll(now) {
            applied.push(transition);
        }
        applied
    }

    /// Checks whether `event` may be processed in the current phase. Does
    /// not poll; callers apply due transitions first. `Tick` is always
    /// admitted.
    pub fn admit(&self, event: Event) -> Result<(), ElectionError> {
        let allowed = match event {
            Event::RegisterRequest => self.phase == Phase::Registering,
            Event::VoteRequest => self.phase == Phase::Voting,
            Event::Tick => true,
        };
        if !allowed {
            return Err(ElectionError::WrongPhase {
                event,
                phase: self.phase,
            });
        }
        Ok(())
    }

    pub fn record_registration(&mut self, now: Instant) -> Vec<Transition> {
        self.issued += 1;
        self.poll_all(now)
    }

    pub fn record_vote(&mut self, now: Instant) -> Vec<Transition> {
        self.cast += 1;
        self.poll_all(now)
    }
}
