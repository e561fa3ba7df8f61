use chrono::{DateTime, Utc};

use crate::protocol::{GameEvent, ServerEvent, Side};

/// Time budget assumed when a round-start carries no usable `allottedSeconds`.
pub const DEFAULT_ALLOTTED_SECS: u32 = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    Active,
    Ended,
    Concluded,
}

/// The server's derived view of the round currently being played: enough to
/// hand a late joiner, nothing more. `started_at` is stamped by the server
/// when the round-start is processed, so elapsed-time math never depends on
/// a client clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub topic: String,
    pub acting_side: Side,
    pub round_number: u32,
    pub phase: RoundPhase,
    pub allotted_secs: u32,
    pub started_at: DateTime<Utc>,
}

impl RoundSnapshot {
    /// Whole seconds left on the round clock, floored, never below zero.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u32 {
        let elapsed = (now - self.started_at)
            .num_seconds()
            .clamp(0, i64::from(u32::MAX));
        self.allotted_secs.saturating_sub(elapsed as u32)
    }
}

/// Derives the current-round view by watching the messages the relay
/// forwards. Purely an observer: it never emits anything on its own, and an
/// event it cannot use is simply not its business -- the relay keeps
/// forwarding either way.
#[derive(Debug, Default)]
pub struct RoundProjector {
    round: Option<RoundSnapshot>,
}

impl RoundProjector {
    pub fn new() -> Self {
        Self { round: None }
    }

    pub fn current(&self) -> Option<&RoundSnapshot> {
        self.round.as_ref()
    }

    pub fn observe(&mut self, event: &GameEvent, now: DateTime<Utc>) {
        match event {
            GameEvent::RoundStart {
                topic,
                acting_side,
                round_number,
                allotted_seconds,
            } => {
                // A new round replaces whatever came before it wholesale.
                self.round = Some(RoundSnapshot {
                    topic: topic.clone(),
                    acting_side: *acting_side,
                    round_number: *round_number,
                    phase: RoundPhase::Active,
                    allotted_secs: allotted_seconds.unwrap_or(DEFAULT_ALLOTTED_SECS),
                    started_at: now,
                });
            }
            GameEvent::RoundResolved | GameEvent::TimeExpired => {
                if let Some(round) = self.round.as_mut() {
                    round.phase = RoundPhase::Ended;
                }
            }
            GameEvent::SessionConcluded => {
                if let Some(round) = self.round.as_mut() {
                    round.phase = RoundPhase::Concluded;
                }
            }
            GameEvent::LobbyReset => {
                self.round = None;
            }
        }
    }

    /// Reconstructed round state for a mid-round joiner. Only an active
    /// round is worth catching up on; a finished one resolves through the
    /// next round-start or lobby-reset instead.
    pub fn catch_up(&self, now: DateTime<Utc>) -> Option<ServerEvent> {
        let round = self.round.as_ref()?;
        if round.phase != RoundPhase::Active {
            return None;
        }
        Some(ServerEvent::CatchUp {
            topic: round.topic.clone(),
            acting_side: round.acting_side,
            round_number: round.round_number,
            remaining_seconds: round.remaining_secs(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, 20, 0, 0).unwrap()
    }

    fn round_start(topic: &str, secs: Option<u32>) -> GameEvent {
        GameEvent::RoundStart {
            topic: topic.into(),
            acting_side: Side::A,
            round_number: 1,
            allotted_seconds: secs,
        }
    }

    #[test]
    fn test_round_start_opens_active_round() {
        let mut projector = RoundProjector::new();
        projector.observe(&round_start("lighthouse", Some(45)), t0());

        let round = projector.current().unwrap();
        assert_eq!(round.topic, "lighthouse");
        assert_eq!(round.phase, RoundPhase::Active);
        assert_eq!(round.allotted_secs, 45);
        assert_eq!(round.started_at, t0());
    }

    #[test]
    fn test_missing_allotted_seconds_falls_back() {
        let mut projector = RoundProjector::new();
        projector.observe(&round_start("lighthouse", None), t0());
        assert_eq!(projector.current().unwrap().allotted_secs, DEFAULT_ALLOTTED_SECS);
    }

    #[test]
    fn test_resolved_and_expired_both_end_the_round() {
        for end in [GameEvent::RoundResolved, GameEvent::TimeExpired] {
            let mut projector = RoundProjector::new();
            projector.observe(&round_start("lighthouse", Some(45)), t0());
            projector.observe(&end, t0() + Duration::seconds(5));
            assert_eq!(projector.current().unwrap().phase, RoundPhase::Ended);
        }
    }

    #[test]
    fn test_session_concluded_marks_concluded() {
        let mut projector = RoundProjector::new();
        projector.observe(&round_start("lighthouse", Some(45)), t0());
        projector.observe(&GameEvent::SessionConcluded, t0());
        assert_eq!(projector.current().unwrap().phase, RoundPhase::Concluded);
    }

    #[test]
    fn test_ending_without_a_round_is_a_noop() {
        let mut projector = RoundProjector::new();
        projector.observe(&GameEvent::RoundResolved, t0());
        projector.observe(&GameEvent::SessionConcluded, t0());
        assert!(projector.current().is_none());
    }

    #[test]
    fn test_lobby_reset_clears_everything() {
        let mut projector = RoundProjector::new();
        projector.observe(&round_start("lighthouse", Some(45)), t0());
        projector.observe(&GameEvent::RoundResolved, t0());
        projector.observe(&GameEvent::TimeExpired, t0());
        projector.observe(&GameEvent::LobbyReset, t0());
        assert!(projector.current().is_none());
        assert!(projector.catch_up(t0()).is_none());
    }

    #[test]
    fn test_new_round_replaces_old_wholesale() {
        let mut projector = RoundProjector::new();
        projector.observe(&round_start("lighthouse", Some(45)), t0());
        projector.observe(
            &GameEvent::RoundStart {
                topic: "submarine".into(),
                acting_side: Side::B,
                round_number: 2,
                allotted_seconds: Some(30),
            },
            t0() + Duration::seconds(50),
        );

        let round = projector.current().unwrap();
        assert_eq!(round.topic, "submarine");
        assert_eq!(round.acting_side, Side::B);
        assert_eq!(round.round_number, 2);
        assert_eq!(round.allotted_secs, 30);
        assert_eq!(round.started_at, t0() + Duration::seconds(50));
    }

    #[test]
    fn test_catch_up_right_after_start_has_full_budget() {
        let mut projector = RoundProjector::new();
        projector.observe(
            &GameEvent::RoundStart {
                topic: "lighthouse".into(),
                acting_side: Side::A,
                round_number: 3,
                allotted_seconds: Some(45),
            },
            t0(),
        );
        assert_eq!(
            projector.catch_up(t0()),
            Some(ServerEvent::CatchUp {
                topic: "lighthouse".into(),
                acting_side: Side::A,
                round_number: 3,
                remaining_seconds: 45,
            })
        );
    }

    #[test]
    fn test_catch_up_accounts_for_elapsed_time() {
        let mut projector = RoundProjector::new();
        projector.observe(&round_start("lighthouse", Some(45)), t0());
        let Some(ServerEvent::CatchUp { remaining_seconds, .. }) =
            projector.catch_up(t0() + Duration::seconds(10))
        else {
            panic!("expected a catch-up");
        };
        assert_eq!(remaining_seconds, 35);
    }

    #[test]
    fn test_elapsed_time_is_floored() {
        let mut projector = RoundProjector::new();
        projector.observe(&round_start("lighthouse", Some(45)), t0());
        let Some(ServerEvent::CatchUp { remaining_seconds, .. }) =
            projector.catch_up(t0() + Duration::milliseconds(10_900))
        else {
            panic!("expected a catch-up");
        };
        assert_eq!(remaining_seconds, 35);
    }

    #[test]
    fn test_remaining_never_goes_negative() {
        let mut projector = RoundProjector::new();
        projector.observe(&round_start("lighthouse", Some(45)), t0());
        let Some(ServerEvent::CatchUp { remaining_seconds, .. }) =
            projector.catch_up(t0() + Duration::seconds(300))
        else {
            panic!("expected a catch-up");
        };
        assert_eq!(remaining_seconds, 0);
    }

    #[test]
    fn test_clock_before_start_counts_as_zero_elapsed() {
        let snapshot = RoundSnapshot {
            topic: "lighthouse".into(),
            acting_side: Side::A,
            round_number: 1,
            phase: RoundPhase::Active,
            allotted_secs: 45,
            started_at: t0(),
        };
        assert_eq!(snapshot.remaining_secs(t0() - Duration::seconds(3)), 45);
    }

    #[test]
    fn test_no_catch_up_once_round_is_over() {
        for end in [GameEvent::RoundResolved, GameEvent::SessionConcluded] {
            let mut projector = RoundProjector::new();
            projector.observe(&round_start("lighthouse", Some(45)), t0());
            projector.observe(&end, t0() + Duration::seconds(5));
            assert!(projector.catch_up(t0() + Duration::seconds(6)).is_none());
        }
    }

    #[test]
    fn test_no_catch_up_in_an_idle_room() {
        let projector = RoundProjector::new();
        assert!(projector.catch_up(t0()).is_none());
    }
}
