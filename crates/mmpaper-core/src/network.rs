//! Network acquisition across a fixed list of candidate access points.

use embedded_hal_async::delay::DelayNs;
use heapless::Vec;
use log::{info, warn};

use crate::update::UpdateError;

pub const MAX_CANDIDATES: usize = 8;

/// One access point the device may join.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NetworkCandidate {
    pub identifier: &'static str,
    pub secret: &'static str,
    /// Lower values are tried first.
    pub priority: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AcquireConfig {
    pub max_loops: u8,
    pub per_candidate_timeout_ms: u32,
    pub inter_loop_delay_ms: u32,
    pub link_poll_ms: u32,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            max_loops: 3,
            per_candidate_timeout_ms: 10_000,
            inter_loop_delay_ms: 5_000,
            link_poll_ms: 100,
        }
    }
}

/// Radio link control. `begin` starts an association and returns without
/// waiting for it; the caller polls `is_linked`.
#[allow(async_fn_in_trait)]
pub trait LinkDriver {
    type Error;

    async fn begin(&mut self, candidate: &NetworkCandidate) -> Result<(), Self::Error>;
    fn is_linked(&mut self) -> bool;
    /// Drops a pending or established association, radio stays powered.
    async fn abandon(&mut self);
    async fn power_off(&mut self);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptOutcome {
    Linked,
    TimedOut,
    Rejected,
}

impl AttemptOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linked => "linked",
            Self::TimedOut => "timed-out",
            Self::Rejected => "rejected",
        }
    }
}

/// Record of one association attempt, logged and dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectionAttempt {
    pub candidate_index: usize,
    pub started_at_ms: u64,
    pub outcome: AttemptOutcome,
}

/// Candidate indices sorted by priority; ties keep list order. Only the
/// first `MAX_CANDIDATES` entries are considered.
pub fn priority_order(candidates: &[NetworkCandidate]) -> Vec<usize, MAX_CANDIDATES> {
    if candidates.len() > MAX_CANDIDATES {
        warn!(
            "wifi: {} candidates configured, ignoring all past the first {}",
            candidates.len(),
            MAX_CANDIDATES
        );
    }
    let mut order: Vec<usize, MAX_CANDIDATES> = (0..candidates.len().min(MAX_CANDIDATES)).collect();
    order.sort_unstable_by_key(|&idx| (candidates[idx].priority, idx));
    order
}

/// Tries every candidate up to `max_loops` times. Returns the index of the
/// candidate that linked, or powers the radio off and fails.
pub async fn connect<L, D>(
    link: &mut L,
    delay: &mut D,
    candidates: &[NetworkCandidate],
    config: &AcquireConfig,
) -> Result<usize, UpdateError>
where
    L: LinkDriver,
    D: DelayNs,
{
    if candidates.is_empty() || config.max_loops == 0 {
        warn!("wifi: no candidates or retries configured");
        link.power_off().await;
        return Err(UpdateError::NetworkUnavailable);
    }

    let order = priority_order(candidates);
    let poll_ms = config.link_poll_ms.max(1);
    // Monotonic time as seen by this routine; only delays advance it.
    let mut clock_ms: u64 = 0;

    for round in 0..config.max_loops {
        if round > 0 {
            info!(
                "wifi: round {} failed, retrying in {} ms",
                round, config.inter_loop_delay_ms
            );
            delay.delay_ms(config.inter_loop_delay_ms).await;
            clock_ms += config.inter_loop_delay_ms as u64;
        }

        for &candidate_index in &order {
            let candidate = &candidates[candidate_index];
            let mut attempt = ConnectionAttempt {
                candidate_index,
                started_at_ms: clock_ms,
                outcome: AttemptOutcome::TimedOut,
            };
            info!(
                "wifi: connecting ssid={} priority={} round={}",
                candidate.identifier,
                candidate.priority,
                round + 1
            );

            if link.begin(candidate).await.is_err() {
                attempt.outcome = AttemptOutcome::Rejected;
            } else {
                let mut waited = 0u32;
                loop {
                    if link.is_linked() {
                        attempt.outcome = AttemptOutcome::Linked;
                        break;
                    }
                    if waited >= config.per_candidate_timeout_ms {
                        break;
                    }
                    let step = poll_ms.min(config.per_candidate_timeout_ms - waited);
                    delay.delay_ms(step).await;
                    waited += step;
                    clock_ms += step as u64;
                }
            }

            info!(
                "wifi: attempt ssid={} outcome={} started_at={}ms",
                candidate.identifier,
                attempt.outcome.as_str(),
                attempt.started_at_ms
            );
            if attempt.outcome == AttemptOutcome::Linked {
                return Ok(attempt.candidate_index);
            }
            link.abandon().await;
        }
    }

    warn!("wifi: all candidates failed; radio off");
    link.power_off().await;
    Err(UpdateError::NetworkUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDelay, MockLink};
    use embassy_futures::block_on;

    const HOME: NetworkCandidate = NetworkCandidate {
        identifier: "home",
        secret: "pw1",
        priority: 1,
    };
    const OFFICE: NetworkCandidate = NetworkCandidate {
        identifier: "office",
        secret: "pw2",
        priority: 0,
    };
    const CAFE: NetworkCandidate = NetworkCandidate {
        identifier: "cafe",
        secret: "pw3",
        priority: 1,
    };

    #[test]
    fn orders_by_priority_keeping_ties_stable() {
        let order = priority_order(&[HOME, OFFICE, CAFE]);
        assert_eq!(order.as_slice(), &[1, 0, 2]);
    }

    #[test]
    fn candidates_past_the_limit_are_ignored() {
        let mut list = [HOME.with_priority(9); MAX_CANDIDATES + 2];
        list[MAX_CANDIDATES] = OFFICE;
        let order = priority_order(&list);

        assert_eq!(order.len(), MAX_CANDIDATES);
        assert!(!order.contains(&MAX_CANDIDATES));
        assert_eq!(order[0], 0);
    }

    #[test]
    fn returns_first_linked_candidate() {
        let mut link = MockLink::linking("home", 3);
        let mut delay = MockDelay::default();
        let result = block_on(connect(
            &mut link,
            &mut delay,
            &[HOME, OFFICE],
            &AcquireConfig::default(),
        ));

        assert_eq!(result, Ok(0));
        assert_eq!(link.attempts(), ["office", "home"]);
        assert!(!link.powered_off);
        // office timed out, home linked after three polls
        assert_eq!(delay.elapsed_ms(), 10_000 + 300);
    }

    #[test]
    fn bounded_retries_then_radio_off() {
        let mut link = MockLink::never();
        let mut delay = MockDelay::default();
        let config = AcquireConfig {
            max_loops: 3,
            per_candidate_timeout_ms: 1_000,
            inter_loop_delay_ms: 500,
            link_poll_ms: 100,
        };
        let result = block_on(connect(&mut link, &mut delay, &[HOME, OFFICE], &config));

        assert_eq!(result, Err(UpdateError::NetworkUnavailable));
        assert_eq!(link.attempts().len(), 3 * 2);
        assert!(link.powered_off);
        // two inter-loop delays, none after the final round
        assert_eq!(delay.elapsed_ms(), 3 * 2 * 1_000 + 2 * 500);
        assert!(delay.elapsed_ms() <= 3 * (2 * 1_000 + 500));
    }

    #[test]
    fn slow_association_is_cut_at_the_candidate_deadline() {
        // Would link on the 20th poll; the deadline allows 10.
        let mut link = MockLink::linking("home", 20);
        let mut delay = MockDelay::default();
        let config = AcquireConfig {
            max_loops: 2,
            per_candidate_timeout_ms: 1_000,
            inter_loop_delay_ms: 500,
            link_poll_ms: 100,
        };
        let result = block_on(connect(&mut link, &mut delay, &[HOME], &config));

        assert_eq!(result, Err(UpdateError::NetworkUnavailable));
        assert_eq!(link.abandons, 2);
        assert_eq!(delay.elapsed_ms(), 2 * 1_000 + 500);
    }

    #[test]
    fn rejected_begin_moves_on_without_waiting() {
        let mut link = MockLink::linking("office", 0).rejecting("home");
        let mut delay = MockDelay::default();
        let result = block_on(connect(
            &mut link,
            &mut delay,
            &[HOME, CAFE, OFFICE.with_priority(5)],
            &AcquireConfig::default(),
        ));

        assert_eq!(result, Ok(2));
        assert_eq!(link.attempts(), ["home", "cafe", "office"]);
    }

    #[test]
    fn empty_list_or_zero_loops_fails_immediately() {
        let mut link = MockLink::never();
        let mut delay = MockDelay::default();
        let result = block_on(connect(&mut link, &mut delay, &[], &AcquireConfig::default()));
        assert_eq!(result, Err(UpdateError::NetworkUnavailable));
        assert!(link.powered_off);

        let mut link = MockLink::never();
        let config = AcquireConfig {
            max_loops: 0,
            ..AcquireConfig::default()
        };
        let result = block_on(connect(&mut link, &mut delay, &[HOME], &config));
        assert_eq!(result, Err(UpdateError::NetworkUnavailable));
        assert!(link.attempts().is_empty());
        assert_eq!(delay.elapsed_ms(), 0);
    }

    impl NetworkCandidate {
        const fn with_priority(mut self, priority: u8) -> Self {
            self.priority = priority;
            self
        }
    }
}
