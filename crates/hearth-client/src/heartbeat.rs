//! Keep-alive bookkeeping.
//!
//! The client task owns the interval; this only tracks the outstanding ping
//! and counts misses.

use crate::config::HeartbeatPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a ping frame; call [`Heartbeat::sent`] with its id.
    Ping,
    /// Too many pings went unanswered.
    Dead { missed: u32 },
}

pub struct Heartbeat {
    policy: HeartbeatPolicy,
    outstanding: Option<u64>,
    missed: u32,
}

impl Heartbeat {
    pub const fn new(policy: HeartbeatPolicy) -> Self {
        Self {
            policy,
            outstanding: None,
            missed: 0,
        }
    }

    /// Called on each interval tick while the link is active.
    pub fn on_tick(&mut self) -> Beat {
        if self.outstanding.is_some() {
            self.missed = self.missed.saturating_add(1);
        }
        match self.policy.max_missed {
            Some(max) if self.missed >= max => Beat::Dead {
                missed: self.missed,
            },
            _ => Beat::Ping,
        }
    }

    pub const fn sent(&mut self, id: u64) {
        self.outstanding = Some(id);
    }

    /// A pong arrived. Pongs without an id clear whatever is outstanding.
    pub fn on_pong(&mut self, id: Option<u64>) {
        if id.is_none() || id == self.outstanding {
            self.outstanding = None;
            self.missed = 0;
        }
    }

    pub const fn reset(&mut self) {
        self.outstanding = None;
        self.missed = 0;
    }

    pub const fn missed(&self) -> u32 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(max_missed: Option<u32>) -> HeartbeatPolicy {
        HeartbeatPolicy {
            interval: Duration::from_secs(30),
            max_missed,
        }
    }

    #[test]
    fn silence_is_not_fatal_by_default() {
        let mut hb = Heartbeat::new(policy(None));
        for id in 1..=10 {
            assert_eq!(hb.on_tick(), Beat::Ping);
            hb.sent(id);
        }
        assert_eq!(hb.missed(), 9);
    }

    #[test]
    fn misses_trip_opt_in_limit() {
        let mut hb = Heartbeat::new(policy(Some(2)));
        assert_eq!(hb.on_tick(), Beat::Ping);
        hb.sent(1);
        assert_eq!(hb.on_tick(), Beat::Ping);
        hb.sent(2);
        assert_eq!(hb.on_tick(), Beat::Dead { missed: 2 });
    }

    #[test]
    fn pong_clears_misses() {
        let mut hb = Heartbeat::new(policy(Some(2)));
        hb.on_tick();
        hb.sent(1);
        hb.on_tick();
        hb.sent(2);
        assert_eq!(hb.missed(), 1);

        // Stale pong for an older ping is ignored.
        hb.on_pong(Some(1));
        assert_eq!(hb.missed(), 1);

        hb.on_pong(Some(2));
        assert_eq!(hb.missed(), 0);
        assert_eq!(hb.on_tick(), Beat::Ping);
    }
}
