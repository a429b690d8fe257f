//! Connection lifecycle as an explicit transition table.
//!
//! [`ReconnectMachine`] is pure: it maps `(state, event)` to a new state and
//! a list of [`LinkAction`]s for the client task to perform. Timers and
//! sockets live in the caller, which keeps the backoff logic testable
//! without any I/O.

use std::time::Duration;

use crate::config::ReconnectPolicy;
use crate::error::ClientError;
use crate::mode::ConnectionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Authenticating,
    Active,
    /// Waiting for the retry timer.
    Backoff,
    /// Rejected or out of attempts; only an explicit connect restarts.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Caller asked to connect.
    Connect,
    /// Transport is open.
    Opened,
    AuthRequired,
    AuthOk,
    /// Hub or relay refused us for good: `auth_invalid`, a terminal close
    /// code, or an HTTP 401/403 on the upgrade.
    Rejected(ClientError),
    /// Socket closed, failed to open, or heartbeat declared it dead.
    Closed,
    RetryTimerFired,
    /// Caller asked to close.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    OpenSocket,
    CloseSocket,
    SendAuth,
    ResolveConnect,
    RejectConnect(ClientError),
    /// Replay hub subscriptions for every registered listener.
    FlushSubscriptions,
    FailPending,
    ScheduleRetry(Duration),
    CancelRetry,
    StartHeartbeat,
    StopHeartbeat,
    SetMode(ConnectionMode),
}

pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: LinkState,
    /// Consecutive failed attempts since the last successful auth.
    attempt: u32,
}

impl ReconnectMachine {
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: LinkState::Disconnected,
            attempt: 0,
        }
    }

    pub const fn state(&self) -> LinkState {
        self.state
    }

    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next close would schedule.
    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for_attempt(self.attempt)
    }

    /// Apply one event. Events that make no sense in the current state are
    /// ignored and produce no actions.
    pub fn on_event(&mut self, event: LinkEvent) -> Vec<LinkAction> {
        use LinkAction as A;
        use LinkState as S;

        match (self.state, event) {
            (S::Disconnected | S::Failed, LinkEvent::Connect) => {
                self.attempt = 0;
                self.state = S::Connecting;
                vec![A::SetMode(ConnectionMode::Connecting), A::OpenSocket]
            }
            (S::Backoff, LinkEvent::RetryTimerFired) => {
                self.state = S::Connecting;
                vec![A::OpenSocket]
            }
            (S::Connecting, LinkEvent::Opened) => {
                self.state = S::Authenticating;
                vec![]
            }
            (S::Connecting | S::Authenticating, LinkEvent::AuthRequired) => {
                self.state = S::Authenticating;
                vec![A::SendAuth]
            }
            (S::Authenticating, LinkEvent::AuthOk) => {
                self.attempt = 0;
                self.state = S::Active;
                vec![
                    A::CancelRetry,
                    A::SetMode(ConnectionMode::Websocket),
                    A::ResolveConnect,
                    A::FlushSubscriptions,
                    A::StartHeartbeat,
                ]
            }
            (S::Connecting | S::Authenticating | S::Active, LinkEvent::Rejected(error)) => {
                self.state = S::Failed;
                vec![
                    A::CloseSocket,
                    A::StopHeartbeat,
                    A::FailPending,
                    A::SetMode(ConnectionMode::Disconnected),
                    A::RejectConnect(error),
                ]
            }
            (S::Connecting | S::Authenticating | S::Active, LinkEvent::Closed) => {
                let mut actions = vec![
                    A::CloseSocket,
                    A::StopHeartbeat,
                    A::FailPending,
                    A::SetMode(ConnectionMode::Polling),
                ];
                if self.policy.should_retry(self.attempt) {
                    actions.push(A::ScheduleRetry(self.next_delay()));
                    self.attempt = self.attempt.saturating_add(1);
                    self.state = S::Backoff;
                } else {
                    actions.push(A::RejectConnect(ClientError::RetriesExhausted(
                        self.attempt,
                    )));
                    self.state = S::Failed;
                }
                actions
            }
            (S::Disconnected, LinkEvent::Shutdown) => vec![],
            (_, LinkEvent::Shutdown) => {
                self.state = S::Disconnected;
                vec![
                    A::CancelRetry,
                    A::StopHeartbeat,
                    A::CloseSocket,
                    A::FailPending,
                    A::SetMode(ConnectionMode::Disconnected),
                    A::RejectConnect(ClientError::Shutdown),
                ]
            }
            _ => vec![],
        }
    }
}
