use crate::net::messages::{ControlMessage, Role, TrainerState, HOST_ALREADY_EXISTS};
use tokio::time::Duration;

// ── Constants ───────────────────────────────────────────────────────────────

/// Fixed delay before reconnecting after an unexpected close. Deliberate
/// role switches reconnect immediately and never wait this out.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

// ── RoleState ───────────────────────────────────────────────────────────────

/// The connection-role lifecycle of one participant process.
///
/// Every participant starts by optimistically claiming the host role; the
/// relay enforces the single-host rule and the loser demotes itself to
/// client. There is no leader election; first to connect wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    ConnectingAsHost,
    ActiveHost,
    ConnectingAsClient,
    ActiveClient,
    ReconnectPending { retry_as: Role },
}

/// What the runner must do after an observation is fed in. Whether a
/// reconnect is immediate (deliberate switch) or delayed (unexpected
/// loss) is carried in the move itself; there is no side flag guarding a
/// reconnect timer.
#[derive(Debug, Clone, PartialEq)]
pub enum NextMove {
    /// Keep going.
    Stay,
    /// Apply this snapshot to the local mirror (clients only).
    Mirror(TrainerState),
    /// Deliberately close the connection and reconnect with the given
    /// role right away.
    SwitchNow(Role),
    /// The connection died on its own: reconnect with the given role
    /// after [`RECONNECT_DELAY`].
    RetryAfterDelay(Role),
    /// Show this relay error to the user; the connection stays up.
    Surface(String),
}

impl RoleState {
    /// Where every participant starts.
    pub fn initial() -> Self {
        RoleState::ConnectingAsHost
    }

    /// The role to declare on the current connection attempt.
    pub fn connect_role(self) -> Role {
        match self {
            RoleState::ConnectingAsHost | RoleState::ActiveHost => Role::Host,
            RoleState::ConnectingAsClient | RoleState::ActiveClient => Role::Client,
            RoleState::ReconnectPending { retry_as } => retry_as,
        }
    }

    /// True while this participant owns the shared state.
    pub fn is_hosting(self) -> bool {
        matches!(self, RoleState::ActiveHost)
    }

    /// The connection is open and the role frame was sent. Acceptance is
    /// implicit: the relay answers a host claim only to reject it.
    pub fn on_link_up(&mut self) -> Role {
        let role = self.connect_role();
        *self = match role {
            Role::Host => RoleState::ActiveHost,
            Role::Client => RoleState::ActiveClient,
        };
        role
    }

    /// A control frame arrived from the relay.
    pub fn on_control(&mut self, msg: &ControlMessage) -> NextMove {
        match msg {
            ControlMessage::Error { message } if message == HOST_ALREADY_EXISTS => {
                match self {
                    RoleState::ConnectingAsHost | RoleState::ActiveHost => {
                        // Someone beat us to it. Demote: deliberate close,
                        // immediate reconnect as client, no retry timer.
                        *self = RoleState::ConnectingAsClient;
                        NextMove::SwitchNow(Role::Client)
                    }
                    _ => NextMove::Surface(message.clone()),
                }
            }
            ControlMessage::Error { message } => NextMove::Surface(message.clone()),
            ControlMessage::HostDisconnected => match self {
                RoleState::ActiveClient | RoleState::ConnectingAsClient => {
                    // The host is gone; restart arbitration from the top so
                    // every orphaned client has an equal shot at the role.
                    *self = RoleState::ConnectingAsHost;
                    NextMove::SwitchNow(Role::Host)
                }
                _ => NextMove::Stay,
            },
        }
    }

    /// A state snapshot arrived from the relay.
    pub fn on_state(&mut self, snapshot: TrainerState) -> NextMove {
        match self {
            RoleState::ActiveClient => NextMove::Mirror(snapshot),
            // A host never mirrors; anything else is a stray frame.
            _ => NextMove::Stay,
        }
    }

    /// The connection closed without us asking (network failure, relay
    /// restart). The same role is retried after the fixed delay. A former
    /// host re-attempts host, since the relay freed the slot when the
    /// connection dropped.
    pub fn on_lost(&mut self) -> NextMove {
        let retry_as = self.connect_role();
        *self = RoleState::ReconnectPending { retry_as };
        NextMove::RetryAfterDelay(retry_as)
    }

    /// The reconnect delay elapsed; move back to a connecting state.
    pub fn on_retry_due(&mut self) {
        if let RoleState::ReconnectPending { retry_as } = *self {
            *self = match retry_as {
                Role::Host => RoleState::ConnectingAsHost,
                Role::Client => RoleState::ConnectingAsClient,
            };
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{Stats, TrainerState};
    use crate::trainer::settings::TrainerSettings;

    fn snapshot() -> TrainerState {
        TrainerState {
            stats: Stats {
                correct: 2,
                wrong: 1,
                streak: 2,
            },
            ..TrainerState::new(TrainerSettings::default())
        }
    }

    #[test]
    fn participants_start_by_claiming_host() {
        let state = RoleState::initial();
        assert_eq!(state, RoleState::ConnectingAsHost);
        assert_eq!(state.connect_role(), Role::Host);
    }

    #[test]
    fn link_up_activates_the_declared_role() {
        let mut state = RoleState::ConnectingAsHost;
        assert_eq!(state.on_link_up(), Role::Host);
        assert_eq!(state, RoleState::ActiveHost);
        assert!(state.is_hosting());

        let mut state = RoleState::ConnectingAsClient;
        assert_eq!(state.on_link_up(), Role::Client);
        assert_eq!(state, RoleState::ActiveClient);
        assert!(!state.is_hosting());
    }

    /// The demotion sequence: a rejected host claim produces exactly one
    /// immediate reconnect-as-client move, not a delayed retry.
    #[test]
    fn host_rejection_demotes_immediately() {
        for start in [RoleState::ConnectingAsHost, RoleState::ActiveHost] {
            let mut state = start;
            let mv = state.on_control(&ControlMessage::host_already_exists());
            assert_eq!(mv, NextMove::SwitchNow(Role::Client));
            assert_eq!(state, RoleState::ConnectingAsClient);
        }
    }

    #[test]
    fn host_loss_restarts_arbitration_from_the_top() {
        let mut state = RoleState::ActiveClient;
        let mv = state.on_control(&ControlMessage::HostDisconnected);
        assert_eq!(mv, NextMove::SwitchNow(Role::Host));
        assert_eq!(state, RoleState::ConnectingAsHost);
    }

    #[test]
    fn stray_host_disconnected_while_hosting_is_ignored() {
        let mut state = RoleState::ActiveHost;
        assert_eq!(
            state.on_control(&ControlMessage::HostDisconnected),
            NextMove::Stay
        );
        assert_eq!(state, RoleState::ActiveHost);
    }

    #[test]
    fn unknown_relay_errors_surface_without_a_role_change() {
        let mut state = RoleState::ActiveClient;
        let mv = state.on_control(&ControlMessage::Error {
            message: "TooManySessions".into(),
        });
        assert_eq!(mv, NextMove::Surface("TooManySessions".into()));
        assert_eq!(state, RoleState::ActiveClient);
    }

    #[test]
    fn snapshots_mirror_only_on_clients() {
        let mut state = RoleState::ActiveClient;
        assert_eq!(state.on_state(snapshot()), NextMove::Mirror(snapshot()));

        let mut state = RoleState::ActiveHost;
        assert_eq!(state.on_state(snapshot()), NextMove::Stay);
    }

    #[test]
    fn unexpected_loss_retries_the_same_role_after_the_delay() {
        let mut state = RoleState::ActiveHost;
        assert_eq!(state.on_lost(), NextMove::RetryAfterDelay(Role::Host));
        assert_eq!(
            state,
            RoleState::ReconnectPending {
                retry_as: Role::Host
            }
        );
        state.on_retry_due();
        assert_eq!(state, RoleState::ConnectingAsHost);

        let mut state = RoleState::ActiveClient;
        assert_eq!(state.on_lost(), NextMove::RetryAfterDelay(Role::Client));
        state.on_retry_due();
        assert_eq!(state, RoleState::ConnectingAsClient);
    }

    #[test]
    fn loss_during_connect_keeps_the_attempted_role() {
        let mut state = RoleState::ConnectingAsClient;
        assert_eq!(state.on_lost(), NextMove::RetryAfterDelay(Role::Client));
    }
}
