use crate::net::messages::{Hello, Role, ServerMessage};
use crate::net::tcp::{LinkEvent, TcpLink};
use crate::session::broadcast::SnapshotBroadcaster;
use crate::session::mirror::StateMirror;
use crate::session::role::{NextMove, RoleState, RECONNECT_DELAY};
use crate::session::{InputEvent, SessionCommand, SessionEvent, SpecialAction, StaffRenderer};
use crate::trainer::engine::{Judgement, TrainerEngine, NEXT_NOTE_DELAY, WRONG_FLASH};
use crate::trainer::settings::SettingsStore;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};

// ── SessionRunner ───────────────────────────────────────────────────────────

/// Drives one participant: connects to the relay host-first, demotes to
/// client when the role is taken, hosts the trainer when it wins, mirrors
/// when it doesn't, and reconnects when the link dies.
///
/// Owns all per-participant state (role machine, judging engine, mirror,
/// broadcaster) and hands it around explicitly; nothing here is ambient.
pub struct SessionRunner<S: SettingsStore> {
    relay_addr: SocketAddr,
    role: RoleState,
    engine: TrainerEngine,
    mirror: StateMirror,
    broadcaster: SnapshotBroadcaster,
    renderer: Box<dyn StaffRenderer>,
    store: S,
    input_rx: mpsc::Receiver<InputEvent>,
    command_rx: mpsc::Receiver<SessionCommand>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl<S: SettingsStore> SessionRunner<S> {
    pub fn new(
        relay_addr: SocketAddr,
        renderer: Box<dyn StaffRenderer>,
        store: S,
        input_rx: mpsc::Receiver<InputEvent>,
        command_rx: mpsc::Receiver<SessionCommand>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let settings = store.load();
        Self {
            relay_addr,
            role: RoleState::initial(),
            engine: TrainerEngine::new(settings),
            mirror: StateMirror::new(),
            broadcaster: SnapshotBroadcaster::new(),
            renderer,
            store,
            input_rx,
            command_rx,
            event_tx,
        }
    }

    /// Run until the surrounding application drops the handle. Each loop
    /// iteration is one connection lifetime.
    pub async fn run(mut self) {
        loop {
            let role = self.role.connect_role();
            let (link_tx, mut link_rx) = mpsc::channel::<LinkEvent>(64);

            let link = match TcpLink::connect(self.relay_addr, link_tx).await {
                Ok(link) => link,
                Err(e) => {
                    log::warn!("Relay unreachable: {e}; retrying as {role}");
                    self.wait_out_reconnect(e.to_string()).await;
                    continue;
                }
            };

            if !link.send_json(&Hello { role }) {
                self.wait_out_reconnect("link died during handshake".into()).await;
                continue;
            }

            let achieved = self.role.on_link_up();
            self.broadcaster.attach(link.sender(), achieved);

            match achieved {
                Role::Host => {
                    log::info!("Hosting the session");
                    let _ = self.event_tx.send(SessionEvent::BecameHost).await;
                    self.engine.next_note();
                    self.push_host_state().await;
                }
                Role::Client => {
                    log::info!("Mirroring the session host");
                    let _ = self.event_tx.send(SessionEvent::BecameClient).await;
                }
            }

            let next = self.drive(&mut link_rx).await;
            self.broadcaster.detach();
            // For a deliberate switch this suppresses the Lost event; for
            // an unexpected loss the link is already gone and this is a
            // no-op.
            link.close();
            drop(link);

            match next {
                NextMove::SwitchNow(Role::Host) => {
                    // Arbitration restarts from scratch: fresh trainer
                    // state, empty mirror, settings back from the store.
                    log::info!("Host is gone; restarting arbitration");
                    self.engine = TrainerEngine::new(self.store.load());
                    self.mirror.reset();
                }
                NextMove::SwitchNow(Role::Client) => {
                    log::info!("Host role is taken; joining as client");
                }
                NextMove::RetryAfterDelay(retry_as) => {
                    log::info!("Reconnecting as {retry_as} in {RECONNECT_DELAY:?}");
                    sleep(RECONNECT_DELAY).await;
                    self.role.on_retry_due();
                }
                // drive() only ever returns the three moves above.
                _ => {}
            }
        }
    }

    /// Shared handling for connect-time failures: same fixed delay, same
    /// role on the next attempt.
    async fn wait_out_reconnect(&mut self, reason: String) {
        let _ = self
            .event_tx
            .send(SessionEvent::ConnectionLost { reason })
            .await;
        self.role.on_lost();
        sleep(RECONNECT_DELAY).await;
        self.role.on_retry_due();
    }

    /// One connection's event loop. Returns the move that ends it.
    async fn drive(&mut self, link_rx: &mut mpsc::Receiver<LinkEvent>) -> NextMove {
        // Host-side timers. Cancelling is just dropping the deadline, and
        // both live on this single task, so a stale deadline can never
        // fire against a newer wrong note.
        let mut wrong_clear: Option<Instant> = None;
        let mut next_note: Option<Instant> = None;

        loop {
            tokio::select! {
                event = link_rx.recv() => {
                    let Some(event) = event else {
                        return self.role.on_lost();
                    };
                    match event {
                        LinkEvent::Lost { reason } => {
                            log::info!("Connection lost: {reason}");
                            let _ = self
                                .event_tx
                                .send(SessionEvent::ConnectionLost { reason })
                                .await;
                            return self.role.on_lost();
                        }
                        LinkEvent::Message(ServerMessage::Control(ctl)) => {
                            match self.role.on_control(&ctl) {
                                NextMove::Stay => {}
                                NextMove::Surface(message) => {
                                    log::warn!("Relay error: {message}");
                                    let _ = self
                                        .event_tx
                                        .send(SessionEvent::RelayFault(message))
                                        .await;
                                }
                                mv => return mv,
                            }
                        }
                        LinkEvent::Message(ServerMessage::State(snapshot)) => {
                            if let NextMove::Mirror(snapshot) = self.role.on_state(snapshot) {
                                self.mirror.apply(snapshot.clone(), self.renderer.as_mut());
                                let _ = self
                                    .event_tx
                                    .send(SessionEvent::StateChanged(snapshot))
                                    .await;
                            }
                        }
                    }
                }

                Some(input) = self.input_rx.recv() => {
                    if self.role.is_hosting() {
                        self.handle_input(input, &mut wrong_clear, &mut next_note).await;
                    }
                    // Input while mirroring is discarded, not queued: a
                    // client's key presses must not replay after a later
                    // promotion.
                }

                Some(command) = self.command_rx.recv() => {
                    if self.role.is_hosting() {
                        let SessionCommand::SetSettings(settings) = command;
                        let saved = self.engine.set_settings(settings);
                        self.store.save(&saved);
                        self.engine.next_note();
                        wrong_clear = None;
                        next_note = None;
                        self.push_host_state().await;
                    }
                }

                _ = sleep_until(wrong_clear.unwrap_or_else(Instant::now)),
                    if wrong_clear.is_some() =>
                {
                    wrong_clear = None;
                    if self.engine.clear_wrong_note() {
                        self.push_host_state().await;
                    }
                }

                _ = sleep_until(next_note.unwrap_or_else(Instant::now)),
                    if next_note.is_some() =>
                {
                    next_note = None;
                    wrong_clear = None;
                    self.engine.next_note();
                    self.push_host_state().await;
                }
            }
        }
    }

    /// A note or special action from the input device, while hosting.
    async fn handle_input(
        &mut self,
        input: InputEvent,
        wrong_clear: &mut Option<Instant>,
        next_note: &mut Option<Instant>,
    ) {
        match input {
            InputEvent::NoteIdentified(pitch) => match self.engine.judge(pitch) {
                None => {}
                Some(Judgement::Correct) => {
                    *wrong_clear = None;
                    *next_note = Some(Instant::now() + NEXT_NOTE_DELAY);
                    self.push_host_state().await;
                }
                Some(Judgement::Wrong) => {
                    *wrong_clear = Some(Instant::now() + WRONG_FLASH);
                    self.push_host_state().await;
                }
            },
            InputEvent::Special(SpecialAction::CycleClef) => {
                let settings = self.engine.cycle_clef();
                self.store.save(&settings);
                self.engine.next_note();
                *wrong_clear = None;
                *next_note = None;
                self.push_host_state().await;
            }
            InputEvent::Special(SpecialAction::ResetStats) => {
                self.engine.reset_stats();
                self.push_host_state().await;
            }
        }
    }

    /// After every host-side mutation: broadcast the full snapshot, redraw,
    /// tell the application.
    async fn push_host_state(&mut self) {
        let state = self.engine.state().clone();
        self.broadcaster.broadcast(&state);
        self.renderer
            .render(state.clef, state.note, state.last_wrong_note);
        let _ = self.event_tx.send(SessionEvent::StateChanged(state)).await;
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
