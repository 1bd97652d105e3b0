//! The relay core: session registry plus one cooperative pass of work.
//!
//! [`Hub`] owns every session and the console mirror. It never touches the
//! network directly; sockets are reached through the [`Link`] trait so the
//! whole protocol can be driven from tests with in-memory links and
//! injected clocks.
//!
//! The event loop drives a pass in this order:
//!
//! 1. [`Hub::authorize_pending`]
//! 2. [`Hub::close_pending`]
//! 3. [`Hub::remove_closed`]
//! 4. [`Hub::route_ready`]
//! 5. [`Hub::take_console`] (written out by the caller)
//! 6. [`Hub::notify_roster_changes`]
//! 7. [`Hub::flush_outbound`]
//!
//! then waits for readiness, calls [`Hub::admit`] / [`Hub::poll_reads`], and
//! finally [`Hub::send_keepalives`].

mod lifecycle;
mod netbot;
mod routing;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::command::{self, CommandKind};
use crate::config::ServerConfig;
use crate::link::Link;
use crate::queue::ChunkedQueue;
use crate::session::{Input, Session, SessionId};

/// Tunables the core needs, resolved once from [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_clients: usize,
    pub chunk_size: usize,
    pub ping_interval: Duration,
    pub name_limit: usize,
    pub command_limit: usize,
    pub login_marker: String,
    pub write_budget: usize,
}

impl From<&ServerConfig> for Limits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_clients: config.max_clients,
            chunk_size: config.chunk_size,
            ping_interval: config.ping_interval(),
            name_limit: config.name_limit(),
            command_limit: config.command_limit(),
            login_marker: config.login_marker.clone(),
            write_budget: config.write_budget.max(1),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

#[derive(Debug)]
pub struct Hub<L> {
    /// Keyed by admission order, so iteration is registry order.
    sessions: BTreeMap<SessionId, Session<L>>,
    next_id: u64,
    console: ChunkedQueue,
    /// Cleared while composing traffic that must not reach the console.
    console_enabled: bool,
    roster_dirty: bool,
    limits: Limits,
}

impl<L: Link> Hub<L> {
    pub fn new(limits: Limits) -> Self {
        let console = ChunkedQueue::with_chunk_size(limits.chunk_size);
        Self {
            sessions: BTreeMap::new(),
            next_id: 1,
            console,
            console_enabled: true,
            roster_dirty: false,
            limits,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// The next admission would be refused.
    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.limits.max_clients
    }

    pub fn session(&self, id: SessionId) -> Option<&Session<L>> {
        self.sessions.get(&id)
    }

    /// Links that belong in the readiness set: open and not closing.
    pub fn readable_links(&self) -> impl Iterator<Item = &L> {
        self.sessions
            .values()
            .filter(|s| !s.closing)
            .filter_map(|s| s.link.as_ref())
    }

    /// Names of all live sessions, registry order.
    pub fn roster(&self) -> Vec<String> {
        self.sessions
            .values()
            .filter(|s| s.is_live())
            .map(|s| s.name.clone())
            .collect()
    }

    /// Append to the console mirror unless it is suppressed.
    pub fn console_write(&mut self, text: &str) {
        if self.console_enabled {
            self.console.write_str(text);
        }
    }

    fn console_write_bytes(&mut self, bytes: &[u8]) {
        if self.console_enabled {
            self.console.write_bytes(bytes);
        }
    }

    /// Drain the console mirror for the caller to write out.
    pub fn take_console(&mut self) -> Vec<u8> {
        self.console.drain_all()
    }

    fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Read at most one byte from every open, non-closing session.
    pub fn poll_reads(&mut self, now: Instant) {
        for id in self.ids() {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if session.closing {
                continue;
            }
            let Some(link) = session.link.as_mut() else {
                continue;
            };
            match link.try_read_byte() {
                Ok(Some(b)) => self.receive_byte(id, b, now),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(session_id = %id, name = %session.name, "read ended: {e}");
                    session.closing = true;
                }
            }
        }
    }

    /// Feed one byte into a session's state machine and act on the result.
    pub fn receive_byte(&mut self, id: SessionId, b: u8, now: Instant) {
        let command_limit = self.limits.command_limit;
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if let Input::Command(line) = session.accept_byte(b, command_limit) {
            self.dispatch_command(id, &line, now);
        }
    }

    fn dispatch_command(&mut self, id: SessionId, line: &[u8], now: Instant) {
        let kind = command::lookup(line);
        tracing::debug!(session_id = %id, command = ?kind, "command");

        match kind {
            Some(CommandKind::Tag(kind)) => {
                if let Some(s) = self.sessions.get_mut(&id) {
                    s.tag_next_line(kind.tag());
                }
            }
            Some(CommandKind::NbNames) => self.send_roster_to(id),
            Some(CommandKind::Names) => {
                let names = self.roster().join(" ");
                let Some(s) = self.sessions.get_mut(&id) else {
                    return;
                };
                s.queue_output(&format!("-- Names: {names}.\n"));
                let requester = s.name.clone();
                self.console_write(&format!("-- {requester} Requested Names: {names}.\n"));
            }
            Some(CommandKind::Disconnect) => {
                let Some(s) = self.sessions.get_mut(&id) else {
                    return;
                };
                s.closing = true;
                let name = s.name.clone();
                self.console_write(&format!("-- {name} CmdDisconnect.\n"));
            }
            Some(CommandKind::LocalEcho) => {
                if let Some(s) = self.sessions.get_mut(&id) {
                    s.local_echo = command::local_echo_requested(line);
                    let state = if s.local_echo { "ON" } else { "OFF" };
                    s.queue_output(&format!("-- Local Echo: {state}\n"));
                }
            }
            Some(CommandKind::Pong) => {
                if let Some(s) = self.sessions.get_mut(&id) {
                    s.last_pong = Some(now);
                }
            }
            None => {
                if let Some(s) = self.sessions.get_mut(&id) {
                    let text = String::from_utf8_lossy(line);
                    s.queue_output(&format!("-- Unknown Command: {text}.\n"));
                }
            }
        }
    }

    /// Hand queued output to each open session, `write_budget` bytes per call.
    ///
    /// A failed or short write marks the session and schedules it for
    /// closure; nothing is retried within the pass.
    pub fn flush_outbound(&mut self) {
        let budget = self.limits.write_budget;
        for session in self.sessions.values_mut() {
            if session.write_failed {
                continue;
            }
            let Some(link) = session.link.as_mut() else {
                continue;
            };
            while session.outbound.has_waiting() {
                let chunk = session.outbound.read_up_to(budget);
                if let Err(e) = link.write_all(&chunk) {
                    tracing::warn!(session_id = %session.id, name = %session.name, "write failed: {e}");
                    session.write_failed = true;
                    session.closing = true;
                    session.outbound.clear();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::link::mock::MockLink;

    pub(crate) fn hub() -> Hub<MockLink> {
        Hub::new(Limits::default())
    }

    pub(crate) fn at() -> Instant {
        Instant::now()
    }

    /// Admit a session, log it in and run the pass that authorizes it.
    pub(crate) fn login(hub: &mut Hub<MockLink>, name: &str, now: Instant) -> (SessionId, MockLink) {
        let link = MockLink::new();
        let id = hub.admit(link.clone(), now).unwrap();
        send(hub, id, format!("LOGIN={name};").as_bytes(), now);
        pass(hub);
        (id, link)
    }

    pub(crate) fn send(hub: &mut Hub<MockLink>, id: SessionId, bytes: &[u8], now: Instant) {
        for &b in bytes {
            hub.receive_byte(id, b, now);
        }
    }

    /// Steps 1-7 of a pass; returns the console text.
    pub(crate) fn pass(hub: &mut Hub<MockLink>) -> String {
        hub.authorize_pending();
        hub.close_pending();
        hub.remove_closed();
        hub.route_ready();
        let console = hub.take_console();
        hub.notify_roster_changes();
        hub.flush_outbound();
        String::from_utf8_lossy(&console).into_owned()
    }

    #[test]
    fn names_command_replies_to_sender_and_console() {
        let now = at();
        let mut hub = hub();
        let (alice, a) = login(&mut hub, "Alice", now);
        let (_bob, b) = login(&mut hub, "Bob", now);
        a.take_output();
        b.take_output();

        send(&mut hub, alice, b"\tNAMES\n", now);
        let console = pass(&mut hub);

        assert_eq!(a.take_output(), "-- Names: Alice Bob.\n");
        assert!(console.contains("-- Alice Requested Names: Alice Bob.\n"));
        assert_eq!(b.take_output(), "");
    }

    #[test]
    fn pong_is_recorded_without_reply() {
        let now = at();
        let mut hub = hub();
        let (alice, a) = login(&mut hub, "Alice", now);
        a.take_output();

        let later = now + Duration::from_secs(3);
        send(&mut hub, alice, b"\tPONG\n", later);
        pass(&mut hub);

        assert_eq!(hub.session(alice).unwrap().last_pong, Some(later));
        assert_eq!(a.take_output(), "");
    }

    #[test]
    fn unknown_command_replies_only_to_sender() {
        let now = at();
        let mut hub = hub();
        let (alice, a) = login(&mut hub, "Alice", now);
        let (_bob, b) = login(&mut hub, "Bob", now);
        a.take_output();
        b.take_output();

        send(&mut hub, alice, b"\tFROB\r\n", now);
        pass(&mut hub);

        assert_eq!(a.take_output(), "-- Unknown Command: FROB.\n");
        assert_eq!(b.take_output(), "");
    }

    #[test]
    fn local_echo_toggle_reports_state() {
        let now = at();
        let mut hub = hub();
        let (alice, a) = login(&mut hub, "Alice", now);
        a.take_output();

        send(&mut hub, alice, b"\tLOCALECHO 0\n", now);
        pass(&mut hub);
        assert_eq!(a.take_output(), "-- Local Echo: OFF\n");
        assert!(!hub.session(alice).unwrap().local_echo);

        send(&mut hub, alice, b"\tLOCALECHO 1\n", now);
        pass(&mut hub);
        assert_eq!(a.take_output(), "-- Local Echo: ON\n");
        assert!(hub.session(alice).unwrap().local_echo);
    }

    #[test]
    fn disconnect_command_closes_on_next_pass() {
        let now = at();
        let mut hub = hub();
        let (alice, a) = login(&mut hub, "Alice", now);
        let (_bob, b) = login(&mut hub, "Bob", now);
        b.take_output();

        send(&mut hub, alice, b"\tDISCONNECT\n", now);
        assert!(hub.session(alice).unwrap().closing);
        let console = pass(&mut hub);

        assert!(a.is_closed());
        assert!(console.contains("-- Alice has left the server.\n"));
        assert!(b.take_output().contains("\tNBQUIT=Alice\n"));
        assert!(hub.session(alice).is_none());
        assert_eq!(hub.roster(), vec!["Bob".to_string()]);
    }

    #[test]
    fn short_write_schedules_close() {
        let now = at();
        let mut hub = hub();
        let (alice, a) = login(&mut hub, "Alice", now);
        let (bob, _b) = login(&mut hub, "Bob", now);

        a.limit_writes(3);
        send(&mut hub, bob, b"hello there\n", now);
        pass(&mut hub);

        let s = hub.session(alice).unwrap();
        assert!(s.write_failed);
        assert!(s.closing);
        pass(&mut hub);
        assert!(a.is_closed());
    }

    #[test]
    fn large_output_is_written_in_budgeted_calls() {
        let now = at();
        let mut hub = Hub::new(Limits {
            write_budget: 8,
            ..Limits::default()
        });
        let (alice, a) = login(&mut hub, "Alice", now);
        a.take_output();

        let body = "x".repeat(100);
        send(&mut hub, alice, format!("{body}\n").as_bytes(), now);
        pass(&mut hub);

        assert_eq!(a.take_output(), format!("<Alice> {body}\n"));
    }

    #[test]
    fn peer_hangup_closes_session() {
        let now = at();
        let mut hub = hub();
        let (alice, a) = login(&mut hub, "Alice", now);

        a.hang_up();
        hub.poll_reads(now);
        assert!(hub.session(alice).unwrap().closing);
        pass(&mut hub);
        assert!(a.is_closed());
    }

    #[test]
    fn poll_reads_takes_one_byte_per_session() {
        let now = at();
        let mut hub = hub();
        let (_alice, a) = login(&mut hub, "Alice", now);

        a.send(b"hi\n");
        hub.poll_reads(now);
        assert_eq!(a.0.borrow().incoming.len(), 2);
        hub.poll_reads(now);
        hub.poll_reads(now);
        assert!(a.0.borrow().incoming.is_empty());
    }
}
