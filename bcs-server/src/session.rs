//! Per-connection state and the byte-level protocol state machine.
//!
//! A session starts unauthenticated and accumulates raw bytes until the
//! login line is complete. Once authenticated it alternates between data
//! mode, where bytes build the pending message in the inbound queue, and
//! command mode, where one line is collected for dispatch.

use std::fmt;
use std::time::Instant;

use crate::queue::ChunkedQueue;

/// Placeholder name carried until the login line is accepted.
pub const LOGIN_PLACEHOLDER: &str = "--LOGIN--";

const OLD_SUFFIX: &str = "-old";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the caller has to do after feeding one byte.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    /// Byte absorbed, nothing else to do.
    Absorbed,
    /// The pending message line is complete and ready for routing.
    LineReady,
    /// A command line is complete and must be dispatched.
    Command(Vec<u8>),
}

#[derive(Debug)]
pub struct Session<L> {
    pub id: SessionId,
    pub name: String,
    /// `None` once the socket has been closed.
    pub(crate) link: Option<L>,
    pub authorized: bool,
    pub command_mode: bool,
    pub local_echo: bool,
    /// Pending close: the socket is shut on the next teardown step.
    pub closing: bool,
    /// The inbound queue holds a complete, unrouted line.
    pub ready: bool,
    pub write_blocked: bool,
    pub write_failed: bool,
    last_char: u8,
    command: Vec<u8>,
    pub(crate) inbound: ChunkedQueue,
    pub(crate) outbound: ChunkedQueue,
    /// Free-text channel list set by `CHANNELS`.
    pub channels: Option<String>,
    pub last_ping: Instant,
    pub last_pong: Option<Instant>,
}

impl<L> Session<L> {
    pub fn new(id: SessionId, link: L, now: Instant, chunk_size: usize) -> Self {
        Self {
            id,
            name: LOGIN_PLACEHOLDER.to_string(),
            link: Some(link),
            authorized: false,
            command_mode: false,
            local_echo: true,
            closing: false,
            ready: false,
            write_blocked: false,
            write_failed: false,
            // a fresh connection always starts on a new line
            last_char: b'\n',
            command: Vec::new(),
            inbound: ChunkedQueue::with_chunk_size(chunk_size),
            outbound: ChunkedQueue::with_chunk_size(chunk_size),
            channels: None,
            // counts as pinged at connect time
            last_ping: now,
            last_pong: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Authorized, not closing, socket still open.
    pub fn is_live(&self) -> bool {
        self.authorized && !self.closing && self.link.is_some()
    }

    /// Live and not write-blocked: eligible for broadcast traffic.
    pub fn accepts_broadcast(&self) -> bool {
        self.is_live() && !self.write_blocked
    }

    pub fn queue_output(&mut self, text: &str) {
        self.outbound.write_str(text);
    }

    pub fn queue_output_bytes(&mut self, bytes: &[u8]) {
        self.outbound.write_bytes(bytes);
    }

    /// Feed one received byte through the state machine.
    ///
    /// `command_limit` bounds the login/command accumulator; bytes past it
    /// are dropped rather than treated as an error.
    pub fn accept_byte(&mut self, b: u8, command_limit: usize) -> Input {
        if self.authorized && !self.command_mode {
            return self.accept_data_byte(b);
        }

        if self.command_mode && b == b'\n' {
            let line = std::mem::take(&mut self.command);
            self.command_mode = false;
            self.last_char = b' ';
            return Input::Command(line);
        }

        if b != b'\r' && self.command.len() < command_limit {
            self.command.push(b);
        } else if b != b'\r' {
            tracing::debug!(session_id = %self.id, "accumulator full, dropping byte");
        }
        Input::Absorbed
    }

    fn accept_data_byte(&mut self, b: u8) -> Input {
        if b == b'\t' && !self.inbound.has_waiting() {
            self.command_mode = true;
            Input::Absorbed
        } else if b == b'\n' {
            self.ready = true;
            // swallow leading spaces on the next line
            self.last_char = b' ';
            Input::LineReady
        } else {
            if self.last_char != b' ' || b != b' ' {
                self.inbound.write_byte(b);
                self.last_char = b;
            }
            Input::Absorbed
        }
    }

    /// Complete the login if the accumulator holds `<marker><name>;`.
    ///
    /// Returns the accepted name. Names longer than `name_limit` bytes are
    /// truncated.
    pub fn try_login(&mut self, marker: &str, name_limit: usize) -> Option<String> {
        if self.authorized {
            return None;
        }
        let start = find(&self.command, marker.as_bytes())? + marker.len();
        let rest = &self.command[start..];
        let end = rest.iter().position(|&b| b == b';')?;
        if end == 0 {
            return None;
        }
        let raw = &rest[..end.min(name_limit)];
        let name = String::from_utf8_lossy(raw).into_owned();

        self.name = name.clone();
        self.authorized = true;
        self.command.clear();
        Some(name)
    }

    /// Queue the tab + tag pair that marks the next line's message kind.
    pub fn tag_next_line(&mut self, tag: u8) {
        self.inbound.write_byte(b'\t');
        self.inbound.write_byte(tag);
    }

    /// Take the pending line (tag bytes included) out of the inbound queue.
    pub fn take_line(&mut self) -> Vec<u8> {
        self.ready = false;
        self.inbound.drain_all()
    }

    /// Rename to `<name>-old` if that still fits under `name_limit`.
    pub fn mark_old(&mut self, name_limit: usize) {
        if self.name.len() + OLD_SUFFIX.len() < name_limit {
            self.name.push_str(OLD_SUFFIX);
        }
    }

    pub fn ping_due(&self, now: Instant, interval: std::time::Duration) -> bool {
        now.checked_duration_since(self.last_ping)
            .is_some_and(|elapsed| elapsed > interval)
    }

    /// Whitespace-delimited membership test against the channel list.
    pub fn subscribed_to(&self, channel: &str) -> bool {
        self.channels
            .as_deref()
            .is_some_and(|list| list.split_ascii_whitespace().any(|c| c == channel))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn session() -> Session<()> {
        Session::new(SessionId(1), (), Instant::now(), 16)
    }

    fn feed(s: &mut Session<()>, bytes: &[u8]) -> Vec<Input> {
        bytes.iter().map(|&b| s.accept_byte(b, 1023)).collect()
    }

    fn logged_in(name: &str) -> Session<()> {
        let mut s = session();
        feed(&mut s, format!("LOGIN={name};").as_bytes());
        assert_eq!(s.try_login("LOGIN=", 49).as_deref(), Some(name));
        s
    }

    #[test]
    fn new_session_is_unauthenticated_placeholder() {
        let s = session();
        assert_eq!(s.name, LOGIN_PLACEHOLDER);
        assert!(!s.authorized);
        assert!(s.local_echo);
        assert!(s.is_open());
        assert!(!s.is_live());
    }

    #[test]
    fn login_waits_for_terminator() {
        let mut s = session();
        feed(&mut s, b"LOGIN=Ali");
        assert_eq!(s.try_login("LOGIN=", 49), None);
        feed(&mut s, b"ce;");
        assert_eq!(s.try_login("LOGIN=", 49).as_deref(), Some("Alice"));
        assert!(s.authorized);
        assert_eq!(s.name, "Alice");
    }

    #[test]
    fn login_drops_carriage_returns_and_caps_name() {
        let mut s = session();
        feed(&mut s, b"LOGIN=Abcdefgh\r;");
        assert_eq!(s.try_login("LOGIN=", 4).as_deref(), Some("Abcd"));
    }

    #[test]
    fn login_rejects_empty_name() {
        let mut s = session();
        feed(&mut s, b"LOGIN=;");
        assert_eq!(s.try_login("LOGIN=", 49), None);
        assert!(!s.authorized);
    }

    #[test]
    fn login_with_custom_marker() {
        let mut s = session();
        feed(&mut s, b"CONNECT:MyName;");
        assert_eq!(s.try_login("CONNECT:", 49).as_deref(), Some("MyName"));
    }

    #[test]
    fn data_line_collapses_spaces_and_signals_ready() {
        let mut s = logged_in("Alice");
        let out = feed(&mut s, b"hi   there\n");
        assert_eq!(out.last(), Some(&Input::LineReady));
        assert!(s.ready);
        assert_eq!(s.take_line(), b"hi there");
        assert!(!s.ready);
    }

    #[test]
    fn first_line_keeps_one_leading_space_later_lines_none() {
        let mut s = logged_in("Alice");
        feed(&mut s, b"  hi\n");
        assert_eq!(s.take_line(), b" hi");

        feed(&mut s, b"   again\n");
        assert_eq!(s.take_line(), b"again");
    }

    #[test]
    fn tab_on_empty_queue_enters_command_mode() {
        let mut s = logged_in("Alice");
        feed(&mut s, b"\t");
        assert!(s.command_mode);
        let out = feed(&mut s, b"NAMES\r\n");
        assert_eq!(out.last(), Some(&Input::Command(b"NAMES".to_vec())));
        assert!(!s.command_mode);
    }

    #[test]
    fn tab_mid_line_is_data() {
        let mut s = logged_in("Alice");
        feed(&mut s, b"a\tb\n");
        assert!(!s.command_mode);
        assert_eq!(s.take_line(), b"a\tb");
    }

    #[test]
    fn oversized_command_is_truncated_but_still_dispatches() {
        let mut s = logged_in("Alice");
        s.accept_byte(b'\t', 4);
        for &b in b"LONGCOMMAND" {
            s.accept_byte(b, 4);
        }
        assert_eq!(s.accept_byte(b'\n', 4), Input::Command(b"LONG".to_vec()));
    }

    #[test]
    fn tagged_line_keeps_tag_ahead_of_text() {
        let mut s = logged_in("Alice");
        s.tag_next_line(4);
        feed(&mut s, b"Bob hi\n");
        assert_eq!(s.take_line(), b"\t\x04Bob hi");
    }

    #[test]
    fn mark_old_respects_cap() {
        let mut s = logged_in("Alice");
        s.mark_old(49);
        assert_eq!(s.name, "Alice-old");

        let long = "x".repeat(45);
        let mut s = logged_in(&long);
        s.mark_old(49);
        assert_eq!(s.name, long);
    }

    #[test]
    fn ping_due_only_after_interval() {
        let start = Instant::now();
        let s: Session<()> = Session::new(SessionId(1), (), start, 16);
        let interval = Duration::from_secs(50);
        assert!(!s.ping_due(start + Duration::from_secs(50), interval));
        assert!(s.ping_due(start + Duration::from_secs(51), interval));
    }

    #[test]
    fn channel_membership_is_token_exact() {
        let mut s = logged_in("Alice");
        assert!(!s.subscribed_to("guild1"));
        s.channels = Some("raid guild1\n".to_string());
        assert!(s.subscribed_to("guild1"));
        assert!(s.subscribed_to("raid"));
        assert!(!s.subscribed_to("guild"));
        assert!(!s.subscribed_to("Guild1"));
    }
}
