//! Delivery of completed lines to their recipients.
//!
//! A ready session's inbound queue holds one line, optionally led by a tab
//! and a [`MessageKind`] tag byte. The whole line is taken out before any
//! recipient queue is touched, so a sender is fully drained before the next
//! ready session is looked at.

use super::Hub;
use crate::command::MessageKind;
use crate::link::Link;
use crate::session::SessionId;

impl<L: Link> Hub<L> {
    /// Step 4: route the pending line of every ready session.
    pub fn route_ready(&mut self) {
        for id in self.ids() {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if !session.ready {
                continue;
            }
            let line = session.take_line();
            if line.is_empty() || !session.is_live() {
                continue;
            }
            let sender = session.name.clone();

            let (kind, body) = split_kind(&line);
            match kind {
                MessageKind::Normal | MessageKind::NbMsg | MessageKind::MsgAll => {
                    self.route_broadcast(id, &sender, kind, body)
                }
                MessageKind::Tell | MessageKind::Bci => {
                    self.route_directed(id, &sender, kind, body)
                }
                MessageKind::Channels => self.set_channels(id, &sender, body),
            }
        }
    }

    fn route_broadcast(&mut self, from: SessionId, sender: &str, kind: MessageKind, body: &[u8]) {
        let prefix = match kind {
            MessageKind::NbMsg => format!("\tNBPKT:{sender}:"),
            _ => format!("<{sender}> "),
        };
        let msgall = kind == MessageKind::MsgAll;

        if msgall && let Some(s) = self.sessions.get_mut(&from) {
            s.write_blocked = true;
        }
        if kind == MessageKind::NbMsg {
            self.console_enabled = false;
        }

        for session in self.sessions.values_mut() {
            if !session.accepts_broadcast() {
                continue;
            }
            session.queue_output(&prefix);
            if msgall {
                let own = format!(" {} ", session.name);
                session.queue_output(&own);
            }
            session.queue_output_bytes(body);
            session.queue_output("\n");
        }

        self.console_write(&prefix);
        if msgall {
            self.console_write(" [*ALL*] ");
        }
        self.console_write_bytes(body);
        self.console_write("\n");

        self.console_enabled = true;
        if let Some(s) = self.sessions.get_mut(&from) {
            s.write_blocked = false;
        }
    }

    /// TELL and BCI: a named recipient first, then channel subscribers.
    fn route_directed(&mut self, from: SessionId, sender: &str, kind: MessageKind, body: &[u8]) {
        let token_end = body
            .iter()
            .position(|&b| b == b' ')
            .unwrap_or(body.len());
        let name_limit = self.limits.name_limit;
        // an overlong token keeps its tail at the front of the message
        let (token, rest) = if token_end > name_limit {
            (&body[..name_limit], &body[name_limit..])
        } else {
            (&body[..token_end], body.get(token_end + 1..).unwrap_or_default())
        };
        let token = String::from_utf8_lossy(token).into_owned();

        let mut message = unescape(rest);
        message.push(b'\n');
        let tag = match kind {
            MessageKind::Tell => format!("[{sender}] "),
            _ => format!("{{{sender}}} "),
        };
        let mirror = kind == MessageKind::Tell;

        let target = self
            .sessions
            .values_mut()
            .find(|s| s.is_live() && s.name.eq_ignore_ascii_case(&token));
        if let Some(target) = target {
            target.queue_output(&tag);
            target.queue_output_bytes(&message);
            let target_name = target.name.clone();
            if mirror {
                self.console_write(&format!("[{sender}] to [{target_name}]: "));
                self.console_write_bytes(&message);
            }
            return;
        }

        let echo = self.sessions.get(&from).is_none_or(|s| s.local_echo);
        let mut delivered = Vec::new();
        for session in self.sessions.values_mut() {
            if !session.is_live() || !session.subscribed_to(&token) {
                continue;
            }
            if session.id == from && !echo {
                continue;
            }
            session.queue_output(&tag);
            session.queue_output_bytes(&message);
            delivered.push(session.name.clone());
        }

        if delivered.is_empty() {
            tracing::debug!(session_id = %from, %token, "no recipient for directed message");
            if let Some(s) = self.sessions.get_mut(&from) {
                s.queue_output(&format!("-- {token}: No such name.\n"));
            }
            return;
        }

        if mirror {
            for recipient in delivered {
                self.console_write(&format!("{token}: [{sender}] to [{recipient}]: "));
                self.console_write_bytes(&message);
            }
        }
    }

    fn set_channels(&mut self, id: SessionId, name: &str, body: &[u8]) {
        let list = String::from_utf8_lossy(body).into_owned();
        let ack = format!("{name} joined channels {list}.\n");
        if let Some(s) = self.sessions.get_mut(&id) {
            s.channels = Some(list);
            s.queue_output(&ack);
        }
        self.console_write(&ack);
    }
}

/// Split off the leading tab + tag pair; untagged lines are NORMAL.
fn split_kind(line: &[u8]) -> (MessageKind, &[u8]) {
    if let [b'\t', tag, rest @ ..] = line
        && let Some(kind) = MessageKind::from_tag(*tag)
    {
        return (kind, rest);
    }
    (MessageKind::Normal, line)
}

/// A backslash makes the following byte literal.
fn unescape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(b) = iter.next() {
        if b == b'\\'
            && let Some(next) = iter.next()
        {
            out.push(next);
            continue;
        }
        out.push(b);
    }
    out
}
