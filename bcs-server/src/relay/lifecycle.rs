//! Admission, login, duplicate eviction, teardown and keepalive.

use std::time::Instant;

use super::Hub;
use crate::error::{RelayError, Result};
use crate::link::Link;
use crate::session::{Session, SessionId};

const REJECTION: &[u8] = b"Denied - too many connections";
const PING: &str = "\tPING\n";

impl<L: Link> Hub<L> {
    /// Track a freshly accepted connection, or refuse it when full.
    ///
    /// A refused link is told so and closed; it never enters the registry.
    pub fn admit(&mut self, mut link: L, now: Instant) -> Result<SessionId> {
        let limit = self.limits.max_clients;
        if self.is_full() {
            self.console_write("-- Incoming client rejected -- too many connections\n");
            tracing::warn!(limit, "rejecting connection, server full");
            if let Err(e) = link.write_all(REJECTION) {
                tracing::debug!("rejection notice not delivered: {e}");
            }
            link.close();
            return Err(RelayError::CapacityExceeded { limit });
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions
            .insert(id, Session::new(id, link, now, self.limits.chunk_size));
        self.console_write(&format!("-- Client connection: id {id}\n"));
        tracing::info!(session_id = %id, "client connected");
        Ok(id)
    }

    /// Step 1: complete any login whose line has arrived.
    pub fn authorize_pending(&mut self) {
        for id in self.ids() {
            let marker = self.limits.login_marker.as_str();
            let name_limit = self.limits.name_limit;
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if session.closing {
                continue;
            }
            let Some(name) = session.try_login(marker, name_limit) else {
                continue;
            };

            tracing::info!(session_id = %id, %name, "client logged in");
            self.notify_join(&name);
            self.console_write(&format!("-- {name} has joined the server.\n"));
            self.roster_dirty = true;
            self.evict_duplicates(id, &name);
        }
    }

    /// Schedule every other session already using `name` for closure.
    fn evict_duplicates(&mut self, keep: SessionId, name: &str) {
        let name_limit = self.limits.name_limit;
        let mut evicted = Vec::new();
        for session in self.sessions.values_mut() {
            if session.id == keep
                || !session.authorized
                || session.closing
                || session.name != name
            {
                continue;
            }
            session.closing = true;
            session.mark_old(name_limit);
            evicted.push(session.id);
        }
        for id in evicted {
            tracing::info!(session_id = %id, %name, "evicting duplicate login");
            self.console_write(&format!("-- Kicking off connection the same as: {name}.\n"));
            self.roster_dirty = true;
        }
    }

    /// Step 2: close the socket of every session marked for closure.
    ///
    /// Whatever is still queued gets one last best-effort write first.
    pub fn close_pending(&mut self) {
        for id in self.ids() {
            let budget = self.limits.write_budget;
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if !session.closing {
                continue;
            }
            let Some(mut link) = session.link.take() else {
                continue;
            };
            if !session.write_failed {
                while session.outbound.has_waiting() {
                    let chunk = session.outbound.read_up_to(budget);
                    if link.write_all(&chunk).is_err() {
                        break;
                    }
                }
            }
            session.outbound.clear();
            link.close();

            let name = session.name.clone();
            if !session.authorized {
                tracing::debug!(session_id = %id, "connection closed before login");
                continue;
            }
            tracing::info!(session_id = %id, %name, "client left");
            self.notify_quit(&name);
            self.console_write(&format!("-- {name} has left the server.\n"));
            self.roster_dirty = true;
        }
    }

    /// Step 3: drop sessions whose socket is already closed.
    pub fn remove_closed(&mut self) {
        self.sessions.retain(|_, s| s.is_open());
    }

    /// Step 11: queue a ping for every session whose interval has elapsed.
    pub fn send_keepalives(&mut self, now: Instant) {
        let interval = self.limits.ping_interval;
        for session in self.sessions.values_mut() {
            if session.closing || !session.is_open() {
                continue;
            }
            if session.ping_due(now, interval) {
                session.queue_output(PING);
                session.last_ping = now;
            }
        }
    }

    /// Close every socket on shutdown, flushing what is queued.
    pub fn close_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.closing = true;
        }
        self.close_pending();
        self.remove_closed();
    }
}
