//! Machine-readable presence notifications for automation clients.

use super::Hub;
use crate::link::Link;
use crate::session::SessionId;

impl<L: Link> Hub<L> {
    fn broadcast_event(&mut self, text: &str) {
        for session in self.sessions.values_mut() {
            if session.accepts_broadcast() {
                session.queue_output(text);
            }
        }
    }

    pub(crate) fn notify_join(&mut self, name: &str) {
        if !name.is_empty() {
            self.broadcast_event(&format!("\tNBJOIN={name}\n"));
        }
    }

    pub(crate) fn notify_quit(&mut self, name: &str) {
        if !name.is_empty() {
            self.broadcast_event(&format!("\tNBQUIT={name}\n"));
        }
    }

    fn roster_line(&self) -> String {
        format!("\tNBCLIENTLIST={}\n", self.roster().join(" "))
    }

    /// Reply to `NBNAMES`.
    pub(crate) fn send_roster_to(&mut self, id: SessionId) {
        let line = self.roster_line();
        if let Some(session) = self.sessions.get_mut(&id) {
            session.queue_output(&line);
        }
    }

    /// Step 6: push a roster snapshot to everyone if membership changed.
    pub fn notify_roster_changes(&mut self) {
        if !self.roster_dirty {
            return;
        }
        self.roster_dirty = false;
        let line = self.roster_line();
        self.broadcast_event(&line);
    }
}
