//! Duplicate-ticket suppression.
//!
//! The same QR code stays on screen for many poll cycles. Only the first
//! decode of a ticket may reach the login service; later ones are
//! dropped until [`TicketTracker::reset`] is called.

use std::sync::Mutex;

/// Characters taken from the end of a payload to form its ticket.
pub const TICKET_LEN: usize = 24;

/// Fingerprint of a payload: its last [`TICKET_LEN`] characters, or the
/// whole payload when it is shorter.
pub fn ticket_of(payload: &str) -> &str {
    let chars = payload.chars().count();
    if chars <= TICKET_LEN {
        return payload;
    }
    let start = payload
        .char_indices()
        .nth(chars - TICKET_LEN)
        .map_or(0, |(i, _)| i);
    &payload[start..]
}

/// Remembers the last ticket offered for submission.
#[derive(Debug, Default)]
pub struct TicketTracker {
    last: Mutex<Option<String>>,
}

impl TicketTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `payload` carries a ticket different from the last one.
    /// A new ticket becomes the last one.
    pub fn is_new(&self, payload: &str) -> bool {
        let ticket = ticket_of(payload);
        let mut last = self.lock();
        if last.as_deref() == Some(ticket) {
            return false;
        }
        *last = Some(ticket.to_string());
        true
    }

    /// Forget the last ticket so the same code can be submitted again.
    pub fn reset(&self) {
        *self.lock() = None;
    }

    pub fn last_ticket(&self) -> Option<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
