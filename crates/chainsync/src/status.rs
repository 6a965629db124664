use std::time::{Duration, Instant};

/// Tracking record for a single height gap or targeted block ID.
///
/// A record is "queued" until the first request goes out, "requested" while
/// a request is outstanding, and "received" once a matching block arrived.
/// Exactly one of requested/received holds at any moment.
#[derive(Debug, Clone)]
pub struct Status {
    queued_at: Instant,
    requested_at: Option<Instant>,
    attempts: u32,
    received: bool,
}

impl Status {
    pub fn queued(now: Instant) -> Self {
        Status {
            queued_at: now,
            requested_at: None,
            attempts: 0,
            received: false,
        }
    }

    pub fn is_queued(&self) -> bool {
        self.requested_at.is_none() && !self.received
    }

    pub fn is_requested(&self) -> bool {
        self.requested_at.is_some() && !self.received
    }

    pub fn is_received(&self) -> bool {
        self.received
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether this record should be included in the next scan: never
    /// requested, or the outstanding request is older than `retry_interval`.
    pub fn is_eligible(&self, now: Instant, retry_interval: Duration) -> bool {
        if self.received {
            return false;
        }
        match self.requested_at {
            None => true,
            Some(at) => now.duration_since(at) > retry_interval,
        }
    }

    pub fn mark_requested(&mut self, now: Instant) {
        self.requested_at = Some(now);
        self.attempts += 1;
    }

    pub fn mark_received(&mut self) {
        self.received = true;
    }

    /// Timestamp used for oldest-first eviction: the last request time, or
    /// the queueing time if never requested.
    pub fn last_activity(&self) -> Instant {
        self.requested_at.unwrap_or(self.queued_at)
    }
}
