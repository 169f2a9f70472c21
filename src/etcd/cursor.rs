//! Watch Cursor Tracking
//!
//! Gap detection for the etcd change stream, expressed as an explicit state
//! machine. Cursors (v2 modified index, v3 modification revision) are
//! strictly increasing and dense, so any delivered event whose cursor is not
//! exactly the expected one means events were lost in between.

/// Phase of a watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    /// No event has ever been observed; the expected cursor is uninitialized.
    Fresh,
    /// Events are flowing and each one carried the expected cursor.
    Streaming,
    /// The last observed cursor did not match; the subscription must be torn
    /// down before anything else is delivered.
    GapDetected,
    /// A new subscription is being opened at the expected cursor.
    Resubscribing,
    /// The session is over; no further observations are meaningful.
    Terminated,
}

/// What the watch loop must do after feeding one observed cursor through the
/// state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStep {
    /// The event carried the expected cursor; deliver it downstream.
    Deliver,
    /// A gap: drop the current batch and reopen the subscription so that the
    /// first event replayed carries cursor `from`.
    Resubscribe { from: u64 },
    /// Too many consecutive gaps on the same cursor; fail fast.
    Terminate { expected: u64, failures: u64 },
}

/// Tracks the expected cursor and the consecutive-failure counter for one
/// watch session. Owned exclusively by the watch producer task.
#[derive(Debug)]
pub struct WatchCursor {
    phase: WatchPhase,
    expected: Option<u64>,
    failures: u64,
    max_retries: u64,
}

impl WatchCursor {
    pub fn new(max_retries: u64) -> Self {
        Self {
            phase: WatchPhase::Fresh,
            expected: None,
            failures: 0,
            max_retries,
        }
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    /// The cursor the next delivered event must carry. `None` until the
    /// first event has been observed.
    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Feed one observed cursor through the state machine.
    pub fn observe(&mut self, cursor: u64) -> WatchStep {
        match self.expected {
            // First event ever: the observed cursor seeds the expectation.
            None => {
                self.expected = Some(cursor);
                self.accept(cursor)
            }
            Some(expected) if cursor == expected => self.accept(cursor),
            Some(expected) => {
                self.failures += 1;
                if self.failures >= self.max_retries {
                    self.phase = WatchPhase::Terminated;
                    WatchStep::Terminate {
                        expected,
                        failures: self.failures,
                    }
                } else {
                    self.phase = WatchPhase::GapDetected;
                    WatchStep::Resubscribe { from: expected }
                }
            }
        }
    }

    /// Mark the replacement subscription as opened and return the cursor it
    /// must resume from. The expected cursor is reused verbatim.
    pub fn resubscribed(&mut self) -> Option<u64> {
        if self.phase == WatchPhase::GapDetected {
            self.phase = WatchPhase::Resubscribing;
        }
        self.expected
    }

    fn accept(&mut self, cursor: u64) -> WatchStep {
        self.failures = 0;
        self.expected = Some(cursor + 1);
        self.phase = WatchPhase::Streaming;
        WatchStep::Deliver
    }
}
