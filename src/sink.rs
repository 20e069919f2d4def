//! Incremental result sink.
//!
//! Replies arrive whenever the backend's worker gets them; the display is
//! refreshed on its own fixed tick. The sink sits in between: producers
//! append under the lock, and each tick takes the same lock, emits every
//! fragment not yet shown (in arrival order) and, once the conversation is
//! complete, tears the display down exactly once.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::types::ChatReply;

/// Refresh period of the display.
pub const TICK_PERIOD: Duration = Duration::from_millis(100);

/// Where flushed fragments go.
pub trait ResultDisplay {
    /// Show one fragment, after the ones already shown.
    fn append(&mut self, fragment: &str);

    /// The conversation is over; called once.
    fn complete(&mut self);
}

#[derive(Debug, Default)]
struct SinkState {
    fragments: Vec<String>,
    /// Number of fragments already emitted; never exceeds `fragments.len()`
    cursor: usize,
    completed: bool,
    torn_down: bool,
}

#[derive(Debug, Default)]
pub struct ResultSink {
    state: Mutex<SinkState>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a reply. The terminal empty reply marks completion.
    pub fn push(&self, reply: ChatReply) {
        let mut state = self.state();
        if reply.is_done() {
            state.completed = true;
        } else if !reply.text.is_empty() {
            state.fragments.push(reply.text);
        }
    }

    /// The producer went away; nothing more will arrive.
    pub fn close(&self) {
        self.state().completed = true;
    }

    /// Flush pending fragments to `display`.
    ///
    /// Returns `false` once the sink has been torn down.
    pub fn tick<D: ResultDisplay + ?Sized>(&self, display: &mut D) -> bool {
        let mut state = self.state();
        if state.torn_down {
            return false;
        }
        let start = state.cursor;
        state.cursor = state.fragments.len();
        for fragment in &state.fragments[start..] {
            display.append(fragment);
        }
        if state.completed {
            state.torn_down = true;
            display.complete();
            return false;
        }
        true
    }

    /// Every fragment received so far.
    pub fn fragments(&self) -> Vec<String> {
        self.state().fragments.clone()
    }
}

/// Feed `replies` into `sink` and flush it every `period` until teardown.
pub async fn drive<D: ResultDisplay + ?Sized>(
    sink: &ResultSink,
    mut replies: mpsc::UnboundedReceiver<ChatReply>,
    display: &mut D,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut open = true;
    loop {
        tokio::select! {
            reply = replies.recv(), if open => match reply {
                Some(reply) => sink.push(reply),
                None => {
                    open = false;
                    sink.close();
                }
            },
            _ = ticker.tick() => {
                if !sink.tick(display) {
                    break;
                }
            }
        }
    }
}
