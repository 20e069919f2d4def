//! Background dispatch of chat requests.
//!
//! A backend's multi-turn conversation can take minutes (each turn may poll
//! for up to its full budget), so it runs on a spawned tokio task and the
//! caller returns immediately. At most one task is alive per dispatcher; a
//! second request while one is in flight is rejected, not queued.
//!
//! The dispatcher owns the terminal reply: once the job returns it clears the
//! busy flag and only then sends the empty `NewReply`, so a consumer that sees
//! completion can submit its next request straight away.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::llm::BUSY_MESSAGE;
use crate::types::ChatReply;

/// Clears the busy flag when dropped, including when the job panics.
struct Running(Arc<AtomicBool>);

impl Drop for Running {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Tracks whether a worker task is running for one backend.
#[derive(Default)]
pub struct Dispatcher {
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a worker task is still running.
    pub fn is_busy(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn `job` unless a worker is already alive.
    ///
    /// On rejection the busy message is sent as a `Failed` reply and `job`
    /// is dropped without running. Otherwise the terminal reply is sent on
    /// `replies` after `job` finishes. Returns whether the job was spawned.
    pub fn dispatch<F>(&self, replies: &mpsc::UnboundedSender<ChatReply>, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("dispatch rejected, worker still running");
            let _ = replies.send(ChatReply::failed(BUSY_MESSAGE));
            return false;
        }

        let running = Running(self.running.clone());
        let replies = replies.clone();
        tokio::spawn(async move {
            job.await;
            drop(running);
            let _ = replies.send(ChatReply::done());
        });
        true
    }
}
