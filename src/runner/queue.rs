//! Pull-based queue of user turns for streaming sessions.
//!
//! The producer pushes turns while the agent is still working; the stdin
//! writer pulls them one at a time. A pull on an empty, open queue waits
//! until a turn is pushed or the queue is completed, and never resolves to
//! "no more input" before [`StreamingPrompt::complete`] is called.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_core::Stream;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct QueueState {
    buffer: VecDeque<String>,
    waiters: VecDeque<oneshot::Sender<Option<String>>>,
    completed: bool,
}

/// Cancellable queue of pending user turns.
#[derive(Debug, Default)]
pub struct StreamingPrompt {
    state: Mutex<QueueState>,
}

impl StreamingPrompt {
    /// Create an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an open queue with turns already enqueued.
    #[must_use]
    pub fn with_turns<I, S>(turns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(QueueState {
                buffer: turns.into_iter().map(Into::into).collect(),
                ..QueueState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a turn, handing it straight to the oldest waiter if one exists.
    ///
    /// Returns `false` if the queue was already completed and the turn was
    /// dropped.
    pub fn push(&self, turn: impl Into<String>) -> bool {
        let mut state = self.lock();
        if state.completed {
            tracing::warn!("Turn pushed after the prompt stream completed; dropping");
            return false;
        }

        let mut turn = turn.into();
        while let Some(waiter) = state.waiters.pop_front() {
            // A dropped receiver means that pull was abandoned; try the next one.
            match waiter.send(Some(turn)) {
                Ok(()) => return true,
                Err(returned) => turn = returned.unwrap_or_default(),
            }
        }
        state.buffer.push_back(turn);
        true
    }

    /// Close the queue. Every pending and future pull resolves to `None`
    /// once buffered turns are drained. Idempotent.
    pub fn complete(&self) {
        let mut state = self.lock();
        if state.completed {
            return;
        }
        state.completed = true;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(None);
        }
        tracing::debug!(buffered = state.buffer.len(), "Prompt stream completed");
    }

    /// Pull the next turn, waiting if none is buffered.
    ///
    /// Returns `None` once the queue is completed and drained.
    pub async fn next(&self) -> Option<String> {
        let rx = {
            let mut state = self.lock();
            if let Some(turn) = state.buffer.pop_front() {
                return Some(turn);
            }
            if state.completed {
                return None;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        rx.await.unwrap_or(None)
    }

    /// Whether [`complete`](Self::complete) has been called.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.lock().completed
    }

    /// Number of buffered turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Returns true if no turns are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// Adapt the queue into a stream of turns ending at completion.
    pub fn into_stream(self: Arc<Self>) -> impl Stream<Item = String> + Send {
        futures_util::stream::unfold(self, |queue| async move {
            let turn = queue.next().await?;
            Some((turn, queue))
        })
    }
}
