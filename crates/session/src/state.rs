use tokio::sync::watch;

/// Which session, if any, is currently receiving a streamed reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingState {
    pub active_session_id: Option<String>,
    pub is_streaming: bool,
    /// Latest progress message from the backend, cleared when content starts
    /// flowing again.
    pub progress: Option<String>,
}

impl StreamingState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn streaming(session_id: impl Into<String>) -> Self {
        Self {
            active_session_id: Some(session_id.into()),
            is_streaming: true,
            progress: None,
        }
    }

    pub fn is_active_for(&self, session_id: &str) -> bool {
        self.is_streaming && self.active_session_id.as_deref() == Some(session_id)
    }
}

/// Owner of the process-wide [`StreamingState`], published over `watch`.
#[derive(Debug)]
pub struct StreamingStatePublisher {
    tx: watch::Sender<StreamingState>,
}

impl StreamingStatePublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StreamingState::idle());
        Self { tx }
    }

    pub fn current(&self) -> StreamingState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamingState> {
        self.tx.subscribe()
    }

    pub fn set(&self, state: StreamingState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Update only the progress message, leaving the active session alone.
    pub fn set_progress(&self, progress: Option<String>) {
        self.tx.send_if_modified(|current| {
            if current.progress == progress {
                return false;
            }
            current.progress = progress;
            true
        });
    }

    pub fn reset(&self) {
        self.set(StreamingState::idle());
    }
}

impl Default for StreamingStatePublisher {
    fn default() -> Self {
        Self::new()
    }
}
