use reposync::Phase;
use tokio_util::sync::CancellationToken;

/// Receives the progress of a sync run.
pub trait ProgressSink: Send + Sync {
    /// Called after every upload attempt of a single file,
    /// whether it succeeded or not.
    fn progress(&self, current: usize, total: usize, path: &str);

    fn phase(&self, _phase: Phase) {}
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn progress(&self, current: usize, total: usize, path: &str) {
        self(current, total, path)
    }
}

/// State of one sync run, passed down to every step of the run.
///
/// Nothing in it survives the run: a new session is created per invocation.
pub struct SyncSession {
    cancel: CancellationToken,
    sink: Option<Box<dyn ProgressSink>>,
    phase: Phase,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    pub fn new() -> Self {
        SyncSession {
            cancel: CancellationToken::new(),
            sink: None,
            phase: Phase::Idle,
        }
    }

    pub fn with_progress<S>(sink: S) -> Self
    where
        S: ProgressSink + 'static,
    {
        SyncSession {
            sink: Some(Box::new(sink)),
            ..Self::new()
        }
    }

    /// Ties the session to an externally owned token,
    /// e.g. one cancelled on Ctrl-C.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> reposync::Result<()> {
        if self.is_cancelled() {
            log::warn!("sync cancelled during {}", self.phase);
            return Err(reposync::Error::Cancelled);
        }
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        if phase == self.phase {
            return;
        }
        log::debug!("{} -> {}", self.phase, phase);
        self.phase = phase;
        if let Some(sink) = &self.sink {
            sink.phase(phase);
        }
    }

    pub(crate) fn progress(&self, current: usize, total: usize, path: &str) {
        log::trace!("[{current}/{total}] {path}");
        if let Some(sink) = &self.sink {
            sink.progress(current, total, path);
        }
    }
}
