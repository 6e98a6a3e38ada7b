use crate::content_store::ContentStore;
use crate::server_store::ServerStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Content, tags and moderation reports.
    pub content_store: Arc<dyn ContentStore>,

    /// Job history, schedules and the job audit log.
    pub server_store: Arc<dyn ServerStore>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        content_store: Arc<dyn ContentStore>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            cancellation_token,
            content_store,
            server_store,
        }
    }

    /// Same stores, different token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            content_store: Arc::clone(&self.content_store),
            server_store: Arc::clone(&self.server_store),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
