use std::{io, sync::Arc, time::Duration};

use ffmpeg_cli::{FrameError, ProbeError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Rejected configuration. Never retried.
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: Arc<io::Error>,
    },
    /// Short read, broken pipe or the transcoder exiting on its own.
    #[error("stream ended: {0}")]
    StreamEnded(String),
    #[error("no stream within {0:?} of starting")]
    StartupTimeout(Duration),
}

impl StreamError {
    pub(crate) fn launch(program: &std::path::Path, source: io::Error) -> Self {
        StreamError::Launch {
            program: program.display().to_string(),
            source: Arc::new(source),
        }
    }

    /// Whether another reconnect cycle may fix this.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StreamError::Config(_))
    }

    /// Text the failing external command produced, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            StreamError::Probe(e) => e.diagnostic(),
            _ => None,
        }
    }
}

impl From<FrameError> for StreamError {
    fn from(e: FrameError) -> Self {
        StreamError::Config(e.to_string())
    }
}
