/// Errors surfaced by the miniservice lifecycle and discovery layer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Listener bind, port lookup or host detection failed.
    #[error("{context}")]
    Network {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("invalid discovery tag {tag:?}: {reason}")]
    Format { tag: String, reason: &'static str },

    #[error("{0}")]
    NotFound(String),

    #[error("registry {operation} failed: {message}")]
    Registry {
        operation: &'static str,
        message: String,
    },

    /// RPC serve loop or dial failure.
    #[error("{context}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn network(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Network {
            context: context.into(),
            source: Some(source),
        }
    }

    pub fn registry(operation: &'static str, message: impl ToString) -> Self {
        Error::Registry {
            operation,
            message: message.to_string(),
        }
    }

    pub fn transport(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Transport {
            context: context.into(),
            source: source.into(),
        }
    }
}
