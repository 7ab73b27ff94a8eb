use std::fmt;

/// Machine-readable error codes for callers that branch on failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DocumentNotFound,
    InvalidStateTransition,
    InvalidInput,
    IndexUnavailable,
    FeatureDisabled,
    RerankUnavailable,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::DocumentNotFound => "E2001",
            Self::InvalidStateTransition => "E2002",
            Self::InvalidInput => "E2006",
            Self::IndexUnavailable => "E6001",
            Self::FeatureDisabled => "E6003",
            Self::RerankUnavailable => "E6002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::DocumentNotFound => "Document not found",
            Self::InvalidStateTransition => "Invalid indexing state transition",
            Self::InvalidInput => "Invalid input",
            Self::IndexUnavailable => "Index unavailable",
            Self::FeatureDisabled => "Feature disabled",
            Self::RerankUnavailable => "Semantic rerank unavailable",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::DocumentNotFound => None,
            Self::InvalidStateTransition => {
                Some("Follow valid transitions: pending -> indexing -> completed | failed.")
            }
            Self::InvalidInput => Some(
                "Documents need non-empty content and ordered lines; embeddings must match the index dimension.",
            ),
            Self::IndexUnavailable => Some("Check that the index backend is reachable and retry."),
            Self::FeatureDisabled => {
                Some("Enable the feature in the [retrieval] section of the config.")
            }
            Self::RerankUnavailable => Some("Use rerank_method = \"lexical\" or fix the reranker model."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure taxonomy for retrieval operations.
///
/// `IndexUnavailable`, `FeatureDisabled` and `InvalidInput` are fatal to the
/// call that raised them. `RerankUnavailable` is recoverable: the orchestrator
/// answers it by falling back to lexical rerank.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalError {
    /// A required index collaborator could not be reached or failed.
    #[error("{index} index unavailable: {reason}")]
    IndexUnavailable { index: String, reason: String },

    /// The caller asked for a capability that was not enabled at construction.
    #[error("feature disabled: {0}")]
    FeatureDisabled(&'static str),

    /// Malformed input, e.g. a document without content.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The semantic reranker failed to load or to score.
    #[error("semantic rerank unavailable: {0}")]
    RerankUnavailable(String),

    /// No tracked document with the given id.
    #[error("document not found: {0}")]
    NotFound(String),

    /// An indexing-state transition that the lifecycle does not allow.
    #[error("invalid state transition for {id}: {from} -> {to}")]
    InvalidStateTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },
}

impl RetrievalError {
    pub fn index_unavailable(index: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::IndexUnavailable {
            index: index.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn rerank_unavailable(reason: impl fmt::Display) -> Self {
        Self::RerankUnavailable(reason.to_string())
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::IndexUnavailable { .. } => ErrorCode::IndexUnavailable,
            Self::FeatureDisabled(_) => ErrorCode::FeatureDisabled,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::RerankUnavailable(_) => ErrorCode::RerankUnavailable,
            Self::NotFound(_) => ErrorCode::DocumentNotFound,
            Self::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Whether the orchestrator may recover from this error by degrading.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::RerankUnavailable(_))
    }
}
