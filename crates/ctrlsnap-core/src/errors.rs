use ctrlsnap_core_types::SourceId;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure surfaced by the store, the engine or the CLI is classified
/// by one of these kinds. Each kind maps to a stable error code used in logs
/// and for exit-code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Caller / startup
    InvalidInput,
    Configuration,

    // Source content
    /// Source file cannot be parsed; never retried for the same file
    Format,
    /// Parsed elements are missing data required by a table map
    Projection,

    // Schema lifecycle
    /// Schema has pending migrations; nothing was written
    MigrationRequired,
    /// An applied migration no longer matches the catalog script
    ChecksumMismatch,

    // Storage / IO
    /// Connectivity, constraint or other storage-layer failure
    Provider,
    NotFound,
    Io,
    Serialization,

    // Ingestion queues
    QueueFull,
    QueueClosed,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::Format => "ERR_FORMAT",
            ExErrorKind::Projection => "ERR_PROJECTION",
            ExErrorKind::MigrationRequired => "ERR_MIGRATION_REQUIRED",
            ExErrorKind::ChecksumMismatch => "ERR_CHECKSUM_MISMATCH",
            ExErrorKind::Provider => "ERR_PROVIDER",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::QueueFull => "ERR_QUEUE_FULL",
            ExErrorKind::QueueClosed => "ERR_QUEUE_CLOSED",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether retrying the same input could ever succeed.
    ///
    /// Format and projection failures are properties of the file itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExErrorKind::Provider | ExErrorKind::Io | ExErrorKind::QueueFull
        )
    }
}

/// Canonical structured error type
///
/// Carries the classification plus the context needed to act on it: the
/// operation, the data source (for migration and provider failures), the
/// target being imported and the queued source id.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    data_source: Option<String>,
    target: Option<String>,
    source_id: Option<SourceId>,
    message: String,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            data_source: None,
            target: None,
            source_id: None,
            message: String::new(),
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add data source context (database file or server/database)
    pub fn with_data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = Some(data_source.into());
        self
    }

    /// Add target context, usually `TargetType:TargetName`
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Add queued source id context
    pub fn with_source_id(mut self, source_id: SourceId) -> Self {
        self.source_id = Some(source_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the data source context, if any
    pub fn data_source(&self) -> Option<&str> {
        self.data_source.as_deref()
    }

    /// Get the target context, if any
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Get the source id context, if any
    pub fn source_id(&self) -> Option<&SourceId> {
        self.source_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(data_source) = &self.data_source {
            write!(f, " (data_source: {})", data_source)?;
        }
        if let Some(target) = &self.target {
            write!(f, " (target: {})", target)?;
        }
        if let Some(source_id) = &self.source_id {
            write!(f, " (source_id: {})", source_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

impl From<std::io::Error> for ExError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ExErrorKind::NotFound,
            _ => ExErrorKind::Io,
        };
        ExError::new(kind).with_message(err.to_string())
    }
}

impl From<serde_json::Error> for ExError {
    fn from(err: serde_json::Error) -> Self {
        ExError::new(ExErrorKind::Serialization).with_message(err.to_string())
    }
}

// ========== End Error Facility ==========
