//! Error taxonomy for pipeline runs.
//!
//! Every failure surfaced to a caller is a [`PipelineError`] carrying its
//! kind, a human message, and optional provider / column / row context. The
//! hosting binary maps kinds to exit codes via [`PipelineError::exit_code`].

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Unknown provider, bad connection string, or bad option value.
    #[error("config error: {message}")]
    Config { message: String },

    /// Static validator errors, or per-value violations in strict mode.
    #[error("schema error: {message}{}", fmt_ctx(.column, .row))]
    Schema {
        message: String,
        column: Option<String>,
        row: Option<u64>,
    },

    /// A failure the retry policy classifies as retryable.
    #[error("transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Non-transient driver or file-system failure.
    #[error("{message}{}", .provider.as_deref().map(|p| format!(" (provider {p})")).unwrap_or_default())]
    Io {
        message: String,
        provider: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Compilation or runtime error in a user script. Always aborts.
    #[error("script error: {message}")]
    Script { message: String },

    #[error("cancelled")]
    Cancelled,
}

fn fmt_ctx(column: &Option<String>, row: &Option<u64>) -> String {
    let mut out = String::new();
    if let Some(c) = column {
        out.push_str(&format!(" (column {c}"));
        if let Some(r) = row {
            out.push_str(&format!(", row {r}"));
        }
        out.push(')');
    } else if let Some(r) = row {
        out.push_str(&format!(" (row {r})"));
    }
    out
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::Config {
            message: message.into(),
        }
    }

    /// No registered descriptor accepted the connection string.
    pub fn provider_not_found(connection_string: &str) -> Self {
        PipelineError::Config {
            message: format!("provider-not-found: no provider accepts `{connection_string}`"),
        }
    }

    /// A descriptor accepted the connection string but construction failed.
    pub fn provider_construction(name: &str, cause: PipelineError) -> Self {
        PipelineError::Io {
            message: format!("provider-construction: {cause}"),
            provider: Some(name.to_string()),
            source: Some(Box::new(cause)),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        PipelineError::Schema {
            message: message.into(),
            column: None,
            row: None,
        }
    }

    pub fn schema_at(message: impl Into<String>, column: impl Into<String>, row: u64) -> Self {
        PipelineError::Schema {
            message: message.into(),
            column: Some(column.into()),
            row: Some(row),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        PipelineError::Transient {
            message: message.into(),
            source: None,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        PipelineError::Io {
            message: message.into(),
            provider: None,
            source: None,
        }
    }

    pub fn io_from(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        PipelineError::Io {
            message: message.into(),
            provider: None,
            source: Some(source.into()),
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        PipelineError::Script {
            message: message.into(),
        }
    }

    pub fn with_provider(mut self, name: &str) -> Self {
        if let PipelineError::Io { provider, .. } = &mut self {
            *provider = Some(name.to_string());
        }
        self
    }

    /// Process exit code for hosting CLIs.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config { .. } | PipelineError::Schema { .. } => 1,
            PipelineError::Transient { .. }
            | PipelineError::Io { .. }
            | PipelineError::Script { .. } => 2,
            PipelineError::Cancelled => 130,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Io {
            message: e.to_string(),
            provider: None,
            source: Some(Box::new(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(PipelineError::config("x").exit_code(), 1);
        assert_eq!(PipelineError::schema("x").exit_code(), 1);
        assert_eq!(PipelineError::io("x").exit_code(), 2);
        assert_eq!(PipelineError::script("x").exit_code(), 2);
        assert_eq!(PipelineError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn schema_context_shows_in_message() {
        let e = PipelineError::schema_at("value too long", "NAME", 12);
        assert_eq!(e.to_string(), "schema error: value too long (column NAME, row 12)");
    }

    #[test]
    fn construction_failures_keep_the_cause() {
        let cause = PipelineError::config("bad delimiter");
        let e = PipelineError::provider_construction("csv", cause);
        assert!(e.to_string().contains("provider-construction"));
        assert!(std::error::Error::source(&e).is_some());
    }
}
