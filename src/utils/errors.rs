use std::path::PathBuf;
use thiserror::Error;

/// Location context attached to configuration and build errors
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub detail: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum BedrockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A package named explicitly could not be located or its descriptor
    /// was unreadable. The closure walker skips such packages instead.
    #[error("Package resolution failed for '{package}': {reason}")]
    Resolution { package: String, reason: String },

    #[error("Cache IO error: {0}")]
    CacheIo(String),

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Build error: {message}")]
    Build {
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BedrockError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            context: None,
        }
    }

    pub fn config_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Config {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
            context: None,
        }
    }

    pub fn build_with_context(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::Build {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn cache_io(message: impl Into<String>) -> Self {
        Self::CacheIo(message.into())
    }

    /// Configuration failures are the only class that aborts before any
    /// build work starts.
    pub fn is_fatal_at_configuration(&self) -> bool {
        matches!(self, BedrockError::Config { .. })
    }

    /// Format error with context lines for terminal output
    pub fn format_detailed(&self) -> String {
        match self {
            BedrockError::Config { message, context } => {
                Self::format_with_context("Configuration Error", message, context)
            }
            BedrockError::Build { message, context } => {
                Self::format_with_context("Build Error", message, context)
            }
            _ => format!("❌ {}", self),
        }
    }

    fn format_with_context(
        error_type: &str,
        message: &str,
        context: &Option<ErrorContext>,
    ) -> String {
        let mut output = format!("❌ {}: {}", error_type, message);

        if let Some(ctx) = context {
            if let Some(ref file_path) = ctx.file_path {
                output.push_str(&format!("\n📁 File: {}", file_path.display()));
            }
            if let Some(ref detail) = ctx.detail {
                output.push_str(&format!("\n📝 {}", detail));
            }
        }

        output
    }
}

pub type Result<T> = std::result::Result<T, BedrockError>;

impl From<serde_json::Error> for BedrockError {
    fn from(err: serde_json::Error) -> Self {
        BedrockError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for BedrockError {
    fn from(err: bincode::Error) -> Self {
        BedrockError::Serialization(err.to_string())
    }
}

impl From<sled::Error> for BedrockError {
    fn from(err: sled::Error) -> Self {
        BedrockError::CacheIo(err.to_string())
    }
}
