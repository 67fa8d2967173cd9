//! Shared error taxonomy for the DSA link SDK.
//!
//! Every crate in the workspace that can fail synchronously (node builder,
//! node updater, redo log, table modifier, ...) defines its own local error
//! type and converts it `From` into [`Error`] at the crate boundary, so a
//! host application sees one enumerated, typed error surface regardless of
//! which component raised it.

use std::fmt;

/// Broad grouping of [`ErrorKind`] values, useful for coarse dispatch or
/// metrics without matching on every individual kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Node tree lookups, value/config/attribute access.
    NodeModel,
    /// `NodeBuilder`/`NodeUpdater` misuse.
    Builder,
    /// Action result streams, table modifiers.
    Stream,
    /// Link construction, role mismatches.
    Link,
    /// Startup deserialization of `nodes.json`.
    Serialization,
    /// Anything that doesn't fit the above.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::NodeModel => "node-model",
            ErrorCategory::Builder => "builder",
            ErrorCategory::Stream => "stream",
            ErrorCategory::Link => "link",
            ErrorCategory::Serialization => "serialization",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Enumerated error kinds for the SDK's own error surface.
///
/// Codes start at 9000 so log lines and support tickets referencing a code
/// stay stable as kinds are added.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("path not found")]
    PathNotFound,
    #[error("config value not found")]
    ConfigValueNotFound,
    #[error("attribute value not found")]
    AttributeValueNotFound,
    #[error("not a value node")]
    NotAValueNode,
    #[error("invalid value")]
    InvalidValue,
    #[error("invalid config name")]
    InvalidConfigName,
    #[error("invalid stream")]
    InvalidStream,
    #[error("invalid editor type")]
    InvalidEditorType,
    #[error("editor type not allowed")]
    EditorTypeNotAllowed,
    #[error("no node defined yet")]
    NoNodeDefinedYet,
    #[error("invalid table replace modifier index")]
    InvalidTableReplaceModifierIndex,
    #[error("invalid link type specified")]
    InvalidLinkTypeSpecified,
    #[error("node is not writable")]
    NodeIsNotWritable,
    #[error("empty name specified")]
    EmptyNameSpecified,
    #[error("invalid name characters specified")]
    InvalidNameCharacters,
    #[error("no dslink.json found")]
    NoDslinkJsonFound,
    #[error("invalid dslink.json")]
    InvalidDslinkJson,
    #[error("invalid remove operation")]
    InvalidRemoveOperation,
    #[error("invalid permission specified")]
    InvalidPermissionSpecified,
    #[error("internal error")]
    InternalError,
}

impl ErrorKind {
    /// Stable integer code for this kind, starting at 9000 in declaration order.
    pub fn code(self) -> u32 {
        9000 + self as u32
    }

    /// The broad category this kind belongs to.
    pub fn category(self) -> ErrorCategory {
        use ErrorKind::*;
        match self {
            PathNotFound | ConfigValueNotFound | AttributeValueNotFound | NotAValueNode
            | InvalidValue | InvalidConfigName | NodeIsNotWritable => ErrorCategory::NodeModel,
            InvalidEditorType
            | EditorTypeNotAllowed
            | NoNodeDefinedYet
            | EmptyNameSpecified
            | InvalidNameCharacters
            | InvalidRemoveOperation
            | InvalidPermissionSpecified => ErrorCategory::Builder,
            InvalidStream | InvalidTableReplaceModifierIndex => ErrorCategory::Stream,
            InvalidLinkTypeSpecified => ErrorCategory::Link,
            NoDslinkJsonFound | InvalidDslinkJson => ErrorCategory::Serialization,
            InternalError => ErrorCategory::Internal,
        }
    }
}

/// The SDK's error type: a kind plus an optional human-readable detail
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<String>,
}

impl Error {
    /// Construct an error carrying just a kind, no extra detail.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    /// Construct an error with an additional free-text detail message.
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The error's category.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// The error's stable integer code.
    pub fn code(&self) -> u32 {
        self.kind.code()
    }

    /// The free-text detail, if any was attached.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "[{}] {}: {}", self.code(), self.kind, detail),
            None => write!(f, "[{}] {}", self.code(), self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

/// Convenience alias used throughout the SDK's synchronous validation paths.
pub type Result<T> = std::result::Result<T, Error>;
