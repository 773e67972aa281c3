use std::fmt;
use thiserror::Error as ThisError;

///
/// Error
///
/// Structured runtime error with a stable internal classification.
/// Subsystem errors (`SchemaError`, `ConvertError`, `CodecError`,
/// `StoreError`, `BatchError`) convert into this type at the crate
/// boundary; the (class, origin) pair survives the conversion so callers
/// can branch without parsing message text.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct Error {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    /// Construct an error with an explicit classification.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.class, ErrorClass::NotFound)
    }

    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self.class, ErrorClass::Usage)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// Schema metadata failed validation; fatal at first use.
    Validation,
    /// A converter could not interpret a value or wire datum.
    Conversion,
    /// Wire bytes are structurally invalid (for example, a short stream).
    Corruption,
    NotFound,
    Conflict,
    Unsupported,
    /// The caller misused the API (closed batch, disposed resource).
    Usage,
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::Conversion => "conversion",
            Self::Corruption => "corruption",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unsupported => "unsupported",
            Self::Usage => "usage",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Schema,
    Convert,
    Item,
    Codec,
    Store,
    Cache,
    Batch,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Schema => "schema",
            Self::Convert => "convert",
            Self::Item => "item",
            Self::Codec => "codec",
            Self::Store => "store",
            Self::Cache => "cache",
            Self::Batch => "batch",
        };
        write!(f, "{label}")
    }
}
