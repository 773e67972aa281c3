pub mod binary;
pub mod buffer;

#[cfg(test)]
mod tests;

use crate::{
    cancel::CancelToken,
    error::{Error, ErrorClass, ErrorOrigin},
    item::{ItemCollection, ItemError},
    schema::{ConvertError, Schema, SchemaError},
    value::wire::WireError,
};
use std::{
    collections::HashMap,
    io::{Read, Write},
    sync::Arc,
};
use thiserror::Error as ThisError;

pub use binary::BinarySerializer;

///
/// CodecError
///

#[derive(Debug, ThisError)]
pub enum CodecError {
    /// The stream ended before an expected field was fully read. Fatal;
    /// the stream is considered corrupt.
    #[error("insufficient stream: needed {needed} more bytes")]
    InsufficientStream { needed: usize },

    #[error("invalid wire value: {message}")]
    InvalidValue { message: String },

    #[error("unsupported codec operation: {message}")]
    Unsupported { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Schema(Box<SchemaError>),
}

impl CodecError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::InsufficientStream { .. } | Self::InvalidValue { .. } | Self::Wire(_) => {
                ErrorClass::Corruption
            }
            Self::Unsupported { .. } => ErrorClass::Unsupported,
            Self::Cancelled => ErrorClass::Usage,
            Self::Io(_) => ErrorClass::Internal,
            Self::Convert(_) => ErrorClass::Conversion,
            Self::Item(_) => ErrorClass::Conflict,
            Self::Schema(_) => ErrorClass::Validation,
        }
    }
}

impl From<SchemaError> for CodecError {
    fn from(err: SchemaError) -> Self {
        Self::Schema(Box::new(err))
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Self::new(err.class(), ErrorOrigin::Codec, err.to_string())
    }
}

///
/// Serializer
///
/// The contract every codec implements. One call renders a structured
/// `ItemCollection` against its schema; field identity on the wire is
/// positional, driven by the schema field order the reader supplies.
///

pub trait Serializer: Send + Sync {
    /// Wire-format tag (doubles as the file extension for dumps).
    fn file_extension(&self) -> &'static str;

    fn serialize(
        &self,
        schema: &Schema,
        items: &ItemCollection,
        out: &mut dyn Write,
        cancel: &CancelToken,
    ) -> Result<(), CodecError>;

    fn deserialize(
        &self,
        schema: &Schema,
        input: &mut dyn Read,
        cancel: &CancelToken,
    ) -> Result<ItemCollection, CodecError>;
}

///
/// SerializerProvider
///
/// Format-tag → codec lookup, so nested and collection fields can
/// recursively obtain a codec for their own element type.
///

#[derive(Default)]
pub struct SerializerProvider {
    by_extension: HashMap<&'static str, Arc<dyn Serializer>>,
}

impl SerializerProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider pre-loaded with the binary codec.
    #[must_use]
    pub fn with_binary(registry: Arc<crate::schema::SchemaRegistry>) -> Self {
        let mut provider = Self::new();
        provider.register(Arc::new(BinarySerializer::new(registry)));
        provider
    }

    pub fn register(&mut self, serializer: Arc<dyn Serializer>) {
        self.by_extension
            .insert(serializer.file_extension(), serializer);
    }

    #[must_use]
    pub fn get(&self, extension: &str) -> Option<Arc<dyn Serializer>> {
        self.by_extension.get(extension).cloned()
    }
}
