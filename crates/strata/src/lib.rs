//! Public surface of the strata persistence engine. Hosts depend on this
//! crate and pull the common working set from [`prelude`].

pub use strata_core::{
    Error, ErrorClass, ErrorOrigin, cancel, codec, config, db, error, item, schema, value,
};

pub mod prelude {
    pub use strata_core::{
        Error,
        cancel::CancelToken,
        codec::{BinarySerializer, Serializer, SerializerProvider},
        config::DatabaseConfig,
        db::{Database, Event, EventKind, MemoryBackend, Ref, Related, StoreError, batch::Batch},
        item::{Item, ItemCollection},
        schema::{
            Converter, Record, SchemaBuilder, SchemaRegistry, ValueConverter,
            convert::ConvertContext,
        },
        value::{Float32, Float64, Value, ValueKind},
    };
}
