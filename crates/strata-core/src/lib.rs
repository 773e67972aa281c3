//! Schema-driven object serialization and persistence core.
//!
//! Types describe themselves once through [`schema::Record`]; everything
//! else is driven by the derived [`schema::Schema`]: the converter chains
//! that move values between instances and the wire, the positional binary
//! codec, and the [`db::Database`] facade with its entity cache, explicit
//! batches, and delayed flush queue.

pub mod cancel;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod item;
pub mod schema;
pub mod value;

pub use error::{Error, ErrorClass, ErrorOrigin};
