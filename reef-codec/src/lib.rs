//! # Reef Codec
//!
//! Typed values, schemas and binary codecs for Reef payloads.
//!
//! This crate provides:
//! - `Value`: the closed polymorphic value type flowing through the fetch path
//! - `Schema` / `DataType`: ordered, typed field lists binding codecs
//! - `RowCodec`: the schema-bound binary row format (keys, events, outputs)
//! - `MutationCodec`: the mutation envelope for entity sources
//! - `IrCodec` / `BatchIr` / `Partial`: the batch intermediate representation
//! - type coercion used by the key-encode fallback
//!
//! ## Design Principles
//!
//! 1. **Sync over bytes**: encode/decode operate on `&[u8]` / `Vec<u8>`;
//!    async stays at the I/O seam in the serving layer
//! 2. **Schema-bound, not self-describing**: payloads carry no field names;
//!    both sides hold the same schema via serving metadata
//! 3. **Deterministic**: equal logical inputs encode to equal bytes (key
//!    bytes are identity in the key-value store)

pub mod coerce;
pub mod error;
pub mod ir;
pub mod row;
pub mod schema;
pub mod value;

pub use coerce::{coerce_keys, coerce_value, CoercionError, CoercionResult};
pub use error::{Error, Result};
pub use ir::{BatchIr, Hop, HopSeries, IrCodec, Partial, TimedEntry, IR_MAGIC};
pub use row::{MutationCodec, RowCodec, StreamingRow};
pub use schema::{DataType, Field, Schema};
pub use value::Value;
