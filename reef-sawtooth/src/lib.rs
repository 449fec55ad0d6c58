//! # Reef Sawtooth
//!
//! Windowed aggregation engine for temporal-accurate fetches.
//!
//! A temporal fetch starts from a batch-precomputed partial state and folds
//! post-snapshot streaming rows into it at query time. Windows advance in
//! coarse "hops": the effective window left edge is the query time minus the
//! window length, rounded down to the hop boundary, so the effective length
//! decays from `W + hop` to `W` as the query time sweeps a hop — the
//! sawtooth. Hop-aligned edges are what make the batch side precomputable:
//! the tail of the window is stored as per-hop buckets that either fall
//! fully inside or fully outside any query's window.
//!
//! This crate provides:
//! - `Aggregation` / `Operation` / `Window`: the aggregation specification
//! - `hop_millis`: the window-length → hop-resolution ladder
//! - the partial-aggregate algebra (update / merge / invert / finalize)
//! - `SawtoothAggregator`: query-time recomposition over a `BatchIr` and a
//!   lazy, single-pass stream of decoded rows

pub mod error;
pub mod partial;
pub mod sawtooth;
pub mod spec;

pub use error::{Error, Result};
pub use sawtooth::SawtoothAggregator;
pub use spec::{hop_floor, hop_millis, Aggregation, Operation, Window};
