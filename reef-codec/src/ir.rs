//! Batch intermediate representation (`RIR1`)
//!
//! The batch pipeline stores, per key, a partially-aggregated state covering
//! all data up to the snapshot's batch-end timestamp. The state has two
//! parts:
//!
//! - `collapsed`: one partial per output column, covering the portion of
//!   the window that stays in range for every query time in the serving
//!   period
//! - `tail_hops`: per-resolution pre-aggregated buckets spanning the window
//!   tail, so the aggregator can re-compose the exact hop-aligned window at
//!   query time without touching raw events
//!
//! ## Stream Layout
//!
//! ```text
//! [magic "RIR1"] [collapsed_count u16 LE] [partial]*
//! [series_count u8]
//!   per series: [hop_millis i64 LE] [hop_count u16 LE]
//!     per hop: [start_millis i64 LE] [partial_count u16 LE] [partial]*
//! ```
//!
//! ## Partial Encoding
//!
//! | Tag | Variant    | Layout after tag                         |
//! |-----|------------|------------------------------------------|
//! | 0   | Null       | (no payload)                             |
//! | 1   | Long       | `i64` LE                                 |
//! | 2   | Double     | `f64` LE bits                            |
//! | 3   | SumCount   | `f64` LE + `i64` LE                      |
//! | 4   | Timed      | `i64` LE millis + tagged value           |
//! | 5   | TimedList  | `u16` LE count × (`i64` LE + tagged value) |

use crate::error::{Error, Result};
use crate::row::{read_value, write_value, ByteReader};
use crate::value::Value;

/// Magic bytes identifying a batch IR payload.
pub const IR_MAGIC: [u8; 4] = *b"RIR1";

const TAG_NULL: u8 = 0;
const TAG_LONG: u8 = 1;
const TAG_DOUBLE: u8 = 2;
const TAG_SUM_COUNT: u8 = 3;
const TAG_TIMED: u8 = 4;
const TAG_TIMED_LIST: u8 = 5;

/// A partially-aggregated value for one output column.
///
/// The shape is operation-specific: counts and integral sums are `Long`,
/// floating sums and extrema are `Double`, averages carry `SumCount`, and
/// the order statistics carry timestamped values.
#[derive(Clone, Debug, PartialEq)]
pub enum Partial {
    /// No data observed
    Null,
    /// Integer accumulator (count, sum/min/max of longs)
    Long(i64),
    /// Floating accumulator (sum/min/max of doubles)
    Double(f64),
    /// Average accumulator
    SumCount {
        /// Running sum (widened to double)
        sum: f64,
        /// Number of non-null inputs
        count: i64,
    },
    /// Single timestamped value (last / first)
    Timed {
        /// Timestamp of the retained value
        millis: i64,
        /// The retained value
        value: Value,
    },
    /// Timestamped values, newest first, capped at k (last_k)
    TimedList(Vec<TimedEntry>),
}

/// One entry of a `Partial::TimedList`.
#[derive(Clone, Debug, PartialEq)]
pub struct TimedEntry {
    /// Row timestamp
    pub millis: i64,
    /// Row value
    pub value: Value,
}

impl Partial {
    /// True if this partial holds no data
    pub fn is_null(&self) -> bool {
        matches!(self, Partial::Null)
    }
}

/// One pre-aggregated bucket of the window tail.
#[derive(Clone, Debug, PartialEq)]
pub struct Hop {
    /// Hop-aligned start of the bucket, epoch millis
    pub start_millis: i64,
    /// One partial per output column using this resolution
    pub partials: Vec<Partial>,
}

/// All tail hops of one resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct HopSeries {
    /// Bucket width, epoch millis
    pub hop_millis: i64,
    /// Buckets; sorted by `start_millis` after denormalization
    pub hops: Vec<Hop>,
}

/// Deserialized batch intermediate representation.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchIr {
    /// One partial per output column (aggregation declaration order)
    pub collapsed: Vec<Partial>,
    /// Window-tail buckets, one series per hop resolution in use
    pub tail_hops: Vec<HopSeries>,
}

/// Stateless codec for `BatchIr` payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct IrCodec;

impl IrCodec {
    /// Encode a batch IR (used by the upload side and by tests).
    pub fn encode(ir: &BatchIr) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&IR_MAGIC);
        buf.extend_from_slice(&(ir.collapsed.len() as u16).to_le_bytes());
        for partial in &ir.collapsed {
            write_partial(&mut buf, partial);
        }
        buf.push(ir.tail_hops.len() as u8);
        for series in &ir.tail_hops {
            buf.extend_from_slice(&series.hop_millis.to_le_bytes());
            buf.extend_from_slice(&(series.hops.len() as u16).to_le_bytes());
            for hop in &series.hops {
                buf.extend_from_slice(&hop.start_millis.to_le_bytes());
                buf.extend_from_slice(&(hop.partials.len() as u16).to_le_bytes());
                for partial in &hop.partials {
                    write_partial(&mut buf, partial);
                }
            }
        }
        buf
    }

    /// Decode a batch IR payload.
    pub fn decode(bytes: &[u8]) -> Result<BatchIr> {
        let mut r = ByteReader::new(bytes);
        if r.take(4)? != IR_MAGIC.as_slice() {
            return Err(Error::InvalidMagic);
        }
        let collapsed_count = r.u16()? as usize;
        let mut collapsed = Vec::with_capacity(collapsed_count);
        for _ in 0..collapsed_count {
            collapsed.push(read_partial(&mut r)?);
        }
        let series_count = r.u8()? as usize;
        let mut tail_hops = Vec::with_capacity(series_count);
        for _ in 0..series_count {
            let hop_millis = r.i64()?;
            let hop_count = r.u16()? as usize;
            let mut hops = Vec::with_capacity(hop_count);
            for _ in 0..hop_count {
                let start_millis = r.i64()?;
                let partial_count = r.u16()? as usize;
                let mut partials = Vec::with_capacity(partial_count);
                for _ in 0..partial_count {
                    partials.push(read_partial(&mut r)?);
                }
                hops.push(Hop {
                    start_millis,
                    partials,
                });
            }
            tail_hops.push(HopSeries { hop_millis, hops });
        }
        if r.remaining() > 0 {
            return Err(Error::TrailingBytes(r.remaining()));
        }
        Ok(BatchIr {
            collapsed,
            tail_hops,
        })
    }
}

fn write_partial(buf: &mut Vec<u8>, partial: &Partial) {
    match partial {
        Partial::Null => buf.push(TAG_NULL),
        Partial::Long(v) => {
            buf.push(TAG_LONG);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Partial::Double(v) => {
            buf.push(TAG_DOUBLE);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Partial::SumCount { sum, count } => {
            buf.push(TAG_SUM_COUNT);
            buf.extend_from_slice(&sum.to_le_bytes());
            buf.extend_from_slice(&count.to_le_bytes());
        }
        Partial::Timed { millis, value } => {
            buf.push(TAG_TIMED);
            buf.extend_from_slice(&millis.to_le_bytes());
            write_value(buf, value);
        }
        Partial::TimedList(entries) => {
            buf.push(TAG_TIMED_LIST);
            buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for entry in entries {
                buf.extend_from_slice(&entry.millis.to_le_bytes());
                write_value(buf, &entry.value);
            }
        }
    }
}

fn read_partial(r: &mut ByteReader<'_>) -> Result<Partial> {
    let tag = r.u8()?;
    Ok(match tag {
        TAG_NULL => Partial::Null,
        TAG_LONG => Partial::Long(r.i64()?),
        TAG_DOUBLE => Partial::Double(r.f64()?),
        TAG_SUM_COUNT => Partial::SumCount {
            sum: r.f64()?,
            count: r.i64()?,
        },
        TAG_TIMED => Partial::Timed {
            millis: r.i64()?,
            value: read_value(r)?,
        },
        TAG_TIMED_LIST => {
            let count = r.u16()? as usize;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(TimedEntry {
                    millis: r.i64()?,
                    value: read_value(r)?,
                });
            }
            Partial::TimedList(entries)
        }
        other => return Err(Error::InvalidTag(other)),
    })
}
