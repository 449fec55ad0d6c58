//! Query-time recomposition of batch state and streaming rows
//!
//! `SawtoothAggregator` is built once per serving-info load and shared
//! read-only. Its one hot operation, `lambda_aggregate_finalized`, takes the
//! decoded batch IR (or none), a lazy single-pass stream of decoded rows,
//! and a query time, and produces the finalized output vector in output
//! codec order:
//!
//! 1. Start from `collapsed` (or empty partials when no snapshot exists)
//! 2. Merge in every tail hop at or after the hop-aligned window start
//! 3. Fold streaming rows whose timestamp falls inside the window
//! 4. Finalize per column
//!
//! Mutations fold with before-image subtraction and after-image addition;
//! a before-image of a non-invertible operation is skipped (the IR does not
//! retain enough state to undo an order statistic).

use crate::error::{Error, Result};
use crate::partial;
use crate::spec::{hop_floor, Aggregation, Operation};
use reef_codec::{BatchIr, Field, Partial, Schema, StreamingRow, Value};
use tracing::debug;

/// One planned output column.
#[derive(Clone, Debug)]
struct ColumnPlan {
    op: Operation,
    /// Index into the input (selected) schema
    input_index: usize,
    /// k for last_k, otherwise unused
    k: usize,
    /// Window length; None for lifetime aggregations
    window_millis: Option<i64>,
    /// Hop resolution; None for lifetime aggregations
    hop_millis: Option<i64>,
    /// Position among windowed columns sharing this hop resolution —
    /// the column's slot inside each hop of the matching series
    series_slot: usize,
    output: Field,
}

/// Shared, serving-info-bound aggregation engine.
#[derive(Clone, Debug)]
pub struct SawtoothAggregator {
    columns: Vec<ColumnPlan>,
    output_schema: Schema,
}

impl SawtoothAggregator {
    /// Plan an aggregator from configured aggregations and the input schema.
    pub fn new(aggregations: &[Aggregation], input_schema: &Schema) -> Result<Self> {
        let mut columns = Vec::with_capacity(aggregations.len());
        let mut slots_per_hop: Vec<(i64, usize)> = Vec::new();
        for agg in aggregations {
            let input_index = input_schema
                .index_of(&agg.input_column)
                .ok_or_else(|| Error::UnknownColumn(agg.input_column.clone()))?;
            let output = agg.output_field(&input_schema.fields[input_index].data_type)?;
            let window_millis = agg.window.map(|w| w.millis());
            let hop_millis = agg.window.map(|w| w.hop());
            let series_slot = match hop_millis {
                Some(hop) => match slots_per_hop.iter_mut().find(|(h, _)| *h == hop) {
                    Some((_, n)) => {
                        let slot = *n;
                        *n += 1;
                        slot
                    }
                    None => {
                        slots_per_hop.push((hop, 1));
                        0
                    }
                },
                None => 0,
            };
            columns.push(ColumnPlan {
                op: agg.operation,
                input_index,
                k: agg.k.unwrap_or(0),
                window_millis,
                hop_millis,
                series_slot,
                output,
            });
        }
        let output_schema = Schema::new(columns.iter().map(|c| c.output.clone()).collect());
        Ok(Self {
            columns,
            output_schema,
        })
    }

    /// Output schema, in aggregation declaration order.
    pub fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    /// Rehydrate a decoded IR into working form and validate its shape
    /// against this plan: collapsed arity, per-hop arity, hop ordering.
    pub fn denormalize(&self, ir: &mut BatchIr) -> Result<()> {
        if ir.collapsed.len() != self.columns.len() {
            return Err(Error::ir_mismatch(format!(
                "collapsed has {} partials, plan has {} columns",
                ir.collapsed.len(),
                self.columns.len()
            )));
        }
        for series in &mut ir.tail_hops {
            let expected = self
                .columns
                .iter()
                .filter(|c| c.hop_millis == Some(series.hop_millis))
                .count();
            for hop in &series.hops {
                if hop.partials.len() != expected {
                    return Err(Error::ir_mismatch(format!(
                        "hop at {} has {} partials, {} columns use the {}ms resolution",
                        hop.start_millis,
                        hop.partials.len(),
                        expected,
                        series.hop_millis
                    )));
                }
            }
            series.hops.sort_by_key(|h| h.start_millis);
        }
        Ok(())
    }

    /// Merge the batch IR with streaming rows at `query_millis` and
    /// finalize, honoring each column's window and, for entity data,
    /// mutation semantics.
    ///
    /// `rows` is consumed lazily and at most once; decode failures abort
    /// the fold with `Error::Decode`.
    pub fn lambda_aggregate_finalized<I>(
        &self,
        batch_ir: Option<&BatchIr>,
        rows: I,
        query_millis: i64,
        is_mutation: bool,
    ) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = reef_codec::Result<StreamingRow>>,
    {
        // 1. collapsed (or empty when no snapshot)
        let mut acc: Vec<Partial> = match batch_ir {
            Some(ir) if ir.collapsed.len() != self.columns.len() => {
                return Err(Error::ir_mismatch(format!(
                    "collapsed has {} partials, plan has {} columns",
                    ir.collapsed.len(),
                    self.columns.len()
                )));
            }
            Some(ir) => ir.collapsed.clone(),
            None => vec![Partial::Null; self.columns.len()],
        };

        // 2. in-window tail hops
        if let Some(ir) = batch_ir {
            for (i, col) in self.columns.iter().enumerate() {
                let (Some(window), Some(hop)) = (col.window_millis, col.hop_millis) else {
                    continue;
                };
                let window_start = hop_floor(query_millis - window, hop);
                let Some(series) = ir.tail_hops.iter().find(|s| s.hop_millis == hop) else {
                    continue;
                };
                for tail_hop in &series.hops {
                    if tail_hop.start_millis < window_start {
                        continue;
                    }
                    let hop_partial = tail_hop.partials.get(col.series_slot).ok_or_else(|| {
                        Error::corrupt(&col.output.name, "hop narrower than plan")
                    })?;
                    partial::merge(col.op, &mut acc[i], hop_partial, col.k, &col.output.name)?;
                }
            }
        }

        // 3. streaming rows
        for row in rows {
            let row = row?;
            if row.millis > query_millis {
                continue;
            }
            for (i, col) in self.columns.iter().enumerate() {
                if let Some(window) = col.window_millis {
                    let window_start =
                        hop_floor(query_millis - window, col.hop_millis.unwrap_or(window));
                    if row.millis < window_start {
                        continue;
                    }
                }
                let value = row.values.get(col.input_index).ok_or_else(|| {
                    Error::corrupt(&col.output.name, "row narrower than input schema")
                })?;
                if value.is_null() {
                    continue;
                }
                if is_mutation && row.is_before {
                    let applied = partial::invert(col.op, &mut acc[i], value, &col.output.name)?;
                    if !applied {
                        debug!(
                            column = %col.output.name,
                            "skipping before-image for non-invertible aggregation"
                        );
                    }
                } else {
                    partial::update(
                        col.op,
                        &mut acc[i],
                        value,
                        row.millis,
                        col.k,
                        &col.output.name,
                    )?;
                }
            }
        }

        // 4. finalize
        self.columns
            .iter()
            .zip(&acc)
            .map(|(col, partial)| partial::finalize(col.op, partial, &col.output.name))
            .collect()
    }
}
