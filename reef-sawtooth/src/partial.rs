//! Partial-aggregate algebra
//!
//! Each operation defines four moves over `Partial`:
//!
//! - `update`: fold one row value in (after-image / event)
//! - `merge`: combine two partials (batch collapsed + tail hops)
//! - `invert`: subtract one row value (before-image); invertible ops only
//! - `finalize`: produce the output value
//!
//! All moves treat `Partial::Null` as the identity, so an absent batch
//! snapshot and an empty stream fall out naturally. Timestamp-carrying
//! partials (`last`, `first`, `last_k`) decide by row time, never arrival
//! order, so folds are order-independent up to timestamp ties.

use crate::error::{Error, Result};
use crate::spec::Operation;
use reef_codec::{Partial, TimedEntry, Value};

/// Fold one row value into a partial.
pub fn update(
    op: Operation,
    partial: &mut Partial,
    value: &Value,
    millis: i64,
    k: usize,
    column: &str,
) -> Result<()> {
    match op {
        Operation::Count => match partial {
            Partial::Null => *partial = Partial::Long(1),
            Partial::Long(n) => *n = n.saturating_add(1),
            other => return Err(shape_error(column, op, other)),
        },
        Operation::Sum => match (&mut *partial, value) {
            (Partial::Null, Value::Long(v)) => *partial = Partial::Long(*v),
            (Partial::Null, Value::Double(v)) => *partial = Partial::Double(*v),
            (Partial::Long(a), Value::Long(v)) => *a = a.saturating_add(*v),
            (Partial::Double(a), Value::Double(v)) => *a += v,
            (Partial::Double(a), Value::Long(v)) => *a += *v as f64,
            (other, _) => return Err(shape_error(column, op, other)),
        },
        Operation::Min | Operation::Max => match (&mut *partial, value) {
            (Partial::Null, Value::Long(v)) => *partial = Partial::Long(*v),
            (Partial::Null, Value::Double(v)) => *partial = Partial::Double(*v),
            (Partial::Long(a), Value::Long(v)) => {
                *a = if op == Operation::Min {
                    (*a).min(*v)
                } else {
                    (*a).max(*v)
                }
            }
            (Partial::Double(a), Value::Double(v)) => {
                *a = if op == Operation::Min {
                    a.min(*v)
                } else {
                    a.max(*v)
                }
            }
            (other, _) => return Err(shape_error(column, op, other)),
        },
        Operation::Average => {
            let v = value
                .as_double()
                .ok_or_else(|| Error::corrupt(column, "average over non-numeric value"))?;
            match partial {
                Partial::Null => {
                    *partial = Partial::SumCount { sum: v, count: 1 };
                }
                Partial::SumCount { sum, count } => {
                    *sum += v;
                    *count += 1;
                }
                other => return Err(shape_error(column, op, other)),
            }
        }
        Operation::Last => match partial {
            Partial::Null => {
                *partial = Partial::Timed {
                    millis,
                    value: value.clone(),
                };
            }
            Partial::Timed {
                millis: cur,
                value: cur_value,
            } => {
                if millis >= *cur {
                    *cur = millis;
                    *cur_value = value.clone();
                }
            }
            other => return Err(shape_error(column, op, other)),
        },
        Operation::First => match partial {
            Partial::Null => {
                *partial = Partial::Timed {
                    millis,
                    value: value.clone(),
                };
            }
            Partial::Timed {
                millis: cur,
                value: cur_value,
            } => {
                if millis < *cur {
                    *cur = millis;
                    *cur_value = value.clone();
                }
            }
            other => return Err(shape_error(column, op, other)),
        },
        Operation::LastK => {
            let entry = TimedEntry {
                millis,
                value: value.clone(),
            };
            match partial {
                Partial::Null => *partial = Partial::TimedList(vec![entry]),
                Partial::TimedList(entries) => {
                    let at = entries
                        .iter()
                        .position(|e| e.millis < millis)
                        .unwrap_or(entries.len());
                    entries.insert(at, entry);
                    entries.truncate(k);
                }
                other => return Err(shape_error(column, op, other)),
            }
        }
    }
    Ok(())
}

/// Combine a second partial into the first.
pub fn merge(op: Operation, into: &mut Partial, other: &Partial, k: usize, column: &str) -> Result<()> {
    if other.is_null() {
        return Ok(());
    }
    if into.is_null() {
        *into = other.clone();
        if let (Operation::LastK, Partial::TimedList(entries)) = (op, &mut *into) {
            entries.truncate(k);
        }
        return Ok(());
    }
    match (op, &mut *into, other) {
        (Operation::Count | Operation::Sum, Partial::Long(a), Partial::Long(b)) => {
            *a = a.saturating_add(*b)
        }
        (Operation::Sum, Partial::Double(a), Partial::Double(b)) => *a += b,
        (Operation::Min, Partial::Long(a), Partial::Long(b)) => *a = (*a).min(*b),
        (Operation::Min, Partial::Double(a), Partial::Double(b)) => *a = a.min(*b),
        (Operation::Max, Partial::Long(a), Partial::Long(b)) => *a = (*a).max(*b),
        (Operation::Max, Partial::Double(a), Partial::Double(b)) => *a = a.max(*b),
        (
            Operation::Average,
            Partial::SumCount { sum, count },
            Partial::SumCount {
                sum: other_sum,
                count: other_count,
            },
        ) => {
            *sum += other_sum;
            *count += other_count;
        }
        (
            Operation::Last,
            Partial::Timed { millis, value },
            Partial::Timed {
                millis: other_millis,
                value: other_value,
            },
        ) => {
            if *other_millis > *millis {
                *millis = *other_millis;
                *value = other_value.clone();
            }
        }
        (
            Operation::First,
            Partial::Timed { millis, value },
            Partial::Timed {
                millis: other_millis,
                value: other_value,
            },
        ) => {
            if *other_millis < *millis {
                *millis = *other_millis;
                *value = other_value.clone();
            }
        }
        (Operation::LastK, Partial::TimedList(a), Partial::TimedList(b)) => {
            let mut merged = Vec::with_capacity((a.len() + b.len()).min(k));
            let (mut i, mut j) = (0, 0);
            while merged.len() < k && (i < a.len() || j < b.len()) {
                let take_a = match (a.get(i), b.get(j)) {
                    (Some(x), Some(y)) => x.millis >= y.millis,
                    (Some(_), None) => true,
                    _ => false,
                };
                if take_a {
                    merged.push(a[i].clone());
                    i += 1;
                } else {
                    merged.push(b[j].clone());
                    j += 1;
                }
            }
            *a = merged;
        }
        (_, into, _) => return Err(shape_error(column, op, into)),
    }
    Ok(())
}

/// Subtract one row value (before-image).
///
/// Returns `Ok(false)` when the operation is not invertible; the caller
/// decides how to report the skipped subtraction.
pub fn invert(op: Operation, partial: &mut Partial, value: &Value, column: &str) -> Result<bool> {
    if !op.is_invertible() {
        return Ok(false);
    }
    match op {
        Operation::Count => match partial {
            Partial::Null => *partial = Partial::Long(-1),
            Partial::Long(n) => *n = n.saturating_sub(1),
            other => return Err(shape_error(column, op, other)),
        },
        Operation::Sum => match (&mut *partial, value) {
            (Partial::Null, Value::Long(v)) => *partial = Partial::Long(-v),
            (Partial::Null, Value::Double(v)) => *partial = Partial::Double(-v),
            (Partial::Long(a), Value::Long(v)) => *a = a.saturating_sub(*v),
            (Partial::Double(a), Value::Double(v)) => *a -= v,
            (Partial::Double(a), Value::Long(v)) => *a -= *v as f64,
            (other, _) => return Err(shape_error(column, op, other)),
        },
        Operation::Average => {
            let v = value
                .as_double()
                .ok_or_else(|| Error::corrupt(column, "average over non-numeric value"))?;
            match partial {
                Partial::Null => {
                    *partial = Partial::SumCount { sum: -v, count: -1 };
                }
                Partial::SumCount { sum, count } => {
                    *sum -= v;
                    *count -= 1;
                }
                other => return Err(shape_error(column, op, other)),
            }
        }
        _ => unreachable!("is_invertible checked above"),
    }
    Ok(true)
}

/// Produce the output value.
pub fn finalize(op: Operation, partial: &Partial, column: &str) -> Result<Value> {
    Ok(match (op, partial) {
        (Operation::Count, Partial::Null) => Value::Long(0),
        (Operation::Count, Partial::Long(n)) => Value::Long(*n),
        (_, Partial::Null) => Value::Null,
        (Operation::Sum | Operation::Min | Operation::Max, Partial::Long(v)) => Value::Long(*v),
        (Operation::Sum | Operation::Min | Operation::Max, Partial::Double(v)) => Value::Double(*v),
        (Operation::Average, Partial::SumCount { sum, count }) => {
            if *count > 0 {
                Value::Double(sum / *count as f64)
            } else {
                Value::Null
            }
        }
        (Operation::Last | Operation::First, Partial::Timed { value, .. }) => value.clone(),
        (Operation::LastK, Partial::TimedList(entries)) => {
            Value::List(entries.iter().map(|e| e.value.clone()).collect())
        }
        (op, other) => return Err(shape_error(column, op, other)),
    })
}

fn shape_error(column: &str, op: Operation, partial: &Partial) -> Error {
    Error::corrupt(
        column,
        format!("unexpected partial shape {:?} for {}", partial, op.name()),
    )
}
