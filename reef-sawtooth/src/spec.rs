//! Aggregation specifications
//!
//! An `Aggregation` names an input column, an operation, and optionally a
//! window. Windows are written in the compact `30m` / `12h` / `7d` form in
//! metadata documents and output column names.
//!
//! ## Hop Resolution
//!
//! Each window length maps to one hop (bucket) resolution:
//!
//! | Window      | Hop        |
//! |-------------|------------|
//! | ≤ 12 hours  | 5 minutes  |
//! | ≤ 12 days   | 1 hour     |
//! | larger      | 1 day      |
//!
//! Finer hops on short windows keep the sawtooth decay small relative to
//! the window; coarser hops on long windows keep tail-bucket counts bounded.

use crate::error::{Error, Result};
use reef_codec::{DataType, Field};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millis per minute.
pub const MINUTE_MILLIS: i64 = 60 * 1000;
/// Millis per hour.
pub const HOUR_MILLIS: i64 = 60 * MINUTE_MILLIS;
/// Millis per day.
pub const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;

/// Five-minute hop, used for windows up to 12 hours.
pub const FIVE_MINUTES: i64 = 5 * MINUTE_MILLIS;
/// One-hour hop, used for windows up to 12 days.
pub const ONE_HOUR: i64 = HOUR_MILLIS;
/// One-day hop, used for larger windows.
pub const ONE_DAY: i64 = DAY_MILLIS;

/// Hop resolution for a window length.
pub fn hop_millis(window_millis: i64) -> i64 {
    if window_millis <= 12 * HOUR_MILLIS {
        FIVE_MINUTES
    } else if window_millis <= 12 * DAY_MILLIS {
        ONE_HOUR
    } else {
        ONE_DAY
    }
}

/// Round a timestamp down to its hop boundary.
pub fn hop_floor(millis: i64, hop: i64) -> i64 {
    millis.div_euclid(hop) * hop
}

/// Aggregation operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Number of non-null inputs
    Count,
    /// Numeric sum
    Sum,
    /// Numeric minimum
    Min,
    /// Numeric maximum
    Max,
    /// Arithmetic mean
    Average,
    /// Value with the greatest row timestamp
    Last,
    /// Value with the smallest row timestamp
    First,
    /// The k values with the greatest row timestamps, newest first
    LastK,
}

impl Operation {
    /// Name fragment used in output column names (`last_k` renders with its
    /// k inline, see `Aggregation::output_column`).
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Count => "count",
            Operation::Sum => "sum",
            Operation::Min => "min",
            Operation::Max => "max",
            Operation::Average => "average",
            Operation::Last => "last",
            Operation::First => "first",
            Operation::LastK => "last_k",
        }
    }

    /// True if a before-image can be subtracted from the running state.
    ///
    /// Order statistics are not invertible without the full event log.
    pub fn is_invertible(&self) -> bool {
        matches!(self, Operation::Count | Operation::Sum | Operation::Average)
    }

    /// True if the operation only runs over numeric inputs.
    pub fn requires_numeric(&self) -> bool {
        matches!(
            self,
            Operation::Sum | Operation::Min | Operation::Max | Operation::Average
        )
    }
}

/// A time window, rendered as `30m` / `12h` / `7d`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Window {
    millis: i64,
}

impl Window {
    /// Window from whole minutes
    pub fn minutes(n: i64) -> Self {
        Self {
            millis: n * MINUTE_MILLIS,
        }
    }

    /// Window from whole hours
    pub fn hours(n: i64) -> Self {
        Self {
            millis: n * HOUR_MILLIS,
        }
    }

    /// Window from whole days
    pub fn days(n: i64) -> Self {
        Self {
            millis: n * DAY_MILLIS,
        }
    }

    /// Window length in millis
    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Hop resolution for this window
    pub fn hop(&self) -> i64 {
        hop_millis(self.millis)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % DAY_MILLIS == 0 {
            write!(f, "{}d", self.millis / DAY_MILLIS)
        } else if self.millis % HOUR_MILLIS == 0 {
            write!(f, "{}h", self.millis / HOUR_MILLIS)
        } else {
            write!(f, "{}m", self.millis / MINUTE_MILLIS)
        }
    }
}

impl FromStr for Window {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let split = s.len().saturating_sub(1);
        if !s.is_char_boundary(split) {
            return Err(format!("invalid window '{}'", s));
        }
        let (digits, unit) = s.split_at(split);
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("invalid window '{}'", s))?;
        if n <= 0 {
            return Err(format!("window must be positive: '{}'", s));
        }
        match unit {
            "m" => Ok(Window::minutes(n)),
            "h" => Ok(Window::hours(n)),
            "d" => Ok(Window::days(n)),
            _ => Err(format!("invalid window unit in '{}' (expected m|h|d)", s)),
        }
    }
}

impl TryFrom<String> for Window {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Window> for String {
    fn from(w: Window) -> String {
        w.to_string()
    }
}

/// One configured aggregation of a feature set
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Input column in the selected schema
    pub input_column: String,
    /// Operation to run
    pub operation: Operation,
    /// Optional window; absent = lifetime aggregation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Window>,
    /// k for `last_k`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
}

impl Aggregation {
    /// Output column name: `{input}_{operation}[_{window}]`.
    ///
    /// `last_k` renders its k inline, e.g. `txn_last3_7d`.
    pub fn output_column(&self) -> String {
        let op = match self.operation {
            Operation::LastK => format!("last{}", self.k.unwrap_or(0)),
            other => other.name().to_string(),
        };
        match &self.window {
            Some(w) => format!("{}_{}_{}", self.input_column, op, w),
            None => format!("{}_{}", self.input_column, op),
        }
    }

    /// Output column type for a given input type.
    pub fn output_field(&self, input_type: &DataType) -> Result<Field> {
        if self.operation.requires_numeric()
            && !matches!(input_type, DataType::Long | DataType::Double)
        {
            return Err(Error::UnsupportedInput {
                operation: self.operation.name().to_string(),
                column: self.input_column.clone(),
                input_type: input_type.type_name().to_string(),
            });
        }
        if self.operation == Operation::LastK && self.k.is_none() {
            return Err(Error::MissingK(self.input_column.clone()));
        }
        let data_type = match self.operation {
            Operation::Count => DataType::Long,
            Operation::Average => DataType::Double,
            Operation::Sum | Operation::Min | Operation::Max => input_type.clone(),
            Operation::Last | Operation::First => input_type.clone(),
            Operation::LastK => DataType::List(Box::new(input_type.clone())),
        };
        Ok(Field::new(self.output_column(), data_type))
    }
}
