//! Requests and responses
//!
//! A `Request` names a feature set (group-by or join, depending on which
//! fetch entry point it goes to), the entity keys, and an optional query
//! time. Requests are immutable and consumed once; each produces exactly
//! one `Response` whose `values` is either the output column map or a
//! structured failure.

use crate::error::FetchError;
use reef_codec::Value;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// One logical feature query.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Feature-set identifier (group-by name or join name)
    pub name: String,
    /// Entity keys; ordered map so canonical serializations are stable
    pub keys: BTreeMap<String, Value>,
    /// Query time in epoch millis; `None` means "now"
    pub at_millis: Option<i64>,
}

impl Request {
    /// Create a request with no explicit query time
    pub fn new(name: impl Into<String>, keys: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            keys,
            at_millis: None,
        }
    }

    /// Set the query time
    pub fn at(mut self, millis: i64) -> Self {
        self.at_millis = Some(millis);
        self
    }

    /// Dedup identity: `(name, canonical keys, at_millis)`.
    ///
    /// The key map is a `BTreeMap`, so its JSON rendering is canonical.
    /// Hashing the rendering sidesteps `f64` key values, which have no
    /// coherent `Hash`.
    pub(crate) fn identity(&self) -> RequestIdentity {
        RequestIdentity {
            name: self.name.clone(),
            keys_json: serde_json::to_string(&self.keys)
                .expect("key values are always JSON-serializable"),
            at_millis: self.at_millis,
        }
    }
}

/// Hashable request identity used for dedup and response re-attachment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RequestIdentity {
    name: String,
    keys_json: String,
    at_millis: Option<i64>,
}

/// The outcome of one Request.
#[derive(Clone, Debug)]
pub struct Response {
    /// The request this response answers
    pub request: Request,
    /// Output column map, or a structured failure
    pub values: Result<FxHashMap<String, Value>, FetchError>,
}

impl Response {
    /// Successful response
    pub fn ok(request: Request, values: FxHashMap<String, Value>) -> Self {
        Self {
            request,
            values: Ok(values),
        }
    }

    /// Failed response
    pub fn failed(request: Request, error: FetchError) -> Self {
        Self {
            request,
            values: Err(error),
        }
    }
}

/// Wall-clock epoch millis, used when a request carries no query time.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identity_ignores_key_insertion_order() {
        let a = Request::new(
            "gb",
            keys(&[("x", Value::Long(1)), ("y", Value::String("s".into()))]),
        );
        let b = Request::new(
            "gb",
            keys(&[("y", Value::String("s".into())), ("x", Value::Long(1))]),
        );
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_distinguishes_time_and_name() {
        let base = Request::new("gb", keys(&[("x", Value::Long(1))]));
        assert_ne!(base.identity(), base.clone().at(5).identity());
        let other = Request::new("gb2", keys(&[("x", Value::Long(1))]));
        assert_ne!(base.identity(), other.identity());
    }
}
