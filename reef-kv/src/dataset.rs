//! Dataset naming convention
//!
//! Every feature set owns up to two datasets in the key-value store: the
//! batch dataset holding the periodically-uploaded snapshot, and the
//! streaming dataset holding post-snapshot rows. Names are derived from the
//! feature-set name by sanitizing and upper-casing, so that the online path
//! and the upload pipelines agree without coordination.

/// Dataset holding serving metadata documents (serving info, join configs).
pub const METADATA_DATASET: &str = "REEF_METADATA";

/// Suffix of the batch snapshot dataset.
pub const BATCH_SUFFIX: &str = "_BATCH";

/// Suffix of the streaming dataset.
pub const STREAMING_SUFFIX: &str = "_STREAMING";

/// Replace every non-alphanumeric rune with `_`.
///
/// Feature-set names may carry namespace separators (`team.name`, `a/b`);
/// dataset names must be portable across backends, so anything outside
/// `[A-Za-z0-9]` collapses to underscore.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Batch dataset name for a feature set: `UPPER(sanitize(name)) + "_BATCH"`.
pub fn batch_dataset(name: &str) -> String {
    format!("{}{}", sanitize(name).to_ascii_uppercase(), BATCH_SUFFIX)
}

/// Streaming dataset name for a feature set: `UPPER(sanitize(name)) + "_STREAMING"`.
pub fn streaming_dataset(name: &str) -> String {
    format!("{}{}", sanitize(name).to_ascii_uppercase(), STREAMING_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("purchases_sum"), "purchases_sum");
        assert_eq!(sanitize("team.purchases-v2"), "team_purchases_v2");
        assert_eq!(sanitize("a/b c"), "a_b_c");
    }

    #[test]
    fn test_dataset_names() {
        assert_eq!(batch_dataset("purchases_sum"), "PURCHASES_SUM_BATCH");
        assert_eq!(
            streaming_dataset("team.purchases"),
            "TEAM_PURCHASES_STREAMING"
        );
    }
}
