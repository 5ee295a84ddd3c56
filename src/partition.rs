//! Hot/cold partition policy.

use serde::{Deserialize, Serialize};

/// Notes modified within this many seconds of "now" live in the hot partition.
pub const HOT_WINDOW_SECS: i64 = 7 * 24 * 60 * 60;

/// Recency partition of a note's searchable projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Hot,
    Cold,
}

impl Partition {
    /// Search order: hot first.
    pub const ALL: [Partition; 2] = [Partition::Hot, Partition::Cold];

    /// Classify a note by its modification time.
    ///
    /// Timestamps in the future count as hot.
    pub fn classify(modified_epoch: i64, now_epoch: i64) -> Self {
        if now_epoch.saturating_sub(modified_epoch) <= HOT_WINDOW_SECS {
            Partition::Hot
        } else {
            Partition::Cold
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Hot => "hot",
            Partition::Cold => "cold",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "hot" => Some(Partition::Hot),
            "cold" => Some(Partition::Cold),
            _ => None,
        }
    }

    pub(crate) fn fts_table(self) -> &'static str {
        match self {
            Partition::Hot => "hot_fts",
            Partition::Cold => "cold_fts",
        }
    }

    pub(crate) fn embeddings_table(self) -> &'static str {
        match self {
            Partition::Hot => "hot_embeddings",
            Partition::Cold => "cold_embeddings",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Partition::Hot => Partition::Cold,
            Partition::Cold => Partition::Hot,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const DAY: i64 = 24 * 60 * 60;

    #[test]
    fn test_recent_note_is_hot() {
        assert_eq!(Partition::classify(NOW - DAY, NOW), Partition::Hot);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        assert_eq!(Partition::classify(NOW - 7 * DAY, NOW), Partition::Hot);
        assert_eq!(Partition::classify(NOW - 7 * DAY - 1, NOW), Partition::Cold);
    }

    #[test]
    fn test_old_note_is_cold() {
        assert_eq!(Partition::classify(NOW - 30 * DAY, NOW), Partition::Cold);
    }

    #[test]
    fn test_future_mtime_is_hot() {
        assert_eq!(Partition::classify(NOW + DAY, NOW), Partition::Hot);
    }

    #[test]
    fn test_parse_round_trips_names() {
        for p in Partition::ALL {
            assert_eq!(Partition::parse(p.as_str()), Some(p));
        }
        assert_eq!(Partition::parse("warm"), None);
    }
}
