//! Query history models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Record of a previously executed statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    /// Auto-increment ID from database; higher is more recent
    pub id: i64,
    /// The executed SQL, trimmed
    pub sql: String,
    /// When the statement was last run
    pub executed_at: DateTime<Utc>,
}

impl QueryHistoryEntry {
    /// Get a truncated version of the SQL for display.
    ///
    /// Cuts on a `char` boundary and collapses newlines so the preview fits
    /// one line.
    pub fn sql_preview(&self, max_chars: usize) -> String {
        let single_line = self.sql.split_whitespace().collect::<Vec<_>>().join(" ");
        if single_line.chars().count() <= max_chars {
            single_line
        } else {
            let mut preview: String = single_line.chars().take(max_chars).collect();
            preview.push('…');
            preview
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sql: &str) -> QueryHistoryEntry {
        QueryHistoryEntry { id: 1, sql: sql.to_string(), executed_at: Utc::now() }
    }

    #[test]
    fn test_preview_collapses_lines() {
        assert_eq!(entry("SELECT *\n  FROM t").sql_preview(40), "SELECT * FROM t");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(entry("SELECT '蜂蜂蜂'").sql_preview(9), "SELECT '蜂…");
    }
}
