//! Picks the statement the user means to run.
//!
//! A non-empty selection always wins. Otherwise the buffer is scanned and the
//! statement whose region holds the cursor is used. A region runs from the
//! previous delimiter to just past the statement's own, so blank lines and
//! comments above a statement belong to it. Past the last delimiter the
//! closest statement ending before the cursor is used.

use std::ops::Range;

use super::scanner::{scan, StatementSpan};

/// Return the trimmed statement text for `cursor` (or `selection`).
///
/// Offsets are byte offsets into `buffer`. An empty string means there is
/// nothing to execute.
pub fn select_statement(buffer: &str, cursor: usize, selection: Option<Range<usize>>) -> String {
    if let Some(selected) = selection.filter(|r| r.start < r.end).and_then(|r| buffer.get(r)) {
        return selected.trim().to_string();
    }

    statement_at(buffer, cursor).map(|span| span.trimmed().to_string()).unwrap_or_default()
}

/// Find the span the cursor refers to.
///
/// The first span whose region contains the cursor wins; if none does, the
/// last span ending at or before the cursor is used.
pub fn statement_at(buffer: &str, cursor: usize) -> Option<StatementSpan<'_>> {
    let spans = scan(buffer);

    if let Some(span) = spans.iter().find(|span| span.contains(cursor)) {
        return Some(*span);
    }

    spans.into_iter().take_while(|span| span.end <= cursor).last()
}

/// Normalize selected text into what is sent to the server.
///
/// Strips surrounding whitespace and every trailing `;`, since the remote
/// protocol rejects a trailing delimiter. Returns `None` when nothing is left.
pub fn prepare_for_execution(statement: &str) -> Option<String> {
    let mut sql = statement.trim();
    while let Some(stripped) = sql.strip_suffix(';') {
        sql = stripped.trim_end();
    }

    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}
