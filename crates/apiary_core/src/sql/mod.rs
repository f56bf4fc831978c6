//! Statement scanning and selection over an editor buffer.
//!
//! - `scanner` - splits a buffer into statement spans
//! - `selector` - picks the statement under the cursor or selection

pub mod scanner;
pub mod selector;

pub use scanner::{scan, ScanState, StatementSpan};
pub use selector::{prepare_for_execution, select_statement, statement_at};
