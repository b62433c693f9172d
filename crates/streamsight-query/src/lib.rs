//! # streamsight-query
//!
//! The predicate evaluator: decides, per document, whether it belongs in a
//! live view.
//!
//! The entry point is [`matches`]: a pure function testing a document
//! against a filter document in the query dialect (comparison, logical,
//! element, array, evaluation, bitwise operators plus `$expr` expression
//! trees). Evaluation never performs I/O and never panics on malformed
//! input; anything the evaluator cannot interpret fails closed to
//! "no match".
//!
//! [`compare_values`] / [`compare_documents`] expose the shared typed
//! ordering primitive used both by comparison operators and by the live
//! views' multi-key sort comparator.

mod compare;
mod expr;
mod matcher;

pub use compare::{compare_documents, compare_optional, compare_values, is_truthy, values_equal};
pub use expr::eval_expr;
pub use matcher::matches;
