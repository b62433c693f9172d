//! Recursive filter evaluation.
//!
//! Operator dispatch is a closed enum per category, matched exhaustively.
//! Anything unrecognized (unknown operators, malformed operands, type
//! mismatches) fails closed to "no match"; evaluation never errors past
//! this module.

use bson::{Bson, Document};
use log::debug;
use regex::Regex;

use crate::compare::{as_i64, compare_values, is_truthy, values_equal};
use crate::expr::eval_expr;
use streamsight_commons::paths::get_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogicalOp {
    And,
    Or,
    Not,
    Nor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementOp {
    Exists,
    Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayOp {
    All,
    ElemMatch,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvaluationOp {
    Mod,
    Regex,
    Text,
    Where,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitwiseOp {
    AllClear,
    AllSet,
    AnyClear,
    AnySet,
}

/// An operator appearing inside a field's operator object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldOperator {
    Comparison(ComparisonOp),
    Not,
    Element(ElementOp),
    Array(ArrayOp),
    Evaluation(EvaluationOp),
    Bitwise(BitwiseOp),
    Expr,
    /// `$options` is not an operator of its own; it is consumed by `$regex`.
    RegexOptions,
}

impl FieldOperator {
    fn parse(key: &str) -> Option<Self> {
        let op = match key {
            "$eq" => Self::Comparison(ComparisonOp::Eq),
            "$ne" => Self::Comparison(ComparisonOp::Ne),
            "$gt" => Self::Comparison(ComparisonOp::Gt),
            "$gte" => Self::Comparison(ComparisonOp::Gte),
            "$lt" => Self::Comparison(ComparisonOp::Lt),
            "$lte" => Self::Comparison(ComparisonOp::Lte),
            "$in" => Self::Comparison(ComparisonOp::In),
            "$nin" => Self::Comparison(ComparisonOp::Nin),
            "$not" => Self::Not,
            "$exists" => Self::Element(ElementOp::Exists),
            "$type" => Self::Element(ElementOp::Type),
            "$all" => Self::Array(ArrayOp::All),
            "$elemMatch" => Self::Array(ArrayOp::ElemMatch),
            "$size" => Self::Array(ArrayOp::Size),
            "$mod" => Self::Evaluation(EvaluationOp::Mod),
            "$regex" => Self::Evaluation(EvaluationOp::Regex),
            "$text" => Self::Evaluation(EvaluationOp::Text),
            "$where" => Self::Evaluation(EvaluationOp::Where),
            "$bitsAllClear" => Self::Bitwise(BitwiseOp::AllClear),
            "$bitsAllSet" => Self::Bitwise(BitwiseOp::AllSet),
            "$bitsAnyClear" => Self::Bitwise(BitwiseOp::AnyClear),
            "$bitsAnySet" => Self::Bitwise(BitwiseOp::AnySet),
            "$expr" => Self::Expr,
            "$options" => Self::RegexOptions,
            _ => return None,
        };
        Some(op)
    }
}

impl LogicalOp {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "$and" => Some(Self::And),
            "$or" => Some(Self::Or),
            "$not" => Some(Self::Not),
            "$nor" => Some(Self::Nor),
            _ => None,
        }
    }
}

/// Test a document against a filter.
///
/// Pure and deterministic; all filter conditions must hold (implicit
/// conjunction across top-level keys).
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, condition)| condition_holds(doc, key, condition))
}

fn condition_holds(doc: &Document, key: &str, condition: &Bson) -> bool {
    if key.starts_with('$') {
        if let Some(op) = LogicalOp::parse(key) {
            return eval_logical(doc, op, condition);
        }
        if key == "$expr" {
            return eval_expr(doc, condition).as_ref().is_some_and(is_truthy);
        }
        if key == "$where" {
            debug!("$where is not executed; treating as no match");
            return false;
        }
        // Unknown top-level operator
        return false;
    }

    let doc_value = get_path(doc, key);

    match condition {
        Bson::RegularExpression(re) => regex_literal_matches(doc_value, re),
        Bson::Document(obj) => {
            let is_operator_object = obj
                .keys()
                .next()
                .and_then(|k| FieldOperator::parse(k))
                .is_some();
            if is_operator_object {
                operator_object_holds(doc, key, doc_value, obj)
            } else {
                // Not an operator object: treat as a nested filter over the
                // field's sub-document value.
                match doc_value {
                    Some(Bson::Document(sub)) => matches(sub, obj),
                    _ => false,
                }
            }
        }
        scalar => doc_value.is_some_and(|v| values_equal(v, scalar)),
    }
}

/// Every key of an operator object must hold (conjunction); any key that
/// is not a recognized operator fails the whole condition.
fn operator_object_holds(
    doc: &Document,
    field: &str,
    doc_value: Option<&Bson>,
    obj: &Document,
) -> bool {
    obj.iter().all(|(op_key, operand)| {
        match FieldOperator::parse(op_key) {
            Some(FieldOperator::RegexOptions) => true, // consumed by $regex
            Some(op) => operator_holds(doc, field, doc_value, op, operand, obj),
            None => false,
        }
    })
}

fn operator_holds(
    doc: &Document,
    field: &str,
    doc_value: Option<&Bson>,
    op: FieldOperator,
    operand: &Bson,
    operator_object: &Document,
) -> bool {
    match op {
        FieldOperator::Comparison(cmp) => eval_comparison(doc_value, operand, cmp),
        FieldOperator::Not => {
            // Recurse with the enclosing field re-attached, negated.
            let mut inner = Document::new();
            inner.insert(field, operand.clone());
            !matches(doc, &inner)
        }
        FieldOperator::Element(ElementOp::Exists) => {
            let present = !matches!(doc_value, None | Some(Bson::Undefined));
            match operand {
                Bson::Boolean(expected) => present == *expected,
                _ => false,
            }
        }
        FieldOperator::Element(ElementOp::Type) => {
            let expected = match operand {
                Bson::String(name) => type_code_for_name(name),
                numeric => as_i64(numeric).map(|c| c as i32),
            };
            match (doc_value.and_then(type_tag_code), expected) {
                (Some(actual), Some(expected)) => actual == expected,
                _ => false,
            }
        }
        FieldOperator::Array(array_op) => {
            let elements = match doc_value {
                Some(Bson::Array(items)) => items,
                _ => return false,
            };
            match array_op {
                ArrayOp::All => match operand {
                    Bson::Array(wanted) => wanted
                        .iter()
                        .all(|w| elements.iter().any(|e| values_equal(e, w))),
                    _ => false,
                },
                ArrayOp::ElemMatch => match operand {
                    Bson::Document(sub_filter) => elements.iter().any(|e| match e {
                        Bson::Document(elem) => matches(elem, sub_filter),
                        _ => false,
                    }),
                    _ => false,
                },
                ArrayOp::Size => as_i64(operand).is_some_and(|n| n == elements.len() as i64),
            }
        }
        FieldOperator::Evaluation(EvaluationOp::Mod) => {
            let (divisor, remainder) = match operand {
                Bson::Array(args) if args.len() >= 2 => {
                    match (as_i64(&args[0]), as_i64(&args[1])) {
                        (Some(d), Some(r)) => (d, r),
                        _ => return false,
                    }
                }
                _ => return false,
            };
            if divisor == 0 {
                return false;
            }
            doc_value
                .and_then(as_i64)
                .is_some_and(|v| v % divisor == remainder)
        }
        FieldOperator::Evaluation(EvaluationOp::Regex) => {
            let (pattern, literal_options) = match operand {
                Bson::String(p) => (p.as_str(), ""),
                Bson::RegularExpression(re) => (re.pattern.as_str(), re.options.as_str()),
                _ => return false,
            };
            let options = operator_object
                .get_str("$options")
                .unwrap_or(literal_options);
            match (doc_value.and_then(Bson::as_str), build_regex(pattern, options)) {
                (Some(value), Some(re)) => re.is_match(value),
                _ => false,
            }
        }
        FieldOperator::Evaluation(EvaluationOp::Text) => {
            let spec = match operand {
                Bson::Document(spec) => spec,
                _ => return false,
            };
            let search = match spec.get_str("$search") {
                Ok(s) => s,
                Err(_) => return false,
            };
            let case_sensitive = spec.get_bool("$caseSensitive").unwrap_or(false);
            doc_value
                .and_then(Bson::as_str)
                .is_some_and(|value| text_matches(value, search, case_sensitive))
        }
        FieldOperator::Evaluation(EvaluationOp::Where) => {
            debug!("$where is not executed; treating as no match");
            false
        }
        FieldOperator::Bitwise(bit_op) => {
            let mask = match as_i64(operand) {
                Some(m) => m,
                None => return false,
            };
            let value = match doc_value.and_then(as_i64) {
                Some(v) => v,
                None => return false,
            };
            match bit_op {
                BitwiseOp::AllClear => value & mask == 0,
                BitwiseOp::AllSet => value & mask == mask,
                BitwiseOp::AnyClear => value & mask != mask,
                BitwiseOp::AnySet => value & mask != 0,
            }
        }
        FieldOperator::Expr => eval_expr(doc, operand).as_ref().is_some_and(is_truthy),
        FieldOperator::RegexOptions => true,
    }
}

fn eval_comparison(doc_value: Option<&Bson>, operand: &Bson, op: ComparisonOp) -> bool {
    use std::cmp::Ordering::*;
    match op {
        ComparisonOp::Eq => doc_value.is_some_and(|v| values_equal(v, operand)),
        ComparisonOp::Ne => !doc_value.is_some_and(|v| values_equal(v, operand)),
        ComparisonOp::Gt => cmp_ordered(doc_value, operand, &[Greater]),
        ComparisonOp::Gte => cmp_ordered(doc_value, operand, &[Greater, Equal]),
        ComparisonOp::Lt => cmp_ordered(doc_value, operand, &[Less]),
        ComparisonOp::Lte => cmp_ordered(doc_value, operand, &[Less, Equal]),
        ComparisonOp::In => match operand {
            Bson::Array(candidates) => doc_value
                .is_some_and(|v| candidates.iter().any(|c| values_equal(v, c))),
            _ => false,
        },
        ComparisonOp::Nin => match operand {
            Bson::Array(candidates) => !doc_value
                .is_some_and(|v| candidates.iter().any(|c| values_equal(v, c))),
            _ => false,
        },
    }
}

fn cmp_ordered(
    doc_value: Option<&Bson>,
    operand: &Bson,
    accepted: &[std::cmp::Ordering],
) -> bool {
    doc_value
        .and_then(|v| compare_values(v, operand))
        .is_some_and(|ord| accepted.contains(&ord))
}

fn eval_logical(doc: &Document, op: LogicalOp, operand: &Bson) -> bool {
    match op {
        LogicalOp::Not => match operand {
            Bson::Document(sub) => !matches(doc, sub),
            _ => false,
        },
        LogicalOp::And | LogicalOp::Or | LogicalOp::Nor => {
            let clauses = match operand {
                Bson::Array(items) => items,
                // A logical operator given a non-sequence operand is
                // contained to this condition: no match.
                _ => return false,
            };
            let clause_matches = |clause: &Bson| match clause {
                Bson::Document(sub) => matches(doc, sub),
                _ => false,
            };
            match op {
                LogicalOp::And => clauses.iter().all(clause_matches),
                LogicalOp::Or => clauses.iter().any(clause_matches),
                LogicalOp::Nor => !clauses.iter().any(clause_matches),
                LogicalOp::Not => unreachable!(),
            }
        }
    }
}

fn regex_literal_matches(doc_value: Option<&Bson>, re: &bson::Regex) -> bool {
    match (doc_value.and_then(Bson::as_str), build_regex(&re.pattern, &re.options)) {
        (Some(value), Some(compiled)) => compiled.is_match(value),
        _ => false,
    }
}

/// Compile a pattern with Mongo-style option flags. Unsupported flags are
/// ignored; an invalid pattern yields `None` (no match).
fn build_regex(pattern: &str, options: &str) -> Option<Regex> {
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", flags, pattern)
    };
    Regex::new(&full).ok()
}

/// "All words present, any order": every whitespace/punctuation-separated
/// token of the search string must appear as a whole word in the value.
fn text_matches(value: &str, search: &str, case_sensitive: bool) -> bool {
    let (value, search) = if case_sensitive {
        (value.to_string(), search.to_string())
    } else {
        (value.to_lowercase(), search.to_lowercase())
    };

    search
        .split(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | ';' | '!' | '?' | '(' | ')'))
        .filter(|word| !word.is_empty())
        .all(|word| {
            Regex::new(&format!(r"\b{}\b", regex::escape(word)))
                .map(|re| re.is_match(&value))
                .unwrap_or(false)
        })
}

/// Fixed type-tag table used by `$type`.
fn type_tag_code(value: &Bson) -> Option<i32> {
    let code = match value {
        Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::Binary(_) => 5,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::RegularExpression(_) => 11,
        Bson::Int32(_) => 16,
        Bson::Int64(_) => 18,
        _ => return None,
    };
    Some(code)
}

fn type_code_for_name(name: &str) -> Option<i32> {
    let code = match name {
        "double" => 1,
        "string" => 2,
        "object" => 3,
        "array" => 4,
        "binData" => 5,
        "objectId" => 7,
        "bool" => 8,
        "date" => 9,
        "regex" => 11,
        "int" => 16,
        "long" => 18,
        _ => return None,
    };
    Some(code)
}
