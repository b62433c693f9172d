//! Typed value comparison.
//!
//! Numeric types compare across widths (Int32/Int64/Double), DateTime by
//! millisecond value, ObjectId by bytes. Incomparable type pairs are
//! unordered, which makes range operators fail closed.

use bson::{Bson, Document};
use std::cmp::Ordering;

/// Three-way comparison of two values, `None` when the pair is unordered.
pub fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        (Bson::Boolean(a), Bson::Boolean(b)) => Some(a.cmp(b)),
        (Bson::DateTime(a), Bson::DateTime(b)) => {
            Some(a.timestamp_millis().cmp(&b.timestamp_millis()))
        }
        (Bson::ObjectId(a), Bson::ObjectId(b)) => Some(a.bytes().cmp(&b.bytes())),
        (Bson::Null, Bson::Null) | (Bson::Undefined, Bson::Undefined) => Some(Ordering::Equal),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

/// Comparison used by the sort comparator, where both sides may be absent.
///
/// Missing and Null sort before present values and are mutually equal.
pub fn compare_optional(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let a = a.filter(|v| !matches!(v, Bson::Null | Bson::Undefined));
    let b = b.filter(|v| !matches!(v, Bson::Null | Bson::Undefined));
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Multi-key document comparator for a sort specification.
///
/// Sort keys are evaluated left to right; the first non-equal field
/// decides. Direction is 1 for ascending, -1 for descending.
pub fn compare_documents(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let ord = compare_optional(
            streamsight_commons::paths::get_path(a, field),
            streamsight_commons::paths::get_path(b, field),
        );
        if ord != Ordering::Equal {
            let descending = matches!(as_f64(direction), Some(d) if d < 0.0);
            return if descending { ord.reverse() } else { ord };
        }
    }
    Ordering::Equal
}

/// Type-aware equality: the equality rules of `$eq`, `$in`, and plain
/// field matching.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Bson::Document(a), Bson::Document(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        _ => match compare_values(a, b) {
            Some(ord) => ord == Ordering::Equal,
            None => a == b,
        },
    }
}

/// Boolean coercion used by `$expr` and the logical expression operators.
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(d) => *d != 0.0,
        _ => true,
    }
}

/// Numeric widening. `None` for non-numeric values.
pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

/// Integer view of a value; integral doubles are accepted.
pub(crate) fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(*i as i64),
        Bson::Int64(i) => Some(*i),
        Bson::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn cross_width_numeric_equality() {
        assert!(values_equal(&Bson::Int32(25), &Bson::Int64(25)));
        assert!(values_equal(&Bson::Int32(25), &Bson::Double(25.0)));
        assert!(!values_equal(&Bson::Int32(25), &Bson::Int32(26)));
    }

    #[test]
    fn dates_compare_by_millis() {
        let early = Bson::DateTime(bson::DateTime::from_millis(1000));
        let late = Bson::DateTime(bson::DateTime::from_millis(2000));
        assert_eq!(compare_values(&early, &late), Some(Ordering::Less));
        assert!(values_equal(
            &early,
            &Bson::DateTime(bson::DateTime::from_millis(1000))
        ));
    }

    #[test]
    fn mixed_types_are_unordered() {
        assert_eq!(
            compare_values(&Bson::String("a".into()), &Bson::Int32(1)),
            None
        );
    }

    #[test]
    fn missing_sorts_first() {
        assert_eq!(compare_optional(None, Some(&Bson::Int32(1))), Ordering::Less);
        assert_eq!(compare_optional(Some(&Bson::Null), None), Ordering::Equal);
    }

    #[test]
    fn multi_key_sort_comparator() {
        let sort = doc! { "age": 1, "name": -1 };
        let a = doc! { "age": 30, "name": "Alice" };
        let b = doc! { "age": 30, "name": "Bob" };
        let c = doc! { "age": 20, "name": "Zoe" };
        // Equal ages fall through to the descending name key.
        assert_eq!(compare_documents(&a, &b, &sort), Ordering::Greater);
        assert_eq!(compare_documents(&c, &a, &sort), Ordering::Less);
        assert_eq!(compare_documents(&a, &a, &sort), Ordering::Equal);
    }

    #[test]
    fn array_equality_is_elementwise() {
        let a = Bson::Array(vec![Bson::Int32(1), Bson::Int64(2)]);
        let b = Bson::Array(vec![Bson::Int64(1), Bson::Int32(2)]);
        assert!(values_equal(&a, &b));
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&Bson::Null));
        assert!(!is_truthy(&Bson::Boolean(false)));
        assert!(!is_truthy(&Bson::Int32(0)));
        assert!(is_truthy(&Bson::Double(0.1)));
        assert!(is_truthy(&Bson::String("".into())));
    }
}
