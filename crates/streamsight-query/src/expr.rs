//! `$expr` expression-tree evaluation.
//!
//! Expressions evaluate against the whole document and produce a value;
//! the matcher coerces the top-level result to a boolean. Domain
//! violations (divide by zero, log of a non-positive number, square root
//! of a negative) evaluate to missing, which the caller treats as
//! no-match, never a fault.

use bson::{Bson, Document};
use std::cmp::Ordering;

use crate::compare::{as_f64, compare_optional, is_truthy};
use streamsight_commons::paths::get_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprOp {
    // Comparisons
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Cmp,
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Abs,
    Ceil,
    Floor,
    Ln,
    Log,
    Log10,
    Pow,
    Round,
    Sqrt,
    Trunc,
    // Branching
    Cond,
    // Logical combinators
    And,
    Or,
    Not,
    Nor,
}

impl ExprOp {
    fn parse(key: &str) -> Option<Self> {
        let op = match key {
            "$eq" => Self::Eq,
            "$ne" => Self::Ne,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$cmp" => Self::Cmp,
            "$add" => Self::Add,
            "$subtract" => Self::Subtract,
            "$multiply" => Self::Multiply,
            "$divide" => Self::Divide,
            "$mod" => Self::Mod,
            "$abs" => Self::Abs,
            "$ceil" => Self::Ceil,
            "$floor" => Self::Floor,
            "$ln" => Self::Ln,
            "$log" => Self::Log,
            "$log10" => Self::Log10,
            "$pow" => Self::Pow,
            "$round" => Self::Round,
            "$sqrt" => Self::Sqrt,
            "$trunc" => Self::Trunc,
            "$cond" => Self::Cond,
            "$and" => Self::And,
            "$or" => Self::Or,
            "$not" => Self::Not,
            "$nor" => Self::Nor,
            _ => return None,
        };
        Some(op)
    }
}

/// Evaluate an expression node against a document.
///
/// `None` means "missing": a dangling field reference, an unknown
/// operator, or a guarded domain violation.
pub fn eval_expr(doc: &Document, expr: &Bson) -> Option<Bson> {
    match expr {
        Bson::String(s) => match s.strip_prefix('$') {
            Some(path) => get_path(doc, path).cloned(),
            None => Some(expr.clone()),
        },
        Bson::Document(obj) => {
            if obj.len() == 1 {
                let (key, operand) = obj.iter().next()?;
                if let Some(op) = ExprOp::parse(key) {
                    return apply_op(doc, op, operand);
                }
                if key.starts_with('$') {
                    // Unknown operator fails closed.
                    return None;
                }
            }
            Some(expr.clone())
        }
        Bson::Array(items) => {
            let evaluated = items
                .iter()
                .map(|item| eval_expr(doc, item).unwrap_or(Bson::Null))
                .collect();
            Some(Bson::Array(evaluated))
        }
        literal => Some(literal.clone()),
    }
}

fn apply_op(doc: &Document, op: ExprOp, operand: &Bson) -> Option<Bson> {
    match op {
        ExprOp::Eq | ExprOp::Ne | ExprOp::Gt | ExprOp::Gte | ExprOp::Lt | ExprOp::Lte => {
            let (a, b) = eval_pair(doc, operand)?;
            let ord = compare_optional(a.as_ref(), b.as_ref());
            let holds = match op {
                ExprOp::Eq => ord == Ordering::Equal,
                ExprOp::Ne => ord != Ordering::Equal,
                ExprOp::Gt => ord == Ordering::Greater,
                ExprOp::Gte => ord != Ordering::Less,
                ExprOp::Lt => ord == Ordering::Less,
                ExprOp::Lte => ord != Ordering::Greater,
                _ => unreachable!(),
            };
            Some(Bson::Boolean(holds))
        }
        ExprOp::Cmp => {
            let (a, b) = eval_pair(doc, operand)?;
            let code = match compare_optional(a.as_ref(), b.as_ref()) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            Some(Bson::Int32(code))
        }
        ExprOp::Add => fold_numeric(doc, operand, |acc, x| Some(acc + x)),
        ExprOp::Multiply => fold_numeric(doc, operand, |acc, x| Some(acc * x)),
        ExprOp::Subtract => {
            let (a, b) = numeric_pair(doc, operand)?;
            Some(Bson::Double(a - b))
        }
        ExprOp::Divide => {
            let (a, b) = numeric_pair(doc, operand)?;
            if b == 0.0 {
                return None;
            }
            Some(Bson::Double(a / b))
        }
        ExprOp::Mod => {
            let (a, b) = numeric_pair(doc, operand)?;
            if b == 0.0 {
                return None;
            }
            Some(Bson::Double(a % b))
        }
        ExprOp::Pow => {
            let (a, b) = numeric_pair(doc, operand)?;
            finite(a.powf(b))
        }
        ExprOp::Log => {
            let (n, base) = numeric_pair(doc, operand)?;
            if n <= 0.0 || base <= 0.0 || base == 1.0 {
                return None;
            }
            finite(n.ln() / base.ln())
        }
        ExprOp::Abs => unary_numeric(doc, operand, |x| Some(x.abs())),
        ExprOp::Ceil => unary_numeric(doc, operand, |x| Some(x.ceil())),
        ExprOp::Floor => unary_numeric(doc, operand, |x| Some(x.floor())),
        ExprOp::Round => unary_numeric(doc, operand, |x| Some(x.round())),
        ExprOp::Trunc => unary_numeric(doc, operand, |x| Some(x.trunc())),
        ExprOp::Sqrt => unary_numeric(doc, operand, |x| if x < 0.0 { None } else { Some(x.sqrt()) }),
        ExprOp::Ln => unary_numeric(doc, operand, |x| if x <= 0.0 { None } else { Some(x.ln()) }),
        ExprOp::Log10 => {
            unary_numeric(doc, operand, |x| if x <= 0.0 { None } else { Some(x.log10()) })
        }
        ExprOp::Cond => eval_cond(doc, operand),
        ExprOp::And | ExprOp::Or | ExprOp::Nor => {
            let clauses = match operand {
                Bson::Array(items) => items.as_slice(),
                single => std::slice::from_ref(single),
            };
            let truth = |clause: &Bson| eval_expr(doc, clause).as_ref().is_some_and(is_truthy);
            let result = match op {
                ExprOp::And => clauses.iter().all(truth),
                ExprOp::Or => clauses.iter().any(truth),
                ExprOp::Nor => !clauses.iter().any(truth),
                _ => unreachable!(),
            };
            Some(Bson::Boolean(result))
        }
        ExprOp::Not => {
            let clause = match operand {
                Bson::Array(items) if items.len() == 1 => &items[0],
                Bson::Array(_) => return None,
                single => single,
            };
            let truth = eval_expr(doc, clause).as_ref().is_some_and(is_truthy);
            Some(Bson::Boolean(!truth))
        }
    }
}

/// `$cond` accepts both the array form `[if, then, else]` and the
/// document form `{if, then, else}`.
fn eval_cond(doc: &Document, operand: &Bson) -> Option<Bson> {
    let (condition, then_branch, else_branch) = match operand {
        Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Bson::Document(obj) => {
            let condition = obj.get("if")?;
            let then_branch = obj.get("then")?;
            let else_branch = obj.get("else")?;
            (condition, then_branch, else_branch)
        }
        _ => return None,
    };

    let taken = if eval_expr(doc, condition).as_ref().is_some_and(is_truthy) {
        then_branch
    } else {
        else_branch
    };
    eval_expr(doc, taken)
}

fn eval_pair(doc: &Document, operand: &Bson) -> Option<(Option<Bson>, Option<Bson>)> {
    match operand {
        Bson::Array(items) if items.len() == 2 => {
            Some((eval_expr(doc, &items[0]), eval_expr(doc, &items[1])))
        }
        _ => None,
    }
}

fn numeric_pair(doc: &Document, operand: &Bson) -> Option<(f64, f64)> {
    let (a, b) = eval_pair(doc, operand)?;
    Some((as_f64(&a?)?, as_f64(&b?)?))
}

fn unary_numeric(doc: &Document, operand: &Bson, f: impl Fn(f64) -> Option<f64>) -> Option<Bson> {
    // Both `{$abs: "$x"}` and `{$abs: ["$x"]}` are accepted.
    let arg = match operand {
        Bson::Array(items) if items.len() == 1 => &items[0],
        Bson::Array(_) => return None,
        single => single,
    };
    let x = as_f64(&eval_expr(doc, arg)?)?;
    f(x).and_then(finite)
}

fn fold_numeric(
    doc: &Document,
    operand: &Bson,
    f: impl Fn(f64, f64) -> Option<f64>,
) -> Option<Bson> {
    let args = match operand {
        Bson::Array(items) if !items.is_empty() => items,
        _ => return None,
    };
    let mut acc = as_f64(&eval_expr(doc, &args[0])?)?;
    for arg in &args[1..] {
        let x = as_f64(&eval_expr(doc, arg)?)?;
        acc = f(acc, x)?;
    }
    finite(acc)
}

fn finite(x: f64) -> Option<Bson> {
    x.is_finite().then_some(Bson::Double(x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn eval(doc: &Document, expr: Bson) -> Option<Bson> {
        eval_expr(doc, &expr)
    }

    #[test]
    fn field_references_resolve() {
        let doc = doc! { "a": 5, "nested": { "b": 7 } };
        assert_eq!(eval(&doc, "$a".into()), Some(Bson::Int32(5)));
        assert_eq!(eval(&doc, "$nested.b".into()), Some(Bson::Int32(7)));
        assert_eq!(eval(&doc, "$missing".into()), None);
        // Strings without the prefix are literals
        assert_eq!(eval(&doc, "a".into()), Some(Bson::String("a".into())));
    }

    #[test]
    fn comparisons() {
        let doc = doc! { "spent": 120, "budget": 100 };
        let gt = doc! { "$gt": ["$spent", "$budget"] };
        assert_eq!(eval(&doc, gt.into()), Some(Bson::Boolean(true)));
        let eq = doc! { "$eq": ["$spent", 120] };
        assert_eq!(eval(&doc, eq.into()), Some(Bson::Boolean(true)));
    }

    #[test]
    fn cmp_is_three_way_and_date_aware() {
        let doc = doc! {
            "early": bson::DateTime::from_millis(1000),
            "late": bson::DateTime::from_millis(2000),
        };
        assert_eq!(
            eval(&doc, doc! { "$cmp": ["$early", "$late"] }.into()),
            Some(Bson::Int32(-1))
        );
        assert_eq!(
            eval(&doc, doc! { "$cmp": ["$late", "$early"] }.into()),
            Some(Bson::Int32(1))
        );
        assert_eq!(
            eval(&doc, doc! { "$cmp": ["$early", "$early"] }.into()),
            Some(Bson::Int32(0))
        );
    }

    #[test]
    fn arithmetic() {
        let doc = doc! { "x": 10, "y": 4 };
        assert_eq!(
            eval(&doc, doc! { "$add": ["$x", "$y", 1] }.into()),
            Some(Bson::Double(15.0))
        );
        assert_eq!(
            eval(&doc, doc! { "$subtract": ["$x", "$y"] }.into()),
            Some(Bson::Double(6.0))
        );
        assert_eq!(
            eval(&doc, doc! { "$multiply": ["$x", "$y"] }.into()),
            Some(Bson::Double(40.0))
        );
        assert_eq!(
            eval(&doc, doc! { "$divide": ["$x", "$y"] }.into()),
            Some(Bson::Double(2.5))
        );
        assert_eq!(
            eval(&doc, doc! { "$mod": ["$x", "$y"] }.into()),
            Some(Bson::Double(2.0))
        );
        assert_eq!(
            eval(&doc, doc! { "$pow": ["$y", 2] }.into()),
            Some(Bson::Double(16.0))
        );
        assert_eq!(eval(&doc, doc! { "$abs": -3 }.into()), Some(Bson::Double(3.0)));
        assert_eq!(eval(&doc, doc! { "$ceil": 1.2 }.into()), Some(Bson::Double(2.0)));
        assert_eq!(eval(&doc, doc! { "$floor": 1.8 }.into()), Some(Bson::Double(1.0)));
        assert_eq!(eval(&doc, doc! { "$trunc": -1.8 }.into()), Some(Bson::Double(-1.0)));
        assert_eq!(eval(&doc, doc! { "$round": 1.5 }.into()), Some(Bson::Double(2.0)));
        assert_eq!(eval(&doc, doc! { "$sqrt": 9 }.into()), Some(Bson::Double(3.0)));
    }

    #[test]
    fn domain_violations_are_guarded() {
        let doc = doc! { "x": 10 };
        assert_eq!(eval(&doc, doc! { "$divide": ["$x", 0] }.into()), None);
        assert_eq!(eval(&doc, doc! { "$mod": ["$x", 0] }.into()), None);
        assert_eq!(eval(&doc, doc! { "$sqrt": -1 }.into()), None);
        assert_eq!(eval(&doc, doc! { "$ln": 0 }.into()), None);
        assert_eq!(eval(&doc, doc! { "$log10": -5 }.into()), None);
        assert_eq!(eval(&doc, doc! { "$log": [8, 1] }.into()), None);
    }

    #[test]
    fn log_with_base() {
        let doc = doc! {};
        match eval(&doc, doc! { "$log": [8, 2] }.into()) {
            Some(Bson::Double(v)) => assert!((v - 3.0).abs() < 1e-9),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn cond_array_and_document_forms() {
        let doc = doc! { "qty": 150 };
        let array_form = doc! { "$cond": [ { "$gte": ["$qty", 100] }, "bulk", "retail" ] };
        assert_eq!(
            eval(&doc, array_form.into()),
            Some(Bson::String("bulk".into()))
        );
        let doc_form = doc! { "$cond": { "if": { "$lt": ["$qty", 100] }, "then": "retail", "else": "bulk" } };
        assert_eq!(
            eval(&doc, doc_form.into()),
            Some(Bson::String("bulk".into()))
        );
    }

    #[test]
    fn logical_combinators() {
        let doc = doc! { "a": 1, "b": 0 };
        assert_eq!(
            eval(&doc, doc! { "$and": ["$a", { "$eq": ["$b", 0] }] }.into()),
            Some(Bson::Boolean(true))
        );
        assert_eq!(
            eval(&doc, doc! { "$or": ["$b", false] }.into()),
            Some(Bson::Boolean(false))
        );
        assert_eq!(
            eval(&doc, doc! { "$not": ["$b"] }.into()),
            Some(Bson::Boolean(true))
        );
        assert_eq!(
            eval(&doc, doc! { "$nor": ["$a"] }.into()),
            Some(Bson::Boolean(false))
        );
    }

    #[test]
    fn unknown_operator_is_missing() {
        let doc = doc! { "a": 1 };
        assert_eq!(eval(&doc, doc! { "$bogus": ["$a"] }.into()), None);
    }
}
