//! Filter pushdown: translating DataFusion predicates into SQL fragments.
//!
//! A predicate is *pushed* when the translator can render it as SQL against
//! the base schema; everything else is handed back to the host engine, which
//! re-evaluates it on returned rows.

use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::common::ScalarValue;
use datafusion::logical_expr::{Expr, Operator};

use crate::query::{quote_identifier, quote_string};

/// Capability that maps one predicate to an optional SQL fragment.
pub trait FilterTranslator: Send + Sync {
    /// Returns the SQL rendering of `filter`, or `None` if it cannot be pushed.
    fn translate(&self, filter: &Expr, schema: &Schema) -> Option<String>;
}

/// Outcome of one pushdown negotiation.
#[derive(Debug, Clone, Default)]
pub struct FilterPushdown {
    /// Filters the remote engine will evaluate.
    pub accepted: Vec<Expr>,
    /// Filters the caller must still evaluate after rows are returned.
    pub rejected: Vec<Expr>,
}

/// Splits `candidates` into pushed and unpushed filters, preserving order.
pub fn negotiate_pushdown(
    candidates: Vec<Expr>,
    base_schema: &Schema,
    translator: &dyn FilterTranslator,
) -> FilterPushdown {
    let mut outcome = FilterPushdown::default();
    for filter in candidates {
        if translator.translate(&filter, base_schema).is_some() {
            outcome.accepted.push(filter);
        } else {
            outcome.rejected.push(filter);
        }
    }
    outcome
}

/// Translates filters and conjoins them into a WHERE clause body.
///
/// Returns `None` when no filter translates.
pub fn build_where_clause(
    filters: &[Expr],
    base_schema: &Schema,
    translator: &dyn FilterTranslator,
) -> Option<String> {
    let fragments = filters
        .iter()
        .filter_map(|filter| translator.translate(filter, base_schema))
        .collect::<Vec<_>>();
    if fragments.is_empty() {
        None
    } else {
        Some(fragments.join(" AND "))
    }
}

/// Default translator for comparisons, boolean connectives, null checks,
/// `IN`, `BETWEEN` and case-sensitive `LIKE` over base-schema columns.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlFilterTranslator;

impl FilterTranslator for SqlFilterTranslator {
    fn translate(&self, filter: &Expr, schema: &Schema) -> Option<String> {
        translate_expr(filter, schema)
    }
}

fn translate_expr(expr: &Expr, schema: &Schema) -> Option<String> {
    match expr {
        Expr::BinaryExpr(binary) => match binary.op {
            // Decision: a conjunction is pushed only as a whole; partially
            // pushing it would let the caller drop the untranslated half.
            Operator::And | Operator::Or => {
                let left = translate_expr(binary.left.as_ref(), schema)?;
                let right = translate_expr(binary.right.as_ref(), schema)?;
                let keyword = if binary.op == Operator::And { "AND" } else { "OR" };
                Some(format!("({left} {keyword} {right})"))
            }
            op => translate_comparison(binary.left.as_ref(), op, binary.right.as_ref(), schema),
        },
        Expr::Not(inner) => Some(format!("NOT ({})", translate_expr(inner.as_ref(), schema)?)),
        Expr::IsNull(inner) => Some(format!("{} IS NULL", column_ref(inner.as_ref(), schema)?)),
        Expr::IsNotNull(inner) => Some(format!(
            "{} IS NOT NULL",
            column_ref(inner.as_ref(), schema)?
        )),
        Expr::InList(in_list) => {
            if in_list.list.is_empty() {
                return None;
            }
            let column = column_ref(in_list.expr.as_ref(), schema)?;
            let values = in_list
                .list
                .iter()
                .map(literal_sql)
                .collect::<Option<Vec<_>>>()?;
            let not = if in_list.negated { "NOT " } else { "" };
            Some(format!("{column} {not}IN ({})", values.join(", ")))
        }
        Expr::Between(between) => {
            let column = column_ref(between.expr.as_ref(), schema)?;
            let low = literal_sql(between.low.as_ref())?;
            let high = literal_sql(between.high.as_ref())?;
            let not = if between.negated { "NOT " } else { "" };
            Some(format!("{column} {not}BETWEEN {low} AND {high}"))
        }
        Expr::Like(like) => {
            if like.case_insensitive || like.escape_char.is_some() {
                return None;
            }
            let column = column_ref(like.expr.as_ref(), schema)?;
            let pattern = match literal_value(like.pattern.as_ref())? {
                ScalarValue::Utf8(Some(pattern))
                | ScalarValue::LargeUtf8(Some(pattern))
                | ScalarValue::Utf8View(Some(pattern)) => quote_string(pattern),
                _ => return None,
            };
            let not = if like.negated { "NOT " } else { "" };
            Some(format!("{column} {not}LIKE {pattern}"))
        }
        _ => None,
    }
}

/// Renders `column <op> literal`, accepting the literal on either side.
fn translate_comparison(left: &Expr, op: Operator, right: &Expr, schema: &Schema) -> Option<String> {
    let symbol = comparison_sql(op)?;
    if let (Some(column), Some(value)) = (column_ref(left, schema), literal_sql(right)) {
        return Some(format!("{column} {symbol} {value}"));
    }
    let column = column_ref(right, schema)?;
    let value = literal_sql(left)?;
    let reversed = comparison_sql(reverse_comparison(op))?;
    Some(format!("{column} {reversed} {value}"))
}

fn comparison_sql(op: Operator) -> Option<&'static str> {
    match op {
        Operator::Eq => Some("="),
        Operator::NotEq => Some("<>"),
        Operator::Lt => Some("<"),
        Operator::LtEq => Some("<="),
        Operator::Gt => Some(">"),
        Operator::GtEq => Some(">="),
        _ => None,
    }
}

/// Mirrors a comparison so the column can move to the left-hand side.
fn reverse_comparison(op: Operator) -> Operator {
    match op {
        Operator::Lt => Operator::Gt,
        Operator::LtEq => Operator::GtEq,
        Operator::Gt => Operator::Lt,
        Operator::GtEq => Operator::LtEq,
        other => other,
    }
}

/// Resolves a column against the base schema and returns its quoted name.
///
/// A cast around the column is looked through only when it cannot change
/// the column's values; any other cast keeps the predicate with the caller.
fn column_ref(expr: &Expr, schema: &Schema) -> Option<String> {
    match expr {
        Expr::Column(column) => {
            resolve_field(schema, &column.name).map(|field| quote_identifier(field.name()))
        }
        Expr::Cast(cast) => widened_column_ref(cast.expr.as_ref(), &cast.data_type, schema),
        Expr::TryCast(cast) => widened_column_ref(cast.expr.as_ref(), &cast.data_type, schema),
        _ => None,
    }
}

fn widened_column_ref(inner: &Expr, target: &DataType, schema: &Schema) -> Option<String> {
    let Expr::Column(column) = inner else {
        return None;
    };
    let field = resolve_field(schema, &column.name)?;
    is_lossless_widening(field.data_type(), target).then(|| quote_identifier(field.name()))
}

/// Finds `name` by exact match, then by a case-insensitive match that is unique.
fn resolve_field<'a>(schema: &'a Schema, name: &str) -> Option<&'a Field> {
    if let Some(field) = schema.fields().iter().find(|field| field.name() == name) {
        return Some(field.as_ref());
    }
    let mut matches = schema
        .fields()
        .iter()
        .filter(|field| field.name().eq_ignore_ascii_case(name));
    match (matches.next(), matches.next()) {
        (Some(field), None) => Some(field.as_ref()),
        _ => None,
    }
}

/// Returns `true` when every `from` value converts to `to` unchanged.
fn is_lossless_widening(from: &DataType, to: &DataType) -> bool {
    use DataType::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Int8, Int16 | Int32 | Int64)
            | (Int16, Int32 | Int64)
            | (Int32, Int64)
            | (UInt8, UInt16 | UInt32 | UInt64 | Int16 | Int32 | Int64)
            | (UInt16, UInt32 | UInt64 | Int32 | Int64)
            | (UInt32, UInt64 | Int64)
            | (Float32, Float64)
            | (Utf8 | LargeUtf8 | Utf8View, Utf8 | LargeUtf8 | Utf8View)
    )
}

fn literal_value(expr: &Expr) -> Option<&ScalarValue> {
    match expr {
        Expr::Literal(value, _) => Some(value),
        Expr::Cast(cast) => literal_value(cast.expr.as_ref())
            .filter(|value| is_lossless_widening(&value.data_type(), &cast.data_type)),
        Expr::TryCast(cast) => literal_value(cast.expr.as_ref())
            .filter(|value| is_lossless_widening(&value.data_type(), &cast.data_type)),
        _ => None,
    }
}

/// Renders a non-null literal as SQL text.
fn literal_sql(expr: &Expr) -> Option<String> {
    let value = literal_value(expr)?;
    // Decision: `col = NULL` is never true in SQL, so null literals are not
    // pushed and stay with the host engine's own null semantics.
    if value.is_null() {
        return None;
    }
    match value {
        ScalarValue::Boolean(Some(v)) => Some(if *v { "TRUE" } else { "FALSE" }.to_string()),
        ScalarValue::Int8(Some(v)) => Some(v.to_string()),
        ScalarValue::Int16(Some(v)) => Some(v.to_string()),
        ScalarValue::Int32(Some(v)) => Some(v.to_string()),
        ScalarValue::Int64(Some(v)) => Some(v.to_string()),
        ScalarValue::UInt8(Some(v)) => Some(v.to_string()),
        ScalarValue::UInt16(Some(v)) => Some(v.to_string()),
        ScalarValue::UInt32(Some(v)) => Some(v.to_string()),
        ScalarValue::UInt64(Some(v)) => Some(v.to_string()),
        ScalarValue::Float32(Some(v)) if v.is_finite() => Some(v.to_string()),
        ScalarValue::Float64(Some(v)) if v.is_finite() => Some(v.to_string()),
        ScalarValue::Utf8(Some(v)) | ScalarValue::LargeUtf8(Some(v)) | ScalarValue::Utf8View(Some(v)) => {
            Some(quote_string(v))
        }
        _ => None,
    }
}
