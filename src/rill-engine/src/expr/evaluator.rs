//! Predicate evaluation with arrow compute kernels.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, Datum};
use arrow::compute::kernels::{boolean, cmp};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;

use common_error::{RillError, RillResult};

use super::{BinaryOp, Expr};

/// Evaluates [`Expr`] trees against record batches.
#[derive(Debug, Default)]
pub struct PredicateEvaluator;

impl PredicateEvaluator {
    /// Create a new evaluator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Evaluate an expression to an array with one value per row.
    pub fn evaluate(&self, expr: &Expr, batch: &RecordBatch) -> RillResult<ArrayRef> {
        match expr {
            Expr::Column(label) => batch.column_by_name(label).cloned().ok_or_else(|| {
                RillError::schema_error(format!(
                    "column {label:?} not found in {:?}",
                    batch
                        .schema()
                        .fields()
                        .iter()
                        .map(|f| f.name().clone())
                        .collect::<Vec<_>>()
                ))
            }),
            Expr::Literal(value) => value.to_array(batch.num_rows()),
            Expr::Binary { left, op, right } => {
                let left = self.evaluate(left, batch)?;
                let right = self.evaluate(right, batch)?;
                self.eval_binary(&left, *op, &right)
            }
            Expr::Not(inner) => {
                let inner = self.evaluate(inner, batch)?;
                Ok(Arc::new(boolean::not(as_boolean(&inner, "not")?)?))
            }
        }
    }

    /// Evaluate a predicate; null results count as false when filtering.
    pub fn evaluate_predicate(&self, expr: &Expr, batch: &RecordBatch) -> RillResult<BooleanArray> {
        let result = self.evaluate(expr, batch)?;
        Ok(as_boolean(&result, "predicate")?.clone())
    }

    /// Keep the rows of `batch` matching `expr`.
    pub fn filter(&self, expr: &Expr, batch: &RecordBatch) -> RillResult<RecordBatch> {
        let mask = self.evaluate_predicate(expr, batch)?;
        Ok(filter_record_batch(batch, &mask)?)
    }

    fn eval_binary(&self, left: &ArrayRef, op: BinaryOp, right: &ArrayRef) -> RillResult<ArrayRef> {
        let result = match op {
            BinaryOp::And => {
                boolean::and_kleene(as_boolean(left, "and")?, as_boolean(right, "and")?)?
            }
            BinaryOp::Or => boolean::or_kleene(as_boolean(left, "or")?, as_boolean(right, "or")?)?,
            BinaryOp::Eq => compare(left, right, cmp::eq)?,
            BinaryOp::NotEq => compare(left, right, cmp::neq)?,
            BinaryOp::Lt => compare(left, right, cmp::lt)?,
            BinaryOp::LtEq => compare(left, right, cmp::lt_eq)?,
            BinaryOp::Gt => compare(left, right, cmp::gt)?,
            BinaryOp::GtEq => compare(left, right, cmp::gt_eq)?,
        };
        Ok(Arc::new(result))
    }
}

type CmpKernel = fn(&dyn Datum, &dyn Datum) -> Result<BooleanArray, ArrowError>;

fn compare(left: &ArrayRef, right: &ArrayRef, kernel: CmpKernel) -> RillResult<BooleanArray> {
    let (left, right) = coerce(left, right)?;
    Ok(kernel(&left, &right)?)
}

fn as_boolean<'a>(array: &'a ArrayRef, context: &str) -> RillResult<&'a BooleanArray> {
    array.as_any().downcast_ref::<BooleanArray>().ok_or_else(|| {
        RillError::type_error(format!(
            "{context} requires boolean operands, got {}",
            array.data_type()
        ))
    })
}

fn is_numeric(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int64 | DataType::UInt64 | DataType::Float64
    )
}

/// Bring numeric operands of different types to `Float64`.
fn coerce(left: &ArrayRef, right: &ArrayRef) -> RillResult<(ArrayRef, ArrayRef)> {
    let (lt, rt) = (left.data_type(), right.data_type());
    if lt == rt {
        return Ok((Arc::clone(left), Arc::clone(right)));
    }
    if is_numeric(lt) && is_numeric(rt) {
        return Ok((cast(left, &DataType::Float64)?, cast(right, &DataType::Float64)?));
    }
    if lt == &DataType::Null || rt == &DataType::Null {
        let target = if lt == &DataType::Null { rt } else { lt };
        return Ok((cast(left, target)?, cast(right, target)?));
    }
    Err(RillError::type_error(format!(
        "cannot compare {lt} with {rt}"
    )))
}
