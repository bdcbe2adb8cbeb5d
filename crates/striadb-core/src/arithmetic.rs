//! Typed arithmetic evaluation over two subtrees.

use serde::{Deserialize, Serialize};

use crate::decimal::{self, scale_multiplier, Decimal};
use crate::node::{EvalResult, ExprError};
use crate::operators::OpType;
use crate::row::Row;
use crate::tree::ParseTree;
use crate::types::{ColType, DataType, MAX_WIDE_PRECISION, WIDE_DECIMAL_WIDTH};

/// How the computed value is physically held once evaluation finishes.
///
/// `DecimalAsDouble` marks results whose math ran in the extended float slot
/// but whose declared type is decimal; decimal getters convert back using the
/// recorded scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCarrier {
    Native,
    DecimalAsDouble { scale: i32 },
}

/// ADD / SUB / MUL / DIV over two typed subtrees. The operation type selects
/// one of five numeric families; division by zero yields NULL in every family.
#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticOperator {
    pub op: OpType,
    pub operation_type: ColType,
    pub result_type: ColType,
    pub overflow_check: bool,
    pub timezone: i64,
    carrier: ResultCarrier,
    result: EvalResult,
}

impl ArithmeticOperator {
    pub fn new(op: OpType) -> Self {
        debug_assert!(op.is_arithmetic());
        ArithmeticOperator {
            op,
            operation_type: ColType::bigint(),
            result_type: ColType::bigint(),
            overflow_check: false,
            timezone: 0,
            carrier: ResultCarrier::Native,
            result: EvalResult::default(),
        }
    }

    pub fn with_operation_type(mut self, t: ColType) -> Self {
        self.set_op_type(t);
        self
    }

    pub fn with_overflow_check(mut self, check: bool) -> Self {
        self.overflow_check = check;
        self
    }

    pub fn with_timezone(mut self, tz: i64) -> Self {
        self.timezone = tz;
        self
    }

    /// Fix both the working family and the declared result to `t`.
    pub fn set_op_type(&mut self, t: ColType) {
        self.operation_type = t;
        self.result_type = t;
        self.carrier = ResultCarrier::Native;
    }

    /// Declare the statement-visible result type. A decimal declaration moves
    /// the working math to the extended float family and tags the carrier so
    /// decimal getters can convert back at the declared scale.
    pub fn adjust_result_type(&mut self, declared: ColType) {
        if declared.data_type.is_decimal() {
            let mut working = ColType::long_double();
            working.scale = declared.scale;
            working.precision = declared.precision;
            self.operation_type = working;
            self.result_type = declared;
            self.carrier = ResultCarrier::DecimalAsDouble {
                scale: declared.scale,
            };
        } else {
            self.result_type = declared;
            self.carrier = ResultCarrier::Native;
        }
    }

    pub fn carrier(&self) -> ResultCarrier {
        self.carrier
    }

    pub(crate) fn set_carrier(&mut self, carrier: ResultCarrier) {
        self.carrier = carrier;
    }

    pub fn data(&self) -> String {
        self.op.symbol().to_string()
    }

    /// Evaluate both subtrees in the working family and store the result.
    pub fn evaluate(
        &mut self,
        row: &Row,
        is_null: &mut bool,
        left: &mut ParseTree,
        right: &mut ParseTree,
    ) -> Result<(), ExprError> {
        let t = self.operation_type.data_type;
        if t.is_signed_integer() {
            let l = left.get_int_val(row, is_null)?;
            let r = right.get_int_val(row, is_null)?;
            self.result.int_val = self.execute_int(l, r, is_null)?;
        } else if t.is_unsigned_integer() {
            let l = left.get_uint_val(row, is_null)?;
            let r = right.get_uint_val(row, is_null)?;
            self.result.uint_val = self.execute_uint(l, r, is_null)?;
        } else if t == DataType::Float32 {
            let l = left.get_float_val(row, is_null)?;
            let r = right.get_float_val(row, is_null)?;
            self.result.float_val = self.execute_float(l, r, is_null)?;
        } else if t == DataType::Float64 {
            let l = left.get_double_val(row, is_null)?;
            let r = right.get_double_val(row, is_null)?;
            self.result.double_val = self.execute_double(l, r, is_null)?;
        } else if t.is_long_double() {
            let l = left.get_long_double_val(row, is_null)?;
            let r = right.get_long_double_val(row, is_null)?;
            self.result.long_double_val = self.execute_double(l, r, is_null)?;
        } else if t.is_decimal() {
            let l = left.get_decimal_val(row, is_null)?;
            let r = right.get_decimal_val(row, is_null)?;
            self.execute_decimal(l, r, is_null)?;
        } else {
            return Err(ExprError::InvalidOperation(format!(
                "arithmetic is not defined for operation type {:?}",
                t
            )));
        }
        Ok(())
    }

    fn execute_int(&self, op1: i64, op2: i64, is_null: &mut bool) -> Result<i64, ExprError> {
        match self.op {
            OpType::Add => Ok(op1.wrapping_add(op2)),
            OpType::Sub => Ok(op1.wrapping_sub(op2)),
            OpType::Mul => Ok(op1.wrapping_mul(op2)),
            OpType::Div => {
                if op2 == 0 {
                    *is_null = true;
                    Ok(0)
                } else {
                    Ok(op1.wrapping_div(op2))
                }
            }
            other => Err(invalid_arith(other)),
        }
    }

    fn execute_uint(&self, op1: u64, op2: u64, is_null: &mut bool) -> Result<u64, ExprError> {
        match self.op {
            OpType::Add => Ok(op1.wrapping_add(op2)),
            OpType::Sub => Ok(op1.wrapping_sub(op2)),
            OpType::Mul => Ok(op1.wrapping_mul(op2)),
            OpType::Div => {
                if op2 == 0 {
                    *is_null = true;
                    Ok(0)
                } else {
                    Ok(op1 / op2)
                }
            }
            other => Err(invalid_arith(other)),
        }
    }

    fn execute_float(&self, op1: f32, op2: f32, is_null: &mut bool) -> Result<f32, ExprError> {
        match self.op {
            OpType::Add => Ok(op1 + op2),
            OpType::Sub => Ok(op1 - op2),
            OpType::Mul => Ok(op1 * op2),
            OpType::Div => {
                if op2 == 0.0 {
                    *is_null = true;
                    Ok(0.0)
                } else {
                    Ok(op1 / op2)
                }
            }
            other => Err(invalid_arith(other)),
        }
    }

    fn execute_double(&self, op1: f64, op2: f64, is_null: &mut bool) -> Result<f64, ExprError> {
        match self.op {
            OpType::Add => Ok(op1 + op2),
            OpType::Sub => Ok(op1 - op2),
            OpType::Mul => Ok(op1 * op2),
            OpType::Div => {
                if op2 == 0.0 {
                    *is_null = true;
                    Ok(0.0)
                } else {
                    Ok(op1 / op2)
                }
            }
            other => Err(invalid_arith(other)),
        }
    }

    /// Decimal family: the declared width selects the wide or legacy variant
    /// and the overflow flag selects the checked or wrapping policy. The zero
    /// divisor is tested in whichever physical representation is active.
    fn execute_decimal(
        &mut self,
        l: Decimal,
        r: Decimal,
        is_null: &mut bool,
    ) -> Result<(), ExprError> {
        let mut out = Decimal::new(
            0,
            self.operation_type.scale,
            self.operation_type.precision,
        );
        let wide = match self.operation_type.width {
            WIDE_DECIMAL_WIDTH => true,
            8 => false,
            other => return Err(ExprError::UnexpectedResultWidth(other)),
        };

        match self.op {
            OpType::Add => {
                if wide {
                    decimal::addition(&l, &r, &mut out, self.overflow_check)?;
                } else {
                    decimal::addition_narrow(&l, &r, &mut out, self.overflow_check)?;
                }
            }
            OpType::Sub => {
                if wide {
                    decimal::subtraction(&l, &r, &mut out, self.overflow_check)?;
                } else {
                    decimal::subtraction_narrow(&l, &r, &mut out, self.overflow_check)?;
                }
            }
            OpType::Mul => {
                if wide {
                    decimal::multiplication(&l, &r, &mut out, self.overflow_check)?;
                } else {
                    decimal::multiplication_narrow(&l, &r, &mut out, self.overflow_check)?;
                }
            }
            OpType::Div => {
                let zero_divisor = if wide {
                    r.value == 0
                } else {
                    r.value as i64 == 0
                };
                if zero_divisor {
                    *is_null = true;
                    self.result.decimal_val = out;
                    return Ok(());
                }
                if wide {
                    decimal::division(&l, &r, &mut out, self.overflow_check)?;
                } else {
                    decimal::division_narrow(&l, &r, &mut out, self.overflow_check)?;
                }
            }
            other => return Err(invalid_arith(other)),
        }
        self.result.decimal_val = out;
        Ok(())
    }

    pub fn get_int_val(
        &mut self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<i64, ExprError> {
        self.evaluate(row, is_null, left, right)?;
        let t = self.operation_type.data_type;
        Ok(if t.is_signed_integer() {
            self.result.int_val
        } else if t.is_unsigned_integer() {
            self.result.uint_val as i64
        } else if t == DataType::Float32 {
            self.result.float_val as i64
        } else if t == DataType::Float64 {
            self.result.double_val as i64
        } else if t.is_long_double() {
            self.result.long_double_val as i64
        } else {
            self.result.decimal_val.rounded_int()
        })
    }

    pub fn get_uint_val(
        &mut self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<u64, ExprError> {
        Ok(self.get_int_val(row, left, right, is_null)? as u64)
    }

    pub fn get_float_val(
        &mut self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<f32, ExprError> {
        Ok(self.get_double_val(row, left, right, is_null)? as f32)
    }

    pub fn get_double_val(
        &mut self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<f64, ExprError> {
        self.evaluate(row, is_null, left, right)?;
        let t = self.operation_type.data_type;
        Ok(if t.is_signed_integer() {
            self.result.int_val as f64
        } else if t.is_unsigned_integer() {
            self.result.uint_val as f64
        } else if t == DataType::Float32 {
            self.result.float_val as f64
        } else if t == DataType::Float64 {
            self.result.double_val
        } else if t.is_long_double() {
            self.result.long_double_val
        } else {
            let d = self.result.decimal_val;
            d.value as f64 / scale_multiplier(d.scale.max(0)) as f64
        })
    }

    pub fn get_long_double_val(
        &mut self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<f64, ExprError> {
        self.get_double_val(row, left, right, is_null)
    }

    pub fn get_decimal_val(
        &mut self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<Decimal, ExprError> {
        self.evaluate(row, is_null, left, right)?;
        if let ResultCarrier::DecimalAsDouble { scale } = self.carrier {
            let scaled = self.result.long_double_val * scale_multiplier(scale.max(0)) as f64;
            return Ok(Decimal::new(scaled.round() as i128, scale, 15));
        }
        let t = self.operation_type.data_type;
        Ok(if t.is_decimal() {
            self.result.decimal_val
        } else if t.is_signed_integer() {
            Decimal::new(self.result.int_val as i128, 0, 18)
        } else if t.is_unsigned_integer() {
            Decimal::new(self.result.uint_val as i128, 0, 18)
        } else {
            let scale = self.operation_type.scale.max(0);
            let v = self.get_stored_double() * scale_multiplier(scale) as f64;
            Decimal::new(v.round() as i128, scale, 18)
        })
    }

    pub fn get_str_val(
        &mut self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<String, ExprError> {
        self.evaluate(row, is_null, left, right)?;
        let t = self.operation_type.data_type;
        Ok(if t.is_signed_integer() {
            self.result.int_val.to_string()
        } else if t.is_unsigned_integer() {
            self.result.uint_val.to_string()
        } else if t == DataType::Float32 {
            self.result.float_val.to_string()
        } else if t == DataType::Float64 {
            self.result.double_val.to_string()
        } else if t.is_long_double() {
            self.result.long_double_val.to_string()
        } else {
            self.result.decimal_val.to_string()
        })
    }

    pub fn get_bool_val(
        &mut self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<bool, ExprError> {
        self.evaluate(row, is_null, left, right)?;
        let t = self.operation_type.data_type;
        Ok(if t.is_signed_integer() {
            self.result.int_val != 0
        } else if t.is_unsigned_integer() {
            self.result.uint_val != 0
        } else if t == DataType::Float32 {
            self.result.float_val != 0.0
        } else if t == DataType::Float64 {
            self.result.double_val != 0.0
        } else if t.is_long_double() {
            self.result.long_double_val != 0.0
        } else {
            !self.result.decimal_val.is_zero()
        })
    }

    fn get_stored_double(&self) -> f64 {
        let t = self.operation_type.data_type;
        if t == DataType::Float32 {
            self.result.float_val as f64
        } else if t == DataType::Float64 {
            self.result.double_val
        } else {
            self.result.long_double_val
        }
    }
}

pub(crate) fn invalid_arith(op: OpType) -> ExprError {
    ExprError::InvalidOperation(format!("operator {} is not an arithmetic operator", op))
}

/// Result descriptor for `lhs op rhs` given the operand descriptors. Decimal
/// wins over float which wins over the integer families; two unsigned
/// operands stay unsigned, any signed operand makes the result signed.
pub fn derive_arith_type(op: OpType, l: &ColType, r: &ColType) -> ColType {
    let (lt, rt) = (l.data_type, r.data_type);
    if lt.is_decimal() || rt.is_decimal() {
        let (s1, p1) = if lt.is_decimal() {
            (l.scale, l.precision)
        } else {
            (0, 18)
        };
        let (s2, p2) = if rt.is_decimal() {
            (r.scale, r.precision)
        } else {
            (0, 18)
        };
        let (scale, precision) = match op {
            OpType::Add | OpType::Sub => {
                (s1.max(s2), (p1.max(p2) + 1).min(MAX_WIDE_PRECISION))
            }
            OpType::Mul => {
                ((s1 + s2).min(MAX_WIDE_PRECISION), (p1 + p2).min(MAX_WIDE_PRECISION))
            }
            _ => ((s1.max(s2) + 4).min(MAX_WIDE_PRECISION), MAX_WIDE_PRECISION),
        };
        return ColType::decimal(precision, scale);
    }
    if lt.is_long_double() || rt.is_long_double() {
        return ColType::long_double();
    }
    if lt.is_float() || rt.is_float() {
        return ColType::double();
    }
    if lt.is_unsigned_integer() && rt.is_unsigned_integer() {
        return ColType::ubigint();
    }
    ColType::bigint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ConstantColumn;
    use crate::node::TreeNode;

    fn const_leaf(c: ConstantColumn) -> ParseTree {
        ParseTree::leaf(TreeNode::Constant(c))
    }

    fn int_leaf(v: i64) -> ParseTree {
        const_leaf(ConstantColumn::from_int(v))
    }

    fn dec_leaf(value: i128, scale: i32, precision: i32) -> ParseTree {
        const_leaf(ConstantColumn::from_decimal(Decimal::new(
            value, scale, precision,
        )))
    }

    #[test]
    fn integer_division_by_zero_is_null_not_an_error() {
        let mut op = ArithmeticOperator::new(OpType::Div);
        let mut l = int_leaf(10);
        let mut r = int_leaf(0);
        let row = Row::default();
        let mut is_null = false;
        let v = op.get_int_val(&row, &mut l, &mut r, &mut is_null).unwrap();
        assert_eq!(v, 0);
        assert!(is_null);
    }

    #[test]
    fn double_division_by_zero_is_null() {
        let mut op =
            ArithmeticOperator::new(OpType::Div).with_operation_type(ColType::double());
        let mut l = const_leaf(ConstantColumn::from_double(5.5));
        let mut r = const_leaf(ConstantColumn::from_double(0.0));
        let row = Row::default();
        let mut is_null = false;
        let v = op
            .get_double_val(&row, &mut l, &mut r, &mut is_null)
            .unwrap();
        assert_eq!(v, 0.0);
        assert!(is_null);
    }

    #[test]
    fn decimal_division_by_zero_is_null_in_both_widths() {
        let row = Row::default();
        for precision in [9, 38] {
            let mut op = ArithmeticOperator::new(OpType::Div)
                .with_operation_type(ColType::decimal(precision, 2));
            let mut l = dec_leaf(1000, 2, precision);
            let mut r = dec_leaf(0, 2, precision);
            let mut is_null = false;
            op.get_decimal_val(&row, &mut l, &mut r, &mut is_null)
                .unwrap();
            assert!(is_null, "precision {precision} should null out");
        }
    }

    #[test]
    fn checked_overflow_is_an_error_unchecked_is_not() {
        let row = Row::default();
        let big = i128::MAX / 2;

        let mut checked = ArithmeticOperator::new(OpType::Mul)
            .with_operation_type(ColType::decimal(38, 0))
            .with_overflow_check(true);
        let mut l = dec_leaf(big, 0, 38);
        let mut r = dec_leaf(3, 0, 38);
        let mut is_null = false;
        let err = checked.get_decimal_val(&row, &mut l, &mut r, &mut is_null);
        assert!(matches!(err, Err(ExprError::Decimal(_))));

        let mut unchecked = ArithmeticOperator::new(OpType::Mul)
            .with_operation_type(ColType::decimal(38, 0));
        let mut l = dec_leaf(big, 0, 38);
        let mut r = dec_leaf(3, 0, 38);
        let mut is_null = false;
        assert!(unchecked
            .get_decimal_val(&row, &mut l, &mut r, &mut is_null)
            .is_ok());
    }

    #[test]
    fn unexpected_decimal_width_is_fatal() {
        let mut bad = ColType::decimal(9, 2);
        bad.width = 4;
        let mut op = ArithmeticOperator::new(OpType::Add).with_operation_type(bad);
        let mut l = dec_leaf(100, 2, 9);
        let mut r = dec_leaf(100, 2, 9);
        let row = Row::default();
        let mut is_null = false;
        let err = op.get_decimal_val(&row, &mut l, &mut r, &mut is_null);
        assert!(matches!(err, Err(ExprError::UnexpectedResultWidth(4))));
    }

    #[test]
    fn decimal_declared_result_rides_in_the_float_slot() {
        let mut op = ArithmeticOperator::new(OpType::Div)
            .with_operation_type(ColType::long_double());
        op.adjust_result_type(ColType::decimal(12, 2));
        assert_eq!(op.carrier(), ResultCarrier::DecimalAsDouble { scale: 2 });

        let row = Row::default();
        let mut l = const_leaf(ConstantColumn::from_double(10.0));
        let mut r = const_leaf(ConstantColumn::from_double(4.0));
        let mut is_null = false;
        let d = op
            .get_decimal_val(&row, &mut l, &mut r, &mut is_null)
            .unwrap();
        assert_eq!(d.value, 250);
        assert_eq!(d.scale, 2);
        assert!(!is_null);
    }

    #[test]
    fn arith_type_derivation_prefers_wider_families() {
        let d = ColType::decimal(12, 2);
        let i = ColType::bigint();
        let u = ColType::ubigint();
        let f = ColType::double();

        assert!(derive_arith_type(OpType::Add, &d, &i).data_type.is_decimal());
        assert_eq!(derive_arith_type(OpType::Add, &f, &i).data_type, DataType::Float64);
        assert!(derive_arith_type(OpType::Mul, &u, &u)
            .data_type
            .is_unsigned_integer());
        assert_eq!(derive_arith_type(OpType::Mul, &u, &i).data_type, DataType::Int64);

        let dd = derive_arith_type(OpType::Div, &d, &d);
        assert_eq!(dd.scale, 6);
        assert_eq!(dd.precision, MAX_WIDE_PRECISION);
    }
}
