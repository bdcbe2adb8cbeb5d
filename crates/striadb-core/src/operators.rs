//! Operator taxonomy and the logical / comparison operator nodes.
//!
//! Operators inside an expression tree are always binary: evaluation takes the
//! two child subtrees directly rather than a generic child list.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::node::ExprError;
use crate::row::Row;
use crate::tree::ParseTree;
use crate::types::ColType;

/// Operator kind tag shared by every operator node and by filter descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OpType {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    And,
    Or,
    Xor,
    IsNull,
    IsNotNull,
    Between,
    NotBetween,
    In,
    NotIn,
}

impl OpType {
    /// The operator that preserves meaning when the two operands are swapped.
    /// Only the strict/loose orderings change; everything else is symmetric or
    /// not order-sensitive at this level.
    pub fn opposite(self) -> OpType {
        match self {
            OpType::Gt => OpType::Lt,
            OpType::Lt => OpType::Gt,
            OpType::Ge => OpType::Le,
            OpType::Le => OpType::Ge,
            other => other,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            OpType::Add => "+",
            OpType::Sub => "-",
            OpType::Mul => "*",
            OpType::Div => "/",
            OpType::Eq => "=",
            OpType::Ne => "<>",
            OpType::Lt => "<",
            OpType::Le => "<=",
            OpType::Gt => ">",
            OpType::Ge => ">=",
            OpType::Like => "like",
            OpType::NotLike => "not like",
            OpType::And => "and",
            OpType::Or => "or",
            OpType::Xor => "xor",
            OpType::IsNull => "isnull",
            OpType::IsNotNull => "isnotnull",
            OpType::Between => "between",
            OpType::NotBetween => "not between",
            OpType::In => "in",
            OpType::NotIn => "not in",
        }
    }

    pub fn from_symbol(s: &str) -> Option<OpType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "+" => Some(OpType::Add),
            "-" => Some(OpType::Sub),
            "*" => Some(OpType::Mul),
            "/" => Some(OpType::Div),
            "=" => Some(OpType::Eq),
            "<>" | "!=" => Some(OpType::Ne),
            "<" => Some(OpType::Lt),
            "<=" => Some(OpType::Le),
            ">" => Some(OpType::Gt),
            ">=" => Some(OpType::Ge),
            "like" => Some(OpType::Like),
            "not like" => Some(OpType::NotLike),
            "and" => Some(OpType::And),
            "or" => Some(OpType::Or),
            "xor" => Some(OpType::Xor),
            "isnull" => Some(OpType::IsNull),
            "isnotnull" => Some(OpType::IsNotNull),
            "between" => Some(OpType::Between),
            "not between" => Some(OpType::NotBetween),
            "in" => Some(OpType::In),
            "not in" => Some(OpType::NotIn),
            _ => None,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, OpType::Add | OpType::Sub | OpType::Mul | OpType::Div)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            OpType::Eq | OpType::Ne | OpType::Lt | OpType::Le | OpType::Gt | OpType::Ge
        )
    }

    pub fn is_logic(self) -> bool {
        matches!(self, OpType::And | OpType::Or | OpType::Xor)
    }

    pub fn wire_code(self) -> u8 {
        match self {
            OpType::Add => 0,
            OpType::Sub => 1,
            OpType::Mul => 2,
            OpType::Div => 3,
            OpType::Eq => 4,
            OpType::Ne => 5,
            OpType::Lt => 6,
            OpType::Le => 7,
            OpType::Gt => 8,
            OpType::Ge => 9,
            OpType::Like => 10,
            OpType::NotLike => 11,
            OpType::And => 12,
            OpType::Or => 13,
            OpType::Xor => 14,
            OpType::IsNull => 15,
            OpType::IsNotNull => 16,
            OpType::Between => 17,
            OpType::NotBetween => 18,
            OpType::In => 19,
            OpType::NotIn => 20,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<OpType> {
        Some(match code {
            0 => OpType::Add,
            1 => OpType::Sub,
            2 => OpType::Mul,
            3 => OpType::Div,
            4 => OpType::Eq,
            5 => OpType::Ne,
            6 => OpType::Lt,
            7 => OpType::Le,
            8 => OpType::Gt,
            9 => OpType::Ge,
            10 => OpType::Like,
            11 => OpType::NotLike,
            12 => OpType::And,
            13 => OpType::Or,
            14 => OpType::Xor,
            15 => OpType::IsNull,
            16 => OpType::IsNotNull,
            17 => OpType::Between,
            18 => OpType::NotBetween,
            19 => OpType::In,
            20 => OpType::NotIn,
            _ => return None,
        })
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// AND / OR / XOR over two boolean subtrees with SQL three-valued semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicOperator {
    pub op: OpType,
    pub result_type: ColType,
}

impl LogicOperator {
    pub fn new(op: OpType) -> Self {
        debug_assert!(op.is_logic());
        LogicOperator {
            op,
            result_type: ColType::boolean(),
        }
    }

    pub fn get_bool_val(
        &self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<bool, ExprError> {
        match self.op {
            OpType::And => {
                let mut l_null = false;
                let l = left.get_bool_val(row, &mut l_null)?;
                if !l_null && !l {
                    return Ok(false);
                }
                let mut r_null = false;
                let r = right.get_bool_val(row, &mut r_null)?;
                if !r_null && !r {
                    return Ok(false);
                }
                if l_null || r_null {
                    *is_null = true;
                    return Ok(false);
                }
                Ok(true)
            }
            OpType::Or => {
                let mut l_null = false;
                let l = left.get_bool_val(row, &mut l_null)?;
                if !l_null && l {
                    return Ok(true);
                }
                let mut r_null = false;
                let r = right.get_bool_val(row, &mut r_null)?;
                if !r_null && r {
                    return Ok(true);
                }
                if l_null || r_null {
                    *is_null = true;
                    return Ok(false);
                }
                Ok(false)
            }
            OpType::Xor => {
                let mut l_null = false;
                let mut r_null = false;
                let l = left.get_bool_val(row, &mut l_null)?;
                let r = right.get_bool_val(row, &mut r_null)?;
                if l_null || r_null {
                    *is_null = true;
                    return Ok(false);
                }
                Ok(l != r)
            }
            other => Err(ExprError::InvalidOperation(format!(
                "operator {} is not a logic operator",
                other
            ))),
        }
    }

    pub fn data(&self) -> String {
        self.op.symbol().to_string()
    }
}

/// Binary comparison over two typed subtrees. The combined operation type
/// picks the comparison family; a NULL on either side makes the predicate
/// false without raising an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateOperator {
    pub op: OpType,
    pub operation_type: ColType,
    pub result_type: ColType,
}

impl PredicateOperator {
    pub fn new(op: OpType) -> Self {
        PredicateOperator {
            op,
            operation_type: ColType::bigint(),
            result_type: ColType::boolean(),
        }
    }

    /// Derive the comparison family from the two operand types. Strings only
    /// compare as strings when both sides are strings; decimal beats float
    /// which beats plain integers; two unsigned operands stay unsigned.
    pub fn set_op_type(&mut self, lhs: &ColType, rhs: &ColType) {
        self.operation_type = combine_compare_type(lhs, rhs);
    }

    pub fn get_bool_val(
        &self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        is_null: &mut bool,
    ) -> Result<bool, ExprError> {
        let _ = is_null;
        match self.op {
            OpType::IsNull | OpType::IsNotNull => {
                let mut operand_null = false;
                // Only the operand's null flag matters; the value is discarded.
                left.get_str_val(row, &mut operand_null)?;
                Ok(if self.op == OpType::IsNull {
                    operand_null
                } else {
                    !operand_null
                })
            }
            OpType::Like | OpType::NotLike => {
                let mut l_null = false;
                let mut r_null = false;
                let text = left.get_str_val(row, &mut l_null)?;
                let pattern = right.get_str_val(row, &mut r_null)?;
                if l_null || r_null {
                    return Ok(false);
                }
                let matched = like_match(&text, &pattern);
                Ok(if self.op == OpType::Like {
                    matched
                } else {
                    !matched
                })
            }
            op if op.is_comparison() => {
                let mut l_null = false;
                let mut r_null = false;
                let ord = self.compare(row, left, right, &mut l_null, &mut r_null)?;
                if l_null || r_null {
                    return Ok(false);
                }
                Ok(ordering_satisfies(op, ord))
            }
            other => Err(ExprError::InvalidOperation(format!(
                "operator {} is not a predicate operator",
                other
            ))),
        }
    }

    fn compare(
        &self,
        row: &Row,
        left: &mut ParseTree,
        right: &mut ParseTree,
        l_null: &mut bool,
        r_null: &mut bool,
    ) -> Result<Ordering, ExprError> {
        let t = &self.operation_type;
        if t.data_type.is_string() {
            let l = left.get_str_val(row, l_null)?;
            let r = right.get_str_val(row, r_null)?;
            return Ok(l.cmp(&r));
        }
        if t.data_type.is_decimal() {
            let l = left.get_decimal_val(row, l_null)?;
            let r = right.get_decimal_val(row, r_null)?;
            return Ok(l.compare(&r));
        }
        if t.data_type.is_float() || t.data_type.is_long_double() {
            let l = left.get_double_val(row, l_null)?;
            let r = right.get_double_val(row, r_null)?;
            return Ok(l.partial_cmp(&r).unwrap_or(Ordering::Equal));
        }
        if t.data_type.is_unsigned_integer() {
            let l = left.get_uint_val(row, l_null)?;
            let r = right.get_uint_val(row, r_null)?;
            return Ok(l.cmp(&r));
        }
        let l = left.get_int_val(row, l_null)?;
        let r = right.get_int_val(row, r_null)?;
        Ok(l.cmp(&r))
    }

    pub fn data(&self) -> String {
        self.op.symbol().to_string()
    }
}

fn ordering_satisfies(op: OpType, ord: Ordering) -> bool {
    match op {
        OpType::Eq => ord == Ordering::Equal,
        OpType::Ne => ord != Ordering::Equal,
        OpType::Lt => ord == Ordering::Less,
        OpType::Le => ord != Ordering::Greater,
        OpType::Gt => ord == Ordering::Greater,
        OpType::Ge => ord != Ordering::Less,
        _ => false,
    }
}

pub(crate) fn combine_compare_type(lhs: &ColType, rhs: &ColType) -> ColType {
    let (l, r) = (lhs.data_type, rhs.data_type);
    if l.is_string() && r.is_string() {
        return ColType::varchar(lhs.width.max(rhs.width));
    }
    if l.is_decimal() || r.is_decimal() {
        let base = if l.is_decimal() { lhs } else { rhs };
        return ColType::decimal(base.precision, base.scale);
    }
    if l.is_float() || r.is_float() || l.is_long_double() || r.is_long_double() {
        return ColType::double();
    }
    if l.is_unsigned_integer() && r.is_unsigned_integer() {
        return ColType::ubigint();
    }
    ColType::bigint()
}

/// SQL LIKE matcher: `%` is any run of characters, `_` exactly one. Greedy
/// with single-level backtracking over the last `%` seen.
pub(crate) fn like_match(text: &str, pattern: &str) -> bool {
    let s: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut si, mut pi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while si < s.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == s[si]) {
            si += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((sp, ss)) = star {
            pi = sp + 1;
            si = ss + 1;
            star = Some((sp, ss + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}
