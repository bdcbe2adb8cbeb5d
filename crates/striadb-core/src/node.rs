//! Expression tree node payloads.
//!
//! A node is either an operator (always evaluated with exactly two child
//! subtrees) or a leaf (column, constant, or filter) that evaluates against
//! the row alone. The closed enum makes the role explicit: dispatch never
//! relies on downcasting or on a children-are-null convention.

use thiserror::Error;

use crate::arithmetic::ArithmeticOperator;
use crate::columns::{ConstantColumn, SimpleColumn};
use crate::decimal::{Decimal, DecimalError};
use crate::filters::{ConstantFilter, SimpleFilter};
use crate::operators::{LogicOperator, PredicateOperator};
use crate::row::Row;
use crate::types::ColType;

#[derive(Debug, Error)]
pub enum ExprError {
    /// An operation was requested that the node kind cannot perform. Fatal to
    /// the statement; indicates a plan-builder bug upstream.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("malformed expression tree: {0}")]
    MalformedTree(String),
    #[error("unexpected decimal result width {0}")]
    UnexpectedResultWidth(u32),
    #[error(transparent)]
    Decimal(#[from] DecimalError),
}

/// Cached typed results of the most recent operator evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalResult {
    pub int_val: i64,
    pub uint_val: u64,
    pub float_val: f32,
    pub double_val: f64,
    pub long_double_val: f64,
    pub bool_val: bool,
    pub str_val: String,
    pub decimal_val: Decimal,
}

/// One expression tree payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Arithmetic(ArithmeticOperator),
    Logic(LogicOperator),
    Predicate(PredicateOperator),
    Column(SimpleColumn),
    Constant(ConstantColumn),
    Filter(SimpleFilter),
    ConstantFilter(ConstantFilter),
}

impl TreeNode {
    pub fn is_operator(&self) -> bool {
        matches!(
            self,
            TreeNode::Arithmetic(_) | TreeNode::Logic(_) | TreeNode::Predicate(_)
        )
    }

    /// Statement-text rendering of this node alone.
    pub fn data(&self) -> String {
        match self {
            TreeNode::Arithmetic(n) => n.data(),
            TreeNode::Logic(n) => n.data(),
            TreeNode::Predicate(n) => n.data(),
            TreeNode::Column(n) => n.data(),
            TreeNode::Constant(n) => n.data(),
            TreeNode::Filter(n) => n.data(),
            TreeNode::ConstantFilter(n) => n.data(),
        }
    }

    pub fn result_type(&self) -> ColType {
        match self {
            TreeNode::Arithmetic(n) => n.result_type,
            TreeNode::Logic(n) => n.result_type,
            TreeNode::Predicate(n) => n.result_type,
            TreeNode::Column(n) => n.result_type,
            TreeNode::Constant(n) => n.result_type,
            TreeNode::Filter(_) | TreeNode::ConstantFilter(_) => ColType::boolean(),
        }
    }

    /// Derived-table tag of a leaf; "*" means the node binds no table.
    pub fn derived_table(&self) -> String {
        match self {
            TreeNode::Column(n) => n.derived_table.clone(),
            TreeNode::Constant(_) => "*".to_string(),
            TreeNode::Filter(n) => n.derived_table(),
            TreeNode::ConstantFilter(n) => n.derived_table(),
            _ => "*".to_string(),
        }
    }

    pub fn get_int_val(&mut self, row: &Row, is_null: &mut bool) -> Result<i64, ExprError> {
        match self {
            TreeNode::Column(c) => Ok(c.get_int_val(row, is_null)),
            TreeNode::Constant(c) => Ok(c.get_int_val(is_null)),
            other => Err(other.leaf_error("integer")),
        }
    }

    pub fn get_uint_val(&mut self, row: &Row, is_null: &mut bool) -> Result<u64, ExprError> {
        match self {
            TreeNode::Column(c) => Ok(c.get_uint_val(row, is_null)),
            TreeNode::Constant(c) => Ok(c.get_uint_val(is_null)),
            other => Err(other.leaf_error("unsigned")),
        }
    }

    pub fn get_float_val(&mut self, row: &Row, is_null: &mut bool) -> Result<f32, ExprError> {
        match self {
            TreeNode::Column(c) => Ok(c.get_float_val(row, is_null)),
            TreeNode::Constant(c) => Ok(c.get_float_val(is_null)),
            other => Err(other.leaf_error("float")),
        }
    }

    pub fn get_double_val(&mut self, row: &Row, is_null: &mut bool) -> Result<f64, ExprError> {
        match self {
            TreeNode::Column(c) => Ok(c.get_double_val(row, is_null)),
            TreeNode::Constant(c) => Ok(c.get_double_val(is_null)),
            other => Err(other.leaf_error("double")),
        }
    }

    pub fn get_long_double_val(&mut self, row: &Row, is_null: &mut bool) -> Result<f64, ExprError> {
        self.get_double_val(row, is_null)
    }

    pub fn get_decimal_val(&mut self, row: &Row, is_null: &mut bool) -> Result<Decimal, ExprError> {
        match self {
            TreeNode::Column(c) => Ok(c.get_decimal_val(row, is_null)),
            TreeNode::Constant(c) => Ok(c.get_decimal_val(is_null)),
            other => Err(other.leaf_error("decimal")),
        }
    }

    pub fn get_str_val(&mut self, row: &Row, is_null: &mut bool) -> Result<String, ExprError> {
        match self {
            TreeNode::Column(c) => Ok(c.get_str_val(row, is_null)),
            TreeNode::Constant(c) => Ok(c.get_str_val(is_null)),
            other => Err(other.leaf_error("string")),
        }
    }

    pub fn get_bool_val(&mut self, row: &Row, is_null: &mut bool) -> Result<bool, ExprError> {
        match self {
            TreeNode::Column(c) => Ok(c.get_bool_val(row, is_null)),
            TreeNode::Constant(c) => Ok(c.get_bool_val(is_null)),
            TreeNode::Filter(f) => f.get_bool_val(row, is_null),
            TreeNode::ConstantFilter(f) => f.get_bool_val(row, is_null),
            other => Err(other.leaf_error("boolean")),
        }
    }

    fn leaf_error(&self, wanted: &str) -> ExprError {
        if self.is_operator() {
            ExprError::MalformedTree(format!(
                "operator node '{}' evaluated without children",
                self.data()
            ))
        } else {
            ExprError::InvalidOperation(format!(
                "node '{}' has no {} value",
                self.data(),
                wanted
            ))
        }
    }
}

/// Merge two derived-table tags: "*" yields to the other side, agreement
/// keeps the tag, disagreement clears it.
pub(crate) fn combine_derived(l: &str, r: &str) -> String {
    if l == "*" {
        return r.to_string();
    }
    if r == "*" {
        return l.to_string();
    }
    if l == r {
        l.to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::OpType;
    use crate::row::Datum;

    #[test]
    fn leaves_evaluate_operators_do_not() {
        let row = Row::new(vec![Datum::Int(41)]);
        let mut is_null = false;

        let mut col = TreeNode::Column(SimpleColumn::new("t1.id").with_input_index(0));
        assert_eq!(col.get_int_val(&row, &mut is_null).unwrap(), 41);

        let mut c = TreeNode::Constant(ConstantColumn::from_int(7));
        assert_eq!(c.get_int_val(&row, &mut is_null).unwrap(), 7);

        let mut op = TreeNode::Logic(LogicOperator::new(OpType::And));
        assert!(matches!(
            op.get_bool_val(&row, &mut is_null),
            Err(ExprError::MalformedTree(_))
        ));
    }

    #[test]
    fn filters_only_answer_boolean_queries() {
        let row = Row::new(vec![Datum::Int(5)]);
        let mut is_null = false;
        let mut f = SimpleFilter::parse("id < 30").unwrap();
        if let crate::columns::ReturnedColumn::Simple(c) = &mut f.lhs {
            c.input_index = 0;
        }
        let mut node = TreeNode::Filter(f);
        assert!(node.get_bool_val(&row, &mut is_null).unwrap());
        assert!(matches!(
            node.get_int_val(&row, &mut is_null),
            Err(ExprError::InvalidOperation(_))
        ));
    }

    #[test]
    fn derived_table_combination() {
        assert_eq!(combine_derived("*", "sub1"), "sub1");
        assert_eq!(combine_derived("sub1", "*"), "sub1");
        assert_eq!(combine_derived("sub1", "sub1"), "sub1");
        assert_eq!(combine_derived("sub1", "sub2"), "");
    }
}
