//! Predicate leaf nodes: single comparisons and constant filter lists.

use std::cmp::Ordering;
use std::fmt;

use crate::arithmetic::{derive_arith_type, ArithmeticOperator};
use crate::columns::{ConstantColumn, ExpressionColumn, ReturnedColumn, SimpleColumn};
use crate::node::{ExprError, TreeNode};
use crate::operators::{combine_compare_type, like_match, OpType, PredicateOperator};
use crate::row::Row;
use crate::tree::ParseTree;
use crate::types::ColType;

/// One binary comparison, `lhs op rhs`, evaluable as a tree leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleFilter {
    pub op: PredicateOperator,
    pub lhs: ReturnedColumn,
    pub rhs: ReturnedColumn,
}

impl SimpleFilter {
    pub fn new(op: OpType, lhs: ReturnedColumn, rhs: ReturnedColumn) -> Self {
        let mut pred = PredicateOperator::new(op);
        pred.set_op_type(&lhs.result_type(), &rhs.result_type());
        SimpleFilter {
            op: pred,
            lhs,
            rhs,
        }
    }

    /// Parse a filter out of statement text, e.g. `t1.id < 30` or
    /// `t1.place > 'abcdefghij'`. The comparison symbol is located by
    /// first-match priority so `>=` wins over `>` and `=`; occurrences inside
    /// single quotes are ignored.
    pub fn parse(text: &str) -> Result<SimpleFilter, ExprError> {
        const DELIMITERS: [&str; 7] = [">=", "<=", "<>", "!=", "=", "<", ">"];
        for delim in DELIMITERS {
            if let Some(pos) = find_outside_quotes(text, delim) {
                let op = match OpType::from_symbol(delim) {
                    Some(op) => op,
                    None => continue,
                };
                let lhs = parse_operand(text[..pos].trim())?;
                let rhs = parse_operand(text[pos + delim.len()..].trim())?;
                return Ok(SimpleFilter::new(op, lhs, rhs));
            }
        }
        Err(ExprError::InvalidOperation(format!(
            "no comparison operator found in filter text: {text}"
        )))
    }

    pub fn get_bool_val(&mut self, row: &Row, is_null: &mut bool) -> Result<bool, ExprError> {
        let _ = is_null;
        match self.op.op {
            OpType::IsNull | OpType::IsNotNull => {
                let mut operand_null = false;
                self.lhs.get_str_val(row, &mut operand_null)?;
                Ok(if self.op.op == OpType::IsNull {
                    operand_null
                } else {
                    !operand_null
                })
            }
            OpType::Like | OpType::NotLike => {
                let mut l_null = false;
                let mut r_null = false;
                let text = self.lhs.get_str_val(row, &mut l_null)?;
                let pattern = self.rhs.get_str_val(row, &mut r_null)?;
                if l_null || r_null {
                    return Ok(false);
                }
                let matched = like_match(&text, &pattern);
                Ok(if self.op.op == OpType::Like {
                    matched
                } else {
                    !matched
                })
            }
            op if op.is_comparison() => {
                let mut l_null = false;
                let mut r_null = false;
                let ord = compare_operands(
                    &self.op.operation_type,
                    &mut self.lhs,
                    &mut self.rhs,
                    row,
                    &mut l_null,
                    &mut r_null,
                )?;
                if l_null || r_null {
                    return Ok(false);
                }
                Ok(match op {
                    OpType::Eq => ord == Ordering::Equal,
                    OpType::Ne => ord != Ordering::Equal,
                    OpType::Lt => ord == Ordering::Less,
                    OpType::Le => ord != Ordering::Greater,
                    OpType::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                })
            }
            other => Err(ExprError::InvalidOperation(format!(
                "operator {} cannot drive a simple filter",
                other
            ))),
        }
    }

    /// Recompute the comparison family after operand types change, e.g. once
    /// parsed columns have been bound to catalog types.
    pub fn resolve_operation_type(&mut self) {
        self.op
            .set_op_type(&self.lhs.result_type(), &self.rhs.result_type());
    }

    pub fn data(&self) -> String {
        format!(
            "{} {} {}",
            self.lhs.data(),
            self.op.op.symbol(),
            self.rhs.data()
        )
    }

    pub fn derived_table(&self) -> String {
        crate::node::combine_derived(&self.lhs.derived_table(), &self.rhs.derived_table())
    }
}

impl fmt::Display for SimpleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data())
    }
}

fn compare_operands(
    t: &ColType,
    lhs: &mut ReturnedColumn,
    rhs: &mut ReturnedColumn,
    row: &Row,
    l_null: &mut bool,
    r_null: &mut bool,
) -> Result<Ordering, ExprError> {
    if t.data_type.is_string() {
        let l = lhs.get_str_val(row, l_null)?;
        let r = rhs.get_str_val(row, r_null)?;
        return Ok(l.cmp(&r));
    }
    if t.data_type.is_decimal() {
        let l = lhs.get_decimal_val(row, l_null)?;
        let r = rhs.get_decimal_val(row, r_null)?;
        return Ok(l.compare(&r));
    }
    if t.data_type.is_float() || t.data_type.is_long_double() {
        let l = lhs.get_double_val(row, l_null)?;
        let r = rhs.get_double_val(row, r_null)?;
        return Ok(l.partial_cmp(&r).unwrap_or(Ordering::Equal));
    }
    if t.data_type.is_unsigned_integer() {
        let l = lhs.get_uint_val(row, l_null)?;
        let r = rhs.get_uint_val(row, r_null)?;
        return Ok(l.cmp(&r));
    }
    let l = lhs.get_int_val(row, l_null)?;
    let r = rhs.get_int_val(row, r_null)?;
    Ok(l.cmp(&r))
}

/// Locate `needle` in `text` skipping anything between single quotes.
fn find_outside_quotes(text: &str, needle: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let nlen = needle.len();
    let mut in_quotes = false;
    let mut i = 0;
    while i + nlen <= bytes.len() {
        if bytes[i] == b'\'' {
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if !in_quotes && &text[i..i + nlen] == needle {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Classify one side of a comparison: quoted literal, bare number, arithmetic
/// expression, or column reference.
fn parse_operand(text: &str) -> Result<ReturnedColumn, ExprError> {
    let t = text.trim();
    if t.is_empty() {
        return Err(ExprError::InvalidOperation(
            "empty operand in filter text".to_string(),
        ));
    }
    if t.len() >= 2 && t.starts_with('\'') && t.ends_with('\'') {
        return Ok(ReturnedColumn::Constant(ConstantColumn::literal(
            &t[1..t.len() - 1],
        )));
    }
    if t.eq_ignore_ascii_case("null") {
        return Ok(ReturnedColumn::Constant(ConstantColumn::null()));
    }
    if t.parse::<f64>().is_ok() {
        return Ok(ReturnedColumn::Constant(ConstantColumn::num(t)));
    }
    if contains_arith_outside_quotes(t) {
        let tree = parse_arith_expr(t)?;
        return Ok(ReturnedColumn::Expression(ExpressionColumn {
            expression: tree,
            text: t.to_string(),
        }));
    }
    Ok(ReturnedColumn::Simple(SimpleColumn::new(t)))
}

fn contains_arith_outside_quotes(text: &str) -> bool {
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '\'' => in_quotes = !in_quotes,
            '+' | '-' | '*' | '/' | '(' if !in_quotes => return true,
            _ => {}
        }
    }
    false
}

/// Minimal arithmetic grammar over filter operands:
/// expr := term (('+' | '-') term)*, term := factor (('*' | '/') factor)*,
/// factor := '(' expr ')' | number | column.
fn parse_arith_expr(text: &str) -> Result<Box<ParseTree>, ExprError> {
    let tokens = tokenize_arith(text)?;
    let mut pos = 0;
    let tree = parse_expr_level(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(ExprError::InvalidOperation(format!(
            "trailing tokens in arithmetic expression: {text}"
        )));
    }
    Ok(tree)
}

#[derive(Debug, Clone, PartialEq)]
enum ArithToken {
    Op(char),
    LParen,
    RParen,
    Num(String),
    Ident(String),
}

fn tokenize_arith(text: &str) -> Result<Vec<ArithToken>, ExprError> {
    let mut out = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' | '-' | '*' | '/' => {
                out.push(ArithToken::Op(c));
                i += 1;
            }
            '(' => {
                out.push(ArithToken::LParen);
                i += 1;
            }
            ')' => {
                out.push(ArithToken::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                out.push(ArithToken::Num(chars[start..i].iter().collect()));
            }
            c if c.is_alphanumeric() || c == '_' || c == '`' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric()
                        || chars[i] == '_'
                        || chars[i] == '.'
                        || chars[i] == '`')
                {
                    i += 1;
                }
                out.push(ArithToken::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ExprError::InvalidOperation(format!(
                    "unexpected character '{other}' in arithmetic expression"
                )))
            }
        }
    }
    Ok(out)
}

fn parse_expr_level(tokens: &[ArithToken], pos: &mut usize) -> Result<Box<ParseTree>, ExprError> {
    let mut left = parse_term_level(tokens, pos)?;
    while let Some(ArithToken::Op(c @ ('+' | '-'))) = tokens.get(*pos) {
        let op = if *c == '+' { OpType::Add } else { OpType::Sub };
        *pos += 1;
        let right = parse_term_level(tokens, pos)?;
        left = make_arith_node(op, left, right);
    }
    Ok(left)
}

fn parse_term_level(tokens: &[ArithToken], pos: &mut usize) -> Result<Box<ParseTree>, ExprError> {
    let mut left = parse_factor(tokens, pos)?;
    while let Some(ArithToken::Op(c @ ('*' | '/'))) = tokens.get(*pos) {
        let op = if *c == '*' { OpType::Mul } else { OpType::Div };
        *pos += 1;
        let right = parse_factor(tokens, pos)?;
        left = make_arith_node(op, left, right);
    }
    Ok(left)
}

fn parse_factor(tokens: &[ArithToken], pos: &mut usize) -> Result<Box<ParseTree>, ExprError> {
    match tokens.get(*pos) {
        Some(ArithToken::LParen) => {
            *pos += 1;
            let inner = parse_expr_level(tokens, pos)?;
            match tokens.get(*pos) {
                Some(ArithToken::RParen) => {
                    *pos += 1;
                    Ok(inner)
                }
                _ => Err(ExprError::InvalidOperation(
                    "unbalanced parenthesis in arithmetic expression".to_string(),
                )),
            }
        }
        Some(ArithToken::Num(n)) => {
            *pos += 1;
            Ok(Box::new(ParseTree::leaf(TreeNode::Constant(
                ConstantColumn::num(n),
            ))))
        }
        Some(ArithToken::Ident(name)) => {
            *pos += 1;
            Ok(Box::new(ParseTree::leaf(TreeNode::Column(
                SimpleColumn::new(name),
            ))))
        }
        _ => Err(ExprError::InvalidOperation(
            "dangling operator in arithmetic expression".to_string(),
        )),
    }
}

fn make_arith_node(op: OpType, left: Box<ParseTree>, right: Box<ParseTree>) -> Box<ParseTree> {
    let t = derive_arith_type(op, &left.result_type(), &right.result_type());
    let node = ArithmeticOperator::new(op).with_operation_type(t);
    Box::new(ParseTree::internal(
        TreeNode::Arithmetic(node),
        left,
        right,
    ))
}

/// A filter list over one column combined by a single operator, typically the
/// expansion of `col IN (...)` or a chain of ORed equalities.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantFilter {
    pub op: OpType,
    pub filter_list: Vec<SimpleFilter>,
    pub col: Option<SimpleColumn>,
    pub function_name: String,
}

impl ConstantFilter {
    pub fn new(op: OpType) -> Self {
        ConstantFilter {
            op,
            filter_list: Vec::new(),
            col: None,
            function_name: String::new(),
        }
    }

    pub fn with_col(mut self, col: SimpleColumn) -> Self {
        self.col = Some(col);
        self
    }

    pub fn with_function_name(mut self, name: &str) -> Self {
        self.function_name = name.to_string();
        self
    }

    pub fn push_filter(&mut self, f: SimpleFilter) {
        self.filter_list.push(f);
    }

    pub fn len(&self) -> usize {
        self.filter_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filter_list.is_empty()
    }

    /// True when this list multiplies alternatives rather than constraining
    /// them; these are the lists the fan-out guardrail counts.
    pub fn has_or_semantics(&self) -> bool {
        self.op == OpType::Or
            || self.function_name.eq_ignore_ascii_case("in")
            || self.op == OpType::In
    }

    pub fn get_bool_val(&mut self, row: &Row, is_null: &mut bool) -> Result<bool, ExprError> {
        match self.op {
            OpType::Or | OpType::In => {
                for f in &mut self.filter_list {
                    if f.get_bool_val(row, is_null)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            OpType::And => {
                for f in &mut self.filter_list {
                    if !f.get_bool_val(row, is_null)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            other => Err(ExprError::InvalidOperation(format!(
                "operator {} cannot combine a constant filter list",
                other
            ))),
        }
    }

    pub fn data(&self) -> String {
        let parts: Vec<String> = self.filter_list.iter().map(|f| f.data()).collect();
        let joiner = format!(" {} ", self.op.symbol());
        match &self.col {
            Some(c) if !self.function_name.is_empty() => {
                format!("{} {} ({})", c.data(), self.function_name, parts.join(", "))
            }
            _ => parts.join(&joiner),
        }
    }

    pub fn derived_table(&self) -> String {
        match &self.col {
            Some(c) => c.derived_table.clone(),
            None => String::new(),
        }
    }
}

/// Combined comparison type for two operand descriptors; shared with the
/// predicate operator so filters and tree comparisons agree.
pub fn filter_compare_type(lhs: &ColType, rhs: &ColType) -> ColType {
    combine_compare_type(lhs, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Datum;

    fn row_with(id: i64, pos: i64, place: &str) -> Row {
        Row::new(vec![
            Datum::Int(id),
            Datum::Int(pos),
            Datum::Str(place.to_string()),
        ])
    }

    fn bind(mut f: SimpleFilter, indexes: &[(&str, usize)]) -> SimpleFilter {
        for rc in [&mut f.lhs, &mut f.rhs] {
            if let ReturnedColumn::Simple(c) = rc {
                for (name, idx) in indexes {
                    if c.column_name == *name {
                        c.input_index = *idx;
                    }
                }
            }
        }
        f
    }

    #[test]
    fn parse_prefers_two_char_delimiters() {
        let f = SimpleFilter::parse("t1.pos >= 5000").unwrap();
        assert_eq!(f.op.op, OpType::Ge);
        assert_eq!(f.data(), "t1.pos >= 5000");
    }

    #[test]
    fn parse_ignores_delimiters_inside_quotes() {
        let f = SimpleFilter::parse("t1.place = 'a<b>c'").unwrap();
        assert_eq!(f.op.op, OpType::Eq);
        match &f.rhs {
            ReturnedColumn::Constant(c) => assert_eq!(c.const_val, "a<b>c"),
            other => panic!("expected constant, got {other:?}"),
        }
    }

    #[test]
    fn parse_builds_expression_operands() {
        let f = SimpleFilter::parse("t1.pos + 10 < 5000").unwrap();
        assert!(matches!(f.lhs, ReturnedColumn::Expression(_)));
        assert_eq!(f.op.op, OpType::Lt);
    }

    #[test]
    fn filters_evaluate_against_rows() {
        let row = row_with(10, 6000, "qwertyuiop");
        let f = SimpleFilter::parse("id < 30").unwrap();
        let mut f = bind(f, &[("id", 0)]);
        let mut is_null = false;
        assert!(f.get_bool_val(&row, &mut is_null).unwrap());

        let f = SimpleFilter::parse("place > 'abcdefghij'").unwrap();
        let mut f = bind(f, &[("place", 2)]);
        if let ReturnedColumn::Simple(c) = &mut f.lhs {
            c.result_type = ColType::varchar(20);
        }
        f.resolve_operation_type();
        assert!(f.get_bool_val(&row, &mut is_null).unwrap());
    }

    #[test]
    fn null_operand_makes_the_predicate_false() {
        let row = Row::new(vec![Datum::Null]);
        let f = SimpleFilter::parse("id < 30").unwrap();
        let mut f = bind(f, &[("id", 0)]);
        let mut is_null = false;
        assert!(!f.get_bool_val(&row, &mut is_null).unwrap());
    }

    #[test]
    fn constant_filter_or_fold_and_semantics_flag() {
        let mut cf = ConstantFilter::new(OpType::Or)
            .with_col(SimpleColumn::new("t1.id"))
            .with_function_name("in");
        for v in [1, 2, 3] {
            cf.push_filter(bind(
                SimpleFilter::parse(&format!("id = {v}")).unwrap(),
                &[("id", 0)],
            ));
        }
        assert!(cf.has_or_semantics());
        assert_eq!(cf.len(), 3);

        let mut is_null = false;
        let row = Row::new(vec![Datum::Int(2)]);
        assert!(cf.get_bool_val(&row, &mut is_null).unwrap());
        let row = Row::new(vec![Datum::Int(9)]);
        assert!(!cf.get_bool_val(&row, &mut is_null).unwrap());
    }

    #[test]
    fn in_list_rendering_names_the_function() {
        let mut cf = ConstantFilter::new(OpType::Or)
            .with_col(SimpleColumn::new("t1.id"))
            .with_function_name("in");
        cf.push_filter(SimpleFilter::parse("t1.id = 1").unwrap());
        cf.push_filter(SimpleFilter::parse("t1.id = 2").unwrap());
        assert_eq!(cf.data(), "t1.id in (t1.id = 1, t1.id = 2)");
    }
}
