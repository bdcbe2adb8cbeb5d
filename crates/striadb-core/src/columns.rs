//! Column and constant leaf nodes.

use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;
use crate::node::ExprError;
use crate::row::{Datum, Row};
use crate::tree::ParseTree;
use crate::types::ColType;

/// Reference to a physical column, bound to a row position at plan build time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleColumn {
    pub schema_name: String,
    pub table_name: String,
    pub column_name: String,
    pub table_alias: String,
    pub oid: u32,
    pub input_index: usize,
    pub result_type: ColType,
    pub derived_table: String,
}

impl SimpleColumn {
    /// Parse a dotted name: `column`, `table.column`, or
    /// `schema.table.column`. Backtick quoting around any part is stripped.
    pub fn new(name: &str) -> Self {
        let parts: Vec<String> = name
            .split('.')
            .map(|p| p.trim().trim_matches('`').to_string())
            .collect();
        let mut col = SimpleColumn::default();
        match parts.len() {
            1 => col.column_name = parts[0].clone(),
            2 => {
                col.table_name = parts[0].clone();
                col.column_name = parts[1].clone();
            }
            _ => {
                col.schema_name = parts[0].clone();
                col.table_name = parts[1].clone();
                col.column_name = parts[2].clone();
            }
        }
        col
    }

    pub fn with_input_index(mut self, idx: usize) -> Self {
        self.input_index = idx;
        self
    }

    pub fn with_result_type(mut self, t: ColType) -> Self {
        self.result_type = t;
        self
    }

    pub fn with_oid(mut self, oid: u32) -> Self {
        self.oid = oid;
        self
    }

    pub fn full_name(&self) -> String {
        let mut out = String::new();
        if !self.schema_name.is_empty() {
            out.push_str(&self.schema_name);
            out.push('.');
        }
        if !self.table_name.is_empty() {
            out.push_str(&self.table_name);
            out.push('.');
        }
        out.push_str(&self.column_name);
        out
    }

    pub fn data(&self) -> String {
        self.full_name()
    }

    pub fn get_int_val(&self, row: &Row, is_null: &mut bool) -> i64 {
        row.datum(self.input_index).to_int(is_null)
    }

    pub fn get_uint_val(&self, row: &Row, is_null: &mut bool) -> u64 {
        row.datum(self.input_index).to_uint(is_null)
    }

    pub fn get_float_val(&self, row: &Row, is_null: &mut bool) -> f32 {
        row.datum(self.input_index).to_float(is_null)
    }

    pub fn get_double_val(&self, row: &Row, is_null: &mut bool) -> f64 {
        row.datum(self.input_index).to_double(is_null)
    }

    pub fn get_decimal_val(&self, row: &Row, is_null: &mut bool) -> Decimal {
        row.datum(self.input_index).to_decimal(is_null)
    }

    pub fn get_str_val(&self, row: &Row, is_null: &mut bool) -> String {
        row.datum(self.input_index).to_str(is_null)
    }

    pub fn get_bool_val(&self, row: &Row, is_null: &mut bool) -> bool {
        row.datum(self.input_index).to_bool(is_null)
    }
}

/// How a constant was written in the statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstKind {
    Literal,
    Num,
    Null,
}

/// A literal operand. The typed value is fixed at construction; getters never
/// touch the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantColumn {
    pub const_val: String,
    pub kind: ConstKind,
    pub result_type: ColType,
    datum: Datum,
}

impl ConstantColumn {
    pub fn literal(s: &str) -> Self {
        ConstantColumn {
            const_val: s.to_string(),
            kind: ConstKind::Literal,
            result_type: ColType::varchar(s.len() as u32),
            datum: Datum::Str(s.to_string()),
        }
    }

    /// Numeric token. Integers without a fraction or exponent stay integral;
    /// everything else becomes a double.
    pub fn num(text: &str) -> Self {
        let t = text.trim();
        if let Ok(v) = t.parse::<i64>() {
            return ConstantColumn {
                const_val: t.to_string(),
                kind: ConstKind::Num,
                result_type: ColType::bigint(),
                datum: Datum::Int(v),
            };
        }
        let v = t.parse::<f64>().unwrap_or(0.0);
        ConstantColumn {
            const_val: t.to_string(),
            kind: ConstKind::Num,
            result_type: ColType::double(),
            datum: Datum::Double(v),
        }
    }

    pub fn null() -> Self {
        ConstantColumn {
            const_val: "null".to_string(),
            kind: ConstKind::Null,
            result_type: ColType::bigint(),
            datum: Datum::Null,
        }
    }

    pub fn from_int(v: i64) -> Self {
        ConstantColumn {
            const_val: v.to_string(),
            kind: ConstKind::Num,
            result_type: ColType::bigint(),
            datum: Datum::Int(v),
        }
    }

    pub fn from_uint(v: u64) -> Self {
        ConstantColumn {
            const_val: v.to_string(),
            kind: ConstKind::Num,
            result_type: ColType::ubigint(),
            datum: Datum::Uint(v),
        }
    }

    pub fn from_double(v: f64) -> Self {
        ConstantColumn {
            const_val: v.to_string(),
            kind: ConstKind::Num,
            result_type: ColType::double(),
            datum: Datum::Double(v),
        }
    }

    pub fn from_decimal(d: Decimal) -> Self {
        ConstantColumn {
            const_val: d.to_string(),
            kind: ConstKind::Num,
            result_type: ColType::decimal(d.precision, d.scale),
            datum: Datum::Decimal(d),
        }
    }

    /// Reassemble a column from decoded parts without reparsing the text.
    pub(crate) fn from_parts(
        const_val: String,
        kind: ConstKind,
        result_type: ColType,
        datum: Datum,
    ) -> Self {
        ConstantColumn {
            const_val,
            kind,
            result_type,
            datum,
        }
    }

    pub(crate) fn datum(&self) -> &Datum {
        &self.datum
    }

    pub fn is_null(&self) -> bool {
        self.kind == ConstKind::Null
    }

    /// Statement-text rendering; string literals keep their quotes.
    pub fn data(&self) -> String {
        match self.kind {
            ConstKind::Literal => format!("'{}'", self.const_val),
            _ => self.const_val.clone(),
        }
    }

    pub fn get_int_val(&self, is_null: &mut bool) -> i64 {
        self.datum.to_int(is_null)
    }

    pub fn get_uint_val(&self, is_null: &mut bool) -> u64 {
        self.datum.to_uint(is_null)
    }

    pub fn get_float_val(&self, is_null: &mut bool) -> f32 {
        self.datum.to_float(is_null)
    }

    pub fn get_double_val(&self, is_null: &mut bool) -> f64 {
        self.datum.to_double(is_null)
    }

    pub fn get_decimal_val(&self, is_null: &mut bool) -> Decimal {
        self.datum.to_decimal(is_null)
    }

    pub fn get_str_val(&self, is_null: &mut bool) -> String {
        self.datum.to_str(is_null)
    }

    pub fn get_bool_val(&self, is_null: &mut bool) -> bool {
        self.datum.to_bool(is_null)
    }
}

/// A computed operand carrying its own expression subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionColumn {
    pub expression: Box<ParseTree>,
    pub text: String,
}

/// Filter operand: a column reference, a literal, or a computed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnedColumn {
    Simple(SimpleColumn),
    Constant(ConstantColumn),
    Expression(ExpressionColumn),
}

impl ReturnedColumn {
    pub fn data(&self) -> String {
        match self {
            ReturnedColumn::Simple(c) => c.data(),
            ReturnedColumn::Constant(c) => c.data(),
            ReturnedColumn::Expression(c) => c.text.clone(),
        }
    }

    pub fn result_type(&self) -> ColType {
        match self {
            ReturnedColumn::Simple(c) => c.result_type,
            ReturnedColumn::Constant(c) => c.result_type,
            ReturnedColumn::Expression(c) => c.expression.result_type(),
        }
    }

    /// Wildcard "*" means "binds no table": constants qualify everywhere.
    pub fn derived_table(&self) -> String {
        match self {
            ReturnedColumn::Simple(c) => c.derived_table.clone(),
            ReturnedColumn::Constant(_) => "*".to_string(),
            ReturnedColumn::Expression(c) => c.expression.derived_table().to_string(),
        }
    }

    pub fn get_int_val(&mut self, row: &Row, is_null: &mut bool) -> Result<i64, ExprError> {
        match self {
            ReturnedColumn::Simple(c) => Ok(c.get_int_val(row, is_null)),
            ReturnedColumn::Constant(c) => Ok(c.get_int_val(is_null)),
            ReturnedColumn::Expression(c) => c.expression.get_int_val(row, is_null),
        }
    }

    pub fn get_uint_val(&mut self, row: &Row, is_null: &mut bool) -> Result<u64, ExprError> {
        match self {
            ReturnedColumn::Simple(c) => Ok(c.get_uint_val(row, is_null)),
            ReturnedColumn::Constant(c) => Ok(c.get_uint_val(is_null)),
            ReturnedColumn::Expression(c) => c.expression.get_uint_val(row, is_null),
        }
    }

    pub fn get_double_val(&mut self, row: &Row, is_null: &mut bool) -> Result<f64, ExprError> {
        match self {
            ReturnedColumn::Simple(c) => Ok(c.get_double_val(row, is_null)),
            ReturnedColumn::Constant(c) => Ok(c.get_double_val(is_null)),
            ReturnedColumn::Expression(c) => c.expression.get_double_val(row, is_null),
        }
    }

    pub fn get_decimal_val(&mut self, row: &Row, is_null: &mut bool) -> Result<Decimal, ExprError> {
        match self {
            ReturnedColumn::Simple(c) => Ok(c.get_decimal_val(row, is_null)),
            ReturnedColumn::Constant(c) => Ok(c.get_decimal_val(is_null)),
            ReturnedColumn::Expression(c) => c.expression.get_decimal_val(row, is_null),
        }
    }

    pub fn get_str_val(&mut self, row: &Row, is_null: &mut bool) -> Result<String, ExprError> {
        match self {
            ReturnedColumn::Simple(c) => Ok(c.get_str_val(row, is_null)),
            ReturnedColumn::Constant(c) => Ok(c.get_str_val(is_null)),
            ReturnedColumn::Expression(c) => c.expression.get_str_val(row, is_null),
        }
    }

    pub fn get_bool_val(&mut self, row: &Row, is_null: &mut bool) -> Result<bool, ExprError> {
        match self {
            ReturnedColumn::Simple(c) => Ok(c.get_bool_val(row, is_null)),
            ReturnedColumn::Constant(c) => Ok(c.get_bool_val(is_null)),
            ReturnedColumn::Expression(c) => c.expression.get_bool_val(row, is_null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_names_parse_with_backticks() {
        let c = SimpleColumn::new("`t1`.`pos`");
        assert_eq!(c.table_name, "t1");
        assert_eq!(c.column_name, "pos");
        assert_eq!(c.full_name(), "t1.pos");

        let c = SimpleColumn::new("db.t2.id");
        assert_eq!(c.schema_name, "db");
        assert_eq!(c.full_name(), "db.t2.id");
    }

    #[test]
    fn numeric_constants_pick_int_or_double() {
        let mut is_null = false;
        let c = ConstantColumn::num("5000");
        assert_eq!(c.get_int_val(&mut is_null), 5000);
        assert_eq!(c.result_type.data_type, crate::types::DataType::Int64);

        let c = ConstantColumn::num("2.5");
        assert_eq!(c.get_double_val(&mut is_null), 2.5);
        assert!(!is_null);
    }

    #[test]
    fn null_constant_reports_null() {
        let mut is_null = false;
        let c = ConstantColumn::null();
        assert_eq!(c.get_int_val(&mut is_null), 0);
        assert!(is_null);
        assert!(c.is_null());
    }

    #[test]
    fn literal_rendering_keeps_quotes() {
        assert_eq!(ConstantColumn::literal("qwer").data(), "'qwer'");
        assert_eq!(ConstantColumn::num("30").data(), "30");
    }

    #[test]
    fn simple_column_reads_its_bound_slot() {
        let row = Row::new(vec![Datum::Int(7), Datum::Str("x".into())]);
        let c = SimpleColumn::new("t1.id").with_input_index(0);
        let mut is_null = false;
        assert_eq!(c.get_int_val(&row, &mut is_null), 7);
        assert!(!is_null);
    }
}
