//! Row values consumed by expression evaluation.

use serde::{Deserialize, Serialize};

use crate::decimal::{scale_multiplier, Decimal};

const NULL_DATUM: Datum = Datum::Null;

/// One cell of a row. NULL is a first-class variant; typed accessors report it
/// through the caller's null flag and return the family's default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Int(i64),
    Uint(u64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Str(String),
    Bool(bool),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn to_int(&self, is_null: &mut bool) -> i64 {
        match self {
            Datum::Null => {
                *is_null = true;
                0
            }
            Datum::Int(v) => *v,
            Datum::Uint(v) => *v as i64,
            Datum::Float(v) => *v as i64,
            Datum::Double(v) => *v as i64,
            Datum::Decimal(d) => d.rounded_int(),
            Datum::Str(s) => s.trim().parse().unwrap_or(0),
            Datum::Bool(b) => *b as i64,
        }
    }

    pub fn to_uint(&self, is_null: &mut bool) -> u64 {
        match self {
            Datum::Null => {
                *is_null = true;
                0
            }
            Datum::Int(v) => *v as u64,
            Datum::Uint(v) => *v,
            Datum::Float(v) => *v as u64,
            Datum::Double(v) => *v as u64,
            Datum::Decimal(d) => d.rounded_int() as u64,
            Datum::Str(s) => s.trim().parse().unwrap_or(0),
            Datum::Bool(b) => *b as u64,
        }
    }

    pub fn to_float(&self, is_null: &mut bool) -> f32 {
        self.to_double(is_null) as f32
    }

    pub fn to_double(&self, is_null: &mut bool) -> f64 {
        match self {
            Datum::Null => {
                *is_null = true;
                0.0
            }
            Datum::Int(v) => *v as f64,
            Datum::Uint(v) => *v as f64,
            Datum::Float(v) => *v as f64,
            Datum::Double(v) => *v,
            Datum::Decimal(d) => d.value as f64 / scale_multiplier(d.scale.max(0)) as f64,
            Datum::Str(s) => s.trim().parse().unwrap_or(0.0),
            Datum::Bool(b) => *b as u8 as f64,
        }
    }

    pub fn to_decimal(&self, is_null: &mut bool) -> Decimal {
        match self {
            Datum::Null => {
                *is_null = true;
                Decimal::default()
            }
            Datum::Decimal(d) => *d,
            Datum::Int(v) => Decimal::new(*v as i128, 0, 18),
            Datum::Uint(v) => Decimal::new(*v as i128, 0, 18),
            other => {
                let mut dead = false;
                Decimal::new(other.to_int(&mut dead) as i128, 0, 18)
            }
        }
    }

    pub fn to_str(&self, is_null: &mut bool) -> String {
        match self {
            Datum::Null => {
                *is_null = true;
                String::new()
            }
            Datum::Int(v) => v.to_string(),
            Datum::Uint(v) => v.to_string(),
            Datum::Float(v) => v.to_string(),
            Datum::Double(v) => v.to_string(),
            Datum::Decimal(d) => d.to_string(),
            Datum::Str(s) => s.clone(),
            Datum::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        }
    }

    pub fn to_bool(&self, is_null: &mut bool) -> bool {
        match self {
            Datum::Null => {
                *is_null = true;
                false
            }
            Datum::Int(v) => *v != 0,
            Datum::Uint(v) => *v != 0,
            Datum::Float(v) => *v != 0.0,
            Datum::Double(v) => *v != 0.0,
            Datum::Decimal(d) => !d.is_zero(),
            Datum::Str(s) => s.trim().parse::<i64>().map(|v| v != 0).unwrap_or(false),
            Datum::Bool(b) => *b,
        }
    }
}

/// A materialized row. Cell positions correspond to the input indexes bound
/// into column nodes at plan build time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<Datum>,
}

impl Row {
    pub fn new(cells: Vec<Datum>) -> Self {
        Row { cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Out-of-range reads resolve to NULL rather than panicking; an unbound
    /// column index behaves like a missing value.
    pub fn datum(&self, idx: usize) -> &Datum {
        self.cells.get(idx).unwrap_or(&NULL_DATUM)
    }

    pub fn set(&mut self, idx: usize, value: Datum) {
        if idx >= self.cells.len() {
            self.cells.resize(idx + 1, Datum::Null);
        }
        self.cells[idx] = value;
    }

    pub fn push(&mut self, value: Datum) {
        self.cells.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_cells_set_the_flag_and_return_defaults() {
        let row = Row::new(vec![Datum::Null]);
        let mut is_null = false;
        assert_eq!(row.datum(0).to_int(&mut is_null), 0);
        assert!(is_null);

        is_null = false;
        assert_eq!(row.datum(0).to_str(&mut is_null), "");
        assert!(is_null);
    }

    #[test]
    fn out_of_range_reads_are_null() {
        let row = Row::default();
        let mut is_null = false;
        row.datum(7).to_double(&mut is_null);
        assert!(is_null);
    }

    #[test]
    fn numeric_coercions() {
        let mut is_null = false;
        assert_eq!(Datum::Str("42".into()).to_int(&mut is_null), 42);
        assert_eq!(Datum::Double(2.75).to_int(&mut is_null), 2);
        assert_eq!(Datum::Decimal(Decimal::new(250, 2, 18)).to_int(&mut is_null), 3);
        assert_eq!(Datum::Decimal(Decimal::new(-250, 2, 18)).to_int(&mut is_null), -3);
        assert!(!is_null);
    }

    #[test]
    fn bool_coercions_follow_numeric_truthiness() {
        let mut is_null = false;
        assert!(Datum::Int(-1).to_bool(&mut is_null));
        assert!(!Datum::Str("abc".into()).to_bool(&mut is_null));
        assert!(Datum::Str("1".into()).to_bool(&mut is_null));
    }

    #[test]
    fn set_extends_with_nulls() {
        let mut row = Row::default();
        row.set(2, Datum::Int(9));
        assert_eq!(row.len(), 3);
        assert!(row.datum(0).is_null());
        assert_eq!(row.datum(2), &Datum::Int(9));
    }
}
