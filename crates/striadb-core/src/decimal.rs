//! Fixed-point decimal arithmetic.
//!
//! Two physical representations exist: legacy 64-bit storage (precision up to
//! 18) and wide 128-bit storage (precision 19..=38). Every operation comes in
//! a checked and an unchecked flavor; the checked flavor detects overflow of
//! the value or of an internal rescale and reports it as a statement-fatal
//! error, the unchecked flavor wraps. Division by zero is the caller's job to
//! screen out (it is a NULL-producing condition, not an error).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::MAX_LEGACY_PRECISION;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecimalError {
    #[error("decimal overflow: {0}")]
    Overflow(&'static str),
}

/// Scaled integer decimal value.
///
/// `value` holds the digits scaled by `10^scale`. Equality derives strictly
/// over the fields; use [`Decimal::compare`] for scale-aware ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimal {
    pub value: i128,
    pub scale: i32,
    pub precision: i32,
}

impl Decimal {
    pub fn new(value: i128, scale: i32, precision: i32) -> Self {
        Decimal {
            value,
            scale,
            precision,
        }
    }

    /// Wide storage is selected by declared precision above the legacy bound.
    pub fn is_wide(&self) -> bool {
        self.precision > MAX_LEGACY_PRECISION
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Integral part rounded half away from zero.
    pub fn rounded_int(&self) -> i64 {
        if self.scale <= 0 {
            return self.value as i64;
        }
        let m = scale_multiplier(self.scale);
        let q = self.value / m;
        let r = self.value % m;
        if r.unsigned_abs() * 2 >= m.unsigned_abs() {
            (if self.value < 0 { q - 1 } else { q + 1 }) as i64
        } else {
            q as i64
        }
    }

    /// Scale-aware comparison. Integral parts are compared first; on a tie the
    /// fractional remainders are normalized by the scale difference. The
    /// remainder carries the value's sign, which keeps negative fractions
    /// ordered correctly without widening past 128 bits.
    pub fn compare(&self, other: &Decimal) -> Ordering {
        let dl = scale_multiplier(self.scale.max(0));
        let dr = scale_multiplier(other.scale.max(0));
        let (q1, r1) = (self.value / dl, self.value % dl);
        let (q2, r2) = (other.value / dr, other.value % dr);

        match q1.cmp(&q2) {
            Ordering::Equal => {
                let s = self.scale - other.scale;
                let m = scale_multiplier(s.abs());
                if s < 0 {
                    (r1 * m).cmp(&r2)
                } else {
                    r1.cmp(&(r2 * m))
                }
            }
            ord => ord,
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale <= 0 {
            return write!(f, "{}", self.value);
        }
        let m = scale_multiplier(self.scale) as u128;
        let a = self.value.unsigned_abs();
        let sign = if self.value < 0 { "-" } else { "" };
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            a / m,
            a % m,
            width = self.scale as usize
        )
    }
}

/// `10^n` for n in 0..=38.
pub fn scale_multiplier(n: i32) -> i128 {
    debug_assert!((0..=38).contains(&n));
    10i128.pow(n.clamp(0, 38) as u32)
}

/// Divide rounding half away from zero. `d` must be positive.
fn round_div_i128(v: i128, d: i128) -> i128 {
    debug_assert!(d > 0);
    let q = v / d;
    let r = v % d;
    if r.unsigned_abs() * 2 >= d.unsigned_abs() {
        if v < 0 {
            q - 1
        } else {
            q + 1
        }
    } else {
        q
    }
}

fn round_div_i64(v: i64, d: i64) -> i64 {
    debug_assert!(d > 0);
    let q = v / d;
    let r = v % d;
    if r.unsigned_abs() * 2 >= d.unsigned_abs() {
        if v < 0 {
            q - 1
        } else {
            q + 1
        }
    } else {
        q
    }
}

fn mul_i128(x: i128, y: i128, checked: bool, what: &'static str) -> Result<i128, DecimalError> {
    if checked {
        x.checked_mul(y).ok_or(DecimalError::Overflow(what))
    } else {
        Ok(x.wrapping_mul(y))
    }
}

fn mul_i64(x: i64, y: i64, checked: bool, what: &'static str) -> Result<i64, DecimalError> {
    if checked {
        x.checked_mul(y).ok_or(DecimalError::Overflow(what))
    } else {
        Ok(x.wrapping_mul(y))
    }
}

/// Rescale `v` from `from` digits of fraction to `to`. Scaling up multiplies
/// (overflow-checked when requested); scaling down rounds half away from zero
/// and can never overflow.
fn rescale_i128(v: i128, from: i32, to: i32, checked: bool) -> Result<i128, DecimalError> {
    if to > from {
        mul_i128(
            v,
            scale_multiplier(to - from),
            checked,
            "scale multiplication produces an overflow",
        )
    } else if to < from {
        Ok(round_div_i128(v, scale_multiplier(from - to)))
    } else {
        Ok(v)
    }
}

fn rescale_i64(v: i64, from: i32, to: i32, checked: bool) -> Result<i64, DecimalError> {
    if to > from {
        mul_i64(
            v,
            scale_multiplier(to - from) as i64,
            checked,
            "scale multiplication produces an overflow",
        )
    } else if to < from {
        Ok(round_div_i64(v, scale_multiplier(from - to) as i64))
    } else {
        Ok(v)
    }
}

/// Wide (128-bit) addition into `result`, whose scale/precision select the
/// output representation.
pub fn addition(
    l: &Decimal,
    r: &Decimal,
    result: &mut Decimal,
    checked: bool,
) -> Result<(), DecimalError> {
    let lv = rescale_i128(l.value, l.scale, result.scale, checked)?;
    let rv = rescale_i128(r.value, r.scale, result.scale, checked)?;
    result.value = if checked {
        lv.checked_add(rv)
            .ok_or(DecimalError::Overflow("addition produces an overflow"))?
    } else {
        lv.wrapping_add(rv)
    };
    Ok(())
}

pub fn subtraction(
    l: &Decimal,
    r: &Decimal,
    result: &mut Decimal,
    checked: bool,
) -> Result<(), DecimalError> {
    let lv = rescale_i128(l.value, l.scale, result.scale, checked)?;
    let rv = rescale_i128(r.value, r.scale, result.scale, checked)?;
    result.value = if checked {
        lv.checked_sub(rv)
            .ok_or(DecimalError::Overflow("subtraction produces an overflow"))?
    } else {
        lv.wrapping_sub(rv)
    };
    Ok(())
}

pub fn multiplication(
    l: &Decimal,
    r: &Decimal,
    result: &mut Decimal,
    checked: bool,
) -> Result<(), DecimalError> {
    if l.value == 0 || r.value == 0 {
        result.value = 0;
        return Ok(());
    }

    let natural = l.scale + r.scale;
    if result.scale >= natural {
        let prod = mul_i128(
            l.value,
            r.value,
            checked,
            "multiplication produces an overflow",
        )?;
        result.value = mul_i128(
            prod,
            scale_multiplier(result.scale - natural),
            checked,
            "scale multiplication produces an overflow",
        )?;
    } else {
        // Scale the operands down by a split of the excess before multiplying
        // so intermediate magnitude stays bounded.
        let diff = natural - result.scale;
        let lv = round_div_i128(l.value, scale_multiplier(diff / 2));
        let rv = round_div_i128(r.value, scale_multiplier(diff - diff / 2));
        result.value = mul_i128(lv, rv, checked, "multiplication produces an overflow")?;
    }
    Ok(())
}

/// Wide division. The divisor must already be screened for zero by the caller;
/// the checked variant additionally rejects the MIN / -1 wraparound case.
pub fn division(
    l: &Decimal,
    r: &Decimal,
    result: &mut Decimal,
    checked: bool,
) -> Result<(), DecimalError> {
    debug_assert!(r.value != 0);
    if checked && l.value == i128::MIN && r.value == -1 {
        return Err(DecimalError::Overflow("division produces an overflow"));
    }

    let adj = result.scale - (l.scale - r.scale);
    if adj >= 0 {
        let num = mul_i128(
            l.value,
            scale_multiplier(adj),
            checked,
            "scale multiplication produces an overflow",
        )?;
        result.value = signed_round_div(num, r.value);
    } else {
        let den = mul_i128(
            r.value,
            scale_multiplier(-adj),
            checked,
            "scale multiplication produces an overflow",
        )?;
        result.value = signed_round_div(l.value, den);
    }
    Ok(())
}

/// Round-half-away division with a possibly negative divisor.
fn signed_round_div(v: i128, d: i128) -> i128 {
    if d < 0 {
        -round_div_i128(v, -d)
    } else {
        round_div_i128(v, d)
    }
}

fn signed_round_div_i64(v: i64, d: i64) -> i64 {
    if d < 0 {
        -round_div_i64(v, -d)
    } else {
        round_div_i64(v, d)
    }
}

/// Legacy (64-bit) variants. The value is carried in the low 64 bits; the
/// arithmetic and the overflow checks run in the i64 domain.
pub fn addition_narrow(
    l: &Decimal,
    r: &Decimal,
    result: &mut Decimal,
    checked: bool,
) -> Result<(), DecimalError> {
    let lv = rescale_i64(l.value as i64, l.scale, result.scale, checked)?;
    let rv = rescale_i64(r.value as i64, r.scale, result.scale, checked)?;
    let v = if checked {
        lv.checked_add(rv)
            .ok_or(DecimalError::Overflow("addition produces an overflow"))?
    } else {
        lv.wrapping_add(rv)
    };
    result.value = v as i128;
    Ok(())
}

pub fn subtraction_narrow(
    l: &Decimal,
    r: &Decimal,
    result: &mut Decimal,
    checked: bool,
) -> Result<(), DecimalError> {
    let lv = rescale_i64(l.value as i64, l.scale, result.scale, checked)?;
    let rv = rescale_i64(r.value as i64, r.scale, result.scale, checked)?;
    let v = if checked {
        lv.checked_sub(rv)
            .ok_or(DecimalError::Overflow("subtraction produces an overflow"))?
    } else {
        lv.wrapping_sub(rv)
    };
    result.value = v as i128;
    Ok(())
}

pub fn multiplication_narrow(
    l: &Decimal,
    r: &Decimal,
    result: &mut Decimal,
    checked: bool,
) -> Result<(), DecimalError> {
    let (lv, rv) = (l.value as i64, r.value as i64);
    if lv == 0 || rv == 0 {
        result.value = 0;
        return Ok(());
    }

    let natural = l.scale + r.scale;
    let v = if result.scale >= natural {
        let prod = mul_i64(lv, rv, checked, "multiplication produces an overflow")?;
        mul_i64(
            prod,
            scale_multiplier(result.scale - natural) as i64,
            checked,
            "scale multiplication produces an overflow",
        )?
    } else {
        let prod = mul_i64(lv, rv, checked, "multiplication produces an overflow")?;
        round_div_i64(prod, scale_multiplier(natural - result.scale) as i64)
    };
    result.value = v as i128;
    Ok(())
}

pub fn division_narrow(
    l: &Decimal,
    r: &Decimal,
    result: &mut Decimal,
    checked: bool,
) -> Result<(), DecimalError> {
    let (lv, rv) = (l.value as i64, r.value as i64);
    debug_assert!(rv != 0);
    if checked && lv == i64::MIN && rv == -1 {
        return Err(DecimalError::Overflow("division produces an overflow"));
    }

    let adj = result.scale - (l.scale - r.scale);
    let v = if adj >= 0 {
        let num = mul_i64(
            lv,
            scale_multiplier(adj) as i64,
            checked,
            "scale multiplication produces an overflow",
        )?;
        signed_round_div_i64(num, rv)
    } else {
        let den = mul_i64(
            rv,
            scale_multiplier(-adj) as i64,
            checked,
            "scale multiplication produces an overflow",
        )?;
        signed_round_div_i64(lv, den)
    };
    result.value = v as i128;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: i128, scale: i32) -> Decimal {
        Decimal::new(value, scale, 38)
    }

    fn narrow(value: i128, scale: i32) -> Decimal {
        Decimal::new(value, scale, 9)
    }

    #[test]
    fn addition_aligns_scales_to_result() {
        // 1.5 + 2.25 at result scale 2 -> 3.75
        let mut out = dec(0, 2);
        addition(&dec(15, 1), &dec(225, 2), &mut out, true).unwrap();
        assert_eq!(out.value, 375);
    }

    #[test]
    fn downscale_rounds_half_away_from_zero() {
        // 0.25 + 0 at result scale 1 -> 0.3; -0.25 -> -0.3
        let mut out = dec(0, 1);
        addition(&dec(25, 2), &dec(0, 1), &mut out, true).unwrap();
        assert_eq!(out.value, 3);
        addition(&dec(-25, 2), &dec(0, 1), &mut out, true).unwrap();
        assert_eq!(out.value, -3);
    }

    #[test]
    fn multiplication_scales_down_excess() {
        // 1.25 * 2.4 = 3.000 at result scale 2 -> 3.00
        let mut out = dec(0, 2);
        multiplication(&dec(125, 2), &dec(24, 1), &mut out, true).unwrap();
        assert_eq!(out.value, 300);
    }

    #[test]
    fn division_adjusts_quotient_scale() {
        // 10.00 / 4.0 at result scale 2 -> 2.50
        let mut out = dec(0, 2);
        division(&dec(1000, 2), &dec(40, 1), &mut out, true).unwrap();
        assert_eq!(out.value, 250);

        // 1 / 3 at result scale 4 -> 0.3333
        let mut out = dec(0, 4);
        division(&dec(1, 0), &dec(3, 0), &mut out, true).unwrap();
        assert_eq!(out.value, 3333);
    }

    #[test]
    fn division_rounds_negative_quotients_away_from_zero() {
        // -1 / 3 at scale 2 -> -0.33; -1 / 2 at scale 0 -> -1 (0.5 rounds away)
        let mut out = dec(0, 2);
        division(&dec(-1, 0), &dec(3, 0), &mut out, true).unwrap();
        assert_eq!(out.value, -33);

        let mut out = dec(0, 0);
        division(&dec(-1, 0), &dec(2, 0), &mut out, true).unwrap();
        assert_eq!(out.value, -1);
    }

    #[test]
    fn checked_multiplication_reports_overflow_unchecked_wraps() {
        let big = dec(i128::MAX / 2, 0);
        let mut out = dec(0, 0);
        assert!(multiplication(&big, &dec(3, 0), &mut out, true).is_err());
        assert!(multiplication(&big, &dec(3, 0), &mut out, false).is_ok());
    }

    #[test]
    fn narrow_ops_work_in_the_i64_domain() {
        let mut out = narrow(0, 2);
        addition_narrow(&narrow(150, 2), &narrow(25, 2), &mut out, true).unwrap();
        assert_eq!(out.value, 175);

        let big = narrow(i64::MAX as i128 / 2, 0);
        let mut out = narrow(0, 0);
        assert!(multiplication_narrow(&big, &narrow(3, 0), &mut out, true).is_err());
        assert!(multiplication_narrow(&big, &narrow(3, 0), &mut out, false).is_ok());
    }

    #[test]
    fn compare_is_scale_aware() {
        assert_eq!(dec(150, 1).compare(&dec(15, 0)), Ordering::Equal);
        assert_eq!(dec(151, 1).compare(&dec(15, 0)), Ordering::Greater);
        assert_eq!(dec(-151, 1).compare(&dec(-15, 0)), Ordering::Less);
        assert_eq!(dec(105, 2).compare(&dec(15, 1)), Ordering::Less);
    }

    #[test]
    fn display_renders_scale_and_sign() {
        assert_eq!(dec(12345, 2).to_string(), "123.45");
        assert_eq!(dec(-5, 2).to_string(), "-0.05");
        assert_eq!(dec(7, 0).to_string(), "7");
    }
}
