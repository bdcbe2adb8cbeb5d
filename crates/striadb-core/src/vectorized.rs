//! Vectorized arithmetic over integer lane batches.
//!
//! This module provides the batch counterpart of the scalar execute paths:
//! operands are processed in fixed lane groups sized to a 128-bit vector
//! (8 x 16-bit, 4 x 32-bit, 2 x 64-bit) so the inner loops compile down to
//! vector instructions. Division tests every divisor lane and turns a zero
//! divisor into a null-marked zero lane, the same outcome the scalar path
//! produces one row at a time. Floating-point batches are reserved and not
//! yet enabled; callers route those through the scalar evaluator.

use crate::arithmetic::invalid_arith;
use crate::node::ExprError;
use crate::operators::OpType;
use crate::types::DataType;

/// Element type usable in the lane kernels. `LANES` is how many elements of
/// this width fit one 128-bit vector.
pub trait LaneOps: Copy + Default {
    const LANES: usize;

    fn lane_add(self, rhs: Self) -> Self;
    fn lane_sub(self, rhs: Self) -> Self;
    fn lane_mul(self, rhs: Self) -> Self;
    /// Divide; the caller has already excluded a zero `rhs`.
    fn lane_div(self, rhs: Self) -> Self;
    fn is_zero(self) -> bool;
}

macro_rules! impl_signed_lanes {
    ($($t:ty => $lanes:expr),* $(,)?) => {
        $(
            impl LaneOps for $t {
                const LANES: usize = $lanes;

                #[inline]
                fn lane_add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                #[inline]
                fn lane_sub(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }

                #[inline]
                fn lane_mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }

                #[inline]
                fn lane_div(self, rhs: Self) -> Self {
                    self.wrapping_div(rhs)
                }

                #[inline]
                fn is_zero(self) -> bool {
                    self == 0
                }
            }
        )*
    };
}

macro_rules! impl_unsigned_lanes {
    ($($t:ty => $lanes:expr),* $(,)?) => {
        $(
            impl LaneOps for $t {
                const LANES: usize = $lanes;

                #[inline]
                fn lane_add(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                #[inline]
                fn lane_sub(self, rhs: Self) -> Self {
                    self.wrapping_sub(rhs)
                }

                #[inline]
                fn lane_mul(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }

                #[inline]
                fn lane_div(self, rhs: Self) -> Self {
                    self / rhs
                }

                #[inline]
                fn is_zero(self) -> bool {
                    self == 0
                }
            }
        )*
    };
}

impl_signed_lanes! {
    i16 => 8,
    i32 => 4,
    i64 => 2,
}

impl_unsigned_lanes! {
    u16 => 8,
    u32 => 4,
    u64 => 2,
}

/// Whether a column family routes to the lane kernels. Floating point and
/// decimal stay on the scalar paths.
pub fn simd_enabled(t: DataType) -> bool {
    t.is_signed_integer() || t.is_unsigned_integer()
}

/// Run one arithmetic operator across equal-length operand batches. `out`
/// receives every lane; `nulls` is set per lane only by a zero divisor, so a
/// caller can overlay it onto an existing null mask.
pub fn execute_simd<T: LaneOps>(
    op: OpType,
    lhs: &[T],
    rhs: &[T],
    out: &mut [T],
    nulls: &mut [bool],
) -> Result<(), ExprError> {
    debug_assert_eq!(lhs.len(), rhs.len(), "operand batches must match");
    debug_assert_eq!(lhs.len(), out.len(), "output batch must match");
    debug_assert_eq!(lhs.len(), nulls.len(), "null mask must match");

    match op {
        OpType::Add => map_lanes(lhs, rhs, out, T::lane_add),
        OpType::Sub => map_lanes(lhs, rhs, out, T::lane_sub),
        OpType::Mul => map_lanes(lhs, rhs, out, T::lane_mul),
        OpType::Div => div_lanes(lhs, rhs, out, nulls),
        other => return Err(invalid_arith(other)),
    }
    Ok(())
}

#[inline]
fn map_lanes<T: LaneOps>(a: &[T], b: &[T], out: &mut [T], f: impl Fn(T, T) -> T) {
    let lanes = T::LANES;
    let groups = a.len() / lanes;

    // Full lane groups first, then the tail.
    for g in 0..groups {
        let base = g * lanes;
        for i in 0..lanes {
            out[base + i] = f(a[base + i], b[base + i]);
        }
    }
    for i in (groups * lanes)..a.len() {
        out[i] = f(a[i], b[i]);
    }
}

#[inline]
fn div_lanes<T: LaneOps>(a: &[T], b: &[T], out: &mut [T], nulls: &mut [bool]) {
    let lanes = T::LANES;
    let groups = a.len() / lanes;

    for g in 0..groups {
        let base = g * lanes;
        for i in 0..lanes {
            let idx = base + i;
            if b[idx].is_zero() {
                out[idx] = T::default();
                nulls[idx] = true;
            } else {
                out[idx] = a[idx].lane_div(b[idx]);
            }
        }
    }
    for idx in (groups * lanes)..a.len() {
        if b[idx].is_zero() {
            out[idx] = T::default();
            nulls[idx] = true;
        } else {
            out[idx] = a[idx].lane_div(b[idx]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_covers_full_groups_and_the_tail() {
        // 11 elements: one full group of 8 plus a 3-lane tail for i16.
        let lhs: Vec<i16> = (0..11).collect();
        let rhs: Vec<i16> = (0..11).map(|v| v * 10).collect();
        let mut out = vec![0i16; 11];
        let mut nulls = vec![false; 11];

        execute_simd(OpType::Add, &lhs, &rhs, &mut out, &mut nulls).unwrap();
        for i in 0..11 {
            assert_eq!(out[i], (i as i16) * 11);
        }
        assert!(nulls.iter().all(|n| !n));
    }

    #[test]
    fn mul_wraps_on_overflow_like_the_scalar_path() {
        let lhs = vec![i16::MAX, 100, -3];
        let rhs = vec![2i16, 400, 7];
        let mut out = vec![0i16; 3];
        let mut nulls = vec![false; 3];

        execute_simd(OpType::Mul, &lhs, &rhs, &mut out, &mut nulls).unwrap();
        assert_eq!(out[0], i16::MAX.wrapping_mul(2));
        assert_eq!(out[1], 100i16.wrapping_mul(400));
        assert_eq!(out[2], -21);
    }

    #[test]
    fn div_nulls_exactly_the_zero_divisor_lanes() {
        let lhs: Vec<i64> = vec![10, 20, 30, 40, 55];
        let rhs: Vec<i64> = vec![2, 0, 3, 0, 5];
        let mut out = vec![99i64; 5];
        let mut nulls = vec![false; 5];

        execute_simd(OpType::Div, &lhs, &rhs, &mut out, &mut nulls).unwrap();
        assert_eq!(out, vec![5, 0, 10, 0, 11]);
        assert_eq!(nulls, vec![false, true, false, true, false]);
    }

    #[test]
    fn unsigned_div_handles_zero_divisors_too() {
        let lhs: Vec<u32> = vec![8, 9, 10, 11, 12, 13];
        let rhs: Vec<u32> = vec![4, 3, 0, 1, 0, 13];
        let mut out = vec![0u32; 6];
        let mut nulls = vec![false; 6];

        execute_simd(OpType::Div, &lhs, &rhs, &mut out, &mut nulls).unwrap();
        assert_eq!(out, vec![2, 3, 0, 11, 0, 1]);
        assert_eq!(nulls, vec![false, false, true, false, true, false]);
    }

    #[test]
    fn signed_min_over_minus_one_wraps() {
        let lhs = vec![i64::MIN];
        let rhs = vec![-1i64];
        let mut out = vec![0i64; 1];
        let mut nulls = vec![false; 1];

        execute_simd(OpType::Div, &lhs, &rhs, &mut out, &mut nulls).unwrap();
        assert_eq!(out[0], i64::MIN);
        assert!(!nulls[0]);
    }

    #[test]
    fn comparison_operators_are_rejected() {
        let lhs = vec![1i32];
        let rhs = vec![2i32];
        let mut out = vec![0i32; 1];
        let mut nulls = vec![false; 1];

        let err = execute_simd(OpType::Eq, &lhs, &rhs, &mut out, &mut nulls).unwrap_err();
        assert!(matches!(err, ExprError::InvalidOperation(_)));
    }

    #[test]
    fn lane_kernels_cover_integer_families_only() {
        assert!(simd_enabled(DataType::Int16));
        assert!(simd_enabled(DataType::Int32));
        assert!(simd_enabled(DataType::Int64));
        assert!(simd_enabled(DataType::UInt64));
        assert!(!simd_enabled(DataType::Float64));
        assert!(!simd_enabled(DataType::Float32));
        assert!(!simd_enabled(DataType::LongDouble));
        assert!(!simd_enabled(DataType::Decimal));
        assert!(!simd_enabled(DataType::Varchar));
    }
}
