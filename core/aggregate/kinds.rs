//! Accumulator layouts of the aggregate functions.
//!
//! Every kind except [`AggKind::Count`] keeps an 8-byte value followed by
//! an 8-byte count of the rows that reached it; `Count` keeps the count
//! alone. Both halves merge associatively, so partial results can be
//! combined in any order.

use std::cmp::Ordering;

use crate::expr::AggFn;
use crate::ion::{cmpFloatNanFirst, maxFloatNanFirst, minFloatNanFirst, Datum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggKind {
    SumF,
    SumI,
    AvgF,
    AvgI,
    MinF,
    MinI,
    MaxF,
    MaxI,
    MinTs,
    MaxTs,
    AndI,
    OrI,
    XorI,
    AndK,
    OrK,
    Count,
}

fn le64(b: &[u8]) -> u64 {
    let mut x = [0u8; 8];
    x.copy_from_slice(&b[..8]);
    u64::from_le_bytes(x)
}

fn put64(b: &mut [u8], x: u64) {
    b[..8].copy_from_slice(&x.to_le_bytes());
}

fn f64At(b: &[u8]) -> f64 {
    f64::from_bits(le64(b))
}

fn i64At(b: &[u8]) -> i64 {
    le64(b) as i64
}

impl AggKind {
    pub fn of(f: AggFn) -> AggKind {
        match f {
            AggFn::SumInt => AggKind::SumI,
            AggFn::SumFloat => AggKind::SumF,
            AggFn::AvgInt => AggKind::AvgI,
            AggFn::AvgFloat => AggKind::AvgF,
            AggFn::MinInt => AggKind::MinI,
            AggFn::MinFloat => AggKind::MinF,
            AggFn::MaxInt => AggKind::MaxI,
            AggFn::MaxFloat => AggKind::MaxF,
            AggFn::MinTs => AggKind::MinTs,
            AggFn::MaxTs => AggKind::MaxTs,
            AggFn::BitAnd => AggKind::AndI,
            AggFn::BitOr => AggKind::OrI,
            AggFn::BitXor => AggKind::XorI,
            AggFn::BoolAnd => AggKind::AndK,
            AggFn::BoolOr => AggKind::OrK,
            AggFn::Count => AggKind::Count,
        }
    }

    pub fn dataSize(self) -> usize {
        match self {
            AggKind::Count => 8,
            _ => 16,
        }
    }

    pub fn isFloat(self) -> bool {
        matches!(self, AggKind::SumF | AggKind::AvgF | AggKind::MinF | AggKind::MaxF)
    }

    /// Value of the first word before any row is accumulated.
    fn initWord(self) -> u64 {
        match self {
            AggKind::MinF => f64::INFINITY.to_bits(),
            // NaN is the lowest float, so any input replaces it
            AggKind::MaxF => f64::NAN.to_bits(),
            AggKind::MinI | AggKind::MinTs => i64::MAX as u64,
            AggKind::MaxI | AggKind::MaxTs => i64::MIN as u64,
            // boolean AND accumulates all-ones masks
            AggKind::AndI | AggKind::AndK => u64::MAX,
            _ => 0,
        }
    }

    pub fn init(self, dst: &mut [u8]) {
        dst[..self.dataSize()].fill(0);
        put64(dst, self.initWord());
    }

    /// Folds the accumulator `src` into `dst`.
    pub fn merge(self, dst: &mut [u8], src: &[u8]) {
        let (a, b) = (le64(dst), le64(src));
        let v = match self {
            AggKind::SumF | AggKind::AvgF => (f64::from_bits(a) + f64::from_bits(b)).to_bits(),
            AggKind::SumI | AggKind::AvgI | AggKind::Count => a.wrapping_add(b),
            AggKind::MinF => minFloatNanFirst(f64::from_bits(a), f64::from_bits(b)).to_bits(),
            AggKind::MaxF => maxFloatNanFirst(f64::from_bits(a), f64::from_bits(b)).to_bits(),
            AggKind::MinI | AggKind::MinTs => (a as i64).min(b as i64) as u64,
            AggKind::MaxI | AggKind::MaxTs => (a as i64).max(b as i64) as u64,
            AggKind::AndI | AggKind::AndK => a & b,
            AggKind::OrI | AggKind::OrK => a | b,
            AggKind::XorI => a ^ b,
        };
        put64(dst, v);
        if self != AggKind::Count {
            let n = le64(&dst[8..]).wrapping_add(le64(&src[8..]));
            put64(&mut dst[8..], n);
        }
    }

    /// Number of rows folded into `data`.
    pub fn count(self, data: &[u8]) -> u64 {
        match self {
            AggKind::Count => le64(data),
            _ => le64(&data[8..]),
        }
    }

    /// Ordering of two accumulators of this kind.
    ///
    /// Floats sort NaN first. Averages with no rows sort after every
    /// average that has one.
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            AggKind::AvgF | AggKind::AvgI => {
                let (na, nb) = (self.count(a), self.count(b));
                match (na, nb) {
                    (0, 0) => return Ordering::Equal,
                    (0, _) => return Ordering::Greater,
                    (_, 0) => return Ordering::Less,
                    _ => {}
                }
                if self == AggKind::AvgF {
                    cmpFloatNanFirst(f64At(a) / na as f64, f64At(b) / nb as f64)
                } else {
                    (i64At(a) / na as i64).cmp(&(i64At(b) / nb as i64))
                }
            }
            AggKind::SumF | AggKind::MinF | AggKind::MaxF => cmpFloatNanFirst(f64At(a), f64At(b)),
            AggKind::Count => le64(a).cmp(&le64(b)),
            _ => i64At(a).cmp(&i64At(b)),
        }
    }

    /// Final value of the accumulator; NULL when no row reached it.
    pub fn write(self, data: &[u8]) -> Datum {
        let n = self.count(data);
        if self == AggKind::Count {
            return Datum::Int(n as i64);
        }
        if n == 0 {
            return Datum::Null;
        }
        match self {
            AggKind::SumF | AggKind::MinF | AggKind::MaxF => Datum::Float(f64At(data)),
            AggKind::AvgF => Datum::Float(f64At(data) / n as f64),
            AggKind::AvgI => Datum::Int(i64At(data) / n as i64),
            AggKind::MinTs | AggKind::MaxTs => Datum::Timestamp(i64At(data)),
            AggKind::AndK | AggKind::OrK => Datum::Bool(le64(data) != 0),
            _ => Datum::Int(i64At(data)),
        }
    }
}

/// Byte offset of each accumulator in a region holding all of `kinds`.
pub fn offsets(kinds: &[AggKind]) -> Vec<usize> {
    let mut off = 0;
    kinds
        .iter()
        .map(|k| {
            let o = off;
            off += k.dataSize();
            o
        })
        .collect()
}

/// Freshly initialized region for `kinds`.
pub fn initialData(kinds: &[AggKind]) -> Vec<u8> {
    let size = kinds.iter().map(|k| k.dataSize()).sum();
    let mut out = vec![0u8; size];
    for (k, off) in kinds.iter().zip(offsets(kinds)) {
        k.init(&mut out[off..]);
    }
    out
}

pub fn mergeAll(kinds: &[AggKind], dst: &mut [u8], src: &[u8]) {
    for (k, off) in kinds.iter().zip(offsets(kinds)) {
        k.merge(&mut dst[off..], &src[off..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(kind: AggKind, v: u64, n: u64) -> Vec<u8> {
        let mut b = vec![0u8; 16];
        put64(&mut b, v);
        put64(&mut b[8..], n);
        b.truncate(kind.dataSize());
        b
    }

    #[test]
    fn test_init() {
        let kinds = [AggKind::MinI, AggKind::MaxF, AggKind::AndK, AggKind::Count];
        let data = initialData(&kinds);
        assert_eq!(data.len(), 16 * 3 + 8);
        assert_eq!(i64At(&data), i64::MAX);
        assert!(f64At(&data[16..]).is_nan());
        assert_eq!(le64(&data[32..]), u64::MAX);
        assert_eq!(le64(&data[48..]), 0);
        for (k, off) in kinds.iter().zip(offsets(&kinds)) {
            assert_eq!(k.write(&data[off..]), if *k == AggKind::Count { Datum::Int(0) } else { Datum::Null });
        }
    }

    #[test]
    fn test_avg_empty_sorts_last() {
        let empty = acc(AggKind::AvgI, 999, 0);
        let some = acc(AggKind::AvgI, (-50i64) as u64, 5);
        assert_eq!(AggKind::AvgI.compare(&empty, &some), Ordering::Greater);
        assert_eq!(AggKind::AvgI.compare(&some, &empty), Ordering::Less);
        assert_eq!(AggKind::AvgI.compare(&empty, &empty), Ordering::Equal);
        let emptyF = acc(AggKind::AvgF, f64::NEG_INFINITY.to_bits(), 0);
        let someF = acc(AggKind::AvgF, 1e300f64.to_bits(), 1);
        assert_eq!(AggKind::AvgF.compare(&emptyF, &someF), Ordering::Greater);
    }

    #[test]
    fn test_nan_sorts_first() {
        let nan = acc(AggKind::MaxF, f64::NAN.to_bits(), 1);
        let low = acc(AggKind::MaxF, f64::NEG_INFINITY.to_bits(), 1);
        assert_eq!(AggKind::MaxF.compare(&nan, &low), Ordering::Less);
        assert_eq!(AggKind::MaxF.compare(&nan, &nan), Ordering::Equal);
    }

    #[test]
    fn test_nan_min_max_follow_ordering() {
        let nan = f64::NAN.to_bits();
        // min: a NaN anywhere makes the result NaN
        let mut min = acc(AggKind::MinF, f64::INFINITY.to_bits(), 0);
        AggKind::MinF.merge(&mut min, &acc(AggKind::MinF, 3f64.to_bits(), 1));
        AggKind::MinF.merge(&mut min, &acc(AggKind::MinF, nan, 1));
        assert!(f64At(&min).is_nan());
        assert_eq!(AggKind::MinF.count(&min), 2);

        // max: numbers beat NaN, and a group of NaN stays NaN
        let mut max = initialData(&[AggKind::MaxF]);
        AggKind::MaxF.merge(&mut max, &acc(AggKind::MaxF, nan, 2));
        assert!(matches!(AggKind::MaxF.write(&max), Datum::Float(x) if x.is_nan()));
        AggKind::MaxF.merge(&mut max, &acc(AggKind::MaxF, (-7f64).to_bits(), 1));
        assert_eq!(AggKind::MaxF.write(&max), Datum::Float(-7.0));
    }

    #[test]
    fn test_merge_commutes() {
        let cases = [
            (AggKind::SumI, acc(AggKind::SumI, 5, 2), acc(AggKind::SumI, (-9i64) as u64, 3)),
            (AggKind::MinTs, acc(AggKind::MinTs, 100, 1), acc(AggKind::MinTs, 50, 4)),
            (AggKind::XorI, acc(AggKind::XorI, 0b1010, 1), acc(AggKind::XorI, 0b0110, 1)),
            (AggKind::Count, acc(AggKind::Count, 7, 0), acc(AggKind::Count, 8, 0)),
            (AggKind::AvgF, acc(AggKind::AvgF, 1.5f64.to_bits(), 1), acc(AggKind::AvgF, 2.25f64.to_bits(), 2)),
        ];
        for (kind, a, b) in cases {
            let mut ab = a.clone();
            kind.merge(&mut ab, &b);
            let mut ba = b.clone();
            kind.merge(&mut ba, &a);
            assert_eq!(ab, ba, "{:?}", kind);
        }
    }

    #[test]
    fn test_write() {
        assert_eq!(AggKind::AvgI.write(&acc(AggKind::AvgI, 10, 4)), Datum::Int(2));
        assert_eq!(AggKind::AvgF.write(&acc(AggKind::AvgF, 10f64.to_bits(), 4)), Datum::Float(2.5));
        assert_eq!(AggKind::OrK.write(&acc(AggKind::OrK, 0, 3)), Datum::Bool(false));
        assert_eq!(AggKind::MaxTs.write(&acc(AggKind::MaxTs, 1234, 1)), Datum::Timestamp(1234));
        assert_eq!(AggKind::Count.write(&acc(AggKind::Count, 3, 0)), Datum::Int(3));
    }
}
