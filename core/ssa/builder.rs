//! Lowering of expressions into SSA.
//!
//! Values produced here carry one of a few shapes: a bare mask (K), a boxed
//! value with its mask (V|K), or an unpacked scalar (int, float, string,
//! timestamp) whose defined lanes are given by [`Prog::mask`].

use super::defs::*;
use super::{Imm, Prog, ValueId, INIT};
use crate::expr::{AggFn, ArithOp, CmpOp, Expr, MathFn, PathComponent, StringMatch, Timepart, TrimType};
use crate::ion::Datum;

/// `IN` lists longer than this are tested through a hash set.
const IN_HASH_THRESHOLD: usize = 3;

fn isNumber(d: &Datum) -> bool {
    matches!(d, Datum::Int(_) | Datum::Float(_))
}

/// Literals whose encoding depends on the symbol table.
fn needsSymtab(d: &Datum) -> bool {
    match d {
        Datum::Symbol(_) | Datum::Struct(_) => true,
        Datum::List(items) => items.iter().any(needsSymtab),
        _ => false,
    }
}

fn cmpOpFor(op: CmpOp, t: SsaType) -> Option<SsaOp> {
    use SsaOp::*;
    let o = match (op, t) {
        (CmpOp::Eq, ST_INT) => CmpEqI,
        (CmpOp::Lt, ST_INT) => CmpLtI,
        (CmpOp::Le, ST_INT) => CmpLeI,
        (CmpOp::Gt, ST_INT) => CmpGtI,
        (CmpOp::Ge, ST_INT) => CmpGeI,
        (CmpOp::Eq, ST_FLOAT) => CmpEqF,
        (CmpOp::Lt, ST_FLOAT) => CmpLtF,
        (CmpOp::Le, ST_FLOAT) => CmpLeF,
        (CmpOp::Gt, ST_FLOAT) => CmpGtF,
        (CmpOp::Ge, ST_FLOAT) => CmpGeF,
        (CmpOp::Eq, ST_TIME) => CmpEqTime,
        (CmpOp::Lt, ST_TIME) => CmpLtTime,
        (CmpOp::Le, ST_TIME) => CmpLeTime,
        (CmpOp::Gt, ST_TIME) => CmpGtTime,
        (CmpOp::Ge, ST_TIME) => CmpGeTime,
        (CmpOp::Eq, ST_STRING) => CmpEqStr,
        _ => return None,
    };
    Some(o)
}

fn cmpImmOpFor(op: CmpOp, float: bool) -> Option<SsaOp> {
    use SsaOp::*;
    let o = match (op, float) {
        (CmpOp::Eq, false) => CmpEqImmI,
        (CmpOp::Lt, false) => CmpLtImmI,
        (CmpOp::Le, false) => CmpLeImmI,
        (CmpOp::Gt, false) => CmpGtImmI,
        (CmpOp::Ge, false) => CmpGeImmI,
        (CmpOp::Eq, true) => CmpEqImmF,
        (CmpOp::Lt, true) => CmpLtImmF,
        (CmpOp::Le, true) => CmpLeImmF,
        (CmpOp::Gt, true) => CmpGtImmF,
        (CmpOp::Ge, true) => CmpGeImmF,
        _ => return None,
    };
    Some(o)
}

/// (two-register op, immediate op, reversed immediate op)
fn arithOps(op: ArithOp, float: bool) -> (SsaOp, SsaOp, Option<SsaOp>) {
    use SsaOp::*;
    match (op, float) {
        (ArithOp::Add, false) => (AddI, AddImmI, None),
        (ArithOp::Add, true) => (AddF, AddImmF, None),
        (ArithOp::Sub, false) => (SubI, SubImmI, Some(RSubImmI)),
        (ArithOp::Sub, true) => (SubF, SubImmF, Some(RSubImmF)),
        (ArithOp::Mul, false) => (MulI, MulImmI, None),
        (ArithOp::Mul, true) => (MulF, MulImmF, None),
        (ArithOp::Div, false) => (DivI, DivImmI, Some(RDivImmI)),
        (ArithOp::Div, true) => (DivF, DivImmF, Some(RDivImmF)),
        (ArithOp::Mod, false) => (ModI, ModImmI, Some(RModImmI)),
        (ArithOp::Mod, true) => (ModF, ModImmF, Some(RModImmF)),
        (ArithOp::Min, false) => (MinValueI, MinValueImmI, None),
        (ArithOp::Min, true) => (MinValueF, MinValueImmF, None),
        (ArithOp::Max, false) => (MaxValueI, MaxValueImmI, None),
        (ArithOp::Max, true) => (MaxValueF, MaxValueImmF, None),
    }
}

fn foldArith(op: ArithOp, a: &Datum, b: &Datum) -> Option<Datum> {
    match (a, b) {
        (Datum::Int(x), Datum::Int(y)) => {
            let r = match op {
                ArithOp::Add => x.wrapping_add(*y),
                ArithOp::Sub => x.wrapping_sub(*y),
                ArithOp::Mul => x.wrapping_mul(*y),
                ArithOp::Div => x.checked_div(*y)?,
                ArithOp::Mod => x.checked_rem(*y)?,
                ArithOp::Min => *x.min(y),
                ArithOp::Max => *x.max(y),
            };
            Some(Datum::Int(r))
        }
        _ => {
            let x = match a {
                Datum::Int(i) => *i as f64,
                Datum::Float(f) => *f,
                _ => return None,
            };
            let y = match b {
                Datum::Int(i) => *i as f64,
                Datum::Float(f) => *f,
                _ => return None,
            };
            let r = match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
                ArithOp::Mod => x % y,
                ArithOp::Min => x.min(y),
                ArithOp::Max => x.max(y),
            };
            Some(Datum::Float(r))
        }
    }
}

impl Prog {
    /// Type of `v` with the mask bit dropped, unless `v` is only a mask.
    pub fn primary(&self, v: ValueId) -> SsaType {
        let t = self.ret(v);
        if t == ST_BOOL {
            return t;
        }
        if t & ST_VALUE != 0 {
            return ST_VALUE;
        }
        t & !ST_BOOL
    }

    pub fn and(&mut self, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[a, b]) {
            return bad;
        }
        if a == b {
            return a;
        }
        if self.op(a) == SsaOp::KFalse || self.op(b) == SsaOp::KFalse {
            return self.kfalse();
        }
        if a == INIT {
            return b;
        }
        if b == INIT {
            return a;
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        self.ssa2(SsaOp::And, a, b)
    }

    pub fn or(&mut self, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[a, b]) {
            return bad;
        }
        if a == b {
            return a;
        }
        if self.op(a) == SsaOp::KFalse {
            return b;
        }
        if self.op(b) == SsaOp::KFalse {
            return a;
        }
        if a == INIT || b == INIT {
            return INIT;
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        self.ssa2(SsaOp::Or, a, b)
    }

    /// Lane-wise XOR of two masks; MISSING reads as FALSE.
    pub fn xor(&mut self, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[a, b]) {
            return bad;
        }
        if a == b {
            return self.kfalse();
        }
        if self.op(a) == SsaOp::KFalse {
            return b;
        }
        if self.op(b) == SsaOp::KFalse {
            return a;
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        self.ssa2(SsaOp::Xor, a, b)
    }

    /// Lane-wise XNOR of two masks; MISSING reads as FALSE.
    pub fn xnor(&mut self, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[a, b]) {
            return bad;
        }
        if a == b {
            return INIT;
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        self.ssa2(SsaOp::Xnor, a, b)
    }

    /// Three-valued XOR: MISSING wherever either side is MISSING.
    pub fn logicalXor(&mut self, a: ValueId, b: ValueId) -> ValueId {
        // `a XOR a` is FALSE only where `a` is known, so it needs its own node
        let x = if a == b { self.ssa2(SsaOp::Xor, a, b) } else { self.xor(a, b) };
        self.whereKnown(x, a, b)
    }

    /// Three-valued XNOR, which is also boolean equality.
    pub fn logicalXnor(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let x = if a == b { self.ssa2(SsaOp::Xnor, a, b) } else { self.xnor(a, b) };
        self.whereKnown(x, a, b)
    }

    /// Restricts `x` to the lanes where both `a` and `b` are TRUE or FALSE.
    fn whereKnown(&mut self, x: ValueId, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[x, a, b]) {
            return bad;
        }
        let na = self.notMissing(a);
        let nb = self.notMissing(b);
        let known = self.and(na, nb);
        let out = self.and(x, known);
        if out != known {
            self.setNotMissing(out, known);
        }
        out
    }

    /// `(NOT a) AND b`
    pub fn nand(&mut self, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[a, b]) {
            return bad;
        }
        if a == b || a == INIT || self.op(b) == SsaOp::KFalse {
            return self.kfalse();
        }
        if self.op(a) == SsaOp::KFalse {
            return b;
        }
        self.ssa2(SsaOp::Nand, a, b)
    }

    /// Three-valued NOT: MISSING stays MISSING.
    pub fn not(&mut self, v: ValueId) -> ValueId {
        let nm = self.notMissing(v);
        let out = self.nand(v, nm);
        self.setNotMissing(out, nm);
        out
    }

    /// Field `name` of the struct held in `base`.
    pub fn dot(&mut self, name: &str, base: ValueId) -> ValueId {
        let k = self.mask(base);
        self.ssa2imm(SsaOp::Dot, base, k, Imm::Str(name.to_string()))
    }

    /// Struct base of a boxed value; lanes that are not structs drop out.
    pub fn tuples(&mut self, v: ValueId) -> ValueId {
        let k = self.mask(v);
        self.ssa2(SsaOp::Tuples, v, k)
    }

    pub fn literal(&mut self, d: Datum) -> ValueId {
        if needsSymtab(&d) {
            self.markLiterals();
        }
        self.ssa1imm(SsaOp::Literal, INIT, Imm::Datum(d))
    }

    pub fn coerceInt(&mut self, v: ValueId) -> ValueId {
        if self.isInvalid(v) {
            return v;
        }
        let k = self.mask(v);
        match self.primary(v) {
            ST_INT => v,
            ST_VALUE => self.ssa2(SsaOp::ToInt, v, k),
            ST_FLOAT => self.ssa2(SsaOp::FloatToInt, v, k),
            ST_BOOL => {
                let nm = self.notMissing(v);
                self.ssa2(SsaOp::BoolToInt, v, nm)
            }
            t => self.errorf(format!("cannot use {} as an integer", typeChars(t))),
        }
    }

    /// Numbers of either representation as floats.
    pub fn coerceFloat(&mut self, v: ValueId) -> ValueId {
        if self.isInvalid(v) {
            return v;
        }
        let k = self.mask(v);
        match self.primary(v) {
            ST_FLOAT => v,
            ST_INT => self.ssa2(SsaOp::IntToFloat, v, k),
            ST_VALUE => {
                let f = self.ssa2(SsaOp::ToFloat, v, k);
                let i = self.ssa2(SsaOp::ToInt, v, k);
                let fi = self.ssa2(SsaOp::IntToFloat, i, i);
                let out = self.ssa3(SsaOp::BlendFloat, f, fi, i);
                let m = self.or(f, i);
                self.setNotMissing(out, m);
                out
            }
            ST_BOOL => {
                let nm = self.notMissing(v);
                self.ssa2(SsaOp::BoolToFloat, v, nm)
            }
            t => self.errorf(format!("cannot use {} as a number", typeChars(t))),
        }
    }

    pub fn coerceTime(&mut self, v: ValueId) -> ValueId {
        if self.isInvalid(v) {
            return v;
        }
        let k = self.mask(v);
        match self.primary(v) {
            ST_TIME => v,
            ST_VALUE => self.ssa2(SsaOp::ToTime, v, k),
            t => self.errorf(format!("cannot use {} as a timestamp", typeChars(t))),
        }
    }

    pub fn coerceStr(&mut self, v: ValueId) -> ValueId {
        if self.isInvalid(v) {
            return v;
        }
        let k = self.mask(v);
        match self.primary(v) {
            ST_STRING => v,
            ST_VALUE => self.ssa2(SsaOp::ToStr, v, k),
            t => self.errorf(format!("cannot use {} as a string", typeChars(t))),
        }
    }

    /// Boolean truth of `v`; non-boolean lanes are MISSING.
    pub fn toBool(&mut self, v: ValueId) -> ValueId {
        if self.isInvalid(v) {
            return v;
        }
        match self.primary(v) {
            ST_BOOL => v,
            ST_VALUE => {
                let k = self.mask(v);
                self.ssa2(SsaOp::IsTrue, v, k)
            }
            t => self.errorf(format!("cannot use {} as a boolean", typeChars(t))),
        }
    }

    /// Boxes `v` so it can be returned or stored.
    pub fn toValue(&mut self, v: ValueId) -> ValueId {
        if self.isInvalid(v) {
            return v;
        }
        let t = self.primary(v);
        if t == ST_VALUE {
            return v;
        }
        let k = self.mask(v);
        match t {
            ST_BOOL => {
                let nm = self.notMissing(v);
                self.ssa2(SsaOp::BoxMask, v, nm)
            }
            ST_INT => self.ssa2(SsaOp::BoxInt, v, k),
            ST_FLOAT => self.ssa2(SsaOp::BoxFloat, v, k),
            ST_STRING => self.ssa2(SsaOp::BoxString, v, k),
            ST_TIME => self.ssa2(SsaOp::BoxTs, v, k),
            t => self.errorf(format!("cannot box {}", typeChars(t))),
        }
    }

    /// Compares `v` against a constant.
    pub fn compareLiteral(&mut self, op: CmpOp, v: ValueId, lit: &Datum) -> ValueId {
        if self.isInvalid(v) {
            return v;
        }
        if op == CmpOp::Ne {
            let eq = self.compareLiteral(CmpOp::Eq, v, lit);
            return self.not(eq);
        }
        let t = self.primary(v);
        match (lit, t) {
            (Datum::Null, _) => self.kfalse(),
            (Datum::Int(_) | Datum::Float(_), ST_VALUE) => {
                // ints and floats are compared in their own representation
                let k = self.mask(v);
                let i = self.ssa2(SsaOp::ToInt, v, k);
                let f = self.ssa2(SsaOp::ToFloat, v, k);
                let ci = match lit {
                    Datum::Int(x) => self.cmpImm(op, i, Imm::I64(*x)),
                    Datum::Float(x) => {
                        let fi = self.ssa2(SsaOp::IntToFloat, i, i);
                        self.cmpImm(op, fi, Imm::F64(*x))
                    }
                    _ => unreachable!(),
                };
                let litf = match lit {
                    Datum::Int(x) => *x as f64,
                    Datum::Float(x) => *x,
                    _ => unreachable!(),
                };
                let cf = self.cmpImm(op, f, Imm::F64(litf));
                let out = self.or(ci, cf);
                let known = self.or(i, f);
                self.setNotMissing(out, known);
                out
            }
            (Datum::Int(x), ST_INT) => self.cmpImm(op, v, Imm::I64(*x)),
            (Datum::Int(x), ST_FLOAT) => self.cmpImm(op, v, Imm::F64(*x as f64)),
            (Datum::Float(x), ST_FLOAT) => self.cmpImm(op, v, Imm::F64(*x)),
            (Datum::Float(x), ST_INT) => {
                let f = self.coerceFloat(v);
                self.cmpImm(op, f, Imm::F64(*x))
            }
            (Datum::Int(_) | Datum::Float(_), ST_BOOL) => {
                let i = self.coerceInt(v);
                self.compareLiteral(op, i, lit)
            }
            (Datum::String(s), ST_VALUE | ST_STRING) if op == CmpOp::Eq => {
                let s = s.clone();
                self.stringMatch(StringMatch::Equals, false, v, &s)
            }
            (Datum::Bool(b), ST_VALUE) if op == CmpOp::Eq => {
                let k = self.mask(v);
                let which = if *b { SsaOp::IsTrue } else { SsaOp::IsFalse };
                let out = self.ssa2(which, v, k);
                let t = self.ssa2(SsaOp::IsTrue, v, k);
                let f = self.ssa2(SsaOp::IsFalse, v, k);
                let known = self.or(t, f);
                self.setNotMissing(out, known);
                out
            }
            (Datum::Bool(b), ST_BOOL) if op == CmpOp::Eq => {
                if *b {
                    v
                } else {
                    self.not(v)
                }
            }
            (Datum::Timestamp(ts), ST_VALUE | ST_TIME) => {
                let t = self.coerceTime(v);
                let k = self.mask(t);
                let c = self.ssa1imm(SsaOp::BroadcastTs, k, Imm::I64(*ts));
                self.compareTyped(op, t, c)
            }
            (d, ST_VALUE) if op == CmpOp::Eq => {
                if needsSymtab(d) {
                    self.markLiterals();
                }
                let k = self.mask(v);
                self.ssa2imm(SsaOp::EqualConst, v, k, Imm::Datum(d.clone()))
            }
            (d, t) => self.errorf(format!("cannot compare {} {} {}", typeChars(t), op, d)),
        }
    }

    fn cmpImm(&mut self, op: CmpOp, v: ValueId, imm: Imm) -> ValueId {
        let float = matches!(imm, Imm::F64(_));
        let Some(sop) = cmpImmOpFor(op, float) else {
            return self.errorf(format!("no immediate comparison for {}", op));
        };
        let k = self.mask(v);
        self.ssa2imm(sop, v, k, imm)
    }

    /// Compares two unpacked scalars of the same type.
    fn compareTyped(&mut self, op: CmpOp, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[a, b]) {
            return bad;
        }
        let t = self.primary(a);
        let Some(sop) = cmpOpFor(op, t) else {
            return self.errorf(format!("cannot compare {} {} {}", typeChars(t), op, typeChars(self.primary(b))));
        };
        let ma = self.mask(a);
        let mb = self.mask(b);
        let k = self.and(ma, mb);
        // canonical operand order improves CSE
        let (sop, a, b) = if a > b { (sop.info().inverse.unwrap_or(sop), b, a) } else { (sop, a, b) };
        self.ssa3(sop, a, b, k)
    }

    /// Compares two computed values.
    pub fn compare(&mut self, op: CmpOp, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[a, b]) {
            return bad;
        }
        if op == CmpOp::Ne {
            let eq = self.compare(CmpOp::Eq, a, b);
            return self.not(eq);
        }
        let (ta, tb) = (self.primary(a), self.primary(b));
        match (ta, tb) {
            (ST_VALUE, ST_VALUE) if op == CmpOp::Eq => {
                let ma = self.mask(a);
                let mb = self.mask(b);
                let k = self.and(ma, mb);
                let (a, b) = if a < b { (a, b) } else { (b, a) };
                self.ssa3(SsaOp::EqualV, a, b, k)
            }
            (x, y) if x == y && x != ST_VALUE && x != ST_BOOL => self.compareTyped(op, a, b),
            (ST_STRING, ST_VALUE) | (ST_VALUE, ST_STRING) => {
                let a = self.coerceStr(a);
                let b = self.coerceStr(b);
                self.compareTyped(op, a, b)
            }
            (ST_TIME, ST_VALUE) | (ST_VALUE, ST_TIME) => {
                let a = self.coerceTime(a);
                let b = self.coerceTime(b);
                self.compareTyped(op, a, b)
            }
            (ST_BOOL, ST_BOOL) if op == CmpOp::Eq => self.logicalXnor(a, b),
            _ => {
                let a = self.coerceFloat(a);
                let b = self.coerceFloat(b);
                self.compareTyped(op, a, b)
            }
        }
    }

    pub fn stringMatch(&mut self, kind: StringMatch, ci: bool, v: ValueId, pattern: &str) -> ValueId {
        let s = self.coerceStr(v);
        let k = self.mask(s);
        let op = match (kind, ci) {
            (StringMatch::Equals, false) => SsaOp::CmpStrEqCs,
            (StringMatch::Equals, true) => SsaOp::CmpStrEqCi,
            (StringMatch::Prefix, false) => SsaOp::ContainsPrefixCs,
            (StringMatch::Prefix, true) => SsaOp::ContainsPrefixCi,
            (StringMatch::Suffix, false) => SsaOp::ContainsSuffixCs,
            (StringMatch::Suffix, true) => SsaOp::ContainsSuffixCi,
            (StringMatch::Contains, false) => SsaOp::ContainsSubstrCs,
            (StringMatch::Contains, true) => SsaOp::ContainsSubstrCi,
            (StringMatch::Like, false) => SsaOp::LikeCs,
            (StringMatch::Like, true) => SsaOp::LikeCi,
        };
        self.ssa2imm(op, s, k, Imm::Str(pattern.to_string()))
    }

    pub fn trim(&mut self, t: TrimType, v: ValueId) -> ValueId {
        let s = self.coerceStr(v);
        let k = self.mask(s);
        let op = match t {
            TrimType::Leading => SsaOp::TrimLeft,
            TrimType::Trailing => SsaOp::TrimRight,
            TrimType::Both => SsaOp::TrimBoth,
        };
        self.ssa2(op, s, k)
    }

    pub fn charLength(&mut self, v: ValueId) -> ValueId {
        let s = self.coerceStr(v);
        let k = self.mask(s);
        self.ssa2(SsaOp::CharLength, s, k)
    }

    pub fn dateAdd(&mut self, part: Timepart, amount: ValueId, ts: ValueId) -> ValueId {
        let t = self.coerceTime(ts);
        let n = self.coerceInt(amount);
        let mt = self.mask(t);
        let mn = self.mask(n);
        let k = self.and(mt, mn);
        self.ssa3imm(SsaOp::DateAdd, t, n, k, Imm::I64(part as i64))
    }

    pub fn dateExtract(&mut self, part: Timepart, ts: ValueId) -> ValueId {
        let t = self.coerceTime(ts);
        let k = self.mask(t);
        self.ssa2imm(SsaOp::DateExtract, t, k, Imm::I64(part as i64))
    }

    pub fn dateTrunc(&mut self, part: Timepart, ts: ValueId) -> ValueId {
        let t = self.coerceTime(ts);
        let k = self.mask(t);
        self.ssa2imm(SsaOp::DateTrunc, t, k, Imm::I64(part as i64))
    }

    fn arithTyped(&mut self, op: ArithOp, a: ValueId, b: ValueId, float: bool) -> ValueId {
        let (two, _, _) = arithOps(op, float);
        if a == b {
            let k = self.mask(a);
            let (mul, two_, zero) = if float {
                (SsaOp::MulImmF, Imm::F64(2.0), Imm::F64(0.0))
            } else {
                (SsaOp::MulImmI, Imm::I64(2), Imm::I64(0))
            };
            match op {
                ArithOp::Add => return self.ssa2imm(mul, a, k, two_),
                ArithOp::Sub => return self.ssa2imm(mul, a, k, zero),
                ArithOp::Min | ArithOp::Max => return a,
                _ => {}
            }
        }
        let ma = self.mask(a);
        let mb = self.mask(b);
        let k = self.and(ma, mb);
        self.ssa3(two, a, b, k)
    }

    fn arithImm(&mut self, op: ArithOp, v: ValueId, lit: &Datum, reversed: bool) -> ValueId {
        let float = self.primary(v) == ST_FLOAT || matches!(lit, Datum::Float(_));
        let v = if float { self.coerceFloat(v) } else { v };
        let imm = match (lit, float) {
            (Datum::Int(i), false) => Imm::I64(*i),
            (Datum::Int(i), true) => Imm::F64(*i as f64),
            (Datum::Float(f), _) => Imm::F64(*f),
            _ => return self.errorf(format!("cannot use {} in arithmetic", lit)),
        };
        let (_, immop, rev) = arithOps(op, float);
        let sop = match (reversed, rev) {
            (false, _) => immop,
            (true, Some(r)) => r,
            (true, None) => immop,
        };
        let k = self.mask(v);
        self.ssa2imm(sop, v, k, imm)
    }

    /// Arithmetic on boxed operands yields a boxed int where every operand
    /// is an int and a boxed float otherwise.
    fn arithValue(&mut self, op: ArithOp, a: ValueId, b: Result<ValueId, &Datum>, reversed: bool) -> ValueId {
        let ai = self.coerceInt(a);
        let af = self.coerceFloat(a);
        let (ri, rf) = match b {
            Ok(b) => {
                let bi = self.coerceInt(b);
                let bf = self.coerceFloat(b);
                let (li, lf, xi, xf) = if reversed { (bi, bf, ai, af) } else { (ai, af, bi, bf) };
                (self.arithTyped(op, li, xi, false), self.arithTyped(op, lf, xf, true))
            }
            Err(lit) => {
                let ri = match lit {
                    Datum::Int(_) => self.arithImm(op, ai, lit, reversed),
                    _ => self.kfalse(),
                };
                (ri, self.arithImm(op, af, lit, reversed))
            }
        };
        let mf = self.mask(rf);
        let bf = self.ssa2(SsaOp::BoxFloat, rf, mf);
        if self.op(ri) == SsaOp::KFalse {
            return bf;
        }
        let mi = self.mask(ri);
        let bi = self.ssa2(SsaOp::BoxInt, ri, mi);
        let out = self.ssa3(SsaOp::BlendV, bf, bi, mi);
        let m = self.or(mf, mi);
        self.setNotMissing(out, m);
        out
    }

    pub fn arith(&mut self, op: ArithOp, a: ValueId, b: ValueId) -> ValueId {
        if let Some(bad) = self.invalidArg(&[a, b]) {
            return bad;
        }
        let (ta, tb) = (self.primary(a), self.primary(b));
        match (ta, tb) {
            (ST_INT, ST_INT) => self.arithTyped(op, a, b, false),
            (ST_VALUE, _) if tb != ST_FLOAT => self.arithValue(op, a, Ok(b), false),
            (_, ST_VALUE) if ta != ST_FLOAT => self.arithValue(op, b, Ok(a), true),
            _ => {
                let a = self.coerceFloat(a);
                let b = self.coerceFloat(b);
                self.arithTyped(op, a, b, true)
            }
        }
    }

    pub fn arithLiteral(&mut self, op: ArithOp, v: ValueId, lit: &Datum, reversed: bool) -> ValueId {
        if self.isInvalid(v) {
            return v;
        }
        match self.primary(v) {
            ST_VALUE if matches!(lit, Datum::Int(_)) => self.arithValue(op, v, Err(lit), reversed),
            ST_VALUE | ST_FLOAT => {
                let f = self.coerceFloat(v);
                self.arithImm(op, f, lit, reversed)
            }
            ST_INT => self.arithImm(op, v, lit, reversed),
            t => self.errorf(format!("cannot use {} in arithmetic", typeChars(t))),
        }
    }

    pub fn math(&mut self, f: MathFn, v: ValueId) -> ValueId {
        use SsaOp::*;
        let int = self.primary(v) == ST_INT;
        let intop = match f {
            MathFn::Abs => Some(AbsI),
            MathFn::Neg => Some(NegI),
            MathFn::Sign => Some(SignI),
            MathFn::Square => Some(SquareI),
            MathFn::Round | MathFn::RoundEven | MathFn::Trunc | MathFn::Floor | MathFn::Ceil => {
                if int {
                    return v;
                }
                None
            }
            _ => None,
        };
        if int {
            if let Some(op) = intop {
                let k = self.mask(v);
                return self.ssa2(op, v, k);
            }
        }
        let op = match f {
            MathFn::Abs => AbsF,
            MathFn::Neg => NegF,
            MathFn::Sign => SignF,
            MathFn::Square => SquareF,
            MathFn::Round => RoundF,
            MathFn::RoundEven => RoundEvenF,
            MathFn::Trunc => TruncF,
            MathFn::Floor => FloorF,
            MathFn::Ceil => CeilF,
            MathFn::Sqrt => SqrtF,
            MathFn::Cbrt => CbrtF,
            MathFn::Exp => ExpF,
            MathFn::Ln => LnF,
            MathFn::Log2 => Log2F,
            MathFn::Log10 => Log10F,
            MathFn::Sin => SinF,
            MathFn::Cos => CosF,
            MathFn::Tan => TanF,
            MathFn::Asin => AsinF,
            MathFn::Acos => AcosF,
            MathFn::Atan => AtanF,
        };
        let x = self.coerceFloat(v);
        let k = self.mask(x);
        self.ssa2(op, x, k)
    }

    pub fn hashValue(&mut self, v: ValueId, k: ValueId) -> ValueId {
        self.ssa2(SsaOp::HashValue, v, k)
    }

    pub fn hashValuePlus(&mut self, h: ValueId, v: ValueId, k: ValueId) -> ValueId {
        self.ssa3(SsaOp::HashValuePlus, h, v, k)
    }

    /// Membership of `v` in a constant set.
    pub fn member(&mut self, v: ValueId, set: &[Datum]) -> ValueId {
        if set.len() <= IN_HASH_THRESHOLD {
            let mut out = self.kfalse();
            let mut known = self.kfalse();
            for d in set {
                let eq = self.compareLiteral(CmpOp::Eq, v, d);
                out = self.or(out, eq);
                let nm = self.notMissing(eq);
                known = self.or(known, nm);
            }
            self.setNotMissing(out, known);
            return out;
        }
        let v = self.toValue(v);
        let k = self.mask(v);
        let h = self.hashValue(v, k);
        let list = Datum::List(set.to_vec());
        if needsSymtab(&list) {
            self.markLiterals();
        }
        self.ssa2imm(SsaOp::HashMember, h, k, Imm::Datum(list))
    }

    /// Value paired with the key equal to `v`, MISSING if none.
    pub fn lookup(&mut self, v: ValueId, pairs: &[(Datum, Datum)]) -> ValueId {
        let v = self.toValue(v);
        let k = self.mask(v);
        let h = self.hashValue(v, k);
        let mut flat = Vec::with_capacity(pairs.len() * 2);
        for (key, val) in pairs {
            flat.push(key.clone());
            flat.push(val.clone());
        }
        let list = Datum::List(flat);
        if needsSymtab(&list) {
            self.markLiterals();
        }
        self.ssa2imm(SsaOp::HashLookup, h, k, Imm::Datum(list))
    }

    pub fn objectSize(&mut self, v: ValueId) -> ValueId {
        let v = self.toValue(v);
        let k = self.mask(v);
        self.ssa2(SsaOp::ObjectSize, v, k)
    }

    pub fn makeList(&mut self, items: &[ValueId]) -> ValueId {
        let mut args = vec![INIT];
        for &item in items {
            let v = self.toValue(item);
            let k = self.mask(v);
            args.push(v);
            args.push(k);
        }
        self.ssaN(SsaOp::MakeList, &args, Imm::None)
    }

    /// Element `index` of the list held in `v`.
    pub fn index(&mut self, v: ValueId, index: usize) -> ValueId {
        let k = self.mask(v);
        let mut rest = self.ssa2(SsaOp::ToList, v, k);
        for _ in 0..=index {
            rest = self.ssa2(SsaOp::Split, rest, rest);
        }
        rest
    }

    pub fn path(&mut self, components: &[PathComponent]) -> ValueId {
        let mut cur: Option<ValueId> = None;
        for c in components {
            cur = Some(match (c, cur) {
                (PathComponent::Field(name), None) => self.dot(name, INIT),
                (PathComponent::Field(name), Some(v)) => {
                    let base = self.tuples(v);
                    self.dot(name, base)
                }
                (PathComponent::Index(_), None) => return self.errorf("path cannot start with an index"),
                (PathComponent::Index(i), Some(v)) => self.index(v, *i),
            });
        }
        match cur {
            Some(v) => v,
            None => self.errorf("empty path"),
        }
    }

    /// Lowers `e`; the result has one of the shapes described in the
    /// module documentation.
    pub fn compileExpr(&mut self, e: &Expr) -> ValueId {
        match e {
            Expr::Path(p) => self.path(p),
            Expr::Literal(d) => {
                if let Datum::Bool(b) = d {
                    return if *b { INIT } else { self.kfalse() };
                }
                self.literal(d.clone())
            }
            Expr::Cmp(op, a, b) => match (a.as_ref(), b.as_ref()) {
                (Expr::Literal(x), Expr::Literal(y)) => {
                    if x.isNull() || y.isNull() {
                        return self.kfalse();
                    }
                    let ord = x.compareOrder(y);
                    let r = match op {
                        CmpOp::Eq => ord.is_eq(),
                        CmpOp::Ne => ord.is_ne(),
                        CmpOp::Lt => ord.is_lt(),
                        CmpOp::Le => ord.is_le(),
                        CmpOp::Gt => ord.is_gt(),
                        CmpOp::Ge => ord.is_ge(),
                    };
                    if r {
                        INIT
                    } else {
                        self.kfalse()
                    }
                }
                (x, Expr::Literal(d)) => {
                    let v = self.compileExpr(x);
                    self.compareLiteral(*op, v, d)
                }
                (Expr::Literal(d), y) => {
                    let v = self.compileExpr(y);
                    self.compareLiteral(op.flip(), v, d)
                }
                (x, y) => {
                    let a = self.compileExpr(x);
                    let b = self.compileExpr(y);
                    self.compare(*op, a, b)
                }
            },
            Expr::And(a, b) => {
                let a = self.compileBool(a);
                let b = self.compileBool(b);
                self.and(a, b)
            }
            Expr::Or(a, b) => {
                let a = self.compileBool(a);
                let b = self.compileBool(b);
                self.or(a, b)
            }
            Expr::Xor(a, b) => {
                let a = self.compileBool(a);
                let b = self.compileBool(b);
                self.logicalXor(a, b)
            }
            Expr::Not(a) => {
                let a = self.compileBool(a);
                self.not(a)
            }
            Expr::IsNull(a) => {
                let v = self.compileExpr(a);
                match self.primary(v) {
                    ST_VALUE => self.ssa2(SsaOp::IsNull, v, INIT),
                    _ => self.kfalse(),
                }
            }
            Expr::IsNotNull(a) => {
                let v = self.compileExpr(a);
                match self.primary(v) {
                    ST_VALUE => self.ssa2(SsaOp::IsNotNull, v, INIT),
                    ST_BOOL => self.notMissing(v),
                    _ => self.mask(v),
                }
            }
            Expr::IsMissing(a) => {
                let v = self.compileExpr(a);
                let m = if self.primary(v) == ST_BOOL { self.notMissing(v) } else { self.mask(v) };
                self.nand(m, INIT)
            }
            Expr::IsTrue(a) | Expr::IsFalse(a) => {
                let want = matches!(e, Expr::IsTrue(_));
                let v = self.compileExpr(a);
                match self.primary(v) {
                    ST_VALUE => {
                        let op = if want { SsaOp::IsTrue } else { SsaOp::IsFalse };
                        self.ssa2(op, v, INIT)
                    }
                    ST_BOOL if want => self.and(v, INIT),
                    ST_BOOL => self.isFalse(v),
                    _ => self.kfalse(),
                }
            }
            Expr::Arith(op, a, b) => match (a.as_ref(), b.as_ref()) {
                (Expr::Literal(x), Expr::Literal(y)) => match foldArith(*op, x, y) {
                    Some(d) => self.literal(d),
                    None => self.kfalse(),
                },
                (x, Expr::Literal(d)) if isNumber(d) => {
                    let v = self.compileExpr(x);
                    self.arithLiteral(*op, v, d, false)
                }
                (Expr::Literal(d), y) if isNumber(d) => {
                    let v = self.compileExpr(y);
                    self.arithLiteral(*op, v, d, true)
                }
                (x, y) => {
                    let a = self.compileExpr(x);
                    let b = self.compileExpr(y);
                    self.arith(*op, a, b)
                }
            },
            Expr::Math(f, a) => {
                let v = self.compileExpr(a);
                self.math(*f, v)
            }
            Expr::StringMatch(kind, ci, a, pattern) => {
                let v = self.compileExpr(a);
                self.stringMatch(*kind, *ci, v, pattern)
            }
            Expr::Trim(t, a) => {
                let v = self.compileExpr(a);
                self.trim(*t, v)
            }
            Expr::CharLength(a) => {
                let v = self.compileExpr(a);
                self.charLength(v)
            }
            Expr::DateAdd(part, amount, ts) => {
                let t = self.compileExpr(ts);
                let n = match amount.as_ref() {
                    Expr::Literal(Datum::Int(i)) => {
                        let k = self.mask(t);
                        self.ssa1imm(SsaOp::BroadcastI, k, Imm::I64(*i))
                    }
                    a => self.compileExpr(a),
                };
                self.dateAdd(*part, n, t)
            }
            Expr::DateExtract(part, a) => {
                let v = self.compileExpr(a);
                self.dateExtract(*part, v)
            }
            Expr::DateTrunc(part, a) => {
                let v = self.compileExpr(a);
                self.dateTrunc(*part, v)
            }
            Expr::In(a, set) => {
                let v = self.compileExpr(a);
                self.member(v, set)
            }
            Expr::Lookup(a, pairs) => {
                let v = self.compileExpr(a);
                self.lookup(v, pairs)
            }
            Expr::ObjectSize(a) => {
                let v = self.compileExpr(a);
                self.objectSize(v)
            }
            Expr::Case(whens, otherwise) => {
                let mut out = match otherwise {
                    Some(e) => {
                        let v = self.compileExpr(e);
                        self.toValue(v)
                    }
                    None => self.kfalse(),
                };
                for (cond, then) in whens.iter().rev() {
                    let c = self.compileBool(cond);
                    let t = self.compileExpr(then);
                    let t = self.toValue(t);
                    let mt = self.mask(t);
                    let mo = self.mask(out);
                    let take = self.and(c, mt);
                    let keep = self.nand(c, mo);
                    out = self.ssa3(SsaOp::BlendV, out, t, take);
                    let m = self.or(take, keep);
                    self.setNotMissing(out, m);
                }
                out
            }
            Expr::MakeList(items) => {
                let vals: Vec<ValueId> = items.iter().map(|i| self.compileExpr(i)).collect();
                self.makeList(&vals)
            }
        }
    }

    /// Lowers `e` as a three-valued boolean.
    pub fn compileBool(&mut self, e: &Expr) -> ValueId {
        let v = self.compileExpr(e);
        self.toBool(v)
    }

    pub fn returnBool(&mut self, k: ValueId) -> ValueId {
        let k = self.toBool(k);
        let r = self.ssa1(SsaOp::RetK, k);
        self.ret = Some(r);
        r
    }

    pub fn returnValue(&mut self, v: ValueId) -> ValueId {
        let v = self.toValue(v);
        let k = self.mask(v);
        let r = self.ssa2(SsaOp::RetVK, v, k);
        self.ret = Some(r);
        r
    }

    pub fn returnScalar(&mut self, v: ValueId) -> ValueId {
        let k = self.mask(v);
        let r = self.ssa2(SsaOp::RetSK, v, k);
        self.ret = Some(r);
        r
    }

    pub fn returnMem(&mut self, mem: ValueId) -> ValueId {
        let r = self.ssa1(SsaOp::RetM, mem);
        self.ret = Some(r);
        r
    }

    pub fn initMem(&mut self) -> ValueId {
        self.ssa0(SsaOp::InitMem)
    }

    pub fn mergeMem(&mut self, mems: &[ValueId]) -> ValueId {
        match mems {
            [] => self.initMem(),
            [one] => *one,
            _ => self.ssaN(SsaOp::MergeMem, mems, Imm::None),
        }
    }

    /// Stores `v` into reserved V slot `slot`, zeroing lanes outside `k`.
    pub fn store(&mut self, mem: ValueId, v: ValueId, k: ValueId, slot: usize) -> ValueId {
        self.reservedSlots = self.reservedSlots.max(slot + 1);
        self.ssa3imm(SsaOp::Store, mem, v, k, Imm::I64(slot as i64))
    }

    pub fn aggBucket(&mut self, mem: ValueId, h: ValueId, k: ValueId) -> ValueId {
        self.ssa3(SsaOp::AggBucket, mem, h, k)
    }

    /// Argument of an aggregate lowered to the representation `func`
    /// accumulates, with its mask narrowed by `filter`.
    fn aggArg(&mut self, func: AggFn, arg: Option<ValueId>, filter: ValueId) -> (Option<ValueId>, ValueId) {
        let Some(a) = arg else {
            return (None, filter);
        };
        let x = match func {
            AggFn::SumInt | AggFn::AvgInt | AggFn::MinInt | AggFn::MaxInt | AggFn::BitAnd | AggFn::BitOr | AggFn::BitXor => {
                self.coerceInt(a)
            }
            AggFn::SumFloat | AggFn::AvgFloat | AggFn::MinFloat | AggFn::MaxFloat => self.coerceFloat(a),
            AggFn::MinTs | AggFn::MaxTs => self.coerceTime(a),
            AggFn::BoolAnd | AggFn::BoolOr => self.toBool(a),
            AggFn::Count => a,
        };
        let m = if self.primary(x) == ST_BOOL { self.notMissing(x) } else { self.mask(x) };
        let k = self.and(m, filter);
        let v = if func == AggFn::Count { None } else { Some(x) };
        (v, k)
    }

    /// Updates the accumulator at byte offset `slot` of the aggregate
    /// memory.
    pub fn aggregate(&mut self, func: AggFn, mem: ValueId, arg: Option<ValueId>, filter: ValueId, slot: u32) -> ValueId {
        use SsaOp::*;
        let (x, k) = self.aggArg(func, arg, filter);
        let imm = Imm::AggSlot(slot);
        let op = match func {
            AggFn::SumInt => AggSumI,
            AggFn::SumFloat => AggSumF,
            AggFn::AvgInt => AggAvgI,
            AggFn::AvgFloat => AggAvgF,
            AggFn::MinInt => AggMinI,
            AggFn::MinFloat => AggMinF,
            AggFn::MaxInt => AggMaxI,
            AggFn::MaxFloat => AggMaxF,
            AggFn::MinTs => AggMinTs,
            AggFn::MaxTs => AggMaxTs,
            AggFn::BitAnd => AggAndI,
            AggFn::BitOr => AggOrI,
            AggFn::BitXor => AggXorI,
            AggFn::BoolAnd => AggAndK,
            AggFn::BoolOr => AggOrK,
            AggFn::Count => return self.ssa2imm(AggCount, mem, k, imm),
        };
        match x {
            Some(x) => self.ssa3imm(op, mem, x, k, imm),
            None => self.errorf(format!("{} requires an argument", op.text())),
        }
    }

    /// Updates the accumulator at offset `slot` within each lane's bucket.
    pub fn aggregateSlot(&mut self, func: AggFn, mem: ValueId, bucket: ValueId, arg: Option<ValueId>, filter: ValueId, slot: u32) -> ValueId {
        use SsaOp::*;
        let (x, k) = self.aggArg(func, arg, filter);
        let imm = Imm::AggSlot(slot);
        let op = match func {
            AggFn::SumInt => AggSlotAddI,
            AggFn::SumFloat => AggSlotAddF,
            AggFn::AvgInt => AggSlotAvgI,
            AggFn::AvgFloat => AggSlotAvgF,
            AggFn::MinInt => AggSlotMinI,
            AggFn::MinFloat => AggSlotMinF,
            AggFn::MaxInt => AggSlotMaxI,
            AggFn::MaxFloat => AggSlotMaxF,
            AggFn::MinTs => AggSlotMinTs,
            AggFn::MaxTs => AggSlotMaxTs,
            AggFn::BitAnd => AggSlotAndI,
            AggFn::BitOr => AggSlotOrI,
            AggFn::BitXor => AggSlotXorI,
            AggFn::BoolAnd => AggSlotAndK,
            AggFn::BoolOr => AggSlotOrK,
            AggFn::Count => return self.ssa3imm(AggSlotCount, mem, bucket, k, imm),
        };
        match x {
            Some(x) => self.ssa4imm(op, mem, bucket, x, k, imm),
            None => self.errorf(format!("{} requires an argument", op.text())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logic_identities() {
        let mut p = Prog::new();
        let a = p.dot("a", INIT);
        let b = p.dot("b", INIT);
        let f = p.kfalse();
        assert_eq!(p.and(INIT, a), a);
        assert_eq!(p.and(f, a), f);
        assert_eq!(p.or(a, f), a);
        assert_eq!(p.or(a, INIT), INIT);
        assert_eq!(p.xor(a, a), f);
        assert_eq!(p.xnor(b, b), INIT);
        assert_eq!(p.nand(f, b), b);
        assert_eq!(p.nand(a, a), f);
        // operand order does not matter
        assert_eq!(p.and(a, b), p.and(b, a));
        assert_eq!(p.or(a, b), p.or(b, a));
    }

    #[test]
    fn test_invalid_operands_pass_through() {
        let mut p = Prog::new();
        let bad = p.errorf("no such function");
        assert_eq!(p.toBool(bad), bad);
        assert_eq!(p.coerceInt(bad), bad);
        assert_eq!(p.coerceFloat(bad), bad);
        assert_eq!(p.coerceStr(bad), bad);
        assert_eq!(p.coerceTime(bad), bad);
        assert_eq!(p.toValue(bad), bad);
        assert_eq!(p.compareLiteral(CmpOp::Lt, bad, &Datum::Int(1)), bad);
        let f = p.kfalse();
        assert_eq!(p.and(bad, f), bad);

        let other = p.errorf("bad path");
        let both = p.or(bad, other);
        let k = p.returnBool(both);
        assert_eq!(p.ret, Some(k));
        assert_eq!(p.errors(), vec!["no such function", "bad path"]);
    }

    #[test]
    fn test_xor_is_missing_where_either_side_is() {
        let mut p = Prog::new();
        let a = p.compileBool(&Expr::cmp(CmpOp::Lt, Expr::path("a"), Expr::lit(2i64)));
        let b = p.compileBool(&Expr::cmp(CmpOp::Lt, Expr::path("b"), Expr::lit(2i64)));
        let x = p.logicalXor(a, b);
        assert_eq!(p.op(x), SsaOp::And);
        let na = p.notMissing(a);
        let nb = p.notMissing(b);
        let known = p.and(na, nb);
        assert_eq!(p.notMissing(x), known);
        // equality of two booleans is XNOR under the same mask
        let eq = p.compare(CmpOp::Eq, a, b);
        assert_eq!(p.notMissing(eq), known);
        assert_ne!(eq, x);
    }

    #[test]
    fn test_compare_canonical_order() {
        let mut p = Prog::new();
        let a = p.dot("a", INIT);
        let b = p.dot("b", INIT);
        let fa = p.coerceFloat(a);
        let fb = p.coerceFloat(b);
        let lt = p.compare(CmpOp::Lt, fa, fb);
        let gt = p.compare(CmpOp::Gt, fb, fa);
        assert_eq!(lt, gt);
    }

    #[test]
    fn test_self_arith() {
        let mut p = Prog::new();
        let a = p.dot("a", INIT);
        let i = p.coerceInt(a);
        let d = p.arith(ArithOp::Sub, i, i);
        assert_eq!(p.op(d), SsaOp::MulImmI);
        assert_eq!(p.value(d).imm, Imm::I64(0));
        let s = p.arith(ArithOp::Add, i, i);
        assert_eq!(p.value(s).imm, Imm::I64(2));
    }

    #[test]
    fn test_literal_on_left_flips() {
        let mut p = Prog::new();
        let e1 = Expr::cmp(CmpOp::Lt, Expr::lit(3i64), Expr::path("x"));
        let e2 = Expr::cmp(CmpOp::Gt, Expr::path("x"), Expr::lit(3i64));
        let a = p.compileExpr(&e1);
        let b = p.compileExpr(&e2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_in_uses_hash_set() {
        let mut p = Prog::new();
        let set: Vec<Datum> = (0..10).map(Datum::Int).collect();
        let v = p.compileExpr(&Expr::In(Box::new(Expr::path("x")), set));
        assert_eq!(p.op(v), SsaOp::HashMember);
        let small = p.compileExpr(&Expr::In(Box::new(Expr::path("x")), vec![Datum::Int(1)]));
        assert_ne!(p.op(small), SsaOp::HashMember);
    }

    #[test]
    fn test_struct_literal_marks_program() {
        let mut p = Prog::new();
        let mut st = crate::ion::Symtab::new();
        let lit = Datum::Struct(vec![crate::ion::Field {
            label: "a".into(),
            value: Datum::Int(1),
        }]);
        let v = p.compileExpr(&Expr::cmp(CmpOp::Eq, Expr::path("x"), Expr::Literal(lit)));
        assert_eq!(p.op(v), SsaOp::EqualConst);
        p.returnBool(v);
        st.intern("x");
        p.symbolize(&st).unwrap();
        assert!(p.isStale(&st));
    }
}
