//! SSA form of a compiled expression program.
//!
//! A [`Prog`] is an arena of [`Value`] nodes referenced by index. Nodes are
//! hash-consed on construction, so building the same operation twice yields
//! the same node. The builder methods in [`builder`] lower an
//! [`crate::expr::Expr`] into this form; [`optimizer`] schedules it and
//! [`compiler`] turns it into bytecode.

pub mod builder;
pub mod compiler;
pub mod defs;
pub mod optimizer;
pub mod stack;

use std::fmt::{Display, Write};

use ahash::AHashMap;

use crate::error::VmError;
use crate::ion::{Datum, Symbol, Symtab, MAX_SYMBOL_ID};
use crate::Result;
use defs::*;

pub use compiler::recompile;

pub type ValueId = usize;

/// Id of the canonical initial mask and row base.
pub const INIT: ValueId = 0;
/// Id of the undefined scalar.
pub const UNDEF: ValueId = 1;

/// Symbol recorded for a field name absent from the symbol table.
const SYMBOL_ABSENT: Symbol = !0;

/// Immediate operand of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Imm {
    None,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    /// microseconds since the epoch
    Timestamp(i64),
    Symbol(Symbol),
    AggSlot(u32),
    Datum(Datum),
}

impl Imm {
    pub fn isNone(&self) -> bool {
        matches!(self, Imm::None)
    }

    pub fn asI64(&self) -> Option<i64> {
        match self {
            Imm::I64(i) | Imm::Timestamp(i) => Some(*i),
            Imm::Bool(b) => Some(*b as i64),
            Imm::AggSlot(s) => Some(*s as i64),
            Imm::Symbol(s) => Some(*s as i64),
            Imm::F64(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn asF64(&self) -> Option<f64> {
        match self {
            Imm::F64(f) => Some(*f),
            Imm::I64(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn key(&self) -> ImmKey {
        match self {
            Imm::None => ImmKey::None,
            Imm::Bool(b) => ImmKey::Bits(1, *b as u64),
            Imm::I64(i) => ImmKey::Bits(2, *i as u64),
            Imm::F64(f) => ImmKey::Bits(3, f.to_bits()),
            Imm::Timestamp(t) => ImmKey::Bits(4, *t as u64),
            Imm::Symbol(s) => ImmKey::Bits(5, *s as u64),
            Imm::AggSlot(s) => ImmKey::Bits(6, *s as u64),
            Imm::Str(s) => ImmKey::Text(s.clone()),
            Imm::Datum(d) => ImmKey::Text(format!("{:?}", d)),
        }
    }
}

impl Display for Imm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Imm::None => Ok(()),
            Imm::Bool(b) => write!(f, "{}", b),
            Imm::I64(i) => write!(f, "{}", i),
            Imm::F64(x) => write!(f, "{:?}", x),
            Imm::Str(s) => write!(f, "{:?}", s),
            Imm::Timestamp(t) => write!(f, "{}", Datum::Timestamp(*t)),
            Imm::Symbol(s) => write!(f, "${}", s),
            Imm::AggSlot(s) => write!(f, "[{}]", s),
            Imm::Datum(d) => write!(f, "{}", d),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ImmKey {
    None,
    Bits(u8, u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExprKey {
    op: SsaOp,
    args: Vec<ValueId>,
    imm: ImmKey,
}

#[derive(Debug, Clone)]
pub struct Value {
    pub id: ValueId,
    pub op: SsaOp,
    pub args: Vec<ValueId>,
    pub imm: Imm,
    /// mask of lanes holding a definite result, when it differs from the
    /// default rule in [`Prog::notMissing`]
    pub notMissing: Option<ValueId>,
}

impl Value {
    pub fn info(&self) -> SsaOpInfo {
        self.op.info()
    }

    pub fn ret(&self) -> SsaType {
        self.op.info().rettype
    }

    /// The trailing predicate argument, if any.
    pub fn maskArg(&self) -> Option<ValueId> {
        let info = self.info();
        if !info.vaArgs.is_empty() {
            // variadic ops take their predicate before the repeated tail
            let fixed = info.argtypes.len();
            return (fixed > 0 && info.argtypes[fixed - 1] == ST_BOOL).then(|| self.args[fixed - 1]);
        }
        let n = self.args.len();
        if n == 0 || !info.hasArg(n - 1) || info.argType(n - 1) != ST_BOOL {
            return None;
        }
        Some(self.args[n - 1])
    }

    /// Diagnostic carried by an invalid node.
    pub fn errorText(&self) -> Option<&str> {
        match (&self.op, &self.imm) {
            (SsaOp::Invalid, Imm::Str(s)) => Some(s),
            (SsaOp::Invalid, _) if self.args.is_empty() => Some("invalid"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prog {
    pub values: Vec<Value>,
    exprs: AHashMap<ExprKey, ValueId>,
    pub ret: Option<ValueId>,
    // field names resolved by symbolize, with SYMBOL_ABSENT for misses
    resolved: Vec<(String, Symbol)>,
    symbolized: bool,
    // literals encoded against a symbol table
    literals: bool,
    /// V slots written by `store.z` and read back by the caller
    pub reservedSlots: usize,
}

impl Default for Prog {
    fn default() -> Self {
        Self::new()
    }
}

impl Prog {
    pub fn new() -> Self {
        let mut p = Prog {
            values: vec![],
            exprs: AHashMap::new(),
            ret: None,
            resolved: vec![],
            symbolized: false,
            literals: false,
            reservedSlots: 0,
        };
        p.begin();
        p
    }

    /// Resets the program to its two fixed nodes.
    pub fn begin(&mut self) {
        self.values.clear();
        self.exprs.clear();
        self.ret = None;
        self.resolved.clear();
        self.symbolized = false;
        self.literals = false;
        self.reservedSlots = 0;
        self.push(SsaOp::Init, vec![], Imm::None);
        self.push(SsaOp::Undef, vec![], Imm::None);
    }

    fn push(&mut self, op: SsaOp, args: Vec<ValueId>, imm: Imm) -> ValueId {
        let id = self.values.len();
        self.values.push(Value {
            id,
            op,
            args,
            imm,
            notMissing: None,
        });
        id
    }

    pub fn value(&self, v: ValueId) -> &Value {
        &self.values[v]
    }

    pub fn op(&self, v: ValueId) -> SsaOp {
        self.values[v].op
    }

    pub fn ret(&self, v: ValueId) -> SsaType {
        self.values[v].ret()
    }

    pub fn isInvalid(&self, v: ValueId) -> bool {
        self.values[v].op == SsaOp::Invalid
    }

    /// The invalid node standing for every invalid value in `args`.
    ///
    /// Several distinct invalid arguments are joined under one argument-only
    /// invalid node so that each diagnostic stays reachable.
    pub fn invalidArg(&mut self, args: &[ValueId]) -> Option<ValueId> {
        let mut bad: Vec<ValueId> = vec![];
        for &a in args {
            if self.isInvalid(a) && !bad.contains(&a) {
                bad.push(a);
            }
        }
        match bad.len() {
            0 => None,
            1 => Some(bad[0]),
            _ => Some(self.push(SsaOp::Invalid, bad, Imm::None)),
        }
    }

    /// Creates an invalid node carrying `msg`.
    pub fn errorf(&mut self, msg: impl Into<String>) -> ValueId {
        self.push(SsaOp::Invalid, vec![], Imm::Str(msg.into()))
    }

    /// Builds (or finds) the node `op(args...) [imm]`.
    ///
    /// Each argument's type must intersect the declared argument type in
    /// exactly one bit; otherwise the new node is invalid.
    pub fn ssaN(&mut self, op: SsaOp, args: &[ValueId], imm: Imm) -> ValueId {
        if let Some(bad) = self.invalidArg(args) {
            return bad;
        }
        let info = op.info();
        for (i, &arg) in args.iter().enumerate() {
            if !info.hasArg(i) {
                return self.errorf(format!("{}: too many arguments ({})", info.text, args.len()));
            }
            let want = info.argType(i);
            let have = self.ret(arg);
            let t = want & have;
            if t == 0 || t & (t - 1) != 0 {
                return self.errorf(format!(
                    "{}: argument {} is {} (v{} = {}), wanted {}",
                    info.text,
                    i,
                    typeChars(have),
                    arg,
                    self.op(arg).text(),
                    typeChars(want)
                ));
            }
        }
        let fixed = info.argtypes.len();
        if args.len() < fixed || (!info.vaArgs.is_empty() && (args.len() - fixed) % info.vaArgs.len() != 0) {
            return self.errorf(format!("{}: wrong number of arguments ({})", info.text, args.len()));
        }
        if op == SsaOp::MergeMem {
            return self.push(op, args.to_vec(), imm);
        }
        let key = ExprKey {
            op,
            args: args.to_vec(),
            imm: imm.key(),
        };
        if let Some(&v) = self.exprs.get(&key) {
            return v;
        }
        let v = self.push(op, args.to_vec(), imm);
        self.exprs.insert(key, v);
        v
    }

    pub fn ssa0(&mut self, op: SsaOp) -> ValueId {
        self.ssaN(op, &[], Imm::None)
    }

    pub fn ssa1(&mut self, op: SsaOp, a: ValueId) -> ValueId {
        self.ssaN(op, &[a], Imm::None)
    }

    pub fn ssa2(&mut self, op: SsaOp, a: ValueId, b: ValueId) -> ValueId {
        self.ssaN(op, &[a, b], Imm::None)
    }

    pub fn ssa3(&mut self, op: SsaOp, a: ValueId, b: ValueId, c: ValueId) -> ValueId {
        self.ssaN(op, &[a, b, c], Imm::None)
    }

    pub fn ssa4(&mut self, op: SsaOp, a: ValueId, b: ValueId, c: ValueId, d: ValueId) -> ValueId {
        self.ssaN(op, &[a, b, c, d], Imm::None)
    }

    pub fn ssa1imm(&mut self, op: SsaOp, a: ValueId, imm: Imm) -> ValueId {
        self.ssaN(op, &[a], imm)
    }

    pub fn ssa2imm(&mut self, op: SsaOp, a: ValueId, b: ValueId, imm: Imm) -> ValueId {
        self.ssaN(op, &[a, b], imm)
    }

    pub fn ssa3imm(&mut self, op: SsaOp, a: ValueId, b: ValueId, c: ValueId, imm: Imm) -> ValueId {
        self.ssaN(op, &[a, b, c], imm)
    }

    pub fn ssa4imm(&mut self, op: SsaOp, a: ValueId, b: ValueId, c: ValueId, d: ValueId, imm: Imm) -> ValueId {
        self.ssaN(op, &[a, b, c, d], imm)
    }

    /// The initial lane mask.
    pub fn validLanes(&self) -> ValueId {
        INIT
    }

    pub fn undef(&self) -> ValueId {
        UNDEF
    }

    pub fn kfalse(&mut self) -> ValueId {
        self.ssa0(SsaOp::KFalse)
    }

    /// Lanes in which `v` is defined.
    pub fn mask(&mut self, v: ValueId) -> ValueId {
        let val = &self.values[v];
        if val.ret() & ST_BOOL != 0 {
            return v;
        }
        if let Some(m) = val.notMissing {
            return m;
        }
        val.maskArg().unwrap_or(INIT)
    }

    /// Overrides the not-missing mask of `v`.
    pub fn setNotMissing(&mut self, v: ValueId, mask: ValueId) {
        if v > UNDEF && !matches!(self.op(v), SsaOp::Invalid | SsaOp::KFalse) {
            self.values[v].notMissing = Some(mask);
        }
    }

    /// Lanes in which the boolean `v` is TRUE or FALSE (not MISSING).
    pub fn notMissing(&mut self, v: ValueId) -> ValueId {
        if let Some(m) = self.values[v].notMissing {
            return m;
        }
        let val = self.values[v].clone();
        match val.op {
            SsaOp::KFalse | SsaOp::Init => v,
            // missing unless one side is definitely false
            SsaOp::And => {
                let (a, b) = (val.args[0], val.args[1]);
                let fa = self.isFalse(a);
                let fb = self.isFalse(b);
                let either = self.or(fa, fb);
                self.or(v, either)
            }
            // missing unless one side is definitely true or both are known
            SsaOp::Or => {
                let (a, b) = (val.args[0], val.args[1]);
                let ma = self.notMissing(a);
                let mb = self.notMissing(b);
                let both = self.and(ma, mb);
                self.or(v, both)
            }
            SsaOp::Xor | SsaOp::Xnor => {
                let ma = self.notMissing(val.args[0]);
                let mb = self.notMissing(val.args[1]);
                self.and(ma, mb)
            }
            // (NOT a) AND b
            SsaOp::Nand => {
                let (a, b) = (val.args[0], val.args[1]);
                let fb = self.isFalse(b);
                let either = self.or(a, fb);
                self.or(v, either)
            }
            // a boolean read out of a value is known only where it is a bool
            SsaOp::IsTrue | SsaOp::IsFalse if val.args[1] != INIT => {
                let (x, k) = (val.args[0], val.args[1]);
                let t = self.ssa2(SsaOp::IsTrue, x, k);
                let f = self.ssa2(SsaOp::IsFalse, x, k);
                self.or(t, f)
            }
            _ => {
                let rt = val.ret();
                if rt == ST_BOOL {
                    val.maskArg().unwrap_or(INIT)
                } else if rt & ST_BOOL != 0 {
                    v
                } else {
                    val.maskArg().unwrap_or(INIT)
                }
            }
        }
    }

    /// Lanes in which the boolean `v` is definitely FALSE.
    pub fn isFalse(&mut self, v: ValueId) -> ValueId {
        let nm = self.notMissing(v);
        self.nand(v, nm)
    }

    /// Records the symbols used by field accesses and rewrites their names
    /// to symbol ids. Fields absent from `st` become `false`.
    pub fn symbolize(&mut self, st: &Symtab) -> Result<()> {
        self.resolved.clear();
        for i in 0..self.values.len() {
            let v = &self.values[i];
            if !matches!(v.op, SsaOp::Dot | SsaOp::Dot2) {
                continue;
            }
            let name = match &v.imm {
                Imm::Str(s) => s.clone(),
                Imm::Symbol(sym) => match st.get(*sym) {
                    Some(s) => s.to_string(),
                    None => continue,
                },
                _ => continue,
            };
            match st.symbolize(&name) {
                Some(sym) => {
                    if sym > MAX_SYMBOL_ID {
                        return Err(VmError::SymbolTooLarge(sym, name));
                    }
                    self.values[i].imm = Imm::Symbol(sym);
                    self.resolved.push((name, sym));
                }
                None => {
                    log::debug!("field {:?} not in symbol table; folding v{} to false", name, i);
                    let v = &mut self.values[i];
                    v.op = SsaOp::KFalse;
                    v.args.clear();
                    v.imm = Imm::None;
                    v.notMissing = None;
                    self.resolved.push((name, SYMBOL_ABSENT));
                }
            }
        }
        self.symbolized = true;
        Ok(())
    }

    /// Reports whether code compiled from this program must be rebuilt for
    /// `st`.
    pub fn isStale(&self, st: &Symtab) -> bool {
        if !self.symbolized || self.literals {
            return true;
        }
        self.resolved.iter().any(|(name, sym)| match st.symbolize(name) {
            Some(id) => id != *sym,
            None => *sym != SYMBOL_ABSENT,
        })
    }

    pub fn markLiterals(&mut self) {
        self.literals = true;
    }

    /// Invalid nodes reachable from the return value.
    pub fn errors(&self) -> Vec<&str> {
        let Some(ret) = self.ret else {
            return vec!["no return value"];
        };
        let mut seen = vec![false; self.values.len()];
        let mut stack = vec![ret];
        let mut out = vec![];
        while let Some(v) = stack.pop() {
            if std::mem::replace(&mut seen[v], true) {
                continue;
            }
            if let Some(e) = self.values[v].errorText() {
                out.push(e);
            }
            stack.extend(self.values[v].args.iter().rev().copied());
        }
        out
    }

    /// Replaces every use of `from` by `to`.
    pub(crate) fn replaceUses(&mut self, from: ValueId, to: ValueId) {
        for v in self.values.iter_mut() {
            for a in v.args.iter_mut() {
                if *a == from {
                    *a = to;
                }
            }
            if v.notMissing == Some(from) {
                v.notMissing = Some(to);
            }
        }
        if self.ret == Some(from) {
            self.ret = Some(to);
        }
    }

    /// Drops the hash-consing table; called once nodes are rewritten in
    /// place.
    pub(crate) fn forgetExprs(&mut self) {
        self.exprs.clear();
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for v in &self.values {
            let _ = write!(out, "v{} = {}", v.id, v.op.text());
            for a in &v.args {
                let _ = write!(out, " v{}", a);
            }
            if !v.imm.isNone() {
                let _ = write!(out, " {}", v.imm);
            }
            let _ = writeln!(out);
        }
        if let Some(r) = self.ret {
            let _ = writeln!(out, "ret: v{}", r);
        }
        out
    }
}

impl Display for Prog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cse() {
        let mut p = Prog::new();
        let k = p.validLanes();
        let a = p.dot("a", k);
        let b = p.dot("a", k);
        assert_eq!(a, b);
        let x = p.ssa2imm(SsaOp::CmpEqImmI, p.undef(), k, Imm::I64(3));
        let y = p.ssa2imm(SsaOp::CmpEqImmI, p.undef(), k, Imm::I64(3));
        let z = p.ssa2imm(SsaOp::CmpEqImmI, p.undef(), k, Imm::I64(4));
        assert_eq!(x, y);
        assert_ne!(x, z);
        // +0.0 and -0.0 differ bitwise
        let f0 = p.ssa2imm(SsaOp::CmpEqImmF, p.undef(), k, Imm::F64(0.0));
        let f1 = p.ssa2imm(SsaOp::CmpEqImmF, p.undef(), k, Imm::F64(-0.0));
        assert_ne!(f0, f1);
    }

    #[test]
    fn test_type_errors() {
        let mut p = Prog::new();
        let k = p.validLanes();
        let v = p.dot("a", k);
        // a value where a float is wanted
        let bad = p.ssa2(SsaOp::AbsF, v, k);
        assert!(p.isInvalid(bad));
        assert!(!p.isInvalid(v));
        let text = p.value(bad).errorText().unwrap().to_string();
        assert!(text.contains("abs.f"), "{}", text);
        // invalid nodes propagate
        let worse = p.ssa2(SsaOp::NegF, bad, k);
        assert_eq!(worse, bad);
        // undef stands in for any scalar
        let ok = p.ssa2(SsaOp::AbsF, p.undef(), k);
        assert!(!p.isInvalid(ok));
    }

    #[test]
    fn test_fixed_nodes() {
        let p = Prog::new();
        assert_eq!(p.op(INIT), SsaOp::Init);
        assert_eq!(p.op(UNDEF), SsaOp::Undef);
    }

    #[test]
    fn test_staleness() {
        let mut st = Symtab::new();
        st.intern("a");
        let mut p = Prog::new();
        let k = p.validLanes();
        let a = p.dot("a", k);
        let b = p.dot("b", k);
        let both = p.and(a, b);
        p.returnBool(both);
        assert!(p.isStale(&st));
        p.symbolize(&st).unwrap();
        assert!(!p.isStale(&st));
        assert_eq!(p.op(b), SsaOp::KFalse);
        // "b" appearing makes the missing-field fold invalid
        st.intern("b");
        assert!(p.isStale(&st));
    }
}
