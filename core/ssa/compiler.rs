//! Lowering of an optimized [`Prog`] into bytecode.
//!
//! Values are emitted in program order. Each register class has one live
//! register; values that must outlive their register are saved to a virtual
//! stack slot and reloaded on demand.

use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, trace};

use super::defs::*;
use super::stack::{stackSlotFromIndex, StackMap, StackSlot};
use super::{Imm, Prog, Value, ValueId, INIT, UNDEF};
use crate::error::VmError;
use crate::ion::{self, Datum, Symtab};
use crate::level::VmConfig;
use crate::radix::RadixTree64;
use crate::vdbe::opcodes::BcOp;
use crate::vdbe::{hashBytes, Bytecode, SCRATCH_BIT};
use crate::Result;

/// Register class an argument of type `t` is passed in; `None` for memory.
fn argClass(t: SsaType) -> Option<RegClass> {
    if t == ST_MEM {
        return None;
    }
    if t & !ST_SCALAR == 0 && t != 0 {
        return Some(RegClass::S);
    }
    RegClass::of(t)
}

fn saveOp(c: RegClass) -> BcOp {
    match c {
        RegClass::K => BcOp::SaveK,
        RegClass::S => BcOp::SaveS,
        RegClass::V => BcOp::SaveV,
        RegClass::B => BcOp::SaveB,
        RegClass::L => BcOp::SaveL,
        RegClass::H => panic!("hashes live on the stack only"),
    }
}

fn loadOp(c: RegClass) -> BcOp {
    match c {
        RegClass::K => BcOp::LoadK,
        RegClass::S => BcOp::LoadS,
        RegClass::V => BcOp::LoadV,
        RegClass::B => BcOp::LoadB,
        RegClass::L => BcOp::LoadL,
        RegClass::H => panic!("hashes live on the stack only"),
    }
}

fn badImm(v: &Value) -> ! {
    let info = v.info();
    panic!("{}: immediate {} does not fit {:?}", info.text, v.imm, info.immfmt)
}

/// Largest position at which each value is read, per register class.
fn lastUses(prog: &Prog) -> Vec<[usize; NUM_REG_CLASSES]> {
    let mut out = vec![[0usize; NUM_REG_CLASSES]; prog.values.len()];
    for v in &prog.values {
        let info = v.info();
        for (i, &a) in v.args.iter().enumerate() {
            if let Some(c) = argClass(info.argType(i)) {
                out[a][c as usize] = out[a][c as usize].max(v.id);
            }
        }
    }
    out
}

struct Compiler<'a> {
    st: &'a mut Symtab,
    config: VmConfig,
    out: Vec<u8>,
    stack: StackMap,
    cur: [Option<ValueId>; NUM_REG_CLASSES],
    lastUse: Vec<[usize; NUM_REG_CLASSES]>,
    litbuf: Vec<u8>,
    litmemo: AHashMap<Vec<u8>, u32>,
    dict: Vec<String>,
    trees: Vec<RadixTree64>,
}

impl<'a> Compiler<'a> {
    fn new(st: &'a mut Symtab, config: VmConfig, prog: &Prog) -> Self {
        let mut stack = StackMap::new();
        stack.reserveSlots(RegClass::V, prog.reservedSlots);
        let mut cur = [None; NUM_REG_CLASSES];
        cur[RegClass::K as usize] = Some(INIT);
        cur[RegClass::B as usize] = Some(INIT);
        cur[RegClass::S as usize] = Some(UNDEF);
        Compiler {
            st,
            config,
            out: vec![],
            stack,
            cur,
            lastUse: lastUses(prog),
            litbuf: vec![],
            litmemo: AHashMap::new(),
            dict: vec![],
            trees: vec![],
        }
    }

    fn op(&mut self, op: BcOp) {
        let op = op.patched(self.config.level);
        self.out.extend_from_slice(&op.id().to_le_bytes());
    }

    fn u8(&mut self, x: u8) {
        self.out.push(x);
    }

    fn u16(&mut self, x: u16) {
        self.out.extend_from_slice(&x.to_le_bytes());
    }

    fn u32(&mut self, x: u32) {
        self.out.extend_from_slice(&x.to_le_bytes());
    }

    fn u64(&mut self, x: u64) {
        self.out.extend_from_slice(&x.to_le_bytes());
    }

    fn cur(&self, c: RegClass) -> Option<ValueId> {
        self.cur[c as usize]
    }

    fn livePast(&self, v: ValueId, c: RegClass, pos: usize) -> bool {
        self.lastUse[v][c as usize] > pos
    }

    /// Saves the occupant of register `c` if it is still needed after `pos`.
    fn spill(&mut self, c: RegClass, pos: usize) {
        let Some(u) = self.cur(c) else {
            return;
        };
        if u == UNDEF || !self.livePast(u, c, pos) || self.stack.hasSlot(c, u) {
            return;
        }
        let slot = self.stack.allocSlot(c, u);
        trace!("spill v{} to {}[{}]", u, c.letter(), slot);
        self.op(saveOp(c));
        self.u16(slot);
    }

    /// Returns a stack slot holding `v`, saving the register if that is the
    /// only copy.
    fn forceStackRef(&mut self, c: RegClass, v: ValueId) -> StackSlot {
        if let Some(slot) = self.stack.slotOf(c, v) {
            return slot;
        }
        if self.cur(c) == Some(v) {
            let slot = self.stack.allocSlot(c, v);
            self.op(saveOp(c));
            self.u16(slot);
            return slot;
        }
        if v == UNDEF {
            return self.stack.allocSlot(c, v);
        }
        panic!("arg not live up to use? v{} in {}", v, c.letter());
    }

    fn load(&mut self, c: RegClass, v: ValueId, pos: usize) {
        if self.cur(c) == Some(v) || v == UNDEF {
            return;
        }
        self.spill(c, pos);
        let Some(slot) = self.stack.slotOf(c, v) else {
            panic!("v{} is neither in {} nor on the stack", v, c.letter());
        };
        self.op(loadOp(c));
        self.u16(slot);
        self.cur[c as usize] = Some(v);
    }

    /// Loads the predicate `p`. When `p` dies here and the current mask is
    /// still live without a slot, the two are exchanged in place.
    fn loadk(&mut self, p: ValueId, v: &Value, pos: usize) {
        let c = RegClass::K;
        if self.cur(c) == Some(p) {
            return;
        }
        if let (Some(u), Some(pslot)) = (self.cur(c), self.stack.slotOf(c, p)) {
            let once = v.args.iter().filter(|&&a| a == p).count() == 1;
            if once
                && u != UNDEF
                && self.lastUse[p][c as usize] == pos
                && self.livePast(u, c, pos)
                && !self.stack.hasSlot(c, u)
            {
                self.op(BcOp::XchgK);
                self.u16(pslot);
                self.stack.transfer(c, p, u);
                self.cur[c as usize] = Some(p);
                return;
            }
        }
        self.load(c, p, pos);
    }

    /// Spills the registers `v` is about to overwrite.
    fn clobber(&mut self, v: &Value) {
        for c in vregs(v.ret()) {
            if c != RegClass::H && self.cur(c) != Some(v.id) {
                self.spill(c, v.id);
            }
        }
    }

    fn define(&mut self, v: &Value) {
        for c in vregs(v.ret()) {
            if c != RegClass::H {
                self.cur[c as usize] = Some(v.id);
            }
        }
    }

    /// Releases the slots of arguments read for the last time by `v`.
    fn release(&mut self, v: &Value) {
        let info = v.info();
        for (i, &a) in v.args.iter().enumerate() {
            let Some(c) = argClass(info.argType(i)) else {
                continue;
            };
            if self.lastUse[a][c as usize] == v.id {
                self.stack.freeValue(c, a);
            }
        }
    }

    fn dictIndex(&mut self, s: &str) -> u16 {
        let i = match self.dict.iter().position(|d| d == s) {
            Some(i) => i,
            None => {
                self.dict.push(s.to_string());
                self.dict.len() - 1
            }
        };
        i as u16
    }

    /// Places the encoding of `d` in the literal pool and returns its
    /// offset and length.
    fn literal(&mut self, d: &Datum) -> (u32, u32, Vec<u8>) {
        let enc = d.toBytes(self.st);
        if let Some(&off) = self.litmemo.get(&enc) {
            return (off, enc.len() as u32, enc);
        }
        let off = self.litbuf.len() as u32;
        self.litbuf.extend_from_slice(&enc);
        self.litmemo.insert(enc.clone(), off);
        (off, enc.len() as u32, enc)
    }

    fn litref(&mut self, d: &Datum) {
        let (off, len, enc) = self.literal(d);
        let tlv = enc.first().copied().unwrap_or(0);
        let hlen = ion::headerSizeOf(&enc).unwrap_or(0) as u8;
        self.u32(off);
        self.u32(len);
        self.u8(tlv);
        self.u8(hlen);
    }

    /// Builds the radix tree behind a hashed IN list or lookup table.
    fn hashTree(&mut self, v: &Value) -> u16 {
        let Imm::Datum(Datum::List(items)) = &v.imm else {
            panic!("{}: expected a literal list, got {}", v.op.text(), v.imm);
        };
        let tree = match v.op {
            SsaOp::HashMember => {
                let mut tree = RadixTree64::new(8);
                for item in items {
                    let h = hashBytes(&item.toBytes(self.st));
                    let (payload, _) = tree.insert(h[0]);
                    payload[..8].copy_from_slice(&h[1].to_le_bytes());
                }
                tree
            }
            _ => {
                let mut tree = RadixTree64::new(16);
                for pair in items.chunks_exact(2) {
                    let h = hashBytes(&pair[0].toBytes(self.st));
                    let (off, len, _) = self.literal(&pair[1]);
                    let (payload, new) = tree.insert(h[0]);
                    // the first binding of a key wins
                    if new {
                        payload[..8].copy_from_slice(&h[1].to_le_bytes());
                        payload[8..12].copy_from_slice(&off.to_le_bytes());
                        payload[12..16].copy_from_slice(&len.to_le_bytes());
                    }
                }
                tree
            }
        };
        self.trees.push(tree);
        (self.trees.len() - 1) as u16
    }

    fn symbol(&mut self, v: &Value) -> u32 {
        match &v.imm {
            Imm::Symbol(s) => *s,
            Imm::Str(s) => self.st.intern(s),
            imm => panic!("{}: bad field immediate {}", v.op.text(), imm),
        }
    }

    fn immediate(&mut self, v: &Value) {
        let info = v.info();
        match info.emit {
            Emit::Slice => {
                let ty = if v.op == SsaOp::ToList { ion::Type::List } else { ion::Type::String };
                self.u8(ty as u8);
                return;
            }
            Emit::Const | Emit::ConstCmp => {
                let Imm::Datum(d) = &v.imm else { badImm(v) };
                self.litref(d);
                return;
            }
            Emit::HashMember => {
                let t = self.hashTree(v);
                self.u16(t);
                return;
            }
            Emit::Dot => {
                let sym = self.symbol(v);
                self.u32(sym);
                return;
            }
            _ => {}
        }
        match info.immfmt {
            ImmFmt::None => {}
            ImmFmt::U8 => self.u8(v.imm.asI64().unwrap_or_else(|| badImm(v)) as u8),
            ImmFmt::U16 => self.u16(v.imm.asI64().unwrap_or_else(|| badImm(v)) as u16),
            ImmFmt::I64 => self.u64(v.imm.asI64().unwrap_or_else(|| badImm(v)) as u64),
            ImmFmt::F64 => self.u64(v.imm.asF64().unwrap_or_else(|| badImm(v)).to_bits()),
            ImmFmt::Dict => {
                let Imm::Str(s) = &v.imm else { badImm(v) };
                let i = self.dictIndex(s);
                self.u16(i);
            }
            ImmFmt::AggSlot => self.u32(v.imm.asI64().unwrap_or_else(|| badImm(v)) as u32),
            ImmFmt::Slot | ImmFmt::Other => badImm(v),
        }
    }

    /// Loads the first argument of each class, passes the rest by slot and
    /// emits `bc` followed by the slots and the immediate.
    fn emitAuto(&mut self, v: &Value, bc: BcOp) {
        let info = v.info();
        let pos = v.id;
        let mask = v.maskArg();
        let maskIdx = mask.and_then(|_| {
            if info.vaArgs.is_empty() {
                Some(v.args.len() - 1)
            } else {
                Some(info.argtypes.len() - 1)
            }
        });
        let mut args = v.args.clone();
        let mut bc = bc;

        // commute the operands when the second one is already loaded
        if args.len() >= 2 && maskIdx != Some(1) && args[0] != args[1] {
            let c0 = argClass(info.argType(0));
            let c1 = argClass(info.argType(1));
            if let (Some(c), true) = (c0, c0 == c1) {
                if c != RegClass::K && c != RegClass::H && self.cur(c) == Some(args[1]) {
                    let swapped = match info.emit {
                        Emit::Cmp => info.inverse.and_then(|inv| inv.info().bc),
                        _ => info.bcrev,
                    };
                    if let Some(rev) = swapped {
                        bc = rev;
                        args.swap(0, 1);
                    }
                }
            }
        }

        let mut regs: Vec<(RegClass, ValueId)> = vec![];
        let mut slotArgs: Vec<(RegClass, ValueId)> = vec![];
        let variadic = !info.vaArgs.is_empty();
        for (i, &a) in args.iter().enumerate() {
            if Some(i) == maskIdx {
                continue;
            }
            let Some(c) = argClass(info.argType(i)) else {
                continue;
            };
            if !variadic && c != RegClass::K && c != RegClass::H && !regs.iter().any(|(rc, _)| *rc == c) {
                regs.push((c, a));
            } else {
                slotArgs.push((c, a));
            }
        }

        let slots: Vec<StackSlot> = slotArgs.iter().map(|&(c, a)| self.forceStackRef(c, a)).collect();
        for &(c, a) in &regs {
            self.load(c, a, pos);
        }
        if let Some(m) = mask {
            self.loadk(m, v, pos);
        }
        self.clobber(v);
        let hout = (info.rettype & ST_HASH != 0).then(|| self.stack.allocSlot(RegClass::H, v.id));

        self.op(bc);
        if let Some(h) = hout {
            self.u16(h);
        }
        if variadic {
            self.u32((slots.len() / info.vaArgs.len()) as u32);
        }
        for s in slots {
            self.u16(s);
        }
        self.immediate(v);
        self.define(v);
        self.release(v);
    }

    fn emitFalse(&mut self, v: &Value) {
        self.clobber(v);
        self.op(BcOp::False);
        self.define(v);
    }

    fn emitLogical(&mut self, v: &Value, bc: BcOp) {
        let pos = v.id;
        let (a, b) = (v.args[0], v.args[1]);
        let (reg, other) = if self.cur(RegClass::K) == Some(b) { (b, a) } else { (a, b) };
        let slot = self.forceStackRef(RegClass::K, other);
        self.load(RegClass::K, reg, pos);
        self.spill(RegClass::K, pos);
        self.op(bc);
        self.u16(slot);
        self.define(v);
        self.release(v);
    }

    /// nand(a, b) keeps the lanes of `b` that are not in `a`.
    fn emitNand(&mut self, v: &Value) {
        let pos = v.id;
        let (a, b) = (v.args[0], v.args[1]);
        if self.cur(RegClass::K) == Some(a) {
            let slot = self.forceStackRef(RegClass::K, b);
            self.spill(RegClass::K, pos);
            self.op(BcOp::AndNotK);
            self.u16(slot);
        } else {
            let slot = self.forceStackRef(RegClass::K, a);
            self.load(RegClass::K, b, pos);
            self.spill(RegClass::K, pos);
            self.op(BcOp::NandK);
            self.u16(slot);
        }
        self.define(v);
        self.release(v);
    }

    /// Field lookup continuing from a previously found field.
    fn emitDot2(&mut self, v: &Value) {
        let pos = v.id;
        let (base, prev, want) = (v.args[0], v.args[1], v.args[3]);
        self.load(RegClass::B, base, pos);
        self.load(RegClass::V, prev, pos);
        let sym = self.symbol(v);
        if want == prev {
            self.loadk(prev, v, pos);
            self.clobber(v);
            self.op(BcOp::FindSym3);
            self.u32(sym);
        } else if self.cur(RegClass::K) == Some(prev) {
            let slot = self.forceStackRef(RegClass::K, want);
            self.clobber(v);
            self.op(BcOp::FindSym2Rev);
            self.u16(slot);
            self.u32(sym);
        } else {
            let slot = self.forceStackRef(RegClass::K, prev);
            self.loadk(want, v, pos);
            self.clobber(v);
            self.op(BcOp::FindSym2);
            self.u16(slot);
            self.u32(sym);
        }
        self.define(v);
        self.release(v);
    }

    fn emitStore(&mut self, v: &Value) {
        let pos = v.id;
        let (val, k) = (v.args[1], v.args[2]);
        let Some(i) = v.imm.asI64() else {
            panic!("store without a slot index: {}", v.imm);
        };
        self.load(RegClass::V, val, pos);
        self.loadk(k, v, pos);
        self.op(BcOp::SaveZeroV);
        self.u16(stackSlotFromIndex(RegClass::V, i as usize));
        self.release(v);
    }

    fn emitRet(&mut self, v: &Value) {
        let pos = v.id;
        let info = v.info();
        let mut mask = None;
        for (i, &a) in v.args.iter().enumerate() {
            match argClass(info.argType(i)) {
                Some(RegClass::K) => mask = Some(a),
                Some(c) => self.load(c, a, pos),
                None => {}
            }
        }
        if let Some(k) = mask {
            self.loadk(k, v, pos);
        }
        self.op(BcOp::Ret);
    }

    fn emit(&mut self, v: &Value) {
        let info = v.info();
        trace!("emit v{} = {}", v.id, info.text);
        match info.emit {
            Emit::None => {}
            Emit::False => self.emitFalse(v),
            Emit::Logical => {
                let Some(bc) = info.bc else {
                    panic!("{} has no bytecode", info.text);
                };
                self.emitLogical(v, bc)
            }
            Emit::Nand => self.emitNand(v),
            Emit::Dot => self.emitAuto(v, BcOp::FindSym),
            Emit::Dot2 => self.emitDot2(v),
            Emit::StoreV => self.emitStore(v),
            Emit::Ret => self.emitRet(v),
            Emit::Auto | Emit::Cmp | Emit::ConstCmp | Emit::Const | Emit::Slice | Emit::HashMember => {
                let Some(bc) = info.bc else {
                    panic!("{} has no bytecode", info.text);
                };
                self.emitAuto(v, bc)
            }
        }
    }
}

/// Compiles `prog` against `st`.
///
/// The program is symbolized, optimized and lowered; literals that mention
/// symbols are interned into `st`, and the resulting bytecode carries a
/// snapshot of the table for decoding its output.
pub fn compile(prog: &mut Prog, st: &mut Symtab, config: VmConfig) -> Result<Bytecode> {
    let errs = prog.errors();
    if let Some(first) = errs.first() {
        let mut msg = first.to_string();
        if errs.len() > 1 {
            msg.push_str(&format!(" (and {} more errors)", errs.len() - 1));
        }
        return Err(VmError::IllTyped(msg));
    }
    prog.symbolize(st)?;
    prog.optimize();

    let mut c = Compiler::new(st, config, prog);
    for v in &prog.values {
        c.emit(v);
    }
    if let Some(n) = c.stack.overflow() {
        return Err(VmError::StackOverflow(n));
    }
    if c.litbuf.len() >= SCRATCH_BIT as usize {
        return Err(VmError::LiteralTooLarge(c.litbuf.len()));
    }
    let vstacksize = c.stack.stackSize();
    let Compiler { out, litbuf, dict, trees, .. } = c;

    let mut bc = Bytecode::new(config);
    bc.compiled = out;
    bc.vstacksize = vstacksize;
    bc.savedlit = litbuf;
    bc.dict = dict;
    bc.trees = trees;
    bc.generation = st.generation();
    bc.symtab = Some(Arc::new(st.clone()));
    bc.reservedSlots = prog.reservedSlots;
    bc.prepare();
    debug!(
        "compiled {} values into {} bytes of code, {} bytes of stack, {} bytes of literals",
        prog.values.len(),
        bc.compiled.len(),
        bc.vstacksize,
        bc.savedlit.len()
    );
    Ok(bc)
}

/// Rebuilds `bc` from `src` when the symbols it was compiled against have
/// changed in `st`. Returns whether a recompilation happened.
pub fn recompile(st: &mut Symtab, src: &Prog, dst: &mut Prog, bc: &mut Bytecode) -> Result<bool> {
    if !bc.isEmpty() {
        if bc.generation == st.generation() {
            return Ok(false);
        }
        if !dst.isStale(st) {
            bc.generation = st.generation();
            bc.symtab = Some(Arc::new(st.clone()));
            return Ok(false);
        }
    }
    debug!("recompiling for symbol table generation {}", st.generation());
    *dst = src.clone();
    *bc = compile(dst, st, bc.config)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{CmpOp, Expr};
    use crate::ion::Field;
    use crate::level::OptLevel;

    fn row(fields: &[(&str, Datum)]) -> Datum {
        Datum::Struct(
            fields
                .iter()
                .map(|(l, v)| Field {
                    label: l.to_string(),
                    value: v.clone(),
                })
                .collect(),
        )
    }

    fn encode(st: &mut Symtab, rows: &[Datum]) -> Vec<u8> {
        let mut out = vec![];
        for r in rows {
            out.extend(r.toBytes(st));
        }
        out
    }

    fn filter(e: &Expr, rows: &[Datum], config: VmConfig) -> Vec<bool> {
        let mut st = Symtab::new();
        let input = encode(&mut st, rows);
        let delims = ion::rowDelims(&input).unwrap();
        let mut p = Prog::new();
        let k = p.compileBool(e);
        p.returnBool(k);
        let mut bc = compile(&mut p, &mut st, config).unwrap();
        bc.evalFilter(&input, &delims).unwrap()
    }

    fn rows() -> Vec<Datum> {
        (0..20)
            .map(|i| {
                row(&[
                    ("a", Datum::Int(i)),
                    ("b", Datum::String(if i % 3 == 0 { "xyz".into() } else { "abc".into() })),
                    ("c", Datum::Float(i as f64 / 2.0)),
                ])
            })
            .collect()
    }

    #[test]
    fn test_compile_filter() {
        let e = Expr::cmp(CmpOp::Gt, Expr::path("a"), Expr::lit(12i64));
        let out = filter(&e, &rows(), VmConfig::default());
        let want: Vec<bool> = (0..20).map(|i| i > 12).collect();
        assert_eq!(out, want);
    }

    #[test]
    fn test_compile_spills() {
        // `a` and `b` are parsed once and reloaded after the mask is reused
        let e = Expr::or(
            Expr::and(
                Expr::cmp(CmpOp::Eq, Expr::path("b"), Expr::lit("xyz")),
                Expr::cmp(CmpOp::Lt, Expr::path("a"), Expr::lit(10i64)),
            ),
            Expr::and(
                Expr::cmp(CmpOp::Eq, Expr::path("b"), Expr::lit("abc")),
                Expr::cmp(CmpOp::Ge, Expr::path("a"), Expr::lit(17i64)),
            ),
        );
        let out = filter(&e, &rows(), VmConfig::default());
        let want: Vec<bool> = (0..20).map(|i| if i % 3 == 0 { i < 10 } else { i >= 17 }).collect();
        assert_eq!(out, want);
    }

    #[test]
    fn test_missing_field_is_false() {
        let e = Expr::cmp(CmpOp::Eq, Expr::path("nope"), Expr::lit(1i64));
        let out = filter(&e, &rows(), VmConfig::default());
        assert!(out.iter().all(|x| !x));
    }

    #[test]
    fn test_levels_agree() {
        let e = Expr::and(
            Expr::StringMatch(crate::expr::StringMatch::Contains, false, Box::new(Expr::path("b")), "y".into()),
            Expr::cmp(CmpOp::Le, Expr::path("a"), Expr::lit(9i64)),
        );
        let base = filter(&e, &rows(), VmConfig::withLevel(OptLevel::None));
        let v2 = filter(&e, &rows(), VmConfig::withLevel(OptLevel::V2));
        assert_eq!(base, v2);
        assert_eq!(base.iter().filter(|&&x| x).count(), 4);
    }

    #[test]
    fn test_ill_typed() {
        let mut st = Symtab::new();
        let mut p = Prog::new();
        let a = p.errorf("first problem");
        let b = p.errorf("second problem");
        let k = p.and(a, b);
        p.returnBool(k);
        let err = compile(&mut p, &mut st, VmConfig::default()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("problem"), "{}", msg);
        assert!(msg.contains("(and 1 more errors)"), "{}", msg);

        let mut empty = Prog::new();
        assert!(compile(&mut empty, &mut st, VmConfig::default()).is_err());
    }

    #[test]
    fn test_recompile_on_new_symbols() {
        let mut st = Symtab::new();
        let mut src = Prog::new();
        let k = src.compileBool(&Expr::cmp(CmpOp::Eq, Expr::path("x"), Expr::lit(5i64)));
        src.returnBool(k);

        let mut dst = Prog::new();
        let mut bc = Bytecode::new(VmConfig::default());
        assert!(recompile(&mut st, &src, &mut dst, &mut bc).unwrap());
        assert!(!recompile(&mut st, &src, &mut dst, &mut bc).unwrap());

        // an unrelated symbol bumps the generation but not the lookups
        st.intern("unrelated");
        assert!(!recompile(&mut st, &src, &mut dst, &mut bc).unwrap());
        assert_eq!(bc.generation, st.generation());

        // `x` now exists, so the constant-false program is stale
        let input = encode(&mut st, &[row(&[("x", Datum::Int(5))]), row(&[("x", Datum::Int(6))])]);
        assert!(recompile(&mut st, &src, &mut dst, &mut bc).unwrap());
        let delims = ion::rowDelims(&input).unwrap();
        assert_eq!(bc.evalFilter(&input, &delims).unwrap(), vec![true, false]);
    }

    #[test]
    fn test_hashed_in_list() {
        let set: Vec<Datum> = [3i64, 5, 7, 11, 13].iter().map(|&i| Datum::Int(i)).collect();
        let e = Expr::In(Box::new(Expr::path("a")), set);
        let out = filter(&e, &rows(), VmConfig::default());
        let want: Vec<bool> = (0..20).map(|i| [3, 5, 7, 11, 13].contains(&i)).collect();
        assert_eq!(out, want);
    }

    #[test]
    fn test_explain_lists_code() {
        let mut st = Symtab::new();
        st.intern("a");
        let mut p = Prog::new();
        let k = p.compileBool(&Expr::cmp(CmpOp::Gt, Expr::path("a"), Expr::lit(1i64)));
        p.returnBool(k);
        let bc = compile(&mut p, &mut st, VmConfig::default()).unwrap();
        let text = bc.explain();
        assert!(text.contains("findsym"), "{}", text);
        assert!(text.trim_end().ends_with("ret"), "{}", text);
    }
}
