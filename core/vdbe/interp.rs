//! The bytecode interpreter.
//!
//! One [`Machine`] lives for a single run over at most [`LANES`] rows. Every
//! instruction only touches the lanes of the current K register; lanes
//! outside it keep their previous contents, except for the blends whose
//! whole purpose is to merge two registers.

use log::{log_enabled, trace, Level};

use super::opcodes::BcOp;
use super::{datetime, hashBytes, hashBytesPlus, lanes, rd32, rd64, AggMem, BReg, ErrInfo, Lanes, RegexCache, VReg, VmRef};
use super::{LANES, SCRATCH_BIT, VREG_SIZE};
use crate::error::BcErr;
use crate::expr::Timepart;
use crate::ion::{self, Buffer, Symtab, Type};
use crate::radix::RadixTree64;

type Res<T> = std::result::Result<T, BcErr>;

const HREG_SIZE: usize = 256;

/// Live registers.
#[derive(Default)]
struct Regs {
    k: u16,
    s: [u64; LANES],
    v: VReg,
    b: BReg,
    l: [u32; LANES],
}

fn mkSlice(addr: u32, len: usize) -> u64 {
    addr as u64 | (len as u64) << 32
}

fn bit(i: usize) -> u16 {
    1 << i
}

/// Accumulator update applied by the aggregate opcodes.
///
/// Every accumulator is an 8-byte value followed by an 8-byte count of the
/// rows folded into it; `Count` is only the 8-byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acc {
    SumF,
    SumI,
    MinF,
    MinI,
    MaxF,
    MaxI,
    And,
    Or,
    Xor,
    Count,
}

impl Acc {
    fn of(op: BcOp) -> Option<Acc> {
        use BcOp::*;
        let acc = match op {
            AggSumF | AggAvgF | AggSlotAddF | AggSlotAvgF => Acc::SumF,
            AggSumI | AggAvgI | AggSlotAddI | AggSlotAvgI => Acc::SumI,
            AggMinF | AggSlotMinF => Acc::MinF,
            AggMinI | AggMinTs | AggSlotMinI | AggSlotMinTs => Acc::MinI,
            AggMaxF | AggSlotMaxF => Acc::MaxF,
            AggMaxI | AggMaxTs | AggSlotMaxI | AggSlotMaxTs => Acc::MaxI,
            AggAndI | AggAndK | AggSlotAndI | AggSlotAndK => Acc::And,
            AggOrI | AggOrK | AggSlotOrI | AggSlotOrK => Acc::Or,
            AggXorI | AggSlotXorI => Acc::Xor,
            AggCount | AggSlotCount => Acc::Count,
            _ => return None,
        };
        Some(acc)
    }

    fn width(self) -> usize {
        if self == Acc::Count {
            8
        } else {
            16
        }
    }
}

fn accumulate(acc: Acc, region: &mut [u8], x: u64) {
    let cur = rd64(region, 0);
    let next = match acc {
        Acc::Count => {
            region[..8].copy_from_slice(&(cur + 1).to_le_bytes());
            return;
        }
        Acc::SumF => (f64::from_bits(cur) + f64::from_bits(x)).to_bits(),
        Acc::SumI => (cur as i64).wrapping_add(x as i64) as u64,
        Acc::MinF => ion::minFloatNanFirst(f64::from_bits(cur), f64::from_bits(x)).to_bits(),
        Acc::MinI => (cur as i64).min(x as i64) as u64,
        Acc::MaxF => ion::maxFloatNanFirst(f64::from_bits(cur), f64::from_bits(x)).to_bits(),
        Acc::MaxI => (cur as i64).max(x as i64) as u64,
        Acc::And => cur & x,
        Acc::Or => cur | x,
        Acc::Xor => cur ^ x,
    };
    region[..8].copy_from_slice(&next.to_le_bytes());
    let n = rd64(region, 8) + 1;
    region[8..16].copy_from_slice(&n.to_le_bytes());
}

fn zipF(r: &mut Regs, b: &[u64; LANES], f: impl Fn(f64, f64) -> f64) {
    for i in lanes(r.k) {
        r.s[i] = f(f64::from_bits(r.s[i]), f64::from_bits(b[i])).to_bits();
    }
}

fn zipI(r: &mut Regs, b: &[u64; LANES], f: impl Fn(i64, i64) -> i64) {
    for i in lanes(r.k) {
        r.s[i] = f(r.s[i] as i64, b[i] as i64) as u64;
    }
}

/// Like [`zipI`], but lanes where `f` has no result leave the predicate.
fn zipIChecked(r: &mut Regs, b: &[u64; LANES], f: impl Fn(i64, i64) -> Option<i64>) {
    for i in lanes(r.k) {
        match f(r.s[i] as i64, b[i] as i64) {
            Some(x) => r.s[i] = x as u64,
            None => r.k &= !bit(i),
        }
    }
}

fn mapF(r: &mut Regs, f: impl Fn(f64) -> f64) {
    for i in lanes(r.k) {
        r.s[i] = f(f64::from_bits(r.s[i])).to_bits();
    }
}

fn mapI(r: &mut Regs, f: impl Fn(i64) -> i64) {
    for i in lanes(r.k) {
        r.s[i] = f(r.s[i] as i64) as u64;
    }
}

fn cmpF(r: &mut Regs, b: &[u64; LANES], f: impl Fn(f64, f64) -> bool) {
    let mut out = 0;
    for i in lanes(r.k) {
        if f(f64::from_bits(r.s[i]), f64::from_bits(b[i])) {
            out |= bit(i);
        }
    }
    r.k = out;
}

fn cmpI(r: &mut Regs, b: &[u64; LANES], f: impl Fn(i64, i64) -> bool) {
    let mut out = 0;
    for i in lanes(r.k) {
        if f(r.s[i] as i64, b[i] as i64) {
            out |= bit(i);
        }
    }
    r.k = out;
}

fn signF(x: f64) -> f64 {
    if x == 0.0 || x.is_nan() {
        x
    } else {
        x.signum()
    }
}

fn foldCase(b: &[u8]) -> Vec<u8> {
    match std::str::from_utf8(b) {
        Ok(s) => s.to_lowercase().into_bytes(),
        Err(_) => b.to_ascii_lowercase(),
    }
}

fn contains(hay: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || hay.windows(needle.len()).any(|w| w == needle)
}

/// Substring search that skips ahead to candidate first bytes.
fn containsSkip(hay: &[u8], needle: &[u8]) -> bool {
    let Some(&first) = needle.first() else {
        return true;
    };
    let mut i = 0;
    while i + needle.len() <= hay.len() {
        match hay[i..=hay.len() - needle.len()].iter().position(|&c| c == first) {
            Some(p) => {
                i += p;
                if &hay[i..i + needle.len()] == needle {
                    return true;
                }
                i += 1;
            }
            None => return false,
        }
    }
    false
}

/// Case-insensitive equality with an ASCII fast path.
fn eqFoldFast(t: &[u8], p: &[u8]) -> bool {
    if t.is_ascii() && p.is_ascii() {
        t.eq_ignore_ascii_case(p)
    } else {
        foldCase(t) == foldCase(p)
    }
}

fn isSpace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

pub(crate) struct Machine<'a, 'm> {
    pub code: &'a [u8],
    pub input: &'a [u8],
    pub scratch: &'a mut Vec<u8>,
    pub scratchCap: usize,
    pub vstack: &'a mut [u8],
    pub dict: &'a [String],
    pub trees: &'a [RadixTree64],
    pub symtab: Option<&'a Symtab>,
    pub regex: &'a mut RegexCache,
    pub agg: &'a mut AggMem<'m>,
    pub errinfo: &'a mut ErrInfo,
    pub pc: usize,
    /// pc of the instruction being executed
    pub opStart: usize,
}

impl<'a, 'm> Machine<'a, 'm> {
    fn bytes<const N: usize>(&mut self) -> Res<[u8; N]> {
        let b = self.code.get(self.pc..self.pc + N).ok_or(BcErr::Corrupt)?;
        let mut out = [0u8; N];
        out.copy_from_slice(b);
        self.pc += N;
        Ok(out)
    }

    fn u8(&mut self) -> Res<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u16(&mut self) -> Res<u16> {
        Ok(u16::from_le_bytes(self.bytes()?))
    }

    fn u32(&mut self) -> Res<u32> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn u64(&mut self) -> Res<u64> {
        Ok(u64::from_le_bytes(self.bytes()?))
    }

    fn slot(&mut self) -> Res<usize> {
        Ok(self.u16()? as usize)
    }

    fn timepart(&mut self) -> Res<Timepart> {
        Timepart::fromU8(self.u8()?).ok_or(BcErr::Corrupt)
    }

    /// Literal descriptor: offset into the pool, length, type byte, header length.
    fn litref(&mut self) -> Res<(u32, u32, u8, u8)> {
        let off = self.u32()?;
        let len = self.u32()?;
        let tlv = self.u8()?;
        let hlen = self.u8()?;
        Ok((off, len, tlv, hlen))
    }

    fn stack(&self, slot: usize, size: usize) -> Res<&[u8]> {
        self.vstack.get(slot..slot + size).ok_or(BcErr::Corrupt)
    }

    fn stackMut(&mut self, slot: usize, size: usize) -> Res<&mut [u8]> {
        self.vstack.get_mut(slot..slot + size).ok_or(BcErr::Corrupt)
    }

    fn loadK(&self, slot: usize) -> Res<u16> {
        let b = self.stack(slot, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn saveK(&mut self, slot: usize, k: u16) -> Res<()> {
        self.stackMut(slot, 2)?.copy_from_slice(&k.to_le_bytes());
        Ok(())
    }

    fn loadS(&self, slot: usize) -> Res<[u64; LANES]> {
        let b = self.stack(slot, LANES * 8)?;
        let mut out = [0u64; LANES];
        for (i, x) in out.iter_mut().enumerate() {
            *x = rd64(b, i * 8);
        }
        Ok(out)
    }

    fn saveS(&mut self, slot: usize, s: &[u64; LANES]) -> Res<()> {
        let b = self.stackMut(slot, LANES * 8)?;
        for (i, x) in s.iter().enumerate() {
            b[i * 8..i * 8 + 8].copy_from_slice(&x.to_le_bytes());
        }
        Ok(())
    }

    fn loadV(&self, slot: usize) -> Res<VReg> {
        Ok(VReg::load(self.stack(slot, VREG_SIZE)?))
    }

    fn saveV(&mut self, slot: usize, v: &VReg) -> Res<()> {
        v.store(self.stackMut(slot, VREG_SIZE)?);
        Ok(())
    }

    fn loadB(&self, slot: usize) -> Res<BReg> {
        Ok(BReg::load(self.stack(slot, LANES * 8)?))
    }

    fn saveB(&mut self, slot: usize, b: &BReg) -> Res<()> {
        b.store(self.stackMut(slot, LANES * 8)?);
        Ok(())
    }

    fn loadL(&self, slot: usize) -> Res<[u32; LANES]> {
        let b = self.stack(slot, LANES * 4)?;
        let mut out = [0u32; LANES];
        for (i, x) in out.iter_mut().enumerate() {
            *x = rd32(b, i * 4);
        }
        Ok(out)
    }

    fn saveL(&mut self, slot: usize, l: &[u32; LANES]) -> Res<()> {
        let b = self.stackMut(slot, LANES * 4)?;
        for (i, x) in l.iter().enumerate() {
            b[i * 4..i * 4 + 4].copy_from_slice(&x.to_le_bytes());
        }
        Ok(())
    }

    fn loadH(&self, slot: usize) -> Res<[[u64; 2]; LANES]> {
        let b = self.stack(slot, HREG_SIZE)?;
        let mut out = [[0u64; 2]; LANES];
        for (i, h) in out.iter_mut().enumerate() {
            *h = [rd64(b, i * 16), rd64(b, i * 16 + 8)];
        }
        Ok(out)
    }

    fn saveH(&mut self, slot: usize, h: &[[u64; 2]; LANES]) -> Res<()> {
        let b = self.stackMut(slot, HREG_SIZE)?;
        for (i, x) in h.iter().enumerate() {
            b[i * 16..i * 16 + 8].copy_from_slice(&x[0].to_le_bytes());
            b[i * 16 + 8..i * 16 + 16].copy_from_slice(&x[1].to_le_bytes());
        }
        Ok(())
    }

    /// Scalar operand: a broadcast immediate or a stack slot.
    fn operand(&mut self, imm: bool) -> Res<[u64; LANES]> {
        if imm {
            Ok([self.u64()?; LANES])
        } else {
            let slot = self.slot()?;
            self.loadS(slot)
        }
    }

    fn mem(&self, addr: u32, len: u32) -> Res<&[u8]> {
        let (buf, off): (&[u8], usize) = if addr & SCRATCH_BIT != 0 {
            (&self.scratch[..], (addr & !SCRATCH_BIT) as usize)
        } else {
            (self.input, addr as usize)
        };
        buf.get(off..off + len as usize).ok_or(BcErr::Corrupt)
    }

    fn lane(&self, v: &VReg, i: usize) -> Res<&[u8]> {
        self.mem(v.offsets[i], v.sizes[i])
    }

    fn slice(&self, s: u64) -> Res<&[u8]> {
        self.mem(s as u32, (s >> 32) as u32)
    }

    /// Copies `b` into scratch and returns its address.
    fn append(&mut self, b: &[u8]) -> Res<u32> {
        if self.scratch.len() + b.len() > self.scratchCap {
            return Err(BcErr::MoreScratch);
        }
        let off = self.scratch.len();
        self.scratch.extend_from_slice(b);
        Ok(SCRATCH_BIT | off as u32)
    }

    fn boxLane(&mut self, v: &mut VReg, i: usize, enc: &[u8]) -> Res<()> {
        let addr = self.append(enc)?;
        v.setLane(i, addr, enc);
        Ok(())
    }

    fn strTest(&self, r: &mut Regs, f: impl Fn(&[u8]) -> bool) -> Res<()> {
        let mut out = 0;
        for i in lanes(r.k) {
            if f(self.slice(r.s[i])?) {
                out |= bit(i);
            }
        }
        r.k = out;
        Ok(())
    }

    fn valueTest(&self, r: &mut Regs, f: impl Fn(u8) -> bool) {
        let mut out = 0;
        for i in lanes(r.k) {
            if r.v.sizes[i] != 0 && f(r.v.tlv[i]) {
                out |= bit(i);
            }
        }
        r.k = out;
    }

    /// Finds the field labelled `sym` in the struct body `[start, end)`.
    /// Fields are sorted by symbol id, so the scan stops at the first
    /// larger label.
    fn scanStruct(&self, start: u64, end: u64, sym: u32) -> Res<Option<(u32, &[u8])>> {
        if start >= end {
            return Ok(None);
        }
        let body = self.mem(start as u32, (end - start) as u32)?;
        let mut pos = 0;
        while pos < body.len() {
            let (label, n) = ion::readLabel(&body[pos..]).ok_or(BcErr::Corrupt)?;
            let vstart = pos + n;
            let size = ion::sizeOf(body.get(vstart..).ok_or(BcErr::Corrupt)?).ok_or(BcErr::Corrupt)?;
            if label == sym {
                let addr = (start + vstart as u64) as u32;
                return Ok(Some((addr, &body[vstart..vstart + size])));
            }
            if label > sym {
                return Ok(None);
            }
            pos = vstart + size;
        }
        Ok(None)
    }

    /// Field lookup for lanes in `want`. Lanes in `prevK` resume the scan
    /// after the value currently in V, which must be an earlier field of
    /// the same struct.
    fn findSym(&self, r: &mut Regs, want: u16, prevK: u16, sym: u32) -> Res<()> {
        let mut out = 0;
        for i in lanes(want) {
            let end = r.b.offsets[i] as u64 + r.b.sizes[i] as u64;
            let start = if prevK & bit(i) != 0 {
                r.v.offsets[i] as u64 + r.v.sizes[i] as u64
            } else {
                r.b.offsets[i] as u64
            };
            match self.scanStruct(start, end, sym)? {
                Some((addr, enc)) => {
                    r.v.setLane(i, addr, enc);
                    out |= bit(i);
                }
                None => r.v.clearLane(i),
            }
        }
        r.k = out;
        Ok(())
    }

    fn countValues(body: &[u8], labels: bool) -> Res<u64> {
        let mut pos = 0;
        let mut n = 0;
        while pos < body.len() {
            if labels {
                let (_, c) = ion::readLabel(&body[pos..]).ok_or(BcErr::Corrupt)?;
                pos += c;
            }
            pos += ion::sizeOf(body.get(pos..).ok_or(BcErr::Corrupt)?).ok_or(BcErr::Corrupt)?;
            n += 1;
        }
        Ok(n)
    }

    fn aggPlain(&mut self, off: usize, acc: Acc, k: u16, vals: &[u64; LANES]) -> Res<()> {
        let AggMem::Plain(buf) = &mut *self.agg else {
            return Err(BcErr::Corrupt);
        };
        let region = buf.get_mut(off..off + acc.width()).ok_or(BcErr::Corrupt)?;
        for i in lanes(k) {
            accumulate(acc, region, vals[i]);
        }
        Ok(())
    }

    fn aggBuckets(&mut self, off: usize, acc: Acc, k: u16, l: &[u32; LANES], vals: &[u64; LANES]) -> Res<()> {
        let AggMem::Buckets(tree) = &mut *self.agg else {
            return Err(BcErr::Corrupt);
        };
        let vsize = tree.vsize();
        let total = tree.values().len();
        for i in lanes(k) {
            let base = l[i] as usize;
            if base + vsize > total {
                return Err(BcErr::TreeCorrupt);
            }
            let region = tree.payloadMut(base).get_mut(off..off + acc.width()).ok_or(BcErr::TreeCorrupt)?;
            accumulate(acc, region, vals[i]);
        }
        Ok(())
    }

    pub fn run(&mut self, delims: &[VmRef]) -> Res<Lanes> {
        let valid: u16 = if delims.len() >= LANES { u16::MAX } else { (1u16 << delims.len()) - 1 };
        let mut r = Regs {
            k: valid,
            ..Regs::default()
        };
        for (i, d) in delims.iter().enumerate() {
            r.b.offsets[i] = d.offset;
            r.b.sizes[i] = d.size;
        }

        loop {
            self.opStart = self.pc;
            let id = self.u16()?;
            let op = BcOp::fromId(id).ok_or(BcErr::Corrupt)?;
            if log_enabled!(Level::Trace) {
                trace!("{:04} {:<22} k={:016b}", self.opStart, op.info().text, r.k);
            }
            match op {
                BcOp::Ret => {
                    return Ok(Lanes {
                        k: r.k,
                        s: r.s,
                        v: r.v,
                    })
                }

                BcOp::LoadK => {
                    let s = self.slot()?;
                    r.k = self.loadK(s)?;
                }
                BcOp::SaveK => {
                    let s = self.slot()?;
                    self.saveK(s, r.k)?;
                }
                BcOp::XchgK => {
                    let s = self.slot()?;
                    let k = self.loadK(s)?;
                    self.saveK(s, r.k)?;
                    r.k = k;
                }
                BcOp::LoadS => {
                    let s = self.slot()?;
                    r.s = self.loadS(s)?;
                }
                BcOp::SaveS => {
                    let s = self.slot()?;
                    self.saveS(s, &r.s)?;
                }
                BcOp::LoadV => {
                    let s = self.slot()?;
                    r.v = self.loadV(s)?;
                }
                BcOp::SaveV => {
                    let s = self.slot()?;
                    self.saveV(s, &r.v)?;
                }
                BcOp::LoadB => {
                    let s = self.slot()?;
                    r.b = self.loadB(s)?;
                }
                BcOp::SaveB => {
                    let s = self.slot()?;
                    self.saveB(s, &r.b)?;
                }
                BcOp::LoadL => {
                    let s = self.slot()?;
                    r.l = self.loadL(s)?;
                }
                BcOp::SaveL => {
                    let s = self.slot()?;
                    self.saveL(s, &r.l)?;
                }
                BcOp::SaveZeroV => {
                    let s = self.slot()?;
                    let mut v = r.v;
                    for i in lanes(!r.k) {
                        v.clearLane(i);
                    }
                    self.saveV(s, &v)?;
                }

                BcOp::False => {
                    r.k = 0;
                    r.v = VReg::default();
                }
                BcOp::AndK | BcOp::OrK | BcOp::XorK | BcOp::XnorK | BcOp::NandK | BcOp::AndNotK => {
                    let s = self.slot()?;
                    let m = self.loadK(s)?;
                    r.k = match op {
                        BcOp::AndK => r.k & m,
                        BcOp::OrK => r.k | m,
                        BcOp::XorK => r.k ^ m,
                        BcOp::XnorK => !(r.k ^ m) & valid,
                        BcOp::NandK => r.k & !m,
                        _ => !r.k & m,
                    };
                }
                BcOp::NotK => r.k = !r.k & valid,

                BcOp::CmpEqF | BcOp::CmpEqImmF => {
                    let b = self.operand(op == BcOp::CmpEqImmF)?;
                    cmpF(&mut r, &b, |x, y| x == y);
                }
                BcOp::CmpLtF | BcOp::CmpLtImmF => {
                    let b = self.operand(op == BcOp::CmpLtImmF)?;
                    cmpF(&mut r, &b, |x, y| x < y);
                }
                BcOp::CmpLeF | BcOp::CmpLeImmF => {
                    let b = self.operand(op == BcOp::CmpLeImmF)?;
                    cmpF(&mut r, &b, |x, y| x <= y);
                }
                BcOp::CmpGtF | BcOp::CmpGtImmF => {
                    let b = self.operand(op == BcOp::CmpGtImmF)?;
                    cmpF(&mut r, &b, |x, y| x > y);
                }
                BcOp::CmpGeF | BcOp::CmpGeImmF => {
                    let b = self.operand(op == BcOp::CmpGeImmF)?;
                    cmpF(&mut r, &b, |x, y| x >= y);
                }
                BcOp::CmpEqI | BcOp::CmpEqImmI => {
                    let b = self.operand(op == BcOp::CmpEqImmI)?;
                    cmpI(&mut r, &b, |x, y| x == y);
                }
                BcOp::CmpLtI | BcOp::CmpLtImmI => {
                    let b = self.operand(op == BcOp::CmpLtImmI)?;
                    cmpI(&mut r, &b, |x, y| x < y);
                }
                BcOp::CmpLeI | BcOp::CmpLeImmI => {
                    let b = self.operand(op == BcOp::CmpLeImmI)?;
                    cmpI(&mut r, &b, |x, y| x <= y);
                }
                BcOp::CmpGtI | BcOp::CmpGtImmI => {
                    let b = self.operand(op == BcOp::CmpGtImmI)?;
                    cmpI(&mut r, &b, |x, y| x > y);
                }
                BcOp::CmpGeI | BcOp::CmpGeImmI => {
                    let b = self.operand(op == BcOp::CmpGeImmI)?;
                    cmpI(&mut r, &b, |x, y| x >= y);
                }
                BcOp::CmpEqSlice => {
                    let b = self.operand(false)?;
                    let mut out = 0;
                    for i in lanes(r.k) {
                        if self.slice(r.s[i])? == self.slice(b[i])? {
                            out |= bit(i);
                        }
                    }
                    r.k = out;
                }

                BcOp::EqualV => {
                    let s = self.slot()?;
                    let other = self.loadV(s)?;
                    let mut out = 0;
                    for i in lanes(r.k) {
                        if r.v.sizes[i] != 0 && other.sizes[i] != 0 && self.lane(&r.v, i)? == self.lane(&other, i)? {
                            out |= bit(i);
                        }
                    }
                    r.k = out;
                }
                BcOp::EqualVLit => {
                    let (off, len, _, _) = self.litref()?;
                    let lit = self.mem(SCRATCH_BIT | off, len)?;
                    let mut out = 0;
                    for i in lanes(r.k) {
                        if r.v.sizes[i] != 0 && self.lane(&r.v, i)? == lit {
                            out |= bit(i);
                        }
                    }
                    r.k = out;
                }
                BcOp::IsNull => self.valueTest(&mut r, |t| t >> 4 == 0 || t & 0xF == 0xF),
                BcOp::IsNotNull => self.valueTest(&mut r, |t| t >> 4 != 0 && t & 0xF != 0xF),
                BcOp::IsTrue => self.valueTest(&mut r, |t| t == 0x11),
                BcOp::IsFalse => self.valueTest(&mut r, |t| t == 0x10),
                BcOp::CheckTag => {
                    let mask = self.u16()?;
                    let mut out = 0;
                    for i in lanes(r.k) {
                        if r.v.sizes[i] != 0 && Type::fromTag(r.v.tlv[i] >> 4).bit() & mask != 0 {
                            out |= bit(i);
                        } else {
                            r.v.clearLane(i);
                        }
                    }
                    r.k = out;
                }

                BcOp::ToInt | BcOp::ToF64 | BcOp::UnboxTs => {
                    let mut out = 0;
                    for i in lanes(r.k) {
                        if r.v.sizes[i] == 0 {
                            continue;
                        }
                        let enc = self.lane(&r.v, i)?;
                        let x = match op {
                            BcOp::ToInt => ion::readInt(enc).map(|x| x as u64),
                            BcOp::ToF64 => ion::readFloat(enc).map(f64::to_bits),
                            _ => ion::readTimestamp(enc).map(|x| x as u64),
                        };
                        if let Some(x) = x {
                            r.s[i] = x;
                            out |= bit(i);
                        }
                    }
                    r.k = out;
                }
                BcOp::Unpack => {
                    let want = self.u8()?;
                    let mut out = 0;
                    for i in lanes(r.k) {
                        if r.v.sizes[i] == 0 {
                            continue;
                        }
                        let ty = Type::fromTag(r.v.tlv[i] >> 4);
                        let hlen = r.v.hlen[i] as u32;
                        if ty as u8 == want && matches!(ty, Type::String | Type::List) {
                            r.s[i] = mkSlice(r.v.offsets[i] + hlen, (r.v.sizes[i] - hlen) as usize);
                            out |= bit(i);
                        } else if want == Type::String as u8 && ty == Type::Symbol {
                            let st = self.symtab.ok_or(BcErr::NullSymbolTable)?;
                            let enc = self.lane(&r.v, i)?;
                            let id = ion::readUintMag(&enc[hlen as usize..]).ok_or(BcErr::Corrupt)?;
                            let Some(name) = st.get(id as u32) else {
                                continue;
                            };
                            let addr = self.append(name.as_bytes())?;
                            r.s[i] = mkSlice(addr, name.len());
                            out |= bit(i);
                        }
                    }
                    r.k = out;
                }
                BcOp::CvtI64ToF64 => {
                    for i in lanes(r.k) {
                        r.s[i] = (r.s[i] as i64 as f64).to_bits();
                    }
                }
                BcOp::CvtF64ToI64 => {
                    for i in lanes(r.k) {
                        r.s[i] = f64::from_bits(r.s[i]) as i64 as u64;
                    }
                }
                BcOp::CvtKToI64 | BcOp::CvtKToF64 => {
                    let s = self.slot()?;
                    let m = self.loadK(s)?;
                    for i in lanes(r.k) {
                        let x = (m >> i & 1) as u64;
                        r.s[i] = if op == BcOp::CvtKToI64 { x } else { (x as f64).to_bits() };
                    }
                }

                BcOp::CmpStrEqCs
                | BcOp::CmpStrEqCi
                | BcOp::CmpStrEqCiV2
                | BcOp::ContainsPrefixCs
                | BcOp::ContainsPrefixCi
                | BcOp::ContainsSuffixCs
                | BcOp::ContainsSuffixCi
                | BcOp::ContainsSubstrCs
                | BcOp::ContainsSubstrCsV2
                | BcOp::ContainsSubstrCi
                | BcOp::LikeCs
                | BcOp::LikeCi => {
                    let idx = self.u16()? as usize;
                    let dict = self.dict;
                    let pat = dict.get(idx).ok_or(BcErr::Corrupt)?;
                    let p = pat.as_bytes();
                    match op {
                        BcOp::CmpStrEqCs => self.strTest(&mut r, |t| t == p)?,
                        BcOp::CmpStrEqCi => {
                            let fp = foldCase(p);
                            self.strTest(&mut r, |t| foldCase(t) == fp)?
                        }
                        BcOp::CmpStrEqCiV2 => self.strTest(&mut r, |t| eqFoldFast(t, p))?,
                        BcOp::ContainsPrefixCs => self.strTest(&mut r, |t| t.starts_with(p))?,
                        BcOp::ContainsPrefixCi => {
                            let fp = foldCase(p);
                            self.strTest(&mut r, |t| foldCase(t).starts_with(&fp))?
                        }
                        BcOp::ContainsSuffixCs => self.strTest(&mut r, |t| t.ends_with(p))?,
                        BcOp::ContainsSuffixCi => {
                            let fp = foldCase(p);
                            self.strTest(&mut r, |t| foldCase(t).ends_with(&fp))?
                        }
                        BcOp::ContainsSubstrCs => self.strTest(&mut r, |t| contains(t, p))?,
                        BcOp::ContainsSubstrCsV2 => self.strTest(&mut r, |t| containsSkip(t, p))?,
                        BcOp::ContainsSubstrCi => {
                            let fp = foldCase(p);
                            self.strTest(&mut r, |t| contains(&foldCase(t), &fp))?
                        }
                        _ => {
                            let re = self.regex.get(pat, op == BcOp::LikeCi).ok_or(BcErr::Corrupt)?;
                            self.strTest(&mut r, |t| re.is_match(t))?
                        }
                    }
                }
                BcOp::TrimWsLeft | BcOp::TrimWsRight | BcOp::TrimWsBoth => {
                    for i in lanes(r.k) {
                        let t = self.slice(r.s[i])?;
                        let mut start = 0;
                        let mut end = t.len();
                        if op != BcOp::TrimWsRight {
                            while start < end && isSpace(t[start]) {
                                start += 1;
                            }
                        }
                        if op != BcOp::TrimWsLeft {
                            while end > start && isSpace(t[end - 1]) {
                                end -= 1;
                            }
                        }
                        r.s[i] = mkSlice(r.s[i] as u32 + start as u32, end - start);
                    }
                }
                BcOp::CharLength => {
                    for i in lanes(r.k) {
                        let t = self.slice(r.s[i])?;
                        r.s[i] = t.iter().filter(|&&c| c & 0xC0 != 0x80).count() as u64;
                    }
                }
                BcOp::CharLengthV2 => {
                    for i in lanes(r.k) {
                        let t = self.slice(r.s[i])?;
                        r.s[i] = match std::str::from_utf8(t) {
                            Ok(s) => s.chars().count(),
                            Err(_) => t.iter().filter(|&&c| c & 0xC0 != 0x80).count(),
                        } as u64;
                    }
                }

                BcOp::AddF | BcOp::AddImmF => {
                    let b = self.operand(op == BcOp::AddImmF)?;
                    zipF(&mut r, &b, |x, y| x + y);
                }
                BcOp::AddI | BcOp::AddImmI => {
                    let b = self.operand(op == BcOp::AddImmI)?;
                    zipI(&mut r, &b, i64::wrapping_add);
                }
                BcOp::SubF | BcOp::SubImmF => {
                    let b = self.operand(op == BcOp::SubImmF)?;
                    zipF(&mut r, &b, |x, y| x - y);
                }
                BcOp::SubI | BcOp::SubImmI => {
                    let b = self.operand(op == BcOp::SubImmI)?;
                    zipI(&mut r, &b, i64::wrapping_sub);
                }
                BcOp::RSubF | BcOp::RSubImmF => {
                    let b = self.operand(op == BcOp::RSubImmF)?;
                    zipF(&mut r, &b, |x, y| y - x);
                }
                BcOp::RSubI | BcOp::RSubImmI => {
                    let b = self.operand(op == BcOp::RSubImmI)?;
                    zipI(&mut r, &b, |x, y| y.wrapping_sub(x));
                }
                BcOp::MulF | BcOp::MulImmF => {
                    let b = self.operand(op == BcOp::MulImmF)?;
                    zipF(&mut r, &b, |x, y| x * y);
                }
                BcOp::MulI | BcOp::MulImmI => {
                    let b = self.operand(op == BcOp::MulImmI)?;
                    zipI(&mut r, &b, i64::wrapping_mul);
                }
                BcOp::DivF | BcOp::DivImmF => {
                    let b = self.operand(op == BcOp::DivImmF)?;
                    zipF(&mut r, &b, |x, y| x / y);
                }
                BcOp::DivI | BcOp::DivImmI => {
                    let b = self.operand(op == BcOp::DivImmI)?;
                    zipIChecked(&mut r, &b, |x, y| (y != 0).then(|| x.wrapping_div(y)));
                }
                BcOp::RDivF | BcOp::RDivImmF => {
                    let b = self.operand(op == BcOp::RDivImmF)?;
                    zipF(&mut r, &b, |x, y| y / x);
                }
                BcOp::RDivI | BcOp::RDivImmI => {
                    let b = self.operand(op == BcOp::RDivImmI)?;
                    zipIChecked(&mut r, &b, |x, y| (x != 0).then(|| y.wrapping_div(x)));
                }
                BcOp::ModF | BcOp::ModImmF => {
                    let b = self.operand(op == BcOp::ModImmF)?;
                    zipF(&mut r, &b, |x, y| x % y);
                }
                BcOp::ModI | BcOp::ModImmI => {
                    let b = self.operand(op == BcOp::ModImmI)?;
                    zipIChecked(&mut r, &b, |x, y| (y != 0).then(|| x.wrapping_rem(y)));
                }
                BcOp::RModF | BcOp::RModImmF => {
                    let b = self.operand(op == BcOp::RModImmF)?;
                    zipF(&mut r, &b, |x, y| y % x);
                }
                BcOp::RModI | BcOp::RModImmI => {
                    let b = self.operand(op == BcOp::RModImmI)?;
                    zipIChecked(&mut r, &b, |x, y| (x != 0).then(|| y.wrapping_rem(x)));
                }
                BcOp::MinValueF | BcOp::MinValueImmF => {
                    let b = self.operand(op == BcOp::MinValueImmF)?;
                    zipF(&mut r, &b, f64::min);
                }
                BcOp::MinValueI | BcOp::MinValueImmI => {
                    let b = self.operand(op == BcOp::MinValueImmI)?;
                    zipI(&mut r, &b, i64::min);
                }
                BcOp::MaxValueF | BcOp::MaxValueImmF => {
                    let b = self.operand(op == BcOp::MaxValueImmF)?;
                    zipF(&mut r, &b, f64::max);
                }
                BcOp::MaxValueI | BcOp::MaxValueImmI => {
                    let b = self.operand(op == BcOp::MaxValueImmI)?;
                    zipI(&mut r, &b, i64::max);
                }
                BcOp::HypotF => {
                    let b = self.operand(false)?;
                    zipF(&mut r, &b, f64::hypot);
                }
                BcOp::PowF => {
                    let b = self.operand(false)?;
                    zipF(&mut r, &b, f64::powf);
                }
                BcOp::Atan2F => {
                    let b = self.operand(false)?;
                    zipF(&mut r, &b, f64::atan2);
                }
                BcOp::BroadcastImmF | BcOp::BroadcastImmI => {
                    let x = self.u64()?;
                    for i in lanes(r.k) {
                        r.s[i] = x;
                    }
                }

                BcOp::AbsF => mapF(&mut r, f64::abs),
                BcOp::AbsI => mapI(&mut r, i64::wrapping_abs),
                BcOp::NegF => mapF(&mut r, |x| -x),
                BcOp::NegI => mapI(&mut r, i64::wrapping_neg),
                BcOp::SignF => mapF(&mut r, signF),
                BcOp::SignI => mapI(&mut r, i64::signum),
                BcOp::SquareF => mapF(&mut r, |x| x * x),
                BcOp::SquareI => mapI(&mut r, |x| x.wrapping_mul(x)),
                BcOp::RoundF => mapF(&mut r, f64::round),
                BcOp::RoundEvenF => mapF(&mut r, f64::round_ties_even),
                BcOp::TruncF => mapF(&mut r, f64::trunc),
                BcOp::FloorF => mapF(&mut r, f64::floor),
                BcOp::CeilF => mapF(&mut r, f64::ceil),
                BcOp::SqrtF => mapF(&mut r, f64::sqrt),
                BcOp::CbrtF => mapF(&mut r, f64::cbrt),
                BcOp::ExpF => mapF(&mut r, f64::exp),
                BcOp::LnF => mapF(&mut r, f64::ln),
                BcOp::Log2F => mapF(&mut r, f64::log2),
                BcOp::Log10F => mapF(&mut r, f64::log10),
                BcOp::SinF => mapF(&mut r, f64::sin),
                BcOp::CosF => mapF(&mut r, f64::cos),
                BcOp::TanF => mapF(&mut r, f64::tan),
                BcOp::AsinF => mapF(&mut r, f64::asin),
                BcOp::AcosF => mapF(&mut r, f64::acos),
                BcOp::AtanF => mapF(&mut r, f64::atan),

                BcOp::BlendV | BcOp::BlendRevV => {
                    let s = self.slot()?;
                    let other = self.loadV(s)?;
                    let take = if op == BcOp::BlendV { r.k } else { !r.k & valid };
                    for i in lanes(take) {
                        r.v.copyLane(i, &other);
                    }
                }
                BcOp::BlendS | BcOp::BlendRevS => {
                    let other = self.operand(false)?;
                    let take = if op == BcOp::BlendS { r.k } else { !r.k & valid };
                    for i in lanes(take) {
                        r.s[i] = other[i];
                    }
                }

                BcOp::BoxK => {
                    let s = self.slot()?;
                    let m = self.loadK(s)?;
                    for i in lanes(r.k) {
                        let enc = [0x10 | (m >> i & 1) as u8];
                        self.boxLane(&mut r.v, i, &enc)?;
                    }
                }
                BcOp::BoxI | BcOp::BoxF | BcOp::BoxStr | BcOp::BoxTs => {
                    let mut buf = Buffer::new();
                    for i in lanes(r.k) {
                        buf.reset();
                        match op {
                            BcOp::BoxI => buf.writeInt(r.s[i] as i64),
                            BcOp::BoxF => buf.writeFloat(f64::from_bits(r.s[i])),
                            BcOp::BoxTs => buf.writeTimestamp(r.s[i] as i64),
                            _ => buf.writeStringBytes(self.slice(r.s[i])?),
                        }
                        self.boxLane(&mut r.v, i, buf.bytes())?;
                    }
                }
                BcOp::MakeList => {
                    let n = self.u32()? as usize;
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        let vs = self.slot()?;
                        let ks = self.slot()?;
                        items.push((self.loadV(vs)?, self.loadK(ks)?));
                    }
                    let mut buf = Buffer::new();
                    for i in lanes(r.k) {
                        buf.reset();
                        buf.beginList();
                        for (v, k) in &items {
                            if k & bit(i) != 0 && v.sizes[i] != 0 {
                                buf.writeRaw(self.lane(v, i)?);
                            }
                        }
                        buf.endList();
                        self.boxLane(&mut r.v, i, buf.bytes())?;
                    }
                }

                BcOp::LitRefV => {
                    let (off, len, tlv, hlen) = self.litref()?;
                    for i in lanes(r.k) {
                        r.v.offsets[i] = SCRATCH_BIT | off;
                        r.v.sizes[i] = len;
                        r.v.tlv[i] = tlv;
                        r.v.hlen[i] = hlen;
                    }
                }
                BcOp::Tuple => {
                    let mut out = 0;
                    for i in lanes(r.k) {
                        if r.v.sizes[i] != 0 && Type::fromTag(r.v.tlv[i] >> 4) == Type::Struct {
                            let hlen = r.v.hlen[i] as u32;
                            r.b.offsets[i] = r.v.offsets[i] + hlen;
                            r.b.sizes[i] = r.v.sizes[i] - hlen;
                            out |= bit(i);
                        } else {
                            r.b.offsets[i] = 0;
                            r.b.sizes[i] = 0;
                        }
                    }
                    r.k = out;
                }
                BcOp::FindSym => {
                    let sym = self.u32()?;
                    let k = r.k;
                    self.findSym(&mut r, k, 0, sym)?;
                }
                BcOp::FindSym2 => {
                    let s = self.slot()?;
                    let sym = self.u32()?;
                    let prev = self.loadK(s)?;
                    let k = r.k;
                    self.findSym(&mut r, k, prev, sym)?;
                }
                BcOp::FindSym2Rev => {
                    let s = self.slot()?;
                    let sym = self.u32()?;
                    let want = self.loadK(s)?;
                    let k = r.k;
                    self.findSym(&mut r, want, k, sym)?;
                }
                BcOp::FindSym3 => {
                    let sym = self.u32()?;
                    let k = r.k;
                    self.findSym(&mut r, k, k, sym)?;
                }
                BcOp::Split => {
                    let mut out = 0;
                    for i in lanes(r.k) {
                        let addr = r.s[i] as u32;
                        let len = (r.s[i] >> 32) as usize;
                        if len == 0 {
                            r.v.clearLane(i);
                            continue;
                        }
                        let body = self.slice(r.s[i])?;
                        let size = ion::sizeOf(body).ok_or(BcErr::Corrupt)?;
                        r.v.setLane(i, addr, &body[..size]);
                        r.s[i] = mkSlice(addr + size as u32, len - size);
                        out |= bit(i);
                    }
                    r.k = out;
                }
                BcOp::ObjectSize => {
                    let mut out = 0;
                    for i in lanes(r.k) {
                        if r.v.sizes[i] == 0 {
                            continue;
                        }
                        let labels = match Type::fromTag(r.v.tlv[i] >> 4) {
                            Type::List | Type::Sexp => false,
                            Type::Struct => true,
                            _ => continue,
                        };
                        let enc = self.lane(&r.v, i)?;
                        r.s[i] = Self::countValues(&enc[r.v.hlen[i] as usize..], labels)?;
                        out |= bit(i);
                    }
                    r.k = out;
                }

                BcOp::DateAdd => {
                    let n = self.operand(false)?;
                    let part = self.timepart()?;
                    // out-of-range results leave the lane unchanged
                    for i in lanes(r.k) {
                        if let Some(t) = datetime::dateAdd(r.s[i] as i64, n[i] as i64, part) {
                            r.s[i] = t as u64;
                        }
                    }
                }
                BcOp::DateExtract | BcOp::DateTrunc => {
                    let part = self.timepart()?;
                    for i in lanes(r.k) {
                        let t = if op == BcOp::DateExtract {
                            datetime::dateExtract(r.s[i] as i64, part)
                        } else {
                            datetime::dateTrunc(r.s[i] as i64, part)
                        };
                        if let Some(t) = t {
                            r.s[i] = t as u64;
                        }
                    }
                }

                BcOp::HashValue => {
                    let dst = self.slot()?;
                    let mut h = [[0u64; 2]; LANES];
                    for i in lanes(r.k) {
                        h[i] = hashBytes(self.lane(&r.v, i)?);
                    }
                    self.saveH(dst, &h)?;
                }
                BcOp::HashValuePlus => {
                    let dst = self.slot()?;
                    let src = self.slot()?;
                    let prev = self.loadH(src)?;
                    let mut h = prev;
                    for i in lanes(r.k) {
                        h[i] = hashBytesPlus(prev[i], self.lane(&r.v, i)?);
                    }
                    self.saveH(dst, &h)?;
                }
                BcOp::HashMember | BcOp::HashLookup => {
                    let src = self.slot()?;
                    let t = self.u16()? as usize;
                    let h = self.loadH(src)?;
                    let trees = self.trees;
                    let tree = trees.get(t).ok_or(BcErr::Corrupt)?;
                    let mut out = 0;
                    for i in lanes(r.k) {
                        let hit = tree.lookup(h[i][0]).filter(|p| rd64(p, 0) == h[i][1]);
                        match (op, hit) {
                            (BcOp::HashMember, Some(_)) => out |= bit(i),
                            (BcOp::HashLookup, Some(p)) => {
                                let addr = SCRATCH_BIT | rd32(p, 8);
                                let enc = self.mem(addr, rd32(p, 12))?;
                                r.v.setLane(i, addr, enc);
                                out |= bit(i);
                            }
                            (BcOp::HashLookup, None) => r.v.clearLane(i),
                            _ => {}
                        }
                    }
                    r.k = out;
                }

                BcOp::AggAndK | BcOp::AggOrK => {
                    let s = self.slot()?;
                    let off = self.u32()? as usize;
                    let m = self.loadK(s)?;
                    let vals: [u64; LANES] = std::array::from_fn(|i| if m >> i & 1 != 0 { u64::MAX } else { 0 });
                    self.aggPlain(off, Acc::of(op).ok_or(BcErr::Corrupt)?, r.k, &vals)?;
                }
                BcOp::AggSumF
                | BcOp::AggSumI
                | BcOp::AggAvgF
                | BcOp::AggAvgI
                | BcOp::AggMinF
                | BcOp::AggMinI
                | BcOp::AggMaxF
                | BcOp::AggMaxI
                | BcOp::AggMinTs
                | BcOp::AggMaxTs
                | BcOp::AggAndI
                | BcOp::AggOrI
                | BcOp::AggXorI
                | BcOp::AggCount => {
                    let off = self.u32()? as usize;
                    self.aggPlain(off, Acc::of(op).ok_or(BcErr::Corrupt)?, r.k, &r.s)?;
                }

                BcOp::AggBucket => {
                    let hs = self.slot()?;
                    let h = self.loadH(hs)?;
                    let AggMem::Buckets(tree) = &*self.agg else {
                        return Err(BcErr::Corrupt);
                    };
                    let mut missing = 0;
                    for i in lanes(r.k) {
                        match tree.checkedOffset(h[i][0]) {
                            Err(()) => return Err(BcErr::TreeCorrupt),
                            Ok(None) => missing |= bit(i),
                            Ok(Some(off)) => r.l[i] = off as u32,
                        }
                    }
                    if missing != 0 {
                        *self.errinfo = ErrInfo {
                            abortMask: missing,
                            hslot: hs as u16,
                        };
                        return Err(BcErr::NeedRadix);
                    }
                }
                BcOp::AggSlotAndK | BcOp::AggSlotOrK => {
                    let s = self.slot()?;
                    let off = self.u32()? as usize;
                    let m = self.loadK(s)?;
                    let vals: [u64; LANES] = std::array::from_fn(|i| if m >> i & 1 != 0 { u64::MAX } else { 0 });
                    let l = r.l;
                    self.aggBuckets(off, Acc::of(op).ok_or(BcErr::Corrupt)?, r.k, &l, &vals)?;
                }
                BcOp::AggSlotAddF
                | BcOp::AggSlotAddI
                | BcOp::AggSlotAvgF
                | BcOp::AggSlotAvgI
                | BcOp::AggSlotMinF
                | BcOp::AggSlotMinI
                | BcOp::AggSlotMaxF
                | BcOp::AggSlotMaxI
                | BcOp::AggSlotMinTs
                | BcOp::AggSlotMaxTs
                | BcOp::AggSlotAndI
                | BcOp::AggSlotOrI
                | BcOp::AggSlotXorI
                | BcOp::AggSlotCount => {
                    let off = self.u32()? as usize;
                    let (l, s) = (r.l, r.s);
                    self.aggBuckets(off, Acc::of(op).ok_or(BcErr::Corrupt)?, r.k, &l, &s)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ion::{Datum, Field};
    use proptest::prelude::*;

    struct Asm(Vec<u8>);

    impl Asm {
        fn new() -> Self {
            Asm(vec![])
        }

        fn op(&mut self, op: BcOp) -> &mut Self {
            self.0.extend_from_slice(&op.id().to_le_bytes());
            self
        }

        fn u16(&mut self, x: u16) -> &mut Self {
            self.0.extend_from_slice(&x.to_le_bytes());
            self
        }

        fn u32(&mut self, x: u32) -> &mut Self {
            self.0.extend_from_slice(&x.to_le_bytes());
            self
        }

        fn u64(&mut self, x: u64) -> &mut Self {
            self.0.extend_from_slice(&x.to_le_bytes());
            self
        }
    }

    struct Fixture {
        input: Vec<u8>,
        scratch: Vec<u8>,
        vstack: Vec<u8>,
        regex: RegexCache,
        errinfo: ErrInfo,
        dict: Vec<String>,
        trees: Vec<RadixTree64>,
        st: Symtab,
    }

    impl Fixture {
        fn new(input: Vec<u8>) -> Self {
            Fixture {
                input,
                scratch: vec![],
                vstack: vec![0; 4096],
                regex: RegexCache::default(),
                errinfo: ErrInfo::default(),
                dict: vec![],
                trees: vec![],
                st: Symtab::new(),
            }
        }

        fn run(&mut self, code: &[u8], delims: &[VmRef], agg: &mut AggMem) -> Res<Lanes> {
            let mut m = Machine {
                code,
                input: &self.input,
                scratch: &mut self.scratch,
                scratchCap: 1 << 16,
                vstack: &mut self.vstack[..],
                dict: &self.dict[..],
                trees: &self.trees[..],
                symtab: Some(&self.st),
                regex: &mut self.regex,
                agg,
                errinfo: &mut self.errinfo,
                pc: 0,
                opStart: 0,
            };
            m.run(delims)
        }
    }

    fn scalarsIn(fx: &mut Fixture, slot: usize, vals: &[u64; LANES]) {
        for (i, x) in vals.iter().enumerate() {
            fx.vstack[slot + i * 8..slot + i * 8 + 8].copy_from_slice(&x.to_le_bytes());
        }
    }

    #[test]
    fn test_div_by_zero_drops_lane() {
        let mut fx = Fixture::new(vec![]);
        let mut num = [0u64; LANES];
        let mut den = [0u64; LANES];
        for i in 0..LANES {
            num[i] = (i as i64 * 10) as u64;
            den[i] = if i % 2 == 0 { 0 } else { 5 };
        }
        scalarsIn(&mut fx, 0, &num);
        scalarsIn(&mut fx, 128, &den);
        let mut a = Asm::new();
        a.op(BcOp::LoadS).u16(0).op(BcOp::DivI).u16(128).op(BcOp::Ret);
        let delims = vec![VmRef::default(); LANES];
        let out = fx.run(&a.0, &delims, &mut AggMem::None).unwrap();
        assert_eq!(out.k, 0xAAAA);
        assert_eq!(out.s[3] as i64, 6);
    }

    #[test]
    fn test_field_lookup_and_compare() {
        let mut st = Symtab::new();
        let rows: Vec<Datum> = (0..5)
            .map(|i| {
                Datum::Struct(vec![
                    Field {
                        label: "a".to_string(),
                        value: Datum::Int(i),
                    },
                    Field {
                        label: "b".to_string(),
                        value: Datum::String(format!("s{i}")),
                    },
                ])
            })
            .collect();
        let mut input = vec![];
        for r in &rows {
            input.extend(r.toBytes(&mut st));
        }
        let delims = ion::rowDelims(&input).unwrap();
        let a_sym = st.symbolize("a").unwrap();
        let mut fx = Fixture::new(input);
        fx.st = st;
        let mut a = Asm::new();
        a.op(BcOp::FindSym).u32(a_sym).op(BcOp::ToInt).op(BcOp::CmpGeImmI).u64(2).op(BcOp::Ret);
        let out = fx.run(&a.0, &delims, &mut AggMem::None).unwrap();
        assert_eq!(out.k, 0b11100);
    }

    #[test]
    fn test_resumed_lookup_starts_after_previous_field() {
        let mut st = Symtab::new();
        let row = |fields: &[(&str, i64)]| {
            Datum::Struct(
                fields
                    .iter()
                    .map(|(l, v)| Field {
                        label: l.to_string(),
                        value: Datum::Int(*v),
                    })
                    .collect(),
            )
        };
        let mut input = vec![];
        input.extend(row(&[("z", 1), ("a", 2), ("m", 3)]).toBytes(&mut st));
        // no `a` in the second row
        input.extend(row(&[("z", 1), ("m", 3)]).toBytes(&mut st));
        let delims = ion::rowDelims(&input).unwrap();
        let (z, a, m) = (st.symbolize("z").unwrap(), st.symbolize("a").unwrap(), st.symbolize("m").unwrap());
        assert!(z < a && a < m);
        let mut fx = Fixture::new(input);
        fx.st = st;
        fx.vstack[2048..2050].copy_from_slice(&0b11u16.to_le_bytes());

        // K holds the lanes that found `a`
        let mut c = Asm::new();
        c.op(BcOp::FindSym).u32(a).op(BcOp::FindSym2Rev).u16(2048).u32(m).op(BcOp::ToInt).op(BcOp::Ret);
        let out = fx.run(&c.0, &delims, &mut AggMem::None).unwrap();
        assert_eq!(out.k, 0b11);
        assert_eq!((out.s[0] as i64, out.s[1] as i64), (3, 3));

        // the same with the lanes that found `a` saved on the stack
        let mut c = Asm::new();
        c.op(BcOp::FindSym).u32(a).op(BcOp::SaveK).u16(2050).op(BcOp::LoadK).u16(2048);
        c.op(BcOp::FindSym2).u16(2050).u32(m).op(BcOp::ToInt).op(BcOp::Ret);
        let out = fx.run(&c.0, &delims, &mut AggMem::None).unwrap();
        assert_eq!(out.k, 0b11);
        assert_eq!((out.s[0] as i64, out.s[1] as i64), (3, 3));

        // a scan resumed after `a` cannot see `z`, which precedes it; the
        // row without `a` scans from the start and finds it
        let mut c = Asm::new();
        c.op(BcOp::FindSym).u32(a).op(BcOp::FindSym2Rev).u16(2048).u32(z).op(BcOp::Ret);
        let out = fx.run(&c.0, &delims, &mut AggMem::None).unwrap();
        assert_eq!(out.k, 0b10);
        assert_eq!(out.v.lane(0).size, 0);
        assert_ne!(out.v.lane(1).size, 0);
    }

    #[test]
    fn test_need_radix_reports_missing_lanes() {
        let mut fx = Fixture::new(vec![]);
        let mut tree = RadixTree64::new(16);
        let mut h = [[0u64; 2]; LANES];
        for (i, x) in h.iter_mut().enumerate() {
            *x = [(i as u64 + 1) * 7919, 1];
        }
        tree.insert(h[0][0]);
        for (i, x) in h.iter().enumerate() {
            fx.vstack[64 + i * 16..64 + i * 16 + 8].copy_from_slice(&x[0].to_le_bytes());
        }
        let mut a = Asm::new();
        a.op(BcOp::AggBucket).u16(64).op(BcOp::Ret);
        let delims = vec![VmRef::default(); 3];
        let err = fx.run(&a.0, &delims, &mut AggMem::Buckets(&mut tree)).unwrap_err();
        assert_eq!(err, BcErr::NeedRadix);
        assert_eq!(fx.errinfo.abortMask, 0b110);
        assert_eq!(fx.errinfo.hslot, 64);
    }

    #[test]
    fn test_plain_aggregate() {
        let mut fx = Fixture::new(vec![]);
        let vals: [u64; LANES] = std::array::from_fn(|i| i as u64);
        scalarsIn(&mut fx, 0, &vals);
        let mut mem = vec![0u8; 24];
        let mut a = Asm::new();
        a.op(BcOp::LoadS).u16(0).op(BcOp::AggSumI).u32(0).op(BcOp::AggCount).u32(16).op(BcOp::Ret);
        let delims = vec![VmRef::default(); 10];
        fx.run(&a.0, &delims, &mut AggMem::Plain(&mut mem)).unwrap();
        assert_eq!(rd64(&mem, 0), 45);
        assert_eq!(rd64(&mem, 8), 10);
        assert_eq!(rd64(&mem, 16), 10);
    }

    #[test]
    fn test_corrupt_opcode() {
        let mut fx = Fixture::new(vec![]);
        let code = 0xFFFFu16.to_le_bytes();
        let err = fx.run(&code, &[], &mut AggMem::None).unwrap_err();
        assert_eq!(err, BcErr::Corrupt);
        let mut a = Asm::new();
        a.op(BcOp::LoadS).u16(60000);
        let err = fx.run(&a.0, &[], &mut AggMem::None).unwrap_err();
        assert_eq!(err, BcErr::Corrupt);
    }

    #[test]
    fn test_string_ops_agree_across_levels() {
        let words = ["Hello", "hello", "HELLO world", "héllo", "  hello  "];
        let mut input = vec![];
        let mut slices = [0u64; LANES];
        for (i, w) in words.iter().enumerate() {
            slices[i] = mkSlice(input.len() as u32, w.len());
            input.extend_from_slice(w.as_bytes());
        }
        let mut fx = Fixture::new(input);
        fx.dict = vec!["hello".to_string(), "llo".to_string()];
        scalarsIn(&mut fx, 0, &slices);
        let delims = vec![VmRef::default(); words.len()];
        let run = |fx: &mut Fixture, op: BcOp, d: u16| {
            let mut a = Asm::new();
            a.op(BcOp::LoadS).u16(0).op(op).u16(d).op(BcOp::Ret);
            fx.run(&a.0, &delims, &mut AggMem::None).unwrap().k
        };
        assert_eq!(run(&mut fx, BcOp::CmpStrEqCi, 0), 0b00011);
        assert_eq!(run(&mut fx, BcOp::CmpStrEqCiV2, 0), 0b00011);
        assert_eq!(run(&mut fx, BcOp::ContainsSubstrCs, 1), 0b11011);
        assert_eq!(run(&mut fx, BcOp::ContainsSubstrCsV2, 1), 0b11011);
        assert_eq!(run(&mut fx, BcOp::ContainsPrefixCi, 0), 0b00111);
    }

    proptest! {
        #[test]
        fn test_predicate_containment(k in any::<u16>(), xs in proptest::array::uniform16(any::<i64>())) {
            let mut fx = Fixture::new(vec![]);
            let vals = xs.map(|x| x as u64);
            scalarsIn(&mut fx, 0, &vals);
            fx.vstack[2048..2050].copy_from_slice(&k.to_le_bytes());
            let mut a = Asm::new();
            a.op(BcOp::LoadS).u16(0)
                .op(BcOp::LoadK).u16(2048)
                .op(BcOp::MulImmI).u64(3)
                .op(BcOp::CmpGtImmI).u64(0)
                .op(BcOp::Ret);
            let delims = vec![VmRef::default(); LANES];
            let out = fx.run(&a.0, &delims, &mut AggMem::None).unwrap();
            prop_assert_eq!(out.k & !k, 0);
            for i in 0..LANES {
                if k >> i & 1 == 0 {
                    prop_assert_eq!(out.s[i], vals[i]);
                } else {
                    prop_assert_eq!(out.s[i] as i64, xs[i].wrapping_mul(3));
                }
            }
        }
    }
}
