//! Compiled bytecode programs and their evaluation entry points.
//!
//! A [`Bytecode`] is produced by [`crate::ssa::compiler::compile`] and runs
//! one batch of at most [`LANES`] rows per call. Addresses held in value
//! registers point either into the caller's input buffer or, with
//! [`SCRATCH_BIT`] set, into the program's scratch buffer, which starts
//! every run as a copy of the literal pool.

pub mod datetime;
pub mod explain;
mod interp;
pub mod opcodes;

use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

use ahash::RandomState;
use log::debug;
use regex::bytes::Regex;

use crate::error::{BcErr, VmError};
use crate::ion::{self, Datum, Symtab};
use crate::level::VmConfig;
use crate::radix::RadixTree64;
use crate::Result;

/// Rows processed by one invocation.
pub const LANES: usize = 16;

/// Set on addresses that refer to scratch memory rather than the input.
pub const SCRATCH_BIT: u32 = 1 << 31;

/// Upper bound for scratch growth; a program needing more fails.
pub const MAX_SCRATCH_SIZE: usize = 64 << 20;

/// Reference to `size` bytes at `offset` of VM-visible memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VmRef {
    pub offset: u32,
    pub size: u32,
}

impl VmRef {
    pub fn isScratch(&self) -> bool {
        self.offset & SCRATCH_BIT != 0
    }
}

pub(crate) fn lanes(k: u16) -> impl Iterator<Item = usize> {
    (0..LANES).filter(move |i| k >> i & 1 != 0)
}

pub(crate) fn rd32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

pub(crate) fn rd64(b: &[u8], off: usize) -> u64 {
    let mut tmp = [0u8; 8];
    tmp.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(tmp)
}

/// Boxed value register: one encoded value per lane, described by its
/// address, total size, first (type/L) byte and header length.
///
/// A lane with size zero holds no value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VReg {
    pub offsets: [u32; LANES],
    pub sizes: [u32; LANES],
    pub tlv: [u8; LANES],
    pub hlen: [u8; LANES],
}

pub const VREG_SIZE: usize = 160;

impl VReg {
    pub fn lane(&self, i: usize) -> VmRef {
        VmRef {
            offset: self.offsets[i],
            size: self.sizes[i],
        }
    }

    /// Points lane `i` at the value `enc` stored at `addr`.
    pub fn setLane(&mut self, i: usize, addr: u32, enc: &[u8]) {
        self.offsets[i] = addr;
        self.sizes[i] = enc.len() as u32;
        self.tlv[i] = enc.first().copied().unwrap_or(0);
        self.hlen[i] = ion::headerSizeOf(enc).unwrap_or(0) as u8;
    }

    pub fn clearLane(&mut self, i: usize) {
        self.offsets[i] = 0;
        self.sizes[i] = 0;
        self.tlv[i] = 0;
        self.hlen[i] = 0;
    }

    pub fn copyLane(&mut self, i: usize, from: &VReg) {
        self.offsets[i] = from.offsets[i];
        self.sizes[i] = from.sizes[i];
        self.tlv[i] = from.tlv[i];
        self.hlen[i] = from.hlen[i];
    }

    pub fn store(&self, dst: &mut [u8]) {
        for i in 0..LANES {
            dst[i * 4..i * 4 + 4].copy_from_slice(&self.offsets[i].to_le_bytes());
            dst[64 + i * 4..64 + i * 4 + 4].copy_from_slice(&self.sizes[i].to_le_bytes());
        }
        dst[128..144].copy_from_slice(&self.tlv);
        dst[144..160].copy_from_slice(&self.hlen);
    }

    pub fn load(src: &[u8]) -> VReg {
        let mut v = VReg::default();
        for i in 0..LANES {
            v.offsets[i] = rd32(src, i * 4);
            v.sizes[i] = rd32(src, 64 + i * 4);
        }
        v.tlv.copy_from_slice(&src[128..144]);
        v.hlen.copy_from_slice(&src[144..160]);
        v
    }
}

/// Struct base register: the body of one struct per lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BReg {
    pub offsets: [u32; LANES],
    pub sizes: [u32; LANES],
}

impl BReg {
    pub fn store(&self, dst: &mut [u8]) {
        for i in 0..LANES {
            dst[i * 4..i * 4 + 4].copy_from_slice(&self.offsets[i].to_le_bytes());
            dst[64 + i * 4..64 + i * 4 + 4].copy_from_slice(&self.sizes[i].to_le_bytes());
        }
    }

    pub fn load(src: &[u8]) -> BReg {
        let mut b = BReg::default();
        for i in 0..LANES {
            b.offsets[i] = rd32(src, i * 4);
            b.sizes[i] = rd32(src, 64 + i * 4);
        }
        b
    }
}

/// Registers returned by `ret`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lanes {
    pub k: u16,
    pub s: [u64; LANES],
    pub v: VReg,
}

/// Memory updated by aggregate opcodes.
pub enum AggMem<'a> {
    None,
    /// accumulators of a non-grouped aggregate
    Plain(&'a mut [u8]),
    /// one accumulator region per group, addressed through the tree
    Buckets(&'a mut RadixTree64),
}

/// Details of the last recoverable abort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrInfo {
    /// lanes whose bucket was missing
    pub abortMask: u16,
    /// stack slot of the hashes looked up
    pub hslot: u16,
}

const HASH_SEEDS: [[u64; 4]; 2] = [
    [0x243f6a8885a308d3, 0x13198a2e03707344, 0xa4093822299f31d0, 0x082efa98ec4e6c89],
    [0x452821e638d01377, 0xbe5466cf34e90c6c, 0xc0ac29b7c97c50dd, 0x3f84d5b5b5470917],
];

fn hashState(i: usize) -> RandomState {
    let s = HASH_SEEDS[i];
    RandomState::with_seeds(s[0], s[1], s[2], s[3])
}

/// 128-bit hash of an encoded value.
///
/// Seeds are fixed, so the same bytes hash identically in every program of
/// the process; group and membership trees built at compile time rely on it.
pub fn hashBytes(b: &[u8]) -> [u64; 2] {
    [0, 1].map(|i| {
        let mut h = hashState(i).build_hasher();
        h.write(b);
        h.finish()
    })
}

/// Hash of `b` chained onto a previous hash, for multi-column keys.
pub fn hashBytesPlus(prev: [u64; 2], b: &[u8]) -> [u64; 2] {
    [0, 1].map(|i| {
        let mut h = hashState(i).build_hasher();
        h.write_u64(prev[0]);
        h.write_u64(prev[1]);
        h.write(b);
        h.finish()
    })
}

/// Compiled LIKE patterns, keyed by pattern text.
#[derive(Debug, Default, Clone)]
pub struct RegexCache {
    like: HashMap<String, Regex>,
    ilike: HashMap<String, Regex>,
}

impl RegexCache {
    pub fn get(&mut self, pattern: &str, ci: bool) -> Option<Regex> {
        let cache = if ci { &mut self.ilike } else { &mut self.like };
        if let Some(re) = cache.get(pattern) {
            return Some(re.clone());
        }
        let re = construct_like_regex(pattern, ci).ok()?;
        cache.insert(pattern.to_string(), re.clone());
        Some(re)
    }
}

/// Translates a LIKE pattern into an anchored regex: `%` matches any run of
/// characters and `_` exactly one.
pub fn construct_like_regex(pattern: &str, ci: bool) -> std::result::Result<Regex, regex::Error> {
    let mut regex_pattern = String::from(if ci { "(?is)^" } else { "(?s)^" });
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            c => regex_pattern.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    regex_pattern.push('$');
    Regex::new(&regex_pattern)
}

/// A compiled program plus the per-program state needed to run it.
///
/// The code, literal pool, dictionary and trees are immutable once
/// compiled; the virtual stack and scratch buffer are reset by every run.
pub struct Bytecode {
    pub compiled: Vec<u8>,
    pub vstacksize: usize,
    /// encoded literals; copied into scratch at the start of every run
    pub savedlit: Vec<u8>,
    pub dict: Vec<String>,
    pub trees: Vec<RadixTree64>,
    pub symtab: Option<Arc<Symtab>>,
    /// symbol table generation the program was compiled against
    pub generation: u64,
    /// V slots written by `save.zero.v` at the bottom of the stack
    pub reservedSlots: usize,
    pub config: VmConfig,
    pub errinfo: ErrInfo,
    pub errpc: usize,
    vstack: Vec<u8>,
    scratch: Vec<u8>,
    scratchCap: usize,
    regex: RegexCache,
}

impl Bytecode {
    /// An empty program; running it is an error until it is compiled.
    pub fn new(config: VmConfig) -> Self {
        Bytecode {
            compiled: vec![],
            vstacksize: 0,
            savedlit: vec![],
            dict: vec![],
            trees: vec![],
            symtab: None,
            generation: 0,
            reservedSlots: 0,
            config,
            errinfo: ErrInfo::default(),
            errpc: 0,
            vstack: vec![],
            scratch: vec![],
            scratchCap: config.scratch_size,
            regex: RegexCache::default(),
        }
    }

    pub fn isEmpty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// Sizes runtime buffers after the program has been filled in.
    pub fn prepare(&mut self) {
        self.vstack = vec![0; self.vstacksize];
        self.scratchCap = self.savedlit.len() + self.config.scratch_size;
        self.scratch = Vec::with_capacity(self.scratchCap);
        self.scratch.extend_from_slice(&self.savedlit);
    }

    pub fn scratchCapacity(&self) -> usize {
        self.scratchCap
    }

    pub fn explain(&self) -> String {
        explain::disassemble(&self.compiled, &self.dict)
    }

    /// Wraps a fatal status with the failing pc and a disassembly.
    pub fn fail(&self, err: BcErr) -> VmError {
        VmError::Bytecode {
            err,
            pc: self.errpc,
            disassembly: self.explain(),
        }
    }

    /// Runs the program once over `delims`, which must reference struct
    /// bodies inside `input`.
    pub fn run(&mut self, input: &[u8], delims: &[VmRef], mem: &mut AggMem) -> std::result::Result<Lanes, BcErr> {
        if delims.len() > LANES || self.compiled.is_empty() {
            return Err(BcErr::Corrupt);
        }
        if self.vstack.len() != self.vstacksize {
            self.prepare();
        }
        self.scratch.truncate(self.savedlit.len());
        self.vstack.fill(0);
        let mut m = interp::Machine {
            code: &self.compiled,
            input,
            scratch: &mut self.scratch,
            scratchCap: self.scratchCap,
            vstack: &mut self.vstack[..],
            dict: &self.dict[..],
            trees: &self.trees[..],
            symtab: self.symtab.as_deref(),
            regex: &mut self.regex,
            agg: mem,
            errinfo: &mut self.errinfo,
            pc: 0,
            opStart: 0,
        };
        let res = m.run(delims);
        self.errpc = m.opStart;
        res
    }

    /// Runs one batch, growing scratch and retrying while the program asks
    /// for more. Any other status is returned to the caller.
    pub fn evalBatch(&mut self, input: &[u8], delims: &[VmRef], mem: &mut AggMem) -> std::result::Result<Lanes, BcErr> {
        loop {
            // a rerun must not count plain accumulators twice
            let saved = match mem {
                AggMem::Plain(buf) => Some(buf.to_vec()),
                _ => None,
            };
            match self.run(input, delims, mem) {
                Err(BcErr::MoreScratch) => {
                    if let (Some(saved), AggMem::Plain(buf)) = (saved, &mut *mem) {
                        buf.copy_from_slice(&saved);
                    }
                    let grown = self.scratchCap * 2;
                    if grown - self.savedlit.len() > MAX_SCRATCH_SIZE {
                        return Err(BcErr::MoreScratch);
                    }
                    debug!("growing scratch from {} to {} bytes", self.scratchCap, grown);
                    self.scratchCap = grown;
                    self.scratch.reserve(grown - self.scratch.len());
                }
                res => return res,
            }
        }
    }

    pub fn eval(&mut self, input: &[u8], delims: &[VmRef], mem: &mut AggMem) -> Result<Lanes> {
        self.evalBatch(input, delims, mem).map_err(|e| self.fail(e))
    }

    /// Evaluates a boolean program; one entry per row.
    pub fn evalFilter(&mut self, input: &[u8], delims: &[VmRef]) -> Result<Vec<bool>> {
        let mut out = Vec::with_capacity(delims.len());
        for chunk in delims.chunks(LANES) {
            let lanes = self.eval(input, chunk, &mut AggMem::None)?;
            out.extend((0..chunk.len()).map(|i| lanes.k >> i & 1 != 0));
        }
        Ok(out)
    }

    /// Evaluates a value program; `None` where the result is MISSING.
    pub fn evalValues(&mut self, input: &[u8], delims: &[VmRef]) -> Result<Vec<Option<Datum>>> {
        let mut out = Vec::with_capacity(delims.len());
        for chunk in delims.chunks(LANES) {
            let lanes = self.eval(input, chunk, &mut AggMem::None)?;
            for i in 0..chunk.len() {
                if lanes.k >> i & 1 == 0 || lanes.v.sizes[i] == 0 {
                    out.push(None);
                    continue;
                }
                let d = self.decodeLane(input, lanes.v.lane(i))?;
                out.push(Some(d));
            }
        }
        Ok(out)
    }

    /// Evaluates a scalar program; raw lane bits, `None` where MISSING.
    pub fn evalScalars(&mut self, input: &[u8], delims: &[VmRef]) -> Result<Vec<Option<u64>>> {
        let mut out = Vec::with_capacity(delims.len());
        for chunk in delims.chunks(LANES) {
            let lanes = self.eval(input, chunk, &mut AggMem::None)?;
            out.extend((0..chunk.len()).map(|i| (lanes.k >> i & 1 != 0).then_some(lanes.s[i])));
        }
        Ok(out)
    }

    /// Accumulates every row into the plain aggregate memory `mem`.
    pub fn evalAggregate(&mut self, input: &[u8], delims: &[VmRef], mem: &mut [u8]) -> Result<()> {
        for chunk in delims.chunks(LANES) {
            self.eval(input, chunk, &mut AggMem::Plain(&mut *mem))?;
        }
        Ok(())
    }

    /// Bytes referenced by a lane after a run.
    pub fn laneBytes<'a>(&'a self, input: &'a [u8], r: VmRef) -> Option<&'a [u8]> {
        let (buf, off) = if r.isScratch() {
            (&self.scratch[..], (r.offset & !SCRATCH_BIT) as usize)
        } else {
            (input, r.offset as usize)
        };
        buf.get(off..off + r.size as usize)
    }

    pub fn decodeLane(&self, input: &[u8], r: VmRef) -> Result<Datum> {
        let Some(st) = self.symtab.as_deref() else {
            return Err(self.fail(BcErr::NullSymbolTable));
        };
        let Some(bytes) = self.laneBytes(input, r) else {
            return Err(self.fail(BcErr::Corrupt));
        };
        Ok(Datum::decode(bytes, st)?.0)
    }

    /// Hashes left in stack slot `slot` by the last run.
    pub fn stackHashes(&self, slot: u16) -> Option<[[u64; 2]; LANES]> {
        let b = self.vstack.get(slot as usize..slot as usize + 256)?;
        let mut out = [[0u64; 2]; LANES];
        for (i, h) in out.iter_mut().enumerate() {
            *h = [rd64(b, i * 16), rd64(b, i * 16 + 8)];
        }
        Some(out)
    }

    /// Value register saved in stack slot `slot` by the last run.
    pub fn stackValues(&self, slot: u16) -> Option<VReg> {
        let b = self.vstack.get(slot as usize..slot as usize + VREG_SIZE)?;
        Some(VReg::load(b))
    }
}

impl std::fmt::Debug for Bytecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bytecode")
            .field("code", &self.compiled.len())
            .field("vstacksize", &self.vstacksize)
            .field("literals", &self.savedlit.len())
            .field("dict", &self.dict)
            .field("trees", &self.trees.len())
            .field("level", &self.config.level)
            .finish()
    }
}
