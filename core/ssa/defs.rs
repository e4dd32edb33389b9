//! Opcode metadata for the SSA form.
//!
//! [`SsaOp::info`] is the single table both the builder (type checking) and
//! the compiler (register classes, bytecode selection, immediate encoding)
//! consult.

use crate::vdbe::opcodes::BcOp;

/// Bit set of value types.
pub type SsaType = u32;

pub const ST_BOOL: SsaType = 1 << 0;
pub const ST_BASE: SsaType = 1 << 1;
pub const ST_VALUE: SsaType = 1 << 2;
pub const ST_FLOAT: SsaType = 1 << 3;
pub const ST_INT: SsaType = 1 << 4;
pub const ST_STRING: SsaType = 1 << 5;
pub const ST_LIST: SsaType = 1 << 6;
pub const ST_TIME: SsaType = 1 << 7;
pub const ST_HASH: SsaType = 1 << 8;
pub const ST_BUCKET: SsaType = 1 << 9;
pub const ST_MEM: SsaType = 1 << 10;

pub const ST_SCALAR: SsaType = ST_FLOAT | ST_INT | ST_STRING | ST_LIST | ST_TIME;
pub const ST_VALUE_MASKED: SsaType = ST_VALUE | ST_BOOL;
pub const ST_INT_MASKED: SsaType = ST_INT | ST_BOOL;
pub const ST_FLOAT_MASKED: SsaType = ST_FLOAT | ST_BOOL;
pub const ST_STRING_MASKED: SsaType = ST_STRING | ST_BOOL;
pub const ST_LIST_MASKED: SsaType = ST_LIST | ST_BOOL;
pub const ST_TIME_MASKED: SsaType = ST_TIME | ST_BOOL;
pub const ST_BASE_MASKED: SsaType = ST_BASE | ST_BOOL;

const TYPE_CHARS: [(SsaType, char); 11] = [
    (ST_BOOL, 'k'),
    (ST_BASE, 'b'),
    (ST_VALUE, 'v'),
    (ST_FLOAT, 'f'),
    (ST_INT, 'i'),
    (ST_STRING, 's'),
    (ST_LIST, 'l'),
    (ST_TIME, 't'),
    (ST_HASH, 'h'),
    (ST_BUCKET, 'L'),
    (ST_MEM, 'm'),
];

/// Short textual form of a type set, e.g. `"vk"`.
pub fn typeChars(t: SsaType) -> String {
    TYPE_CHARS.iter().filter(|(bit, _)| t & bit != 0).map(|(_, c)| *c).collect()
}

/// Physical register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegClass {
    K = 0,
    S = 1,
    V = 2,
    B = 3,
    H = 4,
    L = 5,
}

pub const NUM_REG_CLASSES: usize = 6;

impl RegClass {
    pub const ALL: [RegClass; NUM_REG_CLASSES] = [RegClass::K, RegClass::S, RegClass::V, RegClass::B, RegClass::H, RegClass::L];

    /// Class holding a single-bit type; `None` for memory.
    pub fn of(t: SsaType) -> Option<RegClass> {
        match t {
            ST_BOOL => Some(RegClass::K),
            ST_BASE => Some(RegClass::B),
            ST_VALUE => Some(RegClass::V),
            ST_HASH => Some(RegClass::H),
            ST_BUCKET => Some(RegClass::L),
            ST_MEM => None,
            t if t & ST_SCALAR != 0 && (t & (t - 1)) == 0 => Some(RegClass::S),
            _ => None,
        }
    }

    /// Byte size of one register of this class (16 lanes).
    pub fn size(self) -> usize {
        match self {
            RegClass::K => 2,
            RegClass::S => 128,
            RegClass::V => 160,
            RegClass::B => 128,
            RegClass::H => 256,
            RegClass::L => 64,
        }
    }

    pub fn align(self) -> usize {
        match self {
            RegClass::K => 2,
            RegClass::V => 32,
            _ => 64,
        }
    }

    pub fn letter(self) -> char {
        match self {
            RegClass::K => 'k',
            RegClass::S => 's',
            RegClass::V => 'v',
            RegClass::B => 'b',
            RegClass::H => 'h',
            RegClass::L => 'l',
        }
    }
}

/// Register classes a value of type `t` occupies.
pub fn vregs(t: SsaType) -> Vec<RegClass> {
    let mut out = vec![];
    if t & ST_BOOL != 0 {
        out.push(RegClass::K);
    }
    if t & ST_SCALAR != 0 {
        out.push(RegClass::S);
    }
    if t & ST_VALUE != 0 {
        out.push(RegClass::V);
    }
    if t & ST_BASE != 0 {
        out.push(RegClass::B);
    }
    if t & ST_HASH != 0 {
        out.push(RegClass::H);
    }
    if t & ST_BUCKET != 0 {
        out.push(RegClass::L);
    }
    out
}

/// How an immediate is encoded into the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmFmt {
    None,
    /// u8 from an integer
    U8,
    /// u16 from an integer
    U16,
    I64,
    F64,
    /// u16 dictionary reference from a string
    Dict,
    /// u32 aggregate memory offset
    AggSlot,
    /// u16 stack slot reserved by the program
    Slot,
    /// present but encoded by a dedicated emitter
    Other,
}

/// Emission strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    /// no code
    None,
    /// load the first argument of each class, pass the rest by slot
    Auto,
    Const,
    False,
    Logical,
    Nand,
    Cmp,
    ConstCmp,
    Slice,
    Dot,
    Dot2,
    StoreV,
    HashMember,
    Ret,
}

pub const PRIO_INIT: i32 = 100000;
pub const PRIO_MEM: i32 = 10000;
pub const PRIO_HASH: i32 = 9999;
pub const PRIO_PARSE: i32 = -100000;

#[derive(Debug, Clone, Copy)]
pub struct SsaOpInfo {
    pub text: &'static str,
    pub argtypes: &'static [SsaType],
    /// repeated tail of a variadic op
    pub vaArgs: &'static [SsaType],
    pub rettype: SsaType,
    pub bc: Option<BcOp>,
    /// bytecode op with the first two operands swapped
    pub bcrev: Option<BcOp>,
    pub inverse: Option<SsaOp>,
    pub immfmt: ImmFmt,
    pub emit: Emit,
    pub priority: i32,
    /// writes into scratch memory
    pub scratch: bool,
    /// result is args[0] where the mask is false
    pub blend: bool,
}

impl SsaOpInfo {
    const fn new(text: &'static str, argtypes: &'static [SsaType], rettype: SsaType) -> Self {
        SsaOpInfo {
            text,
            argtypes,
            vaArgs: &[],
            rettype,
            bc: None,
            bcrev: None,
            inverse: None,
            immfmt: ImmFmt::None,
            emit: Emit::Auto,
            priority: 0,
            scratch: false,
            blend: false,
        }
    }

    const fn bc(mut self, op: BcOp) -> Self {
        self.bc = Some(op);
        self
    }

    const fn rev(mut self, op: BcOp) -> Self {
        self.bcrev = Some(op);
        self
    }

    const fn inv(mut self, op: SsaOp) -> Self {
        self.inverse = Some(op);
        self
    }

    const fn imm(mut self, f: ImmFmt) -> Self {
        self.immfmt = f;
        self
    }

    const fn emit(mut self, e: Emit) -> Self {
        self.emit = e;
        self
    }

    const fn prio(mut self, p: i32) -> Self {
        self.priority = p;
        self
    }

    const fn va(mut self, va: &'static [SsaType]) -> Self {
        self.vaArgs = va;
        self
    }

    const fn scratch(mut self) -> Self {
        self.scratch = true;
        self
    }

    const fn blend(mut self) -> Self {
        self.blend = true;
        self
    }

    pub fn argType(&self, index: usize) -> SsaType {
        if index < self.argtypes.len() {
            return self.argtypes[index];
        }
        if self.vaArgs.is_empty() {
            panic!("{} doesn't have argument at {}", self.text, index);
        }
        let i = (index - self.argtypes.len()) % self.vaArgs.len();
        self.vaArgs[i]
    }

    pub fn hasArg(&self, index: usize) -> bool {
        index < self.argtypes.len() || !self.vaArgs.is_empty()
    }
}

macro_rules! ssaops {
    ($($name:ident,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum SsaOp {
            $($name,)*
        }

        pub const ALL_SSA_OPS: &[SsaOp] = &[$(SsaOp::$name,)*];
    };
}

ssaops! {
    Invalid,
    Init, InitMem, MergeMem, Undef, KFalse,
    And, Nand, Or, Xor, Xnor,
    CmpEqF, CmpEqI, CmpLtF, CmpLtI, CmpLeF, CmpLeI, CmpGtF, CmpGtI, CmpGeF, CmpGeI,
    CmpEqImmF, CmpEqImmI, CmpLtImmF, CmpLtImmI, CmpLeImmF, CmpLeImmI,
    CmpGtImmF, CmpGtImmI, CmpGeImmF, CmpGeImmI,
    CmpEqStr, CmpEqTime, CmpLtTime, CmpLeTime, CmpGtTime, CmpGeTime,
    EqualV, EqualConst, IsNull, IsNotNull, IsTrue, IsFalse, CheckTag,
    ToInt, ToFloat, ToStr, ToList, ToTime, IntToFloat, FloatToInt, BoolToInt, BoolToFloat,
    CmpStrEqCs, CmpStrEqCi, ContainsPrefixCs, ContainsPrefixCi, ContainsSuffixCs, ContainsSuffixCi,
    ContainsSubstrCs, ContainsSubstrCi, LikeCs, LikeCi, TrimLeft, TrimRight, TrimBoth, CharLength,
    Split, Tuples, Dot, Dot2, ObjectSize,
    HashValue, HashValuePlus, HashMember, HashLookup,
    Literal, Store,
    BlendV, BlendFloat,
    BroadcastF, BroadcastI, BroadcastTs,
    AbsF, AbsI, NegF, NegI, SignF, SignI, SquareF, SquareI,
    RoundF, RoundEvenF, TruncF, FloorF, CeilF, SqrtF, CbrtF, ExpF, LnF, Log2F, Log10F,
    SinF, CosF, TanF, AsinF, AcosF, AtanF,
    AddF, AddI, SubF, SubI, MulF, MulI, DivF, DivI, ModF, ModI,
    MinValueF, MinValueI, MaxValueF, MaxValueI, HypotF, PowF, Atan2F,
    AddImmF, AddImmI, SubImmF, SubImmI, RSubImmF, RSubImmI, MulImmF, MulImmI,
    DivImmF, DivImmI, RDivImmF, RDivImmI, ModImmF, ModImmI, RModImmF, RModImmI,
    MinValueImmF, MinValueImmI, MaxValueImmF, MaxValueImmI,
    AggSumF, AggSumI, AggAvgF, AggAvgI, AggMinF, AggMinI, AggMaxF, AggMaxI,
    AggMinTs, AggMaxTs, AggAndI, AggOrI, AggXorI, AggAndK, AggOrK, AggCount,
    AggBucket,
    AggSlotAddF, AggSlotAddI, AggSlotAvgF, AggSlotAvgI, AggSlotMinF, AggSlotMinI,
    AggSlotMaxF, AggSlotMaxI, AggSlotMinTs, AggSlotMaxTs, AggSlotAndI, AggSlotOrI,
    AggSlotXorI, AggSlotAndK, AggSlotOrK, AggSlotCount,
    BoxMask, BoxInt, BoxFloat, BoxString, BoxTs, MakeList,
    DateAdd, DateExtract, DateTrunc,
    RetK, RetVK, RetSK, RetM,
}

const K: SsaType = ST_BOOL;
const B: SsaType = ST_BASE;
const V: SsaType = ST_VALUE;
const F: SsaType = ST_FLOAT;
const I: SsaType = ST_INT;
const S: SsaType = ST_STRING;
const L: SsaType = ST_LIST;
const T: SsaType = ST_TIME;
const H: SsaType = ST_HASH;
const BK: SsaType = ST_BUCKET;
const M: SsaType = ST_MEM;

type Info = SsaOpInfo;

impl SsaOp {
    pub fn info(self) -> SsaOpInfo {
        use SsaOp::*;
        match self {
            Invalid => Info::new("INVALID", &[], 0).emit(Emit::None),
            Init => Info::new("init", &[], ST_BASE | ST_BOOL).emit(Emit::None).prio(PRIO_INIT),
            InitMem => Info::new("initmem", &[], M).emit(Emit::None).prio(PRIO_MEM),
            MergeMem => Info::new("mergemem", &[], M).va(&[M]).emit(Emit::None).prio(PRIO_MEM),
            // initial scalar register contents; only legal to overwrite
            Undef => Info::new("undef", &[], F | I | S).emit(Emit::None).prio(PRIO_INIT - 1),
            // canonical bottom mask; also the MISSING value
            KFalse => Info::new("false", &[], ST_VALUE_MASKED).bc(BcOp::False).emit(Emit::False),

            And => Info::new("and.k", &[K, K], K).bc(BcOp::AndK).emit(Emit::Logical),
            Nand => Info::new("nand.k", &[K, K], K).emit(Emit::Nand),
            Or => Info::new("or.k", &[K, K], K).bc(BcOp::OrK).emit(Emit::Logical),
            Xor => Info::new("xor.k", &[K, K], K).bc(BcOp::XorK).emit(Emit::Logical),
            Xnor => Info::new("xnor.k", &[K, K], K).bc(BcOp::XnorK).emit(Emit::Logical),

            CmpEqF => Info::new("cmpeq.f", &[F, F, K], K).bc(BcOp::CmpEqF).inv(CmpEqF).emit(Emit::Cmp),
            CmpEqI => Info::new("cmpeq.i", &[I, I, K], K).bc(BcOp::CmpEqI).inv(CmpEqI).emit(Emit::Cmp),
            CmpLtF => Info::new("cmplt.f", &[F, F, K], K).bc(BcOp::CmpLtF).inv(CmpGtF).emit(Emit::Cmp),
            CmpLtI => Info::new("cmplt.i", &[I, I, K], K).bc(BcOp::CmpLtI).inv(CmpGtI).emit(Emit::Cmp),
            CmpLeF => Info::new("cmple.f", &[F, F, K], K).bc(BcOp::CmpLeF).inv(CmpGeF).emit(Emit::Cmp),
            CmpLeI => Info::new("cmple.i", &[I, I, K], K).bc(BcOp::CmpLeI).inv(CmpGeI).emit(Emit::Cmp),
            CmpGtF => Info::new("cmpgt.f", &[F, F, K], K).bc(BcOp::CmpGtF).inv(CmpLtF).emit(Emit::Cmp),
            CmpGtI => Info::new("cmpgt.i", &[I, I, K], K).bc(BcOp::CmpGtI).inv(CmpLtI).emit(Emit::Cmp),
            CmpGeF => Info::new("cmpge.f", &[F, F, K], K).bc(BcOp::CmpGeF).inv(CmpLeF).emit(Emit::Cmp),
            CmpGeI => Info::new("cmpge.i", &[I, I, K], K).bc(BcOp::CmpGeI).inv(CmpLeI).emit(Emit::Cmp),

            CmpEqImmF => Info::new("cmpeq.imm.f", &[F, K], K).bc(BcOp::CmpEqImmF).imm(ImmFmt::F64),
            CmpEqImmI => Info::new("cmpeq.imm.i", &[I, K], K).bc(BcOp::CmpEqImmI).imm(ImmFmt::I64),
            CmpLtImmF => Info::new("cmplt.imm.f", &[F, K], K).bc(BcOp::CmpLtImmF).imm(ImmFmt::F64),
            CmpLtImmI => Info::new("cmplt.imm.i", &[I, K], K).bc(BcOp::CmpLtImmI).imm(ImmFmt::I64),
            CmpLeImmF => Info::new("cmple.imm.f", &[F, K], K).bc(BcOp::CmpLeImmF).imm(ImmFmt::F64),
            CmpLeImmI => Info::new("cmple.imm.i", &[I, K], K).bc(BcOp::CmpLeImmI).imm(ImmFmt::I64),
            CmpGtImmF => Info::new("cmpgt.imm.f", &[F, K], K).bc(BcOp::CmpGtImmF).imm(ImmFmt::F64),
            CmpGtImmI => Info::new("cmpgt.imm.i", &[I, K], K).bc(BcOp::CmpGtImmI).imm(ImmFmt::I64),
            CmpGeImmF => Info::new("cmpge.imm.f", &[F, K], K).bc(BcOp::CmpGeImmF).imm(ImmFmt::F64),
            CmpGeImmI => Info::new("cmpge.imm.i", &[I, K], K).bc(BcOp::CmpGeImmI).imm(ImmFmt::I64),

            CmpEqStr => Info::new("cmpeq.str", &[S, S, K], K).bc(BcOp::CmpEqSlice).inv(CmpEqStr).emit(Emit::Cmp),
            CmpEqTime => Info::new("cmpeq.ts", &[T, T, K], K).bc(BcOp::CmpEqI).inv(CmpEqTime).emit(Emit::Cmp),
            CmpLtTime => Info::new("cmplt.ts", &[T, T, K], K).bc(BcOp::CmpLtI).inv(CmpGtTime).emit(Emit::Cmp),
            CmpLeTime => Info::new("cmple.ts", &[T, T, K], K).bc(BcOp::CmpLeI).inv(CmpGeTime).emit(Emit::Cmp),
            CmpGtTime => Info::new("cmpgt.ts", &[T, T, K], K).bc(BcOp::CmpGtI).inv(CmpLtTime).emit(Emit::Cmp),
            CmpGeTime => Info::new("cmpge.ts", &[T, T, K], K).bc(BcOp::CmpGeI).inv(CmpLeTime).emit(Emit::Cmp),

            EqualV => Info::new("equalv", &[V, V, K], K).bc(BcOp::EqualV),
            EqualConst => Info::new("equalconst", &[V, K], K).bc(BcOp::EqualVLit).imm(ImmFmt::Other).emit(Emit::ConstCmp),
            IsNull => Info::new("isnull", &[V, K], K).bc(BcOp::IsNull),
            IsNotNull => Info::new("isnonnull", &[V, K], K).bc(BcOp::IsNotNull),
            IsTrue => Info::new("istrue", &[V, K], K).bc(BcOp::IsTrue),
            IsFalse => Info::new("isfalse", &[V, K], K).bc(BcOp::IsFalse),
            CheckTag => Info::new("checktag", &[V, K], ST_VALUE_MASKED).bc(BcOp::CheckTag).imm(ImmFmt::U16),

            ToInt => Info::new("toint", &[V, K], ST_INT_MASKED).bc(BcOp::ToInt),
            ToFloat => Info::new("tofloat", &[V, K], ST_FLOAT_MASKED).bc(BcOp::ToF64),
            ToStr => Info::new("tostr", &[V, K], ST_STRING_MASKED).bc(BcOp::Unpack).emit(Emit::Slice).scratch(),
            ToList => Info::new("tolist", &[V, K], ST_LIST_MASKED).bc(BcOp::Unpack).emit(Emit::Slice),
            ToTime => Info::new("totime", &[V, K], ST_TIME_MASKED).bc(BcOp::UnboxTs),
            IntToFloat => Info::new("cvt.i64tof64", &[I, K], F).bc(BcOp::CvtI64ToF64),
            FloatToInt => Info::new("cvt.f64toi64", &[F, K], I).bc(BcOp::CvtF64ToI64),
            BoolToInt => Info::new("cvt.ktoi64", &[K, K], I).bc(BcOp::CvtKToI64),
            BoolToFloat => Info::new("cvt.ktof64", &[K, K], F).bc(BcOp::CvtKToF64),

            CmpStrEqCs => Info::new("cmp_str_eq_cs", &[S, K], K).bc(BcOp::CmpStrEqCs).imm(ImmFmt::Dict),
            CmpStrEqCi => Info::new("cmp_str_eq_ci", &[S, K], K).bc(BcOp::CmpStrEqCi).imm(ImmFmt::Dict),
            ContainsPrefixCs => Info::new("contains_prefix_cs", &[S, K], K).bc(BcOp::ContainsPrefixCs).imm(ImmFmt::Dict),
            ContainsPrefixCi => Info::new("contains_prefix_ci", &[S, K], K).bc(BcOp::ContainsPrefixCi).imm(ImmFmt::Dict),
            ContainsSuffixCs => Info::new("contains_suffix_cs", &[S, K], K).bc(BcOp::ContainsSuffixCs).imm(ImmFmt::Dict),
            ContainsSuffixCi => Info::new("contains_suffix_ci", &[S, K], K).bc(BcOp::ContainsSuffixCi).imm(ImmFmt::Dict),
            ContainsSubstrCs => Info::new("contains_substr_cs", &[S, K], K).bc(BcOp::ContainsSubstrCs).imm(ImmFmt::Dict),
            ContainsSubstrCi => Info::new("contains_substr_ci", &[S, K], K).bc(BcOp::ContainsSubstrCi).imm(ImmFmt::Dict),
            LikeCs => Info::new("like_cs", &[S, K], K).bc(BcOp::LikeCs).imm(ImmFmt::Dict),
            LikeCi => Info::new("like_ci", &[S, K], K).bc(BcOp::LikeCi).imm(ImmFmt::Dict),
            TrimLeft => Info::new("trim_ws_left", &[S, K], S).bc(BcOp::TrimWsLeft),
            TrimRight => Info::new("trim_ws_right", &[S, K], S).bc(BcOp::TrimWsRight),
            TrimBoth => Info::new("trim_ws_both", &[S, K], S).bc(BcOp::TrimWsBoth),
            CharLength => Info::new("char_length", &[S, K], I).bc(BcOp::CharLength),

            Split => Info::new("split", &[L, K], V | L | K).bc(BcOp::Split),
            Tuples => Info::new("tuples", &[V, K], ST_BASE_MASKED).bc(BcOp::Tuple).prio(PRIO_PARSE),
            Dot => Info::new("dot", &[B, K], ST_VALUE_MASKED).imm(ImmFmt::Other).emit(Emit::Dot).prio(PRIO_PARSE),
            Dot2 => Info::new("dot2", &[B, V, K, K], ST_VALUE_MASKED).imm(ImmFmt::Other).emit(Emit::Dot2).prio(PRIO_PARSE),
            ObjectSize => Info::new("objectsize", &[V, K], ST_INT_MASKED).bc(BcOp::ObjectSize),

            HashValue => Info::new("hashvalue", &[V, K], H).bc(BcOp::HashValue).prio(PRIO_HASH),
            HashValuePlus => Info::new("hashvalue+", &[H, V, K], H).bc(BcOp::HashValuePlus).prio(PRIO_HASH),
            HashMember => Info::new("hashmember", &[H, K], K).bc(BcOp::HashMember).imm(ImmFmt::Other).emit(Emit::HashMember),
            HashLookup => Info::new("hashlookup", &[H, K], ST_VALUE_MASKED).bc(BcOp::HashLookup).imm(ImmFmt::Other).emit(Emit::HashMember),

            Literal => Info::new("literal", &[K], V).bc(BcOp::LitRefV).imm(ImmFmt::Other).emit(Emit::Const),
            Store => Info::new("store.z", &[M, V, K], M).imm(ImmFmt::Slot).emit(Emit::StoreV).prio(PRIO_MEM),

            BlendV => Info::new("blendv", &[V, V, K], V).bc(BcOp::BlendV).rev(BcOp::BlendRevV).blend(),
            BlendFloat => Info::new("blendfloat", &[F, F, K], F).bc(BcOp::BlendS).rev(BcOp::BlendRevS).blend(),

            BroadcastF => Info::new("broadcast.f", &[K], F).bc(BcOp::BroadcastImmF).imm(ImmFmt::F64),
            BroadcastI => Info::new("broadcast.i", &[K], I).bc(BcOp::BroadcastImmI).imm(ImmFmt::I64),
            BroadcastTs => Info::new("broadcast.ts", &[K], T).bc(BcOp::BroadcastImmI).imm(ImmFmt::I64),

            AbsF => Info::new("abs.f", &[F, K], F).bc(BcOp::AbsF),
            AbsI => Info::new("abs.i", &[I, K], I).bc(BcOp::AbsI),
            NegF => Info::new("neg.f", &[F, K], F).bc(BcOp::NegF),
            NegI => Info::new("neg.i", &[I, K], I).bc(BcOp::NegI),
            SignF => Info::new("sign.f", &[F, K], F).bc(BcOp::SignF),
            SignI => Info::new("sign.i", &[I, K], I).bc(BcOp::SignI),
            SquareF => Info::new("square.f", &[F, K], F).bc(BcOp::SquareF),
            SquareI => Info::new("square.i", &[I, K], I).bc(BcOp::SquareI),
            RoundF => Info::new("round.f", &[F, K], F).bc(BcOp::RoundF),
            RoundEvenF => Info::new("roundeven.f", &[F, K], F).bc(BcOp::RoundEvenF),
            TruncF => Info::new("trunc.f", &[F, K], F).bc(BcOp::TruncF),
            FloorF => Info::new("floor.f", &[F, K], F).bc(BcOp::FloorF),
            CeilF => Info::new("ceil.f", &[F, K], F).bc(BcOp::CeilF),
            SqrtF => Info::new("sqrt.f", &[F, K], F).bc(BcOp::SqrtF),
            CbrtF => Info::new("cbrt.f", &[F, K], F).bc(BcOp::CbrtF),
            ExpF => Info::new("exp.f", &[F, K], F).bc(BcOp::ExpF),
            LnF => Info::new("ln.f", &[F, K], F).bc(BcOp::LnF),
            Log2F => Info::new("log2.f", &[F, K], F).bc(BcOp::Log2F),
            Log10F => Info::new("log10.f", &[F, K], F).bc(BcOp::Log10F),
            SinF => Info::new("sin.f", &[F, K], F).bc(BcOp::SinF),
            CosF => Info::new("cos.f", &[F, K], F).bc(BcOp::CosF),
            TanF => Info::new("tan.f", &[F, K], F).bc(BcOp::TanF),
            AsinF => Info::new("asin.f", &[F, K], F).bc(BcOp::AsinF),
            AcosF => Info::new("acos.f", &[F, K], F).bc(BcOp::AcosF),
            AtanF => Info::new("atan.f", &[F, K], F).bc(BcOp::AtanF),

            AddF => Info::new("add.f", &[F, F, K], F).bc(BcOp::AddF).rev(BcOp::AddF),
            AddI => Info::new("add.i", &[I, I, K], I).bc(BcOp::AddI).rev(BcOp::AddI),
            SubF => Info::new("sub.f", &[F, F, K], F).bc(BcOp::SubF).rev(BcOp::RSubF),
            SubI => Info::new("sub.i", &[I, I, K], I).bc(BcOp::SubI).rev(BcOp::RSubI),
            MulF => Info::new("mul.f", &[F, F, K], F).bc(BcOp::MulF).rev(BcOp::MulF),
            MulI => Info::new("mul.i", &[I, I, K], I).bc(BcOp::MulI).rev(BcOp::MulI),
            DivF => Info::new("div.f", &[F, F, K], F).bc(BcOp::DivF).rev(BcOp::RDivF),
            DivI => Info::new("div.i", &[I, I, K], ST_INT_MASKED).bc(BcOp::DivI).rev(BcOp::RDivI),
            ModF => Info::new("mod.f", &[F, F, K], F).bc(BcOp::ModF).rev(BcOp::RModF),
            ModI => Info::new("mod.i", &[I, I, K], ST_INT_MASKED).bc(BcOp::ModI).rev(BcOp::RModI),
            MinValueF => Info::new("minvalue.f", &[F, F, K], F).bc(BcOp::MinValueF).rev(BcOp::MinValueF),
            MinValueI => Info::new("minvalue.i", &[I, I, K], I).bc(BcOp::MinValueI).rev(BcOp::MinValueI),
            MaxValueF => Info::new("maxvalue.f", &[F, F, K], F).bc(BcOp::MaxValueF).rev(BcOp::MaxValueF),
            MaxValueI => Info::new("maxvalue.i", &[I, I, K], I).bc(BcOp::MaxValueI).rev(BcOp::MaxValueI),
            HypotF => Info::new("hypot.f", &[F, F, K], F).bc(BcOp::HypotF).rev(BcOp::HypotF),
            PowF => Info::new("pow.f", &[F, F, K], F).bc(BcOp::PowF),
            Atan2F => Info::new("atan2.f", &[F, F, K], F).bc(BcOp::Atan2F),

            AddImmF => Info::new("add.imm.f", &[F, K], F).bc(BcOp::AddImmF).imm(ImmFmt::F64),
            AddImmI => Info::new("add.imm.i", &[I, K], I).bc(BcOp::AddImmI).imm(ImmFmt::I64),
            SubImmF => Info::new("sub.imm.f", &[F, K], F).bc(BcOp::SubImmF).imm(ImmFmt::F64),
            SubImmI => Info::new("sub.imm.i", &[I, K], I).bc(BcOp::SubImmI).imm(ImmFmt::I64),
            RSubImmF => Info::new("rsub.imm.f", &[F, K], F).bc(BcOp::RSubImmF).imm(ImmFmt::F64),
            RSubImmI => Info::new("rsub.imm.i", &[I, K], I).bc(BcOp::RSubImmI).imm(ImmFmt::I64),
            MulImmF => Info::new("mul.imm.f", &[F, K], F).bc(BcOp::MulImmF).imm(ImmFmt::F64),
            MulImmI => Info::new("mul.imm.i", &[I, K], I).bc(BcOp::MulImmI).imm(ImmFmt::I64),
            DivImmF => Info::new("div.imm.f", &[F, K], F).bc(BcOp::DivImmF).imm(ImmFmt::F64),
            DivImmI => Info::new("div.imm.i", &[I, K], ST_INT_MASKED).bc(BcOp::DivImmI).imm(ImmFmt::I64),
            RDivImmF => Info::new("rdiv.imm.f", &[F, K], F).bc(BcOp::RDivImmF).imm(ImmFmt::F64),
            RDivImmI => Info::new("rdiv.imm.i", &[I, K], ST_INT_MASKED).bc(BcOp::RDivImmI).imm(ImmFmt::I64),
            ModImmF => Info::new("mod.imm.f", &[F, K], F).bc(BcOp::ModImmF).imm(ImmFmt::F64),
            ModImmI => Info::new("mod.imm.i", &[I, K], ST_INT_MASKED).bc(BcOp::ModImmI).imm(ImmFmt::I64),
            RModImmF => Info::new("rmod.imm.f", &[F, K], F).bc(BcOp::RModImmF).imm(ImmFmt::F64),
            RModImmI => Info::new("rmod.imm.i", &[I, K], ST_INT_MASKED).bc(BcOp::RModImmI).imm(ImmFmt::I64),
            MinValueImmF => Info::new("minvalue.imm.f", &[F, K], F).bc(BcOp::MinValueImmF).imm(ImmFmt::F64),
            MinValueImmI => Info::new("minvalue.imm.i", &[I, K], I).bc(BcOp::MinValueImmI).imm(ImmFmt::I64),
            MaxValueImmF => Info::new("maxvalue.imm.f", &[F, K], F).bc(BcOp::MaxValueImmF).imm(ImmFmt::F64),
            MaxValueImmI => Info::new("maxvalue.imm.i", &[I, K], I).bc(BcOp::MaxValueImmI).imm(ImmFmt::I64),

            AggSumF => Info::new("aggsum.f", &[M, F, K], M).bc(BcOp::AggSumF).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSumI => Info::new("aggsum.i", &[M, I, K], M).bc(BcOp::AggSumI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggAvgF => Info::new("aggavg.f", &[M, F, K], M).bc(BcOp::AggAvgF).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggAvgI => Info::new("aggavg.i", &[M, I, K], M).bc(BcOp::AggAvgI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggMinF => Info::new("aggmin.f", &[M, F, K], M).bc(BcOp::AggMinF).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggMinI => Info::new("aggmin.i", &[M, I, K], M).bc(BcOp::AggMinI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggMaxF => Info::new("aggmax.f", &[M, F, K], M).bc(BcOp::AggMaxF).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggMaxI => Info::new("aggmax.i", &[M, I, K], M).bc(BcOp::AggMaxI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggMinTs => Info::new("aggmin.ts", &[M, T, K], M).bc(BcOp::AggMinTs).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggMaxTs => Info::new("aggmax.ts", &[M, T, K], M).bc(BcOp::AggMaxTs).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggAndI => Info::new("aggand.i", &[M, I, K], M).bc(BcOp::AggAndI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggOrI => Info::new("aggor.i", &[M, I, K], M).bc(BcOp::AggOrI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggXorI => Info::new("aggxor.i", &[M, I, K], M).bc(BcOp::AggXorI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggAndK => Info::new("aggand.k", &[M, K, K], M).bc(BcOp::AggAndK).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggOrK => Info::new("aggor.k", &[M, K, K], M).bc(BcOp::AggOrK).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggCount => Info::new("aggcount", &[M, K], M).bc(BcOp::AggCount).imm(ImmFmt::AggSlot).prio(PRIO_MEM + 1),

            AggBucket => Info::new("aggbucket", &[M, H, K], BK).bc(BcOp::AggBucket),
            AggSlotAddF => Info::new("aggslotadd.f", &[M, BK, F, K], M).bc(BcOp::AggSlotAddF).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotAddI => Info::new("aggslotadd.i", &[M, BK, I, K], M).bc(BcOp::AggSlotAddI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotAvgF => Info::new("aggslotavg.f", &[M, BK, F, K], M).bc(BcOp::AggSlotAvgF).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotAvgI => Info::new("aggslotavg.i", &[M, BK, I, K], M).bc(BcOp::AggSlotAvgI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotMinF => Info::new("aggslotmin.f", &[M, BK, F, K], M).bc(BcOp::AggSlotMinF).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotMinI => Info::new("aggslotmin.i", &[M, BK, I, K], M).bc(BcOp::AggSlotMinI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotMaxF => Info::new("aggslotmax.f", &[M, BK, F, K], M).bc(BcOp::AggSlotMaxF).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotMaxI => Info::new("aggslotmax.i", &[M, BK, I, K], M).bc(BcOp::AggSlotMaxI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotMinTs => Info::new("aggslotmin.ts", &[M, BK, T, K], M).bc(BcOp::AggSlotMinTs).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotMaxTs => Info::new("aggslotmax.ts", &[M, BK, T, K], M).bc(BcOp::AggSlotMaxTs).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotAndI => Info::new("aggslotand.i", &[M, BK, I, K], M).bc(BcOp::AggSlotAndI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotOrI => Info::new("aggslotor.i", &[M, BK, I, K], M).bc(BcOp::AggSlotOrI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotXorI => Info::new("aggslotxor.i", &[M, BK, I, K], M).bc(BcOp::AggSlotXorI).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotAndK => Info::new("aggslotand.k", &[M, BK, K, K], M).bc(BcOp::AggSlotAndK).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotOrK => Info::new("aggslotor.k", &[M, BK, K, K], M).bc(BcOp::AggSlotOrK).imm(ImmFmt::AggSlot).prio(PRIO_MEM),
            AggSlotCount => Info::new("aggslotcount", &[M, BK, K], M).bc(BcOp::AggSlotCount).imm(ImmFmt::AggSlot).prio(PRIO_MEM),

            BoxMask => Info::new("boxmask", &[K, K], V).bc(BcOp::BoxK).scratch(),
            BoxInt => Info::new("boxint", &[I, K], V).bc(BcOp::BoxI).scratch(),
            BoxFloat => Info::new("boxfloat", &[F, K], V).bc(BcOp::BoxF).scratch(),
            BoxString => Info::new("boxstring", &[S, K], V).bc(BcOp::BoxStr).scratch(),
            BoxTs => Info::new("boxts", &[T, K], V).bc(BcOp::BoxTs).scratch(),
            MakeList => Info::new("makelist", &[K], V).va(&[V, K]).bc(BcOp::MakeList).scratch(),

            DateAdd => Info::new("dateadd", &[T, I, K], T).bc(BcOp::DateAdd).imm(ImmFmt::U8),
            DateExtract => Info::new("dateextract", &[T, K], I).bc(BcOp::DateExtract).imm(ImmFmt::U8),
            DateTrunc => Info::new("datetrunc", &[T, K], T).bc(BcOp::DateTrunc).imm(ImmFmt::U8),

            RetK => Info::new("ret.k", &[K], 0).bc(BcOp::Ret).emit(Emit::Ret),
            RetVK => Info::new("ret.vk", &[V, K], 0).bc(BcOp::Ret).emit(Emit::Ret),
            RetSK => Info::new("ret.sk", &[ST_SCALAR, K], 0).bc(BcOp::Ret).emit(Emit::Ret),
            RetM => Info::new("ret.m", &[M], 0).bc(BcOp::Ret).emit(Emit::Ret),
        }
    }

    pub fn text(self) -> &'static str {
        self.info().text
    }

    pub fn isLogical(self) -> bool {
        matches!(self, SsaOp::And | SsaOp::Nand | SsaOp::Or | SsaOp::Xor | SsaOp::Xnor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_consistency() {
        for &op in ALL_SSA_OPS {
            let info = op.info();
            if let Some(inv) = info.inverse {
                assert_eq!(inv.info().inverse, Some(op), "{} inverse is not symmetric", info.text);
                assert_eq!(inv.info().argtypes, info.argtypes);
            }
            if matches!(info.immfmt, ImmFmt::I64 | ImmFmt::F64 | ImmFmt::Dict) {
                assert!(info.bc.is_some(), "{} has an immediate but no bytecode", info.text);
            }
            if info.emit == Emit::Auto {
                assert!(info.bc.is_some(), "{} has no bytecode op", info.text);
            }
            // the predicate is always the trailing argument
            if let Some(&last) = info.argtypes.last() {
                if info.argtypes.len() > 1 && info.emit != Emit::Ret {
                    assert_eq!(last, ST_BOOL, "{} does not end in a mask", info.text);
                }
            }
        }
    }

    #[test]
    fn test_vregs() {
        assert_eq!(vregs(ST_VALUE_MASKED), vec![RegClass::K, RegClass::V]);
        assert_eq!(vregs(ST_BASE | ST_BOOL), vec![RegClass::K, RegClass::B]);
        assert_eq!(vregs(ST_MEM), vec![]);
        assert_eq!(RegClass::of(ST_TIME), Some(RegClass::S));
        assert_eq!(RegClass::of(ST_FLOAT | ST_INT), None);
        assert_eq!(typeChars(ST_VALUE | ST_BOOL), "kv");
    }
}
