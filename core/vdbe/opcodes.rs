//! Bytecode opcodes.
//!
//! Every instruction is a little-endian `u16` opcode id followed by its
//! fixed-width arguments. Register operands are implicit: an instruction
//! reads and writes the current K/S/V/B/L registers, and names additional
//! operands by stack slot. The current K register is the lane predicate.

use crate::level::OptLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcArgType {
    /// stack slot holding a mask
    K,
    /// stack slot holding scalars (int, float, string slice, timestamp)
    S,
    /// stack slot holding boxed value descriptors
    V,
    /// stack slot holding struct bases
    B,
    /// stack slot holding 128-bit hashes
    H,
    /// stack slot holding bucket offsets
    L,
    /// u16 index into the dictionary
    Dict,
    /// u32 byte offset into aggregate memory
    AggSlot,
    /// u32 symbol id
    Sym,
    /// u32 offset + u32 length + u8 type/L byte + u8 header length
    LitRef,
    ImmU8,
    ImmU16,
    ImmI64,
    ImmF64,
}

impl BcArgType {
    pub fn width(self) -> usize {
        match self {
            BcArgType::K | BcArgType::S | BcArgType::V | BcArgType::B | BcArgType::H | BcArgType::L => 2,
            BcArgType::Dict => 2,
            BcArgType::AggSlot => 4,
            BcArgType::Sym => 4,
            BcArgType::LitRef => 10,
            BcArgType::ImmU8 => 1,
            BcArgType::ImmU16 => 2,
            BcArgType::ImmI64 | BcArgType::ImmF64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BcOpInfo {
    pub text: &'static str,
    pub args: &'static [BcArgType],
    /// repeated tail, preceded by a u32 tuple count
    pub va: &'static [BcArgType],
}

use BcArgType::*;

macro_rules! bcops {
    ($($name:ident => $text:literal [$($arg:ident),*] $([$($va:ident),*])?;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum BcOp {
            $($name,)*
        }

        const ALL_OPS: &[BcOp] = &[$(BcOp::$name,)*];

        impl BcOp {
            pub fn info(self) -> BcOpInfo {
                match self {
                    $(BcOp::$name => BcOpInfo {
                        text: $text,
                        args: &[$($arg),*],
                        va: &[$($($va),*)?],
                    },)*
                }
            }
        }
    };
}

bcops! {
    Ret => "ret" [];

    // register spills
    LoadK => "loadk" [K];
    SaveK => "savek" [K];
    XchgK => "xchgk" [K];
    LoadS => "loads" [S];
    SaveS => "saves" [S];
    LoadV => "loadv" [V];
    SaveV => "savev" [V];
    LoadB => "loadb" [B];
    SaveB => "saveb" [B];
    LoadL => "loadl" [L];
    SaveL => "savel" [L];
    SaveZeroV => "save.zero.v" [V];

    // mask logic
    False => "false" [];
    AndK => "and.k" [K];
    OrK => "or.k" [K];
    XorK => "xor.k" [K];
    XnorK => "xnor.k" [K];
    NandK => "nand.k" [K];
    AndNotK => "andnot.k" [K];
    NotK => "not.k" [];

    // scalar comparisons
    CmpEqF => "cmpeq.f" [S];
    CmpEqI => "cmpeq.i" [S];
    CmpLtF => "cmplt.f" [S];
    CmpLtI => "cmplt.i" [S];
    CmpLeF => "cmple.f" [S];
    CmpLeI => "cmple.i" [S];
    CmpGtF => "cmpgt.f" [S];
    CmpGtI => "cmpgt.i" [S];
    CmpGeF => "cmpge.f" [S];
    CmpGeI => "cmpge.i" [S];
    CmpEqImmF => "cmpeq.imm.f" [ImmF64];
    CmpEqImmI => "cmpeq.imm.i" [ImmI64];
    CmpLtImmF => "cmplt.imm.f" [ImmF64];
    CmpLtImmI => "cmplt.imm.i" [ImmI64];
    CmpLeImmF => "cmple.imm.f" [ImmF64];
    CmpLeImmI => "cmple.imm.i" [ImmI64];
    CmpGtImmF => "cmpgt.imm.f" [ImmF64];
    CmpGtImmI => "cmpgt.imm.i" [ImmI64];
    CmpGeImmF => "cmpge.imm.f" [ImmF64];
    CmpGeImmI => "cmpge.imm.i" [ImmI64];
    CmpEqSlice => "cmpeq.slice" [S];

    // boxed value tests
    EqualV => "equal.v" [V];
    EqualVLit => "equal.v.lit" [LitRef];
    IsNull => "isnull" [];
    IsNotNull => "isnotnull" [];
    IsTrue => "istrue" [];
    IsFalse => "isfalse" [];
    CheckTag => "checktag" [ImmU16];

    // conversions
    ToInt => "toint" [];
    ToF64 => "tof64" [];
    Unpack => "unpack" [ImmU8];
    UnboxTs => "unbox.ts" [];
    CvtI64ToF64 => "cvt.i64tof64" [];
    CvtF64ToI64 => "cvt.f64toi64" [];
    CvtKToI64 => "cvt.ktoi64" [K];
    CvtKToF64 => "cvt.ktof64" [K];

    // strings
    CmpStrEqCs => "cmp_str_eq_cs" [Dict];
    CmpStrEqCi => "cmp_str_eq_ci" [Dict];
    CmpStrEqCiV2 => "cmp_str_eq_ci.v2" [Dict];
    ContainsPrefixCs => "contains_prefix_cs" [Dict];
    ContainsPrefixCi => "contains_prefix_ci" [Dict];
    ContainsSuffixCs => "contains_suffix_cs" [Dict];
    ContainsSuffixCi => "contains_suffix_ci" [Dict];
    ContainsSubstrCs => "contains_substr_cs" [Dict];
    ContainsSubstrCsV2 => "contains_substr_cs.v2" [Dict];
    ContainsSubstrCi => "contains_substr_ci" [Dict];
    LikeCs => "like_cs" [Dict];
    LikeCi => "like_ci" [Dict];
    TrimWsLeft => "trim_ws_left" [];
    TrimWsRight => "trim_ws_right" [];
    TrimWsBoth => "trim_ws_both" [];
    CharLength => "char_length" [];
    CharLengthV2 => "char_length.v2" [];

    // binary arithmetic: S = S op slot
    AddF => "add.f" [S];
    AddI => "add.i" [S];
    SubF => "sub.f" [S];
    SubI => "sub.i" [S];
    RSubF => "rsub.f" [S];
    RSubI => "rsub.i" [S];
    MulF => "mul.f" [S];
    MulI => "mul.i" [S];
    DivF => "div.f" [S];
    DivI => "div.i" [S];
    RDivF => "rdiv.f" [S];
    RDivI => "rdiv.i" [S];
    ModF => "mod.f" [S];
    ModI => "mod.i" [S];
    RModF => "rmod.f" [S];
    RModI => "rmod.i" [S];
    MinValueF => "minvalue.f" [S];
    MinValueI => "minvalue.i" [S];
    MaxValueF => "maxvalue.f" [S];
    MaxValueI => "maxvalue.i" [S];
    HypotF => "hypot.f" [S];
    PowF => "pow.f" [S];
    Atan2F => "atan2.f" [S];

    // arithmetic with an immediate operand
    AddImmF => "add.imm.f" [ImmF64];
    AddImmI => "add.imm.i" [ImmI64];
    SubImmF => "sub.imm.f" [ImmF64];
    SubImmI => "sub.imm.i" [ImmI64];
    RSubImmF => "rsub.imm.f" [ImmF64];
    RSubImmI => "rsub.imm.i" [ImmI64];
    MulImmF => "mul.imm.f" [ImmF64];
    MulImmI => "mul.imm.i" [ImmI64];
    DivImmF => "div.imm.f" [ImmF64];
    DivImmI => "div.imm.i" [ImmI64];
    RDivImmF => "rdiv.imm.f" [ImmF64];
    RDivImmI => "rdiv.imm.i" [ImmI64];
    ModImmF => "mod.imm.f" [ImmF64];
    ModImmI => "mod.imm.i" [ImmI64];
    RModImmF => "rmod.imm.f" [ImmF64];
    RModImmI => "rmod.imm.i" [ImmI64];
    MinValueImmF => "minvalue.imm.f" [ImmF64];
    MinValueImmI => "minvalue.imm.i" [ImmI64];
    MaxValueImmF => "maxvalue.imm.f" [ImmF64];
    MaxValueImmI => "maxvalue.imm.i" [ImmI64];
    BroadcastImmF => "broadcast.imm.f" [ImmF64];
    BroadcastImmI => "broadcast.imm.i" [ImmI64];

    // unary math
    AbsF => "abs.f" [];
    AbsI => "abs.i" [];
    NegF => "neg.f" [];
    NegI => "neg.i" [];
    SignF => "sign.f" [];
    SignI => "sign.i" [];
    SquareF => "square.f" [];
    SquareI => "square.i" [];
    RoundF => "round.f" [];
    RoundEvenF => "roundeven.f" [];
    TruncF => "trunc.f" [];
    FloorF => "floor.f" [];
    CeilF => "ceil.f" [];
    SqrtF => "sqrt.f" [];
    CbrtF => "cbrt.f" [];
    ExpF => "exp.f" [];
    LnF => "ln.f" [];
    Log2F => "log2.f" [];
    Log10F => "log10.f" [];
    SinF => "sin.f" [];
    CosF => "cos.f" [];
    TanF => "tan.f" [];
    AsinF => "asin.f" [];
    AcosF => "acos.f" [];
    AtanF => "atan.f" [];

    // blends: lanes in K take the slot (or keep the register, for rev)
    BlendV => "blend.v" [V];
    BlendRevV => "blend.rev.v" [V];
    BlendS => "blend.s" [S];
    BlendRevS => "blend.rev.s" [S];

    // boxing into scratch
    BoxK => "box.k" [K];
    BoxI => "box.i" [];
    BoxF => "box.f" [];
    BoxStr => "box.str" [];
    BoxTs => "box.ts" [];
    MakeList => "makelist" [] [V, K];

    // structure access
    LitRefV => "litref" [LitRef];
    Tuple => "tuple" [];
    FindSym => "findsym" [Sym];
    FindSym2 => "findsym2" [K, Sym];
    FindSym2Rev => "findsym2rev" [K, Sym];
    FindSym3 => "findsym3" [Sym];
    Split => "split" [];
    ObjectSize => "objectsize" [];

    // dates
    DateAdd => "dateadd" [S, ImmU8];
    DateExtract => "dateextract" [ImmU8];
    DateTrunc => "datetrunc" [ImmU8];

    // hashing
    HashValue => "hashvalue" [H];
    HashValuePlus => "hashvalue+" [H, H];
    HashMember => "hashmember" [H, ImmU16];
    HashLookup => "hashlookup" [H, ImmU16];

    // plain aggregates over aggregate memory
    AggSumF => "aggsum.f" [AggSlot];
    AggSumI => "aggsum.i" [AggSlot];
    AggAvgF => "aggavg.f" [AggSlot];
    AggAvgI => "aggavg.i" [AggSlot];
    AggMinF => "aggmin.f" [AggSlot];
    AggMinI => "aggmin.i" [AggSlot];
    AggMaxF => "aggmax.f" [AggSlot];
    AggMaxI => "aggmax.i" [AggSlot];
    AggMinTs => "aggmin.ts" [AggSlot];
    AggMaxTs => "aggmax.ts" [AggSlot];
    AggAndI => "aggand.i" [AggSlot];
    AggOrI => "aggor.i" [AggSlot];
    AggXorI => "aggxor.i" [AggSlot];
    AggAndK => "aggand.k" [K, AggSlot];
    AggOrK => "aggor.k" [K, AggSlot];
    AggCount => "aggcount" [AggSlot];

    // grouped aggregates over radix tree buckets
    AggBucket => "aggbucket" [H];
    AggSlotAddF => "aggslotadd.f" [AggSlot];
    AggSlotAddI => "aggslotadd.i" [AggSlot];
    AggSlotAvgF => "aggslotavg.f" [AggSlot];
    AggSlotAvgI => "aggslotavg.i" [AggSlot];
    AggSlotMinF => "aggslotmin.f" [AggSlot];
    AggSlotMinI => "aggslotmin.i" [AggSlot];
    AggSlotMaxF => "aggslotmax.f" [AggSlot];
    AggSlotMaxI => "aggslotmax.i" [AggSlot];
    AggSlotMinTs => "aggslotmin.ts" [AggSlot];
    AggSlotMaxTs => "aggslotmax.ts" [AggSlot];
    AggSlotAndI => "aggslotand.i" [AggSlot];
    AggSlotOrI => "aggslotor.i" [AggSlot];
    AggSlotXorI => "aggslotxor.i" [AggSlot];
    AggSlotAndK => "aggslotand.k" [K, AggSlot];
    AggSlotOrK => "aggslotor.k" [K, AggSlot];
    AggSlotCount => "aggslotcount" [AggSlot];
}

impl BcOp {
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn fromId(id: u16) -> Option<BcOp> {
        ALL_OPS.get(id as usize).copied()
    }

    pub fn count() -> usize {
        ALL_OPS.len()
    }

    /// Opcode actually emitted at the given level.
    ///
    /// A handful of operations have a second implementation that is only
    /// selected at level 2; both compute the same result.
    pub fn patched(self, level: OptLevel) -> BcOp {
        if level < OptLevel::V2 {
            return self;
        }
        match self {
            BcOp::CmpStrEqCi => BcOp::CmpStrEqCiV2,
            BcOp::ContainsSubstrCs => BcOp::ContainsSubstrCsV2,
            BcOp::CharLength => BcOp::CharLengthV2,
            op => op,
        }
    }

    /// Size of the fixed part of the encoded instruction, opcode included.
    pub fn encodedSize(self) -> usize {
        2 + self.info().args.iter().map(|a| a.width()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_dense() {
        for i in 0..BcOp::count() {
            let op = BcOp::fromId(i as u16).unwrap();
            assert_eq!(op.id() as usize, i);
        }
        assert!(BcOp::fromId(BcOp::count() as u16).is_none());
    }

    #[test]
    fn test_patch_table() {
        assert_eq!(BcOp::CmpStrEqCi.patched(OptLevel::V1), BcOp::CmpStrEqCi);
        assert_eq!(BcOp::CmpStrEqCi.patched(OptLevel::V2), BcOp::CmpStrEqCiV2);
        assert_eq!(BcOp::AddF.patched(OptLevel::V2), BcOp::AddF);
        assert_eq!(BcOp::CharLength.patched(OptLevel::None), BcOp::CharLength);
    }

    #[test]
    fn test_widths() {
        assert_eq!(BcOp::LitRefV.encodedSize(), 12);
        assert_eq!(BcOp::FindSym2.encodedSize(), 8);
        assert_eq!(BcOp::Ret.encodedSize(), 2);
        assert_eq!(BcOp::MakeList.info().va, &[V, K]);
    }
}
