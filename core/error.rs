use thiserror::Error;

/// Out-of-band status of a bytecode invocation.
///
/// `MoreScratch` and `NeedRadix` are resolved by the caller and never leave
/// the evaluation entry points; the rest abort the enclosing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BcErr {
    #[error("insufficient scratch space")]
    MoreScratch,
    #[error("missing radix tree entry")]
    NeedRadix,
    #[error("internal assertion failed")]
    Corrupt,
    #[error("radix tree bounds-check failed")]
    TreeCorrupt,
    #[error("null symbol table")]
    NullSymbolTable,
}

impl BcErr {
    pub fn isRecoverable(&self) -> bool {
        matches!(self, BcErr::MoreScratch | BcErr::NeedRadix)
    }
}

#[derive(Debug, Error)]
pub enum VmError {
    #[error("ill-typed ssa: {0}")]
    IllTyped(String),
    #[error("bytecode error: pc {pc}: {err}\n{disassembly}")]
    Bytecode {
        err: BcErr,
        pc: usize,
        disassembly: String,
    },
    #[error("symbol {0:#x} ({1:?}) greater than max symbol ID")]
    SymbolTooLarge(u32, String),
    #[error("hash aggregate: too many buckets (limit {0})")]
    TooManyBuckets(usize),
    #[error("{0}")]
    InvalidAggregate(String),
    #[error("ion: {0}")]
    Ion(String),
    #[error("literal buffer (len={0}) too large")]
    LiteralTooLarge(usize),
    #[error("virtual stack overflow ({0} bytes)")]
    StackOverflow(usize),
    #[error("Internal error: {0}")]
    InternalError(String),
}

#[macro_export]
macro_rules! bail_internal_error {
    ($($arg:tt)*) => {
        return Err($crate::error::VmError::InternalError(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_ion_error {
    ($($arg:tt)*) => {
        return Err($crate::error::VmError::Ion(format!($($arg)*)))
    };
}
