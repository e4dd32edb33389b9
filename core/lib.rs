#![allow(non_snake_case)]

pub mod aggregate;
pub mod error;
pub mod expr;
pub mod ion;
#[cfg(feature = "json")]
pub mod json;
pub mod level;
pub mod radix;
pub mod ssa;
pub mod vdbe;

#[cfg(not(target_family = "wasm"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub use aggregate::{AggKind, AggTable, Aggregate, AggregateLocal, GroupColumn, HashAggregate};
pub use error::{BcErr, VmError};
pub use expr::{AggFn, AggregateOp, CmpOp, Expr};
pub use ion::{Datum, Field, Symtab};
pub use level::{OptLevel, VmConfig};
pub use ssa::compiler::compile;
pub use ssa::{recompile, Prog};
pub use vdbe::{Bytecode, VmRef};

pub type Result<T> = std::result::Result<T, error::VmError>;

/// Compiles `e` as a row filter.
pub fn compileFilter(e: &Expr, st: &mut Symtab, config: VmConfig) -> Result<Bytecode> {
    let mut p = Prog::new();
    let k = p.compileBool(e);
    p.returnBool(k);
    compile(&mut p, st, config)
}

/// Rows of `input` for which `e` is TRUE.
pub fn filterRows(e: &Expr, st: &mut Symtab, input: &[u8]) -> Result<Vec<VmRef>> {
    let mut bc = compileFilter(e, st, VmConfig::default())?;
    let delims = ion::rowDelims(input)?;
    let keep = bc.evalFilter(input, &delims)?;
    Ok(delims.into_iter().zip(keep).filter(|(_, k)| *k).map(|(d, _)| d).collect())
}
