//! Aggregation drivers.
//!
//! [`Aggregate`] computes aggregates over the whole input and
//! [`HashAggregate`] computes them per distinct GROUP BY key. Both hand out
//! one worker per thread; a worker owns its compiled program and partial
//! results and folds them into the shared parent when it is closed.

pub mod hash_aggregate;
pub mod kinds;

use std::sync::{Arc, Mutex};

use log::debug;

pub use hash_aggregate::{AggTable, GroupColumn, HashAggregate};
pub use kinds::AggKind;

use crate::error::VmError;
use crate::expr::AggregateOp;
use crate::ion::{Datum, Field, Symtab};
use crate::level::VmConfig;
use crate::ssa::{recompile, Prog, ValueId};
use crate::vdbe::{Bytecode, VmRef};
use crate::Result;

/// Lowers one aggregate into an update of accumulator memory at `slot`.
/// `bucket` selects per-group updates and `mask` restricts the rows.
pub(crate) fn lowerAggregate(p: &mut Prog, op: &AggregateOp, mem: ValueId, bucket: Option<ValueId>, mask: ValueId, slot: u32) -> ValueId {
    let arg = op.arg.as_ref().map(|e| p.compileExpr(e));
    let filter = match &op.filter {
        Some(f) => {
            let k = p.compileBool(f);
            p.and(k, mask)
        }
        None => mask,
    };
    match bucket {
        Some(b) => p.aggregateSlot(op.func, mem, b, arg, filter, slot),
        None => p.aggregate(op.func, mem, arg, filter, slot),
    }
}

fn checkAggregates(ops: &[AggregateOp]) -> Result<()> {
    if ops.is_empty() {
        return Err(VmError::InvalidAggregate("zero aggregations".to_string()));
    }
    Ok(())
}

#[derive(Debug)]
struct AggState {
    data: Vec<u8>,
    outstanding: i64,
}

/// Aggregates without grouping; produces a single row.
#[derive(Debug)]
pub struct Aggregate {
    prog: Prog,
    ops: Vec<AggregateOp>,
    kinds: Vec<AggKind>,
    initial: Vec<u8>,
    config: VmConfig,
    state: Mutex<AggState>,
}

impl Aggregate {
    pub fn new(ops: Vec<AggregateOp>, config: VmConfig) -> Result<Arc<Aggregate>> {
        checkAggregates(&ops)?;
        let mut p = Prog::new();
        let mem = p.initMem();
        let valid = p.validLanes();
        let mut kinds = Vec::with_capacity(ops.len());
        let mut outs = Vec::with_capacity(ops.len());
        let mut off = 0;
        for op in &ops {
            let kind = AggKind::of(op.func);
            outs.push(lowerAggregate(&mut p, op, mem, None, valid, off as u32));
            off += kind.dataSize();
            kinds.push(kind);
        }
        let m = p.mergeMem(&outs);
        p.returnMem(m);
        if let Some(e) = p.errors().first() {
            return Err(VmError::InvalidAggregate(e.to_string()));
        }
        let initial = kinds::initialData(&kinds);
        Ok(Arc::new(Aggregate {
            prog: p,
            ops,
            kinds,
            state: Mutex::new(AggState {
                data: initial.clone(),
                outstanding: 0,
            }),
            initial,
            config,
        }))
    }

    /// Starts a worker.
    pub fn open(self: &Arc<Self>) -> AggregateLocal {
        self.lock().outstanding += 1;
        AggregateLocal {
            parent: Arc::clone(self),
            prog: Prog::new(),
            bc: Bytecode::new(self.config),
            partial: self.initial.clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AggState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The result row, one field per aggregate.
    pub fn result(&self) -> Result<Datum> {
        let st = self.lock();
        if st.outstanding != 0 {
            crate::bail_internal_error!("Aggregate.result(): have {} children outstanding", st.outstanding);
        }
        let fields = self
            .ops
            .iter()
            .zip(self.kinds.iter().zip(kinds::offsets(&self.kinds)))
            .map(|(op, (k, off))| Field {
                label: op.label.clone(),
                value: k.write(&st.data[off..]),
            })
            .collect();
        Ok(Datum::Struct(fields))
    }
}

/// One worker of an [`Aggregate`].
pub struct AggregateLocal {
    parent: Arc<Aggregate>,
    prog: Prog,
    bc: Bytecode,
    partial: Vec<u8>,
}

impl AggregateLocal {
    /// Accumulates the rows of `input` delimited by `delims`, recompiling
    /// first if `st` has changed since the last call.
    pub fn writeRows(&mut self, st: &mut Symtab, input: &[u8], delims: &[VmRef]) -> Result<()> {
        recompile(st, &self.parent.prog, &mut self.prog, &mut self.bc)?;
        self.bc.evalAggregate(input, delims, &mut self.partial)
    }

    /// Folds this worker's partial result into the parent.
    pub fn close(self) -> Result<()> {
        let mut st = self.parent.lock();
        kinds::mergeAll(&self.parent.kinds, &mut st.data, &self.partial);
        st.outstanding -= 1;
        assert!(st.outstanding >= 0, "duplicate AggregateLocal close");
        debug!("aggregate worker closed, {} outstanding", st.outstanding);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AggFn, CmpOp, Expr};
    use crate::ion::rowDelims;

    fn rows(st: &mut Symtab, range: std::ops::Range<i64>) -> Vec<u8> {
        let mut out = vec![];
        for i in range {
            let mut fields = vec![Field {
                label: "x".to_string(),
                value: Datum::Int(i),
            }];
            if i % 2 == 0 {
                fields.push(Field {
                    label: "y".to_string(),
                    value: Datum::Float(i as f64 * 0.5),
                });
            }
            out.extend(Datum::Struct(fields).toBytes(st));
        }
        out
    }

    #[test]
    fn test_aggregate_two_workers() {
        let ops = vec![
            AggregateOp::new(AggFn::SumInt, Some(Expr::path("x")), "sum"),
            AggregateOp::new(AggFn::Count, None, "n"),
            AggregateOp::new(AggFn::Count, Some(Expr::path("y")), "ny"),
            AggregateOp::new(AggFn::MaxFloat, Some(Expr::path("y")), "maxy"),
            AggregateOp::new(AggFn::MinInt, Some(Expr::path("x")), "big").withFilter(Expr::cmp(CmpOp::Gt, Expr::path("x"), Expr::lit(30i64))),
            AggregateOp::new(AggFn::AvgInt, Some(Expr::path("nope")), "none"),
        ];
        let agg = Aggregate::new(ops, VmConfig::default()).unwrap();
        let mut st = Symtab::new();
        let a = rows(&mut st, 0..20);
        let b = rows(&mut st, 20..41);
        let mut w1 = agg.open();
        let mut w2 = agg.open();
        w1.writeRows(&mut st, &a, &rowDelims(&a).unwrap()).unwrap();
        w2.writeRows(&mut st, &b, &rowDelims(&b).unwrap()).unwrap();
        w1.close().unwrap();
        assert!(agg.result().is_err());
        w2.close().unwrap();

        let out = agg.result().unwrap();
        assert_eq!(out.field("sum"), Some(&Datum::Int((0..41).sum())));
        assert_eq!(out.field("n"), Some(&Datum::Int(41)));
        assert_eq!(out.field("ny"), Some(&Datum::Int(21)));
        assert_eq!(out.field("maxy"), Some(&Datum::Float(20.0)));
        assert_eq!(out.field("big"), Some(&Datum::Int(31)));
        assert_eq!(out.field("none"), Some(&Datum::Null));
    }

    #[test]
    fn test_float_min_max_with_nan() {
        let ops = vec![
            AggregateOp::new(AggFn::MinFloat, Some(Expr::path("y")), "min"),
            AggregateOp::new(AggFn::MaxFloat, Some(Expr::path("y")), "max"),
            AggregateOp::new(AggFn::MaxFloat, Some(Expr::path("y")), "maxnan").withFilter(Expr::IsNull(Box::new(Expr::path("x")))),
        ];
        let agg = Aggregate::new(ops, VmConfig::default()).unwrap();
        let mut st = Symtab::new();
        let mut input = vec![];
        for (x, y) in [(Datum::Int(1), 1.0), (Datum::Null, f64::NAN), (Datum::Int(2), -2.0), (Datum::Null, f64::NAN)] {
            let fields = vec![
                Field {
                    label: "x".to_string(),
                    value: x,
                },
                Field {
                    label: "y".to_string(),
                    value: Datum::Float(y),
                },
            ];
            input.extend(Datum::Struct(fields).toBytes(&mut st));
        }
        let mut w = agg.open();
        w.writeRows(&mut st, &input, &rowDelims(&input).unwrap()).unwrap();
        w.close().unwrap();
        let out = agg.result().unwrap();
        let isNan = |d: Option<&Datum>| matches!(d, Some(Datum::Float(f)) if f.is_nan());
        // NaN orders below every number
        assert!(isNan(out.field("min")), "{:?}", out);
        assert_eq!(out.field("max"), Some(&Datum::Float(1.0)));
        assert!(isNan(out.field("maxnan")), "{:?}", out);
    }

    #[test]
    fn test_no_aggregates() {
        assert!(Aggregate::new(vec![], VmConfig::default()).is_err());
    }
}
