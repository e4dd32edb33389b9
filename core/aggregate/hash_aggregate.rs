//! GROUP BY aggregation over a radix tree of buckets.
//!
//! The compiled program hashes the grouping columns of each row, resolves
//! the bucket for that hash and updates its accumulators. A row whose
//! bucket does not exist yet aborts the batch; the worker then creates the
//! missing buckets and runs the batch again.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};

use super::kinds::{self, AggKind};
use super::{checkAggregates, lowerAggregate};
use crate::error::{BcErr, VmError};
use crate::expr::{AggregateOp, Expr};
use crate::ion::{self, Datum, Field, Symtab};
use crate::level::VmConfig;
use crate::radix::RadixTree64;
use crate::ssa::defs::RegClass;
use crate::ssa::stack::stackSlotFromIndex;
use crate::ssa::{recompile, Prog, ValueId};
use crate::vdbe::{lanes, AggMem, Bytecode, VmRef, LANES};
use crate::Result;

/// One GROUP BY column and the name it is written under.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupColumn {
    pub expr: Expr,
    pub label: String,
}

impl GroupColumn {
    pub fn new(expr: Expr, label: &str) -> Self {
        GroupColumn {
            expr,
            label: label.to_string(),
        }
    }

    /// A column named after the last component of `path`.
    pub fn path(path: &str) -> Self {
        let label = path.rsplit('.').next().unwrap_or(path);
        GroupColumn::new(Expr::path(path), label)
    }
}

#[derive(Debug, Clone, Copy)]
enum Order {
    Group { n: usize, desc: bool, nullsLast: bool },
    Aggregate { n: usize, desc: bool },
}

#[derive(Debug, Default)]
struct Shared {
    final_: Option<AggTable>,
    outstanding: i64,
}

/// Parent of the [`AggTable`] workers of one GROUP BY.
#[derive(Debug)]
pub struct HashAggregate {
    prog: Prog,
    by: Vec<GroupColumn>,
    aggs: Vec<AggregateOp>,
    kinds: Vec<AggKind>,
    offsets: Vec<usize>,
    initial: Vec<u8>,
    order: Vec<Order>,
    limit: usize,
    config: VmConfig,
    shared: Mutex<Shared>,
}

impl HashAggregate {
    pub fn new(by: Vec<GroupColumn>, aggs: Vec<AggregateOp>, config: VmConfig) -> Result<HashAggregate> {
        if by.is_empty() {
            return Err(VmError::InvalidAggregate("cannot aggregate an empty selection".to_string()));
        }
        checkAggregates(&aggs)?;

        let mut p = Prog::new();
        let mut stores = Vec::with_capacity(by.len());
        let mut hash: Option<ValueId> = None;
        let mut all = p.validLanes();
        for (i, col) in by.iter().enumerate() {
            let v = p.compileExpr(&col.expr);
            let v = p.toValue(v);
            let k = p.mask(v);
            hash = Some(match hash {
                None => p.hashValue(v, k),
                Some(h) => p.hashValuePlus(h, v, k),
            });
            all = p.and(all, k);
            let mem = p.initMem();
            stores.push(p.store(mem, v, k, i));
        }
        let Some(hash) = hash else {
            return Err(VmError::InvalidAggregate("cannot aggregate an empty selection".to_string()));
        };
        let mem = p.mergeMem(&stores);
        let bucket = p.aggBucket(mem, hash, all);

        let mut kinds = Vec::with_capacity(aggs.len());
        let mut outs = Vec::with_capacity(aggs.len());
        let mut off = 0;
        for op in &aggs {
            let kind = AggKind::of(op.func);
            outs.push(lowerAggregate(&mut p, op, mem, Some(bucket), all, off as u32));
            off += kind.dataSize();
            kinds.push(kind);
        }
        let m = p.mergeMem(&outs);
        p.returnMem(m);
        if let Some(e) = p.errors().first() {
            return Err(VmError::InvalidAggregate(e.to_string()));
        }

        Ok(HashAggregate {
            prog: p,
            by,
            aggs,
            initial: kinds::initialData(&kinds),
            offsets: kinds::offsets(&kinds),
            kinds,
            order: vec![],
            limit: 0,
            config,
            shared: Mutex::new(Shared::default()),
        })
    }

    /// Sorts the output by GROUP BY column `n`. Orderings apply in the
    /// order they are added.
    pub fn orderByGroup(&mut self, n: usize, desc: bool, nullsLast: bool) -> Result<()> {
        if n >= self.by.len() {
            return Err(VmError::InvalidAggregate(format!("group {} doesn't exist", n)));
        }
        self.order.push(Order::Group { n, desc, nullsLast });
        Ok(())
    }

    /// Sorts the output by aggregate `n` using that aggregate's comparator.
    pub fn orderByAggregate(&mut self, n: usize, desc: bool) -> Result<()> {
        if n >= self.aggs.len() {
            return Err(VmError::InvalidAggregate(format!("aggregate {} doesn't exist", n)));
        }
        self.order.push(Order::Aggregate { n, desc });
        Ok(())
    }

    /// Maximum number of output rows; 0 means no limit.
    pub fn limit(&mut self, n: usize) {
        self.limit = n;
    }

    pub fn kinds(&self) -> &[AggKind] {
        &self.kinds
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts a worker.
    pub fn open(self: &Arc<Self>) -> AggTable {
        self.lock().outstanding += 1;
        AggTable {
            parent: Arc::clone(self),
            tree: RadixTree64::new(self.initial.len()),
            prog: Prog::new(),
            bc: Bytecode::new(self.config),
            repr: vec![],
            pairs: vec![],
            symtab: None,
        }
    }

    fn compareGroups(&self, t: &AggTable, keys: &[Vec<Datum>], a: usize, b: usize) -> Ordering {
        for o in &self.order {
            let c = match *o {
                Order::Group { n, desc, nullsLast } => compareKeys(&keys[a][n], &keys[b][n], desc, nullsLast),
                Order::Aggregate { n, desc } => {
                    let kind = self.kinds[n];
                    let off = self.offsets[n];
                    let c = kind.compare(&t.valueOf(&t.pairs[a])[off..], &t.valueOf(&t.pairs[b])[off..]);
                    if desc {
                        c.reverse()
                    } else {
                        c
                    }
                }
            };
            if c != Ordering::Equal {
                return c;
            }
        }
        Ordering::Equal
    }

    /// Produces the output rows once every worker has closed: one struct
    /// per group holding the GROUP BY columns and the aggregates.
    pub fn close(&self) -> Result<Vec<Datum>> {
        let Some(table) = ({
            let mut sh = self.lock();
            if sh.outstanding != 0 {
                crate::bail_internal_error!("HashAggregate.close(): have {} children outstanding", sh.outstanding);
            }
            sh.final_.take()
        }) else {
            crate::bail_internal_error!("HashAggregate.close(): no table was closed; didn't compute any aggregates?");
        };

        let keys = table.decodeKeys()?;
        let mut order: Vec<usize> = (0..table.pairs.len()).collect();
        if !self.order.is_empty() {
            order.sort_by(|&a, &b| self.compareGroups(&table, &keys, a, b));
        }
        if self.limit > 0 {
            order.truncate(self.limit);
        }

        let mut out = Vec::with_capacity(order.len());
        for i in order {
            let value = table.valueOf(&table.pairs[i]);
            let mut fields = Vec::with_capacity(self.by.len() + self.aggs.len());
            for (col, key) in self.by.iter().zip(keys[i].iter()) {
                fields.push(Field {
                    label: col.label.clone(),
                    value: key.clone(),
                });
            }
            for ((op, kind), &off) in self.aggs.iter().zip(self.kinds.iter()).zip(self.offsets.iter()) {
                fields.push(Field {
                    label: op.label.clone(),
                    value: kind.write(&value[off..]),
                });
            }
            out.push(Datum::Struct(fields));
        }
        debug!("hash aggregate produced {} of {} groups", out.len(), table.pairs.len());
        Ok(out)
    }
}

fn compareKeys(a: &Datum, b: &Datum, desc: bool, nullsLast: bool) -> Ordering {
    match (a.isNull(), b.isNull()) {
        (true, true) => Ordering::Equal,
        (true, false) if nullsLast => Ordering::Greater,
        (true, false) => Ordering::Less,
        (false, true) if nullsLast => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ if desc => a.compareOrder(b).reverse(),
        _ => a.compareOrder(b),
    }
}

/// A distinct GROUP BY key.
#[derive(Debug, Clone, Copy)]
struct HPair {
    /// start of the group's serialized GROUP BY columns in `repr`
    reprloc: usize,
    /// entry offset in the tree's value array
    hloc: usize,
}

/// One worker of a [`HashAggregate`].
///
/// Buckets live in the worker's own radix tree; the payload of each entry
/// is the accumulator region of its group. The GROUP BY values of every
/// group are kept in their serialized form, back to back in `repr`, and are
/// only decoded when the parent produces its output.
#[derive(Debug)]
pub struct AggTable {
    parent: Arc<HashAggregate>,
    tree: RadixTree64,
    prog: Prog,
    bc: Bytecode,
    repr: Vec<u8>,
    pairs: Vec<HPair>,
    // symbols used by `repr`
    symtab: Option<Arc<Symtab>>,
}

impl AggTable {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn hashOf(&self, p: &HPair) -> u64 {
        self.tree.value(p.hloc).0
    }

    fn valueOf(&self, p: &HPair) -> &[u8] {
        self.tree.value(p.hloc).1
    }

    /// Serialized GROUP BY column `idx` of `p`.
    fn reprIdx(&self, p: &HPair, idx: usize) -> Result<&[u8]> {
        let mut mem = self.repr.get(p.reprloc..).unwrap_or_default();
        for _ in 0..idx {
            let Some(n) = ion::sizeOf(mem) else {
                crate::bail_internal_error!("corrupt group representation at {}", p.reprloc);
            };
            mem = &mem[n..];
        }
        match ion::sizeOf(mem) {
            Some(n) => Ok(&mem[..n]),
            None => crate::bail_internal_error!("corrupt group representation at {}", p.reprloc),
        }
    }

    /// All serialized GROUP BY columns of `p`.
    fn fullRepr(&self, p: &HPair) -> Result<&[u8]> {
        let mut width = 0;
        for i in 0..self.parent.by.len() {
            width += self.reprIdx(p, i)?.len();
        }
        Ok(&self.repr[p.reprloc..p.reprloc + width])
    }

    fn decodeKeys(&self) -> Result<Vec<Vec<Datum>>> {
        if self.pairs.is_empty() {
            return Ok(vec![]);
        }
        let Some(st) = self.symtab.as_deref() else {
            crate::bail_internal_error!("{} groups without a symbol table", self.pairs.len());
        };
        let ncols = self.parent.by.len();
        let mut out = Vec::with_capacity(self.pairs.len());
        for p in &self.pairs {
            let mut key = Vec::with_capacity(ncols);
            for i in 0..ncols {
                key.push(Datum::decode(self.reprIdx(p, i)?, st)?.0);
            }
            out.push(key);
        }
        Ok(out)
    }

    /// Aggregates the rows of `input` delimited by `delims`.
    pub fn writeRows(&mut self, st: &mut Symtab, input: &[u8], delims: &[VmRef]) -> Result<()> {
        recompile(st, &self.parent.prog, &mut self.prog, &mut self.bc)?;
        // symbol tables only grow, so the newest snapshot decodes every key
        self.symtab.clone_from(&self.bc.symtab);
        for chunk in delims.chunks(LANES) {
            loop {
                match self.bc.evalBatch(input, chunk, &mut AggMem::Buckets(&mut self.tree)) {
                    Ok(_) => break,
                    Err(BcErr::NeedRadix) => self.insertMissing(input)?,
                    Err(e) => return Err(self.bc.fail(e)),
                }
            }
        }
        Ok(())
    }

    /// Creates the buckets the last run could not find.
    fn insertMissing(&mut self, input: &[u8]) -> Result<()> {
        let info = self.bc.errinfo;
        let Some(hashes) = self.bc.stackHashes(info.hslot) else {
            return Err(self.bc.fail(BcErr::Corrupt));
        };
        let ncols = self.parent.by.len();
        let mut cols = Vec::with_capacity(ncols);
        for i in 0..ncols {
            match self.bc.stackValues(stackSlotFromIndex(RegClass::V, i)) {
                Some(v) => cols.push(v),
                None => return Err(self.bc.fail(BcErr::Corrupt)),
            }
        }
        let max = self.parent.config.max_buckets;
        for i in lanes(info.abortMask) {
            let h = hashes[i][0];
            if self.tree.offset(h).is_some() {
                // an earlier lane of this batch created it
                continue;
            }
            if self.pairs.len() >= max {
                return Err(VmError::TooManyBuckets(max));
            }
            let reprloc = self.repr.len();
            for (n, c) in cols.iter().enumerate() {
                let r = c.lane(i);
                if r.size == 0 {
                    crate::bail_internal_error!("abort bit set on a MISSING value in lane {}", i);
                }
                let Some(mem) = self.bc.laneBytes(input, r) else {
                    return Err(self.bc.fail(BcErr::Corrupt));
                };
                // must be a single value
                if ion::sizeOf(mem) != Some(mem.len()) {
                    crate::bail_internal_error!("column {} of lane {} holds {} bytes that are not one value", n, i, mem.len());
                }
                self.repr.extend_from_slice(mem);
            }
            let (hloc, _) = self.tree.insertSlow(h);
            self.tree.payloadMut(hloc).copy_from_slice(&self.parent.initial);
            trace!("new group {:016x} at {}, {} key bytes", h, hloc, self.repr.len() - reprloc);
            self.pairs.push(HPair { reprloc, hloc });
        }
        Ok(())
    }

    /// Absorbs the buckets of `other` into this table.
    pub fn merge(&mut self, other: AggTable) -> Result<()> {
        for p in other.pairs.iter() {
            let src = other.valueOf(p);
            let (hloc, new) = self.tree.insertSlow(other.hashOf(p));
            if new {
                self.tree.payloadMut(hloc).copy_from_slice(&self.parent.initial);
                let reprloc = self.repr.len();
                self.repr.extend_from_slice(other.fullRepr(p)?);
                self.pairs.push(HPair { reprloc, hloc });
            }
            kinds::mergeAll(&self.parent.kinds, self.tree.payloadMut(hloc), src);
        }
        let larger = match (&self.symtab, &other.symtab) {
            (Some(a), Some(b)) => b.maxId() > a.maxId(),
            (None, Some(_)) => true,
            _ => false,
        };
        if larger {
            self.symtab = other.symtab;
        }
        Ok(())
    }

    /// Hands this worker's groups to the parent, merging with any table
    /// that finished earlier.
    pub fn close(mut self) -> Result<()> {
        let parent = Arc::clone(&self.parent);
        let mut sh = parent.lock();
        // the lock is not held while merging
        while let Some(other) = sh.final_.take() {
            drop(sh);
            debug!("merging {} groups into {}", other.len(), self.len());
            let merged = self.merge(other);
            sh = parent.lock();
            if let Err(e) = merged {
                sh.outstanding -= 1;
                return Err(e);
            }
        }
        sh.final_ = Some(self);
        sh.outstanding -= 1;
        assert!(sh.outstanding >= 0, "duplicate AggTable close");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::AggFn;
    use crate::ion::rowDelims;

    fn row(g: &str, x: i64) -> Datum {
        Datum::Struct(vec![
            Field {
                label: "g".to_string(),
                value: Datum::String(g.to_string()),
            },
            Field {
                label: "x".to_string(),
                value: Datum::Int(x),
            },
        ])
    }

    fn encode(st: &mut Symtab, rows: &[Datum]) -> Vec<u8> {
        let mut out = vec![];
        for r in rows {
            out.extend(r.toBytes(st));
        }
        out
    }

    fn parent() -> HashAggregate {
        HashAggregate::new(
            vec![GroupColumn::path("g")],
            vec![
                AggregateOp::new(AggFn::SumInt, Some(Expr::path("x")), "sum"),
                AggregateOp::new(AggFn::Count, None, "n"),
                AggregateOp::new(AggFn::AvgInt, Some(Expr::path("x")), "avg"),
            ],
            VmConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_group_sum() {
        let mut h = parent();
        h.orderByGroup(0, false, false).unwrap();
        let h = Arc::new(h);
        let mut st = Symtab::new();
        let rows: Vec<Datum> = (0..100).map(|i| row(["a", "b", "c"][i % 3], i as i64)).collect();
        let input = encode(&mut st, &rows);
        let mut t = h.open();
        t.writeRows(&mut st, &input, &rowDelims(&input).unwrap()).unwrap();
        assert_eq!(t.len(), 3);
        t.close().unwrap();
        let out = h.close().unwrap();
        assert_eq!(out.len(), 3);
        let want = |r: usize| -> i64 { (0..100).filter(|i| i % 3 == r).sum::<usize>() as i64 };
        for (i, g) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(out[i].field("g"), Some(&Datum::String(g.to_string())));
            assert_eq!(out[i].field("sum"), Some(&Datum::Int(want(i))));
        }
        assert_eq!(out[0].field("n"), Some(&Datum::Int(34)));
    }

    #[test]
    fn test_missing_group_column_skips_row() {
        let h = Arc::new(parent());
        let mut st = Symtab::new();
        let mut rows = vec![row("a", 1), row("a", 2)];
        rows.push(Datum::Struct(vec![Field {
            label: "x".to_string(),
            value: Datum::Int(100),
        }]));
        let input = encode(&mut st, &rows);
        let mut t = h.open();
        t.writeRows(&mut st, &input, &rowDelims(&input).unwrap()).unwrap();
        t.close().unwrap();
        let out = h.close().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].field("sum"), Some(&Datum::Int(3)));
    }

    #[test]
    fn test_bucket_cap() {
        let config = VmConfig {
            max_buckets: 4,
            ..VmConfig::default()
        };
        let h = HashAggregate::new(
            vec![GroupColumn::path("x")],
            vec![AggregateOp::new(AggFn::Count, None, "n")],
            config,
        )
        .unwrap();
        let h = Arc::new(h);
        let mut st = Symtab::new();
        let rows: Vec<Datum> = (0..10).map(|i| row("a", i)).collect();
        let input = encode(&mut st, &rows);
        let mut t = h.open();
        let err = t.writeRows(&mut st, &input, &rowDelims(&input).unwrap()).unwrap_err();
        assert!(matches!(err, VmError::TooManyBuckets(4)), "{}", err);
    }

    #[test]
    fn test_keys_kept_serialized() {
        let h = Arc::new(
            HashAggregate::new(
                vec![GroupColumn::path("g"), GroupColumn::path("x")],
                vec![AggregateOp::new(AggFn::Count, None, "n")],
                VmConfig::default(),
            )
            .unwrap(),
        );
        let mut st = Symtab::new();
        let rows = vec![row("a", 1), row("bb", -300), row("a", 1)];
        let input = encode(&mut st, &rows);
        let mut t = h.open();
        t.writeRows(&mut st, &input, &rowDelims(&input).unwrap()).unwrap();
        assert_eq!(t.len(), 2);

        let a = Datum::String("a".into()).toBytes(&mut st);
        let one = Datum::Int(1).toBytes(&mut st);
        let bb = Datum::String("bb".into()).toBytes(&mut st);
        let neg = Datum::Int(-300).toBytes(&mut st);
        let want: Vec<u8> = [&a[..], &one, &bb, &neg].concat();
        assert_eq!(t.repr, want);
        let second = t.pairs[1];
        assert_eq!(second.reprloc, a.len() + one.len());
        assert_eq!(t.reprIdx(&second, 0).unwrap(), &bb[..]);
        assert_eq!(t.reprIdx(&second, 1).unwrap(), &neg[..]);
        assert_eq!(t.fullRepr(&second).unwrap(), &want[second.reprloc..]);
        assert_eq!(
            t.decodeKeys().unwrap(),
            vec![vec![Datum::String("a".into()), Datum::Int(1)], vec![Datum::String("bb".into()), Datum::Int(-300)]]
        );
    }

    #[test]
    fn test_merge_appends_raw_keys() {
        let h = Arc::new(parent());
        let mut st = Symtab::new();
        let first = encode(&mut st, &[row("a", 1), row("b", 2)]);
        let second = encode(&mut st, &[row("b", 3), row("c", 4)]);
        let mut t1 = h.open();
        t1.writeRows(&mut st.clone(), &first, &rowDelims(&first).unwrap()).unwrap();
        let mut t2 = h.open();
        t2.writeRows(&mut st.clone(), &second, &rowDelims(&second).unwrap()).unwrap();
        let before = t1.repr.len();
        let c = t2.reprIdx(&t2.pairs[1], 0).unwrap().to_vec();

        t1.merge(t2).unwrap();
        assert_eq!(t1.len(), 3);
        // only the new group's key bytes were appended
        assert_eq!(&t1.repr[before..before + c.len()], &c[..]);
        let keys: Vec<Datum> = t1.decodeKeys().unwrap().into_iter().map(|mut k| k.remove(0)).collect();
        assert_eq!(keys, vec![Datum::String("a".into()), Datum::String("b".into()), Datum::String("c".into())]);
        let b = t1.pairs[1];
        assert_eq!(&t1.valueOf(&b)[..8], &5i64.to_le_bytes());
    }

    #[test]
    fn test_too_wide_for_the_stack() {
        let by: Vec<GroupColumn> = (0..420).map(|i| GroupColumn::path(&format!("c{}", i))).collect();
        let h = Arc::new(HashAggregate::new(by, vec![AggregateOp::new(AggFn::Count, None, "n")], VmConfig::default()).unwrap());
        let mut st = Symtab::new();
        let mut t = h.open();
        let err = t.writeRows(&mut st, &[], &[]).unwrap_err();
        assert!(matches!(err, VmError::StackOverflow(n) if n > 65536), "{}", err);
    }

    #[test]
    fn test_close_errors() {
        let h = Arc::new(parent());
        assert!(h.close().is_err());
        let t = h.open();
        assert!(h.close().is_err());
        t.close().unwrap();
        let out = h.close().unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_order_by_aggregate_and_limit() {
        let mut h = parent();
        h.orderByAggregate(0, true).unwrap();
        h.limit(2);
        assert!(h.orderByAggregate(7, false).is_err());
        assert!(h.orderByGroup(1, false, false).is_err());
        let h = Arc::new(h);
        let mut st = Symtab::new();
        let rows = vec![row("a", 1), row("b", 10), row("c", 5), row("b", 1)];
        let input = encode(&mut st, &rows);
        let mut t = h.open();
        t.writeRows(&mut st, &input, &rowDelims(&input).unwrap()).unwrap();
        t.close().unwrap();
        let out = h.close().unwrap();
        let groups: Vec<_> = out.iter().map(|r| r.field("g").cloned()).collect();
        assert_eq!(groups, vec![Some(Datum::String("b".into())), Some(Datum::String("c".into()))]);
    }
}
