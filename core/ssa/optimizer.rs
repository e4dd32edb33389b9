//! Rewrites and scheduling applied between building and compiling.

use std::collections::{BTreeMap, BinaryHeap};

use super::defs::*;
use super::{Imm, Prog, ValueId, INIT, UNDEF};
use crate::ion::Symbol;

enum Fold {
    Keep,
    False,
    Alias(ValueId),
    /// rewrite in place to `nand(a, b)`
    Nand(ValueId, ValueId),
}

impl Prog {
    /// Simplifies, reorders field accesses, then schedules and renumbers
    /// the reachable values.
    pub fn optimize(&mut self) {
        if self.ret.is_none() {
            return;
        }
        self.falseprop();
        self.ordersyms();
        self.finalorder();
        self.forgetExprs();
    }

    /// Reachable values in execution order, arguments before uses, with
    /// init and undef first.
    pub(crate) fn rpo(&self) -> Vec<ValueId> {
        const UNSEEN: u8 = 0;
        const ON_STACK: u8 = 1;
        const DONE: u8 = 2;

        let mut out = vec![INIT, UNDEF];
        let Some(ret) = self.ret else {
            return out;
        };
        let mut state = vec![UNSEEN; self.values.len()];
        state[INIT] = DONE;
        state[UNDEF] = DONE;
        if state[ret] == DONE {
            return out;
        }
        state[ret] = ON_STACK;
        let mut stack = vec![(ret, 0usize)];
        while let Some(&(v, i)) = stack.last() {
            match self.values[v].args.get(i) {
                Some(&arg) => {
                    let top = stack.len() - 1;
                    stack[top].1 += 1;
                    match state[arg] {
                        UNSEEN => {
                            state[arg] = ON_STACK;
                            stack.push((arg, 0));
                        }
                        ON_STACK => panic!("circular reference through v{}", arg),
                        _ => {}
                    }
                }
                None => {
                    state[v] = DONE;
                    out.push(v);
                    stack.pop();
                }
            }
        }
        out
    }

    fn foldRule(&self, v: ValueId) -> Fold {
        let val = &self.values[v];
        let isFalse = |x: ValueId| self.values[x].op == SsaOp::KFalse;
        let isInit = |x: ValueId| self.values[x].op == SsaOp::Init;
        if val.op.isLogical() {
            let (a, b) = (val.args[0], val.args[1]);
            return match val.op {
                SsaOp::And if isFalse(a) || isFalse(b) => Fold::False,
                SsaOp::And if a == b || isInit(b) => Fold::Alias(a),
                SsaOp::And if isInit(a) => Fold::Alias(b),
                SsaOp::Or if isInit(a) || isInit(b) => Fold::Alias(INIT),
                SsaOp::Or if a == b || isFalse(b) => Fold::Alias(a),
                SsaOp::Or if isFalse(a) => Fold::Alias(b),
                SsaOp::Xor if a == b => Fold::False,
                SsaOp::Xor if isFalse(a) => Fold::Alias(b),
                SsaOp::Xor if isFalse(b) => Fold::Alias(a),
                SsaOp::Xor if isInit(a) => Fold::Nand(b, INIT),
                SsaOp::Xor if isInit(b) => Fold::Nand(a, INIT),
                SsaOp::Xnor if a == b => Fold::Alias(INIT),
                SsaOp::Xnor if isInit(a) => Fold::Alias(b),
                SsaOp::Xnor if isInit(b) => Fold::Alias(a),
                SsaOp::Xnor if isFalse(a) => Fold::Nand(b, INIT),
                SsaOp::Xnor if isFalse(b) => Fold::Nand(a, INIT),
                SsaOp::Nand if a == b || isInit(a) || isFalse(b) => Fold::False,
                SsaOp::Nand if isFalse(a) => Fold::Alias(b),
                _ => Fold::Keep,
            };
        }
        let info = val.info();
        let Some(m) = val.maskArg() else {
            return Fold::Keep;
        };
        if !isFalse(m) || info.emit == Emit::Ret || val.op == SsaOp::Store {
            return Fold::Keep;
        }
        if info.rettype & ST_MEM != 0 || info.blend {
            return Fold::Alias(val.args[0]);
        }
        if info.rettype != 0 && info.rettype & !ST_VALUE_MASKED == 0 {
            return Fold::False;
        }
        Fold::Keep
    }

    /// Propagates constant-false masks and folds trivial logic until
    /// nothing changes.
    pub(crate) fn falseprop(&mut self) {
        let mut rewrite: Vec<Option<ValueId>> = vec![None; self.values.len()];
        let mut changed = true;
        while changed {
            changed = false;
            for v in self.rpo() {
                for j in 0..self.values[v].args.len() {
                    let mut a = self.values[v].args[j];
                    while let Some(r) = rewrite[a] {
                        a = r;
                    }
                    if a != self.values[v].args[j] {
                        self.values[v].args[j] = a;
                        changed = true;
                    }
                }
                if rewrite[v].is_some() {
                    continue;
                }
                match self.foldRule(v) {
                    Fold::Keep => {}
                    Fold::False => {
                        let val = &mut self.values[v];
                        val.op = SsaOp::KFalse;
                        val.args.clear();
                        val.imm = Imm::None;
                        val.notMissing = None;
                        changed = true;
                    }
                    Fold::Alias(to) => {
                        rewrite[v] = Some(to);
                        changed = true;
                    }
                    Fold::Nand(a, b) => {
                        let val = &mut self.values[v];
                        val.op = SsaOp::Nand;
                        val.args = vec![a, b];
                        changed = true;
                    }
                }
            }
            if let Some(mut r) = self.ret {
                while let Some(to) = rewrite[r] {
                    r = to;
                }
                self.ret = Some(r);
            }
        }
    }

    /// Chains field lookups against the same struct in ascending symbol
    /// order so each search resumes where the previous one stopped.
    pub(crate) fn ordersyms(&mut self) {
        let mut groups: BTreeMap<(ValueId, ValueId), Vec<(Symbol, ValueId)>> = BTreeMap::new();
        for v in self.rpo() {
            let val = &self.values[v];
            if val.op != SsaOp::Dot {
                continue;
            }
            if let Imm::Symbol(sym) = val.imm {
                groups.entry((val.args[0], val.args[1])).or_default().push((sym, v));
            }
        }
        for ((base, k), mut access) in groups {
            if access.len() < 2 {
                continue;
            }
            access.sort();
            let mut prev = access[0].1;
            for &(_, v) in &access[1..] {
                let val = &mut self.values[v];
                val.op = SsaOp::Dot2;
                val.args = vec![base, prev, prev, k];
                prev = v;
            }
            log::trace!("chained {} field lookups on v{}", access.len(), base);
        }
    }

    /// Schedules the reachable values and renumbers them in program order.
    ///
    /// The schedule is built backwards from the return value; among the
    /// values whose uses are all placed, the one with the highest
    /// (priority, execution index) is placed last.
    pub(crate) fn finalorder(&mut self) {
        let Some(ret) = self.ret else {
            return;
        };
        let order = self.rpo();
        let n = self.values.len();
        let mut index = vec![0usize; n];
        for (i, &v) in order.iter().enumerate() {
            index[v] = i;
        }
        let mut refcount = vec![0usize; n];
        for &v in &order {
            for &a in &self.values[v].args {
                refcount[a] += 1;
            }
        }
        if refcount[ret] != 0 {
            panic!("ret has non-zero refcount?");
        }
        let key = |v: ValueId| (self.values[v].info().priority, index[v], v);
        let mut ready = BinaryHeap::new();
        ready.push(key(ret));
        let mut sched = Vec::with_capacity(order.len());
        while let Some((_, _, v)) = ready.pop() {
            for &a in &self.values[v].args {
                refcount[a] -= 1;
                if refcount[a] == 0 && a > UNDEF {
                    ready.push(key(a));
                }
            }
            sched.push(v);
        }
        sched.push(UNDEF);
        sched.push(INIT);
        sched.reverse();

        let mut renumber = vec![usize::MAX; n];
        for (i, &v) in sched.iter().enumerate() {
            renumber[v] = i;
        }
        let mut values = Vec::with_capacity(sched.len());
        for (i, &v) in sched.iter().enumerate() {
            let mut val = self.values[v].clone();
            val.id = i;
            for a in val.args.iter_mut() {
                *a = renumber[*a];
            }
            val.notMissing = None;
            values.push(val);
        }
        log::debug!("scheduled {} of {} values", values.len(), n);
        self.values = values;
        self.ret = Some(renumber[ret]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ion::Symtab;

    fn count(p: &Prog, op: SsaOp) -> usize {
        p.values.iter().filter(|v| v.op == op).count()
    }

    #[test]
    fn test_falseprop_masks() {
        let mut p = Prog::new();
        let a = p.dot("a", INIT);
        let f = p.kfalse();
        // bypass the builder's own folding
        let dead = p.ssa2(SsaOp::And, a, f);
        let i = p.ssa2(SsaOp::ToInt, a, a);
        let c = p.ssa2imm(SsaOp::CmpEqImmI, i, dead, Imm::I64(3));
        let live = p.ssa2imm(SsaOp::CmpEqImmI, i, i, Imm::I64(4));
        let either = p.ssa2(SsaOp::Or, c, live);
        p.returnBool(either);
        p.optimize();
        let ret = p.value(p.ret.unwrap());
        let arg = ret.args[0];
        assert_eq!(p.op(arg), SsaOp::CmpEqImmI);
        assert_eq!(p.value(arg).imm, Imm::I64(4));
        assert_eq!(count(&p, SsaOp::Or), 0);
    }

    #[test]
    fn test_falseprop_aggregates() {
        let mut p = Prog::new();
        let mem = p.initMem();
        let a = p.dot("a", INIT);
        let i = p.ssa2(SsaOp::ToInt, a, a);
        let f = p.kfalse();
        let dead = p.ssa3imm(SsaOp::AggSumI, mem, i, f, Imm::AggSlot(0));
        let stored = p.store(dead, a, f, 0);
        p.returnMem(stored);
        p.optimize();
        // the update is dropped, the store is not
        assert_eq!(count(&p, SsaOp::AggSumI), 0);
        assert_eq!(count(&p, SsaOp::Store), 1);
        let st = p.value(p.ret.unwrap()).args[0];
        assert_eq!(p.op(p.value(st).args[0]), SsaOp::InitMem);
    }

    #[test]
    fn test_ordersyms() {
        let mut st = Symtab::new();
        let m = st.intern("m");
        st.intern("z");
        st.intern("a");
        let mut p = Prog::new();
        let mut all = INIT;
        for name in ["z", "a", "m"] {
            let v = p.dot(name, INIT);
            let b = p.toBool(v);
            all = p.and(all, b);
        }
        p.returnBool(all);
        p.symbolize(&st).unwrap();
        p.optimize();
        assert_eq!(count(&p, SsaOp::Dot), 1);
        assert_eq!(count(&p, SsaOp::Dot2), 2);
        let first = p.values.iter().find(|v| v.op == SsaOp::Dot).unwrap();
        assert_eq!(first.imm, Imm::Symbol(m));
        let chain: Vec<Symbol> = p
            .values
            .iter()
            .filter(|v| matches!(v.op, SsaOp::Dot | SsaOp::Dot2))
            .map(|v| match v.imm {
                Imm::Symbol(s) => s,
                _ => 0,
            })
            .collect();
        let mut sorted = chain.clone();
        sorted.sort();
        assert_eq!(chain, sorted);
    }

    #[test]
    fn test_finalorder_layout() {
        let mut p = Prog::new();
        let mem = p.initMem();
        let x = p.dot("x", INIT);
        let y = p.dot("y", INIT);
        let xi = p.coerceInt(x);
        let yi = p.coerceFloat(y);
        let s = p.aggregate(crate::expr::AggFn::SumInt, mem, Some(xi), INIT, 0);
        let c = p.aggregate(crate::expr::AggFn::Count, mem, None, INIT, 16);
        let fsum = p.aggregate(crate::expr::AggFn::SumFloat, mem, Some(yi), INIT, 24);
        let all = p.mergeMem(&[s, c, fsum]);
        p.returnMem(all);
        p.optimize();
        assert_eq!(p.op(0), SsaOp::Init);
        assert_eq!(p.op(1), SsaOp::Undef);
        for v in &p.values {
            for &a in &v.args {
                assert!(a < v.id, "v{} used before definition in v{}", a, v.id);
            }
        }
        let isMem = |v: &super::super::Value| v.info().rettype == ST_MEM;
        let lastPlain = p.values.iter().rposition(|v| !isMem(v) && v.info().emit != Emit::Ret).unwrap();
        let firstMem = p.values.iter().position(isMem).unwrap();
        assert!(lastPlain < firstMem, "{}", p.dump());
    }

    #[test]
    #[should_panic(expected = "circular reference")]
    fn test_cycle_detected() {
        let mut p = Prog::new();
        let a = p.dot("a", INIT);
        let b = p.toBool(a);
        let c = p.ssa2(SsaOp::And, b, a);
        p.returnBool(c);
        // splice a back edge in by hand
        p.values[a].args[1] = c;
        p.rpo();
    }
}
