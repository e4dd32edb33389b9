use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use log::debug;
use rustyline::DefaultEditor;
use vecvm_core::ion::rowDelims;
use vecvm_core::json;
use vecvm_core::{
    compileFilter, AggFn, AggregateOp, Bytecode, CmpOp, Datum, Expr, GroupColumn, HashAggregate, OptLevel, Symtab, VmConfig, VmRef,
};

const HELP: &str = "\
.load FILE          load JSON lines, one object per row
.filter EXPR        print rows matching `path OP literal` terms joined by and/or
.group COLS AGGS    GROUP BY comma-separated COLS computing AGGS, e.g. sum(x),count(*)
.explain            disassemble the last compiled filter
.level [LEVEL]      show or set the optimization level (none, v1, v2)
.help               show this message
.quit               exit";

pub struct VecvmCliApp {
    pub prompt: String,
    pub interrupt_count: Arc<AtomicUsize>,
    symtab: Symtab,
    input: Vec<u8>,
    delims: Vec<VmRef>,
    config: VmConfig,
    lastBytecode: Option<Bytecode>,
}

impl VecvmCliApp {
    pub fn new() -> anyhow::Result<Self> {
        Ok(VecvmCliApp {
            prompt: "vecvm> ".to_string(),
            interrupt_count: Arc::new(AtomicUsize::new(0)),
            symtab: Symtab::new(),
            input: vec![],
            delims: vec![],
            config: VmConfig::default(),
            lastBytecode: None,
        })
    }

    /// Runs one input line; `false` asks the caller to exit.
    pub fn processInputLine(&mut self, line: &str, rustyLineEditor: &mut DefaultEditor) -> anyhow::Result<bool> {
        if line.is_empty() {
            return Ok(true);
        }
        let _ = rustyLineEditor.add_history_entry(line);
        self.interrupt_count.store(0, Ordering::SeqCst);

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };
        match cmd {
            ".quit" | ".exit" => return Ok(false),
            ".help" => println!("{}", HELP),
            ".load" => self.load(rest)?,
            ".filter" => self.filter(rest)?,
            ".group" => self.group(rest)?,
            ".explain" => match &self.lastBytecode {
                Some(bc) => print!("{}", bc.explain()),
                None => println!("no program compiled yet"),
            },
            ".level" => {
                if !rest.is_empty() {
                    self.config.level = OptLevel::from_str(rest)?;
                }
                println!("{} (detected {})", self.config.level, OptLevel::detect());
            }
            _ => bail!("unknown command {:?}; try .help", cmd),
        }
        Ok(true)
    }

    fn load(&mut self, path: &str) -> anyhow::Result<()> {
        if path.is_empty() {
            bail!("usage: .load FILE");
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
        let mut symtab = Symtab::new();
        let input = json::linesToIon(&text, &mut symtab)?;
        self.delims = rowDelims(&input)?;
        self.input = input;
        self.symtab = symtab;
        self.lastBytecode = None;
        println!("loaded {} rows", self.delims.len());
        Ok(())
    }

    fn filter(&mut self, text: &str) -> anyhow::Result<()> {
        let e = parseCondition(text)?;
        debug!("filter {:?}", e);
        let mut bc = compileFilter(&e, &mut self.symtab, self.config)?;
        let keep = bc.evalFilter(&self.input, &self.delims)?;
        let mut n = 0;
        for (d, k) in self.delims.iter().zip(keep) {
            if !k {
                continue;
            }
            let row = bc.decodeLane(&self.input, *d)?;
            println!("{}", json::toJson(&row)?);
            n += 1;
        }
        println!("({} of {} rows)", n, self.delims.len());
        self.lastBytecode = Some(bc);
        Ok(())
    }

    fn group(&mut self, text: &str) -> anyhow::Result<()> {
        let Some((cols, aggs)) = text.split_once(char::is_whitespace) else {
            bail!("usage: .group COLS AGGS");
        };
        let by: Vec<GroupColumn> = cols.split(',').map(str::trim).filter(|c| !c.is_empty()).map(GroupColumn::path).collect();
        let aggs = aggs.split(',').map(parseAggregate).collect::<anyhow::Result<Vec<_>>>()?;
        let mut agg = HashAggregate::new(by, aggs, self.config)?;
        agg.orderByGroup(0, false, false)?;
        let agg = Arc::new(agg);

        if self.delims.is_empty() {
            agg.open().close()?;
        }
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let per = self.delims.len().div_ceil(workers).max(1);
        std::thread::scope(|s| -> anyhow::Result<()> {
            let mut handles = vec![];
            for chunk in self.delims.chunks(per) {
                let mut table = agg.open();
                let mut st = self.symtab.clone();
                let input = &self.input;
                handles.push(s.spawn(move || -> vecvm_core::Result<()> {
                    table.writeRows(&mut st, input, chunk)?;
                    table.close()
                }));
            }
            for h in handles {
                h.join().map_err(|_| anyhow!("aggregate worker panicked"))??;
            }
            Ok(())
        })?;

        for row in agg.close()? {
            println!("{}", json::toJson(&row)?);
        }
        Ok(())
    }
}

fn parseLiteral(s: &str) -> anyhow::Result<Datum> {
    let s = s.trim();
    for q in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return Ok(Datum::String(inner.to_string()));
        }
    }
    Ok(match s {
        "true" => Datum::Bool(true),
        "false" => Datum::Bool(false),
        "null" => Datum::Null,
        _ => {
            if let Ok(i) = s.parse::<i64>() {
                Datum::Int(i)
            } else if let Ok(f) = s.parse::<f64>() {
                Datum::Float(f)
            } else {
                bail!("cannot parse literal {:?}", s)
            }
        }
    })
}

fn parseTerm(s: &str) -> anyhow::Result<Expr> {
    const OPS: [(&str, CmpOp); 7] = [
        ("<=", CmpOp::Le),
        (">=", CmpOp::Ge),
        ("!=", CmpOp::Ne),
        ("<>", CmpOp::Ne),
        ("<", CmpOp::Lt),
        (">", CmpOp::Gt),
        ("=", CmpOp::Eq),
    ];
    for (tok, op) in OPS {
        if let Some((path, lit)) = s.split_once(tok) {
            let path = path.trim();
            if path.is_empty() {
                bail!("missing path in {:?}", s);
            }
            return Ok(Expr::cmp(op, Expr::path(path), Expr::Literal(parseLiteral(lit)?)));
        }
    }
    bail!("expected `path OP literal`, got {:?}", s)
}

/// Parses `t1 and t2 or t3`; `and` binds tighter than `or`.
fn parseCondition(s: &str) -> anyhow::Result<Expr> {
    let mut ors = vec![];
    for disj in s.split(" or ") {
        let mut ands = disj.split(" and ").map(parseTerm);
        let Some(first) = ands.next() else {
            bail!("empty condition");
        };
        let mut e = first?;
        for t in ands {
            e = Expr::and(e, t?);
        }
        ors.push(e);
    }
    ors.into_iter().reduce(Expr::or).ok_or_else(|| anyhow!("empty condition"))
}

fn parseAggregate(s: &str) -> anyhow::Result<AggregateOp> {
    let s = s.trim();
    let Some((name, arg)) = s.strip_suffix(')').and_then(|r| r.split_once('(')) else {
        bail!("expected NAME(ARG), got {:?}", s);
    };
    let func = match name.trim().to_ascii_lowercase().as_str() {
        "sum" => AggFn::SumFloat,
        "sum_int" => AggFn::SumInt,
        "avg" => AggFn::AvgFloat,
        "avg_int" => AggFn::AvgInt,
        "min" => AggFn::MinFloat,
        "min_int" => AggFn::MinInt,
        "max" => AggFn::MaxFloat,
        "max_int" => AggFn::MaxInt,
        "min_ts" => AggFn::MinTs,
        "max_ts" => AggFn::MaxTs,
        "bit_and" => AggFn::BitAnd,
        "bit_or" => AggFn::BitOr,
        "bit_xor" => AggFn::BitXor,
        "bool_and" => AggFn::BoolAnd,
        "bool_or" => AggFn::BoolOr,
        "count" => AggFn::Count,
        other => bail!("unknown aggregate {:?}", other),
    };
    let arg = arg.trim();
    let arg = if arg == "*" { None } else { Some(Expr::path(arg)) };
    Ok(AggregateOp::new(func, arg, s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_condition() {
        let e = parseCondition("a > 1 and b = 'x' or c <= 2.5").unwrap();
        let want = Expr::or(
            Expr::and(
                Expr::cmp(CmpOp::Gt, Expr::path("a"), Expr::Literal(Datum::Int(1))),
                Expr::cmp(CmpOp::Eq, Expr::path("b"), Expr::Literal(Datum::String("x".into()))),
            ),
            Expr::cmp(CmpOp::Le, Expr::path("c"), Expr::Literal(Datum::Float(2.5))),
        );
        assert_eq!(e, want);
        assert!(parseCondition("a ~ 1").is_err());
    }

    #[test]
    fn test_parse_aggregate() {
        let op = parseAggregate("count(*)").unwrap();
        assert_eq!(op.func, AggFn::Count);
        assert!(op.arg.is_none());
        assert_eq!(parseAggregate(" avg(x.y) ").unwrap().label, "avg(x.y)");
        assert!(parseAggregate("median(x)").is_err());
    }
}
