use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vecvm_core::ion::rowDelims;
use vecvm_core::{AggFn, AggregateOp, Datum, Expr, Field, GroupColumn, HashAggregate, Symtab, VmConfig, VmRef};

fn field(label: &str, value: Datum) -> Field {
    Field {
        label: label.to_string(),
        value,
    }
}

struct Input {
    st: Symtab,
    buf: Vec<u8>,
    delims: Vec<VmRef>,
    rows: Vec<(String, Option<i64>)>,
}

fn randomInput(seed: u64, n: usize, groups: usize) -> Input {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut st = Symtab::new();
    let mut buf = vec![];
    let mut rows = vec![];
    for _ in 0..n {
        let g = format!("g{}", rng.gen_range(0..groups));
        let x = if rng.gen_bool(0.1) { None } else { Some(rng.gen_range(-1000i64..1000)) };
        let gf = field("g", Datum::String(g.clone()));
        // vary field order between rows
        let fields = match (x, rng.gen_bool(0.5)) {
            (Some(x), true) => vec![field("x", Datum::Int(x)), gf],
            (Some(x), false) => vec![gf, field("x", Datum::Int(x))],
            (None, _) => vec![gf],
        };
        buf.extend(Datum::Struct(fields).toBytes(&mut st));
        rows.push((g, x));
    }
    let delims = rowDelims(&buf).unwrap();
    Input { st, buf, delims, rows }
}

fn aggregates() -> Vec<AggregateOp> {
    vec![
        AggregateOp::new(AggFn::SumInt, Some(Expr::path("x")), "sum"),
        AggregateOp::new(AggFn::Count, None, "rows"),
        AggregateOp::new(AggFn::Count, Some(Expr::path("x")), "xs"),
        AggregateOp::new(AggFn::MinInt, Some(Expr::path("x")), "min"),
        AggregateOp::new(AggFn::MaxInt, Some(Expr::path("x")), "max"),
    ]
}

fn run(input: &Input, workers: usize, config: VmConfig) -> Vec<Datum> {
    let mut agg = HashAggregate::new(vec![GroupColumn::path("g")], aggregates(), config).unwrap();
    agg.orderByGroup(0, false, false).unwrap();
    let agg = Arc::new(agg);
    let per = input.delims.len().div_ceil(workers);
    thread::scope(|s| {
        for chunk in input.delims.chunks(per) {
            let mut table = agg.open();
            let mut st = input.st.clone();
            let buf = &input.buf;
            s.spawn(move || {
                // several small batches per worker
                for part in chunk.chunks(37) {
                    table.writeRows(&mut st, buf, part).unwrap();
                }
                table.close().unwrap();
            });
        }
    });
    agg.close().unwrap()
}

#[derive(Debug, Default)]
struct Expected {
    sum: i64,
    rows: i64,
    xs: i64,
    min: Option<i64>,
    max: Option<i64>,
}

fn expected(input: &Input) -> BTreeMap<String, Expected> {
    let mut out: BTreeMap<String, Expected> = BTreeMap::new();
    for (g, x) in &input.rows {
        let e = out.entry(g.clone()).or_default();
        e.rows += 1;
        if let Some(x) = *x {
            e.sum += x;
            e.xs += 1;
            e.min = Some(e.min.map_or(x, |m| m.min(x)));
            e.max = Some(e.max.map_or(x, |m| m.max(x)));
        }
    }
    out
}

#[test]
fn test_concurrent_workers_match_reference() {
    let _ = env_logger::builder().is_test(true).try_init();
    let input = randomInput(7, 5000, 60);
    let out = run(&input, 4, VmConfig::default());
    let want = expected(&input);
    assert_eq!(out.len(), want.len());
    for (row, (g, e)) in out.iter().zip(want.iter()) {
        assert_eq!(row.field("g"), Some(&Datum::String(g.clone())));
        assert_eq!(row.field("rows"), Some(&Datum::Int(e.rows)));
        assert_eq!(row.field("xs"), Some(&Datum::Int(e.xs)));
        let sum = if e.xs == 0 { Datum::Null } else { Datum::Int(e.sum) };
        assert_eq!(row.field("sum"), Some(&sum), "group {}", g);
        assert_eq!(row.field("min"), Some(&e.min.map(Datum::Int).unwrap_or(Datum::Null)));
        assert_eq!(row.field("max"), Some(&e.max.map(Datum::Int).unwrap_or(Datum::Null)));
    }
}

#[test]
fn test_result_independent_of_worker_count() {
    let input = randomInput(99, 2000, 25);
    let one = run(&input, 1, VmConfig::default());
    let many = run(&input, 7, VmConfig::default());
    assert_eq!(one, many);
}

#[test]
fn test_too_many_buckets_across_batches() {
    let input = randomInput(3, 500, 100);
    let config = VmConfig {
        max_buckets: 10,
        ..VmConfig::default()
    };
    let agg = Arc::new(HashAggregate::new(vec![GroupColumn::path("g")], aggregates(), config).unwrap());
    let mut table = agg.open();
    let mut st = input.st.clone();
    let err = table.writeRows(&mut st, &input.buf, &input.delims).unwrap_err();
    assert!(err.to_string().contains("too many buckets"), "{}", err);
}

#[test]
fn test_empty_average_sorts_last() {
    let mut st = Symtab::new();
    let mut buf = vec![];
    for (g, x) in [("a", Some(5i64)), ("b", None), ("c", Some(-3)), ("b", None), ("a", Some(7))] {
        let mut fields = vec![field("g", Datum::String(g.to_string()))];
        if let Some(x) = x {
            fields.push(field("x", Datum::Int(x)));
        }
        buf.extend(Datum::Struct(fields).toBytes(&mut st));
    }
    let delims = rowDelims(&buf).unwrap();
    let mut agg = HashAggregate::new(
        vec![GroupColumn::path("g")],
        vec![AggregateOp::new(AggFn::AvgInt, Some(Expr::path("x")), "avg")],
        VmConfig::default(),
    )
    .unwrap();
    agg.orderByAggregate(0, false).unwrap();
    let agg = Arc::new(agg);
    let mut table = agg.open();
    table.writeRows(&mut st, &buf, &delims).unwrap();
    table.close().unwrap();
    let out = agg.close().unwrap();
    let got: Vec<(Option<&Datum>, Option<&Datum>)> = out.iter().map(|r| (r.field("g"), r.field("avg"))).collect();
    assert_eq!(
        got,
        vec![
            (Some(&Datum::String("c".into())), Some(&Datum::Int(-3))),
            (Some(&Datum::String("a".into())), Some(&Datum::Int(6))),
            (Some(&Datum::String("b".into())), Some(&Datum::Null)),
        ]
    );
}

#[test]
fn test_new_symbols_between_batches() {
    let mut st = Symtab::new();
    let first = Datum::Struct(vec![field("x", Datum::Int(1))]).toBytes(&mut st);
    let agg = Arc::new(
        HashAggregate::new(
            vec![GroupColumn::path("g")],
            vec![AggregateOp::new(AggFn::SumInt, Some(Expr::path("x")), "sum")],
            VmConfig::default(),
        )
        .unwrap(),
    );
    let mut table = agg.open();
    // `g` is not yet a symbol, so no row can be grouped
    table.writeRows(&mut st, &first, &rowDelims(&first).unwrap()).unwrap();
    assert!(table.is_empty());

    let second = Datum::Struct(vec![field("g", Datum::Int(4)), field("x", Datum::Int(2))]).toBytes(&mut st);
    table.writeRows(&mut st, &second, &rowDelims(&second).unwrap()).unwrap();
    assert_eq!(table.len(), 1);
    table.close().unwrap();
    let out = agg.close().unwrap();
    assert_eq!(out[0].field("g"), Some(&Datum::Int(4)));
    assert_eq!(out[0].field("sum"), Some(&Datum::Int(2)));
}
