use proptest::prelude::*;
use vecvm_core::ion::rowDelims;
use vecvm_core::{compileFilter, filterRows, CmpOp, Datum, Expr, Field, OptLevel, Symtab, VmConfig};

/// A column value: absent, NULL or an integer.
type Col = Option<Option<i64>>;

fn encodeRows(st: &mut Symtab, rows: &[(Col, Col)]) -> Vec<u8> {
    let mut out = vec![];
    for (a, b) in rows {
        let mut fields = vec![];
        for (label, c) in [("a", a), ("b", b)] {
            if let Some(v) = c {
                fields.push(Field {
                    label: label.to_string(),
                    value: v.map(Datum::Int).unwrap_or(Datum::Null),
                });
            }
        }
        out.extend(Datum::Struct(fields).toBytes(st));
    }
    out
}

#[derive(Debug, Clone)]
enum Cond {
    Lt(i64),
    Eq(i64),
    And(Box<Cond>, Box<Cond>),
    Or(Box<Cond>, Box<Cond>),
    Xor(Box<Cond>, Box<Cond>),
    // boolean equality
    Same(Box<Cond>, Box<Cond>),
    Not(Box<Cond>),
}

impl Cond {
    fn expr(&self) -> Expr {
        match self {
            Cond::Lt(c) => Expr::cmp(CmpOp::Lt, Expr::path("a"), Expr::lit(*c)),
            Cond::Eq(c) => Expr::cmp(CmpOp::Eq, Expr::path("b"), Expr::lit(*c)),
            Cond::And(x, y) => Expr::and(x.expr(), y.expr()),
            Cond::Or(x, y) => Expr::or(x.expr(), y.expr()),
            Cond::Xor(x, y) => Expr::Xor(Box::new(x.expr()), Box::new(y.expr())),
            Cond::Same(x, y) => Expr::cmp(CmpOp::Eq, x.expr(), y.expr()),
            Cond::Not(x) => Expr::Not(Box::new(x.expr())),
        }
    }

    /// Three-valued reference evaluation; `None` is UNKNOWN.
    fn eval(&self, a: Col, b: Col) -> Option<bool> {
        match self {
            Cond::Lt(c) => a.flatten().map(|a| a < *c),
            Cond::Eq(c) => b.flatten().map(|b| b == *c),
            Cond::And(x, y) => match (x.eval(a, b), y.eval(a, b)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Cond::Or(x, y) => match (x.eval(a, b), y.eval(a, b)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            Cond::Xor(x, y) => Some(x.eval(a, b)? ^ y.eval(a, b)?),
            Cond::Same(x, y) => Some(x.eval(a, b)? == y.eval(a, b)?),
            Cond::Not(x) => x.eval(a, b).map(|v| !v),
        }
    }
}

fn col() -> impl Strategy<Value = Col> {
    prop_oneof![Just(None), Just(Some(None)), (-4i64..4).prop_map(|v| Some(Some(v)))]
}

fn cond() -> impl Strategy<Value = Cond> {
    let leaf = prop_oneof![(-4i64..4).prop_map(Cond::Lt), (-4i64..4).prop_map(Cond::Eq)];
    leaf.prop_recursive(3, 12, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(x, y)| Cond::And(Box::new(x), Box::new(y))),
            (inner.clone(), inner.clone()).prop_map(|(x, y)| Cond::Or(Box::new(x), Box::new(y))),
            (inner.clone(), inner.clone()).prop_map(|(x, y)| Cond::Xor(Box::new(x), Box::new(y))),
            (inner.clone(), inner.clone()).prop_map(|(x, y)| Cond::Same(Box::new(x), Box::new(y))),
            inner.prop_map(|x| Cond::Not(Box::new(x))),
        ]
    })
}

proptest! {
    #[test]
    fn test_three_valued_filter(c in cond(), rows in proptest::collection::vec((col(), col()), 1..40)) {
        let mut st = Symtab::new();
        let input = encodeRows(&mut st, &rows);
        let delims = rowDelims(&input).unwrap();
        let mut bc = compileFilter(&c.expr(), &mut st, VmConfig::default()).unwrap();
        let got = bc.evalFilter(&input, &delims).unwrap();
        let want: Vec<bool> = rows.iter().map(|(a, b)| c.eval(*a, *b) == Some(true)).collect();
        prop_assert_eq!(got, want, "{:?}", c);
    }
}

#[test]
fn test_xor_with_missing_side() {
    let mut st = Symtab::new();
    let vals = [Some(Some(0)), Some(Some(5)), None];
    let rows: Vec<(Col, Col)> = vals.iter().flat_map(|a| vals.iter().map(move |b| (*a, *b))).collect();
    let input = encodeRows(&mut st, &rows);
    let delims = rowDelims(&input).unwrap();
    let lt = |name: &str| Expr::cmp(CmpOp::Lt, Expr::path(name), Expr::lit(2i64));
    let xor = Expr::Xor(Box::new(lt("a")), Box::new(lt("b")));

    let mut bc = compileFilter(&xor, &mut st, VmConfig::default()).unwrap();
    let got = bc.evalFilter(&input, &delims).unwrap();
    // only (0, 5) and (5, 0) are TRUE; an absent side makes the row MISSING
    assert_eq!(got, vec![false, true, false, true, false, false, false, false, false]);

    let mut bc = compileFilter(&Expr::Not(Box::new(xor)), &mut st, VmConfig::default()).unwrap();
    let got = bc.evalFilter(&input, &delims).unwrap();
    assert_eq!(got, vec![true, false, false, false, true, false, false, false, false]);
}

#[test]
fn test_filter_rows() {
    let mut st = Symtab::new();
    let rows: Vec<(Col, Col)> = (0..50).map(|i| (Some(Some(i)), if i % 5 == 0 { None } else { Some(Some(i % 7)) })).collect();
    let input = encodeRows(&mut st, &rows);
    let e = Expr::and(Expr::cmp(CmpOp::Ge, Expr::path("a"), Expr::lit(10i64)), Expr::cmp(CmpOp::Eq, Expr::path("b"), Expr::lit(3i64)));
    let kept = filterRows(&e, &mut st, &input).unwrap();
    let want = (10..50).filter(|i| i % 5 != 0 && i % 7 == 3).count();
    assert_eq!(kept.len(), want);
}

#[test]
fn test_levels_agree_end_to_end() {
    let mut st = Symtab::new();
    let rows: Vec<(Col, Col)> = (0..33).map(|i| (Some(Some(i % 9)), Some(if i % 4 == 0 { None } else { Some(i % 3) }))).collect();
    let input = encodeRows(&mut st, &rows);
    let delims = rowDelims(&input).unwrap();
    let e = Expr::or(Expr::cmp(CmpOp::Lt, Expr::path("a"), Expr::lit(3i64)), Expr::Not(Box::new(Expr::cmp(CmpOp::Eq, Expr::path("b"), Expr::lit(1i64)))));
    let mut outs = vec![];
    for level in [OptLevel::None, OptLevel::V1, OptLevel::V2] {
        let mut bc = compileFilter(&e, &mut st, VmConfig::withLevel(level)).unwrap();
        outs.push(bc.evalFilter(&input, &delims).unwrap());
    }
    assert_eq!(outs[0], outs[1]);
    assert_eq!(outs[1], outs[2]);
}
