use std::cmp::Ordering;
use std::fmt::Display;

use super::{header, readFloat, readInt, readLabel, readTimestamp, readUintMag, readVarUint, typeOf};
use super::{Buffer, Symbol, Symtab, Type};
use crate::error::VmError;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub label: String,
    pub value: Datum,
}

/// Owned, decoded ION value.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// microseconds since the unix epoch, UTC
    Timestamp(i64),
    Symbol(String),
    String(String),
    Blob(Vec<u8>),
    List(Vec<Datum>),
    Struct(Vec<Field>),
}

impl Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Datum::Null => write!(f, "null"),
            Datum::Bool(b) => write!(f, "{}", b),
            Datum::Int(i) => write!(f, "{}", i),
            Datum::Float(x) => write!(f, "{:?}", x),
            Datum::Timestamp(t) => match chrono::DateTime::from_timestamp(t.div_euclid(1_000_000), (t.rem_euclid(1_000_000) * 1000) as u32) {
                Some(dt) => write!(f, "`{}`", dt.format("%Y-%m-%dT%H:%M:%S%.6fZ")),
                None => write!(f, "`{}us`", t),
            },
            Datum::Symbol(s) => write!(f, "'{}'", s),
            Datum::String(s) => write!(f, "{:?}", s),
            Datum::Blob(b) => write!(f, "{{{{{}}}}}", hex::encode(b)),
            Datum::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Datum::Struct(fields) => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.label, field.value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Datum {
    pub fn field(&self, label: &str) -> Option<&Datum> {
        match self {
            Datum::Struct(fields) => fields.iter().find(|f| f.label == label).map(|f| &f.value),
            _ => None,
        }
    }

    pub fn isNull(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Decodes one value from the front of `b`; returns it and its size.
    pub fn decode(b: &[u8], st: &Symtab) -> Result<(Datum, usize)> {
        let Some((h, n)) = header(b) else {
            return Err(VmError::Ion("truncated value header".to_string()));
        };
        if h + n > b.len() {
            crate::bail_ion_error!("value size {} exceeds buffer size {}", h + n, b.len());
        }
        let body = &b[h..h + n];
        let raw = &b[..h + n];
        let bad = |what: &str| VmError::Ion(format!("malformed {}", what));
        if b[0] & 0xF == 0xF {
            return Ok((Datum::Null, h + n));
        }
        let d = match typeOf(b) {
            Type::Null => Datum::Null,
            Type::Bool => Datum::Bool(b[0] & 0xF == 1),
            Type::Uint | Type::Int => Datum::Int(readInt(raw).ok_or_else(|| bad("int"))?),
            Type::Float => Datum::Float(readFloat(raw).ok_or_else(|| bad("float"))?),
            Type::Timestamp => Datum::Timestamp(readTimestamp(raw).ok_or_else(|| bad("timestamp"))?),
            Type::Symbol => {
                let id = readUintMag(body).ok_or_else(|| bad("symbol"))?;
                Datum::Symbol(st.get(id as Symbol).unwrap_or("").to_string())
            }
            Type::String => Datum::String(String::from_utf8(body.to_vec()).map_err(|_| bad("string"))?),
            Type::Blob | Type::Clob => Datum::Blob(body.to_vec()),
            Type::List | Type::Sexp => {
                let mut items = vec![];
                let mut pos = 0;
                while pos < body.len() {
                    let (item, sz) = Datum::decode(&body[pos..], st)?;
                    items.push(item);
                    pos += sz;
                }
                Datum::List(items)
            }
            Type::Struct => {
                let mut fields = vec![];
                let mut pos = 0;
                while pos < body.len() {
                    let (sym, c) = readLabel(&body[pos..]).ok_or_else(|| bad("label"))?;
                    pos += c;
                    let (value, sz) = Datum::decode(&body[pos..], st)?;
                    pos += sz;
                    let label = st.get(sym).ok_or_else(|| VmError::Ion(format!("symbol {} not in symbol table", sym)))?;
                    fields.push(Field {
                        label: label.to_string(),
                        value,
                    });
                }
                Datum::Struct(fields)
            }
            Type::Annotation => {
                // skip the annotation list and decode the wrapped value
                let (alen, c) = readVarUint(body).ok_or_else(|| bad("annotation"))?;
                let start = c + alen as usize;
                let (inner, _) = Datum::decode(body.get(start..).ok_or_else(|| bad("annotation"))?, st)?;
                inner
            }
            t => crate::bail_ion_error!("unsupported type {:?}", t),
        };
        Ok((d, h + n))
    }

    /// Encodes the value, interning struct labels and symbols into `st`.
    ///
    /// Struct fields are written in ascending symbol order, which the
    /// field-access opcodes rely on.
    pub fn encode(&self, dst: &mut Buffer, st: &mut Symtab) {
        match self {
            Datum::Null => dst.writeNull(),
            Datum::Bool(b) => dst.writeBool(*b),
            Datum::Int(i) => dst.writeInt(*i),
            Datum::Float(f) => dst.writeFloat(*f),
            Datum::Timestamp(t) => dst.writeTimestamp(*t),
            Datum::Symbol(s) => {
                let sym = st.intern(s);
                dst.writeSymbol(sym);
            }
            Datum::String(s) => dst.writeString(s),
            Datum::Blob(b) => dst.writeBlob(b),
            Datum::List(items) => {
                dst.beginList();
                for item in items {
                    item.encode(dst, st);
                }
                dst.endList();
            }
            Datum::Struct(fields) => {
                let mut order: Vec<(Symbol, &Field)> = fields.iter().map(|f| (st.intern(&f.label), f)).collect();
                order.sort_by_key(|(sym, _)| *sym);
                dst.beginStruct();
                for (sym, f) in order {
                    dst.beginField(sym);
                    f.value.encode(dst, st);
                }
                dst.endStruct();
            }
        }
    }

    /// Encodes the value into a fresh byte vector.
    pub fn toBytes(&self, st: &mut Symtab) -> Vec<u8> {
        let mut b = Buffer::new();
        self.encode(&mut b, st);
        b.into_bytes()
    }

    fn typeRank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int(_) | Datum::Float(_) => 2,
            Datum::Timestamp(_) => 3,
            Datum::Symbol(_) | Datum::String(_) => 4,
            Datum::Blob(_) => 5,
            Datum::List(_) => 6,
            Datum::Struct(_) => 7,
        }
    }

    /// Total order used for sorting output rows.
    ///
    /// Types sort null, bool, number, timestamp, text, blob, list, struct;
    /// NaN sorts before every other number.
    pub fn compareOrder(&self, other: &Datum) -> Ordering {
        let (ra, rb) = (self.typeRank(), other.typeRank());
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Float(b)) => cmpFloatNanFirst(*a as f64, *b),
            (Datum::Float(a), Datum::Int(b)) => cmpFloatNanFirst(*a, *b as f64),
            (Datum::Float(a), Datum::Float(b)) => cmpFloatNanFirst(*a, *b),
            (Datum::Timestamp(a), Datum::Timestamp(b)) => a.cmp(b),
            (Datum::Symbol(a) | Datum::String(a), Datum::Symbol(b) | Datum::String(b)) => a.cmp(b),
            (Datum::Blob(a), Datum::Blob(b)) => a.cmp(b),
            (Datum::List(a), Datum::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.compareOrder(y);
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Datum::Struct(a), Datum::Struct(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let c = x.label.cmp(&y.label).then_with(|| x.value.compareOrder(&y.value));
                    if c != Ordering::Equal {
                        return c;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => Ordering::Equal,
        }
    }
}

/// Float ordering with NaN before all other values.
pub fn cmpFloatNanFirst(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Smaller of `a` and `b` under [`cmpFloatNanFirst`], so NaN wins.
pub fn minFloatNanFirst(a: f64, b: f64) -> f64 {
    if cmpFloatNanFirst(b, a) == Ordering::Less {
        b
    } else {
        a
    }
}

/// Larger of `a` and `b` under [`cmpFloatNanFirst`]; NaN only survives
/// against another NaN.
pub fn maxFloatNanFirst(a: f64, b: f64) -> f64 {
    if cmpFloatNanFirst(b, a) == Ordering::Greater {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[(&str, Datum)]) -> Datum {
        Datum::Struct(
            fields
                .iter()
                .map(|(l, v)| Field {
                    label: l.to_string(),
                    value: v.clone(),
                })
                .collect(),
        )
    }

    #[test]
    fn test_struct_roundtrip_sorted() {
        let mut st = Symtab::new();
        st.intern("a");
        st.intern("b");
        let d = row(&[
            ("b", Datum::String("x".repeat(20))),
            ("a", Datum::List(vec![Datum::Int(1), Datum::Float(2.5), Datum::Null])),
        ]);
        let bytes = d.toBytes(&mut st);
        let (back, n) = Datum::decode(&bytes, &st).unwrap();
        assert_eq!(n, bytes.len());
        // fields come back in symbol order
        match &back {
            Datum::Struct(fields) => {
                assert_eq!(fields[0].label, "a");
                assert_eq!(fields[1].label, "b");
            }
            _ => panic!("expected struct"),
        }
        assert_eq!(back.field("b"), d.field("b"));
    }

    #[test]
    fn test_compare_order() {
        assert_eq!(Datum::Null.compareOrder(&Datum::Bool(false)), Ordering::Less);
        assert_eq!(Datum::Int(3).compareOrder(&Datum::Float(2.5)), Ordering::Greater);
        assert_eq!(Datum::Float(f64::NAN).compareOrder(&Datum::Int(i64::MIN)), Ordering::Less);
        assert_eq!(Datum::String("a".into()).compareOrder(&Datum::Symbol("b".into())), Ordering::Less);
        assert_eq!(
            Datum::List(vec![Datum::Int(1)]).compareOrder(&Datum::List(vec![Datum::Int(1), Datum::Int(0)])),
            Ordering::Less
        );
    }

    #[test]
    fn test_display() {
        let d = row(&[("x", Datum::Int(1)), ("y", Datum::Timestamp(0))]);
        assert_eq!(d.to_string(), "{x: 1, y: `1970-01-01T00:00:00.000000Z`}");
    }
}
