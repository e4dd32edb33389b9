//! JSON lines to ION rows and back.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::VmError;
use crate::ion::{Datum, Field, Symtab};
use crate::Result;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Val {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Val>),
    Object(IndexMap<String, Val>),
}

impl From<Val> for Datum {
    fn from(v: Val) -> Datum {
        match v {
            Val::Null => Datum::Null,
            Val::Bool(b) => Datum::Bool(b),
            Val::Integer(i) => Datum::Int(i),
            Val::Float(f) => Datum::Float(f),
            Val::String(s) => Datum::String(s),
            Val::Array(items) => Datum::List(items.into_iter().map(Datum::from).collect()),
            Val::Object(m) => Datum::Struct(m.into_iter().map(|(label, v)| Field { label, value: v.into() }).collect()),
        }
    }
}

impl From<&Datum> for Val {
    fn from(d: &Datum) -> Val {
        match d {
            Datum::Null => Val::Null,
            Datum::Bool(b) => Val::Bool(*b),
            Datum::Int(i) => Val::Integer(*i),
            Datum::Float(f) => Val::Float(*f),
            Datum::Symbol(s) | Datum::String(s) => Val::String(s.clone()),
            // timestamps and blobs have no JSON form; use their text
            Datum::Timestamp(_) | Datum::Blob(_) => Val::String(d.to_string()),
            Datum::List(items) => Val::Array(items.iter().map(Val::from).collect()),
            Datum::Struct(fields) => Val::Object(fields.iter().map(|f| (f.label.clone(), Val::from(&f.value))).collect()),
        }
    }
}

/// Parses one JSON object per non-blank line.
pub fn parseLines(text: &str) -> Result<Vec<Datum>> {
    let mut rows = vec![];
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let v: Val = serde_json::from_str(line).map_err(|e| VmError::Ion(format!("line {}: {}", i + 1, e)))?;
        if !matches!(v, Val::Object(_)) {
            crate::bail_ion_error!("line {}: row is not an object", i + 1);
        }
        rows.push(v.into());
    }
    Ok(rows)
}

/// Parses JSON lines and encodes every row as ION, interning field names
/// in `st`.
pub fn linesToIon(text: &str, st: &mut Symtab) -> Result<Vec<u8>> {
    let mut out = vec![];
    for row in parseLines(text)? {
        out.extend(row.toBytes(st));
    }
    Ok(out)
}

pub fn toJson(d: &Datum) -> Result<String> {
    serde_json::to_string(&Val::from(d)).map_err(|e| VmError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ion::rowDelims;

    #[test]
    fn test_lines_to_ion() {
        let text = "{\"a\": 1, \"b\": \"x\"}\n\n{\"a\": 2.5, \"c\": [true, null]}\n";
        let mut st = Symtab::new();
        let buf = linesToIon(text, &mut st).unwrap();
        assert_eq!(rowDelims(&buf).unwrap().len(), 2);
        let rows = parseLines(text).unwrap();
        assert_eq!(rows[0].field("b"), Some(&Datum::String("x".to_string())));
        assert_eq!(rows[1].field("a"), Some(&Datum::Float(2.5)));
        assert_eq!(rows[1].field("c"), Some(&Datum::List(vec![Datum::Bool(true), Datum::Null])));
    }

    #[test]
    fn test_bad_rows() {
        assert!(parseLines("[1, 2]").is_err());
        assert!(parseLines("{\"a\": ").is_err());
    }

    #[test]
    fn test_to_json_keeps_field_order() {
        let rows = parseLines("{\"z\": 1, \"a\": false}").unwrap();
        assert_eq!(toJson(&rows[0]).unwrap(), "{\"z\":1,\"a\":false}");
    }
}
