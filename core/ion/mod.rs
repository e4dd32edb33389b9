//! Minimal ION binary codec.
//!
//! The VM treats every value lane as an opaque `(offset, size, type, header)`
//! descriptor into encoded memory; this module supplies the handful of
//! primitives it needs to walk that memory (type tags, header and value
//! sizes, symbol labels) plus a writer and an owned [`Datum`] used to build
//! inputs and to materialize aggregate output rows.

mod datum;
mod symtab;

pub use datum::{cmpFloatNanFirst, maxFloatNanFirst, minFloatNanFirst, Datum, Field};
pub use symtab::{Symbol, Symtab, MAX_SYMBOL_ID};

use crate::vdbe::VmRef;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Type {
    Null = 0,
    Bool = 1,
    Uint = 2,
    Int = 3,
    Float = 4,
    Decimal = 5,
    Timestamp = 6,
    Symbol = 7,
    String = 8,
    Clob = 9,
    Blob = 10,
    List = 11,
    Sexp = 12,
    Struct = 13,
    Annotation = 14,
    Reserved = 15,
}

impl Type {
    pub fn fromTag(tag: u8) -> Type {
        match tag & 0xF {
            0 => Type::Null,
            1 => Type::Bool,
            2 => Type::Uint,
            3 => Type::Int,
            4 => Type::Float,
            5 => Type::Decimal,
            6 => Type::Timestamp,
            7 => Type::Symbol,
            8 => Type::String,
            9 => Type::Clob,
            10 => Type::Blob,
            11 => Type::List,
            12 => Type::Sexp,
            13 => Type::Struct,
            14 => Type::Annotation,
            _ => Type::Reserved,
        }
    }

    /// Bit used by type-set checks (`checktag`).
    pub fn bit(self) -> u16 {
        1u16 << (self as u8)
    }
}

/// Type of the value starting at `b[0]`.
pub fn typeOf(b: &[u8]) -> Type {
    match b.first() {
        Some(&d) => Type::fromTag(d >> 4),
        None => Type::Null,
    }
}

/// Reads a VarUInt; returns the value and the number of bytes consumed.
pub fn readVarUint(b: &[u8]) -> Option<(u64, usize)> {
    let mut out = 0u64;
    for (i, &c) in b.iter().enumerate().take(10) {
        out = (out << 7) | (c & 0x7f) as u64;
        if c & 0x80 != 0 {
            return Some((out, i + 1));
        }
    }
    None
}

/// Reads a VarInt; returns the value and the number of bytes consumed.
pub fn readVarInt(b: &[u8]) -> Option<(i64, usize)> {
    let first = *b.first()?;
    let negative = first & 0x40 != 0;
    let mut out = (first & 0x3f) as i64;
    if first & 0x80 != 0 {
        return Some((if negative { -out } else { out }, 1));
    }
    for (i, &c) in b.iter().enumerate().skip(1).take(9) {
        out = (out << 7) | (c & 0x7f) as i64;
        if c & 0x80 != 0 {
            return Some((if negative { -out } else { out }, i + 1));
        }
    }
    None
}

pub fn appendVarUint(out: &mut Vec<u8>, v: u64) {
    let mut tmp = [0u8; 10];
    let mut i = tmp.len();
    let mut v = v;
    loop {
        i -= 1;
        tmp[i] = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    tmp[9] |= 0x80;
    out.extend_from_slice(&tmp[i..]);
}

pub fn appendVarInt(out: &mut Vec<u8>, v: i64) {
    let mag = v.unsigned_abs();
    // first byte carries 6 magnitude bits plus the sign
    let mut groups = vec![];
    let mut m = mag;
    loop {
        groups.push((m & 0x7f) as u8);
        m >>= 7;
        if m == 0 {
            break;
        }
    }
    if groups[groups.len() - 1] & 0x40 != 0 {
        groups.push(0);
    }
    groups.reverse();
    if v < 0 {
        groups[0] |= 0x40;
    }
    let last = groups.len() - 1;
    groups[last] |= 0x80;
    out.extend_from_slice(&groups);
}

/// Header size and body length of the value at `b[0]`.
pub fn header(b: &[u8]) -> Option<(usize, usize)> {
    let d = *b.first()?;
    let t = Type::fromTag(d >> 4);
    let l = (d & 0xF) as usize;
    match t {
        Type::Null | Type::Bool => Some((1, 0)),
        _ if l == 15 => Some((1, 0)),
        Type::Struct if l == 1 => {
            let (n, c) = readVarUint(&b[1..])?;
            Some((1 + c, n as usize))
        }
        _ if l == 14 => {
            let (n, c) = readVarUint(&b[1..])?;
            Some((1 + c, n as usize))
        }
        _ => Some((1, l)),
    }
}

/// Total encoded size of the value at `b[0]`, header included.
pub fn sizeOf(b: &[u8]) -> Option<usize> {
    let (h, n) = header(b)?;
    if h + n > b.len() {
        return None;
    }
    Some(h + n)
}

pub fn headerSizeOf(b: &[u8]) -> Option<usize> {
    header(b).map(|(h, _)| h)
}

pub fn isNull(b: &[u8]) -> bool {
    match b.first() {
        Some(&d) => d & 0xF == 0xF || d >> 4 == 0,
        None => true,
    }
}

/// Reads a struct field label; returns the symbol and its encoded length.
pub fn readLabel(b: &[u8]) -> Option<(Symbol, usize)> {
    let (sym, n) = readVarUint(b)?;
    Some((sym as Symbol, n))
}

/// Decodes a big-endian unsigned magnitude.
pub fn readUintMag(b: &[u8]) -> Option<u64> {
    if b.len() > 8 {
        return None;
    }
    Some(b.iter().fold(0u64, |acc, &c| (acc << 8) | c as u64))
}

/// Decodes an integer value (posint or negint) including its header.
pub fn readInt(b: &[u8]) -> Option<i64> {
    let (h, n) = header(b)?;
    let mag = readUintMag(b.get(h..h + n)?)?;
    match typeOf(b) {
        Type::Uint => i64::try_from(mag).ok(),
        Type::Int if mag == 0 => None,
        Type::Int => {
            if mag > i64::MAX as u64 + 1 {
                None
            } else {
                Some((mag as i64).wrapping_neg())
            }
        }
        _ => None,
    }
}

/// Decodes a float value including its header.
pub fn readFloat(b: &[u8]) -> Option<f64> {
    if typeOf(b) != Type::Float {
        return None;
    }
    let (h, n) = header(b)?;
    let body = b.get(h..h + n)?;
    match n {
        0 => Some(0.0),
        4 => Some(f32::from_be_bytes(body.try_into().ok()?) as f64),
        8 => Some(f64::from_be_bytes(body.try_into().ok()?)),
        _ => None,
    }
}

/// Reads the body of a timestamp value as microseconds since the epoch.
pub fn readTimestamp(b: &[u8]) -> Option<i64> {
    use chrono::NaiveDate;

    if typeOf(b) != Type::Timestamp {
        return None;
    }
    let (h, n) = header(b)?;
    let mut body = b.get(h..h + n)?;
    let mut next = |signed: bool| -> Option<i64> {
        if body.is_empty() {
            return None;
        }
        let (v, c) = if signed {
            readVarInt(body)?
        } else {
            let (v, c) = readVarUint(body)?;
            (v as i64, c)
        };
        body = &body[c..];
        Some(v)
    };
    let _offset = next(true)?;
    let year = next(false)?;
    let month = next(false).unwrap_or(1);
    let day = next(false).unwrap_or(1);
    let hour = next(false).unwrap_or(0);
    let minute = next(false).unwrap_or(0);
    let second = next(false).unwrap_or(0);
    let exponent = next(true);
    let mut micros = 0i64;
    if let Some(exp) = exponent {
        let coef = if body.is_empty() {
            0
        } else {
            let neg = body[0] & 0x80 != 0;
            let mut mag: Vec<u8> = body.to_vec();
            mag[0] &= 0x7f;
            let m = readUintMag(&mag)? as i64;
            if neg {
                -m
            } else {
                m
            }
        };
        let shift = exp + 6;
        micros = if shift >= 0 {
            coef.checked_mul(10i64.checked_pow(shift as u32)?)?
        } else {
            coef / 10i64.checked_pow((-shift) as u32)?
        };
    }
    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?;
    let dt = date.and_hms_opt(hour as u32, minute as u32, second as u32)?;
    Some(dt.and_utc().timestamp_micros() + micros)
}

/// Splits a stream of top-level structs into row delimiters that reference
/// each struct's body.
pub fn rowDelims(buf: &[u8]) -> Result<Vec<VmRef>> {
    let mut out = vec![];
    let mut pos = 0usize;
    while pos < buf.len() {
        let rest = &buf[pos..];
        // skip symbol tables and padding
        if rest[0] == 0xE0 {
            pos += 4;
            continue;
        }
        let Some((h, n)) = header(rest) else {
            crate::bail_ion_error!("bad header at offset {}", pos);
        };
        if h + n > rest.len() {
            crate::bail_ion_error!("value at offset {} overruns buffer", pos);
        }
        match typeOf(rest) {
            Type::Struct => out.push(VmRef {
                offset: (pos + h) as u32,
                size: n as u32,
            }),
            Type::Null => {}
            t => crate::bail_ion_error!("top-level {:?} at offset {} is not a struct", t, pos),
        }
        pos += h + n;
    }
    Ok(out)
}

/// Incremental ION writer.
///
/// Containers are closed by patching their header in front of the body once
/// its length is known.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    buf: Vec<u8>,
    // (type, body start) of open containers
    open: Vec<(Type, usize)>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.open.clear();
    }

    pub fn into_bytes(self) -> Vec<u8> {
        assert!(self.open.is_empty(), "unterminated container");
        self.buf
    }

    fn putHeader(&mut self, t: Type, len: usize) {
        let tag = (t as u8) << 4;
        if len < 14 {
            self.buf.push(tag | len as u8);
        } else {
            self.buf.push(tag | 14);
            appendVarUint(&mut self.buf, len as u64);
        }
    }

    pub fn writeNull(&mut self) {
        self.buf.push(0x0F);
    }

    pub fn writeBool(&mut self, b: bool) {
        self.buf.push(0x10 | b as u8);
    }

    pub fn writeUint(&mut self, u: u64) {
        self.writeMag(Type::Uint, u);
    }

    pub fn writeInt(&mut self, i: i64) {
        if i < 0 {
            self.writeMag(Type::Int, i.unsigned_abs());
        } else {
            self.writeMag(Type::Uint, i as u64);
        }
    }

    fn writeMag(&mut self, t: Type, mag: u64) {
        let n = (8 - mag.leading_zeros() as usize / 8).min(8);
        self.putHeader(t, n);
        self.buf.extend_from_slice(&mag.to_be_bytes()[8 - n..]);
    }

    pub fn writeFloat(&mut self, f: f64) {
        self.putHeader(Type::Float, 8);
        self.buf.extend_from_slice(&f.to_be_bytes());
    }

    pub fn writeString(&mut self, s: &str) {
        self.writeStringBytes(s.as_bytes());
    }

    /// Writes a string whose bytes are not known to be valid UTF-8.
    pub fn writeStringBytes(&mut self, b: &[u8]) {
        self.putHeader(Type::String, b.len());
        self.buf.extend_from_slice(b);
    }

    pub fn writeSymbol(&mut self, sym: Symbol) {
        self.writeMag(Type::Symbol, sym as u64);
    }

    pub fn writeBlob(&mut self, b: &[u8]) {
        self.putHeader(Type::Blob, b.len());
        self.buf.extend_from_slice(b);
    }

    /// Writes a UTC timestamp with microsecond precision.
    pub fn writeTimestamp(&mut self, micros: i64) {
        use chrono::{DateTime, Datelike, Timelike};

        let secs = micros.div_euclid(1_000_000);
        let nanos = (micros.rem_euclid(1_000_000) * 1000) as u32;
        let Some(dt) = DateTime::from_timestamp(secs, nanos) else {
            self.writeNull();
            return;
        };
        let mut body = vec![];
        appendVarInt(&mut body, 0);
        appendVarUint(&mut body, dt.year() as u64);
        appendVarUint(&mut body, dt.month() as u64);
        appendVarUint(&mut body, dt.day() as u64);
        appendVarUint(&mut body, dt.hour() as u64);
        appendVarUint(&mut body, dt.minute() as u64);
        appendVarUint(&mut body, dt.second() as u64);
        let frac = micros.rem_euclid(1_000_000) as u64;
        if frac != 0 {
            appendVarInt(&mut body, -6);
            let n = (8 - frac.leading_zeros() as usize / 8).min(8);
            let mut mag = frac.to_be_bytes()[8 - n..].to_vec();
            if mag[0] & 0x80 != 0 {
                mag.insert(0, 0);
            }
            body.extend_from_slice(&mag);
        }
        self.putHeader(Type::Timestamp, body.len());
        self.buf.extend_from_slice(&body);
    }

    /// Copies an already encoded value.
    pub fn writeRaw(&mut self, raw: &[u8]) {
        self.buf.extend_from_slice(raw);
    }

    pub fn beginField(&mut self, sym: Symbol) {
        assert!(matches!(self.open.last(), Some((Type::Struct, _))), "field outside of struct");
        appendVarUint(&mut self.buf, sym as u64);
    }

    pub fn beginStruct(&mut self) {
        self.open.push((Type::Struct, self.buf.len()));
    }

    pub fn endStruct(&mut self) {
        self.endContainer(Type::Struct);
    }

    pub fn beginList(&mut self) {
        self.open.push((Type::List, self.buf.len()));
    }

    pub fn endList(&mut self) {
        self.endContainer(Type::List);
    }

    fn endContainer(&mut self, want: Type) {
        let Some((t, start)) = self.open.pop() else {
            panic!("end of {:?} without begin", want);
        };
        assert_eq!(t, want, "mismatched container end");
        let len = self.buf.len() - start;
        let mut hdr = vec![];
        let tag = (t as u8) << 4;
        // L=1 is reserved for sorted structs
        if len < 14 && !(t == Type::Struct && len == 1) {
            hdr.push(tag | len as u8);
        } else {
            hdr.push(tag | 14);
            appendVarUint(&mut hdr, len as u64);
        }
        self.buf.splice(start..start, hdr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varuint() {
        let mut out = vec![];
        appendVarUint(&mut out, 0);
        appendVarUint(&mut out, 127);
        appendVarUint(&mut out, 128);
        appendVarUint(&mut out, 300_000);
        assert_eq!(&out[..2], &[0x80, 0xff]);
        let mut pos = 0;
        for want in [0u64, 127, 128, 300_000] {
            let (v, n) = readVarUint(&out[pos..]).unwrap();
            assert_eq!(v, want);
            pos += n;
        }
        assert_eq!(pos, out.len());
    }

    #[test]
    fn test_varint() {
        for want in [0i64, 1, -1, 63, -64, 64, -6, 1 << 40] {
            let mut out = vec![];
            appendVarInt(&mut out, want);
            let (v, n) = readVarInt(&out).unwrap();
            assert_eq!(v, want);
            assert_eq!(n, out.len());
        }
    }

    #[test]
    fn test_scalars() {
        let mut b = Buffer::new();
        b.writeInt(-5);
        let bytes = b.bytes().to_vec();
        assert_eq!(bytes, vec![0x31, 0x05]);
        assert_eq!(readInt(&bytes), Some(-5));
        assert_eq!(sizeOf(&bytes), Some(2));

        b.reset();
        b.writeInt(0);
        assert_eq!(b.bytes(), &[0x20]);
        assert_eq!(readInt(b.bytes()), Some(0));

        b.reset();
        b.writeFloat(1.5);
        assert_eq!(readFloat(b.bytes()), Some(1.5));
        assert_eq!(headerSizeOf(b.bytes()), Some(1));
    }

    #[test]
    fn test_long_string_header() {
        let mut b = Buffer::new();
        let s = "x".repeat(200);
        b.writeString(&s);
        assert_eq!(headerSizeOf(b.bytes()), Some(3));
        assert_eq!(sizeOf(b.bytes()), Some(203));
    }

    #[test]
    fn test_timestamp() {
        let micros = 1_700_000_000_123_456i64;
        let mut b = Buffer::new();
        b.writeTimestamp(micros);
        assert_eq!(typeOf(b.bytes()), Type::Timestamp);
        assert_eq!(readTimestamp(b.bytes()), Some(micros));

        b.reset();
        b.writeTimestamp(86_400_000_000);
        assert_eq!(readTimestamp(b.bytes()), Some(86_400_000_000));
    }

    #[test]
    fn test_row_delims() {
        let mut b = Buffer::new();
        for i in 0..3 {
            b.beginStruct();
            b.beginField(10);
            b.writeInt(i);
            b.endStruct();
        }
        let bytes = b.into_bytes();
        let delims = rowDelims(&bytes).unwrap();
        assert_eq!(delims.len(), 3);
        for d in &delims {
            // label + 1-byte int (or 2 bytes for nonzero)
            assert!(d.size == 2 || d.size == 3);
            assert_eq!(bytes[d.offset as usize], 0x8a);
        }
        assert!(rowDelims(&[0x21, 0x01]).is_err());
    }
}
