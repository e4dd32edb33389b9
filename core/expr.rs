//! Expression tree consumed by the SSA builder.

use std::fmt::Display;

use crate::ion::Datum;

#[derive(Debug, Clone, PartialEq)]
pub enum PathComponent {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Operator with its operands swapped.
    pub fn flip(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            op => op,
        }
    }
}

impl Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFn {
    Abs,
    Neg,
    Sign,
    Square,
    Round,
    RoundEven,
    Trunc,
    Floor,
    Ceil,
    Sqrt,
    Cbrt,
    Exp,
    Ln,
    Log2,
    Log10,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMatch {
    Equals,
    Prefix,
    Suffix,
    Contains,
    Like,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimType {
    Leading,
    Trailing,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Timepart {
    Microsecond = 0,
    Millisecond = 1,
    Second = 2,
    Minute = 3,
    Hour = 4,
    Day = 5,
    DOW = 6,
    DOY = 7,
    Month = 8,
    Quarter = 9,
    Year = 10,
}

impl Timepart {
    pub fn fromU8(b: u8) -> Option<Timepart> {
        use Timepart::*;
        [Microsecond, Millisecond, Second, Minute, Hour, Day, DOW, DOY, Month, Quarter, Year].get(b as usize).copied()
    }

    pub fn fromName(s: &str) -> Option<Timepart> {
        let p = match s.to_ascii_lowercase().as_str() {
            "microsecond" => Timepart::Microsecond,
            "millisecond" => Timepart::Millisecond,
            "second" => Timepart::Second,
            "minute" => Timepart::Minute,
            "hour" => Timepart::Hour,
            "day" => Timepart::Day,
            "dow" => Timepart::DOW,
            "doy" => Timepart::DOY,
            "month" => Timepart::Month,
            "quarter" => Timepart::Quarter,
            "year" => Timepart::Year,
            _ => return None,
        };
        Some(p)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Path(Vec<PathComponent>),
    Literal(Datum),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Xor(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    IsMissing(Box<Expr>),
    IsTrue(Box<Expr>),
    IsFalse(Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Math(MathFn, Box<Expr>),
    /// case-insensitive when the flag is set
    StringMatch(StringMatch, bool, Box<Expr>, String),
    Trim(TrimType, Box<Expr>),
    CharLength(Box<Expr>),
    DateAdd(Timepart, Box<Expr>, Box<Expr>),
    DateExtract(Timepart, Box<Expr>),
    DateTrunc(Timepart, Box<Expr>),
    In(Box<Expr>, Vec<Datum>),
    /// value of the first matching key, missing otherwise
    Lookup(Box<Expr>, Vec<(Datum, Datum)>),
    ObjectSize(Box<Expr>),
    Case(Vec<(Expr, Expr)>, Option<Box<Expr>>),
    MakeList(Vec<Expr>),
}

impl Expr {
    /// Parses a dotted path such as `a.b[2].c`.
    pub fn path(s: &str) -> Expr {
        let mut out = vec![];
        for part in s.split('.') {
            let mut rest = part;
            if let Some(i) = rest.find('[') {
                if i > 0 {
                    out.push(PathComponent::Field(rest[..i].to_string()));
                }
                rest = &rest[i..];
                while let Some(stripped) = rest.strip_prefix('[') {
                    let Some(end) = stripped.find(']') else {
                        break;
                    };
                    if let Ok(n) = stripped[..end].parse::<usize>() {
                        out.push(PathComponent::Index(n));
                    }
                    rest = &stripped[end + 1..];
                }
            } else if !rest.is_empty() {
                out.push(PathComponent::Field(rest.to_string()));
            }
        }
        Expr::Path(out)
    }

    pub fn lit(d: impl Into<Datum>) -> Expr {
        Expr::Literal(d.into())
    }

    pub fn cmp(op: CmpOp, a: Expr, b: Expr) -> Expr {
        Expr::Cmp(op, Box::new(a), Box::new(b))
    }

    pub fn and(a: Expr, b: Expr) -> Expr {
        Expr::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Expr, b: Expr) -> Expr {
        Expr::Or(Box::new(a), Box::new(b))
    }

    pub fn arith(op: ArithOp, a: Expr, b: Expr) -> Expr {
        Expr::Arith(op, Box::new(a), Box::new(b))
    }
}

impl From<i64> for Datum {
    fn from(i: i64) -> Datum {
        Datum::Int(i)
    }
}

impl From<f64> for Datum {
    fn from(f: f64) -> Datum {
        Datum::Float(f)
    }
}

impl From<bool> for Datum {
    fn from(b: bool) -> Datum {
        Datum::Bool(b)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Datum {
        Datum::String(s.to_string())
    }
}

/// Aggregate function applied by [`crate::aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    SumInt,
    SumFloat,
    AvgInt,
    AvgFloat,
    MinInt,
    MinFloat,
    MaxInt,
    MaxFloat,
    MinTs,
    MaxTs,
    BitAnd,
    BitOr,
    BitXor,
    BoolAnd,
    BoolOr,
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOp {
    pub func: AggFn,
    /// `None` counts every row
    pub arg: Option<Expr>,
    pub filter: Option<Expr>,
    pub label: String,
}

impl AggregateOp {
    pub fn new(func: AggFn, arg: Option<Expr>, label: &str) -> Self {
        AggregateOp {
            func,
            arg,
            filter: None,
            label: label.to_string(),
        }
    }

    pub fn withFilter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parse() {
        assert_eq!(
            Expr::path("a.b[2].c"),
            Expr::Path(vec![
                PathComponent::Field("a".into()),
                PathComponent::Field("b".into()),
                PathComponent::Index(2),
                PathComponent::Field("c".into()),
            ])
        );
        assert_eq!(Expr::path("x"), Expr::Path(vec![PathComponent::Field("x".into())]));
    }

    #[test]
    fn test_timepart_ids() {
        assert_eq!(Timepart::fromU8(Timepart::Quarter as u8), Some(Timepart::Quarter));
        assert_eq!(Timepart::fromU8(11), None);
        assert_eq!(Timepart::fromName("DOW"), Some(Timepart::DOW));
    }
}
