use ordered_float::OrderedFloat;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use strata_columnar::DecimalValue;

/// A hashable, totally ordered scalar used in join and group keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    /// Days since 1970-01-01.
    Date(i32),
    Decimal { raw: i128, scale: i8 },
    Float(OrderedFloat<f64>),
    Text(Arc<str>),
}

impl KeyValue {
    pub fn text(s: &str) -> Self {
        KeyValue::Text(Arc::from(s))
    }

    pub fn decimal(value: DecimalValue) -> Self {
        KeyValue::Decimal {
            raw: value.raw(),
            scale: value.scale(),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::text(v)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Bool(v) => write!(f, "{v}"),
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Date(days) => match strata_columnar::date::date_from_days(*days) {
                Some(d) => write!(f, "{d}"),
                None => write!(f, "date({days})"),
            },
            KeyValue::Decimal { raw, scale } => write!(f, "{}", DecimalValue::new(*raw, *scale)),
            KeyValue::Float(v) => write!(f, "{v}"),
            KeyValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// A composite key. Join keys and group keys share this representation;
/// most keys have one or two components and stay inline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(SmallVec<[KeyValue; 2]>);

pub type JoinKey = Key;
pub type GroupKey = Key;

impl Key {
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    pub fn single(value: impl Into<KeyValue>) -> Self {
        let mut key = Self::new();
        key.push(value.into());
        key
    }

    pub fn push(&mut self, value: KeyValue) {
        self.0.push(value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl FromIterator<KeyValue> for Key {
    fn from_iter<T: IntoIterator<Item = KeyValue>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str(")")
    }
}
