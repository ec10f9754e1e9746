//! Positional arguments and the statements that carry them.

use std::borrow::Cow;

use sessiondb_id::{ProjectId, SessionId};

/// The column type a `NULL` argument is bound as.
///
/// Postgres infers parameter types from what the driver declares, so a null still needs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

/// A single positional argument of a [`Statement`] or a column of a bulk row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null(NullKind),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Estimated number of bytes this value adds to a write.
    pub fn size(&self) -> usize {
        match self {
            Self::Null(_) => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 8,
            Self::Text(s) => s.len(),
            Self::Bytes(b) => b.len(),
        }
    }

    /// True for zero-length text and byte values.
    pub fn is_zero_length(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<SessionId> for Value {
    fn from(v: SessionId) -> Self {
        Self::Int(v.as_i64())
    }
}

impl From<ProjectId> for Value {
    fn from(v: ProjectId) -> Self {
        Self::Int(v.as_u32().into())
    }
}

macro_rules! nullable {
    ($($t:ty => $kind:ident),+ $(,)?) => {
        $(
            impl From<Option<$t>> for Value {
                fn from(v: Option<$t>) -> Self {
                    match v {
                        Some(v) => v.into(),
                        None => Self::Null(NullKind::$kind),
                    }
                }
            }
        )+
    };
}

nullable!(
    bool => Bool,
    i64 => Int,
    i32 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
);

/// A parameterized SQL statement together with its positional arguments (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: Cow<'static, str>,
    args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<Cow<'static, str>>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Estimated payload of this statement: the sum of its argument sizes.
    pub fn size(&self) -> usize {
        self.args.iter().map(Value::size).sum()
    }
}

/// Build a [`Statement`] from a SQL template and any number of arguments convertible into
/// [`Value`].
///
/// ```
/// use sessiondb_write::statement;
///
/// let s = statement!("UPDATE sessions SET duration = $2 WHERE session_id = $1", 42_i64, 1500_i64);
/// assert_eq!(s.args().len(), 2);
/// ```
#[macro_export]
macro_rules! statement {
    ($sql:expr $(, $arg:expr)* $(,)?) => {
        $crate::value::Statement::new($sql, vec![$($crate::value::Value::from($arg)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(Value::from("hello").size(), 5);
        assert_eq!(Value::from(vec![1_u8, 2, 3]).size(), 3);
        assert_eq!(Value::from(7_i64).size(), 8);
        assert_eq!(Value::from(1.5_f64).size(), 8);
        assert_eq!(Value::from(true).size(), 1);
        assert_eq!(Value::from(None::<String>).size(), 0);

        let s = statement!("INSERT INTO t VALUES ($1, $2, $3)", "abcd", 1_i64, None::<i64>);
        assert_eq!(s.size(), 12);
    }

    #[test]
    fn nulls_keep_their_type() {
        assert_eq!(Value::from(None::<i64>), Value::Null(NullKind::Int));
        assert_eq!(Value::from(None::<&str>), Value::Null(NullKind::Text));
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn zero_length() {
        assert!(Value::from("").is_zero_length());
        assert!(Value::from(Vec::<u8>::new()).is_zero_length());
        assert!(!Value::from(0_i64).is_zero_length());
        assert!(!Value::from(None::<String>).is_zero_length());
    }
}
