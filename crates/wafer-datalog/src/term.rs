//! 值与项模型
//!
//! 三层类型区分三种上下文：
//! - [`SetValue`]：集合元素，不允许嵌套集合，也不允许变量；
//! - [`Value`]：事实中的具体值（七种封闭变体）；
//! - [`Term`]：规则谓词中的项，值或变量。
//!
//! 这样非法状态（事实里出现变量、集合里嵌套集合）在类型层面
//! 就无法构造出来。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 变量名到具体值的映射（键唯一）
///
/// `BTreeMap` keeps bindings ordered and hashable, so sets of bindings
/// (query solution sets) deduplicate structurally.
pub type Binding = BTreeMap<String, Value>;

// ============================================================
// SetValue
// ============================================================

/// 集合元素：六种标量变体，无集合、无变量
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SetValue {
    Symbol(String),
    Integer(i64),
    Str(String),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    Bool(bool),
}

// ============================================================
// Value
// ============================================================

/// 事实中的具体值
///
/// 封闭联合：符号、64 位整数、字符串、UTC 时间戳、字节序列、
/// 布尔值、扁平集合。集合元素是 [`SetValue`]，因此集合不可嵌套。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Symbol(String),
    Integer(i64),
    Str(String),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    Bool(bool),
    Set(BTreeSet<SetValue>),
}

impl Value {
    /// 符号值（内部文本，展示时带 `#` 前缀）
    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    /// 由元素列表构造集合值
    pub fn set(elements: impl IntoIterator<Item = SetValue>) -> Self {
        Value::Set(elements.into_iter().collect())
    }

    /// Kind label used in type-mismatch diagnostics and for the
    /// like-typed equality rule.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Symbol(_) => "symbol",
            Value::Integer(_) => "integer",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::Bytes(_) => "bytes",
            Value::Bool(_) => "bool",
            Value::Set(_) => "set",
        }
    }
}

// ============================================================
// Term
// ============================================================

/// 规则谓词中的项：具体值或变量
///
/// 变量只出现在规则头、规则体与表达式叶子中，事实里没有变量
/// （[`crate::ast::Fact`] 的参数类型是 [`Value`]）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Variable(String),
    Value(Value),
}

impl Term {
    /// 变量项
    pub fn var(name: impl Into<String>) -> Self {
        Term::Variable(name.into())
    }
}

// ============================================================
// Conversions
// ============================================================

impl From<SetValue> for Value {
    fn from(element: SetValue) -> Self {
        match element {
            SetValue::Symbol(s) => Value::Symbol(s),
            SetValue::Integer(i) => Value::Integer(i),
            SetValue::Str(s) => Value::Str(s),
            SetValue::Date(d) => Value::Date(d),
            SetValue::Bytes(b) => Value::Bytes(b),
            SetValue::Bool(b) => Value::Bool(b),
        }
    }
}

/// Scalar-only narrowing; the set variant has no set-element counterpart.
impl TryFrom<Value> for SetValue {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Value> {
        match value {
            Value::Symbol(s) => Ok(SetValue::Symbol(s)),
            Value::Integer(i) => Ok(SetValue::Integer(i)),
            Value::Str(s) => Ok(SetValue::Str(s)),
            Value::Date(d) => Ok(SetValue::Date(d)),
            Value::Bytes(b) => Ok(SetValue::Bytes(b)),
            Value::Bool(b) => Ok(SetValue::Bool(b)),
            set @ Value::Set(_) => Err(set),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(date: DateTime<Utc>) -> Self {
        Value::Date(date)
    }
}

impl From<Value> for Term {
    fn from(value: Value) -> Self {
        Term::Value(value)
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Term::Value(Value::Integer(i))
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::Value(Value::Bool(b))
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::Value(Value::from(s))
    }
}

impl From<DateTime<Utc>> for Term {
    fn from(date: DateTime<Utc>) -> Self {
        Term::Value(Value::Date(date))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Value> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(other),
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(other),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Value> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(other),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Value> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(other),
        }
    }
}

impl TryFrom<Value> for DateTime<Utc> {
    type Error = Value;

    fn try_from(value: Value) -> Result<Self, Value> {
        match value {
            Value::Date(d) => Ok(d),
            other => Err(other),
        }
    }
}

// ============================================================
// Display
// ============================================================

impl fmt::Display for SetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Value::from(self.clone()).fmt(f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Symbol(s) => write!(f, "#{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Bytes(b) => write!(f, "hex:{}", hex::encode(b)),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Set(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Variable(name) => write!(f, "${name}"),
            Term::Value(value) => value.fmt(f),
        }
    }
}

// ============================================================
// Tests
// ============================================================
