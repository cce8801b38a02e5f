//! 表达式求值器
//!
//! 表达式是不可变树，叶子为 [`Term`]，节点为一元/二元算子。
//! 求值是纯函数 `(binding, expression) → Value`，后序、严格、
//! 从左到右；二元算子的两侧总是先求值再应用，`&&`/`||`
//! 不做短路。
//!
//! 求值故障（未绑定变量、类型不匹配、除零、溢出、正则）不向外
//! 传播：上层把它们当作"该组绑定不满足"静默丢弃。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::term::{Binding, SetValue, Term, Value};

// ============================================================
// Operator tables
// ============================================================

/// 一元算子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// 括号，恒等
    Parens,
    /// 布尔取反
    Negate,
    /// 长度：字符串按码点、字节串按字节、集合按基数
    Length,
}

/// 二元算子（封闭表，无运行时扩展机制）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Equal,
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Prefix,
    Suffix,
    Contains,
    Intersection,
    Union,
    /// 不支持：求值总是失败
    Regex,
}

impl UnaryOp {
    fn name(self) -> &'static str {
        match self {
            UnaryOp::Parens => "parens",
            UnaryOp::Negate => "!",
            UnaryOp::Length => "length",
        }
    }
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            BinaryOp::Equal => "==",
            BinaryOp::LessThan => "<",
            BinaryOp::GreaterThan => ">",
            BinaryOp::LessOrEqual => "<=",
            BinaryOp::GreaterOrEqual => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Prefix => "starts_with",
            BinaryOp::Suffix => "ends_with",
            BinaryOp::Contains => "contains",
            BinaryOp::Intersection => "intersection",
            BinaryOp::Union => "union",
            BinaryOp::Regex => "matches",
        }
    }
}

// ============================================================
// Expression tree
// ============================================================

/// 表达式树
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    Term(Term),
    Unary(UnaryOp, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

impl Expression {
    /// 值叶子
    pub fn value(value: impl Into<Value>) -> Self {
        Expression::Term(Term::Value(value.into()))
    }

    /// 变量叶子
    pub fn var(name: impl Into<String>) -> Self {
        Expression::Term(Term::Variable(name.into()))
    }

    pub fn unary(op: UnaryOp, inner: Expression) -> Self {
        Expression::Unary(op, Box::new(inner))
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary(op, Box::new(left), Box::new(right))
    }

    /// Collect the variable names occurring in leaf position.
    pub fn collect_variables<'a>(&'a self, out: &mut std::collections::HashSet<&'a str>) {
        match self {
            Expression::Term(Term::Variable(name)) => {
                out.insert(name.as_str());
            }
            Expression::Term(Term::Value(_)) => {}
            Expression::Unary(_, inner) => inner.collect_variables(out),
            Expression::Binary(_, left, right) => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
        }
    }
}

// ============================================================
// Evaluation faults
// ============================================================

/// 求值故障
///
/// 这些错误从不越过规则/检查求值的边界；它们只是把当前候选
/// 绑定判为不满足。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("variable ${0} is not bound")]
    UnboundVariable(String),
    #[error("operator {op} cannot be applied to {found}")]
    TypeMismatch { op: &'static str, found: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("regular expressions are not supported")]
    UnsupportedRegex,
}

fn mismatch1(op: UnaryOp, value: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op.name(),
        found: value.kind_name().to_string(),
    }
}

fn mismatch2(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op.name(),
        found: format!("{} and {}", left.kind_name(), right.kind_name()),
    }
}

// ============================================================
// Evaluation
// ============================================================

/// 在给定绑定下求值表达式
pub fn evaluate(binding: &Binding, expression: &Expression) -> Result<Value, EvalError> {
    match expression {
        Expression::Term(Term::Value(value)) => Ok(value.clone()),
        Expression::Term(Term::Variable(name)) => binding
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnboundVariable(name.clone())),
        Expression::Unary(op, inner) => {
            let value = evaluate(binding, inner)?;
            apply_unary(*op, value)
        }
        // Both operands are evaluated before the operator is applied:
        // a fault on either side is a fault of the whole expression,
        // even for `&&`/`||`.
        Expression::Binary(op, left, right) => {
            let left = evaluate(binding, left)?;
            let right = evaluate(binding, right)?;
            apply_binary(*op, left, right)
        }
    }
}

fn apply_unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (UnaryOp::Parens, value) => Ok(value),
        (UnaryOp::Negate, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Length, Value::Str(s)) => Ok(Value::Integer(s.chars().count() as i64)),
        (UnaryOp::Length, Value::Bytes(b)) => Ok(Value::Integer(b.len() as i64)),
        (UnaryOp::Length, Value::Set(s)) => Ok(Value::Integer(s.len() as i64)),
        (op, value) => Err(mismatch1(op, &value)),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    use BinaryOp::*;

    match (op, left, right) {
        // ---- equality over like-typed pairs, all seven kinds ----
        (Equal, left, right) => {
            if left.kind_name() == right.kind_name() {
                Ok(Value::Bool(left == right))
            } else {
                Err(mismatch2(op, &left, &right))
            }
        }

        // ---- ordering: integers and dates ----
        (LessThan, Value::Integer(a), Value::Integer(b)) => Ok(Value::Bool(a < b)),
        (GreaterThan, Value::Integer(a), Value::Integer(b)) => Ok(Value::Bool(a > b)),
        (LessOrEqual, Value::Integer(a), Value::Integer(b)) => Ok(Value::Bool(a <= b)),
        (GreaterOrEqual, Value::Integer(a), Value::Integer(b)) => Ok(Value::Bool(a >= b)),
        (LessThan, Value::Date(a), Value::Date(b)) => Ok(Value::Bool(a < b)),
        (GreaterThan, Value::Date(a), Value::Date(b)) => Ok(Value::Bool(a > b)),
        (LessOrEqual, Value::Date(a), Value::Date(b)) => Ok(Value::Bool(a <= b)),
        (GreaterOrEqual, Value::Date(a), Value::Date(b)) => Ok(Value::Bool(a >= b)),

        // ---- integer arithmetic, checked ----
        (Add, Value::Integer(a), Value::Integer(b)) => {
            a.checked_add(b).map(Value::Integer).ok_or(EvalError::Overflow)
        }
        (Sub, Value::Integer(a), Value::Integer(b)) => {
            a.checked_sub(b).map(Value::Integer).ok_or(EvalError::Overflow)
        }
        (Mul, Value::Integer(a), Value::Integer(b)) => {
            a.checked_mul(b).map(Value::Integer).ok_or(EvalError::Overflow)
        }
        (Div, Value::Integer(_), Value::Integer(0)) => Err(EvalError::DivisionByZero),
        (Div, Value::Integer(a), Value::Integer(b)) => {
            a.checked_div(b).map(Value::Integer).ok_or(EvalError::Overflow)
        }

        // ---- boolean connectives, strict ----
        (And, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a && b)),
        (Or, Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a || b)),

        // ---- string affixes ----
        (Prefix, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a.starts_with(&b))),
        (Suffix, Value::Str(a), Value::Str(b)) => Ok(Value::Bool(a.ends_with(&b))),

        // ---- set operations ----
        // subset test when the right side is a set, membership otherwise
        (Contains, Value::Set(a), Value::Set(b)) => Ok(Value::Bool(b.is_subset(&a))),
        (Contains, Value::Set(a), scalar) => match SetValue::try_from(scalar) {
            Ok(element) => Ok(Value::Bool(a.contains(&element))),
            Err(value) => Err(mismatch2(op, &Value::Set(a), &value)),
        },
        (Intersection, Value::Set(a), Value::Set(b)) => {
            Ok(Value::Set(a.intersection(&b).cloned().collect::<BTreeSet<_>>()))
        }
        (Union, Value::Set(a), Value::Set(b)) => {
            Ok(Value::Set(a.union(&b).cloned().collect::<BTreeSet<_>>()))
        }

        // ---- unsupported ----
        (Regex, _, _) => Err(EvalError::UnsupportedRegex),

        (op, left, right) => Err(mismatch2(op, &left, &right)),
    }
}

// ============================================================
// Display
// ============================================================

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Term(term) => term.fmt(f),
            Expression::Unary(UnaryOp::Parens, inner) => write!(f, "({inner})"),
            Expression::Unary(UnaryOp::Negate, inner) => write!(f, "!{inner}"),
            Expression::Unary(UnaryOp::Length, inner) => write!(f, "{inner}.length()"),
            Expression::Binary(op, left, right) => match op {
                BinaryOp::Equal
                | BinaryOp::LessThan
                | BinaryOp::GreaterThan
                | BinaryOp::LessOrEqual
                | BinaryOp::GreaterOrEqual
                | BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::And
                | BinaryOp::Or => write!(f, "{left} {} {right}", op.name()),
                BinaryOp::Prefix
                | BinaryOp::Suffix
                | BinaryOp::Contains
                | BinaryOp::Intersection
                | BinaryOp::Union
                | BinaryOp::Regex => write!(f, "{left}.{}({right})", op.name()),
            },
        }
    }
}

// ============================================================
// Tests
// ============================================================
