//! 谓词、事实与规则
//!
//! - [`Predicate`]：名称 + 有序项列表，项可含变量（规则上下文）；
//! - [`Fact`]：全部为具体值的谓词，参数类型是 [`Value`]，
//!   变量在类型层面被排除；
//! - [`Rule`]：`head :- body, expressions`，构造时校验体非空
//!   与头部变量安全性。
//!
//! 谓词相等是结构相等；名称与元数共同确定一个关系。

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Expression;
use crate::term::{Term, Value};

/// 事实集合
pub type FactSet = HashSet<Fact>;

// ============================================================
// Predicate
// ============================================================

/// 规则上下文中的谓词：名称 + 项列表
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    pub name: String,
    pub terms: Vec<Term>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, terms: impl IntoIterator<Item = Term>) -> Self {
        Predicate {
            name: name.into(),
            terms: terms.into_iter().collect(),
        }
    }

    /// Collect the variable names occurring in this predicate.
    pub fn collect_variables<'a>(&'a self, out: &mut HashSet<&'a str>) {
        for term in &self.terms {
            if let Term::Variable(name) = term {
                out.insert(name.as_str());
            }
        }
    }

    /// 用绑定代换变量；存在未绑定变量时返回 `None`
    pub fn bind(&self, binding: &crate::term::Binding) -> Option<Fact> {
        let mut values = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            match term {
                Term::Value(value) => values.push(value.clone()),
                Term::Variable(name) => values.push(binding.get(name)?.clone()),
            }
        }
        Some(Fact {
            name: self.name.clone(),
            values,
        })
    }
}

// ============================================================
// Fact
// ============================================================

/// 构造事实时的非法输入
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFact {
    #[error("fact {predicate} contains variable ${variable}")]
    VariableInFact { predicate: String, variable: String },
}

/// 全具体值的谓词（ground atom）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub name: String,
    pub values: Vec<Value>,
}

impl Fact {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Fact {
            name: name.into(),
            values: values.into_iter().collect(),
        }
    }

    /// 以值项视角转回谓词（匹配、展示共用一套逻辑）
    pub fn to_predicate(&self) -> Predicate {
        Predicate {
            name: self.name.clone(),
            terms: self.values.iter().cloned().map(Term::Value).collect(),
        }
    }
}

/// 仅当谓词不含变量时可降为事实
impl TryFrom<Predicate> for Fact {
    type Error = InvalidFact;

    fn try_from(predicate: Predicate) -> Result<Self, InvalidFact> {
        let mut values = Vec::with_capacity(predicate.terms.len());
        for term in &predicate.terms {
            match term {
                Term::Value(value) => values.push(value.clone()),
                Term::Variable(variable) => {
                    return Err(InvalidFact::VariableInFact {
                        predicate: predicate.name.clone(),
                        variable: variable.clone(),
                    });
                }
            }
        }
        Ok(Fact {
            name: predicate.name,
            values,
        })
    }
}

// ============================================================
// Rule
// ============================================================

/// 构造规则时的非法输入
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRule {
    #[error("rule body cannot be empty")]
    EmptyBody,
    #[error("head variable ${0} does not appear in the body")]
    UnboundHeadVariable(String),
}

/// `head :- body, expressions`
///
/// 不变量（构造时校验，字段因此私有）：
/// - 体非空；
/// - 头部变量都出现在体中（安全性）。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    head: Predicate,
    body: Vec<Predicate>,
    expressions: Vec<Expression>,
}

impl Rule {
    pub fn new(
        head: Predicate,
        body: impl IntoIterator<Item = Predicate>,
        expressions: impl IntoIterator<Item = Expression>,
    ) -> Result<Self, InvalidRule> {
        let body: Vec<Predicate> = body.into_iter().collect();
        if body.is_empty() {
            return Err(InvalidRule::EmptyBody);
        }

        let mut body_variables = HashSet::new();
        for predicate in &body {
            predicate.collect_variables(&mut body_variables);
        }
        let mut head_variables = HashSet::new();
        head.collect_variables(&mut head_variables);
        if let Some(unbound) = head_variables.difference(&body_variables).next() {
            return Err(InvalidRule::UnboundHeadVariable(unbound.to_string()));
        }

        Ok(Rule {
            head,
            body,
            expressions: expressions.into_iter().collect(),
        })
    }

    pub fn head(&self) -> &Predicate {
        &self.head
    }

    pub fn body(&self) -> &[Predicate] {
        &self.body
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }
}

// ============================================================
// Display
// ============================================================

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{term}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_predicate().fmt(f)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <- ", self.head)?;
        for (i, predicate) in self.body.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{predicate}")?;
        }
        for expression in &self.expressions {
            write!(f, ", {expression}")?;
        }
        Ok(())
    }
}

// ============================================================
// Tests
// ============================================================
