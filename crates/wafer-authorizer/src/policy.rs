//! Check 与 policy 求值
//!
//! 查询（体 + 表达式）作为匿名规则求解：解集是去重后的绑定
//! 集合，限制到查询自身出现的变量。check 是查询的非空析取，
//! 任一查询有解即通过；policy 按声明顺序扫描，第一个命中的
//! 决定结果。

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use wafer_datalog::{Binding, Expression, FactSet, Predicate, query_solutions};

// ============================================================
// Query
// ============================================================

/// 构造查询/析取时的非法输入
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPolicy {
    #[error("query body cannot be empty")]
    EmptyQueryBody,
    #[error("disjunction must contain at least one query")]
    EmptyDisjunction,
}

/// 一条查询：谓词体 + 布尔表达式
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    body: Vec<Predicate>,
    expressions: Vec<Expression>,
}

impl Query {
    pub fn new(
        body: impl IntoIterator<Item = Predicate>,
        expressions: impl IntoIterator<Item = Expression>,
    ) -> Result<Self, InvalidPolicy> {
        let body: Vec<Predicate> = body.into_iter().collect();
        if body.is_empty() {
            return Err(InvalidPolicy::EmptyQueryBody);
        }
        Ok(Query {
            body,
            expressions: expressions.into_iter().collect(),
        })
    }

    pub fn body(&self) -> &[Predicate] {
        &self.body
    }

    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    /// 查询暴露的变量：体与表达式中出现的全部变量名
    pub fn variables(&self) -> HashSet<&str> {
        let mut variables = HashSet::new();
        for predicate in &self.body {
            predicate.collect_variables(&mut variables);
        }
        for expression in &self.expressions {
            expression.collect_variables(&mut variables);
        }
        variables
    }

    /// 查询在事实集上的解集，绑定限制到查询暴露的变量
    pub fn solutions(&self, facts: &FactSet) -> HashSet<Binding> {
        let exposed = self.variables();
        query_solutions(facts, &self.body, &self.expressions)
            .into_iter()
            .map(|binding| {
                binding
                    .into_iter()
                    .filter(|(name, _)| exposed.contains(name.as_str()))
                    .collect()
            })
            .collect()
    }
}

// ============================================================
// Check
// ============================================================

/// 授权断言：查询的非空析取，任一查询有解即通过
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Check {
    queries: Vec<Query>,
}

impl Check {
    pub fn new(queries: impl IntoIterator<Item = Query>) -> Result<Self, InvalidPolicy> {
        let queries: Vec<Query> = queries.into_iter().collect();
        if queries.is_empty() {
            return Err(InvalidPolicy::EmptyDisjunction);
        }
        Ok(Check { queries })
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn passes(&self, facts: &FactSet) -> bool {
        self.queries
            .iter()
            .any(|query| !query.solutions(facts).is_empty())
    }
}

// ============================================================
// Policy
// ============================================================

/// Policy 类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    Allow,
    Deny,
}

/// 有序判定规则：allow/deny + 查询析取
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Policy {
    kind: PolicyKind,
    queries: Vec<Query>,
}

/// 命中的查询及其解集
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedQuery {
    pub query: Query,
    pub bindings: HashSet<Binding>,
}

/// Policy 列表的求值结果（每次授权只赋值一次）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow(MatchedQuery),
    Deny(MatchedQuery),
    NoMatch,
}

impl Policy {
    pub fn new(
        kind: PolicyKind,
        queries: impl IntoIterator<Item = Query>,
    ) -> Result<Self, InvalidPolicy> {
        let queries: Vec<Query> = queries.into_iter().collect();
        if queries.is_empty() {
            return Err(InvalidPolicy::EmptyDisjunction);
        }
        Ok(Policy { kind, queries })
    }

    /// allow 便捷构造
    pub fn allow(queries: impl IntoIterator<Item = Query>) -> Result<Self, InvalidPolicy> {
        Policy::new(PolicyKind::Allow, queries)
    }

    /// deny 便捷构造
    pub fn deny(queries: impl IntoIterator<Item = Query>) -> Result<Self, InvalidPolicy> {
        Policy::new(PolicyKind::Deny, queries)
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    /// 第一个有解的查询及其解集
    pub fn matches(&self, facts: &FactSet) -> Option<MatchedQuery> {
        self.queries.iter().find_map(|query| {
            let bindings = query.solutions(facts);
            if bindings.is_empty() {
                None
            } else {
                Some(MatchedQuery {
                    query: query.clone(),
                    bindings,
                })
            }
        })
    }
}

/// 按声明顺序扫描 policy 列表，第一个命中的决定结果
pub fn evaluate_policies(policies: &[Policy], facts: &FactSet) -> PolicyVerdict {
    for policy in policies {
        if let Some(matched) = policy.matches(facts) {
            return match policy.kind {
                PolicyKind::Allow => PolicyVerdict::Allow(matched),
                PolicyKind::Deny => PolicyVerdict::Deny(matched),
            };
        }
    }
    PolicyVerdict::NoMatch
}

// ============================================================
// Display
// ============================================================

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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

fn fmt_disjunction(queries: &[Query], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, query) in queries.iter().enumerate() {
        if i > 0 {
            write!(f, " or ")?;
        }
        write!(f, "{query}")?;
    }
    Ok(())
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "check if ")?;
        fmt_disjunction(&self.queries, f)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PolicyKind::Allow => write!(f, "allow if ")?,
            PolicyKind::Deny => write!(f, "deny if ")?,
        }
        fmt_disjunction(&self.queries, f)
    }
}

// ============================================================
// Tests
// ============================================================
