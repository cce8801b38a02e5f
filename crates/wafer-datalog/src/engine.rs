//! 规则应用与有界不动点
//!
//! 朴素自底向上求值：每一轮把所有规则应用到当前事实集，直到
//! 没有新事实产生。事实数、迭代数与墙钟截止时间三个上限在每轮
//! 扩张之后检查，越界立即以致命错误终止。

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::ast::{Fact, FactSet, Predicate, Rule};
use crate::expr::{Expression, evaluate};
use crate::term::{Binding, Value};
use crate::unify::{candidate_bindings, merge_bindings};

// ============================================================
// Query solutions (shared by rules, checks and policies)
// ============================================================

/// 求体 + 表达式在事实集上的解集
///
/// 逐谓词合并候选绑定（等价于先做笛卡尔积再合并，但边合并边
/// 剪枝）；要求合并后的绑定覆盖体中全部变量；最后用表达式过滤：
/// 每个表达式都必须求值为 `true`，求值故障或非布尔结果都把该
/// 组绑定静默丢弃。
pub fn query_solutions(
    facts: &FactSet,
    body: &[Predicate],
    expressions: &[Expression],
) -> HashSet<Binding> {
    let candidates = candidate_bindings(facts, body);

    let mut merged: Vec<Binding> = vec![Binding::new()];
    for set in &candidates {
        let mut next = Vec::new();
        for accumulated in &merged {
            for candidate in set {
                if let Some(joined) = merge_bindings(accumulated, candidate) {
                    next.push(joined);
                }
            }
        }
        if next.is_empty() {
            return HashSet::new();
        }
        merged = next;
    }

    let mut body_variables = HashSet::new();
    for predicate in body {
        predicate.collect_variables(&mut body_variables);
    }

    merged
        .into_iter()
        .filter(|binding| {
            body_variables
                .iter()
                .all(|variable| binding.contains_key(*variable))
        })
        .filter(|binding| {
            expressions
                .iter()
                .all(|expression| matches!(evaluate(binding, expression), Ok(Value::Bool(true))))
        })
        .collect()
}

impl Rule {
    /// 把规则应用到事实集，产出头部代换后的新事实
    ///
    /// 头部变量未被解绑定覆盖的组合被丢弃（构造期的安全性校验
    /// 使这种情况实际不会出现）。
    pub fn produce(&self, facts: &FactSet) -> FactSet {
        query_solutions(facts, self.body(), self.expressions())
            .into_iter()
            .filter_map(|binding| self.head().bind(&binding))
            .collect()
    }
}

// ============================================================
// World
// ============================================================

/// 求值帧：一组规则和一组事实
///
/// 合并是逐分量的集合并，空世界是单位元。每个授权阶段按作用域
/// 现场组装自己的世界，不跨阶段持久化。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub facts: FactSet,
    pub rules: HashSet<Rule>,
}

impl World {
    pub fn new(
        facts: impl IntoIterator<Item = Fact>,
        rules: impl IntoIterator<Item = Rule>,
    ) -> Self {
        World {
            facts: facts.into_iter().collect(),
            rules: rules.into_iter().collect(),
        }
    }

    /// 逐分量并入另一个世界
    pub fn merge(&mut self, other: &World) {
        self.facts.extend(other.facts.iter().cloned());
        self.rules.extend(other.rules.iter().cloned());
    }
}

// ============================================================
// Bounded fixpoint
// ============================================================

/// 不动点资源上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixpointLimits {
    /// 事实总数上限，达到即致命
    pub max_facts: u64,
    /// 迭代轮数上限，达到即致命
    pub max_iterations: u64,
}

/// 不动点致命错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FixpointError {
    #[error("fact count limit reached during fixpoint evaluation")]
    TooManyFacts,
    #[error("iteration limit reached during fixpoint evaluation")]
    TooManyIterations,
    #[error("deadline elapsed during fixpoint evaluation")]
    Timeout,
}

impl World {
    /// 在 `facts` 上求不动点，就地扩张
    ///
    /// 迭代计数器每轮递增，包括没有发现新事实的终止轮；上限
    /// 检查在扩张与计数之后进行（先事实数，再迭代数，再截止
    /// 时间），随后才判定终止。对同一世界重复调用是幂等的。
    pub fn run(
        &self,
        facts: &mut FactSet,
        iterations: &mut u64,
        limits: &FixpointLimits,
        deadline: Option<Instant>,
    ) -> Result<(), FixpointError> {
        facts.extend(self.facts.iter().cloned());

        loop {
            let mut fresh = FactSet::new();
            for rule in &self.rules {
                for fact in rule.produce(facts) {
                    if !facts.contains(&fact) {
                        fresh.insert(fact);
                    }
                }
            }

            let saturated = fresh.is_empty();
            facts.extend(fresh);
            *iterations += 1;

            if facts.len() as u64 >= limits.max_facts {
                return Err(FixpointError::TooManyFacts);
            }
            if *iterations >= limits.max_iterations {
                return Err(FixpointError::TooManyIterations);
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Err(FixpointError::Timeout);
            }
            if saturated {
                return Ok(());
            }
        }
    }
}

// ============================================================
// Tests
// ============================================================
