//! 谓词与事实的匹配
//!
//! 单个谓词对单个事实的匹配产生一个候选绑定；对规则体的每个
//! 谓词收集全体候选绑定，供规则应用阶段做一致性合并。

use std::collections::HashSet;

use crate::ast::{Fact, FactSet, Predicate};
use crate::term::{Binding, Term};

/// 将谓词与事实匹配，成功时返回累积的绑定
///
/// 要求名称与元数都相等；逐位置比较：值项要求结构相等，变量项
/// 绑定到对应值，同一变量在本次匹配内出现多次时取值必须一致。
pub fn match_fact(predicate: &Predicate, fact: &Fact) -> Option<Binding> {
    if predicate.name != fact.name || predicate.terms.len() != fact.values.len() {
        return None;
    }

    let mut binding = Binding::new();
    for (term, value) in predicate.terms.iter().zip(&fact.values) {
        match term {
            Term::Value(expected) => {
                if expected != value {
                    return None;
                }
            }
            Term::Variable(name) => {
                if let Some(previous) = binding.get(name) {
                    if previous != value {
                        return None;
                    }
                } else {
                    binding.insert(name.clone(), value.clone());
                }
            }
        }
    }
    Some(binding)
}

/// 对体中每个谓词，收集它与事实集中每个事实匹配得到的绑定集合
pub fn candidate_bindings(facts: &FactSet, body: &[Predicate]) -> Vec<HashSet<Binding>> {
    body.iter()
        .map(|predicate| {
            facts
                .iter()
                .filter_map(|fact| match_fact(predicate, fact))
                .collect()
        })
        .collect()
}

/// Merge a candidate binding into an accumulated one.
///
/// Returns `None` when the two assign different values to the same
/// variable (inconsistent unification).
pub(crate) fn merge_bindings(accumulated: &Binding, candidate: &Binding) -> Option<Binding> {
    let mut merged = accumulated.clone();
    for (name, value) in candidate {
        if let Some(previous) = merged.get(name) {
            if previous != value {
                return None;
            }
        } else {
            merged.insert(name.clone(), value.clone());
        }
    }
    Some(merged)
}

// ============================================================
// Tests
// ============================================================
