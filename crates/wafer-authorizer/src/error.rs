//! 授权执行的错误分类
//!
//! 三类传播策略不同的错误：
//! 1. 致命资源错误（超时、事实数、迭代数）立即中止并原样返回；
//! 2. 授权失败（无 policy 命中、deny 命中、check 失败）带诊断
//!    载荷，在状态机完成全部非致命工作后给出；
//! 3. 表达式求值故障不在此出现——它们在规则/查询层被静默吸收。

use std::fmt;

use serde::{Deserialize, Serialize};
use wafer_datalog::FixpointError;

use crate::policy::{Check, MatchedQuery};

// ============================================================
// Failed checks
// ============================================================

/// 失败 check 的来源块
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckOrigin {
    /// 权威块（索引 0）
    Authority,
    /// 衰减块，按提供顺序从 1 开始编号
    Block(usize),
    /// 授权方的虚拟块
    Authorizer,
}

/// 未通过的 check 及其来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCheck {
    pub origin: CheckOrigin,
    pub check: Check,
}

impl fmt::Display for CheckOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOrigin::Authority => write!(f, "authority block"),
            CheckOrigin::Block(index) => write!(f, "block {index}"),
            CheckOrigin::Authorizer => write!(f, "authorizer"),
        }
    }
}

impl fmt::Display for FailedCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.check, self.origin)
    }
}

fn fmt_failed_checks(failed: &[FailedCheck]) -> String {
    failed
        .iter()
        .map(|check| check.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================
// ExecutionError
// ============================================================

/// 授权的最终失败结果
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// 墙钟截止时间先于计算结束
    #[error("authorization timed out")]
    Timeout,

    /// 事实数越过上限
    #[error("authorization generated too many facts")]
    TooManyFacts,

    /// 不动点迭代数越过上限
    #[error("authorization ran for too many iterations")]
    TooManyIterations,

    /// 衰减块携带事实但已被限制禁用
    #[error("block {0} carries facts, which the limits disallow")]
    BlockFactsDisallowed(usize),

    /// 衰减块携带规则但已被限制禁用
    #[error("block {0} carries rules, which the limits disallow")]
    BlockRulesDisallowed(usize),

    /// 没有 policy 命中
    #[error("no policy matched (failed checks: [{}])", fmt_failed_checks(.0))]
    NoPoliciesMatched(Vec<FailedCheck>),

    /// 第一个命中的 policy 是 deny
    #[error("a deny policy matched (failed checks: [{}])", fmt_failed_checks(.failed_checks))]
    DenyRuleMatched {
        failed_checks: Vec<FailedCheck>,
        matched: MatchedQuery,
    },

    /// allow 命中但存在失败的 check
    #[error("checks failed: [{}]", fmt_failed_checks(.0))]
    FailedChecks(Vec<FailedCheck>),
}

impl From<FixpointError> for ExecutionError {
    fn from(error: FixpointError) -> Self {
        match error {
            FixpointError::TooManyFacts => ExecutionError::TooManyFacts,
            FixpointError::TooManyIterations => ExecutionError::TooManyIterations,
            FixpointError::Timeout => ExecutionError::Timeout,
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Query;
    use wafer_datalog::{Predicate, Term};

    fn failed(origin: CheckOrigin) -> FailedCheck {
        let query = Query::new([Predicate::new("role", [Term::from("writer")])], []).unwrap();
        FailedCheck {
            origin,
            check: Check::new([query]).unwrap(),
        }
    }

    #[test]
    fn test_failed_check_display() {
        assert_eq!(
            failed(CheckOrigin::Authority).to_string(),
            r#"check if role("writer") (authority block)"#
        );
        assert_eq!(
            failed(CheckOrigin::Block(2)).to_string(),
            r#"check if role("writer") (block 2)"#
        );
    }

    #[test]
    fn test_execution_error_display() {
        let error = ExecutionError::FailedChecks(vec![failed(CheckOrigin::Authorizer)]);
        assert_eq!(
            error.to_string(),
            r#"checks failed: [check if role("writer") (authorizer)]"#
        );

        assert_eq!(
            ExecutionError::NoPoliciesMatched(vec![]).to_string(),
            "no policy matched (failed checks: [])"
        );
    }

    #[test]
    fn test_fixpoint_error_mapping() {
        assert_eq!(
            ExecutionError::from(FixpointError::TooManyFacts),
            ExecutionError::TooManyFacts
        );
        assert_eq!(
            ExecutionError::from(FixpointError::Timeout),
            ExecutionError::Timeout
        );
    }
}
