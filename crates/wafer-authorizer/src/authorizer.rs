//! 授权状态机
//!
//! 一次授权按固定阶段推进：
//! 1. 注入撤销标识事实（权威块编号 0，衰减块从 1 起）；
//! 2. 权威阶段：权威块 + 授权方的事实与规则求不动点，快照出
//!    受信事实集，随后求值权威/授权方的 check 与 policy 列表
//!    （policy 结果在此一次性确定，后续块不再改变它）；
//! 3. 逐个衰减块：只用该块自身的事实与规则继续扩张累积事实集，
//!    新推导永不进入受信集；块内 check 可引用全部累积事实；
//! 4. 按失败 check 与 policy 结果组合出最终结果。
//!
//! 整个计算单线程、纯内存；资源上限与墙钟截止由 [`Limits`]
//! 约束，致命错误立即短路。

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use wafer_datalog::{Binding, Fact, FactSet, FixpointLimits, Rule, Value, World};

use crate::error::{CheckOrigin, ExecutionError, FailedCheck};
use crate::policy::{Check, MatchedQuery, Policy, PolicyVerdict, Query, evaluate_policies};

/// 运行时注入的唯一谓词：`revocation_id(块编号, 标识字节)`
pub const REVOCATION_PREDICATE: &str = "revocation_id";

// ============================================================
// Inputs
// ============================================================

/// 令牌块：事实、规则、check，外加不透明的撤销标识
///
/// 签名验证与反序列化发生在上游；这里拿到的是已解析内容。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub checks: Vec<Check>,
    pub revocation_id: Vec<u8>,
}

/// 授权方程序：虚拟块 + 有序 policy 列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Authorizer {
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub checks: Vec<Check>,
    pub policies: Vec<Policy>,
}

// ============================================================
// Limits
// ============================================================

/// 衰减块内容限制（默认全部放行）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRestrictions {
    pub allow_block_facts: bool,
    pub allow_block_rules: bool,
}

impl Default for BlockRestrictions {
    fn default() -> Self {
        BlockRestrictions {
            allow_block_facts: true,
            allow_block_rules: true,
        }
    }
}

/// 一次授权的资源上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// 累积事实总数上限
    pub max_facts: u64,
    /// 不动点迭代总数上限（跨全部阶段累计）
    pub max_iterations: u64,
    /// 整次授权的墙钟截止
    pub max_time: Duration,
    /// 衰减块内容限制
    pub restrictions: BlockRestrictions,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_facts: 1_000,
            max_iterations: 100,
            max_time: Duration::from_millis(5),
            restrictions: BlockRestrictions::default(),
        }
    }
}

impl Limits {
    fn fixpoint(&self) -> FixpointLimits {
        FixpointLimits {
            max_facts: self.max_facts,
            max_iterations: self.max_iterations,
        }
    }
}

// ============================================================
// Success
// ============================================================

/// 授权成功：命中的 allow 查询、受信事实集、全部生成事实与
/// 本次使用的上限
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationSuccess {
    pub matched_allow_query: MatchedQuery,
    pub authority_facts: FactSet,
    pub all_facts: FactSet,
    pub limits: Limits,
}

impl AuthorizationSuccess {
    /// 在受信事实集上求查询的解
    ///
    /// 衰减块贡献的事实不在受信集内，因此事后查询不到。
    pub fn query_authorizer_facts(&self, query: &Query) -> HashSet<Binding> {
        query.solutions(&self.authority_facts)
    }
}

/// 从解集中投影某个变量的全部取值
pub fn variable_values(bindings: &HashSet<Binding>, variable: &str) -> HashSet<Value> {
    bindings
        .iter()
        .filter_map(|binding| binding.get(variable).cloned())
        .collect()
}

/// 当且仅当某变量恰有一个取值时返回它
pub fn single_variable_value(bindings: &HashSet<Binding>, variable: &str) -> Option<Value> {
    let mut values = variable_values(bindings, variable).into_iter();
    match (values.next(), values.next()) {
        (Some(value), None) => Some(value),
        _ => None,
    }
}

// ============================================================
// State machine
// ============================================================

#[derive(Debug, Default)]
struct AuthorizationState {
    all_facts: FactSet,
    authority_facts: FactSet,
    iterations: u64,
    failed_checks: Vec<FailedCheck>,
}

/// 授权执行器：持有上限配置，可跨多次授权复用
///
/// 授权之间没有共享可变状态；同一输入的并发授权结果一致。
#[derive(Debug, Clone, Default)]
pub struct Executor {
    limits: Limits,
}

impl Executor {
    pub fn new(limits: Limits) -> Self {
        Executor { limits }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// 同步执行一次授权
    ///
    /// 墙钟截止在不动点循环与阶段边界处协同检查；需要硬超时
    /// 语义时用 [`Executor::authorize_with_timeout`]。
    pub fn authorize(
        &self,
        authority: &Block,
        blocks: &[Block],
        authorizer: &Authorizer,
    ) -> Result<AuthorizationSuccess, ExecutionError> {
        let deadline = Instant::now().checked_add(self.limits.max_time);
        let fixpoint_limits = self.limits.fixpoint();

        enforce_restrictions(blocks, &self.limits.restrictions)?;

        let mut state = AuthorizationState::default();
        seed_revocation_facts(&mut state.all_facts, authority, blocks);

        // ---- authority phase ----
        let mut world = World::new(
            authority.facts.iter().cloned(),
            authority.rules.iter().cloned(),
        );
        world.merge(&World::new(
            authorizer.facts.iter().cloned(),
            authorizer.rules.iter().cloned(),
        ));
        world.run(
            &mut state.all_facts,
            &mut state.iterations,
            &fixpoint_limits,
            deadline,
        )?;

        // 信任边界：此刻可证的一切都是受信的
        state.authority_facts = state.all_facts.clone();

        run_checks(&mut state, &authority.checks, CheckOrigin::Authority);
        run_checks(&mut state, &authorizer.checks, CheckOrigin::Authorizer);

        // policy 结果在权威阶段一次性确定
        let verdict = evaluate_policies(&authorizer.policies, &state.all_facts);

        tracing::debug!(
            facts = state.all_facts.len(),
            iterations = state.iterations,
            failed_checks = state.failed_checks.len(),
            verdict = verdict_label(&verdict),
            "authority phase evaluated"
        );

        // ---- attenuation blocks ----
        for (position, block) in blocks.iter().enumerate() {
            let index = position + 1;
            check_deadline(deadline)?;

            // 块只能看到自己的规则与事实，但在累积事实集上扩张
            let world = World::new(block.facts.iter().cloned(), block.rules.iter().cloned());
            world.run(
                &mut state.all_facts,
                &mut state.iterations,
                &fixpoint_limits,
                deadline,
            )?;

            run_checks(&mut state, &block.checks, CheckOrigin::Block(index));

            tracing::debug!(
                block = index,
                facts = state.all_facts.len(),
                failed_checks = state.failed_checks.len(),
                "block evaluated"
            );
        }

        check_deadline(deadline)?;
        classify(state, verdict, self.limits)
    }

    /// 以硬超时执行一次授权
    ///
    /// 计算在阻塞工作线程上运行，与计时器竞速；超时即返回
    /// [`ExecutionError::Timeout`]，被取消的计算没有可见副作用。
    pub async fn authorize_with_timeout(
        &self,
        authority: Block,
        blocks: Vec<Block>,
        authorizer: Authorizer,
    ) -> Result<AuthorizationSuccess, ExecutionError> {
        let executor = self.clone();
        let task =
            tokio::task::spawn_blocking(move || executor.authorize(&authority, &blocks, &authorizer));

        match tokio::time::timeout(self.limits.max_time, task).await {
            Err(_elapsed) => Err(ExecutionError::Timeout),
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => {
                std::panic::resume_unwind(join_error.into_panic())
            }
            Ok(Err(_cancelled)) => Err(ExecutionError::Timeout),
        }
    }
}

// ============================================================
// Phase helpers
// ============================================================

fn enforce_restrictions(
    blocks: &[Block],
    restrictions: &BlockRestrictions,
) -> Result<(), ExecutionError> {
    for (position, block) in blocks.iter().enumerate() {
        let index = position + 1;
        if !restrictions.allow_block_facts && !block.facts.is_empty() {
            return Err(ExecutionError::BlockFactsDisallowed(index));
        }
        if !restrictions.allow_block_rules && !block.rules.is_empty() {
            return Err(ExecutionError::BlockRulesDisallowed(index));
        }
    }
    Ok(())
}

fn seed_revocation_facts(facts: &mut FactSet, authority: &Block, blocks: &[Block]) {
    facts.insert(revocation_fact(0, &authority.revocation_id));
    for (position, block) in blocks.iter().enumerate() {
        facts.insert(revocation_fact(position + 1, &block.revocation_id));
    }
    tracing::trace!(
        authority_revocation_id = %hex::encode(&authority.revocation_id),
        blocks = blocks.len(),
        "seeded revocation facts"
    );
}

fn revocation_fact(index: usize, revocation_id: &[u8]) -> Fact {
    Fact::new(
        REVOCATION_PREDICATE,
        [
            Value::Integer(index as i64),
            Value::Bytes(revocation_id.to_vec()),
        ],
    )
}

fn run_checks(state: &mut AuthorizationState, checks: &[Check], origin: CheckOrigin) {
    for check in checks {
        if !check.passes(&state.all_facts) {
            state.failed_checks.push(FailedCheck {
                origin,
                check: check.clone(),
            });
        }
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), ExecutionError> {
    if let Some(deadline) = deadline
        && Instant::now() >= deadline
    {
        return Err(ExecutionError::Timeout);
    }
    Ok(())
}

fn verdict_label(verdict: &PolicyVerdict) -> &'static str {
    match verdict {
        PolicyVerdict::Allow(_) => "allow",
        PolicyVerdict::Deny(_) => "deny",
        PolicyVerdict::NoMatch => "no-match",
    }
}

fn classify(
    state: AuthorizationState,
    verdict: PolicyVerdict,
    limits: Limits,
) -> Result<AuthorizationSuccess, ExecutionError> {
    let failed_checks = state.failed_checks;
    match (failed_checks.is_empty(), verdict) {
        (true, PolicyVerdict::Allow(matched)) => Ok(AuthorizationSuccess {
            matched_allow_query: matched,
            authority_facts: state.authority_facts,
            all_facts: state.all_facts,
            limits,
        }),
        (false, PolicyVerdict::Allow(_)) => Err(ExecutionError::FailedChecks(failed_checks)),
        (_, PolicyVerdict::Deny(matched)) => Err(ExecutionError::DenyRuleMatched {
            failed_checks,
            matched,
        }),
        (_, PolicyVerdict::NoMatch) => Err(ExecutionError::NoPoliciesMatched(failed_checks)),
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wafer_datalog::{Predicate, Term};

    fn generous() -> Limits {
        Limits {
            max_facts: 10_000,
            max_iterations: 1_000,
            max_time: Duration::from_secs(5),
            restrictions: BlockRestrictions::default(),
        }
    }

    fn query(name: &str) -> Query {
        Query::new([Predicate::new(name, [Term::var("x")])], []).unwrap()
    }

    fn allow(name: &str) -> Policy {
        Policy::allow([query(name)]).unwrap()
    }

    #[test]
    fn test_revocation_fact_shape() {
        let fact = revocation_fact(1, &[0xbb]);
        assert_eq!(fact.name, REVOCATION_PREDICATE);
        assert_eq!(fact.values[0], Value::Integer(1));
        assert_eq!(fact.values[1], Value::Bytes(vec![0xbb]));
    }

    #[test]
    fn test_restrictions_reject_block_content_before_evaluation() {
        let restricted = Limits {
            restrictions: BlockRestrictions {
                allow_block_facts: false,
                allow_block_rules: true,
            },
            ..generous()
        };
        let executor = Executor::new(restricted);

        let block = Block {
            facts: vec![Fact::new("sneaky", [Value::from("fact")])],
            ..Block::default()
        };
        let authorizer = Authorizer {
            policies: vec![allow("sneaky")],
            ..Authorizer::default()
        };

        assert_eq!(
            executor.authorize(&Block::default(), &[block], &authorizer),
            Err(ExecutionError::BlockFactsDisallowed(1))
        );
    }

    #[test]
    fn test_restrictions_reject_block_rules() {
        let restricted = Limits {
            restrictions: BlockRestrictions {
                allow_block_facts: true,
                allow_block_rules: false,
            },
            ..generous()
        };
        let executor = Executor::new(restricted);

        let rule = Rule::new(
            Predicate::new("b", [Term::var("x")]),
            [Predicate::new("a", [Term::var("x")])],
            [],
        )
        .unwrap();
        let block = Block {
            rules: vec![rule],
            ..Block::default()
        };
        let authorizer = Authorizer {
            policies: vec![allow("a")],
            ..Authorizer::default()
        };

        assert_eq!(
            executor.authorize(&Block::default(), &[block], &authorizer),
            Err(ExecutionError::BlockRulesDisallowed(1))
        );
    }

    #[test]
    fn test_variable_projections() {
        let mut first = Binding::new();
        first.insert("x".to_string(), Value::from("alice"));
        let mut second = Binding::new();
        second.insert("x".to_string(), Value::from("bob"));

        let bindings: HashSet<Binding> = [first.clone(), second].into_iter().collect();
        assert_eq!(variable_values(&bindings, "x").len(), 2);
        assert_eq!(single_variable_value(&bindings, "x"), None);

        let only: HashSet<Binding> = [first].into_iter().collect();
        assert_eq!(
            single_variable_value(&only, "x"),
            Some(Value::from("alice"))
        );
        assert_eq!(single_variable_value(&only, "y"), None);
    }

    #[test]
    fn test_default_limits_are_conservative() {
        let limits = Limits::default();
        assert_eq!(limits.max_facts, 1_000);
        assert_eq!(limits.max_iterations, 100);
        assert!(limits.restrictions.allow_block_facts);
        assert!(limits.restrictions.allow_block_rules);
    }
}
