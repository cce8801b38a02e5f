//! 授权状态机端到端场景

use std::time::Duration;

use wafer_authorizer::{
    Authorizer, Block, BlockRestrictions, CheckOrigin, Check, ExecutionError, Executor, Limits,
    Policy, Query, single_variable_value, variable_values,
};
use wafer_datalog::{Fact, Predicate, Rule, Term, Value};

fn generous_limits() -> Limits {
    Limits {
        max_facts: 100_000,
        max_iterations: 10_000,
        max_time: Duration::from_secs(5),
        restrictions: BlockRestrictions::default(),
    }
}

fn executor() -> Executor {
    Executor::new(generous_limits())
}

fn unary_query(name: &str) -> Query {
    Query::new([Predicate::new(name, [Term::var("x")])], []).unwrap()
}

fn allow(name: &str) -> Policy {
    Policy::allow([unary_query(name)]).unwrap()
}

fn fact(name: &str, value: &str) -> Fact {
    Fact::new(name, [Value::from(value)])
}

// ---- 1. trivial allow ----

#[test]
fn test_trivial_allow() {
    let authority = Block {
        facts: vec![fact("user", "alice")],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("user")],
        ..Authorizer::default()
    };

    let success = executor().authorize(&authority, &[], &authorizer).unwrap();
    assert_eq!(
        single_variable_value(&success.matched_allow_query.bindings, "x"),
        Some(Value::from("alice"))
    );
}

// ---- 2. deny beats later allow ----

#[test]
fn test_deny_beats_later_allow() {
    let authority = Block {
        facts: vec![fact("admin", "bob")],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![Policy::deny([unary_query("admin")]).unwrap(), allow("admin")],
        ..Authorizer::default()
    };

    match executor().authorize(&authority, &[], &authorizer) {
        Err(ExecutionError::DenyRuleMatched {
            failed_checks,
            matched,
        }) => {
            assert!(failed_checks.is_empty());
            assert_eq!(
                single_variable_value(&matched.bindings, "x"),
                Some(Value::from("bob"))
            );
        }
        other => panic!("expected deny, got {other:?}"),
    }
}

// ---- 3. failing check overrides allow ----

#[test]
fn test_failing_check_overrides_allow() {
    let writer_check = Check::new([Query::new(
        [Predicate::new("role", [Term::from("writer")])],
        [],
    )
    .unwrap()])
    .unwrap();

    let authority = Block {
        facts: vec![fact("role", "reader")],
        checks: vec![writer_check.clone()],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("role")],
        ..Authorizer::default()
    };

    match executor().authorize(&authority, &[], &authorizer) {
        Err(ExecutionError::FailedChecks(failed)) => {
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].origin, CheckOrigin::Authority);
            assert_eq!(failed[0].check, writer_check);
        }
        other => panic!("expected failed checks, got {other:?}"),
    }
}

// ---- 4. blocks cannot forge authority facts ----

#[test]
fn test_block_cannot_forge_authority_facts() {
    let forged = Block {
        facts: vec![fact("admin", "mallory")],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("admin")],
        ..Authorizer::default()
    };

    // policy 在权威阶段求值，块事实尚未载入
    match executor().authorize(&Block::default(), &[forged], &authorizer) {
        Err(ExecutionError::NoPoliciesMatched(failed)) => assert!(failed.is_empty()),
        other => panic!("expected no policy match, got {other:?}"),
    }
}

#[test]
fn test_block_facts_stay_out_of_trusted_set() {
    let authority = Block {
        facts: vec![fact("user", "alice")],
        ..Block::default()
    };
    let elevate = Rule::new(
        Predicate::new("elevated", [Term::var("x")]),
        [Predicate::new("admin", [Term::var("x")])],
        [],
    )
    .unwrap();
    let attenuation = Block {
        facts: vec![fact("admin", "mallory")],
        rules: vec![elevate],
        // 块内 check 可以引用累积事实集
        checks: vec![Check::new([unary_query("elevated")]).unwrap()],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("user")],
        ..Authorizer::default()
    };

    let success = executor()
        .authorize(&authority, &[attenuation], &authorizer)
        .unwrap();

    // 块的贡献进入累积集，但永不提升为受信
    assert!(success.all_facts.contains(&fact("admin", "mallory")));
    assert!(success.all_facts.contains(&fact("elevated", "mallory")));
    assert!(!success.authority_facts.contains(&fact("admin", "mallory")));
    assert!(success.authority_facts.is_subset(&success.all_facts));

    assert!(
        success
            .query_authorizer_facts(&unary_query("admin"))
            .is_empty()
    );
    let users = success.query_authorizer_facts(&unary_query("user"));
    assert_eq!(
        single_variable_value(&users, "x"),
        Some(Value::from("alice"))
    );
    assert_eq!(variable_values(&users, "x").len(), 1);
}

// ---- 5. resource cap ----

#[test]
fn test_resource_cap_returns_too_many_facts() {
    // 50 条边的链上求可达闭包，远超 600 条事实的上限
    let mut facts = Vec::new();
    for n in 0..50_i64 {
        facts.push(Fact::new("edge", [Value::Integer(n), Value::Integer(n + 1)]));
    }
    let rules = vec![
        Rule::new(
            Predicate::new("reachable", [Term::var("x"), Term::var("y")]),
            [Predicate::new("edge", [Term::var("x"), Term::var("y")])],
            [],
        )
        .unwrap(),
        Rule::new(
            Predicate::new("reachable", [Term::var("x"), Term::var("z")]),
            [
                Predicate::new("reachable", [Term::var("x"), Term::var("y")]),
                Predicate::new("edge", [Term::var("y"), Term::var("z")]),
            ],
            [],
        )
        .unwrap(),
    ];

    let authority = Block {
        facts,
        rules,
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("edge")],
        ..Authorizer::default()
    };

    let capped = Limits {
        max_facts: 600,
        max_iterations: 100_000,
        max_time: Duration::from_secs(5),
        restrictions: BlockRestrictions::default(),
    };
    assert_eq!(
        Executor::new(capped).authorize(&authority, &[], &authorizer),
        Err(ExecutionError::TooManyFacts)
    );
}

// ---- 6. revocation surface ----

#[test]
fn test_revocation_ids_are_visible_at_authority_time() {
    let authority = Block {
        revocation_id: vec![0xaa],
        ..Block::default()
    };
    let attenuation = Block {
        revocation_id: vec![0xbb],
        ..Block::default()
    };

    let revocation_check = Check::new([Query::new(
        [Predicate::new(
            "revocation_id",
            [
                Term::from(Value::Integer(1)),
                Term::from(Value::Bytes(vec![0xbb])),
            ],
        )],
        [],
    )
    .unwrap()])
    .unwrap();

    let authorizer = Authorizer {
        checks: vec![revocation_check],
        policies: vec![Policy::allow([Query::new(
            [Predicate::new(
                "revocation_id",
                [Term::from(Value::Integer(0)), Term::var("id")],
            )],
            [],
        )
        .unwrap()])
        .unwrap()],
        ..Authorizer::default()
    };

    let success = executor()
        .authorize(&authority, &[attenuation], &authorizer)
        .unwrap();
    assert_eq!(
        single_variable_value(&success.matched_allow_query.bindings, "id"),
        Some(Value::Bytes(vec![0xaa]))
    );
}

// ---- composite outcomes ----

#[test]
fn test_failed_checks_and_no_policy_combine() {
    let impossible = Check::new([unary_query("ghost")]).unwrap();
    let authority = Block {
        facts: vec![fact("user", "alice")],
        checks: vec![impossible],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("admin")],
        ..Authorizer::default()
    };

    match executor().authorize(&authority, &[], &authorizer) {
        Err(ExecutionError::NoPoliciesMatched(failed)) => assert_eq!(failed.len(), 1),
        other => panic!("expected no policy match with failures, got {other:?}"),
    }
}

#[test]
fn test_deny_carries_failed_checks() {
    let impossible = Check::new([unary_query("ghost")]).unwrap();
    let authority = Block {
        facts: vec![fact("admin", "bob")],
        checks: vec![impossible],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![Policy::deny([unary_query("admin")]).unwrap()],
        ..Authorizer::default()
    };

    match executor().authorize(&authority, &[], &authorizer) {
        Err(ExecutionError::DenyRuleMatched { failed_checks, .. }) => {
            assert_eq!(failed_checks.len(), 1);
        }
        other => panic!("expected deny with failures, got {other:?}"),
    }
}

#[test]
fn test_block_checks_can_fail() {
    let authority = Block {
        facts: vec![fact("user", "alice")],
        ..Block::default()
    };
    let attenuation = Block {
        checks: vec![Check::new([unary_query("never_present")]).unwrap()],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("user")],
        ..Authorizer::default()
    };

    match executor().authorize(&authority, &[attenuation], &authorizer) {
        Err(ExecutionError::FailedChecks(failed)) => {
            assert_eq!(failed[0].origin, CheckOrigin::Block(1));
        }
        other => panic!("expected block check failure, got {other:?}"),
    }
}

// ---- authorizer facts and rules participate in the authority phase ----

#[test]
fn test_authorizer_program_joins_authority_world() {
    let authority = Block {
        facts: vec![fact("owner", "alice")],
        ..Block::default()
    };
    let promote = Rule::new(
        Predicate::new("can_write", [Term::var("x")]),
        [
            Predicate::new("owner", [Term::var("x")]),
            Predicate::new("resource", [Term::var("r")]),
        ],
        [],
    )
    .unwrap();
    let authorizer = Authorizer {
        facts: vec![fact("resource", "/tmp/report")],
        rules: vec![promote],
        policies: vec![allow("can_write")],
        ..Authorizer::default()
    };

    let success = executor().authorize(&authority, &[], &authorizer).unwrap();
    assert!(
        success
            .authority_facts
            .contains(&fact("can_write", "alice"))
    );
}

// ---- expiry via date comparison ----

#[test]
fn test_expired_block_check_fails() {
    use chrono::TimeZone;
    use wafer_datalog::{BinaryOp, Expression};

    let expiry = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let now = chrono::Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

    // check if time($t), $t < 2024-01-01T00:00:00Z
    let expiry_check = Check::new([Query::new(
        [Predicate::new("time", [Term::var("t")])],
        [Expression::binary(
            BinaryOp::LessThan,
            Expression::var("t"),
            Expression::value(Value::Date(expiry)),
        )],
    )
    .unwrap()])
    .unwrap();

    let authority = Block {
        facts: vec![fact("user", "alice")],
        checks: vec![expiry_check],
        ..Block::default()
    };
    let authorizer = Authorizer {
        facts: vec![Fact::new("time", [Value::Date(now)])],
        policies: vec![allow("user")],
        ..Authorizer::default()
    };

    match executor().authorize(&authority, &[], &authorizer) {
        Err(ExecutionError::FailedChecks(failed)) => {
            assert_eq!(failed[0].origin, CheckOrigin::Authority);
        }
        other => panic!("expected expiry failure, got {other:?}"),
    }
}

// ---- timeouts ----

#[test]
fn test_sync_deadline_is_cooperative() {
    let authority = Block {
        facts: vec![fact("user", "alice")],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("user")],
        ..Authorizer::default()
    };

    let instant_deadline = Limits {
        max_time: Duration::ZERO,
        ..generous_limits()
    };
    assert_eq!(
        Executor::new(instant_deadline).authorize(&authority, &[], &authorizer),
        Err(ExecutionError::Timeout)
    );
}

#[tokio::test]
async fn test_async_timeout_wrapper() {
    // 长链闭包在 1ms 内算不完
    let mut facts = Vec::new();
    for n in 0..200_i64 {
        facts.push(Fact::new("edge", [Value::Integer(n), Value::Integer(n + 1)]));
    }
    let rules = vec![
        Rule::new(
            Predicate::new("reachable", [Term::var("x"), Term::var("y")]),
            [Predicate::new("edge", [Term::var("x"), Term::var("y")])],
            [],
        )
        .unwrap(),
        Rule::new(
            Predicate::new("reachable", [Term::var("x"), Term::var("z")]),
            [
                Predicate::new("reachable", [Term::var("x"), Term::var("y")]),
                Predicate::new("edge", [Term::var("y"), Term::var("z")]),
            ],
            [],
        )
        .unwrap(),
    ];
    let authority = Block {
        facts,
        rules,
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("edge")],
        ..Authorizer::default()
    };

    let tight = Limits {
        max_facts: 10_000_000,
        max_iterations: 10_000_000,
        max_time: Duration::from_millis(1),
        restrictions: BlockRestrictions::default(),
    };
    let result = Executor::new(tight)
        .authorize_with_timeout(authority, vec![], authorizer)
        .await;
    assert_eq!(result, Err(ExecutionError::Timeout));
}

#[tokio::test]
async fn test_async_wrapper_passes_success_through() {
    let authority = Block {
        facts: vec![fact("user", "alice")],
        ..Block::default()
    };
    let authorizer = Authorizer {
        policies: vec![allow("user")],
        ..Authorizer::default()
    };

    let success = executor()
        .authorize_with_timeout(authority, vec![], authorizer)
        .await
        .unwrap();
    assert_eq!(
        single_variable_value(&success.matched_allow_query.bindings, "x"),
        Some(Value::from("alice"))
    );
}
