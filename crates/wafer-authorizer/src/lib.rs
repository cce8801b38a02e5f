//! Wafer Authorizer — 作用域 Datalog 授权状态机
//!
//! 在 wafer-datalog 的不动点核心之上实现承载令牌的授权判定：
//! 权威块与衰减块的信任分离、check 与 allow/deny policy 求值、
//! 资源上限与超时边界，以及授权成功后的事实查询。
//!
//! 密钥处理、签名验证与令牌序列化不在本 crate 内；调用方传入
//! 已解析的块与授权程序。

pub mod authorizer;
pub mod error;
pub mod policy;

pub use authorizer::{
    Authorizer, AuthorizationSuccess, Block, BlockRestrictions, Executor, Limits,
    REVOCATION_PREDICATE, single_variable_value, variable_values,
};
pub use error::{CheckOrigin, ExecutionError, FailedCheck};
pub use policy::{
    Check, InvalidPolicy, MatchedQuery, Policy, PolicyKind, PolicyVerdict, Query,
    evaluate_policies,
};
