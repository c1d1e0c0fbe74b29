/// 身份识别会话 (Identity sessions)
///
/// - session:  基于空间邻近的身份会话延续
/// - dedup:    按身份的重复事件抑制
/// - registry: 跨流共享, 单锁保护的登记表
pub mod dedup;
pub mod registry;
pub mod session;

pub use dedup::{DedupOutcome, DuplicateSuppressor};
pub use registry::{IdentityRegistry, IdentityStatistics};
pub use session::{IdentitySession, IdentitySessionCache};
