//! 错误类型
//! Typed errors for collaborator calls and event sinks

use std::time::Duration;

use thiserror::Error;

/// 外部协作方 (OCR/人脸识别等) 调用失败
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// 服务暂不可用
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),

    /// 请求被拒绝 (输入无效等, 重试无意义)
    #[error("collaborator rejected request: {0}")]
    Rejected(String),

    #[error("collaborator i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    /// 仅暂时性故障值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Unavailable(_) | CollaboratorError::Timeout(_)
        )
    }
}

/// 持久化/上报失败
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink closed")]
    Closed,
}

/// 重试包装器的最终失败
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("non-retryable failure: {0}")]
    NonRetryable(E),
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// 取出最后一次的底层错误
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NonRetryable(e) => e,
        }
    }
}
