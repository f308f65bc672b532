//! Session handle contract consumed by the dispatch engine, plus the target resolver that
//! ranks the conversations a session can reach.

pub mod handle;
pub mod resolver;

pub use handle::{SessionError, SessionFuture, SessionHandle, ThreadRecord};
pub use resolver::{TargetResolver, TargetSummary, DEFAULT_RESOLVER_LIMIT};
