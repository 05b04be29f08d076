mod completion;
mod message;
mod record;

pub use completion::Completion;
pub use message::{Request, Response, RetryReason};
pub use record::{Outcome, RequestRecord};
