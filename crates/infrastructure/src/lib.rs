pub mod backoff;
pub mod queue;
pub mod transport;

pub use backoff::{post_json_with_backoff, retry_with_backoff};
pub use queue::{QueueNode, SimpleQueue};
pub use transport::{DealerSocket, RouterSocket};
