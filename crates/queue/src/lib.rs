pub mod queue;
pub mod transitions;

pub use queue::JobQueue;
