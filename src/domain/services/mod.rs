mod batcher;
mod decoder;
mod operation;
mod poller;
mod session;
mod timeout_guard;
mod transcript;

pub use batcher::*;
pub use decoder::*;
pub use operation::*;
pub use poller::*;
pub use session::*;
pub use timeout_guard::*;
pub use transcript::*;
