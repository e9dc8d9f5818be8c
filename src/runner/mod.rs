//! Session runner: prompt queue, session state and process supervision.

mod queue;
mod session;
mod supervisor;

pub use queue::*;
pub use session::*;
pub use supervisor::*;
