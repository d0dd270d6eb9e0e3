//! The pixmatch command server.
//!
//! A single-threaded readiness-driven loop multiplexes client connections
//! over a fixed slot table, frames one command per connection, and hands it
//! to the dispatcher. Long-running comparisons fork: the child inherits a
//! copy-on-write snapshot of the index, writes its reply, and exits, while
//! the parent stays responsive and reaps asynchronously. A crash in compare
//! code therefore cannot take the server down, and the index needs no
//! locking during a compare.

mod conn;
mod dispatch;
mod server;
mod state;

pub use dispatch::{DispatchOutcome, dispatch};
pub use server::Server;
pub use state::ServerState;
