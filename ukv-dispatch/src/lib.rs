//! # UnifiedKV Dispatch Core
//!
//! Purpose: Run command descriptors against a topology binding under the
//! Direct, Pipelined or Transactional strategy, and resolve batched results
//! in order when their session flushes.
//!
//! ## Design Principles
//! 1. **Descriptor Once, Strategy Anywhere**: A command is described by an
//!    executor and a converter; the strategy decides when each runs.
//! 2. **Explicit Sessions**: Batched strategies take the session as an
//!    argument; there is no ambient "current pipeline".
//! 3. **Typed Deferreds**: Pending results keep their native and public
//!    types until a session widens them to its result type.
//! 4. **Driver Agnostic**: The core only sees the `TopologyBinding` and
//!    `NativeBatch` traits.

mod binding;
mod converter;
mod deferred;
mod descriptor;
mod dispatcher;
mod executor;
mod pending;
mod session;

#[cfg(test)]
mod testing;

pub use binding::{Capabilities, NativeBatch, TopologyBinding, Unsupported};
pub use converter::Converter;
pub use deferred::Deferred;
pub use descriptor::{Command, Operation};
pub use dispatcher::{execute, run, Dispatcher, Outcome};
pub use executor::{Executor, Invocation};
pub use pending::{Completer, NativeResult, Pending};
pub use session::Session;
