// ukv-common - Shared vocabulary for UnifiedKV
//
// Error taxonomy, protocol command identifiers, and the public result values
// shared by the dispatch core and the client facade.

pub mod command;
pub mod error;
pub mod types;

// Re-export for convenience
pub use command::*;
pub use error::*;
pub use types::*;
