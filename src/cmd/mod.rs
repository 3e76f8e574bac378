//! CLI command implementations.
//!
//! | Module    | Commands handled            |
//! |-----------|-----------------------------|
//! | `run`     | `Run`                       |
//! | `session` | `Status`, `Reopen`, `Reset` |

pub mod run;
pub mod session;

pub use run::cmd_run;
pub use session::{cmd_reopen, cmd_reset, cmd_status};
