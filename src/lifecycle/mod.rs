//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Build chain registry → Load directory snapshot → Serve
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C received → Stop accepting → Drain in-flight requests
//!     → Stop config watcher → Save directory snapshot → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Pending ceremonies are dropped on shutdown, which releases their account locks

pub mod shutdown;

pub use shutdown::Shutdown;
