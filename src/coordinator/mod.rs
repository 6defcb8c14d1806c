//! Pipeline lifecycle and cancellation coordination.
//!
//! # State machine
//!
//! ```text
//!             load                 ok
//! Unloaded ─────────▶ Loading ───────────▶ Loaded ◀──────────────┐
//!    ▲                   │                   │                   │
//!    └── cancel / fail ──┘                   │ execute           │ ok / fail / cancel
//!    ▲                                       ▼                   │
//!    │                                   Executing ──────────────┘
//!    └──────────── unload (from any state) ───────────────────────
//! ```
//!
//! One [`Coordinator`] exists per feature.  At most one pipeline handle and
//! at most one in-flight operation exist per coordinator.  [`CoordinatorFlags`]
//! are published through a `watch` channel on every transition.

pub mod machine;
pub mod selection;
pub mod state;

pub use machine::{Coordinator, CoordinatorError};
pub use selection::PipelineSelection;
pub use state::{ActiveScope, CoordinatorFlags, ScopeKind};
