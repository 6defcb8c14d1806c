//! Lifecycle coordination for heavyweight generative-media pipelines.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   Load(selection)   ┌──────────────────────────┐
//! │    Caller    │────────────────────▶│   Coordinator<Feature>   │
//! │ (CLI / UI)   │   Execute(request)  │ - flags (watch)          │
//! │              │────────────────────▶│ - active scope (token)   │
//! │              │   Cancel / Unload   │ - loaded handle          │
//! └──────┬───────┘                     └──────┬─────────┬─────────┘
//!        │ result                             │         │
//!        ▼                                    ▼         ▼
//! ┌──────────────┐                 ┌──────────────┐ ┌──────────────┐
//! │   History    │                 │PipelineFactory│ │DeviceResolver│
//! └──────────────┘                 └──────┬───────┘ └──────────────┘
//!                                         ▼
//!                              ┌─────────────────────┐
//!                              │ Pipeline (Whisper,  │
//!                              │ diffusion, speech…) │
//!                              └─────────────────────┘
//! ```
//!
//! Each feature ([`features::Diffusion`], [`features::Narrate`],
//! [`features::Transcribe`]) gets its own [`coordinator::Coordinator`]
//! instance; they share nothing but the read-only [`device::DeviceResolver`].

pub mod audio;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod features;
pub mod history;
pub mod pipeline;
pub mod tensor;
