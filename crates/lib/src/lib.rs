//! ohook-lib: reproducible build orchestration for the ohook sppc DLLs
//!
//! The pipeline fetches a pinned source snapshot and two MinGW toolchains,
//! stages them where the upstream build expects them, holds the host clock
//! at a fixed instant while compiling, and accepts the result only when it
//! matches known-good SHA-256 digests:
//! - `fetch`: downloads with bounded retry and atomic placement
//! - `stage`: archive extraction and promotion into the layout
//! - `link`: fixed-path directory indirections
//! - `clock`: deterministic clock pinning
//! - `invoke`: build tool execution
//! - `verify`: output checksum verification
//! - `pipeline`: the ordered, failure-aware run with guaranteed cleanup

pub mod clock;
pub mod config;
pub mod consts;
pub mod error;
pub mod fetch;
pub mod invoke;
pub mod layout;
pub mod link;
pub mod pipeline;
pub mod platform;
pub mod stage;
pub mod status;
pub mod util;
pub mod verify;
