//! Component C — periodic per-display screenshot, perceptual-hash dedup,
//! metadata embedding, atomic write (`4.C`).

pub mod capture_loop;
pub mod capturer;
pub mod error;
pub mod hash;
pub mod metadata;
pub mod sidecar;

pub use capture_loop::{CaptureLoop, DisplayOutcome, TickReport, DEFAULT_HAMMING_THRESHOLD, DEFAULT_RECORD_INTERVAL_SECS};
pub use capturer::{ActiveContext, DisplayCapturer, DisplayId, SyntheticCapturer};
pub use error::{CaptureError, Result};
pub use metadata::CaptureMetadata;
