//! Media-engine-agnostic adaptive streaming core: manifest processing,
//! segment indexing, bandwidth-aware representation selection, and the
//! per-content-type stream state machines a host player drives through a
//! [`coordinator::StreamCoordinator`].
//!
//! The host application supplies four small, `dyn`-safe capabilities —
//! [`fetch::Fetcher`], [`sink::MediaSink`], [`clock::Clock`], and
//! [`coordinator::ManifestFetcher`] — and owns the actual network stack,
//! media element, and scheduler. This crate owns none of those; it only
//! decides *what* to fetch, *when*, and at *what bitrate*.

pub mod abr;
pub mod bandwidth;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fetch;
pub mod language;
pub mod manifest;
pub mod segment;
pub mod sink;
pub mod stream;

pub use error::{Error, Result};
