//! The error taxonomy for the streaming core.
//!
//! Every fallible operation in this crate returns [`Result`], a thin alias
//! over [`Error`]. Variants line up one-to-one with the error kinds the
//! coordinator and streams are required to surface.

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the streaming core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// A fetch or operation was cancelled; callers must swallow this, never
	/// surface it to the user.
	#[error("aborted")]
	Aborted,

	/// `load` was called on a coordinator that already loaded a manifest.
	#[error("already loaded")]
	AlreadyLoaded,

	/// An operation that requires a loaded manifest was called before `load`.
	#[error("not loaded")]
	NotLoaded,

	/// The manifest processor found no playable period after filtering.
	#[error("manifest has no playable stream sets")]
	ManifestEmpty,

	/// A live manifest update was incompatible with the manifest it replaces.
	#[error("incompatible manifest update: {reason}")]
	ManifestIncompatible { reason: String },

	/// The media sink's type-support predicate rejected every candidate.
	#[error("no supported media type in manifest")]
	UnsupportedMedia,

	/// A segment fetch failed after exhausting retries.
	#[error("segment fetch failed: {status}")]
	StreamFetch { status: FetchStatus },

	/// The selected representations produce a disjoint or empty play window.
	#[error("no common play window across selected streams")]
	StreamsNotAvailable,

	/// Restrictions excluded every representation for some content type.
	#[error("restrictions left no playable stream")]
	NoPlayableStream,

	/// The media sink rejected appended bytes.
	#[error("append to media sink failed: {reason}")]
	AppendFailed { reason: String },

	/// The coordinator has been destroyed; every further call is a no-op or
	/// returns this variant (invariant 5).
	#[error("coordinator destroyed")]
	Destroyed,

	/// Transparent wrapping for manifest/catalog JSON handling.
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

/// The reason a segment or manifest fetch ultimately failed, after retries.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchStatus {
	#[error("timed out")]
	Timeout,
	#[error("network error: {0}")]
	Network(String),
	#[error("http {0}")]
	Http(u16),
}
