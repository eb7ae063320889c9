//! An explicit event bus collaborator.
//!
//! Rather than an inheritance hierarchy of event-emitting base types, any
//! component that needs to publish wraps a `broadcast::Sender<Event>` and
//! subscribers register by event kind via pattern matching on the enum.

use crate::error::FetchStatus;
use crate::manifest::{ContentType, StreamInfo};

/// User-visible and internal events produced by the streaming core.
#[derive(Debug, Clone)]
pub enum Event {
	/// A user-visible failure.
	Error { kind: ErrorKind, message: String },

	/// Forwarded by each `Stream` once its first segment has appended.
	Started { content_type: ContentType, timestamp_correction: f64 },

	/// A `Stream` reached its terminal, static end-of-stream state.
	Ended { content_type: ContentType },

	/// An ABR switch completed.
	Adaptation { content_type: ContentType, new_info: StreamInfo },

	/// Track selection or restrictions changed the eligible set.
	TracksChanged,
}

/// The failure taxonomy attached to [`Event::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	AlreadyLoaded,
	NotLoaded,
	ManifestEmpty,
	ManifestIncompatible,
	UnsupportedMedia,
	StreamFetch,
	StreamsNotAvailable,
	NoPlayableStream,
	AppendFailed,
}

impl Event {
	pub fn stream_fetch(content_type: ContentType, status: FetchStatus) -> Self {
		Event::Error {
			kind: ErrorKind::StreamFetch,
			message: format!("{content_type:?}: {status}"),
		}
	}
}

/// A broadcast bus of [`Event`]s. Cloning an [`EventBus`] shares the same
/// underlying channel; every clone can publish, every subscriber gets every
/// event published after it subscribed.
#[derive(Clone)]
pub struct EventBus {
	sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
	pub fn new() -> Self {
		let (sender, _) = tokio::sync::broadcast::channel(256);
		Self { sender }
	}

	pub fn publish(&self, event: Event) {
		// No subscribers is not an error; the event is simply dropped.
		let _ = self.sender.send(event);
	}

	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}
