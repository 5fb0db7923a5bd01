//! Overlay Navigation
//!
//! Single responsibility: Turn voice selections into location changes.
//!
//! The sink itself is supplied by the embedding application. `Navigator`
//! sits in front of it and drops requests for the location it is already at,
//! so a repeated VOICE_CHANNEL_SELECT or a query answer matching the last push
//! does not cause another navigation.

use tokio::sync::watch;
use tracing::{debug, info};

use super::protocol::VoiceSelection;

/// Receives the location the overlay should show.
pub trait NavigationSink: Send {
    fn set_location(&mut self, selection: &VoiceSelection);
}

/// Publishes the current overlay path on a watch channel.
pub struct WatchSink {
    tx: watch::Sender<Option<String>>,
}

impl WatchSink {
    pub fn new() -> (Self, watch::Receiver<Option<String>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl NavigationSink for WatchSink {
    fn set_location(&mut self, selection: &VoiceSelection) {
        // send_replace keeps working with no receivers left
        self.tx.send_replace(Some(selection.path()));
    }
}

/// Call-site idempotence in front of a `NavigationSink`.
pub struct Navigator {
    sink: Box<dyn NavigationSink>,
    current: Option<String>,
}

impl Navigator {
    pub fn new(sink: Box<dyn NavigationSink>) -> Self {
        Self {
            sink,
            current: None,
        }
    }

    /// Navigate to `selection` unless it is already the current location.
    ///
    /// Returns whether the sink was called.
    pub fn navigate(&mut self, selection: &VoiceSelection) -> bool {
        let path = selection.path();
        if self.current.as_deref() == Some(path.as_str()) {
            debug!(path = %path, "Already at location");
            return false;
        }

        info!(
            guild_id = %selection.guild_id,
            channel_id = %selection.channel_id,
            "Navigating overlay"
        );
        self.sink.set_location(selection);
        self.current = Some(path);
        true
    }

    /// Last path handed to the sink.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}
