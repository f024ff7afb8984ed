//! Outbound notices to the chat front end
//!
//! The relay only decides *what* to tell people; rendering and delivery
//! belong to the chat layer behind [`ChatNotifier`]. All calls are
//! fire-and-forget and must not block.

use djrelay_common::ListenerId;
use std::fmt;
use tracing::info;

/// Which inactivity policy a warning refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InactivityKind {
    Contributor,
    DirectStream,
    Token,
}

/// Everything the relay may say
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Contributor's source ran dry; they were taken out of the rotation
    SourceEmpty,
    /// One attempt to fetch content failed
    ContentSkipped { reason: String },
    /// Item flagged upstream (moderation log)
    ItemFlagged { item_id: u64, title: String, reason: String },
    /// Contributor dropped after repeated failures
    RemovedAfterRetries,
    InactivityWarning { kind: InactivityKind },
    InactivityRemoval { kind: InactivityKind },
    ActivityReset,
    /// Background selection found nothing eligible
    NothingEligible,
    SkippedByContributor,
    CommunitySkip,
    StreamUnavailable { reason: String },
    StreamEnded,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SourceEmpty => {
                write!(f, "Your playlist is empty. Please add more songs and rejoin the DJ queue.")
            }
            Notice::ContentSkipped { reason } => write!(f, "Song skipped: {}", reason),
            Notice::ItemFlagged { item_id, title, reason } => {
                write!(f, "Song [{}] {} was flagged: {}", item_id, title, reason)
            }
            Notice::RemovedAfterRetries => write!(f, "Please try to fix your playlist and rejoin the queue"),
            Notice::InactivityWarning { kind } => match kind {
                InactivityKind::Contributor => write!(
                    f,
                    "You're about to be removed from the DJ queue due to inactivity. Reply to prevent that."
                ),
                InactivityKind::DirectStream => write!(
                    f,
                    "You're about to be disconnected from the stream due to inactivity. Reply to prevent that."
                ),
                InactivityKind::Token => write!(f, "Your stream link is about to expire"),
            },
            Notice::InactivityRemoval { kind } => match kind {
                InactivityKind::Contributor => {
                    write!(f, "You have been removed from the DJ queue due to inactivity")
                }
                InactivityKind::DirectStream => {
                    write!(f, "You have been disconnected from the stream due to inactivity")
                }
                InactivityKind::Token => write!(f, "Your stream link has expired"),
            },
            Notice::ActivityReset => write!(f, "Your inactivity timer has been reset successfully"),
            Notice::NothingEligible => write!(
                f,
                "No suitable song found for automatic playlist. Join the DJ queue to play!"
            ),
            Notice::SkippedByContributor => write!(f, "Song skipped by the DJ"),
            Notice::CommunitySkip => write!(f, "Community voted to skip"),
            Notice::StreamUnavailable { reason } => {
                write!(f, "Failed to obtain stream information: {}", reason)
            }
            Notice::StreamEnded => write!(f, "Stream has ended"),
        }
    }
}

/// Chat-side delivery of notices and status
pub trait ChatNotifier: Send + Sync {
    /// Private message to one listener
    fn whisper(&self, listener: ListenerId, notice: Notice);

    /// Message in the shared channel
    fn announce(&self, notice: Notice);

    /// Message in the moderation log channel
    fn log(&self, notice: Notice);

    /// The status line changed
    fn status_changed(&self, status: &str);
}

/// Notifier that writes everything to the tracing log
///
/// Used by the standalone binary, where no chat front end is attached.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl ChatNotifier for LogNotifier {
    fn whisper(&self, listener: ListenerId, notice: Notice) {
        info!(target: "djrelay::chat", "to {}: {}", listener, notice);
    }

    fn announce(&self, notice: Notice) {
        info!(target: "djrelay::chat", "{}", notice);
    }

    fn log(&self, notice: Notice) {
        info!(target: "djrelay::chat", "[log] {}", notice);
    }

    fn status_changed(&self, status: &str) {
        info!(target: "djrelay::chat", "[status] {}", status);
    }
}
