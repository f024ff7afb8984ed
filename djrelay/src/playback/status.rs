//! Status line and stream title for each committed state

use crate::listeners::ListenerSnapshot;
use crate::playback::context::PlaybackContext;
use djrelay_common::PlaybackState;

/// Text published for a committed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub status: String,
    pub stream_title: String,
}

/// Fallback name for streams without a title
pub const UNTITLED_STREAM: &str = "<untitled stream>";

fn queued_by(context: &PlaybackContext) -> String {
    match context.contributor() {
        Some(contributor) => contributor.to_string(),
        None => "auto-playlist".to_string(),
    }
}

pub fn describe(
    state: PlaybackState,
    context: Option<&PlaybackContext>,
    stream_name: &str,
    snapshot: &ListenerSnapshot,
) -> StatusText {
    let listeners = snapshot.listeners.len() + snapshot.anonymous;
    let (status, stream_title) = match (state, context) {
        (PlaybackState::Stopped, _) => ("Player is stopped".to_string(), "Awkward silence".to_string()),
        (PlaybackState::Waiting, _) => (
            "Waiting for the first listener".to_string(),
            "Hold on a second...".to_string(),
        ),
        (PlaybackState::Cooldown, _) => (
            "Waiting for DJs, automatic playlist will be initiated in a few seconds".to_string(),
            "Waiting for DJs".to_string(),
        ),
        (PlaybackState::Streaming, _) => (
            format!("Playing stream: {}, listeners {}", stream_name, listeners),
            stream_name.to_string(),
        ),
        (PlaybackState::Playing, Some(context)) => {
            let item = context.item();
            let by = queued_by(context);
            (
                format!(
                    "Playing: {} ({}:{:02}), queued by {}, hypes {}, skip votes {}, listeners {}",
                    item.title,
                    item.duration_secs / 60,
                    item.duration_secs % 60,
                    by,
                    context.hypes(),
                    context.skip_votes(),
                    listeners
                ),
                format!("{}, queued by {}", item.title, by),
            )
        }
        // Playing is only committed with a context; keep the title neutral otherwise
        (PlaybackState::Playing, None) => ("Playing".to_string(), "Hold on a second...".to_string()),
    };
    StatusText { status, stream_title }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentItem;
    use std::collections::HashSet;

    #[test]
    fn test_idle_states() {
        let snapshot = ListenerSnapshot::default();
        let stopped = describe(PlaybackState::Stopped, None, "", &snapshot);
        assert_eq!(stopped.status, "Player is stopped");
        assert_eq!(stopped.stream_title, "Awkward silence");
        let cooldown = describe(PlaybackState::Cooldown, None, "", &snapshot);
        assert_eq!(cooldown.stream_title, "Waiting for DJs");
    }

    #[test]
    fn test_playing_line() {
        let mut snapshot = ListenerSnapshot::default();
        snapshot.anonymous = 2;
        let mut context = PlaybackContext::new(
            ContentItem {
                content_id: None,
                title: "Night Drive".to_string(),
                duration_secs: 185,
                locator: "x".to_string(),
                contributor: None,
            },
            HashSet::new(),
        );
        let text = describe(PlaybackState::Playing, Some(&context), "", &snapshot);
        assert_eq!(
            text.status,
            "Playing: Night Drive (3:05), queued by auto-playlist, hypes 0, skip votes 0, listeners 2"
        );

        context.hype(7);
        context.vote(8);
        let text = describe(PlaybackState::Playing, Some(&context), "", &snapshot);
        assert!(text.status.contains("hypes 1, skip votes 1"), "{}", text.status);
        assert_eq!(text.stream_title, "Night Drive, queued by auto-playlist");
    }
}
