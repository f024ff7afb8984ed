//! Scripted content provider and recording notifier

use async_trait::async_trait;
use djrelay::content::{ContentItem, ContentProvider, PlaybackSummary};
use djrelay::notify::{ChatNotifier, Notice};
use djrelay::ContentError;
use djrelay_common::ListenerId;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::{Notify, RwLock};

/// Build a test item
pub fn item(id: u64, title: &str, contributor: Option<ListenerId>) -> ContentItem {
    ContentItem {
        content_id: Some(id),
        title: title.to_string(),
        duration_secs: 180,
        locator: format!("mem://{}", id),
        contributor,
    }
}

/// Content provider answering from per-contributor scripts
///
/// An exhausted script answers `Empty`. Holding [`MockContentProvider::gate`]
/// for writing blocks every contributor request inside the provider.
#[derive(Default)]
pub struct MockContentProvider {
    scripts: Mutex<HashMap<ListenerId, VecDeque<Result<ContentItem, ContentError>>>>,
    background: Mutex<Option<ContentItem>>,
    requests: Mutex<Vec<ListenerId>>,
    recorded: Mutex<Vec<PlaybackSummary>>,
    pub gate: RwLock<()>,
    pub entered: Notify,
}

impl MockContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, contributor: ListenerId, results: Vec<Result<ContentItem, ContentError>>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(contributor)
            .or_default()
            .extend(results);
    }

    pub fn set_background(&self, item: Option<ContentItem>) {
        *self.background.lock().unwrap() = item;
    }

    /// Contributors asked for content, in order
    pub fn requests(&self) -> Vec<ListenerId> {
        self.requests.lock().unwrap().clone()
    }

    pub fn recorded(&self) -> Vec<PlaybackSummary> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentProvider for MockContentProvider {
    async fn next_item_for(&self, contributor: ListenerId) -> Result<ContentItem, ContentError> {
        self.entered.notify_one();
        let _open = self.gate.read().await;
        self.requests.lock().unwrap().push(contributor);
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&contributor)
            .and_then(|script| script.pop_front())
            .unwrap_or(Err(ContentError::Empty))
    }

    async fn next_background_item(&self) -> Result<Option<ContentItem>, ContentError> {
        Ok(self.background.lock().unwrap().clone())
    }

    async fn record_stats(&self, summary: PlaybackSummary) -> Result<(), ContentError> {
        self.recorded.lock().unwrap().push(summary);
        Ok(())
    }
}

/// A captured notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Said {
    Whisper(ListenerId, Notice),
    Announce(Notice),
    Log(Notice),
    Status(String),
}

#[derive(Default)]
pub struct RecordingNotifier {
    said: Mutex<Vec<Said>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Said> {
        self.said.lock().unwrap().clone()
    }

    pub fn whispers_to(&self, listener: ListenerId) -> Vec<Notice> {
        self.all()
            .into_iter()
            .filter_map(|said| match said {
                Said::Whisper(to, notice) if to == listener => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn announcements(&self) -> Vec<Notice> {
        self.all()
            .into_iter()
            .filter_map(|said| match said {
                Said::Announce(notice) => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|said| match said {
                Said::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }
}

impl ChatNotifier for RecordingNotifier {
    fn whisper(&self, listener: ListenerId, notice: Notice) {
        self.said.lock().unwrap().push(Said::Whisper(listener, notice));
    }

    fn announce(&self, notice: Notice) {
        self.said.lock().unwrap().push(Said::Announce(notice));
    }

    fn log(&self, notice: Notice) {
        self.said.lock().unwrap().push(Said::Log(notice));
    }

    fn status_changed(&self, status: &str) {
        self.said.lock().unwrap().push(Said::Status(status.to_string()));
    }
}
