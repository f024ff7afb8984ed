//! Content selection for the Playing entry action

use crate::content::{ContentItem, ContentProvider};
use crate::error::ContentError;
use crate::listeners::ListenerManager;
use crate::notify::{ChatNotifier, Notice};
use djrelay_common::ListenerId;
use tracing::{debug, info, warn};

/// Collaborators consulted while picking the next item
pub struct Selector<'a> {
    pub provider: &'a dyn ContentProvider,
    pub listeners: &'a ListenerManager,
    pub notifier: &'a dyn ChatNotifier,
    /// Attempts per contributor
    pub retries: u32,
}

impl Selector<'_> {
    /// Walk the rotation until some contributor yields an item
    ///
    /// Every contributor that yields nothing is removed from the rotation, so
    /// this terminates once the queue is drained.
    pub async fn contributor_item(&self) -> Option<ContentItem> {
        while let Some(contributor) = self.listeners.next_contributor().await {
            if let Some(item) = self.item_for(contributor).await {
                return Some(item);
            }
        }
        None
    }

    async fn item_for(&self, contributor: ListenerId) -> Option<ContentItem> {
        for attempt in 1..=self.retries {
            match self.provider.next_item_for(contributor).await {
                Ok(item) => {
                    debug!("Contributor {} supplied {:?} on attempt {}", contributor, item.title, attempt);
                    return Some(item);
                }
                Err(ContentError::Empty) => {
                    info!("Contributor {} has nothing left to play", contributor);
                    self.listeners.remove_from_queue(contributor).await;
                    self.notifier.whisper(contributor, Notice::SourceEmpty);
                    return None;
                }
                Err(ContentError::Unavailable { reason }) => {
                    self.notifier.announce(Notice::ContentSkipped { reason });
                }
                Err(ContentError::Flagged { item_id, title, reason }) => {
                    self.notifier.whisper(
                        contributor,
                        Notice::ContentSkipped { reason: format!("{} was flagged: {}", title, reason) },
                    );
                    self.notifier.log(Notice::ItemFlagged { item_id, title, reason });
                }
                Err(ContentError::Provider(e)) => {
                    warn!("Content provider failed for contributor {}: {}", contributor, e);
                    self.notifier.announce(Notice::ContentSkipped { reason: e });
                }
            }
        }

        info!("Contributor {} removed after {} failed attempts", contributor, self.retries);
        self.listeners.remove_from_queue(contributor).await;
        self.notifier.whisper(contributor, Notice::RemovedAfterRetries);
        None
    }

    /// Ask for a background item; flagged picks are logged and retried
    pub async fn background_item(&self) -> Option<ContentItem> {
        for _ in 0..self.retries {
            match self.provider.next_background_item().await {
                Ok(item) => return item,
                Err(ContentError::Flagged { item_id, title, reason }) => {
                    self.notifier.log(Notice::ItemFlagged { item_id, title, reason });
                }
                Err(e) => warn!("Background selection failed: {}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::content::PlaybackSummary;
    use crate::listeners::ListenerSettings;
    use async_trait::async_trait;
    use djrelay_common::ListenerMode;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Script {
        answers: Mutex<HashMap<ListenerId, VecDeque<Result<ContentItem, ContentError>>>>,
    }

    #[async_trait]
    impl ContentProvider for Script {
        async fn next_item_for(&self, contributor: ListenerId) -> Result<ContentItem, ContentError> {
            self.answers
                .lock()
                .unwrap()
                .get_mut(&contributor)
                .and_then(|answers| answers.pop_front())
                .unwrap_or(Err(ContentError::Empty))
        }

        async fn next_background_item(&self) -> Result<Option<ContentItem>, ContentError> {
            Ok(None)
        }

        async fn record_stats(&self, _summary: PlaybackSummary) -> Result<(), ContentError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Notes {
        whispers: Mutex<Vec<(ListenerId, Notice)>>,
        announcements: Mutex<Vec<Notice>>,
    }

    impl ChatNotifier for Notes {
        fn whisper(&self, listener: ListenerId, notice: Notice) {
            self.whispers.lock().unwrap().push((listener, notice));
        }
        fn announce(&self, notice: Notice) {
            self.announcements.lock().unwrap().push(notice);
        }
        fn log(&self, _notice: Notice) {}
        fn status_changed(&self, _status: &str) {}
    }

    fn track(contributor: ListenerId) -> ContentItem {
        ContentItem {
            content_id: Some(contributor * 10),
            title: format!("Track of {}", contributor),
            duration_secs: 120,
            locator: "/dev/null".to_string(),
            contributor: Some(contributor),
        }
    }

    fn unavailable() -> Result<ContentItem, ContentError> {
        Err(ContentError::Unavailable { reason: "download failed".to_string() })
    }

    async fn queue(ids: &[ListenerId], notes: Arc<Notes>) -> ListenerManager {
        let manager = ListenerManager::new(ListenerSettings::from(&ListenerConfig::default()), notes);
        for id in ids {
            manager.add_listener(*id, ListenerMode::Voice).await;
            manager.join_queue(*id).await.unwrap();
        }
        manager
    }

    #[tokio::test]
    async fn test_empty_source_moves_on_to_next_contributor() {
        let notes = Arc::new(Notes::default());
        let manager = queue(&[1, 2], notes.clone()).await;
        let script = Script::default();
        script.answers.lock().unwrap().insert(2, VecDeque::from([Ok(track(2))]));

        let selector = Selector {
            provider: &script,
            listeners: &manager,
            notifier: notes.as_ref(),
            retries: 3,
        };
        assert_eq!(selector.contributor_item().await, Some(track(2)));
        assert_eq!(manager.snapshot().await.queue, vec![2]);
        assert_eq!(*notes.whispers.lock().unwrap(), vec![(1, Notice::SourceEmpty)]);
    }

    #[tokio::test]
    async fn test_retry_budget_then_removal() {
        let notes = Arc::new(Notes::default());
        let manager = queue(&[1], notes.clone()).await;
        let script = Script::default();
        script
            .answers
            .lock()
            .unwrap()
            .insert(1, VecDeque::from([unavailable(), unavailable(), unavailable(), Ok(track(1))]));

        let selector = Selector {
            provider: &script,
            listeners: &manager,
            notifier: notes.as_ref(),
            retries: 3,
        };
        assert_eq!(selector.contributor_item().await, None);
        assert!(manager.snapshot().await.queue.is_empty());
        assert_eq!(notes.announcements.lock().unwrap().len(), 3);
        assert_eq!(*notes.whispers.lock().unwrap(), vec![(1, Notice::RemovedAfterRetries)]);
    }

    #[tokio::test]
    async fn test_success_within_budget_keeps_contributor() {
        let notes = Arc::new(Notes::default());
        let manager = queue(&[1], notes.clone()).await;
        let script = Script::default();
        script
            .answers
            .lock()
            .unwrap()
            .insert(1, VecDeque::from([unavailable(), unavailable(), Ok(track(1))]));

        let selector = Selector {
            provider: &script,
            listeners: &manager,
            notifier: notes.as_ref(),
            retries: 3,
        };
        assert_eq!(selector.contributor_item().await, Some(track(1)));
        assert_eq!(manager.snapshot().await.queue, vec![1]);
        assert!(notes.whispers.lock().unwrap().is_empty());
    }
}
