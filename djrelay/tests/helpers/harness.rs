//! A running relay core without HTTP

use super::{FakeDecoder, MockContentProvider, RecordingNotifier};
use djrelay::audio::{FramePump, PumpSettings};
use djrelay::config::{InitialState, ListenerConfig};
use djrelay::content::PassthroughResolver;
use djrelay::listeners::{ListenerManager, ListenerSettings};
use djrelay::playback::{MetadataSink, Player, PlayerDeps, PlayerSettings};
use djrelay::SharedState;
use djrelay_common::PlaybackState;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Default wait for anything asynchronous in these tests
pub const WAIT: Duration = Duration::from_secs(5);

pub struct HarnessOptions {
    pub initial_state: InitialState,
    pub skip_ratio: f64,
    pub cooldown: Duration,
    pub content_retries: u32,
    pub metadata: Option<Arc<dyn MetadataSink>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            initial_state: InitialState::Stopped,
            skip_ratio: 0.5,
            cooldown: Duration::from_millis(50),
            content_retries: 3,
            metadata: None,
        }
    }
}

pub fn pump_settings() -> PumpSettings {
    PumpSettings {
        frame_len: 64,
        period: Duration::from_millis(5),
        backoff_ticks: 2,
        initial_gain: 1.0,
    }
}

pub struct Harness {
    pub state: Arc<SharedState>,
    pub listeners: Arc<ListenerManager>,
    pub provider: Arc<MockContentProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub decoder: Arc<FakeDecoder>,
    pub player: Player,
    pump: Option<FramePump>,
}

impl Harness {
    pub fn start(options: HarnessOptions) -> Self {
        let state = Arc::new(SharedState::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let listeners = Arc::new(ListenerManager::new(
            ListenerSettings::from(&ListenerConfig::default()),
            notifier.clone(),
        ));
        let provider = Arc::new(MockContentProvider::new());
        let decoder = Arc::new(FakeDecoder::new());

        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        let pump = FramePump::start(pump_settings(), events_tx).unwrap();

        let player = Player::start(
            PlayerDeps {
                state: Arc::clone(&state),
                listeners: Arc::clone(&listeners),
                provider: provider.clone(),
                resolver: Arc::new(PassthroughResolver),
                decoder: decoder.clone(),
                notifier: notifier.clone(),
                metadata: options.metadata,
                pump: pump.handle(),
            },
            PlayerSettings {
                initial_state: options.initial_state,
                skip_ratio: options.skip_ratio,
                cooldown: options.cooldown,
                content_retries: options.content_retries,
                cleanup_timeout: Duration::from_secs(1),
                input_frames: 8,
            },
            events_rx,
        );

        Self {
            state,
            listeners,
            provider,
            notifier,
            decoder,
            player,
            pump: Some(pump),
        }
    }

    pub async fn stop(mut self) {
        self.player.shutdown().await;
        if let Some(pump) = self.pump.take() {
            pump.shutdown();
        }
    }
}

/// Wait until the player commits `state`
pub async fn wait_for_state(rx: &mut watch::Receiver<PlaybackState>, state: PlaybackState) {
    tokio::time::timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("player never reached {}", state))
        .unwrap();
}

/// Poll `check` until it holds
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
