use std::sync::Arc;

use anyhow::Context;
use futures::stream;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::{
    action::ActionHandler,
    adapter::SiteAdapter,
    dom::{Dom, NodeId, SharedDom},
    lifecycle::ControllerLifecycle,
    observer::{TreeEvent, TreeObserver},
    scanner::TreeScanner,
    settings::Settings,
    validator::{EligibilityConfig, ElementValidator},
};

const MAX_SETTLE_ROUNDS: usize = 64;

pub struct Watcher {
    dom: SharedDom,
    scanner: TreeScanner,
    validator: ElementValidator,
    observer: TreeObserver,
    lifecycle: ControllerLifecycle,
    event_tx: mpsc::UnboundedSender<TreeEvent>,
    event_rx: mpsc::UnboundedReceiver<TreeEvent>,
}

impl Watcher {
    pub fn new(
        dom: SharedDom,
        settings: Arc<Settings>,
        adapter: Arc<dyn SiteAdapter>,
        actions: Arc<dyn ActionHandler>,
        eligibility: EligibilityConfig,
    ) -> Self {
        let scanner = TreeScanner::new(Arc::clone(&adapter), settings.flags().audio_enabled);
        let validator = ElementValidator::new(Arc::clone(&adapter), eligibility);
        let observer = TreeObserver::new(scanner.clone(), validator.clone());
        let lifecycle = ControllerLifecycle::new(
            Arc::clone(&dom),
            settings,
            adapter,
            actions,
            validator.clone(),
        );
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            dom,
            scanner,
            validator,
            observer,
            lifecycle,
            event_tx,
            event_rx,
        }
    }

    pub fn lifecycle(&self) -> &ControllerLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut ControllerLifecycle {
        &mut self.lifecycle
    }

    pub fn observer(&self) -> &TreeObserver {
        &self.observer
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<TreeEvent> {
        self.event_tx.clone()
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        let dom = Arc::clone(&self.dom);
        let candidates = self.initial_candidates(&mut dom.lock());
        for (handle, parent) in candidates {
            if let Err(err) = self.lifecycle.create(handle, parent) {
                error!("Failed to attach controller to media {handle}: {err:?}");
            }
        }

        let mut dom = dom.lock();
        let root = dom.document();
        self.observer
            .activate(&mut dom, root)
            .context("Failed to start observing the page")?;
        info!(
            "Watching page with {} controller(s) and {} boundary root(s)",
            self.lifecycle.len(),
            self.observer.boundary_count()
        );
        Ok(())
    }

    fn initial_candidates(&mut self, dom: &mut Dom) -> Vec<(NodeId, Option<NodeId>)> {
        let root = dom.document();
        let found = self.scanner.scan_all(dom, root);
        for boundary in found.boundaries {
            self.observer.register_boundary(dom, boundary);
        }

        let mut candidates = Vec::new();
        for handle in found.media {
            let eligibility = self.validator.check(dom, handle);
            debug!("Initial scan found media {handle}: {eligibility:?}");
            if eligibility.is_accepted() {
                candidates.push((handle, dom.shadow_including_parent(handle)));
            }
        }
        candidates
    }

    /// Translates pending host deliveries onto the event channel. Returns
    /// the number of events queued.
    pub fn pump(&mut self) -> usize {
        let dom = Arc::clone(&self.dom);
        let mut dom = dom.lock();
        let deliveries = dom.take_deliveries();
        if deliveries.is_empty() {
            return 0;
        }
        let events = self.observer.translate(&mut dom, deliveries);
        let count = events.len();
        for event in events {
            if self.event_tx.send(event).is_err() {
                warn!("Event channel closed; dropping events");
                break;
            }
        }
        count
    }

    fn drain_events(&mut self) -> Vec<TreeEvent> {
        let mut events = Vec::new();
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    pub async fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_ROUNDS {
            self.pump();
            let events = self.drain_events();
            if events.is_empty() {
                return;
            }
            debug!("Handling {} event(s)", events.len());
            self.lifecycle.run(stream::iter(events)).await;
        }
        warn!("Page did not settle after {MAX_SETTLE_ROUNDS} rounds");
    }

    pub fn stop(&mut self) {
        self.observer.deactivate(&mut self.dom.lock());
        let handles: Vec<NodeId> = self.lifecycle.controllers().map(|c| c.media).collect();
        for handle in handles {
            self.lifecycle.destroy(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use crate::{
        action::RateActions,
        adapter::DefaultAdapter,
        dom::{MediaEventKind, Rect, ReadyState},
        settings::SettingsConfig,
    };

    use super::*;

    fn loaded_video(dom: &mut Dom, src: &str) -> NodeId {
        let video = dom.create_element("video");
        dom.set_attribute(video, "src", src).unwrap();
        dom.set_rect(
            video,
            Rect {
                width: 640.0,
                height: 360.0,
            },
        )
        .unwrap();
        dom.set_ready_state(video, ReadyState::HaveEnoughData).unwrap();
        video
    }

    fn watcher(dom: Dom, config: SettingsConfig) -> (SharedDom, Arc<Settings>, Watcher) {
        let dom = Arc::new(Mutex::new(dom));
        let settings = Arc::new(Settings::new(config));
        let watcher = Watcher::new(
            Arc::clone(&dom),
            Arc::clone(&settings),
            Arc::new(DefaultAdapter),
            Arc::new(RateActions::new(Arc::clone(&settings))),
            EligibilityConfig::default(),
        );
        (dom, settings, watcher)
    }

    #[tokio::test]
    async fn should_attach_to_media_present_at_start() {
        // given
        let mut dom = Dom::new();
        let document = dom.document();
        let host = dom.create_element("my-player");
        dom.append_child(document, host).unwrap();
        let shadow = dom.attach_shadow(host).unwrap();
        let video = loaded_video(&mut dom, "https://example.com/a.mp4");
        dom.append_child(shadow, video).unwrap();
        let (dom, settings, mut watcher) = watcher(dom, SettingsConfig::default());

        // when
        watcher.start().unwrap();
        watcher.settle().await;

        // then
        assert!(watcher.lifecycle().is_controlled(video));
        assert!(watcher.observer().is_observing(shadow));
        assert_eq!(settings.tracked_count(), 1);
        let wrapper = watcher.lifecycle().get(video).unwrap().overlay.wrapper;
        assert_eq!(dom.lock().first_child(shadow), Some(wrapper));
    }

    #[tokio::test]
    async fn should_follow_insertions_and_removals() {
        // given
        let (dom, settings, mut watcher) = watcher(Dom::new(), SettingsConfig::default());
        watcher.start().unwrap();
        let (container, video) = {
            let mut dom = dom.lock();
            let document = dom.document();
            let container = dom.create_element("div");
            let video = loaded_video(&mut dom, "https://example.com/a.mp4");
            dom.append_child(container, video).unwrap();
            dom.append_child(document, container).unwrap();
            (container, video)
        };

        // when
        watcher.settle().await;

        // then
        assert!(watcher.lifecycle().is_controlled(video));

        // when
        dom.lock().remove(container).unwrap();
        watcher.settle().await;

        // then
        assert!(watcher.lifecycle().is_empty());
        assert_eq!(settings.tracked_count(), 0);
        assert_eq!(dom.lock().listener_count(video), 0);
    }

    #[tokio::test]
    async fn should_follow_media_inside_frame_documents() {
        // given
        let mut dom = Dom::new();
        let document = dom.document();
        let frame = dom.create_element("iframe");
        let frame_document = dom.attach_frame_document(frame).unwrap();
        dom.append_child(document, frame).unwrap();
        let (dom, settings, mut watcher) = watcher(dom, SettingsConfig::default());
        watcher.start().unwrap();
        assert!(watcher.observer().is_observing(frame_document));

        // when
        let video = {
            let mut dom = dom.lock();
            let video = loaded_video(&mut dom, "https://example.com/a.mp4");
            dom.append_child(frame_document, video).unwrap();
            video
        };
        watcher.settle().await;

        // then
        assert!(watcher.lifecycle().is_controlled(video));
        let wrapper = watcher.lifecycle().get(video).unwrap().overlay.wrapper;
        assert_eq!(dom.lock().first_child(frame_document), Some(wrapper));

        // when
        dom.lock().remove(frame).unwrap();
        watcher.settle().await;

        // then
        assert!(watcher.lifecycle().is_empty());
        assert!(!watcher.observer().is_observing(frame_document));
        assert_eq!(settings.tracked_count(), 0);
    }

    #[tokio::test]
    async fn should_reapply_remembered_speed_on_play() {
        // given
        let mut dom = Dom::new();
        let video = loaded_video(&mut dom, "https://example.com/a.mp4");
        dom.append_child(dom.document(), video).unwrap();
        let (dom, settings, mut watcher) = watcher(
            dom,
            SettingsConfig {
                remember_speed: true,
                ..SettingsConfig::default()
            },
        );
        watcher.start().unwrap();

        // when
        settings.store_speed("https://example.com/a.mp4".to_string(), 1.25);
        dom.lock().play(video).unwrap();
        watcher.settle().await;

        // then
        assert_eq!(dom.lock().media(video).unwrap().playback_rate, 1.25);
        assert_eq!(
            watcher.lifecycle().get(video).unwrap().displayed_speed,
            "1.3x"
        );
    }

    #[tokio::test]
    async fn should_handle_events_sent_from_outside() {
        // given
        let mut dom = Dom::new();
        let video = loaded_video(&mut dom, "https://example.com/a.mp4");
        dom.append_child(dom.document(), video).unwrap();
        let (dom, _, mut watcher) = watcher(dom, SettingsConfig::default());
        watcher.start().unwrap();
        dom.lock().set_playback_rate(video, 3.0).unwrap();

        // when
        watcher
            .sender()
            .send(TreeEvent::Media {
                handle: video,
                kind: MediaEventKind::Seeked,
            })
            .unwrap();
        watcher.settle().await;

        // then
        assert_eq!(dom.lock().media(video).unwrap().playback_rate, 1.0);
    }

    #[tokio::test]
    async fn should_attach_once_provisional_media_becomes_visible() {
        // given
        let mut dom = Dom::new();
        let video = dom.create_element("video");
        dom.append_child(dom.document(), video).unwrap();
        let (dom, _, mut watcher) = watcher(dom, SettingsConfig::default());
        watcher.start().unwrap();
        assert!(watcher.lifecycle().get(video).unwrap().provisional);

        // when
        {
            let mut dom = dom.lock();
            dom.set_rect(
                video,
                Rect {
                    width: 320.0,
                    height: 180.0,
                },
            )
            .unwrap();
            dom.set_ready_state(video, ReadyState::HaveMetadata).unwrap();
        }
        watcher.settle().await;

        // then
        let state = watcher.lifecycle().get(video).unwrap();
        assert!(!state.provisional);
        assert_eq!(dom.lock().listener_count(video), 2);
    }

    #[tokio::test]
    async fn should_release_everything_on_stop() {
        // given
        let mut dom = Dom::new();
        let video = loaded_video(&mut dom, "https://example.com/a.mp4");
        dom.append_child(dom.document(), video).unwrap();
        let (dom, settings, mut watcher) = watcher(dom, SettingsConfig::default());
        watcher.start().unwrap();

        // when
        watcher.stop();

        // then
        assert!(watcher.lifecycle().is_empty());
        assert_eq!(settings.tracked_count(), 0);
        assert_eq!(dom.lock().observer_count(), 0);
    }
}
