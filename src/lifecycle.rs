use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Context};
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};

use crate::{
    action::{self, source_key, ActionHandler, MAX_SPEED, MIN_SPEED},
    adapter::SiteAdapter,
    dom::{Dom, ListenerId, MediaEventKind, NodeId, ObserveOptions, ObserverId, SharedDom},
    id_type,
    observer::{TreeEvent, SOURCE_ATTRIBUTES},
    overlay::{format_speed, format_volume, resolve_insertion, Overlay, OverlayAction},
    settings::{BindingAction, Settings, DEFAULT_FAST_SPEED},
    validator::{Eligibility, ElementValidator},
};

id_type!(ControllerId);

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub id: ControllerId,
    pub media: NodeId,
    pub overlay: Overlay,
    pub speed: f64,
    pub displayed_speed: String,
    pub displayed_volume: String,
    pub provisional: bool,
    subscriptions: Vec<(MediaEventKind, ListenerId)>,
    source_observer: ObserverId,
}

impl ControllerState {
    pub fn no_source(&self) -> bool {
        self.overlay.has_no_source()
    }

    fn show_speed(&mut self, dom: &mut Dom, rate: f64) {
        let text = format_speed(rate);
        if let Err(err) = self.overlay.set_speed_text(dom, &text) {
            warn!("Failed to update speed display of controller {}: {err:?}", self.id);
        }
        self.displayed_speed = text;
    }

    fn show_volume(&mut self, dom: &mut Dom, volume: f64) {
        let text = format_volume(volume);
        if let Err(err) = self.overlay.set_volume_text(dom, &text) {
            warn!("Failed to update volume display of controller {}: {err:?}", self.id);
        }
        self.displayed_volume = text;
    }

    fn sync_no_source(&mut self, dom: &mut Dom) -> anyhow::Result<()> {
        let no_source = dom.media_source(self.media).is_none();
        self.overlay.set_no_source(dom, no_source)
    }
}

pub struct ControllerLifecycle {
    dom: SharedDom,
    settings: Arc<Settings>,
    adapter: Arc<dyn SiteAdapter>,
    actions: Arc<dyn ActionHandler>,
    validator: ElementValidator,
    controllers: HashMap<NodeId, ControllerState>,
}

impl ControllerLifecycle {
    pub fn new(
        dom: SharedDom,
        settings: Arc<Settings>,
        adapter: Arc<dyn SiteAdapter>,
        actions: Arc<dyn ActionHandler>,
        validator: ElementValidator,
    ) -> Self {
        Self {
            dom,
            settings,
            adapter,
            actions,
            validator,
            controllers: HashMap::new(),
        }
    }

    pub fn get(&self, handle: NodeId) -> Option<&ControllerState> {
        self.controllers.get(&handle)
    }

    pub fn is_controlled(&self, handle: NodeId) -> bool {
        self.controllers.contains_key(&handle)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &ControllerState> {
        self.controllers.values()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    fn resolve_speed(&self, dom: &Dom, handle: NodeId) -> f64 {
        if !self.settings.flags().remember_speed {
            return 1.0;
        }
        source_key(dom, handle)
            .and_then(|key| self.settings.stored_speed(&key))
            .unwrap_or_else(|| self.settings.last_speed())
    }

    fn refresh_reset_binding(&self, target: f64) {
        let value = if self.settings.flags().remember_speed {
            target
        } else {
            self.settings
                .key_binding(BindingAction::Fast)
                .unwrap_or(DEFAULT_FAST_SPEED)
        };
        self.settings.set_key_binding(BindingAction::Reset, value);
    }

    pub fn create(
        &mut self,
        handle: NodeId,
        parent_hint: Option<NodeId>,
    ) -> anyhow::Result<&ControllerState> {
        if self.controllers.contains_key(&handle) {
            debug!("Media {handle} is already controlled");
            return Ok(&self.controllers[&handle]);
        }

        let dom = Arc::clone(&self.dom);
        let mut dom = dom.lock();
        let volume = dom
            .media(handle)
            .ok_or_else(|| anyhow!("Node {handle} is not a media element"))?
            .volume;

        let parent = parent_hint
            .or_else(|| dom.shadow_including_parent(handle))
            .ok_or_else(|| anyhow!("Media {handle} has no parent to attach a controller to"))?;
        let position = self.adapter.controller_position(&dom, parent, handle);
        let (target_parent, reference) = resolve_insertion(&dom, &position)
            .with_context(|| format!("Cannot place a controller for media {handle}"))?;

        let flags = self.settings.flags();
        let target = self.resolve_speed(&dom, handle);
        self.refresh_reset_binding(target);
        action::apply_rate(&mut dom, handle, target, flags.force_last_saved_speed)
            .context("Failed to apply initial speed")?;

        let id = ControllerId::new();
        let mut overlay = Overlay::build(
            &mut dom,
            &id.to_string(),
            self.settings.appearance(),
            flags.start_hidden,
        )?;
        if let Err(err) = overlay.insert(&mut dom, target_parent, reference) {
            overlay.detach(&mut dom);
            return Err(err);
        }

        let provisional = self.validator.check(&dom, handle) == Eligibility::Provisional;
        let mut kinds = vec![MediaEventKind::Play, MediaEventKind::Seeked];
        if provisional {
            kinds.push(MediaEventKind::LoadedMetadata);
        }
        let mut subscriptions = Vec::with_capacity(kinds.len());
        for kind in kinds {
            subscriptions.push((kind, dom.add_listener(handle, kind)?));
        }
        let source_observer = dom.observe(handle, ObserveOptions::attributes(&SOURCE_ATTRIBUTES))?;
        self.settings.track(handle);

        let no_source = dom.media_source(handle).is_none();
        overlay.set_no_source(&mut dom, no_source)?;
        let mut state = ControllerState {
            id,
            media: handle,
            overlay,
            speed: target,
            displayed_speed: String::new(),
            displayed_volume: String::new(),
            provisional,
            subscriptions,
            source_observer,
        };
        state.show_speed(&mut dom, target);
        state.show_volume(&mut dom, volume);
        info!(
            "Attached controller {id} to media {handle} at {}",
            state.displayed_speed
        );

        Ok(self.controllers.entry(handle).or_insert(state))
    }

    pub fn destroy(&mut self, handle: NodeId) {
        let Some(state) = self.controllers.remove(&handle) else {
            return;
        };
        let mut dom = self.dom.lock();
        state.overlay.detach(&mut dom);
        for (_, listener) in &state.subscriptions {
            dom.remove_listener(*listener);
        }
        dom.disconnect(state.source_observer);
        self.settings.untrack(handle);
        info!("Removed controller {} from media {handle}", state.id);
    }

    pub fn set_displayed_speed(&mut self, handle: NodeId, speed: f64) {
        let Some(state) = self.controllers.get_mut(&handle) else {
            return;
        };
        state.show_speed(&mut self.dom.lock(), speed);
    }

    pub fn set_displayed_volume(&mut self, handle: NodeId, volume: f64) {
        let Some(state) = self.controllers.get_mut(&handle) else {
            return;
        };
        state.show_volume(&mut self.dom.lock(), volume);
    }

    pub fn apply_speed(&mut self, handle: NodeId, rate: f64) -> anyhow::Result<()> {
        if !self.is_controlled(handle) {
            return Err(anyhow!("Media {handle} is not controlled"));
        }
        let applied = self.actions.set_speed(&mut self.dom.lock(), handle, rate)?;
        if let Some(state) = self.controllers.get_mut(&handle) {
            state.speed = applied;
        }
        self.set_displayed_speed(handle, applied);
        Ok(())
    }

    pub fn set_volume(&mut self, handle: NodeId, volume: f64) -> anyhow::Result<()> {
        if !self.is_controlled(handle) {
            return Err(anyhow!("Media {handle} is not controlled"));
        }
        self.dom.lock().set_volume(handle, volume)?;
        self.set_displayed_volume(handle, volume.clamp(0.0, 1.0));
        Ok(())
    }

    pub fn run_action(&mut self, handle: NodeId, action: OverlayAction) -> anyhow::Result<()> {
        // A forced speed is only announced, so the element's own rate can lag.
        let rate = self
            .get(handle)
            .map(|state| state.speed)
            .ok_or_else(|| anyhow!("Media {handle} is not controlled"))?;
        let settings = Arc::clone(&self.settings);
        let step = move |binding: BindingAction, default: f64| {
            settings.key_binding(binding).unwrap_or(default)
        };
        let time = self
            .dom
            .lock()
            .media(handle)
            .ok_or_else(|| anyhow!("Media {handle} no longer exists"))?
            .current_time;
        match action {
            OverlayAction::Slower => {
                let rate = (rate - step(BindingAction::Slower, 0.1)).max(MIN_SPEED);
                self.apply_speed(handle, rate)
            }
            OverlayAction::Faster => {
                let rate = (rate + step(BindingAction::Faster, 0.1)).min(MAX_SPEED);
                self.apply_speed(handle, rate)
            }
            OverlayAction::Rewind => {
                let time = time - step(BindingAction::Rewind, 10.0);
                self.dom.lock().set_current_time(handle, time)
            }
            OverlayAction::Advance => {
                let time = time + step(BindingAction::Advance, 10.0);
                self.dom.lock().set_current_time(handle, time)
            }
            OverlayAction::ToggleDisplay => {
                let dom = Arc::clone(&self.dom);
                let mut dom = dom.lock();
                let Some(state) = self.controllers.get_mut(&handle) else {
                    return Ok(());
                };
                let hidden = !state.overlay.is_hidden();
                state.overlay.set_hidden(&mut dom, hidden)
            }
        }
    }

    pub fn click(&mut self, button: NodeId) -> anyhow::Result<()> {
        let (handle, action) = self
            .controllers
            .values()
            .find_map(|state| Some((state.media, state.overlay.action_for(button)?)))
            .ok_or_else(|| anyhow!("Node {button} is not a controller button"))?;
        debug!("Clicked {} on controller of media {handle}", action.name());
        self.run_action(handle, action)
    }

    fn reapply_speed(&mut self, handle: NodeId) {
        if !self.is_controlled(handle) {
            return;
        }
        let remember = self.settings.flags().remember_speed;
        let rate = self.resolve_speed(&self.dom.lock(), handle);
        if !remember {
            self.refresh_reset_binding(rate);
        }
        debug!("Reapplying speed {rate} to media {handle}");
        if let Err(err) = self.apply_speed(handle, rate) {
            error!("Failed to reapply speed to media {handle}: {err:?}");
        }
    }

    fn source_changed(&mut self, handle: NodeId) {
        if !self.is_controlled(handle) {
            self.attach_if_eligible(handle);
            return;
        }
        let dom = Arc::clone(&self.dom);
        let mut dom = dom.lock();
        let Some(state) = self.controllers.get_mut(&handle) else {
            return;
        };
        if let Err(err) = state.sync_no_source(&mut dom) {
            warn!("Failed to update source state of media {handle}: {err:?}");
        }
        let still_provisional = state.provisional;
        drop(dom);
        if still_provisional {
            self.revalidate(handle);
        }
    }

    fn attach_if_eligible(&mut self, handle: NodeId) {
        let (eligibility, parent) = {
            let dom = self.dom.lock();
            if dom.media(handle).is_none() {
                return;
            }
            (
                self.validator.check(&dom, handle),
                dom.shadow_including_parent(handle),
            )
        };
        if eligibility.is_accepted() {
            if let Err(err) = self.create(handle, parent) {
                error!("Failed to attach controller to media {handle}: {err:?}");
            }
        }
    }

    fn revalidate(&mut self, handle: NodeId) {
        let eligibility = self.validator.check(&self.dom.lock(), handle);
        match eligibility {
            Eligibility::Rejected(reason) => {
                info!("Media {handle} no longer eligible ({reason:?})");
                self.destroy(handle);
            }
            Eligibility::Eligible => {
                let Some(state) = self.controllers.get_mut(&handle) else {
                    return;
                };
                state.provisional = false;
                let mut dom = self.dom.lock();
                state.subscriptions.retain(|(kind, listener)| {
                    if *kind == MediaEventKind::LoadedMetadata {
                        dom.remove_listener(*listener);
                        return false;
                    }
                    true
                });
            }
            Eligibility::Provisional => {}
        }
    }

    /// Destroys controllers whose media sat under a removed node and did not
    /// come back.
    fn remove_subtree(&mut self, root: NodeId) {
        let orphaned: Vec<NodeId> = {
            let dom = self.dom.lock();
            self.controllers
                .keys()
                .copied()
                .filter(|media| {
                    dom.is_host_including_inclusive_ancestor(root, *media)
                        && !dom.is_connected(*media)
                })
                .collect()
        };
        for media in orphaned {
            self.destroy(media);
        }
    }

    pub fn handle_event(&mut self, event: TreeEvent) {
        match event {
            TreeEvent::Added { handle, parent } => {
                if let Err(err) = self.create(handle, parent) {
                    error!("Failed to attach controller to media {handle}: {err:?}");
                }
            }
            TreeEvent::Removed { handle } => self.remove_subtree(handle),
            TreeEvent::AttributeChanged {
                handle, attribute, ..
            } => {
                if SOURCE_ATTRIBUTES.contains(&attribute.as_str()) {
                    self.source_changed(handle);
                }
            }
            TreeEvent::Media { handle, kind } => match kind {
                MediaEventKind::Play | MediaEventKind::Seeked => self.reapply_speed(handle),
                MediaEventKind::LoadedMetadata => self.revalidate(handle),
            },
        }
    }

    pub async fn run<S>(&mut self, mut events: S)
    where
        S: Stream<Item = TreeEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            self.handle_event(event);
        }
    }
}
