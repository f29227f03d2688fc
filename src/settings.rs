use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::{dom::NodeId, utils::normalize_source};

pub const DEFAULT_FAST_SPEED: f64 = 1.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingAction {
    Slower,
    Faster,
    Rewind,
    Advance,
    Reset,
    Fast,
    Display,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeyBinding {
    pub action: BindingAction,

    #[serde(default)]
    pub key: u32,

    pub value: f64,
}

impl KeyBinding {
    const fn new(action: BindingAction, key: u32, value: f64) -> Self {
        Self { action, key, value }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub remember_speed: bool,
    pub force_last_saved_speed: bool,
    pub audio_enabled: bool,
    pub start_hidden: bool,
    pub last_speed: f64,
    pub controller_opacity: f64,
    pub controller_button_size: u32,
    pub speeds: HashMap<String, f64>,
    pub key_bindings: Vec<KeyBinding>,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            remember_speed: false,
            force_last_saved_speed: false,
            audio_enabled: false,
            start_hidden: false,
            last_speed: 1.0,
            controller_opacity: 0.3,
            controller_button_size: 14,
            speeds: HashMap::new(),
            key_bindings: vec![
                KeyBinding::new(BindingAction::Slower, 83, 0.1),
                KeyBinding::new(BindingAction::Faster, 68, 0.1),
                KeyBinding::new(BindingAction::Rewind, 90, 10.0),
                KeyBinding::new(BindingAction::Advance, 88, 10.0),
                KeyBinding::new(BindingAction::Reset, 82, 1.0),
                KeyBinding::new(BindingAction::Fast, 71, DEFAULT_FAST_SPEED),
                KeyBinding::new(BindingAction::Display, 86, 0.0),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub remember_speed: bool,
    pub force_last_saved_speed: bool,
    pub audio_enabled: bool,
    pub start_hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Appearance {
    pub opacity: f64,
    pub button_size: u32,
}

#[derive(Debug)]
pub struct Settings {
    state: RwLock<SettingsConfig>,
    tracked: Mutex<HashSet<NodeId>>,
}

impl Settings {
    pub fn new(mut config: SettingsConfig) -> Self {
        config.speeds = config
            .speeds
            .into_iter()
            .filter_map(|(source, speed)| Some((normalize_source(&source)?, speed)))
            .collect();
        Self {
            state: RwLock::new(config),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    pub fn flags(&self) -> Flags {
        let state = self.state.read();
        Flags {
            remember_speed: state.remember_speed,
            force_last_saved_speed: state.force_last_saved_speed,
            audio_enabled: state.audio_enabled,
            start_hidden: state.start_hidden,
        }
    }

    pub fn appearance(&self) -> Appearance {
        let state = self.state.read();
        Appearance {
            opacity: state.controller_opacity,
            button_size: state.controller_button_size,
        }
    }

    pub fn stored_speed(&self, source_key: &str) -> Option<f64> {
        self.state.read().speeds.get(source_key).copied()
    }

    pub fn store_speed(&self, source_key: String, speed: f64) {
        self.state.write().speeds.insert(source_key, speed);
    }

    pub fn last_speed(&self) -> f64 {
        self.state.read().last_speed
    }

    pub fn set_last_speed(&self, speed: f64) {
        self.state.write().last_speed = speed;
    }

    pub fn key_binding(&self, action: BindingAction) -> Option<f64> {
        self.state
            .read()
            .key_bindings
            .iter()
            .find(|binding| binding.action == action)
            .map(|binding| binding.value)
    }

    pub fn set_key_binding(&self, action: BindingAction, value: f64) {
        let mut state = self.state.write();
        if let Some(binding) = state
            .key_bindings
            .iter_mut()
            .find(|binding| binding.action == action)
        {
            binding.value = value;
            return;
        }
        state.key_bindings.push(KeyBinding::new(action, 0, value));
    }

    pub fn track(&self, media: NodeId) {
        self.tracked.lock().insert(media);
    }

    pub fn untrack(&self, media: NodeId) {
        self.tracked.lock().remove(&media);
    }

    pub fn is_tracked(&self, media: NodeId) -> bool {
        self.tracked.lock().contains(&media)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(SettingsConfig::default())
    }
}
