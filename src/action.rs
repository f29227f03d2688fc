use std::sync::Arc;

use crate::{
    dom::{Dom, NodeId},
    overlay::speed_label,
    settings::Settings,
    utils::normalize_source,
};

pub const MIN_SPEED: f64 = 0.07;
pub const MAX_SPEED: f64 = 16.0;

pub trait ActionHandler: Send + Sync {
    fn set_speed(&self, dom: &mut Dom, media: NodeId, rate: f64) -> anyhow::Result<f64>;
}

/// Assigns `rate`, or announces it with a synthetic `ratechange` event when
/// `force` is set.
pub fn apply_rate(dom: &mut Dom, media: NodeId, rate: f64, force: bool) -> anyhow::Result<()> {
    if force && rate != 1.0 {
        log::debug!("Announcing speed {rate} on {media}");
        dom.dispatch_synthetic_rate_change(media, speed_label(rate));
        return Ok(());
    }
    dom.set_playback_rate(media, rate)
}

pub fn source_key(dom: &Dom, media: NodeId) -> Option<String> {
    normalize_source(&dom.media_source(media)?)
}

pub struct RateActions {
    settings: Arc<Settings>,
}

impl RateActions {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }
}

impl ActionHandler for RateActions {
    fn set_speed(&self, dom: &mut Dom, media: NodeId, rate: f64) -> anyhow::Result<f64> {
        let rate = ((rate.clamp(MIN_SPEED, MAX_SPEED)) * 100.0).round() / 100.0;
        let flags = self.settings.flags();
        apply_rate(dom, media, rate, flags.force_last_saved_speed)?;

        self.settings.set_last_speed(rate);
        if flags.remember_speed {
            if let Some(key) = source_key(dom, media) {
                self.settings.store_speed(key, rate);
            }
        }
        Ok(rate)
    }
}
