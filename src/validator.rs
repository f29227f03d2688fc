use std::sync::Arc;

use serde::Deserialize;

use crate::{
    adapter::SiteAdapter,
    dom::{Dom, NodeId, ReadyState},
};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EligibilityConfig {
    pub min_width: f64,
    pub min_height: f64,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            min_width: 40.0,
            min_height: 40.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotMedia,
    Disconnected,
    Hidden,
    TooSmall,
    Excluded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Provisional,
    Rejected(Rejection),
}

impl Eligibility {
    pub fn is_accepted(self) -> bool {
        !matches!(self, Eligibility::Rejected(_))
    }
}

#[derive(Clone)]
pub struct ElementValidator {
    adapter: Arc<dyn SiteAdapter>,
    config: EligibilityConfig,
}

impl ElementValidator {
    pub fn new(adapter: Arc<dyn SiteAdapter>, config: EligibilityConfig) -> Self {
        Self { adapter, config }
    }

    pub fn check(&self, dom: &Dom, handle: NodeId) -> Eligibility {
        let Some(node) = dom.node(handle) else {
            return Eligibility::Rejected(Rejection::Disconnected);
        };
        let Some(media) = node.media() else {
            return Eligibility::Rejected(Rejection::NotMedia);
        };
        if !dom.is_connected(handle) {
            return Eligibility::Rejected(Rejection::Disconnected);
        }
        if dom.is_rendered_hidden(handle) {
            return Eligibility::Rejected(Rejection::Hidden);
        }

        let verdict = if media.ready_state < ReadyState::HaveMetadata {
            Eligibility::Provisional
        } else {
            let rect = node.rect();
            if rect.width < self.config.min_width || rect.height < self.config.min_height {
                return Eligibility::Rejected(Rejection::TooSmall);
            }
            Eligibility::Eligible
        };

        if self.adapter.should_ignore_video(dom, handle) {
            return Eligibility::Rejected(Rejection::Excluded);
        }
        verdict
    }

    pub fn is_eligible(&self, dom: &Dom, handle: NodeId) -> bool {
        self.check(dom, handle).is_accepted()
    }
}
