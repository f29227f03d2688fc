use serde::Deserialize;

use crate::{
    dom::{Dom, NodeId},
    selector::SelectorList,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionMethod {
    Before,
    After,
    #[default]
    FirstChild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerPosition {
    pub insertion_point: NodeId,
    pub insertion_method: InsertionMethod,
    pub target_parent: NodeId,
}

impl ControllerPosition {
    pub fn relative_to(dom: &Dom, anchor: NodeId, insertion_method: InsertionMethod) -> Self {
        let target_parent = match insertion_method {
            InsertionMethod::FirstChild => anchor,
            InsertionMethod::Before | InsertionMethod::After => {
                dom.parent(anchor).unwrap_or(anchor)
            }
        };
        Self {
            insertion_point: anchor,
            insertion_method,
            target_parent,
        }
    }
}

pub trait SiteAdapter: Send + Sync {
    fn controller_position(&self, dom: &Dom, parent: NodeId, media: NodeId) -> ControllerPosition;

    fn detect_special_videos(&self, _dom: &Dom, _root: NodeId) -> Vec<NodeId> {
        Vec::new()
    }

    fn should_ignore_video(&self, _dom: &Dom, _media: NodeId) -> bool {
        false
    }

    fn video_container_selectors(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAdapter;

impl SiteAdapter for DefaultAdapter {
    fn controller_position(&self, dom: &Dom, parent: NodeId, _media: NodeId) -> ControllerPosition {
        ControllerPosition::relative_to(dom, parent, InsertionMethod::FirstChild)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementAnchor {
    #[default]
    Parent,
    Media,
    Grandparent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub anchor: PlacementAnchor,
    pub method: InsertionMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteRules {
    pub container_selectors: Vec<String>,
    pub special_selectors: Vec<String>,
    pub ignore_selectors: Vec<String>,
    pub placement: Placement,
}

impl SiteRules {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_selectors(kind: &str, sources: &[String]) -> Vec<SelectorList> {
    sources
        .iter()
        .filter_map(|source| match SelectorList::parse(source) {
            Ok(selector) => Some(selector),
            Err(err) => {
                log::warn!("Ignoring {kind} selector: {err:?}");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RuleAdapter {
    container_selectors: Vec<String>,
    special: Vec<SelectorList>,
    ignore: Vec<SelectorList>,
    placement: Placement,
}

impl RuleAdapter {
    pub fn new(rules: SiteRules) -> Self {
        Self {
            special: parse_selectors("special video", &rules.special_selectors),
            ignore: parse_selectors("ignore", &rules.ignore_selectors),
            container_selectors: rules.container_selectors,
            placement: rules.placement,
        }
    }
}

impl SiteAdapter for RuleAdapter {
    fn controller_position(&self, dom: &Dom, parent: NodeId, media: NodeId) -> ControllerPosition {
        let anchor = match self.placement.anchor {
            PlacementAnchor::Media => media,
            PlacementAnchor::Parent => parent,
            PlacementAnchor::Grandparent => dom.parent(parent).unwrap_or(parent),
        };
        ControllerPosition::relative_to(dom, anchor, self.placement.method)
    }

    fn detect_special_videos(&self, dom: &Dom, root: NodeId) -> Vec<NodeId> {
        self.special
            .iter()
            .flat_map(|selector| dom.query_selector_all(root, selector))
            .filter(|id| dom.tag(*id) == Some("video"))
            .collect()
    }

    fn should_ignore_video(&self, dom: &Dom, media: NodeId) -> bool {
        self.ignore.iter().any(|selector| selector.matches(dom, media))
    }

    fn video_container_selectors(&self) -> Vec<String> {
        self.container_selectors.clone()
    }
}
