use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

use anyhow::anyhow;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::{id_type, selector::SelectorList};

id_type!(NodeId);
id_type!(ObserverId);
id_type!(ListenerId);

pub type SharedDom = Arc<Mutex<Dom>>;

pub const CURRENT_SRC: &str = "currentSrc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    ShadowRoot { host: NodeId },
    Element { tag: String },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    #[default]
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaState {
    pub ready_state: ReadyState,
    pub current_src: String,
    pub playback_rate: f64,
    pub volume: f64,
    pub current_time: f64,
    pub paused: bool,
    pub rate_assignments: u32,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            ready_state: ReadyState::default(),
            current_src: String::new(),
            playback_rate: 1.0,
            volume: 1.0,
            current_time: 0.0,
            paused: true,
            rate_assignments: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub opacity: f64,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            display_none: false,
            visibility_hidden: false,
            opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FrameContent {
    Document(NodeId),
    CrossOrigin { origin: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameAccess {
    Document(NodeId),
    Denied { origin: String },
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaEventKind {
    Play,
    Seeked,
    LoadedMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserveOptions {
    pub child_list: bool,
    pub attributes: bool,
    pub subtree: bool,
    pub attribute_filter: Option<Vec<String>>,
}

impl ObserveOptions {
    pub fn attributes(filter: &[&str]) -> Self {
        Self {
            attributes: true,
            attribute_filter: Some(filter.iter().map(|name| name.to_string()).collect()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attribute {
        name: String,
        old_value: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub seq: u64,
    pub target: NodeId,
    pub kind: MutationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Mutation {
        observer: ObserverId,
        record: MutationRecord,
    },
    Media {
        listener: ListenerId,
        target: NodeId,
        kind: MediaEventKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticEvent {
    pub target: NodeId,
    pub kind: String,
    pub speed: String,
}

#[derive(Debug, Clone)]
pub struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attributes: BTreeMap<String, String>,
    shadow_root: Option<NodeId>,
    frame: Option<FrameContent>,
    owner_frame: Option<NodeId>,
    media: Option<MediaState>,
    style: Style,
    rect: Rect,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        let media = match &kind {
            NodeKind::Element { tag } if is_media_tag(tag) => Some(MediaState::default()),
            _ => None,
        };
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
            shadow_root: None,
            frame: None,
            owner_frame: None,
            media,
            style: Style::default(),
            rect: Rect::default(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { tag } => Some(tag),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, NodeKind::Element { .. })
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn shadow_root(&self) -> Option<NodeId> {
        self.shadow_root
    }

    pub fn media(&self) -> Option<&MediaState> {
        self.media.as_ref()
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }
}

pub fn is_media_tag(tag: &str) -> bool {
    matches!(tag, "video" | "audio")
}

#[derive(Debug, Clone)]
struct Observer {
    target: NodeId,
    options: ObserveOptions,
}

#[derive(Debug, Clone)]
struct Listener {
    target: NodeId,
    kind: MediaEventKind,
}

#[derive(Debug)]
pub struct Dom {
    document: NodeId,
    nodes: HashMap<NodeId, Node>,
    observers: HashMap<ObserverId, Observer>,
    listeners: HashMap<ListenerId, Listener>,
    queue: VecDeque<Delivery>,
    synthetic_events: Vec<SyntheticEvent>,
    next_seq: u64,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        let document = NodeId::new();
        let mut nodes = HashMap::new();
        nodes.insert(document, Node::new(NodeKind::Document));
        Self {
            document,
            nodes,
            observers: HashMap::new(),
            listeners: HashMap::new(),
            queue: VecDeque::new(),
            synthetic_events: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn document(&self) -> NodeId {
        self.document
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn node_mut(&mut self, id: NodeId) -> anyhow::Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Node {id} does not exist"))
    }

    fn insert_node(&mut self, node: Node) -> NodeId {
        let id = NodeId::new();
        self.nodes.insert(id, node);
        id
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.insert_node(Node::new(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.insert_node(Node::new(NodeKind::Text(text.to_string())))
    }

    pub fn create_comment(&mut self, text: &str) -> NodeId {
        self.insert_node(Node::new(NodeKind::Comment(text.to_string())))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.node(id)?.tag()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(Node::children).unwrap_or_default()
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).first().copied()
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(id)?);
        let index = siblings.iter().position(|child| *child == id)?;
        siblings.get(index + 1).copied()
    }

    pub fn shadow_including_parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id)?;
        match (&node.kind, node.parent) {
            (_, Some(parent)) => Some(parent),
            (NodeKind::ShadowRoot { host }, None) => Some(*host),
            _ => None,
        }
    }

    fn host_including_parent(&self, id: NodeId) -> Option<NodeId> {
        if let Some(parent) = self.shadow_including_parent(id) {
            return Some(parent);
        }
        let frame = self.node(id)?.owner_frame?;
        match &self.node(frame)?.frame {
            Some(FrameContent::Document(doc)) if *doc == id => Some(frame),
            _ => None,
        }
    }

    pub fn is_host_including_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.host_including_parent(id);
        }
        false
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.document {
                return true;
            }
            match self.host_including_parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)?.attribute(name)
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> anyhow::Result<()> {
        let node = self.node_mut(id)?;
        if !node.is_element() {
            return Err(anyhow!("Cannot set attribute '{name}' on non-element {id}"));
        }
        let old_value = node.attributes.insert(name.to_string(), value.to_string());
        self.record(
            id,
            MutationKind::Attribute {
                name: name.to_string(),
                old_value,
            },
        );
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> anyhow::Result<()> {
        let old_value = self.node_mut(id)?.attributes.remove(name);
        if old_value.is_some() {
            self.record(
                id,
                MutationKind::Attribute {
                    name: name.to_string(),
                    old_value,
                },
            );
        }
        Ok(())
    }

    pub fn attach_shadow(&mut self, host: NodeId) -> anyhow::Result<NodeId> {
        let node = self.node(host).ok_or_else(|| anyhow!("Node {host} does not exist"))?;
        if !node.is_element() {
            return Err(anyhow!("Only elements can host a shadow root"));
        }
        if node.shadow_root.is_some() {
            return Err(anyhow!("Element {host} already hosts a shadow root"));
        }
        let root = self.insert_node(Node::new(NodeKind::ShadowRoot { host }));
        self.node_mut(host)?.shadow_root = Some(root);
        Ok(root)
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.node(host)?.shadow_root
    }

    fn check_frame(&self, frame: NodeId) -> anyhow::Result<()> {
        match self.tag(frame) {
            Some("iframe" | "frame") => Ok(()),
            _ => Err(anyhow!("Node {frame} is not a frame element")),
        }
    }

    pub fn attach_frame_document(&mut self, frame: NodeId) -> anyhow::Result<NodeId> {
        self.check_frame(frame)?;
        let mut document = Node::new(NodeKind::Document);
        document.owner_frame = Some(frame);
        let document = self.insert_node(document);
        self.node_mut(frame)?.frame = Some(FrameContent::Document(document));
        Ok(document)
    }

    pub fn set_frame_cross_origin(&mut self, frame: NodeId, origin: &str) -> anyhow::Result<()> {
        self.check_frame(frame)?;
        self.node_mut(frame)?.frame = Some(FrameContent::CrossOrigin {
            origin: origin.to_string(),
        });
        Ok(())
    }

    pub fn frame_access(&self, frame: NodeId) -> FrameAccess {
        match self.node(frame).and_then(|node| node.frame.as_ref()) {
            Some(FrameContent::Document(document)) => FrameAccess::Document(*document),
            Some(FrameContent::CrossOrigin { origin }) => FrameAccess::Denied {
                origin: origin.clone(),
            },
            None => FrameAccess::Empty,
        }
    }

    pub fn media(&self, id: NodeId) -> Option<&MediaState> {
        self.node(id)?.media()
    }

    fn media_mut(&mut self, id: NodeId) -> anyhow::Result<&mut MediaState> {
        self.node_mut(id)?
            .media
            .as_mut()
            .ok_or_else(|| anyhow!("Node {id} is not a media element"))
    }

    pub fn media_source(&self, id: NodeId) -> Option<String> {
        let media = self.media(id)?;
        if !media.current_src.is_empty() {
            return Some(media.current_src.clone());
        }
        self.attribute(id, "src")
            .filter(|src| !src.is_empty())
            .map(str::to_string)
    }

    pub fn set_current_src(&mut self, id: NodeId, src: &str) -> anyhow::Result<()> {
        let media = self.media_mut(id)?;
        let old_value = std::mem::replace(&mut media.current_src, src.to_string());
        self.record(
            id,
            MutationKind::Attribute {
                name: CURRENT_SRC.to_string(),
                old_value: Some(old_value),
            },
        );
        Ok(())
    }

    pub fn set_ready_state(&mut self, id: NodeId, ready_state: ReadyState) -> anyhow::Result<()> {
        let media = self.media_mut(id)?;
        let previous = std::mem::replace(&mut media.ready_state, ready_state);
        if previous < ReadyState::HaveMetadata && ready_state >= ReadyState::HaveMetadata {
            self.dispatch_media_event(id, MediaEventKind::LoadedMetadata);
        }
        Ok(())
    }

    pub fn set_playback_rate(&mut self, id: NodeId, rate: f64) -> anyhow::Result<()> {
        let media = self.media_mut(id)?;
        media.playback_rate = rate;
        media.rate_assignments += 1;
        Ok(())
    }

    pub fn set_volume(&mut self, id: NodeId, volume: f64) -> anyhow::Result<()> {
        self.media_mut(id)?.volume = volume.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn set_current_time(&mut self, id: NodeId, time: f64) -> anyhow::Result<()> {
        self.media_mut(id)?.current_time = time.max(0.0);
        Ok(())
    }

    pub fn play(&mut self, id: NodeId) -> anyhow::Result<()> {
        self.media_mut(id)?.paused = false;
        self.dispatch_media_event(id, MediaEventKind::Play);
        Ok(())
    }

    pub fn seek(&mut self, id: NodeId, time: f64) -> anyhow::Result<()> {
        self.set_current_time(id, time)?;
        self.dispatch_media_event(id, MediaEventKind::Seeked);
        Ok(())
    }

    pub fn set_style(&mut self, id: NodeId, style: Style) -> anyhow::Result<()> {
        self.node_mut(id)?.style = style;
        Ok(())
    }

    pub fn set_rect(&mut self, id: NodeId, rect: Rect) -> anyhow::Result<()> {
        self.node_mut(id)?.rect = rect;
        Ok(())
    }

    /// Approximates computed visibility: `display: none` or
    /// `visibility: hidden` anywhere on the shadow-including ancestor chain,
    /// or zero opacity on the element itself.
    pub fn is_rendered_hidden(&self, id: NodeId) -> bool {
        let Some(node) = self.node(id) else {
            return true;
        };
        if node.style.opacity <= 0.0 {
            return true;
        }
        let mut current = Some(id);
        while let Some(ancestor) = current {
            if let Some(style) = self.node(ancestor).map(Node::style) {
                if style.display_none || style.visibility_hidden {
                    return true;
                }
            }
            current = self.shadow_including_parent(ancestor);
        }
        false
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut text = String::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.node(current) else {
                continue;
            };
            if let NodeKind::Text(value) = &node.kind {
                text.push_str(value);
            }
            stack.extend(node.children.iter().rev());
        }
        text
    }

    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> anyhow::Result<()> {
        for child in self.children(id).to_vec() {
            self.remove(child)?;
            self.discard(child);
        }
        let text = self.create_text(text);
        self.append_child(id, text)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> anyhow::Result<()> {
        self.insert_before(parent, child, None)
    }

    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> anyhow::Result<()> {
        let parent_node = self
            .node(parent)
            .ok_or_else(|| anyhow!("Parent {parent} does not exist"))?;
        if matches!(parent_node.kind, NodeKind::Text(_) | NodeKind::Comment(_)) {
            return Err(anyhow!("Node {parent} cannot have children"));
        }
        let child_node = self
            .node(child)
            .ok_or_else(|| anyhow!("Child {child} does not exist"))?;
        if matches!(
            child_node.kind,
            NodeKind::Document | NodeKind::ShadowRoot { .. }
        ) {
            return Err(anyhow!("Node {child} cannot be inserted into a tree"));
        }
        if self.is_host_including_inclusive_ancestor(child, parent) {
            return Err(anyhow!("Inserting {child} into {parent} would create a cycle"));
        }
        if let Some(reference) = reference {
            if reference == child {
                return Ok(());
            }
            if self.parent(reference) != Some(parent) {
                return Err(anyhow!("Reference node {reference} is not a child of {parent}"));
            }
        }

        self.remove(child)?;

        let children = &mut self.node_mut(parent)?.children;
        let index = reference
            .and_then(|reference| children.iter().position(|id| *id == reference))
            .unwrap_or(children.len());
        children.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);

        self.record(
            parent,
            MutationKind::ChildList {
                added: vec![child],
                removed: vec![],
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> anyhow::Result<()> {
        let Some(parent) = self.parent(id) else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|child| *child != id);
        self.node_mut(id)?.parent = None;
        self.record(
            parent,
            MutationKind::ChildList {
                added: vec![],
                removed: vec![id],
            },
        );
        Ok(())
    }

    pub fn discard(&mut self, id: NodeId) {
        if self.parent(id).is_some() {
            return;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            stack.extend(node.children);
            stack.extend(node.shadow_root);
            if let Some(FrameContent::Document(document)) = node.frame {
                stack.push(document);
            }
        }
    }

    pub fn query_selector_all(&self, root: NodeId, selector: &SelectorList) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if selector.matches(self, id) {
                found.push(id);
            }
            stack.extend(self.children(id).iter().rev());
        }
        found
    }

    pub fn observe(&mut self, target: NodeId, options: ObserveOptions) -> anyhow::Result<ObserverId> {
        if !self.nodes.contains_key(&target) {
            return Err(anyhow!("Cannot observe missing node {target}"));
        }
        let id = ObserverId::new();
        self.observers.insert(id, Observer { target, options });
        Ok(id)
    }

    pub fn disconnect(&mut self, observer: ObserverId) -> bool {
        self.queue.retain(|delivery| {
            !matches!(delivery, Delivery::Mutation { observer: id, .. } if *id == observer)
        });
        self.observers.remove(&observer).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn add_listener(&mut self, target: NodeId, kind: MediaEventKind) -> anyhow::Result<ListenerId> {
        if !self.nodes.contains_key(&target) {
            return Err(anyhow!("Cannot listen on missing node {target}"));
        }
        let id = ListenerId::new();
        self.listeners.insert(id, Listener { target, kind });
        Ok(id)
    }

    pub fn remove_listener(&mut self, listener: ListenerId) -> bool {
        self.queue.retain(|delivery| {
            !matches!(delivery, Delivery::Media { listener: id, .. } if *id == listener)
        });
        self.listeners.remove(&listener).is_some()
    }

    pub fn listener_count(&self, target: NodeId) -> usize {
        self.listeners
            .values()
            .filter(|listener| listener.target == target)
            .count()
    }

    pub fn dispatch_media_event(&mut self, target: NodeId, kind: MediaEventKind) {
        let mut listeners: Vec<ListenerId> = self
            .listeners
            .iter()
            .filter(|(_, listener)| listener.target == target && listener.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        listeners.sort_by_key(|id| **id);
        for listener in listeners {
            self.queue.push_back(Delivery::Media {
                listener,
                target,
                kind,
            });
        }
    }

    pub fn dispatch_synthetic_rate_change(&mut self, target: NodeId, speed: String) {
        self.synthetic_events.push(SyntheticEvent {
            target,
            kind: "ratechange".to_string(),
            speed,
        });
    }

    pub fn synthetic_events(&self) -> &[SyntheticEvent] {
        &self.synthetic_events
    }

    pub fn take_deliveries(&mut self) -> Vec<Delivery> {
        self.queue.drain(..).collect()
    }

    fn record(&mut self, target: NodeId, kind: MutationKind) {
        let mut observers: Vec<ObserverId> = self
            .observers
            .iter()
            .filter(|(_, observer)| self.observer_wants(observer, target, &kind))
            .map(|(id, _)| *id)
            .collect();
        if observers.is_empty() {
            return;
        }
        observers.sort_by_key(|id| **id);

        let seq = self.next_seq;
        self.next_seq += 1;
        for observer in observers {
            self.queue.push_back(Delivery::Mutation {
                observer,
                record: MutationRecord {
                    seq,
                    target,
                    kind: kind.clone(),
                },
            });
        }
    }

    fn observer_wants(&self, observer: &Observer, target: NodeId, kind: &MutationKind) -> bool {
        let options = &observer.options;
        let wanted = match kind {
            MutationKind::ChildList { .. } => options.child_list,
            MutationKind::Attribute { name, .. } => {
                options.attributes
                    && options
                        .attribute_filter
                        .as_ref()
                        .map_or(true, |filter| filter.iter().any(|attr| attr == name))
            }
        };
        if !wanted {
            return false;
        }
        observer.target == target
            || (options.subtree && self.is_inclusive_ancestor(observer.target, target))
    }
}
