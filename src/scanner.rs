use std::{collections::HashSet, sync::Arc};

use log::{debug, warn};

use crate::{
    adapter::SiteAdapter,
    dom::{Dom, FrameAccess, NodeId, NodeKind},
    overlay::OVERLAY_MARKER,
    selector::SelectorList,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundaryKind {
    Shadow,
    Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Boundary {
    pub root: NodeId,
    pub kind: BoundaryKind,
}

impl Boundary {
    pub fn shadow(root: NodeId) -> Self {
        Self {
            root,
            kind: BoundaryKind::Shadow,
        }
    }

    pub fn frame(root: NodeId) -> Self {
        Self {
            root,
            kind: BoundaryKind::Frame,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub media: Vec<NodeId>,
    pub boundaries: Vec<Boundary>,
}

#[derive(Default)]
struct Collector {
    result: ScanResult,
    seen_media: HashSet<NodeId>,
    seen_boundaries: HashSet<NodeId>,
    frames: Vec<NodeId>,
}

impl Collector {
    fn media(&mut self, id: NodeId) {
        if self.seen_media.insert(id) {
            self.result.media.push(id);
        }
    }

    fn boundary(&mut self, boundary: Boundary) {
        if self.seen_boundaries.insert(boundary.root) {
            self.result.boundaries.push(boundary);
        }
    }

    fn merge(&mut self, other: ScanResult) {
        for id in other.media {
            self.media(id);
        }
        for boundary in other.boundaries {
            self.boundary(boundary);
        }
    }
}

#[derive(Clone)]
pub struct TreeScanner {
    adapter: Arc<dyn SiteAdapter>,
    include_audio: bool,
}

impl TreeScanner {
    pub fn new(adapter: Arc<dyn SiteAdapter>, include_audio: bool) -> Self {
        Self {
            adapter,
            include_audio,
        }
    }

    pub fn scan_document_once(&self, dom: &Dom, root: NodeId) -> ScanResult {
        let mut collector = Collector::default();
        self.walk(dom, root, &mut collector);
        for special in self.adapter.detect_special_videos(dom, root) {
            collector.media(special);
        }
        self.scan_containers(dom, root, &mut collector);
        collector.result
    }

    pub fn scan_iframes_once(&self, dom: &Dom, root: NodeId) -> ScanResult {
        let mut scratch = Collector::default();
        self.walk(dom, root, &mut scratch);

        let mut collector = Collector::default();
        self.descend_frames(dom, scratch.frames, &mut collector);
        collector.result
    }

    pub fn scan_all(&self, dom: &Dom, root: NodeId) -> ScanResult {
        let mut collector = Collector::default();
        collector.merge(self.scan_document_once(dom, root));
        collector.merge(self.scan_iframes_once(dom, root));
        collector.result
    }

    pub fn scan_subtree(&self, dom: &Dom, node: NodeId) -> ScanResult {
        let mut collector = Collector::default();
        self.walk(dom, node, &mut collector);
        let frames = std::mem::take(&mut collector.frames);
        self.descend_frames(dom, frames, &mut collector);
        collector.result
    }

    fn walk(&self, dom: &Dom, start: NodeId, collector: &mut Collector) {
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            let Some(node) = dom.node(id) else {
                continue;
            };
            match node.kind() {
                NodeKind::Text(_) | NodeKind::Comment(_) => continue,
                NodeKind::Element { tag } => {
                    if node.has_attribute(OVERLAY_MARKER) {
                        continue;
                    }
                    match tag.as_str() {
                        "style" | "script" => continue,
                        "video" => {
                            collector.media(id);
                            continue;
                        }
                        "audio" if self.include_audio => {
                            collector.media(id);
                            continue;
                        }
                        "iframe" | "frame" => collector.frames.push(id),
                        _ => {}
                    }
                    if let Some(shadow) = node.shadow_root() {
                        collector.boundary(Boundary::shadow(shadow));
                        stack.push(shadow);
                    }
                }
                NodeKind::Document | NodeKind::ShadowRoot { .. } => {}
            }
            stack.extend(node.children().iter().rev());
        }
    }

    fn descend_frames(&self, dom: &Dom, frames: Vec<NodeId>, collector: &mut Collector) {
        let mut pending = frames;
        let mut visited = HashSet::new();
        while let Some(frame) = pending.pop() {
            let document = match dom.frame_access(frame) {
                FrameAccess::Document(document) => document,
                FrameAccess::Denied { origin } => {
                    warn!("Skipping cross-origin frame {frame} ({origin})");
                    continue;
                }
                FrameAccess::Empty => continue,
            };
            if !visited.insert(document) {
                continue;
            }
            debug!("Scanning frame document {document}");
            collector.boundary(Boundary::frame(document));

            let mut inner = Collector::default();
            self.walk(dom, document, &mut inner);
            for special in self.adapter.detect_special_videos(dom, document) {
                inner.media(special);
            }
            self.scan_containers(dom, document, &mut inner);
            pending.extend(inner.frames.drain(..));
            collector.merge(inner.result);
        }
    }

    fn scan_containers(&self, dom: &Dom, root: NodeId, collector: &mut Collector) {
        for source in self.adapter.video_container_selectors() {
            let selector = match SelectorList::parse(&source) {
                Ok(selector) => selector,
                Err(err) => {
                    warn!("Skipping container selector: {err:?}");
                    continue;
                }
            };
            for container in dom.query_selector_all(root, &selector) {
                self.walk(dom, container, collector);
            }
        }
    }
}
