use std::collections::{HashMap, HashSet};

use anyhow::Context;
use log::{debug, warn};

use crate::{
    dom::{Delivery, Dom, MediaEventKind, MutationKind, NodeId, ObserveOptions, ObserverId, CURRENT_SRC},
    scanner::{Boundary, TreeScanner},
    validator::ElementValidator,
};

pub const SOURCE_ATTRIBUTES: [&str; 2] = ["src", CURRENT_SRC];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    Added {
        handle: NodeId,
        parent: Option<NodeId>,
    },
    Removed {
        handle: NodeId,
    },
    AttributeChanged {
        handle: NodeId,
        attribute: String,
        old_value: Option<String>,
    },
    Media {
        handle: NodeId,
        kind: MediaEventKind,
    },
}

fn tree_options() -> ObserveOptions {
    ObserveOptions {
        child_list: true,
        subtree: true,
        ..ObserveOptions::attributes(&SOURCE_ATTRIBUTES)
    }
}

pub struct TreeObserver {
    scanner: TreeScanner,
    validator: ElementValidator,
    main: Option<(NodeId, ObserverId)>,
    boundaries: HashMap<NodeId, (Boundary, ObserverId)>,
    pending: Vec<Boundary>,
    known: HashSet<NodeId>,
}

impl TreeObserver {
    pub fn new(scanner: TreeScanner, validator: ElementValidator) -> Self {
        Self {
            scanner,
            validator,
            main: None,
            boundaries: HashMap::new(),
            pending: Vec::new(),
            known: HashSet::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.main.is_some()
    }

    pub fn boundary_count(&self) -> usize {
        self.known.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_observing(&self, root: NodeId) -> bool {
        self.boundaries.contains_key(&root)
    }

    pub fn register_boundary(&mut self, dom: &mut Dom, boundary: Boundary) -> bool {
        if !self.known.insert(boundary.root) {
            return false;
        }
        if self.is_active() {
            self.observe_boundary(dom, boundary);
        } else {
            debug!("Queueing {:?} boundary {} until activation", boundary.kind, boundary.root);
            self.pending.push(boundary);
        }
        true
    }

    fn observe_boundary(&mut self, dom: &mut Dom, boundary: Boundary) {
        match dom.observe(boundary.root, tree_options()) {
            Ok(observer) => {
                debug!("Observing {:?} boundary {}", boundary.kind, boundary.root);
                self.boundaries.insert(boundary.root, (boundary, observer));
            }
            Err(err) => {
                warn!("Failed to observe boundary {}: {err:?}", boundary.root);
                self.known.remove(&boundary.root);
            }
        }
    }

    pub fn activate(&mut self, dom: &mut Dom, root: NodeId) -> anyhow::Result<()> {
        if self.is_active() {
            return Ok(());
        }
        let observer = dom
            .observe(root, tree_options())
            .context("Failed to observe document")?;
        self.main = Some((root, observer));
        for boundary in std::mem::take(&mut self.pending) {
            self.observe_boundary(dom, boundary);
        }
        Ok(())
    }

    pub fn deactivate(&mut self, dom: &mut Dom) {
        if let Some((_, observer)) = self.main.take() {
            dom.disconnect(observer);
        }
        for (_, (_, observer)) in self.boundaries.drain() {
            dom.disconnect(observer);
        }
        self.known.clear();
        self.pending.clear();
    }

    /// Translates one batch of host deliveries. Records delivered to several
    /// observers are translated once.
    pub fn translate(&mut self, dom: &mut Dom, deliveries: Vec<Delivery>) -> Vec<TreeEvent> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let mut removed_any = false;

        for delivery in deliveries {
            match delivery {
                Delivery::Mutation { record, .. } => {
                    if !seen.insert(record.seq) {
                        continue;
                    }
                    match record.kind {
                        MutationKind::ChildList { added, removed } => {
                            for handle in removed {
                                if dom.node(handle).is_some_and(|node| node.is_element()) {
                                    removed_any = true;
                                    events.push(TreeEvent::Removed { handle });
                                }
                            }
                            for node in added {
                                self.discover(dom, node, &mut events);
                            }
                        }
                        MutationKind::Attribute { name, old_value } => {
                            events.push(TreeEvent::AttributeChanged {
                                handle: record.target,
                                attribute: name,
                                old_value,
                            });
                        }
                    }
                }
                Delivery::Media { target, kind, .. } => {
                    events.push(TreeEvent::Media {
                        handle: target,
                        kind,
                    });
                }
            }
        }

        if removed_any {
            self.prune(dom);
        }
        events
    }

    fn discover(&mut self, dom: &mut Dom, node: NodeId, events: &mut Vec<TreeEvent>) {
        if !dom.is_connected(node) {
            return;
        }
        let found = self.scanner.scan_subtree(dom, node);
        for boundary in found.boundaries {
            self.register_boundary(dom, boundary);
        }
        for handle in found.media {
            let eligibility = self.validator.check(dom, handle);
            if eligibility.is_accepted() {
                events.push(TreeEvent::Added {
                    handle,
                    parent: dom.shadow_including_parent(handle),
                });
            } else {
                debug!("Ignoring inserted media {handle}: {eligibility:?}");
            }
        }
    }

    fn prune(&mut self, dom: &mut Dom) {
        let stale: Vec<NodeId> = self
            .boundaries
            .keys()
            .copied()
            .filter(|root| !dom.is_connected(*root))
            .collect();
        for root in stale {
            if let Some((boundary, observer)) = self.boundaries.remove(&root) {
                debug!("Dropping {:?} boundary {root}", boundary.kind);
                dom.disconnect(observer);
            }
            self.known.remove(&root);
        }
    }
}
