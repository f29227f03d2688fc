use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use anyhow::{anyhow, Context};
use serde::Deserialize;

use crate::{
    dom::{Dom, NodeId, ReadyState, Rect, Style},
    overlay::OverlayAction,
};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageFixture {
    pub body: Vec<NodeSpec>,
    pub script: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Element(ElementSpec),
    Text { text: String },
    Comment { text: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ElementSpec {
    pub tag: String,
    pub label: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<NodeSpec>,
    pub shadow: Option<Vec<NodeSpec>>,
    pub frame: Option<FrameSpec>,
    pub media: Option<MediaSpec>,
    pub width: f64,
    pub height: f64,
    pub hidden: bool,
    pub display_none: bool,
    pub opacity: Option<f64>,
}

impl Default for ElementSpec {
    fn default() -> Self {
        Self {
            tag: "div".to_string(),
            label: None,
            attributes: BTreeMap::new(),
            children: Vec::new(),
            shadow: None,
            frame: None,
            media: None,
            width: 0.0,
            height: 0.0,
            hidden: false,
            display_none: false,
            opacity: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum FrameSpec {
    SameOrigin {
        #[serde(default)]
        body: Vec<NodeSpec>,
    },
    CrossOrigin {
        origin: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MediaSpec {
    pub ready_state: ReadyState,
    pub current_src: Option<String>,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Append {
        #[serde(default)]
        parent: Option<String>,
        #[serde(default)]
        into_shadow: bool,
        #[serde(default)]
        before: Option<String>,
        node: NodeSpec,
    },
    Remove {
        target: String,
    },
    SetAttribute {
        target: String,
        name: String,
        value: String,
    },
    RemoveAttribute {
        target: String,
        name: String,
    },
    SetReadyState {
        target: String,
        ready_state: ReadyState,
    },
    SetCurrentSrc {
        target: String,
        src: String,
    },
    Play {
        target: String,
    },
    Seek {
        target: String,
        time: f64,
    },
    Action {
        target: String,
        action: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayRequest {
    pub media: NodeId,
    pub action: OverlayAction,
}

#[derive(Debug, Clone, Default)]
pub struct Labels(HashMap<String, NodeId>);

impl Labels {
    pub fn get(&self, label: &str) -> anyhow::Result<NodeId> {
        self.0
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("Unknown node label `{label}`"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.0.iter().map(|(label, id)| (label.as_str(), *id))
    }

    fn insert(&mut self, label: &str, id: NodeId) -> anyhow::Result<()> {
        if self.0.insert(label.to_string(), id).is_some() {
            return Err(anyhow!("Duplicate node label `{label}`"));
        }
        Ok(())
    }
}

pub struct Page {
    pub dom: Dom,
    pub labels: Labels,
}

impl PageFixture {
    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        serde_json::from_str(contents).context("Failed to parse JSON page fixture")
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("Failed to parse TOML page fixture")
    }

    pub fn read_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read page fixture {}", path.display()))?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&contents),
            Some("toml") => Self::from_toml(&contents),
            _ => Err(anyhow!(
                "Unsupported page fixture {}; expected .json or .toml",
                path.display()
            )),
        }
    }

    pub fn build(&self) -> anyhow::Result<Page> {
        let mut dom = Dom::new();
        let mut labels = Labels::default();
        let document = dom.document();
        for spec in &self.body {
            let node = build_node(&mut dom, spec, &mut labels)?;
            dom.append_child(document, node)?;
        }
        Ok(Page { dom, labels })
    }
}

fn build_node(dom: &mut Dom, spec: &NodeSpec, labels: &mut Labels) -> anyhow::Result<NodeId> {
    let element = match spec {
        NodeSpec::Text { text } => return Ok(dom.create_text(text)),
        NodeSpec::Comment { text } => return Ok(dom.create_comment(text)),
        NodeSpec::Element(element) => element,
    };

    let id = dom.create_element(&element.tag);
    if let Some(label) = &element.label {
        labels.insert(label, id)?;
    }
    for (name, value) in &element.attributes {
        dom.set_attribute(id, name, value)?;
    }
    dom.set_rect(
        id,
        Rect {
            width: element.width,
            height: element.height,
        },
    )?;
    dom.set_style(
        id,
        Style {
            display_none: element.display_none,
            visibility_hidden: element.hidden,
            opacity: element.opacity.unwrap_or(1.0),
        },
    )?;

    if let Some(media) = &element.media {
        dom.set_ready_state(id, media.ready_state)
            .with_context(|| format!("<{}> cannot carry media state", element.tag))?;
        if let Some(src) = &media.current_src {
            dom.set_current_src(id, src)?;
        }
        if let Some(volume) = media.volume {
            dom.set_volume(id, volume)?;
        }
    }

    append_all(dom, id, &element.children, labels)?;
    if let Some(shadow) = &element.shadow {
        let root = dom.attach_shadow(id)?;
        append_all(dom, root, shadow, labels)?;
    }
    match &element.frame {
        Some(FrameSpec::SameOrigin { body }) => {
            let document = dom.attach_frame_document(id)?;
            append_all(dom, document, body, labels)?;
        }
        Some(FrameSpec::CrossOrigin { origin }) => dom.set_frame_cross_origin(id, origin)?,
        None => {}
    }
    Ok(id)
}

fn append_all(
    dom: &mut Dom,
    parent: NodeId,
    specs: &[NodeSpec],
    labels: &mut Labels,
) -> anyhow::Result<()> {
    for spec in specs {
        let child = build_node(dom, spec, labels)?;
        dom.append_child(parent, child)?;
    }
    Ok(())
}

impl Step {
    pub fn apply(&self, dom: &mut Dom, labels: &mut Labels) -> anyhow::Result<Option<OverlayRequest>> {
        match self {
            Step::Append {
                parent,
                into_shadow,
                before,
                node,
            } => {
                let mut parent = match parent {
                    Some(label) => labels.get(label)?,
                    None => dom.document(),
                };
                if *into_shadow {
                    parent = dom
                        .shadow_root(parent)
                        .ok_or_else(|| anyhow!("Node {parent} has no shadow root"))?;
                }
                let reference = before.as_deref().map(|label| labels.get(label)).transpose()?;
                let child = build_node(dom, node, labels)?;
                dom.insert_before(parent, child, reference)?;
            }
            Step::Remove { target } => dom.remove(labels.get(target)?)?,
            Step::SetAttribute {
                target,
                name,
                value,
            } => dom.set_attribute(labels.get(target)?, name, value)?,
            Step::RemoveAttribute { target, name } => {
                dom.remove_attribute(labels.get(target)?, name)?
            }
            Step::SetReadyState {
                target,
                ready_state,
            } => dom.set_ready_state(labels.get(target)?, *ready_state)?,
            Step::SetCurrentSrc { target, src } => dom.set_current_src(labels.get(target)?, src)?,
            Step::Play { target } => dom.play(labels.get(target)?)?,
            Step::Seek { target, time } => dom.seek(labels.get(target)?, *time)?,
            Step::Action { target, action } => {
                let action = OverlayAction::from_name(action)
                    .ok_or_else(|| anyhow!("Unknown overlay action `{action}`"))?;
                return Ok(Some(OverlayRequest {
                    media: labels.get(target)?,
                    action,
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::dom::FrameAccess;

    use super::*;

    const TOML_PAGE: &str = r#"
[[body]]
type = "element"
tag = "section"
label = "player"

[[body.children]]
type = "element"
tag = "video"
label = "main"
width = 640.0
height = 360.0
attributes = { src = "https://example.com/a.mp4" }
media = { ready_state = "have_enough_data", volume = 0.5 }

[[body]]
type = "element"
tag = "iframe"
frame = { access = "cross_origin", origin = "https://ads.example.net" }

[[script]]
op = "play"
target = "main"

[[script]]
op = "action"
target = "main"
action = "faster"
"#;

    #[test]
    fn should_build_page_from_toml() {
        // given
        let fixture = PageFixture::from_toml(TOML_PAGE).unwrap();

        // when
        let page = fixture.build().unwrap();

        // then
        let dom = &page.dom;
        let player = page.labels.get("player").unwrap();
        let video = page.labels.get("main").unwrap();
        assert_eq!(dom.parent(player), Some(dom.document()));
        assert_eq!(dom.parent(video), Some(player));
        let media = dom.media(video).unwrap();
        assert_eq!(media.ready_state, ReadyState::HaveEnoughData);
        assert_eq!(media.volume, 0.5);
        assert_eq!(dom.node(video).unwrap().rect().width, 640.0);
        let frame = dom.children(dom.document())[1];
        assert!(matches!(dom.frame_access(frame), FrameAccess::Denied { .. }));
        assert_eq!(fixture.script.len(), 2);
    }

    #[test]
    fn should_build_shadow_roots_and_frames_from_json() {
        // given
        let fixture = PageFixture::from_json(
            r#"{
                "body": [
                    {"type": "element", "tag": "my-player", "label": "host", "shadow": [
                        {"type": "element", "tag": "video", "label": "inner"}
                    ]},
                    {"type": "element", "tag": "iframe", "frame": {"access": "same_origin", "body": [
                        {"type": "text", "text": "hello"},
                        {"type": "element", "tag": "audio", "label": "framed"}
                    ]}}
                ]
            }"#,
        )
        .unwrap();

        // when
        let page = fixture.build().unwrap();

        // then
        let dom = &page.dom;
        let host = page.labels.get("host").unwrap();
        let inner = page.labels.get("inner").unwrap();
        assert_eq!(dom.parent(inner), dom.shadow_root(host));
        let framed = page.labels.get("framed").unwrap();
        assert!(dom.is_connected(framed));
        assert!(dom.media(framed).is_some());
    }

    #[test]
    fn should_reject_duplicate_labels() {
        // given
        let fixture = PageFixture::from_json(
            r#"{"body": [
                {"type": "element", "label": "a"},
                {"type": "element", "label": "a"}
            ]}"#,
        )
        .unwrap();

        // then
        assert!(fixture.build().is_err());
    }

    #[test]
    fn should_apply_script_steps() {
        // given
        let fixture = PageFixture::from_json(
            r#"{
                "body": [{"type": "element", "tag": "div", "label": "box"}],
                "script": [
                    {"op": "append", "parent": "box", "node": {"type": "element", "tag": "video", "label": "late"}},
                    {"op": "set_current_src", "target": "late", "src": "https://example.com/b.mp4"},
                    {"op": "seek", "target": "late", "time": 12.5},
                    {"op": "action", "target": "late", "action": "rewind"},
                    {"op": "remove", "target": "box"}
                ]
            }"#,
        )
        .unwrap();
        let Page { mut dom, mut labels } = fixture.build().unwrap();

        // when
        let mut requests = Vec::new();
        for step in &fixture.script {
            requests.extend(step.apply(&mut dom, &mut labels).unwrap());
        }

        // then
        let late = labels.get("late").unwrap();
        let media = dom.media(late).unwrap();
        assert_eq!(media.current_src, "https://example.com/b.mp4");
        assert_eq!(media.current_time, 12.5);
        assert!(!dom.is_connected(late));
        assert_eq!(
            requests,
            vec![OverlayRequest {
                media: late,
                action: OverlayAction::Rewind
            }]
        );
    }

    #[test]
    fn should_fail_on_unknown_labels_and_actions() {
        // given
        let mut page = PageFixture::default().build().unwrap();
        let play = Step::Play {
            target: "nowhere".to_string(),
        };
        let action = Step::Action {
            target: "nowhere".to_string(),
            action: "explode".to_string(),
        };

        // then
        assert!(play.apply(&mut page.dom, &mut page.labels).is_err());
        assert!(action.apply(&mut page.dom, &mut page.labels).is_err());
    }

    #[test]
    fn should_read_fixture_by_extension() {
        // given
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(TOML_PAGE.as_bytes()).unwrap();
        let mut unknown = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        unknown.write_all(b"body: []").unwrap();

        // when
        let fixture = PageFixture::read_path(file.path()).unwrap();

        // then
        assert_eq!(fixture.body.len(), 2);
        assert!(PageFixture::read_path(unknown.path()).is_err());
    }
}
