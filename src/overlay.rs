use anyhow::{anyhow, Context};

use crate::{
    adapter::{ControllerPosition, InsertionMethod},
    dom::{Dom, NodeId},
    settings::Appearance,
};

pub const OVERLAY_MARKER: &str = "data-vsc-overlay";

const HIDDEN_CLASS: &str = "vsc-hidden";
const NO_SOURCE_CLASS: &str = "vsc-nosource";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayAction {
    Slower,
    Faster,
    Rewind,
    Advance,
    ToggleDisplay,
}

impl OverlayAction {
    pub const ALL: [OverlayAction; 5] = [
        OverlayAction::Rewind,
        OverlayAction::Slower,
        OverlayAction::Faster,
        OverlayAction::Advance,
        OverlayAction::ToggleDisplay,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OverlayAction::Slower => "slower",
            OverlayAction::Faster => "faster",
            OverlayAction::Rewind => "rewind",
            OverlayAction::Advance => "advance",
            OverlayAction::ToggleDisplay => "display",
        }
    }

    fn label(self) -> &'static str {
        match self {
            OverlayAction::Slower => "-",
            OverlayAction::Faster => "+",
            OverlayAction::Rewind => "«",
            OverlayAction::Advance => "»",
            OverlayAction::ToggleDisplay => "×",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }
}

pub fn round_speed(rate: f64) -> f64 {
    (rate * 10.0).round() / 10.0
}

pub fn speed_label(rate: f64) -> String {
    format!("{:.1}", round_speed(rate))
}

pub fn format_speed(rate: f64) -> String {
    format!("{}x", speed_label(rate))
}

pub fn format_volume(volume: f64) -> String {
    format!("{}%", (volume * 100.0).round() as i64)
}

pub fn resolve_insertion(
    dom: &Dom,
    position: &ControllerPosition,
) -> anyhow::Result<(NodeId, Option<NodeId>)> {
    let ControllerPosition {
        insertion_point,
        insertion_method,
        target_parent,
    } = *position;
    if !dom.is_connected(target_parent) {
        return Err(anyhow!("Target parent {target_parent} is not connected"));
    }
    match insertion_method {
        InsertionMethod::FirstChild => {
            if insertion_point != target_parent {
                return Err(anyhow!(
                    "First-child insertion point {insertion_point} differs from target parent {target_parent}"
                ));
            }
            Ok((target_parent, dom.first_child(target_parent)))
        }
        InsertionMethod::Before | InsertionMethod::After => {
            if dom.parent(insertion_point) != Some(target_parent) {
                return Err(anyhow!(
                    "Insertion point {insertion_point} is not a child of {target_parent}"
                ));
            }
            let reference = match insertion_method {
                InsertionMethod::Before => Some(insertion_point),
                _ => dom.next_sibling(insertion_point),
            };
            Ok((target_parent, reference))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub wrapper: NodeId,
    speed_indicator: NodeId,
    volume_indicator: NodeId,
    buttons: Vec<(OverlayAction, NodeId)>,
    hidden: bool,
    no_source: bool,
}

impl Overlay {
    pub fn build(
        dom: &mut Dom,
        controller: &str,
        appearance: Appearance,
        start_hidden: bool,
    ) -> anyhow::Result<Self> {
        let wrapper = dom.create_element("div");
        dom.set_attribute(wrapper, OVERLAY_MARKER, controller)?;
        dom.set_attribute(wrapper, "class", "vsc-controller")?;
        let shadow = dom
            .attach_shadow(wrapper)
            .context("Failed to isolate controller overlay")?;

        let container = dom.create_element("div");
        dom.set_attribute(container, "id", "controller")?;
        dom.set_attribute(
            container,
            "style",
            &format!(
                "opacity:{};font-size:{}px",
                appearance.opacity, appearance.button_size
            ),
        )?;
        dom.append_child(shadow, container)?;

        let speed_indicator = dom.create_element("span");
        dom.set_attribute(speed_indicator, "class", "draggable")?;
        dom.append_child(container, speed_indicator)?;

        let volume_indicator = dom.create_element("span");
        dom.set_attribute(volume_indicator, "class", "volume")?;
        dom.append_child(container, volume_indicator)?;

        let controls = dom.create_element("span");
        dom.set_attribute(controls, "id", "controls")?;
        dom.append_child(container, controls)?;

        let mut buttons = Vec::with_capacity(OverlayAction::ALL.len());
        for action in OverlayAction::ALL {
            let button = dom.create_element("button");
            dom.set_attribute(button, "data-action", action.name())?;
            dom.set_text_content(button, action.label())?;
            dom.append_child(controls, button)?;
            buttons.push((action, button));
        }

        let mut overlay = Self {
            wrapper,
            speed_indicator,
            volume_indicator,
            buttons,
            hidden: false,
            no_source: false,
        };
        overlay.set_hidden(dom, start_hidden)?;
        Ok(overlay)
    }

    pub fn insert(&self, dom: &mut Dom, parent: NodeId, reference: Option<NodeId>) -> anyhow::Result<()> {
        dom.insert_before(parent, self.wrapper, reference)
            .context("Failed to insert controller overlay")
    }

    pub fn detach(&self, dom: &mut Dom) {
        if dom.node(self.wrapper).is_none() {
            return;
        }
        if let Err(err) = dom.remove(self.wrapper) {
            log::debug!("Overlay {} was already gone: {err:?}", self.wrapper);
        }
        dom.discard(self.wrapper);
    }

    pub fn action_for(&self, button: NodeId) -> Option<OverlayAction> {
        self.buttons
            .iter()
            .find(|(_, id)| *id == button)
            .map(|(action, _)| *action)
    }

    pub fn button(&self, action: OverlayAction) -> Option<NodeId> {
        self.buttons
            .iter()
            .find(|(candidate, _)| *candidate == action)
            .map(|(_, id)| *id)
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn has_no_source(&self) -> bool {
        self.no_source
    }

    pub fn set_speed_text(&self, dom: &mut Dom, text: &str) -> anyhow::Result<()> {
        dom.set_text_content(self.speed_indicator, text)
    }

    pub fn set_volume_text(&self, dom: &mut Dom, text: &str) -> anyhow::Result<()> {
        dom.set_text_content(self.volume_indicator, text)
    }

    pub fn set_hidden(&mut self, dom: &mut Dom, hidden: bool) -> anyhow::Result<()> {
        self.hidden = hidden;
        self.sync_classes(dom)
    }

    pub fn set_no_source(&mut self, dom: &mut Dom, no_source: bool) -> anyhow::Result<()> {
        if self.no_source == no_source {
            return Ok(());
        }
        self.no_source = no_source;
        self.sync_classes(dom)
    }

    fn sync_classes(&self, dom: &mut Dom) -> anyhow::Result<()> {
        let mut classes = vec!["vsc-controller"];
        if self.hidden {
            classes.push(HIDDEN_CLASS);
        }
        if self.no_source {
            classes.push(NO_SOURCE_CLASS);
        }
        dom.set_attribute(self.wrapper, "class", &classes.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn appearance() -> Appearance {
        Appearance {
            opacity: 0.3,
            button_size: 14,
        }
    }

    #[test]
    fn should_round_speed_half_away_from_zero() {
        assert_eq!(format_speed(1.75), "1.8x");
        assert_eq!(format_speed(1.25), "1.3x");
        assert_eq!(format_speed(1.04), "1.0x");
        assert_eq!(format_speed(2.0), "2.0x");
        assert_eq!(speed_label(0.07), "0.1");
    }

    #[test]
    fn should_format_volume_as_integer_percentage() {
        assert_eq!(format_volume(0.736), "74%");
        assert_eq!(format_volume(0.5), "50%");
        assert_eq!(format_volume(1.0), "100%");
        assert_eq!(format_volume(0.0), "0%");
    }

    #[test]
    fn should_build_isolated_overlay() {
        // given
        let mut dom = Dom::new();

        // when
        let overlay = Overlay::build(&mut dom, "c1", appearance(), true).unwrap();

        // then
        let shadow = dom.shadow_root(overlay.wrapper).unwrap();
        assert_eq!(dom.attribute(overlay.wrapper, OVERLAY_MARKER), Some("c1"));
        assert_eq!(
            dom.attribute(overlay.wrapper, "class"),
            Some("vsc-controller vsc-hidden")
        );
        assert!(dom.children(overlay.wrapper).is_empty());
        assert_eq!(dom.children(shadow).len(), 1);
        assert_eq!(overlay.buttons.len(), 5);
        assert_eq!(
            overlay.action_for(overlay.buttons[0].1),
            Some(OverlayAction::Rewind)
        );
    }

    #[test]
    fn should_resolve_each_insertion_method() {
        // given
        let mut dom = Dom::new();
        let parent = dom.create_element("div");
        let first = dom.create_element("span");
        let video = dom.create_element("video");
        dom.append_child(dom.document(), parent).unwrap();
        dom.append_child(parent, first).unwrap();
        dom.append_child(parent, video).unwrap();
        let position = |insertion_point, insertion_method, target_parent| ControllerPosition {
            insertion_point,
            insertion_method,
            target_parent,
        };

        // then
        assert_eq!(
            resolve_insertion(&dom, &position(parent, InsertionMethod::FirstChild, parent)).unwrap(),
            (parent, Some(first))
        );
        assert_eq!(
            resolve_insertion(&dom, &position(video, InsertionMethod::Before, parent)).unwrap(),
            (parent, Some(video))
        );
        assert_eq!(
            resolve_insertion(&dom, &position(first, InsertionMethod::After, parent)).unwrap(),
            (parent, Some(video))
        );
        assert_eq!(
            resolve_insertion(&dom, &position(video, InsertionMethod::After, parent)).unwrap(),
            (parent, None)
        );
    }

    #[test]
    fn should_refuse_stale_positions() {
        // given
        let mut dom = Dom::new();
        let parent = dom.create_element("div");
        let stray = dom.create_element("span");
        dom.append_child(dom.document(), parent).unwrap();

        // then
        let detached = ControllerPosition {
            insertion_point: stray,
            insertion_method: InsertionMethod::FirstChild,
            target_parent: stray,
        };
        assert!(resolve_insertion(&dom, &detached).is_err());
        let foreign = ControllerPosition {
            insertion_point: stray,
            insertion_method: InsertionMethod::Before,
            target_parent: parent,
        };
        assert!(resolve_insertion(&dom, &foreign).is_err());
    }

    #[test]
    fn should_detach_twice_without_error() {
        // given
        let mut dom = Dom::new();
        let document = dom.document();
        let overlay = Overlay::build(&mut dom, "c1", appearance(), false).unwrap();
        overlay.insert(&mut dom, document, None).unwrap();

        // when
        overlay.detach(&mut dom);
        overlay.detach(&mut dom);

        // then
        assert!(dom.node(overlay.wrapper).is_none());
        assert!(dom.children(document).is_empty());
    }
}
