use std::str::FromStr;

use anyhow::{anyhow, bail};

use crate::dom::{Dom, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeMatch {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeMatch>,
}

impl Compound {
    fn matches(&self, dom: &Dom, id: NodeId) -> bool {
        let Some(node) = dom.node(id) else {
            return false;
        };
        let Some(tag) = node.tag() else {
            return false;
        };
        if self.tag.as_deref().is_some_and(|expected| expected != tag) {
            return false;
        }
        if self
            .id
            .as_deref()
            .is_some_and(|expected| node.attribute("id") != Some(expected))
        {
            return false;
        }
        let classes = node.attribute("class").unwrap_or_default();
        if !self
            .classes
            .iter()
            .all(|class| classes.split_whitespace().any(|c| c == class))
        {
            return false;
        }
        self.attributes.iter().all(|attr| match &attr.value {
            Some(value) => node.attribute(&attr.name) == Some(value.as_str()),
            None => node.has_attribute(&attr.name),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    parts: Vec<(Combinator, Compound)>,
}

impl Complex {
    fn matches(&self, dom: &Dom, id: NodeId) -> bool {
        self.matches_from(self.parts.len() - 1, dom, id)
    }

    fn matches_from(&self, index: usize, dom: &Dom, id: NodeId) -> bool {
        let (combinator, compound) = &self.parts[index];
        if !compound.matches(dom, id) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match combinator {
            Combinator::Child => dom
                .parent(id)
                .is_some_and(|parent| self.matches_from(index - 1, dom, parent)),
            Combinator::Descendant => {
                let mut ancestor = dom.parent(id);
                while let Some(candidate) = ancestor {
                    if self.matches_from(index - 1, dom, candidate) {
                        return true;
                    }
                    ancestor = dom.parent(candidate);
                }
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<Complex>,
}

impl SelectorList {
    pub fn parse(source: &str) -> anyhow::Result<Self> {
        Parser::new(source)
            .parse_list()
            .map_err(|err| err.context(format!("Invalid selector '{source}'")))
    }

    pub fn matches(&self, dom: &Dom, id: NodeId) -> bool {
        self.selectors.iter().any(|selector| selector.matches(dom, id))
    }
}

impl FromStr for SelectorList {
    type Err = anyhow::Error;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        Self::parse(source)
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| self.chars[start..self.pos].iter().collect())
    }

    fn expect_ident(&mut self, what: &str) -> anyhow::Result<String> {
        self.ident()
            .ok_or_else(|| anyhow!("Expected {what} at position {}", self.pos))
    }

    fn parse_list(&mut self) -> anyhow::Result<SelectorList> {
        let mut selectors = vec![self.parse_complex()?];
        while self.eat(',') {
            selectors.push(self.parse_complex()?);
        }
        if let Some(c) = self.peek() {
            bail!("Unexpected character '{c}' at position {}", self.pos);
        }
        Ok(SelectorList { selectors })
    }

    fn parse_complex(&mut self) -> anyhow::Result<Complex> {
        self.skip_whitespace();
        let mut parts = vec![(Combinator::Descendant, self.parse_compound()?)];
        loop {
            let had_whitespace = self.skip_whitespace();
            match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.bump();
                    self.skip_whitespace();
                    parts.push((Combinator::Child, self.parse_compound()?));
                }
                Some(_) if had_whitespace => {
                    parts.push((Combinator::Descendant, self.parse_compound()?));
                }
                Some(c) => bail!("Unexpected character '{c}' at position {}", self.pos),
            }
        }
        Ok(Complex { parts })
    }

    fn parse_compound(&mut self) -> anyhow::Result<Compound> {
        let start = self.pos;
        let mut compound = Compound::default();
        if self.eat('*') {
            // universal selector matches any tag
        } else if let Some(tag) = self.ident() {
            compound.tag = Some(tag.to_ascii_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.bump();
                    compound.id = Some(self.expect_ident("an id")?);
                }
                Some('.') => {
                    self.bump();
                    compound.classes.push(self.expect_ident("a class name")?);
                }
                Some('[') => {
                    self.bump();
                    compound.attributes.push(self.parse_attribute()?);
                }
                _ => break,
            }
        }
        if self.pos == start {
            match self.peek() {
                Some(c) => bail!("Expected a selector at position {}, found '{c}'", self.pos),
                None => bail!("Expected a selector at position {}", self.pos),
            }
        }
        Ok(compound)
    }

    fn parse_attribute(&mut self) -> anyhow::Result<AttributeMatch> {
        self.skip_whitespace();
        let name = self.expect_ident("an attribute name")?;
        self.skip_whitespace();
        let value = if self.eat('=') {
            self.skip_whitespace();
            let value = match self.peek() {
                Some(quote @ ('"' | '\'')) => {
                    self.bump();
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c != quote) {
                        self.pos += 1;
                    }
                    let value: String = self.chars[start..self.pos].iter().collect();
                    if !self.eat(quote) {
                        bail!("Unterminated attribute value");
                    }
                    value
                }
                _ => self.expect_ident("an attribute value")?,
            };
            self.skip_whitespace();
            Some(value)
        } else {
            None
        };
        if !self.eat(']') {
            bail!("Expected ']' at position {}", self.pos);
        }
        Ok(AttributeMatch { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dom() -> (Dom, NodeId, NodeId, NodeId) {
        let mut dom = Dom::new();
        let player = dom.create_element("div");
        dom.set_attribute(player, "id", "player").unwrap();
        dom.set_attribute(player, "class", "shell html5-player").unwrap();
        let stage = dom.create_element("section");
        dom.set_attribute(stage, "data-role", "stage").unwrap();
        let video = dom.create_element("video");
        dom.append_child(dom.document(), player).unwrap();
        dom.append_child(player, stage).unwrap();
        dom.append_child(stage, video).unwrap();
        (dom, player, stage, video)
    }

    #[test]
    fn should_match_compound_selectors() {
        // given
        let (dom, player, stage, _) = sample_dom();

        // then
        assert!(SelectorList::parse("div#player.html5-player")
            .unwrap()
            .matches(&dom, player));
        assert!(SelectorList::parse("[data-role=\"stage\"]")
            .unwrap()
            .matches(&dom, stage));
        assert!(SelectorList::parse("*[data-role]")
            .unwrap()
            .matches(&dom, stage));
        assert!(!SelectorList::parse(".missing").unwrap().matches(&dom, player));
    }

    #[test]
    fn should_match_combinators() {
        // given
        let (dom, _, _, video) = sample_dom();

        // then
        assert!(SelectorList::parse("#player video")
            .unwrap()
            .matches(&dom, video));
        assert!(SelectorList::parse("section > video")
            .unwrap()
            .matches(&dom, video));
        assert!(!SelectorList::parse("#player > video")
            .unwrap()
            .matches(&dom, video));
        assert!(SelectorList::parse("audio, .shell video")
            .unwrap()
            .matches(&dom, video));
    }

    #[test]
    fn should_query_all_in_document_order() {
        // given
        let (dom, player, stage, _) = sample_dom();
        let selector = SelectorList::parse("div, section").unwrap();

        // when
        let found = dom.query_selector_all(dom.document(), &selector);

        // then
        assert_eq!(found, vec![player, stage]);
    }

    #[test]
    fn should_reject_malformed_selectors() {
        for source in ["", "div >", "[data-x", "..a", "div,", "a[b='c]", "#", "div $ p"] {
            assert!(
                SelectorList::parse(source).is_err(),
                "'{source}' should not parse"
            );
        }
    }
}
