//! Minimal CSS selector matching for form capture selectors
//!
//! Supports selector lists (`a, b`), descendant and child combinators, type
//! selectors, `*`, `#id`, `.class`, `[attr]` and `[attr=value]`. That covers
//! every `captureSelector` the configuration API hands out; anything else is a
//! parse error rather than a silent mismatch.

use crate::dom::{NodeId, Page};
use crate::error::{Error, Result};

/// A parsed selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    /// Compounds left to right; the combinator joins a compound to the one before it
    parts: Vec<(Combinator, Compound)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    value: Option<String>,
}

impl Selector {
    /// Parse a selector list
    pub fn parse(source: &str) -> Result<Self> {
        let err = |message: &str| Error::Selector {
            selector: source.to_string(),
            message: message.to_string(),
        };

        let mut alternatives = Vec::new();
        for alt in split_top_level(source) {
            let alt = alt.trim();
            if alt.is_empty() {
                return Err(err("empty selector in list"));
            }
            alternatives.push(parse_complex(alt).map_err(|m| err(&m))?);
        }
        if alternatives.is_empty() {
            return Err(err("empty selector"));
        }

        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    /// The `form` selector used when no capture selector is configured
    pub fn forms() -> Self {
        Self {
            source: "form".to_string(),
            alternatives: vec![Complex {
                parts: vec![(
                    Combinator::Descendant,
                    Compound {
                        tag: Some("form".to_string()),
                        ..Default::default()
                    },
                )],
            }],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Does the element `id` in `page` match any alternative?
    pub fn matches(&self, page: &Page, id: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|complex| complex.matches(page, id))
    }
}

impl Complex {
    fn matches(&self, page: &Page, id: NodeId) -> bool {
        match self.parts.last() {
            Some((_, compound)) if compound.matches(page, id) => {
                self.match_ancestors(page, self.parts.len() - 1, id)
            }
            _ => false,
        }
    }

    /// `id` matched `parts[idx]`; check the compounds before it
    fn match_ancestors(&self, page: &Page, idx: usize, id: NodeId) -> bool {
        if idx == 0 {
            return true;
        }
        let combinator = self.parts[idx].0;
        let previous = &self.parts[idx - 1].1;

        match combinator {
            Combinator::Child => page.parent(id).is_some_and(|parent| {
                previous.matches(page, parent) && self.match_ancestors(page, idx - 1, parent)
            }),
            Combinator::Descendant => {
                let mut current = page.parent(id);
                while let Some(ancestor) = current {
                    if previous.matches(page, ancestor)
                        && self.match_ancestors(page, idx - 1, ancestor)
                    {
                        return true;
                    }
                    current = page.parent(ancestor);
                }
                false
            }
        }
    }
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty()
    }

    fn matches(&self, page: &Page, id: NodeId) -> bool {
        let Some(element) = page.element(id) else {
            return false;
        };

        if let Some(tag) = &self.tag {
            if tag != "*" && !element.tag().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(expected) = &self.id {
            if element.attr("id") != Some(expected.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let classes: Vec<&str> = element
                .attr("class")
                .unwrap_or("")
                .split_whitespace()
                .collect();
            if !self
                .classes
                .iter()
                .all(|wanted| classes.contains(&wanted.as_str()))
            {
                return false;
            }
        }
        self.attrs.iter().all(|attr| match &attr.value {
            Some(value) => element.attr(&attr.name) == Some(value.as_str()),
            None => element.attr(&attr.name).is_some(),
        })
    }
}

/// Split on commas that are not inside brackets or quotes
fn split_top_level(source: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in source.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&source[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&source[start..]);
    parts
}

fn parse_complex(source: &str) -> std::result::Result<Complex, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut parts = Vec::new();
    let mut pos = 0;
    let mut combinator = Combinator::Descendant;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        if c == '>' {
            if parts.is_empty() {
                return Err("selector cannot start with a combinator".to_string());
            }
            combinator = Combinator::Child;
            pos += 1;
            continue;
        }

        let (compound, next) = parse_compound(&chars, pos)?;
        if compound.is_empty() {
            return Err(format!("unexpected character `{}`", c));
        }
        parts.push((combinator, compound));
        combinator = Combinator::Descendant;
        pos = next;
    }

    if parts.is_empty() {
        return Err("empty selector".to_string());
    }
    if combinator == Combinator::Child {
        return Err("selector cannot end with a combinator".to_string());
    }
    Ok(Complex { parts })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], mut pos: usize) -> (String, usize) {
    let start = pos;
    while pos < chars.len() && is_ident_char(chars[pos]) {
        pos += 1;
    }
    (chars[start..pos].iter().collect(), pos)
}

fn parse_compound(chars: &[char], mut pos: usize) -> std::result::Result<(Compound, usize), String> {
    let mut compound = Compound::default();

    if pos < chars.len() && chars[pos] == '*' {
        compound.tag = Some("*".to_string());
        pos += 1;
    } else if pos < chars.len() && is_ident_char(chars[pos]) {
        let (tag, next) = read_ident(chars, pos);
        compound.tag = Some(tag.to_ascii_lowercase());
        pos = next;
    }

    while pos < chars.len() {
        match chars[pos] {
            '#' => {
                let (id, next) = read_ident(chars, pos + 1);
                if id.is_empty() {
                    return Err("expected id after `#`".to_string());
                }
                compound.id = Some(id);
                pos = next;
            }
            '.' => {
                let (class, next) = read_ident(chars, pos + 1);
                if class.is_empty() {
                    return Err("expected class after `.`".to_string());
                }
                compound.classes.push(class);
                pos = next;
            }
            '[' => {
                let (attr, next) = parse_attr(chars, pos + 1)?;
                compound.attrs.push(attr);
                pos = next;
            }
            c if c.is_whitespace() || c == '>' => break,
            c => return Err(format!("unsupported selector syntax at `{}`", c)),
        }
    }

    Ok((compound, pos))
}

fn parse_attr(chars: &[char], pos: usize) -> std::result::Result<(AttrMatch, usize), String> {
    let (name, mut pos) = read_ident(chars, pos);
    if name.is_empty() {
        return Err("expected attribute name after `[`".to_string());
    }

    match chars.get(pos) {
        Some(']') => Ok((AttrMatch { name, value: None }, pos + 1)),
        Some('=') => {
            pos += 1;
            let value = match chars.get(pos) {
                Some(&q) if q == '"' || q == '\'' => {
                    let start = pos + 1;
                    let end = chars[start..]
                        .iter()
                        .position(|&c| c == q)
                        .map(|offset| start + offset)
                        .ok_or_else(|| "unterminated attribute value".to_string())?;
                    pos = end + 1;
                    chars[start..end].iter().collect()
                }
                _ => {
                    let (value, next) = read_ident(chars, pos);
                    pos = next;
                    value
                }
            };
            if chars.get(pos) != Some(&']') {
                return Err("expected `]`".to_string());
            }
            Ok((
                AttrMatch {
                    name,
                    value: Some(value),
                },
                pos + 1,
            ))
        }
        _ => Err("unsupported attribute selector".to_string()),
    }
}
