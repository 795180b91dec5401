//! Strategies for finding the viewer frame in a parsed page.

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

/// Where the material-detail page currently nests its viewer frame
pub const DEFAULT_FRAME_PATH: &str =
    "/html/body/div[1]/div/div/div[3]/div[5]/div/div/div/div[3]/div/div/div/div/div/iframe";

/// Substring identifying the document viewer's address
pub const DEFAULT_VIEWER_MARKER: &str = "viewer.html";

pub trait FrameLocator: Send + Sync + std::fmt::Debug {
    /// Find the frame element, or `None` when the page has no candidate.
    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidPath {
    #[error("frame path must be absolute: {0}")]
    NotAbsolute(String),
    #[error("empty step in frame path: {0}")]
    EmptyStep(String),
    #[error("bad position in frame path step `{0}`")]
    BadPosition(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    tag: String,
    /// 1-based position among siblings with the same tag
    position: Option<usize>,
}

/// Walks an absolute XPath-style child path such as `/html/body/div[2]/iframe`.
///
/// `tag[n]` selects the n-th child element named `tag`; a bare `tag` selects
/// every such child. The first complete match in document order wins.
#[derive(Debug, Clone)]
pub struct PositionalPath {
    steps: Vec<Step>,
}

impl PositionalPath {
    pub fn parse(path: &str) -> Result<Self, InvalidPath> {
        let Some(rest) = path.strip_prefix('/') else {
            return Err(InvalidPath::NotAbsolute(path.to_string()));
        };

        let steps = rest
            .split('/')
            .map(|raw| {
                if raw.is_empty() {
                    return Err(InvalidPath::EmptyStep(path.to_string()));
                }
                match raw.split_once('[') {
                    Some((tag, position)) => {
                        let position = position
                            .strip_suffix(']')
                            .and_then(|p| p.parse::<usize>().ok())
                            .filter(|p| *p > 0)
                            .ok_or_else(|| InvalidPath::BadPosition(raw.to_string()))?;
                        if tag.is_empty() {
                            return Err(InvalidPath::EmptyStep(path.to_string()));
                        }
                        Ok(Step {
                            tag: tag.to_ascii_lowercase(),
                            position: Some(position),
                        })
                    }
                    None => Ok(Step {
                        tag: raw.to_ascii_lowercase(),
                        position: None,
                    }),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { steps })
    }

    fn walk<'a>(element: ElementRef<'a>, steps: &[Step]) -> Option<ElementRef<'a>> {
        let Some((step, rest)) = steps.split_first() else {
            return Some(element);
        };

        let mut matching = element
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|child| child.value().name() == step.tag);

        match step.position {
            Some(n) => matching.nth(n - 1).and_then(|child| Self::walk(child, rest)),
            None => matching.find_map(|child| Self::walk(child, rest)),
        }
    }
}

impl Default for PositionalPath {
    fn default() -> Self {
        Self::parse(DEFAULT_FRAME_PATH).expect("default frame path is valid")
    }
}

impl FrameLocator for PositionalPath {
    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        let (root_step, rest) = self.steps.split_first()?;
        let root = document.root_element();
        if root.value().name() != root_step.tag || root_step.position.is_some_and(|p| p != 1) {
            return None;
        }
        Self::walk(root, rest)
    }

    fn name(&self) -> &'static str {
        "path"
    }
}

/// First `iframe` whose `src` contains the marker.
#[derive(Debug, Clone)]
pub struct MarkerSelector {
    marker: String,
    selector: Selector,
}

impl MarkerSelector {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            selector: Selector::parse("iframe[src]").expect("static selector"),
        }
    }
}

impl FrameLocator for MarkerSelector {
    fn locate<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        document.select(&self.selector).find(|frame| {
            frame
                .value()
                .attr("src")
                .is_some_and(|src| src.contains(&self.marker))
        })
    }

    fn name(&self) -> &'static str {
        "marker"
    }
}
