//! Parsing of server-rendered gallery item fragments.
//!
//! A successful upload responds with one fully-rendered fragment (image,
//! delete affordance, caption field) that the client inserts verbatim; the
//! server stays the single source of truth for item presentation. The
//! client only needs to read a few things back out of the markup: the
//! image id (a path segment of the served image URL), the caption field,
//! and class-marked hooks for delete handling. Fragments are well-formed
//! markup; anything the parser cannot walk is a [`GalleryError::Fragment`].

use quick_xml::events::Event;
use quick_xml::Reader;
use shared::domain::ImageId;

use crate::error::GalleryError;

pub type NodeId = usize;

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: Vec<(String, String)>,
    classes: Vec<String>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: String,
}

/// Parent-linked element arena over one item fragment, in document order.
#[derive(Debug, Clone)]
pub struct Fragment {
    nodes: Vec<Node>,
}

/// Caption field found inside a fragment: its form name and any
/// server-rendered initial value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionSpec {
    pub name: String,
    pub initial: String,
}

/// What the coordinator needs from a fragment to admit the item.
#[derive(Debug, Clone)]
pub struct ItemSummary {
    pub image: ImageId,
    pub caption: Option<CaptionSpec>,
}

impl Fragment {
    pub fn parse(markup: &str) -> Result<Self, GalleryError> {
        let mut reader = Reader::from_str(markup);
        reader.config_mut().trim_text(true);

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(ref e)) => {
                    let id = Self::push_node(&mut nodes, &stack, e)?;
                    stack.push(id);
                }
                Ok(Event::Empty(ref e)) => {
                    Self::push_node(&mut nodes, &stack, e)?;
                }
                Ok(Event::Text(ref e)) => {
                    if let Some(&top) = stack.last() {
                        let text = e
                            .unescape()
                            .map_err(|err| GalleryError::Fragment(err.to_string()))?;
                        if !nodes[top].text.is_empty() {
                            nodes[top].text.push(' ');
                        }
                        nodes[top].text.push_str(text.trim());
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => return Err(GalleryError::Fragment(err.to_string())),
            }
        }

        if !stack.is_empty() {
            return Err(GalleryError::Fragment("unclosed element".into()));
        }
        if nodes.is_empty() {
            return Err(GalleryError::Fragment("fragment has no elements".into()));
        }

        Ok(Self { nodes })
    }

    fn push_node(
        nodes: &mut Vec<Node>,
        stack: &[NodeId],
        start: &quick_xml::events::BytesStart<'_>,
    ) -> Result<NodeId, GalleryError> {
        let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|err| GalleryError::Fragment(err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| GalleryError::Fragment(err.to_string()))?
                .into_owned();
            attrs.push((key, value));
        }
        let classes = attrs
            .iter()
            .find(|(key, _)| key == "class")
            .map(|(_, value)| value.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let parent = stack.last().copied();
        let id = nodes.len();
        nodes.push(Node {
            tag,
            attrs,
            classes,
            parent,
            children: Vec::new(),
            text: String::new(),
        });
        if let Some(parent) = parent {
            nodes[parent].children.push(id);
        }
        Ok(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).map(|n| n.tag.as_str())
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes.get(node)?.attrs.iter().find_map(|(key, value)| {
            if key == name {
                Some(value.as_str())
            } else {
                None
            }
        })
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).map(|n| n.text.as_str())
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|n| n.classes.iter().any(|c| c == class))
    }

    /// First element with the given tag, in document order.
    pub fn first_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.tag == tag)
    }

    /// First element carrying the given class, in document order.
    pub fn first_by_class(&self, class: &str) -> Option<NodeId> {
        (0..self.nodes.len()).find(|&id| self.has_class(id, class))
    }

    pub fn first_element_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node)?.children.first().copied()
    }

    /// Closest element with the given class, starting at `node` itself and
    /// walking up through ancestors. Affordances can be nested inside
    /// decorative wrappers, so a direct parent lookup is not enough.
    pub fn closest_with_class(&self, node: NodeId, class: &str) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if self.has_class(id, class) {
                return Some(id);
            }
            current = self.nodes.get(id)?.parent;
        }
        None
    }

    pub fn image_src(&self) -> Option<&str> {
        let img = self.first_by_tag("img")?;
        self.attr(img, "src")
    }

    /// Caption field of the fragment: the first textarea, keyed by its
    /// `name` (falling back to `id`), with any pre-rendered value.
    pub fn caption_spec(&self) -> Option<CaptionSpec> {
        let field = self.first_by_tag("textarea")?;
        let name = self
            .attr(field, "name")
            .or_else(|| self.attr(field, "id"))?
            .to_string();
        let initial = self.text(field).unwrap_or_default().to_string();
        Some(CaptionSpec { name, initial })
    }

    pub fn item_summary(&self) -> Result<ItemSummary, GalleryError> {
        let src = self
            .image_src()
            .ok_or_else(|| GalleryError::Fragment("fragment has no image".into()))?;
        let image = image_id_from_src(src).ok_or_else(|| {
            GalleryError::Fragment(format!("image src '{src}' has no id segment"))
        })?;
        Ok(ItemSummary {
            image,
            caption: self.caption_spec(),
        })
    }
}

/// The image id is the third `/`-separated field of the served image URL,
/// e.g. `/image/123/small` -> `123`.
pub fn image_id_from_src(src: &str) -> Option<ImageId> {
    let fields: Vec<&str> = src.split('/').collect();
    let id = fields.get(2)?;
    if id.is_empty() {
        None
    } else {
        Some(ImageId::new(*id))
    }
}
