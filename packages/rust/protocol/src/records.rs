//! Typed records produced by the streaming parser.

use serde::Serialize;

// ---------------------------------------------------------------------------
// XmlElement
// ---------------------------------------------------------------------------

/// An element captured verbatim from a response, children included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct XmlElement {
    /// Local element name.
    pub name: String,
    /// Attributes in document order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, String)>,
    /// Concatenated, trimmed text content of this element (not of its children).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Child elements in document order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Value of the attribute `key`, if present.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text content, `None` when empty.
    pub fn text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }

    /// Display name: literal text when present, otherwise the symbolic name
    /// (`name` attribute, then the element name itself).
    pub fn display_name(&self) -> &str {
        self.text()
            .or_else(|| self.attr("name").filter(|n| !n.is_empty()))
            .unwrap_or(self.name.as_str())
    }
}

// ---------------------------------------------------------------------------
// AssetRecord
// ---------------------------------------------------------------------------

/// One `asset` element, with its nested structure preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AssetRecord {
    element: XmlElement,
}

/// Reference to a nested child asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    /// Child asset identifier.
    pub id: String,
    /// Display name used to build the child's local path.
    pub display_name: String,
}

impl AssetRecord {
    /// Wrap a captured `asset` element.
    pub fn new(element: XmlElement) -> Self {
        Self { element }
    }

    /// Asset identifier (`id` attribute).
    pub fn id(&self) -> Option<&str> {
        self.element.attr("id").filter(|id| !id.is_empty())
    }

    /// Display name taken from the `path` field; `None` when the field is missing.
    pub fn display_name(&self) -> Option<&str> {
        self.element.child("path").map(XmlElement::display_name)
    }

    /// Direct children that carry an identifier, in document order.
    pub fn children(&self) -> impl Iterator<Item = ChildRef> + '_ {
        self.element.children.iter().filter_map(|child| {
            let id = child.attr("id").filter(|id| !id.is_empty())?;
            Some(ChildRef {
                id: id.to_string(),
                display_name: child.display_name().to_string(),
            })
        })
    }

    /// The preserved element.
    pub fn element(&self) -> &XmlElement {
        &self.element
    }
}

// ---------------------------------------------------------------------------
// DirectoryRecord
// ---------------------------------------------------------------------------

/// A child namespace discovered during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    /// Directory name (last namespace segment).
    pub name: String,
}

impl DirectoryRecord {
    /// Extract the name from a `directory` element: `name` attribute, then a
    /// `name` child, then the element's own text.
    pub fn from_element(element: &XmlElement) -> Option<Self> {
        let name = element
            .attr("name")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or_else(|| element.child("name").and_then(XmlElement::text))
            .or_else(|| element.text())?;
        Some(Self {
            name: name.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Record / QueryPage
// ---------------------------------------------------------------------------

/// One item of the parser's output sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A completed `asset` element.
    Asset(AssetRecord),
    /// A completed `directory` element. `None` when it carried no name.
    Directory(Option<DirectoryRecord>),
}

/// Result cursor reported by paginated queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Total number of matching results, when reported.
    pub total: Option<u64>,
    /// Results remaining after this page, when reported.
    pub remaining: Option<u64>,
}

/// Everything one call produced.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    /// Asset records in document order.
    pub assets: Vec<AssetRecord>,
    /// Directory records in document order.
    pub directories: Vec<DirectoryRecord>,
    /// `directory` elements that carried no name.
    pub unnamed_directories: usize,
    /// Result cursor, if the response carried one.
    pub cursor: PageCursor,
    /// Whole response body; only present when raw capture was requested.
    pub raw: Option<String>,
}
