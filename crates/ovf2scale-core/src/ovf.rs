//! OVF descriptor loading and field extraction.
//!
//! An OVF file is read into a small element tree rooted at the `Envelope`
//! element. Element names are matched by local name and attribute names by
//! qualified name (`ovf:id`), both ignoring ASCII case, so `<ovf:Envelope>`
//! and `<Envelope>` are treated alike.
//!
//! No schema validation is performed. A document that parses but lacks the
//! expected shape produces empty or partial results, or an error for the
//! lookups that cannot proceed without a value.

use std::fs;
use std::path::{Component, Path};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::debug;

use crate::error::{Error, Result};

/// An element of a parsed OVF document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

impl Element {
    /// The local name of the element, without any namespace prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an attribute by its qualified name (e.g. `ovf:href`).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Direct children in document order.
    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// Find the first descendant with the given local name, depth first.
    pub fn find(&self, name: &str) -> Option<&Element> {
        for child in &self.children {
            if child.is(name) {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Find every descendant with the given local name, in document order.
    pub fn find_all(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.is(name) {
                found.push(child);
            }
            child.collect(name, found);
        }
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();

        for attr in start.attributes() {
            let attr = attr
                .map_err(|e| Error::ovf_parse(format!("bad attribute on <{}>: {}", name, e)))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| Error::ovf_parse(format!("bad value for '{}': {}", key, e)))?
                .into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name,
            attributes,
            children: Vec::new(),
        })
    }
}

/// A `File` entry from the `References` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    /// The `ovf:id` of the file.
    pub id: String,
    /// The `ovf:href` of the file, relative to the descriptor.
    pub href: String,
}

/// A `Disk` entry from the `DiskSection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
    /// The `ovf:diskId` of the disk.
    pub disk_id: String,
    /// The `ovf:fileRef` pointing at a [`FileReference`], if any.
    pub file_ref: Option<String>,
    /// The declared `ovf:capacity`, unparsed.
    pub capacity: Option<String>,
    /// The declared `ovf:format` URI.
    pub format: Option<String>,
}

/// A `Network` entry from the `NetworkSection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEntry {
    /// The `ovf:name` of the network, if declared.
    pub name: Option<String>,
}

/// A loaded OVF descriptor.
#[derive(Debug, Clone)]
pub struct OvfDescriptor {
    envelope: Element,
}

impl OvfDescriptor {
    /// Load and parse an OVF file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not well-formed XML,
    /// or contains no `Envelope` element.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
        debug!(path = %path.display(), bytes = content.len(), "loaded OVF descriptor");
        Self::parse(&content)
    }

    /// Parse OVF content from a string.
    pub fn parse(xml: &str) -> Result<Self> {
        let root = parse_tree(xml)?;
        let envelope = if root.is("envelope") {
            root
        } else {
            root.find("envelope")
                .cloned()
                .ok_or_else(|| Error::missing_element("Envelope"))?
        };
        Ok(Self { envelope })
    }

    /// The `Envelope` element.
    pub fn envelope(&self) -> &Element {
        &self.envelope
    }

    /// The identifier of the virtual system, used as the VM name.
    ///
    /// Only the first `VirtualSystem` is considered.
    pub fn vm_name(&self) -> Result<&str> {
        let system = self
            .envelope
            .find("virtualsystem")
            .ok_or_else(|| Error::missing_element("VirtualSystem"))?;
        let name = system
            .attr("ovf:id")
            .ok_or_else(|| Error::missing_attribute("VirtualSystem", "ovf:id"))?;

        if !is_plain_dir_name(name) {
            return Err(Error::ovf_parse(format!(
                "VirtualSystem id '{}' cannot be used as a directory name",
                name
            )));
        }
        Ok(name)
    }

    /// Every `File` listed under `References`, in document order.
    ///
    /// A repeated id replaces the earlier entry's href in place.
    pub fn file_references(&self) -> Result<Vec<FileReference>> {
        let references = self.section("references", "References")?;
        let mut files: Vec<FileReference> = Vec::new();

        for file in references.find_all("file") {
            let id = required_attr(file, "File", "ovf:id")?;
            let href = required_attr(file, "File", "ovf:href")?;
            let entry = FileReference {
                id: id.clone(),
                href,
            };
            upsert(&mut files, |f| f.id == id, entry);
        }

        Ok(files)
    }

    /// Every `Disk` listed under `DiskSection`, in document order.
    ///
    /// A repeated disk id replaces the earlier entry in place.
    pub fn disks(&self) -> Result<Vec<DiskEntry>> {
        let section = self.section("disksection", "DiskSection")?;
        let mut disks: Vec<DiskEntry> = Vec::new();

        for disk in section.find_all("disk") {
            let disk_id = required_attr(disk, "Disk", "ovf:diskId")?;
            let entry = DiskEntry {
                disk_id: disk_id.clone(),
                file_ref: disk.attr("ovf:fileRef").map(str::to_string),
                capacity: disk.attr("ovf:capacity").map(str::to_string),
                format: disk.attr("ovf:format").map(str::to_string),
            };
            upsert(&mut disks, |d| d.disk_id == disk_id, entry);
        }

        Ok(disks)
    }

    /// Every `Network` listed under `NetworkSection`, in document order.
    pub fn networks(&self) -> Result<Vec<NetworkEntry>> {
        let section = self.section("networksection", "NetworkSection")?;
        Ok(section
            .find_all("network")
            .into_iter()
            .map(|network| NetworkEntry {
                name: network.attr("ovf:name").map(str::to_string),
            })
            .collect())
    }

    fn section(&self, name: &str, display: &str) -> Result<&Element> {
        self.envelope
            .find(name)
            .ok_or_else(|| Error::missing_element(display))
    }
}

/// Build the element tree for a whole document.
fn parse_tree(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            Error::ovf_parse(format!("at position {}: {}", reader.error_position(), e))
        })?;

        match event {
            Event::Start(ref start) => {
                if root.is_some() {
                    return Err(Error::ovf_parse("multiple root elements"));
                }
                stack.push(Element::from_start(start)?);
            }
            Event::Empty(ref start) => {
                let element = Element::from_start(start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::ovf_parse("unexpected closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(Error::ovf_parse(format!(
            "unexpected end of document inside <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| Error::ovf_parse("document has no root element"))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(Error::ovf_parse("multiple root elements")),
    }
    Ok(())
}

fn required_attr(element: &Element, display: &str, name: &str) -> Result<String> {
    element
        .attr(name)
        .map(str::to_string)
        .ok_or_else(|| Error::missing_attribute(display, name))
}

/// Replace the first entry matching `is_same`, or append.
fn upsert<T>(entries: &mut Vec<T>, is_same: impl Fn(&T) -> bool, entry: T) {
    match entries.iter_mut().find(|existing| is_same(existing)) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

/// True if `name` is a single, normal path component.
fn is_plain_dir_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}
