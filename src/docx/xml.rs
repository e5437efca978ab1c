use anyhow::{anyhow, Context};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Reader;

pub type NodeId = usize;

#[derive(Clone, Debug)]
pub struct XmlDecl {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Element {
        name: String,
        /// Values are kept in their escaped source form.
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Text(String),
    CData(String),
    Comment(String),
    PI(String),
    DocType(String),
}

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed element tree for one package part. Node handles stay valid
/// for the lifetime of the tree; detached nodes are simply unreachable.
#[derive(Clone, Debug)]
pub struct XmlTree {
    pub name: String,
    decl: Option<XmlDecl>,
    nodes: Vec<Node>,
    top: Vec<NodeId>,
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

fn collect_attrs(s: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for a in s.attributes() {
        let a = a.context("attr")?;
        // Raw bytes: character references such as `&#13;&#10;` must survive a rewrite.
        attrs.push((bytes_to_string(a.key.as_ref()), bytes_to_string(a.value.as_ref())));
    }
    Ok(attrs)
}

fn escape_text_into(out: &mut Vec<u8>, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

fn local_of(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}

/// `prefix:local`, or just `local` for the default namespace.
pub fn qualify(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{prefix}:{local}")
    }
}

impl XmlTree {
    pub fn parse(name: &str, xml_bytes: &[u8]) -> anyhow::Result<Self> {
        let mut reader = Reader::from_reader(xml_bytes);
        reader.config_mut().trim_text(false);

        let mut tree = XmlTree {
            name: name.to_string(),
            decl: None,
            nodes: Vec::new(),
            top: Vec::new(),
        };
        let mut stack: Vec<NodeId> = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let ev = reader
                .read_event_into(&mut buf)
                .with_context(|| format!("read xml event in {name}"))?;
            let parent = stack.last().copied();
            match ev {
                Event::Eof => break,
                Event::Decl(d) => {
                    let version = bytes_to_string(d.version().context("decl version")?);
                    let encoding = d
                        .encoding()
                        .map(|r| r.map(bytes_to_string))
                        .transpose()
                        .unwrap_or(None);
                    let standalone = d
                        .standalone()
                        .map(|r| r.map(bytes_to_string))
                        .transpose()
                        .unwrap_or(None);
                    tree.decl = Some(XmlDecl {
                        version,
                        encoding,
                        standalone,
                    });
                }
                Event::Start(s) => {
                    let id = tree.push(
                        parent,
                        NodeKind::Element {
                            name: bytes_to_string(s.name().as_ref()),
                            attrs: collect_attrs(&s)?,
                            self_closing: false,
                        },
                    );
                    stack.push(id);
                }
                Event::End(e) => {
                    let closing = bytes_to_string(e.name().as_ref());
                    let open = stack
                        .pop()
                        .ok_or_else(|| anyhow!("unbalanced </{closing}> in {name}"))?;
                    if tree.name(open) != closing {
                        return Err(anyhow!(
                            "mismatched </{closing}> for <{}> in {name}",
                            tree.name(open)
                        ));
                    }
                }
                Event::Empty(s) => {
                    tree.push(
                        parent,
                        NodeKind::Element {
                            name: bytes_to_string(s.name().as_ref()),
                            attrs: collect_attrs(&s)?,
                            self_closing: true,
                        },
                    );
                }
                Event::Text(t) => {
                    let txt = t.unescape().context("unescape text")?.into_owned();
                    tree.push(parent, NodeKind::Text(txt));
                }
                Event::CData(t) => {
                    tree.push(parent, NodeKind::CData(bytes_to_string(t.into_inner())));
                }
                Event::Comment(t) => {
                    tree.push(parent, NodeKind::Comment(bytes_to_string(t.into_inner())));
                }
                Event::PI(t) => {
                    let content = format!(
                        "{}{}",
                        bytes_to_string(t.target()),
                        bytes_to_string(t.content())
                    );
                    tree.push(parent, NodeKind::PI(content));
                }
                Event::DocType(t) => {
                    tree.push(parent, NodeKind::DocType(bytes_to_string(t.into_inner())));
                }
            }
        }
        if let Some(open) = stack.last() {
            return Err(anyhow!("unclosed <{}> in {name}", tree.name(*open)));
        }
        Ok(tree)
    }

    fn push(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(id),
            None => self.top.push(id),
        }
        id
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut out: Vec<u8> = Vec::new();
        if let Some(d) = self.decl.as_ref() {
            let decl = BytesDecl::new(d.version.as_str(), d.encoding.as_deref(), d.standalone.as_deref());
            let mut writer = quick_xml::Writer::new(Vec::new());
            writer.write_event(Event::Decl(decl)).context("write decl")?;
            out.extend_from_slice(&writer.into_inner());
        }
        for &id in &self.top {
            self.write_node(id, &mut out);
        }
        Ok(out)
    }

    fn write_node(&self, id: NodeId, out: &mut Vec<u8>) {
        let node = &self.nodes[id];
        match &node.kind {
            NodeKind::Element {
                name,
                attrs,
                self_closing,
            } => {
                out.push(b'<');
                out.extend_from_slice(name.as_bytes());
                for (k, v) in attrs {
                    out.push(b' ');
                    out.extend_from_slice(k.as_bytes());
                    out.extend_from_slice(b"=\"");
                    out.extend_from_slice(v.as_bytes());
                    out.push(b'"');
                }
                if node.children.is_empty() && *self_closing {
                    out.extend_from_slice(b"/>");
                    return;
                }
                out.push(b'>');
                for &c in &node.children {
                    self.write_node(c, out);
                }
                out.extend_from_slice(b"</");
                out.extend_from_slice(name.as_bytes());
                out.push(b'>');
            }
            NodeKind::Text(text) => escape_text_into(out, text),
            NodeKind::CData(text) => {
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            NodeKind::Comment(text) => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            NodeKind::PI(content) => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            NodeKind::DocType(text) => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.push(b'>');
            }
        }
    }

    pub fn root(&self) -> Option<NodeId> {
        self.top.iter().copied().find(|&id| self.is_element(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id < self.nodes.len()
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id].kind, NodeKind::Element { .. })
    }

    /// Qualified element name; empty for non-element nodes.
    pub fn name(&self, id: NodeId) -> &str {
        match &self.nodes[id].kind {
            NodeKind::Element { name, .. } => name.as_str(),
            _ => "",
        }
    }

    pub fn local_name(&self, id: NodeId) -> &str {
        local_of(self.name(id))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id]
            .children
            .iter()
            .copied()
            .filter(move |&c| self.is_element(c))
    }

    pub fn find_child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.element_children(id).find(|&c| self.name(c) == name)
    }

    pub fn find_child_local(&self, id: NodeId, local: &str) -> Option<NodeId> {
        self.element_children(id).find(|&c| self.local_name(c) == local)
    }

    pub fn attr(&self, id: NodeId, key: &str) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Looks an attribute up by its local name, whatever its prefix.
    pub fn attr_local(&self, id: NodeId, local: &str) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| local_of(k) == local && !k.starts_with("xmlns"))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Unescaped value of [`attr_local`](Self::attr_local); malformed
    /// references are returned as stored.
    pub fn attr_value(&self, id: NodeId, local: &str) -> Option<String> {
        self.attr_local(id, local)
            .map(|raw| match quick_xml::escape::unescape(raw) {
                Ok(v) => v.into_owned(),
                Err(_) => raw.to_string(),
            })
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match &self.nodes[id].kind {
            NodeKind::Element { attrs, .. } => attrs.as_slice(),
            _ => &[],
        }
    }

    /// Sets an attribute from an unescaped value.
    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        let escaped = quick_xml::escape::escape(value).into_owned();
        self.set_attr_raw(id, key, escaped);
    }

    pub fn set_attr_raw(&mut self, id: NodeId, key: &str, raw: String) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id].kind {
            if let Some(slot) = attrs.iter_mut().find(|(k, _)| k == key) {
                slot.1 = raw;
            } else {
                attrs.push((key.to_string(), raw));
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, key: &str) -> bool {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[id].kind {
            let before = attrs.len();
            attrs.retain(|(k, _)| k != key);
            return attrs.len() != before;
        }
        false
    }

    fn new_element(&mut self, name: &str) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind: NodeKind::Element {
                name: name.to_string(),
                attrs: Vec::new(),
                self_closing: true,
            },
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn insert_element(&mut self, parent: NodeId, index: usize, name: &str) -> NodeId {
        let id = self.new_element(name);
        self.nodes[id].parent = Some(parent);
        let children = &mut self.nodes[parent].children;
        let index = index.min(children.len());
        children.insert(index, id);
        id
    }

    /// Returns the child called `name`, creating it in schema position when
    /// missing. `order` lists the sibling local names in schema order.
    pub fn ensure_child_ordered(&mut self, parent: NodeId, name: &str, order: &[&str]) -> NodeId {
        if let Some(existing) = self.find_child(parent, name) {
            return existing;
        }
        let local = local_of(name);
        let rank = order.iter().position(|o| *o == local);
        let mut index = self.nodes[parent].children.len();
        if let Some(rank) = rank {
            for (i, &c) in self.nodes[parent].children.iter().enumerate() {
                if !self.is_element(c) {
                    continue;
                }
                let later = order
                    .iter()
                    .position(|o| *o == self.local_name(c))
                    .is_some_and(|r| r > rank);
                if later {
                    index = i;
                    break;
                }
            }
        }
        self.insert_element(parent, index, name)
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let children = &mut self.nodes[parent].children;
        let before = children.len();
        children.retain(|&c| c != child);
        let removed = children.len() != before;
        if removed {
            self.nodes[child].parent = None;
        }
        removed
    }

    /// Pre-order descendants of `id`, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.nodes[n].children.iter().rev().copied());
        }
        out
    }

    pub fn descendants_named(&self, id: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.name(n) == name)
            .collect()
    }

    pub fn descendants_local(&self, id: NodeId, local: &str) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .filter(|&n| self.is_element(n) && self.local_name(n) == local)
            .collect()
    }

    pub fn ancestor_where(&self, id: NodeId, pred: impl Fn(&str) -> bool) -> Option<NodeId> {
        let mut cur = self.parent(id);
        while let Some(n) = cur {
            if self.is_element(n) && pred(self.name(n)) {
                return Some(n);
            }
            cur = self.parent(n);
        }
        None
    }

    pub fn nearest_ancestor_local(&self, id: NodeId, local: &str) -> Option<NodeId> {
        self.ancestor_where(id, |n| local_of(n) == local)
    }

    /// Concatenated character data directly under an element.
    pub fn text_of(&self, id: NodeId) -> String {
        let mut s = String::new();
        for &c in &self.nodes[id].children {
            match &self.nodes[c].kind {
                NodeKind::Text(t) | NodeKind::CData(t) => s.push_str(t),
                _ => {}
            }
        }
        s
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        let old: Vec<NodeId> = std::mem::take(&mut self.nodes[id].children);
        for c in old {
            self.nodes[c].parent = None;
        }
        if text.is_empty() {
            return;
        }
        let t = self.nodes.len();
        self.nodes.push(Node {
            kind: NodeKind::Text(text.to_string()),
            parent: Some(id),
            children: Vec::new(),
        });
        self.nodes[id].children.push(t);
    }

    /// Prefix bound to `uri` on the root element; `Some("")` for a default
    /// namespace binding.
    pub fn prefix_for_namespace(&self, uri: &str) -> Option<String> {
        let root = self.root()?;
        self.attrs(root).iter().find_map(|(k, v)| {
            if v != uri {
                return None;
            }
            if k == "xmlns" {
                Some(String::new())
            } else {
                k.strip_prefix("xmlns:").map(str::to_string)
            }
        })
    }
}
