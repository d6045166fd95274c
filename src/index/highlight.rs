//! Match projector
//!
//! Re-streams a result node and marks the character ranges recorded in its
//! matches. Offsets of a match are relative to the string value of the
//! match's node, so the listener keeps one running offset per matched node
//! that is open on the current path (plus matched ancestors of the
//! serialized node, whose start offset is computed up front).
//!
//! Spans are emitted in offset order. Overlapping spans are not merged: each
//! is emitted as recorded.

use super::matches::Offset;
use crate::types::{Document, NodeEvent, NodeId, NodeProxy, QName};
use crate::{Result, StorageError};
use log::warn;
use std::ops::ControlFlow;

/// Local name of the element wrapping matched text.
pub const MATCH_ELEMENT: &str = "match";

/// Downstream event sink.
pub trait Receiver {
    fn start_element(&mut self, qname: &QName) -> Result<()>;
    fn attribute(&mut self, qname: &QName, value: &str) -> Result<()>;
    fn characters(&mut self, text: &str) -> Result<()>;
    fn end_element(&mut self, qname: &QName) -> Result<()>;
}

/// Replaces the default `match` wrapping.
pub trait MatchCallback {
    /// `node` is the text node holding `text`.
    fn on_match(&mut self, next: &mut dyn Receiver, text: &str, node: &NodeProxy) -> Result<()>;
}

//=============================================================================
// XML serializer
//=============================================================================

/// Minimal XML text receiver.
#[derive(Debug, Default)]
pub struct XmlSerializer {
    out: String,
    open: bool,
}

impl XmlSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }

    fn close_start_tag(&mut self) {
        if self.open {
            self.out.push('>');
            self.open = false;
        }
    }

    fn push_name(&mut self, qname: &QName) {
        if let Some(prefix) = qname.prefix() {
            self.out.push_str(prefix);
            self.out.push(':');
        }
        self.out.push_str(qname.local_name());
    }

    fn push_escaped(&mut self, text: &str, in_attribute: bool) {
        for c in text.chars() {
            match c {
                '&' => self.out.push_str("&amp;"),
                '<' => self.out.push_str("&lt;"),
                '>' => self.out.push_str("&gt;"),
                '"' if in_attribute => self.out.push_str("&quot;"),
                _ => self.out.push(c),
            }
        }
    }
}

impl Receiver for XmlSerializer {
    fn start_element(&mut self, qname: &QName) -> Result<()> {
        self.close_start_tag();
        self.out.push('<');
        self.push_name(qname);
        self.open = true;
        Ok(())
    }

    fn attribute(&mut self, qname: &QName, value: &str) -> Result<()> {
        if !self.open {
            return Err(StorageError::InvalidArgument(format!(
                "attribute {} outside a start tag",
                qname
            )));
        }
        self.out.push(' ');
        self.push_name(qname);
        self.out.push_str("=\"");
        self.push_escaped(value, true);
        self.out.push('"');
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        self.close_start_tag();
        self.push_escaped(text, false);
        Ok(())
    }

    fn end_element(&mut self, qname: &QName) -> Result<()> {
        if self.open {
            self.out.push_str("/>");
            self.open = false;
        } else {
            self.out.push_str("</");
            self.push_name(qname);
            self.out.push('>');
        }
        Ok(())
    }
}

//=============================================================================
// Listener
//=============================================================================

/// Running character offset inside a matched node.
#[derive(Debug)]
struct NodeOffset {
    node_id: NodeId,
    offset: u32,
}

pub struct MatchListener<'d, 'c, N: Receiver> {
    document: &'d Document,
    proxy: &'d NodeProxy,
    next: N,
    callback: Option<&'c mut dyn MatchCallback>,
    frames: Vec<NodeOffset>,
    depth: usize,
    match_qname: QName,
}

impl<'d, 'c, N: Receiver> MatchListener<'d, 'c, N> {
    pub fn new(document: &'d Document, proxy: &'d NodeProxy, next: N) -> Self {
        let mut listener = Self {
            document,
            proxy,
            next,
            callback: None,
            frames: Vec::new(),
            depth: 0,
            match_qname: QName::element(MATCH_ELEMENT),
        };
        listener.reset();
        listener
    }

    pub fn with_callback(mut self, callback: &'c mut dyn MatchCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Matches recorded on an ancestor of the serialized node: start their
    /// running offset at the serialized node's first character.
    fn reset(&mut self) {
        let proxy = self.proxy;
        let target = proxy.node_id();
        let mut ancestors: Vec<&NodeId> = proxy
            .matches()
            .iter()
            .map(|m| m.node_id())
            .filter(|id| target.is_descendant_of(id))
            .collect();
        ancestors.sort();
        ancestors.dedup();

        for ancestor in ancestors {
            let mut start = 0u32;
            let walked = self.document.walk_node(ancestor, &mut |event: &NodeEvent<'_>| {
                if event.node_id() == target {
                    return ControlFlow::Break(());
                }
                if let NodeEvent::Characters { text, .. } = event {
                    start += text.chars().count() as u32;
                }
                ControlFlow::Continue(())
            });
            match walked {
                Ok(_) => self.frames.push(NodeOffset {
                    node_id: ancestor.clone(),
                    offset: start,
                }),
                Err(e) => warn!("Problem found while locating match offsets: {}", e),
            }
        }
    }

    fn has_matches_on(&self, node_id: &NodeId) -> bool {
        self.proxy.matches().iter().any(|m| m.node_id() == node_id)
    }

    fn on_event(&mut self, event: &NodeEvent<'_>) -> Result<()> {
        match *event {
            NodeEvent::StartElement { node_id, qname } => {
                if self.has_matches_on(node_id) {
                    self.frames.push(NodeOffset {
                        node_id: node_id.clone(),
                        offset: 0,
                    });
                }
                self.depth += 1;
                self.next.start_element(qname)
            }
            NodeEvent::Attribute { node_id, qname, value } => {
                if self.depth > 0 {
                    return self.next.attribute(qname, value);
                }
                // the serialized node is the attribute itself
                if self.has_matches_on(node_id) {
                    self.frames.push(NodeOffset {
                        node_id: node_id.clone(),
                        offset: 0,
                    });
                }
                self.characters(node_id, value)
            }
            NodeEvent::Characters { node_id, text } => self.characters(node_id, text),
            NodeEvent::EndElement { node_id, qname } => {
                if self.frames.last().map_or(false, |f| &f.node_id == node_id) {
                    self.frames.pop();
                }
                self.depth = self.depth.saturating_sub(1);
                self.next.end_element(qname)
            }
        }
    }

    fn characters(&mut self, node_id: &NodeId, text: &str) -> Result<()> {
        let proxy = self.proxy;
        let len = text.chars().count() as u32;
        let mut spans: Vec<Offset> = Vec::new();
        for frame in &mut self.frames {
            let end = frame.offset + len;
            for m in proxy.matches().iter().filter(|m| m.node_id() == &frame.node_id) {
                for o in m.offsets() {
                    if o.offset < end && o.end() > frame.offset {
                        let from = o.offset.max(frame.offset) - frame.offset;
                        let to = o.end().min(end) - frame.offset;
                        spans.push(Offset::new(from, to - from));
                    }
                }
            }
            frame.offset = end;
        }

        if spans.is_empty() {
            return self.next.characters(text);
        }
        spans.sort();

        let chars: Vec<char> = text.chars().collect();
        let slice = |from: u32, to: u32| -> String { chars[from as usize..to as usize].iter().collect() };
        let mut pos = 0u32;
        for span in spans {
            if span.offset > pos {
                self.next.characters(&slice(pos, span.offset))?;
            }
            let matched = slice(span.offset, span.end());
            match self.callback.as_mut() {
                Some(callback) => {
                    let node = NodeProxy::new(proxy.doc_id(), node_id.clone());
                    callback.on_match(&mut self.next, &matched, &node)?;
                }
                None => {
                    self.next.start_element(&self.match_qname)?;
                    self.next.characters(&matched)?;
                    self.next.end_element(&self.match_qname)?;
                }
            }
            pos = span.end();
        }
        if pos < len {
            self.next.characters(&slice(pos, len))?;
        }
        Ok(())
    }

    /// Streams the proxy's node into the receiver and returns it.
    pub fn stream(mut self) -> Result<N> {
        let document = self.document;
        let proxy = self.proxy;
        let node_id = proxy.node_id();
        let mut failure = None;
        document.walk_node(node_id, &mut |event: &NodeEvent<'_>| match self.on_event(event) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                failure = Some(e);
                ControlFlow::Break(())
            }
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(self.next),
        }
    }
}

/// Serializes the node of `proxy` as XML with its matches marked.
pub fn serialize_with_matches(
    document: &Document,
    proxy: &NodeProxy,
    callback: Option<&mut dyn MatchCallback>,
) -> Result<String> {
    let listener = MatchListener::new(document, proxy, XmlSerializer::new());
    let listener = match callback {
        Some(callback) => listener.with_callback(callback),
        None => listener,
    };
    Ok(listener.stream()?.into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::matches::Match;
    use crate::index::ngram_index::tests::{open_index, paragraph};
    use crate::index::search::{Axis, CancellationToken, SearchRequest};
    use crate::types::{DocumentSet, NodeSet};
    use tempfile::TempDir;

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    fn proxy_with(doc_id: u32, node: &str, match_node: &str, offsets: &[(u32, u32)]) -> NodeProxy {
        let mut m = Match::new(1, id(match_node), "x");
        for &(offset, length) in offsets {
            m.add_offset(offset, length);
        }
        let mut proxy = NodeProxy::new(doc_id, id(node));
        proxy.add_match(m);
        proxy
    }

    fn nested() -> Document {
        // <p>a <b>cat</b> x</p>
        Document::builder(1, 1)
            .start_element(QName::element("p"))
            .text("a ")
            .leaf(QName::element("b"), "cat")
            .text(" x")
            .end_element()
            .build()
            .unwrap()
    }

    #[test]
    fn test_search_result_is_marked() {
        let temp_dir = TempDir::new().unwrap();
        let index = open_index(&temp_dir);
        let doc = paragraph(1, "The cat & sat");
        index.store_document(&doc);
        let docs: DocumentSet = [&doc].into_iter().collect();
        let ctx = CancellationToken::new();

        let result = index.search(&SearchRequest::new(1, &docs, "cat"), &ctx).unwrap();
        let proxy = result.iter().next().unwrap();
        assert_eq!(
            serialize_with_matches(&doc, proxy, None).unwrap(),
            "<p>The <match>cat</match> &amp; sat</p>"
        );

        // ancestor axis: the body is returned, the match stays on <p>
        let context: NodeSet = [NodeProxy::new(1, id("1"))].into_iter().collect();
        let request = SearchRequest::new(1, &docs, "sat").with_context(&context, Axis::Ancestor);
        let result = index.search(&request, &ctx).unwrap();
        let proxy = result.iter().next().unwrap();
        assert_eq!(
            serialize_with_matches(&doc, proxy, None).unwrap(),
            "<body><p>The cat &amp; <match>sat</match></p></body>"
        );
    }

    #[test]
    fn test_spans_cross_element_boundaries() {
        let doc = nested();
        let proxy = proxy_with(1, "1", "1", &[(2, 3)]);
        assert_eq!(
            serialize_with_matches(&doc, &proxy, None).unwrap(),
            "<p>a <b><match>cat</match></b> x</p>"
        );

        let proxy = proxy_with(1, "1", "1", &[(0, 3)]);
        assert_eq!(
            serialize_with_matches(&doc, &proxy, None).unwrap(),
            "<p><match>a </match><b><match>c</match>at</b> x</p>"
        );
    }

    #[test]
    fn test_offsets_of_matched_ancestor() {
        let doc = nested();
        // serializing <b> (1.2) while the match sits on <p>, after "a "
        let proxy = proxy_with(1, "1.2", "1", &[(2, 3), (6, 1)]);
        assert_eq!(serialize_with_matches(&doc, &proxy, None).unwrap(), "<b><match>cat</match></b>");
    }

    #[test]
    fn test_overlapping_spans_are_emitted_as_recorded() {
        let doc = Document::builder(1, 1).leaf(QName::element("p"), "abcd").build().unwrap();
        let proxy = proxy_with(1, "1", "1", &[(1, 3), (0, 3)]);
        assert_eq!(
            serialize_with_matches(&doc, &proxy, None).unwrap(),
            "<p><match>abc</match><match>bcd</match></p>"
        );
    }

    #[test]
    fn test_match_callback() {
        struct Shout {
            seen: Vec<String>,
        }
        impl MatchCallback for Shout {
            fn on_match(&mut self, next: &mut dyn Receiver, text: &str, node: &NodeProxy) -> Result<()> {
                self.seen.push(node.node_id().to_string());
                next.characters(&text.to_uppercase())
            }
        }

        let doc = paragraph(1, "The cat sat");
        let proxy = proxy_with(1, "1.1", "1.1", &[(4, 3), (8, 3)]);
        let mut shout = Shout { seen: Vec::new() };
        assert_eq!(
            serialize_with_matches(&doc, &proxy, Some(&mut shout)).unwrap(),
            "<p>The CAT SAT</p>"
        );
        assert_eq!(shout.seen, vec!["1.1.1", "1.1.1"]);
    }

    #[test]
    fn test_attribute_node_and_plain_output() {
        let doc = Document::builder(1, 1)
            .start_element(QName::element("p"))
            .attribute(QName::attribute("id"), "a\"cat\"")
            .leaf(QName::element("br"), "")
            .end_element()
            .build()
            .unwrap();
        let proxy = proxy_with(1, "1.1", "1.1", &[(2, 3)]);
        assert_eq!(serialize_with_matches(&doc, &proxy, None).unwrap(), "a\"<match>cat</match>\"");

        let plain = NodeProxy::new(1, id("1"));
        assert_eq!(
            serialize_with_matches(&doc, &plain, None).unwrap(),
            "<p id=\"a&quot;cat&quot;\"><br/></p>"
        );
    }
}
