//! Fixed-string search over the n-gram index
//!
//! The query is cut into non-overlapping chunks of `n` characters. The first
//! chunk is searched as is; a shorter last chunk is left-filled with the tail
//! of the previous chunk so it is still an exact lookup. A node survives a
//! step only if a match of the previous chunks is directly continued by a
//! match of the current one.
//!
//! Wildcard search looks up each literal part of the query the same way and
//! keeps the nodes where consecutive parts are separated by an allowed number
//! of characters.

use super::matches::{ContextId, Match};
use super::ngram_index::NGramIndex;
use super::search::{QueryContext, SearchRequest};
use super::wildcard::{Gap, Term, WildcardQuery};
use crate::types::{DocumentSource, NodeProxy, NodeSet};
use crate::Result;
use log::{debug, trace};

/// Anchoring of a fixed-string search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMatch {
    Contains,
    StartsWith,
    EndsWith,
}

impl NGramIndex {
    /// Nodes containing `request.query` anywhere.
    pub fn contains(&self, request: &SearchRequest<'_>, ctx: &dyn QueryContext) -> Result<NodeSet> {
        let result = self.fixed_string(request, ctx)?;
        Ok(own_matches_without_overlaps(result, request.context_id))
    }

    /// Nodes whose text starts with `request.query`.
    pub fn starts_with(&self, request: &SearchRequest<'_>, ctx: &dyn QueryContext) -> Result<NodeSet> {
        let mut result = self.fixed_string(request, ctx)?;
        result.retain(|proxy| {
            own_matches(proxy, request.context_id).any(|m| m.offsets().iter().any(|o| o.offset == 0))
        });
        Ok(own_matches_without_overlaps(result, request.context_id))
    }

    /// Nodes whose text ends with `request.query`; `source` resolves the
    /// matched nodes' string values.
    pub fn ends_with<S>(&self, request: &SearchRequest<'_>, source: &S, ctx: &dyn QueryContext) -> Result<NodeSet>
    where
        S: DocumentSource + ?Sized,
    {
        let mut result = self.fixed_string(request, ctx)?;
        result.retain(|proxy| {
            let Some(document) = source.document(proxy.doc_id()) else {
                return false;
            };
            own_matches(proxy, request.context_id).any(|m| {
                document
                    .string_value(m.node_id())
                    .map(|value| value.chars().count() as u32)
                    .map_or(false, |len| m.offsets().iter().any(|o| o.end() == len))
            })
        });
        Ok(own_matches_without_overlaps(result, request.context_id))
    }

    /// Dispatches on `mode`.
    pub fn fixed_string_search<S>(
        &self,
        request: &SearchRequest<'_>,
        mode: StringMatch,
        source: &S,
        ctx: &dyn QueryContext,
    ) -> Result<NodeSet>
    where
        S: DocumentSource + ?Sized,
    {
        match mode {
            StringMatch::Contains => self.contains(request, ctx),
            StringMatch::StartsWith => self.starts_with(request, ctx),
            StringMatch::EndsWith => self.ends_with(request, source, ctx),
        }
    }

    /// Nodes matching the wildcard expression `request.query` (see
    /// [`WildcardQuery`] for the syntax).
    ///
    /// Match offsets span the looked-up parts and the characters between
    /// them; an anchored match is widened to the start or end of the node's
    /// content. `source` resolves string values when an end anchor or a
    /// trailing wildcard needs the content length.
    pub fn wildcard_contains<S>(&self, request: &SearchRequest<'_>, source: &S, ctx: &dyn QueryContext) -> Result<NodeSet>
    where
        S: DocumentSource + ?Sized,
    {
        let query = WildcardQuery::parse(&request.query)?;
        let Some(first) = query.first() else {
            return Ok(NodeSet::new());
        };
        debug!("wildcard search '{}' parsed as {:?}", request.query, query);

        let mut result = self.term_nodes(request, first, ctx)?;
        for (gap, term) in query.steps() {
            if result.is_empty() {
                break;
            }
            let tails = self.term_nodes(request, term, ctx)?;
            let heads = result;
            result = tails
                .into_iter()
                .filter_map(|tail| {
                    let head = heads.get(tail.doc_id(), tail.node_id())?;
                    followed_match(head, tail, request.context_id, gap)
                })
                .collect();
        }

        let mut anchored = NodeSet::new();
        for mut proxy in result {
            let document = source.document(proxy.doc_id());
            for m in proxy.take_matches(request.context_id) {
                let len = if query.needs_length() {
                    document
                        .and_then(|d| d.string_value(m.node_id()))
                        .map(|value| value.chars().count() as u32)
                } else {
                    None
                };
                if let Some(kept) = m.map_offsets(|o| query.anchor(o, len)) {
                    proxy.add_match(kept);
                }
            }
            if proxy.has_match_for(request.context_id) {
                anchored.add(proxy);
            }
        }
        Ok(own_matches_without_overlaps(anchored, request.context_id))
    }

    /// Nodes containing one part of a wildcard query.
    fn term_nodes(&self, request: &SearchRequest<'_>, term: &Term, ctx: &dyn QueryContext) -> Result<NodeSet> {
        match term {
            Term::Literal(text) => self.fixed_string(&chunk_request(request, text, text), ctx),
            Term::Alternatives(chars) => {
                let mut nodes = NodeSet::new();
                for c in chars {
                    let single = c.to_string();
                    for proxy in self.search(&chunk_request(request, &single, &single), ctx)? {
                        nodes.add(proxy);
                    }
                }
                Ok(nodes)
            }
        }
    }

    fn fixed_string(&self, request: &SearchRequest<'_>, ctx: &dyn QueryContext) -> Result<NodeSet> {
        let chunks = self.tokenizer().distinct_ngrams(&request.query);
        let Some(first) = chunks.first() else {
            return Ok(NodeSet::new());
        };

        let mut result = self.search(&chunk_request(request, first, first), ctx)?;
        for (previous, chunk) in chunks.iter().zip(chunks.iter().skip(1)) {
            if result.is_empty() {
                break;
            }
            let len = chunk.chars().count();
            let filled: String = previous
                .chars()
                .skip(len)
                .take(self.n().saturating_sub(len))
                .chain(chunk.chars())
                .collect();
            trace!("fixed-string chunk '{}' searched as '{}'", chunk, filled);

            let tails = self.search(&chunk_request(request, &filled, chunk), ctx)?;
            let heads = result;
            result = tails
                .into_iter()
                .filter_map(|tail| {
                    let head = heads.get(tail.doc_id(), tail.node_id())?;
                    continuous_match(head, tail, request.context_id)
                })
                .collect();
        }
        Ok(result)
    }
}

fn chunk_request<'a>(request: &SearchRequest<'a>, query: &str, ngram: &str) -> SearchRequest<'a> {
    SearchRequest {
        query: query.to_string(),
        ngram: ngram.to_string(),
        ..request.clone()
    }
}

/// Replaces the tail's own matches by the first head match it continues.
fn continuous_match(head: &NodeProxy, mut tail: NodeProxy, context_id: ContextId) -> Option<NodeProxy> {
    let joined = head
        .matches()
        .iter()
        .find_map(|h| tail.matches().iter().find_map(|t| h.continued_by(t)))?;
    tail.take_matches(context_id);
    tail.add_match(joined);
    Some(tail)
}

/// Replaces the tail's own matches by every head match it follows at an
/// allowed distance.
fn followed_match(head: &NodeProxy, mut tail: NodeProxy, context_id: ContextId, gap: Gap) -> Option<NodeProxy> {
    let tail_ref = &tail;
    let joined: Vec<Match> = own_matches(head, context_id)
        .flat_map(move |h| own_matches(tail_ref, context_id).filter_map(move |t| h.followed_by(t, gap)))
        .collect();
    if joined.is_empty() {
        return None;
    }
    tail.take_matches(context_id);
    for m in joined {
        tail.add_match(m);
    }
    Some(tail)
}

fn own_matches(proxy: &NodeProxy, context_id: ContextId) -> impl Iterator<Item = &Match> {
    proxy.matches().iter().filter(move |m| m.context_id() == context_id)
}

fn own_matches_without_overlaps(set: NodeSet, context_id: ContextId) -> NodeSet {
    set.into_iter()
        .map(|mut proxy| {
            for m in proxy.take_matches(context_id) {
                proxy.add_match(m.filter_out_overlapping_offsets());
            }
            proxy
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::matches::Offset;
    use crate::index::ngram_index::tests::{open_index, paragraph};
    use crate::index::search::CancellationToken;
    use crate::types::{Document, DocumentId, DocumentSet};
    use crate::StorageError;
    use tempfile::TempDir;

    fn setup(texts: &[&str]) -> (TempDir, NGramIndex, Vec<Document>) {
        let temp_dir = TempDir::new().unwrap();
        let index = open_index(&temp_dir);
        let docs: Vec<Document> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| paragraph(i as DocumentId + 1, text))
            .collect();
        for doc in &docs {
            index.store_document(doc);
        }
        (temp_dir, index, docs)
    }

    fn hits(set: &NodeSet) -> Vec<(DocumentId, Vec<Offset>)> {
        set.iter()
            .map(|p| (p.doc_id(), p.matches().iter().flat_map(|m| m.offsets().to_vec()).collect()))
            .collect()
    }

    #[test]
    fn test_contains_chains_chunks() {
        let (_dir, index, docs) = setup(&["The quick brown fox", "brown quickly", "qui and ck"]);
        let scope: DocumentSet = docs.iter().collect();
        let ctx = CancellationToken::new();

        // "qui" + "ck" (searched as "ick")
        let result = index.contains(&SearchRequest::new(5, &scope, "Quick"), &ctx).unwrap();
        assert_eq!(hits(&result), vec![(1, vec![Offset::new(4, 5)]), (2, vec![Offset::new(6, 5)])]);
        let m = &result.iter().next().unwrap().matches()[0];
        assert_eq!(m.term(), "quick");
        assert_eq!(m.context_id(), 5);

        assert!(index.contains(&SearchRequest::new(5, &scope, "xyz"), &ctx).unwrap().is_empty());
        assert!(index.contains(&SearchRequest::new(5, &scope, ""), &ctx).unwrap().is_empty());
    }

    #[test]
    fn test_starts_and_ends_with() {
        let (_dir, index, docs) = setup(&["The quick brown fox", "brown quickly"]);
        let scope: DocumentSet = docs.iter().collect();
        let ctx = CancellationToken::new();

        let result = index.starts_with(&SearchRequest::new(1, &scope, "brown"), &ctx).unwrap();
        assert_eq!(hits(&result), vec![(2, vec![Offset::new(0, 5)])]);

        let result = index.ends_with(&SearchRequest::new(1, &scope, "fox"), docs.as_slice(), &ctx).unwrap();
        assert_eq!(hits(&result), vec![(1, vec![Offset::new(16, 3)])]);

        // "qui" + "ckl" + "y" (searched as "kly")
        let result = index
            .fixed_string_search(&SearchRequest::new(1, &scope, "quickly"), StringMatch::EndsWith, docs.as_slice(), &ctx)
            .unwrap();
        assert_eq!(hits(&result), vec![(2, vec![Offset::new(6, 7)])]);

        let result = index.ends_with(&SearchRequest::new(1, &scope, "brown"), docs.as_slice(), &ctx).unwrap();
        assert!(result.is_empty());
    }

    fn wildcard(index: &NGramIndex, docs: &[Document], query: &str) -> Vec<(DocumentId, Vec<Offset>)> {
        let scope: DocumentSet = docs.iter().collect();
        let result = index
            .wildcard_contains(&SearchRequest::new(7, &scope, query), docs, &CancellationToken::new())
            .unwrap();
        assert!(result.iter().all(|p| p.matches().iter().all(|m| m.context_id() == 7)));
        hits(&result)
    }

    const ANIMALS: [&str; 3] = ["The cat sat on the mat", "a cot and a coat", "cut"];

    #[test]
    fn test_wildcard_single_and_optional() {
        let (_dir, index, docs) = setup(&ANIMALS);

        assert_eq!(
            wildcard(&index, &docs, "c.t"),
            vec![(1, vec![Offset::new(4, 3)]), (2, vec![Offset::new(2, 3)]), (3, vec![Offset::new(0, 3)])]
        );
        assert_eq!(
            wildcard(&index, &docs, "co.?t"),
            vec![(2, vec![Offset::new(2, 3), Offset::new(12, 4)])]
        );

        let scope: DocumentSet = docs.iter().collect();
        let result = index
            .wildcard_contains(&SearchRequest::new(7, &scope, "C.T"), docs.as_slice(), &CancellationToken::new())
            .unwrap();
        assert_eq!(result.iter().next().unwrap().matches()[0].term(), "c.t");
    }

    #[test]
    fn test_wildcard_repetitions() {
        let (_dir, index, docs) = setup(&ANIMALS);

        // the shortest span is kept; longer ones overlap it
        assert_eq!(
            wildcard(&index, &docs, "c.*t"),
            vec![
                (1, vec![Offset::new(4, 3)]),
                (2, vec![Offset::new(2, 3), Offset::new(12, 4)]),
                (3, vec![Offset::new(0, 3)])
            ]
        );
        assert_eq!(wildcard(&index, &docs, "cu.*t"), vec![(3, vec![Offset::new(0, 3)])]);
        assert!(wildcard(&index, &docs, "cu.+t").is_empty());
        assert_eq!(wildcard(&index, &docs, "cot.+coat"), vec![(2, vec![Offset::new(2, 14)])]);

        assert_eq!(wildcard(&index, &docs, "cat.{4,5}on"), vec![(1, vec![Offset::new(4, 10)])]);
        assert!(wildcard(&index, &docs, "cat.{1,4}on").is_empty());
    }

    #[test]
    fn test_wildcard_alternatives() {
        let (_dir, index, docs) = setup(&ANIMALS);

        assert_eq!(
            wildcard(&index, &docs, "c[ao]t"),
            vec![(1, vec![Offset::new(4, 3)]), (2, vec![Offset::new(2, 3)])]
        );
        assert_eq!(
            wildcard(&index, &docs, "[CS]at"),
            vec![(1, vec![Offset::new(4, 3), Offset::new(8, 3)])]
        );

        let scope: DocumentSet = docs.iter().collect();
        let result = index
            .wildcard_contains(&SearchRequest::new(7, &scope, "[cs]at"), docs.as_slice(), &CancellationToken::new())
            .unwrap();
        let terms: Vec<&str> = result.iter().next().unwrap().matches().iter().map(|m| m.term()).collect();
        assert_eq!(terms, vec!["cat", "sat"]);
    }

    #[test]
    fn test_wildcard_anchors() {
        let (_dir, index, docs) = setup(&ANIMALS);

        assert_eq!(wildcard(&index, &docs, "^the"), vec![(1, vec![Offset::new(0, 3)])]);
        assert_eq!(
            wildcard(&index, &docs, "at$"),
            vec![(1, vec![Offset::new(20, 2)]), (2, vec![Offset::new(14, 2)])]
        );
        assert_eq!(wildcard(&index, &docs, "^cut$"), vec![(3, vec![Offset::new(0, 3)])]);
        assert!(wildcard(&index, &docs, "^cat$").is_empty());

        // anchored matches are widened to the start or end
        assert_eq!(wildcard(&index, &docs, "^.{1,2}cot"), vec![(2, vec![Offset::new(0, 5)])]);
        assert!(wildcard(&index, &docs, "^.{3,4}cot").is_empty());
        assert_eq!(wildcard(&index, &docs, "co.+$"), vec![(2, vec![Offset::new(2, 14)])]);

        // no document to measure: end anchors cannot be checked
        let scope: DocumentSet = docs.iter().collect();
        let none: Vec<Document> = Vec::new();
        let result = index
            .wildcard_contains(&SearchRequest::new(7, &scope, "at$"), none.as_slice(), &CancellationToken::new())
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_wildcard_escapes() {
        let (_dir, index, docs) = setup(&["v1.2 [draft]", "v102 draft"]);

        assert_eq!(wildcard(&index, &docs, r"v1\.2"), vec![(1, vec![Offset::new(0, 4)])]);
        assert_eq!(
            wildcard(&index, &docs, "v1.2"),
            vec![(1, vec![Offset::new(0, 4)]), (2, vec![Offset::new(0, 4)])]
        );
        assert_eq!(wildcard(&index, &docs, r"\[draft\]"), vec![(1, vec![Offset::new(5, 7)])]);
        assert_eq!(wildcard(&index, &docs, "[.]2"), vec![(1, vec![Offset::new(2, 2)])]);
    }

    #[test]
    fn test_wildcard_invalid_and_empty() {
        let (_dir, index, docs) = setup(&ANIMALS);
        let scope: DocumentSet = docs.iter().collect();
        let ctx = CancellationToken::new();

        for query in ["c.{2", "c[at", r"cat\", ".*"] {
            let result = index.wildcard_contains(&SearchRequest::new(7, &scope, query), docs.as_slice(), &ctx);
            assert!(matches!(result, Err(StorageError::InvalidArgument(_))), "query '{}'", query);
        }
        assert!(wildcard(&index, &docs, "").is_empty());
        assert!(wildcard(&index, &docs, "^$").is_empty());
    }

    #[test]
    fn test_overlapping_offsets_are_dropped() {
        let (_dir, index, docs) = setup(&["aaaa"]);
        let scope: DocumentSet = docs.iter().collect();
        let result = index
            .contains(&SearchRequest::new(1, &scope, "aaa"), &CancellationToken::new())
            .unwrap();
        assert_eq!(hits(&result), vec![(1, vec![Offset::new(0, 3)])]);
    }
}
