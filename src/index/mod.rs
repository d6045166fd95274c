//! Index layer implementation
//!
//! N-gram substring index: tokenizer, key and posting codecs, the per-pass
//! maintenance engine, the query engine and match highlighting.

pub mod fixed_string;
pub mod highlight;
pub mod key;
pub mod matches;
pub mod ngram_index;
pub mod occurrences;
pub mod posting;
pub mod search;
pub mod tokenizer;
pub mod wildcard;
pub mod worker;

pub use fixed_string::StringMatch;
pub use highlight::{serialize_with_matches, MatchCallback, MatchListener, Receiver, XmlSerializer};
pub use key::{KeyParts, NGramKey};
pub use matches::{ContextId, Match, Offset};
pub use ngram_index::{NGramIndex, INDEX_ID, SYMBOLS_FILE};
pub use occurrences::OccurrenceList;
pub use posting::{PostingEntry, Segment, SegmentHeader, SegmentReader};
pub use search::{Axis, CancellationToken, Occurrences, QueryContext, SearchRequest};
pub use tokenizer::{NGramTokenizer, Token, Tokenizer};
pub use wildcard::{Gap, Term, WildcardQuery};
pub use worker::{FlushReport, IndexPass, ReindexMode};
