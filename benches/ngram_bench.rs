use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;

use ngramdb::index::occurrences::OccurrenceList;
use ngramdb::index::posting::encode_segment;
use ngramdb::index::tokenizer::TokenBuffer;
use ngramdb::index::NGramTokenizer;
use ngramdb::storage::VariableByteOutput;
use ngramdb::types::NameType;
use ngramdb::{
    CancellationToken, CollectionIndexConfig, Document, DocumentSet, IndexSettings, NGramIndex, NodeId, QName,
    SearchRequest, SymbolTable,
};
use std::sync::Arc;

const WORDS: &[&str] = &[
    "river", "stone", "quick", "brown", "lantern", "harbor", "meadow", "copper", "signal", "window",
];

fn make_text(seed: usize, words: usize) -> String {
    (0..words)
        .map(|i| WORDS[(seed * 7 + i * 3) % WORDS.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

fn make_document(id: u32) -> Document {
    let mut builder = Document::builder(id, 1);
    builder.start_element(QName::element("body"));
    for i in 0..10 {
        builder.leaf(QName::element("p"), &make_text(id as usize + i, 12));
    }
    builder.end_element();
    builder.build().unwrap()
}

struct BenchEnv {
    _tmp: TempDir,
    index: NGramIndex,
    docs: DocumentSet,
}

fn build_env(doc_count: u32) -> BenchEnv {
    let tmp = TempDir::new().unwrap();
    let index = NGramIndex::open(tmp.path(), IndexSettings::default(), Arc::new(SymbolTable::new())).unwrap();
    index.configure_collection(1, CollectionIndexConfig::from_qnames([QName::element("p")]));

    let mut docs = DocumentSet::new();
    for id in 1..=doc_count {
        let doc = make_document(id);
        index.store_document(&doc);
        docs.add_document(&doc);
    }
    BenchEnv { _tmp: tmp, index, docs }
}

fn bench_tokenize(c: &mut Criterion) {
    let tokenizer = NGramTokenizer::new(3);
    let mut buffer = TokenBuffer::new();
    let text = make_text(1, 200);

    c.bench_function("tokenize_1k_chars", |b| {
        b.iter(|| black_box(tokenizer.ngrams(black_box(&text), &mut buffer).count()));
    });
}

fn bench_encode_segment(c: &mut Criterion) {
    let mut list = OccurrenceList::new();
    for node in 1..=200u32 {
        let node_id = NodeId::root().child(node);
        for offset in 0..5 {
            list.add(node_id.clone(), offset * 11);
        }
    }
    list.sort();
    let mut out = VariableByteOutput::with_capacity(8 * 1024);

    c.bench_function("encode_segment_200_nodes", |b| {
        b.iter(|| {
            out.clear();
            encode_segment(&mut out, 42, NameType::Element, black_box(&list)).unwrap();
            black_box(out.position())
        });
    });
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    for &count in &[100u32, 1_000] {
        let env = build_env(count);
        let ctx = CancellationToken::new();
        group.bench_with_input(BenchmarkId::new("exact", count), &env, |b, env| {
            b.iter(|| black_box(env.index.search(&SearchRequest::new(1, &env.docs, "ant"), &ctx).unwrap().len()));
        });
        group.bench_with_input(BenchmarkId::new("contains", count), &env, |b, env| {
            b.iter(|| {
                black_box(env.index.contains(&SearchRequest::new(1, &env.docs, "lantern"), &ctx).unwrap().len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tokenize, bench_encode_segment, bench_search);
criterion_main!(benches);
