use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::path::Path;

use mailrank::contacts;
use mailrank::embedding::{Embedder, HashingEmbedder};
use mailrank::index::documents::DocumentStore;
use mailrank::index::lexical::{LexicalField, LexicalIndex};
use mailrank::index::semantic::{Metric, SemanticIndex};
use mailrank::model::message::Message;
use mailrank::search::fusion;

const WORDS: [&str; 16] = [
    "budget", "offsite", "invoice", "roadmap", "travel", "review", "venue", "hiring",
    "quarterly", "lunch", "report", "contract", "design", "launch", "support", "planning",
];

fn synthetic_archive(n: usize) -> Vec<Message> {
    let people = ["me@co.com", "alice@co.com", "bob@co.com", "carol@ext.com", "dave@ext.com"];
    (0..n)
        .map(|i| {
            let sender = people[i % people.len()];
            let recipient = if sender == "me@co.com" {
                people[1 + i % (people.len() - 1)]
            } else {
                "me@co.com"
            };
            let body: Vec<&str> = (0..40).map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()]).collect();
            Message {
                id: format!("msg-{i}"),
                subject: format!("{} {}", WORDS[i % WORDS.len()], WORDS[(i / 3) % WORDS.len()]),
                body_text: body.join(" "),
                sender: sender.to_string(),
                recipients: vec![recipient.to_string()],
                ..Default::default()
            }
        })
        .collect()
}

fn bench_parse_mbox(c: &mut Criterion) {
    let fixture_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("archive.mbox");

    c.bench_function("parse_archive_mbox", |b| {
        b.iter(|| {
            let source = mailrank::ingest::open_source(&fixture_path).unwrap();
            let mut count = 0u64;
            source
                .for_each_message(
                    &mut |_msg| {
                        count += 1;
                        Ok(())
                    },
                    None,
                )
                .unwrap();
            count
        })
    });
}

fn bench_lexical_search(c: &mut Criterion) {
    let messages = synthetic_archive(5_000);
    let index = LexicalIndex::build(&messages);

    c.bench_function("lexical_search_5k", |b| {
        b.iter(|| index.query(black_box("budget review -subject:lunch"), &LexicalField::ALL, 50))
    });
}

fn bench_hybrid_fusion(c: &mut Criterion) {
    let messages = synthetic_archive(5_000);
    let profile = contacts::analyze(&messages);
    let lexical = LexicalIndex::build(&messages);

    let embedder = HashingEmbedder::new(128).unwrap();
    let mut semantic = SemanticIndex::new(128, Metric::Cosine, embedder.model_name());
    for msg in &messages {
        semantic
            .add(msg.id.as_str(), &embedder.embed(&msg.embedding_text(2000)).unwrap())
            .unwrap();
    }
    let documents = DocumentStore::new(messages);

    let query = "quarterly budget planning";
    let lexical_hits = lexical.query(query, &LexicalField::ALL, 50);
    let query_vector = embedder.embed(query).unwrap();
    let neighbors = semantic.query(&query_vector, 50, &|| true).unwrap();

    c.bench_function("semantic_query_5k", |b| {
        b.iter(|| semantic.query(black_box(&query_vector), 50, &|| true).unwrap())
    });

    c.bench_function("fuse_100_candidates", |b| {
        b.iter(|| {
            fusion::fuse(
                black_box(&lexical_hits),
                black_box(&neighbors),
                Metric::Cosine,
                &documents,
                &profile,
                0.5,
                10,
            )
        })
    });
}

criterion_group!(benches, bench_parse_mbox, bench_lexical_search, bench_hybrid_fusion);
criterion_main!(benches);
