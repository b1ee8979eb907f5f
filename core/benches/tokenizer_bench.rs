use criterion::{criterion_group, criterion_main, Criterion};
use webrank_core::tokenizer::tokenize;

fn bench_tokenize(c: &mut Criterion) {
    let text = "MapReduce is a programming model and an associated implementation \
        for processing and generating big data sets with a parallel, distributed \
        algorithm on a cluster. The model is a specialization of the split-apply-combine \
        strategy for data analysis."
        .repeat(64);
    c.bench_function("tokenize_corpus", |b| b.iter(|| tokenize(&text)));
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
