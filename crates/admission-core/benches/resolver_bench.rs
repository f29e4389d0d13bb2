use criterion::{criterion_group, criterion_main, Criterion};

use admission_core::{
    ConversationLog, FaqRecord, Resolver, ResolverConfig, RuleKeywordTable,
};

fn mk_record(index: usize) -> FaqRecord {
    let (category, answer, keywords) = match index % 4 {
        0 => ("fee", "The application fee is $50.", vec!["fee", "cost", "payment"]),
        1 => ("deadline", "The deadline is March 31st.", vec!["deadline", "last date"]),
        2 => ("documents", "You need transcripts and ID proof.", vec!["document", "papers"]),
        _ => ("process", "Apply through the official website.", vec!["apply", "online"]),
    };
    FaqRecord {
        question: format!("Benchmark question {index} about {category}"),
        answer: answer.to_string(),
        category: category.to_string(),
        keywords: Some(keywords.into_iter().map(ToString::to_string).collect()),
    }
}

fn bench_rule_path(c: &mut Criterion) {
    let records = (0..500).map(mk_record).collect::<Vec<_>>();
    let resolver =
        Resolver::new(records, RuleKeywordTable::default(), None, ResolverConfig::default());

    c.bench_function("process_query_rule_hit_500_records", |b| {
        b.iter(|| {
            let mut log = ConversationLog::new();
            resolver.process_query(&mut log, "what is the admission deadline");
        });
    });
}

fn bench_fallback_path(c: &mut Criterion) {
    let records = (0..500).map(mk_record).collect::<Vec<_>>();
    let resolver =
        Resolver::new(records, RuleKeywordTable::new(vec![]), None, ResolverConfig::default());

    c.bench_function("process_query_legacy_fallback_500_records", |b| {
        b.iter(|| {
            let mut log = ConversationLog::new();
            resolver.process_query(&mut log, "when should I send my transcripts and payment");
        });
    });
}

criterion_group!(resolver_benches, bench_rule_path, bench_fallback_path);
criterion_main!(resolver_benches);
