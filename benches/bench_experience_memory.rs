use criterion::{black_box, criterion_group, criterion_main, Criterion};

use atsc_core::memory::{ExperienceMemory, STATE_VECTOR_LEN};
use atsc_core::types::Approach;

fn populated_memory(records: usize) -> ExperienceMemory {
    let mut memory = ExperienceMemory::new();
    for i in 0..records {
        let mut vector = vec![0.0; STATE_VECTOR_LEN];
        vector[0] = (i % 40) as f64;
        let approach = Approach::ALL[i % 4];
        memory.record(vector, approach, (i % 10) as f64 - 5.0, i as u64);
    }
    memory
}

fn bench_find_similar(c: &mut Criterion) {
    let mut group = c.benchmark_group("ExperienceMemory");

    for &records in &[100usize, 5_000, 50_000] {
        let memory = populated_memory(records);
        let query = vec![10.0; STATE_VECTOR_LEN];
        group.bench_with_input(format!("find_similar_{records}_records"), &records, |b, &_records| {
            b.iter(|| {
                let matches = memory.find_similar(black_box(&query), black_box(records as u64));
                black_box(matches);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_find_similar);
criterion_main!(benches);
