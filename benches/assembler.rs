use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use bevy_llm_chat::StreamAssembler;

/// token-sized fragments with an echoed fragment every `echo_every` steps.
fn fragments(count: usize, echo_every: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(count + count / echo_every.max(1));
    for i in 0..count {
        let frag = format!(" tok{i}");
        if echo_every > 0 && i % echo_every == 0 {
            out.push(frag.clone());
        }
        out.push(frag);
    }
    out
}

fn assemble_turn(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble_turn");
    for &count in &[64usize, 1024] {
        for &echo_every in &[0usize, 16] {
            let input = fragments(count, echo_every);
            group.bench_with_input(
                BenchmarkId::new(format!("echo_every_{echo_every}"), count),
                &input,
                |b, input| {
                    b.iter(|| {
                        let mut assembler = StreamAssembler::new();
                        for f in input {
                            black_box(assembler.process(f));
                        }
                        assembler.into_text()
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, assemble_turn);
criterion_main!(benches);
