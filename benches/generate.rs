//! Benchmark: full generation (parse, expand, resolve, lay out) of the sample
//! schemas, and encode/decode of every container through the reference codec.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modemgen::codec::sample_instance;
use modemgen::{generate, Endianness, Options, PlanCodec, ProtocolVariant};
use std::path::PathBuf;

fn bench_generate(c: &mut Criterion) {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let schemas = [
        ("dms", ProtocolVariant::Tlv),
        ("basic_connect", ProtocolVariant::Fixed),
    ];

    for (name, variant) in schemas {
        let path = manifest.join("data").join(format!("{}.json", name));
        let src = std::fs::read_to_string(&path).expect("read schema");
        let options = Options::new(variant);

        c.bench_function(&format!("generate_{}", name), |b| {
            b.iter(|| generate(black_box(&src), &options).expect("generate"))
        });

        let plan = generate(&src, &options).expect("generate");
        let codec = PlanCodec::new(&plan, Endianness::Little);
        let cases: Vec<_> = plan
            .messages
            .iter()
            .flat_map(|m| m.containers.iter())
            .map(|container| (container, sample_instance(&plan, &container.fields, 1)))
            .collect();
        eprintln!("{}: {} containers", name, cases.len());

        c.bench_function(&format!("encode_decode_{}", name), |b| {
            b.iter(|| {
                let mut total = 0usize;
                for (container, values) in &cases {
                    let bytes = codec.encode_container(container, black_box(values)).expect("encode");
                    let (_, consumed) = codec.decode_container(container, &bytes).expect("decode");
                    total += consumed;
                }
                black_box(total)
            })
        });
    }
}

criterion_group!(benches, bench_generate);
criterion_main!(benches);
