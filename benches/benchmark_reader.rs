use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ihex::{read_records_to_group, LoadPolicy, Record};

pub fn criterion_benchmark(c: &mut Criterion) {
  c.bench_function("Record::parse", |b| {
    b.iter(|| Record::parse(black_box(":0B0010006164647265737320676170A7")).unwrap())
  });

  let text = "\
:020000040000FA
:10000000000102030405060708090A0B0C0D0E0F78
:020000040001F9
:10000000101112131415161718191A1B1C1D1E1F78
:00000001FF";

  c.bench_function("read_records_to_group", |b| {
    b.iter(|| read_records_to_group(black_box(text), &LoadPolicy::default()).unwrap())
  });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
