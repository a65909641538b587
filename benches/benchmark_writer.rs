use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ihex::{create_object_file_representation, Group, Section};

pub fn criterion_benchmark(c: &mut Criterion) {
  let mut group = Group::new();
  group.push_section(Section::new_extended_segment(0x1000)).unwrap();
  group.set_range(0x12345, &[0x61, 0x64, 0x64, 0x72, 0x65, 0x73, 0x73, 0x20, 0x67, 0x61, 0x70]).unwrap();
  group.push_section(Section::new_end_of_file()).unwrap();

  c.bench_function("create_object_file_representation", |b| {
    b.iter(|| create_object_file_representation(black_box(&group)))
  });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
