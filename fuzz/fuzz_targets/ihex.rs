#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
  let reader = ihex::Reader::new(data);
  let output = reader.collect::<Result<Vec<_>, ihex::Error>>();
  let _ = std::hint::black_box(output);

  let policy = ihex::LoadPolicy {
    throw_on_invalid_record: false,
    throw_on_checksum_mismatch: false,
  };
  let group = ihex::read_records_to_group(data, &policy);
  let _ = std::hint::black_box(group);
});
