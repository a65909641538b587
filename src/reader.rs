//
// Copyright 2016 The IHEX Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>.
// All files in the project carrying such notice may not be copied, modified, or
// distributed except according to those terms.
//

//! Thin file-level wrapper turning ASCII text into a [`Group`]: an
//! iterator over individual record lines, plus a policy-driven loader
//! that assembles them into sections.

use crate::error::Error;
use crate::group::Group;
use crate::record::Record;
use crate::section::Section;

/// Toggles governing how [`read_records_to_group`] reacts to malformed
/// input. Both default to `true`, matching the wire format's "any
/// deviation is an error" baseline; set either to `false` to skip the
/// offending line and keep loading (a `log::warn!` is emitted at that
/// point).
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct LoadPolicy {
  pub throw_on_invalid_record: bool,
  pub throw_on_checksum_mismatch: bool,
}

impl Default for LoadPolicy {
  fn default() -> Self {
    LoadPolicy {
      throw_on_invalid_record: true,
      throw_on_checksum_mismatch: true,
    }
  }
}

/// Iterates the non-blank lines of an Intel HEX text, parsing each into
/// a [`Record`]. Blank lines (after trimming) are skipped; everything
/// else is handed to [`Record::parse`] verbatim, so a malformed line
/// surfaces as `Some(Err(_))` rather than silently vanishing.
pub struct Reader<'a> {
  lines: std::str::Lines<'a>,
}

impl<'a> Reader<'a> {
  pub fn new(text: &'a str) -> Self {
    Reader { lines: text.lines() }
  }
}

impl<'a> Iterator for Reader<'a> {
  type Item = Result<Record, Error>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let line = self.lines.next()?;
      let trimmed = line.trim();
      if trimmed.is_empty() {
        continue;
      }
      return Some(Record::parse(trimmed));
    }
  }
}

/// Parses `text` and assembles the records into a [`Group`], honoring
/// `policy` for malformed lines and checksum mismatches. A run of DATA
/// records is folded into whichever section is currently open; a
/// record that cannot be merged into the open section closes it and
/// opens a new one.
pub fn read_records_to_group(text: &str, policy: &LoadPolicy) -> Result<Group, Error> {
  let mut group = Group::new();
  let mut current = Section::new_data();

  for parsed in Reader::new(text) {
    let record = match parsed {
      Ok(record) => record,
      Err(error) => {
        if policy.throw_on_invalid_record {
          return Err(error);
        }
        log::warn!("skipping invalid record: {}", error);
        continue;
      }
    };

    match current.push_record(&record) {
      Ok(true) => continue,
      Ok(false) => {
        if current.record_count() > 0 {
          group.push_section(current)?;
        }
        current = Section::new_data();
        if !current.push_record(&record)? {
          return Err(Error::Malformed(format!("record {} cannot begin a new section", record)));
        }
      }
      Err(Error::ChecksumMismatch { expected, found }) => {
        if policy.throw_on_checksum_mismatch {
          return Err(Error::ChecksumMismatch { expected, found });
        }
        log::warn!("skipping record with mismatched checksum: expected {:#04X}, found {:#04X}", expected, found);
      }
      Err(error) => return Err(error),
    }
  }

  if current.record_count() > 0 {
    group.push_section(current)?;
  }

  Ok(group)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_reader_skips_blank_lines() {
    let text = "\n:00000001FF\n\n";
    let records: Vec<_> = Reader::new(text).collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(records.len(), 1);
  }

  #[test]
  fn test_reader_surfaces_malformed_line() {
    let text = "not a record";
    let mut reader = Reader::new(text);
    assert!(reader.next().unwrap().is_err());
  }

  #[test]
  fn test_read_records_to_group_builds_sections() {
    let text = ":10000000AABBCCDDEEFF00112233445566778899FF\n:00000001FF\n";
    let group = read_records_to_group(text, &LoadPolicy::default()).unwrap();
    assert_eq!(group.len(), 2);
  }

  #[test]
  fn test_read_records_to_group_honors_policy_for_checksum() {
    let text = ":00000001FE\n";
    let strict = LoadPolicy::default();
    assert!(read_records_to_group(text, &strict).is_err());

    let lenient = LoadPolicy { throw_on_checksum_mismatch: false, ..LoadPolicy::default() };
    let group = read_records_to_group(text, &lenient).unwrap();
    assert!(group.is_empty());
  }

  #[test]
  fn test_read_records_to_group_honors_policy_for_malformed() {
    let text = "garbage\n:00000001FF\n";
    let strict = LoadPolicy::default();
    assert!(read_records_to_group(text, &strict).is_err());

    let lenient = LoadPolicy { throw_on_invalid_record: false, ..LoadPolicy::default() };
    let group = read_records_to_group(text, &lenient).unwrap();
    assert_eq!(group.len(), 1);
  }

  #[test]
  fn test_read_records_to_group_with_extended_segment_and_multiple_data_blocks() {
    let text = ":020000021200EA\n:10001000AABBCCDDEEFF00112233445566778899E0\n:00000001FF\n";
    let group = read_records_to_group(text, &LoadPolicy::default()).unwrap();
    assert_eq!(group.len(), 2);
    assert_eq!(group.section(0).unwrap().segment().unwrap(), 0x1200);
  }
}
