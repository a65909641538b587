//
// Copyright 2016 The IHEX Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>.
// All files in the project carrying such notice may not be copied, modified, or
// distributed except according to those terms.
//

//! An ordered sequence of [`Section`]s forming one Intel HEX document.

use crate::address::{self, AbsoluteAddress, AddressMap, DataSize, Dialect};
use crate::error::Error;
use crate::record::Record;
use crate::section::{Section, SectionKind, DEFAULT_UNUSED_FILL};

/// An ordered document of sections. The dialect is derived from the
/// kinds of sections currently present, not stored separately.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Group {
  sections: Vec<Section>,
  unused_fill: u8,
}

impl Default for Group {
  fn default() -> Self {
    Group::new()
  }
}

impl Group {
  pub fn new() -> Self {
    Group { sections: Vec::new(), unused_fill: DEFAULT_UNUSED_FILL }
  }

  pub fn len(&self) -> usize {
    self.sections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sections.is_empty()
  }

  pub fn section(&self, index: usize) -> Option<&Section> {
    self.sections.get(index)
  }

  pub fn section_mut(&mut self, index: usize) -> Option<&mut Section> {
    self.sections.get_mut(index)
  }

  pub fn sections(&self) -> &[Section] {
    &self.sections
  }

  pub fn unused_fill(&self) -> u8 {
    self.unused_fill
  }

  /// Applies `fill` to the group and retroactively to every section
  /// already present.
  pub fn set_unused_fill(&mut self, fill: u8) {
    self.unused_fill = fill;
    for section in &mut self.sections {
      section.set_unused_fill(fill);
    }
  }

  /// The dialect implied by the kinds of sections currently present:
  /// I16HEX if any EXTENDED/START_SEGMENT section exists, I32HEX if any
  /// EXTENDED/START_LINEAR section exists, else I8HEX.
  pub fn dialect(&self) -> Dialect {
    for section in &self.sections {
      match section.kind() {
        SectionKind::ExtendedSegmentAddress | SectionKind::StartSegmentAddress => return Dialect::I16Hex,
        SectionKind::ExtendedLinearAddress | SectionKind::StartLinearAddress => return Dialect::I32Hex,
        _ => {}
      }
    }
    Dialect::I8Hex
  }

  /// True iff any section carries a block map (DATA, EXT_SEG, or EXT_LIN).
  pub fn has_data_sections(&self) -> bool {
    self.sections.iter().any(|s| s.is_data_bearing())
  }

  fn default_push_index(&self, kind: SectionKind) -> usize {
    if kind == SectionKind::EndOfFile {
      return self.sections.len();
    }
    match self.sections.last() {
      Some(last) if last.kind() == SectionKind::EndOfFile => self.sections.len() - 1,
      _ => self.sections.len(),
    }
  }

  /// Whether `section` may be inserted, and at what index, per the
  /// push-policy table. `None` means the section is refused.
  pub fn can_push(&self, section: &Section) -> Option<usize> {
    let kind = section.kind();
    let dialect = self.dialect();
    let group_is_empty = self.sections.is_empty();

    let allowed = if group_is_empty {
      true
    } else {
      match (dialect, kind) {
        (_, SectionKind::EndOfFile) => !self.sections.iter().any(|s| s.kind() == SectionKind::EndOfFile),
        (Dialect::I16Hex, SectionKind::ExtendedSegmentAddress) => !self
          .sections
          .iter()
          .filter(|s| s.kind() == SectionKind::ExtendedSegmentAddress)
          .any(|s| s.check_intersect(section).unwrap_or(true)),
        (Dialect::I16Hex, SectionKind::StartSegmentAddress) => {
          !self.sections.iter().any(|s| s.kind() == SectionKind::StartSegmentAddress)
        }
        (Dialect::I32Hex, SectionKind::ExtendedLinearAddress) => !self
          .sections
          .iter()
          .filter(|s| s.kind() == SectionKind::ExtendedLinearAddress)
          .any(|s| s.check_intersect(section).unwrap_or(true)),
        (Dialect::I32Hex, SectionKind::StartLinearAddress) => {
          !self.sections.iter().any(|s| s.kind() == SectionKind::StartLinearAddress)
        }
        (Dialect::I8Hex, SectionKind::Data) => !self.sections.iter().any(|s| s.kind() == SectionKind::Data),
        _ => false,
      }
    };

    if allowed {
      Some(self.default_push_index(kind))
    } else {
      None
    }
  }

  /// Inserts `section` per [`Group::can_push`], normalizing its
  /// `unused_fill` to match the group's. Returns the index it landed
  /// at, or [`Error::DomainMismatch`] if the push was refused.
  pub fn push_section(&mut self, mut section: Section) -> Result<usize, Error> {
    match self.can_push(&section) {
      Some(index) => {
        section.set_unused_fill(self.unused_fill);
        self.sections.insert(index, section);
        Ok(index)
      }
      None => Err(Error::DomainMismatch(format!(
        "a {:?} section cannot be pushed onto a {:?} group in its current state",
        section.kind(),
        self.dialect()
      ))),
    }
  }

  /// Index of the data-bearing section whose window contains `abs`, if any.
  pub fn find_section(&self, abs: AbsoluteAddress) -> Option<usize> {
    self.sections.iter().position(|s| s.is_data_bearing() && section_contains(s, abs))
  }

  /// Index of the section immediately preceding `abs` in the group's
  /// address map, if any.
  pub fn find_previous_section(&self, abs: AbsoluteAddress) -> Option<usize> {
    let map = self.address_map();
    let mut result = None;
    for (addr, size) in map.iter() {
      if (abs as u64) > (addr as u64) + size - 1 {
        result = self.find_section(addr);
      } else {
        break;
      }
    }
    result
  }

  /// Index of the section immediately following `abs` in the group's
  /// address map, if any.
  pub fn find_next_section(&self, abs: AbsoluteAddress) -> Option<usize> {
    let map = self.address_map();
    let mut ranges: Vec<_> = map.iter().collect();
    ranges.reverse();
    let mut result = None;
    for (addr, _) in ranges {
      if abs < addr {
        result = self.find_section(addr);
      } else {
        break;
      }
    }
    result
  }

  /// Union of every data-bearing section's address window.
  pub fn address_map(&self) -> AddressMap {
    let mut map = AddressMap::new();
    for section in &self.sections {
      if let Ok(section_map) = section.address_map() {
        for (addr, size) in section_map.iter() {
          map.insert(addr, size);
        }
      }
    }
    map.compact();
    map
  }

  /// Union of every data-bearing section's occupied data blocks.
  pub fn data_map(&self) -> AddressMap {
    let mut map = AddressMap::new();
    for section in &self.sections {
      if let Ok(section_map) = section.data_map() {
        for (addr, size) in section_map.iter() {
          map.insert(addr, size);
        }
      }
    }
    map.compact();
    map
  }

  // ---------------------------------------------------------------------
  // Creating sections to reach an address.
  // ---------------------------------------------------------------------

  fn reject_if_incompatible_dialect(&self, dialect: Dialect) -> Result<(), Error> {
    if dialect != self.dialect() && self.has_data_sections() {
      Err(Error::DomainMismatch(format!(
        "address type {:?} is not applicable to a group already holding {:?} data",
        dialect,
        self.dialect()
      )))
    } else {
      Ok(())
    }
  }

  /// Idempotently ensures some section covers `abs`, creating one if
  /// necessary. Returns the index of the covering (or newly created)
  /// section.
  pub fn create_section(&mut self, abs: AbsoluteAddress) -> Result<usize, Error> {
    let dialect = self.dialect();
    self.reject_if_incompatible_dialect(dialect)?;

    match dialect {
      Dialect::I8Hex => {
        if abs >= 0x10000 {
          return Err(Error::OutOfRange(format!("absolute address {:#X} exceeds I8HEX space", abs)));
        }
        if let Some(index) = self.sections.iter().position(|s| s.kind() == SectionKind::Data) {
          return Ok(index);
        }
        self.push_section(Section::new_data())
      }

      Dialect::I16Hex => {
        if let Some(index) = self.find_section(abs) {
          return Ok(index);
        }

        let segment = address::find_segment(abs)?;
        let mut candidate = Section::new_extended_segment(segment);
        if !self.intersects_any(SectionKind::ExtendedSegmentAddress, &candidate) {
          return self.push_section(candidate);
        }

        // Retry at every segment adjacent to an existing EXT_SEG section
        // that still contains `abs`, per the original alignment search.
        let existing_segments: Vec<u16> = self
          .sections
          .iter()
          .filter(|s| s.kind() == SectionKind::ExtendedSegmentAddress)
          .map(|s| s.segment().expect("filtered to EXT_SEG kind"))
          .collect();

        for existing in existing_segments {
          for adjusted in [address::next_segment(existing), address::previous_segment(existing)] {
            if contains_absolute_segment_address(abs, adjusted) {
              candidate = Section::new_extended_segment(adjusted);
              if !self.intersects_any(SectionKind::ExtendedSegmentAddress, &candidate) {
                return self.push_section(candidate);
              }
            }
          }
        }

        Err(Error::SegmentAlignment(format!(
          "no segment aligned to absolute address {:#X} avoids intersecting an existing section",
          abs
        )))
      }

      Dialect::I32Hex => {
        let linear = address::find_linear(abs);
        if let Some(index) = self
          .sections
          .iter()
          .position(|s| s.kind() == SectionKind::ExtendedLinearAddress && s.linear() == Ok(linear))
        {
          return Ok(index);
        }
        self.push_section(Section::new_extended_linear(linear))
      }
    }
  }

  fn intersects_any(&self, kind: SectionKind, candidate: &Section) -> bool {
    self.sections.iter().filter(|s| s.kind() == kind).any(|s| s.check_intersect(candidate).unwrap_or(true))
  }

  /// As [`Group::create_section`], but ensures every byte of
  /// `[abs, abs + size)` is covered, potentially creating several
  /// sections. Returns the indices touched, in ascending address order.
  pub fn create_section_sized(&mut self, abs: AbsoluteAddress, size: DataSize) -> Result<Vec<usize>, Error> {
    if !address::is_valid_range(self.dialect(), abs, size) {
      return Err(Error::OutOfRange(format!("range [{:#X}, +{}) is not valid for a {:?} group", abs, size, self.dialect())));
    }

    let mut indices = Vec::new();
    let mut cursor = abs as u64;
    let end = abs as u64 + size;

    while cursor < end {
      let index = self.create_section(cursor as AbsoluteAddress)?;
      indices.push(index);
      let max = self.sections[index]
        .address_map()?
        .iter()
        .map(|(a, s)| a as u64 + s)
        .filter(|&e| e > cursor)
        .min()
        .unwrap_or(end);
      cursor = max.min(end);
    }

    Ok(indices)
  }

  // ---------------------------------------------------------------------
  // Absolute-address data operations.
  // ---------------------------------------------------------------------

  pub fn get_byte(&self, abs: AbsoluteAddress) -> Result<u8, Error> {
    match self.find_section(abs) {
      Some(index) => {
        let section = &self.sections[index];
        let rel = section.relative_for(abs)?;
        section.get_byte(rel)
      }
      None => Ok(self.unused_fill),
    }
  }

  pub fn get_range(&self, abs: AbsoluteAddress, size: DataSize) -> Result<Vec<u8>, Error> {
    if !address::is_valid_range(self.dialect(), abs, size) {
      return Err(Error::OutOfRange(format!("range [{:#X}, +{}) is not valid for a {:?} group", abs, size, self.dialect())));
    }
    let mut out = Vec::with_capacity(size as usize);
    for offset in 0..size {
      out.push(self.get_byte((abs as u64 + offset) as AbsoluteAddress)?);
    }
    Ok(out)
  }

  pub fn set_byte(&mut self, abs: AbsoluteAddress, byte: u8) -> Result<(), Error> {
    self.set_range(abs, &[byte])
  }

  /// Materializes coverage for `[abs, abs + bytes.len())` via
  /// [`Group::create_section`], then writes through to the covering
  /// sections.
  pub fn set_range(&mut self, abs: AbsoluteAddress, bytes: &[u8]) -> Result<(), Error> {
    if bytes.is_empty() {
      return Ok(());
    }
    if !address::is_valid_range(self.dialect(), abs, bytes.len() as u64) {
      return Err(Error::OutOfRange(format!("range [{:#X}, +{}) is not valid for a {:?} group", abs, bytes.len(), self.dialect())));
    }

    let mut cursor = abs;
    let mut written = 0usize;
    while written < bytes.len() {
      let index = self.create_section(cursor)?;
      let section = &mut self.sections[index];
      let rel = section.relative_for(cursor)?;
      let window_remaining = (0x10000 - rel as u32) as usize;
      let take = window_remaining.min(bytes.len() - written);
      section.set_range(rel, &bytes[written..written + take])?;
      written += take;
      cursor = cursor.wrapping_add(take as u32);
    }
    Ok(())
  }

  pub fn fill_range(&mut self, abs: AbsoluteAddress, size: DataSize, byte: u8) -> Result<(), Error> {
    let bytes = vec![byte; size as usize];
    self.set_range(abs, &bytes)
  }

  pub fn clear_byte(&mut self, abs: AbsoluteAddress) -> Result<(), Error> {
    self.clear_range(abs, 1)
  }

  /// Clears `[abs, abs + size)` in every section it overlaps. Ranges
  /// not currently covered by any section are silently skipped.
  pub fn clear_range(&mut self, abs: AbsoluteAddress, size: DataSize) -> Result<(), Error> {
    if !address::is_valid_range(self.dialect(), abs, size) {
      return Err(Error::OutOfRange(format!("range [{:#X}, +{}) is not valid for a {:?} group", abs, size, self.dialect())));
    }

    let covered = self.address_map();
    let mut cursor = abs as u64;
    let end = abs as u64 + size;
    while cursor < end {
      match self.find_section(cursor as AbsoluteAddress) {
        Some(index) => {
          let section = &mut self.sections[index];
          let rel = section.relative_for(cursor as AbsoluteAddress)?;
          let window_remaining = (0x10000 - rel as u32) as u64;
          let take = window_remaining.min(end - cursor);
          section.clear_range(rel, take)?;
          cursor += take;
        }
        None => {
          // Not covered by any section: skip straight to the start of
          // whichever covered range begins next, rather than stepping
          // one address at a time through a potentially huge gap.
          let next_covered_start = covered.iter().map(|(a, _)| a as u64).find(|&a| a > cursor);
          cursor = next_covered_start.unwrap_or(end).min(end);
        }
      }
    }
    Ok(())
  }

  // ---------------------------------------------------------------------
  // Start-execution metadata.
  // ---------------------------------------------------------------------

  fn require_dialect(&self, dialect: Dialect) -> Result<(), Error> {
    if self.dialect() == dialect {
      Ok(())
    } else {
      Err(Error::DomainMismatch(format!("operation requires a {:?} group, found {:?}", dialect, self.dialect())))
    }
  }

  /// As [`Group::require_dialect`], but also allows a section of the
  /// target dialect to be created in a genuinely empty group: `can_push`
  /// accepts any section kind into an empty group, so a setter lazily
  /// creating its singleton section should too.
  fn require_dialect_or_empty(&self, dialect: Dialect) -> Result<(), Error> {
    if self.is_empty() {
      Ok(())
    } else {
      self.require_dialect(dialect)
    }
  }

  pub fn code_segment_and_instruction_pointer(&self) -> Result<(u16, u16), Error> {
    self.require_dialect(Dialect::I16Hex)?;
    self
      .sections
      .iter()
      .find(|s| s.kind() == SectionKind::StartSegmentAddress)
      .ok_or_else(|| Error::DomainMismatch("group has no START_SEGMENT_ADDRESS section".to_string()))?
      .code_segment_and_instruction_pointer()
  }

  /// Sets the group's CS:IP, creating the singleton START_SEGMENT
  /// section if it does not already exist.
  pub fn set_code_segment_and_instruction_pointer(&mut self, cs: u16, ip: u16) -> Result<(), Error> {
    self.require_dialect_or_empty(Dialect::I16Hex)?;
    match self.sections.iter().position(|s| s.kind() == SectionKind::StartSegmentAddress) {
      Some(index) => {
        self.sections[index].convert_to_start_segment(cs, ip);
        Ok(())
      }
      None => {
        self.push_section(Section::new_start_segment(cs, ip))?;
        Ok(())
      }
    }
  }

  pub fn extended_instruction_pointer(&self) -> Result<u32, Error> {
    self.require_dialect(Dialect::I32Hex)?;
    self
      .sections
      .iter()
      .find(|s| s.kind() == SectionKind::StartLinearAddress)
      .ok_or_else(|| Error::DomainMismatch("group has no START_LINEAR_ADDRESS section".to_string()))?
      .extended_instruction_pointer()
  }

  pub fn set_extended_instruction_pointer(&mut self, eip: u32) -> Result<(), Error> {
    self.require_dialect_or_empty(Dialect::I32Hex)?;
    match self.sections.iter().position(|s| s.kind() == SectionKind::StartLinearAddress) {
      Some(index) => {
        self.sections[index].convert_to_start_linear(eip);
        Ok(())
      }
      None => {
        self.push_section(Section::new_start_linear(eip))?;
        Ok(())
      }
    }
  }

  // ---------------------------------------------------------------------
  // Record emission order.
  // ---------------------------------------------------------------------

  /// All records the group's sections would emit, in save order: each
  /// data-bearing section's main record (if any) followed by its DATA
  /// blocks, sections visited in insertion order, with any
  /// END_OF_FILE section forced last.
  pub fn to_records(&self) -> Vec<Record> {
    let mut eof = None;
    let mut records = Vec::new();

    for section in &self.sections {
      if section.kind() == SectionKind::EndOfFile {
        eof = section.main_record();
        continue;
      }
      for i in 0..section.record_count() {
        if let Some(record) = section.get_record(i) {
          records.push(record);
        }
      }
    }

    if let Some(record) = eof {
      records.push(record);
    }

    records
  }
}

fn section_contains(section: &Section, abs: AbsoluteAddress) -> bool {
  section
    .address_map()
    .map(|map| map.iter().any(|(addr, size)| (addr as u64) <= abs as u64 && (abs as u64) < addr as u64 + size))
    .unwrap_or(false)
}

fn contains_absolute_segment_address(abs: AbsoluteAddress, segment: u16) -> bool {
  let base = address::base_segment_address(segment) as u64;
  let abs = abs as u64;
  abs >= base && abs < base + 0x10000
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_group_accepts_any_kind() {
    let group = Group::new();
    assert!(group.can_push(&Section::new_data()).is_some());
    assert!(group.can_push(&Section::new_extended_linear(0)).is_some());
  }

  #[test]
  fn test_i8hex_group_rejects_second_data_section() {
    let mut group = Group::new();
    group.push_section(Section::new_data()).unwrap();
    assert!(group.push_section(Section::new_data()).is_err());
  }

  #[test]
  fn test_i16hex_group_rejects_intersecting_segment() {
    let mut group = Group::new();
    group.push_section(Section::new_extended_segment(0x1000)).unwrap();
    assert!(group.push_section(Section::new_extended_segment(0x10FF)).is_err());
    assert!(group.push_section(Section::new_extended_segment(0x2000)).is_ok());
  }

  #[test]
  fn test_end_of_file_is_singleton_and_emitted_last() {
    let mut group = Group::new();
    group.push_section(Section::new_data()).unwrap();
    group.push_section(Section::new_end_of_file()).unwrap();
    assert!(group.push_section(Section::new_end_of_file()).is_err());

    let records = group.to_records();
    assert_eq!(records.last().unwrap().kind(), crate::record::RecordKind::EndOfFile);
  }

  #[test]
  fn test_create_section_i8hex_reuses_existing_data_section() {
    let mut group = Group::new();
    let first = group.create_section(0x10).unwrap();
    let second = group.create_section(0x20).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_create_section_i16hex_creates_aligned_segment() {
    let mut group = Group::new();
    // Establish I16HEX dialect first: an empty group's derived dialect is
    // I8HEX, so `create_section` alone cannot seed an I16HEX document.
    group.push_section(Section::new_extended_segment(0)).unwrap();
    let index = group.create_section(0x12345).unwrap();
    let section = group.section(index).unwrap();
    assert_eq!(section.segment().unwrap(), address::find_segment(0x12345).unwrap());
  }

  #[test]
  fn test_create_section_i8hex_rejects_address_beyond_space() {
    let mut group = Group::new();
    assert!(group.create_section(0x12345).is_err());
  }

  #[test]
  fn test_set_and_get_range_across_group() {
    let mut group = Group::new();
    group.set_range(0x0F, &[1, 2, 3, 4, 5]).unwrap();
    assert_eq!(group.get_range(0x0F, 5).unwrap(), vec![1, 2, 3, 4, 5]);
  }

  #[test]
  fn test_set_range_spanning_two_i16hex_windows() {
    let mut group = Group::new();
    // Establish I16HEX dialect, then write across the 0x10000 segment
    // boundary so the group must auto-create a second EXT_SEG section.
    group.push_section(Section::new_extended_segment(0)).unwrap();
    let data = vec![0xAA; 8];
    group.set_range(0xFFFC, &data).unwrap();
    assert_eq!(group.get_range(0xFFFC, 8).unwrap(), data);
    assert_eq!(group.len(), 2);
  }

  #[test]
  fn test_start_segment_accessors_round_trip() {
    let mut group = Group::new();
    group.push_section(Section::new_extended_segment(0x1000)).unwrap();
    group.set_code_segment_and_instruction_pointer(0x1234, 0x5678).unwrap();
    assert_eq!(group.code_segment_and_instruction_pointer().unwrap(), (0x1234, 0x5678));
  }

  #[test]
  fn test_start_segment_accessors_reject_wrong_dialect() {
    let group = Group::new();
    assert!(group.code_segment_and_instruction_pointer().is_err());
  }

  #[test]
  fn test_set_code_segment_lazily_creates_on_empty_group() {
    let mut group = Group::new();
    group.set_code_segment_and_instruction_pointer(0x1234, 0x5678).unwrap();
    assert_eq!(group.dialect(), Dialect::I16Hex);
    assert_eq!(group.code_segment_and_instruction_pointer().unwrap(), (0x1234, 0x5678));
  }

  #[test]
  fn test_set_extended_instruction_pointer_lazily_creates_on_empty_group() {
    let mut group = Group::new();
    group.set_extended_instruction_pointer(0xDEAD_BEEF).unwrap();
    assert_eq!(group.dialect(), Dialect::I32Hex);
    assert_eq!(group.extended_instruction_pointer().unwrap(), 0xDEAD_BEEF);
  }

  #[test]
  fn test_set_code_segment_rejects_i8hex_group_with_data() {
    let mut group = Group::new();
    group.push_section(Section::new_data()).unwrap();
    assert!(group.set_code_segment_and_instruction_pointer(0, 0).is_err());
  }

  #[test]
  fn test_clear_range_skips_uncovered_bytes() {
    let mut group = Group::new();
    group.set_range(0, &[1, 2, 3]).unwrap();
    group.clear_range(0, 10).unwrap();
    assert_eq!(group.get_byte(0).unwrap(), DEFAULT_UNUSED_FILL);
  }
}
