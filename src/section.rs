//
// Copyright 2016 The IHEX Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>.
// All files in the project carrying such notice may not be copied, modified, or
// distributed except according to those terms.
//

//! A "logical chunk" of a HEX document: a main record of some kind plus,
//! for data-bearing kinds, an ordered map of disjoint data blocks.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::address::{self, AbsoluteAddress, AddressMap, DataSize, Dialect, RelativeAddress};
use crate::error::Error;
use crate::record::{Record, RecordKind};

/// One-to-one with [`RecordKind`]: the kind of record a section's main
/// record carries.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum SectionKind {
  Data,
  EndOfFile,
  ExtendedSegmentAddress,
  StartSegmentAddress,
  ExtendedLinearAddress,
  StartLinearAddress,
}

impl SectionKind {
  /// DATA, EXTENDED_SEGMENT and EXTENDED_LINEAR sections carry a block map.
  pub fn is_data_bearing(self) -> bool {
    matches!(
      self,
      SectionKind::Data | SectionKind::ExtendedSegmentAddress | SectionKind::ExtendedLinearAddress
    )
  }
}

/// An ordered mapping from relative address to a contiguous run of
/// bytes. Invariant: blocks are pairwise disjoint and, for any two
/// blocks at offsets `a < b`, `a + len(block_a) <= b`.
pub type BlockMap = BTreeMap<RelativeAddress, Vec<u8>>;

/// Default cap on the size of any single block `set_range`/`fill_range`
/// will produce, and the merge threshold for `compact`.
pub const DEFAULT_BLOCK_SIZE: DataSize = 16;

/// Default byte substituted for addresses not covered by any block.
pub const DEFAULT_UNUSED_FILL: u8 = 0xFF;

const RELATIVE_SPACE_SIZE: u32 = 0x1_0000;

#[derive(PartialEq, Eq, Clone, Debug)]
enum SectionBody {
  Data { blocks: BlockMap },
  EndOfFile,
  ExtendedSegmentAddress { segment: u16, blocks: BlockMap },
  StartSegmentAddress { cs: u16, ip: u16 },
  ExtendedLinearAddress { linear: u16, blocks: BlockMap },
  StartLinearAddress { eip: u32 },
}

/// A section: one main record (implicit for a bare DATA section) plus,
/// for data-bearing kinds, a disjoint block map.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Section {
  body: SectionBody,
  fill: u8,
  default_block_size: DataSize,
}

impl Section {
  fn with_body(body: SectionBody) -> Self {
    Section {
      body,
      fill: DEFAULT_UNUSED_FILL,
      default_block_size: DEFAULT_BLOCK_SIZE,
    }
  }

  /// A freshly constructed, empty DATA section. Per the loader's
  /// first-push contract, an empty DATA section silently becomes
  /// whatever kind the first pushed record is.
  pub fn new_data() -> Self {
    Self::with_body(SectionBody::Data { blocks: BlockMap::new() })
  }

  pub fn new_end_of_file() -> Self {
    Self::with_body(SectionBody::EndOfFile)
  }

  pub fn new_extended_segment(segment: u16) -> Self {
    Self::with_body(SectionBody::ExtendedSegmentAddress { segment, blocks: BlockMap::new() })
  }

  pub fn new_start_segment(cs: u16, ip: u16) -> Self {
    Self::with_body(SectionBody::StartSegmentAddress { cs, ip })
  }

  pub fn new_extended_linear(linear: u16) -> Self {
    Self::with_body(SectionBody::ExtendedLinearAddress { linear, blocks: BlockMap::new() })
  }

  pub fn new_start_linear(eip: u32) -> Self {
    Self::with_body(SectionBody::StartLinearAddress { eip })
  }

  pub fn kind(&self) -> SectionKind {
    match &self.body {
      SectionBody::Data { .. } => SectionKind::Data,
      SectionBody::EndOfFile => SectionKind::EndOfFile,
      SectionBody::ExtendedSegmentAddress { .. } => SectionKind::ExtendedSegmentAddress,
      SectionBody::StartSegmentAddress { .. } => SectionKind::StartSegmentAddress,
      SectionBody::ExtendedLinearAddress { .. } => SectionKind::ExtendedLinearAddress,
      SectionBody::StartLinearAddress { .. } => SectionKind::StartLinearAddress,
    }
  }

  pub fn is_data_bearing(&self) -> bool {
    self.kind().is_data_bearing()
  }

  pub fn unused_fill(&self) -> u8 {
    self.fill
  }

  pub fn set_unused_fill(&mut self, fill: u8) {
    self.fill = fill;
  }

  pub fn default_block_size(&self) -> DataSize {
    self.default_block_size
  }

  pub fn set_default_block_size(&mut self, size: DataSize) -> Result<(), Error> {
    if size < 2 {
      return Err(Error::OutOfRange(format!("default_block_size {} must be >= 2", size)));
    }
    self.default_block_size = size;
    Ok(())
  }

  fn blocks(&self) -> Option<&BlockMap> {
    match &self.body {
      SectionBody::Data { blocks } | SectionBody::ExtendedSegmentAddress { blocks, .. } | SectionBody::ExtendedLinearAddress { blocks, .. } => {
        Some(blocks)
      }
      _ => None,
    }
  }

  fn blocks_mut(&mut self) -> Option<&mut BlockMap> {
    match &mut self.body {
      SectionBody::Data { blocks } | SectionBody::ExtendedSegmentAddress { blocks, .. } | SectionBody::ExtendedLinearAddress { blocks, .. } => {
        Some(blocks)
      }
      _ => None,
    }
  }

  fn require_data_bearing(&self) -> Result<&BlockMap, Error> {
    self
      .blocks()
      .ok_or_else(|| Error::DomainMismatch(format!("{:?} sections do not carry data", self.kind())))
  }

  fn require_data_bearing_mut(&mut self) -> Result<&mut BlockMap, Error> {
    let kind = self.kind();
    self.blocks_mut().ok_or_else(|| Error::DomainMismatch(format!("{:?} sections do not carry data", kind)))
  }

  /// The dialect this section's absolute addresses are expressed in,
  /// along with its extended-address value (0 for I8HEX).
  fn dialect_and_extended(&self) -> Result<(Dialect, u16), Error> {
    match &self.body {
      SectionBody::Data { .. } => Ok((Dialect::I8Hex, 0)),
      SectionBody::ExtendedSegmentAddress { segment, .. } => Ok((Dialect::I16Hex, *segment)),
      SectionBody::ExtendedLinearAddress { linear, .. } => Ok((Dialect::I32Hex, *linear)),
      _ => Err(Error::DomainMismatch(format!("{:?} sections have no address window", self.kind()))),
    }
  }

  // ---------------------------------------------------------------------
  // Conversion between section kinds.
  // ---------------------------------------------------------------------

  fn take_blocks(&mut self) -> BlockMap {
    self.blocks_mut().map(std::mem::take).unwrap_or_default()
  }

  /// Converts in place to a bare DATA section, preserving the block map.
  pub fn convert_to_data(&mut self) {
    let blocks = self.take_blocks();
    self.body = SectionBody::Data { blocks };
  }

  /// Converts in place to END_OF_FILE, clearing any data blocks.
  pub fn convert_to_end_of_file(&mut self) {
    self.body = SectionBody::EndOfFile;
  }

  /// Converts in place to EXTENDED_SEGMENT_ADDRESS, preserving the block
  /// map (relative offsets are unchanged; only the dialect of absolute
  /// addressing changes).
  pub fn convert_to_extended_segment(&mut self, segment: u16) {
    let blocks = self.take_blocks();
    self.body = SectionBody::ExtendedSegmentAddress { segment, blocks };
  }

  /// Converts in place to START_SEGMENT_ADDRESS, clearing any data blocks.
  pub fn convert_to_start_segment(&mut self, cs: u16, ip: u16) {
    self.body = SectionBody::StartSegmentAddress { cs, ip };
  }

  /// Converts in place to EXTENDED_LINEAR_ADDRESS, preserving the block map.
  pub fn convert_to_extended_linear(&mut self, linear: u16) {
    let blocks = self.take_blocks();
    self.body = SectionBody::ExtendedLinearAddress { linear, blocks };
  }

  /// Converts in place to START_LINEAR_ADDRESS, clearing any data blocks.
  pub fn convert_to_start_linear(&mut self, eip: u32) {
    self.body = SectionBody::StartLinearAddress { eip };
  }

  /// The record that represents this section's kind, e.g. the
  /// EXTENDED_SEGMENT_ADDRESS record an extended-segment section emits
  /// before its data blocks. `None` for a bare DATA section, which has
  /// no main record of its own.
  pub fn main_record(&self) -> Option<Record> {
    match &self.body {
      SectionBody::Data { .. } => None,
      SectionBody::EndOfFile => Some(Record::make_end_of_file()),
      SectionBody::ExtendedSegmentAddress { segment, .. } => Some(Record::make_extended_segment(*segment)),
      SectionBody::StartSegmentAddress { cs, ip } => Some(Record::make_start_segment(*cs, *ip)),
      SectionBody::ExtendedLinearAddress { linear, .. } => Some(Record::make_extended_linear(*linear)),
      SectionBody::StartLinearAddress { eip } => Some(Record::make_start_linear(*eip)),
    }
  }

  pub fn segment(&self) -> Result<u16, Error> {
    match &self.body {
      SectionBody::ExtendedSegmentAddress { segment, .. } => Ok(*segment),
      _ => Err(Error::DomainMismatch("section is not an EXTENDED_SEGMENT_ADDRESS section".to_string())),
    }
  }

  pub fn linear(&self) -> Result<u16, Error> {
    match &self.body {
      SectionBody::ExtendedLinearAddress { linear, .. } => Ok(*linear),
      _ => Err(Error::DomainMismatch("section is not an EXTENDED_LINEAR_ADDRESS section".to_string())),
    }
  }

  pub fn code_segment_and_instruction_pointer(&self) -> Result<(u16, u16), Error> {
    match &self.body {
      SectionBody::StartSegmentAddress { cs, ip } => Ok((*cs, *ip)),
      _ => Err(Error::DomainMismatch("section is not a START_SEGMENT_ADDRESS section".to_string())),
    }
  }

  pub fn extended_instruction_pointer(&self) -> Result<u32, Error> {
    match &self.body {
      SectionBody::StartLinearAddress { eip } => Ok(*eip),
      _ => Err(Error::DomainMismatch("section is not a START_LINEAR_ADDRESS section".to_string())),
    }
  }

  // ---------------------------------------------------------------------
  // Record enumeration.
  // ---------------------------------------------------------------------

  /// Number of records this section would emit: the main record (if
  /// any) plus one per data block.
  pub fn record_count(&self) -> usize {
    let main = if self.main_record().is_some() { 1 } else { 0 };
    main + self.blocks().map(BlockMap::len).unwrap_or(0)
  }

  /// The record at `index` in document order: for a non-data-bearing
  /// kind, index 0 is the main record. For a data-bearing kind with a
  /// main record, index 0 is the main record and 1..N are the data
  /// blocks in ascending-offset order; for a bare DATA section (no
  /// main record), index 0 is the first block. Out of range returns `None`.
  pub fn get_record(&self, index: usize) -> Option<Record> {
    let has_main = self.main_record().is_some();
    if has_main {
      if index == 0 {
        return self.main_record();
      }
      let block_index = index - 1;
      self.nth_block_as_record(block_index)
    } else {
      self.nth_block_as_record(index)
    }
  }

  fn nth_block_as_record(&self, block_index: usize) -> Option<Record> {
    let blocks = self.blocks()?;
    let (&offset, bytes) = blocks.iter().nth(block_index)?;
    Record::make_data(offset, bytes.clone()).ok()
  }

  /// Pushes a parsed record into this section. Fails with
  /// [`Error::ChecksumMismatch`] if the record's checksum is invalid.
  /// Returns `Ok(true)` if the record was merged, `Ok(false)` if it was
  /// refused because its kind is not compatible with the section's
  /// current state.
  pub fn push_record(&mut self, record: &Record) -> Result<bool, Error> {
    if !record.is_valid_checksum() {
      return Err(Error::ChecksumMismatch {
        expected: record.compute_checksum(),
        found: record.checksum(),
      });
    }

    match &self.body {
      SectionBody::Data { blocks } if blocks.is_empty() && record.kind() != RecordKind::Data => {
        if !record.is_valid_for(record.kind()) {
          return Ok(false);
        }
        self.body = Self::body_for_promoted_kind(record)?;
        Ok(true)
      }
      SectionBody::Data { .. } | SectionBody::ExtendedSegmentAddress { .. } | SectionBody::ExtendedLinearAddress { .. } => {
        if record.kind() != RecordKind::Data {
          return Ok(false);
        }
        self.set_range(record.offset(), record.data())?;
        Ok(true)
      }
      SectionBody::EndOfFile | SectionBody::StartSegmentAddress { .. } | SectionBody::StartLinearAddress { .. } => Ok(false),
    }
  }

  fn body_for_promoted_kind(record: &Record) -> Result<SectionBody, Error> {
    match record.kind() {
      RecordKind::EndOfFile => Ok(SectionBody::EndOfFile),
      RecordKind::ExtendedSegmentAddress => Ok(SectionBody::ExtendedSegmentAddress {
        segment: record.extended_segment_address()?,
        blocks: BlockMap::new(),
      }),
      RecordKind::StartSegmentAddress => {
        let (cs, ip) = record.start_segment_address()?;
        Ok(SectionBody::StartSegmentAddress { cs, ip })
      }
      RecordKind::ExtendedLinearAddress => Ok(SectionBody::ExtendedLinearAddress {
        linear: record.extended_linear_address()?,
        blocks: BlockMap::new(),
      }),
      RecordKind::StartLinearAddress => Ok(SectionBody::StartLinearAddress {
        eip: record.start_linear_address()?,
      }),
      RecordKind::Data => unreachable!("promotion is only attempted for non-DATA records"),
    }
  }

  // ---------------------------------------------------------------------
  // Relative-address data access.
  // ---------------------------------------------------------------------

  /// Lowest relative address meaningful for this section's window.
  pub fn lower_address(&self) -> Result<RelativeAddress, Error> {
    self.require_data_bearing()?;
    Ok(0)
  }

  /// Highest relative address meaningful for this section's window.
  pub fn upper_address(&self) -> Result<RelativeAddress, Error> {
    self.require_data_bearing()?;
    Ok(0xFFFF)
  }

  pub fn get_byte(&self, rel: RelativeAddress) -> Result<u8, Error> {
    let blocks = self.require_data_bearing()?;
    Ok(byte_at(blocks, rel, self.fill))
  }

  pub fn get_range(&self, rel: RelativeAddress, size: DataSize) -> Result<Vec<u8>, Error> {
    let blocks = self.require_data_bearing()?;
    if !address::is_valid_relative_range(rel, size) {
      return Err(Error::OutOfRange(format!("range [{:#X}, +{}) is not a valid relative range", rel, size)));
    }
    let mut out = Vec::with_capacity(size as usize);
    let mut addr = rel as u32;
    for _ in 0..size {
      out.push(byte_at(blocks, addr as RelativeAddress, self.fill));
      addr += 1;
    }
    Ok(out)
  }

  pub fn set_byte(&mut self, rel: RelativeAddress, byte: u8) -> Result<DataSize, Error> {
    self.set_range(rel, &[byte])
  }

  /// Merges `bytes` into the block map starting at `rel`, overwriting
  /// any bytes already present. A write may extend an existing block
  /// only up to `default_block_size`; beyond that, or once it would
  /// reach a following block, a new block is started. Returns the
  /// number of bytes written.
  pub fn set_range(&mut self, rel: RelativeAddress, bytes: &[u8]) -> Result<DataSize, Error> {
    if bytes.is_empty() {
      return Ok(0);
    }
    if !address::is_valid_relative_range(rel, bytes.len() as u64) {
      return Err(Error::OutOfRange(format!("range [{:#X}, +{}) is not a valid relative range", rel, bytes.len())));
    }
    let default_block_size = self.default_block_size;
    let blocks = self.require_data_bearing_mut()?;
    merge_into_blocks(blocks, default_block_size, rel, bytes);
    Ok(bytes.len() as DataSize)
  }

  /// Identical to [`Section::set_range`] but writes a single repeated byte.
  pub fn fill_range(&mut self, rel: RelativeAddress, size: DataSize, byte: u8) -> Result<DataSize, Error> {
    if !address::is_valid_relative_range(rel, size) {
      return Err(Error::OutOfRange(format!("range [{:#X}, +{}) is not a valid relative range", rel, size)));
    }
    let bytes = vec![byte; size as usize];
    self.set_range(rel, &bytes)
  }

  pub fn clear_byte(&mut self, rel: RelativeAddress) -> Result<DataSize, Error> {
    self.clear_range(rel, 1)
  }

  /// Removes bytes from the block map over `[rel, rel + size)`. A clear
  /// that cuts through the middle of a block splits it into a prefix
  /// and a suffix, both retained. Returns the count of relative
  /// addresses visited (not the count of bytes actually removed, which
  /// may be fewer if some addresses in the range were already unused).
  pub fn clear_range(&mut self, rel: RelativeAddress, size: DataSize) -> Result<DataSize, Error> {
    if !address::is_valid_relative_range(rel, size) {
      return Err(Error::OutOfRange(format!("range [{:#X}, +{}) is not a valid relative range", rel, size)));
    }
    let blocks = self.require_data_bearing_mut()?;
    let range_start = rel as u32;
    let range_end = range_start + size as u32;

    // `range_end` can be exactly `0x10000` (clearing to the top of the
    // relative address space), which does not fit in a `RelativeAddress`
    // upper bound: fall back to an unbounded scan in that case rather
    // than truncating it to 0 and silently matching nothing.
    let overlapping: Vec<RelativeAddress> = if range_end > 0xFFFF {
      blocks
        .range(..)
        .filter(|(&start, bytes)| (start as u32) + (bytes.len() as u32) > range_start)
        .map(|(&start, _)| start)
        .collect()
    } else {
      blocks
        .range(..range_end as RelativeAddress)
        .filter(|(&start, bytes)| (start as u32) + (bytes.len() as u32) > range_start)
        .map(|(&start, _)| start)
        .collect()
    };

    for start in overlapping {
      let bytes = blocks.remove(&start).expect("key collected from this map");
      let block_start = start as u32;
      let block_end = block_start + bytes.len() as u32;

      if block_start < range_start {
        let prefix = bytes[..(range_start - block_start) as usize].to_vec();
        blocks.insert(start, prefix);
      }
      if block_end > range_end {
        let suffix_start = range_end;
        let suffix = bytes[(suffix_start - block_start) as usize..].to_vec();
        blocks.insert(suffix_start as RelativeAddress, suffix);
      }
    }

    Ok(size)
  }

  // ---------------------------------------------------------------------
  // Block lookup.
  // ---------------------------------------------------------------------

  /// Index of the block containing `rel`, if any.
  pub fn find_address(&self, rel: RelativeAddress) -> Result<Option<usize>, Error> {
    let blocks = self.require_data_bearing()?;
    Ok(
      blocks
        .iter()
        .position(|(&start, bytes)| start <= rel && rel < start + bytes.len() as RelativeAddress),
    )
  }

  /// Index of the block strictly preceding `rel` (the last block whose
  /// start is `< rel`), if any.
  pub fn find_previous_record(&self, rel: RelativeAddress) -> Result<Option<usize>, Error> {
    let blocks = self.require_data_bearing()?;
    Ok(blocks.range(..rel).count().checked_sub(1))
  }

  /// Index of the block strictly following `rel` (the first block whose
  /// start is `> rel`), if any.
  pub fn find_next_record(&self, rel: RelativeAddress) -> Result<Option<usize>, Error> {
    let blocks = self.require_data_bearing()?;
    let before_or_at = blocks.range(..=rel).count();
    if before_or_at < blocks.len() {
      Ok(Some(before_or_at))
    } else {
      Ok(None)
    }
  }

  /// Merges adjacent blocks (block N ending exactly where N+1 begins)
  /// up to `default_block_size`, idempotently.
  pub fn compact(&mut self) {
    let default_block_size = self.default_block_size;
    let Some(blocks) = self.blocks_mut() else { return };
    let old = std::mem::take(blocks);
    let mut merged: Vec<(RelativeAddress, Vec<u8>)> = Vec::with_capacity(old.len());

    for (start, bytes) in old {
      if let Some((last_start, last_bytes)) = merged.last_mut() {
        let last_end = *last_start as u32 + last_bytes.len() as u32;
        if last_end == start as u32 && (last_bytes.len() as u64) < default_block_size {
          let room = (default_block_size - last_bytes.len() as u64) as usize;
          let take = room.min(bytes.len());
          last_bytes.extend_from_slice(&bytes[..take]);
          if take < bytes.len() {
            merged.push(((start as u32 + take as u32) as RelativeAddress, bytes[take..].to_vec()));
          }
          continue;
        }
      }
      merged.push((start, bytes));
    }

    *self.blocks_mut().expect("data-bearing section") = merged.into_iter().collect();
  }

  // ---------------------------------------------------------------------
  // Address maps and intersection.
  // ---------------------------------------------------------------------

  /// True iff `self` and `other` (same kind) cover any absolute address
  /// in common. Fails with [`Error::DomainMismatch`] if the kinds
  /// differ, or for non-data-bearing kinds.
  pub fn check_intersect(&self, other: &Section) -> Result<bool, Error> {
    if self.kind() != other.kind() {
      return Err(Error::DomainMismatch(format!(
        "cannot check intersection between a {:?} section and a {:?} section",
        self.kind(),
        other.kind()
      )));
    }
    match (&self.body, &other.body) {
      (SectionBody::Data { .. }, SectionBody::Data { .. }) => Ok(true),
      (SectionBody::ExtendedSegmentAddress { segment: s1, .. }, SectionBody::ExtendedSegmentAddress { segment: s2, .. }) => {
        Ok(address::segments_intersect(*s1, *s2))
      }
      (SectionBody::ExtendedLinearAddress { linear: l1, .. }, SectionBody::ExtendedLinearAddress { linear: l2, .. }) => {
        Ok(address::linears_intersect(*l1, *l2))
      }
      _ => Err(Error::DomainMismatch(format!("{:?} sections have no intersection concept", self.kind()))),
    }
  }

  /// The absolute ranges this section's window covers: one range, except
  /// for a wrapping I16HEX segment, which contributes two.
  pub fn address_map(&self) -> Result<AddressMap, Error> {
    let (dialect, extended) = self.dialect_and_extended()?;
    let mut map = AddressMap::new();

    if dialect == Dialect::I16Hex && address::has_segment_wraparound(extended) {
      let base = address::base_segment_address(extended);
      map.insert(base, (0x10_0000u64) - base as u64);
      let overflow = (base as u64 + 0x10000) - 0x10_0000u64;
      map.insert(0, overflow);
    } else {
      let base = address::min_absolute(dialect, extended);
      map.insert(base, 0x10000);
    }

    Ok(map)
  }

  /// The absolute ranges currently occupied by data blocks. A block that
  /// straddles the I16HEX 20-bit wraparound boundary contributes two
  /// ranges, same as [`Section::address_map`] does for the whole window.
  pub fn data_map(&self) -> Result<AddressMap, Error> {
    let (dialect, extended) = self.dialect_and_extended()?;
    let blocks = self.require_data_bearing()?;
    let mut map = AddressMap::new();
    for (&start, bytes) in blocks.iter() {
      let abs = address::absolute_from_relative(dialect, start, extended);
      let len = bytes.len() as u64;
      let end = abs as u64 + len;
      if dialect == Dialect::I16Hex && end > 0x10_0000u64 {
        map.insert(abs, (0x10_0000u64 - abs as u64) as DataSize);
        map.insert(0, (end - 0x10_0000u64) as DataSize);
      } else {
        map.insert(abs, len as DataSize);
      }
    }
    map.compact();
    Ok(map)
  }

  pub(crate) fn absolute_for(&self, rel: RelativeAddress) -> Result<AbsoluteAddress, Error> {
    let (dialect, extended) = self.dialect_and_extended()?;
    Ok(address::absolute_from_relative(dialect, rel, extended))
  }

  pub(crate) fn relative_for(&self, abs: AbsoluteAddress) -> Result<RelativeAddress, Error> {
    let (dialect, extended) = self.dialect_and_extended()?;
    address::relative_from_absolute(dialect, abs, extended)
  }
}

fn byte_at(blocks: &BlockMap, rel: RelativeAddress, fill: u8) -> u8 {
  match blocks.range(..=rel).next_back() {
    Some((&start, bytes)) if (rel as u32) < start as u32 + bytes.len() as u32 => bytes[(rel - start) as usize],
    _ => fill,
  }
}

/// Merges `data` into `blocks` starting at `rel`, respecting the
/// block-boundary policy: a write may extend an existing block up to
/// `default_block_size`, and never crosses into a following block.
fn merge_into_blocks(blocks: &mut BlockMap, default_block_size: DataSize, rel: RelativeAddress, data: &[u8]) {
  let mut index = 0usize;
  let mut addr = rel as u32;

  while index < data.len() {
    let next_block_start = blocks
      .range((Bound::Excluded(addr as RelativeAddress), Bound::Unbounded))
      .next()
      .map(|(&start, _)| start as u32)
      .unwrap_or(RELATIVE_SPACE_SIZE);

    // Is `addr` strictly inside an existing block? If so it is always
    // written there, regardless of the block-size cap: the cap only
    // governs whether a write starts a *new* block, never splits one
    // already spanning this address.
    let owning_start = blocks
      .range(..=(addr as RelativeAddress))
      .next_back()
      .filter(|(&start, bytes)| (addr as u32) < start as u32 + bytes.len() as u32)
      .map(|(&start, _)| start);

    if let Some(start) = owning_start {
      let bytes = blocks.get_mut(&start).expect("key from this map");
      let offset_in_block = (addr - start as u32) as usize;
      let avail = bytes.len() - offset_in_block;
      let take = avail.min(data.len() - index);
      bytes[offset_in_block..offset_in_block + take].copy_from_slice(&data[index..index + take]);
      index += take;
      addr += take as u32;
      continue;
    }

    // Does `addr` immediately continue an existing block, with room
    // left under the cap?
    let extend_start = blocks
      .range(..=(addr as RelativeAddress))
      .next_back()
      .filter(|(&start, bytes)| start as u32 + bytes.len() as u32 == addr && (bytes.len() as u64) < default_block_size)
      .map(|(&start, _)| start);

    if let Some(start) = extend_start {
      let bytes = blocks.get_mut(&start).expect("key from this map");
      let cap = default_block_size as u32;
      let write_limit = next_block_start.min(start as u32 + cap);
      let avail = (write_limit - addr) as usize;
      let take = avail.min(data.len() - index);
      bytes.extend_from_slice(&data[index..index + take]);
      index += take;
      addr += take as u32;
      continue;
    }

    // Start a new block at `addr`, capped by default_block_size and by
    // where the next existing block begins.
    let cap = default_block_size as u32;
    let write_limit = next_block_start.min(addr + cap);
    let avail = (write_limit - addr).max(1) as usize;
    let take = avail.min(data.len() - index);
    blocks.insert(addr as RelativeAddress, data[index..index + take].to_vec());
    index += take;
    addr += take as u32;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_data_section_promotes_on_first_non_data_push() {
    let mut section = Section::new_data();
    assert_eq!(section.kind(), SectionKind::Data);
    let record = Record::make_extended_linear(0x0001);
    assert!(section.push_record(&record).unwrap());
    assert_eq!(section.kind(), SectionKind::ExtendedLinearAddress);
    assert_eq!(section.linear().unwrap(), 0x0001);
  }

  #[test]
  fn test_data_section_merges_data_records() {
    let mut section = Section::new_data();
    let record = Record::make_data(0x0010, vec![0xCA, 0xFE]).unwrap();
    assert!(section.push_record(&record).unwrap());
    assert_eq!(section.get_byte(0x0010).unwrap(), 0xCA);
    assert_eq!(section.get_byte(0x0011).unwrap(), 0xFE);
    assert_eq!(section.get_byte(0x0012).unwrap(), DEFAULT_UNUSED_FILL);
  }

  #[test]
  fn test_push_record_rejects_bad_checksum() {
    let mut section = Section::new_data();
    let bad = Record::from_fields_with_checksum(0, RecordKind::Data, vec![1], Some(0xAB)).unwrap();
    assert!(section.push_record(&bad).is_err());
  }

  #[test]
  fn test_non_empty_data_section_rejects_non_data_record() {
    let mut section = Section::new_data();
    section.push_record(&Record::make_data(0, vec![1]).unwrap()).unwrap();
    let eof = Record::make_end_of_file();
    assert!(!section.push_record(&eof).unwrap());
  }

  #[test]
  fn test_fixed_kinds_reject_all_pushes() {
    let mut eof = Section::new_end_of_file();
    assert!(!eof.push_record(&Record::make_data(0, vec![1]).unwrap()).unwrap());

    let mut start_segment = Section::new_start_segment(0, 0);
    assert!(!start_segment.push_record(&Record::make_data(0, vec![1]).unwrap()).unwrap());
  }

  #[test]
  fn test_set_and_get_range_roundtrip() {
    let mut section = Section::new_data();
    section.set_range(0, &[1, 2, 3, 4]).unwrap();
    assert_eq!(section.get_range(0, 4).unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(section.get_byte(4).unwrap(), DEFAULT_UNUSED_FILL);
  }

  #[test]
  fn test_set_range_respects_default_block_size() {
    let mut section = Section::new_data();
    section.set_default_block_size(4).unwrap();
    section.set_range(0, &[1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(section.get_range(0, 6).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    // Two blocks, not one 6-byte block, since the cap is 4.
    assert_eq!(section.find_address(0).unwrap(), Some(0));
    assert_eq!(section.find_address(4).unwrap(), Some(1));
  }

  #[test]
  fn test_clear_range_splits_block() {
    let mut section = Section::new_data();
    section.set_range(0, &[1, 2, 3, 4, 5]).unwrap();
    section.clear_range(1, 2).unwrap();
    assert_eq!(section.get_byte(0).unwrap(), 1);
    assert_eq!(section.get_byte(1).unwrap(), DEFAULT_UNUSED_FILL);
    assert_eq!(section.get_byte(2).unwrap(), DEFAULT_UNUSED_FILL);
    assert_eq!(section.get_byte(3).unwrap(), 4);
    assert_eq!(section.get_byte(4).unwrap(), 5);
  }

  #[test]
  fn test_clear_range_reaching_top_of_relative_space() {
    let mut section = Section::new_data();
    section.set_range(0xFFFC, &[1, 2, 3, 4]).unwrap();
    // `rel + size == 0x10000` exactly: the upper bound does not fit in a
    // `RelativeAddress` and must not be truncated away.
    section.clear_range(0xFFFC, 4).unwrap();
    assert_eq!(section.find_address(0xFFFC).unwrap(), None);
    assert_eq!(section.get_byte(0xFFFC).unwrap(), DEFAULT_UNUSED_FILL);
  }

  #[test]
  fn test_compact_merges_adjacent_blocks_under_cap() {
    let mut section = Section::new_data();
    section.set_range(0, &[1, 2]).unwrap();
    section.set_range(2, &[3, 4]).unwrap();
    section.compact();
    assert_eq!(section.find_address(0).unwrap(), Some(0));
    assert_eq!(section.find_address(2).unwrap(), Some(0));
    assert_eq!(section.get_range(0, 4).unwrap(), vec![1, 2, 3, 4]);
  }

  #[test]
  fn test_check_intersect_segments() {
    let a = Section::new_extended_segment(0x1000);
    let b = Section::new_extended_segment(0x10FF);
    let c = Section::new_extended_segment(0x2000);
    assert!(a.check_intersect(&b).unwrap());
    assert!(!a.check_intersect(&c).unwrap());
  }

  #[test]
  fn test_check_intersect_requires_same_kind() {
    let a = Section::new_data();
    let b = Section::new_end_of_file();
    assert!(a.check_intersect(&b).is_err());
  }

  #[test]
  fn test_address_map_wraps_for_high_segment() {
    let section = Section::new_extended_segment(0xF800);
    let map = section.address_map().unwrap();
    let ranges: Vec<_> = map.iter().collect();
    assert_eq!(ranges.len(), 2);
  }

  #[test]
  fn test_data_map_splits_block_across_segment_wraparound() {
    let mut section = Section::new_extended_segment(0xF800);
    section.set_range(0x7FF8, &[0xAA; 16]).unwrap();
    let map = section.data_map().unwrap();
    let ranges: Vec<_> = map.iter().collect();
    assert_eq!(ranges, vec![(0, 8), (0xFFFF8, 8)]);
  }

  #[test]
  fn test_convert_preserves_blocks_between_data_bearing_kinds() {
    let mut section = Section::new_data();
    section.set_range(0x10, &[1, 2, 3]).unwrap();
    section.convert_to_extended_linear(0x0001);
    assert_eq!(section.get_byte(0x10).unwrap(), 1);
    section.convert_to_end_of_file();
    assert!(section.get_byte(0x10).is_err());
  }

  #[test]
  fn test_get_record_for_bare_data_section() {
    let mut section = Section::new_data();
    assert_eq!(section.get_record(0), None);
    section.set_range(0x10, &[1, 2]).unwrap();
    assert_eq!(section.get_record(0), Some(Record::make_data(0x10, vec![1, 2]).unwrap()));
    assert_eq!(section.get_record(1), None);
  }

  #[test]
  fn test_get_record_for_extended_segment_section() {
    let mut section = Section::new_extended_segment(0x1000);
    section.set_range(0x10, &[1, 2]).unwrap();
    assert_eq!(section.get_record(0), Some(Record::make_extended_segment(0x1000)));
    assert_eq!(section.get_record(1), Some(Record::make_data(0x10, vec![1, 2]).unwrap()));
    assert_eq!(section.get_record(2), None);
  }
}
