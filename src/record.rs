//
// Copyright 2016 The IHEX Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>.
// All files in the project carrying such notice may not be copied, modified, or
// distributed except according to those terms.
//

//! A single textual Intel HEX line: byte count, 16-bit offset, record
//! kind, payload and checksum.

use std::convert::TryFrom;
use std::fmt;

use hex_simd::AsciiCase;

use crate::error::Error;

/// The six record kinds defined by the Intel HEX formats.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum RecordKind {
  Data = 0x00,
  EndOfFile = 0x01,
  ExtendedSegmentAddress = 0x02,
  StartSegmentAddress = 0x03,
  ExtendedLinearAddress = 0x04,
  StartLinearAddress = 0x05,
}

impl From<RecordKind> for u8 {
  fn from(kind: RecordKind) -> u8 {
    kind as u8
  }
}

impl TryFrom<u8> for RecordKind {
  type Error = Error;

  fn try_from(value: u8) -> Result<Self, Error> {
    match value {
      0x00 => Ok(RecordKind::Data),
      0x01 => Ok(RecordKind::EndOfFile),
      0x02 => Ok(RecordKind::ExtendedSegmentAddress),
      0x03 => Ok(RecordKind::StartSegmentAddress),
      0x04 => Ok(RecordKind::ExtendedLinearAddress),
      0x05 => Ok(RecordKind::StartLinearAddress),
      other => Err(Error::Malformed(format!("unsupported record type {:#04X}", other))),
    }
  }
}

/// One parsed Intel HEX record: `{byte_count, offset, kind, data, checksum}`.
/// `byte_count` is not stored separately — it is always `data.len()`,
/// which construction keeps at or below 255.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Record {
  offset: u16,
  kind: RecordKind,
  data: Vec<u8>,
  checksum: u8,
}

/// Smallest record body (everything after the start code): count + address + type + checksum.
const SMALLEST_RECORD_BYTE_COUNT: usize = 5;

impl Record {
  /// Constructs a record from its raw fields, computing the checksum.
  /// Fails with [`Error::OutOfRange`] when `data.len() > 255`.
  pub fn from_fields(offset: u16, kind: RecordKind, data: Vec<u8>) -> Result<Self, Error> {
    Self::from_fields_with_checksum(offset, kind, data, None)
  }

  /// As [`Record::from_fields`], but stores `checksum` verbatim when
  /// supplied (it may not be correct) instead of computing it.
  pub fn from_fields_with_checksum(offset: u16, kind: RecordKind, data: Vec<u8>, checksum: Option<u8>) -> Result<Self, Error> {
    if data.len() > 255 {
      return Err(Error::OutOfRange(format!("record data length {} exceeds 255 bytes", data.len())));
    }
    let mut record = Record { offset, kind, data, checksum: 0 };
    match checksum {
      Some(value) => record.checksum = value,
      None => record.update_checksum(),
    }
    Ok(record)
  }

  /// A DATA record carrying `bytes` at `offset`. Requires `1 <= bytes.len() <= 255`.
  pub fn make_data(offset: u16, bytes: Vec<u8>) -> Result<Self, Error> {
    if bytes.is_empty() || bytes.len() > 255 {
      return Err(Error::OutOfRange(format!("DATA record payload length {} is not in 1..=255", bytes.len())));
    }
    Self::from_fields(offset, RecordKind::Data, bytes)
  }

  /// The canonical END_OF_FILE record.
  pub fn make_end_of_file() -> Self {
    Self::from_fields(0, RecordKind::EndOfFile, Vec::new()).expect("end of file record is always valid")
  }

  /// An EXTENDED_SEGMENT_ADDRESS record opening the window `segment << 4`.
  pub fn make_extended_segment(segment: u16) -> Self {
    Self::from_fields(0, RecordKind::ExtendedSegmentAddress, segment.to_be_bytes().to_vec())
      .expect("extended segment address record is always valid")
  }

  /// A START_SEGMENT_ADDRESS record specifying the CS:IP pair.
  pub fn make_start_segment(cs: u16, ip: u16) -> Self {
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&cs.to_be_bytes());
    data.extend_from_slice(&ip.to_be_bytes());
    Self::from_fields(0, RecordKind::StartSegmentAddress, data).expect("start segment address record is always valid")
  }

  /// An EXTENDED_LINEAR_ADDRESS record specifying the upper 16 bits of the absolute address.
  pub fn make_extended_linear(linear: u16) -> Self {
    Self::from_fields(0, RecordKind::ExtendedLinearAddress, linear.to_be_bytes().to_vec())
      .expect("extended linear address record is always valid")
  }

  /// A START_LINEAR_ADDRESS record specifying the execution EIP.
  pub fn make_start_linear(eip: u32) -> Self {
    Self::from_fields(0, RecordKind::StartLinearAddress, eip.to_be_bytes().to_vec())
      .expect("start linear address record is always valid")
  }

  /// Parses the ASCII-encoded line. Syntactic only: a record with a
  /// mismatched checksum still parses, see [`Record::is_valid_checksum`].
  pub fn parse(text: &str) -> Result<Self, Error> {
    let text = text.trim();

    if !text.starts_with(':') {
      return Err(Error::Malformed("record does not begin with a start code (':')".to_string()));
    }
    let body = &text[1..];

    if body.len() % 2 != 0 {
      return Err(Error::Malformed("record does not contain a whole number of bytes".to_string()));
    }

    let bytes = hex_simd::decode_to_vec(body.as_bytes())
      .map_err(|_| Error::Malformed("record contains non-hexadecimal characters".to_string()))?;

    if bytes.len() < SMALLEST_RECORD_BYTE_COUNT {
      return Err(Error::Malformed("record is shorter than the smallest valid record".to_string()));
    }

    let byte_count = bytes[0] as usize;
    if bytes.len() != SMALLEST_RECORD_BYTE_COUNT + byte_count {
      return Err(Error::Malformed(format!("record length does not match declared byte count {}", byte_count)));
    }

    let offset = u16::from_be_bytes([bytes[1], bytes[2]]);
    let kind = RecordKind::try_from(bytes[3])?;
    let data = bytes[4..4 + byte_count].to_vec();
    let checksum = bytes[4 + byte_count];

    Ok(Record { offset, kind, data, checksum })
  }

  /// Byte count field: always `data().len()`.
  pub fn byte_count(&self) -> u8 {
    self.data.len() as u8
  }

  pub fn offset(&self) -> u16 {
    self.offset
  }

  pub fn kind(&self) -> RecordKind {
    self.kind
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn checksum(&self) -> u8 {
    self.checksum
  }

  /// Sums count, both offset bytes, the kind and every data byte, and
  /// takes the two's-complement negation of the low byte of that sum.
  pub fn compute_checksum(&self) -> u8 {
    let offset_bytes = self.offset.to_be_bytes();
    [self.byte_count(), offset_bytes[0], offset_bytes[1], u8::from(self.kind)]
      .iter()
      .chain(self.data.iter())
      .fold(0u8, |acc, &byte| acc.wrapping_add(byte))
      .wrapping_neg()
  }

  pub fn is_valid_checksum(&self) -> bool {
    self.checksum == self.compute_checksum()
  }

  pub fn update_checksum(&mut self) {
    self.checksum = self.compute_checksum();
  }

  /// True iff `self`'s shape (byte count and offset) satisfies the
  /// constraints `kind` requires.
  pub fn is_valid_for(&self, kind: RecordKind) -> bool {
    match kind {
      RecordKind::Data => !self.data.is_empty(),
      RecordKind::EndOfFile => self.data.is_empty() && self.offset == 0,
      RecordKind::ExtendedSegmentAddress => self.data.len() == 2 && self.offset == 0,
      RecordKind::StartSegmentAddress => self.data.len() == 4 && self.offset == 0,
      RecordKind::ExtendedLinearAddress => self.data.len() == 2 && self.offset == 0,
      RecordKind::StartLinearAddress => self.data.len() == 4 && self.offset == 0,
    }
  }

  fn require_kind(&self, kind: RecordKind) -> Result<(), Error> {
    if self.kind != kind {
      Err(Error::DomainMismatch(format!("record is a {:?} record, not a {:?} record", self.kind, kind)))
    } else {
      Ok(())
    }
  }

  /// Unpacks the 16-bit segment from an EXTENDED_SEGMENT_ADDRESS record.
  pub fn extended_segment_address(&self) -> Result<u16, Error> {
    self.require_kind(RecordKind::ExtendedSegmentAddress)?;
    Ok(u16::from_be_bytes([self.data[0], self.data[1]]))
  }

  /// Unpacks the CS:IP pair from a START_SEGMENT_ADDRESS record.
  pub fn start_segment_address(&self) -> Result<(u16, u16), Error> {
    self.require_kind(RecordKind::StartSegmentAddress)?;
    let cs = u16::from_be_bytes([self.data[0], self.data[1]]);
    let ip = u16::from_be_bytes([self.data[2], self.data[3]]);
    Ok((cs, ip))
  }

  /// Unpacks the 16-bit linear value from an EXTENDED_LINEAR_ADDRESS record.
  pub fn extended_linear_address(&self) -> Result<u16, Error> {
    self.require_kind(RecordKind::ExtendedLinearAddress)?;
    Ok(u16::from_be_bytes([self.data[0], self.data[1]]))
  }

  /// Unpacks the 32-bit EIP from a START_LINEAR_ADDRESS record.
  pub fn start_linear_address(&self) -> Result<u32, Error> {
    self.require_kind(RecordKind::StartLinearAddress)?;
    Ok(u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]))
  }

  /// Renders the record as its ASCII line representation, uppercase, no
  /// trailing newline.
  pub fn to_record_string(&self) -> String {
    let offset_bytes = self.offset.to_be_bytes();
    let mut body = Vec::with_capacity(5 + self.data.len());
    body.push(self.byte_count());
    body.extend_from_slice(&offset_bytes);
    body.push(u8::from(self.kind));
    body.extend_from_slice(&self.data);
    body.push(self.checksum);

    let mut result = String::with_capacity(1 + body.len() * 2);
    result.push(':');
    result.push_str(&hex_simd::encode_to_string(&body, AsciiCase::Upper));
    result
  }
}

impl fmt::Display for Record {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.to_record_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_typed_constructors_are_always_valid() {
    let records = vec![
      Record::make_data(0x0010, vec![0x61, 0x64, 0x64]).unwrap(),
      Record::make_end_of_file(),
      Record::make_extended_segment(0x1000),
      Record::make_start_segment(0x1234, 0x3800),
      Record::make_extended_linear(0xABCD),
      Record::make_start_linear(0x1234_5678),
    ];
    for record in &records {
      assert!(record.is_valid_checksum());
      assert!(record.is_valid_for(record.kind()));
    }
  }

  #[test]
  fn test_make_data_rejects_empty_and_oversized() {
    assert!(Record::make_data(0, vec![]).is_err());
    assert!(Record::make_data(0, vec![0u8; 256]).is_err());
    assert!(Record::make_data(0, vec![0u8; 255]).is_ok());
  }

  #[test]
  fn test_parse_data_record() {
    let record = Record::parse(":0B0010006164647265737320676170A7").unwrap();
    assert_eq!(record.kind(), RecordKind::Data);
    assert_eq!(record.offset(), 0x0010);
    assert_eq!(record.data(), &[0x61, 0x64, 0x64, 0x72, 0x65, 0x73, 0x73, 0x20, 0x67, 0x61, 0x70]);
    assert!(record.is_valid_checksum());
  }

  #[test]
  fn test_parse_does_not_verify_checksum() {
    // Last byte deliberately wrong.
    let record = Record::parse(":00000001FE").unwrap();
    assert_eq!(record.kind(), RecordKind::EndOfFile);
    assert!(!record.is_valid_checksum());
  }

  #[test]
  fn test_parse_rejects_missing_start_code() {
    assert_eq!(
      Record::parse("00000001FF"),
      Err(Error::Malformed("record does not begin with a start code (':')".to_string()))
    );
  }

  #[test]
  fn test_parse_rejects_non_hex() {
    assert!(Record::parse(":0000000GFF").is_err());
  }

  #[test]
  fn test_parse_rejects_wrong_length() {
    assert!(Record::parse(":FF000000").is_err());
  }

  #[test]
  fn test_round_trip_all_kinds() {
    let records = vec![
      Record::make_data(0x0010, vec![0x61, 0x64, 0x64]).unwrap(),
      Record::make_end_of_file(),
      Record::make_extended_segment(0x1200),
      Record::make_start_segment(0x0000, 0x3800),
      Record::make_extended_linear(0xFFFF),
      Record::make_start_linear(0x000000CD),
    ];
    for record in records {
      let text = record.to_record_string();
      let mut parsed = Record::parse(&text).unwrap();
      parsed.update_checksum();
      assert_eq!(parsed, record);
    }
  }

  #[test]
  fn test_to_record_string_matches_known_vectors() {
    assert_eq!(Record::make_end_of_file().to_record_string(), ":00000001FF");
    assert_eq!(Record::make_extended_segment(0x1200).to_record_string(), ":020000021200EA");
    assert_eq!(Record::make_start_segment(0x0110, 0x3801).to_record_string(), ":0400000301103801AF");
    assert_eq!(Record::make_extended_linear(0xFFFF).to_record_string(), ":02000004FFFFFC");
    assert_eq!(Record::make_start_linear(0x000000CD).to_record_string(), ":04000005000000CD2A");
  }

  #[test]
  fn test_typed_accessors_reject_wrong_kind() {
    let data_record = Record::make_data(0, vec![1]).unwrap();
    assert!(data_record.extended_segment_address().is_err());
    assert!(data_record.start_segment_address().is_err());
    assert!(data_record.extended_linear_address().is_err());
    assert!(data_record.start_linear_address().is_err());
  }

  #[test]
  fn test_is_valid_for() {
    let eof = Record::make_end_of_file();
    assert!(eof.is_valid_for(RecordKind::EndOfFile));
    assert!(!eof.is_valid_for(RecordKind::Data));
  }
}
