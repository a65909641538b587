//
// Copyright 2016 The IHEX Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>.
// All files in the project carrying such notice may not be copied, modified, or
// distributed except according to those terms.
//

use thiserror::Error;

/// The single error type shared by every layer of the crate (address
/// arithmetic, records, sections and groups).
#[derive(Error, PartialEq, Eq, Clone, Debug)]
pub enum Error {
  /// A record string could not be parsed: missing start code, odd-length
  /// payload, non-hexadecimal characters, a length field exceeding 255,
  /// or a total length disagreeing with the declared byte count.
  #[error("malformed record: {0}")]
  Malformed(String),

  /// A record parsed syntactically but its stored checksum disagreed
  /// with the one computed over its fields.
  #[error("checksum mismatch: expected {expected:#04X}, found {found:#04X}")]
  ChecksumMismatch { expected: u8, found: u8 },

  /// A numeric argument fell outside the interval the operation accepts:
  /// a relative address above 0xFFFF, an absolute address outside the
  /// dialect's space, a zero-size range, a write crossing the dialect's
  /// top boundary, a `default_block_size` below 2, or an out-of-bounds
  /// section index.
  #[error("out of range: {0}")]
  OutOfRange(String),

  /// The operation is only meaningful for certain section or group
  /// kinds and was invoked on an incompatible one.
  #[error("domain mismatch: {0}")]
  DomainMismatch(String),

  /// An extended-segment section could not be created at the requested
  /// address without intersecting an existing section, even after
  /// trying every aligned offset.
  #[error("unable to create aligned extended segment address section: {0}")]
  SegmentAlignment(String),
}

pub type Result<T> = std::result::Result<T, Error>;
