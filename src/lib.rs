//
// Copyright 2016 The IHEX Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>.
// All files in the project carrying such notice may not be copied, modified, or
// distributed except according to those terms.
//

//! # The IHEX Library
//!
//! A Rust library modeling Intel HEX (or IHEX) objects as a layered
//! address/record/section/group document. This format is commonly used
//! for representing compiled program code and data to be loaded into a
//! microcontroller, flash memory or ROM.
//!
//! The layers, from the ground up:
//! - [`address`]: pure arithmetic translating relative offsets to
//!   absolute addresses across the I8HEX/I16HEX/I32HEX dialects.
//! - [`record`]: one ASCII line of the wire format.
//! - [`section`]: a main record plus, for data-bearing kinds, a
//!   disjoint map of data blocks.
//! - [`group`]: an ordered sequence of sections forming one document.
//!
//! [`reader`] and [`writer`] are thin file-level wrappers converting
//! between a [`group::Group`] and its textual representation.

/// Address arithmetic shared by the section and group layers.
pub mod address;

/// The single error type shared by every layer of the crate.
pub mod error;

/// An ordered sequence of sections forming one Intel HEX document.
pub mod group;

/// Operations for parsing IHEX records and assembling object files.
pub mod reader;

/// An Intel HEX record type.
pub mod record;

/// A main record plus its associated data blocks.
pub mod section;

/// Operations for generating IHEX records and object files.
pub mod writer;

pub use crate::address::{AbsoluteAddress, AddressMap, DataSize, Dialect, RelativeAddress};
pub use crate::error::Error;
pub use crate::group::Group;
pub use crate::reader::{read_records_to_group, LoadPolicy, Reader};
pub use crate::record::{Record, RecordKind};
pub use crate::section::{Section, SectionKind};
pub use crate::writer::create_object_file_representation;
