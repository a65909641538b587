//
// Copyright 2016 The IHEX Developers. See the COPYRIGHT
// file at the top-level directory of this distribution.
//
// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>.
// All files in the project carrying such notice may not be copied, modified, or
// distributed except according to those terms.
//

//! Renders a [`Group`] back to its Intel HEX text representation.

use crate::group::Group;

/// Joins every record the group's sections would emit, in save order,
/// into newline-separated ASCII lines, with no trailing newline.
pub fn create_object_file_representation(group: &Group) -> String {
  group.to_records().iter().map(|record| record.to_record_string()).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::Record;
  use crate::section::Section;

  #[test]
  fn test_create_object_file_representation_orders_eof_last() {
    let mut group = Group::new();
    group.push_section(Section::new_end_of_file()).unwrap();
    group.set_range(0x0010, &[0x61, 0x64, 0x64]).unwrap();

    let text = create_object_file_representation(&group);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.last().unwrap(), &Record::make_end_of_file().to_record_string());
  }

  #[test]
  fn test_create_object_file_representation_empty_group() {
    let group = Group::new();
    assert_eq!(create_object_file_representation(&group), "");
  }
}
