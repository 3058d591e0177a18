// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Split an object into parts.

use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// One contiguous byte range of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartDescriptor {
    /// Part number, starting at 1.
    pub number: u32,
    /// Offset of the first byte.
    pub offset: u64,
    /// Length in bytes, only zero for the single part of an empty object.
    pub length: u64,
}

impl PartDescriptor {
    /// Inclusive byte range of this part, `None` when it's empty.
    pub fn range(&self) -> Option<ByteRange> {
        (self.length > 0).then(|| ByteRange {
            start: self.offset,
            end: self.offset + self.length - 1,
        })
    }
}

/// Inclusive byte range as used by the `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte.
    pub start: u64,
    /// Last byte, inclusive.
    pub end: u64,
}

impl ByteRange {
    /// Parse `bytes={start}-{end}`.
    pub fn parse(s: &str) -> Option<Self> {
        let (start, end) = s.strip_prefix("bytes=")?.split_once('-')?;
        let (start, end) = (start.trim().parse().ok()?, end.trim().parse().ok()?);
        (start <= end).then_some(Self { start, end })
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Never true, a range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// Ordered, contiguous parts covering a whole object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    total_size: u64,
    part_size: u64,
    parts: Vec<PartDescriptor>,
}

impl PartPlan {
    /// Plan `total_size` bytes starting from `requested_part_size_mib`.
    ///
    /// The part size is at least 1 MiB and doubles while
    /// `part_size * max_part_count < total_size`.
    pub fn new(total_size: u64, requested_part_size_mib: u64, max_part_count: u64) -> Result<Self> {
        if max_part_count == 0 {
            return Err(Error::invalid_input("max part count must be positive"));
        }

        let mut part_size = requested_part_size_mib.max(1).saturating_mul(MIB);
        while part_size.saturating_mul(max_part_count) < total_size {
            part_size = part_size.checked_mul(2).ok_or_else(|| {
                Error::invalid_input(format!(
                    "{total_size} bytes don't fit in {max_part_count} parts"
                ))
            })?;
        }

        Self::with_part_size(total_size, part_size)
    }

    /// Plan `total_size` bytes with a fixed part size, as stored in a
    /// progress record.
    pub fn with_part_size(total_size: u64, part_size: u64) -> Result<Self> {
        if part_size == 0 {
            return Err(Error::invalid_input("part size must be positive"));
        }

        let count = total_size.div_ceil(part_size).max(1);
        if count > u32::MAX as u64 {
            return Err(Error::invalid_input(format!(
                "{total_size} bytes in {part_size} byte parts needs too many parts"
            )));
        }

        let parts = (0..count)
            .map(|i| {
                let offset = i * part_size;
                PartDescriptor {
                    number: i as u32 + 1,
                    offset,
                    length: part_size.min(total_size - offset),
                }
            })
            .collect();

        Ok(Self {
            total_size,
            part_size,
            parts,
        })
    }

    /// Size of the planned object.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Size of every part but the last.
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// All parts in ascending order.
    pub fn parts(&self) -> &[PartDescriptor] {
        &self.parts
    }

    /// Number of parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Never true, even an empty object has one part.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Whether the object fits a single request.
    pub fn is_single(&self) -> bool {
        self.parts.len() == 1
    }

    /// Look up a part by number.
    pub fn get(&self, number: u32) -> Option<&PartDescriptor> {
        self.parts.get((number as usize).checked_sub(1)?)
    }

    /// Parts not in `completed`, in ascending order.
    pub fn missing(&self, completed: &BTreeSet<u32>) -> Vec<PartDescriptor> {
        self.parts
            .iter()
            .filter(|p| !completed.contains(&p.number))
            .copied()
            .collect()
    }
}
