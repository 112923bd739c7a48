//! Sequential record iterator over one segment.

use crate::error::{CoreError, CoreResult};
use crate::segment::file::SegmentFile;
use crate::segment::record::{Record, RecordHeader, HEADER_SIZE};

/// Iterates the records of a segment in offset order.
///
/// Yields `(offset, record)` pairs. The written length is captured when
/// the iterator is created; bytes appended afterwards are not visited.
///
/// # Error Handling
///
/// - A short or invalid header yields `CorruptHeader`
/// - A body shorter than its header declares yields `TruncatedRecord`
/// - Either one ends the iteration; [`SegmentIterator::position`] then
///   reports the end of the last valid record
/// - I/O errors are yielded as-is and also end the iteration
pub struct SegmentIterator<'a> {
    segment: &'a SegmentFile,
    offset: u64,
    end: u64,
    finished: bool,
}

impl<'a> SegmentIterator<'a> {
    /// Creates an iterator starting at offset 0.
    pub fn new(segment: &'a SegmentFile) -> CoreResult<Self> {
        let end = segment.size()?;
        Ok(Self {
            segment,
            offset: 0,
            end,
            finished: false,
        })
    }

    /// Offset just past the last record yielded.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    fn read_next(&self) -> CoreResult<Record> {
        let available = self.end - self.offset;
        if available < HEADER_SIZE as u64 {
            return Err(CoreError::corrupt_header(format!(
                "{available} trailing bytes at offset {}",
                self.offset
            )));
        }

        let header = RecordHeader::decode(&self.segment.read_raw(self.offset, HEADER_SIZE)?)?;
        self.segment.check_category(&header)?;

        if available < header.record_size() {
            return Err(CoreError::TruncatedRecord {
                expected: header.body_len(),
                available: available - HEADER_SIZE as u64,
            });
        }

        let body = self
            .segment
            .read_raw(self.offset + HEADER_SIZE as u64, header.body_len() as usize)?;
        header.decode_body(&body)
    }
}

impl Iterator for SegmentIterator<'_> {
    type Item = CoreResult<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.offset >= self.end {
            return None;
        }

        match self.read_next() {
            Ok(record) => {
                let offset = self.offset;
                self.offset += record.size();
                Some(Ok((offset, record)))
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
