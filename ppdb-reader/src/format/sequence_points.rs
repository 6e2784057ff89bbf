//! Decoding of the sequence points blob of a `MethodDebugInformation` row.
//!
//! See https://github.com/dotnet/runtime/blob/main/docs/design/specs/PortablePdb-Metadata.md#sequence-points-blob.
//!
//! ```text
//! Blob ::= header SequencePointRecord (SequencePointRecord | document-record)*
//! header ::= LocalSignature InitialDocument?
//! ```
//!
//! Records are delta-encoded against their predecessors. This module resolves line and column
//! deltas into absolute values, but leaves IL offsets as deltas so callers can accumulate them.

use super::raw;
use super::{FormatError, FormatErrorKind};
use crate::cursor::ByteCursor;

/// A single decoded record of a sequence points blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SequencePointRecord {
    /// A sequence point mapping an IL offset to a source range.
    Visible {
        il_delta: u32,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
    },
    /// A sequence point without source, e.g. compiler-generated code.
    Hidden { il_delta: u32 },
    /// All following records belong to another document.
    DocumentChange { document: u32 },
}

impl SequencePointRecord {
    /// Returns `true` if this is a "hidden" sequence point.
    #[cfg(test)]
    pub(crate) fn is_hidden(&self) -> bool {
        matches!(self, Self::Hidden { .. })
    }

    /// Returns `true` if this record switches to another document.
    pub(crate) fn is_document_change(&self) -> bool {
        matches!(self, Self::DocumentChange { .. })
    }

    /// The IL offset delta relative to the previous sequence point.
    ///
    /// For the first record, this is the absolute offset.
    pub(crate) fn il_delta(&self) -> u32 {
        match *self {
            Self::Visible { il_delta, .. } | Self::Hidden { il_delta } => il_delta,
            Self::DocumentChange { .. } => 0,
        }
    }
}

/// The decoded contents of a sequence points blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SequencePoints {
    pub(crate) records: Vec<SequencePointRecord>,
}

impl SequencePoints {
    /// Decodes the blob of a method whose `MethodDebugInformation.Document` is `document`.
    ///
    /// If `document` is 0, the blob names its initial document itself.
    pub(crate) fn parse(blob: &[u8], document: u32) -> Result<Self, FormatError> {
        let mut cursor = ByteCursor::new(blob);

        // LocalSignature
        cursor.read_compressed_u32()?;
        if document == 0 {
            // InitialDocument
            cursor.read_compressed_u32()?;
        }

        let mut records = Vec::new();
        // (start_line, start_column) of the previous non-hidden point
        let mut prev_visible: Option<(u32, u32)> = None;

        while cursor.has_more() {
            let il_delta = cursor.read_compressed_u32()?;

            if il_delta == 0 && !records.is_empty() {
                let document = cursor.read_compressed_u32()?;
                records.push(SequencePointRecord::DocumentChange { document });
                continue;
            }

            let delta_lines = cursor.read_compressed_u32()?;
            let delta_columns = if delta_lines == 0 {
                i64::from(cursor.read_compressed_u32()?)
            } else {
                i64::from(cursor.read_compressed_i32()?)
            };

            if delta_lines == 0 && delta_columns == 0 {
                records.push(SequencePointRecord::Hidden { il_delta });
                continue;
            }

            let (start_line, start_column) = match prev_visible {
                Some((prev_line, prev_column)) => {
                    let line = i64::from(prev_line) + i64::from(cursor.read_compressed_i32()?);
                    let column = i64::from(prev_column) + i64::from(cursor.read_compressed_i32()?);
                    (line, column)
                }
                None => (
                    i64::from(cursor.read_compressed_u32()?),
                    i64::from(cursor.read_compressed_u32()?),
                ),
            };

            let end_line = start_line + i64::from(delta_lines);
            let end_column = start_column + delta_columns;

            let record = visible_record(il_delta, start_line, start_column, end_line, end_column)?;
            prev_visible = Some((start_line as u32, start_column as u32));
            records.push(record);
        }

        Ok(Self { records })
    }
}

/// Validates a decoded non-hidden sequence point against the limits of the format.
///
/// Lines lie in `[0, 0x20000000)` excluding `0xfeefee`, columns in `[0, 0x10000)`. Line and
/// column 0 are valid values of the grammar even though compilers start counting at 1.
fn visible_record(
    il_delta: u32,
    start_line: i64,
    start_column: i64,
    end_line: i64,
    end_column: i64,
) -> Result<SequencePointRecord, FormatError> {
    let line_ok = |line: i64| {
        (0..i64::from(raw::MAX_SEQUENCE_POINT_VALUE)).contains(&line)
            && line != i64::from(raw::HIDDEN_LINE)
    };
    let column_ok = |column: i64| (0..i64::from(raw::MAX_SEQUENCE_POINT_COLUMN)).contains(&column);

    if !line_ok(start_line)
        || !line_ok(end_line)
        || !column_ok(start_column)
        || !column_ok(end_column)
        || end_line < start_line
        || (end_line == start_line && end_column <= start_column)
    {
        return Err(FormatErrorKind::InvalidSequencePoint.into());
    }

    Ok(SequencePointRecord::Visible {
        il_delta,
        start_line: start_line as u32,
        start_column: start_column as u32,
        end_line: end_line as u32,
        end_column: end_column as u32,
    })
}
