//! The per-document index of methods, sequence points and lexical scopes.
//!
//! Every [`DocumentIndex`] corresponds to one row of the `Document` table and lists the methods
//! whose `MethodDebugInformation` row points at that document, in row order. Relationships
//! between rows are kept as 1-based row indices rather than references.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::format::metadata::{DocumentRow, LocalScopeRow, MetadataTables, TableType};
use crate::format::raw;
use crate::format::sequence_points::{SequencePointRecord, SequencePoints};
use crate::format::streams::Heaps;
use crate::format::{FormatError, FormatErrorKind};
use crate::guids::{HashAlgorithm, Language};

/// Maps an IL offset of a method to a range in its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SequencePoint {
    /// The absolute IL offset within the method body.
    pub il_offset: u32,
    /// The first line, usually 1-based. `0xfeefee` for hidden points.
    pub start_line: u32,
    /// The last line. `0xfeefee` for hidden points.
    pub end_line: u32,
    /// The first column, usually 1-based. 0 for hidden points.
    pub start_column: u32,
    /// The column after the last character. 0 for hidden points.
    pub end_column: u32,
    /// Whether this point marks code without a source location.
    pub is_hidden: bool,
}

impl SequencePoint {
    fn hidden(il_offset: u32) -> Self {
        Self {
            il_offset,
            start_line: raw::HIDDEN_LINE,
            end_line: raw::HIDDEN_LINE,
            start_column: 0,
            end_column: 0,
            is_hidden: true,
        }
    }
}

/// A local variable that is in scope within a [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LocalVariableInfo {
    /// The variable's name.
    pub name: String,
    /// The local slot the variable is stored in.
    pub slot: u16,
    /// Whether the variable is marked `DebuggerHidden`.
    pub debugger_hidden: bool,
}

/// A local constant that is in scope within a [`Scope`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LocalConstantInfo {
    /// The constant's name.
    pub name: String,
}

/// A lexical scope of a method: an IL range with the locals visible in it.
///
/// Scopes of one method are kept flat. Nesting follows from containment of their IL ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Scope {
    /// The 1-based `LocalScope` row this scope was built from.
    pub index: usize,
    /// The first IL offset covered by this scope.
    pub start_offset: u32,
    /// The number of IL bytes covered by this scope.
    pub length: u32,
    /// The `LocalVariable` rows owned by this scope, end exclusive.
    pub local_variable_rows: Range<usize>,
    /// The `LocalConstant` rows owned by this scope, end exclusive.
    pub local_constant_rows: Range<usize>,
    /// The variables owned by this scope, in row order.
    pub local_variables: Vec<LocalVariableInfo>,
    /// The constants owned by this scope, in row order.
    pub local_constants: Vec<LocalConstantInfo>,
}

impl Scope {
    /// The first IL offset after this scope.
    pub fn end_offset(&self) -> u64 {
        u64::from(self.start_offset) + u64::from(self.length)
    }

    /// Whether `il_offset` lies within this scope.
    pub fn contains(&self, il_offset: u32) -> bool {
        il_offset >= self.start_offset && u64::from(il_offset) < self.end_offset()
    }
}

/// Debug information for a single method.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MethodInfo {
    /// The 1-based `MethodDef` row, equal to the `MethodDebugInformation` row.
    pub method_def: u32,
    /// The smallest start line of all visible sequence points.
    ///
    /// `None` if the method has no visible sequence points.
    pub first_line: Option<u32>,
    /// The largest end line of all visible sequence points.
    pub last_line: Option<u32>,
    /// All sequence points in IL order, including hidden ones.
    pub sequence_points: Vec<SequencePoint>,
    /// The method's lexical scopes in `LocalScope` row order.
    pub local_scopes: Vec<Scope>,
}

impl MethodInfo {
    /// The metadata token of this method, as reported by the runtime.
    pub fn token(&self) -> u32 {
        raw::METHOD_DEF_TOKEN_TYPE | self.method_def
    }

    /// Iterates over the sequence points that have a source location.
    pub fn visible_sequence_points(&self) -> impl Iterator<Item = &SequencePoint> + '_ {
        self.sequence_points.iter().filter(|sp| !sp.is_hidden)
    }
}

/// A source document and the methods defined in it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DocumentIndex {
    /// The 1-based `Document` row.
    pub index: usize,
    /// The document's path as recorded by the compiler.
    pub file_path: String,
    /// The language the document is written in.
    pub language: Language,
    /// The algorithm `hash` was computed with.
    pub hash_algorithm: HashAlgorithm,
    /// The checksum of the document contents, empty if there is none.
    pub hash: Vec<u8>,
    /// The methods of this document in `MethodDebugInformation` row order.
    pub methods: Vec<MethodInfo>,
}

/// Builds the index of every document of a file.
pub(crate) fn build_document_indices(
    heaps: &Heaps<'_>,
    tables: &MetadataTables,
) -> Result<Vec<DocumentIndex>, FormatError> {
    let methods_by_document = group_methods_by_document(tables)?;
    let mut scopes =
        tracing::trace_span!("build_scopes").in_scope(|| build_scopes(heaps, tables))?;

    let mut indices = Vec::with_capacity(tables.documents.len());
    for ((document, row), methods) in tables.documents.iter().zip(methods_by_document) {
        let mut index = document_header(heaps, document, row).map_err(|e| {
            tracing::debug!(document, error = %e, "failed to read document");
            e
        })?;

        for method in methods {
            let info = build_method(heaps, tables, &mut scopes, method).map_err(|e| {
                tracing::debug!(document, method, error = %e, "failed to read method");
                e
            })?;
            index.methods.push(info);
        }

        indices.push(index);
    }

    Ok(indices)
}

/// Resolves the name, language and hash of a document.
fn document_header(
    heaps: &Heaps<'_>,
    index: usize,
    row: &DocumentRow,
) -> Result<DocumentIndex, FormatError> {
    let file_path = heaps.get_document_name(row.name)?;
    let language = match row.language {
        0 => Language::Unknown,
        idx => Language::from_guid(heaps.guids.get_guid(idx)?),
    };
    let hash_algorithm = match row.hash_algorithm {
        0 => HashAlgorithm::Unknown,
        idx => HashAlgorithm::from_guid(heaps.guids.get_guid(idx)?),
    };
    let hash = heaps.blobs.get_blob(row.hash)?.to_vec();

    Ok(DocumentIndex {
        index,
        file_path,
        language,
        hash_algorithm,
        hash,
        methods: Vec::new(),
    })
}

/// Returns the `MethodDebugInformation` rows of every document, in row order.
///
/// Methods without a document are not part of any index.
fn group_methods_by_document(tables: &MetadataTables) -> Result<Vec<Vec<usize>>, FormatError> {
    let mut grouped = vec![Vec::new(); tables.documents.len()];
    for (method, row) in tables.method_debug_information.iter() {
        if row.document == 0 {
            continue;
        }
        let document = row.document as usize;
        grouped
            .get_mut(document - 1)
            .ok_or(FormatErrorKind::InvalidRowIndex(TableType::Document, document))?
            .push(method);
    }
    Ok(grouped)
}

/// Builds every `LocalScope` row and groups the scopes by `MethodDef` row.
///
/// The variable and constant ranges of all scopes are validated, including scopes of methods
/// that do not belong to any document.
fn build_scopes(
    heaps: &Heaps<'_>,
    tables: &MetadataTables,
) -> Result<BTreeMap<u32, Vec<Scope>>, FormatError> {
    let rows: Vec<(usize, &LocalScopeRow)> = tables.local_scopes.iter().collect();

    let mut scopes: BTreeMap<u32, Vec<Scope>> = BTreeMap::new();
    for (i, &(index, row)) in rows.iter().enumerate() {
        let next = rows.get(i + 1).map(|(_, next)| *next);
        let scope = build_scope(heaps, tables, index, row, next).map_err(|e| {
            tracing::debug!(
                scope = index,
                method = row.method_def,
                error = %e,
                "invalid local scope"
            );
            e
        })?;
        scopes.entry(row.method_def).or_default().push(scope);
    }
    Ok(scopes)
}

fn build_scope(
    heaps: &Heaps<'_>,
    tables: &MetadataTables,
    index: usize,
    row: &LocalScopeRow,
    next: Option<&LocalScopeRow>,
) -> Result<Scope, FormatError> {
    if row.method_def == 0 {
        return Err(FormatErrorKind::InvalidRowIndex(TableType::MethodDef, 0).into());
    }

    let local_variable_rows = owned_rows(
        TableType::LocalVariable,
        row.variable_list,
        next.map(|next| next.variable_list),
        tables.local_variables.len(),
    )?;
    let local_constant_rows = owned_rows(
        TableType::LocalConstant,
        row.constant_list,
        next.map(|next| next.constant_list),
        tables.local_constants.len(),
    )?;

    let mut local_variables = Vec::with_capacity(local_variable_rows.len());
    for idx in local_variable_rows.clone() {
        let variable = tables.local_variables.row(idx)?;
        local_variables.push(LocalVariableInfo {
            name: heaps.strings.get_string(variable.name)?.to_owned(),
            slot: variable.index,
            debugger_hidden: variable.is_debugger_hidden(),
        });
    }

    let mut local_constants = Vec::with_capacity(local_constant_rows.len());
    for idx in local_constant_rows.clone() {
        let constant = tables.local_constants.row(idx)?;
        local_constants.push(LocalConstantInfo {
            name: heaps.strings.get_string(constant.name)?.to_owned(),
        });
    }

    Ok(Scope {
        index,
        start_offset: row.start_offset,
        length: row.length,
        local_variable_rows,
        local_constant_rows,
        local_variables,
        local_constants,
    })
}

/// Computes the rows of a child table owned by a scope.
///
/// The range starts at the scope's own list index and ends before the next scope's list index,
/// or at the end of the table for the last scope.
fn owned_rows(
    table: TableType,
    start: u32,
    next_start: Option<u32>,
    table_len: usize,
) -> Result<Range<usize>, FormatError> {
    let table_end = table_len + 1;
    let start = start as usize;
    let end = match next_start {
        Some(next) => std::cmp::min(table_end, next as usize),
        None => table_end,
    };

    if end < start || end > table_end {
        return Err(FormatErrorKind::InconsistentRange { table, start, end }.into());
    }
    if start == 0 && end > 0 {
        return Err(FormatErrorKind::InvalidRowIndex(table, 0).into());
    }

    Ok(start..end)
}

/// Decodes the sequence points of one method and attaches its scopes.
fn build_method(
    heaps: &Heaps<'_>,
    tables: &MetadataTables,
    scopes: &mut BTreeMap<u32, Vec<Scope>>,
    method: usize,
) -> Result<MethodInfo, FormatError> {
    let row = tables.method_debug_information.row(method)?;
    let method_def = method as u32;

    let sequence_points = match row.sequence_points {
        0 => Vec::new(),
        offset => {
            let blob = heaps.blobs.get_blob(offset)?;
            let decoded = SequencePoints::parse(blob, row.document)?;
            resolve_sequence_points(method, &decoded.records)?
        }
    };

    let mut first_line = None;
    let mut last_line = None;
    for sp in sequence_points.iter().filter(|sp| !sp.is_hidden) {
        first_line = Some(first_line.map_or(sp.start_line, |line: u32| line.min(sp.start_line)));
        last_line = Some(last_line.map_or(sp.end_line, |line: u32| line.max(sp.end_line)));
    }

    // every method is visited at most once
    let local_scopes = scopes.remove(&method_def).unwrap_or_default();

    Ok(MethodInfo {
        method_def,
        first_line,
        last_line,
        sequence_points,
        local_scopes,
    })
}

/// Turns decoded records into sequence points with absolute IL offsets.
fn resolve_sequence_points(
    method: usize,
    records: &[SequencePointRecord],
) -> Result<Vec<SequencePoint>, FormatError> {
    let mut points = Vec::with_capacity(records.len());
    let mut il_offset: Option<u32> = None;

    for record in records {
        if record.is_document_change() {
            return Err(FormatErrorKind::CrossDocumentMethod(method).into());
        }

        let offset = match il_offset {
            None => record.il_delta(),
            Some(prev) => prev
                .checked_add(record.il_delta())
                .ok_or(FormatErrorKind::InvalidSequencePoint)?,
        };
        if offset >= raw::MAX_SEQUENCE_POINT_VALUE {
            return Err(FormatErrorKind::InvalidSequencePoint.into());
        }
        il_offset = Some(offset);

        let point = match *record {
            SequencePointRecord::Visible {
                start_line,
                start_column,
                end_line,
                end_column,
                ..
            } => SequencePoint {
                il_offset: offset,
                start_line,
                end_line,
                start_column,
                end_column,
                is_hidden: false,
            },
            _ => SequencePoint::hidden(offset),
        };
        points.push(point);
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_rows() {
        let table = TableType::LocalVariable;
        assert_eq!(owned_rows(table, 1, Some(3), 4).unwrap(), 1..3);
        assert_eq!(owned_rows(table, 3, Some(3), 4).unwrap(), 3..3);
        // the last scope owns everything up to the end of the table
        assert_eq!(owned_rows(table, 3, None, 4).unwrap(), 3..5);
        // the next scope may point past the end of the table
        assert_eq!(owned_rows(table, 2, Some(9), 4).unwrap(), 2..5);
        // empty table
        assert_eq!(owned_rows(table, 1, None, 0).unwrap(), 1..1);
    }

    #[test]
    fn test_owned_rows_inconsistent() {
        let err = owned_rows(TableType::LocalConstant, 3, Some(2), 4).unwrap_err();
        assert!(matches!(
            err.kind(),
            FormatErrorKind::InconsistentRange {
                table: TableType::LocalConstant,
                start: 3,
                end: 2
            }
        ));

        // starts past the end of the table
        assert!(owned_rows(TableType::LocalVariable, 7, None, 4).is_err());

        let err = owned_rows(TableType::LocalVariable, 0, Some(2), 4).unwrap_err();
        assert!(matches!(
            err.kind(),
            FormatErrorKind::InvalidRowIndex(TableType::LocalVariable, 0)
        ));
    }

    #[test]
    fn test_resolve_il_offsets() {
        let records = [
            SequencePointRecord::Visible {
                il_delta: 2,
                start_line: 10,
                start_column: 1,
                end_line: 10,
                end_column: 5,
            },
            SequencePointRecord::Hidden { il_delta: 3 },
            SequencePointRecord::Visible {
                il_delta: 4,
                start_line: 11,
                start_column: 1,
                end_line: 12,
                end_column: 2,
            },
        ];
        let points = resolve_sequence_points(1, &records).unwrap();

        let offsets: Vec<_> = points.iter().map(|sp| sp.il_offset).collect();
        assert_eq!(offsets, vec![2, 5, 9]);
        assert!(points[1].is_hidden);
        assert_eq!(points[1].start_line, raw::HIDDEN_LINE);
    }

    #[test]
    fn test_reject_document_change() {
        let records = [
            SequencePointRecord::Hidden { il_delta: 0 },
            SequencePointRecord::DocumentChange { document: 2 },
        ];
        let err = resolve_sequence_points(4, &records).unwrap_err();
        assert!(matches!(err.kind(), FormatErrorKind::CrossDocumentMethod(4)));
    }

    #[test]
    fn test_il_offset_overflow() {
        let records = [
            SequencePointRecord::Hidden { il_delta: 0x1fff_ffff },
            SequencePointRecord::Hidden { il_delta: 1 },
        ];
        let err = resolve_sequence_points(1, &records).unwrap_err();
        assert!(matches!(err.kind(), FormatErrorKind::InvalidSequencePoint));
    }

    #[test]
    fn test_method_token() {
        let method = MethodInfo {
            method_def: 0x2a,
            first_line: None,
            last_line: None,
            sequence_points: vec![SequencePoint::hidden(0)],
            local_scopes: vec![],
        };
        assert_eq!(method.token(), 0x0600_002a);
        assert_eq!(method.visible_sequence_points().count(), 0);
    }
}
