use std::fmt;

use super::raw;
use super::{FormatError, FormatErrorKind};
use crate::cursor::ByteCursor;

/// The metadata tables this reader knows about.
///
/// `MethodDef` is the only type-system table involved: `LocalScope` rows refer to it, and its
/// row count comes from the `#Pdb` stream.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableType {
    /// Method definitions, stored in the PE file.
    MethodDef = 0x06,
    // portable pdb extension starts here
    /// Source documents.
    Document = 0x30,
    /// Sequence points per method.
    MethodDebugInformation = 0x31,
    /// Lexical scopes of methods.
    LocalScope = 0x32,
    /// Local variables of scopes.
    LocalVariable = 0x33,
    /// Local constants of scopes.
    LocalConstant = 0x34,
    /// Namespace imports.
    ImportScope = 0x35,
    /// Kickoff methods of state machines.
    StateMachineMethod = 0x36,
    /// Language specific debug information.
    CustomDebugInformation = 0x37,
}

impl TableType {
    /// The first table id defined by the Portable PDB extension.
    const FIRST_PDB_TABLE: usize = TableType::Document as usize;
    /// The last table id defined by the Portable PDB extension.
    const LAST_PDB_TABLE: usize = TableType::CustomDebugInformation as usize;
}

/// The header of the `#~` stream.
///
/// See https://github.com/stakx/ecma-335/blob/master/docs/ii.24.2.6-metadata-stream.md.
#[derive(Clone, PartialEq, Eq)]
pub struct MetadataTableHeader {
    /// Major version of the table schema, 2.
    pub major_version: u8,
    /// Minor version of the table schema, 0.
    pub minor_version: u8,
    /// Bit vector selecting 4-byte heap indices.
    pub heap_sizes: u8,
    /// Bit vector of present tables.
    pub valid_tables: u64,
    /// Bit vector of sorted tables.
    pub sorted_tables: u64,
    /// Number of rows for every table id, 0 for absent tables.
    pub rows_per_table: [u32; 64],
}

impl fmt::Debug for MetadataTableHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<(usize, u32)> = self
            .rows_per_table
            .iter()
            .enumerate()
            .filter(|(id, _)| (self.valid_tables >> id) & 1 != 0)
            .map(|(id, rows)| (id, *rows))
            .collect();
        f.debug_struct("MetadataTableHeader")
            .field("major_version", &self.major_version)
            .field("minor_version", &self.minor_version)
            .field("heap_sizes", &self.heap_sizes)
            .field("valid_tables", &format_args!("{:#018x}", self.valid_tables))
            .field("rows", &present)
            .finish()
    }
}

impl MetadataTableHeader {
    fn parse(cursor: &mut ByteCursor<'_>) -> Result<Self, FormatError> {
        let _reserved = cursor.read_u32()?;
        let major_version = cursor.read_u8()?;
        let minor_version = cursor.read_u8()?;
        let heap_sizes = cursor.read_u8()?;
        let _reserved2 = cursor.read_u8()?;
        let valid_tables = cursor.read_u64()?;
        let sorted_tables = cursor.read_u64()?;

        let mut rows_per_table = [0; 64];
        for (i, rows) in rows_per_table.iter_mut().enumerate() {
            if (valid_tables >> i) & 1 == 0 {
                continue;
            }
            *rows = cursor.read_u32()?;
        }

        Ok(Self {
            major_version,
            minor_version,
            heap_sizes,
            valid_tables,
            sorted_tables,
            rows_per_table,
        })
    }

    /// Checks that this stream only has rows in Portable PDB tables.
    ///
    /// Other tables, including ids no table is defined for, may be declared with 0 rows.
    fn validate(&self) -> Result<(), FormatError> {
        let pdb_tables = TableType::FIRST_PDB_TABLE..=TableType::LAST_PDB_TABLE;
        for (id, rows) in self.rows_per_table.iter().enumerate() {
            if *rows != 0 && !pdb_tables.contains(&id) {
                return Err(FormatErrorKind::UnsupportedTable(id as u8).into());
            }
        }
        Ok(())
    }

    /// Returns the number of rows of `table`.
    pub fn rows(&self, table: TableType) -> u32 {
        self.rows_per_table[table as usize]
    }
}

/// The byte widths of the index columns used by the Portable PDB tables.
///
/// Heap index sizes come from the `HeapSizes` bits of the `#~` header, table index sizes from
/// the row count of the target table, which for type-system tables is recorded in `#Pdb`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexSizes {
    string_heap: usize,
    guid_heap: usize,
    blob_heap: usize,
    document_table: usize,
    method_def_table: usize,
    import_scope_table: usize,
    local_variable_table: usize,
    local_constant_table: usize,
}

impl IndexSizes {
    fn new(header: &MetadataTableHeader, referenced_table_rows: &[u32; 64]) -> Self {
        let heap_index_size = |bit: u8| if header.heap_sizes & bit == 0 { 2 } else { 4 };
        let table_index_size = |table: TableType| {
            let rows = std::cmp::max(
                header.rows_per_table[table as usize],
                referenced_table_rows[table as usize],
            );
            if rows > u16::MAX as u32 {
                4
            } else {
                2
            }
        };

        Self {
            string_heap: heap_index_size(raw::HEAP_SIZE_STRINGS),
            guid_heap: heap_index_size(raw::HEAP_SIZE_GUID),
            blob_heap: heap_index_size(raw::HEAP_SIZE_BLOB),
            document_table: table_index_size(TableType::Document),
            method_def_table: table_index_size(TableType::MethodDef),
            import_scope_table: table_index_size(TableType::ImportScope),
            local_variable_table: table_index_size(TableType::LocalVariable),
            local_constant_table: table_index_size(TableType::LocalConstant),
        }
    }
}

/// A row type of one of the metadata tables.
pub trait TableRow {
    /// The table this row type belongs to.
    const TABLE: TableType;
}

/// Deserialization of a single row with the stream's column widths.
pub(crate) trait ReadRow: TableRow + Sized {
    fn read(cursor: &mut ByteCursor<'_>, sizes: &IndexSizes) -> Result<Self, FormatError>;
}

/// A row of the `Document` table (0x30).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentRow {
    /// Blob heap offset of the encoded document name.
    pub name: u32,
    /// GUID heap index of the hash algorithm.
    pub hash_algorithm: u32,
    /// Blob heap offset of the document hash.
    pub hash: u32,
    /// GUID heap index of the source language.
    pub language: u32,
}

impl TableRow for DocumentRow {
    const TABLE: TableType = TableType::Document;
}

impl ReadRow for DocumentRow {
    fn read(cursor: &mut ByteCursor<'_>, sizes: &IndexSizes) -> Result<Self, FormatError> {
        Ok(Self {
            name: cursor.read_index(sizes.blob_heap)?,
            hash_algorithm: cursor.read_index(sizes.guid_heap)?,
            hash: cursor.read_index(sizes.blob_heap)?,
            language: cursor.read_index(sizes.guid_heap)?,
        })
    }
}

/// A row of the `MethodDebugInformation` table (0x31).
///
/// Rows correspond 1:1 to rows of the `MethodDef` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDebugInformationRow {
    /// The document containing the method, 0 if it spans several documents.
    pub document: u32,
    /// Blob heap offset of the sequence points, 0 if there are none.
    pub sequence_points: u32,
}

impl TableRow for MethodDebugInformationRow {
    const TABLE: TableType = TableType::MethodDebugInformation;
}

impl ReadRow for MethodDebugInformationRow {
    fn read(cursor: &mut ByteCursor<'_>, sizes: &IndexSizes) -> Result<Self, FormatError> {
        Ok(Self {
            document: cursor.read_index(sizes.document_table)?,
            sequence_points: cursor.read_index(sizes.blob_heap)?,
        })
    }
}

/// A row of the `LocalScope` table (0x32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalScopeRow {
    /// The `MethodDef` row of the method this scope belongs to.
    pub method_def: u32,
    /// The `ImportScope` row of the scope's imports.
    pub import_scope: u32,
    /// The first `LocalVariable` row owned by this scope.
    pub variable_list: u32,
    /// The first `LocalConstant` row owned by this scope.
    pub constant_list: u32,
    /// The first IL offset of the scope.
    pub start_offset: u32,
    /// The length of the scope in IL bytes.
    pub length: u32,
}

impl TableRow for LocalScopeRow {
    const TABLE: TableType = TableType::LocalScope;
}

impl ReadRow for LocalScopeRow {
    fn read(cursor: &mut ByteCursor<'_>, sizes: &IndexSizes) -> Result<Self, FormatError> {
        Ok(Self {
            method_def: cursor.read_index(sizes.method_def_table)?,
            import_scope: cursor.read_index(sizes.import_scope_table)?,
            variable_list: cursor.read_index(sizes.local_variable_table)?,
            constant_list: cursor.read_index(sizes.local_constant_table)?,
            start_offset: cursor.read_u32()?,
            length: cursor.read_u32()?,
        })
    }
}

/// A row of the `LocalVariable` table (0x33).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableRow {
    /// `LocalVariableAttributes` bit flags.
    pub attributes: u16,
    /// The slot number of the local.
    pub index: u16,
    /// String heap offset of the variable name.
    pub name: u32,
}

impl LocalVariableRow {
    /// Whether the variable is marked `DebuggerHidden`.
    pub fn is_debugger_hidden(&self) -> bool {
        self.attributes & raw::LOCAL_VARIABLE_DEBUGGER_HIDDEN != 0
    }
}

impl TableRow for LocalVariableRow {
    const TABLE: TableType = TableType::LocalVariable;
}

impl ReadRow for LocalVariableRow {
    fn read(cursor: &mut ByteCursor<'_>, sizes: &IndexSizes) -> Result<Self, FormatError> {
        Ok(Self {
            attributes: cursor.read_u16()?,
            index: cursor.read_u16()?,
            name: cursor.read_index(sizes.string_heap)?,
        })
    }
}

/// A row of the `LocalConstant` table (0x34).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalConstantRow {
    /// String heap offset of the constant name.
    pub name: u32,
    /// Blob heap offset of the constant signature.
    pub signature: u32,
}

impl TableRow for LocalConstantRow {
    const TABLE: TableType = TableType::LocalConstant;
}

impl ReadRow for LocalConstantRow {
    fn read(cursor: &mut ByteCursor<'_>, sizes: &IndexSizes) -> Result<Self, FormatError> {
        Ok(Self {
            name: cursor.read_index(sizes.string_heap)?,
            signature: cursor.read_index(sizes.blob_heap)?,
        })
    }
}

/// A fully deserialized metadata table.
///
/// Note that row indices are 1-based! Index 0 never refers to a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table<R> {
    rows: Vec<R>,
}

impl<R: TableRow> Table<R> {
    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the `idx`th row, if any.
    pub fn get(&self, idx: usize) -> Option<&R> {
        self.rows.get(idx.checked_sub(1)?)
    }

    /// Returns the `idx`th row, or [`FormatErrorKind::InvalidRowIndex`].
    pub fn row(&self, idx: usize) -> Result<&R, FormatError> {
        self.get(idx)
            .ok_or_else(|| FormatErrorKind::InvalidRowIndex(R::TABLE, idx).into())
    }

    /// Iterates over `(index, row)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &R)> + '_ {
        self.rows.iter().enumerate().map(|(i, row)| (i + 1, row))
    }
}

/// Reads `rows` consecutive rows of one table.
fn read_table<R: ReadRow>(
    cursor: &mut ByteCursor<'_>,
    rows: u32,
    sizes: &IndexSizes,
) -> Result<Table<R>, FormatError> {
    // Every row is at least 2 bytes wide, don't trust the claimed count for the allocation.
    let capacity = std::cmp::min(rows as usize, cursor.remaining() / 2);
    let mut result = Vec::with_capacity(capacity);
    for _ in 0..rows {
        result.push(R::read(cursor, sizes)?);
    }
    Ok(Table { rows: result })
}

/// The contents of the `#~` stream relevant to debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MetadataTables {
    pub(crate) header: MetadataTableHeader,
    pub(crate) documents: Table<DocumentRow>,
    pub(crate) method_debug_information: Table<MethodDebugInformationRow>,
    pub(crate) local_scopes: Table<LocalScopeRow>,
    pub(crate) local_variables: Table<LocalVariableRow>,
    pub(crate) local_constants: Table<LocalConstantRow>,
}

impl MetadataTables {
    /// Parses the `#~` stream.
    ///
    /// `referenced_table_rows` are the type-system row counts from the `#Pdb` stream.
    pub(crate) fn parse(buf: &[u8], referenced_table_rows: &[u32; 64]) -> Result<Self, FormatError> {
        let mut cursor = ByteCursor::new(buf);
        let header = MetadataTableHeader::parse(&mut cursor)?;
        header.validate()?;

        let sizes = IndexSizes::new(&header, referenced_table_rows);

        // All tables before `Document` are empty, so the `Document` rows come first and the
        // rest follow in table id order.
        let documents = read_table(&mut cursor, header.rows(TableType::Document), &sizes)?;
        let method_debug_information = read_table(
            &mut cursor,
            header.rows(TableType::MethodDebugInformation),
            &sizes,
        )?;
        let local_scopes = read_table(&mut cursor, header.rows(TableType::LocalScope), &sizes)?;
        let local_variables =
            read_table(&mut cursor, header.rows(TableType::LocalVariable), &sizes)?;
        let local_constants =
            read_table(&mut cursor, header.rows(TableType::LocalConstant), &sizes)?;

        Ok(Self {
            header,
            documents,
            method_debug_information,
            local_scopes,
            local_variables,
            local_constants,
        })
    }
}
