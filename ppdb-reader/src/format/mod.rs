pub(crate) mod metadata;
pub(crate) mod raw;
pub(crate) mod sequence_points;
pub(crate) mod streams;

use std::fmt;
use std::path::Path;

use thiserror::Error;

use debugid::DebugId;
use uuid::Uuid;

use crate::byteview::ByteView;
use crate::index::{self, DocumentIndex, MethodInfo};

pub use metadata::{
    DocumentRow, LocalConstantRow, LocalScopeRow, LocalVariableRow, MetadataTableHeader,
    MethodDebugInformationRow, Table, TableRow, TableType,
};
pub use streams::{PdbStream, RootHeader, StreamHeader};

use metadata::MetadataTables;
use streams::Heaps;

/// The kind of a [`FormatError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FormatErrorKind {
    /// A read or seek went past the end of the buffer or the active length limit.
    #[error("{len} bytes at offset {offset} are out of bounds")]
    OutOfBounds {
        /// The offset the read started at.
        offset: usize,
        /// The number of bytes that were requested.
        len: usize,
    },
    /// A compressed integer started with the reserved `111` bit pattern.
    #[error("invalid compressed integer at offset {offset}")]
    InvalidCompressedInteger {
        /// The offset of the integer's first byte.
        offset: usize,
    },
    /// One of the streams needed to read the file does not exist.
    #[error("file does not contain a {0} stream")]
    MissingStream(&'static str),
    /// The metadata root, a stream header or the table stream header is invalid.
    #[error("malformed header")]
    MalformedHeader,
    /// A row index is 0 or beyond the end of its table.
    #[error("row index {1} is out of bounds for table {0:?}")]
    InvalidRowIndex(TableType, usize),
    /// A GUID index is 0 or beyond the end of the GUID heap.
    #[error("invalid guid index {0}")]
    InvalidGuidIndex(u32),
    /// A scope's variable or constant list does not form a valid range.
    #[error("inconsistent row range {start}..{end} in table {table:?}")]
    InconsistentRange {
        /// The table the range refers to.
        table: TableType,
        /// The first row of the range.
        start: usize,
        /// The row after the range.
        end: usize,
    },
    /// The table stream contains rows of a table other than the Portable PDB tables.
    #[error("unsupported table {0:#04x}")]
    UnsupportedTable(u8),
    /// A method's sequence points span more than one document.
    #[error("method {0} spans multiple documents")]
    CrossDocumentMethod(usize),
    /// A sequence point exceeds the limits of the format.
    #[error("invalid sequence point")]
    InvalidSequencePoint,
    /// A string, path component or path separator is not valid UTF-8.
    #[error("invalid string data")]
    InvalidStringData,
    /// An index column has a width other than 2 or 4 bytes.
    #[error("invalid index width {0}")]
    InvalidIndexWidth(usize),
    /// The file could not be read.
    #[error("failed to read file")]
    Io,
}

/// An error encountered while parsing a [`PortablePdbFile`].
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct FormatError {
    pub(crate) kind: FormatErrorKind,
    #[source]
    pub(crate) source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl FormatError {
    /// Creates a new FormatError error from a known kind of error as well as an
    /// arbitrary error payload.
    pub(crate) fn new<E>(kind: FormatErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`FormatErrorKind`] for this error.
    pub fn kind(&self) -> FormatErrorKind {
        self.kind
    }
}

impl From<FormatErrorKind> for FormatError {
    fn from(kind: FormatErrorKind) -> Self {
        Self { kind, source: None }
    }
}

/// A fully parsed Portable PDB file.
///
/// A `PortablePdbFile` only exists once every stream, table and document index of the file has
/// been read successfully. It never changes afterwards and can be shared between threads.
#[derive(Clone)]
pub struct PortablePdbFile<'data> {
    data: ByteView<'data>,
    root_header: RootHeader,
    streams: Vec<StreamHeader>,
    strings_header: StreamHeader,
    blobs_header: StreamHeader,
    guids_header: StreamHeader,
    pdb_stream: PdbStream,
    pdb_id: DebugId,
    tables: MetadataTables,
    document_indices: Vec<DocumentIndex>,
    module_name: Option<String>,
}

impl fmt::Debug for PortablePdbFile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortablePdbFile")
            .field("module_name", &self.module_name)
            .field("root_header", &self.root_header)
            .field("streams", &self.streams)
            .field("pdb_id", &self.pdb_id)
            .field("tables", &self.tables.header)
            .field("documents", &self.document_indices.len())
            .finish()
    }
}

impl<'data> PortablePdbFile<'data> {
    /// Checks whether the provided buffer could potentially be a Portable PDB file,
    /// without fully parsing it.
    pub fn peek(buf: &[u8]) -> bool {
        match buf.get(..4) {
            Some(&[a, b, c, d]) => u32::from_le_bytes([a, b, c, d]) == raw::METADATA_SIGNATURE,
            _ => false,
        }
    }

    /// Parses a Portable PDB file and builds the index of all of its documents.
    ///
    /// Any malformed structure fails the whole parse.
    #[tracing::instrument(level = "trace", name = "PortablePdbFile::parse", skip_all, fields(len = data.len()))]
    pub fn parse(data: ByteView<'data>) -> Result<Self, FormatError> {
        let buf = data.as_slice();

        let (root_header, streams) = tracing::trace_span!("stream_directory")
            .in_scope(|| streams::parse_stream_directory(buf))
            .map_err(|e| {
                tracing::debug!(error = %e, "failed to read stream directory");
                e
            })?;

        let strings_header = streams::require_stream(&streams, raw::STRINGS_STREAM)?;
        let blobs_header = streams::require_stream(&streams, raw::BLOB_STREAM)?;
        let guids_header = streams::require_stream(&streams, raw::GUID_STREAM)?;
        let tables_header = streams::require_stream(&streams, raw::TABLES_STREAM)?;
        let pdb_header = streams::require_stream(&streams, raw::PDB_STREAM)?;

        // The `#Pdb` stream holds the row counts of the type-system tables, which determine
        // the width of some index columns in `#~`.
        let pdb_stream = PdbStream::parse(pdb_header.data(buf)?).map_err(|e| {
            tracing::debug!(error = %e, "failed to read #Pdb stream");
            e
        })?;
        let pdb_id = pdb_stream.debug_id()?;

        let heaps = tracing::trace_span!("heaps")
            .in_scope(|| Heaps::new(buf, &strings_header, &blobs_header, &guids_header))?;

        let tables = tracing::trace_span!("tables")
            .in_scope(|| {
                MetadataTables::parse(
                    tables_header.data(buf)?,
                    &pdb_stream.referenced_table_rows,
                )
            })
            .map_err(|e| {
                tracing::debug!(error = %e, "failed to read metadata tables");
                e
            })?;

        let document_indices = tracing::trace_span!("document_indices")
            .in_scope(|| index::build_document_indices(&heaps, &tables))?;

        Ok(Self {
            data,
            root_header,
            streams,
            strings_header,
            blobs_header,
            guids_header,
            pdb_stream,
            pdb_id,
            tables,
            document_indices,
            module_name: None,
        })
    }

    /// Parses a Portable PDB file from a borrowed buffer.
    pub fn from_slice(buf: &'data [u8]) -> Result<Self, FormatError> {
        Self::parse(ByteView::from_slice(buf))
    }

    /// Parses a Portable PDB file, taking ownership of the buffer.
    pub fn from_vec(buf: Vec<u8>) -> Result<PortablePdbFile<'static>, FormatError> {
        PortablePdbFile::parse(ByteView::from_vec(buf))
    }

    /// Memory maps and parses the Portable PDB file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<PortablePdbFile<'static>, FormatError> {
        let data = ByteView::open(path).map_err(|e| FormatError::new(FormatErrorKind::Io, e))?;
        PortablePdbFile::parse(data)
    }

    /// Associates this file with the name of the module it describes.
    ///
    /// The reader never derives the name from the file itself.
    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = Some(name.into());
        self
    }

    /// The name of the module this file describes, if one was attached.
    pub fn module_name(&self) -> Option<&str> {
        self.module_name.as_deref()
    }

    /// Returns the raw bytes of the file.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The metadata root header.
    pub fn root_header(&self) -> &RootHeader {
        &self.root_header
    }

    /// All stream headers in directory order.
    pub fn streams(&self) -> &[StreamHeader] {
        &self.streams
    }

    /// Looks up a stream header by its exact name.
    pub fn get_stream(&self, name: &str) -> Option<&StreamHeader> {
        streams::find_stream(&self.streams, name)
    }

    /// The file's `#Pdb` stream.
    pub fn pdb_stream(&self) -> &PdbStream {
        &self.pdb_stream
    }

    /// The id that ties this file to the PE file it describes.
    pub fn pdb_id(&self) -> DebugId {
        self.pdb_id
    }

    /// The MethodDef token of the assembly's entry point, if it has one.
    pub fn entry_point(&self) -> Option<u32> {
        match self.pdb_stream.entry_point {
            0 => None,
            token => Some(token),
        }
    }

    fn heaps(&self) -> Result<Heaps<'_>, FormatError> {
        Heaps::new(
            &self.data,
            &self.strings_header,
            &self.blobs_header,
            &self.guids_header,
        )
    }

    /// Reads the string starting at the given offset from this file's string heap.
    pub fn get_string(&self, offset: u32) -> Result<&str, FormatError> {
        self.heaps()?.strings.get_string(offset)
    }

    /// Reads the blob starting at the given offset from this file's blob heap.
    pub fn get_blob(&self, offset: u32) -> Result<&[u8], FormatError> {
        self.heaps()?.blobs.get_blob(offset)
    }

    /// Reads the GUID with the given index from this file's GUID heap.
    ///
    /// Note that the index is 1-based!
    pub fn get_guid(&self, idx: u32) -> Result<Uuid, FormatError> {
        self.heaps()?.guids.get_guid(idx)
    }

    /// Decodes the document name stored in the blob at the given offset.
    pub fn get_document_name(&self, offset: u32) -> Result<String, FormatError> {
        self.heaps()?.get_document_name(offset)
    }

    /// Reads the hash of the `idx`th document.
    ///
    /// Note that the index is 1-based!
    pub fn get_hash(&self, idx: usize) -> Result<&[u8], FormatError> {
        let row = self.tables.documents.row(idx)?;
        self.get_blob(row.hash)
    }

    /// The header of the `#~` stream.
    pub fn metadata_header(&self) -> &MetadataTableHeader {
        &self.tables.header
    }

    /// The `Document` table.
    pub fn document_table(&self) -> &Table<DocumentRow> {
        &self.tables.documents
    }

    /// The `MethodDebugInformation` table.
    pub fn method_debug_information_table(&self) -> &Table<MethodDebugInformationRow> {
        &self.tables.method_debug_information
    }

    /// The `LocalScope` table.
    pub fn local_scope_table(&self) -> &Table<LocalScopeRow> {
        &self.tables.local_scopes
    }

    /// The `LocalVariable` table.
    pub fn local_variable_table(&self) -> &Table<LocalVariableRow> {
        &self.tables.local_variables
    }

    /// The `LocalConstant` table.
    pub fn local_constant_table(&self) -> &Table<LocalConstantRow> {
        &self.tables.local_constants
    }

    /// Returns true if this file contains method debug information.
    pub fn has_debug_info(&self) -> bool {
        !self.tables.method_debug_information.is_empty()
    }

    /// The index of every document, in `Document` table order.
    pub fn document_indices(&self) -> &[DocumentIndex] {
        &self.document_indices
    }

    /// The index of the `idx`th document.
    ///
    /// Note that the index is 1-based!
    pub fn get_document_index(&self, idx: usize) -> Option<&DocumentIndex> {
        self.document_indices.get(idx.checked_sub(1)?)
    }

    /// Finds the debug information of the given `MethodDef` row and the document containing it.
    pub fn find_method(&self, method_def: u32) -> Option<(&DocumentIndex, &MethodInfo)> {
        let row = self
            .tables
            .method_debug_information
            .get(method_def as usize)?;
        let document = self.get_document_index(row.document as usize)?;
        let method = document
            .methods
            .iter()
            .find(|method| method.method_def == method_def)?;
        Some((document, method))
    }

    /// Like [`find_method`](Self::find_method), but takes a MethodDef metadata token.
    pub fn find_method_by_token(&self, token: u32) -> Option<(&DocumentIndex, &MethodInfo)> {
        if token & 0xff00_0000 != raw::METHOD_DEF_TOKEN_TYPE {
            return None;
        }
        self.find_method(token & 0x00ff_ffff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek() {
        assert!(PortablePdbFile::peek(b"BSJB\x01\x00\x01\x00"));
        assert!(!PortablePdbFile::peek(b"BSJ"));
        assert!(!PortablePdbFile::peek(b"MZ\x90\x00"));
    }

    #[test]
    fn test_error_source() {
        let err = FormatError::from(FormatErrorKind::MissingStream("#~"));
        assert_eq!(err.to_string(), "file does not contain a #~ stream");
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_open_missing_file() {
        let err = PortablePdbFile::open("does/not/exist.pdb").unwrap_err();
        assert_eq!(err.kind(), FormatErrorKind::Io);
        assert!(std::error::Error::source(&err).is_some());
    }
}
