//! A reader for Portable PDB files, built to map IL offsets of running .NET methods back to
//! source locations and the local variables in scope.
//!
//! [Portable PDB](https://github.com/dotnet/runtime/blob/main/docs/design/specs/PortablePdb-Metadata.md)
//! is a debugging information file format for Common Language Infrastructure (CLI) languages.
//! It is an extension of the [ECMA-335 format](https://www.ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf).
//!
//! # Functionality
//!
//! * Parse Portable PDB files with [`PortablePdbFile::parse`] or [`PortablePdbFile::open`].
//!   Parsing either produces a complete, immutable file or fails with a [`FormatError`].
//! * Browse the [`DocumentIndex`] of every source document, listing its methods with their
//!   [`SequencePoint`]s and lexical [`Scope`]s.
//! * Access the raw heaps and the Portable PDB metadata tables.
//!
//! ## Example
//! ```
//! use ppdb_reader::PortablePdbFile;
//!
//! fn first_line(buf: &[u8], token: u32) -> Option<u32> {
//!     let pdb = PortablePdbFile::from_slice(buf).ok()?;
//!     let (_document, method) = pdb.find_method_by_token(token)?;
//!     method.first_line
//! }
//! ```
//!
//! # Structure of a Portable PDB file
//! An ECMA-335 file is divided into sections called _streams_. This reader uses
//! * `#~` ("metadata"), comprising tables adhering to various schemas. A Portable PDB only
//!   contains the debugging tables added by the Portable PDB spec. This reader decodes the
//!   `Document`, `MethodDebugInformation`, `LocalScope`, `LocalVariable` and `LocalConstant`
//!   tables.
//! * `#Strings`, comprising null-terminated UTF-8 strings.
//! * `#GUID`, a list of GUIDs.
//! * `#Blob`, comprising blobs of data that don't fit in any of the other streams.
//! * `#Pdb`, holding the PDB id, the entry point and the row counts of the type-system
//!   tables stored in the corresponding PE file.
//!
//! Rows refer to each other by 1-based indices. Index 0 means "no row".

#![warn(missing_docs)]

mod byteview;
mod cursor;
mod format;
mod guids;
mod index;

pub use byteview::ByteView;
pub use cursor::ByteCursor;
pub use format::{
    DocumentRow, FormatError, FormatErrorKind, LocalConstantRow, LocalScopeRow, LocalVariableRow,
    MetadataTableHeader, MethodDebugInformationRow, PdbStream, PortablePdbFile, RootHeader,
    StreamHeader, Table, TableRow, TableType,
};
pub use guids::{HashAlgorithm, Language};
pub use index::{
    DocumentIndex, LocalConstantInfo, LocalVariableInfo, MethodInfo, Scope, SequencePoint,
};

pub use debugid::DebugId;
pub use uuid::Uuid;
