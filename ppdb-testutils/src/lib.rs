//! Test helpers for `ppdb-reader`.
//!
//! [`PortablePdbBuilder`] serializes synthetic Portable PDB files, so tests can describe the
//! documents, methods and scopes they need instead of shipping binary fixtures.
//!
//! # Example
//!
//! ```
//! use ppdb_testutils::{PortablePdbBuilder, Point, CSHARP_LANGUAGE};
//!
//! let mut builder = PortablePdbBuilder::new();
//! let document = builder.add_document("foo.cs", CSHARP_LANGUAGE);
//! builder.add_method(document, &[Point::visible(0, 10, 1, 10, 5)]);
//!
//! let buf = builder.build();
//! assert_eq!(&buf[..4], b"BSJB");
//! ```
#![warn(missing_docs)]

use std::collections::HashMap;

use uuid::Uuid;

/// The language GUID of C#.
pub const CSHARP_LANGUAGE: Uuid = uuid::uuid!("3f5162f8-07c6-11d3-9053-00c04fa302a1");
/// The language GUID of Visual Basic.
pub const VISUAL_BASIC_LANGUAGE: Uuid = uuid::uuid!("3a12d0b8-c26c-11d0-b442-00a0244a1dd2");
/// The language GUID of F#.
pub const FSHARP_LANGUAGE: Uuid = uuid::uuid!("ab4f38c9-b6e6-43ba-be3b-58080b2ccce3");
/// The hash algorithm GUID of SHA-1.
pub const SHA1_ALGORITHM: Uuid = uuid::uuid!("ff1816ec-aa5e-4d10-87f7-6f4963833460");
/// The hash algorithm GUID of SHA-256.
pub const SHA256_ALGORITHM: Uuid = uuid::uuid!("8829d00f-11b8-4213-878b-770e8597ac16");

/// Table ids of the Portable PDB tables written by the builder.
pub mod tables {
    /// `MethodDef`, a type-system table.
    pub const METHOD_DEF: u8 = 0x06;
    /// `Document`
    pub const DOCUMENT: u8 = 0x30;
    /// `MethodDebugInformation`
    pub const METHOD_DEBUG_INFORMATION: u8 = 0x31;
    /// `LocalScope`
    pub const LOCAL_SCOPE: u8 = 0x32;
    /// `LocalVariable`
    pub const LOCAL_VARIABLE: u8 = 0x33;
    /// `LocalConstant`
    pub const LOCAL_CONSTANT: u8 = 0x34;
    /// `ImportScope`
    pub const IMPORT_SCOPE: u8 = 0x35;
}

const VERSION: &str = "PDB v1.0";

/// Writes an ECMA-335 compressed unsigned integer.
///
/// # Panics
///
/// Panics if `value` does not fit into 29 bits.
pub fn write_compressed_u32(buf: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        buf.push(value as u8);
    } else if value < 0x4000 {
        buf.extend_from_slice(&(0x8000 | value as u16).to_be_bytes());
    } else {
        assert!(value < 0x2000_0000, "{value} is too large to compress");
        buf.extend_from_slice(&(0xC000_0000 | value).to_be_bytes());
    }
}

/// Writes an ECMA-335 compressed signed integer.
///
/// # Panics
///
/// Panics if `value` does not fit into 29 bits.
pub fn write_compressed_i32(buf: &mut Vec<u8>, value: i32) {
    let sign = u32::from(value < 0);
    let rotated = |bits: u32| (((value as u32) & ((1 << (bits - 1)) - 1)) << 1) | sign;

    if (-(1 << 6)..(1 << 6)).contains(&value) {
        buf.push(rotated(7) as u8);
    } else if (-(1 << 13)..(1 << 13)).contains(&value) {
        buf.extend_from_slice(&(0x8000 | rotated(14) as u16).to_be_bytes());
    } else {
        assert!(
            (-(1 << 28)..(1 << 28)).contains(&value),
            "{value} is too large to compress"
        );
        buf.extend_from_slice(&(0xC000_0000 | rotated(29)).to_be_bytes());
    }
}

/// A record of a sequence points blob, with absolute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Point {
    /// A sequence point with a source range.
    Visible {
        /// The absolute IL offset.
        il_offset: u32,
        /// The first line.
        start_line: u32,
        /// The first column.
        start_column: u32,
        /// The last line.
        end_line: u32,
        /// The column after the last character.
        end_column: u32,
    },
    /// A hidden sequence point.
    Hidden {
        /// The absolute IL offset.
        il_offset: u32,
    },
    /// Switches the following points to another document.
    Document {
        /// The 1-based `Document` row.
        document: u32,
    },
}

impl Point {
    /// Creates a [`Point::Visible`].
    pub fn visible(
        il_offset: u32,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
    ) -> Self {
        Self::Visible {
            il_offset,
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Creates a [`Point::Hidden`].
    pub fn hidden(il_offset: u32) -> Self {
        Self::Hidden { il_offset }
    }
}

/// Encodes a sequence points blob.
///
/// `initial_document` must be given if and only if the method's `MethodDebugInformation.Document`
/// is 0. IL offsets must be strictly increasing after the first point.
pub fn encode_sequence_points(
    local_signature: u32,
    initial_document: Option<u32>,
    points: &[Point],
) -> Vec<u8> {
    let mut buf = Vec::new();
    write_compressed_u32(&mut buf, local_signature);
    if let Some(document) = initial_document {
        write_compressed_u32(&mut buf, document);
    }

    let mut prev_il: Option<u32> = None;
    let mut prev_visible: Option<(u32, u32)> = None;

    for point in points {
        let il_offset = match *point {
            Point::Visible { il_offset, .. } | Point::Hidden { il_offset } => il_offset,
            Point::Document { document } => {
                write_compressed_u32(&mut buf, 0);
                write_compressed_u32(&mut buf, document);
                continue;
            }
        };
        write_compressed_u32(&mut buf, il_offset - prev_il.unwrap_or(0));
        prev_il = Some(il_offset);

        match *point {
            Point::Visible {
                start_line,
                start_column,
                end_line,
                end_column,
                ..
            } => {
                let delta_lines = end_line - start_line;
                let delta_columns = end_column as i32 - start_column as i32;
                write_compressed_u32(&mut buf, delta_lines);
                if delta_lines == 0 {
                    write_compressed_u32(&mut buf, delta_columns as u32);
                } else {
                    write_compressed_i32(&mut buf, delta_columns);
                }

                match prev_visible {
                    Some((prev_line, prev_column)) => {
                        write_compressed_i32(&mut buf, start_line as i32 - prev_line as i32);
                        write_compressed_i32(&mut buf, start_column as i32 - prev_column as i32);
                    }
                    None => {
                        write_compressed_u32(&mut buf, start_line);
                        write_compressed_u32(&mut buf, start_column);
                    }
                }
                prev_visible = Some((start_line, start_column));
            }
            _ => {
                write_compressed_u32(&mut buf, 0);
                write_compressed_u32(&mut buf, 0);
            }
        }
    }

    buf
}

/// A `Document` row, with heap offsets and indices already resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentRow {
    /// Blob offset of the name.
    pub name: u32,
    /// GUID index of the hash algorithm.
    pub hash_algorithm: u32,
    /// Blob offset of the hash.
    pub hash: u32,
    /// GUID index of the language.
    pub language: u32,
}

/// A `LocalScope` row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalScopeRow {
    /// The `MethodDef` row.
    pub method_def: u32,
    /// The `ImportScope` row.
    pub import_scope: u32,
    /// The first owned `LocalVariable` row.
    pub variable_list: u32,
    /// The first owned `LocalConstant` row.
    pub constant_list: u32,
    /// The first IL offset.
    pub start_offset: u32,
    /// The length in IL bytes.
    pub length: u32,
}

/// Serializes synthetic Portable PDB files.
///
/// Rows are appended in the order the `add_*` methods are called and the returned indices are
/// 1-based row indices, heap offsets or GUID indices, matching what the file format stores.
#[derive(Debug, Clone)]
pub struct PortablePdbBuilder {
    strings: Vec<u8>,
    blobs: Vec<u8>,
    guids: Vec<u8>,
    name_components: HashMap<String, u32>,
    pdb_id: [u8; 20],
    entry_point: u32,
    referenced_table_rows: [u32; 64],
    extra_table_rows: Vec<(u8, u32)>,
    omitted_streams: Vec<&'static str>,
    renamed_streams: Vec<(&'static str, &'static str)>,
    wide_heaps: bool,
    documents: Vec<DocumentRow>,
    methods: Vec<(u32, u32)>,
    scopes: Vec<LocalScopeRow>,
    variables: Vec<(u16, u16, u32)>,
    constants: Vec<(u32, u32)>,
}

impl Default for PortablePdbBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PortablePdbBuilder {
    /// Creates a builder for an empty file.
    pub fn new() -> Self {
        let mut pdb_id = [0; 20];
        pdb_id[..16].copy_from_slice(
            &uuid::uuid!("0c1033f7-8b3e-4b5c-9e2a-4f1d8a9b7c61").to_bytes_le(),
        );
        pdb_id[16..].copy_from_slice(&1u32.to_le_bytes());

        Self {
            strings: vec![0],
            blobs: vec![0],
            guids: Vec::new(),
            name_components: HashMap::new(),
            pdb_id,
            entry_point: 0,
            referenced_table_rows: [0; 64],
            extra_table_rows: Vec::new(),
            omitted_streams: Vec::new(),
            renamed_streams: Vec::new(),
            wide_heaps: false,
            documents: Vec::new(),
            methods: Vec::new(),
            scopes: Vec::new(),
            variables: Vec::new(),
            constants: Vec::new(),
        }
    }

    /// Sets the PDB id to the given GUID and stamp.
    pub fn pdb_id(&mut self, guid: Uuid, stamp: u32) -> &mut Self {
        self.pdb_id[..16].copy_from_slice(&guid.to_bytes_le());
        self.pdb_id[16..].copy_from_slice(&stamp.to_le_bytes());
        self
    }

    /// Sets the entry point MethodDef token.
    pub fn entry_point(&mut self, token: u32) -> &mut Self {
        self.entry_point = token;
        self
    }

    /// Records the row count of a type-system table of the PE file in `#Pdb`.
    pub fn referenced_table(&mut self, table: u8, rows: u32) -> &mut Self {
        self.referenced_table_rows[table as usize] = rows;
        self
    }

    /// Declares an additional table in the `#~` header without writing any of its rows.
    pub fn declare_table(&mut self, table: u8, rows: u32) -> &mut Self {
        self.extra_table_rows.push((table, rows));
        self
    }

    /// Leaves out the stream with the given name.
    pub fn omit_stream(&mut self, name: &'static str) -> &mut Self {
        self.omitted_streams.push(name);
        self
    }

    /// Writes the stream `name` under `new_name` instead.
    pub fn rename_stream(&mut self, name: &'static str, new_name: &'static str) -> &mut Self {
        self.renamed_streams.push((name, new_name));
        self
    }

    /// Uses 4-byte indices for all heaps.
    pub fn wide_heaps(&mut self) -> &mut Self {
        self.wide_heaps = true;
        self
    }

    /// Appends a null-terminated string to `#Strings` and returns its offset.
    ///
    /// The bytes are written as given, so tests can store invalid UTF-8.
    pub fn add_string(&mut self, s: impl AsRef<[u8]>) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(s.as_ref());
        self.strings.push(0);
        offset
    }

    /// Appends a blob to `#Blob` and returns its offset.
    pub fn add_blob(&mut self, data: &[u8]) -> u32 {
        let offset = self.blobs.len() as u32;
        write_compressed_u32(&mut self.blobs, data.len() as u32);
        self.blobs.extend_from_slice(data);
        offset
    }

    /// Appends a GUID to `#GUID` and returns its 1-based index.
    pub fn add_guid(&mut self, guid: Uuid) -> u32 {
        self.guids.extend_from_slice(&guid.to_bytes_le());
        (self.guids.len() / 16) as u32
    }

    /// Encodes a document name using `separator` and returns the blob offset.
    ///
    /// Path components are stored once and shared between names. A separator of 0 stores the
    /// whole path as a single component.
    pub fn add_document_name_with_separator(&mut self, path: &str, separator: u8) -> u32 {
        let mut name = vec![separator];
        let parts: Vec<&str> = match separator {
            0 => vec![path],
            _ => path.split(separator as char).collect(),
        };
        for part in parts {
            let index = if part.is_empty() {
                0
            } else if let Some(index) = self.name_components.get(part) {
                *index
            } else {
                let index = self.add_blob(part.as_bytes());
                self.name_components.insert(part.to_owned(), index);
                index
            };
            write_compressed_u32(&mut name, index);
        }
        self.add_blob(&name)
    }

    /// Encodes a document name, separating on `\` for Windows paths and `/` otherwise.
    pub fn add_document_name(&mut self, path: &str) -> u32 {
        let separator = if path.contains('\\') { b'\\' } else { b'/' };
        self.add_document_name_with_separator(path, separator)
    }

    /// Appends a raw `Document` row and returns its index.
    pub fn add_document_row(&mut self, row: DocumentRow) -> u32 {
        self.documents.push(row);
        self.documents.len() as u32
    }

    /// Appends a document without a hash and returns its index.
    pub fn add_document(&mut self, path: &str, language: Uuid) -> u32 {
        let row = DocumentRow {
            name: self.add_document_name(path),
            hash_algorithm: 0,
            hash: 0,
            language: self.add_guid(language),
        };
        self.add_document_row(row)
    }

    /// Appends a document with a checksum and returns its index.
    pub fn add_document_with_hash(
        &mut self,
        path: &str,
        language: Uuid,
        hash_algorithm: Uuid,
        hash: &[u8],
    ) -> u32 {
        let row = DocumentRow {
            name: self.add_document_name(path),
            hash_algorithm: self.add_guid(hash_algorithm),
            hash: self.add_blob(hash),
            language: self.add_guid(language),
        };
        self.add_document_row(row)
    }

    /// Appends a raw `MethodDebugInformation` row and returns its index.
    pub fn add_method_row(&mut self, document: u32, sequence_points: u32) -> u32 {
        self.methods.push((document, sequence_points));
        self.methods.len() as u32
    }

    /// Appends a method of `document` with the given sequence points and returns its index.
    ///
    /// A method without points gets no sequence points blob.
    pub fn add_method(&mut self, document: u32, points: &[Point]) -> u32 {
        let sequence_points = if points.is_empty() {
            0
        } else {
            let blob = encode_sequence_points(0, None, points);
            self.add_blob(&blob)
        };
        self.add_method_row(document, sequence_points)
    }

    /// Appends a `LocalScope` row and returns its index.
    pub fn add_scope_row(&mut self, row: LocalScopeRow) -> u32 {
        self.scopes.push(row);
        self.scopes.len() as u32
    }

    /// Appends a scope owning all variables and constants added after it, up to the next scope.
    pub fn add_scope(&mut self, method_def: u32, start_offset: u32, length: u32) -> u32 {
        let row = LocalScopeRow {
            method_def,
            import_scope: 0,
            variable_list: self.variables.len() as u32 + 1,
            constant_list: self.constants.len() as u32 + 1,
            start_offset,
            length,
        };
        self.add_scope_row(row)
    }

    /// Appends a `LocalVariable` row and returns its index.
    pub fn add_local_variable(
        &mut self,
        name: impl AsRef<[u8]>,
        slot: u16,
        attributes: u16,
    ) -> u32 {
        let name = self.add_string(name);
        self.variables.push((attributes, slot, name));
        self.variables.len() as u32
    }

    /// Appends a `LocalConstant` row of type `int` and returns its index.
    pub fn add_local_constant(&mut self, name: &str) -> u32 {
        let name = self.add_string(name);
        // FIELD int32
        let signature = self.add_blob(&[0x06, 0x08]);
        self.constants.push((name, signature));
        self.constants.len() as u32
    }

    /// Serializes the file.
    pub fn build(&self) -> Vec<u8> {
        let streams = [
            ("#Pdb", self.write_pdb_stream()),
            ("#~", self.write_tables_stream()),
            ("#Strings", self.strings.clone()),
            ("#US", vec![0]),
            ("#GUID", self.guids.clone()),
            ("#Blob", self.blobs.clone()),
        ];
        let streams: Vec<(&str, Vec<u8>)> = streams
            .into_iter()
            .filter(|(name, _)| !self.omitted_streams.contains(name))
            .map(|(name, mut data)| {
                pad(&mut data);
                let name = self
                    .renamed_streams
                    .iter()
                    .find(|(old, _)| *old == name)
                    .map_or(name, |(_, new)| *new);
                (name, data)
            })
            .collect();

        let mut version = VERSION.as_bytes().to_vec();
        version.push(0);
        pad(&mut version);

        let directory_len: usize = streams
            .iter()
            .map(|(name, _)| 8 + padded_len(name.len() + 1))
            .sum();
        let header_len = 16 + version.len() + 4 + directory_len;

        let mut buf = Vec::new();
        buf.extend_from_slice(b"BSJB");
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(version.len() as u32).to_le_bytes());
        buf.extend_from_slice(&version);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&(streams.len() as u16).to_le_bytes());

        let mut offset = header_len;
        for (name, data) in &streams {
            buf.extend_from_slice(&(offset as u32).to_le_bytes());
            buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
            let mut name = name.as_bytes().to_vec();
            name.push(0);
            pad(&mut name);
            buf.extend_from_slice(&name);
            offset += data.len();
        }
        debug_assert_eq!(buf.len(), header_len);

        for (_, data) in &streams {
            buf.extend_from_slice(data);
        }
        buf
    }

    fn write_pdb_stream(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.pdb_id);
        buf.extend_from_slice(&self.entry_point.to_le_bytes());

        let mut referenced = 0u64;
        for (table, rows) in self.referenced_table_rows.iter().enumerate() {
            if *rows != 0 {
                referenced |= 1 << table;
            }
        }
        buf.extend_from_slice(&referenced.to_le_bytes());
        for rows in self.referenced_table_rows.iter().filter(|rows| **rows != 0) {
            buf.extend_from_slice(&rows.to_le_bytes());
        }
        buf
    }

    fn write_tables_stream(&self) -> Vec<u8> {
        let mut rows = [0u32; 64];
        rows[tables::DOCUMENT as usize] = self.documents.len() as u32;
        rows[tables::METHOD_DEBUG_INFORMATION as usize] = self.methods.len() as u32;
        rows[tables::LOCAL_SCOPE as usize] = self.scopes.len() as u32;
        rows[tables::LOCAL_VARIABLE as usize] = self.variables.len() as u32;
        rows[tables::LOCAL_CONSTANT as usize] = self.constants.len() as u32;

        let mut valid = 0u64;
        for (table, count) in rows.iter().enumerate() {
            if *count != 0 {
                valid |= 1 << table;
            }
        }
        for (table, count) in &self.extra_table_rows {
            valid |= 1 << table;
            rows[*table as usize] = *count;
        }

        let heap_sizes = if self.wide_heaps { 0x07 } else { 0x00 };
        let heap = |buf: &mut Vec<u8>, value: u32| write_index(buf, value, self.wide_heaps);
        let table_index = |table: u8| {
            std::cmp::max(rows[table as usize], self.referenced_table_rows[table as usize])
                > 0xFFFF
        };

        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[2, 0, heap_sizes, 1]);
        buf.extend_from_slice(&valid.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        for (table, count) in rows.iter().enumerate() {
            if (valid >> table) & 1 != 0 {
                buf.extend_from_slice(&count.to_le_bytes());
            }
        }

        for row in &self.documents {
            heap(&mut buf, row.name);
            heap(&mut buf, row.hash_algorithm);
            heap(&mut buf, row.hash);
            heap(&mut buf, row.language);
        }
        for (document, sequence_points) in &self.methods {
            write_index(&mut buf, *document, table_index(tables::DOCUMENT));
            heap(&mut buf, *sequence_points);
        }
        for row in &self.scopes {
            write_index(&mut buf, row.method_def, table_index(tables::METHOD_DEF));
            write_index(&mut buf, row.import_scope, table_index(tables::IMPORT_SCOPE));
            write_index(&mut buf, row.variable_list, table_index(tables::LOCAL_VARIABLE));
            write_index(&mut buf, row.constant_list, table_index(tables::LOCAL_CONSTANT));
            buf.extend_from_slice(&row.start_offset.to_le_bytes());
            buf.extend_from_slice(&row.length.to_le_bytes());
        }
        for (attributes, slot, name) in &self.variables {
            buf.extend_from_slice(&attributes.to_le_bytes());
            buf.extend_from_slice(&slot.to_le_bytes());
            heap(&mut buf, *name);
        }
        for (name, signature) in &self.constants {
            heap(&mut buf, *name);
            heap(&mut buf, *signature);
        }
        buf
    }
}

fn write_index(buf: &mut Vec<u8>, value: u32, wide: bool) {
    if wide {
        buf.extend_from_slice(&value.to_le_bytes());
    } else {
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn pad(buf: &mut Vec<u8>) {
    buf.resize(padded_len(buf.len()), 0);
}
