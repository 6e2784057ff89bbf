use std::ops::Range;

use debugid::DebugId;
use uuid::Uuid;

use super::raw;
use super::{FormatError, FormatErrorKind};
use crate::cursor::ByteCursor;

/// The metadata root header, as specified in the ECMA-335 spec, II.24.2.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHeader {
    /// The metadata signature, always [`METADATA_SIGNATURE`](raw::METADATA_SIGNATURE).
    pub signature: u32,
    /// Major version, 1 (ignore on read).
    pub major_version: u16,
    /// Minor version, 1 (ignore on read).
    pub minor_version: u16,
    /// The version string, without padding.
    pub version: String,
    /// Reserved, always 0.
    pub flags: u16,
    /// Number of stream headers following the root header.
    pub stream_count: u16,
}

impl RootHeader {
    fn parse(cursor: &mut ByteCursor<'_>) -> Result<Self, FormatError> {
        let signature = cursor.read_u32()?;
        if signature != raw::METADATA_SIGNATURE {
            return Err(FormatErrorKind::MalformedHeader.into());
        }

        let major_version = cursor.read_u16()?;
        let minor_version = cursor.read_u16()?;
        let _reserved = cursor.read_u32()?;

        // The length includes the null terminator and padding to a multiple of 4.
        let version_length = cursor.read_u32()? as usize;
        let version_buf = cursor.read_bytes(version_length)?;
        let version_buf = version_buf.split(|c| *c == 0).next().unwrap_or_default();
        let version = std::str::from_utf8(version_buf)
            .map_err(|e| FormatError::new(FormatErrorKind::MalformedHeader, e))?
            .to_owned();

        let flags = cursor.read_u16()?;
        let stream_count = cursor.read_u16()?;

        Ok(Self {
            signature,
            major_version,
            minor_version,
            version,
            flags,
            stream_count,
        })
    }
}

/// A stream header, as specified in the ECMA-335 spec, II.24.2.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// The stream's name, e.g. `#Strings`.
    pub name: String,
    /// Offset of the stream from the start of the file.
    pub offset: u32,
    /// Size of the stream in bytes.
    pub size: u32,
}

impl StreamHeader {
    fn parse(cursor: &mut ByteCursor<'_>) -> Result<Self, FormatError> {
        let offset = cursor.read_u32()?;
        let size = cursor.read_u32()?;

        let name_buf = cursor.read_null_terminated()?;
        if name_buf.len() >= raw::MAX_STREAM_NAME_LEN {
            return Err(FormatErrorKind::MalformedHeader.into());
        }
        let name = std::str::from_utf8(name_buf)
            .map_err(|e| FormatError::new(FormatErrorKind::MalformedHeader, e))?
            .to_owned();

        // The name is padded with zeros to the next 4-byte boundary.
        let name_len = name_buf.len() + 1;
        match name_len % 4 {
            0 => {}
            r => cursor.skip(4 - r)?,
        }

        Ok(Self { name, offset, size })
    }

    /// Returns the byte range this stream covers in the file.
    pub fn range(&self) -> Range<usize> {
        let start = self.offset as usize;
        start..start.saturating_add(self.size as usize)
    }

    /// Returns this stream's bytes out of the whole file.
    pub(crate) fn data<'data>(&self, buf: &'data [u8]) -> Result<&'data [u8], FormatError> {
        buf.get(self.range()).ok_or_else(|| {
            FormatErrorKind::OutOfBounds {
                offset: self.offset as usize,
                len: self.size as usize,
            }
            .into()
        })
    }
}

/// Reads the root header and the stream directory following it.
///
/// Every stream must lie entirely within `buf`, and stream names must be unique.
pub(crate) fn parse_stream_directory(
    buf: &[u8],
) -> Result<(RootHeader, Vec<StreamHeader>), FormatError> {
    let mut cursor = ByteCursor::new(buf);
    let root_header = RootHeader::parse(&mut cursor)?;

    let mut streams = Vec::with_capacity(root_header.stream_count as usize);
    for _ in 0..root_header.stream_count {
        let stream = StreamHeader::parse(&mut cursor)?;
        stream.data(buf)?;
        if find_stream(&streams, &stream.name).is_some() {
            return Err(FormatErrorKind::MalformedHeader.into());
        }
        streams.push(stream);
    }

    Ok((root_header, streams))
}

/// Finds the stream with the given name.
pub(crate) fn find_stream<'a>(streams: &'a [StreamHeader], name: &str) -> Option<&'a StreamHeader> {
    streams.iter().find(|stream| stream.name == name)
}

/// Like [`find_stream`], but failing with [`FormatErrorKind::MissingStream`].
pub(crate) fn require_stream(
    streams: &[StreamHeader],
    name: &'static str,
) -> Result<StreamHeader, FormatError> {
    find_stream(streams, name)
        .cloned()
        .ok_or_else(|| FormatErrorKind::MissingStream(name).into())
}

/// A view on the "string heap", which contains null-terminated UTF-8 strings.
///
/// See https://github.com/stakx/ecma-335/blob/master/docs/ii.24.2.3-strings-heap.md.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StringHeap<'data> {
    buf: &'data [u8],
}

impl<'data> StringHeap<'data> {
    pub(crate) fn new(buf: &'data [u8]) -> Self {
        Self { buf }
    }

    /// Reads the string starting at byte `offset` up to its null terminator.
    pub(crate) fn get_string(&self, offset: u32) -> Result<&'data str, FormatError> {
        let mut cursor = ByteCursor::new(self.buf);
        cursor.seek(offset as usize)?;
        let bytes = cursor.read_null_terminated()?;
        std::str::from_utf8(bytes)
            .map_err(|e| FormatError::new(FormatErrorKind::InvalidStringData, e))
    }
}

/// A view on the "blob heap", which contains length-prefixed blobs of binary data.
///
/// See https://github.com/stakx/ecma-335/blob/master/docs/ii.24.2.4-us-and-blob-heaps.md.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlobHeap<'data> {
    buf: &'data [u8],
}

impl<'data> BlobHeap<'data> {
    pub(crate) fn new(buf: &'data [u8]) -> Self {
        Self { buf }
    }

    /// Gets the blob starting at byte `offset`.
    ///
    /// The blob length is stored as a compressed unsigned integer in front of the data.
    pub(crate) fn get_blob(&self, offset: u32) -> Result<&'data [u8], FormatError> {
        let mut cursor = ByteCursor::new(self.buf);
        cursor.seek(offset as usize)?;
        let len = cursor.read_compressed_u32()? as usize;
        cursor.with_length_limit(len, |blob| blob.read_bytes(blob.remaining()))
    }
}

/// A view on the "GUID heap", a sequence of 16-byte GUIDs.
///
/// See https://github.com/stakx/ecma-335/blob/master/docs/ii.24.2.5-guid-heap.md.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GuidHeap<'data> {
    buf: &'data [u8],
}

impl<'data> GuidHeap<'data> {
    pub(crate) fn new(buf: &'data [u8]) -> Self {
        Self { buf }
    }

    /// Reads the GUID with the given index.
    ///
    /// Note that the index is 1-based!
    pub(crate) fn get_guid(&self, idx: u32) -> Result<Uuid, FormatError> {
        let src = (idx as usize)
            .checked_sub(1)
            .and_then(|i| i.checked_mul(raw::GUID_SIZE))
            .and_then(|offset| self.buf.get(offset..)?.get(..raw::GUID_SIZE))
            .ok_or(FormatErrorKind::InvalidGuidIndex(idx))?;
        let mut bytes = [0; raw::GUID_SIZE];
        bytes.copy_from_slice(src);
        Ok(Uuid::from_bytes_le(bytes))
    }
}

/// The three heaps needed to resolve table cells, borrowed from one file buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Heaps<'data> {
    pub(crate) strings: StringHeap<'data>,
    pub(crate) blobs: BlobHeap<'data>,
    pub(crate) guids: GuidHeap<'data>,
}

impl<'data> Heaps<'data> {
    pub(crate) fn new(
        buf: &'data [u8],
        strings: &StreamHeader,
        blobs: &StreamHeader,
        guids: &StreamHeader,
    ) -> Result<Self, FormatError> {
        Ok(Self {
            strings: StringHeap::new(strings.data(buf)?),
            blobs: BlobHeap::new(blobs.data(buf)?),
            guids: GuidHeap::new(guids.data(buf)?),
        })
    }

    /// Decodes a document name blob into a path.
    ///
    /// The blob starts with a separator byte followed by a sequence of compressed blob indices,
    /// one per path component. Index 0 stands for an empty component. The components themselves
    /// are separate blobs so they can be shared between documents.
    pub(crate) fn get_document_name(&self, offset: u32) -> Result<String, FormatError> {
        let mut parts = ByteCursor::new(self.blobs.get_blob(offset)?);

        let separator = parts.read_u8()?;
        let separator = match separator {
            0 => "",
            _ => std::str::from_utf8(std::slice::from_ref(&separator))
                .map_err(|e| FormatError::new(FormatErrorKind::InvalidStringData, e))?,
        };

        let mut path = String::new();
        let mut first = true;
        while parts.has_more() {
            let part = parts.read_compressed_u32()?;
            if !first {
                path.push_str(separator);
            }
            first = false;

            if part != 0 {
                let component = self.blobs.get_blob(part)?;
                let component = std::str::from_utf8(component)
                    .map_err(|e| FormatError::new(FormatErrorKind::InvalidStringData, e))?;
                path.push_str(component);
            }
        }

        Ok(path)
    }
}

/// The file's `#Pdb` stream.
///
/// See https://github.com/dotnet/runtime/blob/main/docs/design/specs/PortablePdb-Metadata.md#pdb-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdbStream {
    /// The 20-byte PDB id: a GUID followed by a 4-byte stamp.
    pub id: [u8; raw::PDB_ID_LEN],
    /// The MethodDef token of the entry point, or 0.
    pub entry_point: u32,
    /// Bitmask of the type-system tables referenced by this PDB.
    pub referenced_tables: u64,
    /// Row counts of the referenced type-system tables, indexed by table id.
    pub referenced_table_rows: [u32; 64],
}

impl PdbStream {
    pub(crate) fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        let mut cursor = ByteCursor::new(buf);

        let mut id = [0; raw::PDB_ID_LEN];
        id.copy_from_slice(cursor.read_bytes(raw::PDB_ID_LEN)?);
        let entry_point = cursor.read_u32()?;
        let referenced_tables = cursor.read_u64()?;

        let mut referenced_table_rows = [0; 64];
        for (i, rows) in referenced_table_rows.iter_mut().enumerate() {
            if (referenced_tables >> i) & 1 == 0 {
                continue;
            }
            *rows = cursor.read_u32()?;
        }

        Ok(Self {
            id,
            entry_point,
            referenced_tables,
            referenced_table_rows,
        })
    }

    /// Converts the PDB id into a [`DebugId`] matching the one recorded in the PE file.
    pub fn debug_id(&self) -> Result<DebugId, FormatError> {
        let (guid, stamp) = self.id.split_at(raw::GUID_SIZE);
        let mut age = [0; 4];
        age.copy_from_slice(stamp);
        DebugId::from_guid_age(guid, u32::from_le_bytes(age))
            .map_err(|e| FormatError::new(FormatErrorKind::MalformedHeader, e))
    }
}
