//! Constants of the on-disk ECMA-335 / Portable PDB layout.

/// Signature for physical metadata as specified by ECMA-335 (`"BSJB"`).
pub const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// Name of the stream holding null-terminated UTF-8 strings.
pub const STRINGS_STREAM: &str = "#Strings";
/// Name of the stream holding length-prefixed binary blobs.
pub const BLOB_STREAM: &str = "#Blob";
/// Name of the stream holding 16-byte GUIDs.
pub const GUID_STREAM: &str = "#GUID";
/// Name of the compressed metadata table stream.
pub const TABLES_STREAM: &str = "#~";
/// Name of the Portable PDB stream.
pub const PDB_STREAM: &str = "#Pdb";

/// Stream names are at most 32 bytes, including the null terminator.
pub const MAX_STREAM_NAME_LEN: usize = 32;

/// Size of the PDB id stored at the start of the `#Pdb` stream.
pub const PDB_ID_LEN: usize = 20;

/// Size of a single entry of the `#GUID` heap.
pub const GUID_SIZE: usize = 16;

/// `HeapSizes` bit signalling 4-byte indices into `#Strings`.
pub const HEAP_SIZE_STRINGS: u8 = 0x01;
/// `HeapSizes` bit signalling 4-byte indices into `#GUID`.
pub const HEAP_SIZE_GUID: u8 = 0x02;
/// `HeapSizes` bit signalling 4-byte indices into `#Blob`.
pub const HEAP_SIZE_BLOB: u8 = 0x04;

/// The line number marking a hidden sequence point.
pub const HIDDEN_LINE: u32 = 0xfeefee;

/// Sequence point IL offsets and lines must be below this value.
pub const MAX_SEQUENCE_POINT_VALUE: u32 = 0x2000_0000;
/// Sequence point columns must be below this value.
pub const MAX_SEQUENCE_POINT_COLUMN: u32 = 0x1_0000;

/// `LocalVariableAttributes.DebuggerHidden`.
pub const LOCAL_VARIABLE_DEBUGGER_HIDDEN: u16 = 0x0001;

/// The table id encoded in the top byte of a MethodDef metadata token.
pub const METHOD_DEF_TOKEN_TYPE: u32 = 0x0600_0000;
