//! Well-known GUIDs referenced by `Document` rows.

use std::fmt;

use uuid::Uuid;

const CSHARP_GUID: Uuid = uuid::uuid!("3f5162f8-07c6-11d3-9053-00c04fa302a1");
const VISUAL_BASIC_GUID: Uuid = uuid::uuid!("3a12d0b8-c26c-11d0-b442-00a0244a1dd2");
const FSHARP_GUID: Uuid = uuid::uuid!("ab4f38c9-b6e6-43ba-be3b-58080b2ccce3");

const SHA1_GUID: Uuid = uuid::uuid!("ff1816ec-aa5e-4d10-87f7-6f4963833460");
const SHA256_GUID: Uuid = uuid::uuid!("8829d00f-11b8-4213-878b-770e8597ac16");

/// The source language of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum Language {
    /// C#
    CSharp,
    /// Visual Basic
    VisualBasic,
    /// F#
    FSharp,
    /// A language GUID this reader does not know.
    #[default]
    Unknown,
}

impl Language {
    /// Maps a language GUID to a language.
    pub fn from_guid(guid: Uuid) -> Self {
        match guid {
            CSHARP_GUID => Self::CSharp,
            VISUAL_BASIC_GUID => Self::VisualBasic,
            FSHARP_GUID => Self::FSharp,
            _ => Self::Unknown,
        }
    }

    /// Returns the GUID identifying this language, if it is known.
    pub fn guid(self) -> Option<Uuid> {
        match self {
            Self::CSharp => Some(CSHARP_GUID),
            Self::VisualBasic => Some(VISUAL_BASIC_GUID),
            Self::FSharp => Some(FSHARP_GUID),
            Self::Unknown => None,
        }
    }

    /// Returns the human readable name of the language.
    pub fn name(self) -> &'static str {
        match self {
            Self::CSharp => "C#",
            Self::VisualBasic => "Visual Basic",
            Self::FSharp => "F#",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The algorithm used to compute a document's checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum HashAlgorithm {
    /// SHA-1, 20 bytes.
    Sha1,
    /// SHA-256, 32 bytes.
    Sha256,
    /// No hash, or an algorithm GUID this reader does not know.
    #[default]
    Unknown,
}

impl HashAlgorithm {
    /// Maps a hash algorithm GUID to an algorithm.
    pub fn from_guid(guid: Uuid) -> Self {
        match guid {
            SHA1_GUID => Self::Sha1,
            SHA256_GUID => Self::Sha256,
            _ => Self::Unknown,
        }
    }

    /// Returns the GUID identifying this algorithm, if it is known.
    pub fn guid(self) -> Option<Uuid> {
        match self {
            Self::Sha1 => Some(SHA1_GUID),
            Self::Sha256 => Some(SHA256_GUID),
            Self::Unknown => None,
        }
    }

    /// Returns the human readable name of the algorithm.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_roundtrip() {
        for lang in [Language::CSharp, Language::VisualBasic, Language::FSharp] {
            assert_eq!(Language::from_guid(lang.guid().unwrap()), lang);
        }
        assert_eq!(Language::from_guid(Uuid::nil()), Language::Unknown);
        assert_eq!(Language::CSharp.to_string(), "C#");
    }

    #[test]
    fn test_unknown_hash_algorithm() {
        assert_eq!(HashAlgorithm::from_guid(SHA256_GUID), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::from_guid(CSHARP_GUID).name(), "unknown");
    }
}
