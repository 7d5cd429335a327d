//! Simulated inferior-process address space.
//!
//! Formatter modules never see the debuggee directly; they call the host's
//! memory-read import, which is serviced by an [`InferiorMemory`]. In this
//! harness the inferior is a canned [`FixtureMemory`].

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Source of bytes for the sandbox's memory-read callback.
pub trait InferiorMemory {
    /// Fill `dest` with the bytes at `offset`. Must write all of `dest`.
    fn read(&self, offset: u32, dest: &mut [u8]);
}

impl<F> InferiorMemory for F
where
    F: Fn(u32, &mut [u8]),
{
    fn read(&self, offset: u32, dest: &mut [u8]) {
        self(offset, dest)
    }
}

/// One serviced read, as issued by the sandboxed module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReadRequest {
    /// Offset in the inferior address space
    pub offset: u32,
    /// Number of bytes requested
    pub size: u32,
    /// Destination offset in sandbox memory
    pub destination: u32,
}

/// How bytes outside every mapped region are produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fill {
    /// All zero
    #[default]
    Zero,
    /// First byte of each reply is `offset % 256`, the rest zero
    OffsetLowByte,
    /// Reply is the pattern repeated from its start
    Repeat {
        /// Byte pattern
        bytes: Vec<u8>,
    },
}

/// Contents of a mapped region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegionData {
    /// Raw bytes
    Bytes {
        /// Region contents
        bytes: Vec<u8>,
    },
    /// Single-byte characters
    Text {
        /// Region contents
        text: String,
    },
}

/// A run of known bytes at a fixed inferior address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Start address
    pub offset: u32,
    /// Contents
    #[serde(flatten)]
    pub data: RegionData,
}

impl Region {
    fn bytes(&self) -> &[u8] {
        match &self.data {
            RegionData::Bytes { bytes } => bytes,
            RegionData::Text { text } => text.as_bytes(),
        }
    }

    fn byte_at(&self, address: u64) -> Option<u8> {
        let start = u64::from(self.offset);
        let index = usize::try_from(address.checked_sub(start)?).ok()?;
        self.bytes().get(index).copied()
    }
}

/// Canned inferior memory: a fill policy with mapped regions laid over it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureMemory {
    /// Policy for unmapped bytes
    #[serde(default)]
    pub fill: Fill,
    /// Mapped regions; later regions win on overlap
    #[serde(default)]
    pub regions: Vec<Region>,
}

impl FixtureMemory {
    /// Memory that reads as all zero.
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Memory whose replies start with the low byte of the requested offset.
    pub fn offset_low_byte() -> Self {
        Self {
            fill: Fill::OffsetLowByte,
            ..Default::default()
        }
    }

    /// Memory where every reply is `pattern` repeated.
    pub fn repeating(pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            fill: Fill::Repeat {
                bytes: pattern.into(),
            },
            ..Default::default()
        }
    }

    /// Builder: map raw bytes at `offset`
    pub fn with_bytes(mut self, offset: u32, bytes: impl Into<Vec<u8>>) -> Self {
        self.regions.push(Region {
            offset,
            data: RegionData::Bytes {
                bytes: bytes.into(),
            },
        });
        self
    }

    /// Builder: map text at `offset`
    pub fn with_text(mut self, offset: u32, text: impl Into<String>) -> Self {
        self.regions.push(Region {
            offset,
            data: RegionData::Text { text: text.into() },
        });
        self
    }

    /// Load a fixture from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| HarnessError::Config(format!("bad fixture {}: {}", path.display(), e)))
    }
}

impl InferiorMemory for FixtureMemory {
    fn read(&self, offset: u32, dest: &mut [u8]) {
        match &self.fill {
            Fill::Zero => dest.fill(0),
            Fill::OffsetLowByte => {
                dest.fill(0);
                if let Some(first) = dest.first_mut() {
                    *first = (offset % 256) as u8;
                }
            }
            Fill::Repeat { bytes } if !bytes.is_empty() => {
                for (slot, byte) in dest.iter_mut().zip(bytes.iter().cycle()) {
                    *slot = *byte;
                }
            }
            Fill::Repeat { .. } => dest.fill(0),
        }

        for (i, slot) in dest.iter_mut().enumerate() {
            let address = u64::from(offset) + i as u64;
            if let Some(byte) = self.regions.iter().rev().find_map(|r| r.byte_at(address)) {
                *slot = byte;
            }
        }
    }
}
