//! Base64 decoding of embedded module images.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::error::{HarnessError, Result};

/// Standard alphabet; the final group may or may not carry `=` padding, and
/// leftover bits in a padded final group are discarded.
const MODULE_CODEC: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Raw bytes of a compiled sandbox module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImage(Vec<u8>);

impl ModuleImage {
    /// Wrap already-decoded module bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode a base64 module image.
    ///
    /// The input length must be a multiple of 4. Each group yields three bytes
    /// except a final group padded with `=`, which yields one or two.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        decode_base64(encoded).map(Self)
    }

    /// Encode the image with `=` padding.
    pub fn to_base64(&self) -> String {
        MODULE_CODEC.encode(&self.0)
    }

    /// The module bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Size of the image in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decode a base64 string into raw bytes.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    if encoded.len() % 4 != 0 {
        return Err(HarnessError::Encoding(format!(
            "invalid encoding length {} (not a multiple of 4)",
            encoded.len()
        )));
    }
    MODULE_CODEC
        .decode(encoded)
        .map_err(|e| HarnessError::Encoding(e.to_string()))
}
