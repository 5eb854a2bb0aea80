//! Vector blob binary format.
//!
//! A blob is a fixed-size header followed by `count × dim` components, stored
//! contiguously in input order. Multi-byte integers and payload elements are
//! little-endian.
//!
//! Header v1 (16 bytes, written by default):
//!   Magic: "VECB" (4 bytes)
//!   Version: u8 (1)
//!   DType: u8 (1=f32, 2=f16)
//!   Pad: 2 bytes (zero)
//!   Dimension: u32
//!   Count: u32
//!
//! Header v0 (13 bytes, legacy):
//!   Magic: "VECB" (4 bytes)
//!   Dimension: u32
//!   Count: u32
//!   Quant: u8 (0=f32, 1=f16; 2 is read as f16 too)
//!
//! Payload:
//!   Count × Dimension × bytes_per_element (4 for f32, 2 for f16).
//!
//! Blobs carry no explicit format tag outside the header, so the reader sniffs
//! bytes 4..8 to tell the layouts apart (see [`sniff_header_version`]). Callers
//! that know the layout out-of-band should use [`decode_as`].

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::fp16;

pub const BLOB_MAGIC: [u8; 4] = *b"VECB";
pub const BLOB_VERSION: u8 = 1;
pub const V1_HEADER_LEN: usize = 16;
pub const LEGACY_HEADER_LEN: usize = 13;

/// Header versions a v1 reader understands.
const SUPPORTED_VERSIONS: RangeInclusive<u8> = 1..=1;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("cannot encode vector blob: {0}")]
    Encoding(String),

    #[error("not a vector blob: bad magic {found:02x?}")]
    BadMagic { found: Vec<u8> },

    #[error("unknown quantization code: {0}")]
    UnknownQuantCode(u8),

    #[error("unsupported blob header version: {0}")]
    UnsupportedVersion(u8),

    #[error("malformed blob header: {0}")]
    MalformedHeader(String),

    #[error("truncated vector blob: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobQuant {
    Fp32,
    Fp16,
}

impl BlobQuant {
    pub fn bytes_per_element(self) -> usize {
        match self {
            BlobQuant::Fp32 => 4,
            BlobQuant::Fp16 => 2,
        }
    }

    /// Quant byte of the v0 header.
    pub fn legacy_code(self) -> u8 {
        match self {
            BlobQuant::Fp32 => 0,
            BlobQuant::Fp16 => 1,
        }
    }

    /// Parse a v0 quant byte. Code 2 is accepted as fp16 because some old
    /// writers emitted the v1 dtype code into the v0 header.
    pub fn from_legacy_code(code: u8) -> Result<Self, BlobError> {
        match code {
            0 => Ok(BlobQuant::Fp32),
            1 => Ok(BlobQuant::Fp16),
            2 => {
                tracing::debug!(code, "legacy blob quant code read as fp16");
                Ok(BlobQuant::Fp16)
            }
            other => Err(BlobError::UnknownQuantCode(other)),
        }
    }

    /// DType byte of the v1 header.
    pub fn dtype_code(self) -> u8 {
        match self {
            BlobQuant::Fp32 => 1,
            BlobQuant::Fp16 => 2,
        }
    }

    pub fn from_dtype_code(code: u8) -> Result<Self, BlobError> {
        match code {
            1 => Ok(BlobQuant::Fp32),
            2 => Ok(BlobQuant::Fp16),
            other => Err(BlobError::UnknownQuantCode(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlobQuant::Fp32 => "fp32",
            BlobQuant::Fp16 => "fp16",
        }
    }
}

impl fmt::Display for BlobQuant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlobQuant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fp32" | "f32" => Ok(BlobQuant::Fp32),
            "fp16" | "f16" => Ok(BlobQuant::Fp16),
            other => Err(format!("unknown quantization: {other} (expected fp32 or fp16)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderVersion {
    #[serde(rename = "v0")]
    Legacy,
    #[serde(rename = "v1")]
    V1,
}

impl HeaderVersion {
    pub fn header_len(self) -> usize {
        match self {
            HeaderVersion::Legacy => LEGACY_HEADER_LEN,
            HeaderVersion::V1 => V1_HEADER_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlobHeader {
    pub version: HeaderVersion,
    pub dim: u32,
    pub count: u32,
    pub quant: BlobQuant,
}

impl BlobHeader {
    pub fn header_len(&self) -> usize {
        self.version.header_len()
    }

    /// Expected payload size, `None` on overflow.
    pub fn payload_len(&self) -> Option<usize> {
        (self.count as usize)
            .checked_mul(self.dim as usize)?
            .checked_mul(self.quant.bytes_per_element())
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&BLOB_MAGIC);
        match self.version {
            HeaderVersion::V1 => {
                buf.push(BLOB_VERSION);
                buf.push(self.quant.dtype_code());
                buf.extend_from_slice(&[0, 0]);
                buf.extend_from_slice(&self.dim.to_le_bytes());
                buf.extend_from_slice(&self.count.to_le_bytes());
            }
            HeaderVersion::Legacy => {
                buf.extend_from_slice(&self.dim.to_le_bytes());
                buf.extend_from_slice(&self.count.to_le_bytes());
                buf.push(self.quant.legacy_code());
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecodedBlob {
    pub header: BlobHeader,
    pub vectors: Vec<Vec<f32>>,
}

/// Encode with the current (v1) header.
pub fn encode<V: AsRef<[f32]>>(vectors: &[V], quant: BlobQuant) -> Result<Vec<u8>, BlobError> {
    encode_with(vectors, quant, HeaderVersion::V1)
}

/// Encode with the legacy 13-byte header.
pub fn encode_legacy<V: AsRef<[f32]>>(
    vectors: &[V],
    quant: BlobQuant,
) -> Result<Vec<u8>, BlobError> {
    encode_with(vectors, quant, HeaderVersion::Legacy)
}

pub fn encode_with<V: AsRef<[f32]>>(
    vectors: &[V],
    quant: BlobQuant,
    version: HeaderVersion,
) -> Result<Vec<u8>, BlobError> {
    let first = vectors
        .first()
        .ok_or_else(|| BlobError::Encoding("no vectors to encode".to_string()))?;
    let dim = first.as_ref().len();
    if dim == 0 {
        return Err(BlobError::Encoding(
            "vectors must have a non-zero dimension".to_string(),
        ));
    }
    for (idx, vector) in vectors.iter().enumerate() {
        let len = vector.as_ref().len();
        if len != dim {
            return Err(BlobError::Encoding(format!(
                "vector {idx} has length {len}, expected {dim}"
            )));
        }
    }

    let header = BlobHeader {
        version,
        dim: u32::try_from(dim)
            .map_err(|_| BlobError::Encoding(format!("dimension {dim} out of range")))?,
        count: u32::try_from(vectors.len()).map_err(|_| {
            BlobError::Encoding(format!("vector count {} out of range", vectors.len()))
        })?,
        quant,
    };
    let payload_len = header
        .payload_len()
        .ok_or_else(|| BlobError::Encoding("payload size overflow".to_string()))?;

    let mut buf = Vec::with_capacity(header.header_len() + payload_len);
    header.write_to(&mut buf);
    match quant {
        BlobQuant::Fp32 => {
            for vector in vectors {
                for value in vector.as_ref() {
                    buf.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        BlobQuant::Fp16 => {
            for vector in vectors {
                for value in vector.as_ref() {
                    buf.extend_from_slice(&fp16::f32_to_half_bits(*value).to_le_bytes());
                }
            }
        }
    }
    Ok(buf)
}

/// Guess the header layout from bytes 4..8.
///
/// A buffer is v1 when it is at least 16 bytes long, byte 4 is a supported
/// version, byte 5 is a known dtype and the two pad bytes are zero. Anything
/// else is read as v0. A v0 blob whose dimension happens to look like
/// `01 01 00 00` or `01 02 00 00` (dims 257 and 513) is misread; manifests can
/// pin the layout with `vectors_format` to avoid this.
pub fn sniff_header_version(bytes: &[u8]) -> HeaderVersion {
    if bytes.len() >= V1_HEADER_LEN
        && SUPPORTED_VERSIONS.contains(&bytes[4])
        && matches!(bytes[5], 1 | 2)
        && bytes[6] == 0
        && bytes[7] == 0
    {
        HeaderVersion::V1
    } else {
        HeaderVersion::Legacy
    }
}

/// Read the header, sniffing the layout.
pub fn read_header(bytes: &[u8]) -> Result<BlobHeader, BlobError> {
    check_magic(bytes)?;
    parse_header(bytes, sniff_header_version(bytes))
}

/// Read the header with a layout known out-of-band.
pub fn read_header_as(bytes: &[u8], version: HeaderVersion) -> Result<BlobHeader, BlobError> {
    check_magic(bytes)?;
    parse_header(bytes, version)
}

pub fn decode(bytes: &[u8]) -> Result<DecodedBlob, BlobError> {
    let header = read_header(bytes)?;
    decode_payload(bytes, header)
}

pub fn decode_as(bytes: &[u8], version: HeaderVersion) -> Result<DecodedBlob, BlobError> {
    let header = read_header_as(bytes, version)?;
    decode_payload(bytes, header)
}

fn check_magic(bytes: &[u8]) -> Result<(), BlobError> {
    match bytes.get(..BLOB_MAGIC.len()) {
        Some(magic) if magic == BLOB_MAGIC => Ok(()),
        _ => Err(BlobError::BadMagic {
            found: bytes.iter().take(BLOB_MAGIC.len()).copied().collect(),
        }),
    }
}

fn parse_header(bytes: &[u8], version: HeaderVersion) -> Result<BlobHeader, BlobError> {
    let header_len = version.header_len();
    if bytes.len() < header_len {
        return Err(BlobError::Truncated {
            expected: header_len,
            actual: bytes.len(),
        });
    }

    let header = match version {
        HeaderVersion::V1 => {
            let version_byte = bytes[4];
            if !SUPPORTED_VERSIONS.contains(&version_byte) {
                return Err(BlobError::UnsupportedVersion(version_byte));
            }
            let quant = BlobQuant::from_dtype_code(bytes[5])?;
            if bytes[6] != 0 || bytes[7] != 0 {
                return Err(BlobError::MalformedHeader(format!(
                    "non-zero pad bytes {:02x} {:02x}",
                    bytes[6], bytes[7]
                )));
            }
            BlobHeader {
                version,
                dim: read_u32_le(bytes, 8),
                count: read_u32_le(bytes, 12),
                quant,
            }
        }
        HeaderVersion::Legacy => BlobHeader {
            version,
            dim: read_u32_le(bytes, 4),
            count: read_u32_le(bytes, 8),
            quant: BlobQuant::from_legacy_code(bytes[12])?,
        },
    };

    if header.dim == 0 {
        return Err(BlobError::MalformedHeader(
            "dimension must be non-zero".to_string(),
        ));
    }
    Ok(header)
}

fn decode_payload(bytes: &[u8], header: BlobHeader) -> Result<DecodedBlob, BlobError> {
    let payload = &bytes[header.header_len()..];
    let expected = header.payload_len().ok_or(BlobError::Truncated {
        expected: usize::MAX,
        actual: payload.len(),
    })?;
    if payload.len() != expected {
        return Err(BlobError::Truncated {
            expected,
            actual: payload.len(),
        });
    }

    let dim = header.dim as usize;
    let row_bytes = dim * header.quant.bytes_per_element();
    let mut vectors = Vec::with_capacity(header.count as usize);
    if row_bytes > 0 {
        // Every row is copied out so the source buffer can be dropped or
        // unmapped once decode returns.
        for row in payload.chunks_exact(row_bytes) {
            let vector = match header.quant {
                BlobQuant::Fp32 => row
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
                BlobQuant::Fp16 => {
                    let bits: Vec<u16> = row
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes([c[0], c[1]]))
                        .collect();
                    fp16::from_half(&bits)
                }
            };
            vectors.push(vector);
        }
    }

    Ok(DecodedBlob { header, vectors })
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
