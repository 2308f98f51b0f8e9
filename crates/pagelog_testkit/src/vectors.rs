//! On-disk format test vectors for PageLog.
//!
//! These vectors pin the byte layout of compressed integers, loggable
//! headers and startup metadata, so that tools reading log files directly
//! can check themselves against the same data.

use serde::{Deserialize, Serialize};

/// A test vector that can be shared with other tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Input, as decimal fields separated by commas.
    pub input: String,
    /// Expected encoding (hex-encoded).
    pub expected_hex: String,
    /// Expected error message (if this should fail).
    pub expected_error: Option<String>,
}

fn vector(id: &str, description: &str, input: &str, expected_hex: &str) -> TestVector {
    TestVector {
        id: id.into(),
        description: description.into(),
        input: input.into(),
        expected_hex: expected_hex.into(),
        expected_error: None,
    }
}

/// Compressed integer vectors. Input: the value.
pub fn varint_vectors() -> Vec<TestVector> {
    vec![
        vector("varint_0", "Zero", "0", "80"),
        vector("varint_1", "One", "1", "81"),
        vector("varint_127", "Largest 1-byte value", "127", "ff"),
        vector("varint_128", "Smallest 2-byte value", "128", "0081"),
        vector("varint_300", "Two groups", "300", "2c82"),
        vector("varint_16383", "Largest 2-byte value", "16383", "7fff"),
        vector("varint_16384", "Smallest 3-byte value", "16384", "000081"),
        vector(
            "varint_u64_max",
            "Largest value",
            "18446744073709551615",
            "7f7f7f7f7f7f7f7f7f81",
        ),
    ]
}

/// Loggable header vectors. Input: type, structure id, data length.
pub fn loggable_header_vectors() -> Vec<TestVector> {
    let mut vectors = vec![
        vector("header_empty", "Type 1, no structure, no data", "1,0,0", "818080"),
        vector("header_small", "Type 5, structure 300, 5 bytes", "5,300,5", "852c8285"),
        vector("header_max_type", "Largest user type", "126,1,1", "fe8181"),
        vector("header_long_data", "Two-byte length", "2,7,1000", "82876887"),
    ];
    vectors.push(TestVector {
        id: "header_null_type".into(),
        description: "The null type is reserved".into(),
        input: "0,0,0".into(),
        expected_hex: String::new(),
        expected_error: Some("reserved".into()),
    });
    vectors.push(TestVector {
        id: "header_hash_type".into(),
        description: "The hash type is reserved".into(),
        input: "127,0,0".into(),
        expected_hex: String::new(),
        expected_error: Some("reserved".into()),
    });
    vectors
}

/// Startup metadata vectors, without the leading 8-byte hash.
///
/// Input: file version, format version, environment format version, root
/// address (-1 for none), page size, file length boundary, closed flag.
pub fn metadata_vectors() -> Vec<TestVector> {
    vec![
        vector(
            "metadata_fresh",
            "Version 1 of a log without a root, not closed",
            "1,2,0,-1,1024,4096,0",
            "01000000000000000200000000000000ffffffffffffffff00040000001000000000000000",
        ),
        vector(
            "metadata_closed",
            "Closed log with a root",
            "7,2,3,4200,65536,8388608,1",
            "07000000000000000200000003000000681000000000000000000100000080000000000001",
        ),
    ]
}

/// Generate all test vectors as JSON.
pub fn all_vectors_json() -> String {
    let vectors = AllTestVectors {
        varint: varint_vectors(),
        loggable_header: loggable_header_vectors(),
        metadata: metadata_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("Failed to serialize vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllTestVectors {
    varint: Vec<TestVector>,
    loggable_header: Vec<TestVector>,
    metadata: Vec<TestVector>,
}

/// Encodes bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes lowercase or uppercase hex.
///
/// # Panics
///
/// Panics on odd length or non-hex characters.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "odd hex length");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("invalid hex"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagelog_core::loggable::encode_header;
    use pagelog_core::metadata::StartupMetadata;
    use pagelog_core::page_hash;
    use pagelog_core::varint::{decode_compressed, encode_compressed};

    fn fields(input: &str) -> Vec<i128> {
        input
            .split(',')
            .map(|f| f.trim().parse().unwrap())
            .collect()
    }

    #[test]
    fn test_varint_vectors() {
        for vector in varint_vectors() {
            let value: u64 = vector.input.parse().unwrap();
            let encoded = encode_compressed(value);
            assert_eq!(hex_encode(&encoded), vector.expected_hex, "Vector {}", vector.id);

            let (decoded, used) = decode_compressed(&encoded).unwrap();
            assert_eq!((decoded, used), (value, encoded.len()), "Vector {}", vector.id);
        }
    }

    #[test]
    fn test_loggable_header_vectors() {
        for vector in loggable_header_vectors() {
            let f = fields(&vector.input);
            let result = encode_header(f[0] as u8, f[1] as u32, f[2] as usize);
            match &vector.expected_error {
                None => assert_eq!(
                    hex_encode(&result.unwrap()),
                    vector.expected_hex,
                    "Vector {}: {}",
                    vector.id,
                    vector.description
                ),
                Some(message) => {
                    let err = result.unwrap_err().to_string();
                    assert!(err.contains(message.as_str()), "Vector {}: {err}", vector.id);
                }
            }
        }
    }

    #[test]
    fn test_metadata_vectors() {
        for vector in metadata_vectors() {
            let f = fields(&vector.input);
            let metadata = StartupMetadata {
                file_version: f[0] as u64,
                format_version: f[1] as u32,
                environment_format_version: f[2] as u32,
                root_address: u64::try_from(f[3]).ok(),
                page_size: f[4] as u32,
                file_length_boundary: f[5] as u64,
                correctly_closed: f[6] == 1,
            };
            let encoded = metadata.encode();
            let (hash, body) = encoded.split_at(8);
            assert_eq!(hex_encode(body), vector.expected_hex, "Vector {}", vector.id);
            assert_eq!(hash, page_hash(body).to_le_bytes().as_slice());
            assert_eq!(StartupMetadata::decode(&encoded), Some(metadata));
        }
    }

    #[test]
    fn test_hex_round_trip() {
        assert_eq!(hex_decode("00ff7f"), vec![0x00, 0xff, 0x7f]);
        assert_eq!(hex_encode(&[0xde, 0xad]), "dead");
    }

    #[test]
    fn test_all_vectors_json() {
        let json = all_vectors_json();
        assert!(json.contains("varint_300"));
        assert!(json.contains("loggable_header"));

        let parsed: AllTestVectors = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.metadata.len(), metadata_vectors().len());
    }
}
