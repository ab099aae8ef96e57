//! SHA-256 helpers for stored results files

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hex digest of an in-memory buffer
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex digest of a file, streamed in 8 KiB chunks
pub fn file_sha256(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    reader_sha256(&mut file)
}

/// Hex digest of any readable source
pub fn reader_sha256<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_buffer_and_reader_agree() {
        let mut cursor = Cursor::new(b"hello world");
        assert_eq!(sha256_hex(b"hello world"), HELLO_WORLD);
        assert_eq!(reader_sha256(&mut cursor).unwrap(), HELLO_WORLD);
    }

    #[test]
    fn test_file_digest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        assert_eq!(file_sha256(file.path()).unwrap(), HELLO_WORLD);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = file_sha256("/definitely/not/here.lef").unwrap_err();
        assert!(matches!(err, crate::SwimError::Io(_)));
    }
}
