//! Streaming sha256 over files and readers.

use crate::StoreError;
use cpack_schema::Digest;
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size for hashing and copying model files.
pub const CHUNK_SIZE: usize = 1 << 20;

pub(crate) fn finalize(hasher: Sha256) -> Digest {
    Digest::new(format!("{:x}", hasher.finalize()))
}

/// Hash everything `reader` yields. Returns the digest and the byte count.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<(Digest, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((finalize(hasher), total))
}

/// Digest of a file's contents. Name and location do not matter.
pub fn hash_file(path: &Path) -> Result<Digest, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let (digest, _) = hash_reader(file).map_err(|e| StoreError::io(path, e))?;
    Ok(digest)
}

pub fn hash_bytes(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finalize(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn known_vectors() {
        assert_eq!(hash_bytes(b""), EMPTY_SHA256);
        assert_eq!(hash_bytes(b"abc"), ABC_SHA256);
    }

    #[test]
    fn file_digest_ignores_name_and_location() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.safetensors");
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        let b = dir.path().join("nested").join("other.bin");
        fs::write(&a, b"same bytes").unwrap();
        fs::write(&b, b"same bytes").unwrap();
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn multi_chunk_input_matches_single_shot() {
        let data = vec![0x5Au8; CHUNK_SIZE * 2 + 17];
        let (digest, len) = hash_reader(&data[..]).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(digest, hash_bytes(&data));
    }

    #[test]
    fn missing_file_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.bin");
        let err = hash_file(&missing).unwrap_err();
        assert!(err.to_string().contains("nope.bin"));
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::other("device gone"));
            }
            self.served = true;
            buf[0] = 1;
            Ok(1)
        }
    }

    #[test]
    fn read_failure_yields_no_digest() {
        assert!(hash_reader(FailingReader { served: false }).is_err());
    }
}
