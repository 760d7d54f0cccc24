use std::fs;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};

/// Lower-case hex MD5 of the file at `path`.
pub fn digest(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Lower-case hex MD5 of an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Producers disagree on hex letter case, so digests compare case-insensitively.
pub fn matches(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[test]
    fn digests_files() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty.txt");
        fs::write(&empty, b"").unwrap();
        assert_eq!(digest(&empty).unwrap(), EMPTY_MD5);

        let text = dir.path().join("a.txt");
        fs::write(&text, b"a").unwrap();
        assert_eq!(digest(&text).unwrap(), "0cc175b9c0f1b6a831c399e269772661");
    }

    #[test]
    fn digests_files_larger_than_one_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();
        assert_eq!(digest(&path).unwrap(), digest_bytes(&data));
    }

    #[test]
    fn missing_files_are_io_errors() {
        let dir = TempDir::new().unwrap();
        let err = digest(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn compares_case_insensitively() {
        assert!(matches(EMPTY_MD5, "D41D8CD98F00B204E9800998ECF8427E"));
        assert!(matches(EMPTY_MD5, " d41d8cd98f00b204e9800998ecf8427e\n"));
        assert!(!matches(EMPTY_MD5, "0cc175b9c0f1b6a831c399e269772661"));
        assert!(!matches(EMPTY_MD5, ""));
    }
}
