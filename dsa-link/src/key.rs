//! The link's `.key` identity file: a stable per-install UUID used to
//! derive the link's handshake identity, read on startup or generated once
//! if absent.

use std::fs;
use std::path::Path;

use dsa_error::{Error, ErrorKind};
use uuid::Uuid;

/// Reads `path` and parses its contents as a UUID, generating and
/// persisting a fresh v4 UUID the first time the link starts.
pub fn load_or_create(path: &Path) -> Result<Uuid, Error> {
    match fs::read_to_string(path) {
        Ok(contents) => Uuid::parse_str(contents.trim())
            .map_err(|e| Error::with_detail(ErrorKind::InternalError, e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let id = Uuid::new_v4();
            fs::write(path, id.to_string())
                .map_err(|e| Error::with_detail(ErrorKind::InternalError, e.to_string()))?;
            Ok(id)
        }
        Err(e) => Err(Error::with_detail(ErrorKind::InternalError, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_file_generates_and_persists_one() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".key");
        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();
        assert_eq!(first, second, "a second load must reuse the persisted key");
    }

    #[test]
    fn malformed_key_file_reports_internal_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".key");
        fs::write(&path, "not-a-uuid").unwrap();
        let err = load_or_create(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InternalError);
    }
}
