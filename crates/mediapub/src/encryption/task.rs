use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{error, info};

use super::{AesGcmTransform, EncryptionError, FileTransform, PathLocks};
use crate::config::EncryptionConfig;

/// Replaces the contents of `path` with `transform(contents)`.
///
/// The output goes to a temp file in the same directory, is synced and
/// length-checked, then renamed over the original. Until that rename the
/// original is untouched, and the temp file is removed on every error path.
/// Returns the number of bytes written.
pub fn encrypt_in_place(
    path: &Path,
    transform: &dyn FileTransform,
    locks: &PathLocks,
) -> Result<u64, EncryptionError> {
    let _guard = locks.acquire(path)?;

    let metadata = fs::metadata(path).map_err(EncryptionError::io(path))?;
    if !metadata.is_file() {
        return Err(EncryptionError::NotAFile(path.to_path_buf()));
    }

    let input = fs::read(path).map_err(EncryptionError::io(path))?;
    let output = transform.transform(&input)?;
    let expected = transform.output_len(input.len()) as u64;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".mediapub-enc-")
        .tempfile_in(dir)
        .map_err(EncryptionError::io(dir))?;

    temp.write_all(&output)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(EncryptionError::io(temp.path()))?;

    let actual = temp
        .as_file()
        .metadata()
        .map_err(EncryptionError::io(temp.path()))?
        .len();
    if actual != expected {
        return Err(EncryptionError::LengthMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }

    fs::set_permissions(temp.path(), metadata.permissions())
        .map_err(EncryptionError::io(temp.path()))?;

    temp.persist(path)
        .map_err(|e| EncryptionError::Io {
            path: path.to_path_buf(),
            source: e.error,
        })?;

    // Make the rename durable where the platform allows syncing a directory.
    if let Ok(dir) = fs::File::open(dir) {
        let _ = dir.sync_all();
    }

    Ok(actual)
}

/// Runs in-place encryption of single files, in the caller's thread or on a
/// background thread.
#[derive(Clone)]
pub struct EncryptionService {
    transform: Arc<dyn FileTransform>,
    locks: PathLocks,
}

impl EncryptionService {
    pub fn new(transform: Arc<dyn FileTransform>) -> Self {
        Self {
            transform,
            locks: PathLocks::new(),
        }
    }

    /// AES-GCM service keyed from the configured environment variable.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self, EncryptionError> {
        let transform = AesGcmTransform::from_env(&config.key_env_var)?;
        Ok(Self::new(Arc::new(transform)))
    }

    pub fn encrypt(&self, path: &Path) -> Result<u64, EncryptionError> {
        info!(path = %path.display(), "encryption started");
        let started = Instant::now();

        match encrypt_in_place(path, self.transform.as_ref(), &self.locks) {
            Ok(bytes) => {
                info!(
                    path = %path.display(),
                    bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "encryption finished"
                );
                Ok(bytes)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "encryption failed");
                Err(e)
            }
        }
    }

    /// Encrypts `path` on a new thread.
    pub fn spawn(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<JoinHandle<Result<u64, EncryptionError>>, EncryptionError> {
        let path = path.into();
        let service = self.clone();
        let thread_path = path.clone();

        thread::Builder::new()
            .name("mediapub-encrypt".to_string())
            .spawn(move || service.encrypt(&thread_path))
            .map_err(|source| EncryptionError::Io { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    struct FailingTransform;

    impl FileTransform for FailingTransform {
        fn transform(&self, _input: &[u8]) -> Result<Vec<u8>, EncryptionError> {
            Err(EncryptionError::Transform("cipher unavailable".to_string()))
        }

        fn output_len(&self, input_len: usize) -> usize {
            input_len
        }
    }

    /// Produces fewer bytes than it promises.
    struct ShortTransform;

    impl FileTransform for ShortTransform {
        fn transform(&self, input: &[u8]) -> Result<Vec<u8>, EncryptionError> {
            Ok(input[..input.len() / 2].to_vec())
        }

        fn output_len(&self, input_len: usize) -> usize {
            input_len
        }
    }

    fn write_render(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("out.mp4");
        fs::write(&path, b"rendered video bytes").unwrap();
        path
    }

    fn dir_entries(dir: &TempDir) -> usize {
        fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_encrypts_in_place() {
        let dir = TempDir::new().unwrap();
        let path = write_render(&dir);
        let transform = AesGcmTransform::from_hex_key(TEST_KEY).unwrap();

        let written = encrypt_in_place(&path, &transform, &PathLocks::new()).unwrap();

        let encrypted = fs::read(&path).unwrap();
        assert_eq!(written, encrypted.len() as u64);
        assert_eq!(transform.decrypt(&encrypted).unwrap(), b"rendered video bytes");
        assert_eq!(dir_entries(&dir), 1);
    }

    #[test]
    fn test_failed_transform_leaves_original_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_render(&dir);

        let err = encrypt_in_place(&path, &FailingTransform, &PathLocks::new()).unwrap_err();

        assert!(matches!(err, EncryptionError::Transform(_)));
        assert_eq!(fs::read(&path).unwrap(), b"rendered video bytes");
        assert_eq!(dir_entries(&dir), 1);
    }

    #[test]
    fn test_length_mismatch_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = write_render(&dir);
        let locks = PathLocks::new();

        let err = encrypt_in_place(&path, &ShortTransform, &locks).unwrap_err();

        assert!(matches!(err, EncryptionError::LengthMismatch { .. }));
        assert_eq!(fs::read(&path).unwrap(), b"rendered video bytes");
        assert_eq!(dir_entries(&dir), 1);
        assert!(!locks.is_locked(&path));
    }

    #[test]
    fn test_missing_file_and_directory() {
        let dir = TempDir::new().unwrap();
        let transform = AesGcmTransform::from_hex_key(TEST_KEY).unwrap();
        let locks = PathLocks::new();

        assert!(matches!(
            encrypt_in_place(&dir.path().join("missing.mp4"), &transform, &locks),
            Err(EncryptionError::Io { .. })
        ));
        assert!(matches!(
            encrypt_in_place(dir.path(), &transform, &locks),
            Err(EncryptionError::NotAFile(_))
        ));
    }

    #[test]
    fn test_service_spawn() {
        let dir = TempDir::new().unwrap();
        let path = write_render(&dir);
        let transform = Arc::new(AesGcmTransform::from_hex_key(TEST_KEY).unwrap());
        let service = EncryptionService::new(transform.clone());

        let handle = service.spawn(&path).unwrap();
        handle.join().unwrap().unwrap();

        let encrypted = fs::read(&path).unwrap();
        assert_eq!(transform.decrypt(&encrypted).unwrap(), b"rendered video bytes");
    }
}
