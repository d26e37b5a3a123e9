//! Local projection of the server key pair for the webhook listener

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::error::{CertError, Result};

/// File name of the server certificate inside the cert directory
pub const CERT_FILE: &str = "tls.crt";
/// File name of the server private key inside the cert directory
pub const KEY_FILE: &str = "tls.key";
/// Mode applied to the cert directory when it is created
pub const DIR_MODE: u32 = 0o750;
/// Mode applied to both written files
pub const FILE_MODE: u32 = 0o640;

/// Write `tls.crt` and `tls.key` into `dir`
///
/// Both files are staged next to their destination and only renamed into
/// place once both are fully written. A failure while staging leaves the
/// previous pair untouched, and staged files are removed on any failure.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub async fn write_to_filesystem(dir: &Path, cert_pem: &[u8], key_pem: &[u8]) -> Result<()> {
    ensure_dir(dir).await?;

    let cert_path = dir.join(CERT_FILE);
    let key_path = dir.join(KEY_FILE);
    let cert_staged = stage(&cert_path, cert_pem).await?;
    let key_staged = match stage(&key_path, key_pem).await {
        Ok(staged) => staged,
        Err(e) => {
            discard(&[cert_staged.as_path()]).await;
            return Err(e);
        }
    };

    if let Err(e) = rename(&cert_staged, &cert_path).await {
        discard(&[cert_staged.as_path(), key_staged.as_path()]).await;
        return Err(e);
    }
    if let Err(e) = rename(&key_staged, &key_path).await {
        discard(&[key_staged.as_path()]).await;
        return Err(e);
    }

    info!(dir = %dir.display(), "wrote webhook certs to filesystem");
    Ok(())
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    if tokio::fs::try_exists(dir)
        .await
        .map_err(|e| fs_error("checking", dir, e))?
    {
        return Ok(());
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder
        .create(dir)
        .await
        .map_err(|e| fs_error("creating directory", dir, e))?;
    // The umask may have narrowed it
    set_mode(dir, DIR_MODE).await?;
    debug!(dir = %dir.display(), "created cert directory");
    Ok(())
}

/// Write `contents` to a temporary sibling of `path` with the final mode
///
/// The file is created with [`FILE_MODE`] and narrowed before any byte is
/// written, so key material is never readable beyond the group.
async fn stage(path: &Path, contents: &[u8]) -> Result<PathBuf> {
    let staged = staged_path(path);

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(FILE_MODE);
    let mut file = options
        .open(&staged)
        .await
        .map_err(|e| fs_error("creating", &staged, e))?;

    // A leftover staged file keeps whatever mode it had
    set_mode(&staged, FILE_MODE).await?;

    file.write_all(contents)
        .await
        .map_err(|e| fs_error("writing", &staged, e))?;
    file.sync_all()
        .await
        .map_err(|e| fs_error("syncing", &staged, e))?;
    Ok(staged)
}

/// Best-effort removal of staged files after a failure
async fn discard(staged: &[&Path]) {
    for path in staged {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!(path = %path.display(), error = %e, "failed to remove staged file");
        }
    }
}

async fn rename(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| fs_error("renaming into", to, e))
}

fn staged_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|e| fs_error("setting permissions on", path, e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

fn fs_error(operation: &'static str, path: &Path, source: std::io::Error) -> CertError {
    CertError::Filesystem {
        operation,
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[tokio::test]
    async fn writes_both_files_into_new_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("serving-certs").join("nested");

        write_to_filesystem(&dir, b"cert-bytes", b"key-bytes")
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.join(CERT_FILE)).unwrap(), b"cert-bytes");
        assert_eq!(std::fs::read(dir.join(KEY_FILE)).unwrap(), b"key-bytes");

        // Only the two files remain, no staging leftovers
        let mut names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec![CERT_FILE, KEY_FILE]);

        #[cfg(unix)]
        {
            assert_eq!(mode_of(&root.path().join("serving-certs")), DIR_MODE);
            assert_eq!(mode_of(&dir), DIR_MODE);
            assert_eq!(mode_of(&dir.join(CERT_FILE)), FILE_MODE);
            assert_eq!(mode_of(&dir.join(KEY_FILE)), FILE_MODE);
        }
    }

    #[tokio::test]
    async fn overwrites_previous_files() {
        let dir = tempfile::tempdir().unwrap();

        write_to_filesystem(dir.path(), b"old-cert", b"old-key")
            .await
            .unwrap();
        write_to_filesystem(dir.path(), b"new-cert", b"new-key")
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join(CERT_FILE)).unwrap(), b"new-cert");
        assert_eq!(std::fs::read(dir.path().join(KEY_FILE)).unwrap(), b"new-key");
        #[cfg(unix)]
        assert_eq!(mode_of(&dir.path().join(KEY_FILE)), FILE_MODE);
    }

    #[tokio::test]
    async fn existing_directory_mode_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        #[cfg(unix)]
        let before = mode_of(dir.path());

        write_to_filesystem(dir.path(), b"cert", b"key").await.unwrap();

        #[cfg(unix)]
        assert_eq!(mode_of(dir.path()), before);
    }

    #[tokio::test]
    async fn unwritable_target_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let err = write_to_filesystem(&blocker, b"cert", b"key")
            .await
            .unwrap_err();
        assert!(matches!(err, CertError::Filesystem { .. }));
        assert!(err.to_string().contains("not-a-dir"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn staged_key_is_never_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join(KEY_FILE);

        let staged = stage(&key_path, b"secret").await.unwrap();
        assert_eq!(mode_of(&staged), FILE_MODE);

        // A leftover from an interrupted pass is narrowed too
        std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o666)).unwrap();
        let staged = stage(&key_path, b"secret-2").await.unwrap();
        assert_eq!(mode_of(&staged), FILE_MODE);
        assert_eq!(std::fs::read(&staged).unwrap(), b"secret-2");
    }

    #[tokio::test]
    async fn failed_key_staging_leaves_previous_pair_and_no_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        write_to_filesystem(dir.path(), b"old-cert", b"old-key")
            .await
            .unwrap();

        // A directory where the staged key should go
        std::fs::create_dir(staged_path(&dir.path().join(KEY_FILE))).unwrap();

        let err = write_to_filesystem(dir.path(), b"new-cert", b"new-key")
            .await
            .unwrap_err();
        assert!(matches!(err, CertError::Filesystem { .. }));

        assert_eq!(std::fs::read(dir.path().join(CERT_FILE)).unwrap(), b"old-cert");
        assert_eq!(std::fs::read(dir.path().join(KEY_FILE)).unwrap(), b"old-key");
        assert!(!staged_path(&dir.path().join(CERT_FILE)).exists());
    }

    #[test]
    fn staged_path_is_a_sibling() {
        let staged = staged_path(Path::new("/certs/tls.key"));
        assert_eq!(staged, PathBuf::from("/certs/tls.key.tmp"));
    }
}
