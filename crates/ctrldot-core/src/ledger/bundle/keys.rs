//! Bundle signing keys.
//!
//! On first use with signing enabled an Ed25519 keypair is generated and
//! persisted: the private key at mode 0600, the public key at 0644. Existing
//! keys are never regenerated.

use std::path::Path;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use super::BundleError;
use crate::config::expand_path;

/// Size of the stored private key seed in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of the stored public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a detached signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Loads the signing key from `key_path`, generating and persisting a new
/// keypair when none exists yet.
///
/// # Errors
///
/// Returns an error if the key files cannot be read or written, or if an
/// existing private key has the wrong size.
pub fn load_or_generate(
    key_path: impl AsRef<Path>,
    public_key_path: impl AsRef<Path>,
) -> Result<SigningKey, BundleError> {
    let key_path = expand_path(key_path.as_ref());
    let public_key_path = expand_path(public_key_path.as_ref());

    if key_path.exists() {
        let data = Zeroizing::new(std::fs::read(&key_path)?);
        let seed: &[u8; SECRET_KEY_SIZE] =
            data.as_slice()
                .try_into()
                .map_err(|_| BundleError::InvalidKey {
                    path: key_path.display().to_string(),
                    details: format!("expected {SECRET_KEY_SIZE} bytes, got {}", data.len()),
                })?;
        return Ok(SigningKey::from_bytes(seed));
    }

    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent)?;
        set_mode(parent, 0o700)?;
    }

    let signing_key = SigningKey::generate(&mut OsRng);
    let secret = Zeroizing::new(signing_key.to_bytes());
    write_with_mode(&key_path, secret.as_slice(), 0o600)?;
    write_with_mode(
        &public_key_path,
        signing_key.verifying_key().as_bytes(),
        0o644,
    )?;
    Ok(signing_key)
}

#[cfg(unix)]
fn write_with_mode(path: &Path, data: &[u8], mode: u32) -> Result<(), BundleError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, data: &[u8], _mode: u32) -> Result<(), BundleError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), BundleError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), BundleError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_once_then_reloads_the_same_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("keys/signing");
        let public = dir.path().join("keys/signing.pub");

        let first = load_or_generate(&key, &public).unwrap();
        assert!(key.exists());
        assert!(public.exists());
        assert_eq!(std::fs::read(&public).unwrap().len(), PUBLIC_KEY_SIZE);

        let second = load_or_generate(&key, &public).unwrap();
        assert_eq!(first.to_bytes(), second.to_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn key_files_carry_restrictive_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("signing");
        let public = dir.path().join("signing.pub");
        load_or_generate(&key, &public).unwrap();

        let key_mode = std::fs::metadata(&key).unwrap().permissions().mode();
        assert_eq!(key_mode & 0o777, 0o600);
        let pub_mode = std::fs::metadata(&public).unwrap().permissions().mode();
        assert_eq!(pub_mode & 0o777, 0o644);
    }

    #[test]
    fn truncated_private_key_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("signing");
        let public = dir.path().join("signing.pub");
        std::fs::write(&key, [0u8; 16]).unwrap();

        let err = load_or_generate(&key, &public).unwrap_err();
        assert!(matches!(err, BundleError::InvalidKey { .. }));
    }
}
