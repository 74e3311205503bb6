//! Signing secret persistence.

use anyhow::{bail, Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretString;
use std::fs;
use std::path::Path;

/// Minimum accepted secret length in bytes. Anything shorter makes HS256
/// brute-forceable and is treated as an operator error.
const MIN_SECRET_LEN: usize = 32;

/// Load the signing secret from `path`, generating one on first run.
///
/// A generated secret is 64 random bytes hex-encoded and written with mode
/// 0600. An existing file that trims to fewer than 32 bytes is refused
/// rather than silently used.
pub fn load_or_generate(path: &Path) -> Result<SecretString> {
    if !path.exists() {
        return generate(path);
    }

    let secret = fs::read_to_string(path)
        .with_context(|| format!("read signing secret from {}", path.display()))?;
    let secret = secret.trim();

    if secret.len() < MIN_SECRET_LEN {
        bail!(
            "signing secret in {} is shorter than {MIN_SECRET_LEN} bytes, refusing to start",
            path.display()
        );
    }

    Ok(SecretString::from(secret.to_string()))
}

fn generate(path: &Path) -> Result<SecretString> {
    let mut bytes = [0u8; 64];
    OsRng.fill_bytes(&mut bytes);
    let secret = hex::encode(bytes);

    fs::write(path, &secret)
        .with_context(|| format!("write generated signing secret to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restrict permissions on {}", path.display()))?;
    }

    tracing::info!(path = %path.display(), "generated new signing secret");

    Ok(SecretString::from(secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn generates_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwt_secret.key");

        let secret = load_or_generate(&path).unwrap();
        assert_eq!(secret.expose_secret().len(), 128);
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn reloads_existing_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwt_secret.key");
        fs::write(&path, "  an-existing-secret-of-sufficient-length  \n").unwrap();

        let secret = load_or_generate(&path).unwrap();
        assert_eq!(
            secret.expose_secret(),
            "an-existing-secret-of-sufficient-length"
        );
    }

    #[test]
    fn rejects_short_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwt_secret.key");
        fs::write(&path, "too-short").unwrap();

        let err = load_or_generate(&path).unwrap_err();
        assert!(err.to_string().contains("shorter than"));
    }
}
