use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snow::Builder;
use tracing::debug;

use crate::secure::NOISE_PATTERN;

/// Length of an X25519 key in bytes.
pub const KEY_LEN: usize = 32;

/// The local encryption identity: a static X25519 keypair.
///
/// Persisted as a small JSON document (`public` / `secret`, hex-encoded)
/// so identities can be provisioned out of band and inspected with
/// standard tools. Written with mode 0600 on Unix.
#[derive(Clone)]
pub struct Identity {
    public: [u8; KEY_LEN],
    secret: [u8; KEY_LEN],
}

#[derive(Serialize, Deserialize)]
struct IdentityFile {
    public: String,
    secret: String,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Result<Self, IdentityError> {
        let keypair = Builder::new(
            NOISE_PATTERN
                .parse()
                .map_err(IdentityError::Keygen)?,
        )
        .generate_keypair()
        .map_err(IdentityError::Keygen)?;

        Ok(Self {
            public: to_key(&keypair.public)?,
            secret: to_key(&keypair.private)?,
        })
    }

    /// Build an identity from raw key material.
    pub fn from_keys(public: [u8; KEY_LEN], secret: [u8; KEY_LEN]) -> Self {
        Self { public, secret }
    }

    /// Load an identity file.
    ///
    /// Any failure here is a fatal startup condition for a worker: a node
    /// must not begin listening without its identity.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| IdentityError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: IdentityFile =
            serde_json::from_slice(&raw).map_err(|source| IdentityError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let public = decode_key(&file.public, path, "public")?;
        let secret = decode_key(&file.secret, path, "secret")?;

        debug!(?path, "loaded identity");
        Ok(Self { public, secret })
    }

    /// Persist the identity to a file, creating or replacing it.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), IdentityError> {
        let path = path.as_ref();
        let file = IdentityFile {
            public: hex::encode(self.public),
            secret: hex::encode(self.secret),
        };
        let raw = serde_json::to_vec_pretty(&file).map_err(|source| IdentityError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        std::fs::write(path, raw).map_err(|source| IdentityError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // Key material is secret; keep the file owner-only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(
                |source| IdentityError::Io {
                    path: path.to_path_buf(),
                    source,
                },
            )?;
        }

        debug!(?path, "saved identity");
        Ok(())
    }

    /// The public half of the keypair.
    pub fn public_key(&self) -> [u8; KEY_LEN] {
        self.public
    }

    /// The secret half of the keypair.
    pub fn secret_key(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }

    /// Hex rendering of the public key, for display and configuration.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public", &hex::encode(self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Parse a hex-encoded 32-byte key from configuration material.
pub fn parse_key_hex(hex_key: &str) -> Result<[u8; KEY_LEN], IdentityError> {
    let bytes = hex::decode(hex_key).map_err(|_| IdentityError::Malformed {
        path: PathBuf::new(),
        reason: format!("key is not valid hex: '{hex_key}'"),
    })?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::Malformed {
            path: PathBuf::new(),
            reason: format!("key must be {KEY_LEN} bytes, got {}", bytes.len()),
        })
}

fn decode_key(
    hex_key: &str,
    path: &Path,
    field: &str,
) -> Result<[u8; KEY_LEN], IdentityError> {
    let bytes = hex::decode(hex_key).map_err(|_| IdentityError::Malformed {
        path: path.to_path_buf(),
        reason: format!("{field} key is not valid hex"),
    })?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| IdentityError::Malformed {
            path: path.to_path_buf(),
            reason: format!("{field} key must be {KEY_LEN} bytes, got {}", bytes.len()),
        })
}

fn to_key(bytes: &[u8]) -> Result<[u8; KEY_LEN], IdentityError> {
    bytes.try_into().map_err(|_| IdentityError::Malformed {
        path: PathBuf::new(),
        reason: format!("generated key must be {KEY_LEN} bytes, got {}", bytes.len()),
    })
}

/// Errors loading or generating identity material. All of these are
/// fatal at worker startup.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Could not read or write the identity file.
    #[error("identity file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The identity file is not valid JSON.
    #[error("identity file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The identity file parsed but its key material is unusable.
    #[error("identity file {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    Keygen(snow::Error),
}
