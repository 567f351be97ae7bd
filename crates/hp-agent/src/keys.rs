//! SSH credentials for broker authentication

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use russh_keys::key::KeyPair;
use russh_keys::PublicKeyBase64;

use hp_core::config::SshServerConfig;
use hp_core::ConfigError;

/// Comment appended to exported public keys
const KEY_COMMENT: &str = "holepunch";

/// Username plus the private key used to sign the authentication request
#[derive(Clone)]
pub struct Credentials {
    /// Remote account to authenticate as
    pub username: String,
    /// Signing key, shared with every connect attempt
    pub key: Arc<KeyPair>,
}

impl Credentials {
    /// Load credentials from the SSH server configuration
    pub fn load(config: &SshServerConfig) -> Result<Self, ConfigError> {
        let key = load_key(&config.private_key_file_path)?;
        Ok(Self {
            username: config.username.clone(),
            key: Arc::new(key),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("key", &self.key.name())
            .finish()
    }
}

/// Load an unencrypted private key from disk
pub fn load_key(path: &Path) -> Result<KeyPair, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Key {
            path: path.to_path_buf(),
            message: "file does not exist".to_string(),
        });
    }

    russh_keys::load_secret_key(path, None).map_err(|e| ConfigError::Key {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Render the public half of `key` as an `authorized_keys` line
pub fn authorized_key_line(key: &KeyPair) -> Result<String, ConfigError> {
    let public = key.clone_public_key().map_err(|e| ConfigError::Key {
        path: Default::default(),
        message: e.to_string(),
    })?;

    Ok(format!(
        "{} {} {}",
        public.name(),
        public.public_key_base64(),
        KEY_COMMENT
    ))
}
