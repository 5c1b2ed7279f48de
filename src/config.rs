//! Configuration management for cipherfs
//!
//! [`MountOptions`] is the raw, caller supplied description of a mount. It
//! is validated once into an immutable [`MountConfig`] that every channel of
//! the mount shares. [`Config`] is the on-disk form used by the command line
//! front end.

use crate::crypto::{CipherConfig, CipherSpec, Mode, SecretKey, DEFAULT_KEY_SIZE};
use crate::error::{Error, Result};
use crate::fs::normalize_path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;
use url::Url;

/// Default URI scheme of a mount
pub const DEFAULT_SCHEME: &str = "enc";

/// Default cipher family
pub const DEFAULT_ALGORITHM: &str = "AES";

/// Default block cipher mode
pub const DEFAULT_MODE: &str = "CTR";

/// Default padding
pub const DEFAULT_PADDING: &str = "NoPadding";

/// Environment variable overriding the key (hex)
pub const ENV_KEY: &str = "CIPHERFS_KEY";

/// Environment variable overriding the root
pub const ENV_ROOT: &str = "CIPHERFS_ROOT";

/// Environment variable overriding the mode (`true` for reverse)
pub const ENV_REVERSE: &str = "CIPHERFS_REVERSE";

/// Environment variable overriding the scratch directory
pub const ENV_SCRATCH_DIR: &str = "CIPHERFS_SCRATCH_DIR";

/// Options describing one mount
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountOptions {
    /// Cipher family, e.g. `AES`
    pub algorithm: Option<String>,

    /// Block cipher mode, e.g. `CTR`
    pub mode: Option<String>,

    /// Padding scheme, e.g. `NoPadding`
    pub padding: Option<String>,

    /// Symmetric key (hex in serialized form)
    #[serde(default, with = "hex_key", skip_serializing_if = "Option::is_none")]
    pub key: Option<SecretKey>,

    /// Anchor for relative-name computation (`file:` URI or plain path)
    pub root_uri: Option<String>,

    /// Persist plaintext and expose ciphertext
    #[serde(default)]
    pub reverse: bool,

    /// Where working copies are created (system temp dir if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}

impl MountOptions {
    /// Options for `AES/CTR/NoPadding` with the given key
    pub fn aes_ctr(key: SecretKey) -> Self {
        MountOptions {
            algorithm: Some(DEFAULT_ALGORITHM.to_string()),
            mode: Some(DEFAULT_MODE.to_string()),
            padding: Some(DEFAULT_PADDING.to_string()),
            key: Some(key),
            ..Default::default()
        }
    }

    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        self.root_uri = Some(root.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Build options from a string map
    ///
    /// Recognized keys: `algorithm`, `mode`, `padding`, `key` (raw bytes),
    /// `keyHex`, `rootUri`, `reverse`, `scratchDir`. Unknown keys are ignored.
    pub fn from_map(env: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| env.get(name).cloned();

        let key = match (env.get("keyHex"), env.get("key")) {
            (Some(hex), _) => Some(SecretKey::from_hex(hex)?),
            (None, Some(raw)) => Some(SecretKey::new(raw.as_bytes())),
            (None, None) => None,
        };

        Ok(MountOptions {
            algorithm: get("algorithm"),
            mode: get("mode"),
            padding: get("padding"),
            key,
            root_uri: get("rootUri"),
            reverse: env
                .get("reverse")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            scratch_dir: get("scratchDir").map(PathBuf::from),
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(key) = std::env::var(ENV_KEY) {
            if !key.trim().is_empty() {
                self.key = Some(SecretKey::from_hex(&key)?);
            }
        }

        if let Ok(root) = std::env::var(ENV_ROOT) {
            let root = root.trim().to_string();
            if !root.is_empty() {
                self.root_uri = Some(root);
            }
        }

        if let Ok(reverse) = std::env::var(ENV_REVERSE) {
            self.reverse = reverse.trim().eq_ignore_ascii_case("true");
        }

        if let Ok(dir) = std::env::var(ENV_SCRATCH_DIR) {
            if !dir.trim().is_empty() {
                self.scratch_dir = Some(PathBuf::from(dir.trim()));
            }
        }

        Ok(())
    }

    /// Parse the cipher spec without requiring a key
    pub fn cipher_spec(&self) -> Result<CipherSpec> {
        let algorithm = required(&self.algorithm, "algorithm")?;
        let mode = required(&self.mode, "mode")?;
        let padding = required(&self.padding, "padding")?;
        CipherSpec::from_parts(algorithm, mode, padding)
    }

    /// Validate into an immutable mount configuration
    pub fn build(&self) -> Result<MountConfig> {
        let spec = self.cipher_spec()?;
        let key = self
            .key
            .clone()
            .ok_or_else(|| Error::Setup("Missing mount option 'key'".to_string()))?;
        let cipher = CipherConfig::new(spec, key)?;

        Ok(MountConfig {
            cipher,
            root: resolve_root(self.root_uri.as_deref()),
            mode: Mode::from_reverse(self.reverse),
            scratch_dir: self
                .scratch_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        })
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Setup(format!("Missing mount option '{}'", name))),
    }
}

/// Validated, immutable configuration of one mount
#[derive(Debug, Clone)]
pub struct MountConfig {
    cipher: CipherConfig,
    root: PathBuf,
    mode: Mode,
    scratch_dir: PathBuf,
}

impl MountConfig {
    pub fn cipher(&self) -> &CipherConfig {
        &self.cipher
    }

    /// Normalized absolute root of the mount
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Compute the `/` separated name of `path` relative to the root
    ///
    /// The computation is lexical; the path does not need to exist.
    pub fn relative_name(&self, path: &Path) -> Result<String> {
        let absolute = std::path::absolute(path)?;
        let normalized = normalize_path(&absolute);
        let relative = normalized
            .strip_prefix(&self.root)
            .map_err(|_| Error::OutsideRoot {
                path: normalized.clone(),
                root: self.root.clone(),
            })?;

        // Distinct names must yield distinct IVs.
        let parts = relative
            .components()
            .map(|c| {
                c.as_os_str()
                    .to_str()
                    .ok_or_else(|| Error::InvalidPath {
                        path: normalized.clone(),
                        reason: "not valid UTF-8",
                    })
            })
            .collect::<Result<Vec<&str>>>()?;
        Ok(parts.join("/"))
    }
}

/// Resolve a root URI, falling back to the storage root `/`
///
/// `file:` URIs must name a local path; any other scheme, a remote host or
/// a malformed URI resolves to the storage root. Strings that do not parse
/// as a URI are taken as plain paths.
fn resolve_root(root_uri: Option<&str>) -> PathBuf {
    let storage_root = PathBuf::from("/");
    let uri = match root_uri.map(str::trim) {
        Some(uri) if !uri.is_empty() => uri,
        _ => return storage_root,
    };

    let path = match Url::parse(uri) {
        Ok(url) if url.scheme() == "file" => match url.to_file_path() {
            Ok(path) => path,
            Err(()) => {
                warn!("Root URI {} is not a local path, using storage root", uri);
                return storage_root;
            }
        },
        Ok(_) => {
            warn!("Unresolvable root URI {}, using storage root", uri);
            return storage_root;
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => PathBuf::from(uri),
        Err(e) => {
            warn!("Malformed root URI {} ({}), using storage root", uri, e);
            return storage_root;
        }
    };

    match std::path::absolute(&path) {
        Ok(absolute) => normalize_path(&absolute),
        Err(e) => {
            warn!("Unresolvable root {:?} ({}), using storage root", path, e);
            storage_root
        }
    }
}

/// Argon2 parameters for passphrase-derived keys
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfConfig {
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,

    /// Argon2 parallelism
    pub argon2_parallelism: u32,

    /// Length of the derived key in bytes
    #[serde(default = "default_key_size")]
    pub key_size: usize,

    /// Salt for key derivation (empty when the key is stored directly)
    #[serde(with = "hex_serde")]
    pub salt: Vec<u8>,
}

fn default_key_size() -> usize {
    DEFAULT_KEY_SIZE
}

impl Default for KdfConfig {
    fn default() -> Self {
        KdfConfig {
            argon2_memory_kib: 65536, // 64 MiB
            argon2_iterations: 3,
            argon2_parallelism: 4,
            key_size: DEFAULT_KEY_SIZE,
            salt: Vec::new(),
        }
    }
}

/// On-disk configuration used by the command line front end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// URI scheme of the mount
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Mount options
    pub mount: MountOptions,

    /// Passphrase derivation parameters
    #[serde(default)]
    pub kdf: KdfConfig,
}

fn default_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

impl Config {
    /// A fresh AES/CTR configuration rooted at `root`
    pub fn new(root: impl AsRef<Path>, reverse: bool) -> Self {
        Config {
            scheme: default_scheme(),
            mount: MountOptions {
                algorithm: Some(DEFAULT_ALGORITHM.to_string()),
                mode: Some(DEFAULT_MODE.to_string()),
                padding: Some(DEFAULT_PADDING.to_string()),
                ..Default::default()
            }
            .with_root(root)
            .with_reverse(reverse),
            kdf: KdfConfig::default(),
        }
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.mount.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// True when the key must be derived from a passphrase
    pub fn needs_passphrase(&self) -> bool {
        self.mount.key.is_none() && !self.kdf.salt.is_empty()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.scheme.is_empty()
            || !self
                .scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        {
            return Err(Error::Setup(format!("Invalid scheme '{}'", self.scheme)));
        }

        let spec = self.mount.cipher_spec()?;

        match &self.mount.key {
            Some(key) => spec.check_key(key)?,
            None if self.kdf.salt.is_empty() => {
                return Err(Error::Setup(
                    "Configuration has neither a key nor a passphrase salt".to_string(),
                ));
            }
            None => {}
        }

        Ok(())
    }
}

/// Hex serialization for byte arrays
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Vec::new());
        }
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Hex serialization for optional keys
mod hex_key {
    use crate::crypto::SecretKey;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(key: &Option<SecretKey>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match key {
            Some(key) => serializer.serialize_str(&key.to_hex()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SecretKey>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s {
            Some(s) if !s.is_empty() => SecretKey::from_hex(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
