//! VFS configuration
//!
//! Configuration can be built in code, loaded from a TOML document, or left at
//! its defaults. All values are validated before a [`crate::Vfs`] is created.
//!
//! ```
//! use hostvfs::VfsConfig;
//!
//! let config = VfsConfig::from_toml_str(r#"
//!     name = "edge"
//!     max_pathname = 512
//!     make_default = false
//! "#).unwrap();
//!
//! assert_eq!(config.name, "edge");
//! assert_eq!(config.create_mode, 0o600);
//! ```

use crate::error::{Result, VfsError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// Default registered VFS name
pub const DEFAULT_VFS_NAME: &str = "hostvfs";

/// Permission bits applied to every file the backend creates
pub const DEFAULT_CREATE_MODE: u32 = 0o600;

/// Name of the thread servicing host I/O
pub const DEFAULT_IO_THREAD_NAME: &str = "hostvfs-io";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VfsConfig {
    /// Name the engine selects the VFS by (e.g. `file:app.db?vfs=hostvfs`)
    #[validate(length(min = 1, max = 64))]
    pub name: String,

    /// Maximum full pathname length; `None` asks the backend
    #[validate(range(min = 64, max = 65536))]
    pub max_pathname: Option<usize>,

    /// Permission bits for newly created files (at most 0o777)
    #[validate(range(max = 511))]
    pub create_mode: u32,

    /// Register as the engine's default VFS
    pub make_default: bool,

    /// Thread name for the host I/O servicing thread
    #[validate(length(min = 1))]
    pub io_thread_name: String,
}

impl Default for VfsConfig {
    fn default() -> Self {
        VfsConfig {
            name: DEFAULT_VFS_NAME.to_string(),
            max_pathname: None,
            create_mode: DEFAULT_CREATE_MODE,
            make_default: false,
            io_thread_name: DEFAULT_IO_THREAD_NAME.to_string(),
        }
    }
}

impl VfsConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: VfsConfig = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            VfsError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate all fields
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.name.contains('\0') {
            return Err(VfsError::Config("name must not contain NUL".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VfsConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.name, "hostvfs");
        assert_eq!(config.create_mode, 0o600);
        assert!(config.max_pathname.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = VfsConfig::from_toml_str("max_pathname = 256").unwrap();
        assert_eq!(config.max_pathname, Some(256));
        assert_eq!(config.name, DEFAULT_VFS_NAME);
        assert_eq!(config.io_thread_name, DEFAULT_IO_THREAD_NAME);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(VfsConfig::from_toml_str("name = \"\"").is_err());
        assert!(VfsConfig::from_toml_str("max_pathname = 8").is_err());
        assert!(VfsConfig::from_toml_str("create_mode = 4096").is_err());
        assert!(VfsConfig::from_toml_str("name = 3").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfs.toml");
        std::fs::write(&path, "name = \"disk\"\nmake_default = true\n").unwrap();

        let config = VfsConfig::load(&path).unwrap();
        assert_eq!(config.name, "disk");
        assert!(config.make_default);

        assert!(VfsConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
