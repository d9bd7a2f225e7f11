//! Local node identity
//!
//! Each node records its module identity in a one-line text file of the
//! form `pm<N>\n`. The file is shared with the engine services, so both
//! format and location are fixed.

use crate::constants::MCS_MODULE_FILE_PATH;
use crate::error::{NodeControlError, Result};
use std::path::Path;

/// Read the module ID from its default location
pub fn read_module_id() -> Result<u32> {
    read_module_id_from(Path::new(MCS_MODULE_FILE_PATH))
}

/// Read a `pm<N>` module-identity file
pub fn read_module_id_from(path: &Path) -> Result<u32> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix("pm").ok_or_else(|| {
        NodeControlError::Config(format!("malformed module file {}: {trimmed:?}", path.display()))
    })?;
    digits.parse::<u32>().map_err(|_| {
        NodeControlError::Config(format!("malformed module id in {}: {trimmed:?}", path.display()))
    })
}

/// Write the module ID to its default location
pub fn set_module_id(module_id: u32) -> Result<()> {
    set_module_id_at(Path::new(MCS_MODULE_FILE_PATH), module_id)
}

/// Write a `pm<N>` module-identity file
pub fn set_module_id_at(path: &Path, module_id: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("pm{module_id}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_id_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("module");

        set_module_id_at(&path, 3).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "pm3\n");
        assert_eq!(read_module_id_from(&path).unwrap(), 3);
    }

    #[test]
    fn test_malformed_module_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("module");

        std::fs::write(&path, "um2\n").unwrap();
        assert!(read_module_id_from(&path).is_err());

        std::fs::write(&path, "pmx\n").unwrap();
        assert!(read_module_id_from(&path).is_err());
    }

    #[test]
    fn test_missing_module_file() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_module_id_from(&tmp.path().join("absent")).is_err());
    }
}
