use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const DB_ENV_VAR: &str = "FOOD_DIARY_DB";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Resolve the data directory and database path.
    ///
    /// The database path comes from `db_override` (the `--db` flag), then the
    /// `FOOD_DIARY_DB` variable, then `food-diary.db` in the data directory.
    pub fn load(db_override: Option<PathBuf>) -> Result<Self> {
        let proj_dirs = ProjectDirs::from("", "", "food-diary")
            .context("Could not determine home directory")?;
        let data_dir = proj_dirs.data_dir().to_path_buf();

        let db_path = db_override
            .or_else(|| std::env::var_os(DB_ENV_VAR).map(PathBuf::from))
            .unwrap_or_else(|| data_dir.join("food-diary.db"));

        Self::at(data_dir, db_path)
    }

    /// Config rooted at an explicit directory.
    pub fn at(data_dir: PathBuf, db_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(Config { db_path, data_dir })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)`.
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let key = generate_api_key();
        write_private(&path, &key)?;
        eprintln!("Generated new API key: {key}");
        eprintln!("Include in requests: Authorization: Bearer {key}");
        Ok((key, true))
    }
}

/// 32 random bytes, hex encoded.
fn generate_api_key() -> String {
    use rand::Rng;
    use std::fmt::Write;

    let bytes: [u8; 32] = rand::rng().random();
    bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}

fn write_private(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).context("Failed to write API key file")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to set API key file permissions")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path().to_path_buf(), dir.path().join("diary.db")).unwrap();

        let (key, created) = config.load_or_create_api_key().unwrap();
        assert!(created);
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));

        let (again, created) = config.load_or_create_api_key().unwrap();
        assert!(!created);
        assert_eq!(again, key);
    }

    #[cfg(unix)]
    #[test]
    fn test_api_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let config = Config::at(dir.path().to_path_buf(), dir.path().join("diary.db")).unwrap();
        config.load_or_create_api_key().unwrap();

        let mode = std::fs::metadata(dir.path().join("api_key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_db_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("custom.db");
        let config = Config::load(Some(db.clone())).unwrap();
        assert_eq!(config.db_path, db);
        assert!(dir.path().join("nested").is_dir());
    }
}
