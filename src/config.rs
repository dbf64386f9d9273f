//! Runtime settings for the catalog server and object store endpoints.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(default)]
pub struct Settings {
    pub stac_url: String,
    pub auth_path: String,
    pub bucket: String,
    pub region: String,
    pub aws_profile: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            stac_url: "http://localhost:8082".to_string(),
            auth_path: "/auth/token".to_string(),
            bucket: "cog-test".to_string(),
            region: "us-east-1".to_string(),
            aws_profile: None,
        }
    }
}

impl Settings {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Read from the given file if present, otherwise start from defaults.
    /// Environment variables win over both.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::read(p)?,
            None => Self::default(),
        };

        if let Ok(url) = env::var("STAC_URL") {
            settings.stac_url = url;
        }
        if let Ok(bucket) = env::var("STAC_BUCKET") {
            settings.bucket = bucket;
        }
        if let Ok(region) = env::var("STAC_REGION") {
            settings.region = region;
        }
        if let Ok(profile) = env::var("AWS_PROFILE") {
            settings.aws_profile = Some(profile);
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.stac_url, "http://localhost:8082");
        assert_eq!(settings.auth_path, "/auth/token");
    }

    #[test]
    fn test_read_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "stac_url = \"https://stac.example.org\"").unwrap();
        writeln!(file, "bucket = \"landcover\"").unwrap();

        let settings = Settings::read(&path).unwrap();
        assert_eq!(settings.stac_url, "https://stac.example.org");
        assert_eq!(settings.bucket, "landcover");
        // Unset fields fall back to defaults
        assert_eq!(settings.region, "us-east-1");
    }
}
