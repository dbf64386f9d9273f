//! Object store collaborator: S3-backed blob storage for converted layers.

use std::path::Path;

use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use regex::Regex;
use tracing::info;

use crate::config::Settings;
use crate::error::{Error, Result};

pub trait ObjectStoreOps {
    /// Upload a blob under `key`, returning its public URL.
    async fn upload(self: &Self, key: &str, local_path: &Path) -> Result<String>;

    /// Delete a blob by key or public URL. Already-absent blobs are not an
    /// error.
    async fn remove(self: &Self, url_or_key: &str) -> Result<()>;

    async fn exists(self: &Self, key: &str) -> Result<bool>;
}

#[derive(Debug, PartialEq)]
pub struct S3Location {
    pub region: String,
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    pub fn from_url(url: &str) -> Result<Self> {
        let re = Regex::new(
            r"https://(?<bucket>[^.]+)\.s3\.(?<region>[^.]+)\.amazonaws\.com/(?<key>.+)",
        )
        .expect("Regex pattern should always compile");

        let captures = re
            .captures(url)
            .ok_or_else(|| Error::Storage(format!("not an S3 object URL: {url}")))?;

        let (_, [bucket, region, key]) = captures.extract();
        Ok(Self {
            region: region.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
}

impl S3Store {
    pub async fn connect(settings: &Settings) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(profile) = &settings.aws_profile {
            loader = loader.profile_name(profile);
        }
        let base_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&base_config)
            .region(Region::new(settings.region.clone()))
            .build();

        S3Store {
            client: Client::from_conf(s3_config),
            bucket: settings.bucket.clone(),
            region: settings.region.clone(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket, self.region, key
        )
    }

    /// Accepts either a bare key or a public URL produced by `upload`.
    fn key_of(&self, url_or_key: &str) -> Result<String> {
        if url_or_key.starts_with("https://") {
            Ok(S3Location::from_url(url_or_key)?.key)
        } else {
            Ok(url_or_key.to_string())
        }
    }
}

impl ObjectStoreOps for S3Store {
    async fn upload(self: &Self, key: &str, local_path: &Path) -> Result<String> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| Error::Storage(format!("cannot read {}: {e}", local_path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("upload of {key} failed: {}", DisplayErrorContext(&e))))?;

        Ok(self.public_url(key))
    }

    async fn remove(self: &Self, url_or_key: &str) -> Result<()> {
        let key = self.key_of(url_or_key)?;
        // S3 deletes are idempotent: deleting a missing key succeeds.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("delete of {key} failed: {}", DisplayErrorContext(&e))))?;
        info!("Deleted blob {key}");
        Ok(())
    }

    async fn exists(self: &Self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(Error::Storage(format!(
                        "head of {key} failed: {}",
                        DisplayErrorContext(&err)
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_location_from_url() {
        let url = "https://cog-test.s3.us-east-1.amazonaws.com/land-cover/cover_2010.tif";
        let location = S3Location::from_url(url).unwrap();
        assert_eq!(
            location,
            S3Location {
                bucket: "cog-test".to_string(),
                region: "us-east-1".to_string(),
                key: "land-cover/cover_2010.tif".to_string(),
            }
        );
    }

    #[test]
    fn test_non_s3_url_is_rejected() {
        assert!(S3Location::from_url("https://example.org/blob.tif").is_err());
    }
}
