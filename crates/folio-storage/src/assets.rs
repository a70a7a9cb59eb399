//! Project image assets stored under the website's public directory.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tokio::fs;

use crate::{write_atomic, StoreError};

const IMAGE_EXTENSION: &str = "png";

#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
    public_prefix: String,
}

impl AssetStore {
    /// `root` is the on-disk image directory, `public_prefix` the URL path the
    /// site serves it under.
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{name}.png` when the name is already a lowercase slug. Other names
    /// get a short hash suffix so `My_Repo` and `my-repo` never share a file.
    pub fn file_name_for(repository_name: &str) -> String {
        let slug: String = repository_name
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        let slug = slug.trim_matches('-');
        if !slug.is_empty() && slug == repository_name {
            return format!("{slug}.{IMAGE_EXTENSION}");
        }
        let slug = if slug.is_empty() { "project" } else { slug };
        let digest = hex::encode(Sha256::digest(repository_name.as_bytes()));
        format!("{slug}-{}.{IMAGE_EXTENSION}", &digest[..8])
    }

    pub fn absolute_path_for(&self, repository_name: &str) -> PathBuf {
        self.root.join(Self::file_name_for(repository_name))
    }

    pub fn public_path_for(&self, repository_name: &str) -> String {
        format!(
            "{}/{}",
            self.public_prefix,
            Self::file_name_for(repository_name)
        )
    }

    /// Public path of an already generated image, if one exists.
    pub async fn existing_image(
        &self,
        repository_name: &str,
    ) -> Result<Option<String>, StoreError> {
        let path = self.absolute_path_for(repository_name);
        match fs::try_exists(&path).await {
            Ok(true) => Ok(Some(self.public_path_for(repository_name))),
            Ok(false) => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub async fn store_image(
        &self,
        repository_name: &str,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        let path = self.absolute_path_for(repository_name);
        write_atomic(&path, bytes)
            .await
            .map_err(|source| StoreError::Io { path, source })?;
        Ok(self.public_path_for(repository_name))
    }
}
