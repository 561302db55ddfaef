use std::path::PathBuf;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

/// 10 MB limit for decoded images
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Where message images go. Returns a URL clients can load the image from.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, data_uri: &str) -> Result<String>;
}

/// Stores images as files under `dir`, served back at `{public_url}/uploads/`.
pub struct LocalMediaStore {
    dir: PathBuf,
    public_url: String,
}

impl LocalMediaStore {
    pub fn new(dir: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn upload(&self, data_uri: &str) -> Result<String> {
        let (extension, bytes) = decode_image_data_uri(data_uri)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| anyhow!("Failed to create upload directory {}: {}", self.dir.display(), e))?;

        let file_name = format!("{}.{}", Uuid::new_v4(), extension);
        let file_path = self.dir.join(&file_name);
        let mut file = tokio::fs::File::create(&file_path)
            .await
            .map_err(|e| anyhow!("Failed to create file {}: {}", file_path.display(), e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| anyhow!("Failed to write file {}: {}", file_path.display(), e))?;
        file.flush().await?;

        info!("Stored image {} ({} bytes)", file_name, bytes.len());
        Ok(format!("{}/uploads/{}", self.public_url, file_name))
    }
}

/// Split `data:image/<kind>;base64,<payload>` into a file extension and bytes.
fn decode_image_data_uri(data_uri: &str) -> Result<(&'static str, Vec<u8>)> {
    let rest = data_uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data URI"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("Data URI has no payload"))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("Data URI is not base64 encoded"))?;

    let extension = match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        other => bail!("Unsupported image type: {}", other),
    };

    // base64 inflates by 4/3; reject before decoding
    if payload.len() / 4 * 3 > MAX_IMAGE_SIZE + 3 {
        bail!("Image exceeds {} bytes", MAX_IMAGE_SIZE);
    }

    let bytes = B64.decode(payload.trim())?;
    if bytes.is_empty() {
        bail!("Image is empty");
    }
    if bytes.len() > MAX_IMAGE_SIZE {
        bail!("Image exceeds {} bytes", MAX_IMAGE_SIZE);
    }

    Ok((extension, bytes))
}


#[cfg(test)]
mod tests {
    use super::*;

    fn png_uri(bytes: &[u8]) -> String {
        format!("data:image/png;base64,{}", B64.encode(bytes))
    }

    #[test]
    fn decodes_supported_images() {
        let (ext, bytes) = decode_image_data_uri(&png_uri(b"\x89PNG")).unwrap();
        assert_eq!(ext, "png");
        assert_eq!(bytes, b"\x89PNG");

        let (ext, _) = decode_image_data_uri("data:image/jpeg;base64,AAAA").unwrap();
        assert_eq!(ext, "jpg");
    }

    #[test]
    fn rejects_bad_uris() {
        assert!(decode_image_data_uri("https://example.com/cat.png").is_err());
        assert!(decode_image_data_uri("data:image/png;base64").is_err());
        assert!(decode_image_data_uri("data:text/plain;base64,AAAA").is_err());
        assert!(decode_image_data_uri("data:image/png,rawbytes").is_err());
        assert!(decode_image_data_uri("data:image/png;base64,!!!").is_err());
        assert!(decode_image_data_uri("data:image/png;base64,").is_err());
    }

    #[tokio::test]
    async fn local_store_writes_file_and_returns_url() {
        let dir = std::env::temp_dir().join(format!("sayhi-media-{}", Uuid::new_v4()));
        let store = LocalMediaStore::new(&dir, "http://localhost:3000/");

        let url = store.upload(&png_uri(b"pixels")).await.unwrap();
        assert!(url.starts_with("http://localhost:3000/uploads/"));
        assert!(url.ends_with(".png"));

        let file_name = url.rsplit('/').next().unwrap();
        assert_eq!(std::fs::read(dir.join(file_name)).unwrap(), b"pixels");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
