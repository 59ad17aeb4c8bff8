use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::StorageClient;

/// One uploaded file as received from a multipart field.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Avatar,
    Cover,
}

impl ImageKind {
    fn prefix(self) -> &'static str {
        match self {
            ImageKind::Avatar => "avatar",
            ImageKind::Cover => "cover",
        }
    }
}

pub fn is_image(content_type: &str) -> bool {
    content_type.starts_with("image/")
}

/// Uploads an image under `users/<user>/<kind>-<uuid>.<ext>` and returns its public URL.
pub async fn upload_image(
    storage: &dyn StorageClient,
    user_id: Uuid,
    kind: ImageKind,
    item: UploadItem,
) -> anyhow::Result<String> {
    anyhow::ensure!(!item.body.is_empty(), "empty upload");
    anyhow::ensure!(
        is_image(&item.content_type),
        "unsupported content type {}",
        item.content_type
    );

    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("users/{}/{}-{}.{}", user_id, kind.prefix(), Uuid::new_v4(), ext);
    storage
        .put_object(&key, item.body, &item.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    let url = storage.public_url(&key);
    info!(%user_id, ?kind, %url, "image uploaded");
    Ok(url)
}

/// Deletes an object that a new upload replaced. Failures are only logged.
pub async fn remove_replaced(storage: &dyn StorageClient, old_url: Option<&str>) {
    let Some(key) = old_url.and_then(|u| storage.key_for_url(u)) else {
        return;
    };
    if let Err(e) = storage.delete_object(&key).await {
        warn!(error = %e, %key, "failed to delete replaced media");
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

#[cfg(test)]
mod image_tests {
    use super::*;
    use crate::state::FakeStorage;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), Some("heic"));
        assert_eq!(ext_from_mime("image/gif"), Some("gif"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn upload_returns_public_url_under_user_prefix() {
        let storage = FakeStorage::default();
        let user_id = Uuid::new_v4();
        let url = upload_image(
            &storage,
            user_id,
            ImageKind::Avatar,
            UploadItem {
                body: Bytes::from_static(b"\x89PNG"),
                content_type: "image/png".into(),
            },
        )
        .await
        .unwrap();

        assert!(url.starts_with(&format!("https://fake.local/users/{}/avatar-", user_id)));
        assert!(url.ends_with(".png"));
        assert_eq!(storage.keys().len(), 1);
    }

    #[tokio::test]
    async fn upload_rejects_non_images_and_empty_bodies() {
        let storage = FakeStorage::default();
        let pdf = UploadItem {
            body: Bytes::from_static(b"%PDF"),
            content_type: "application/pdf".into(),
        };
        assert!(upload_image(&storage, Uuid::new_v4(), ImageKind::Cover, pdf).await.is_err());

        let empty = UploadItem {
            body: Bytes::new(),
            content_type: "image/png".into(),
        };
        assert!(upload_image(&storage, Uuid::new_v4(), ImageKind::Cover, empty).await.is_err());
        assert!(storage.keys().is_empty());
    }

    #[tokio::test]
    async fn remove_replaced_deletes_own_objects_only() {
        let storage = FakeStorage::default();
        let url = upload_image(
            &storage,
            Uuid::new_v4(),
            ImageKind::Cover,
            UploadItem {
                body: Bytes::from_static(b"jpeg"),
                content_type: "image/jpeg".into(),
            },
        )
        .await
        .unwrap();

        remove_replaced(&storage, Some("https://elsewhere.net/x.png")).await;
        assert_eq!(storage.keys().len(), 1);
        remove_replaced(&storage, Some(&url)).await;
        assert!(storage.keys().is_empty());
    }
}
