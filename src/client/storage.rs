use std::sync::Arc;

use bytes::Bytes;

use crate::instrument::CallContext;
use crate::upstream::{StorageBackend, UploadOptions, UploadReceipt};

use super::{ClientInner, track};

/// Object storage, reached through [`StorageClient::from`].
pub struct StorageClient<B> {
    client: Arc<ClientInner<B>>,
}

impl<B: StorageBackend> StorageClient<B> {
    pub(super) fn new(client: Arc<ClientInner<B>>) -> Self {
        Self { client }
    }

    pub fn from(&self, bucket: &str) -> BucketClient<B> {
        BucketClient {
            client: Arc::clone(&self.client),
            bucket: bucket.to_string(),
        }
    }
}

pub struct BucketClient<B> {
    client: Arc<ClientInner<B>>,
    bucket: String,
}

impl<B: StorageBackend> BucketClient<B> {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload `body` to `path`. Without an explicit content type, one is
    /// guessed from the path's extension.
    pub async fn upload(
        &self,
        path: &str,
        body: impl Into<Bytes>,
        mut options: UploadOptions,
    ) -> Result<UploadReceipt, B::StorageError> {
        if options.content_type.is_none() {
            options.content_type = Some(guess_content_type(path));
        }

        track(
            &self.client.instrumentation,
            CallContext::storage(&self.bucket, "upload"),
            self.client
                .backend
                .upload(&self.bucket, path, body.into(), &options),
        )
        .await
    }
}

fn guess_content_type(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::guess_content_type;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(guess_content_type("avatars/ada.png"), "image/png");
        assert_eq!(guess_content_type("reports/q3.csv"), "text/csv");
        assert_eq!(guess_content_type("blob"), "application/octet-stream");
    }
}
