use std::{io, path::Path};

use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::{Url, header::CONTENT_TYPE};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;

use super::{ObjectStorage, Progress};
use crate::{CommsErr, Result, error::check_status};

const UPLOAD_CHUNK: usize = 256 * 1024;

/// Storage bucket reached over its REST API.
///
/// Objects are addressed by their full path, percent-encoded into a single segment
/// below the bucket URL.
pub struct HttpStorage {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpStorage {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CommsErr::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CommsErr::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{base_url} cannot hold object paths"),
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    fn object_url(&self, remote: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(remote.trim_start_matches('/'));
        }
        url.query_pairs_mut().append_pair("alt", "media");
        url
    }

    fn upload_url(&self, remote: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("name", remote.trim_start_matches('/'));
        url
    }
}

async fn write_body(resp: reqwest::Response, local: &Path) -> Result<()> {
    let mut file = fs::File::create(local).await?;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl ObjectStorage for HttpStorage {
    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        debug!(remote = remote; "downloading object");
        let resp = self.client.get(self.object_url(remote)).send().await?;
        let resp = check_status(resp).await?;

        let result = write_body(resp, local).await;
        if result.is_err() {
            let _ = fs::remove_file(local).await;
        }
        result
    }

    async fn upload(&self, remote: &str, local: &Path, progress: Option<Progress>) -> Result<()> {
        let file = fs::File::open(local).await?;
        let total = file.metadata().await?.len().max(1) as f32;

        let mut sent = 0usize;
        let body = ReaderStream::with_capacity(file, UPLOAD_CHUNK).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len();
                if let Some(progress) = &progress {
                    progress(sent as f32 / total);
                }
            }
            chunk
        });

        debug!(remote = remote; "uploading object");
        let resp = self
            .client
            .post(self.upload_url(remote))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_paths_are_a_single_encoded_segment() {
        let storage = HttpStorage::new("https://storage.example.com/v0/b/bucket/o").unwrap();

        assert_eq!(
            storage.object_url("/trainData/u1/t1/data.zip").as_str(),
            "https://storage.example.com/v0/b/bucket/o/trainData%2Fu1%2Ft1%2Fdata.zip?alt=media"
        );
        assert_eq!(
            storage.upload_url("/trainResult/t1/0xw/mnist.mar").as_str(),
            "https://storage.example.com/v0/b/bucket/o?name=trainResult%2Ft1%2F0xw%2Fmnist.mar"
        );
    }
}
