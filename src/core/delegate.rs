use crate::core::apify::{ActorRun, ApifyClient};
use crate::core::input::StorageTarget;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as StorePath;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;
use url::Url;

pub const DEFAULT_ACTOR_ID: &str = "streamers~youtube-video-downloader";

const KEY_FIELDS: &[&str] = &["s3Key", "key", "fileKey", "objectKey"];
const URL_FIELDS: &[&str] = &["s3Url", "downloadUrl", "fileUrl", "url"];

#[async_trait]
pub trait DelegateDownloader: Send + Sync {
    /// Have the remote service download `url` into `target`, then fetch the
    /// produced object into `dest_dir`.
    async fn download(
        &self,
        url: &str,
        target: &StorageTarget,
        dest_dir: &Path,
        file_stem: &str,
    ) -> Result<PathBuf>;
}

pub struct ApifyDelegate {
    client: ApifyClient,
    actor_id: String,
}

impl ApifyDelegate {
    pub fn new(client: ApifyClient, actor_id: impl Into<String>) -> Self {
        Self {
            client,
            actor_id: actor_id.into(),
        }
    }
}

#[async_trait]
impl DelegateDownloader for ApifyDelegate {
    async fn download(
        &self,
        url: &str,
        target: &StorageTarget,
        dest_dir: &Path,
        file_stem: &str,
    ) -> Result<PathBuf> {
        let input = actor_input(url, target);
        let run = self.client.start_actor(&self.actor_id, &input).await?;
        let run = self.client.wait_for_run(&run.id).await?;

        let dataset_id = completed_dataset(&run)?;
        let items = self.client.dataset_items(dataset_id).await?;
        let key = delivered_object(&run, &items, &target.bucket)?;

        fetch_object(target, &key, dest_dir, file_stem).await
    }
}

/// Dataset of a finished delegate run, or why the run cannot be used.
pub fn completed_dataset(run: &ActorRun) -> Result<&str> {
    if !run.succeeded() {
        let detail = run
            .status_message
            .as_deref()
            .map(|m| format!(": {m}"))
            .unwrap_or_default();
        return Err(Error::acquisition(format!(
            "Delegate run {} finished with status {}{detail}",
            run.id, run.status
        )));
    }

    run.default_dataset_id
        .as_deref()
        .ok_or_else(|| Error::acquisition(format!("Delegate run {} has no dataset", run.id)))
}

/// First object key any dataset item reports for `bucket`.
pub fn delivered_object(run: &ActorRun, items: &[Value], bucket: &str) -> Result<StorePath> {
    items
        .iter()
        .find_map(|item| object_key(item, bucket))
        .ok_or_else(|| {
            Error::acquisition(format!(
                "Delegate run {} did not report a retrievable object key",
                run.id
            ))
        })
}

/// Input document for the delegate actor.
pub fn actor_input(url: &str, target: &StorageTarget) -> Value {
    json!({
        "videos": [{ "url": url }],
        "preferredFormat": "mp4",
        "preferredQuality": "480p",
        "s3Bucket": target.bucket,
        "s3Region": target.region,
        "s3AccessKeyId": target.access_key_id,
        "s3SecretAccessKey": target.secret_access_key.expose(),
    })
}

/// Find the object key in a dataset item, either as a plain key field or
/// inside an `s3://` or virtual-hosted/path-style S3 URL.
pub fn object_key(item: &Value, bucket: &str) -> Option<StorePath> {
    for field in KEY_FIELDS {
        if let Some(key) = item.get(*field).and_then(Value::as_str) {
            let key = key.trim().trim_start_matches('/');
            if !key.is_empty() {
                return Some(StorePath::from(key));
            }
        }
    }

    URL_FIELDS
        .iter()
        .filter_map(|field| item.get(*field).and_then(Value::as_str))
        .find_map(|raw| key_from_url(raw, bucket))
}

fn key_from_url(raw: &str, bucket: &str) -> Option<StorePath> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?;
    let path = url.path().trim_start_matches('/');

    let key = match url.scheme() {
        "s3" if host == bucket => path,
        "https" | "http" if host.starts_with(&format!("{bucket}.s3")) => path,
        "https" | "http" if host.starts_with("s3.") || host.starts_with("s3-") => {
            path.strip_prefix(bucket)?.strip_prefix('/')?
        }
        _ => return None,
    };

    if key.is_empty() {
        return None;
    }
    StorePath::from_url_path(key).ok()
}

/// Stream an object from the bucket into a new file in `dest_dir`.
pub async fn fetch_object(
    target: &StorageTarget,
    key: &StorePath,
    dest_dir: &Path,
    file_stem: &str,
) -> Result<PathBuf> {
    let store = AmazonS3Builder::new()
        .with_bucket_name(&target.bucket)
        .with_region(&target.region)
        .with_access_key_id(&target.access_key_id)
        .with_secret_access_key(target.secret_access_key.expose())
        .build()
        .map_err(|e| Error::acquisition(format!("Cannot configure object storage: {e}")))?;

    let extension = key.extension().unwrap_or("mp4");
    let dest = dest_dir.join(format!("{file_stem}.{extension}"));

    info!(bucket = %target.bucket, key = %key, "Fetching delegate output from object storage");
    let result = store
        .get(key)
        .await
        .map_err(|e| Error::acquisition(format!("Object {key} is not retrievable: {e}")))?;

    let mut stream = result.into_stream();
    let mut file = tokio::fs::File::create(&dest).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        written += bytes.len() as u64;
        file.write_all(&bytes).await?;
    }
    file.flush().await?;

    info!(path = %dest.display(), bytes = written, "Delegate output stored locally");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::input::Secret;

    fn target() -> StorageTarget {
        StorageTarget {
            bucket: "media-drop".to_string(),
            region: "eu-west-1".to_string(),
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: Secret::new("secret"),
        }
    }

    fn run(status: &str, dataset: Option<&str>) -> ActorRun {
        ActorRun {
            id: "run1".to_string(),
            status: status.to_string(),
            default_dataset_id: dataset.map(str::to_string),
            status_message: Some("quota exceeded".to_string()),
        }
    }

    #[test]
    fn only_succeeded_runs_yield_a_dataset() {
        assert_eq!(completed_dataset(&run("SUCCEEDED", Some("ds1"))).unwrap(), "ds1");

        for status in ["FAILED", "TIMED-OUT", "ABORTED"] {
            let err = completed_dataset(&run(status, Some("ds1"))).unwrap_err();
            assert!(matches!(err, Error::Acquisition(_)), "{status}");
            assert!(err.to_string().contains(status));
            assert!(err.to_string().contains("quota exceeded"));
        }

        let err = completed_dataset(&run("SUCCEEDED", None)).unwrap_err();
        assert!(matches!(err, Error::Acquisition(_)));
    }

    #[test]
    fn delivered_object_needs_a_key() {
        let done = run("SUCCEEDED", Some("ds1"));
        let items = vec![
            json!({ "status": "skipped" }),
            json!({ "downloadUrl": "s3://media-drop/videos/abc.mp4" }),
        ];
        assert_eq!(
            delivered_object(&done, &items, "media-drop").unwrap(),
            StorePath::from("videos/abc.mp4")
        );

        let err = delivered_object(&done, &[json!({ "title": "x" })], "media-drop").unwrap_err();
        assert!(matches!(err, Error::Acquisition(_)));
        assert!(delivered_object(&done, &[], "media-drop").is_err());
    }

    #[test]
    fn plain_key_fields_win() {
        let item = json!({ "s3Key": "videos/abc.mp4", "downloadUrl": "s3://media-drop/other.mp4" });
        assert_eq!(
            object_key(&item, "media-drop"),
            Some(StorePath::from("videos/abc.mp4"))
        );
    }

    #[test]
    fn keys_are_recovered_from_urls() {
        let cases = [
            json!({ "downloadUrl": "s3://media-drop/videos/abc.mp4" }),
            json!({ "url": "https://media-drop.s3.eu-west-1.amazonaws.com/videos/abc.mp4" }),
            json!({ "fileUrl": "https://s3.eu-west-1.amazonaws.com/media-drop/videos/abc.mp4" }),
        ];
        for item in cases {
            assert_eq!(
                object_key(&item, "media-drop"),
                Some(StorePath::from("videos/abc.mp4")),
                "{item}"
            );
        }
    }

    #[test]
    fn foreign_buckets_and_empty_items_yield_nothing() {
        assert_eq!(
            object_key(&json!({ "downloadUrl": "s3://someone-else/a.mp4" }), "media-drop"),
            None
        );
        assert_eq!(
            object_key(&json!({ "url": "https://www.youtube.com/watch?v=x" }), "media-drop"),
            None
        );
        assert_eq!(object_key(&json!({ "key": "  " }), "media-drop"), None);
    }

    #[test]
    fn percent_encoded_url_keys_are_decoded() {
        let item = json!({ "s3Url": "s3://media-drop/videos/my%20talk.mp4" });
        assert_eq!(
            object_key(&item, "media-drop"),
            Some(StorePath::from("videos/my talk.mp4"))
        );
    }

    #[test]
    fn actor_input_carries_destination() {
        let input = actor_input("https://youtu.be/dQw4w9WgXcQ", &target());
        assert_eq!(input["videos"][0]["url"], "https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(input["s3Bucket"], "media-drop");
        assert_eq!(input["s3Region"], "eu-west-1");
        assert_eq!(input["s3SecretAccessKey"], "secret");
    }
}
