// src/s3/upload.rs

use anyhow::{bail, Result};
use futures::{stream, StreamExt, TryStreamExt};
use std::path::Path;
use tracing::{error, info, warn};

use super::store::{ObjectStore, PartSource, UploadedPart};

/// Part size and multipart cut-over when the caller gives none: 1 GiB.
pub const DEFAULT_THRESHOLD: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
/// Smallest part S3 accepts for anything but the last part.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Most parts one multipart upload may have.
pub const MAX_PARTS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Allow a multipart upload for files above `threshold`.
    pub large: bool,
    /// Multipart cut-over and part size in bytes. Parts grow past it only
    /// to stay within [`MAX_PARTS`].
    pub threshold: u64,
    /// Parts in flight at once.
    pub max_concurrency: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            large: false,
            threshold: DEFAULT_THRESHOLD,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Single,
    Multipart { parts: usize },
}

impl UploadOptions {
    /// Part size for a `size`-byte file: `threshold`, grown so the file fits
    /// in [`MAX_PARTS`] parts.
    pub fn part_size(&self, size: u64) -> u64 {
        self.threshold.max(size.div_ceil(MAX_PARTS))
    }

    pub fn mode_for(&self, size: u64) -> UploadMode {
        if self.large && self.threshold > 0 && size > self.threshold {
            UploadMode::Multipart {
                parts: size.div_ceil(self.part_size(size)) as usize,
            }
        } else {
            UploadMode::Single
        }
    }
}

/// `(part_number, offset, len)` for every part of a `size`-byte file.
pub fn plan_parts(size: u64, part_size: u64) -> Vec<(i32, u64, u64)> {
    if part_size == 0 {
        return Vec::new();
    }
    let mut parts = Vec::with_capacity(size.div_ceil(part_size) as usize);
    let mut offset = 0u64;
    let mut number = 1i32;
    while offset < size {
        let len = part_size.min(size - offset);
        parts.push((number, offset, len));
        offset += len;
        number += 1;
    }
    parts
}

/// Upload `path` to `bucket` under `key` (the path itself when `None`).
///
/// Errors are logged and reported as `false`; nothing is retried.
#[tracing::instrument(level = "info", skip_all, fields(bucket = %bucket, path = %path.display()))]
pub async fn upload_file<S: ObjectStore>(
    store: &S,
    bucket: &str,
    path: &Path,
    key: Option<&str>,
    opts: &UploadOptions,
) -> bool {
    let key = match key.filter(|k| !k.is_empty()) {
        Some(k) => k.to_string(),
        None => path.to_string_lossy().to_string(),
    };
    match try_upload(store, bucket, path, &key, opts).await {
        Ok(mode) => {
            info!(key = %key, ?mode, "upload finished");
            true
        }
        Err(e) => {
            error!(key = %key, error = %format!("{:#}", e), "upload failed");
            false
        }
    }
}

async fn try_upload<S: ObjectStore>(
    store: &S,
    bucket: &str,
    path: &Path,
    key: &str,
    opts: &UploadOptions,
) -> Result<UploadMode> {
    if opts.large && opts.threshold == 0 {
        bail!("multipart threshold must be positive");
    }
    let size = tokio::fs::metadata(path).await?.len();
    let mode = opts.mode_for(size);
    match mode {
        UploadMode::Single => store.put_object(bucket, key, path).await?,
        UploadMode::Multipart { parts } => {
            let part_size = opts.part_size(size);
            if part_size != opts.threshold {
                warn!(threshold = opts.threshold, part_size, "raising part size to stay within the part limit");
            }
            info!(size, parts, part_size, "multipart upload");
            multipart(store, bucket, path, key, size, part_size, opts.max_concurrency).await?
        }
    }
    Ok(mode)
}

async fn multipart<S: ObjectStore>(
    store: &S,
    bucket: &str,
    path: &Path,
    key: &str,
    size: u64,
    part_size: u64,
    max_concurrency: usize,
) -> Result<()> {
    let upload_id = store.create_multipart(bucket, key).await?;
    let upload_id = upload_id.as_str();

    let sent: Result<Vec<UploadedPart>> = stream::iter(plan_parts(size, part_size))
        .map(|(part_number, offset, len)| async move {
            let part = PartSource { path, offset, len };
            let e_tag = store
                .upload_part(bucket, key, upload_id, part_number, part)
                .await?;
            Ok::<_, anyhow::Error>(UploadedPart { part_number, e_tag })
        })
        .buffer_unordered(max_concurrency.max(1))
        .try_collect()
        .await;

    let finished = match sent {
        Ok(mut parts) => {
            parts.sort_by_key(|p| p.part_number);
            store.complete_multipart(bucket, key, upload_id, &parts).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = finished {
        if let Err(abort) = store.abort_multipart(bucket, key, upload_id).await {
            warn!(upload_id, error = %abort, "could not abort multipart upload");
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::init_test_logging;
    use anyhow::anyhow;
    use std::{io::Write, sync::Mutex};
    use tempfile::NamedTempFile;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Put(String),
        Create(String),
        Part(i32, u64, u64),
        Complete(Vec<i32>),
        Abort,
    }

    #[derive(Default)]
    struct MockStore {
        calls: Mutex<Vec<Call>>,
        fail_put: bool,
        fail_part: Option<i32>,
    }

    impl MockStore {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
        fn record(&self, c: Call) {
            self.calls.lock().unwrap().push(c);
        }
    }

    impl ObjectStore for MockStore {
        async fn put_object(&self, _bucket: &str, key: &str, _path: &Path) -> Result<()> {
            if self.fail_put {
                return Err(anyhow!("AccessDenied"));
            }
            self.record(Call::Put(key.to_string()));
            Ok(())
        }

        async fn create_multipart(&self, _bucket: &str, key: &str) -> Result<String> {
            self.record(Call::Create(key.to_string()));
            Ok("upload-1".into())
        }

        async fn upload_part(
            &self,
            _bucket: &str,
            _key: &str,
            upload_id: &str,
            part_number: i32,
            part: PartSource<'_>,
        ) -> Result<String> {
            assert_eq!(upload_id, "upload-1");
            if self.fail_part == Some(part_number) {
                return Err(anyhow!("part {} rejected", part_number));
            }
            self.record(Call::Part(part_number, part.offset, part.len));
            Ok(format!("etag-{}", part_number))
        }

        async fn complete_multipart(
            &self,
            _bucket: &str,
            _key: &str,
            _upload_id: &str,
            parts: &[UploadedPart],
        ) -> Result<()> {
            for p in parts {
                assert_eq!(p.e_tag, format!("etag-{}", p.part_number));
            }
            self.record(Call::Complete(parts.iter().map(|p| p.part_number).collect()));
            Ok(())
        }

        async fn abort_multipart(&self, _bucket: &str, _key: &str, _upload_id: &str) -> Result<()> {
            self.record(Call::Abort);
            Ok(())
        }
    }

    fn file_of(len: usize) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![7u8; len]).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[test]
    fn parts_cover_the_file() {
        assert_eq!(plan_parts(10, 4), vec![(1, 0, 4), (2, 4, 4), (3, 8, 2)]);
        assert_eq!(plan_parts(8, 4), vec![(1, 0, 4), (2, 4, 4)]);
        assert!(plan_parts(0, 4).is_empty());
        assert!(plan_parts(5, 0).is_empty());
    }

    #[test]
    fn mode_follows_flag_and_threshold() {
        let opts = UploadOptions {
            large: true,
            threshold: 100,
            ..Default::default()
        };
        assert_eq!(opts.mode_for(100), UploadMode::Single);
        assert_eq!(opts.mode_for(101), UploadMode::Multipart { parts: 2 });
        let small = UploadOptions {
            large: false,
            ..opts
        };
        assert_eq!(small.mode_for(10_000), UploadMode::Single);
    }

    #[test]
    fn part_count_never_exceeds_limit() {
        let opts = UploadOptions {
            large: true,
            threshold: MIN_PART_SIZE,
            ..Default::default()
        };
        let exact = MIN_PART_SIZE * MAX_PARTS;
        assert_eq!(opts.part_size(exact), MIN_PART_SIZE);
        assert_eq!(opts.mode_for(exact), UploadMode::Multipart { parts: 10_000 });

        let huge = 60 * 1024 * 1024 * 1024;
        let part_size = opts.part_size(huge);
        assert!(part_size > MIN_PART_SIZE);
        assert_eq!(part_size, huge.div_ceil(MAX_PARTS));
        let parts = plan_parts(huge, part_size);
        assert!(parts.len() as u64 <= MAX_PARTS);
        assert_eq!(opts.mode_for(huge), UploadMode::Multipart { parts: parts.len() });
        let (_, last_off, last_len) = parts[parts.len() - 1];
        assert_eq!(last_off + last_len, huge);
    }

    #[tokio::test]
    async fn single_shot_when_not_large() {
        init_test_logging();
        let tmp = file_of(64);
        let store = MockStore::default();
        let opts = UploadOptions {
            large: false,
            threshold: 16,
            ..Default::default()
        };
        assert!(upload_file(&store, "bucket", tmp.path(), Some("a/b.csv"), &opts).await);
        assert_eq!(store.calls(), vec![Call::Put("a/b.csv".into())]);
    }

    #[tokio::test]
    async fn chunked_when_large_and_above_threshold() {
        let tmp = file_of(40);
        let store = MockStore::default();
        let opts = UploadOptions {
            large: true,
            threshold: 16,
            max_concurrency: 2,
        };
        assert!(upload_file(&store, "bucket", tmp.path(), Some("big.bin"), &opts).await);

        let calls = store.calls();
        assert_eq!(calls.first(), Some(&Call::Create("big.bin".into())));
        assert_eq!(calls.last(), Some(&Call::Complete(vec![1, 2, 3])));
        let mut parts: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::Part(n, off, len) => Some((*n, *off, *len)),
                _ => None,
            })
            .collect();
        parts.sort();
        assert_eq!(parts, vec![(1, 0, 16), (2, 16, 16), (3, 32, 8)]);
    }

    #[tokio::test]
    async fn large_but_small_file_goes_single_shot() {
        let tmp = file_of(8);
        let store = MockStore::default();
        let opts = UploadOptions {
            large: true,
            threshold: 16,
            ..Default::default()
        };
        assert!(upload_file(&store, "bucket", tmp.path(), None, &opts).await);
        let key = tmp.path().to_string_lossy().to_string();
        assert_eq!(store.calls(), vec![Call::Put(key)]);
    }

    #[tokio::test]
    async fn client_failure_returns_false() {
        let tmp = file_of(8);
        let store = MockStore {
            fail_put: true,
            ..Default::default()
        };
        assert!(!upload_file(&store, "bucket", tmp.path(), Some("k"), &UploadOptions::default()).await);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_part_aborts_upload() {
        let tmp = file_of(40);
        let store = MockStore {
            fail_part: Some(2),
            ..Default::default()
        };
        let opts = UploadOptions {
            large: true,
            threshold: 16,
            max_concurrency: 1,
        };
        assert!(!upload_file(&store, "bucket", tmp.path(), Some("k"), &opts).await);
        let calls = store.calls();
        assert_eq!(calls.last(), Some(&Call::Abort));
        assert!(!calls.iter().any(|c| matches!(c, Call::Complete(_))));
    }

    #[tokio::test]
    async fn missing_file_returns_false() {
        let store = MockStore::default();
        let ok = upload_file(
            &store,
            "bucket",
            Path::new("/definitely/not/here.bin"),
            Some("k"),
            &UploadOptions::default(),
        )
        .await;
        assert!(!ok);
        assert!(store.calls().is_empty());
    }
}
