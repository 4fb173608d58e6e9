//! Conformance checks every storage backend must pass
//!
//! The checks only use the [`StorageBackend`] contract, so they run
//! unchanged against the memory backend, the test double and real
//! providers. Each check works under its own key prefix and removes what it
//! wrote, whether it passes or not.
//!
//! Non-final multipart parts are `part_size` bytes. Providers with a
//! minimum part size (S3: 5 MiB) need the default; in-process backends can
//! use something tiny.

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, ensure, Context};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::multipart::{MultipartUpload, MIN_PART_SIZE};
use crate::traits::StorageBackend;
use crate::types::*;

/// A single conformance check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Check {
    Init,
    CapabilitiesStable,
    HeadMissing,
    PutGet,
    RangedRead,
    ListRestartable,
    DeleteBatch,
    Rename,
    MultipartOrdering,
    MultipartMissingPart,
    MultipartReAdd,
    MultipartCopy,
    MultipartDoubleAbort,
    MultipartAbortAfterCommit,
    MultipartExpire,
}

impl Check {
    pub const ALL: [Check; 15] = [
        Check::Init,
        Check::CapabilitiesStable,
        Check::HeadMissing,
        Check::PutGet,
        Check::RangedRead,
        Check::ListRestartable,
        Check::DeleteBatch,
        Check::Rename,
        Check::MultipartOrdering,
        Check::MultipartMissingPart,
        Check::MultipartReAdd,
        Check::MultipartCopy,
        Check::MultipartDoubleAbort,
        Check::MultipartAbortAfterCommit,
        Check::MultipartExpire,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Check::Init => "init",
            Check::CapabilitiesStable => "capabilities-stable",
            Check::HeadMissing => "head-missing",
            Check::PutGet => "put-get",
            Check::RangedRead => "ranged-read",
            Check::ListRestartable => "list-restartable",
            Check::DeleteBatch => "delete-batch",
            Check::Rename => "rename",
            Check::MultipartOrdering => "multipart-ordering",
            Check::MultipartMissingPart => "multipart-missing-part",
            Check::MultipartReAdd => "multipart-re-add",
            Check::MultipartCopy => "multipart-copy",
            Check::MultipartDoubleAbort => "multipart-double-abort",
            Check::MultipartAbortAfterCommit => "multipart-abort-after-commit",
            Check::MultipartExpire => "multipart-expire",
        }
    }
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Check {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Check::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown check: {s}")))
    }
}

/// Outcome of one check
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub check: Check,

    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,

    /// Failure message; `None` when the check passed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Conformance suite settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    /// Key prefix all checks write under
    pub prefix: String,

    /// Size of non-final multipart parts
    pub part_size: u64,

    /// Bucket the backend was built for; the init check fails without it
    pub bucket: Option<String>,
}

impl Default for Suite {
    fn default() -> Self {
        Self::new("blobkit-conformance/")
    }
}

impl Suite {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            part_size: MIN_PART_SIZE,
            bucket: None,
        }
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Run every check in order
    pub async fn run_all(&self, backend: &dyn StorageBackend) -> Vec<CheckReport> {
        let mut reports = Vec::with_capacity(Check::ALL.len());
        for check in Check::ALL {
            reports.push(self.run(backend, check).await);
        }
        reports
    }

    /// Run one check and report the outcome
    pub async fn run(&self, backend: &dyn StorageBackend, check: Check) -> CheckReport {
        let scope = format!("{}{}/", self.prefix, check.name());
        let start = Instant::now();
        let outcome = self.dispatch(backend, check, &scope).await;
        cleanup(backend, &scope).await;

        let elapsed = start.elapsed();
        match &outcome {
            Ok(()) => info!(%check, ?elapsed, "check passed"),
            Err(err) => warn!(%check, ?elapsed, "check failed: {err:#}"),
        }

        CheckReport {
            check,
            elapsed,
            failure: outcome.err().map(|e| format!("{e:#}")),
        }
    }

    async fn dispatch(
        &self,
        backend: &dyn StorageBackend,
        check: Check,
        scope: &str,
    ) -> anyhow::Result<()> {
        match check {
            Check::Init => init_bound(backend, self.bucket.as_deref()).await,
            Check::CapabilitiesStable => capabilities_stable(backend).await,
            Check::HeadMissing => head_missing(backend, scope).await,
            Check::PutGet => put_get(backend, scope).await,
            Check::RangedRead => ranged_read(backend, scope).await,
            Check::ListRestartable => list_restartable(backend, scope).await,
            Check::DeleteBatch => delete_batch(backend, scope).await,
            Check::Rename => rename(backend, scope).await,
            Check::MultipartOrdering => multipart_ordering(backend, scope, self.part_size).await,
            Check::MultipartMissingPart => multipart_missing_part(backend, scope).await,
            Check::MultipartReAdd => multipart_re_add(backend, scope).await,
            Check::MultipartCopy => multipart_copy(backend, scope).await,
            Check::MultipartDoubleAbort => multipart_double_abort(backend, scope).await,
            Check::MultipartAbortAfterCommit => {
                multipart_abort_after_commit(backend, scope).await
            }
            Check::MultipartExpire => multipart_expire(backend, scope).await,
        }
    }
}

/// Best-effort removal of everything a check left under `scope`
async fn cleanup(backend: &dyn StorageBackend, scope: &str) {
    let expire = MultipartExpireInput {
        older_than: Some(Duration::ZERO),
        prefix: Some(scope.to_string()),
    };
    if let Err(err) = backend.multipart_expire(expire).await {
        debug!(scope, %err, "cleanup: expire failed");
    }

    let keys = match list_all(backend, scope, None).await {
        Ok(keys) => keys,
        Err(err) => {
            debug!(scope, "cleanup: list failed: {err:#}");
            return;
        }
    };
    if keys.is_empty() {
        return;
    }
    if let Err(err) = backend.delete_blobs(DeleteBlobsInput { keys }).await {
        debug!(scope, %err, "cleanup: delete failed");
    }
}

/// Every key under `prefix`, following continuation tokens
async fn list_all(
    backend: &dyn StorageBackend,
    prefix: &str,
    max_keys: Option<u32>,
) -> anyhow::Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut token = None;
    loop {
        let page = backend
            .list_blobs(ListBlobsInput {
                prefix: Some(prefix.to_string()),
                max_keys,
                continuation_token: token.take(),
                ..Default::default()
            })
            .await
            .context("list_blobs")?;
        keys.extend(page.items.into_iter().map(|item| item.key));
        match page.next_continuation_token {
            Some(next) if page.is_truncated => token = Some(next),
            _ => return Ok(keys),
        }
    }
}

async fn put(backend: &dyn StorageBackend, key: &str, body: &[u8]) -> anyhow::Result<()> {
    backend
        .put_blob(PutBlobInput::new(key, body))
        .await
        .with_context(|| format!("put_blob {key}"))?;
    Ok(())
}

async fn read(backend: &dyn StorageBackend, key: &str) -> anyhow::Result<Vec<u8>> {
    let out = backend
        .get_blob(GetBlobInput::new(key))
        .await
        .with_context(|| format!("get_blob {key}"))?;
    Ok(out.body)
}

async fn begin(backend: &dyn StorageBackend, key: &str) -> anyhow::Result<MultipartUpload> {
    backend
        .multipart_blob_begin(MultipartBlobBeginInput::new(key))
        .await
        .with_context(|| format!("multipart_blob_begin {key}"))
}

async fn add_part(
    backend: &dyn StorageBackend,
    upload: &mut MultipartUpload,
    part_number: u32,
    body: Vec<u8>,
) -> anyhow::Result<()> {
    let out = backend
        .multipart_blob_add(upload.add_input(part_number, body))
        .await
        .with_context(|| format!("multipart_blob_add part {part_number}"))?;
    upload.record_part(part_number, out.part_id);
    Ok(())
}

/// init accepts the bucket the backend is bound to, repeatedly, and
/// rejects any other name
pub async fn init_bound(
    backend: &dyn StorageBackend,
    bucket: Option<&str>,
) -> anyhow::Result<()> {
    let bucket = bucket.context("no bucket given to check init against")?;
    for call in 1..=2 {
        backend
            .init(bucket)
            .await
            .with_context(|| format!("init {bucket} (call {call})"))?;
    }

    let other = format!("{bucket}-unbound");
    ensure!(
        backend.init(&other).await.is_err(),
        "init accepted bucket {other} the backend is not bound to"
    );
    Ok(())
}

/// Capabilities are identical on every call
pub async fn capabilities_stable(backend: &dyn StorageBackend) -> anyhow::Result<()> {
    let first = backend.capabilities().await.context("capabilities")?;
    ensure!(!first.name.is_empty(), "capabilities name is empty");
    ensure!(first.max_multipart_size > 0, "max multipart size is zero");

    let again = join_all((0..4).map(|_| backend.capabilities())).await;
    for caps in again {
        let caps = caps.context("capabilities")?;
        ensure!(caps == first, "capabilities changed: {first} then {caps}");
    }
    Ok(())
}

/// Reading a missing blob fails with NotFound and no output
pub async fn head_missing(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let key = format!("{scope}absent");
    match backend.head_blob(HeadBlobInput::new(&key)).await {
        Err(Error::NotFound(_)) => {}
        Err(err) => bail!("head_blob of a missing key failed with {err} instead of NotFound"),
        Ok(out) => bail!("head_blob of a missing key returned {out:?}"),
    }
    match backend.get_blob(GetBlobInput::new(&key)).await {
        Err(Error::NotFound(_)) => Ok(()),
        Err(err) => bail!("get_blob of a missing key failed with {err} instead of NotFound"),
        Ok(_) => bail!("get_blob of a missing key returned a body"),
    }
}

/// A put blob reads back byte for byte and heads with the right size
pub async fn put_get(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let key = format!("{scope}blob");
    let body = b"the quick brown fox".to_vec();

    let mut input = PutBlobInput::new(&key, body.clone());
    input.metadata.insert("origin".into(), "conformance".into());
    input.content_type = Some("text/plain".into());
    backend.put_blob(input).await.context("put_blob")?;

    let head = backend
        .head_blob(HeadBlobInput::new(&key))
        .await
        .context("head_blob")?;
    ensure!(head.item.key == key, "head reported key {}", head.item.key);
    ensure!(
        head.item.size == body.len() as u64,
        "head reported size {}, wrote {}",
        head.item.size,
        body.len()
    );
    ensure!(
        head.item.metadata.get("origin").map(String::as_str) == Some("conformance"),
        "metadata not preserved: {:?}",
        head.item.metadata
    );

    ensure!(read(backend, &key).await? == body, "read back different bytes");
    Ok(())
}

/// Ranged reads return exactly the requested window
pub async fn ranged_read(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let key = format!("{scope}digits");
    put(backend, &key, b"0123456789").await?;

    let out = backend
        .get_blob(GetBlobInput::range(&key, 3, 4))
        .await
        .context("ranged get_blob")?;
    ensure!(out.body == b"3456", "range 3+4 returned {:?}", out.body);

    let out = backend
        .get_blob(GetBlobInput::range(&key, 7, 0))
        .await
        .context("open-ended get_blob")?;
    ensure!(out.body == b"789", "range 7.. returned {:?}", out.body);
    Ok(())
}

/// Paging with a small page size sees every key once, and a fresh listing
/// starts over
pub async fn list_restartable(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let expected: Vec<String> = (0..5).map(|i| format!("{scope}item-{i}")).collect();
    for key in &expected {
        put(backend, key, key.as_bytes()).await?;
    }

    let paged = list_all(backend, scope, Some(2)).await?;
    ensure!(paged == expected, "paged listing returned {paged:?}");

    let first = backend
        .list_blobs(ListBlobsInput {
            max_keys: Some(2),
            ..ListBlobsInput::prefix(scope)
        })
        .await
        .context("list_blobs")?;
    ensure!(first.is_truncated, "first page of 5 keys with 2 per page is not truncated");
    let first_keys: Vec<_> = first.items.iter().map(|i| i.key.as_str()).collect();
    ensure!(
        first_keys == [expected[0].as_str(), expected[1].as_str()],
        "fresh listing did not restart: {first_keys:?}"
    );
    Ok(())
}

/// Batched delete accounts for every key and removes the existing ones
pub async fn delete_batch(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let present = [format!("{scope}a"), format!("{scope}b")];
    for key in &present {
        put(backend, key, b"x").await?;
    }
    let absent = format!("{scope}never-written");

    let mut keys = present.to_vec();
    keys.push(absent.clone());
    let out = backend
        .delete_blobs(DeleteBlobsInput { keys: keys.clone() })
        .await
        .context("delete_blobs")?;

    for key in &keys {
        let reported = out.deleted.iter().filter(|k| *k == key).count()
            + out.errors.iter().filter(|e| &e.key == key).count();
        ensure!(reported == 1, "key {key} reported {reported} times");
    }
    for key in &present {
        ensure!(out.deleted.contains(key), "existing key {key} not deleted");
    }

    let left = list_all(backend, scope, None).await?;
    ensure!(left.is_empty(), "keys survived batched delete: {left:?}");
    Ok(())
}

/// Rename moves content and removes the source
pub async fn rename(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let source = format!("{scope}from");
    let destination = format!("{scope}to");
    put(backend, &source, b"moving").await?;

    backend
        .rename_blob(RenameBlobInput {
            source: source.clone(),
            destination: destination.clone(),
        })
        .await
        .context("rename_blob")?;

    ensure!(read(backend, &destination).await? == b"moving", "renamed content differs");
    match backend.head_blob(HeadBlobInput::new(&source)).await {
        Err(Error::NotFound(_)) => Ok(()),
        Err(err) => Err(anyhow!(err).context("head_blob of renamed source")),
        Ok(_) => bail!("rename left the source behind"),
    }
}

/// Parts added out of order commit in part-number order
pub async fn multipart_ordering(
    backend: &dyn StorageBackend,
    scope: &str,
    part_size: u64,
) -> anyhow::Result<()> {
    let caps = backend.capabilities().await.context("capabilities")?;
    let key = format!("{scope}ordered");
    let mut upload = begin(backend, &key).await?;

    let first = vec![b'a'; part_size as usize];
    let second = vec![b'b'; part_size as usize];
    let tail = b"tail".to_vec();
    let parts = [(3, tail.clone()), (2, second.clone()), (1, first.clone())];

    if caps.no_parallel_multipart {
        for (n, body) in parts {
            add_part(backend, &mut upload, n, body).await?;
        }
    } else {
        let adds = parts.into_iter().map(|(n, body)| {
            let input = upload.add_input(n, body);
            async move { (n, backend.multipart_blob_add(input).await) }
        });
        for (n, out) in join_all(adds).await {
            let out = out.with_context(|| format!("parallel multipart_blob_add part {n}"))?;
            upload.record_part(n, out.part_id);
        }
    }

    backend
        .multipart_blob_commit(&upload)
        .await
        .context("multipart_blob_commit")?;

    let body = read(backend, &key).await?;
    let expected = [first, second, tail].concat();
    ensure!(
        body.len() == expected.len(),
        "committed size {} expected {}",
        body.len(),
        expected.len()
    );
    ensure!(body == expected, "committed bytes are not in part order");
    Ok(())
}

/// Commit with a gap fails and leaves the upload abortable
pub async fn multipart_missing_part(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let key = format!("{scope}gap");
    let mut upload = begin(backend, &key).await?;
    add_part(backend, &mut upload, 2, b"second".to_vec()).await?;

    match backend.multipart_blob_commit(&upload).await {
        Err(err) if err.is_protocol_violation() || matches!(err, Error::InvalidArgument(_)) => {}
        Err(err) => bail!("commit with a missing part failed with unexpected {err}"),
        Ok(_) => bail!("commit with a missing part succeeded"),
    }

    backend
        .multipart_blob_abort(&upload)
        .await
        .context("abort after rejected commit")?;
    match backend.head_blob(HeadBlobInput::new(&key)).await {
        Err(Error::NotFound(_)) => Ok(()),
        Err(err) => Err(anyhow!(err).context("head_blob after rejected commit")),
        Ok(_) => bail!("rejected commit produced a blob"),
    }
}

/// Re-adding a part number replaces the earlier content
pub async fn multipart_re_add(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let key = format!("{scope}retried");
    let mut upload = begin(backend, &key).await?;
    add_part(backend, &mut upload, 1, b"first attempt".to_vec()).await?;
    add_part(backend, &mut upload, 1, b"second attempt".to_vec()).await?;

    backend
        .multipart_blob_commit(&upload)
        .await
        .context("multipart_blob_commit")?;
    let body = read(backend, &key).await?;
    ensure!(
        body == b"second attempt",
        "re-added part not authoritative: {:?}",
        String::from_utf8_lossy(&body)
    );
    Ok(())
}

/// A part copied from a range of another blob
pub async fn multipart_copy(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let source = format!("{scope}source");
    let key = format!("{scope}copied");
    put(backend, &source, b"0123456789").await?;

    let mut upload = begin(backend, &key).await?;
    let out = backend
        .multipart_blob_copy(upload.copy_input(1, &source, 2, 5))
        .await
        .context("multipart_blob_copy")?;
    upload.record_part(1, out.part_id);
    backend
        .multipart_blob_commit(&upload)
        .await
        .context("multipart_blob_commit")?;

    let body = read(backend, &key).await?;
    ensure!(body == b"23456", "copied part holds {:?}", String::from_utf8_lossy(&body));
    Ok(())
}

/// The second abort of an upload fails
pub async fn multipart_double_abort(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let upload = begin(backend, &format!("{scope}aborted")).await?;
    backend
        .multipart_blob_abort(&upload)
        .await
        .context("first abort")?;
    ensure!(
        backend.multipart_blob_abort(&upload).await.is_err(),
        "second abort succeeded"
    );
    Ok(())
}

/// Abort after a successful commit fails and keeps the blob
pub async fn multipart_abort_after_commit(
    backend: &dyn StorageBackend,
    scope: &str,
) -> anyhow::Result<()> {
    let key = format!("{scope}committed");
    let mut upload = begin(backend, &key).await?;
    add_part(backend, &mut upload, 1, b"done".to_vec()).await?;
    backend
        .multipart_blob_commit(&upload)
        .await
        .context("multipart_blob_commit")?;

    ensure!(
        backend.multipart_blob_abort(&upload).await.is_err(),
        "abort after commit succeeded"
    );
    ensure!(read(backend, &key).await? == b"done", "abort changed the committed blob");
    Ok(())
}

/// Expire with a zero threshold reclaims uploads under the prefix only
pub async fn multipart_expire(backend: &dyn StorageBackend, scope: &str) -> anyhow::Result<()> {
    let inside = begin(backend, &format!("{scope}inside/stale")).await?;
    let outside = begin(backend, &format!("{scope}outside/stale")).await?;

    let out = backend
        .multipart_expire(MultipartExpireInput {
            older_than: Some(Duration::ZERO),
            prefix: Some(format!("{scope}inside/")),
        })
        .await
        .context("multipart_expire")?;
    ensure!(
        out.expired.contains(&inside.upload_id),
        "upload {} under the prefix was not expired: {:?}",
        inside.upload_id,
        out.expired
    );
    ensure!(
        !out.expired.contains(&outside.upload_id),
        "upload outside the prefix was expired"
    );
    ensure!(
        backend.multipart_blob_abort(&inside).await.is_err(),
        "expired upload could still be aborted"
    );

    backend
        .multipart_blob_abort(&outside)
        .await
        .context("abort of upload outside the sweep")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    #[test]
    fn test_check_names_roundtrip() {
        for check in Check::ALL {
            assert_eq!(check.name().parse::<Check>().unwrap(), check);
        }
        assert!("no-such-check".parse::<Check>().is_err());
    }

    #[tokio::test]
    async fn test_report_captures_failure() {
        let backend = MemoryBackend::without_bucket("missing");
        let report = Suite::new("t/").run(&backend, Check::PutGet).await;
        assert!(!report.passed());
        assert!(report.failure.unwrap().contains("put_blob"));
    }

    #[tokio::test]
    async fn test_init_check_needs_bound_bucket() {
        let backend = MemoryBackend::new("b");

        let report = Suite::new("t/").with_bucket("b").run(&backend, Check::Init).await;
        assert!(report.passed(), "{:?}", report.failure);

        let report = Suite::new("t/").with_bucket("other").run(&backend, Check::Init).await;
        assert!(report.failure.unwrap().contains("init other"));

        let report = Suite::new("t/").run(&backend, Check::Init).await;
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_init_check_fails_on_missing_bucket() {
        let backend = MemoryBackend::without_bucket("b");
        let report = Suite::new("t/").with_bucket("b").run(&backend, Check::Init).await;
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_run_cleans_scope() {
        let backend = MemoryBackend::new("b");
        let report = Suite::new("t/")
            .with_part_size(8)
            .run(&backend, Check::ListRestartable)
            .await;
        assert!(report.passed(), "{:?}", report.failure);

        let left = backend
            .list_blobs(ListBlobsInput::prefix("t/"))
            .await
            .unwrap();
        assert!(left.items.is_empty());
        assert_eq!(backend.pending_uploads().await, 0);
    }
}
