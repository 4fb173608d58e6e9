//! Test double for storage backends
//!
//! [`TestBackend`] sits where a real backend would and forwards to an
//! optional wrapped backend. Tests can replace individual operations with
//! override functions and inject a blanket error. For every operation the
//! order is:
//!
//! 1. the override for that operation, if set
//! 2. the injected error, if set
//! 3. the wrapped backend
//! 4. the backend-absent fallback
//!
//! `init` and `capabilities` are never overridden or failed by injection.
//! Without a wrapped backend `init` succeeds and `capabilities` returns a
//! cached default descriptor.
//!
//! Operations hold a shared lock on the override state for the whole call,
//! including delegation; setters take the exclusive lock. Override functions
//! run under the shared lock and must not call the setters of the same
//! double.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{Error, Result};
use crate::multipart::MultipartUpload;
use crate::traits::{Capabilities, StorageBackend};
use crate::types::*;

/// Replacement for an operation taking its input by value
pub type OverrideFn<I, O> = Arc<dyn Fn(I) -> Result<O> + Send + Sync>;

/// Replacement for commit or abort, which borrow the upload handle
pub type UploadOverrideFn<O> = Arc<dyn Fn(&MultipartUpload) -> Result<O> + Send + Sync>;

/// Per-operation override functions
#[derive(Clone, Default)]
pub struct Overrides {
    pub head_blob: Option<OverrideFn<HeadBlobInput, HeadBlobOutput>>,
    pub list_blobs: Option<OverrideFn<ListBlobsInput, ListBlobsOutput>>,
    pub delete_blob: Option<OverrideFn<DeleteBlobInput, DeleteBlobOutput>>,
    pub delete_blobs: Option<OverrideFn<DeleteBlobsInput, DeleteBlobsOutput>>,
    pub rename_blob: Option<OverrideFn<RenameBlobInput, RenameBlobOutput>>,
    pub copy_blob: Option<OverrideFn<CopyBlobInput, CopyBlobOutput>>,
    pub get_blob: Option<OverrideFn<GetBlobInput, GetBlobOutput>>,
    pub put_blob: Option<OverrideFn<PutBlobInput, PutBlobOutput>>,
    pub multipart_blob_begin: Option<OverrideFn<MultipartBlobBeginInput, MultipartUpload>>,
    pub multipart_blob_add: Option<OverrideFn<MultipartBlobAddInput, MultipartBlobAddOutput>>,
    pub multipart_blob_copy: Option<OverrideFn<MultipartBlobCopyInput, MultipartBlobCopyOutput>>,
    pub multipart_blob_abort: Option<UploadOverrideFn<MultipartBlobAbortOutput>>,
    pub multipart_blob_commit: Option<UploadOverrideFn<MultipartBlobCommitOutput>>,
    pub multipart_expire: Option<OverrideFn<MultipartExpireInput, MultipartExpireOutput>>,
    pub make_bucket: Option<OverrideFn<MakeBucketInput, MakeBucketOutput>>,
    pub remove_bucket: Option<OverrideFn<RemoveBucketInput, RemoveBucketOutput>>,
}

impl Overrides {
    /// Names of the operations that currently have an override
    pub fn configured(&self) -> Vec<&'static str> {
        [
            ("head_blob", self.head_blob.is_some()),
            ("list_blobs", self.list_blobs.is_some()),
            ("delete_blob", self.delete_blob.is_some()),
            ("delete_blobs", self.delete_blobs.is_some()),
            ("rename_blob", self.rename_blob.is_some()),
            ("copy_blob", self.copy_blob.is_some()),
            ("get_blob", self.get_blob.is_some()),
            ("put_blob", self.put_blob.is_some()),
            ("multipart_blob_begin", self.multipart_blob_begin.is_some()),
            ("multipart_blob_add", self.multipart_blob_add.is_some()),
            ("multipart_blob_copy", self.multipart_blob_copy.is_some()),
            ("multipart_blob_abort", self.multipart_blob_abort.is_some()),
            ("multipart_blob_commit", self.multipart_blob_commit.is_some()),
            ("multipart_expire", self.multipart_expire.is_some()),
            ("make_bucket", self.make_bucket.is_some()),
            ("remove_bucket", self.remove_bucket.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}

impl std::fmt::Debug for Overrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.configured()).finish()
    }
}

/// Everything a [`TestBackend`] starts with
#[derive(Clone, Default)]
pub struct TestBackendInit {
    /// Backend to delegate to; `None` makes the double standalone
    pub backend: Option<Arc<dyn StorageBackend>>,

    pub overrides: Overrides,

    /// Descriptor returned by a standalone double
    pub capabilities: Option<Capabilities>,

    /// Error returned by every non-overridden operation
    pub err: Option<Error>,
}

#[derive(Debug, Default)]
struct OverrideState {
    overrides: Overrides,
    err: Option<Error>,
    capabilities: Option<Capabilities>,
}

/// Storage backend decorator with overrides and error injection
pub struct TestBackend {
    backend: Option<Arc<dyn StorageBackend>>,
    state: RwLock<OverrideState>,
}

impl TestBackend {
    /// Create a test double from an initializer bundle
    pub fn new(init: TestBackendInit) -> Self {
        Self {
            backend: init.backend,
            state: RwLock::new(OverrideState {
                overrides: init.overrides,
                err: init.err,
                capabilities: init.capabilities,
            }),
        }
    }

    /// Double without a wrapped backend
    pub fn standalone() -> Self {
        Self::new(TestBackendInit::default())
    }

    /// Double that delegates everything to `backend` until told otherwise
    pub fn wrap(backend: Arc<dyn StorageBackend>) -> Self {
        Self::new(TestBackendInit {
            backend: Some(backend),
            ..Default::default()
        })
    }

    /// Set or clear the injected error
    pub async fn set_err(&self, err: Option<Error>) {
        self.state.write().await.err = err;
    }

    /// Replace all override functions
    pub async fn set_overrides(&self, overrides: Overrides) {
        self.state.write().await.overrides = overrides;
    }

    /// Edit the override functions in place
    pub async fn update_overrides(&self, edit: impl FnOnce(&mut Overrides)) {
        edit(&mut self.state.write().await.overrides);
    }

    /// The wrapped backend, if any
    pub fn inner(&self) -> Option<&Arc<dyn StorageBackend>> {
        self.backend.as_ref()
    }

    async fn dispatch<I, O, Fut>(
        &self,
        op: &'static str,
        input: I,
        select: fn(&Overrides) -> Option<&OverrideFn<I, O>>,
        delegate: impl FnOnce(Arc<dyn StorageBackend>, I) -> Fut,
    ) -> Result<O>
    where
        Fut: Future<Output = Result<O>>,
    {
        let state = self.state.read().await;
        if let Some(replacement) = select(&state.overrides) {
            trace!(op, "override");
            return replacement(input);
        }
        if let Some(err) = &state.err {
            trace!(op, %err, "injected error");
            return Err(err.clone());
        }
        let backend = self.backend.clone().ok_or(Error::NoBackend(op))?;
        delegate(backend, input).await
    }

    async fn dispatch_upload<O, Fut>(
        &self,
        op: &'static str,
        upload: &MultipartUpload,
        select: fn(&Overrides) -> Option<&UploadOverrideFn<O>>,
        delegate: impl FnOnce(Arc<dyn StorageBackend>) -> Fut,
    ) -> Result<O>
    where
        Fut: Future<Output = Result<O>>,
    {
        let state = self.state.read().await;
        if let Some(replacement) = select(&state.overrides) {
            trace!(op, upload_id = %upload.upload_id, "override");
            return replacement(upload);
        }
        if let Some(err) = &state.err {
            trace!(op, %err, "injected error");
            return Err(err.clone());
        }
        let backend = self.backend.clone().ok_or(Error::NoBackend(op))?;
        delegate(backend).await
    }
}

#[async_trait]
impl StorageBackend for TestBackend {
    async fn init(&self, bucket: &str) -> Result<()> {
        let _state = self.state.read().await;
        match &self.backend {
            Some(backend) => backend.init(bucket).await,
            None => Ok(()),
        }
    }

    async fn capabilities(&self) -> Result<Capabilities> {
        {
            let state = self.state.read().await;
            if let Some(backend) = &self.backend {
                return backend.capabilities().await;
            }
            if let Some(caps) = &state.capabilities {
                return Ok(caps.clone());
            }
        }

        // First standalone call fills the cache under the write lock
        let mut state = self.state.write().await;
        Ok(state
            .capabilities
            .get_or_insert_with(Capabilities::default)
            .clone())
    }

    async fn head_blob(&self, input: HeadBlobInput) -> Result<HeadBlobOutput> {
        self.dispatch(
            "head_blob",
            input,
            |o| o.head_blob.as_ref(),
            |b, i| async move { b.head_blob(i).await },
        )
        .await
    }

    async fn list_blobs(&self, input: ListBlobsInput) -> Result<ListBlobsOutput> {
        self.dispatch(
            "list_blobs",
            input,
            |o| o.list_blobs.as_ref(),
            |b, i| async move { b.list_blobs(i).await },
        )
        .await
    }

    async fn delete_blob(&self, input: DeleteBlobInput) -> Result<DeleteBlobOutput> {
        self.dispatch(
            "delete_blob",
            input,
            |o| o.delete_blob.as_ref(),
            |b, i| async move { b.delete_blob(i).await },
        )
        .await
    }

    async fn delete_blobs(&self, input: DeleteBlobsInput) -> Result<DeleteBlobsOutput> {
        self.dispatch(
            "delete_blobs",
            input,
            |o| o.delete_blobs.as_ref(),
            |b, i| async move { b.delete_blobs(i).await },
        )
        .await
    }

    async fn rename_blob(&self, input: RenameBlobInput) -> Result<RenameBlobOutput> {
        self.dispatch(
            "rename_blob",
            input,
            |o| o.rename_blob.as_ref(),
            |b, i| async move { b.rename_blob(i).await },
        )
        .await
    }

    async fn copy_blob(&self, input: CopyBlobInput) -> Result<CopyBlobOutput> {
        self.dispatch(
            "copy_blob",
            input,
            |o| o.copy_blob.as_ref(),
            |b, i| async move { b.copy_blob(i).await },
        )
        .await
    }

    async fn get_blob(&self, input: GetBlobInput) -> Result<GetBlobOutput> {
        self.dispatch(
            "get_blob",
            input,
            |o| o.get_blob.as_ref(),
            |b, i| async move { b.get_blob(i).await },
        )
        .await
    }

    async fn put_blob(&self, input: PutBlobInput) -> Result<PutBlobOutput> {
        self.dispatch(
            "put_blob",
            input,
            |o| o.put_blob.as_ref(),
            |b, i| async move { b.put_blob(i).await },
        )
        .await
    }

    async fn multipart_blob_begin(
        &self,
        input: MultipartBlobBeginInput,
    ) -> Result<MultipartUpload> {
        self.dispatch(
            "multipart_blob_begin",
            input,
            |o| o.multipart_blob_begin.as_ref(),
            |b, i| async move { b.multipart_blob_begin(i).await },
        )
        .await
    }

    async fn multipart_blob_add(
        &self,
        input: MultipartBlobAddInput,
    ) -> Result<MultipartBlobAddOutput> {
        self.dispatch(
            "multipart_blob_add",
            input,
            |o| o.multipart_blob_add.as_ref(),
            |b, i| async move { b.multipart_blob_add(i).await },
        )
        .await
    }

    async fn multipart_blob_copy(
        &self,
        input: MultipartBlobCopyInput,
    ) -> Result<MultipartBlobCopyOutput> {
        self.dispatch(
            "multipart_blob_copy",
            input,
            |o| o.multipart_blob_copy.as_ref(),
            |b, i| async move { b.multipart_blob_copy(i).await },
        )
        .await
    }

    async fn multipart_blob_abort(
        &self,
        upload: &MultipartUpload,
    ) -> Result<MultipartBlobAbortOutput> {
        self.dispatch_upload(
            "multipart_blob_abort",
            upload,
            |o| o.multipart_blob_abort.as_ref(),
            |b| async move { b.multipart_blob_abort(upload).await },
        )
        .await
    }

    async fn multipart_blob_commit(
        &self,
        upload: &MultipartUpload,
    ) -> Result<MultipartBlobCommitOutput> {
        self.dispatch_upload(
            "multipart_blob_commit",
            upload,
            |o| o.multipart_blob_commit.as_ref(),
            |b| async move { b.multipart_blob_commit(upload).await },
        )
        .await
    }

    async fn multipart_expire(&self, input: MultipartExpireInput) -> Result<MultipartExpireOutput> {
        self.dispatch(
            "multipart_expire",
            input,
            |o| o.multipart_expire.as_ref(),
            |b, i| async move { b.multipart_expire(i).await },
        )
        .await
    }

    async fn make_bucket(&self, input: MakeBucketInput) -> Result<MakeBucketOutput> {
        self.dispatch(
            "make_bucket",
            input,
            |o| o.make_bucket.as_ref(),
            |b, i| async move { b.make_bucket(i).await },
        )
        .await
    }

    async fn remove_bucket(&self, input: RemoveBucketInput) -> Result<RemoveBucketOutput> {
        self.dispatch(
            "remove_bucket",
            input,
            |o| o.remove_bucket.as_ref(),
            |b, i| async move { b.remove_bucket(i).await },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::traits::MockStorageBackend;

    fn fixed_head() -> HeadBlobOutput {
        HeadBlobOutput {
            item: BlobItem::new("fixed", 42),
            request_id: "override".into(),
            ..Default::default()
        }
    }

    /// Wrapped backend that fails the test if any data operation reaches it
    fn silent_mock() -> MockStorageBackend {
        let mut mock = MockStorageBackend::new();
        mock.expect_head_blob().never();
        mock.expect_list_blobs().never();
        mock.expect_delete_blob().never();
        mock.expect_delete_blobs().never();
        mock.expect_rename_blob().never();
        mock.expect_copy_blob().never();
        mock.expect_get_blob().never();
        mock.expect_put_blob().never();
        mock.expect_multipart_blob_begin().never();
        mock.expect_multipart_blob_add().never();
        mock.expect_multipart_blob_copy().never();
        mock.expect_multipart_blob_abort().never();
        mock.expect_multipart_blob_commit().never();
        mock.expect_multipart_expire().never();
        mock.expect_make_bucket().never();
        mock.expect_remove_bucket().never();
        mock
    }

    /// Call every overridable operation once; Ok carries the request id
    /// (the upload id for begin)
    async fn call_every_op(backend: &dyn StorageBackend) -> Vec<(&'static str, Result<String>)> {
        let upload = MultipartUpload::new("u1", "k");
        vec![
            (
                "head_blob",
                backend.head_blob(HeadBlobInput::new("k")).await.map(|o| o.request_id),
            ),
            (
                "list_blobs",
                backend.list_blobs(ListBlobsInput::prefix("p/")).await.map(|o| o.request_id),
            ),
            (
                "delete_blob",
                backend.delete_blob(DeleteBlobInput::new("k")).await.map(|o| o.request_id),
            ),
            (
                "delete_blobs",
                backend
                    .delete_blobs(DeleteBlobsInput { keys: vec!["k".into()] })
                    .await
                    .map(|o| o.request_id),
            ),
            (
                "rename_blob",
                backend
                    .rename_blob(RenameBlobInput {
                        source: "k".into(),
                        destination: "k2".into(),
                    })
                    .await
                    .map(|o| o.request_id),
            ),
            (
                "copy_blob",
                backend
                    .copy_blob(CopyBlobInput {
                        source: "k".into(),
                        destination: "k2".into(),
                        ..Default::default()
                    })
                    .await
                    .map(|o| o.request_id),
            ),
            (
                "get_blob",
                backend.get_blob(GetBlobInput::new("k")).await.map(|o| o.request_id),
            ),
            (
                "put_blob",
                backend
                    .put_blob(PutBlobInput::new("k", b"v".to_vec()))
                    .await
                    .map(|o| o.request_id),
            ),
            (
                "multipart_blob_begin",
                backend
                    .multipart_blob_begin(MultipartBlobBeginInput::new("k"))
                    .await
                    .map(|u| u.upload_id),
            ),
            (
                "multipart_blob_add",
                backend
                    .multipart_blob_add(upload.add_input(1, b"part".to_vec()))
                    .await
                    .map(|o| o.request_id),
            ),
            (
                "multipart_blob_copy",
                backend
                    .multipart_blob_copy(upload.copy_input(2, "src", 0, 4))
                    .await
                    .map(|o| o.request_id),
            ),
            (
                "multipart_blob_abort",
                backend.multipart_blob_abort(&upload).await.map(|o| o.request_id),
            ),
            (
                "multipart_blob_commit",
                backend.multipart_blob_commit(&upload).await.map(|o| o.request_id),
            ),
            (
                "multipart_expire",
                backend
                    .multipart_expire(MultipartExpireInput::default())
                    .await
                    .map(|o| o.request_id),
            ),
            (
                "make_bucket",
                backend.make_bucket(MakeBucketInput {}).await.map(|o| o.request_id),
            ),
            (
                "remove_bucket",
                backend.remove_bucket(RemoveBucketInput {}).await.map(|o| o.request_id),
            ),
        ]
    }

    fn tagged(op: &str) -> String {
        format!("override-{op}")
    }

    /// An override for every operation, each answering with its own tag
    fn tag_every_op() -> Overrides {
        Overrides {
            head_blob: Some(Arc::new(|_: HeadBlobInput| {
                Ok(HeadBlobOutput {
                    request_id: tagged("head_blob"),
                    ..Default::default()
                })
            })),
            list_blobs: Some(Arc::new(|_: ListBlobsInput| {
                Ok(ListBlobsOutput {
                    request_id: tagged("list_blobs"),
                    ..Default::default()
                })
            })),
            delete_blob: Some(Arc::new(|_: DeleteBlobInput| {
                Ok(DeleteBlobOutput {
                    request_id: tagged("delete_blob"),
                })
            })),
            delete_blobs: Some(Arc::new(|_: DeleteBlobsInput| {
                Ok(DeleteBlobsOutput {
                    request_id: tagged("delete_blobs"),
                    ..Default::default()
                })
            })),
            rename_blob: Some(Arc::new(|_: RenameBlobInput| {
                Ok(RenameBlobOutput {
                    request_id: tagged("rename_blob"),
                })
            })),
            copy_blob: Some(Arc::new(|_: CopyBlobInput| {
                Ok(CopyBlobOutput {
                    request_id: tagged("copy_blob"),
                })
            })),
            get_blob: Some(Arc::new(|_: GetBlobInput| {
                Ok(GetBlobOutput {
                    request_id: tagged("get_blob"),
                    ..Default::default()
                })
            })),
            put_blob: Some(Arc::new(|_: PutBlobInput| {
                Ok(PutBlobOutput {
                    request_id: tagged("put_blob"),
                    ..Default::default()
                })
            })),
            multipart_blob_begin: Some(Arc::new(|input: MultipartBlobBeginInput| {
                Ok(MultipartUpload::new(tagged("multipart_blob_begin"), input.key))
            })),
            multipart_blob_add: Some(Arc::new(|_: MultipartBlobAddInput| {
                Ok(MultipartBlobAddOutput {
                    request_id: tagged("multipart_blob_add"),
                    ..Default::default()
                })
            })),
            multipart_blob_copy: Some(Arc::new(|_: MultipartBlobCopyInput| {
                Ok(MultipartBlobCopyOutput {
                    request_id: tagged("multipart_blob_copy"),
                    ..Default::default()
                })
            })),
            multipart_blob_abort: Some(Arc::new(|_: &MultipartUpload| {
                Ok(MultipartBlobAbortOutput {
                    request_id: tagged("multipart_blob_abort"),
                })
            })),
            multipart_blob_commit: Some(Arc::new(|_: &MultipartUpload| {
                Ok(MultipartBlobCommitOutput {
                    request_id: tagged("multipart_blob_commit"),
                    ..Default::default()
                })
            })),
            multipart_expire: Some(Arc::new(|_: MultipartExpireInput| {
                Ok(MultipartExpireOutput {
                    request_id: tagged("multipart_expire"),
                    ..Default::default()
                })
            })),
            make_bucket: Some(Arc::new(|_: MakeBucketInput| {
                Ok(MakeBucketOutput {
                    request_id: tagged("make_bucket"),
                })
            })),
            remove_bucket: Some(Arc::new(|_: RemoveBucketInput| {
                Ok(RemoveBucketOutput {
                    request_id: tagged("remove_bucket"),
                })
            })),
        }
    }

    #[tokio::test]
    async fn test_standalone_init_and_capabilities() {
        let double = TestBackend::standalone();
        assert!(double.init("any-bucket").await.is_ok());

        let first = double.capabilities().await.unwrap();
        assert_eq!(first, Capabilities::new("s3", 5 * 1024 * 1024 * 1024));
        for _ in 0..3 {
            assert_eq!(double.capabilities().await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_standalone_uses_initial_capabilities() {
        let double = TestBackend::new(TestBackendInit {
            capabilities: Some(Capabilities::new("gcs", 1024)),
            ..Default::default()
        });
        assert_eq!(double.capabilities().await.unwrap().name, "gcs");
    }

    #[tokio::test]
    async fn test_standalone_without_override_reports_no_backend() {
        let double = TestBackend::standalone();
        let err = double
            .delete_blob(DeleteBlobInput::new("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoBackend("delete_blob")));
    }

    #[tokio::test]
    async fn test_injected_error_preempts_delegation() {
        let double = TestBackend::new(TestBackendInit {
            backend: Some(Arc::new(silent_mock())),
            ..Default::default()
        });
        double
            .set_err(Some(Error::Network("throttled".into())))
            .await;

        let err = double
            .delete_blob(DeleteBlobInput::new("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(ref m) if m == "throttled"));
    }

    #[tokio::test]
    async fn test_injected_error_reaches_every_operation() {
        let double = TestBackend::wrap(Arc::new(silent_mock()));
        let errors = [
            Error::Network("throttled".into()),
            Error::NotFound("bucket gone".into()),
            Error::NoSuchUpload("u1".into()),
            Error::Auth("expired token".into()),
        ];

        for injected in errors {
            double.set_err(Some(injected.clone())).await;
            let results = call_every_op(&double).await;
            assert_eq!(results.len(), 16);
            for (op, result) in results {
                match result {
                    Err(err) => assert_eq!(err.to_string(), injected.to_string(), "{op}"),
                    Ok(out) => panic!("{op} returned {out} despite injected {injected}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_every_override_beats_injected_error() {
        let double = TestBackend::new(TestBackendInit {
            backend: Some(Arc::new(silent_mock())),
            overrides: tag_every_op(),
            err: Some(Error::Network("down".into())),
            ..Default::default()
        });

        let results = call_every_op(&double).await;
        assert_eq!(results.len(), 16);
        for (op, result) in results {
            assert_eq!(result.unwrap(), tagged(op), "{op}");
        }
        assert_eq!(double.state.read().await.overrides.configured().len(), 16);
    }

    #[tokio::test]
    async fn test_standalone_overrides_cover_every_operation() {
        let double = TestBackend::new(TestBackendInit {
            overrides: tag_every_op(),
            ..Default::default()
        });
        for (op, result) in call_every_op(&double).await {
            assert_eq!(result.unwrap(), tagged(op), "{op}");
        }

        double.set_overrides(Overrides::default()).await;
        for (op, result) in call_every_op(&double).await {
            assert!(matches!(result, Err(Error::NoBackend(name)) if name == op), "{op}");
        }
    }

    #[tokio::test]
    async fn test_override_beats_injected_error() {
        let overrides = Overrides {
            head_blob: Some(Arc::new(|_| Ok(fixed_head()))),
            ..Default::default()
        };
        let double = TestBackend::new(TestBackendInit {
            backend: Some(Arc::new(silent_mock())),
            overrides,
            err: Some(Error::Network("down".into())),
            ..Default::default()
        });

        let out = double.head_blob(HeadBlobInput::new("k")).await.unwrap();
        assert_eq!(out, fixed_head());
    }

    #[tokio::test]
    async fn test_upload_override_beats_injected_error() {
        let overrides = Overrides {
            multipart_blob_commit: Some(Arc::new(|upload: &MultipartUpload| {
                Ok(MultipartBlobCommitOutput {
                    etag: Some(format!("committed-{}", upload.upload_id)),
                    ..Default::default()
                })
            })),
            ..Default::default()
        };
        let double = TestBackend::new(TestBackendInit {
            backend: Some(Arc::new(silent_mock())),
            overrides,
            err: Some(Error::Network("down".into())),
            ..Default::default()
        });

        let upload = MultipartUpload::new("u1", "k");
        let out = double.multipart_blob_commit(&upload).await.unwrap();
        assert_eq!(out.etag.as_deref(), Some("committed-u1"));
    }

    #[tokio::test]
    async fn test_clearing_error_restores_delegation() {
        let mut mock = MockStorageBackend::new();
        mock.expect_delete_blob()
            .times(1)
            .withf(|input| input.key == "k")
            .returning(|_| {
                Ok(DeleteBlobOutput {
                    request_id: "delegated".into(),
                })
            });

        let double = TestBackend::wrap(Arc::new(mock));
        double.set_err(Some(Error::General("boom".into()))).await;
        assert!(double.delete_blob(DeleteBlobInput::new("k")).await.is_err());

        double.set_err(None).await;
        let out = double.delete_blob(DeleteBlobInput::new("k")).await.unwrap();
        assert_eq!(out.request_id, "delegated");
    }

    #[tokio::test]
    async fn test_delegation_error_passes_through() {
        let mut mock = MockStorageBackend::new();
        mock.expect_get_blob()
            .returning(|input| Err(Error::NotFound(input.key)));

        let double = TestBackend::wrap(Arc::new(mock));
        let err = double.get_blob(GetBlobInput::new("gone")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref k) if k == "gone"));
    }

    #[tokio::test]
    async fn test_init_and_capabilities_ignore_injected_error() {
        let mut mock = MockStorageBackend::new();
        mock.expect_init()
            .withf(|bucket| bucket == "b")
            .times(1)
            .returning(|_| Ok(()));
        mock.expect_capabilities()
            .times(1)
            .returning(|| Ok(Capabilities::new("wrapped", 1)));

        let double = TestBackend::new(TestBackendInit {
            backend: Some(Arc::new(mock)),
            err: Some(Error::Network("down".into())),
            ..Default::default()
        });
        assert!(double.init("b").await.is_ok());
        assert_eq!(double.capabilities().await.unwrap().name, "wrapped");
    }

    #[tokio::test]
    async fn test_update_overrides_after_construction() {
        let double = TestBackend::wrap(Arc::new(MemoryBackend::new("test")));
        double
            .update_overrides(|o| {
                o.delete_blobs = Some(Arc::new(|input: DeleteBlobsInput| {
                    Ok(DeleteBlobsOutput {
                        deleted: input.keys,
                        ..Default::default()
                    })
                }))
            })
            .await;

        let out = double
            .delete_blobs(DeleteBlobsInput {
                keys: vec!["never-existed".into()],
            })
            .await
            .unwrap();
        assert!(out.is_complete());
        assert_eq!(
            format!("{:?}", double.state.read().await.overrides),
            "{\"delete_blobs\"}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_while_toggling_error() {
        let memory = Arc::new(MemoryBackend::new("test"));
        memory
            .put_blob(PutBlobInput::new("k", b"v".to_vec()))
            .await
            .unwrap();
        let double = Arc::new(TestBackend::wrap(memory));

        let readers: Vec<_> = (0..16)
            .map(|_| {
                let double = Arc::clone(&double);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        match double.head_blob(HeadBlobInput::new("k")).await {
                            Ok(out) => assert_eq!(out.item.size, 1),
                            Err(err) => {
                                assert!(matches!(err, Error::Network(ref m) if m == "flaky"))
                            }
                        }
                    }
                })
            })
            .collect();

        for i in 0..50 {
            let err = (i % 2 == 0).then(|| Error::Network("flaky".into()));
            double.set_err(err).await;
            tokio::task::yield_now().await;
        }

        for reader in readers {
            reader.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_standalone_capabilities_agree() {
        let double = Arc::new(TestBackend::standalone());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let double = Arc::clone(&double);
                tokio::spawn(async move { double.capabilities().await.unwrap() })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Capabilities::default());
        }
    }
}
