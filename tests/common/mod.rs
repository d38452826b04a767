//! Common test utilities for wopihost integration tests
//!
//! Provides an in-memory storage gateway with the back end's documented
//! compare-and-swap lock semantics, so the lock manager and content
//! transfer can be exercised without a real gateway.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use wopihost::context::{FileReference, User, ViewMode, WopiContext};
use wopihost::storage::{
    FileLock, GatewayCode, GatewayError, StatInfo, StorageGateway, TransferEndpoint, UploadRequest,
};

pub const TEST_STORAGE_TOKEN: &str = "storage-bearer-token";

/// One file held by the mock gateway.
#[derive(Debug, Clone, Default)]
pub struct MockFile {
    pub size: u64,
    pub etag: String,
    pub lock: Option<FileLock>,
    /// Endpoints handed out by initiate-download
    pub download_endpoints: Vec<TransferEndpoint>,
    /// Endpoints handed out by initiate-upload
    pub upload_endpoints: Vec<TransferEndpoint>,
}

#[derive(Default)]
pub struct MockGateway {
    pub files: Mutex<HashMap<String, MockFile>>,
    /// Last upload initiation, for precondition assertions
    pub last_upload: Mutex<Option<UploadRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        MockGateway::default()
    }

    pub fn insert(&self, opaque_id: &str, file: MockFile) {
        self.files
            .lock()
            .unwrap()
            .insert(opaque_id.to_string(), file);
    }

    pub fn current_lock(&self, opaque_id: &str) -> Option<FileLock> {
        self.files
            .lock()
            .unwrap()
            .get(opaque_id)
            .and_then(|f| f.lock.clone())
    }

    fn with_file<T>(
        &self,
        file_ref: &FileReference,
        f: impl FnOnce(&mut MockFile) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let mut files = self.files.lock().unwrap();
        match files.get_mut(&file_ref.opaque_id) {
            Some(file) => f(file),
            None => Err(GatewayError::new(GatewayCode::NotFound, "no such file")),
        }
    }
}

#[async_trait]
impl StorageGateway for MockGateway {
    async fn stat(&self, _token: &str, file: &FileReference) -> Result<StatInfo, GatewayError> {
        let path = format!("/home/{}", file.opaque_id);
        self.with_file(file, |f| {
            Ok(StatInfo {
                lock: f.lock.clone(),
                size: f.size,
                etag: f.etag.clone(),
                mtime: 1_700_000_000,
                path: path.clone(),
                owner: "owner-1".to_string(),
            })
        })
    }

    async fn get_lock(
        &self,
        _token: &str,
        file: &FileReference,
    ) -> Result<Option<FileLock>, GatewayError> {
        self.with_file(file, |f| Ok(f.lock.clone()))
    }

    async fn set_lock(
        &self,
        _token: &str,
        file: &FileReference,
        lock: &FileLock,
    ) -> Result<(), GatewayError> {
        self.with_file(file, |f| match &f.lock {
            Some(_) => Err(GatewayError::new(GatewayCode::Aborted, "file already locked")),
            None => {
                f.lock = Some(lock.clone());
                Ok(())
            }
        })
    }

    async fn refresh_lock(
        &self,
        _token: &str,
        file: &FileReference,
        lock: &FileLock,
        existing_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        self.with_file(file, |f| {
            let current = match &f.lock {
                Some(current) => current.lock_id.clone(),
                None => return Err(GatewayError::new(GatewayCode::Aborted, "file not locked")),
            };
            let expected = existing_id.unwrap_or(&lock.lock_id);
            if current != expected {
                return Err(GatewayError::new(
                    GatewayCode::FailedPrecondition,
                    "lock mismatch",
                ));
            }
            f.lock = Some(lock.clone());
            Ok(())
        })
    }

    async fn unlock(
        &self,
        _token: &str,
        file: &FileReference,
        lock: &FileLock,
    ) -> Result<(), GatewayError> {
        self.with_file(file, |f| match &f.lock {
            None => Err(GatewayError::new(GatewayCode::Aborted, "file not locked")),
            Some(current) if current.lock_id != lock.lock_id => {
                Err(GatewayError::new(GatewayCode::Locked, "held by another"))
            }
            Some(_) => {
                f.lock = None;
                Ok(())
            }
        })
    }

    async fn initiate_download(
        &self,
        _token: &str,
        file: &FileReference,
    ) -> Result<Vec<TransferEndpoint>, GatewayError> {
        self.with_file(file, |f| Ok(f.download_endpoints.clone()))
    }

    async fn initiate_upload(
        &self,
        _token: &str,
        file: &FileReference,
        request: &UploadRequest,
    ) -> Result<Vec<TransferEndpoint>, GatewayError> {
        let endpoints = self.with_file(file, |f| {
            if request.upload_length == 0 {
                // The initiate call alone completes an empty write.
                f.size = 0;
                f.etag = format!("{}+empty", f.etag);
            }
            Ok(f.upload_endpoints.clone())
        })?;
        *self.last_upload.lock().unwrap() = Some(request.clone());
        Ok(endpoints)
    }
}

/// A read-write session context pointing at `opaque_id`.
pub fn test_context(opaque_id: &str) -> WopiContext {
    WopiContext {
        storage_access_token: TEST_STORAGE_TOKEN.to_string(),
        view_only_access_token: None,
        file_reference: FileReference::new("storage-1", "space-a", opaque_id),
        template_reference: None,
        user: Some(User {
            id: "u1".to_string(),
            idp: "https://idp.example.org".to_string(),
            display_name: "Ada Lovelace".to_string(),
        }),
        view_mode: ViewMode::ReadWrite,
        edit_app_url: String::new(),
        view_app_url: String::new(),
    }
}

pub fn simple_endpoint(url: &str, token: &str) -> TransferEndpoint {
    TransferEndpoint {
        protocol: "simple".to_string(),
        endpoint: url.to_string(),
        token: token.to_string(),
    }
}
