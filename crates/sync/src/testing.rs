//! In-memory remote for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use emdash_protocol::{BinaryDescriptor, ContextId, Record, RecordRef};
use tokio::io::AsyncWriteExt;

use crate::error::SyncError;
use crate::remote::{BinaryWriter, RecordApi, RemoteFuture, SessionProvider, UploadBinary};
use crate::session::{Credentials, Session};

/// Mock database that records the calls it receives.
#[derive(Default)]
pub(crate) struct MockRemote {
    logins: AtomicU32,
    failing_logins: AtomicU32,
    expire_next: AtomicU32,
    next_record: AtomicUsize,
    children: Mutex<HashMap<RecordRef, Vec<RecordRef>>>,
    children_failures: Mutex<HashMap<RecordRef, SyncError>>,
    binaries: Mutex<HashMap<RecordRef, Vec<BinaryDescriptor>>>,
    contents: Mutex<HashMap<RecordRef, Vec<u8>>>,
    download_failures: Mutex<HashMap<RecordRef, VecDeque<SyncError>>>,
    find_failures: Mutex<VecDeque<SyncError>>,
    upload_failures: Mutex<VecDeque<SyncError>>,
    records: Mutex<HashMap<RecordRef, Record>>,
    children_calls: Mutex<Vec<RecordRef>>,
    find_calls: Mutex<Vec<Vec<RecordRef>>>,
    uploads: Mutex<Vec<UploadBinary>>,
}

impl MockRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session(self: &Arc<Self>) -> Session {
        Session::new(self.clone(), Credentials::new("tester", "secret"))
    }

    pub(crate) async fn logged_in_session(self: &Arc<Self>) -> Arc<Session> {
        let session = self.session();
        session.login().await.unwrap();
        Arc::new(session)
    }

    pub(crate) fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_logins(&self, n: u32) {
        self.failing_logins.store(n, Ordering::SeqCst);
    }

    /// The next `n` remote calls answer with an expired-context error.
    pub(crate) fn expire_next(&self, n: u32) {
        self.expire_next.store(n, Ordering::SeqCst);
    }

    pub(crate) fn link(&self, parent: &str, children: &[&str]) {
        self.children.lock().unwrap().insert(
            RecordRef::from(parent),
            children.iter().map(|c| RecordRef::from(*c)).collect(),
        );
    }

    pub(crate) fn fail_children(&self, record: &str, err: SyncError) {
        self.children_failures
            .lock()
            .unwrap()
            .insert(RecordRef::from(record), err);
    }

    pub(crate) fn attach(&self, record: &str, name: &str, filename: &str, content: &[u8]) {
        let descriptor = BinaryDescriptor {
            name: RecordRef::from(name),
            filename: filename.to_string(),
            record: RecordRef::from(record),
            filesize: Some(content.len() as u64),
            md5: None,
        };
        self.binaries
            .lock()
            .unwrap()
            .entry(RecordRef::from(record))
            .or_default()
            .push(descriptor);
        self.contents
            .lock()
            .unwrap()
            .insert(RecordRef::from(name), content.to_vec());
    }

    pub(crate) fn fail_download(&self, name: &str, errors: Vec<SyncError>) {
        self.download_failures
            .lock()
            .unwrap()
            .insert(RecordRef::from(name), errors.into());
    }

    pub(crate) fn fail_next_find(&self, err: SyncError) {
        self.find_failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn fail_next_upload(&self, err: SyncError) {
        self.upload_failures.lock().unwrap().push_back(err);
    }

    pub(crate) fn add_record(&self, record: Record) {
        self.records
            .lock()
            .unwrap()
            .insert(record.name.clone(), record);
    }

    pub(crate) fn children_calls(&self) -> Vec<RecordRef> {
        self.children_calls.lock().unwrap().clone()
    }

    pub(crate) fn find_calls(&self) -> Vec<Vec<RecordRef>> {
        self.find_calls.lock().unwrap().clone()
    }

    pub(crate) fn uploads(&self) -> Vec<UploadBinary> {
        self.uploads.lock().unwrap().clone()
    }

    pub(crate) fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn take_expiry(&self) -> Result<(), SyncError> {
        let expired = self
            .expire_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if expired {
            Err(SyncError::auth_expired("context expired"))
        } else {
            Ok(())
        }
    }
}

impl SessionProvider for MockRemote {
    fn login<'a>(&'a self, _username: &'a str, _password: &'a str) -> RemoteFuture<'a, ContextId> {
        Box::pin(async move {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            let failing = self
                .failing_logins
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(SyncError::transient("connection refused"));
            }
            Ok(ContextId::new(format!("ctx-{n}")))
        })
    }
}

impl RecordApi for MockRemote {
    fn get_record<'a>(
        &'a self,
        _ctx: &'a ContextId,
        name: &'a RecordRef,
    ) -> RemoteFuture<'a, Record> {
        Box::pin(async move {
            self.take_expiry()?;
            self.records
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| SyncError::not_found(format!("record {name}")))
        })
    }

    fn children<'a>(
        &'a self,
        _ctx: &'a ContextId,
        name: &'a RecordRef,
        _depth: i32,
    ) -> RemoteFuture<'a, Vec<RecordRef>> {
        Box::pin(async move {
            self.take_expiry()?;
            self.children_calls.lock().unwrap().push(name.clone());
            if let Some(err) = self.children_failures.lock().unwrap().get(name) {
                return Err(err.clone());
            }
            Ok(self
                .children
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn find_binaries<'a>(
        &'a self,
        _ctx: &'a ContextId,
        records: &'a [RecordRef],
        _limit: u32,
    ) -> RemoteFuture<'a, Vec<BinaryDescriptor>> {
        Box::pin(async move {
            self.take_expiry()?;
            self.find_calls.lock().unwrap().push(records.to_vec());
            if let Some(err) = self.find_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            let binaries = self.binaries.lock().unwrap();
            Ok(records
                .iter()
                .filter_map(|r| binaries.get(r))
                .flatten()
                .cloned()
                .collect())
        })
    }

    fn download_binary<'a>(
        &'a self,
        _ctx: &'a ContextId,
        descriptor: &'a BinaryDescriptor,
        writer: &'a mut BinaryWriter,
    ) -> RemoteFuture<'a, u64> {
        Box::pin(async move {
            self.take_expiry()?;
            let failure = self
                .download_failures
                .lock()
                .unwrap()
                .get_mut(&descriptor.name)
                .and_then(|queue| queue.pop_front());
            if let Some(err) = failure {
                // Leave some bytes behind so retries must start from scratch.
                let _ = writer.write_all(b"partial").await;
                return Err(err);
            }
            let content = self
                .contents
                .lock()
                .unwrap()
                .get(&descriptor.name)
                .cloned()
                .ok_or_else(|| SyncError::not_found(format!("binary {}", descriptor.name)))?;
            writer.write_all(&content).await?;
            writer.flush().await?;
            Ok(content.len() as u64)
        })
    }

    fn upload_binary<'a>(
        &'a self,
        _ctx: &'a ContextId,
        upload: &'a UploadBinary,
    ) -> RemoteFuture<'a, Record> {
        Box::pin(async move {
            self.take_expiry()?;
            if let Some(err) = self.upload_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.uploads.lock().unwrap().push(upload.clone());
            let name = match &upload.rectype {
                Some(_) => {
                    let n = self.next_record.fetch_add(1, Ordering::SeqCst) + 1;
                    RecordRef::new(format!("r.{n}"))
                }
                None => upload.target.clone(),
            };
            Ok(Record {
                name,
                rectype: upload.rectype.clone().unwrap_or_default(),
                parents: vec![upload.target.clone()],
                groups: Vec::new(),
                permissions: Vec::new(),
                extra: Default::default(),
            })
        })
    }
}
