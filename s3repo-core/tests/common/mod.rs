#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use s3repo_core::contract::{IndexBuilder, ObjectStore, ObjectSummary, StoreError};
use s3repo_core::RebuildError;
use walkdir::WalkDir;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    List,
    Get,
    Put,
    Delete,
}

/// One store call, stamped with a logical clock at start and finish.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub op: StoreOp,
    pub key: String,
    pub started: u64,
    pub finished: u64,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub last_modified: DateTime<Utc>,
}

/// In-memory object store that records every call.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    events: Mutex<Vec<StoreEvent>>,
    failing_gets: Mutex<BTreeSet<String>>,
    failing_puts: Mutex<BTreeSet<String>>,
    failing_deletes: Mutex<BTreeSet<String>>,
    clock: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>, modified: i64) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.into(),
                last_modified: at(modified),
            },
        );
    }

    pub fn fail_get(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_put(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn body(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.body.clone())
    }

    /// Key → body for a bucket; ignores modification times.
    pub fn contents(&self, bucket: &str) -> BTreeMap<String, Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, _), _)| b == bucket)
            .map(|((_, k), o)| (k.clone(), o.body.clone()))
            .collect()
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of(&self, op: StoreOp) -> Vec<StoreEvent> {
        self.events().into_iter().filter(|e| e.op == op).collect()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst)
    }

    fn record(&self, op: StoreOp, key: &str, started: u64) {
        let finished = self.tick();
        self.events.lock().unwrap().push(StoreEvent {
            op,
            key: key.to_string(),
            started,
            finished,
        });
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>, StoreError> {
        let started = self.tick();
        let listed = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), o)| ObjectSummary {
                key: k.clone(),
                last_modified: o.last_modified,
            })
            .collect();
        self.record(StoreOp::List, prefix, started);
        Ok(listed)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<(), StoreError> {
        let started = self.tick();
        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(format!("connection reset while reading {key}").into());
        }
        let body = self
            .body(bucket, key)
            .ok_or_else(|| format!("NoSuchKey: {key}"))?;
        tokio::task::yield_now().await;
        tokio::fs::write(destination, body).await?;
        self.record(StoreOp::Get, key, started);
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
    ) -> Result<(), StoreError> {
        let started = self.tick();
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(format!("access denied writing {key}").into());
        }
        let body = tokio::fs::read(source).await?;
        tokio::task::yield_now().await;
        let modified = 1_000_000 + started as i64;
        self.insert(bucket, key, body, modified);
        self.record(StoreOp::Put, key, started);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let started = self.tick();
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(format!("access denied deleting {key}").into());
        }
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        self.record(StoreOp::Delete, key, started);
        Ok(())
    }
}

/// Checksum-style prefix for a metadata file, as `createrepo_c` names them.
fn checksum(generation: &str, hrefs: &[String]) -> String {
    let mut hasher = DefaultHasher::new();
    generation.hash(&mut hasher);
    hrefs.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Repository index files declaring `hrefs`: `repodata/repomd.xml` and a checksum-named
/// gzipped primary file. Different generations produce different primary file names.
pub fn index_files(hrefs: &[String], generation: &str) -> Vec<(String, Vec<u8>)> {
    let primary_path = format!("repodata/{}-primary.xml.gz", checksum(generation, hrefs));
    let repomd = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo">
  <data type="primary">
    <location href="{primary_path}"/>
  </data>
</repomd>
"#
    );
    let mut primary = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata packages=\"{}\">\n",
        hrefs.len()
    );
    for href in hrefs {
        primary.push_str(&format!(
            "  <package type=\"rpm\"><location href=\"{href}\"/></package>\n"
        ));
    }
    primary.push_str("</metadata>\n");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(primary.as_bytes()).unwrap();
    vec![
        ("repodata/repomd.xml".to_string(), repomd.into_bytes()),
        (primary_path, encoder.finish().unwrap()),
    ]
}

fn location_hrefs(xml: &str) -> Vec<String> {
    xml.split("<location href=\"")
        .skip(1)
        .map(|rest| rest.split('"').next().unwrap().to_string())
        .collect()
}

/// Package hrefs declared by an index, reading files through `read` (repository-relative).
pub fn declared_files(read: impl Fn(&str) -> Option<Vec<u8>>) -> Vec<String> {
    let repomd = String::from_utf8(read("repodata/repomd.xml").expect("repomd.xml")).unwrap();
    let primary_path = location_hrefs(&repomd).remove(0);
    let primary_gz = read(&primary_path).expect("primary metadata");
    let mut primary = String::new();
    GzDecoder::new(primary_gz.as_slice())
        .read_to_string(&mut primary)
        .unwrap();
    location_hrefs(&primary)
}

/// Package hrefs declared by the index published under `prefix` (`"folder/"` or `""`).
pub fn published_declarations(store: &MemoryStore, bucket: &str, prefix: &str) -> Vec<String> {
    declared_files(|path| store.body(bucket, &format!("{prefix}{path}")))
}

/// Full store key of the primary metadata file the published index points at.
pub fn published_primary_key(store: &MemoryStore, bucket: &str, prefix: &str) -> String {
    let repomd = store
        .body(bucket, &format!("{prefix}repodata/repomd.xml"))
        .expect("published repomd.xml");
    let href = location_hrefs(&String::from_utf8(repomd).unwrap()).remove(0);
    format!("{prefix}{href}")
}

/// Package hrefs declared by the index staged at `root`.
pub fn staged_declarations(root: &Path) -> Vec<String> {
    declared_files(|path| fs::read(root.join(path)).ok())
}

/// Seed `bucket` with a consistent repository under `folder` (empty = bucket root).
pub fn seed_repository(store: &MemoryStore, bucket: &str, folder: &str, packages: &[(&str, i64)]) {
    let prefix = if folder.is_empty() {
        String::new()
    } else {
        format!("{folder}/")
    };
    let hrefs: Vec<String> = packages.iter().map(|(name, _)| name.to_string()).collect();
    for (name, modified) in packages {
        store.insert(bucket, &format!("{prefix}{name}"), format!("rpm:{name}"), *modified);
    }
    for (path, body) in index_files(&hrefs, "seeded") {
        store.insert(bucket, &format!("{prefix}{path}"), body, 1);
    }
}

/// Stand-in for `createrepo`: replaces `repodata/` with an index of every `.rpm` below the
/// directory.
pub struct FakeCreaterepo {
    pub calls: AtomicUsize,
    generation: String,
}

impl Default for FakeCreaterepo {
    fn default() -> Self {
        FakeCreaterepo::new("rebuilt")
    }
}

impl FakeCreaterepo {
    pub fn new(generation: &str) -> Self {
        FakeCreaterepo {
            calls: AtomicUsize::new(0),
            generation: generation.to_string(),
        }
    }
}

impl IndexBuilder for FakeCreaterepo {
    fn build(&self, directory: &Path) -> Result<(), RebuildError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let repodata = directory.join("repodata");
        if repodata.exists() {
            fs::remove_dir_all(&repodata).unwrap();
        }
        let mut hrefs: Vec<String> = WalkDir::new(directory)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "rpm"))
            .map(|e| {
                e.path()
                    .strip_prefix(directory)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        hrefs.sort();
        for (path, body) in index_files(&hrefs, &self.generation) {
            let target = directory.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, body).unwrap();
        }
        Ok(())
    }
}

impl IndexBuilder for &FakeCreaterepo {
    fn build(&self, directory: &Path) -> Result<(), RebuildError> {
        (**self).build(directory)
    }
}
