// Embedded version-control store
//
// A minimal append-only object model: content-addressed blobs, flat
// trees, commits and a HEAD pointer. Object ids are sha-256 over a
// canonical byte form. Commits apply a delta (upserts + removals) over
// the previous HEAD's tree. Objects are held in memory and written
// through to a durable backend when one is attached; `hydrate` reloads
// them on a cold start.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Object kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Blob => write!(f, "blob"),
            ObjectKind::Tree => write!(f, "tree"),
            ObjectKind::Commit => write!(f, "commit"),
        }
    }
}

/// A raw stored object (also the export form)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObject {
    pub id: String,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

/// Result of a commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub commit_id: String,
    pub tree_id: String,
    /// Paths whose blob changed relative to the parent tree
    pub delta_size: usize,
}

/// Durable rows for the object store
#[async_trait]
pub trait VcsBackend: Send + Sync {
    async fn put_objects(&self, session_id: Uuid, objects: &[RawObject]) -> Result<()>;
    async fn load_objects(&self, session_id: Uuid) -> Result<Vec<RawObject>>;
    async fn set_head(&self, session_id: Uuid, head: &str) -> Result<()>;
    async fn get_head(&self, session_id: Uuid) -> Result<Option<String>>;
}

fn object_id(kind: ObjectKind, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{} {}\0", kind, data.len()).as_bytes());
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn encode_tree(entries: &BTreeMap<String, String>) -> Vec<u8> {
    let mut out = Vec::new();
    for (path, blob_id) in entries {
        out.extend_from_slice(path.as_bytes());
        out.push(0);
        out.extend_from_slice(blob_id.as_bytes());
        out.push(b'\n');
    }
    out
}

fn decode_tree(data: &[u8]) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in data.split(|b| *b == b'\n') {
        if let Some(pos) = line.iter().position(|b| *b == 0) {
            let path = String::from_utf8_lossy(&line[..pos]).into_owned();
            let blob_id = String::from_utf8_lossy(&line[pos + 1..]).into_owned();
            entries.insert(path, blob_id);
        }
    }
    entries
}

#[derive(Debug, Serialize, Deserialize)]
struct CommitData {
    tree: String,
    parent: Option<String>,
    message: String,
    timestamp: String,
}

struct GitStoreInner {
    objects: HashMap<String, RawObject>,
    head: Option<String>,
    initialized: bool,
}

/// Per-session object store with HEAD pointer
pub struct GitStore {
    session_id: Uuid,
    backend: Option<Arc<dyn VcsBackend>>,
    inner: RwLock<GitStoreInner>,
}

impl GitStore {
    pub fn new(session_id: Uuid, backend: Option<Arc<dyn VcsBackend>>) -> Self {
        Self {
            session_id,
            backend,
            inner: RwLock::new(GitStoreInner {
                objects: HashMap::new(),
                head: None,
                initialized: false,
            }),
        }
    }

    /// Idempotent initialization; reloads durable objects when present
    pub async fn init(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.initialized {
            return Ok(());
        }
        if let Some(backend) = &self.backend {
            for object in backend.load_objects(self.session_id).await? {
                inner.objects.insert(object.id.clone(), object);
            }
            inner.head = backend.get_head(self.session_id).await?;
        }
        inner.initialized = true;
        Ok(())
    }

    /// Current HEAD commit id; `None` before the first commit
    pub async fn head(&self) -> Option<String> {
        self.inner.read().await.head.clone()
    }

    /// Files in the HEAD tree as `path -> blob id`
    pub async fn head_tree(&self) -> BTreeMap<String, String> {
        let inner = self.inner.read().await;
        Self::tree_of(&inner, inner.head.as_deref())
    }

    fn tree_of(inner: &GitStoreInner, commit_id: Option<&str>) -> BTreeMap<String, String> {
        let Some(commit_id) = commit_id else {
            return BTreeMap::new();
        };
        let Some(commit_obj) = inner.objects.get(commit_id) else {
            return BTreeMap::new();
        };
        let Ok(commit) = serde_json::from_slice::<CommitData>(&commit_obj.data) else {
            return BTreeMap::new();
        };
        inner
            .objects
            .get(&commit.tree)
            .map(|tree| decode_tree(&tree.data))
            .unwrap_or_default()
    }

    /// Blob contents for a path in the HEAD tree
    pub async fn read_head_file(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().await;
        let tree = Self::tree_of(&inner, inner.head.as_deref());
        let blob_id = tree.get(path)?;
        inner.objects.get(blob_id).map(|o| o.data.clone())
    }

    /// Write a commit: hash blobs for `files`, apply upserts and
    /// `removed` paths over the parent tree, advance HEAD.
    pub async fn commit(
        &self,
        files: &[(String, String)],
        removed: &[String],
        message: &str,
    ) -> Result<CommitInfo> {
        let mut inner = self.inner.write().await;
        if !inner.initialized {
            return Err(AgentError::vcs("git store not initialized"));
        }

        let parent = inner.head.clone();
        let mut tree = Self::tree_of(&inner, parent.as_deref());

        let mut new_objects = Vec::new();
        let mut delta_size = 0usize;

        for (path, contents) in files {
            let data = contents.as_bytes().to_vec();
            let blob_id = object_id(ObjectKind::Blob, &data);
            if tree.get(path) != Some(&blob_id) {
                delta_size += 1;
            }
            if !inner.objects.contains_key(&blob_id) {
                new_objects.push(RawObject {
                    id: blob_id.clone(),
                    kind: ObjectKind::Blob,
                    data,
                });
            }
            tree.insert(path.clone(), blob_id);
        }
        for path in removed {
            if tree.remove(path).is_some() {
                delta_size += 1;
            }
        }

        let tree_data = encode_tree(&tree);
        let tree_id = object_id(ObjectKind::Tree, &tree_data);
        if !inner.objects.contains_key(&tree_id) {
            new_objects.push(RawObject {
                id: tree_id.clone(),
                kind: ObjectKind::Tree,
                data: tree_data,
            });
        }

        let commit_data = serde_json::to_vec(&CommitData {
            tree: tree_id.clone(),
            parent: parent.clone(),
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        })
        .map_err(|e| AgentError::vcs(e.to_string()))?;
        let commit_id = object_id(ObjectKind::Commit, &commit_data);
        new_objects.push(RawObject {
            id: commit_id.clone(),
            kind: ObjectKind::Commit,
            data: commit_data,
        });

        // Durable write before the in-memory pointers move
        if let Some(backend) = &self.backend {
            backend.put_objects(self.session_id, &new_objects).await?;
            backend.set_head(self.session_id, &commit_id).await?;
        }

        for object in new_objects {
            inner.objects.insert(object.id.clone(), object);
        }
        inner.head = Some(commit_id.clone());

        Ok(CommitInfo {
            commit_id,
            tree_id,
            delta_size,
        })
    }

    /// Number of commits reachable from HEAD
    pub async fn commit_count(&self) -> usize {
        let inner = self.inner.read().await;
        let mut count = 0;
        let mut cursor = inner.head.clone();
        while let Some(id) = cursor {
            let Some(obj) = inner.objects.get(&id) else {
                break;
            };
            let Ok(commit) = serde_json::from_slice::<CommitData>(&obj.data) else {
                break;
            };
            count += 1;
            cursor = commit.parent;
        }
        count
    }

    /// All raw objects plus HEAD, for external publishing
    pub async fn export_objects(&self) -> (Vec<RawObject>, Option<String>) {
        let inner = self.inner.read().await;
        let mut objects: Vec<RawObject> = inner.objects.values().cloned().collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        (objects, inner.head.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> GitStore {
        let store = GitStore::new(Uuid::now_v7(), None);
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_head_is_none_before_first_commit() {
        let store = store().await;
        assert!(store.head().await.is_none());
        assert!(store.head_tree().await.is_empty());
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let store = store().await;
        store
            .commit(&[("a.ts".to_string(), "x".to_string())], &[], "c1")
            .await
            .unwrap();
        store.init().await.unwrap();
        assert_eq!(store.commit_count().await, 1);
    }

    #[tokio::test]
    async fn test_identical_commit_has_empty_delta() {
        let store = store().await;
        let files = vec![("a.ts".to_string(), "x".to_string())];

        let first = store.commit(&files, &[], "c1").await.unwrap();
        let second = store.commit(&files, &[], "c1 again").await.unwrap();

        assert_eq!(first.delta_size, 1);
        assert_eq!(second.delta_size, 0);
        assert_eq!(second.tree_id, first.tree_id);
        // Two distinct commits exist
        assert_ne!(first.commit_id, second.commit_id);
        assert_eq!(store.commit_count().await, 2);
    }

    #[tokio::test]
    async fn test_tree_delta_over_previous_head() {
        let store = store().await;
        store
            .commit(
                &[
                    ("a.ts".to_string(), "a".to_string()),
                    ("b.ts".to_string(), "b".to_string()),
                ],
                &[],
                "base",
            )
            .await
            .unwrap();
        store
            .commit(&[("b.ts".to_string(), "b2".to_string())], &[], "update b")
            .await
            .unwrap();

        let tree = store.head_tree().await;
        assert_eq!(tree.len(), 2);
        assert_eq!(
            store.read_head_file("b.ts").await.unwrap(),
            b"b2".to_vec()
        );
        assert_eq!(store.read_head_file("a.ts").await.unwrap(), b"a".to_vec());
    }

    #[tokio::test]
    async fn test_removal_drops_path_from_tree() {
        let store = store().await;
        store
            .commit(&[("a.ts".to_string(), "a".to_string())], &[], "add")
            .await
            .unwrap();
        store
            .commit(&[], &["a.ts".to_string()], "remove")
            .await
            .unwrap();
        assert!(store.head_tree().await.is_empty());
    }

    #[tokio::test]
    async fn test_export_includes_all_objects() {
        let store = store().await;
        store
            .commit(&[("a.ts".to_string(), "a".to_string())], &[], "c1")
            .await
            .unwrap();
        let (objects, head) = store.export_objects().await;
        // blob + tree + commit
        assert_eq!(objects.len(), 3);
        assert!(head.is_some());
    }
}
