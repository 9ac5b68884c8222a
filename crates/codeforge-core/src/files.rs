// File manager
//
// Owns the generated-file map. Every save commits to the embedded
// version-control store FIRST and only then updates the state map, so a
// state snapshot never shows a path the object store has no commit for.

use std::sync::Arc;

use crate::error::Result;
use crate::state::{FileRecord, SessionState};
use crate::state_store::StateStore;
use crate::vcs::{CommitInfo, GitStore};

/// Compact change summary recorded as `last_diff`
fn summarize_diff(previous: Option<&str>, next: &str) -> String {
    let Some(previous) = previous else {
        return format!("+{}", next.lines().count());
    };
    let old: Vec<&str> = previous.lines().collect();
    let new: Vec<&str> = next.lines().collect();
    let added = new.iter().filter(|l| !old.contains(l)).count();
    let removed = old.iter().filter(|l| !new.contains(l)).count();
    format!("+{added} -{removed}")
}

pub struct FileManager<S: SessionState> {
    state: Arc<StateStore<S>>,
    git: Arc<GitStore>,
}

impl<S: SessionState> FileManager<S> {
    pub fn new(state: Arc<StateStore<S>>, git: Arc<GitStore>) -> Self {
        Self { state, git }
    }

    pub fn git(&self) -> &Arc<GitStore> {
        &self.git
    }

    /// Save one file and commit it
    pub async fn save_generated_file(
        &self,
        file: FileRecord,
        commit_message: &str,
    ) -> Result<FileRecord> {
        let mut saved = self
            .save_generated_files(vec![file], commit_message)
            .await?;
        Ok(saved.pop().expect("one file in, one record out"))
    }

    /// Save a batch of files under a single commit.
    ///
    /// The commit happens first; if it fails the map is left untouched
    /// (the rollback contract for partial failures).
    pub async fn save_generated_files(
        &self,
        files: Vec<FileRecord>,
        commit_message: &str,
    ) -> Result<Vec<FileRecord>> {
        let snapshot = self.state.get().await;
        let records: Vec<FileRecord> = files
            .into_iter()
            .map(|mut file| {
                let previous = snapshot
                    .base()
                    .generated_files_map
                    .get(&file.file_path)
                    .map(|f| f.file_contents.as_str());
                file.last_diff = summarize_diff(previous, &file.file_contents);
                file
            })
            .collect();

        let commit_files: Vec<(String, String)> = records
            .iter()
            .map(|f| (f.file_path.clone(), f.file_contents.clone()))
            .collect();
        self.git.commit(&commit_files, &[], commit_message).await?;

        self.state
            .update(|state| {
                for record in &records {
                    state
                        .base_mut()
                        .generated_files_map
                        .insert(record.file_path.clone(), record.clone());
                }
            })
            .await;

        Ok(records)
    }

    /// Remove files from the map and record the removal commit
    pub async fn delete_files(&self, paths: &[String], commit_message: &str) -> Result<CommitInfo> {
        let info = self.git.commit(&[], paths, commit_message).await?;
        self.state
            .update(|state| {
                for path in paths {
                    state.base_mut().generated_files_map.remove(path);
                }
            })
            .await;
        Ok(info)
    }

    pub async fn get_generated_file(&self, path: &str) -> Option<FileRecord> {
        self.state
            .get()
            .await
            .base()
            .generated_files_map
            .get(path)
            .cloned()
    }

    pub async fn get_generated_files(&self) -> Vec<FileRecord> {
        self.state
            .get()
            .await
            .base()
            .generated_files_map
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppSessionState;
    use uuid::Uuid;

    async fn manager() -> FileManager<AppSessionState> {
        let state = Arc::new(StateStore::new(AppSessionState::new(Uuid::now_v7())));
        let git = Arc::new(GitStore::new(Uuid::now_v7(), None));
        git.init().await.unwrap();
        FileManager::new(state, git)
    }

    #[tokio::test]
    async fn test_save_commits_and_updates_map() {
        let manager = manager().await;
        let record = manager
            .save_generated_file(FileRecord::new("a.ts", "const x = 1;", "entry"), "c1")
            .await
            .unwrap();

        assert_eq!(record.last_diff, "+1");
        assert!(manager.get_generated_file("a.ts").await.is_some());
        assert!(manager.git.head_tree().await.contains_key("a.ts"));
    }

    #[tokio::test]
    async fn test_map_matches_head_tree() {
        let manager = manager().await;
        manager
            .save_generated_files(
                vec![
                    FileRecord::new("a.ts", "a", "a"),
                    FileRecord::new("b.ts", "b", "b"),
                ],
                "batch",
            )
            .await
            .unwrap();

        let map_paths: Vec<String> = manager
            .get_generated_files()
            .await
            .into_iter()
            .map(|f| f.file_path)
            .collect();
        let tree = manager.git.head_tree().await;
        assert_eq!(map_paths.len(), tree.len());
        for path in map_paths {
            assert!(tree.contains_key(&path));
        }
    }

    #[tokio::test]
    async fn test_idempotent_save_keeps_contents() {
        let manager = manager().await;
        let file = FileRecord::new("a.ts", "x", "entry");
        manager
            .save_generated_files(vec![file.clone()], "c1")
            .await
            .unwrap();
        manager
            .save_generated_files(vec![file], "c1")
            .await
            .unwrap();

        assert_eq!(manager.git.commit_count().await, 2);
        assert_eq!(
            manager
                .get_generated_file("a.ts")
                .await
                .unwrap()
                .file_contents,
            "x"
        );
    }

    #[tokio::test]
    async fn test_delete_removes_from_map_and_tree() {
        let manager = manager().await;
        manager
            .save_generated_file(FileRecord::new("a.ts", "x", "entry"), "c1")
            .await
            .unwrap();
        manager
            .delete_files(&["a.ts".to_string()], "drop a.ts")
            .await
            .unwrap();

        assert!(manager.get_generated_file("a.ts").await.is_none());
        assert!(!manager.git.head_tree().await.contains_key("a.ts"));
    }
}
