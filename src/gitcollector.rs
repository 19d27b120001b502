//! Git Metadata Collector (component C6): optional per-file last-commit /
//! author / churn enrichment, attached to every [`VectorRecord`] of a file
//! when the project root sits inside a git work-tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use git2::{Commit, Repository};

use crate::models::{ChurnLevel, GitEnrichment};

/// Commits scanned by the bulk strategy (SPEC_FULL §4.6).
const BULK_SCAN_COMMIT_LIMIT: usize = 2000;
/// Commits scanned per-file by the small-file-set / fallback strategy.
const PER_FILE_SCAN_COMMIT_LIMIT: usize = 5000;
/// Window used to compute `commitCountWindow` / `churnLevel`.
const CHURN_WINDOW_MONTHS: i64 = 6;
const SECONDS_PER_MONTH: i64 = 30 * 24 * 60 * 60;

/// One row of the bulk-scan's path → last-touching-commit map.
#[derive(Clone)]
struct LastTouch {
    author: String,
    email: String,
    date: String,
    hash: String,
    message: String,
}

struct RepoScan {
    last_touch: HashMap<String, LastTouch>,
    window_counts: HashMap<String, u32>,
}

/// Per-repository git enrichment cache, keyed by the work-tree root.
pub struct GitCollector {
    cache: Mutex<HashMap<PathBuf, std::sync::Arc<RepoScan>>>,
}

impl GitCollector {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Enriches `files` (paths relative to `project_root`) with git
    /// metadata, or returns an empty map when `project_root` is not
    /// inside a git work-tree.
    pub fn collect(
        &self,
        project_root: &Path,
        files: &[PathBuf],
    ) -> HashMap<PathBuf, GitEnrichment> {
        let Ok(repo) = Repository::discover(project_root) else {
            return HashMap::new();
        };
        let work_root = repo
            .workdir()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| project_root.to_path_buf());

        if files.len() > 10 {
            self.bulk_strategy(&repo, &work_root, files)
        } else {
            self.small_set_strategy(&repo, &work_root, files)
        }
    }

    fn bulk_strategy(
        &self,
        repo: &Repository,
        work_root: &Path,
        files: &[PathBuf],
    ) -> HashMap<PathBuf, GitEnrichment> {
        let scan = self.scan_or_cached(repo, work_root);
        let mut out = HashMap::new();

        for file in files {
            let rel = relative_key(work_root, file);
            if let Some(touch) = scan.last_touch.get(&rel) {
                let count = scan.window_counts.get(&rel).copied().unwrap_or(0);
                out.insert(file.clone(), enrichment_from(touch, count));
            } else if let Some(enrichment) = single_file_lookup(repo, &rel) {
                out.insert(file.clone(), enrichment);
            }
        }
        out
    }

    fn small_set_strategy(
        &self,
        repo: &Repository,
        work_root: &Path,
        files: &[PathBuf],
    ) -> HashMap<PathBuf, GitEnrichment> {
        let mut out = HashMap::new();
        for file in files {
            let rel = relative_key(work_root, file);
            if let Some(enrichment) = single_file_lookup(repo, &rel) {
                out.insert(file.clone(), enrichment);
            }
        }
        out
    }

    fn scan_or_cached(&self, repo: &Repository, work_root: &Path) -> std::sync::Arc<RepoScan> {
        let mut cache = self.cache.lock().expect("git collector cache poisoned");
        if let Some(existing) = cache.get(work_root) {
            return existing.clone();
        }
        let scan = std::sync::Arc::new(bulk_scan(repo));
        cache.insert(work_root.to_path_buf(), scan.clone());
        scan
    }
}

impl Default for GitCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn relative_key(work_root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(work_root).unwrap_or(file);
    rel.to_string_lossy().replace('\\', "/")
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn commit_touch(commit: &Commit<'_>) -> LastTouch {
    let sig = commit.author();
    LastTouch {
        author: sig.name().unwrap_or("unknown").to_string(),
        email: sig.email().unwrap_or("").to_string(),
        date: iso8601(commit.time().seconds()),
        hash: commit.id().to_string(),
        message: commit
            .summary()
            .unwrap_or("")
            .trim()
            .to_string(),
    }
}

fn iso8601(unix_seconds: i64) -> String {
    chrono::DateTime::from_timestamp(unix_seconds, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn enrichment_from(touch: &LastTouch, count_window: u32) -> GitEnrichment {
    GitEnrichment {
        last_commit_author: Some(touch.author.clone()),
        last_commit_email: Some(touch.email.clone()),
        last_commit_date: Some(touch.date.clone()),
        last_commit_hash: Some(touch.hash.clone()),
        last_commit_message: Some(touch.message.clone()),
        commit_count_window: Some(count_window),
        churn_level: Some(ChurnLevel::from_commit_count(count_window)),
    }
}

/// Walks the last `BULK_SCAN_COMMIT_LIMIT` commits reachable from HEAD,
/// diffing each against its first parent (or an empty tree for a root
/// commit) to build a path → last-touching-commit map (first occurrence
/// wins, since the walk visits newest-first) plus a count of how many of
/// those commits touched each path within the churn window.
fn bulk_scan(repo: &Repository) -> RepoScan {
    let mut last_touch = HashMap::new();
    let mut window_counts = HashMap::new();
    let window_start = now_unix() - CHURN_WINDOW_MONTHS * SECONDS_PER_MONTH;

    let Ok(mut revwalk) = repo.revwalk() else {
        return RepoScan {
            last_touch,
            window_counts,
        };
    };
    if revwalk.push_head().is_err() {
        return RepoScan {
            last_touch,
            window_counts,
        };
    }
    let _ = revwalk.set_sorting(git2::Sort::TIME);

    for oid in revwalk.take(BULK_SCAN_COMMIT_LIMIT) {
        let Ok(oid) = oid else { continue };
        let Ok(commit) = repo.find_commit(oid) else {
            continue;
        };
        let Ok(tree) = commit.tree() else { continue };
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

        let diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None);
        let Ok(diff) = diff else { continue };

        let touch = commit_touch(&commit);
        let in_window = commit.time().seconds() >= window_start;

        let _ = diff.foreach(
            &mut |delta, _| {
                if let Some(path) = delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                {
                    let key = path.to_string_lossy().replace('\\', "/");
                    last_touch.entry(key.clone()).or_insert_with(|| touch.clone());
                    if in_window {
                        *window_counts.entry(key).or_insert(0) += 1;
                    }
                }
                true
            },
            None,
            None,
            None,
        );
    }

    RepoScan {
        last_touch,
        window_counts,
    }
}

/// Per-file scan used by the small-file-set strategy and as a fallback for
/// files the bulk scan's commit window never touched.
fn single_file_lookup(repo: &Repository, rel_path: &str) -> Option<GitEnrichment> {
    let mut revwalk = repo.revwalk().ok()?;
    revwalk.push_head().ok()?;
    let _ = revwalk.set_sorting(git2::Sort::TIME);

    let window_start = now_unix() - CHURN_WINDOW_MONTHS * SECONDS_PER_MONTH;
    let mut last_touch: Option<LastTouch> = None;
    let mut count_window = 0u32;

    for oid in revwalk.take(PER_FILE_SCAN_COMMIT_LIMIT) {
        let Ok(oid) = oid else { continue };
        let Ok(commit) = repo.find_commit(oid) else {
            continue;
        };
        let Ok(tree) = commit.tree() else { continue };
        let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());
        let Ok(diff) = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None) else {
            continue;
        };

        let mut touches_file = false;
        let _ = diff.foreach(
            &mut |delta, _| {
                let matches = delta
                    .new_file()
                    .path()
                    .or_else(|| delta.old_file().path())
                    .map(|p| p.to_string_lossy().replace('\\', "/") == rel_path)
                    .unwrap_or(false);
                if matches {
                    touches_file = true;
                }
                true
            },
            None,
            None,
            None,
        );

        if touches_file {
            if last_touch.is_none() {
                last_touch = Some(commit_touch(&commit));
            }
            if commit.time().seconds() >= window_start {
                count_window += 1;
            }
        }
    }

    last_touch.map(|touch| enrichment_from(&touch, count_window))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn init_repo_with_commit(dir: &Path) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Test User").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
        }
        fs::write(dir.join("lib.rs"), "pub fn hi() {}\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("lib.rs")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial commit", &tree, &[])
            .unwrap();
        repo
    }

    #[test]
    fn collects_last_commit_metadata_for_tracked_file() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());

        let collector = GitCollector::new();
        let files = vec![dir.path().join("lib.rs")];
        let enriched = collector.collect(dir.path(), &files);

        let info = enriched.get(&files[0]).expect("enrichment present");
        assert_eq!(info.last_commit_author.as_deref(), Some("Test User"));
        assert_eq!(info.commit_count_window, Some(1));
        assert_eq!(info.churn_level, Some(ChurnLevel::Low));
    }

    #[test]
    fn non_git_directory_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let collector = GitCollector::new();
        let files = vec![dir.path().join("lib.rs")];
        assert!(collector.collect(dir.path(), &files).is_empty());
    }

    #[test]
    fn bulk_scan_is_cached_per_repo_root() {
        let dir = tempfile::tempdir().unwrap();
        init_repo_with_commit(dir.path());

        let collector = GitCollector::new();
        let mut many_files: Vec<PathBuf> = (0..11)
            .map(|i| dir.path().join(format!("f{i}.rs")))
            .collect();
        many_files.push(dir.path().join("lib.rs"));

        collector.collect(dir.path(), &many_files);
        assert_eq!(collector.cache.lock().unwrap().len(), 1);
        collector.collect(dir.path(), &many_files);
        assert_eq!(collector.cache.lock().unwrap().len(), 1);
    }
}
