//! Source tree scanner.
//!
//! Walks the audit root in lexical order (symlinks are never followed),
//! filters candidates with include/exclude globs, and parses them in batches
//! on a bounded worker pool. Results come back in path order regardless of
//! which worker finished first, and only one batch is held in memory.

pub mod blade;
pub mod php;
pub mod syntax;

use crate::error::ScanError;
use crate::models::facts::FactSet;
use syntax::Deadline;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
const PRUNED_DIRS: &[&str] = &["vendor", "node_modules", "storage", "bootstrap"];
const BINARY_SNIFF_BYTES: usize = 8192;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub include: Vec<glob::Pattern>,
    pub exclude: Vec<glob::Pattern>,
    pub jobs: usize,
    pub timeout: Duration,
    pub max_file_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            include: Vec::new(),
            exclude: Vec::new(),
            jobs: default_jobs(),
            timeout: Duration::from_millis(2000),
            max_file_bytes: 1024 * 1024,
        }
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug)]
/// Outcome for one source file. `path` is relative to the audit root.
pub struct ScannedFile {
    pub path: String,
    pub outcome: Result<Vec<FactSet>, ScanError>,
}

/// Lazily scan `root`. Parsing happens as the iterator is drained.
pub fn scan(root: &Path, opts: &ScanOptions) -> ScanIter {
    let jobs = opts.jobs.max(1);
    let pool = match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("worker pool unavailable, scanning sequentially: {}", e);
            None
        }
    };
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_pruned(e));
    ScanIter {
        root: root.to_path_buf(),
        walker: Box::new(walker),
        opts: opts.clone(),
        pool,
        batch: jobs * 4,
        pending: VecDeque::new(),
    }
}

fn is_pruned(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || PRUNED_DIRS.contains(&name.as_ref())
}

pub struct ScanIter {
    root: PathBuf,
    walker: Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + Send>,
    opts: ScanOptions,
    pool: Option<rayon::ThreadPool>,
    batch: usize,
    pending: VecDeque<ScannedFile>,
}

impl ScanIter {
    /// Pull the next batch of candidate paths from the walker.
    fn next_candidates(&mut self) -> Vec<(PathBuf, String)> {
        let mut out = Vec::with_capacity(self.batch);
        while out.len() < self.batch {
            let entry = match self.walker.next() {
                None => break,
                Some(Ok(e)) => e,
                Some(Err(e)) => {
                    debug!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.path_is_symlink() {
                debug!("skipping symlink {}", entry.path().display());
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative(&self.root, entry.path()) else {
                continue;
            };
            if !rel.ends_with(".php") || !self.selected(&rel) {
                continue;
            }
            out.push((entry.into_path(), rel));
        }
        out
    }

    fn selected(&self, rel: &str) -> bool {
        let included =
            self.opts.include.is_empty() || self.opts.include.iter().any(|p| p.matches(rel));
        included && !self.opts.exclude.iter().any(|p| p.matches(rel))
    }

    fn fill(&mut self) -> bool {
        loop {
            let candidates = self.next_candidates();
            if candidates.is_empty() {
                return false;
            }
            let opts = &self.opts;
            let parse = |c: &(PathBuf, String)| scan_file(&c.0, &c.1, opts);
            let parsed: Vec<Option<ScannedFile>> = match self.pool.as_ref() {
                Some(pool) => pool.install(|| candidates.par_iter().map(parse).collect()),
                None => candidates.iter().map(parse).collect(),
            };
            self.pending.extend(parsed.into_iter().flatten());
            if !self.pending.is_empty() {
                return true;
            }
        }
    }
}

impl Iterator for ScanIter {
    type Item = ScannedFile;

    fn next(&mut self) -> Option<ScannedFile> {
        if self.pending.is_empty() && !self.fill() {
            return None;
        }
        self.pending.pop_front()
    }
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = pathdiff::diff_paths(path, root)?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Parse one file. `None` means the file was skipped (binary or oversized).
pub fn scan_file(path: &Path, rel: &str, opts: &ScanOptions) -> Option<ScannedFile> {
    match read_source(path, opts.max_file_bytes) {
        Ok(Some(bytes)) => {
            if is_binary(&bytes) {
                debug!("skipping binary file {}", rel);
                return None;
            }
            let outcome = match String::from_utf8(bytes) {
                Ok(src) => extract(rel, &src, &Deadline::after(opts.timeout)),
                Err(_) => Err(ScanError::Encoding),
            };
            if let Err(e) = &outcome {
                debug!("unparseable {}: {}", rel, e);
            }
            Some(ScannedFile {
                path: rel.to_string(),
                outcome,
            })
        }
        Ok(None) => {
            debug!("skipping oversized file {}", rel);
            None
        }
        Err(e) => Some(ScannedFile {
            path: rel.to_string(),
            outcome: Err(ScanError::Read(e)),
        }),
    }
}

fn read_source(path: &Path, max_bytes: u64) -> std::io::Result<Option<Vec<u8>>> {
    let meta = fs::metadata(path)?;
    if meta.len() > max_bytes {
        return Ok(None);
    }
    let mut buf = Vec::with_capacity(meta.len() as usize);
    fs::File::open(path)?.read_to_end(&mut buf)?;
    Ok(Some(buf))
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0)
}

/// Route a file to the extractor for its unit kind.
pub fn extract(rel: &str, src: &str, deadline: &Deadline) -> Result<Vec<FactSet>, ScanError> {
    if rel.ends_with(".blade.php") {
        return Ok(vec![blade::extract_view(rel, src, deadline)?]);
    }
    let parsed = syntax::parse(src, deadline)?;
    let units = if rel.starts_with("routes/") {
        vec![php::extract_routes(rel, &parsed)]
    } else if rel.starts_with("database/migrations/") {
        vec![php::extract_migration(rel, &parsed)]
    } else {
        php::extract_classes(rel, &parsed)
    };
    deadline.check()?;
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::facts::UnitKind;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, body).unwrap();
    }

    fn paths(files: &[ScannedFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_scan_is_lexical_and_skips_noise() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "app/Models/User.php", b"<?php\nclass User extends Model {}\n");
        write(root, "app/Http/Controllers/A.php", b"<?php\nclass A {}\n");
        write(root, "routes/web.php", b"<?php\nRoute::get('/', [A::class, 'x']);\n");
        write(root, "vendor/pkg/X.php", b"<?php\nclass X {}\n");
        write(root, ".git/hooks/y.php", b"<?php\n");
        write(root, "README.md", b"# readme\n");
        write(root, "app/blob.php", b"<?php\0\0\0");

        let opts = ScanOptions {
            jobs: 2,
            ..ScanOptions::default()
        };
        let files: Vec<ScannedFile> = scan(root, &opts).collect();
        assert_eq!(
            paths(&files),
            vec!["app/Http/Controllers/A.php", "app/Models/User.php", "routes/web.php"]
        );
        let units = files[2].outcome.as_ref().unwrap();
        assert_eq!(units[0].kind, UnitKind::RouteList);
    }

    #[test]
    fn test_include_exclude_globs() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "app/Models/User.php", b"<?php\nclass User {}\n");
        write(root, "app/Legacy/Old.php", b"<?php\nclass Old {}\n");
        write(root, "tests/UserTest.php", b"<?php\nclass UserTest {}\n");
        let opts = ScanOptions {
            include: vec![glob::Pattern::new("app/**").unwrap()],
            exclude: vec![glob::Pattern::new("app/Legacy/**").unwrap()],
            ..ScanOptions::default()
        };
        let files: Vec<ScannedFile> = scan(root, &opts).collect();
        assert_eq!(paths(&files), vec!["app/Models/User.php"]);
    }

    #[test]
    fn test_unparseable_file_does_not_stop_the_scan() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "app/A.php", b"<?php\nclass A {\n");
        write(root, "app/B.php", b"<?php\nclass B {}\n");
        write(root, "app/C.php", b"<?php\n$x = \"\xff\xfe\";\n");
        let files: Vec<ScannedFile> = scan(root, &ScanOptions::default()).collect();
        assert_eq!(files.len(), 3);
        assert!(matches!(files[0].outcome, Err(ScanError::Syntax { .. })));
        assert_eq!(files[1].outcome.as_ref().unwrap()[0].name, "B");
        assert!(matches!(files[2].outcome, Err(ScanError::Encoding)));
    }

    #[test]
    fn test_heredoc_and_inline_html_files_parse() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "app/Models/Post.php",
            b"<?php\nclass Post extends Model\n{\n    protected $fillable = ['title'];\n\n    public function summary()\n    {\n        return <<<EOT\nIt's a post {\nEOT;\n    }\n}\n",
        );
        write(
            root,
            "resources/views/emails/welcome.php",
            b"<p>Don't reply</p>\n<?php echo $name; ?>\n",
        );
        let files: Vec<ScannedFile> = scan(root, &ScanOptions::default()).collect();
        assert_eq!(paths(&files), vec!["app/Models/Post.php", "resources/views/emails/welcome.php"]);
        let post = files[0].outcome.as_ref().unwrap();
        assert_eq!(post[0].flag("fillable"), Some(true));
        assert!(files[1].outcome.as_ref().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "app/A.php", b"<?php\nclass A {}\n");
        std::os::unix::fs::symlink(root.join("app"), root.join("app/loop")).unwrap();
        std::os::unix::fs::symlink(root.join("app/A.php"), root.join("app/B.php")).unwrap();
        let files: Vec<ScannedFile> = scan(root, &ScanOptions::default()).collect();
        assert_eq!(paths(&files), vec!["app/A.php"]);
    }

    #[test]
    fn test_oversized_files_are_skipped() {
        let dir = tempdir().unwrap();
        write(dir.path(), "app/Big.php", b"<?php\nclass Big {}\n");
        let opts = ScanOptions {
            max_file_bytes: 4,
            ..ScanOptions::default()
        };
        assert_eq!(scan(dir.path(), &opts).count(), 0);
    }

    #[test]
    fn test_batches_preserve_order_across_workers() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        for i in 0..40 {
            write(root, &format!("app/C{:02}.php", i), format!("<?php\nclass C{:02} {{}}\n", i).as_bytes());
        }
        let opts = ScanOptions {
            jobs: 3,
            ..ScanOptions::default()
        };
        let got: Vec<String> = scan(root, &opts).map(|f| f.path).collect();
        let mut want = got.clone();
        want.sort();
        assert_eq!(got.len(), 40);
        assert_eq!(got, want);
    }
}
