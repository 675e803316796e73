//! Migration discovery
//!
//! Patterns are evaluated in the order given. Within one pattern matches are
//! sorted lexicographically by path. A file matched by several patterns is
//! loaded once per match.

use std::collections::hash_map::{Entry, HashMap};

use globset::{GlobBuilder, GlobMatcher};

use super::source::MigrationSource;
use crate::error::{DevroachError, DevroachResult};

/// The SQL text of one migration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub path: String,
    pub sql: String,
}

/// Migration scripts in the order they are to be applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationBatch {
    scripts: Vec<MigrationScript>,
}

impl MigrationBatch {
    pub fn new(scripts: Vec<MigrationScript>) -> Self {
        Self { scripts }
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    pub fn scripts(&self) -> &[MigrationScript] {
        &self.scripts
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MigrationScript> {
        self.scripts.iter()
    }
}

impl IntoIterator for MigrationBatch {
    type Item = MigrationScript;
    type IntoIter = std::vec::IntoIter<MigrationScript>;

    fn into_iter(self) -> Self::IntoIter {
        self.scripts.into_iter()
    }
}

impl<'a> IntoIterator for &'a MigrationBatch {
    type Item = &'a MigrationScript;
    type IntoIter = std::slice::Iter<'a, MigrationScript>;

    fn into_iter(self) -> Self::IntoIter {
        self.scripts.iter()
    }
}

/// Compile a shell-style pattern: `*` stays within one path element, `**` spans any number
fn compile_pattern(pattern: &str) -> DevroachResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|source| DevroachError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Leading directories of `pattern` that contain no glob syntax
fn literal_prefix(pattern: &str) -> String {
    let mut parts: Vec<&str> = pattern.split('/').collect();
    parts.pop();
    parts
        .into_iter()
        .take_while(|part| !part.contains(['*', '?', '[', ']', '{', '}', '\\']))
        .collect::<Vec<_>>()
        .join("/")
}

/// Order paths element by element, so `a/x.sql` comes before `a-b/x.sql`
fn sort_paths(paths: &mut [String]) {
    paths.sort_by(|a, b| a.split('/').cmp(b.split('/')));
}

/// Discover and read every migration selected by `source`
pub fn load(source: &MigrationSource) -> DevroachResult<MigrationBatch> {
    // Compile everything up front so a bad pattern fails before any file is read
    let matchers = source
        .patterns()
        .iter()
        .map(|pattern| compile_pattern(pattern).map(|matcher| (literal_prefix(pattern), matcher)))
        .collect::<DevroachResult<Vec<_>>>()?;

    if matchers.is_empty() {
        return Ok(MigrationBatch::default());
    }

    let mut listings: HashMap<&str, Vec<String>> = HashMap::new();
    let mut scripts = Vec::new();
    for (prefix, matcher) in &matchers {
        let files = match listings.entry(prefix.as_str()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut files = source.fs().files_under(prefix).map_err(DevroachError::List)?;
                sort_paths(&mut files);
                entry.insert(files)
            }
        };

        for path in files.iter().filter(|path| matcher.is_match(path.as_str())) {
            let bytes = source.fs().read(path).map_err(|source| DevroachError::Read {
                path: path.clone(),
                source,
            })?;
            let sql = String::from_utf8(bytes).map_err(|e| DevroachError::Read {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;

            tracing::debug!(target: "devroach", path = %path, pattern = %matcher.glob(), "discovered migration file");
            scripts.push(MigrationScript {
                path: path.clone(),
                sql,
            });
        }
    }

    if !scripts.is_empty() {
        tracing::info!(target: "devroach", count = scripts.len(), "loaded migrations");
    }

    Ok(MigrationBatch::new(scripts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::source::{MemoryFs, MigrationFs};
    use std::io;

    fn paths(batch: &MigrationBatch) -> Vec<&str> {
        batch.iter().map(|script| script.path.as_str()).collect()
    }

    #[test]
    fn test_load_sorts_matches_within_pattern() {
        let fs = MemoryFs::new()
            .with_file("a/002_add_col.sql", "ALTER TABLE t ADD COLUMN c INT;")
            .with_file("a/001_init.sql", "CREATE TABLE t (id INT);")
            .with_file("a/readme.md", "not sql");

        let batch = load(&MigrationSource::new(fs, ["a/*.sql"])).unwrap();

        assert_eq!(paths(&batch), vec!["a/001_init.sql", "a/002_add_col.sql"]);
        assert_eq!(batch.scripts()[0].sql, "CREATE TABLE t (id INT);");
        assert_eq!(batch.scripts()[1].sql, "ALTER TABLE t ADD COLUMN c INT;");
    }

    #[test]
    fn test_load_follows_pattern_order_across_patterns() {
        let fs = MemoryFs::new()
            .with_file("a/001.sql", "a1")
            .with_file("b/001.sql", "b1")
            .with_file("b/002.sql", "b2");

        let batch = load(&MigrationSource::new(fs, ["b/*.sql", "a/*.sql"])).unwrap();

        assert_eq!(paths(&batch), vec!["b/001.sql", "b/002.sql", "a/001.sql"]);
    }

    #[test]
    fn test_load_does_not_dedup_overlapping_patterns() {
        let fs = MemoryFs::new().with_file("a/001_init.sql", "CREATE TABLE t (id INT);");

        let batch = load(&MigrationSource::new(fs, ["a/*.sql", "a/001_*.sql"])).unwrap();

        assert_eq!(paths(&batch), vec!["a/001_init.sql", "a/001_init.sql"]);
    }

    #[test]
    fn test_single_star_stays_within_directory() {
        let fs = MemoryFs::new()
            .with_file("a/001.sql", "top")
            .with_file("a/nested/002.sql", "nested");

        let batch = load(&MigrationSource::new(fs, ["a/*.sql"])).unwrap();

        assert_eq!(paths(&batch), vec!["a/001.sql"]);
    }

    #[test]
    fn test_double_star_is_recursive() {
        let fs = MemoryFs::new()
            .with_file("prisma/migrations/20240101_init/migration.sql", "init")
            .with_file("prisma/migrations/20240202_users/migration.sql", "users")
            .with_file("prisma/migrations/migration_lock.toml", "provider = \"cockroachdb\"")
            .with_file("prisma/schema.prisma", "");

        let batch = load(&MigrationSource::new(fs, ["prisma/migrations/**/*.sql"])).unwrap();

        assert_eq!(
            paths(&batch),
            vec![
                "prisma/migrations/20240101_init/migration.sql",
                "prisma/migrations/20240202_users/migration.sql",
            ]
        );
    }

    #[test]
    fn test_sorting_compares_path_elements() {
        let fs = MemoryFs::new()
            .with_file("m/a-b/x.sql", "dash")
            .with_file("m/a/x.sql", "plain");

        let batch = load(&MigrationSource::new(fs, ["m/**/*.sql"])).unwrap();

        assert_eq!(paths(&batch), vec!["m/a/x.sql", "m/a-b/x.sql"]);
    }

    #[test]
    fn test_literal_prefix_stops_at_glob_syntax() {
        assert_eq!(literal_prefix("prisma/migrations/**/*.sql"), "prisma/migrations");
        assert_eq!(literal_prefix("a/*.sql"), "a");
        assert_eq!(literal_prefix("a/001.sql"), "a");
        assert_eq!(literal_prefix("*.sql"), "");
        assert_eq!(literal_prefix("{a,b}/*.sql"), "");
        assert_eq!(literal_prefix("db/v[12]/*.sql"), "db");
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_elsewhere_does_not_fail_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("a/001_init.sql"), "CREATE TABLE t (id INT);").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("node_modules/broken")).unwrap();

        let whole_tree = load(&MigrationSource::from_dir(dir.path(), ["**/*.sql"])).unwrap();
        let pruned = load(&MigrationSource::from_dir(dir.path(), ["a/*.sql"])).unwrap();

        assert_eq!(paths(&whole_tree), vec!["a/001_init.sql"]);
        assert_eq!(paths(&pruned), vec!["a/001_init.sql"]);
    }

    /// Lists only below `allowed`, fails for any other directory
    #[derive(Debug)]
    struct PrefixOnlyFs {
        allowed: &'static str,
    }

    impl MigrationFs for PrefixOnlyFs {
        fn files(&self) -> io::Result<Vec<String>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "whole tree"))
        }

        fn files_under(&self, prefix: &str) -> io::Result<Vec<String>> {
            if prefix != self.allowed {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, prefix.to_string()));
            }
            Ok(vec![format!("{}/001.sql", prefix)])
        }

        fn read(&self, _path: &str) -> io::Result<Vec<u8>> {
            Ok(b"SELECT 1;".to_vec())
        }
    }

    #[test]
    fn test_listing_is_limited_to_pattern_prefix() {
        let fs = PrefixOnlyFs {
            allowed: "prisma/migrations",
        };

        let batch = load(&MigrationSource::new(fs, ["prisma/migrations/**/*.sql"])).unwrap();

        assert_eq!(paths(&batch), vec!["prisma/migrations/001.sql"]);
    }

    #[test]
    fn test_no_match_is_empty_batch() {
        let fs = MemoryFs::new().with_file("a/001.sql", "a1");
        let batch = load(&MigrationSource::new(fs, ["b/*.sql"])).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_invalid_pattern_fails_with_pattern_error() {
        let fs = MemoryFs::new().with_file("a/001.sql", "a1");
        let err = load(&MigrationSource::new(fs, ["a/*.sql", "a/[.sql"])).unwrap_err();

        match err {
            DevroachError::Pattern { pattern, .. } => assert_eq!(pattern, "a/[.sql"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Lists a file it can no longer read, like a migration deleted mid-load
    #[derive(Debug)]
    struct VanishingFs;

    impl MigrationFs for VanishingFs {
        fn files(&self) -> io::Result<Vec<String>> {
            Ok(vec!["a/001.sql".to_string()])
        }

        fn read(&self, path: &str) -> io::Result<Vec<u8>> {
            Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()))
        }
    }

    #[test]
    fn test_unreadable_file_fails_with_read_error() {
        let err = load(&MigrationSource::new(VanishingFs, ["a/*.sql"])).unwrap_err();

        match err {
            DevroachError::Read { path, source } => {
                assert_eq!(path, "a/001.sql");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_utf8_file_fails_with_read_error() {
        let fs = MemoryFs::new().with_file("a/001.sql", vec![0xff, 0xfe, 0x00]);
        let err = load(&MigrationSource::new(fs, ["a/*.sql"])).unwrap_err();
        assert!(matches!(err, DevroachError::Read { .. }));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/002_add_col.sql"), "second").unwrap();
        std::fs::write(dir.path().join("a/001_init.sql"), "first").unwrap();

        let batch = load(&MigrationSource::from_dir(dir.path(), ["a/*.sql"])).unwrap();

        assert_eq!(paths(&batch), vec!["a/001_init.sql", "a/002_add_col.sql"]);
        assert_eq!(batch.scripts()[0].sql, "first");
    }
}
