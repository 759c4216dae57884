//! Path construction and parsing.
//!
//! All functions here are pure. They never touch the backend and never fail;
//! garbage in gives a well-formed (if useless) path out.

/// Schema tag inserted after the configured prefix.
pub const SCHEMA_VERSION: &str = "v2";

/// Suffix appended to a key to form the directory holding its chunk sets.
pub const NESTED_SUFFIX: &str = "-data";

/// Joins `key` onto `root` with exactly one separator.
///
/// One trailing slash is stripped from `root`, one leading and one trailing
/// slash from `key`. An empty `key` (before or after stripping) returns `root`
/// as is, so repeated merges never double or drop a separator.
///
/// ```
/// use kvstash::path::merge_path;
///
/// assert_eq!(merge_path("sso/", "/v2/"), "sso/v2");
/// assert_eq!(merge_path("sso", ""), "sso");
/// ```
pub fn merge_path(root: &str, key: &str) -> String {
    let root = root.strip_suffix('/').unwrap_or(root);

    let key = key.strip_suffix('/').unwrap_or(key);
    let key = key.strip_prefix('/').unwrap_or(key);

    if key.is_empty() {
        return root.to_string();
    }

    format!("{root}/{key}")
}

/// Splits a listing suffix such as `session/abc` into `("session", "abc")`.
///
/// Returns `None` when either half would be empty.
pub fn split_type_key(suffix: &str) -> Option<(&str, &str)> {
    let (ty, key) = suffix.split_once('/')?;
    if ty.is_empty() || key.is_empty() {
        return None;
    }
    Some((ty, key))
}

/// Builds physical paths for one store namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNamespacer {
    /// `<prefix>/v2`
    root: String,
}

impl PathNamespacer {
    /// Creates a namespacer rooted at `<prefix>/v2`.
    pub fn new(prefix: &str) -> Self {
        Self {
            root: merge_path(prefix, SCHEMA_VERSION),
        }
    }

    /// The namespace root, `<prefix>/v2`.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Path of the entry for `(ty, key)`, or of the type itself when `key`
    /// is `None`.
    pub fn request_path(&self, ty: &str, key: Option<&str>) -> String {
        merge_path(&merge_path(&self.root, ty), key.unwrap_or(""))
    }

    /// Directory form of [`request_path`](Self::request_path), with a
    /// trailing slash.
    ///
    /// Backends list and recurse by plain string prefix, so `sess` would
    /// also match `session`. Listings and recursive deletes always go
    /// through this form.
    pub fn dir_path(&self, ty: &str, key: Option<&str>) -> String {
        let mut path = self.request_path(ty, key);
        path.push('/');
        path
    }

    /// `key-data`
    pub fn nested_key(key: &str) -> String {
        format!("{key}{NESTED_SUFFIX}")
    }

    /// Directory holding every chunk set of `key`.
    pub fn nested_dir(&self, ty: &str, key: &str) -> String {
        self.dir_path(ty, Some(&Self::nested_key(key)))
    }

    /// Directory holding the chunk set of `key` for one content hash.
    pub fn chunk_set_dir(&self, ty: &str, key: &str, hash: &str) -> String {
        let nested = merge_path(&Self::nested_key(key), hash);
        self.dir_path(ty, Some(&nested))
    }

    /// Path of a single chunk fragment.
    pub fn chunk_path(&self, ty: &str, key: &str, hash: &str, index: usize) -> String {
        let nested = merge_path(&merge_path(&Self::nested_key(key), hash), &index.to_string());
        self.request_path(ty, Some(&nested))
    }

    /// Strips a listing directory from a physical path returned by the
    /// backend.
    ///
    /// Folder markers (empty suffixes or suffixes ending in `/`) and paths
    /// outside `dir` yield `None`.
    pub fn strip_listing_prefix<'a>(dir: &str, physical: &'a str) -> Option<&'a str> {
        physical
            .strip_prefix(dir)
            .filter(|suffix| !suffix.is_empty() && !suffix.ends_with('/'))
    }
}

/// A parsed chunk fragment suffix, `<key>-data/<hash>/<index>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRef<'a> {
    /// The owning key.
    pub key: &'a str,
    /// Content hash naming the chunk set.
    pub hash: &'a str,
    /// Position of the fragment in the set.
    pub index: usize,
}

impl<'a> ChunkRef<'a> {
    /// Recognises a fragment suffix relative to a type directory.
    pub fn parse(suffix: &'a str) -> Option<Self> {
        let mut parts = suffix.rsplitn(3, '/');
        let index = parts.next()?.parse::<usize>().ok()?;
        let hash = parts.next().filter(|h| !h.is_empty())?;
        let key = parts
            .next()?
            .strip_suffix(NESTED_SUFFIX)
            .filter(|k| !k.is_empty())?;

        Some(Self { key, hash, index })
    }
}
