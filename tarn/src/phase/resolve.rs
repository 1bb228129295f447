use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tarn_syntax::{
    BinOp, Builtin, Canonicalize, Directory, Expr, File, FilePrefix, Hash,
    Import, ImportLocation, ImportMode, URL,
};
use tracing::{debug, warn};

use crate::core::context::TypecheckContext;
use crate::error::{Error, ImportError};
use crate::phase::binary::ProtocolVersion;
use crate::phase::cache::{self, CacheProbe};
use crate::phase::normalize::Normalizer;
use crate::phase::typecheck::equivalent;
use crate::phase::{Normalized, Parsed, Resolved};

/// A root from which to resolve relative imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRoot {
    LocalDir(PathBuf),
}

pub(crate) type ImportCache = HashMap<Import, Normalized>;

pub(crate) type ImportStack = Vec<Import>;

/// What a fetcher hands back: where the text came from, for error
/// framing, and the text itself.
pub struct Fetched {
    pub display_path: String,
    pub text: String,
}

/// The single entry point turning an import locator into source text.
/// `Status` holds its fetcher behind this trait so tests (and embedders)
/// can substitute a double for the filesystem, environment and network
/// backends.
pub trait Fetcher {
    fn fetch(
        &self,
        status: &mut Status,
        import: &Import,
    ) -> Result<Fetched, Error>;
}

/// Mutable session state threaded through one resolution.
pub struct Status {
    /// Ancestry of the import currently being resolved, outermost first;
    /// the synthetic root import sits at index 0.
    pub(crate) stack: ImportStack,
    /// Memo of canonical import identity → resolved, type-checked,
    /// normalized expression. Inserts are sticky across `?` branches.
    pub(crate) cache: ImportCache,
    /// Lazily instantiated HTTP client, shared by every remote fetch of
    /// the session.
    #[cfg(feature = "http")]
    pub(crate) manager: Option<reqwest::blocking::Client>,
    pub(crate) protocol_version: ProtocolVersion,
    /// Extra reduction rules applied when normalizing imported
    /// expressions.
    pub(crate) normalizer: Option<Rc<Normalizer>>,
    /// Typing context imported expressions are checked under.
    pub(crate) starting_context: TypecheckContext,
    pub(crate) resolver: Rc<dyn Fetcher>,
}

impl Status {
    /// Fresh session state whose relative imports resolve against
    /// `root_dir`.
    pub fn new(root_dir: impl AsRef<Path>) -> Status {
        Status {
            stack: vec![root_import(root_dir.as_ref())],
            cache: HashMap::new(),
            #[cfg(feature = "http")]
            manager: None,
            protocol_version: ProtocolVersion::default(),
            normalizer: None,
            starting_context: TypecheckContext::new(),
            resolver: Rc::new(SystemFetcher),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Rc<dyn Fetcher>) -> Status {
        self.resolver = fetcher;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Rc<Normalizer>) -> Status {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn with_starting_context(mut self, ctx: TypecheckContext) -> Status {
        self.starting_context = ctx;
        self
    }

    pub fn with_protocol_version(
        mut self,
        version: ProtocolVersion,
    ) -> Status {
        self.protocol_version = version;
        self
    }
}

// The parent of the outermost resolution: a local import rooted at the
// starting directory, with `.` standing in for the filename.
fn root_import(dir: &Path) -> Import {
    let mut prefix = FilePrefix::Here;
    let mut components = Vec::new();
    for c in dir.components() {
        use std::path::Component::*;
        match c {
            Prefix(_) | CurDir => {}
            RootDir => prefix = FilePrefix::Absolute,
            ParentDir => components.push("..".to_owned()),
            Normal(s) => components.push(s.to_string_lossy().into_owned()),
        }
    }
    Import {
        mode: ImportMode::Code,
        location: ImportLocation::Local(
            prefix,
            File {
                directory: Directory { components },
                file: ".".to_owned(),
            },
        ),
        hash: None,
    }
}

/// Resolve `child` against `parent` — the child ⊕ parent composition.
/// Only `Here`-relative children chain onto the parent's location; every
/// other child stands on its own. The composed import carries the child's
/// hash and mode.
pub(crate) fn chain(parent: &Import, child: &Import) -> Import {
    use ImportLocation::*;
    let location = match (&parent.location, &child.location) {
        (Local(prefix, parent_file), Local(FilePrefix::Here, f)) => {
            Local(*prefix, parent_file.chain(f))
        }
        (Remote(url), Local(FilePrefix::Here, f)) => Remote(URL {
            path: url.path.chain(f),
            ..url.clone()
        }),
        _ => child.location.clone(),
    };
    Import {
        mode: child.mode,
        location,
        hash: child.hash.clone(),
    }
}

/// Fold a non-empty stack, outermost first, under `chain`, then
/// canonicalize: the fully resolved identity of the innermost import.
pub(crate) fn compose(stack: &[Import]) -> Import {
    let (first, rest) = match stack.split_first() {
        Some(split) => split,
        // resolution never runs with an empty stack; `missing` is a
        // harmless identity for the degenerate case
        None => {
            return Import {
                mode: ImportMode::Code,
                location: ImportLocation::Missing,
                hash: None,
            }
        }
    };
    let mut acc = first.clone();
    for child in rest {
        acc = chain(&acc, child);
    }
    acc.canonicalize()
}

/// The composed identity of every prefix of the stack, outermost first.
/// Cycle detection compares the candidate's identity against these, so
/// the same source file imported from different parents is kept distinct.
pub(crate) fn canonicalize_all(stack: &[Import]) -> Vec<Import> {
    (1..=stack.len()).map(|n| compose(&stack[..n])).collect()
}

// A raw failure in the envelope the `?` operator catches, tagged with the
// import chain at the point of failure.
fn import_failure(stack: &[Import], e: ImportError) -> Error {
    ImportError::MissingImports(vec![ImportError::Imported {
        stack: stack.to_vec(),
        inner: Box::new(e.into()),
    }])
    .into()
}

// Attach the chain to every cause that does not carry one yet. An empty
// envelope (from `missing`) passes through untouched so `?` keeps
// looking, and already-chained causes are never wrapped twice.
fn rethrow_with(stack: &[Import], e: Error) -> Error {
    match e {
        Error::Resolve(ImportError::MissingImports(es)) => {
            let es = es
                .into_iter()
                .map(|cause| match cause {
                    wrapped @ ImportError::Imported { .. } => wrapped,
                    cause => ImportError::Imported {
                        stack: stack.to_vec(),
                        inner: Box::new(cause.into()),
                    },
                })
                .collect();
            ImportError::MissingImports(es).into()
        }
        e => ImportError::MissingImports(vec![ImportError::Imported {
            stack: stack.to_vec(),
            inner: Box::new(e),
        }])
        .into(),
    }
}

pub(crate) fn resolve(parsed: Parsed) -> Result<Resolved, Error> {
    let Parsed(expr, ImportRoot::LocalDir(dir)) = parsed;
    let mut status = Status::new(dir);
    Ok(Resolved(resolve_expr(&mut status, &expr)?))
}

pub(crate) fn skip_resolve_expr(parsed: Parsed) -> Result<Resolved, Error> {
    fn skip(expr: &Expr) -> Result<Expr, Error> {
        match expr {
            Expr::Import(import) => {
                Err(ImportError::UnexpectedImport(import.clone()).into())
            }
            Expr::BinOp(BinOp::ImportAlt, l, r) => {
                skip(l).or_else(|_| skip(r))
            }
            expr => expr.try_map_children(&mut skip),
        }
    }
    let Parsed(expr, _) = parsed;
    Ok(Resolved(skip(&expr)?))
}

/// Structural traversal replacing every import leaf, left to right. The
/// only nodes with non-trivial semantics are the leaf itself and the
/// alternative operator.
pub(crate) fn resolve_expr(
    status: &mut Status,
    expr: &Expr,
) -> Result<Expr, Error> {
    match expr {
        Expr::Import(import) => resolve_import(status, import),
        Expr::BinOp(BinOp::ImportAlt, l, r) => {
            match resolve_expr(status, l) {
                Ok(e) => Ok(e),
                Err(e) => {
                    // only the MissingImports envelope is recoverable
                    let mut causes = e.into_missing_imports()?;
                    match resolve_expr(status, r) {
                        Ok(e) => Ok(e),
                        Err(e) => {
                            causes.extend(e.into_missing_imports()?);
                            Err(ImportError::MissingImports(causes).into())
                        }
                    }
                }
            }
        }
        expr => expr.try_map_children(&mut |e| resolve_expr(status, e)),
    }
}

fn resolve_import(
    status: &mut Status,
    import: &Import,
) -> Result<Expr, Error> {
    let parent = compose(&status.stack);
    let here = chain(&parent, import).canonicalize();

    // a remote parent may not depend on anything local
    if here.is_local() && !parent.is_local() {
        return Err(import_failure(
            &status.stack,
            ImportError::ReferentiallyOpaque(import.clone()),
        ));
    }
    if canonicalize_all(&status.stack).contains(&here) {
        return Err(import_failure(
            &status.stack,
            ImportError::Cycle(import.clone()),
        ));
    }

    let mut chained_stack = status.stack.clone();
    chained_stack.push(import.clone());

    // in-memory memo; hashed imports are still verified on a hit
    if let Some(normalized) = status.cache.get(&here).cloned() {
        if let Some(expected) = &import.hash {
            verify_hash(status.protocol_version, &normalized, expected)
                .map_err(|e| rethrow_with(&chained_stack, e))?;
        }
        return Ok(normalized.to_expr());
    }

    // content-addressed read path for hashed imports
    let mut cache_slot = None;
    if let Some(expected) = &import.hash {
        match cache::probe(expected) {
            Some(CacheProbe::Hit(path)) => {
                return cache::read_checked(
                    status.protocol_version,
                    &path,
                    expected,
                )
                .map_err(|e| rethrow_with(&chained_stack, e));
            }
            Some(CacheProbe::Miss(path)) => cache_slot = Some(path),
            None => {}
        }
    }

    // fetch and parse the composed identity; the stack still ends at the
    // parent here, so a remote import's headers may reach local data
    let dynamic = expr_from_import(status, &here)
        .map_err(|e| rethrow_with(&chained_stack, e))?;

    // recurse with the child pushed; restore the stack on every path
    status.stack.push(import.clone());
    let resolved = resolve_expr(status, &dynamic);
    status.stack.pop();
    let resolved = resolved.map_err(|e| rethrow_with(&chained_stack, e))?;

    let typed = Resolved(resolved)
        .typecheck_with(&status.starting_context)
        .map_err(|e| rethrow_with(&chained_stack, e.into()))?;
    let normalized = typed.normalize_with(status.normalizer.as_deref());
    status.cache.insert(here, normalized.clone());

    if let Some(expected) = &import.hash {
        let bytes =
            verify_hash(status.protocol_version, &normalized, expected)
                .map_err(|e| rethrow_with(&chained_stack, e))?;
        if let Some(path) = cache_slot {
            if let Err(e) = cache::write_atomic(&path, &bytes) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "could not persist to the integrity cache"
                );
            }
        }
    }

    Ok(normalized.to_expr())
}

// Check the canonical hash of a resolved expression, returning the
// encoded bytes so the cache write path can reuse them.
fn verify_hash(
    version: ProtocolVersion,
    normalized: &Normalized,
    expected: &Hash,
) -> Result<Vec<u8>, Error> {
    use sha2::Digest;
    let bytes =
        crate::phase::binary::encode(version, &normalized.to_expr_alpha())?;
    let digest = sha2::Sha256::digest(&bytes);
    let Hash::SHA256(want) = expected;
    if digest.as_slice() != want.as_slice() {
        return Err(ImportError::HashMismatch {
            expected: hex::encode(want),
            actual: hex::encode(digest),
        }
        .into());
    }
    Ok(bytes)
}

/// Fetch and parse a single import, without resolving what comes back:
/// the base layer the resolver recurses through. In `Code` mode the text
/// must parse as a complete expression; in `RawText` mode it becomes a
/// text literal verbatim.
pub fn expr_from_import(
    status: &mut Status,
    import: &Import,
) -> Result<Expr, Error> {
    let fetcher = Rc::clone(&status.resolver);
    let Fetched { display_path, text } = fetcher.fetch(status, import)?;
    match import.mode {
        ImportMode::Code => {
            let expr = tarn_syntax::parse_expr(text.trim_start())
                .map_err(|e| e.with_path(&display_path))?;
            Ok(expr)
        }
        ImportMode::RawText => Ok(Expr::TextLit(text)),
    }
}

/// Fetcher backed by the local filesystem, the process environment and,
/// with the `http` feature, a blocking HTTP client.
pub struct SystemFetcher;

impl Fetcher for SystemFetcher {
    fn fetch(
        &self,
        status: &mut Status,
        import: &Import,
    ) -> Result<Fetched, Error> {
        match &import.location {
            ImportLocation::Local(prefix, file) => fetch_local(*prefix, file),
            ImportLocation::Remote(url) => fetch_remote(status, url),
            ImportLocation::Env(name) => fetch_env(name),
            ImportLocation::Missing => {
                Err(ImportError::MissingImports(Vec::new()).into())
            }
        }
    }
}

// A fetch failure is a one-element MissingImports envelope, so that the
// `?` operator can catch every backend uniformly.
fn missing1(e: ImportError) -> Error {
    ImportError::MissingImports(vec![e]).into()
}

fn fetch_local(prefix: FilePrefix, file: &File) -> Result<Fetched, Error> {
    let mut path = match prefix {
        FilePrefix::Absolute => PathBuf::from("/"),
        FilePrefix::Here => PathBuf::from("."),
        FilePrefix::Parent => PathBuf::from(".."),
        FilePrefix::Home => match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().to_path_buf(),
            None => return Err(missing1(ImportError::MissingHome)),
        },
    };
    for c in &file.directory.components {
        path.push(c);
    }
    path.push(&file.file);
    debug!(path = %path.display(), "reading local import");
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Fetched {
            display_path: path.display().to_string(),
            text,
        }),
        Err(_) => Err(missing1(ImportError::MissingFile(path))),
    }
}

fn fetch_env(name: &str) -> Result<Fetched, Error> {
    debug!(name, "reading environment import");
    match std::env::var(name) {
        Ok(text) => Ok(Fetched {
            display_path: format!("env:{name}"),
            text,
        }),
        Err(_) => Err(missing1(ImportError::MissingEnvironmentVariable(
            name.to_owned(),
        ))),
    }
}

/// Resolve a remote import's `using` clause against the current (parent)
/// stack, check it against `List { header : Text, value : Text }`, and
/// flatten it into name/value pairs with lowercased names.
pub(crate) fn resolve_headers(
    status: &mut Status,
    headers: &Expr,
) -> Result<Vec<(String, String)>, Error> {
    let resolved = resolve_expr(status, headers)?;
    let typed = Resolved(resolved).typecheck_with(&status.starting_context)?;
    let expected = headers_type();
    if !equivalent(typed.get_type(), &expected) {
        return Err(crate::error::TypeError::AnnotMismatch {
            annot: expected,
            actual: typed.get_type().clone(),
        }
        .into());
    }
    let normalized = typed.normalize_with(status.normalizer.as_deref());
    let items = match normalized.to_expr() {
        Expr::EmptyListLit(_) => Vec::new(),
        Expr::NEListLit(items) => items,
        _ => return Err(ImportError::MalformedHeaders.into()),
    };
    items
        .into_iter()
        .map(|item| {
            let Expr::RecordLit(m) = item else {
                return Err(ImportError::MalformedHeaders.into());
            };
            let header = m.get(&tarn_syntax::Label::from("header"));
            let value = m.get(&tarn_syntax::Label::from("value"));
            match (header, value) {
                (Some(Expr::TextLit(name)), Some(Expr::TextLit(value))) => {
                    Ok((name.to_lowercase(), value.clone()))
                }
                _ => Err(ImportError::MalformedHeaders.into()),
            }
        })
        .collect()
}

fn headers_type() -> Expr {
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("header".into(), Expr::Builtin(Builtin::Text));
    fields.insert("value".into(), Expr::Builtin(Builtin::Text));
    Expr::App(
        Expr::Builtin(Builtin::List).boxed(),
        Expr::RecordType(fields).boxed(),
    )
}

#[cfg(feature = "http")]
fn fetch_remote(status: &mut Status, url: &URL) -> Result<Fetched, Error> {
    let headers = match &url.headers {
        Some(expr) => resolve_headers(status, expr)?,
        None => Vec::new(),
    };
    let display_url = URL {
        headers: None,
        ..url.clone()
    }
    .to_string();
    debug!(url = %display_url, "fetching remote import");
    let client = match &status.manager {
        Some(client) => client.clone(),
        None => {
            let client = reqwest::blocking::Client::builder()
                .build()
                .map_err(|e| {
                    missing1(ImportError::HttpError {
                        url: display_url.clone(),
                        message: e.to_string(),
                    })
                })?;
            status.manager = Some(client.clone());
            client
        }
    };
    let mut request = client.get(&display_url);
    for (name, value) in &headers {
        request = request.header(name.as_str(), value.as_str());
    }
    let text = request
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.text())
        .map_err(|e| {
            missing1(ImportError::HttpError {
                url: display_url.clone(),
                message: e.to_string(),
            })
        })?;
    Ok(Fetched {
        display_path: display_url,
        text,
    })
}

#[cfg(not(feature = "http"))]
fn fetch_remote(_status: &mut Status, url: &URL) -> Result<Fetched, Error> {
    let display = URL {
        headers: None,
        ..url.clone()
    }
    .to_string();
    Err(missing1(ImportError::CannotImportHttpUrl(display)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TypeError;
    use crate::load_with;
    use crate::phase::hash::hash_expression_to_code;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::fs;
    use std::sync::{Mutex, MutexGuard};
    use tarn_syntax::parse_expr;

    // Process-wide mutations (env imports, XDG_CACHE_HOME) must not
    // interleave across test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_guard() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn load_in(dir: &Path, src: &str) -> Result<Expr, Error> {
        let mut status = Status::new(dir);
        load_with(&mut status, &parse_expr(src).unwrap())
    }

    fn import_of(src: &str) -> Import {
        let Expr::Import(import) = parse_expr(src).unwrap() else {
            panic!("{src} is not an import");
        };
        import
    }

    // Unwrap the standard envelope: MissingImports([Imported { .. }]).
    fn unwrap_single(e: Error) -> (Vec<Import>, Error) {
        match e {
            Error::Resolve(ImportError::MissingImports(mut es))
                if es.len() == 1 =>
            {
                match es.pop().unwrap() {
                    ImportError::Imported { stack, inner } => (stack, *inner),
                    other => panic!("expected Imported, got: {other}"),
                }
            }
            other => panic!("expected a singleton MissingImports: {other}"),
        }
    }

    /// Serves canned text keyed by composed import location, counting
    /// fetches, so resolution is exercised without filesystem or network.
    struct StaticFetcher {
        entries: HashMap<ImportLocation, String>,
        fetches: RefCell<HashMap<ImportLocation, usize>>,
    }

    impl StaticFetcher {
        fn new(entries: &[(&str, &str)]) -> Rc<StaticFetcher> {
            let entries = entries
                .iter()
                .map(|(k, v)| (import_of(k).location, (*v).to_owned()))
                .collect();
            Rc::new(StaticFetcher {
                entries,
                fetches: RefCell::new(HashMap::new()),
            })
        }

        fn fetches(&self, src: &str) -> usize {
            *self
                .fetches
                .borrow()
                .get(&import_of(src).location)
                .unwrap_or(&0)
        }
    }

    impl Fetcher for StaticFetcher {
        fn fetch(
            &self,
            _status: &mut Status,
            import: &Import,
        ) -> Result<Fetched, Error> {
            if import.location == ImportLocation::Missing {
                return Err(ImportError::MissingImports(Vec::new()).into());
            }
            *self
                .fetches
                .borrow_mut()
                .entry(import.location.clone())
                .or_insert(0) += 1;
            match self.entries.get(&import.location) {
                Some(text) => Ok(Fetched {
                    display_path: import.to_string(),
                    text: text.clone(),
                }),
                None => Err(missing1(ImportError::MissingFile(
                    PathBuf::from(import.to_string()),
                ))),
            }
        }
    }

    #[test]
    fn resolves_file_imports_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("id"), "λ(a : Type) → λ(x : a) → x")
            .unwrap();

        let resolved = load_in(dir.path(), "./id Bool True").unwrap();
        assert!(!resolved.contains_imports());
        assert_eq!(
            resolved,
            parse_expr("(λ(a : Type) → λ(x : a) → x) Bool True").unwrap()
        );

        let typed = Resolved(resolved).typecheck().unwrap();
        assert_eq!(typed.get_type(), &Expr::Builtin(Builtin::Bool));
        assert_eq!(typed.normalize().to_expr(), Expr::BoolLit(true));
    }

    #[test]
    fn resolution_is_a_fixpoint() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one"), "1").unwrap();
        let resolved = load_in(dir.path(), "./one + 2").unwrap();
        assert!(!resolved.contains_imports());

        let mut status = Status::new(dir.path());
        assert_eq!(load_with(&mut status, &resolved).unwrap(), resolved);
    }

    #[test]
    fn nested_imports_resolve_relative_to_their_parent() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/index"), "./lib/val").unwrap();
        fs::create_dir(dir.path().join("pkg/lib")).unwrap();
        fs::write(dir.path().join("pkg/lib/val"), "42").unwrap();

        assert_eq!(
            load_in(dir.path(), "./pkg/index").unwrap(),
            Expr::IntegerLit(42)
        );
    }

    #[test]
    fn detects_import_cycles() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("foo"), "./bar").unwrap();
        fs::write(dir.path().join("bar"), "./foo").unwrap();

        let err = load_in(dir.path(), "./foo").unwrap_err();
        let (stack, inner) = unwrap_single(err);
        // the chain below the synthetic root reads ./foo, ./bar
        assert_eq!(stack.len(), 3);
        assert_eq!(stack[1], import_of("./foo"));
        assert_eq!(stack[2], import_of("./bar"));
        assert!(matches!(
            inner,
            Error::Resolve(ImportError::Cycle(c)) if c == import_of("./foo")
        ));

        // and the rendered diagnostic shows the chain, outermost first
        let rendered = load_in(dir.path(), "./foo").unwrap_err().to_string();
        assert!(rendered.contains("↳ ./foo"));
        assert!(rendered.contains("↳ ./bar"));
        assert!(rendered.contains("cyclic import: ./foo"));
    }

    #[test]
    fn parse_file_resolves_relative_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dep"), "2").unwrap();
        fs::write(dir.path().join("main"), "./dep + 1").unwrap();

        let resolved = Parsed::parse_file(&dir.path().join("main"))
            .unwrap()
            .resolve()
            .unwrap();
        assert_eq!(resolved, Resolved(parse_expr("2 + 1").unwrap()));
    }

    #[test]
    fn the_same_file_may_be_imported_from_two_parents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("shared"), "1").unwrap();
        fs::write(dir.path().join("a"), "./shared").unwrap();
        fs::write(dir.path().join("b"), "./shared + 1").unwrap();

        // each import is normalized before it is substituted
        assert_eq!(
            load_in(dir.path(), "./a + ./b").unwrap(),
            parse_expr("1 + 2").unwrap()
        );
    }

    #[test]
    fn resolves_environment_imports() {
        let _guard = env_guard();
        std::env::set_var("TARN_TEST_FOO", "1");
        std::env::set_var("TARN_TEST_BAR", "\"Hi\"");
        std::env::set_var("TARN_TEST_BAZ", "λ(x : Bool) → x == False");

        let resolved = load_in(
            Path::new("."),
            "{ foo = env:TARN_TEST_FOO, bar = env:TARN_TEST_BAR, baz = env:TARN_TEST_BAZ }",
        )
        .unwrap();
        assert_eq!(
            resolved,
            parse_expr(
                r#"{ bar = "Hi", baz = λ(x : Bool) → x == False, foo = 1 }"#
            )
            .unwrap()
        );
        let ty = Resolved(resolved).typecheck().unwrap().get_type().clone();
        assert_eq!(
            ty,
            parse_expr(
                "{ bar : Text, baz : ∀(x : Bool) → Bool, foo : Integer }"
            )
            .unwrap()
        );

        std::env::remove_var("TARN_TEST_FOO");
        std::env::remove_var("TARN_TEST_BAR");
        std::env::remove_var("TARN_TEST_BAZ");
    }

    #[test]
    fn alternative_returns_the_first_success() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "1").unwrap();

        assert_eq!(
            load_in(dir.path(), "./a ? ./nope").unwrap(),
            Expr::IntegerLit(1)
        );
        assert_eq!(
            load_in(dir.path(), "missing ? ./a").unwrap(),
            Expr::IntegerLit(1)
        );
    }

    #[test]
    fn alternative_accumulates_missing_imports() {
        let _guard = env_guard();
        std::env::remove_var("TARN_TEST_UNSET");
        let dir = tempfile::tempdir().unwrap();

        let err = load_in(
            dir.path(),
            "missing ? env:TARN_TEST_UNSET ? ./does-not-exist",
        )
        .unwrap_err();
        let Error::Resolve(ImportError::MissingImports(es)) = err else {
            panic!("expected MissingImports");
        };
        // `missing` contributes no entry; the env and the file one each
        assert_eq!(es.len(), 2);
        for e in &es {
            assert!(matches!(e, ImportError::Imported { .. }));
        }
    }

    #[test]
    fn alternative_recovers_from_failures_inside_imports() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ill-typed"), "1 && True").unwrap();
        fs::write(dir.path().join("unparsable"), "λ oops").unwrap();
        fs::write(dir.path().join("ok"), "2").unwrap();

        assert_eq!(
            load_in(dir.path(), "./ill-typed ? ./ok").unwrap(),
            Expr::IntegerLit(2)
        );
        assert_eq!(
            load_in(dir.path(), "./unparsable ? ./ok").unwrap(),
            Expr::IntegerLit(2)
        );
    }

    #[test]
    fn type_errors_carry_the_import_chain() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ill-typed"), "1 && True").unwrap();

        let err = load_in(dir.path(), "./ill-typed").unwrap_err();
        let (stack, inner) = unwrap_single(err);
        assert_eq!(stack.len(), 2);
        assert!(matches!(inner, Error::Typecheck(TypeError::TypeMismatch { .. })));
    }

    #[test]
    fn rejects_referentially_opaque_imports() {
        let fetcher = StaticFetcher::new(&[(
            "https://example.com/pkg",
            "env:TARN_SECRET",
        )]);
        let mut status =
            Status::new(".").with_fetcher(fetcher);

        let err = load_with(
            &mut status,
            &parse_expr("https://example.com/pkg").unwrap(),
        )
        .unwrap_err();
        let (_, inner) = unwrap_single(err);
        assert!(matches!(
            inner,
            Error::Resolve(ImportError::ReferentiallyOpaque(i))
                if i == import_of("env:TARN_SECRET")
        ));
    }

    #[test]
    fn remote_relative_imports_chain_onto_the_parent() {
        let fetcher = StaticFetcher::new(&[
            ("https://example.com/pkg/index", "./lib"),
            ("https://example.com/pkg/lib", "3"),
        ]);
        let mut status =
            Status::new(".").with_fetcher(fetcher);

        assert_eq!(
            load_with(
                &mut status,
                &parse_expr("https://example.com/pkg/index").unwrap(),
            )
            .unwrap(),
            Expr::IntegerLit(3)
        );
    }

    #[test]
    fn raw_text_imports_wrap_the_response_verbatim() {
        let fetcher = StaticFetcher::new(&[(
            "http://example.com",
            "hello -- not a comment\n",
        )]);
        let mut status =
            Status::new(".").with_fetcher(fetcher);

        assert_eq!(
            load_with(
                &mut status,
                &parse_expr("http://example.com as Text").unwrap(),
            )
            .unwrap(),
            Expr::TextLit("hello -- not a comment\n".to_owned())
        );
    }

    #[test]
    fn memo_hits_are_sticky_even_across_failed_alternatives() {
        let fetcher = StaticFetcher::new(&[
            ("env:TARN_A", "1"),
            ("env:TARN_B", "2"),
        ]);
        let mut status = Status::new(".")
            .with_fetcher(Rc::clone(&fetcher) as Rc<dyn Fetcher>);

        // the left branch resolves env:TARN_A before dying on `missing`;
        // the right branch reuses the memoized result
        let expr = parse_expr(
            "[env:TARN_A, missing] ? [env:TARN_A, env:TARN_B]",
        )
        .unwrap();
        assert_eq!(
            load_with(&mut status, &expr).unwrap(),
            Expr::NEListLit(vec![Expr::IntegerLit(1), Expr::IntegerLit(2)])
        );
        assert_eq!(fetcher.fetches("env:TARN_A"), 1);
        assert_eq!(fetcher.fetches("env:TARN_B"), 1);
    }

    #[test]
    fn resolves_and_reshapes_header_imports() {
        let fetcher = StaticFetcher::new(&[(
            "env:TARN_HDRS",
            r#"[ { header = "Authorization", value = "Bearer t" } ]"#,
        )]);
        let mut status =
            Status::new(".").with_fetcher(fetcher);

        let pairs = resolve_headers(
            &mut status,
            &parse_expr("env:TARN_HDRS").unwrap(),
        )
        .unwrap();
        assert_eq!(
            pairs,
            vec![("authorization".to_owned(), "Bearer t".to_owned())]
        );
    }

    #[test]
    fn rejects_ill_typed_header_imports() {
        let fetcher = StaticFetcher::new(&[("env:TARN_HDRS", "1")]);
        let mut status =
            Status::new(".").with_fetcher(fetcher);

        let err = resolve_headers(
            &mut status,
            &parse_expr("env:TARN_HDRS").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Typecheck(_)));
    }

    #[test]
    fn custom_normalizer_applies_to_imported_expressions() {
        let fetcher = StaticFetcher::new(&[("env:TARN_N", "answer + 0")]);
        let rules: Rc<Normalizer> = Rc::new(|e: &Expr| match e {
            Expr::Var(v) if v.0.as_str() == "answer" => {
                Some(Expr::IntegerLit(42))
            }
            _ => None,
        });
        let ctx = TypecheckContext::new()
            .insert_type(&"answer".into(), Expr::Builtin(Builtin::Integer));
        let mut status = Status::new(".")
            .with_fetcher(fetcher)
            .with_normalizer(rules)
            .with_starting_context(ctx);

        assert_eq!(
            load_with(&mut status, &parse_expr("env:TARN_N").unwrap())
                .unwrap(),
            Expr::IntegerLit(42)
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hashed_imports_verify_and_populate_the_integrity_cache() {
        let _guard = env_guard();
        let cache_dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CACHE_HOME", cache_dir.path());
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dep"), "1").unwrap();

        let code = hash_expression_to_code(
            ProtocolVersion::V1,
            &Expr::IntegerLit(1),
        )
        .unwrap();
        let src = format!("./dep {code}");

        assert_eq!(load_in(dir.path(), &src).unwrap(), Expr::IntegerLit(1));
        let artifact = cache_dir
            .path()
            .join("tarn")
            .join(&code["sha256:".len()..]);
        assert!(artifact.exists());

        // a fresh session resolves from the cache alone
        fs::remove_file(dir.path().join("dep")).unwrap();
        assert_eq!(load_in(dir.path(), &src).unwrap(), Expr::IntegerLit(1));

        // tampered bytes are detected, not returned
        fs::write(&artifact, b"garbage").unwrap();
        let err = load_in(dir.path(), &src).unwrap_err();
        let (_, inner) = unwrap_single(err);
        assert!(matches!(
            inner,
            Error::Resolve(ImportError::HashMismatch { .. })
        ));

        std::env::remove_var("XDG_CACHE_HOME");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn wrong_digests_fail_and_are_never_persisted() {
        let _guard = env_guard();
        let cache_dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CACHE_HOME", cache_dir.path());
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("dep"), "1").unwrap();

        let wrong = hash_expression_to_code(
            ProtocolVersion::V1,
            &Expr::IntegerLit(2),
        )
        .unwrap();
        let err =
            load_in(dir.path(), &format!("./dep {wrong}")).unwrap_err();
        let (_, inner) = unwrap_single(err);
        assert!(matches!(
            inner,
            Error::Resolve(ImportError::HashMismatch { .. })
        ));
        assert!(!cache_dir
            .path()
            .join("tarn")
            .join(&wrong["sha256:".len()..])
            .exists());

        std::env::remove_var("XDG_CACHE_HOME");
    }

    #[test]
    fn composition_follows_the_child_parent_algebra() {
        let root = root_import(Path::new("."));

        // `.`-relative children chain onto the parent
        let here = compose(&[root.clone(), import_of("./a/../b")]);
        assert_eq!(here, import_of("./b"));

        // everything else stands on its own
        for src in ["../up", "/abs", "~/home", "env:X", "missing"] {
            let composed =
                compose(&[root.clone(), import_of("./sub/x"), import_of(src)]);
            assert_eq!(composed, import_of(src).canonicalize(), "{src}");
        }

        // the composed import takes the child's hash and mode
        let digest = "cd".repeat(32);
        let child = import_of(&format!("./c sha256:{digest} as Text"));
        let composed = compose(&[root, import_of("./sub/x"), child.clone()]);
        assert_eq!(composed.hash, child.hash);
        assert_eq!(composed.mode, ImportMode::RawText);
        assert_eq!(composed.location, import_of("./sub/c").location);
    }

    #[test]
    fn canonicalize_all_tracks_every_ancestor() {
        let stack = vec![
            root_import(Path::new(".")),
            import_of("./pkg/index"),
            import_of("./lib/dep"),
        ];
        assert_eq!(
            canonicalize_all(&stack),
            vec![
                compose(&stack[..1]),
                compose(&stack[..2]),
                compose(&stack[..3]),
            ]
        );
        assert_eq!(
            canonicalize_all(&stack)[2],
            import_of("./pkg/lib/dep")
        );
    }

    #[test]
    fn skip_resolve_rejects_remaining_imports() {
        let parsed = |src: &str| {
            Parsed(
                parse_expr(src).unwrap(),
                ImportRoot::LocalDir(PathBuf::from(".")),
            )
        };
        assert_eq!(
            parsed("1 + 2").skip_resolve().unwrap(),
            Resolved(parse_expr("1 + 2").unwrap())
        );
        // an alternative whose left branch is import-free still resolves
        assert_eq!(
            parsed("1 ? ./x").skip_resolve().unwrap(),
            Resolved(Expr::IntegerLit(1))
        );
        assert!(matches!(
            parsed("./x").skip_resolve().unwrap_err(),
            Error::Resolve(ImportError::UnexpectedImport(_))
        ));
    }
}
