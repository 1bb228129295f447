use crate::core::expr::Expr;

/// The beginning of a file path which anchors subsequent path components
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FilePrefix {
    /// Absolute path
    Absolute,
    /// Path relative to .
    Here,
    /// Path relative to ..
    Parent,
    /// Path relative to ~
    Home,
}

/// An ordered run of directory components, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Directory {
    pub components: Vec<String>,
}

/// A directory plus the final filename component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct File {
    pub directory: Directory,
    pub file: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    HTTP,
    HTTPS,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct URL {
    pub scheme: Scheme,
    pub authority: String,
    pub path: File,
    pub query: Option<String>,
    pub fragment: Option<String>,
    /// A `using` clause: an expression (usually itself an import) that must
    /// resolve to `List { header : Text, value : Text }`.
    pub headers: Option<Box<Expr>>,
}

/// The location of an import (i.e. local vs. remote vs. environment)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImportLocation {
    Local(FilePrefix, File),
    Remote(URL),
    Env(String),
    Missing,
}

/// How to interpret the import's contents (i.e. as tarn code or raw text)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ImportMode {
    Code,
    RawText,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Hash {
    SHA256(Vec<u8>),
}

/// Reference to an external expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Import {
    pub mode: ImportMode,
    pub location: ImportLocation,
    pub hash: Option<Hash>,
}

/// Idempotent normalization of relative path components: `.` disappears,
/// `..` cancels the nearest preceding real component or accumulates at the
/// front.
pub trait Canonicalize {
    fn canonicalize(&self) -> Self;
}

impl Canonicalize for Directory {
    fn canonicalize(&self) -> Directory {
        let mut components: Vec<String> =
            Vec::with_capacity(self.components.len());
        for c in &self.components {
            match c.as_str() {
                "." => {}
                ".." => match components.last().map(String::as_str) {
                    None | Some("..") => components.push("..".to_owned()),
                    Some(_) => {
                        components.pop();
                    }
                },
                _ => components.push(c.clone()),
            }
        }
        Directory { components }
    }
}

impl Canonicalize for File {
    fn canonicalize(&self) -> File {
        File {
            directory: self.directory.canonicalize(),
            file: self.file.clone(),
        }
    }
}

impl Canonicalize for ImportLocation {
    fn canonicalize(&self) -> ImportLocation {
        use ImportLocation::*;
        match self {
            Local(prefix, file) => Local(*prefix, file.canonicalize()),
            Remote(url) => Remote(URL {
                path: url.path.canonicalize(),
                ..url.clone()
            }),
            Env(name) => Env(name.clone()),
            Missing => Missing,
        }
    }
}

impl Canonicalize for Import {
    fn canonicalize(&self) -> Import {
        Import {
            mode: self.mode,
            location: self.location.canonicalize(),
            hash: self.hash.clone(),
        }
    }
}

impl File {
    /// Append another file path underneath this file's directory, dropping
    /// this file's final component.
    pub fn chain(&self, child: &File) -> File {
        let mut components = self.directory.components.clone();
        components.extend(child.directory.components.iter().cloned());
        File {
            directory: Directory { components },
            file: child.file.clone(),
        }
    }
}

impl Import {
    /// Local, env and missing imports are local; remote URLs are not.
    pub fn is_local(&self) -> bool {
        !matches!(self.location, ImportLocation::Remote(_))
    }
}
