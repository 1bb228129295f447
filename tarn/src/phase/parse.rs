use std::fs;
use std::path::Path;

use crate::error::Error;
use crate::phase::resolve::ImportRoot;
use crate::phase::Parsed;

pub fn parse_file(f: &Path) -> Result<Parsed, Error> {
    let text = fs::read_to_string(f)?;
    let expr = tarn_syntax::parse_expr(&text)
        .map_err(|e| e.with_path(&f.to_string_lossy()))?;
    let root = f.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    Ok(Parsed(expr, ImportRoot::LocalDir(root)))
}

pub fn parse_str(s: &str) -> Result<Parsed, Error> {
    let expr = tarn_syntax::parse_expr(s)?;
    Ok(Parsed(expr, ImportRoot::LocalDir(std::env::current_dir()?)))
}
