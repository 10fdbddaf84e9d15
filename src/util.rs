//! Small utility helpers used across modules.

use std::fs;
use std::io;
use std::path::Path;

use uuid::Uuid;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Filesystem-safe identifier for a title.
///
/// Lowercases, keeps alphanumerics, and collapses every other run of
/// characters into a single `-`. Leading and trailing separators are dropped,
/// so `"  Rust: Ownership & Borrowing "` becomes `"rust-ownership-borrowing"`.
pub fn slugify(title: &str) -> String {
  let mut out = String::with_capacity(title.len());
  let mut pending_sep = false;
  for ch in title.chars() {
    if ch.is_alphanumeric() {
      if pending_sep && !out.is_empty() {
        out.push('-');
      }
      pending_sep = false;
      out.extend(ch.to_lowercase());
    } else {
      pending_sep = true;
    }
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

/// Replace `path` with `bytes` so that readers see either the old or the new
/// file, never a half-written one. The temp file lives next to the target so
/// the final rename stays on one filesystem.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
  let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
  fs::create_dir_all(dir)?;
  let name = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no file name"))?;
  let tmp = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()));
  if let Err(e) = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, path)) {
    let _ = fs::remove_file(&tmp);
    return Err(e);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fill_template_replaces_every_occurrence() {
    let out = fill_template("{title}: {focus} ({title})", &[("title", "Traits"), ("focus", "dispatch")]);
    assert_eq!(out, "Traits: dispatch (Traits)");
  }

  #[test]
  fn slugify_collapses_separators() {
    assert_eq!(slugify("  Rust: Ownership & Borrowing "), "rust-ownership-borrowing");
    assert_eq!(slugify("A"), "a");
    assert_eq!(slugify("HTTP/2 in 10 Minutes!"), "http-2-in-10-minutes");
    assert_eq!(slugify("--- ??? ---"), "");
  }

  #[test]
  fn trunc_for_log_respects_char_boundaries() {
    let s = "ééééé";
    let out = trunc_for_log(s, 3);
    assert!(out.starts_with('é'));
    assert!(out.ends_with("(10 bytes total)"));
  }

  #[test]
  fn write_atomic_replaces_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("file.json");
    write_atomic(&path, b"one").unwrap();
    write_atomic(&path, b"two").unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "two");
    let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
      .unwrap()
      .filter_map(|e| e.ok())
      .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
      .collect();
    assert!(leftovers.is_empty());
  }
}
