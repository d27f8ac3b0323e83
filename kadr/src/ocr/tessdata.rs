use std::path::{Path, PathBuf};

/// Locations distribution packages install Tesseract language data to.
const SYSTEM_TESSDATA_DIRS: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
];

/// First existing tessdata directory: the configured one, then the system defaults.
pub fn resolve_tessdata_dir(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(dir) = configured {
        let path = PathBuf::from(dir);
        // TESSDATA_PREFIX may point at the parent of tessdata/
        let nested = path.join("tessdata");
        if has_traineddata(&path) {
            return Some(path);
        }
        if has_traineddata(&nested) {
            return Some(nested);
        }
        tracing::warn!(dir = %dir, "Configured tessdata directory has no language packs");
    }

    SYSTEM_TESSDATA_DIRS
        .iter()
        .map(PathBuf::from)
        .find(|p| has_traineddata(p))
}

/// Language codes with a `<code>.traineddata` file in `dir`, sorted.
pub fn installed_languages(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Cannot list tessdata directory");
            return Vec::new();
        }
    };

    let mut languages: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("traineddata") {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            // Empty packs are left behind by interrupted downloads
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (len > 0).then_some(stem)
        })
        .collect();

    languages.sort();
    languages
}

fn has_traineddata(dir: &Path) -> bool {
    dir.is_dir() && !installed_languages(dir).is_empty()
}
