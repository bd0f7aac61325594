//! Getting images into and out of the session: files picked or dropped on the
//! terminal, pasted data URLs, and downloads of processed results.

use std::fs;
use std::path::{Path, PathBuf};

use animask_contracts::data_url::DataUrl;
use animask_contracts::session::ImageFile;
use anyhow::{bail, Context, Result};
use chrono::Utc;

const UNKNOWN_CONTENT_TYPE: &str = "application/octet-stream";
const PASTED_FILE_NAME: &str = "pasted-image";

/// Reads `path` as an upload. The content type comes from the file's magic
/// bytes when they are recognised, then from the extension. Non-image files
/// are read too; the session rejects them.
pub fn read_image_file(path: &Path) -> Result<ImageFile> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let content_type = sniff_mime(&bytes)
        .or_else(|| mime_for_path(path))
        .unwrap_or(UNKNOWN_CONTENT_TYPE);
    let name = path
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or(PASTED_FILE_NAME)
        .to_string();
    Ok(ImageFile::new(name, content_type, bytes))
}

/// Turns pasted clipboard text (a data URL or bare base64) into an upload.
pub fn image_file_from_pasted(raw: &str) -> Result<ImageFile> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("nothing to paste");
    }
    let parsed = DataUrl::parse(raw, UNKNOWN_CONTENT_TYPE);
    let bytes = parsed.decode().context("pasted data is not an image data URL")?;
    let content_type = if parsed.mime_type() == UNKNOWN_CONTENT_TYPE {
        sniff_mime(&bytes).unwrap_or(UNKNOWN_CONTENT_TYPE)
    } else {
        parsed.mime_type()
    };
    Ok(ImageFile::new(PASTED_FILE_NAME, content_type.to_string(), bytes))
}

/// Writes a processed image to disk. `explicit` may name a file or an
/// existing directory; without it the file lands in `dir` under
/// `animask-image-<unix-millis>.png`.
pub fn write_download(image: &DataUrl, dir: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    let target = match explicit {
        Some(path) if path.is_dir() => path.join(default_download_name()),
        Some(path) => path.to_path_buf(),
        None => dir.join(default_download_name()),
    };
    let bytes = image.decode()?;
    if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&target, bytes).with_context(|| format!("failed to write {}", target.display()))?;
    Ok(target)
}

pub fn default_download_name() -> String {
    format!("animask-image-{}.png", Utc::now().timestamp_millis())
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" | "heif" => Some("image/heic"),
        "txt" | "md" => Some("text/plain"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use animask_contracts::data_url::DataUrl;

    use super::{image_file_from_pasted, read_image_file, write_download};

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[test]
    fn read_image_file_sniffs_magic_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("photo.jpg");
        fs::write(&path, PNG_MAGIC)?;

        let file = read_image_file(&path)?;
        assert_eq!(file.name, "photo.jpg");
        assert_eq!(file.content_type, "image/png");
        assert!(file.is_image());
        Ok(())
    }

    #[test]
    fn read_image_file_falls_back_to_extension() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let notes = temp.path().join("notes.txt");
        fs::write(&notes, "hello")?;
        let file = read_image_file(&notes)?;
        assert_eq!(file.content_type, "text/plain");
        assert!(!file.is_image());

        let blob = temp.path().join("blob");
        fs::write(&blob, "????")?;
        assert_eq!(read_image_file(&blob)?.content_type, "application/octet-stream");
        Ok(())
    }

    #[test]
    fn read_missing_file_is_an_error() {
        assert!(read_image_file(std::path::Path::new("/definitely/not/here.png")).is_err());
    }

    #[test]
    fn pasted_data_url_keeps_declared_type() -> anyhow::Result<()> {
        let file = image_file_from_pasted("data:image/webp;base64,AAAA")?;
        assert_eq!(file.content_type, "image/webp");
        assert_eq!(file.bytes, vec![0, 0, 0]);
        assert!(image_file_from_pasted("data:image/png;base64,@@@").is_err());
        assert!(image_file_from_pasted("   ").is_err());
        Ok(())
    }

    #[test]
    fn pasted_bare_base64_is_sniffed() -> anyhow::Result<()> {
        let encoded = DataUrl::from_bytes("image/png", PNG_MAGIC);
        let file = image_file_from_pasted(encoded.payload())?;
        assert_eq!(file.content_type, "image/png");
        Ok(())
    }

    #[test]
    fn download_uses_default_name_or_explicit_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = DataUrl::from_bytes("image/png", b"png-bytes");

        let default = write_download(&image, temp.path(), None)?;
        let name = default
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_string();
        assert!(name.starts_with("animask-image-") && name.ends_with(".png"));
        assert_eq!(fs::read(&default)?, b"png-bytes");

        let explicit = temp.path().join("nested").join("mine.png");
        let written = write_download(&image, temp.path(), Some(&explicit))?;
        assert_eq!(written, explicit);
        assert_eq!(fs::read(&explicit)?, b"png-bytes");
        Ok(())
    }
}
