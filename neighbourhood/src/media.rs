use anyhow::Result;
use backend_api::{ObjectStorage, StoredObject};

pub const POST_IMAGES: &str = "post_images";
pub const PROFILE_PHOTOS: &str = "profile_photos";

/// Sniff the image type from its leading bytes.
pub fn detect_image(data: &[u8]) -> Result<&'static str> {
    if data.is_empty() {
        anyhow::bail!("empty_image");
    }
    match infer::get(data) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(kind.mime_type()),
        _ => anyhow::bail!("not_an_image"),
    }
}

/// Validate and upload an image, returning the stored object with its stable URL.
pub fn upload_image(
    storage: &dyn ObjectStorage,
    folder: &str,
    data: &[u8],
    max_bytes: usize,
) -> Result<StoredObject> {
    if data.len() > max_bytes {
        anyhow::bail!("image_too_large");
    }
    let content_type = detect_image(data)?;
    Ok(storage.put(folder, data, content_type)?)
}
