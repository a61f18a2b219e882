//! Content-type helpers for input and output payloads.

/// Fallback for payloads with no recognizable type.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Map an output file extension to a MIME type.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "gif" => "image/gif",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => OCTET_STREAM,
    }
}

/// Map a file name to a MIME type by its extension.
pub fn content_type_for_file_name(name: &str) -> &'static str {
    match name.rsplit_once('.') {
        Some((_, ext)) => content_type_for_extension(ext),
        None => OCTET_STREAM,
    }
}

/// File extension for an uploaded image, sniffed from its header bytes.
///
/// Falls back to `png`, which is what capture clients send by default.
pub fn image_extension(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(image::ImageFormat::Jpeg) => "jpg",
        Ok(image::ImageFormat::WebP) => "webp",
        _ => "png",
    }
}
