//! Image type detection from file content.
//!
//! Attachments are restricted to images, and the declared type of an upload
//! is not trusted: the leading bytes decide. Binary formats are matched by
//! `infer`; SVG is text and is recognized here.

pub const SNIFF_LEN: usize = 512;

/// Header sizes of the BMP DIB variants (core, info, v2 through v5).
const BMP_DIB_HEADER_SIZES: [u32; 7] = [12, 40, 52, 56, 64, 108, 124];

/// Returns the MIME type of an image by its magic bytes, or `None` when the
/// content is not a recognized image.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {
            if kind.mime_type() == "image/bmp" && !is_bmp(bytes) {
                return None;
            }
            Some(kind.mime_type())
        }
        // an SVG may also match as generic XML
        _ if looks_like_svg(bytes) => Some("image/svg+xml"),
        _ => None,
    }
}

/// `BM` alone matches plenty of text. Require zeroed reserved fields and a
/// known DIB header size.
fn is_bmp(bytes: &[u8]) -> bool {
    if bytes.len() < 18 || !bytes.starts_with(b"BM") {
        return false;
    }
    let reserved_zero = bytes[6..10].iter().all(|b| *b == 0);
    let dib_size = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]);
    reserved_zero && BMP_DIB_HEADER_SIZES.contains(&dib_size)
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    (trimmed.starts_with("<svg") || trimmed.starts_with("<?xml")) && text.contains("<svg")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bmp_header(dib_size: u32) -> Vec<u8> {
        let mut bytes = b"BM".to_vec();
        bytes.extend_from_slice(&70u32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&54u32.to_le_bytes());
        bytes.extend_from_slice(&dib_size.to_le_bytes());
        bytes.extend_from_slice(&[0; 16]);
        bytes
    }

    #[test]
    fn test_detects_common_images() {
        assert_eq!(
            sniff_image_mime(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]),
            Some("image/png")
        );
        assert_eq!(sniff_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_image_mime(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff_image_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_mime(&bmp_header(40)), Some("image/bmp"));
        assert_eq!(
            sniff_image_mime(b"<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
            Some("image/svg+xml")
        );
    }

    #[test]
    fn test_rejects_non_images() {
        assert_eq!(sniff_image_mime(b"hello world"), None);
        assert_eq!(sniff_image_mime(b"%PDF-1.7"), None);
        assert_eq!(sniff_image_mime(b"<?xml version=\"1.0\"?><note/>"), None);
        assert_eq!(sniff_image_mime(&[]), None);
    }

    #[test]
    fn test_text_starting_with_bm_is_not_bmp() {
        assert_eq!(sniff_image_mime(b"BMW service log, spring 2024"), None);
        assert_eq!(sniff_image_mime(b"BM"), None);
        assert_eq!(sniff_image_mime(&bmp_header(99)), None);
    }
}
