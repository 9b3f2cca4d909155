//! Image-diff utility: per-pixel absolute-difference mask and count,
//! standing in for the original's OpenCV-based `campaign_analyzer.cpp`
//! (filtered to an empty stub in the retrieval pack — this reimplements
//! its described behavior on the `image` crate instead).

use std::path::Path;

use image::{GenericImageView, ImageFormat, Rgba, RgbaImage};

/// Result of comparing two images pixel-by-pixel.
pub struct ImageDiff {
    /// Per-pixel absolute-difference mask, same dimensions as the inputs.
    pub mask: RgbaImage,
    /// Number of pixels that differ in at least one channel.
    pub differing_pixels: u64,
}

/// Decodes `golden` and `injected` and produces their [`ImageDiff`].
/// Returns `None` if either path is not `image`-decodable (per
/// `ImageFormat::from_path`) or the two images differ in dimensions —
/// those files are still classified by byte comparison, just without a
/// visual mask.
pub fn diff_images(golden: &Path, injected: &Path) -> Option<ImageDiff> {
    if ImageFormat::from_path(golden).is_err() || ImageFormat::from_path(injected).is_err() {
        return None;
    }

    let golden = image::open(golden).ok()?.to_rgba8();
    let injected = image::open(injected).ok()?.to_rgba8();

    if golden.dimensions() != injected.dimensions() {
        return None;
    }

    let (width, height) = golden.dimensions();
    let mut mask = RgbaImage::new(width, height);
    let mut differing_pixels = 0u64;

    for y in 0..height {
        for x in 0..width {
            let a = golden.get_pixel(x, y);
            let b = injected.get_pixel(x, y);
            let d = Rgba([
                a.0[0].abs_diff(b.0[0]),
                a.0[1].abs_diff(b.0[1]),
                a.0[2].abs_diff(b.0[2]),
                a.0[3].abs_diff(b.0[3]),
            ]);
            if d.0 != [0, 0, 0, 0] {
                differing_pixels += 1;
            }
            mask.put_pixel(x, y, d);
        }
    }

    Some(ImageDiff { mask, differing_pixels })
}

/// Byte-for-byte comparison, used for any output file regardless of
/// whether it is image-decodable.
pub fn files_differ(golden: &Path, injected: &Path) -> bool {
    match (std::fs::read(golden), std::fs::read(injected)) {
        (Ok(a), Ok(b)) => a != b,
        // A file present in one run and missing in the other counts as a
        // difference; a file missing from both is not (neither produced
        // it).
        (Err(_), Err(_)) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_images_have_zero_differing_pixels() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let dir = std::env::temp_dir().join(format!("fij-diff-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.png");
        let b = dir.join("b.png");
        img.save(&a).unwrap();
        img.save(&b).unwrap();

        let diff = diff_images(&a, &b).expect("both files are PNGs");
        assert_eq!(diff.differing_pixels, 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn non_image_files_return_none() {
        let dir = std::env::temp_dir().join(format!("fij-diff-test-txt-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let a = dir.join("a.txt");
        let b = dir.join("b.txt");
        std::fs::write(&a, b"hello").unwrap();
        std::fs::write(&b, b"world").unwrap();

        assert!(diff_images(&a, &b).is_none());
        assert!(files_differ(&a, &b));

        std::fs::remove_dir_all(&dir).ok();
    }
}
