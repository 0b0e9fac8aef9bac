use image::imageops::FilterType;
use image::RgbaImage;
use rocket::serde::Serialize;
use std::path::Path;

use crate::error::Error;
use crate::gallery::Gallery;
use crate::image_operations::{open_image, ImageSemaphore};
use crate::models::GalleryRecord;

/// Matches at or under this Hamming distance are reported as likely
/// duplicates.
pub const DEFAULT_THRESHOLD: u32 = 10;

/// Photos smaller than this render poorly on a TV and get flagged on upload
/// regardless of hashing.
pub const MIN_WIDTH: u32 = 1280;
pub const MIN_HEIGHT: u32 = 720;

const GRID_WIDTH: u32 = 9;
const GRID_HEIGHT: u32 = 8;

/// Difference hash: shrink to a 9x8 grayscale grid and compare each pixel to
/// its right neighbour. Captures coarse structure, survives recompression
/// and small edits, compared by Hamming distance.
pub fn compute(image: &RgbaImage) -> u64 {
    let gray = image::imageops::grayscale(image);
    let small = image::imageops::resize(&gray, GRID_WIDTH, GRID_HEIGHT, FilterType::Triangle);
    let mut bits: u64 = 0;
    for y in 0..GRID_HEIGHT {
        for x in 0..GRID_WIDTH - 1 {
            bits <<= 1;
            if small.get_pixel(x + 1, y)[0] > small.get_pixel(x, y)[0] {
                bits |= 1;
            }
        }
    }
    bits
}

pub fn encode(hash: u64) -> String {
    hex::encode(hash.to_be_bytes())
}

pub fn decode(hash: &str) -> Option<u64> {
    let bytes = hex::decode(hash).ok()?;
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

pub fn below_resolution_floor(width: u32, height: u32) -> bool {
    width < MIN_WIDTH || height < MIN_HEIGHT
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub filename: String,
    pub distance: u32,
}

/// Every stored hash within the threshold, closest first. Advisory only:
/// the upload flow warns and proceeds, it never blocks admission.
pub fn find_matches(
    candidate: u64,
    gallery: &GalleryRecord,
    threshold: u32,
) -> Vec<DuplicateMatch> {
    let mut matches: Vec<DuplicateMatch> = gallery
        .images
        .iter()
        .filter_map(|(filename, record)| {
            let stored = record.phash.as_deref().and_then(decode)?;
            let distance = hamming(candidate, stored);
            if distance <= threshold {
                Some(DuplicateMatch {
                    filename: filename.clone(),
                    distance,
                })
            } else {
                None
            }
        })
        .collect();
    matches.sort_by(|a, b| {
        a.distance
            .cmp(&b.distance)
            .then_with(|| a.filename.cmp(&b.filename))
    });
    matches
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BackfillReport {
    pub updated: usize,
    pub failed: usize,
}

/// Compute and persist a hash for every image that lacks one. Unreadable
/// files are counted and skipped; the pass never aborts part way.
pub async fn backfill(
    gallery: &Gallery,
    upload_root: &Path,
    sem: &ImageSemaphore,
) -> Result<BackfillReport, Error> {
    let record = gallery.load()?;
    let missing: Vec<String> = record
        .images
        .iter()
        .filter(|(_, img)| img.phash.as_deref().and_then(decode).is_none())
        .map(|(name, _)| name.clone())
        .collect();

    let mut updated = 0;
    let mut failed = 0;
    for filename in missing {
        match open_image(upload_root, &filename, sem).await {
            Ok(opened) => {
                let hash = compute(opened.image());
                gallery.set_phash(&filename, hash)?;
                updated += 1;
            }
            Err(err) => {
                println!("Backfill skipping unreadable {}: {}", filename, err);
                failed += 1;
            }
        }
    }
    Ok(BackfillReport { updated, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageRecord, Overrides};
    use image::Rgba;

    fn record_with_hash(order: usize, phash: Option<String>) -> ImageRecord {
        ImageRecord {
            original_name: "test.png".to_string(),
            title: String::new(),
            uploaded_by: "admin".to_string(),
            uploaded_at: "2024-05-01T10:00:00Z".to_string(),
            size: 100,
            width: Some(1920),
            height: Some(1080),
            enabled: true,
            order,
            overrides: Overrides::default(),
            phash,
            group_id: None,
        }
    }

    fn horizontal_gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / width.max(1)) as u8;
            Rgba([v, v, v, 255])
        })
    }

    #[test]
    fn identical_content_hashes_identically() {
        let a = horizontal_gradient(200, 200);
        let b = horizontal_gradient(200, 200);
        assert_eq!(compute(&a), compute(&b));
        assert_eq!(0, hamming(compute(&a), compute(&b)));
    }

    #[test]
    fn hash_against_itself_is_distance_zero() {
        let hash = compute(&horizontal_gradient(640, 480));
        assert_eq!(0, hamming(hash, hash));
    }

    #[test]
    fn structurally_different_images_are_far_apart() {
        let gradient = compute(&horizontal_gradient(200, 200));
        let solid = compute(&RgbaImage::from_pixel(200, 200, Rgba([120, 120, 120, 255])));
        // a rising gradient sets every comparison bit, a solid sets none
        assert!(hamming(gradient, solid) > DEFAULT_THRESHOLD);
    }

    #[test]
    fn hash_survives_resize() {
        let big = compute(&horizontal_gradient(1600, 1200));
        let small = compute(&horizontal_gradient(400, 300));
        assert!(hamming(big, small) <= 2);
    }

    #[test]
    fn encode_decode_round_trip() {
        let hash = 0xa1b2_c3d4_e5f6_0718u64;
        assert_eq!(Some(hash), decode(&encode(hash)));
        assert_eq!(None, decode("not-hex"));
        assert_eq!(None, decode("abcd"));
    }

    #[test]
    fn near_match_is_reported_far_match_is_not() {
        let base: u64 = 0x0f0f_0f0f_0f0f_0f0f;
        let mut gallery = GalleryRecord::default();
        gallery
            .images
            .insert("a.png".to_string(), record_with_hash(0, Some(encode(base))));

        // flip 8 bits
        let near = base ^ 0x0000_0000_0000_00ff;
        let found = find_matches(near, &gallery, DEFAULT_THRESHOLD);
        assert_eq!(
            vec![DuplicateMatch {
                filename: "a.png".to_string(),
                distance: 8
            }],
            found
        );

        // flip 40 bits
        let far = base ^ 0x00ff_ffff_ff00_0000;
        assert!(find_matches(far, &gallery, DEFAULT_THRESHOLD).is_empty());
    }

    #[test]
    fn matches_sort_ascending_by_distance() {
        let base: u64 = 0;
        let mut gallery = GalleryRecord::default();
        gallery
            .images
            .insert("close.png".to_string(), record_with_hash(0, Some(encode(0b11))));
        gallery
            .images
            .insert("closer.png".to_string(), record_with_hash(1, Some(encode(0b1))));
        gallery
            .images
            .insert("unhashed.png".to_string(), record_with_hash(2, None));
        let found = find_matches(base, &gallery, DEFAULT_THRESHOLD);
        assert_eq!(2, found.len());
        assert_eq!("closer.png", found[0].filename);
        assert_eq!(1, found[0].distance);
        assert_eq!("close.png", found[1].filename);
        assert_eq!(2, found[1].distance);
    }

    #[test]
    fn threshold_zero_only_matches_exact() {
        let base: u64 = 0xdead_beef_dead_beef;
        let mut gallery = GalleryRecord::default();
        gallery
            .images
            .insert("a.png".to_string(), record_with_hash(0, Some(encode(base))));
        assert_eq!(1, find_matches(base, &gallery, 0).len());
        assert!(find_matches(base ^ 1, &gallery, 0).is_empty());
    }

    #[test]
    fn resolution_floor() {
        assert!(!below_resolution_floor(1920, 1080));
        assert!(!below_resolution_floor(1280, 720));
        assert!(below_resolution_floor(1279, 720));
        assert!(below_resolution_floor(1280, 719));
        assert!(below_resolution_floor(640, 480));
    }

    #[tokio::test]
    async fn backfill_fills_missing_and_counts_unreadable() {
        use tempfile::TempDir;

        let data_dir = TempDir::new().unwrap();
        let upload_dir = TempDir::new().unwrap();
        let gallery = Gallery::open(data_dir.path());

        // one real photo on disk, one catalog entry with no file behind it
        let photo = horizontal_gradient(64, 64);
        photo
            .save(upload_dir.path().join("real.png"))
            .expect("save test png");
        gallery
            .store()
            .update(|record| {
                record
                    .images
                    .insert("real.png".to_string(), record_with_hash(0, None));
                record
                    .images
                    .insert("ghost.png".to_string(), record_with_hash(1, None));
                Ok(())
            })
            .unwrap();

        let sem = ImageSemaphore::new(2);
        let report = backfill(&gallery, upload_dir.path(), &sem).await.unwrap();
        assert_eq!(1, report.updated);
        assert_eq!(1, report.failed);

        let record = gallery.load().unwrap();
        assert!(record.images["real.png"].phash.is_some());
        assert!(record.images["ghost.png"].phash.is_none());

        // second pass has nothing left to do for the readable image
        let report = backfill(&gallery, upload_dir.path(), &sem).await.unwrap();
        assert_eq!(0, report.updated);
        assert_eq!(1, report.failed);
    }
}
