use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::sync::{Semaphore, SemaphorePermit};

/// Decoding a photo can take hundreds of megabytes; the semaphore caps how
/// many are in flight at once.
pub struct ImageSemaphore {
    semaphore: Semaphore,
}

impl ImageSemaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Semaphore::new(permits),
        }
    }
}

pub struct LimitedImage<'a> {
    image: RgbaImage,
    #[allow(dead_code)]
    permit: SemaphorePermit<'a>,
}

impl LimitedImage<'_> {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

pub async fn open_image<'a>(
    root: &Path,
    input_path: &str,
    sem: &'a ImageSemaphore,
) -> Result<LimitedImage<'a>, String> {
    let permit = sem
        .semaphore
        .acquire()
        .await
        .map_err(|e| format!("{}", e))?;
    let path = root.join(input_path);
    let img = if input_path.to_lowercase().ends_with(".webp") {
        // Not every build of the image crate decodes webp, the webp crate
        // always does
        let data = {
            use tokio::io::AsyncReadExt;
            let mut f = File::open(path).await.map_err(|e| format!("{}", e))?;
            let mut data = Vec::new();
            f.read_to_end(&mut data)
                .await
                .map_err(|e| format!("{}", e))?;
            data
        };
        let decoder = webp::Decoder::new(&data);
        match decoder.decode() {
            None => {
                return Err("Could not decode webp".to_string());
            }
            Some(webp_image) => webp_image.to_image().into_rgba8(),
        }
    } else {
        let result = tokio::task::spawn_blocking(|| blocking_image_open(path))
            .await
            .map_err(|e| format!("{}", e))?;
        result?
    };

    Ok(LimitedImage { image: img, permit })
}

fn blocking_image_open(path: PathBuf) -> Result<RgbaImage, String> {
    let image = ImageReader::open(path)
        .map_err(|e| format!("{}", e))?
        .decode()
        .map_err(|e| format!("{}", e))?
        .into_rgba8();
    Ok(image)
}

pub async fn open_image_dimensions_only(
    root: &Path,
    input_path: &str,
    sem: &ImageSemaphore,
) -> Result<(u32, u32), String> {
    let image = open_image(root, input_path, sem).await?;
    Ok(image.dimensions())
}

pub const THUMBNAIL_MAX: u32 = 320;

/// Longest edge capped at THUMBNAIL_MAX, encoded as JPEG.
pub async fn write_thumbnail(image: LimitedImage<'_>, dest: PathBuf) -> Result<(), String> {
    let img = image.image;
    tokio::task::spawn_blocking(move || blocking_write_thumbnail(img, dest))
        .await
        .map_err(|e| format!("{}", e))?
}

fn blocking_write_thumbnail(image: RgbaImage, dest: PathBuf) -> Result<(), String> {
    let (w, h) = image.dimensions();
    let (tw, th) = thumbnail_size(w, h);
    let small = image::imageops::resize(&image, tw, th, FilterType::Triangle);
    let rgb = image::DynamicImage::ImageRgba8(small).to_rgb8();
    let mut out = std::fs::File::create(&dest).map_err(|e| format!("{}", e))?;
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 80);
    encoder
        .encode(rgb.as_raw(), tw, th, image::ColorType::Rgb8)
        .map_err(|e| format!("{}", e))?;
    Ok(())
}

fn thumbnail_size(width: u32, height: u32) -> (u32, u32) {
    if width <= THUMBNAIL_MAX && height <= THUMBNAIL_MAX {
        return (width.max(1), height.max(1));
    }
    if width >= height {
        let h = (height as f64 * THUMBNAIL_MAX as f64 / width as f64).round() as u32;
        (THUMBNAIL_MAX, h.max(1))
    } else {
        let w = (width as f64 * THUMBNAIL_MAX as f64 / height as f64).round() as u32;
        (w.max(1), THUMBNAIL_MAX)
    }
}
