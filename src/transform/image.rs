use std::fs::{self, File};
use std::io::{BufReader, Cursor};

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};
use serde::{Deserialize, Serialize};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::Hash32;
use crate::error::TransformError;
use crate::transform::{TaskReport, Transformer, emit, read};
use crate::{FileSet, TaskContext};

const JPEG_QUALITY: u8 = 80;

/// What the cache knows about a source image.
#[derive(Debug, Serialize, Deserialize)]
struct ImageMetadata {
    width: u32,
    height: u32,
    /// Whether the re-encoded file beat the source.
    smaller: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Png,
    Jpeg,
}

impl Kind {
    fn of(path: &Utf8Path) -> Option<Self> {
        match path.extension().map(str::to_ascii_lowercase).as_deref() {
            Some("png") => Some(Self::Png),
            Some("jpg" | "jpeg") => Some(Self::Jpeg),
            _ => None,
        }
    }
}

/// Lossless-ish image optimization with a content-addressed cache.
///
/// PNG and JPEG sources are re-encoded (kept only when smaller) and get a
/// lossless WebP sibling. Anything else is copied untouched.
pub struct ImageOptimizer {
    files: FileSet,
    dest: Utf8PathBuf,
    cache: Utf8PathBuf,
}

impl ImageOptimizer {
    pub fn new(files: FileSet, dest: impl Into<Utf8PathBuf>) -> Self {
        Self {
            files,
            dest: dest.into(),
            cache: Utf8PathBuf::from(".cache/img"),
        }
    }

    /// Where encoded images and their metadata are kept between builds.
    pub fn cache(mut self, cache: impl Into<Utf8PathBuf>) -> Self {
        self.cache = cache.into();
        self
    }

    /// Produces `(optimized, webp)` for one source, from the cache when
    /// possible.
    fn optimize(
        &self,
        cache: &Utf8Path,
        path: &Utf8Path,
        kind: Kind,
        buffer: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), TransformError> {
        let hash = Hash32::hash(buffer).to_hex();
        let path_meta = cache.join(format!("{hash}.meta.cbor"));
        let path_small = cache.join(format!("{hash}.min"));
        let path_webp = cache.join(format!("{hash}.webp"));

        let metadata = File::open(&path_meta)
            .ok()
            .and_then(|file| ciborium::from_reader::<ImageMetadata, _>(BufReader::new(file)).ok());

        // fast path
        if let Some(meta) = metadata
            && path_webp.exists()
            && (!meta.smaller || path_small.exists())
        {
            let small = match meta.smaller {
                true => read(&path_small)?,
                false => buffer.to_vec(),
            };
            return Ok((small, read(&path_webp)?));
        }

        let image = ImageReader::new(Cursor::new(buffer))
            .with_guessed_format()
            .map_err(|e| TransformError::io(path, e))?
            .decode()
            .map_err(|source| TransformError::Image {
                path: path.to_path_buf(),
                source,
            })?;

        let encoded = encode(&image, kind).map_err(|source| TransformError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let webp = encode_webp(&image).map_err(|source| TransformError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        let smaller = encoded.len() < buffer.len();

        emit(&path_webp, &webp)?;
        if smaller {
            emit(&path_small, &encoded)?;
        }

        let meta = ImageMetadata {
            width: image.width(),
            height: image.height(),
            smaller,
        };
        let file = File::create(&path_meta).map_err(|e| TransformError::io(&path_meta, e))?;
        ciborium::into_writer(&meta, file)
            .map_err(|e| TransformError::io(&path_meta, std::io::Error::other(e)))?;

        let small = if smaller { encoded } else { buffer.to_vec() };
        Ok((small, webp))
    }
}

fn encode(image: &DynamicImage, kind: Kind) -> image::ImageResult<Vec<u8>> {
    let mut out = Vec::new();

    match kind {
        Kind::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut out,
                CompressionType::Best,
                FilterType::Adaptive,
            );
            image.write_with_encoder(encoder)?;
        }
        Kind::Jpeg => {
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).write_image(
                &rgb,
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(out)
}

fn encode_webp(image: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let rgba = image.to_rgba8();
    let mut out = Vec::new();

    WebPEncoder::new_lossless(&mut out).encode(
        &rgba,
        rgba.width(),
        rgba.height(),
        ExtendedColorType::Rgba8,
    )?;

    Ok(out)
}

impl Transformer for ImageOptimizer {
    fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskReport, TransformError> {
        let mut report = TaskReport::new("images");
        let dest = ctx.path(&self.dest);
        let cache = ctx.path(&self.cache);

        fs::create_dir_all(&cache).map_err(|e| TransformError::io(&cache, e))?;

        let files = self.files.resolve(&ctx.env.root)?;
        ctx.span.pb_set_length(files.len() as u64);

        for file in files {
            let buffer = read(&file.path)?;
            let target = dest.join(&file.relative);

            match Kind::of(&file.path) {
                None => report.add(emit(&target, &buffer)?),
                Some(kind) => {
                    let (small, webp) = self.optimize(&cache, &file.path, kind, &buffer)?;
                    report.add(emit(&target, small)?);
                    report.add(emit(&target.with_extension("webp"), webp)?);
                }
            }

            ctx.span.pb_inc(1);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::Environment;
    use crate::transform::testing::{context, tempdir, write};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, 128])
        });
        let mut out = Vec::new();
        // fastest compression, so the optimizer has something to gain
        PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter)
            .write_image(&img, width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    fn optimizer() -> ImageOptimizer {
        let files = FileSet::new(["app/images/**/*"]).unwrap();
        ImageOptimizer::new(files, "dist/images")
    }

    #[test]
    fn test_png_gets_webp_sibling_and_never_grows() {
        let (_dir, root) = tempdir();
        let source = png(16, 16);
        write(&root, "app/images/icons/logo.png", &source);

        let env = Environment::new(&root);
        let report = optimizer().run(&context(&env)).unwrap();
        assert_eq!(report.files, 2);

        let out = fs::read(root.join("dist/images/icons/logo.png")).unwrap();
        assert!(out.len() <= source.len());
        image::load_from_memory(&out).unwrap();

        let webp = fs::read(root.join("dist/images/icons/logo.webp")).unwrap();
        assert_eq!(
            image::guess_format(&webp).unwrap(),
            image::ImageFormat::WebP
        );
    }

    #[test]
    fn test_other_formats_are_copied() {
        let (_dir, root) = tempdir();
        write(&root, "app/images/logo.svg", "<svg/>");

        let env = Environment::new(&root);
        optimizer().run(&context(&env)).unwrap();

        assert_eq!(
            fs::read_to_string(root.join("dist/images/logo.svg")).unwrap(),
            "<svg/>"
        );
        assert!(!root.join("dist/images/logo.webp").exists());
    }

    #[test]
    fn test_second_run_uses_cache_and_matches() {
        let (_dir, root) = tempdir();
        write(&root, "app/images/a.png", png(8, 8));

        let env = Environment::new(&root);
        optimizer().run(&context(&env)).unwrap();
        let first = fs::read(root.join("dist/images/a.webp")).unwrap();

        let cached = fs::read_dir(root.join(".cache/img")).unwrap().count();
        assert!(cached >= 2);

        fs::remove_dir_all(root.join("dist")).unwrap();
        optimizer().run(&context(&env)).unwrap();
        let second = fs::read(root.join("dist/images/a.webp")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_undecodable_image_is_recoverable() {
        let (_dir, root) = tempdir();
        write(&root, "app/images/broken.png", "not a png");

        let env = Environment::new(&root);
        let err = optimizer().run(&context(&env)).unwrap_err();
        assert!(err.is_recoverable());
    }
}
