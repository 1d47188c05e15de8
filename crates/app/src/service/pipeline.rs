//! Per-upload processing: stage → decode → downscale → estimate → annotate →
//! encode → store → clean up.
//!
//! Everything here is blocking and runs on an estimator worker thread, never
//! on the HTTP runtime.

use std::{
    io::{BufRead, Seek},
    time::Instant,
};

use image::{
    DynamicImage, ImageDecoder, ImageFormat, ImageReader, ImageResult, RgbImage,
    imageops::FilterType, metadata::Orientation,
};
use pose_core::{LandmarkSet, POSE_CONNECTIONS, PoseEstimator, RowingAnalysis, analyze_rowing};
use tracing::{debug, warn};

use crate::service::{
    annotation::{DrawingStyle, draw_landmarks},
    config::PipelineOptions,
    data::{ProcessedImage, Upload},
    encoding::{self, OutputFormat},
    error::ServiceError,
    storage::{StoredName, Storage},
};

/// Uniform factor that fits `width`×`height` inside `max_dimension`; never
/// above 1.0 so small images are left alone.
pub fn scale_factor(width: u32, height: u32, max_dimension: u32) -> f64 {
    let longest = width.max(height);
    if longest == 0 {
        return 1.0;
    }
    (f64::from(max_dimension) / f64::from(longest)).min(1.0)
}

/// Dimensions after applying `scale_factor`, rounded and at least one pixel.
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let scale = scale_factor(width, height, max_dimension);
    if scale >= 1.0 {
        return (width, height);
    }
    let w = (f64::from(width) * scale).round().max(1.0) as u32;
    let h = (f64::from(height) * scale).round().max(1.0) as u32;
    (w, h)
}

pub fn downscale(image: DynamicImage, max_dimension: Option<u32>) -> DynamicImage {
    let Some(max_dimension) = max_dimension else {
        return image;
    };
    let (width, height) = (image.width(), image.height());
    let (w, h) = scaled_dimensions(width, height, max_dimension);
    if (w, h) == (width, height) {
        return image;
    }
    debug!("downscaling {width}x{height} -> {w}x{h}");
    image.resize_exact(w, h, FilterType::Triangle)
}

/// Decode with the orientation tag applied, so a portrait phone photo comes
/// out upright instead of lying on its side.
pub fn decode_upright<R: BufRead + Seek>(reader: ImageReader<R>) -> ImageResult<DynamicImage> {
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

/// Result of running the model over a decoded frame.
pub struct AnnotatedFrame {
    pub image: RgbImage,
    pub landmarks: Option<LandmarkSet>,
    pub analysis: Option<RowingAnalysis>,
}

/// Downscale, convert to RGB, estimate, and draw the skeleton when a body was
/// found. Frames without a detection come back untouched.
pub fn annotate_frame(
    estimator: &mut dyn PoseEstimator,
    image: DynamicImage,
    opts: &PipelineOptions,
) -> Result<AnnotatedFrame, ServiceError> {
    let image = timed("resize", || downscale(image, opts.max_dimension));
    let mut rgb = timed("convert", || image.into_rgb8());

    let landmarks = timed("estimate", || estimator.estimate(&rgb)).map_err(ServiceError::Estimator)?;

    let analysis = landmarks.as_ref().map(|set| {
        timed("annotate", || {
            draw_landmarks(&mut rgb, set, &POSE_CONNECTIONS, &DrawingStyle::default())
        });
        analyze_rowing(set)
    });

    Ok(AnnotatedFrame {
        image: rgb,
        landmarks,
        analysis,
    })
}

/// Run one upload through the full pipeline and persist the result.
pub fn process_upload(
    estimator: &mut dyn PoseEstimator,
    storage: &Storage,
    upload: Upload,
    opts: &PipelineOptions,
) -> Result<ProcessedImage, ServiceError> {
    let Upload {
        key,
        original_filename,
        bytes,
    } = upload;

    let staged = timed("stage", || storage.stage(&key, &bytes))?;
    drop(bytes);

    let (decoded, sniffed) = timed("decode", || -> Result<_, ServiceError> {
        let reader = ImageReader::open(staged.path())?.with_guessed_format()?;
        let sniffed = reader.format();
        let image = decode_upright(reader).map_err(ServiceError::Decode)?;
        Ok((image, sniffed))
    })?;

    let format = output_format(&original_filename, sniffed);
    let frame = annotate_frame(estimator, decoded, opts)?;

    let name = StoredName::new(key, format);
    let encoded = timed("encode", || encoding::encode(&frame.image, format, opts.jpeg_quality))
        .map_err(ServiceError::Encode)?;
    timed("store", || std::fs::write(storage.processed_path(&name), &encoded))?;

    if let Err(err) = staged.remove() {
        warn!("failed to remove staged upload for {name}: {err}");
    }

    Ok(ProcessedImage {
        name,
        original_filename,
        width: frame.image.width(),
        height: frame.image.height(),
        landmarks_detected: frame.landmarks.is_some(),
        analysis: frame.analysis,
    })
}

/// Keep the format the client named, else the one the bytes were in, else JPEG.
fn output_format(original_filename: &str, sniffed: Option<ImageFormat>) -> OutputFormat {
    OutputFormat::from_filename(original_filename)
        .or_else(|| sniffed.and_then(OutputFormat::from_image_format))
        .unwrap_or(OutputFormat::Jpeg)
}

fn timed<T>(stage: &'static str, f: impl FnOnce() -> T) -> T {
    let _span = tracing::info_span!("pipeline.stage", stage).entered();
    let start = Instant::now();
    let out = f();
    metrics::histogram!("pose_stage_latency_seconds", "stage" => stage)
        .record(start.elapsed().as_secs_f64());
    out
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use image::Rgb;
    use pose_core::{LANDMARK_COUNT, Landmark};

    use super::*;
    use crate::service::storage::UploadKey;

    struct Scripted(Option<LandmarkSet>);

    impl PoseEstimator for Scripted {
        fn estimate(&mut self, _frame: &RgbImage) -> Result<Option<LandmarkSet>> {
            Ok(self.0.clone())
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn standing_figure() -> LandmarkSet {
        let mut landmarks = vec![Landmark::new(0.5, 0.5); LANDMARK_COUNT];
        landmarks[11] = Landmark::new(0.35, 0.3);
        landmarks[12] = Landmark::new(0.65, 0.3);
        landmarks[23] = Landmark::new(0.4, 0.6);
        landmarks[24] = Landmark::new(0.6, 0.6);
        LandmarkSet::new(landmarks, 0.9).unwrap()
    }

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 40]))
    }

    fn png_bytes(image: &RgbImage) -> Vec<u8> {
        encoding::encode(image, OutputFormat::Png, 95).unwrap()
    }

    #[test]
    fn scale_factor_only_shrinks() {
        assert_eq!(scale_factor(2000, 1000, 1000), 0.5);
        assert_eq!(scale_factor(500, 300, 1000), 1.0);
        assert_eq!(scaled_dimensions(500, 300, 1000), (500, 300));
    }

    #[test]
    fn larger_side_lands_exactly_on_the_ceiling() {
        for (w, h) in [(4032, 3024), (3024, 4032), (1025, 7), (1999, 1999), (5000, 1)] {
            let (sw, sh) = scaled_dimensions(w, h, 1024);
            assert_eq!(sw.max(sh), 1024, "{w}x{h} -> {sw}x{sh}");
            assert!(sw >= 1 && sh >= 1);
        }
    }

    #[test]
    fn no_detection_leaves_pixels_untouched() {
        let source = gradient(64, 48);
        let mut estimator = Scripted(None);
        let frame = annotate_frame(
            &mut estimator,
            DynamicImage::ImageRgb8(source.clone()),
            &PipelineOptions::default(),
        )
        .unwrap();
        assert!(frame.landmarks.is_none());
        assert!(frame.analysis.is_none());
        assert_eq!(frame.image, source);
    }

    #[test]
    fn detection_draws_overlay_and_analysis() {
        let source = gradient(64, 48);
        let mut estimator = Scripted(Some(standing_figure()));
        let frame = annotate_frame(
            &mut estimator,
            DynamicImage::ImageRgb8(source.clone()),
            &PipelineOptions::default(),
        )
        .unwrap();
        assert!(frame.analysis.is_some());
        assert_ne!(frame.image, source);
    }

    #[test]
    fn upload_is_stored_under_generated_name_and_staging_is_cleared() {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::init(root.path().join("uploads"), root.path().join("processed")).unwrap();
        let source = gradient(40, 30);
        let upload = Upload {
            key: UploadKey::generate(),
            original_filename: "../../etc/passwd.png".into(),
            bytes: png_bytes(&source),
        };
        let mut estimator = Scripted(None);
        let processed = process_upload(&mut estimator, &storage, upload, &PipelineOptions::default()).unwrap();

        assert_eq!(processed.name.format(), OutputFormat::Png);
        assert_eq!((processed.width, processed.height), (40, 30));
        let stored = storage.read_processed(&processed.name).unwrap().unwrap();
        assert_eq!(image::load_from_memory(&stored).unwrap().to_rgb8(), source);
        assert_eq!(std::fs::read_dir(storage.uploads_dir()).unwrap().count(), 0);
        assert!(!root.path().join("etc").exists());
    }

    #[test]
    fn oversized_upload_is_downscaled_before_storage() {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::init(root.path().join("uploads"), root.path().join("processed")).unwrap();
        let upload = Upload {
            key: UploadKey::generate(),
            original_filename: "wide.png".into(),
            bytes: png_bytes(&gradient(300, 120)),
        };
        let opts = PipelineOptions {
            max_dimension: Some(100),
            ..PipelineOptions::default()
        };
        let processed = process_upload(&mut Scripted(None), &storage, upload, &opts).unwrap();
        assert_eq!((processed.width, processed.height), (100, 40));
    }

    #[test]
    fn undecodable_upload_fails_and_cleans_staging() {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::init(root.path().join("uploads"), root.path().join("processed")).unwrap();
        let upload = Upload {
            key: UploadKey::generate(),
            original_filename: "broken.jpg".into(),
            bytes: b"definitely not an image".to_vec(),
        };
        let err = process_upload(&mut Scripted(None), &storage, upload, &PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, ServiceError::Decode(_)));
        assert_eq!(std::fs::read_dir(storage.uploads_dir()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(storage.processed_dir()).unwrap().count(), 0);
    }

    /// JPEG carrying an Exif APP1 segment with the given orientation tag.
    fn jpeg_with_orientation(image: &RgbImage, orientation: u8) -> Vec<u8> {
        let jpeg = encoding::encode(image, OutputFormat::Jpeg, 90).unwrap();
        let mut tiff = b"MM\0\x2a\0\0\0\x08".to_vec();
        tiff.extend_from_slice(&[0x00, 0x01]);
        tiff.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        tiff.extend_from_slice(&[0x00, orientation, 0x00, 0x00]);
        tiff.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        let payload = [&b"Exif\0\0"[..], &tiff[..]].concat();
        let length = u16::try_from(payload.len() + 2).unwrap();

        // Place the segment after SOI and the JFIF header, if there is one.
        let mut at = 2;
        if jpeg[2..4] == [0xff, 0xe0] {
            at += 2 + usize::from(u16::from_be_bytes([jpeg[4], jpeg[5]]));
        }
        let mut out = jpeg[..at].to_vec();
        out.extend_from_slice(&[0xff, 0xe1]);
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[at..]);
        out
    }

    #[test]
    fn rotated_phone_photo_is_stored_upright() {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::init(root.path().join("uploads"), root.path().join("processed")).unwrap();
        // Sensor stores 40x20; Orientation=6 displays it as 20x40.
        let upload = Upload {
            key: UploadKey::generate(),
            original_filename: "portrait.jpg".into(),
            bytes: jpeg_with_orientation(&gradient(40, 20), 6),
        };
        let processed = process_upload(&mut Scripted(None), &storage, upload, &PipelineOptions::default()).unwrap();
        assert_eq!((processed.width, processed.height), (20, 40));

        let stored = storage.read_processed(&processed.name).unwrap().unwrap();
        let decoded = image::load_from_memory(&stored).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 40));
    }

    #[test]
    fn untagged_jpeg_keeps_its_dimensions() {
        let bytes = jpeg_with_orientation(&gradient(40, 20), 1);
        let reader = ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format().unwrap();
        let image = decode_upright(reader).unwrap();
        assert_eq!((image.width(), image.height()), (40, 20));
    }

    #[test]
    fn webp_upload_decodes_and_is_stored_as_jpeg() {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::init(root.path().join("uploads"), root.path().join("processed")).unwrap();
        let mut bytes = Vec::new();
        gradient(24, 16)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::WebP)
            .unwrap();
        let upload = Upload {
            key: UploadKey::generate(),
            original_filename: "clip.webp".into(),
            bytes,
        };
        let processed = process_upload(&mut Scripted(None), &storage, upload, &PipelineOptions::default()).unwrap();
        assert_eq!(processed.name.format(), OutputFormat::Jpeg);
        assert_eq!((processed.width, processed.height), (24, 16));
    }

    #[test]
    fn unknown_extension_falls_back_to_sniffed_format() {
        assert_eq!(output_format("photo", Some(ImageFormat::Png)), OutputFormat::Png);
        assert_eq!(output_format("photo.gif", None), OutputFormat::Jpeg);
        assert_eq!(output_format("photo.JPG", Some(ImageFormat::Png)), OutputFormat::Jpeg);
    }
}
