//! Geometry cropping: cut a figure region out of a source document.
//!
//! Two coordinate systems meet here:
//!
//! * **PDF** — analyzer geometry is in page units. The page is rendered at
//!   `crop_dpi` (300 DPI by default, a `300/72` scale over points) and the
//!   box is scaled into that raster before clipping, so small chart labels
//!   stay legible.
//! * **Raster** — geometry is in pixels of one frame. Multi-frame TIFFs are
//!   advanced to the requested frame first; PNG/JPEG only have frame 0.
//!
//! pdfium and the TIFF decoder are blocking and CPU-bound, so every crop runs
//! inside `spawn_blocking`.

use crate::analysis::BBox;
use crate::config::IngestConfig;
use crate::error::FigChunkError;
use crate::pipeline::input::{doc_name, SourceKind};
use image::{imageops, DynamicImage, GrayAlphaImage, GrayImage, Rgb, RgbImage, RgbaImage};
use pdfium_render::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;
use tracing::debug;

/// A document the cropper can address: its path, media family and identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub kind: SourceKind,
    /// Identifier used in artifact names (file stem).
    pub name: String,
}

impl SourceDocument {
    /// Classify `path`; fails with `UnsupportedFormat` for unknown media types.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FigChunkError> {
        let path = path.as_ref();
        let kind = SourceKind::detect(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            name: doc_name(path),
        })
    }

    /// Override the identifier (e.g. when the file was downloaded under a temp name).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Owned crop parameters, cheap to move into a blocking task.
#[derive(Debug, Clone)]
pub struct CropSettings {
    pub dpi: u32,
    pub pdf_unit_scale: f32,
    pub password: Option<String>,
}

impl CropSettings {
    /// Pixels per PDF point at `dpi`.
    pub fn render_scale(&self) -> f32 {
        self.dpi as f32 / 72.0
    }
}

impl From<&IngestConfig> for CropSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            dpi: config.crop_dpi,
            pdf_unit_scale: config.pdf_unit_scale,
            password: config.password.clone(),
        }
    }
}

/// Crop `bbox` from page/frame `page_index` (0-based) of `doc`.
pub async fn crop(
    doc: &SourceDocument,
    page_index: usize,
    bbox: BBox,
    settings: &CropSettings,
) -> Result<RgbImage, FigChunkError> {
    let doc = doc.clone();
    let settings = settings.clone();

    tokio::task::spawn_blocking(move || crop_blocking(&doc, page_index, bbox, &settings))
        .await
        .map_err(|e| FigChunkError::Internal(format!("Crop task panicked: {}", e)))?
}

/// Blocking implementation of [`crop`].
pub fn crop_blocking(
    doc: &SourceDocument,
    page_index: usize,
    bbox: BBox,
    settings: &CropSettings,
) -> Result<RgbImage, FigChunkError> {
    let img = match doc.kind {
        SourceKind::Pdf => crop_pdf_page(&doc.path, page_index, bbox, settings)?,
        SourceKind::Tiff => {
            let frame = load_tiff_frame(&doc.path, page_index)?;
            crop_pixels(&frame, bbox).map_err(|detail| FigChunkError::RasterisationFailed {
                page: page_index + 1,
                detail,
            })?
        }
        SourceKind::Raster => {
            if page_index != 0 {
                return Err(FigChunkError::PageOutOfRange {
                    page: page_index + 1,
                    total: 1,
                });
            }
            let frame = image::open(&doc.path)
                .map_err(|e| FigChunkError::CorruptDocument {
                    path: doc.path.clone(),
                    detail: e.to_string(),
                })?
                .to_rgb8();
            crop_pixels(&frame, bbox).map_err(|detail| FigChunkError::RasterisationFailed {
                page: 1,
                detail,
            })?
        }
    };

    debug!(
        "Cropped {} page {} → {}x{} px",
        doc.name,
        page_index + 1,
        img.width(),
        img.height()
    );
    Ok(img)
}

// ── PDF ──────────────────────────────────────────────────────────────────

fn crop_pdf_page(
    path: &Path,
    page_index: usize,
    bbox: BBox,
    settings: &CropSettings,
) -> Result<RgbImage, FigChunkError> {
    let pdfium = bind_pdfium()?;
    let password = settings.password.as_deref();

    let document = pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                FigChunkError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                FigChunkError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            FigChunkError::CorruptDocument {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if page_index >= total {
        return Err(FigChunkError::PageOutOfRange {
            page: page_index + 1,
            total,
        });
    }

    let page = pages
        .get(page_index as u16)
        .map_err(|e| FigChunkError::RasterisationFailed {
            page: page_index + 1,
            detail: format!("{:?}", e),
        })?;

    let scale = settings.render_scale();
    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| FigChunkError::RasterisationFailed {
            page: page_index + 1,
            detail: format!("{:?}", e),
        })?;
    let rendered = bitmap.as_image().to_rgb8();

    let pixel_box = pdf_pixel_box(bbox, settings.pdf_unit_scale, scale);
    crop_pixels(&rendered, pixel_box).map_err(|detail| FigChunkError::RasterisationFailed {
        page: page_index + 1,
        detail,
    })
}

/// Map an analyzer box to pixels of a page rendered at `render_scale`.
///
/// Analyzer units → points (`unit_scale`) → pixels (`render_scale`). Both the
/// analyzer and the rendered bitmap use a top-left origin.
pub fn pdf_pixel_box(bbox: BBox, unit_scale: f32, render_scale: f32) -> BBox {
    bbox.scale(unit_scale as f64 * render_scale as f64)
}

/// Bind pdfium from `PDFIUM_LIB_PATH` (file or directory) or the system.
fn bind_pdfium() -> Result<Pdfium, FigChunkError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let p = PathBuf::from(p);
            let lib = if p.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&p)
            } else {
                p
            };
            Pdfium::bind_to_library(lib)
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| FigChunkError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

// ── Raster ───────────────────────────────────────────────────────────────

/// Decode frame `frame_index` of a (possibly multi-frame) TIFF as RGB.
fn load_tiff_frame(path: &Path, frame_index: usize) -> Result<RgbImage, FigChunkError> {
    let corrupt = |detail: String| FigChunkError::CorruptDocument {
        path: path.to_path_buf(),
        detail,
    };

    let file = File::open(path).map_err(|e| corrupt(e.to_string()))?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;

    for seen in 0..frame_index {
        if !decoder.more_images() {
            return Err(FigChunkError::PageOutOfRange {
                page: frame_index + 1,
                total: seen + 1,
            });
        }
        decoder.next_image().map_err(|e| corrupt(e.to_string()))?;
    }

    let (width, height) = decoder.dimensions().map_err(|e| corrupt(e.to_string()))?;
    let color = decoder.colortype().map_err(|e| corrupt(e.to_string()))?;
    let data = decoder.read_image().map_err(|e| corrupt(e.to_string()))?;

    let samples = match data {
        DecodingResult::U8(buf) => buf,
        DecodingResult::U16(buf) => buf.into_iter().map(|v| (v >> 8) as u8).collect(),
        _ => return Err(corrupt(format!("unsupported sample format for {:?}", color))),
    };

    let short = || {
        corrupt(format!(
            "frame {} holds fewer samples than {}x{}",
            frame_index, width, height
        ))
    };
    let image = match color {
        ColorType::RGB(_) => RgbImage::from_raw(width, height, samples).ok_or_else(short)?,
        ColorType::RGBA(_) => DynamicImage::ImageRgba8(
            RgbaImage::from_raw(width, height, samples).ok_or_else(short)?,
        )
        .to_rgb8(),
        ColorType::Gray(_) => DynamicImage::ImageLuma8(
            GrayImage::from_raw(width, height, samples).ok_or_else(short)?,
        )
        .to_rgb8(),
        ColorType::GrayA(_) => DynamicImage::ImageLumaA8(
            GrayAlphaImage::from_raw(width, height, samples).ok_or_else(short)?,
        )
        .to_rgb8(),
        other => return Err(corrupt(format!("unsupported colour type {:?}", other))),
    };
    Ok(image)
}

/// Clip `bbox` (pixels) out of `img`, rounding outward and clamping to bounds.
pub fn crop_pixels(img: &RgbImage, bbox: BBox) -> Result<RgbImage, String> {
    let (w, h) = (img.width() as f64, img.height() as f64);
    let x0 = bbox.x0.floor().clamp(0.0, w) as u32;
    let y0 = bbox.y0.floor().clamp(0.0, h) as u32;
    let x1 = bbox.x1.ceil().clamp(0.0, w) as u32;
    let y1 = bbox.y1.ceil().clamp(0.0, h) as u32;

    if x1 <= x0 || y1 <= y0 {
        return Err(format!(
            "crop box ({:.1}, {:.1})–({:.1}, {:.1}) lies outside the {}x{} image",
            bbox.x0,
            bbox.y0,
            bbox.x1,
            bbox.y1,
            img.width(),
            img.height()
        ));
    }

    Ok(imageops::crop_imm(img, x0, y0, x1 - x0, y1 - y0).to_image())
}

/// Stack crops top-to-bottom on a white canvas as wide as the widest crop.
pub fn stack_vertically(crops: &[RgbImage]) -> RgbImage {
    let width = crops.iter().map(|c| c.width()).max().unwrap_or(0);
    let height = crops.iter().map(|c| c.height()).sum();
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut y = 0i64;
    for crop in crops {
        imageops::replace(&mut canvas, crop, 0, y);
        y += crop.height() as i64;
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, 0]))
    }

    #[test]
    fn crop_pixels_cuts_exact_region() {
        let img = gradient(100, 80);
        let out = crop_pixels(&img, BBox { x0: 10.0, y0: 20.0, x1: 60.0, y1: 50.0 }).unwrap();
        assert_eq!(out.dimensions(), (50, 30));
        assert_eq!(out.get_pixel(0, 0), &Rgb([10, 20, 0]));
    }

    #[test]
    fn crop_pixels_rounds_outward_and_clamps() {
        let img = gradient(100, 80);
        let out = crop_pixels(&img, BBox { x0: 90.4, y0: 70.6, x1: 140.0, y1: 95.0 }).unwrap();
        assert_eq!(out.dimensions(), (10, 10));
    }

    #[test]
    fn crop_pixels_outside_image_fails() {
        let img = gradient(10, 10);
        assert!(crop_pixels(&img, BBox { x0: 20.0, y0: 20.0, x1: 30.0, y1: 30.0 }).is_err());
    }

    #[test]
    fn pdf_box_uses_points_then_render_scale() {
        // 1in x 1in at (1in, 2in); 72 pt/in; 300 DPI
        let px = pdf_pixel_box(BBox { x0: 1.0, y0: 2.0, x1: 2.0, y1: 3.0 }, 72.0, 300.0 / 72.0);
        assert!((px.x0 - 300.0).abs() < 1e-3);
        assert!((px.y0 - 600.0).abs() < 1e-3);
        assert!((px.width() - 300.0).abs() < 1e-3);
    }

    #[test]
    fn render_scale_follows_dpi() {
        let settings = CropSettings::from(&IngestConfig::default());
        assert!((settings.render_scale() - 300.0 / 72.0).abs() < 1e-6);
        let px = pdf_pixel_box(
            BBox { x0: 0.0, y0: 0.0, x1: 1.0, y1: 1.0 },
            settings.pdf_unit_scale,
            settings.render_scale(),
        );
        assert!((px.width() - 300.0).abs() < 1e-3);
    }

    #[test]
    fn stack_vertically_sizes_canvas() {
        let out = stack_vertically(&[gradient(40, 10), gradient(20, 5)]);
        assert_eq!(out.dimensions(), (40, 15));
        assert_eq!(out.get_pixel(39, 14), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(1, 11), &Rgb([1, 1, 0]));
    }

    fn write_two_frame_tiff(path: &Path) {
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(file).unwrap();
        let red: Vec<u8> = [200u8, 0, 0].repeat(30 * 20);
        let blue: Vec<u8> = [0u8, 0, 200].repeat(30 * 20);
        encoder.write_image::<colortype::RGB8>(30, 20, &red).unwrap();
        encoder.write_image::<colortype::RGB8>(30, 20, &blue).unwrap();
    }

    #[test]
    fn tiff_frame_is_selected_by_page_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.tiff");
        write_two_frame_tiff(&path);
        let doc = SourceDocument::open(&path).unwrap();
        let settings = CropSettings { dpi: 300, pdf_unit_scale: 72.0, password: None };
        let bbox = BBox { x0: 5.0, y0: 5.0, x1: 15.0, y1: 10.0 };

        let first = crop_blocking(&doc, 0, bbox, &settings).unwrap();
        let second = crop_blocking(&doc, 1, bbox, &settings).unwrap();
        assert_eq!(first.dimensions(), (10, 5));
        assert_eq!(first.get_pixel(0, 0), &Rgb([200, 0, 0]));
        assert_eq!(second.get_pixel(0, 0), &Rgb([0, 0, 200]));

        let err = crop_blocking(&doc, 5, bbox, &settings).unwrap_err();
        assert!(matches!(err, FigChunkError::PageOutOfRange { .. }));
    }

    #[test]
    fn single_raster_rejects_other_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        gradient(20, 20).save(&path).unwrap();
        let doc = SourceDocument::open(&path).unwrap();
        let settings = CropSettings { dpi: 300, pdf_unit_scale: 72.0, password: None };
        let bbox = BBox { x0: 0.0, y0: 0.0, x1: 5.0, y1: 5.0 };

        assert_eq!(crop_blocking(&doc, 0, bbox, &settings).unwrap().dimensions(), (5, 5));
        assert!(matches!(
            crop_blocking(&doc, 1, bbox, &settings),
            Err(FigChunkError::PageOutOfRange { page: 2, total: 1 })
        ));
    }

    #[test]
    fn unsupported_document_is_rejected_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readme.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(matches!(
            SourceDocument::open(&path),
            Err(FigChunkError::UnsupportedFormat { .. })
        ));
    }
}
