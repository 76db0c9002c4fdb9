//! Document composition: ordered page images → one PDF, one page per image.
//!
//! Each page is exactly as large as its image at 96 DPI
//! (1 px = [`PX_TO_MM`] mm) and the image fills it edge to edge.
//!
//! ## Why embed JPEG bytes verbatim?
//!
//! PDF understands baseline JPEG natively (`DCTDecode`), so JPEG pages are
//! copied into the document untouched. That keeps the `_max` artifact
//! lossless with respect to its sources and makes the `_min` artifact's size
//! track the compressor's quality setting. Other formats are decoded and
//! stored as Flate-compressed RGB.

use crate::error::PdfImgError;
use crate::pipeline::encode::load_image;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{ColorType, ImageDecoder, ImageFormat, ImageReader};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Physical size of one pixel in millimetres (96 DPI).
pub const PX_TO_MM: f32 = 0.264583;

/// PDF user-space units (points) per millimetre.
const PT_PER_MM: f32 = 72.0 / 25.4;

/// A page to be placed: one image and its pixel size.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpec {
    pub image: PathBuf,
    pub width_px: u32,
    pub height_px: u32,
}

impl PageSpec {
    pub fn width_mm(&self) -> f32 {
        self.width_px as f32 * PX_TO_MM
    }

    pub fn height_mm(&self) -> f32 {
        self.height_px as f32 * PX_TO_MM
    }

    fn size_pt(&self) -> (f32, f32) {
        (self.width_mm() * PT_PER_MM, self.height_mm() * PT_PER_MM)
    }
}

/// What [`compose_document`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposedDocument {
    pub pages: usize,
    pub bytes: u64,
}

/// An image XObject ready to insert, plus its pixel size.
struct EmbeddedImage {
    stream: Stream,
    width_px: u32,
    height_px: u32,
}

/// Assemble `images`, in the given order, into a PDF at `dest`.
///
/// The file is written to a sibling `.tmp` and renamed into place, so an
/// existing artifact is only replaced by a complete one.
pub fn compose_document(images: &[PathBuf], dest: &Path) -> Result<ComposedDocument, PdfImgError> {
    let assembly_err = |detail: String| PdfImgError::AssemblyFailed {
        path: dest.to_path_buf(),
        detail,
    };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(images.len());

    for image in images {
        let embedded = embed_image(image)?;
        let spec = PageSpec {
            image: image.clone(),
            width_px: embedded.width_px,
            height_px: embedded.height_px,
        };
        let page_id = add_page(&mut doc, pages_id, &spec, embedded.stream)
            .map_err(|e| assembly_err(e.to_string()))?;
        debug!(
            "Placed {} on a {:.1}×{:.1} mm page",
            image.display(),
            spec.width_mm(),
            spec.height_mm()
        );
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => images.len() as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut tmp_name = dest.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = dest.with_file_name(tmp_name);
    doc.save(&tmp_path)
        .map_err(|e| assembly_err(e.to_string()))?;
    std::fs::rename(&tmp_path, dest).map_err(|e| PdfImgError::io(dest, e))?;

    let bytes = std::fs::metadata(dest)
        .map_err(|e| PdfImgError::io(dest, e))?
        .len();
    Ok(ComposedDocument {
        pages: images.len(),
        bytes,
    })
}

/// Append one page showing `image` scaled to the full page.
fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    spec: &PageSpec,
    image: Stream,
) -> Result<ObjectId, lopdf::Error> {
    let (width_pt, height_pt) = spec.size_pt();
    let image_id = doc.add_object(image);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::from(width_pt),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::from(height_pt),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::from(width_pt),
            Object::from(height_pt),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    }))
}

/// Build the image XObject for `path`.
fn embed_image(path: &Path) -> Result<EmbeddedImage, PdfImgError> {
    let reader = ImageReader::open(path)
        .map_err(|e| PdfImgError::io(path, e))?
        .with_guessed_format()
        .map_err(|e| PdfImgError::io(path, e))?;

    if reader.format() == Some(ImageFormat::Jpeg) {
        let decoder = reader
            .into_decoder()
            .map_err(|e| PdfImgError::image(path, e))?;
        let (width_px, height_px) = decoder.dimensions();
        let bytes = std::fs::read(path).map_err(|e| PdfImgError::io(path, e))?;
        // Decoders report CMYK/YCCK files as RGB after conversion; only the
        // frame header tells what DCTDecode will actually see.
        let color_space = match (decoder.color_type(), jpeg_components(&bytes)) {
            (ColorType::L8, Some(1)) => Some("DeviceGray"),
            (ColorType::Rgb8, Some(3)) => Some("DeviceRGB"),
            _ => None,
        };
        if let Some(color_space) = color_space {
            let dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width_px as i64,
                "Height" => height_px as i64,
                "ColorSpace" => color_space,
                "BitsPerComponent" => 8i64,
                "Filter" => "DCTDecode",
            };
            return Ok(EmbeddedImage {
                stream: Stream::new(dict, bytes),
                width_px,
                height_px,
            });
        }
        debug!("Re-encoding {} for embedding", path.display());
    }

    let rgb = load_image(path)?.to_rgb8();
    let (width_px, height_px) = rgb.dimensions();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(rgb.as_raw())
        .map_err(|e| PdfImgError::io(path, e))?;
    let deflated = encoder.finish().map_err(|e| PdfImgError::io(path, e))?;

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width_px as i64,
        "Height" => height_px as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8i64,
        "Filter" => "FlateDecode",
    };
    Ok(EmbeddedImage {
        stream: Stream::new(dict, deflated),
        width_px,
        height_px,
    })
}

/// Component count declared by the first SOF frame header of a JPEG stream.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    loop {
        // Markers may be preceded by any number of 0xFF fill bytes.
        while *bytes.get(pos)? != 0xFF {
            pos += 1;
        }
        while *bytes.get(pos)? == 0xFF {
            pos += 1;
        }
        let marker = *bytes.get(pos)?;
        pos += 1;
        match marker {
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD7 => continue,
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let len = u16::from_be_bytes([*bytes.get(pos)?, *bytes.get(pos + 1)?]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            // length(2) precision(1) height(2) width(2) components(1)
            return bytes.get(pos + 7).copied();
        }
        pos += len;
    }
}

/// Page sizes of an existing PDF in millimetres, in page order.
pub fn inspect_document(path: &Path) -> Result<Vec<(f32, f32)>, PdfImgError> {
    let doc = Document::load(path).map_err(|e| PdfImgError::CorruptPdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let corrupt = |detail: String| PdfImgError::CorruptPdf {
        path: path.to_path_buf(),
        detail,
    };

    doc.get_pages()
        .into_values()
        .map(|page_id| {
            let media_box = doc
                .get_object(page_id)
                .and_then(Object::as_dict)
                .and_then(|d| d.get(b"MediaBox"))
                .and_then(Object::as_array)
                .map_err(|e| corrupt(e.to_string()))?;
            let n: Vec<f32> = media_box.iter().filter_map(as_number).collect();
            if n.len() != 4 {
                return Err(corrupt(format!("bad MediaBox on page {:?}", page_id)));
            }
            Ok(((n[2] - n[0]) / PT_PER_MM, (n[3] - n[1]) / PT_PER_MM))
        })
        .collect()
}

fn as_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::save_jpeg;
    use image::codecs::jpeg::JpegEncoder;
    use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

    fn page(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([10, 20, 30])));
        if name.ends_with(".png") {
            img.save(&path).unwrap();
        } else {
            save_jpeg(&img, &path, 90).unwrap();
        }
        path
    }

    #[test]
    fn page_spec_converts_pixels_to_mm() {
        let spec = PageSpec {
            image: PathBuf::from("x.jpg"),
            width_px: 1000,
            height_px: 500,
        };
        assert!((spec.width_mm() - 264.583).abs() < 1e-3);
        assert!((spec.height_mm() - 132.2915).abs() < 1e-3);
    }

    #[test]
    fn pages_match_image_sizes_and_order() {
        let tmp = tempfile::tempdir().unwrap();
        let images = vec![
            page(tmp.path(), "page-0001.jpg", 300, 400),
            page(tmp.path(), "page-0002.png", 120, 80),
            page(tmp.path(), "page-0003.jpg", 50, 50),
        ];
        let dest = tmp.path().join("out_max.pdf");

        let composed = compose_document(&images, &dest).unwrap();
        assert_eq!(composed.pages, 3);
        assert_eq!(composed.bytes, std::fs::metadata(&dest).unwrap().len());
        assert!(!tmp.path().join("out_max.pdf.tmp").exists());

        let sizes = inspect_document(&dest).unwrap();
        let expected = [(300.0, 400.0), (120.0, 80.0), (50.0, 50.0)];
        assert_eq!(sizes.len(), 3);
        for ((w, h), (pw, ph)) in sizes.iter().zip(expected) {
            assert!((w - pw * PX_TO_MM).abs() < 0.01, "{w} vs {}", pw * PX_TO_MM);
            assert!((h - ph * PX_TO_MM).abs() < 0.01, "{h} vs {}", ph * PX_TO_MM);
        }
    }

    #[test]
    fn jpeg_bytes_are_embedded_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let jpg = page(tmp.path(), "p.jpg", 64, 64);
        let embedded = embed_image(&jpg).unwrap();
        assert_eq!(embedded.stream.content, std::fs::read(&jpg).unwrap());
        assert_eq!((embedded.width_px, embedded.height_px), (64, 64));
    }

    #[test]
    fn recomposing_overwrites_existing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("doc_min.pdf");
        let big = vec![page(tmp.path(), "a.jpg", 400, 400)];
        let small = vec![page(tmp.path(), "b.jpg", 20, 20)];
        compose_document(&big, &dest).unwrap();
        compose_document(&small, &dest).unwrap();
        let sizes = inspect_document(&dest).unwrap();
        assert_eq!(sizes.len(), 1);
        assert!((sizes[0].0 - 20.0 * PX_TO_MM).abs() < 0.01);
    }

    #[test]
    fn unreadable_image_fails_assembly() {
        let tmp = tempfile::tempdir().unwrap();
        let bogus = tmp.path().join("bogus.jpg");
        std::fs::write(&bogus, b"not an image").unwrap();
        assert!(compose_document(&[bogus], &tmp.path().join("x.pdf")).is_err());
        assert!(!tmp.path().join("x.pdf").exists());
    }

    fn gray_jpeg(dir: &Path) -> PathBuf {
        let path = dir.join("gray.jpg");
        let mut buf = Vec::new();
        DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([90])))
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 90))
            .unwrap();
        std::fs::write(&path, buf).unwrap();
        path
    }

    #[test]
    fn frame_header_component_count() {
        let tmp = tempfile::tempdir().unwrap();
        let rgb = page(tmp.path(), "rgb.jpg", 16, 16);
        assert_eq!(jpeg_components(&std::fs::read(&rgb).unwrap()), Some(3));

        let gray = gray_jpeg(tmp.path());
        assert_eq!(jpeg_components(&std::fs::read(&gray).unwrap()), Some(1));

        // SOI, APP14 "Adobe" segment, SOF0 declaring four components.
        let mut cmyk = vec![0xFF, 0xD8, 0xFF, 0xEE, 0x00, 0x07, b'A', b'd', b'o', b'b', b'e'];
        cmyk.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x14, 0x08, 0x00, 0x10, 0x00, 0x10, 0x04]);
        assert_eq!(jpeg_components(&cmyk), Some(4));

        assert_eq!(jpeg_components(b"not a jpeg"), None);
        assert_eq!(jpeg_components(&[0xFF, 0xD8, 0xFF, 0xC0, 0x00]), None);
    }

    #[test]
    fn gray_jpeg_is_embedded_as_gray() {
        let tmp = tempfile::tempdir().unwrap();
        let gray = gray_jpeg(tmp.path());
        let embedded = embed_image(&gray).unwrap();
        assert_eq!(embedded.stream.dict.get(b"ColorSpace").unwrap().as_name().unwrap(), b"DeviceGray");
        assert_eq!(embedded.stream.content, std::fs::read(&gray).unwrap());
    }
}
