use crate::crypt::{Algorithm, Permissions, ProtectOptions};
use crate::error::PdfForgeError;
use crate::ops::compress::CompressLevel;
use crate::ops::embed::EmbedOptions;
use crate::ops::split::{PageRange, SplitMode};
use crate::ops::watermark::WatermarkOptions;
use crate::pipeline::batch::Operation;
use crate::render::{RasterFormat, RasterizeOptions};

use super::job::{Job, OperationSpec, parse_range_part};
use super::settings::Settings;

/// settings とジョブを合わせ、検証済みの操作にしたもの
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub operation: Operation,
    pub parallel_workers: usize,
}

impl MergedConfig {
    /// JobのOption値がSomeならJobの値を、NoneならSettingsの値を使用する。
    ///
    /// ドキュメントに触れる前にすべての値を検証する。
    pub fn new(settings: &Settings, job: &Job) -> crate::error::Result<Self> {
        if job.inputs.is_empty() {
            return Err(PdfForgeError::config("job has no inputs"));
        }
        let operation = resolve_operation(settings, &job.operation)?;
        Ok(MergedConfig {
            operation,
            parallel_workers: settings.parallel_workers,
        })
    }
}

fn resolve_operation(settings: &Settings, spec: &OperationSpec) -> crate::error::Result<Operation> {
    let operation = match spec {
        OperationSpec::Merge => Operation::Merge,
        OperationSpec::Split {
            ranges,
            parts,
            singles,
        } => Operation::Split(resolve_split(ranges.as_deref(), *parts, *singles)?),
        OperationSpec::Compress {
            level,
            quality,
            optimize_images,
            remove_metadata,
            compress_fonts,
        } => {
            let base = level.unwrap_or(CompressLevel::Medium).options();
            let options = crate::ops::compress::CompressOptions {
                quality: quality.unwrap_or(base.quality),
                optimize_images: optimize_images.unwrap_or(base.optimize_images),
                remove_metadata: remove_metadata.unwrap_or(base.remove_metadata),
                compress_fonts: compress_fonts.unwrap_or(base.compress_fonts),
            };
            options.validate()?;
            Operation::Compress(options)
        }
        OperationSpec::Protect {
            user_password,
            owner_password,
            permissions,
            algorithm,
        } => {
            if user_password.is_empty() && owner_password.is_empty() {
                return Err(PdfForgeError::weak_password(
                    "user and owner passwords are both empty",
                ));
            }
            let permissions = match permissions {
                Some(names) => Permissions::from_names(names)?,
                None => Permissions::default(),
            };
            let algorithm = match algorithm {
                Some(name) => parse_algorithm(name)?,
                None => Algorithm::Aes256,
            };
            Operation::Protect(ProtectOptions {
                user_password: user_password.clone(),
                owner_password: owner_password.clone(),
                permissions,
                algorithm,
            })
        }
        OperationSpec::Watermark {
            text,
            font_size,
            opacity,
            rotation,
            color,
            pages,
        } => {
            let defaults = WatermarkOptions::default();
            let options = WatermarkOptions {
                text: text.clone(),
                font_size: font_size.unwrap_or(defaults.font_size),
                opacity: opacity.unwrap_or(defaults.opacity),
                rotation: rotation.unwrap_or(defaults.rotation),
                color: color.unwrap_or(defaults.color),
                pages: pages.clone(),
            };
            options.validate()?;
            Operation::Watermark(options)
        }
        OperationSpec::ImagesToPdf {
            page_size,
            orientation,
            margin,
            fit_to_page,
            preserve_aspect_ratio,
        } => {
            let defaults = EmbedOptions::default();
            let options = EmbedOptions {
                page_size: page_size.unwrap_or(settings.page_size),
                orientation: orientation.unwrap_or(defaults.orientation),
                margin: margin.unwrap_or(settings.margin),
                fit_to_page: fit_to_page.unwrap_or(defaults.fit_to_page),
                preserve_aspect_ratio: preserve_aspect_ratio.unwrap_or(defaults.preserve_aspect_ratio),
            };
            if !(options.margin >= 0.0 && options.margin.is_finite()) {
                return Err(PdfForgeError::config(format!(
                    "margin must be a non-negative number, got {}",
                    options.margin
                )));
            }
            Operation::ImagesToPdf(options)
        }
        OperationSpec::PdfToImage {
            format,
            dpi,
            quality,
            color_mode,
            pages,
        } => {
            let format = match format {
                Some(name) => RasterFormat::from_name(name)?,
                None => settings.raster_format,
            };
            let options = RasterizeOptions {
                format,
                dpi: dpi.unwrap_or(settings.dpi),
                quality: quality.unwrap_or(settings.image_quality),
                color_mode: color_mode.unwrap_or(settings.color_mode),
                pages: pages.clone(),
            };
            options.validate()?;
            Operation::PdfToImage(options)
        }
    };
    Ok(operation)
}

/// ranges / parts / singles のうちちょうど 1 つを指定させる。
fn resolve_split(
    ranges: Option<&[String]>,
    parts: Option<usize>,
    singles: bool,
) -> crate::error::Result<SplitMode> {
    match (ranges, parts, singles) {
        (Some(ranges), None, false) => {
            let ranges = ranges
                .iter()
                .map(|s| {
                    let (from, to) = parse_range_part(s)?;
                    Ok(PageRange::new(from as usize, to as usize))
                })
                .collect::<crate::error::Result<Vec<_>>>()?;
            if ranges.is_empty() {
                return Err(PdfForgeError::config("split ranges must not be empty"));
            }
            Ok(SplitMode::Ranges(ranges))
        }
        (None, Some(0), false) => Err(PdfForgeError::config("split parts must be at least 1")),
        (None, Some(n), false) => Ok(SplitMode::EqualParts(n)),
        (None, None, true) => Ok(SplitMode::Singles),
        _ => Err(PdfForgeError::config(
            "split needs exactly one of ranges, parts or singles",
        )),
    }
}

fn parse_algorithm(name: &str) -> crate::error::Result<Algorithm> {
    match name.to_ascii_lowercase().replace('-', "_").as_str() {
        "rc4_40" => Ok(Algorithm::Rc4_40),
        "rc4_128" => Ok(Algorithm::Rc4_128),
        "aes_256" | "aes256" => Ok(Algorithm::Aes256),
        other => Err(PdfForgeError::config(format!(
            "unknown encryption algorithm '{other}' (expected rc4_40, rc4_128 or aes_256)"
        ))),
    }
}
