use std::path::Path;

use serde::Deserialize;

use crate::ops::embed::PageSize;
use crate::render::{ColorMode, RasterFormat};

/// ジョブファイルと同じディレクトリの settings.yaml。ジョブ側で省略した値の既定値になる。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// ラスタライズ解像度
    pub dpi: u32,
    /// ラスタ出力の JPEG 品質
    pub image_quality: u8,
    pub raster_format: RasterFormat,
    pub color_mode: ColorMode,
    /// 0 ならグローバルプール
    pub parallel_workers: usize,
    /// 画像→PDF の用紙サイズ
    pub page_size: PageSize,
    /// 画像→PDF の余白（ポイント）
    pub margin: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            dpi: 150,
            image_quality: 85,
            raster_format: RasterFormat::Png,
            color_mode: ColorMode::Rgb,
            parallel_workers: 0,
            page_size: PageSize::A4,
            margin: 36.0,
        }
    }
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> crate::error::Result<Self> {
        serde_yml::from_str(yaml).map_err(|e| {
            crate::error::PdfForgeError::config(format!("Failed to parse settings YAML: {e}"))
        })
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}
