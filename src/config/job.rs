use serde::Deserialize;

use crate::ops::compress::CompressLevel;
use crate::ops::embed::{Orientation, PageSize};
use crate::render::ColorMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobFile {
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    pub inputs: Vec<InputSpec>,
    /// 出力ファイル。複数出力になる操作では zip になる
    pub output: String,
    pub operation: OperationSpec,
}

/// 入力ファイル。パスだけ、またはパスワード・ページ指定付き。
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InputSpec {
    Path(String),
    Detailed(InputDetail),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDetail {
    pub path: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_pages")]
    pub pages: Option<Vec<u32>>,
}

impl InputSpec {
    pub fn path(&self) -> &str {
        match self {
            Self::Path(path) => path,
            Self::Detailed(detail) => &detail.path,
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            Self::Path(_) => None,
            Self::Detailed(detail) => detail.password.as_deref(),
        }
    }

    pub fn pages(&self) -> Option<&[u32]> {
        match self {
            Self::Path(_) => None,
            Self::Detailed(detail) => detail.pages.as_deref(),
        }
    }
}

/// 操作ごとのオプション。省略した値は settings か操作の既定値になる。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum OperationSpec {
    Merge,
    Split {
        /// `"1-3"` や `"5"` の並び（重なってもよい）
        #[serde(default)]
        ranges: Option<Vec<String>>,
        #[serde(default)]
        parts: Option<usize>,
        #[serde(default)]
        singles: bool,
    },
    Compress {
        level: Option<CompressLevel>,
        quality: Option<u8>,
        optimize_images: Option<bool>,
        remove_metadata: Option<bool>,
        compress_fonts: Option<bool>,
    },
    Protect {
        user_password: String,
        #[serde(default)]
        owner_password: String,
        permissions: Option<Vec<String>>,
        algorithm: Option<String>,
    },
    Watermark {
        text: String,
        font_size: Option<f64>,
        opacity: Option<f64>,
        rotation: Option<f64>,
        color: Option<[f64; 3]>,
        #[serde(default, deserialize_with = "deserialize_optional_pages")]
        pages: Option<Vec<u32>>,
    },
    ImagesToPdf {
        page_size: Option<PageSize>,
        orientation: Option<Orientation>,
        margin: Option<f64>,
        fit_to_page: Option<bool>,
        preserve_aspect_ratio: Option<bool>,
    },
    PdfToImage {
        format: Option<String>,
        dpi: Option<u32>,
        quality: Option<u8>,
        color_mode: Option<ColorMode>,
        #[serde(default, deserialize_with = "deserialize_optional_pages")]
        pages: Option<Vec<u32>>,
    },
}

/// ページ範囲文字列をパースしてページ番号のベクタに変換する。
///
/// 形式:
/// - 単一ページ: `"5"`
/// - 範囲: `"5-10"` (5, 6, 7, 8, 9, 10)
/// - 混合（カンマ区切り）: `"1, 3, 5-10, 15"`
///
/// 結果はソート済み・重複なし。0 ページは不正。
pub fn parse_page_range(s: &str) -> crate::error::Result<Vec<u32>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(crate::error::PdfForgeError::config(
            "Page range cannot be empty",
        ));
    }

    let mut pages = Vec::new();

    for part in trimmed.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let (start, end) = parse_range_part(part)?;
        pages.extend(start..=end);
    }

    if pages.is_empty() {
        return Err(crate::error::PdfForgeError::config(
            "Page range resolved to empty set",
        ));
    }

    pages.sort();
    pages.dedup();
    Ok(pages)
}

/// `"5"` または `"5-10"` を (開始, 終了) にする。
pub fn parse_range_part(part: &str) -> crate::error::Result<(u32, u32)> {
    let parse = |s: &str| -> crate::error::Result<u32> {
        let page: u32 = s.trim().parse().map_err(|_| {
            crate::error::PdfForgeError::config(format!("Invalid page number: '{}'", s.trim()))
        })?;
        if page == 0 {
            return Err(crate::error::PdfForgeError::config(
                "Page numbers start at 1",
            ));
        }
        Ok(page)
    };

    match part.split_once('-') {
        Some((start_str, end_str)) => {
            let start = parse(start_str)?;
            let end = parse(end_str)?;
            if start > end {
                return Err(crate::error::PdfForgeError::config(format!(
                    "Invalid page range: start ({start}) > end ({end})"
                )));
            }
            Ok((start, end))
        }
        None => {
            let page = parse(part)?;
            Ok((page, page))
        }
    }
}

/// 文字列・単一の数値・数値のリストのどれでも受け付ける
#[derive(Deserialize)]
#[serde(untagged)]
enum PagesValue {
    Number(u32),
    Text(String),
    List(Vec<u32>),
}

/// serdeのdeserialize_withで使用するページ範囲デシリアライザ
fn deserialize_optional_pages<'de, D>(deserializer: D) -> Result<Option<Vec<u32>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<PagesValue>::deserialize(deserializer)?;
    let pages = match value {
        None => return Ok(None),
        Some(PagesValue::Number(page)) => vec![page],
        Some(PagesValue::Text(s)) => parse_page_range(&s).map_err(serde::de::Error::custom)?,
        Some(PagesValue::List(pages)) => pages,
    };
    if pages.is_empty() || pages.contains(&0) {
        return Err(serde::de::Error::custom(
            "page lists must be non-empty and 1-based",
        ));
    }
    Ok(Some(pages))
}
