//! バッチ実行: 入力ファイルごとに操作を並列適用し、結果を入力順にまとめる。
//!
//! 1 件でも失敗したらバッチ全体を失敗にする（部分結果もアーカイブも返さない）。

use std::path::Path;

use rayon::prelude::*;

use crate::crypt::{self, ProtectOptions};
use crate::error::PdfForgeError;
use crate::ops::compress::{self, CompressOptions};
use crate::ops::embed::{self, EmbedImage, EmbedOptions};
use crate::ops::merge::{self, MergeSource};
use crate::ops::split::{self, SplitMode};
use crate::ops::watermark::{self, WatermarkOptions};
use crate::pdf::document::Document;
use crate::pdf::reader;
use crate::pipeline::archive::{NamedOutput, build_archive};
use crate::render::{self, RasterizeOptions};

const PDF_CONTENT_TYPE: &str = "application/pdf";
const ZIP_CONTENT_TYPE: &str = "application/zip";

/// 実行する操作と、その検証済みオプション
#[derive(Debug, Clone)]
pub enum Operation {
    Merge,
    Split(SplitMode),
    Compress(CompressOptions),
    Protect(ProtectOptions),
    Watermark(WatermarkOptions),
    ImagesToPdf(EmbedOptions),
    PdfToImage(RasterizeOptions),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Split(_) => "split",
            Self::Compress(_) => "compress",
            Self::Protect(_) => "protect",
            Self::Watermark(_) => "watermark",
            Self::ImagesToPdf(_) => "images_to_pdf",
            Self::PdfToImage(_) => "pdf_to_image",
        }
    }

    /// 全入力から 1 つの出力を作る操作か
    fn consumes_all_inputs(&self) -> bool {
        matches!(self, Self::Merge | Self::ImagesToPdf(_))
    }
}

/// 入力ファイル
#[derive(Debug, Clone, Default)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
    /// 暗号化された入力のパスワード
    pub password: Option<String>,
    /// 結合時に使う 1 始まりのページ番号（None は全ページ）
    pub pages: Option<Vec<u32>>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            ..Default::default()
        }
    }

    /// 拡張子を除いたファイル名
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }

    fn load(&self) -> crate::error::Result<Document> {
        reader::load_with_password(&self.bytes, self.password.as_deref().unwrap_or(""))
            .map_err(|e| e.context(&self.name))
    }
}

/// バッチの出力
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutput {
    Single {
        name: String,
        content_type: &'static str,
        bytes: Vec<u8>,
    },
    Archive {
        name: String,
        bytes: Vec<u8>,
    },
}

impl BatchOutput {
    pub fn name(&self) -> &str {
        match self {
            Self::Single { name, .. } | Self::Archive { name, .. } => name,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Single { content_type, .. } => content_type,
            Self::Archive { .. } => ZIP_CONTENT_TYPE,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Single { bytes, .. } | Self::Archive { bytes, .. } => bytes,
        }
    }
}

/// バッチ全体の設定
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// 0 ならグローバルプールを使う
    pub parallel_workers: usize,
}

/// グローバルプールでバッチを実行する。
pub fn run_batch(operation: &Operation, inputs: &[InputFile]) -> crate::error::Result<BatchOutput> {
    run_batch_with(operation, inputs, &BatchOptions::default())
}

/// `parallel_workers > 0` なら専用のスレッドプールでバッチを実行する。
pub fn run_batch_with(
    operation: &Operation,
    inputs: &[InputFile],
    options: &BatchOptions,
) -> crate::error::Result<BatchOutput> {
    if inputs.is_empty() {
        return Err(PdfForgeError::config(format!(
            "{}: no input files",
            operation.name()
        )));
    }

    let outputs = if options.parallel_workers > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.parallel_workers)
            .build()
            .map_err(|e| PdfForgeError::config(format!("failed to build thread pool: {e}")))?;
        pool.install(|| collect_outputs(operation, inputs))?
    } else {
        collect_outputs(operation, inputs)?
    };

    tracing::info!(
        operation = operation.name(),
        inputs = inputs.len(),
        outputs = outputs.len(),
        "batch finished"
    );
    package(operation, outputs)
}

fn collect_outputs(operation: &Operation, inputs: &[InputFile]) -> crate::error::Result<Vec<NamedOutput>> {
    if operation.consumes_all_inputs() {
        return run_combined(operation, inputs);
    }

    // 入力ごとに並列実行し、入力順で集める。最初の失敗で打ち切る。
    let per_file: Vec<Vec<NamedOutput>> = inputs
        .par_iter()
        .map(|input| run_single(operation, input))
        .collect::<crate::error::Result<_>>()?;
    Ok(per_file.into_iter().flatten().collect())
}

fn pdf_output(name: String, doc: &Document) -> crate::error::Result<NamedOutput> {
    Ok(NamedOutput {
        name,
        content_type: PDF_CONTENT_TYPE,
        bytes: doc.to_bytes()?,
    })
}

/// 全入力から 1 つのドキュメントを作る操作（結合、画像→PDF）
fn run_combined(operation: &Operation, inputs: &[InputFile]) -> crate::error::Result<Vec<NamedOutput>> {
    let doc = match operation {
        Operation::Merge => {
            let docs: Vec<Document> = inputs
                .par_iter()
                .map(InputFile::load)
                .collect::<crate::error::Result<_>>()?;
            let sources = docs
                .iter()
                .zip(inputs)
                .map(|(doc, input)| {
                    let pages = crate::ops::selected_indices(doc, input.pages.as_deref())
                        .map_err(|e| e.context(&input.name))?;
                    Ok(MergeSource::with_pages(doc, pages))
                })
                .collect::<crate::error::Result<Vec<_>>>()?;
            merge::merge(&sources)?
        }
        Operation::ImagesToPdf(options) => {
            let images: Vec<EmbedImage> = inputs
                .iter()
                .map(|input| EmbedImage {
                    name: input.name.clone(),
                    bytes: input.bytes.clone(),
                })
                .collect();
            embed::images_to_pdf(&images, options)?
        }
        _ => {
            return Err(PdfForgeError::config(format!(
                "{} is a per-file operation",
                operation.name()
            )));
        }
    };
    let name = match operation {
        Operation::Merge => "merged.pdf",
        _ => "images.pdf",
    };
    Ok(vec![pdf_output(name.to_string(), &doc)?])
}

/// 1 入力に操作を適用する。エラーには入力名を付ける。
fn run_single(operation: &Operation, input: &InputFile) -> crate::error::Result<Vec<NamedOutput>> {
    let doc = input.load()?;
    apply(operation, input, &doc).map_err(|e| e.context(&input.name))
}

fn apply(operation: &Operation, input: &InputFile, doc: &Document) -> crate::error::Result<Vec<NamedOutput>> {
    let stem = input.stem();
    match operation {
        Operation::Split(mode) => split::split(doc, mode)?
            .iter()
            .enumerate()
            .map(|(i, part)| pdf_output(format!("{stem}_part{}.pdf", i + 1), part))
            .collect(),
        Operation::Compress(options) => {
            let bytes = compress::compress(doc, options)?.to_compact_bytes()?;
            // 大きくなった平文の入力は元のバイト列を返す。メタデータ削除を頼まれたときは返さない
            let keep_original =
                bytes.len() > input.bytes.len() && doc.security.is_none() && !options.remove_metadata;
            let bytes = if keep_original {
                tracing::debug!(file = %input.name, "compressed output larger than input, keeping original");
                input.bytes.clone()
            } else {
                bytes
            };
            Ok(vec![NamedOutput {
                name: format!("{stem}_compressed.pdf"),
                content_type: PDF_CONTENT_TYPE,
                bytes,
            }])
        }
        Operation::Protect(options) => {
            let out = crypt::encrypt(doc, options)?;
            Ok(vec![pdf_output(format!("{stem}_protected.pdf"), &out)?])
        }
        Operation::Watermark(options) => {
            let out = watermark::watermark(doc, options)?;
            Ok(vec![pdf_output(format!("{stem}_watermarked.pdf"), &out)?])
        }
        Operation::PdfToImage(options) => Ok(render::rasterize(doc, options)?
            .into_iter()
            .map(|raster| NamedOutput {
                name: format!("{stem}_page{}.{}", raster.page_index + 1, raster.format.extension()),
                content_type: raster.format.content_type(),
                bytes: raster.bytes,
            })
            .collect()),
        Operation::Merge | Operation::ImagesToPdf(_) => Err(PdfForgeError::config(format!(
            "{} consumes all inputs at once",
            operation.name()
        ))),
    }
}

/// 出力が 1 つならそのまま、複数なら zip にする。
fn package(operation: &Operation, mut outputs: Vec<NamedOutput>) -> crate::error::Result<BatchOutput> {
    if outputs.len() == 1
        && let Some(output) = outputs.pop()
    {
        return Ok(BatchOutput::Single {
            name: output.name,
            content_type: output.content_type,
            bytes: output.bytes,
        });
    }
    if outputs.is_empty() {
        return Err(PdfForgeError::encoding(format!(
            "{} produced no output",
            operation.name()
        )));
    }
    Ok(BatchOutput::Archive {
        name: format!("{}_results.zip", operation.name()),
        bytes: build_archive(&outputs)?,
    })
}
