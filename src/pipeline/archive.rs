// 複数の出力を zip アーカイブにまとめる

use std::collections::HashMap;
use std::io::{Cursor, Write};

use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// アーカイブに入れる 1 ファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedOutput {
    pub name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// 重複した名前に `_<n>` を付けて一意にする（拡張子の前に挿入）。
pub fn dedupe_names(names: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut used: std::collections::HashSet<String> = names.iter().cloned().collect();
    let mut out = Vec::with_capacity(names.len());

    for name in names {
        let count = seen.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            out.push(name.clone());
            continue;
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
            _ => (name.clone(), String::new()),
        };
        let mut n = *count;
        let mut candidate = format!("{stem}_{n}{ext}");
        while used.contains(&candidate) {
            n += 1;
            candidate = format!("{stem}_{n}{ext}");
        }
        used.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// 入力順のまま zip を作る。
pub fn build_archive(outputs: &[NamedOutput]) -> crate::error::Result<Vec<u8>> {
    let names: Vec<String> = outputs.iter().map(|o| o.name.clone()).collect();
    let names = dedupe_names(&names);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, output) in names.iter().zip(outputs) {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&output.bytes)?;
    }
    let cursor = zip.finish()?;
    tracing::debug!(entries = outputs.len(), "archive built");
    Ok(cursor.into_inner())
}
