// ストリームフィルタ: デコード/エンコード
//
// 汎用フィルタ（Flate + predictor, LZW, ASCIIHex, ASCII85, RunLength）は展開する。
// 画像コーデック（DCT, JPX, JBIG2, CCITT）はデコードせずに残す。

use crate::error::PdfForgeError;
use flate2::Compression;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use lopdf::{Dictionary, Object, Stream};
use std::io::{Read, Write};
use weezl::{BitOrder, decode::Decoder};

/// ストリームフィルタの種別
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Flate,
    Lzw,
    AsciiHex,
    Ascii85,
    RunLength,
    Dct,
    Jpx,
    Jbig2,
    Ccitt,
    Crypt,
    Unknown(String),
}

impl Filter {
    /// フィルタ名（インライン画像の省略形も含む）から種別を決める。
    pub fn from_name(name: &[u8]) -> Self {
        match name {
            b"FlateDecode" | b"Fl" => Self::Flate,
            b"LZWDecode" | b"LZW" => Self::Lzw,
            b"ASCIIHexDecode" | b"AHx" => Self::AsciiHex,
            b"ASCII85Decode" | b"A85" => Self::Ascii85,
            b"RunLengthDecode" | b"RL" => Self::RunLength,
            b"DCTDecode" | b"DCT" => Self::Dct,
            b"JPXDecode" => Self::Jpx,
            b"JBIG2Decode" => Self::Jbig2,
            b"CCITTFaxDecode" | b"CCF" => Self::Ccitt,
            b"Crypt" => Self::Crypt,
            other => Self::Unknown(String::from_utf8_lossy(other).into_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Flate => "FlateDecode",
            Self::Lzw => "LZWDecode",
            Self::AsciiHex => "ASCIIHexDecode",
            Self::Ascii85 => "ASCII85Decode",
            Self::RunLength => "RunLengthDecode",
            Self::Dct => "DCTDecode",
            Self::Jpx => "JPXDecode",
            Self::Jbig2 => "JBIG2Decode",
            Self::Ccitt => "CCITTFaxDecode",
            Self::Crypt => "Crypt",
            Self::Unknown(name) => name,
        }
    }

    /// 画像コーデック（ピクセル形式へのデコードは画像処理側の責務）
    pub fn is_image_codec(&self) -> bool {
        matches!(self, Self::Dct | Self::Jpx | Self::Jbig2 | Self::Ccitt)
    }
}

/// フィルタ連鎖を `(フィルタ, DecodeParms)` の列として取り出す。
pub fn filter_chain(dict: &Dictionary) -> crate::error::Result<Vec<(Filter, Option<Dictionary>)>> {
    let filters: Vec<Filter> = match dict.get(b"Filter") {
        Err(_) | Ok(Object::Null) => return Ok(Vec::new()),
        Ok(Object::Name(name)) => vec![Filter::from_name(name)],
        Ok(Object::Array(items)) => items
            .iter()
            .map(|item| match item {
                Object::Name(name) => Ok(Filter::from_name(name)),
                other => Err(PdfForgeError::corrupt(format!(
                    "filter entry is not a name: {other:?}"
                ))),
            })
            .collect::<crate::error::Result<_>>()?,
        Ok(other) => {
            return Err(PdfForgeError::corrupt(format!(
                "invalid /Filter value: {other:?}"
            )));
        }
    };

    let params: Vec<Option<Dictionary>> = match dict.get(b"DecodeParms") {
        Ok(Object::Dictionary(d)) => vec![Some(d.clone())],
        Ok(Object::Array(items)) => items
            .iter()
            .map(|item| match item {
                Object::Dictionary(d) => Some(d.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(filters
        .into_iter()
        .enumerate()
        .map(|(i, f)| (f, params.get(i).cloned().flatten()))
        .collect())
}

/// 汎用フィルタを展開した結果
#[derive(Debug)]
pub struct Decoded {
    pub data: Vec<u8>,
    /// 展開されずに残った画像コーデック（先頭から順）
    pub remaining: Vec<Filter>,
}

/// 先頭から汎用フィルタを順に展開し、最初の画像コーデックで止まる。
///
/// 未知のフィルタは `UnsupportedFormatError`。
pub fn decode_generic(stream: &Stream) -> crate::error::Result<Decoded> {
    let chain = filter_chain(&stream.dict)?;
    let mut data = stream.content.clone();

    for (i, (filter, params)) in chain.iter().enumerate() {
        if filter.is_image_codec() {
            return Ok(Decoded {
                data,
                remaining: chain[i..].iter().map(|(f, _)| f.clone()).collect(),
            });
        }
        data = decode_one(filter, params.as_ref(), &data)?;
    }

    Ok(Decoded {
        data,
        remaining: Vec::new(),
    })
}

/// 全フィルタを展開したストリーム内容を返す。画像コーデックが残る場合はエラー。
pub fn decode_stream(stream: &Stream) -> crate::error::Result<Vec<u8>> {
    let decoded = decode_generic(stream)?;
    if let Some(codec) = decoded.remaining.first() {
        return Err(PdfForgeError::unsupported_format(format!(
            "stream filter {} cannot be fully decoded",
            codec.name()
        )));
    }
    Ok(decoded.data)
}

fn decode_one(
    filter: &Filter,
    params: Option<&Dictionary>,
    data: &[u8],
) -> crate::error::Result<Vec<u8>> {
    match filter {
        Filter::Flate => {
            let inflated = flate_decode(data)?;
            apply_predictor(inflated, params)
        }
        Filter::Lzw => {
            let early_change = params
                .and_then(|p| p.get(b"EarlyChange").ok())
                .and_then(|o| o.as_i64().ok())
                .unwrap_or(1);
            let expanded = lzw_decode(data, early_change)?;
            apply_predictor(expanded, params)
        }
        Filter::AsciiHex => ascii_hex_decode(data),
        Filter::Ascii85 => ascii85_decode(data),
        Filter::RunLength => Ok(run_length_decode(data)),
        // Identity crypt filter: 暗号化は security handler 側で解除済み
        Filter::Crypt => Ok(data.to_vec()),
        other => Err(PdfForgeError::unsupported_format(format!(
            "unsupported stream filter: {}",
            other.name()
        ))),
    }
}

/// zlib圧縮する。
pub fn flate_encode(data: &[u8], level: Compression) -> crate::error::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), level);
    encoder
        .write_all(data)
        .map_err(|e| PdfForgeError::encoding(format!("flate encode: {e}")))?;
    encoder
        .finish()
        .map_err(|e| PdfForgeError::encoding(format!("flate encode: {e}")))
}

/// zlib展開。途中で壊れていても展開できた分があればそれを返す。
/// zlibヘッダのない raw deflate も受け付ける。
pub fn flate_decode(data: &[u8]) -> crate::error::Result<Vec<u8>> {
    let mut out = Vec::new();
    match ZlibDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => return Ok(out),
        Err(e) if !out.is_empty() => {
            tracing::warn!(error = %e, decoded = out.len(), "truncated flate stream, keeping partial data");
            return Ok(out);
        }
        Err(_) => {}
    }

    let mut raw = Vec::new();
    match DeflateDecoder::new(data).read_to_end(&mut raw) {
        Ok(_) => Ok(raw),
        Err(_) if !raw.is_empty() => Ok(raw),
        Err(e) => Err(PdfForgeError::corrupt(format!("flate decode failed: {e}"))),
    }
}

/// LZW展開。EarlyChange=1（既定）は1コード早くビット幅を増やす。
fn lzw_decode(data: &[u8], early_change: i64) -> crate::error::Result<Vec<u8>> {
    let mut decoder = if early_change == 0 {
        Decoder::new(BitOrder::Msb, 8)
    } else {
        Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
    };
    let mut output = Vec::new();
    let result = decoder.into_vec(&mut output).decode(data);
    if let Err(e) = result.status {
        if output.is_empty() {
            return Err(PdfForgeError::corrupt(format!("LZW decode failed: {e:?}")));
        }
        tracing::warn!(error = ?e, "LZW stream ended with an error, keeping partial data");
    }
    Ok(output)
}

fn dict_int(params: Option<&Dictionary>, key: &[u8], default: i64) -> i64 {
    params
        .and_then(|p| p.get(key).ok())
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(default)
}

/// TIFF (2) / PNG (10–15) predictor を解除する。
fn apply_predictor(data: Vec<u8>, params: Option<&Dictionary>) -> crate::error::Result<Vec<u8>> {
    let predictor = dict_int(params, b"Predictor", 1);
    if predictor <= 1 {
        return Ok(data);
    }

    let colors = dict_int(params, b"Colors", 1).clamp(1, 32) as usize;
    let bpc = dict_int(params, b"BitsPerComponent", 8).clamp(1, 16) as usize;
    let columns = dict_int(params, b"Columns", 1).max(1) as usize;
    let bytes_per_pixel = (colors * bpc).div_ceil(8).max(1);
    let row_len = (colors * bpc * columns).div_ceil(8);

    if predictor == 2 {
        if bpc != 8 {
            return Err(PdfForgeError::unsupported_format(format!(
                "TIFF predictor with {bpc} bits per component"
            )));
        }
        let mut out = data;
        for row in out.chunks_mut(row_len) {
            for i in bytes_per_pixel..row.len() {
                row[i] = row[i].wrapping_add(row[i - bytes_per_pixel]);
            }
        }
        return Ok(out);
    }

    // PNG: 各行の先頭1バイトが行フィルタ種別
    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        let Some((&kind, encoded)) = chunk.split_first() else {
            continue;
        };
        let mut row = encoded.to_vec();
        row.resize(row_len, 0);
        for i in 0..row_len {
            let left = if i >= bytes_per_pixel { row[i - bytes_per_pixel] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bytes_per_pixel { prev[i - bytes_per_pixel] } else { 0 };
            row[i] = match kind {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => {
                    return Err(PdfForgeError::corrupt(format!(
                        "invalid PNG row filter {other}"
                    )));
                }
            };
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

fn ascii_hex_decode(data: &[u8]) -> crate::error::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut high: Option<u8> = None;
    for &b in data {
        if b == b'>' {
            break;
        }
        if crate::pdf::parser::is_whitespace(b) {
            continue;
        }
        let v = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                return Err(PdfForgeError::corrupt(format!(
                    "invalid character in ASCIIHex data: {:#04x}",
                    b
                )));
            }
        };
        match high.take() {
            Some(h) => out.push(h << 4 | v),
            None => high = Some(v),
        }
    }
    if let Some(h) = high {
        out.push(h << 4);
    }
    Ok(out)
}

fn ascii85_decode(data: &[u8]) -> crate::error::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut count = 0usize;

    let body = data.strip_prefix(b"<~").unwrap_or(data);
    for &b in body {
        match b {
            b'~' => break,
            b'z' if count == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[count] = b - b'!';
                count += 1;
                if count == 5 {
                    let value = group.iter().fold(0u64, |acc, &d| acc * 85 + u64::from(d));
                    if value > u64::from(u32::MAX) {
                        return Err(PdfForgeError::corrupt("ASCII85 group overflow"));
                    }
                    out.extend_from_slice(&(value as u32).to_be_bytes());
                    count = 0;
                }
            }
            b if crate::pdf::parser::is_whitespace(b) => {}
            other => {
                return Err(PdfForgeError::corrupt(format!(
                    "invalid character in ASCII85 data: {:#04x}",
                    other
                )));
            }
        }
    }

    if count == 1 {
        return Err(PdfForgeError::corrupt("ASCII85 data ends with a single character"));
    }
    if count > 1 {
        // 末尾の不完全グループは 'u' で埋めて必要バイト数だけ取り出す
        for slot in group.iter_mut().skip(count) {
            *slot = 84;
        }
        let value = group.iter().fold(0u64, |acc, &d| acc * 85 + u64::from(d));
        let bytes = (value.min(u64::from(u32::MAX)) as u32).to_be_bytes();
        out.extend_from_slice(&bytes[..count - 1]);
    }
    Ok(out)
}

fn run_length_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut i = 0;
    while i < data.len() {
        let len = data[i];
        i += 1;
        match len {
            128 => break,
            0..=127 => {
                let n = usize::from(len) + 1;
                let end = (i + n).min(data.len());
                out.extend_from_slice(&data[i..end]);
                i = end;
            }
            _ => {
                if let Some(&b) = data.get(i) {
                    out.extend(std::iter::repeat_n(b, 257 - usize::from(len)));
                }
                i += 1;
            }
        }
    }
    out
}

/// ストリーム内容を Flate 圧縮済みデータで置き換える（`/DecodeParms` は外す）。
pub fn set_flate_content(stream: &mut Stream, compressed: Vec<u8>) {
    stream.dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
    stream.dict.remove(b"DecodeParms");
    stream.set_content(compressed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn test_flate_round_trip() {
        let data = b"BT /F1 12 Tf (hello) Tj ET".repeat(20);
        let encoded = flate_encode(&data, Compression::best()).unwrap();
        assert!(encoded.len() < data.len());
        assert_eq!(flate_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_png_up_predictor() {
        // 2列×2行、Colors=1: 行2は Up フィルタ
        let raw = vec![0, 10, 20, 2, 1, 1];
        let compressed = flate_encode(&raw, Compression::default()).unwrap();
        let stream = Stream::new(
            dictionary! {
                "Filter" => "FlateDecode",
                "DecodeParms" => dictionary! { "Predictor" => 12, "Columns" => 2 },
            },
            compressed,
        );
        assert_eq!(decode_stream(&stream).unwrap(), vec![10, 20, 11, 21]);
    }

    #[test]
    fn test_ascii_hex_and_85() {
        assert_eq!(ascii_hex_decode(b"48 65 6c6c 6f>").unwrap(), b"Hello".to_vec());
        assert_eq!(ascii85_decode(b"87cURD]i,\"Ebo7~>").unwrap(), b"Hello World".to_vec());
        assert_eq!(ascii85_decode(b"z~>").unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_run_length() {
        assert_eq!(run_length_decode(&[2, b'a', b'b', b'c', 254, b'x', 128]), b"abcxxx".to_vec());
    }

    #[test]
    fn test_filter_chain_stops_at_image_codec() {
        let stream = Stream::new(
            dictionary! {
                "Filter" => vec![Object::Name(b"ASCIIHexDecode".to_vec()), Object::Name(b"DCTDecode".to_vec())],
            },
            b"FFD8>".to_vec(),
        );
        let decoded = decode_generic(&stream).unwrap();
        assert_eq!(decoded.data, vec![0xFF, 0xD8]);
        assert_eq!(decoded.remaining, vec![Filter::Dct]);
        assert!(decode_stream(&stream).is_err());
    }

    #[test]
    fn test_unknown_filter_is_unsupported() {
        let stream = Stream::new(dictionary! { "Filter" => "BogusDecode" }, vec![1, 2, 3]);
        match decode_stream(&stream) {
            Err(PdfForgeError::UnsupportedFormatError(_)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
