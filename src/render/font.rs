// フォント辞書 → グリフアウトライン
//
// 埋め込みの TrueType / OpenType (FontFile2, FontFile3) は ttf-parser で読む。
// 埋め込みのない欧文フォント（標準 14 フォントなど）は BaseFont 名から
// fontdb でシステムフォントを探して代用する。Type1 の埋め込みは読まない。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use lopdf::{Dictionary, Object};
use ttf_parser::GlyphId;

use crate::pdf::document::{Document, object_to_f64};
use crate::pdf::filters;

/// グリフアウトラインのパス操作（フォント単位）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathOp {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    QuadTo(f64, f64, f64, f64),
    CubicTo(f64, f64, f64, f64, f64, f64),
    Close,
}

/// 文字コードからグリフへの対応
#[derive(Debug, Clone)]
enum CodeMap {
    /// 1 バイトコード。WinAnsi を基本に /Differences のグリフ名で上書きする
    Simple { differences: HashMap<u8, String> },
    /// 2 バイトの CID。`cid_to_gid` が None なら CID = GID
    Cid { cid_to_gid: Option<Vec<u16>> },
}

/// 描画に使えるフォント
#[derive(Debug, Clone)]
pub struct LoadedFont {
    data: Arc<Vec<u8>>,
    face_index: u32,
    map: CodeMap,
    /// コード → 幅（1/1000 テキスト空間単位）
    widths: HashMap<u16, f64>,
    default_width: Option<f64>,
    units_per_em: u16,
}

impl LoadedFont {
    fn face(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, self.face_index).ok()
    }

    pub fn units_per_em(&self) -> u16 {
        self.units_per_em
    }

    /// 文字列オペランドを文字コード列に分ける。
    pub fn codes(&self, bytes: &[u8]) -> Vec<u16> {
        match self.map {
            CodeMap::Simple { .. } => bytes.iter().map(|&b| u16::from(b)).collect(),
            CodeMap::Cid { .. } => bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                    [single] => u16::from(*single),
                    _ => 0,
                })
                .collect(),
        }
    }

    /// 1 バイトコードなら単語間隔 (Tw) の対象になり得る。
    pub fn is_single_byte(&self) -> bool {
        matches!(self.map, CodeMap::Simple { .. })
    }

    pub fn glyph_id(&self, code: u16) -> Option<GlyphId> {
        let face = self.face()?;
        match &self.map {
            CodeMap::Cid { cid_to_gid: None } => Some(GlyphId(code)),
            CodeMap::Cid { cid_to_gid: Some(table) } => table.get(usize::from(code)).map(|&gid| GlyphId(gid)),
            CodeMap::Simple { differences } => {
                let byte = u8::try_from(code).ok()?;
                if let Some(name) = differences.get(&byte) {
                    if let Some(gid) = face.glyph_index_by_name(name) {
                        return Some(gid);
                    }
                    if let Some(gid) = glyph_name_to_char(name).and_then(|c| face.glyph_index(c)) {
                        return Some(gid);
                    }
                }
                win_ansi_to_char(byte)
                    .and_then(|c| face.glyph_index(c))
                    // シンボリックな TrueType は (3,0) cmap の U+F0xx に置かれる
                    .or_else(|| char::from_u32(0xF000 + u32::from(byte)).and_then(|c| face.glyph_index(c)))
            }
        }
    }

    /// 送り幅（1/1000 テキスト空間単位）。/Widths になければフォント自身の送り幅。
    pub fn advance(&self, code: u16) -> f64 {
        if let Some(&w) = self.widths.get(&code) {
            return w;
        }
        if let Some(w) = self.default_width {
            return w;
        }
        let Some(face) = self.face() else {
            return 0.0;
        };
        self.glyph_id(code)
            .and_then(|gid| face.glyph_hor_advance(gid))
            .map(|adv| f64::from(adv) * 1000.0 / f64::from(self.units_per_em.max(1)))
            .unwrap_or(0.0)
    }

    pub fn outline(&self, glyph_id: GlyphId) -> Vec<PathOp> {
        let Some(face) = self.face() else {
            return Vec::new();
        };
        let mut builder = OutlineCollector::default();
        face.outline_glyph(glyph_id, &mut builder);
        builder.ops
    }
}

#[derive(Default)]
struct OutlineCollector {
    ops: Vec<PathOp>,
}

impl ttf_parser::OutlineBuilder for OutlineCollector {
    fn move_to(&mut self, x: f32, y: f32) {
        self.ops.push(PathOp::MoveTo(f64::from(x), f64::from(y)));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.ops.push(PathOp::LineTo(f64::from(x), f64::from(y)));
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.ops
            .push(PathOp::QuadTo(f64::from(x1), f64::from(y1), f64::from(x), f64::from(y)));
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.ops.push(PathOp::CubicTo(
            f64::from(x1),
            f64::from(y1),
            f64::from(x2),
            f64::from(y2),
            f64::from(x),
            f64::from(y),
        ));
    }

    fn close(&mut self) {
        self.ops.push(PathOp::Close);
    }
}

/// フォント辞書を読み込む。グリフが得られないフォントは None。
pub fn load_font(doc: &Document, font: &Dictionary) -> Option<LoadedFont> {
    let subtype = name_of(doc, font, b"Subtype").unwrap_or_default();
    let loaded = match subtype.as_str() {
        "Type0" => load_cid_font(doc, font),
        // グリフ手続きは解釈しない
        "Type3" => None,
        _ => load_simple_font(doc, font),
    };
    if loaded.is_none() {
        tracing::debug!(
            subtype = %subtype,
            base_font = %name_of(doc, font, b"BaseFont").unwrap_or_default(),
            "font has no usable outlines, text skipped"
        );
    }
    loaded
}

fn load_simple_font(doc: &Document, font: &Dictionary) -> Option<LoadedFont> {
    let base_font = name_of(doc, font, b"BaseFont").unwrap_or_default();
    let (data, face_index) = match embedded_font_file(doc, font) {
        Some(data) => (Arc::new(data), 0),
        None => system_font(&base_font)?,
    };
    let units_per_em = ttf_parser::Face::parse(&data, face_index).ok()?.units_per_em();

    let mut widths = HashMap::new();
    let first_char = doc.dict_get(font, b"FirstChar").and_then(object_to_f64).unwrap_or(0.0) as u16;
    if let Some(Object::Array(items)) = doc.dict_get(font, b"Widths") {
        for (i, item) in items.iter().enumerate() {
            if let Some(w) = object_to_f64(doc.resolve(item)) {
                widths.insert(first_char.saturating_add(i as u16), w);
            }
        }
    }

    Some(LoadedFont {
        data,
        face_index,
        map: CodeMap::Simple {
            differences: differences(doc, font),
        },
        widths,
        default_width: None,
        units_per_em,
    })
}

fn load_cid_font(doc: &Document, font: &Dictionary) -> Option<LoadedFont> {
    let descendant = match doc.dict_get(font, b"DescendantFonts") {
        Some(Object::Array(items)) => doc.resolve(items.first()?).as_dict().ok()?,
        _ => return None,
    };
    // CID = GID の前提が成り立たないシステムフォントでは描かない
    let data = Arc::new(embedded_font_file(doc, descendant)?);
    let units_per_em = ttf_parser::Face::parse(&data, 0).ok()?.units_per_em();

    let cid_to_gid = match doc.dict_get(descendant, b"CIDToGIDMap") {
        Some(Object::Stream(stream)) => filters::decode_stream(stream).ok().map(|bytes| {
            bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect()
        }),
        _ => None,
    };

    Some(LoadedFont {
        data,
        face_index: 0,
        map: CodeMap::Cid { cid_to_gid },
        widths: cid_widths(doc, descendant),
        default_width: Some(doc.dict_get(descendant, b"DW").and_then(object_to_f64).unwrap_or(1000.0)),
        units_per_em,
    })
}

/// FontDescriptor の FontFile2 / FontFile3 を展開する。ttf-parser で読めなければ None。
fn embedded_font_file(doc: &Document, font: &Dictionary) -> Option<Vec<u8>> {
    let descriptor = doc.dict_get(font, b"FontDescriptor")?.as_dict().ok()?;
    for key in [&b"FontFile2"[..], b"FontFile3"] {
        if let Some(Object::Stream(stream)) = doc.dict_get(descriptor, key) {
            match filters::decode_stream(stream) {
                Ok(data) if ttf_parser::Face::parse(&data, 0).is_ok() => return Some(data),
                Ok(_) => tracing::debug!(key = %String::from_utf8_lossy(key), "embedded font not parsable"),
                Err(e) => tracing::debug!("embedded font stream unreadable: {e}"),
            }
        }
    }
    None
}

/// /W 配列: `c [w1 w2 ...]` または `c_first c_last w`
fn cid_widths(doc: &Document, descendant: &Dictionary) -> HashMap<u16, f64> {
    let mut widths = HashMap::new();
    let Some(Object::Array(items)) = doc.dict_get(descendant, b"W") else {
        return widths;
    };
    let mut i = 0;
    while i < items.len() {
        let Some(first) = object_to_f64(doc.resolve(&items[i])) else {
            break;
        };
        let first = first as u16;
        match items.get(i + 1).map(|o| doc.resolve(o)) {
            Some(Object::Array(run)) => {
                for (offset, w) in run.iter().enumerate() {
                    if let Some(w) = object_to_f64(doc.resolve(w)) {
                        widths.insert(first.saturating_add(offset as u16), w);
                    }
                }
                i += 2;
            }
            Some(last) => {
                let (Some(last), Some(w)) = (
                    object_to_f64(last),
                    items.get(i + 2).and_then(|o| object_to_f64(doc.resolve(o))),
                ) else {
                    break;
                };
                for cid in first..=(last as u16) {
                    widths.insert(cid, w);
                }
                i += 3;
            }
            None => break,
        }
    }
    widths
}

/// /Encoding 辞書の /Differences
fn differences(doc: &Document, font: &Dictionary) -> HashMap<u8, String> {
    let mut out = HashMap::new();
    let Some(Object::Dictionary(encoding)) = doc.dict_get(font, b"Encoding") else {
        return out;
    };
    let Some(Object::Array(items)) = doc.dict_get(encoding, b"Differences") else {
        return out;
    };
    let mut code: u32 = 0;
    for item in items {
        match item {
            Object::Integer(n) => code = (*n).clamp(0, 255) as u32,
            Object::Name(name) => {
                if let Ok(byte) = u8::try_from(code) {
                    out.insert(byte, String::from_utf8_lossy(name).into_owned());
                }
                code += 1;
            }
            _ => {}
        }
    }
    out
}

fn name_of(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match doc.dict_get(dict, key) {
        Some(Object::Name(name)) => Some(String::from_utf8_lossy(name).into_owned()),
        _ => None,
    }
}

// ============================================================
// システムフォント
// ============================================================

type FaceData = (Arc<Vec<u8>>, u32);

fn system_database() -> &'static fontdb::Database {
    static DB: OnceLock<fontdb::Database> = OnceLock::new();
    DB.get_or_init(|| {
        let mut db = fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(faces = db.len(), "system fonts loaded");
        db
    })
}

/// BaseFont 名（サブセット接頭辞・スタイル接尾辞つき）に近いシステムフォントを探す。
pub fn system_font(base_font: &str) -> Option<FaceData> {
    static CACHE: OnceLock<Mutex<HashMap<String, Option<FaceData>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Ok(guard) = cache.lock()
        && let Some(hit) = guard.get(base_font)
    {
        return hit.clone();
    }

    let found = query_system_font(base_font);
    if let Ok(mut guard) = cache.lock() {
        guard.insert(base_font.to_string(), found.clone());
    }
    found
}

fn query_system_font(base_font: &str) -> Option<FaceData> {
    // "ABCDEF+Helvetica-BoldOblique" → ("Helvetica", "BoldOblique")
    let name = base_font.split_once('+').map_or(base_font, |(_, rest)| rest);
    let (family, style) = name.split_once(['-', ',']).unwrap_or((name, ""));
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("symbol") || lower.starts_with("zapfdingbats") {
        return None;
    }

    let bold = lower.contains("bold") || lower.contains("black") || lower.contains("heavy");
    let italic = style.to_ascii_lowercase().contains("italic") || lower.contains("oblique");

    let mut families = vec![fontdb::Family::Name(family)];
    if lower.starts_with("times") {
        families.extend(
            ["Times New Roman", "Liberation Serif", "Nimbus Roman", "DejaVu Serif"].map(fontdb::Family::Name),
        );
        families.push(fontdb::Family::Serif);
    } else if lower.starts_with("courier") {
        families.extend(["Courier New", "Liberation Mono", "Nimbus Mono PS", "DejaVu Sans Mono"].map(fontdb::Family::Name));
        families.push(fontdb::Family::Monospace);
    } else {
        families.extend(["Helvetica", "Arial", "Liberation Sans", "Nimbus Sans", "DejaVu Sans"].map(fontdb::Family::Name));
        families.push(fontdb::Family::SansSerif);
    }

    let db = system_database();
    let query = fontdb::Query {
        families: &families,
        weight: if bold { fontdb::Weight::BOLD } else { fontdb::Weight::NORMAL },
        stretch: fontdb::Stretch::Normal,
        style: if italic { fontdb::Style::Italic } else { fontdb::Style::Normal },
    };
    let id = db.query(&query)?;
    let found = db.with_face_data(id, |data, index| (Arc::new(data.to_vec()), index));
    tracing::debug!(base_font, resolved = found.is_some(), "system font lookup");
    found
}

// ============================================================
// 文字コード表
// ============================================================

/// WinAnsiEncoding (cp1252) のコード → Unicode
fn win_ansi_to_char(code: u8) -> Option<char> {
    const HIGH: [u16; 32] = [
        0x20AC, 0, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160, 0x2039, 0x0152, 0,
        0x017D, 0, 0, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, 0x02DC, 0x2122, 0x0161, 0x203A,
        0x0153, 0, 0x017E, 0x0178,
    ];
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(char::from(code)),
        0x80..=0x9F => match HIGH[usize::from(code - 0x80)] {
            0 => None,
            cp => char::from_u32(u32::from(cp)),
        },
        _ => None,
    }
}

/// よく使うグリフ名と `uniXXXX` / `uXXXX[XX]` を Unicode にする。
fn glyph_name_to_char(name: &str) -> Option<char> {
    let base = name.split('.').next().unwrap_or(name);
    let mut chars = base.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(c);
    }
    if let Some(hex) = base.strip_prefix("uni").filter(|h| h.len() == 4) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(hex) = base.strip_prefix('u').filter(|h| (4..=6).contains(&h.len())) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    const DIGITS: [&str; 10] = ["zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine"];
    if let Some(d) = DIGITS.iter().position(|&n| n == base) {
        return char::from_digit(d as u32, 10);
    }
    let c = match base {
        "space" | "nbspace" => ' ',
        "exclam" => '!',
        "quotedbl" => '"',
        "numbersign" => '#',
        "dollar" => '$',
        "percent" => '%',
        "ampersand" => '&',
        "quotesingle" => '\'',
        "parenleft" => '(',
        "parenright" => ')',
        "asterisk" => '*',
        "plus" => '+',
        "comma" => ',',
        "hyphen" | "minus" => '-',
        "period" => '.',
        "slash" => '/',
        "colon" => ':',
        "semicolon" => ';',
        "less" => '<',
        "equal" => '=',
        "greater" => '>',
        "question" => '?',
        "at" => '@',
        "bracketleft" => '[',
        "backslash" => '\\',
        "bracketright" => ']',
        "underscore" => '_',
        "braceleft" => '{',
        "bar" => '|',
        "braceright" => '}',
        "bullet" => '\u{2022}',
        "endash" => '\u{2013}',
        "emdash" => '\u{2014}',
        "quoteleft" => '\u{2018}',
        "quoteright" => '\u{2019}',
        "quotedblleft" => '\u{201C}',
        "quotedblright" => '\u{201D}',
        _ => return None,
    };
    Some(c)
}
