//! テキスト透かし
//!
//! 元のコンテンツストリームは `q` / `Q` だけのストリームで挟んで隔離し、
//! その後ろに透かしを描くストリームを追加する。元のバイト列には触れない。

use lopdf::content::Operation;
use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat};

use crate::error::PdfForgeError;
use crate::pdf::content_stream::encode_operations;
use crate::pdf::document::{Document, number_object};

const FONT_RESOURCE: &str = "FWatermark";
const GSTATE_RESOURCE: &str = "GSWatermark";

#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkOptions {
    pub text: String,
    pub font_size: f64,
    /// 0.0（透明）〜 1.0（不透明）
    pub opacity: f64,
    /// 反時計回りの回転（度）
    pub rotation: f64,
    /// RGB（各 0.0〜1.0）
    pub color: [f64; 3],
    /// 1 始まりのページ番号（None は全ページ）
    pub pages: Option<Vec<u32>>,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_size: 48.0,
            opacity: 0.3,
            rotation: 45.0,
            color: [0.5, 0.5, 0.5],
            pages: None,
        }
    }
}

impl WatermarkOptions {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.text.trim().is_empty() {
            return Err(PdfForgeError::config("watermark text must not be empty"));
        }
        if !(self.font_size > 0.0 && self.font_size.is_finite()) {
            return Err(PdfForgeError::config(format!(
                "watermark font size must be positive, got {}",
                self.font_size
            )));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(PdfForgeError::config(format!(
                "watermark opacity must be 0-1, got {}",
                self.opacity
            )));
        }
        if self.color.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(PdfForgeError::config("watermark color components must be 0-1"));
        }
        if !self.rotation.is_finite() {
            return Err(PdfForgeError::config("watermark rotation must be finite"));
        }
        Ok(())
    }
}

/// Helvetica の字幅（1/1000 em）。WinAnsi の 0x20〜0x7E。
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 0x20
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0x30
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 0x40
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 0x50
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 0x60
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 0x70
];

/// 表にない文字の字幅
const DEFAULT_WIDTH: u16 = 556;

/// テキストを WinAnsi バイト列にする。表現できない文字は '?'。
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            _ => b'?',
        })
        .collect()
}

/// WinAnsi バイト列の Helvetica での幅（ポイント）
pub fn helvetica_text_width(bytes: &[u8], font_size: f64) -> f64 {
    let units: u32 = bytes
        .iter()
        .map(|&b| {
            let width = match b {
                0x20..=0x7E => HELVETICA_WIDTHS[usize::from(b - 0x20)],
                _ => DEFAULT_WIDTH,
            };
            u32::from(width)
        })
        .sum();
    f64::from(units) * font_size / 1000.0
}

/// 選択ページに透かしを入れた新しいドキュメントを返す。
pub fn watermark(doc: &Document, options: &WatermarkOptions) -> crate::error::Result<Document> {
    options.validate()?;
    doc.ensure_plaintext()?;
    let indices = super::selected_indices(doc, options.pages.as_deref())?;

    let mut out = doc.clone();
    let text = encode_win_ansi(&options.text);
    let text_width = helvetica_text_width(&text, options.font_size);

    let mut font = Dictionary::new();
    font.set("Type", Object::Name(b"Font".to_vec()));
    font.set("Subtype", Object::Name(b"Type1".to_vec()));
    font.set("BaseFont", Object::Name(b"Helvetica".to_vec()));
    font.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
    let font_id = out.add_object(Object::Dictionary(font));

    let mut gstate = Dictionary::new();
    gstate.set("Type", Object::Name(b"ExtGState".to_vec()));
    gstate.set("ca", number_object(options.opacity));
    gstate.set("CA", number_object(options.opacity));
    let gstate_id = out.add_object(Object::Dictionary(gstate));

    let open_id = out.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let close_id = out.add_object(Stream::new(Dictionary::new(), b"\nQ\n".to_vec()));

    let stamped = indices.len();
    for index in indices {
        let page = out.page(index)?;
        let center_x = page.media_box.x0 + page.media_box.width() / 2.0;
        let center_y = page.media_box.y0 + page.media_box.height() / 2.0;

        // /Rotate で時計回りに表示されるぶんを戻し、画面上の角度を揃える
        let angle = (options.rotation + f64::from(page.rotation)) % 360.0;
        let operations = stamp_operations(options, angle, &text, text_width, (center_x, center_y));
        let stamp_id = out.add_object(Stream::new(Dictionary::new(), encode_operations(operations)?));

        let resources = merged_resources(&out, page.id, font_id, gstate_id);
        let mut contents: Vec<Object> = vec![Object::Reference(open_id)];
        contents.extend(out.page_content_ids(page.id).into_iter().map(Object::Reference));
        contents.push(Object::Reference(close_id));
        contents.push(Object::Reference(stamp_id));

        if let Some(Object::Dictionary(dict)) = out.objects.get_mut(&page.id) {
            dict.set("Resources", Object::Dictionary(resources));
            dict.set("Contents", Object::Array(contents));
        }
        tracing::debug!(page = index + 1, "watermark stamped");
    }

    tracing::info!(text = %options.text, pages = stamped, "watermark applied");
    Ok(out)
}

fn stamp_operations(
    options: &WatermarkOptions,
    angle: f64,
    text: &[u8],
    text_width: f64,
    (center_x, center_y): (f64, f64),
) -> Vec<Operation> {
    let (sin, cos) = angle.to_radians().sin_cos();
    let [r, g, b] = options.color;
    // 文字の縦方向の中心はおよそフォントサイズの 0.35 倍
    let baseline = -options.font_size * 0.35;

    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(GSTATE_RESOURCE.as_bytes().to_vec())]),
        Operation::new("rg", vec![number_object(r), number_object(g), number_object(b)]),
        Operation::new(
            "cm",
            vec![
                number_object(cos),
                number_object(sin),
                number_object(-sin),
                number_object(cos),
                number_object(center_x),
                number_object(center_y),
            ],
        ),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![
                Object::Name(FONT_RESOURCE.as_bytes().to_vec()),
                number_object(options.font_size),
            ],
        ),
        Operation::new("Td", vec![number_object(-text_width / 2.0), number_object(baseline)]),
        Operation::new("Tj", vec![Object::String(text.to_vec(), StringFormat::Literal)]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// ページのリソースに透かし用のフォントと ExtGState を足した辞書を作る。
///
/// 共有されているリソース辞書は書き換えず、ページ直下に複製を置く。
fn merged_resources(doc: &Document, page_id: ObjectId, font_id: ObjectId, gstate_id: ObjectId) -> Dictionary {
    let mut resources = doc.page_resources(page_id);
    for (category, name, id) in [
        ("Font", FONT_RESOURCE, font_id),
        ("ExtGState", GSTATE_RESOURCE, gstate_id),
    ] {
        let mut sub = resources
            .get(category.as_bytes())
            .ok()
            .map(|o| doc.resolve(o))
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default();
        sub.set(name, Object::Reference(id));
        resources.set(category, Object::Dictionary(sub));
    }
    resources
}
