// コンテンツストリームの解釈: パス構築・塗り・線・テキスト・画像 XObject・フォーム XObject
//
// テキストはグリフのアウトラインをパスとして塗る。
// シェーディング、クリップ、インライン画像は描かない。

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;
use lopdf::content::Operation;
use lopdf::{Dictionary, Object, ObjectId, Stream};

use crate::pdf::content_stream::{Matrix, decode_operations, operand_to_f64};
use crate::pdf::document::{Document, object_to_f64};
use crate::pdf::filters;
use crate::pdf::image_xobject::{self, cmyk_to_rgb};
use crate::render::canvas::{Device, FillRule, Point};
use crate::render::font::{self, LoadedFont, PathOp};

/// フォーム XObject の入れ子の上限
const MAX_FORM_DEPTH: usize = 12;

/// 曲線を折れ線にするときの分割数
const CURVE_STEPS: usize = 16;

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    fill_color: [u8; 3],
    stroke_color: [u8; 3],
    line_width: f64,
    fill_alpha: f64,
    stroke_alpha: f64,
    text: TextState,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            fill_color: [0, 0, 0],
            stroke_color: [0, 0, 0],
            line_width: 1.0,
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            text: TextState::default(),
        }
    }
}

/// テキスト状態パラメータ（q/Q で保存される）
#[derive(Debug, Clone)]
struct TextState {
    font: Option<Arc<LoadedFont>>,
    font_size: f64,
    /// Tc
    char_spacing: f64,
    /// Tw
    word_spacing: f64,
    /// Tz（100 = 等倍）
    horizontal_scaling: f64,
    /// TL
    leading: f64,
    /// Ts
    rise: f64,
    /// Tr
    render_mode: i64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scaling: 100.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

/// 構築中のパス（デバイス空間で保持する）
#[derive(Debug, Default)]
struct PathBuilder {
    subpaths: Vec<Vec<Point>>,
    current: Vec<Point>,
    /// ユーザー空間での現在点
    last: (f64, f64),
    start: (f64, f64),
}

impl PathBuilder {
    fn move_to(&mut self, ctm: &Matrix, x: f64, y: f64) {
        self.flush();
        self.current.push(ctm.transform(x, y));
        self.last = (x, y);
        self.start = (x, y);
    }

    fn line_to(&mut self, ctm: &Matrix, x: f64, y: f64) {
        if self.current.is_empty() {
            self.current.push(ctm.transform(self.last.0, self.last.1));
        }
        self.current.push(ctm.transform(x, y));
        self.last = (x, y);
    }

    fn curve_to(&mut self, ctm: &Matrix, c1: (f64, f64), c2: (f64, f64), end: (f64, f64)) {
        let p0 = self.last;
        if self.current.is_empty() {
            self.current.push(ctm.transform(p0.0, p0.1));
        }
        for step in 1..=CURVE_STEPS {
            let t = step as f64 / CURVE_STEPS as f64;
            let mt = 1.0 - t;
            let x = mt * mt * mt * p0.0 + 3.0 * mt * mt * t * c1.0 + 3.0 * mt * t * t * c2.0 + t * t * t * end.0;
            let y = mt * mt * mt * p0.1 + 3.0 * mt * mt * t * c1.1 + 3.0 * mt * t * t * c2.1 + t * t * t * end.1;
            self.current.push(ctm.transform(x, y));
        }
        self.last = end;
    }

    fn close(&mut self) {
        if let Some(&first) = self.current.first() {
            self.current.push(first);
        }
        self.flush();
        self.last = self.start;
    }

    fn rect(&mut self, ctm: &Matrix, x: f64, y: f64, w: f64, h: f64) {
        self.move_to(ctm, x, y);
        self.line_to(ctm, x + w, y);
        self.line_to(ctm, x + w, y + h);
        self.line_to(ctm, x, y + h);
        self.close();
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.subpaths.push(std::mem::take(&mut self.current));
        }
    }

    fn take(&mut self) -> Vec<Vec<Point>> {
        self.flush();
        std::mem::take(&mut self.subpaths)
    }
}

/// 1 ページぶんのインタープリタ
pub struct Interpreter<'a, D: Device> {
    doc: &'a Document,
    device: &'a mut D,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    path: PathBuilder,
    /// テキスト行列 Tm と行頭行列 Tlm
    text_matrix: Matrix,
    line_matrix: Matrix,
    /// フォント辞書のオブジェクト番号 → 読み込み結果
    fonts: HashMap<ObjectId, Option<Arc<LoadedFont>>>,
    /// 無視した演算子の数
    pub skipped: usize,
}

impl<'a, D: Device> Interpreter<'a, D> {
    pub fn new(doc: &'a Document, device: &'a mut D, base: Matrix) -> Self {
        Self {
            doc,
            device,
            state: GraphicsState::new(base),
            stack: Vec::new(),
            path: PathBuilder::default(),
            text_matrix: Matrix::identity(),
            line_matrix: Matrix::identity(),
            fonts: HashMap::new(),
            skipped: 0,
        }
    }

    /// コンテンツストリームを実行する。壊れたストリームは警告して読み飛ばす。
    pub fn run(&mut self, content: &[u8], resources: &Dictionary) {
        self.run_nested(content, resources, 0);
    }

    fn run_nested(&mut self, content: &[u8], resources: &Dictionary, depth: usize) {
        let operations = match decode_operations(content) {
            Ok(ops) => ops,
            Err(e) => {
                tracing::warn!("content stream skipped: {e}");
                return;
            }
        };
        let base_depth = self.stack.len();

        for op in &operations {
            if let Err(e) = self.execute(op, resources, depth) {
                tracing::debug!(operator = %op.operator, "operator skipped: {e}");
                self.skipped += 1;
            }
        }

        // 対応のない q を巻き戻す
        while self.stack.len() > base_depth {
            self.restore();
        }
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn execute(&mut self, op: &Operation, resources: &Dictionary, depth: usize) -> crate::error::Result<()> {
        let nums = || -> crate::error::Result<Vec<f64>> { op.operands.iter().map(operand_to_f64).collect() };
        let ctm = self.state.ctm;

        match op.operator.as_str() {
            "q" => self.stack.push(self.state.clone()),
            "Q" => self.restore(),
            "cm" => {
                let m = Matrix::from_operands(&op.operands)?;
                self.state.ctm = m.multiply(&self.state.ctm);
            }
            "w" => {
                if let Some(&w) = nums()?.first() {
                    self.state.line_width = w.max(0.0);
                }
            }
            "m" => {
                let v = expect_n(nums()?, 2)?;
                self.path.move_to(&ctm, v[0], v[1]);
            }
            "l" => {
                let v = expect_n(nums()?, 2)?;
                self.path.line_to(&ctm, v[0], v[1]);
            }
            "c" => {
                let v = expect_n(nums()?, 6)?;
                self.path.curve_to(&ctm, (v[0], v[1]), (v[2], v[3]), (v[4], v[5]));
            }
            "v" => {
                let v = expect_n(nums()?, 4)?;
                let current = self.path.last;
                self.path.curve_to(&ctm, current, (v[0], v[1]), (v[2], v[3]));
            }
            "y" => {
                let v = expect_n(nums()?, 4)?;
                self.path.curve_to(&ctm, (v[0], v[1]), (v[2], v[3]), (v[2], v[3]));
            }
            "h" => self.path.close(),
            "re" => {
                let v = expect_n(nums()?, 4)?;
                self.path.rect(&ctm, v[0], v[1], v[2], v[3]);
            }
            "f" | "F" => self.paint(Some(FillRule::NonZero), false),
            "f*" => self.paint(Some(FillRule::EvenOdd), false),
            "S" => self.paint(None, true),
            "s" => {
                self.path.close();
                self.paint(None, true);
            }
            "B" => self.paint(Some(FillRule::NonZero), true),
            "B*" => self.paint(Some(FillRule::EvenOdd), true),
            "b" => {
                self.path.close();
                self.paint(Some(FillRule::NonZero), true);
            }
            "b*" => {
                self.path.close();
                self.paint(Some(FillRule::EvenOdd), true);
            }
            "n" => {
                self.path.take();
            }
            "g" => self.state.fill_color = color_from_components(&nums()?),
            "G" => self.state.stroke_color = color_from_components(&nums()?),
            "rg" => self.state.fill_color = color_from_components(&expect_n(nums()?, 3)?),
            "RG" => self.state.stroke_color = color_from_components(&expect_n(nums()?, 3)?),
            "k" => self.state.fill_color = color_from_components(&expect_n(nums()?, 4)?),
            "K" => self.state.stroke_color = color_from_components(&expect_n(nums()?, 4)?),
            // 色空間の切り替えでは初期色（黒）に戻す
            "cs" => self.state.fill_color = [0, 0, 0],
            "CS" => self.state.stroke_color = [0, 0, 0],
            "sc" | "scn" => {
                if let Some(color) = color_operands(&op.operands) {
                    self.state.fill_color = color;
                }
            }
            "SC" | "SCN" => {
                if let Some(color) = color_operands(&op.operands) {
                    self.state.stroke_color = color;
                }
            }
            "gs" => self.apply_ext_gstate(op, resources),
            "BT" => {
                self.text_matrix = Matrix::identity();
                self.line_matrix = Matrix::identity();
            }
            "ET" => {}
            "Tf" => {
                let Some(Object::Name(name)) = op.operands.first() else {
                    return Err(crate::error::PdfForgeError::corrupt("Tf without font name"));
                };
                let size = op.operands.get(1).map(operand_to_f64).transpose()?.unwrap_or(0.0);
                self.state.text.font = self.load_font(resources, name);
                self.state.text.font_size = size;
            }
            "Tc" => self.state.text.char_spacing = expect_n(nums()?, 1)?[0],
            "Tw" => self.state.text.word_spacing = expect_n(nums()?, 1)?[0],
            "Tz" => self.state.text.horizontal_scaling = expect_n(nums()?, 1)?[0],
            "TL" => self.state.text.leading = expect_n(nums()?, 1)?[0],
            "Ts" => self.state.text.rise = expect_n(nums()?, 1)?[0],
            "Tr" => self.state.text.render_mode = expect_n(nums()?, 1)?[0] as i64,
            "Td" => {
                let v = expect_n(nums()?, 2)?;
                self.next_line(v[0], v[1]);
            }
            "TD" => {
                let v = expect_n(nums()?, 2)?;
                self.state.text.leading = -v[1];
                self.next_line(v[0], v[1]);
            }
            "Tm" => {
                let m = Matrix::from_operands(&op.operands)?;
                self.text_matrix = m;
                self.line_matrix = m;
            }
            "T*" => self.next_line(0.0, -self.state.text.leading),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    self.show_text(bytes);
                }
            }
            "'" => {
                self.next_line(0.0, -self.state.text.leading);
                if let Some(Object::String(bytes, _)) = op.operands.first() {
                    self.show_text(bytes);
                }
            }
            "\"" => {
                let [aw, ac, Object::String(bytes, _)] = op.operands.as_slice() else {
                    return Err(crate::error::PdfForgeError::corrupt("\" expects 3 operands"));
                };
                self.state.text.word_spacing = operand_to_f64(aw)?;
                self.state.text.char_spacing = operand_to_f64(ac)?;
                self.next_line(0.0, -self.state.text.leading);
                self.show_text(bytes);
            }
            "TJ" => {
                let Some(Object::Array(items)) = op.operands.first() else {
                    return Err(crate::error::PdfForgeError::corrupt("TJ expects an array"));
                };
                for item in items {
                    match item {
                        Object::String(bytes, _) => self.show_text(bytes),
                        other => {
                            let adjust = operand_to_f64(other)?;
                            let text = &self.state.text;
                            let tx = -adjust / 1000.0 * text.font_size * text.horizontal_scaling / 100.0;
                            self.text_matrix = Matrix::translate(tx, 0.0).multiply(&self.text_matrix);
                        }
                    }
                }
            }
            "Do" => self.draw_xobject(op, resources, depth)?,
            other => {
                tracing::trace!(operator = other, "operator ignored");
                self.skipped += 1;
            }
        }
        Ok(())
    }

    fn paint(&mut self, fill: Option<FillRule>, stroke: bool) {
        let subpaths = self.path.take();
        if subpaths.is_empty() {
            return;
        }
        if let Some(rule) = fill {
            self.device
                .fill_path(&subpaths, rule, self.state.fill_color, self.state.fill_alpha);
        }
        if stroke {
            let width = self.state.line_width * self.state.ctm.expansion();
            self.device
                .stroke_path(&subpaths, width, self.state.stroke_color, self.state.stroke_alpha);
        }
    }

    /// 行頭を (tx, ty) だけ動かして新しい行にする。
    fn next_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = Matrix::translate(tx, ty).multiply(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn load_font(&mut self, resources: &Dictionary, name: &[u8]) -> Option<Arc<LoadedFont>> {
        let doc = self.doc;
        let fonts = doc.dict_get(resources, b"Font")?.as_dict().ok()?;
        let entry = fonts.get(name).ok()?;
        let Object::Reference(id) = entry else {
            return entry.as_dict().ok().and_then(|dict| font::load_font(doc, dict)).map(Arc::new);
        };
        if let Some(cached) = self.fonts.get(id) {
            return cached.clone();
        }
        let loaded = doc
            .get_dictionary(*id)
            .ok()
            .and_then(|dict| font::load_font(doc, dict))
            .map(Arc::new);
        self.fonts.insert(*id, loaded.clone());
        loaded
    }

    /// 文字列を 1 グリフずつ塗り、テキスト行列を送る。
    fn show_text(&mut self, bytes: &[u8]) {
        let text = self.state.text.clone();
        let Some(font) = text.font.as_ref() else {
            self.skipped += 1;
            return;
        };
        let scaling = text.horizontal_scaling / 100.0;
        let em = text.font_size / f64::from(font.units_per_em().max(1));
        // 3: 不可視、7: クリップのみ。線だけのモードも塗りで近似する
        let visible = !matches!(text.render_mode, 3 | 7);

        for code in font.codes(bytes) {
            if visible && let Some(gid) = font.glyph_id(code) {
                let glyph = Matrix::new(em * scaling, 0.0, 0.0, em, 0.0, text.rise);
                let full = glyph.multiply(&self.text_matrix).multiply(&self.state.ctm);
                let subpaths = glyph_subpaths(&font.outline(gid), &full);
                if !subpaths.is_empty() {
                    self.device
                        .fill_path(&subpaths, FillRule::NonZero, self.state.fill_color, self.state.fill_alpha);
                }
            }

            let mut advance = font.advance(code) / 1000.0 * text.font_size + text.char_spacing;
            if code == 32 && font.is_single_byte() {
                advance += text.word_spacing;
            }
            self.text_matrix = Matrix::translate(advance * scaling, 0.0).multiply(&self.text_matrix);
        }
    }

    /// ExtGState の不透明度（/ca, /CA）だけを反映する。
    fn apply_ext_gstate(&mut self, op: &Operation, resources: &Dictionary) {
        let Some(Object::Name(name)) = op.operands.first() else {
            return;
        };
        let Some(gs) = lookup_resource(self.doc, resources, b"ExtGState", name).and_then(|o| o.as_dict().ok()) else {
            return;
        };
        if let Some(ca) = self.doc.dict_get(gs, b"ca").and_then(object_to_f64) {
            self.state.fill_alpha = ca.clamp(0.0, 1.0);
        }
        if let Some(ca) = self.doc.dict_get(gs, b"CA").and_then(object_to_f64) {
            self.state.stroke_alpha = ca.clamp(0.0, 1.0);
        }
    }

    fn draw_xobject(&mut self, op: &Operation, resources: &Dictionary, depth: usize) -> crate::error::Result<()> {
        let Some(Object::Name(name)) = op.operands.first() else {
            return Ok(());
        };
        let doc = self.doc;
        let Some(Object::Stream(stream)) = lookup_resource(doc, resources, b"XObject", name) else {
            tracing::debug!(name = %String::from_utf8_lossy(name), "XObject not found");
            return Ok(());
        };

        match stream.dict.get(b"Subtype") {
            Ok(Object::Name(sub)) if sub == b"Image" => {
                let image = self.load_image(stream)?;
                self.device.draw_image(&image, &self.state.ctm, self.state.fill_alpha);
            }
            Ok(Object::Name(sub)) if sub == b"Form" => {
                if depth >= MAX_FORM_DEPTH {
                    tracing::warn!(depth, "form XObject nesting too deep, skipped");
                    return Ok(());
                }
                let content = filters::decode_stream(stream)?;
                let matrix = doc
                    .dict_get(&stream.dict, b"Matrix")
                    .map(|o| match o {
                        Object::Array(items) => Matrix::from_operands(items),
                        _ => Ok(Matrix::identity()),
                    })
                    .transpose()?
                    .unwrap_or_default();
                let form_resources = doc
                    .dict_get(&stream.dict, b"Resources")
                    .and_then(|o| o.as_dict().ok())
                    .unwrap_or(resources);

                let saved = self.state.clone();
                let saved_path = std::mem::take(&mut self.path);
                self.state.ctm = matrix.multiply(&self.state.ctm);
                self.run_nested(&content, form_resources, depth + 1);
                self.state = saved;
                self.path = saved_path;
            }
            _ => {}
        }
        Ok(())
    }

    /// 画像 XObject を RGBA にする（画像マスクは塗り色、SMask はアルファ）。
    fn load_image(&self, stream: &Stream) -> crate::error::Result<RgbaImage> {
        let meta = image_xobject::read_image_meta(self.doc, stream)?;
        let decoded = image_xobject::decode_image_with_meta(stream, &meta)?;

        if meta.image_mask {
            let alpha = decoded.to_luma8();
            let [r, g, b] = self.state.fill_color;
            return Ok(RgbaImage::from_fn(alpha.width(), alpha.height(), |x, y| {
                image::Rgba([r, g, b, alpha.get_pixel(x, y).0[0]])
            }));
        }

        let mut rgba = decoded.to_rgba8();

        if let Some(Object::Stream(smask)) = self.doc.dict_get(&stream.dict, b"SMask")
            && let Ok(mask) = image_xobject::decode_image(self.doc, smask)
        {
            let mask = mask.to_luma8();
            let (w, h) = rgba.dimensions();
            let (mw, mh) = mask.dimensions();
            if mw > 0 && mh > 0 {
                for (x, y, pixel) in rgba.enumerate_pixels_mut() {
                    let mx = (u64::from(x) * u64::from(mw) / u64::from(w.max(1))) as u32;
                    let my = (u64::from(y) * u64::from(mh) / u64::from(h.max(1))) as u32;
                    pixel.0[3] = mask.get_pixel(mx.min(mw - 1), my.min(mh - 1)).0[0];
                }
            }
        }
        Ok(rgba)
    }
}

/// フォント単位のアウトラインをデバイス空間のサブパスにする。
fn glyph_subpaths(outline: &[PathOp], matrix: &Matrix) -> Vec<Vec<Point>> {
    let mut path = PathBuilder::default();
    for op in outline {
        match *op {
            PathOp::MoveTo(x, y) => path.move_to(matrix, x, y),
            PathOp::LineTo(x, y) => path.line_to(matrix, x, y),
            PathOp::QuadTo(x1, y1, x, y) => {
                // 2 次ベジェを 3 次に上げる
                let (x0, y0) = path.last;
                let c1 = (x0 + 2.0 / 3.0 * (x1 - x0), y0 + 2.0 / 3.0 * (y1 - y0));
                let c2 = (x + 2.0 / 3.0 * (x1 - x), y + 2.0 / 3.0 * (y1 - y));
                path.curve_to(matrix, c1, c2, (x, y));
            }
            PathOp::CubicTo(x1, y1, x2, y2, x, y) => path.curve_to(matrix, (x1, y1), (x2, y2), (x, y)),
            PathOp::Close => path.close(),
        }
    }
    path.take()
}

/// リソース辞書の分類（/XObject など）から名前で引く。
fn lookup_resource<'r>(doc: &'r Document, resources: &'r Dictionary, category: &[u8], name: &[u8]) -> Option<&'r Object> {
    let sub = doc.dict_get(resources, category)?.as_dict().ok()?;
    doc.dict_get(sub, name)
}

fn expect_n(values: Vec<f64>, n: usize) -> crate::error::Result<Vec<f64>> {
    if values.len() < n {
        return Err(crate::error::PdfForgeError::corrupt(format!(
            "expected {n} operands, got {}",
            values.len()
        )));
    }
    Ok(values)
}

fn unit_to_byte(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// 成分数（1: グレー、3: RGB、4: CMYK）から RGB を作る。
fn color_from_components(values: &[f64]) -> [u8; 3] {
    match values {
        [g] => [unit_to_byte(*g); 3],
        [r, g, b] => [unit_to_byte(*r), unit_to_byte(*g), unit_to_byte(*b)],
        [c, m, y, k] => cmyk_to_rgb(unit_to_byte(*c), unit_to_byte(*m), unit_to_byte(*y), unit_to_byte(*k)),
        _ => [0, 0, 0],
    }
}

/// sc/scn のオペランド。末尾のパターン名は無視し、数値成分だけで色を決める。
fn color_operands(operands: &[Object]) -> Option<[u8; 3]> {
    let values: Vec<f64> = operands
        .iter()
        .filter(|o| !matches!(o, Object::Name(_)))
        .map(operand_to_f64)
        .collect::<crate::error::Result<_>>()
        .ok()?;
    matches!(values.len(), 1 | 3 | 4).then(|| color_from_components(&values))
}
