// ピクセルバッファへの塗り・線・画像の描画（デバイス空間、左上原点）

use image::{Rgb, RgbImage, RgbaImage};

use crate::pdf::content_stream::Matrix;

/// デバイス空間の点
pub type Point = (f64, f64);

/// 塗りつぶし規則
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillRule {
    NonZero,
    EvenOdd,
}

/// 描画先。インタープリタはこのトレイト越しにしか描かない。
pub trait Device {
    fn fill_path(&mut self, subpaths: &[Vec<Point>], rule: FillRule, color: [u8; 3], alpha: f64);
    fn stroke_path(&mut self, subpaths: &[Vec<Point>], width: f64, color: [u8; 3], alpha: f64);
    /// 単位正方形を `transform` で写した領域に画像を描く。
    fn draw_image(&mut self, image: &RgbaImage, transform: &Matrix, alpha: f64);
}

/// 白背景の RGB キャンバス
pub struct Canvas {
    pub image: RgbImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::from_pixel(width.max(1), height.max(1), Rgb([255, 255, 255])),
        }
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    fn blend(&mut self, x: u32, y: u32, color: [u8; 3], alpha: f64) {
        let pixel = self.image.get_pixel_mut(x, y);
        if alpha >= 1.0 {
            pixel.0 = color;
            return;
        }
        for (dst, src) in pixel.0.iter_mut().zip(color) {
            let blended = f64::from(*dst) * (1.0 - alpha) + f64::from(src) * alpha;
            *dst = blended.round().clamp(0.0, 255.0) as u8;
        }
    }

    /// 画素中心でサンプリングするスキャンライン塗り
    fn fill_polygons(&mut self, polygons: &[Vec<Point>], rule: FillRule, color: [u8; 3], alpha: f64) {
        if alpha <= 0.0 {
            return;
        }
        let edges: Vec<(Point, Point)> = polygons
            .iter()
            .filter(|poly| poly.len() >= 2)
            .flat_map(|poly| {
                poly.iter()
                    .zip(poly.iter().cycle().skip(1))
                    .map(|(&a, &b)| (a, b))
            })
            .filter(|(a, b)| a.1 != b.1)
            .collect();
        if edges.is_empty() {
            return;
        }

        let (width, height) = self.image.dimensions();
        let y_min = edges
            .iter()
            .map(|(a, b)| a.1.min(b.1))
            .fold(f64::INFINITY, f64::min);
        let y_max = edges
            .iter()
            .map(|(a, b)| a.1.max(b.1))
            .fold(f64::NEG_INFINITY, f64::max);
        let row_start = (y_min - 0.5).ceil().max(0.0) as u32;
        let row_end = ((y_max - 0.5).floor().min(f64::from(height) - 1.0)).max(-1.0) as i64;

        let mut crossings: Vec<(f64, i32)> = Vec::new();
        for row in row_start as i64..=row_end {
            let sample_y = row as f64 + 0.5;
            crossings.clear();
            for &(a, b) in &edges {
                let (lo, hi, dir) = if a.1 < b.1 { (a, b, 1) } else { (b, a, -1) };
                // 上端を含み下端を含まない
                if sample_y >= lo.1 && sample_y < hi.1 {
                    let t = (sample_y - lo.1) / (hi.1 - lo.1);
                    crossings.push((lo.0 + t * (hi.0 - lo.0), dir));
                }
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut winding = 0;
            for pair in crossings.windows(2) {
                winding += pair[0].1;
                let inside = match rule {
                    FillRule::NonZero => winding != 0,
                    FillRule::EvenOdd => winding % 2 != 0,
                };
                if !inside {
                    continue;
                }
                let x_start = (pair[0].0 - 0.5).ceil().max(0.0);
                let x_end = (pair[1].0 - 0.5).ceil().min(f64::from(width));
                let mut x = x_start;
                while x < x_end {
                    self.blend(x as u32, row as u32, color, alpha);
                    x += 1.0;
                }
            }
        }
    }
}

impl Device for Canvas {
    fn fill_path(&mut self, subpaths: &[Vec<Point>], rule: FillRule, color: [u8; 3], alpha: f64) {
        self.fill_polygons(subpaths, rule, color, alpha);
    }

    /// 各線分を太さぶんの四角形に、各頂点を正方形にして非ゼロ規則で塗る。
    ///
    /// 四角形はすべて同じ向きで作るので重なっても打ち消し合わない。
    fn stroke_path(&mut self, subpaths: &[Vec<Point>], width: f64, color: [u8; 3], alpha: f64) {
        let half = (width / 2.0).max(0.5);
        let mut polygons: Vec<Vec<Point>> = Vec::new();

        for path in subpaths {
            for segment in path.windows(2) {
                let ((x0, y0), (x1, y1)) = (segment[0], segment[1]);
                let (dx, dy) = (x1 - x0, y1 - y0);
                let len = dx.hypot(dy);
                if len < 1e-9 {
                    continue;
                }
                let (nx, ny) = (-dy / len * half, dx / len * half);
                polygons.push(vec![
                    (x0 + nx, y0 + ny),
                    (x1 + nx, y1 + ny),
                    (x1 - nx, y1 - ny),
                    (x0 - nx, y0 - ny),
                ]);
            }
            for &(x, y) in path {
                polygons.push(vec![
                    (x - half, y - half),
                    (x - half, y + half),
                    (x + half, y + half),
                    (x + half, y - half),
                ]);
            }
        }
        self.fill_polygons(&polygons, FillRule::NonZero, color, alpha);
    }

    fn draw_image(&mut self, image: &RgbaImage, transform: &Matrix, alpha: f64) {
        let Some(inverse) = transform.invert() else {
            return;
        };
        let (img_w, img_h) = image.dimensions();
        if img_w == 0 || img_h == 0 || alpha <= 0.0 {
            return;
        }
        let (width, height) = self.image.dimensions();
        let bbox = transform.unit_square_bbox();
        let x_start = bbox.x_min.floor().max(0.0) as u32;
        let y_start = bbox.y_min.floor().max(0.0) as u32;
        let x_end = bbox.x_max.ceil().min(f64::from(width)).max(0.0) as u32;
        let y_end = bbox.y_max.ceil().min(f64::from(height)).max(0.0) as u32;

        for y in y_start..y_end {
            for x in x_start..x_end {
                let (u, v) = inverse.transform(f64::from(x) + 0.5, f64::from(y) + 0.5);
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }
                // 画像の 1 行目は単位正方形の上端 (v = 1)
                let ix = ((u * f64::from(img_w)) as u32).min(img_w - 1);
                let iy = (((1.0 - v) * f64::from(img_h)) as u32).min(img_h - 1);
                let px = image.get_pixel(ix, iy).0;
                let a = alpha * f64::from(px[3]) / 255.0;
                if a > 0.0 {
                    self.blend(x, y, [px[0], px[1], px[2]], a);
                }
            }
        }
    }
}
