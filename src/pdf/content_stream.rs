use lopdf::Object;
use lopdf::content::{Content, Operation};

use crate::error::PdfForgeError;

/// 6要素アフィン変換行列 [a, b, c, d, e, f]
/// PDF仕様: [ a b 0 ]
///          [ c d 0 ]
///          [ e f 1 ]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    /// 単位行列を返す。
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// 反時計回りの回転（度）
    pub fn rotate_degrees(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    /// self * other (行列の右乗算)
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// 逆行列。特異行列なら None。
    pub fn invert(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Matrix {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }

    /// 点を変換する。
    pub fn transform(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// 線幅などの長さに掛かる平均的な拡大率
    pub fn expansion(&self) -> f64 {
        (self.a * self.d - self.b * self.c).abs().sqrt()
    }

    /// 単位正方形 [0,0]-[1,1] を変換した領域のBBox。
    pub fn unit_square_bbox(&self) -> BBox {
        let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)];
        let transformed: Vec<(f64, f64)> = corners.iter().map(|&(x, y)| self.transform(x, y)).collect();

        BBox {
            x_min: transformed.iter().map(|p| p.0).fold(f64::INFINITY, f64::min),
            y_min: transformed.iter().map(|p| p.1).fold(f64::INFINITY, f64::min),
            x_max: transformed.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max),
            y_max: transformed.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max),
        }
    }

    /// `cm` などの6オペランドから行列を作る。
    pub fn from_operands(operands: &[Object]) -> crate::error::Result<Matrix> {
        if operands.len() != 6 {
            return Err(PdfForgeError::corrupt(format!(
                "matrix needs 6 operands, got {}",
                operands.len()
            )));
        }
        let vals: Vec<f64> = operands
            .iter()
            .map(operand_to_f64)
            .collect::<crate::error::Result<Vec<_>>>()?;
        Ok(Matrix::new(vals[0], vals[1], vals[2], vals[3], vals[4], vals[5]))
    }
}

/// 矩形領域を表すバウンディングボックス。
#[derive(Debug, Clone, Copy)]
pub struct BBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// lopdfのObjectから数値をf64として取得する。
pub fn operand_to_f64(obj: &Object) -> crate::error::Result<f64> {
    match obj {
        Object::Integer(i) => Ok(*i as f64),
        Object::Real(r) => Ok(f64::from(*r)),
        _ => Err(PdfForgeError::corrupt(format!(
            "expected numeric operand, got {:?}",
            obj
        ))),
    }
}

/// コンテンツストリームを演算子列に分解する。
pub fn decode_operations(content_bytes: &[u8]) -> crate::error::Result<Vec<Operation>> {
    // 空バイト列の場合、lopdfのパーサがエラーを返す可能性があるため特別扱い
    if content_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    let content = Content::decode(content_bytes)
        .map_err(|e| PdfForgeError::corrupt(format!("content stream: {e}")))?;
    Ok(content.operations)
}

/// 演算子列をコンテンツストリームのバイト列にする。
pub fn encode_operations(operations: Vec<Operation>) -> crate::error::Result<Vec<u8>> {
    Content { operations }
        .encode()
        .map_err(|e| PdfForgeError::encoding(format!("content stream: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_invert_round_trip() {
        let m = Matrix::new(2.0, 0.5, -0.3, 1.5, 10.0, -4.0);
        let inv = m.invert().unwrap();
        let id = m.multiply(&inv);
        assert!(approx(id.a, 1.0) && approx(id.b, 0.0) && approx(id.c, 0.0));
        assert!(approx(id.d, 1.0) && approx(id.e, 0.0) && approx(id.f, 0.0));

        let (x, y) = m.transform(3.0, 7.0);
        let (bx, by) = inv.transform(x, y);
        assert!(approx(bx, 3.0) && approx(by, 7.0));
    }

    #[test]
    fn test_singular_matrix_has_no_inverse() {
        assert!(Matrix::new(1.0, 2.0, 2.0, 4.0, 0.0, 0.0).invert().is_none());
    }

    #[test]
    fn test_rotation_90() {
        let (x, y) = Matrix::rotate_degrees(90.0).transform(1.0, 0.0);
        assert!(approx(x, 0.0) && approx(y, 1.0));
    }

    #[test]
    fn test_unit_square_bbox() {
        let m = Matrix::new(100.0, 0.0, 0.0, 50.0, 10.0, 20.0);
        let bbox = m.unit_square_bbox();
        assert_eq!((bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max), (10.0, 20.0, 110.0, 70.0));
    }

    #[test]
    fn test_decode_encode_operations() {
        let ops = decode_operations(b"q 1 0 0 1 5 5 cm /Im1 Do Q").unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[1].operator, "cm");
        let m = Matrix::from_operands(&ops[1].operands).unwrap();
        assert_eq!(m, Matrix::translate(5.0, 5.0));

        let bytes = encode_operations(ops).unwrap();
        assert_eq!(decode_operations(&bytes).unwrap().len(), 4);
        assert!(decode_operations(b"  \n").unwrap().is_empty());
    }
}
