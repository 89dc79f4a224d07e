pub mod config;
pub mod crypt;
pub mod error;
pub mod ops;
pub mod pdf;
pub mod pipeline;
pub mod render;

/// 出力ドキュメントの /Producer に書く名前
pub const PRODUCER: &str = concat!("pdf_forge ", env!("CARGO_PKG_VERSION"));
