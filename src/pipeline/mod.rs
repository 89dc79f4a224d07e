// 複数ファイルへの操作適用と出力のまとめ

pub mod archive;
pub mod batch;
