//! 標準セキュリティハンドラによる暗号化と、暗号化された入力の情報。
//!
//! 鍵の導出と暗号化そのものは lopdf の `EncryptionVersion` に任せる。
//! 書き込みは RC4 40bit (V1/R2)、RC4 128bit (V2/R3)、AES-256 (V5/R6) に対応する。
//! 読み込みはこれに加えて V4/R4 (RC4 / AES-128) と V5/R5 を受け付ける。
//!
//! # 制限
//!
//! 権限フラグ（印刷・コピー・編集・注釈）は**助言的**なものに過ぎない。
//! 従うかどうかは閲覧ソフト次第で、ユーザーパスワードを知っている者は
//! ファイル全体を復号できる。権限フラグをアクセス制御として扱ってはならない。

use std::collections::BTreeMap;
use std::sync::Arc;

use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::{EncryptionState, EncryptionVersion, Object, dictionary};
use rand_core::{OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::PdfForgeError;
use crate::pdf::document::Document;

/// 暗号フィルタ辞書のエントリ名
const STD_CF: &[u8] = b"StdCF";

/// 暗号方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Rc4_40,
    Rc4_128,
    /// 読み込みのみ
    Aes128,
    Aes256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rc4_40 => "rc4_40",
            Self::Rc4_128 => "rc4_128",
            Self::Aes128 => "aes_128",
            Self::Aes256 => "aes_256",
        }
    }
}

/// 権限フラグ（助言的）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Permissions {
    pub print: bool,
    pub copy: bool,
    pub modify: bool,
    pub annotate: bool,
}

/// /P の予約ビット（7, 8, 13〜32）
const P_RESERVED: u32 = 0xFFFF_F0C0;

impl Permissions {
    pub const ALL: Self = Self {
        print: true,
        copy: true,
        modify: true,
        annotate: true,
    };

    /// `"print"`, `"copy"`, `"modify"`, `"annotate"` の名前列から作る。
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> crate::error::Result<Self> {
        let mut perms = Self::default();
        for name in names {
            match name.as_ref() {
                "print" => perms.print = true,
                "copy" => perms.copy = true,
                "modify" => perms.modify = true,
                "annotate" => perms.annotate = true,
                other => {
                    return Err(PdfForgeError::config(format!(
                        "unknown permission '{other}' (expected print, copy, modify or annotate)"
                    )));
                }
            }
        }
        Ok(perms)
    }

    /// /P の値に変換する。
    ///
    /// print → bit 3, 12 / modify → bit 4, 11 / copy → bit 5, 10 / annotate → bit 6, 9
    pub fn to_p(self) -> i32 {
        let mut bits = P_RESERVED;
        if self.print {
            bits |= 0x4 | 0x800;
        }
        if self.modify {
            bits |= 0x8 | 0x400;
        }
        if self.copy {
            bits |= 0x10 | 0x200;
        }
        if self.annotate {
            bits |= 0x20 | 0x100;
        }
        bits as i32
    }

    pub fn from_p(p: i32) -> Self {
        let bits = p as u32;
        Self {
            print: bits & 0x4 != 0,
            modify: bits & 0x8 != 0,
            copy: bits & 0x10 != 0,
            annotate: bits & 0x20 != 0,
        }
    }
}

/// 読み込み時にどちらのパスワードで認証されたか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordKind {
    User,
    Owner,
}

/// 暗号化されていた入力ファイルの情報
#[derive(Debug, Clone, Serialize)]
pub struct SecurityInfo {
    pub algorithm: Algorithm,
    pub revision: u8,
    pub permissions: Permissions,
    pub p: i32,
    pub authenticated_as: PasswordKind,
}

/// 暗号化オプション
#[derive(Debug, Clone)]
pub struct ProtectOptions {
    pub user_password: String,
    /// 空ならユーザーパスワードと同じ
    pub owner_password: String,
    pub permissions: Permissions,
    pub algorithm: Algorithm,
}

impl Permissions {
    /// lopdf の権限ビットに変換する。対になるビットは常に一緒に立てる。
    pub fn to_lopdf(self) -> lopdf::Permissions {
        let mut bits = lopdf::Permissions::empty();
        if self.print {
            bits |= lopdf::Permissions::PRINTABLE | lopdf::Permissions::PRINTABLE_IN_HIGH_QUALITY;
        }
        if self.modify {
            bits |= lopdf::Permissions::MODIFIABLE | lopdf::Permissions::ASSEMBLABLE;
        }
        if self.copy {
            bits |= lopdf::Permissions::COPYABLE | lopdf::Permissions::COPYABLE_FOR_ACCESSIBILITY;
        }
        if self.annotate {
            bits |= lopdf::Permissions::ANNOTABLE | lopdf::Permissions::FILLABLE;
        }
        bits
    }
}

/// 復号に使った lopdf の状態から入力の暗号情報をまとめる。
///
/// `file_id` は trailer の /ID。パスワードがオーナーパスワードとして通るなら Owner、それ以外は User。
pub fn security_info(state: &lopdf::EncryptionState, file_id: Option<&Object>, password: &str) -> SecurityInfo {
    let algorithm = match state.version() {
        5 => Algorithm::Aes256,
        4 => match state.crypt_filters().get(state.default_stream_filter()).map(|f| f.method()) {
            Some(b"AESV2") => Algorithm::Aes128,
            Some(b"AESV3") => Algorithm::Aes256,
            _ => Algorithm::Rc4_128,
        },
        _ if state.key_length().unwrap_or(40) > 40 => Algorithm::Rc4_128,
        _ => Algorithm::Rc4_40,
    };
    let p = state.permissions().bits() as u32 as i32;
    SecurityInfo {
        algorithm,
        revision: u8::try_from(state.revision()).unwrap_or(0),
        permissions: Permissions::from_p(p),
        p,
        authenticated_as: authenticated_as(state, file_id, password),
    }
}

fn authenticated_as(state: &lopdf::EncryptionState, file_id: Option<&Object>, password: &str) -> PasswordKind {
    if password.is_empty() {
        return PasswordKind::User;
    }
    let Ok(encrypt_dict) = state.encode() else {
        return PasswordKind::User;
    };
    // /Encrypt と /ID だけを持つドキュメントで照合する
    let mut check = lopdf::Document::with_version("1.7");
    let encrypt_id = check.add_object(encrypt_dict);
    check.trailer.set("Encrypt", encrypt_id);
    if let Some(id) = file_id {
        check.trailer.set("ID", id.clone());
    }
    if check.authenticate_owner_password(password).is_ok() {
        PasswordKind::Owner
    } else {
        PasswordKind::User
    }
}

/// ドキュメント全体を暗号化したコピーを返す。
///
/// オーナーパスワードが空ならユーザーパスワードを使う。両方空なら WeakPasswordError。
/// AES-256 では PDF 1.7 と Adobe 拡張レベル 8 を宣言する。
pub fn encrypt(doc: &Document, options: &ProtectOptions) -> crate::error::Result<Document> {
    doc.ensure_plaintext()?;
    if options.user_password.is_empty() && options.owner_password.is_empty() {
        return Err(PdfForgeError::weak_password(
            "at least one of user and owner password must be set",
        ));
    }
    let owner_password = if options.owner_password.is_empty() {
        options.user_password.as_str()
    } else {
        options.owner_password.as_str()
    };

    let mut out = doc.clone();
    out.security = None;
    out.ensure_file_id();

    if options.algorithm == Algorithm::Aes256 {
        if out.version.as_str() < "1.7" {
            out.version = "1.7".to_string();
        }
        let catalog_id = out.catalog_id()?;
        if let Some(Object::Dictionary(catalog)) = out.objects.get_mut(&catalog_id) {
            catalog.set(
                "Extensions",
                dictionary! {
                    "ADBE" => dictionary! {
                        "BaseVersion" => Object::Name(b"1.7".to_vec()),
                        "ExtensionLevel" => 8,
                    },
                },
            );
        }
    }

    let mut target = out.to_lopdf();
    let permissions = options.permissions.to_lopdf();
    let mut file_key = [0u8; 32];
    let version = match options.algorithm {
        Algorithm::Rc4_40 => EncryptionVersion::V1 {
            document: &target,
            owner_password,
            user_password: &options.user_password,
            permissions,
        },
        Algorithm::Rc4_128 => EncryptionVersion::V2 {
            document: &target,
            owner_password,
            user_password: &options.user_password,
            key_length: 128,
            permissions,
        },
        Algorithm::Aes256 => {
            OsRng.fill_bytes(&mut file_key);
            let filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
            EncryptionVersion::V5 {
                encrypt_metadata: true,
                crypt_filters: BTreeMap::from([(STD_CF.to_vec(), filter)]),
                file_encryption_key: &file_key,
                stream_filter: STD_CF.to_vec(),
                string_filter: STD_CF.to_vec(),
                owner_password,
                user_password: &options.user_password,
                permissions,
            }
        }
        Algorithm::Aes128 => {
            return Err(PdfForgeError::unsupported_format(
                "AES-128 output is not supported; use aes_256",
            ));
        }
    };
    let state = EncryptionState::try_from(version)?;
    target.encrypt(&state)?;

    out.objects = target.objects;
    out.trailer = target.trailer;
    out.max_id = target.max_id;
    out.encryption = Some(state);

    tracing::info!(
        algorithm = options.algorithm.as_str(),
        permissions = ?options.permissions,
        "document encrypted; permission flags are advisory only"
    );
    Ok(out)
}

/// trailer /ID 用の 16 バイト。
pub fn random_file_id() -> Vec<u8> {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    let digest = Sha256::digest(seed);
    digest[..16].to_vec()
}
