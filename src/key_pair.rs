use std::{fs, path::Path};

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    sha::sha256,
};
use thiserror::Error;

use crate::{
    base64::Base64,
    jwk::{Jwk, JwkError},
};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、檔案讀取、JWK 與其他相關錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("JWK error: {0}")]
    JwkError(#[from] JwkError),
}

/// 本模組使用的結果類型，當中錯誤皆為 `KeyError`。
type Result<T> = std::result::Result<T, KeyError>;

/// JWS 簽名演算法，由金鑰類型決定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rs256,
    Es256,
    Es384,
    Es512,
}

impl KeyAlgorithm {
    /// JWS `alg` 欄位使用的名稱。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
        }
    }

    pub(crate) fn digest(&self) -> MessageDigest {
        match self {
            Self::Rs256 | Self::Es256 => MessageDigest::sha256(),
            Self::Es384 => MessageDigest::sha384(),
            Self::Es512 => MessageDigest::sha512(),
        }
    }
}

/// 支援的橢圓曲線。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    fn nid(&self) -> Nid {
        match self {
            Self::P256 => Nid::X9_62_PRIME256V1,
            Self::P384 => Nid::SECP384R1,
            Self::P521 => Nid::SECP521R1,
        }
    }

    fn from_nid(nid: Nid) -> Option<Self> {
        match nid {
            Nid::X9_62_PRIME256V1 => Some(Self::P256),
            Nid::SECP384R1 => Some(Self::P384),
            Nid::SECP521R1 => Some(Self::P521),
            _ => None,
        }
    }

    /// JWK `crv` 欄位使用的名稱。
    pub fn jwk_name(&self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
            Self::P521 => "P-521",
        }
    }

    /// 座標與簽名分量的固定位元組長度。
    pub fn coordinate_size(&self) -> usize {
        match self {
            Self::P256 => 32,
            Self::P384 => 48,
            Self::P521 => 66,
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::P256 => KeyAlgorithm::Es256,
            Self::P384 => KeyAlgorithm::Es384,
            Self::P521 => KeyAlgorithm::Es512,
        }
    }
}

/// 表示一組非對稱加密的金鑰對。
///
/// 支援 RSA 與 P-256 / P-384 / P-521 橢圓曲線金鑰；簽名演算法由金鑰類型決定。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// 此金鑰使用的 JWS 演算法。
    pub alg: KeyAlgorithm,
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 預設的 RSA 金鑰位元長度。
    pub const DEFAULT_RSA_BITS: u32 = 2048;

    /// 產生新的 RSA 金鑰對。
    ///
    /// # 參數
    ///
    /// - `bits`: 金鑰長度，若為 `None` 則使用 2048 位元。
    pub fn generate_rsa(bits: Option<u32>) -> Result<Self> {
        let rsa = Rsa::generate(bits.unwrap_or(Self::DEFAULT_RSA_BITS))?;
        Self::from_private(PKey::from_rsa(rsa)?)
    }

    /// 在指定曲線上產生新的 ECDSA 金鑰對。
    pub fn generate_ec(curve: EcCurve) -> Result<Self> {
        let group = EcGroup::from_curve_name(curve.nid())?;
        let ec = EcKey::generate(&group)?;
        Self::from_private(PKey::from_ec_key(ec)?)
    }

    /// 根據 PEM 格式的私鑰資料建立一組金鑰對，金鑰類型自動判斷。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        Self::from_private(PKey::private_key_from_pem(pri_key_pem)?)
    }

    /// 從指定的檔案路徑讀取 PEM 格式的私鑰並建立金鑰對。
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self> {
        let pem = fs::read(path)?;
        Self::from_pem(&pem)
    }

    /// 以 PKCS#8 PEM 匯出私鑰。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// 包裝既有的私鑰，並驗證其類型受支援。
    pub fn from_private(pri_key: PKey<Private>) -> Result<Self> {
        let alg = Self::detect_algorithm(&pri_key)?;
        let pub_key = PKey::public_key_from_der(&pri_key.public_key_to_der()?)?;

        Ok(Self {
            alg,
            pri_key,
            pub_key,
        })
    }

    fn detect_algorithm(pri_key: &PKey<Private>) -> Result<KeyAlgorithm> {
        match pri_key.id() {
            Id::RSA => Ok(KeyAlgorithm::Rs256),
            Id::EC => {
                let ec = pri_key.ec_key()?;
                ec.group()
                    .curve_name()
                    .and_then(EcCurve::from_nid)
                    .map(|c| c.algorithm())
                    .ok_or_else(|| KeyError::UnsupportedAlgorithm("unknown EC curve".into()))
            }
            other => Err(KeyError::UnsupportedAlgorithm(format!(
                "key type {}",
                other.as_raw()
            ))),
        }
    }

    /// 若為 EC 金鑰，回傳其曲線。
    pub fn curve(&self) -> Option<EcCurve> {
        match self.alg {
            KeyAlgorithm::Rs256 => None,
            KeyAlgorithm::Es256 => Some(EcCurve::P256),
            KeyAlgorithm::Es384 => Some(EcCurve::P384),
            KeyAlgorithm::Es512 => Some(EcCurve::P521),
        }
    }

    /// 公鑰的 JWK 表示。
    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::new(self)?)
    }

    /// 計算並回傳金鑰對的縮影（RFC 7638 thumbprint）。
    ///
    /// 以正規化 JWK 的 SHA-256 雜湊值，再以 URL-safe Base64 字串回傳。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = self.jwk()?;
        let hash = sha256(jwk.to_acme_json()?.as_bytes());
        Ok(Base64::new(hash).base64_url())
    }

    /// 判斷兩組金鑰的公鑰是否相同。
    pub fn same_public_key(&self, other: &KeyPair) -> bool {
        self.pub_key.public_eq(&other.pub_key)
    }
}
