//! Cognito SRP password verification
//!
//! `USER_SRP_AUTH` never sends the password. The client sends its public
//! value `A`, Cognito answers with a `PASSWORD_VERIFIER` challenge carrying
//! salt, `B` and a secret block, and the client proves knowledge of the
//! password with an HMAC over that block keyed by the shared SRP secret.

use base64::Engine;
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// RFC 3526 3072-bit MODP group prime.
const N_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AAAC42DAD33170D04507A33A85521ABDF1CBA64",
    "ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7",
    "ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6B",
    "F12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB31",
    "43DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF",
);
const G: u32 = 2;
const DERIVED_KEY_INFO: &[u8] = b"Caldera Derived Key";

pub(crate) const PASSWORD_VERIFIER: &str = "PASSWORD_VERIFIER";

/// SRP group parameters `(N, g, k)`.
pub(crate) struct Group {
    pub n: BigUint,
    pub g: BigUint,
    pub k: BigUint,
}

impl Group {
    pub fn cognito() -> Self {
        // N_HEX is a valid constant, parsing cannot fail.
        let n = BigUint::parse_bytes(N_HEX.as_bytes(), 16).unwrap_or_default();
        let g = BigUint::from(G);
        let k = hash_to_int(&[&padded_bytes(&n)[..], &padded_bytes(&g)[..]]);
        Self { n, g, k }
    }
}

/// Challenge parameters of a `PASSWORD_VERIFIER` challenge.
#[derive(Debug, Clone)]
pub(crate) struct PasswordVerifier {
    pub user_id: String,
    pub salt: String,
    pub srp_b: BigUint,
    pub secret_block: String,
}

impl PasswordVerifier {
    pub fn from_parameters(params: &HashMap<String, String>) -> Result<Self> {
        let get = |name: &str| {
            params.get(name).cloned().ok_or_else(|| {
                Error::InvalidResponse(format!("PASSWORD_VERIFIER challenge lacks {}", name))
            })
        };
        let srp_b = get("SRP_B")?;
        Ok(Self {
            user_id: get("USER_ID_FOR_SRP")?,
            salt: get("SALT")?,
            srp_b: BigUint::parse_bytes(srp_b.as_bytes(), 16)
                .ok_or_else(|| Error::InvalidResponse(format!("SRP_B is not hex: {}", srp_b)))?,
            secret_block: get("SECRET_BLOCK")?,
        })
    }
}

/// Client side of one SRP exchange.
pub(crate) struct SrpClient {
    group: Group,
    pool_name: String,
    small_a: BigUint,
    large_a: BigUint,
}

impl SrpClient {
    /// Fresh ephemeral key pair for `user_pool` (`<region>_<name>`).
    pub fn new(user_pool: &str) -> Result<Self> {
        let mut buf = [0u8; 128];
        getrandom::getrandom(&mut buf)
            .map_err(|e| Error::Config(format!("OS random source failed: {}", e)))?;
        Self::with_secret(user_pool, BigUint::from_bytes_be(&buf))
    }

    pub fn with_secret(user_pool: &str, secret: BigUint) -> Result<Self> {
        let group = Group::cognito();
        let small_a = secret % &group.n;
        let large_a = group.g.modpow(&small_a, &group.n);
        if large_a == BigUint::default() {
            return Err(Error::Config("SRP public value is zero".to_string()));
        }
        Ok(Self {
            group,
            pool_name: pool_name(user_pool).to_string(),
            small_a,
            large_a,
        })
    }

    /// `SRP_A` auth parameter.
    pub fn public_hex(&self) -> String {
        self.large_a.to_str_radix(16)
    }

    /// `PASSWORD_CLAIM_SIGNATURE` for `challenge`, stamped with `timestamp`.
    pub fn password_claim(
        &self,
        challenge: &PasswordVerifier,
        password: &str,
        timestamp: &str,
    ) -> Result<String> {
        let Group { n, g, k } = &self.group;
        let b = &challenge.srp_b;
        if (b % n) == BigUint::default() {
            return Err(Error::AuthRejected("server SRP value B is zero".to_string()));
        }
        let u = scramble(&self.large_a, b);
        if u == BigUint::default() {
            return Err(Error::AuthRejected("SRP scrambler is zero".to_string()));
        }

        let x = private_key(&self.pool_name, &challenge.user_id, password, &challenge.salt)?;
        let kgx = (k * g.modpow(&x, n)) % n;
        let base = ((b % n) + n - kgx) % n;
        let s = base.modpow(&(&self.small_a + &u * &x), n);

        let key = derive_key(&s, &u)?;
        sign(
            &key,
            &self.pool_name,
            &challenge.user_id,
            &challenge.secret_block,
            timestamp,
        )
    }
}

/// Pool name without the region prefix.
pub(crate) fn pool_name(user_pool: &str) -> &str {
    user_pool.split_once('_').map_or(user_pool, |(_, name)| name)
}

/// `TIMESTAMP` challenge response, e.g. `Fri Mar 1 09:05:07 UTC 2024`.
pub(crate) fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%a %b %-d %H:%M:%S UTC %Y").to_string()
}

/// Hex with a leading zero byte when the value would read as negative.
pub(crate) fn pad_hex(hex: &str) -> String {
    if hex.len() % 2 == 1 {
        format!("0{}", hex)
    } else if hex.starts_with(|c: char| "89ABCDEFabcdef".contains(c)) {
        format!("00{}", hex)
    } else {
        hex.to_string()
    }
}

fn padded_bytes(value: &BigUint) -> Vec<u8> {
    let mut bytes = value.to_bytes_be();
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    bytes
}

fn hash_to_int(parts: &[&[u8]]) -> BigUint {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    BigUint::from_bytes_be(&hasher.finalize())
}

/// `u = H(pad(A) | pad(B))`
pub(crate) fn scramble(large_a: &BigUint, large_b: &BigUint) -> BigUint {
    hash_to_int(&[&padded_bytes(large_a)[..], &padded_bytes(large_b)[..]])
}

/// `x = H(pad(salt) | H(pool | user_id ":" password))`
pub(crate) fn private_key(
    pool_name: &str,
    user_id: &str,
    password: &str,
    salt_hex: &str,
) -> Result<BigUint> {
    let identity = Sha256::digest(format!("{}{}:{}", pool_name, user_id, password).as_bytes());
    let salt = hex::decode(pad_hex(salt_hex))
        .map_err(|e| Error::InvalidResponse(format!("SALT is not hex: {}", e)))?;
    Ok(hash_to_int(&[&salt[..], &identity[..]]))
}

/// 16-byte HKDF-SHA256 of the shared secret, salted with the scrambler.
pub(crate) fn derive_key(shared: &BigUint, scrambler: &BigUint) -> Result<[u8; 16]> {
    let hk = Hkdf::<Sha256>::new(Some(&padded_bytes(scrambler)[..]), &padded_bytes(shared));
    let mut key = [0u8; 16];
    hk.expand(DERIVED_KEY_INFO, &mut key)
        .map_err(|e| Error::Config(format!("HKDF expand: {}", e)))?;
    Ok(key)
}

/// Base64 HMAC over `pool | user_id | secret_block | timestamp`.
pub(crate) fn sign(
    key: &[u8],
    pool_name: &str,
    user_id: &str,
    secret_block: &str,
    timestamp: &str,
) -> Result<String> {
    let engine = base64::engine::general_purpose::STANDARD;
    let block = engine
        .decode(secret_block)
        .map_err(|e| Error::InvalidResponse(format!("SECRET_BLOCK is not base64: {}", e)))?;

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Config(format!("HMAC key: {}", e)))?;
    mac.update(pool_name.as_bytes());
    mac.update(user_id.as_bytes());
    mac.update(&block);
    mac.update(timestamp.as_bytes());
    Ok(engine.encode(mac.finalize().into_bytes()))
}
