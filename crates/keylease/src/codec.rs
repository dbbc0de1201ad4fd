// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token serialization for transit through the credential record.
//!
//! Layout (big-endian): `u8` version, `u16` name length + UTF-8 name,
//! `u32` secret length + secret bytes, `u64` issued-at ms, `u64` expires-at ms.
//! The whole payload is base64 (standard alphabet, padded).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};

use crate::error::CredentialError;
use crate::token::{epoch_ms, from_epoch_ms, AccessToken, SecretMaterial};

/// Value written on the submission side before issuance has happened.
pub const PLACEHOLDER: &str = "placeholder";

const VERSION: u8 = 1;

pub fn encode(token: &AccessToken) -> String {
    let name = token.name().as_bytes();
    let secret = token.secret().expose();
    let mut buf = BytesMut::with_capacity(1 + 2 + name.len() + 4 + secret.len() + 16);
    buf.put_u8(VERSION);
    buf.put_u16(name.len() as u16);
    buf.put_slice(name);
    buf.put_u32(secret.len() as u32);
    buf.put_slice(secret);
    buf.put_u64(epoch_ms(token.issued_at()));
    buf.put_u64(epoch_ms(token.expires_at()));
    let encoded = STANDARD.encode(&buf);
    zeroize::Zeroize::zeroize(&mut buf[..]);
    encoded
}

/// Decode a record value. The sentinel means "no token present" and yields `None`.
pub fn decode(value: &str) -> Result<Option<AccessToken>, CredentialError> {
    if value == PLACEHOLDER {
        return Ok(None);
    }
    let raw = zeroize::Zeroizing::new(
        STANDARD
            .decode(value.trim())
            .map_err(|e| CredentialError::MalformedToken(format!("invalid base64: {e}")))?,
    );
    let mut buf: &[u8] = &raw;

    let version = read_u8(&mut buf)?;
    if version != VERSION {
        return Err(CredentialError::MalformedToken(format!("unsupported version {version}")));
    }

    let name_len = read_u16(&mut buf)? as usize;
    let name = take(&mut buf, name_len, "name")?;
    let name = std::str::from_utf8(name)
        .map_err(|_| CredentialError::MalformedToken("token name is not UTF-8".into()))?
        .to_owned();

    let secret_len = read_u32(&mut buf)? as usize;
    let secret = SecretMaterial::new(take(&mut buf, secret_len, "secret")?);

    let issued_at = from_epoch_ms(read_u64(&mut buf)?);
    let expires_at = from_epoch_ms(read_u64(&mut buf)?);

    if buf.has_remaining() {
        return Err(CredentialError::MalformedToken(format!(
            "{} trailing bytes after token",
            buf.remaining()
        )));
    }

    AccessToken::new(name, secret, issued_at, expires_at).map(Some)
}

/// Decode an optional record value; absent and sentinel both mean no token.
pub fn decode_record_value(value: Option<&str>) -> Result<Option<AccessToken>, CredentialError> {
    match value {
        Some(v) => decode(v),
        None => Ok(None),
    }
}

fn ensure(buf: &[u8], n: usize, field: &str) -> Result<(), CredentialError> {
    if buf.len() < n {
        return Err(CredentialError::MalformedToken(format!("truncated payload reading {field}")));
    }
    Ok(())
}

fn take<'a>(buf: &mut &'a [u8], n: usize, field: &str) -> Result<&'a [u8], CredentialError> {
    let slice: &'a [u8] = *buf;
    ensure(slice, n, field)?;
    let (head, tail) = slice.split_at(n);
    *buf = tail;
    Ok(head)
}

fn read_u8(buf: &mut &[u8]) -> Result<u8, CredentialError> {
    ensure(buf, 1, "version")?;
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut &[u8]) -> Result<u16, CredentialError> {
    ensure(buf, 2, "name length")?;
    Ok(buf.get_u16())
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, CredentialError> {
    ensure(buf, 4, "secret length")?;
    Ok(buf.get_u32())
}

fn read_u64(buf: &mut &[u8]) -> Result<u64, CredentialError> {
    ensure(buf, 8, "timestamp")?;
    Ok(buf.get_u64())
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
