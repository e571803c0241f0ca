//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存项模型以及 `flags ‖ value` 的线上负载编码。
//!
//! 负载格式：4 字节小端 flags 头部，紧跟原始值字节。

use crate::error::{CacheError, Result};
use std::fmt;
use std::time::Duration;

/// flags 头部长度（字节）
pub const FLAGS_HEADER_LEN: usize = 4;

/// 权威存储的默认最大记录大小（1 MiB - 4 字节）
pub const DEFAULT_MAX_RECORD_SIZE: usize = (1 << 20) - FLAGS_HEADER_LEN;

/// 单项负载的最大大小：记录上限加上 flags 头部
pub const fn max_payload_size(max_record_size: usize) -> usize {
    max_record_size + FLAGS_HEADER_LEN
}

/// 乐观并发令牌
///
/// 读取时捕获的原始存储负载，CAS 写入时与服务端当前值逐字节比较。
#[derive(Clone, PartialEq, Eq)]
pub struct CasToken(Vec<u8>);

impl CasToken {
    pub fn new(raw: Vec<u8>) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CasToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CasToken({} bytes)", self.0.len())
    }
}

/// 缓存项
///
/// 缓存的线上基本单位。`expiration` 为零表示永不过期。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Item {
    /// 缓存键
    pub key: String,
    /// 不透明的值字节
    pub value: Vec<u8>,
    /// 调用方定义的 32 位标记
    pub flags: u32,
    /// 过期时间，零表示永不过期
    pub expiration: Duration,
    cas: Option<CasToken>,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_cas(mut self, token: CasToken) -> Self {
        self.cas = Some(token);
        self
    }

    /// 读取时捕获的 CAS 令牌
    pub fn cas(&self) -> Option<&CasToken> {
        self.cas.as_ref()
    }

    pub fn set_cas(&mut self, token: Option<CasToken>) {
        self.cas = token;
    }

    /// 编码后的负载长度
    pub fn payload_len(&self) -> usize {
        FLAGS_HEADER_LEN + self.value.len()
    }

    /// 将 `flags ‖ value` 编码到 `buf`（会先清空 `buf`）
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        encode_payload(self.flags, &self.value, buf);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload_len());
        self.encode_into(&mut buf);
        buf
    }

    /// 从存储的原始负载解码缓存项
    ///
    /// 返回的项携带原始负载的副本作为 CAS 令牌。
    pub fn decode(key: impl Into<String>, raw: Vec<u8>) -> Result<Self> {
        let (flags, value) = decode_payload(&raw)?;
        Ok(Self {
            key: key.into(),
            value: value.to_vec(),
            flags,
            expiration: Duration::ZERO,
            cas: Some(CasToken::new(raw)),
        })
    }
}

/// 编码 `flags ‖ value`
pub fn encode_payload(flags: u32, value: &[u8], buf: &mut Vec<u8>) {
    buf.clear();
    buf.reserve(FLAGS_HEADER_LEN + value.len());
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(value);
}

/// 解码负载为 `(flags, value)`
///
/// 短于 flags 头部的负载视为损坏（来自不兼容的写入格式）。
pub fn decode_payload(raw: &[u8]) -> Result<(u32, &[u8])> {
    if raw.len() < FLAGS_HEADER_LEN {
        return Err(CacheError::MalformedPayload { len: raw.len() });
    }
    let (header, value) = raw.split_at(FLAGS_HEADER_LEN);
    let flags = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    Ok((flags, value))
}

/// 将过期时间换算为毫秒
///
/// 零返回 `None`（永不过期）；不足 1 毫秒的非零值向上取整为 1 毫秒。
pub fn expiration_millis(expiration: Duration) -> Option<u64> {
    if expiration.is_zero() {
        return None;
    }
    let millis = u64::try_from(expiration.as_millis()).unwrap_or(u64::MAX);
    Some(millis.max(1))
}
