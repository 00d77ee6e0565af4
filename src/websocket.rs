// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # WebSocket 帧编解码模块（RFC 6455）
//!
//! 帧格式：
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |     Masking-key (0 or 4 bytes, if MASK set)  |  Payload Data  |
//! +-----------------------------------------------+---------------+
//! ```
//!
//! 解析以缓冲区为输入：数据不足一帧时返回 `Ok(None)` 表示“等待更多字节”，而不是错误。

use bytes::{BufMut, Bytes, BytesMut};

use crate::exception::Exception;
use crate::request::Request;

/// CLOSE 状态码：消息过大
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    /// 心跳帧不输出逐帧日志
    pub fn is_heartbeat(self) -> bool {
        matches!(self, OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = Exception;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(Exception::InvalidFrame(format!("reserved opcode {:#x}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketFrame {
    pub fin: bool,
    /// RSV1-3，扩展（如 permessage-deflate）使用，原样转发
    pub rsv: u8,
    pub opcode: OpCode,
    pub masked: bool,
    /// 已解除掩码的负载
    pub payload: Bytes,
}

impl WebSocketFrame {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>, masked: bool) -> Self {
        Self {
            fin: true,
            rsv: 0,
            opcode,
            masked,
            payload: payload.into(),
        }
    }

    /// CLOSE 帧，负载为两字节状态码加 UTF-8 原因
    pub fn close(code: u16, reason: &str, masked: bool) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.put_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload.freeze(), masked)
    }

    /// CLOSE 帧携带的状态码，负载不足两字节时为 `None`
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    /// 尝试从缓冲区头部解析一帧，返回 (帧, 消耗的字节数)。
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>, Exception> {
        Self::parse_with_limit(buffer, usize::MAX)
    }

    /// 同 [`WebSocketFrame::parse`]，但声明长度超过 `max_payload` 的帧在读完长度字段后立即报错，
    /// 不等待负载到达。
    pub fn parse_with_limit(buffer: &[u8], max_payload: usize) -> Result<Option<(Self, usize)>, Exception> {
        if buffer.len() < 2 {
            return Ok(None);
        }
        let fin = buffer[0] & 0x80 != 0;
        let rsv = (buffer[0] >> 4) & 0x07;
        let opcode = OpCode::try_from(buffer[0] & 0x0F)?;
        let masked = buffer[1] & 0x80 != 0;

        let mut offset = 2usize;
        let payload_len: u64 = match buffer[1] & 0x7F {
            126 => {
                if buffer.len() < offset + 2 {
                    return Ok(None);
                }
                let len = u16::from_be_bytes([buffer[2], buffer[3]]) as u64;
                offset += 2;
                len
            }
            127 => {
                if buffer.len() < offset + 8 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buffer[2..10]);
                offset += 8;
                u64::from_be_bytes(raw)
            }
            len => len as u64,
        };
        if payload_len > max_payload as u64 {
            return Err(Exception::FrameTooLarge {
                length: payload_len,
                limit: max_payload,
            });
        }

        let mask = if masked {
            if buffer.len() < offset + 4 {
                return Ok(None);
            }
            let key = [
                buffer[offset],
                buffer[offset + 1],
                buffer[offset + 2],
                buffer[offset + 3],
            ];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let payload_len = usize::try_from(payload_len)
            .map_err(|_| Exception::InvalidFrame(format!("payload length {} overflows", payload_len)))?;
        let end = offset
            .checked_add(payload_len)
            .ok_or_else(|| Exception::InvalidFrame("payload length overflows".to_string()))?;
        if buffer.len() < end {
            return Ok(None);
        }

        let mut payload = BytesMut::from(&buffer[offset..end]);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some((
            Self {
                fin,
                rsv,
                opcode,
                masked,
                payload: payload.freeze(),
            },
            end,
        )))
    }

    /// 序列化为线上格式。带掩码的帧每次调用都会生成新的随机掩码。
    pub fn to_bytes(&self) -> Bytes {
        let len = self.payload.len();
        let mut out = BytesMut::with_capacity(len + 14);
        let first = (if self.fin { 0x80 } else { 0 }) | ((self.rsv & 0x07) << 4) | self.opcode.as_u8();
        out.put_u8(first);

        let mask_bit = if self.masked { 0x80 } else { 0 };
        if len <= 125 {
            out.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            out.put_u8(mask_bit | 126);
            out.put_u16(len as u16);
        } else {
            out.put_u8(mask_bit | 127);
            out.put_u64(len as u64);
        }

        if self.masked {
            let key: [u8; 4] = rand::random();
            out.put_slice(&key);
            let start = out.len();
            out.put_slice(&self.payload);
            apply_mask(&mut out[start..], key);
        } else {
            out.put_slice(&self.payload);
        }
        out.freeze()
    }
}

/// `payload[i] ^= mask[i % 4]`，掩码与解掩码是同一运算
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// 请求是否为 WebSocket 升级请求
pub fn is_upgrade_request(request: &Request) -> bool {
    let upgrade = request
        .header("upgrade")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"));
    let connection = request
        .header("connection")
        .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"));
    upgrade
        && connection
        && request.header("sec-websocket-key").is_some()
        && request.header("sec-websocket-version").is_some()
}
