//! Minimal RESP2 codec, enough to issue `COMMAND` and `MODULE LIST`.

#![forbid(unsafe_code)]

use std::io::{self, BufRead, Read};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

#[derive(Debug, Error)]
pub enum RespError {
    #[error("connection closed mid-reply")]
    UnexpectedEof,
    #[error("unknown reply type byte 0x{0:02x}")]
    InvalidPrefix(u8),
    #[error("reply line is not terminated by CRLF")]
    MissingTerminator,
    #[error("invalid integer `{0}` in reply")]
    InvalidInteger(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RespValue {
    /// Text of a simple or bulk string reply.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Simple(text) => Some(text.clone()),
            Self::Bulk(Some(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// Integer replies, plus strings that hold an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            other => other.as_text().and_then(|text| text.parse().ok()),
        }
    }

    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            Self::Array(Some(items)) => Some(items),
            _ => None,
        }
    }
}

/// Encodes a command as an array of bulk strings.
pub fn encode_command<S: AsRef<[u8]>>(args: &[S]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        let arg = arg.as_ref();
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Reads one complete reply.
pub fn read_value<R: BufRead>(reader: &mut R) -> Result<RespValue, RespError> {
    let line = read_line(reader)?;
    let (&prefix, rest) = line.split_first().ok_or(RespError::MissingTerminator)?;
    let rest = String::from_utf8_lossy(rest).into_owned();

    match prefix {
        b'+' => Ok(RespValue::Simple(rest)),
        b'-' => Ok(RespValue::Error(rest)),
        b':' => parse_integer(&rest).map(RespValue::Integer),
        b'$' => {
            let len = parse_integer(&rest)?;
            if len < 0 {
                return Ok(RespValue::Bulk(None));
            }
            let mut payload = vec![0u8; len as usize + 2];
            reader.read_exact(&mut payload).map_err(eof_aware)?;
            if !payload.ends_with(b"\r\n") {
                return Err(RespError::MissingTerminator);
            }
            payload.truncate(len as usize);
            Ok(RespValue::Bulk(Some(payload)))
        }
        b'*' => {
            let len = parse_integer(&rest)?;
            if len < 0 {
                return Ok(RespValue::Array(None));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_value(reader)?);
            }
            Ok(RespValue::Array(Some(items)))
        }
        other => Err(RespError::InvalidPrefix(other)),
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, RespError> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Err(RespError::UnexpectedEof);
    }
    if !line.ends_with(b"\r\n") {
        return Err(RespError::MissingTerminator);
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_integer(text: &str) -> Result<i64, RespError> {
    text.parse()
        .map_err(|_| RespError::InvalidInteger(text.to_string()))
}

fn eof_aware(err: io::Error) -> RespError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        RespError::UnexpectedEof
    } else {
        RespError::Io(err)
    }
}
