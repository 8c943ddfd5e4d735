//! Assembles the space-separated script notation used by the integration
//! tests into raw bytecode.
//!
//! Tokens are decimal numbers (pushed as script numbers), `0x`-prefixed raw
//! hex (inserted verbatim), quoted strings (pushed as data) and opcode names
//! with or without the `OP_` prefix.

use bitcoin::{
    blockdata::script::{Builder, PushBytesBuf},
    hex::FromHex,
    opcodes::{all, Opcode},
};
use core::fmt;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug)]
pub enum ParseScriptError {
    BadDecimal(String),
    BadHex(String),
    PushTooLong(String),
    BadOpcode(String),
}

impl fmt::Display for ParseScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseScriptError::BadDecimal(tok) => write!(f, "bad decimal literal `{tok}`"),
            ParseScriptError::BadHex(tok) => write!(f, "bad hex literal `{tok}`"),
            ParseScriptError::PushTooLong(tok) => write!(f, "push data too long in `{tok}`"),
            ParseScriptError::BadOpcode(tok) => write!(f, "unknown opcode `{tok}`"),
        }
    }
}

type OpcodeMap = HashMap<String, Opcode>;
static OPCODE_MAP: OnceLock<OpcodeMap> = OnceLock::new();

fn opcode_map() -> &'static OpcodeMap {
    OPCODE_MAP.get_or_init(build_opcode_map)
}

fn build_opcode_map() -> OpcodeMap {
    let mut map = HashMap::new();
    for byte in 0u8..=255 {
        let opcode = Opcode::from(byte);
        // Direct pushes are written as quoted strings or hex.
        if (0x01..=0x4b).contains(&byte) {
            continue;
        }
        let name = opcode.to_string();
        if name == "OP_UNKNOWN" {
            continue;
        }
        if let Some(bare) = name.strip_prefix("OP_") {
            map.insert(bare.to_string(), opcode);
        }
        map.insert(name, opcode);
    }
    for (alias, opcode) in [
        ("CHECKLOCKTIMEVERIFY", all::OP_CLTV),
        ("CHECKSEQUENCEVERIFY", all::OP_CSV),
        ("0", all::OP_PUSHBYTES_0),
        ("FALSE", all::OP_PUSHBYTES_0),
        ("TRUE", all::OP_PUSHNUM_1),
    ] {
        map.insert(format!("OP_{alias}"), opcode);
        map.insert(alias.to_string(), opcode);
    }
    map
}

pub fn parse_opcode(token: &str) -> Result<Opcode, ParseScriptError> {
    opcode_map()
        .get(token)
        .copied()
        .ok_or_else(|| ParseScriptError::BadOpcode(token.to_string()))
}

fn is_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

enum Token<'a> {
    Decimal(i64),
    Hex(Vec<u8>),
    Quoted(&'a str),
    Opcode(Opcode),
}

fn classify(token: &str) -> Result<Token<'_>, ParseScriptError> {
    if is_decimal(token) {
        let value = token
            .parse()
            .map_err(|_| ParseScriptError::BadDecimal(token.to_string()))?;
        Ok(Token::Decimal(value))
    } else if let Some(hex) = token.strip_prefix("0x") {
        let bytes =
            Vec::from_hex(hex).map_err(|_| ParseScriptError::BadHex(token.to_string()))?;
        Ok(Token::Hex(bytes))
    } else if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        Ok(Token::Quoted(&token[1..token.len() - 1]))
    } else {
        Ok(Token::Opcode(parse_opcode(token)?))
    }
}

pub fn parse_script(s: &str) -> Result<Vec<u8>, ParseScriptError> {
    let mut out = Vec::new();
    for part in s.split_whitespace() {
        match classify(part)? {
            Token::Decimal(value) => {
                out.extend_from_slice(Builder::new().push_int(value).into_script().as_bytes());
            }
            Token::Hex(bytes) => out.extend_from_slice(&bytes),
            Token::Quoted(body) => {
                let push = PushBytesBuf::try_from(body.as_bytes().to_vec())
                    .map_err(|_| ParseScriptError::PushTooLong(part.to_string()))?;
                out.extend_from_slice(Builder::new().push_slice(push).into_script().as_bytes());
            }
            Token::Opcode(op) => out.push(op.to_u8()),
        }
    }
    Ok(out)
}

/// Like [`parse_script`], panicking on malformed input.
pub fn asm(s: &str) -> Vec<u8> {
    parse_script(s).unwrap_or_else(|err| panic!("bad test script `{s}`: {err}"))
}
