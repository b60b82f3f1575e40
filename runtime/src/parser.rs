//! WASM binary inspection.
//!
//! Only what the platform needs before handing bytes to an engine: the
//! header check and custom-section lookup (apps can embed their manifest).
//!
//! Reference: <https://webassembly.github.io/spec/core/binary/modules.html>

use alloc::string::String;

use crate::RuntimeError;

/// WASM magic number: `\0asm`
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// Custom section carrying an embedded app manifest.
pub const MANIFEST_SECTION: &str = ".akira.manifest";

const SECTION_CUSTOM: u8 = 0;

/// Malformed module, with the byte offset where the scan stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: &'static str,
    pub offset: usize,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "parse error at offset {:#x}: {}", self.offset, self.message)
    }
}

/// Forward-only cursor over a module or section body.
struct Cursor<'a> {
    rest: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], offset: usize) -> Self {
        Cursor { rest: data, offset }
    }

    fn fail<T>(&self, message: &'static str) -> Result<T, ParseError> {
        Err(ParseError {
            message,
            offset: self.offset,
        })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if n > self.rest.len() {
            return self.fail("unexpected end of data");
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        self.offset += n;
        Ok(head)
    }

    /// Unsigned LEB128, at most five bytes.
    fn leb128_u32(&mut self) -> Result<u32, ParseError> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.take(1)?[0];
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        self.fail("LEB128 u32 overflow")
    }
}

/// Check the module header.
///
/// Runs at install commit and again right before every load.
pub fn validate_header(binary: &[u8]) -> Result<(), RuntimeError> {
    if binary.len() < WASM_MAGIC.len() {
        return Err(RuntimeError::InvalidBinary(alloc::format!(
            "{} bytes is too short for a module",
            binary.len()
        )));
    }
    if binary[..4] != WASM_MAGIC {
        return Err(RuntimeError::InvalidBinary(String::from("bad magic")));
    }
    Ok(())
}

/// Payload of the first custom section called `name`.
///
/// `Ok(None)` when the module has no such section.
pub fn find_custom_section<'a>(binary: &'a [u8], name: &str) -> Result<Option<&'a [u8]>, ParseError> {
    let mut module = Cursor::new(binary, 0);
    if module.take(4)? != WASM_MAGIC {
        return Err(ParseError {
            message: "bad magic",
            offset: 0,
        });
    }
    module.take(4)?; // version

    while !module.rest.is_empty() {
        let id = module.take(1)?[0];
        let size = module.leb128_u32()? as usize;
        let at = module.offset;
        let body = module.take(size)?;
        if id != SECTION_CUSTOM {
            continue;
        }

        let mut section = Cursor::new(body, at);
        let len = section.leb128_u32()? as usize;
        if section.take(len)? == name.as_bytes() {
            return Ok(Some(section.rest));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn module_with_custom(name: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::from(WASM_MAGIC);
        out.extend_from_slice(&1u32.to_le_bytes());
        // empty type section first
        out.extend_from_slice(&[1, 1, 0]);
        let mut body = Vec::new();
        body.push(name.len() as u8);
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(payload);
        out.push(SECTION_CUSTOM);
        out.push(body.len() as u8);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_validate_header() {
        assert!(validate_header(b"\0asm\x01\0\0\0").is_ok());
        assert!(validate_header(b"\0asm").is_ok());
        assert!(matches!(validate_header(b"\0as"), Err(RuntimeError::InvalidBinary(_))));
        assert!(matches!(validate_header(b"ELF\x7f...."), Err(RuntimeError::InvalidBinary(_))));
    }

    #[test]
    fn test_leb128() {
        let mut c = Cursor::new(&[0xE5, 0x8E, 0x26], 0);
        assert_eq!(c.leb128_u32().unwrap(), 624_485);
        assert!(c.rest.is_empty());
        let mut c = Cursor::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01], 0);
        assert!(c.leb128_u32().is_err());
    }

    #[test]
    fn test_find_custom_section() {
        let bin = module_with_custom(MANIFEST_SECTION, br#"{"name":"demo"}"#);
        let payload = find_custom_section(&bin, MANIFEST_SECTION).unwrap();
        assert_eq!(payload, Some(&br#"{"name":"demo"}"#[..]));
        assert_eq!(find_custom_section(&bin, "name").unwrap(), None);
    }

    #[test]
    fn test_section_past_end_rejected() {
        let mut bin = module_with_custom(MANIFEST_SECTION, b"{}");
        bin.truncate(bin.len() - 1);
        let err = find_custom_section(&bin, MANIFEST_SECTION).unwrap_err();
        assert_eq!(err.message, "unexpected end of data");
    }

    #[test]
    fn test_section_name_past_body_reports_offset() {
        let mut bin = Vec::from(WASM_MAGIC);
        bin.extend_from_slice(&1u32.to_le_bytes());
        // custom section of 2 bytes whose name claims 5
        bin.extend_from_slice(&[SECTION_CUSTOM, 2, 5, b'x']);
        let err = find_custom_section(&bin, MANIFEST_SECTION).unwrap_err();
        assert_eq!(err.offset, 11);
    }
}
