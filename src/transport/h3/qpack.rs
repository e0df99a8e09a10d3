//! QPACK (RFC 9204), static-table only.
//!
//! The client advertises `QPACK_MAX_TABLE_CAPACITY = 0`, so neither side
//! ever references a dynamic table: every field section has a zero
//! Required Insert Count and only static or literal field lines. The
//! Huffman code is shared with HPACK.

use bytes::BytesMut;

use crate::transport::h2::hpack::{huffman_decode, huffman_encode, huffman_encoded_len};

/// QPACK static table (RFC 9204 Appendix A), 0-indexed.
const STATIC_TABLE: [(&str, &str); 99] = [
    (":authority", ""),
    (":path", "/"),
    ("age", "0"),
    ("content-disposition", ""),
    ("content-length", "0"),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("referer", ""),
    ("set-cookie", ""),
    (":method", "CONNECT"),
    (":method", "DELETE"),
    (":method", "GET"),
    (":method", "HEAD"),
    (":method", "OPTIONS"),
    (":method", "POST"),
    (":method", "PUT"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "103"),
    (":status", "200"),
    (":status", "304"),
    (":status", "404"),
    (":status", "503"),
    ("accept", "*/*"),
    ("accept", "application/dns-message"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-ranges", "bytes"),
    ("access-control-allow-headers", "cache-control"),
    ("access-control-allow-headers", "content-type"),
    ("access-control-allow-origin", "*"),
    ("cache-control", "max-age=0"),
    ("cache-control", "max-age=2592000"),
    ("cache-control", "max-age=604800"),
    ("cache-control", "no-cache"),
    ("cache-control", "no-store"),
    ("cache-control", "public, max-age=31536000"),
    ("content-encoding", "br"),
    ("content-encoding", "gzip"),
    ("content-type", "application/dns-message"),
    ("content-type", "application/javascript"),
    ("content-type", "application/json"),
    ("content-type", "application/x-www-form-urlencoded"),
    ("content-type", "image/gif"),
    ("content-type", "image/jpeg"),
    ("content-type", "image/png"),
    ("content-type", "text/css"),
    ("content-type", "text/html; charset=utf-8"),
    ("content-type", "text/plain"),
    ("content-type", "text/plain;charset=utf-8"),
    ("range", "bytes=0-"),
    ("strict-transport-security", "max-age=31536000"),
    ("strict-transport-security", "max-age=31536000; includesubdomains"),
    ("strict-transport-security", "max-age=31536000; includesubdomains; preload"),
    ("vary", "accept-encoding"),
    ("vary", "origin"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    (":status", "100"),
    (":status", "204"),
    (":status", "206"),
    (":status", "302"),
    (":status", "400"),
    (":status", "403"),
    (":status", "421"),
    (":status", "425"),
    (":status", "500"),
    ("accept-language", ""),
    ("access-control-allow-credentials", "FALSE"),
    ("access-control-allow-credentials", "TRUE"),
    ("access-control-allow-headers", "*"),
    ("access-control-allow-methods", "get"),
    ("access-control-allow-methods", "get, post, options"),
    ("access-control-allow-methods", "options"),
    ("access-control-expose-headers", "content-length"),
    ("access-control-request-headers", "content-type"),
    ("access-control-request-method", "get"),
    ("access-control-request-method", "post"),
    ("alt-svc", "clear"),
    ("authorization", ""),
    (
        "content-security-policy",
        "script-src 'none'; object-src 'none'; base-uri 'none'",
    ),
    ("early-data", "1"),
    ("expect-ct", ""),
    ("forwarded", ""),
    ("if-range", ""),
    ("origin", ""),
    ("purpose", "prefetch"),
    ("server", ""),
    ("timing-allow-origin", "*"),
    ("upgrade-insecure-requests", "1"),
    ("user-agent", ""),
    ("x-forwarded-for", ""),
    ("x-frame-options", "deny"),
    ("x-frame-options", "sameorigin"),
];

fn encode_prefixed_int(out: &mut Vec<u8>, value: usize, prefix_bits: u8, pattern: u8) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.push(pattern | value as u8);
        return;
    }
    out.push(pattern | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 128 {
        out.push((rest % 128 + 128) as u8);
        rest /= 128;
    }
    out.push(rest as u8);
}

fn decode_prefixed_int(data: &[u8], pos: &mut usize, prefix_bits: u8) -> Result<usize, String> {
    let first = *data.get(*pos).ok_or("truncated integer")?;
    *pos += 1;
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = (first as usize) & max_prefix;
    if value < max_prefix {
        return Ok(value);
    }
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos).ok_or("truncated integer")?;
        *pos += 1;
        value += ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        if shift > 28 {
            return Err("integer overflow".into());
        }
    }
}

fn encode_string(out: &mut Vec<u8>, value: &[u8], prefix_bits: u8, pattern: u8, huffman_bit: u8) {
    let hlen = huffman_encoded_len(value);
    if hlen < value.len() {
        encode_prefixed_int(out, hlen, prefix_bits, pattern | huffman_bit);
        let mut tmp = BytesMut::with_capacity(hlen);
        huffman_encode(value, &mut tmp);
        out.extend_from_slice(&tmp);
    } else {
        encode_prefixed_int(out, value.len(), prefix_bits, pattern);
        out.extend_from_slice(value);
    }
}

fn decode_string(
    data: &[u8],
    pos: &mut usize,
    prefix_bits: u8,
    huffman_bit: u8,
) -> Result<Vec<u8>, String> {
    let huffman = data
        .get(*pos)
        .map(|b| b & huffman_bit != 0)
        .ok_or("truncated string")?;
    let len = decode_prefixed_int(data, pos, prefix_bits)?;
    let end = pos.checked_add(len).ok_or("string length overflow")?;
    let raw = data.get(*pos..end).ok_or("truncated string literal")?;
    *pos = end;
    if huffman {
        huffman_decode(raw)
    } else {
        Ok(raw.to_vec())
    }
}

/// Encode a field section with a zero Required Insert Count.
pub fn encode_field_section(fields: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    // Required Insert Count = 0, Base = 0.
    out.push(0);
    out.push(0);
    for (name, value) in fields {
        encode_field(&mut out, name, value);
    }
    out
}

fn encode_field(out: &mut Vec<u8>, name: &str, value: &str) {
    if let Some(idx) = STATIC_TABLE
        .iter()
        .position(|(n, v)| *n == name && *v == value)
    {
        // Indexed field line, static table.
        encode_prefixed_int(out, idx, 6, 0xc0);
        return;
    }
    if let Some(idx) = STATIC_TABLE.iter().position(|(n, _)| *n == name) {
        // Literal field line with static name reference.
        encode_prefixed_int(out, idx, 4, 0x50);
        encode_string(out, value.as_bytes(), 7, 0x00, 0x80);
        return;
    }
    // Literal field line with literal name.
    encode_string(out, name.as_bytes(), 3, 0x20, 0x08);
    encode_string(out, value.as_bytes(), 7, 0x00, 0x80);
}

/// Decode a field section. Dynamic-table references are an error: the
/// client advertised a zero table capacity.
pub fn decode_field_section(data: &[u8]) -> Result<Vec<(String, String)>, String> {
    let mut pos = 0usize;
    let required_insert_count = decode_prefixed_int(data, &mut pos, 8)?;
    if required_insert_count != 0 {
        return Err("dynamic table reference with zero capacity".into());
    }
    let _base = decode_prefixed_int(data, &mut pos, 7)?;

    let mut fields = Vec::new();
    while pos < data.len() {
        let byte = data[pos];
        if byte & 0x80 != 0 {
            // Indexed field line.
            if byte & 0x40 == 0 {
                return Err("dynamic indexed field with zero capacity".into());
            }
            let idx = decode_prefixed_int(data, &mut pos, 6)?;
            let (n, v) = STATIC_TABLE
                .get(idx)
                .ok_or_else(|| format!("static index {idx} out of range"))?;
            fields.push((n.to_string(), v.to_string()));
        } else if byte & 0x40 != 0 {
            // Literal field line with name reference.
            if byte & 0x10 == 0 {
                return Err("dynamic name reference with zero capacity".into());
            }
            let idx = decode_prefixed_int(data, &mut pos, 4)?;
            let name = STATIC_TABLE
                .get(idx)
                .map(|(n, _)| n.to_string())
                .ok_or_else(|| format!("static index {idx} out of range"))?;
            let value = String::from_utf8(decode_string(data, &mut pos, 7, 0x80)?)
                .map_err(|_| "field value not UTF-8")?;
            fields.push((name, value));
        } else if byte & 0x20 != 0 {
            // Literal field line with literal name.
            let name = String::from_utf8(decode_string(data, &mut pos, 3, 0x08)?)
                .map_err(|_| "field name not UTF-8")?;
            let value = String::from_utf8(decode_string(data, &mut pos, 7, 0x80)?)
                .map_err(|_| "field value not UTF-8")?;
            fields.push((name, value));
        } else {
            // Post-base forms require a dynamic table.
            return Err("post-base field line with zero capacity".into());
        }
    }
    Ok(fields)
}
