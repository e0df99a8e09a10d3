//! HPACK (RFC 7541) with configurable pseudo-header and header ordering.
//!
//! The encoder emits pseudo-headers in the order given by the H2 spec and
//! sorts regular headers by an optional header-order list, which is what
//! the HEADERS half of the Akamai fingerprint observes. The codec itself
//! is a complete static+dynamic-table implementation with Huffman coding.

use std::collections::VecDeque;
use std::sync::OnceLock;

use bytes::{BufMut, Bytes, BytesMut};

use crate::fingerprint::h2spec::PseudoHeader;

/// Huffman code table from RFC 7541 Appendix B, `(code, bit length)`
/// per byte value. EOS is only ever used as padding.
const HUFFMAN: [(u32, u8); 256] = [
    (0x1ff8, 13), (0x7fffd8, 23), (0xfffffe2, 28), (0xfffffe3, 28),
    (0xfffffe4, 28), (0xfffffe5, 28), (0xfffffe6, 28), (0xfffffe7, 28),
    (0xfffffe8, 28), (0xffffea, 24), (0x3ffffffc, 30), (0xfffffe9, 28),
    (0xfffffea, 28), (0x3ffffffd, 30), (0xfffffeb, 28), (0xfffffec, 28),
    (0xfffffed, 28), (0xfffffee, 28), (0xfffffef, 28), (0xffffff0, 28),
    (0xffffff1, 28), (0xffffff2, 28), (0x3ffffffe, 30), (0xffffff3, 28),
    (0xffffff4, 28), (0xffffff5, 28), (0xffffff6, 28), (0xffffff7, 28),
    (0xffffff8, 28), (0xffffff9, 28), (0xffffffa, 28), (0xffffffb, 28),
    (0x14, 6), (0x3f8, 10), (0x3f9, 10), (0xffa, 12),
    (0x1ff9, 13), (0x15, 6), (0xf8, 8), (0x7fa, 11),
    (0x3fa, 10), (0x3fb, 10), (0xf9, 8), (0x7fb, 11),
    (0xfa, 8), (0x16, 6), (0x17, 6), (0x18, 6),
    (0x0, 5), (0x1, 5), (0x2, 5), (0x19, 6),
    (0x1a, 6), (0x1b, 6), (0x1c, 6), (0x1d, 6),
    (0x1e, 6), (0x1f, 6), (0x5c, 7), (0xfb, 8),
    (0x7ffc, 15), (0x20, 6), (0xffb, 12), (0x3fc, 10),
    (0x1ffa, 13), (0x21, 6), (0x5d, 7), (0x5e, 7),
    (0x5f, 7), (0x60, 7), (0x61, 7), (0x62, 7),
    (0x63, 7), (0x64, 7), (0x65, 7), (0x66, 7),
    (0x67, 7), (0x68, 7), (0x69, 7), (0x6a, 7),
    (0x6b, 7), (0x6c, 7), (0x6d, 7), (0x6e, 7),
    (0x6f, 7), (0x70, 7), (0x71, 7), (0x72, 7),
    (0xfc, 8), (0x73, 7), (0xfd, 8), (0x1ffb, 13),
    (0x7fff0, 19), (0x1ffc, 13), (0x3ffc, 14), (0x22, 6),
    (0x7ffd, 15), (0x3, 5), (0x23, 6), (0x4, 5),
    (0x24, 6), (0x5, 5), (0x25, 6), (0x26, 6),
    (0x27, 6), (0x6, 5), (0x74, 7), (0x75, 7),
    (0x28, 6), (0x29, 6), (0x2a, 6), (0x7, 5),
    (0x2b, 6), (0x76, 7), (0x2c, 6), (0x8, 5),
    (0x9, 5), (0x2d, 6), (0x77, 7), (0x78, 7),
    (0x79, 7), (0x7a, 7), (0x7b, 7), (0x7ffe, 15),
    (0x7fc, 11), (0x3ffd, 14), (0x1ffd, 13), (0xffffffc, 28),
    (0xfffe6, 20), (0x3fffd2, 22), (0xfffe7, 20), (0xfffe8, 20),
    (0x3fffd3, 22), (0x3fffd4, 22), (0x3fffd5, 22), (0x7fffd9, 23),
    (0x3fffd6, 22), (0x7fffda, 23), (0x7fffdb, 23), (0x7fffdc, 23),
    (0x7fffdd, 23), (0x7fffde, 23), (0xffffeb, 24), (0x7fffdf, 23),
    (0xffffec, 24), (0xffffed, 24), (0x3fffd7, 22), (0x7fffe0, 23),
    (0xffffee, 24), (0x7fffe1, 23), (0x7fffe2, 23), (0x7fffe3, 23),
    (0x7fffe4, 23), (0x1fffdc, 21), (0x3fffd8, 22), (0x7fffe5, 23),
    (0x3fffd9, 22), (0x7fffe6, 23), (0x7fffe7, 23), (0xffffef, 24),
    (0x3fffda, 22), (0x1fffdd, 21), (0xfffe9, 20), (0x3fffdb, 22),
    (0x3fffdc, 22), (0x7fffe8, 23), (0x7fffe9, 23), (0x1fffde, 21),
    (0x7fffea, 23), (0x3fffdd, 22), (0x3fffde, 22), (0xfffff0, 24),
    (0x1fffdf, 21), (0x3fffdf, 22), (0x7fffeb, 23), (0x7fffec, 23),
    (0x1fffe0, 21), (0x1fffe1, 21), (0x3fffe0, 22), (0x1fffe2, 21),
    (0x7fffed, 23), (0x3fffe1, 22), (0x7fffee, 23), (0x7fffef, 23),
    (0xfffea, 20), (0x3fffe2, 22), (0x3fffe3, 22), (0x3fffe4, 22),
    (0x7ffff0, 23), (0x3fffe5, 22), (0x3fffe6, 22), (0x7ffff1, 23),
    (0x3ffffe0, 26), (0x3ffffe1, 26), (0xfffeb, 20), (0x7fff1, 19),
    (0x3fffe7, 22), (0x7ffff2, 23), (0x3fffe8, 22), (0x1ffffec, 25),
    (0x3ffffe2, 26), (0x3ffffe3, 26), (0x3ffffe4, 26), (0x7ffffde, 27),
    (0x7ffffdf, 27), (0x3ffffe5, 26), (0xfffff1, 24), (0x1ffffed, 25),
    (0x7fff2, 19), (0x1fffe3, 21), (0x3ffffe6, 26), (0x7ffffe0, 27),
    (0x7ffffe1, 27), (0x3ffffe7, 26), (0x7ffffe2, 27), (0xfffff2, 24),
    (0x1fffe4, 21), (0x1fffe5, 21), (0x3ffffe8, 26), (0x3ffffe9, 26),
    (0xffffffd, 28), (0x7ffffe3, 27), (0x7ffffe4, 27), (0x7ffffe5, 27),
    (0xfffec, 20), (0xfffff3, 24), (0xfffed, 20), (0x1fffe6, 21),
    (0x3fffe9, 22), (0x1fffe7, 21), (0x1fffe8, 21), (0x7ffff3, 23),
    (0x3fffea, 22), (0x3fffeb, 22), (0x1ffffee, 25), (0x1ffffef, 25),
    (0xfffff4, 24), (0xfffff5, 24), (0x3ffffea, 26), (0x7ffff4, 23),
    (0x3ffffeb, 26), (0x7ffffe6, 27), (0x3ffffec, 26), (0x3ffffed, 26),
    (0x7ffffe7, 27), (0x7ffffe8, 27), (0x7ffffe9, 27), (0x7ffffea, 27),
    (0x7ffffeb, 27), (0xffffffe, 28), (0x7ffffec, 27), (0x7ffffed, 27),
    (0x7ffffee, 27), (0x7ffffef, 27), (0x7fffff0, 27), (0x3ffffee, 26),
];

/// Static header table (RFC 7541 Appendix A), 1-indexed.
const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

// ---- Huffman ----

pub(crate) fn huffman_encoded_len(input: &[u8]) -> usize {
    let bits: usize = input.iter().map(|&b| HUFFMAN[b as usize].1 as usize).sum();
    (bits + 7) / 8
}

pub(crate) fn huffman_encode(input: &[u8], out: &mut BytesMut) {
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;
    for &b in input {
        let (code, len) = HUFFMAN[b as usize];
        acc = (acc << len) | u64::from(code);
        acc_bits += u32::from(len);
        while acc_bits >= 8 {
            acc_bits -= 8;
            out.put_u8((acc >> acc_bits) as u8);
        }
    }
    if acc_bits > 0 {
        // Pad with the EOS prefix (all ones).
        let pad = 8 - acc_bits;
        out.put_u8(((acc << pad) as u8) | ((1u16 << pad) - 1) as u8);
    }
}

#[derive(Clone, Copy, Default)]
struct HuffmanNode {
    children: [u16; 2],
    symbol: i16, // -1 = interior
}

fn huffman_tree() -> &'static Vec<HuffmanNode> {
    static TREE: OnceLock<Vec<HuffmanNode>> = OnceLock::new();
    TREE.get_or_init(|| {
        let mut nodes = vec![HuffmanNode {
            children: [0, 0],
            symbol: -1,
        }];
        for (sym, (code, len)) in HUFFMAN.iter().enumerate() {
            let mut idx = 0usize;
            for bit_pos in (0..*len).rev() {
                let bit = ((code >> bit_pos) & 1) as usize;
                if nodes[idx].children[bit] == 0 {
                    nodes.push(HuffmanNode {
                        children: [0, 0],
                        symbol: -1,
                    });
                    let new_idx = (nodes.len() - 1) as u16;
                    nodes[idx].children[bit] = new_idx;
                }
                idx = nodes[idx].children[bit] as usize;
            }
            nodes[idx].symbol = sym as i16;
        }
        nodes
    })
}

pub(crate) fn huffman_decode(input: &[u8]) -> Result<Vec<u8>, String> {
    let tree = huffman_tree();
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut idx = 0usize;
    let mut depth = 0u32;
    for &byte in input {
        for bit_pos in (0..8).rev() {
            let bit = ((byte >> bit_pos) & 1) as usize;
            let next = tree[idx].children[bit];
            if next == 0 {
                return Err("invalid Huffman code".into());
            }
            idx = next as usize;
            depth += 1;
            if tree[idx].symbol >= 0 {
                out.push(tree[idx].symbol as u8);
                idx = 0;
                depth = 0;
            }
        }
    }
    // Trailing bits must be a prefix of EOS and at most 7 bits.
    if depth > 7 {
        return Err("Huffman padding too long".into());
    }
    Ok(out)
}

// ---- Primitive encodings ----

fn encode_int(out: &mut BytesMut, value: usize, prefix_bits: u8, pattern: u8) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(pattern | value as u8);
        return;
    }
    out.put_u8(pattern | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 128 {
        out.put_u8((rest % 128 + 128) as u8);
        rest /= 128;
    }
    out.put_u8(rest as u8);
}

fn decode_int(data: &[u8], pos: &mut usize, prefix_bits: u8) -> Result<usize, String> {
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

fn encode_string(out: &mut BytesMut, value: &[u8]) {
    let hlen = huffman_encoded_len(value);
    if hlen < value.len() {
        encode_int(out, hlen, 7, 0x80);
        huffman_encode(value, out);
    } else {
        encode_int(out, value.len(), 7, 0);
        out.put_slice(value);
    }
}

fn decode_string(data: &[u8], pos: &mut usize) -> Result<Vec<u8>, String> {
    let huffman = data.get(*pos).map(|b| b & 0x80 != 0).ok_or("truncated string")?;
    let len = decode_int(data, pos, 7)?;
    let end = pos.checked_add(len).ok_or("string length overflow")?;
    let raw = data.get(*pos..end).ok_or("truncated string literal")?;
    *pos = end;
    if huffman {
        huffman_decode(raw)
    } else {
        Ok(raw.to_vec())
    }
}

// ---- Dynamic table ----

const ENTRY_OVERHEAD: usize = 32;

#[derive(Debug, Default)]
struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    fn insert(&mut self, name: String, value: String) {
        let entry_size = name.len() + value.len() + ENTRY_OVERHEAD;
        while self.size + entry_size > self.max_size {
            match self.entries.pop_back() {
                Some((n, v)) => self.size -= n.len() + v.len() + ENTRY_OVERHEAD,
                None => break,
            }
        }
        if entry_size <= self.max_size {
            self.entries.push_front((name, value));
            self.size += entry_size;
        }
    }

    fn set_max_size(&mut self, max: usize) {
        self.max_size = max;
        while self.size > self.max_size {
            if let Some((n, v)) = self.entries.pop_back() {
                self.size -= n.len() + v.len() + ENTRY_OVERHEAD;
            }
        }
    }

    fn get(&self, index: usize) -> Option<(&str, &str)> {
        self.entries
            .get(index)
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn find(&self, name: &str, value: &str) -> (Option<usize>, Option<usize>) {
        let mut name_only = None;
        for (i, (n, v)) in self.entries.iter().enumerate() {
            if n == name {
                if v == value {
                    return (Some(i), Some(i));
                }
                name_only.get_or_insert(i);
            }
        }
        (None, name_only)
    }
}

fn lookup(table: &DynamicTable, index: usize) -> Result<(String, String), String> {
    if index == 0 {
        return Err("index 0 is invalid".into());
    }
    if index <= STATIC_TABLE.len() {
        let (n, v) = STATIC_TABLE[index - 1];
        return Ok((n.to_string(), v.to_string()));
    }
    table
        .get(index - STATIC_TABLE.len() - 1)
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .ok_or_else(|| format!("index {index} beyond table"))
}

// ---- Encoder ----

/// Stateful HPACK encoder shaping pseudo-header and header order.
pub struct HpackEncoder {
    table: DynamicTable,
    pseudo_order: Vec<PseudoHeader>,
    header_order: Option<Vec<String>>,
    pending_size_update: Option<usize>,
}

impl HpackEncoder {
    /// `pseudo_order` comes from the H2 spec; `header_order` is the
    /// optional client-wide regular-header order (lowercase names).
    pub fn new(pseudo_order: Vec<PseudoHeader>, header_order: Option<Vec<String>>) -> Self {
        Self {
            table: DynamicTable::new(4096),
            pseudo_order,
            header_order,
            pending_size_update: None,
        }
    }

    /// Adjust the dynamic table limit (on peer SETTINGS change). The
    /// size update is emitted at the start of the next header block.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
        self.pending_size_update = Some(size);
    }

    /// Encode a request header block. Pseudo-headers are emitted in the
    /// configured order; regular headers matching the header-order list
    /// come first (in list order), the rest keep insertion order.
    pub fn encode_request(
        &mut self,
        method: &str,
        scheme: &str,
        authority: &str,
        path: &str,
        headers: &[(String, String)],
    ) -> Bytes {
        let mut fields: Vec<(String, String)> =
            Vec::with_capacity(self.pseudo_order.len() + headers.len());
        for pseudo in &self.pseudo_order {
            let value = match pseudo {
                PseudoHeader::Method => method,
                PseudoHeader::Authority => authority,
                PseudoHeader::Scheme => scheme,
                PseudoHeader::Path => path,
            };
            fields.push((pseudo.name().to_string(), value.to_string()));
        }
        for (name, value) in order_regular_headers(headers, self.header_order.as_deref()) {
            fields.push((name, value));
        }

        let mut out = BytesMut::with_capacity(256);
        if let Some(size) = self.pending_size_update.take() {
            encode_int(&mut out, size, 5, 0x20);
        }
        for (name, value) in &fields {
            self.encode_field(&mut out, name, value);
        }
        out.freeze()
    }

    fn encode_field(&mut self, out: &mut BytesMut, name: &str, value: &str) {
        // Exact static match → indexed.
        if let Some(idx) = STATIC_TABLE
            .iter()
            .position(|(n, v)| *n == name && *v == value)
        {
            encode_int(out, idx + 1, 7, 0x80);
            return;
        }
        let (exact, name_only) = self.table.find(name, value);
        if let Some(i) = exact {
            encode_int(out, STATIC_TABLE.len() + i + 1, 7, 0x80);
            return;
        }
        // Literal with incremental indexing.
        let name_index = STATIC_TABLE
            .iter()
            .position(|(n, _)| *n == name)
            .map(|i| i + 1)
            .or_else(|| name_only.map(|i| STATIC_TABLE.len() + i + 1));
        match name_index {
            Some(idx) => encode_int(out, idx, 6, 0x40),
            None => {
                out.put_u8(0x40);
                encode_string(out, name.as_bytes());
            }
        }
        encode_string(out, value.as_bytes());
        self.table.insert(name.to_string(), value.to_string());
    }
}

/// Regular headers in emission order: order-list matches first, the
/// remainder in insertion order. Pseudo-headers and hop-by-hop headers
/// are filtered, names lowercased (RFC 9113 §8.2).
pub(crate) fn order_regular_headers(
    headers: &[(String, String)],
    order: Option<&[String]>,
) -> Vec<(String, String)> {
    let mut valid: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        if name.is_empty() || name.starts_with(':') {
            continue;
        }
        let lower = name.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "upgrade"
        ) {
            continue;
        }
        if lower == "te" && !value.eq_ignore_ascii_case("trailers") {
            continue;
        }
        valid.push((lower, value.clone()));
    }
    let Some(order) = order else {
        return valid;
    };
    let mut ordered = Vec::with_capacity(valid.len());
    let mut taken = vec![false; valid.len()];
    for key in order {
        let key = key.to_ascii_lowercase();
        for (i, (name, _)) in valid.iter().enumerate() {
            if !taken[i] && *name == key {
                taken[i] = true;
                ordered.push(valid[i].clone());
            }
        }
    }
    for (i, field) in valid.iter().enumerate() {
        if !taken[i] {
            ordered.push(field.clone());
        }
    }
    ordered
}

// ---- Decoder ----

/// Stateful HPACK decoder.
#[derive(Default)]
pub struct HpackDecoder {
    table: DynamicTable,
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            table: DynamicTable::new(4096),
        }
    }

    pub fn set_max_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
    }

    /// Decode a complete header block into name/value pairs, preserving
    /// the peer's emission order.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<(String, String)>, String> {
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < data.len() {
            let byte = data[pos];
            if byte & 0x80 != 0 {
                // Indexed field.
                let index = decode_int(data, &mut pos, 7)?;
                out.push(lookup(&self.table, index)?);
            } else if byte & 0xc0 == 0x40 {
                // Literal with incremental indexing.
                let (name, value) = self.decode_literal(data, &mut pos, 6)?;
                self.table.insert(name.clone(), value.clone());
                out.push((name, value));
            } else if byte & 0xe0 == 0x20 {
                // Dynamic table size update.
                let size = decode_int(data, &mut pos, 5)?;
                self.table.set_max_size(size);
            } else {
                // Literal without indexing (0x00) or never indexed (0x10).
                let (name, value) = self.decode_literal(data, &mut pos, 4)?;
                out.push((name, value));
            }
        }
        Ok(out)
    }

    fn decode_literal(
        &self,
        data: &[u8],
        pos: &mut usize,
        prefix_bits: u8,
    ) -> Result<(String, String), String> {
        let name_index = decode_int(data, pos, prefix_bits)?;
        let name = if name_index == 0 {
            String::from_utf8(decode_string(data, pos)?).map_err(|_| "header name not UTF-8")?
        } else {
            lookup(&self.table, name_index)?.0
        };
        let value =
            String::from_utf8(decode_string(data, pos)?).map_err(|_| "header value not UTF-8")?;
        Ok((name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chrome_order() -> Vec<PseudoHeader> {
        vec![
            PseudoHeader::Method,
            PseudoHeader::Authority,
            PseudoHeader::Scheme,
            PseudoHeader::Path,
        ]
    }

    #[test]
    fn rfc7541_integer_examples() {
        let mut buf = BytesMut::new();
        encode_int(&mut buf, 10, 5, 0);
        assert_eq!(&buf[..], &[0x0a]);

        let mut buf = BytesMut::new();
        encode_int(&mut buf, 1337, 5, 0);
        assert_eq!(&buf[..], &[0x1f, 0x9a, 0x0a]);

        let mut pos = 0;
        assert_eq!(decode_int(&[0x1f, 0x9a, 0x0a], &mut pos, 5).unwrap(), 1337);
    }

    #[test]
    fn huffman_round_trip() {
        for input in [
            &b"www.example.com"[..],
            b"no-cache",
            b"Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
            b"",
            &[0u8, 1, 2, 254, 255],
        ] {
            let mut enc = BytesMut::new();
            huffman_encode(input, &mut enc);
            assert_eq!(huffman_decode(&enc).unwrap(), input);
        }
    }

    #[test]
    fn rfc7541_huffman_example() {
        // C.4.1: "www.example.com"
        let mut enc = BytesMut::new();
        huffman_encode(b"www.example.com", &mut enc);
        assert_eq!(
            &enc[..],
            &[0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab, 0x90, 0xf4, 0xff]
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut encoder = HpackEncoder::new(chrome_order(), None);
        let headers = vec![
            ("user-agent".to_string(), "test".to_string()),
            ("accept".to_string(), "*/*".to_string()),
        ];
        let block = encoder.encode_request("GET", "https", "example.com", "/", &headers);
        let mut decoder = HpackDecoder::new();
        let fields = decoder.decode(&block).unwrap();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], (":method".to_string(), "GET".to_string()));
        assert_eq!(fields[1], (":authority".to_string(), "example.com".to_string()));
        assert_eq!(fields[2], (":scheme".to_string(), "https".to_string()));
        assert_eq!(fields[3], (":path".to_string(), "/".to_string()));
        assert_eq!(fields[4].0, "user-agent");
        assert_eq!(fields[5].0, "accept");
    }

    #[test]
    fn pseudo_order_is_configurable() {
        let firefox = vec![
            PseudoHeader::Method,
            PseudoHeader::Path,
            PseudoHeader::Authority,
            PseudoHeader::Scheme,
        ];
        let mut encoder = HpackEncoder::new(firefox, None);
        let block = encoder.encode_request("GET", "https", "example.com", "/x", &[]);
        let fields = HpackDecoder::new().decode(&block).unwrap();
        let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, [":method", ":path", ":authority", ":scheme"]);
    }

    #[test]
    fn header_order_list_sorts_matches_first() {
        let order = Some(vec!["accept".to_string(), "user-agent".to_string()]);
        let mut encoder = HpackEncoder::new(chrome_order(), order);
        let headers = vec![
            ("x-custom".to_string(), "1".to_string()),
            ("User-Agent".to_string(), "ua".to_string()),
            ("Accept".to_string(), "*/*".to_string()),
        ];
        let block = encoder.encode_request("GET", "https", "h", "/", &headers);
        let fields = HpackDecoder::new().decode(&block).unwrap();
        let names: Vec<&str> = fields[4..].iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["accept", "user-agent", "x-custom"]);
    }

    #[test]
    fn connection_headers_filtered() {
        let mut encoder = HpackEncoder::new(chrome_order(), None);
        let headers = vec![
            ("Connection".to_string(), "keep-alive".to_string()),
            ("TE".to_string(), "gzip".to_string()),
            ("TE2".to_string(), "x".to_string()),
        ];
        let block = encoder.encode_request("GET", "https", "h", "/", &headers);
        let fields = HpackDecoder::new().decode(&block).unwrap();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[4].0, "te2");
    }

    #[test]
    fn dynamic_table_reuse_across_blocks() {
        let mut encoder = HpackEncoder::new(chrome_order(), None);
        let headers = vec![("x-session".to_string(), "abcdef".to_string())];
        let first = encoder.encode_request("GET", "https", "h", "/", &headers);
        let second = encoder.encode_request("GET", "https", "h", "/", &headers);
        // The second block should reference the dynamic table entry.
        assert!(second.len() < first.len());
        let mut decoder = HpackDecoder::new();
        decoder.decode(&first).unwrap();
        let fields = decoder.decode(&second).unwrap();
        assert_eq!(fields[4], ("x-session".to_string(), "abcdef".to_string()));
    }

    #[test]
    fn decoder_handles_size_update() {
        let mut block = BytesMut::new();
        encode_int(&mut block, 0, 5, 0x20); // size update to 0
        encode_int(&mut block, 2, 7, 0x80); // :method GET
        let mut decoder = HpackDecoder::new();
        let fields = decoder.decode(&block).unwrap();
        assert_eq!(fields, vec![(":method".to_string(), "GET".to_string())]);
    }

    #[test]
    fn decoder_rejects_bad_index() {
        let mut block = BytesMut::new();
        encode_int(&mut block, 200, 7, 0x80);
        assert!(HpackDecoder::new().decode(&block).is_err());
    }
}
