// AMF0 value: the self-describing wire format used to carry RTMP
// command and metadata objects.
//
// Object/ECMAArray are kept as an ordered Vec<(String, AMF0Value)> rather
// than a map: several real encoders and decoders look up `connect`/metadata
// fields positionally, so insertion order from the wire must survive a
// decode/encode round trip.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, RtmpError};

const AMF0_TYPE_NUMBER: u8 = 0x00;
const AMF0_TYPE_BOOL: u8 = 0x01;
const AMF0_TYPE_STRING: u8 = 0x02;
const AMF0_TYPE_OBJECT: u8 = 0x03;
const AMF0_TYPE_NULL: u8 = 0x05;
const AMF0_TYPE_UNDEFINED: u8 = 0x06;
const AMF0_TYPE_ECMA_ARRAY: u8 = 0x08;
const AMF0_TYPE_OBJECT_END: u8 = 0x09;
const AMF0_TYPE_STRICT_ARRAY: u8 = 0x0A;
const AMF0_TYPE_DATE: u8 = 0x0B;
const AMF0_TYPE_LONG_STRING: u8 = 0x0C;
const AMF0_TYPE_SWITCH_AMF3: u8 = 0x11;

/// An ordered object property list
pub type AMF0Object = Vec<(String, AMF0Value)>;

/// AMF0 compatible value
#[derive(Debug, Clone, PartialEq)]
pub enum AMF0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Null,
    Undefined,
    /// `Object` marker (0x03): an ordered property list
    Object(AMF0Object),
    /// `ECMA Array` marker (0x08): like Object, but with a (possibly
    /// inaccurate) leading element-count hint
    ECMAArray(AMF0Object),
    /// `Strict Array` marker (0x0A): an ordered, untagged value list
    StrictArray(Vec<AMF0Value>),
}

impl AMF0Value {
    /// Shorthand for constructing a string value
    pub fn str(s: impl Into<String>) -> AMF0Value {
        AMF0Value::String(s.into())
    }

    /// Shorthand for constructing a number value
    pub fn num(n: f64) -> AMF0Value {
        AMF0Value::Number(n)
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AMF0Value::Null | AMF0Value::Undefined)
    }

    /// Returns the value as a float, or 0.0 if it is not numeric
    pub fn get_f64(&self) -> f64 {
        match self {
            AMF0Value::Number(v) => *v,
            _ => 0.0,
        }
    }

    /// Returns the value as a string slice, or "" if it is not a string
    pub fn get_string(&self) -> &str {
        match self {
            AMF0Value::String(v) => v.as_str(),
            _ => "",
        }
    }

    /// Returns the value as a bool, using AMF's loose coercion
    pub fn get_bool(&self) -> bool {
        match self {
            AMF0Value::Boolean(v) => *v,
            AMF0Value::Number(v) => *v != 0.0,
            _ => false,
        }
    }

    /// Returns the ordered property list, for Object and ECMAArray values
    pub fn get_object(&self) -> Option<&AMF0Object> {
        match self {
            AMF0Value::Object(props) => Some(props),
            AMF0Value::ECMAArray(props) => Some(props),
            _ => None,
        }
    }

    /// Looks up a property by key, for Object and ECMAArray values
    pub fn get(&self, key: &str) -> Option<&AMF0Value> {
        self.get_object()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Looks up a property and returns it as a string, defaulting to ""
    pub fn get_string_prop(&self, key: &str) -> &str {
        self.get(key).map(|v| v.get_string()).unwrap_or("")
    }

    /// Looks up a property and returns it as an f64, defaulting to 0.0
    pub fn get_f64_prop(&self, key: &str) -> f64 {
        self.get(key).map(|v| v.get_f64()).unwrap_or(0.0)
    }

    /// Returns the elements, for StrictArray values
    pub fn get_array(&self) -> Option<&Vec<AMF0Value>> {
        match self {
            AMF0Value::StrictArray(items) => Some(items),
            _ => None,
        }
    }

    // Encoding

    /// Encodes the value, appending its bytes to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            AMF0Value::Number(v) => {
                out.push(AMF0_TYPE_NUMBER);
                encode_f64(out, *v);
            }
            AMF0Value::Boolean(v) => {
                out.push(AMF0_TYPE_BOOL);
                out.push(if *v { 1 } else { 0 });
            }
            AMF0Value::String(v) => {
                out.push(AMF0_TYPE_STRING);
                encode_utf8_string(out, v);
            }
            AMF0Value::Null => out.push(AMF0_TYPE_NULL),
            AMF0Value::Undefined => out.push(AMF0_TYPE_UNDEFINED),
            AMF0Value::Object(props) => {
                out.push(AMF0_TYPE_OBJECT);
                encode_object_body(out, props);
            }
            AMF0Value::ECMAArray(props) => {
                out.push(AMF0_TYPE_ECMA_ARRAY);
                let mut count_buf = [0u8; 4];
                BigEndian::write_u32(&mut count_buf, props.len() as u32);
                out.extend_from_slice(&count_buf);
                encode_object_body(out, props);
            }
            AMF0Value::StrictArray(items) => {
                out.push(AMF0_TYPE_STRICT_ARRAY);
                let mut count_buf = [0u8; 4];
                BigEndian::write_u32(&mut count_buf, items.len() as u32);
                out.extend_from_slice(&count_buf);
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    /// Encodes the value into a freshly allocated buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Decodes a single value from `data`, starting at `pos`.
    /// Returns the value and the position just past it.
    pub fn decode(data: &[u8], pos: usize) -> Result<(AMF0Value, usize)> {
        let marker = read_u8(data, pos)?;
        let pos = pos + 1;

        match marker {
            AMF0_TYPE_NUMBER => {
                let v = read_f64(data, pos)?;
                Ok((AMF0Value::Number(v), pos + 8))
            }
            AMF0_TYPE_BOOL => {
                let v = read_u8(data, pos)?;
                Ok((AMF0Value::Boolean(v != 0), pos + 1))
            }
            AMF0_TYPE_STRING => {
                let (s, next) = read_utf8_string(data, pos)?;
                Ok((AMF0Value::String(s), next))
            }
            AMF0_TYPE_LONG_STRING => {
                let (s, next) = read_utf8_long_string(data, pos)?;
                Ok((AMF0Value::String(s), next))
            }
            AMF0_TYPE_NULL => Ok((AMF0Value::Null, pos)),
            AMF0_TYPE_UNDEFINED => Ok((AMF0Value::Undefined, pos)),
            AMF0_TYPE_OBJECT => {
                let (props, next) = decode_object_body(data, pos)?;
                Ok((AMF0Value::Object(props), next))
            }
            AMF0_TYPE_ECMA_ARRAY => {
                // The leading count is a hint only; ignore it and terminate
                // on the empty-key sentinel, per spec.
                let next = pos + 4;
                let (props, next) = decode_object_body(data, next)?;
                Ok((AMF0Value::ECMAArray(props), next))
            }
            AMF0_TYPE_STRICT_ARRAY => {
                let count = read_u32(data, pos)? as usize;
                let mut items = Vec::with_capacity(count.min(4096));
                let mut cur = pos + 4;
                for _ in 0..count {
                    let (v, next) = AMF0Value::decode(data, cur)?;
                    items.push(v);
                    cur = next;
                }
                Ok((AMF0Value::StrictArray(items), cur))
            }
            AMF0_TYPE_DATE => {
                // Timestamp (f64 ms) + 2-byte timezone offset, surfaced as a Number
                let v = read_f64(data, pos)?;
                Ok((AMF0Value::Number(v), pos + 10))
            }
            AMF0_TYPE_SWITCH_AMF3 => Err(RtmpError::UnsupportedMarker(marker)),
            other => Err(RtmpError::UnsupportedMarker(other)),
        }
    }

    /// Decodes a sequence of values filling the rest of `data`
    pub fn decode_all(data: &[u8]) -> Result<Vec<AMF0Value>> {
        let mut values = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let (v, next) = AMF0Value::decode(data, pos)?;
            values.push(v);
            pos = next;
        }
        Ok(values)
    }
}

fn encode_f64(out: &mut Vec<u8>, v: f64) {
    let mut buf = [0u8; 8];
    BigEndian::write_f64(&mut buf, v);
    out.extend_from_slice(&buf);
}

fn encode_utf8_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let mut len_buf = [0u8; 2];
    BigEndian::write_u16(&mut len_buf, bytes.len() as u16);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(bytes);
}

fn encode_object_body(out: &mut Vec<u8>, props: &AMF0Object) {
    for (key, value) in props {
        encode_utf8_string(out, key);
        value.encode_into(out);
    }
    encode_utf8_string(out, "");
    out.push(AMF0_TYPE_OBJECT_END);
}

fn decode_object_body(data: &[u8], mut pos: usize) -> Result<(AMF0Object, usize)> {
    let mut props = AMF0Object::new();

    loop {
        let (key, next) = read_utf8_string(data, pos)?;
        pos = next;

        if key.is_empty() {
            // Must be followed by the object-end marker
            let marker = read_u8(data, pos)?;
            pos += 1;
            if marker != AMF0_TYPE_OBJECT_END {
                return Err(RtmpError::InvalidObject(
                    "empty key not followed by object-end marker".to_string(),
                ));
            }
            return Ok((props, pos));
        }

        let (value, next) = AMF0Value::decode(data, pos)?;
        pos = next;
        props.push((key, value));
    }
}

fn read_u8(data: &[u8], pos: usize) -> Result<u8> {
    data.get(pos).copied().ok_or(RtmpError::ShortBuffer {
        needed: pos + 1,
        available: data.len(),
    })
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    if pos + 4 > data.len() {
        return Err(RtmpError::ShortBuffer {
            needed: pos + 4,
            available: data.len(),
        });
    }
    Ok(BigEndian::read_u32(&data[pos..pos + 4]))
}

fn read_f64(data: &[u8], pos: usize) -> Result<f64> {
    if pos + 8 > data.len() {
        return Err(RtmpError::ShortBuffer {
            needed: pos + 8,
            available: data.len(),
        });
    }
    Ok(BigEndian::read_f64(&data[pos..pos + 8]))
}

fn read_utf8_string(data: &[u8], pos: usize) -> Result<(String, usize)> {
    if pos + 2 > data.len() {
        return Err(RtmpError::ShortBuffer {
            needed: pos + 2,
            available: data.len(),
        });
    }
    let len = BigEndian::read_u16(&data[pos..pos + 2]) as usize;
    let start = pos + 2;
    if start + len > data.len() {
        return Err(RtmpError::ShortBuffer {
            needed: start + len,
            available: data.len(),
        });
    }
    let s = String::from_utf8_lossy(&data[start..start + len]).into_owned();
    Ok((s, start + len))
}

fn read_utf8_long_string(data: &[u8], pos: usize) -> Result<(String, usize)> {
    let len = read_u32(data, pos)? as usize;
    let start = pos + 4;
    if start + len > data.len() {
        return Err(RtmpError::ShortBuffer {
            needed: start + len,
            available: data.len(),
        });
    }
    let s = String::from_utf8_lossy(&data[start..start + len]).into_owned();
    Ok((s, start + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_round_trip() {
        let v = AMF0Value::Number(3.5);
        let bytes = v.encode();
        let (decoded, next) = AMF0Value::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(next, bytes.len());
    }

    #[test]
    fn test_string_round_trip() {
        let v = AMF0Value::str("hello world");
        let bytes = v.encode();
        let (decoded, _) = AMF0Value::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn test_object_preserves_insertion_order() {
        let obj = AMF0Value::Object(vec![
            ("app".to_string(), AMF0Value::str("live")),
            ("tcUrl".to_string(), AMF0Value::str("rtmp://host/live")),
            ("fpad".to_string(), AMF0Value::Boolean(false)),
        ]);

        let bytes = obj.encode();
        let (decoded, _) = AMF0Value::decode(&bytes, 0).unwrap();

        let props = decoded.get_object().unwrap();
        let keys: Vec<&str> = props.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["app", "tcUrl", "fpad"]);
    }

    #[test]
    fn test_ecma_array_with_wrong_count_still_terminates() {
        // Build an ECMA array manually with a bogus count (says 99 but has 1)
        let mut bytes = vec![0x08];
        bytes.extend_from_slice(&99u32.to_be_bytes());
        encode_utf8_string(&mut bytes, "videocodecid");
        AMF0Value::Number(7.0).encode_into(&mut bytes);
        encode_utf8_string(&mut bytes, "");
        bytes.push(0x09);

        let (decoded, next) = AMF0Value::decode(&bytes, 0).unwrap();
        assert_eq!(next, bytes.len());
        assert_eq!(decoded.get_f64_prop("videocodecid"), 7.0);
    }

    #[test]
    fn test_strict_array() {
        let v = AMF0Value::StrictArray(vec![AMF0Value::Number(1.0), AMF0Value::str("a")]);
        let bytes = v.encode();
        let (decoded, next) = AMF0Value::decode(&bytes, 0).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(next, bytes.len());
    }

    #[test]
    fn test_short_buffer() {
        let err = AMF0Value::decode(&[0x00, 0x00], 0).unwrap_err();
        assert!(matches!(err, RtmpError::ShortBuffer { .. }));
    }

    #[test]
    fn test_unsupported_marker() {
        let err = AMF0Value::decode(&[0x0F], 0).unwrap_err();
        assert!(matches!(err, RtmpError::UnsupportedMarker(0x0F)));
    }

    #[test]
    fn test_switch_amf3_is_unsupported() {
        let err = AMF0Value::decode(&[0x11], 0).unwrap_err();
        assert!(matches!(err, RtmpError::UnsupportedMarker(0x11)));
    }
}
