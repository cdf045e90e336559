//! Element types and typed host arrays exchanged with kernels.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type shared by every input of a session.
///
/// The discriminants are the wire codes accepted by the request façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Uint32 = 0,
    Float = 1,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_of(self) -> usize {
        match self {
            DataType::Uint32 => std::mem::size_of::<u32>(),
            DataType::Float => std::mem::size_of::<f32>(),
        }
    }
}

impl TryFrom<u32> for DataType {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        match code {
            0 => Ok(DataType::Uint32),
            1 => Ok(DataType::Float),
            other => Err(Error::validation(format!("unrecognized data type code {}", other))),
        }
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uint32" | "u32" | "0" => Ok(DataType::Uint32),
            "float" | "f32" | "1" => Ok(DataType::Float),
            other => Err(Error::validation(format!("unrecognized data type '{}'", other))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Uint32 => f.write_str("UINT32"),
            DataType::Float => f.write_str("FLOAT"),
        }
    }
}

/// A typed host-side array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Elements {
    Uint32(Vec<u32>),
    Float(Vec<f32>),
}

impl Elements {
    pub fn data_type(&self) -> DataType {
        match self {
            Elements::Uint32(_) => DataType::Uint32,
            Elements::Float(_) => DataType::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Elements::Uint32(v) => v.len(),
            Elements::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.data_type().size_of()
    }

    /// Little-endian encoding for device transfer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        match self {
            Elements::Uint32(v) => v.iter().for_each(|x| bytes.extend_from_slice(&x.to_le_bytes())),
            Elements::Float(v) => v.iter().for_each(|x| bytes.extend_from_slice(&x.to_le_bytes())),
        }
        bytes
    }

    /// Decode little-endian bytes as `data_type`.
    pub fn from_bytes(data_type: DataType, bytes: &[u8]) -> Result<Self> {
        let width = data_type.size_of();
        if bytes.len() % width != 0 {
            return Err(Error::validation(format!(
                "{} bytes cannot be decoded as {} ({}-byte elements)",
                bytes.len(),
                data_type,
                width
            )));
        }

        let words = bytes
            .chunks_exact(width)
            .map(|b| [b[0], b[1], b[2], b[3]]);

        Ok(match data_type {
            DataType::Uint32 => Elements::Uint32(words.map(u32::from_le_bytes).collect()),
            DataType::Float => Elements::Float(words.map(f32::from_le_bytes).collect()),
        })
    }

    /// Convert a JSON array into elements of `data_type`.
    ///
    /// Any value that is not representable as `data_type` fails with
    /// [`Error::TypeMismatch`].
    pub fn from_json(data_type: DataType, values: &[serde_json::Value]) -> Result<Self> {
        match data_type {
            DataType::Uint32 => values
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|x| u32::try_from(x).ok())
                        .ok_or_else(|| Error::type_mismatch(data_type, describe_json(v)))
                })
                .collect::<Result<Vec<_>>>()
                .map(Elements::Uint32),
            DataType::Float => values
                .iter()
                .map(|v| {
                    v.as_f64()
                        .map(|x| x as f32)
                        .ok_or_else(|| Error::type_mismatch(data_type, describe_json(v)))
                })
                .collect::<Result<Vec<_>>>()
                .map(Elements::Float),
        }
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Elements::Uint32(v) => Some(v),
            Elements::Float(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Elements::Float(v) => Some(v),
            Elements::Uint32(_) => None,
        }
    }
}

impl From<Vec<u32>> for Elements {
    fn from(v: Vec<u32>) -> Self {
        Elements::Uint32(v)
    }
}

impl From<Vec<f32>> for Elements {
    fn from(v: Vec<f32>) -> Self {
        Elements::Float(v)
    }
}

fn describe_json(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::Number(n) if n.is_f64() => "FLOAT".to_string(),
        Value::Number(n) if n.as_i64().map_or(false, |x| x < 0) => {
            format!("negative integer {}", n)
        }
        Value::Number(n) => format!("integer {} out of range", n),
        Value::String(_) => "string".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_type_codes() {
        assert_eq!(DataType::try_from(0).unwrap(), DataType::Uint32);
        assert_eq!(DataType::try_from(1).unwrap(), DataType::Float);
        assert!(DataType::try_from(2).is_err());
        assert_eq!("float".parse::<DataType>().unwrap(), DataType::Float);
        assert_eq!("UINT32".parse::<DataType>().unwrap(), DataType::Uint32);
    }

    #[test]
    fn test_bytes_are_little_endian() {
        let elements = Elements::Uint32(vec![1, 0x0102_0304]);
        assert_eq!(elements.to_bytes(), vec![1, 0, 0, 0, 4, 3, 2, 1]);

        let decoded = Elements::from_bytes(DataType::Uint32, &elements.to_bytes()).unwrap();
        assert_eq!(decoded, elements);
    }

    #[test]
    fn test_from_bytes_rejects_partial_elements() {
        let err = Elements::from_bytes(DataType::Float, &[0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_json_uint_rejects_floats() {
        let values = [json!(1), json!(2.5)];
        let err = Elements::from_json(DataType::Uint32, &values).unwrap_err();
        match err {
            Error::TypeMismatch { expected, found } => {
                assert_eq!(expected, DataType::Uint32);
                assert_eq!(found, "FLOAT");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(Elements::from_json(DataType::Uint32, &[json!(-1)]).is_err());
        assert!(Elements::from_json(DataType::Uint32, &[json!(u64::MAX)]).is_err());
    }

    #[test]
    fn test_json_float_accepts_integers() {
        let values = [json!(1), json!(2.5)];
        let elements = Elements::from_json(DataType::Float, &values).unwrap();
        assert_eq!(elements, Elements::Float(vec![1.0, 2.5]));
        assert!(Elements::from_json(DataType::Float, &[json!("x")]).is_err());
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let json = serde_json::to_string(&Elements::Uint32(vec![6, 8])).unwrap();
        assert_eq!(json, "[6,8]");
    }
}
