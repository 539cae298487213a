// AMF0 command and data message bodies: (name, transaction id, arguments...)

use crate::amf::AMF0Value;
use crate::error::Result;

/// An `Invoke`/`CommandAMF0` message: a named remote call with a
/// transaction id and zero or more AMF0 arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub name: String,
    pub transaction_id: f64,
    pub arguments: Vec<AMF0Value>,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: f64, arguments: Vec<AMF0Value>) -> Command {
        Command {
            name: name.into(),
            transaction_id,
            arguments,
        }
    }

    pub fn decode(body: &[u8]) -> Result<Command> {
        let values = AMF0Value::decode_all(body)?;
        let mut iter = values.into_iter();

        let name = iter.next().map(|v| v.get_string().to_string()).unwrap_or_default();
        let transaction_id = iter.next().map(|v| v.get_f64()).unwrap_or(0.0);
        let arguments: Vec<AMF0Value> = iter.collect();

        Ok(Command { name, transaction_id, arguments })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        AMF0Value::str(self.name.clone()).encode_into(&mut out);
        AMF0Value::Number(self.transaction_id).encode_into(&mut out);
        for arg in &self.arguments {
            arg.encode_into(&mut out);
        }
        out
    }
}

/// A `DataAMF0` message: an unsolicited, transaction-less AMF0 value
/// sequence, most commonly `onMetaData`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub values: Vec<AMF0Value>,
}

impl DataMessage {
    pub fn decode(body: &[u8]) -> Result<DataMessage> {
        Ok(DataMessage { values: AMF0Value::decode_all(body)? })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for v in &self.values {
            v.encode_into(&mut out);
        }
        out
    }

    /// The data message's name, stripped of a leading `@setDataFrame`
    /// wrapper if present (one real encoder prefixes `onMetaData` this way).
    pub fn frame_name(&self) -> &str {
        match self.values.first() {
            Some(v) if v.get_string() == "@setDataFrame" => {
                self.values.get(1).map(|v| v.get_string()).unwrap_or("")
            }
            Some(v) => v.get_string(),
            None => "",
        }
    }

    /// The metadata object, for an `onMetaData` frame
    pub fn metadata(&self) -> Option<&AMF0Value> {
        if self.values.first()?.get_string() == "@setDataFrame" {
            self.values.get(2)
        } else {
            self.values.get(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip() {
        let cmd = Command::new(
            "connect",
            1.0,
            vec![AMF0Value::Object(vec![("app".to_string(), AMF0Value::str("live"))])],
        );
        let bytes = cmd.encode();
        let decoded = Command::decode(&bytes).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_set_data_frame_unwraps_metadata() {
        let values = vec![
            AMF0Value::str("@setDataFrame"),
            AMF0Value::str("onMetaData"),
            AMF0Value::Object(vec![("videocodecid".to_string(), AMF0Value::num(7.0))]),
        ];
        let data = DataMessage { values };
        assert_eq!(data.frame_name(), "onMetaData");
        assert_eq!(data.metadata().unwrap().get_f64_prop("videocodecid"), 7.0);
    }

    #[test]
    fn test_plain_onmetadata_without_wrapper() {
        let values = vec![
            AMF0Value::str("onMetaData"),
            AMF0Value::Object(vec![("audiocodecid".to_string(), AMF0Value::num(10.0))]),
        ];
        let data = DataMessage { values };
        assert_eq!(data.frame_name(), "onMetaData");
        assert_eq!(data.metadata().unwrap().get_f64_prop("audiocodecid"), 10.0);
    }
}
