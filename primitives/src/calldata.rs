//! The `function@hex@hex` call-data codec.
//!
//! Cross-shard transfers carry their payload in this format: the function
//! name in clear text, followed by `@`-separated hex-encoded arguments.
//! Callbacks use a leading empty function part: `@<retcode-hex>@<arg-hex>…`.

use crate::error::{VMError, VMResult};

const SEPARATOR: u8 = b'@';

/// Incremental builder for call-data fields.
#[derive(Debug, Clone, Default)]
pub struct CallDataBuilder {
    data: Vec<u8>,
}

impl CallDataBuilder {
    /// Start from a function name (may be empty, for callback payloads).
    pub fn new(function: &str) -> Self {
        Self {
            data: function.as_bytes().to_vec(),
        }
    }

    pub fn arg_bytes(mut self, arg: &[u8]) -> Self {
        self.data.push(SEPARATOR);
        self.data.extend_from_slice(hex::encode(arg).as_bytes());
        self
    }

    pub fn arg_u64(self, arg: u64) -> Self {
        if arg == 0 {
            // Zero serialises as the empty big-endian byte string.
            return self.arg_bytes(&[]);
        }
        let bytes = arg.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
        self.arg_bytes(&bytes[first..])
    }

    pub fn arg_str(self, arg: &str) -> Self {
        self.arg_bytes(arg.as_bytes())
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

/// Split call data into the function name and its decoded arguments.
///
/// An empty part decodes to an empty argument. Bad hex fails the whole
/// payload; partial decoding would desynchronise argument indices.
pub fn parse_call_data(data: &[u8]) -> VMResult<(String, Vec<Vec<u8>>)> {
    let mut parts = data.split(|b| *b == SEPARATOR);
    let function_bytes = parts.next().unwrap_or_default();
    let function = String::from_utf8(function_bytes.to_vec())
        .map_err(|_| VMError::CallDataDecode("function name is not utf-8".to_string()))?;

    let mut arguments = Vec::new();
    for part in parts {
        let decoded = hex::decode(part)
            .map_err(|e| VMError::CallDataDecode(format!("argument is not hex: {e}")))?;
        arguments.push(decoded);
    }

    Ok((function, arguments))
}

/// Length the data field would have for `function@arg1@arg2…` without
/// actually building it; used when bounding callback gas by payload size.
pub fn encoded_data_length(function: &str, arguments: &[Vec<u8>]) -> usize {
    let mut length = function.len() + arguments.len();
    for argument in arguments {
        length += argument.len();
    }
    length
}
