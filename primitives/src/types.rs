//! Core type aliases, reserved names, and code metadata.

/// Account address, fixed at 32 bytes by chain convention. Kept as a byte
/// vector because addresses travel through the hook and the wire unchanged.
pub type Address = Vec<u8>;

/// Hash bytes; the length is decided by the blockchain hook.
pub type Hash = Vec<u8>;

/// Conventional address length in bytes.
pub const ADDRESS_LEN: usize = 32;

/// Name of the export run once at deployment.
pub const INIT_FUNCTION_NAME: &str = "init";

/// Name of the implicit callback export used by legacy async calls.
pub const CALLBACK_FUNCTION_NAME: &str = "callBack";

/// Reserved function name that triggers a contract upgrade when called.
pub const UPGRADE_FUNCTION_NAME: &str = "upgradeContract";

/// Reserved function name that triggers contract deletion when called.
pub const DELETE_FUNCTION_NAME: &str = "deleteContract";

/// Prefix of storage keys only the VM itself may write.
pub const VM_PROTECTED_PREFIX: &[u8] = b"V@";

/// Suffix under the protected prefix holding serialised async contexts.
pub const ASYNC_DATA_PREFIX: &[u8] = b"V@async";

/// Suffix under the protected prefix holding storage-lock timestamps.
pub const TIMELOCK_PREFIX: &[u8] = b"V@timelock";

/// Builds a storage key from a VM-internal prefix and an identifier.
pub fn custom_storage_key(prefix: &[u8], identifier: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1 + identifier.len());
    key.extend_from_slice(prefix);
    key.push(b':');
    key.extend_from_slice(identifier);
    key
}

/// Decoded code-metadata flags, stored on-chain as two bytes.
///
/// Byte 0 carries `upgradeable` (0x01) and `readable` (0x04); byte 1 carries
/// `payable` (0x02) and `payable by contract` (0x04).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodeMetadata {
    pub upgradeable: bool,
    pub readable: bool,
    pub payable: bool,
    pub payable_by_sc: bool,
}

const METADATA_UPGRADEABLE: u8 = 0x01;
const METADATA_READABLE: u8 = 0x04;
const METADATA_PAYABLE: u8 = 0x02;
const METADATA_PAYABLE_BY_SC: u8 = 0x04;

impl CodeMetadata {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let byte0 = bytes.first().copied().unwrap_or(0);
        let byte1 = bytes.get(1).copied().unwrap_or(0);
        Self {
            upgradeable: byte0 & METADATA_UPGRADEABLE != 0,
            readable: byte0 & METADATA_READABLE != 0,
            payable: byte1 & METADATA_PAYABLE != 0,
            payable_by_sc: byte1 & METADATA_PAYABLE_BY_SC != 0,
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut byte0 = 0u8;
        let mut byte1 = 0u8;
        if self.upgradeable {
            byte0 |= METADATA_UPGRADEABLE;
        }
        if self.readable {
            byte0 |= METADATA_READABLE;
        }
        if self.payable {
            byte1 |= METADATA_PAYABLE;
        }
        if self.payable_by_sc {
            byte1 |= METADATA_PAYABLE_BY_SC;
        }
        vec![byte0, byte1]
    }
}
