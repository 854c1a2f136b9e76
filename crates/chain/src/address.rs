use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("unknown network prefix `{0}`")]
    UnknownNetwork(char),

    #[error("unknown address protocol `{0}`")]
    UnknownProtocol(char),

    #[error("address payload is missing")]
    MissingPayload,

    #[error("invalid character `{0}` in address payload")]
    InvalidPayload(char),

    #[error("actor id `{0}` does not fit in 64 bits")]
    IdOverflow(String),
}

/// A Filecoin address in its string form, e.g. `f01234` or `t3abc...`.
///
/// Parsing only checks the textual shape; whether the address exists on
/// chain is left to the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Protocol digit: 0 = id, 1 = secp256k1, 2 = actor, 3 = bls, 4 = delegated.
    pub fn protocol(&self) -> u8 {
        self.0.as_bytes()[1] - b'0'
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let network = chars.next().ok_or(AddressError::Empty)?;
        if network != 'f' && network != 't' {
            return Err(AddressError::UnknownNetwork(network));
        }
        let protocol = chars.next().ok_or(AddressError::MissingPayload)?;
        let payload = chars.as_str();
        if payload.is_empty() {
            return Err(AddressError::MissingPayload);
        }

        match protocol {
            '0' => {
                if let Some(bad) = payload.chars().find(|c| !c.is_ascii_digit()) {
                    return Err(AddressError::InvalidPayload(bad));
                }
                payload
                    .parse::<u64>()
                    .map_err(|_| AddressError::IdOverflow(payload.to_string()))?;
            }
            '1' | '2' | '3' => {
                // lowercase RFC 4648 base32 alphabet
                if let Some(bad) = payload
                    .chars()
                    .find(|c| !matches!(c, 'a'..='z' | '2'..='7'))
                {
                    return Err(AddressError::InvalidPayload(bad));
                }
            }
            '4' => {
                if let Some(bad) = payload
                    .chars()
                    .find(|c| !c.is_ascii_lowercase() && !c.is_ascii_digit())
                {
                    return Err(AddressError::InvalidPayload(bad));
                }
            }
            other => return Err(AddressError::UnknownProtocol(other)),
        }

        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_and_key_addresses() {
        let id: Address = "f01234".parse().expect("id address");
        assert_eq!(id.protocol(), 0);
        assert_eq!(id.to_string(), "f01234");

        let bls: Address = "t3vvmn62lofvhjd2ugzca6sof2j2ubwok6cj4xxbfzz4yuxfkgobpihhd2thlanmsh3w2ptld2gqkn2jvlss4a"
            .parse()
            .expect("bls address");
        assert_eq!(bls.protocol(), 3);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert_eq!("".parse::<Address>(), Err(AddressError::Empty));
        assert_eq!("x01234".parse::<Address>(), Err(AddressError::UnknownNetwork('x')));
        assert_eq!("f9abc".parse::<Address>(), Err(AddressError::UnknownProtocol('9')));
        assert_eq!("f0".parse::<Address>(), Err(AddressError::MissingPayload));
        assert_eq!("f01a".parse::<Address>(), Err(AddressError::InvalidPayload('a')));
        assert_eq!("f1ABC".parse::<Address>(), Err(AddressError::InvalidPayload('A')));
        assert!(matches!(
            "f099999999999999999999".parse::<Address>(),
            Err(AddressError::IdOverflow(_))
        ));
    }

    #[test]
    fn deserializes_from_json_string() {
        let addr: Address = serde_json::from_str("\"f02\"").expect("json address");
        assert_eq!(addr.as_str(), "f02");
        assert!(serde_json::from_str::<Address>("\"nope\"").is_err());
    }
}
