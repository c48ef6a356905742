use crate::Error;
use lanes_utils::hex;
use std::{fmt, str::FromStr};

/// Length of an [Address] in bytes.
pub const ADDRESS_LENGTH: usize = 32;

/// The only scheme a [Uri] may use.
const SCHEME: &str = "tcp";

/// Where a remote service can be dialed, in the form `tcp://host:port`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri {
    host: String,
    port: u16,
}

impl Uri {
    /// Parse a `tcp://host:port` string.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let (scheme, rest) = value
            .split_once("://")
            .ok_or_else(|| Error::InvalidUri(value.to_string()))?;
        if scheme != SCHEME {
            return Err(Error::UnsupportedScheme(scheme.to_string()));
        }
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidUri(value.to_string()))?;
        if host.is_empty() {
            return Err(Error::InvalidUri(value.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| Error::InvalidUri(value.to_string()))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Error> {
        Self::parse(value)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", SCHEME, self.host, self.port)
    }
}

/// Identity of a connected peer, as resolved by a [crate::Transport].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(value: [u8; ADDRESS_LENGTH]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Error> {
        let array: [u8; ADDRESS_LENGTH] = value
            .try_into()
            .map_err(|_| Error::InvalidAddress(value.len()))?;
        Ok(Self(array))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_uri() {
        let uri = Uri::parse("tcp://127.0.0.1:5000").unwrap();
        assert_eq!(uri.host(), "127.0.0.1");
        assert_eq!(uri.port(), 5000);
        assert_eq!(uri.to_string(), "tcp://127.0.0.1:5000");
        assert_eq!("tcp://127.0.0.1:5000".parse::<Uri>().unwrap(), uri);
    }

    #[test]
    fn test_parse_uri_unsupported_scheme() {
        assert_eq!(
            Uri::parse("udp://127.0.0.1:5000"),
            Err(Error::UnsupportedScheme("udp".to_string()))
        );
    }

    #[test_case("127.0.0.1:5000"; "missing scheme")]
    #[test_case("tcp://127.0.0.1"; "missing port")]
    #[test_case("tcp://:5000"; "missing host")]
    #[test_case("tcp://host:99999"; "port out of range")]
    #[test_case("tcp://host:abc"; "port not numeric")]
    fn test_parse_uri_invalid(value: &str) {
        assert!(matches!(Uri::parse(value), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn test_address_conversions() {
        let address = Address::from([7u8; ADDRESS_LENGTH]);
        assert_eq!(Address::try_from(address.as_ref()).unwrap(), address);
        assert_eq!(address.to_string(), "07".repeat(ADDRESS_LENGTH));
        assert_eq!(
            Address::try_from(&[1u8, 2, 3][..]),
            Err(Error::InvalidAddress(3))
        );
    }
}
