//! `ss://` connection descriptor parsing.
//!
//! A descriptor carries everything needed to reach the relay in one string:
//!
//! ```text
//! ss://<base64url(method:password)>@<host>:<port>[/?<options>][#<tag>]
//! ```
//!
//! The options segment (for example `outline=1&prefix=POST%20`) is decoded
//! and kept for diagnostics but has no effect on how the relay is reached.

use std::fmt;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, GeneralPurposeConfig};
use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};

use super::error::DescriptorError;

/// Descriptor URL scheme.
pub const SCHEME: &str = "ss://";

/// URL-safe base64, padding optional on input and omitted on output.
const CREDENTIALS_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Parsed relay descriptor.
///
/// Built once at startup and read-only afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    cipher: String,
    secret: String,
    server: String,
    options: Vec<(String, String)>,
    tag: Option<String>,
}

impl ConnectionDescriptor {
    /// Create a descriptor from its parts.
    ///
    /// Returns a format error if the cipher or secret is empty.
    pub fn new(
        cipher: impl Into<String>,
        secret: impl Into<String>,
        server: impl Into<String>,
    ) -> Result<Self, DescriptorError> {
        let cipher = cipher.into();
        let secret = secret.into();
        if cipher.is_empty() {
            return Err(DescriptorError::format("empty cipher name"));
        }
        if secret.is_empty() {
            return Err(DescriptorError::format("empty secret"));
        }
        Ok(Self {
            cipher,
            secret,
            server: server.into(),
            options: Vec::new(),
            tag: None,
        })
    }

    /// Parse an `ss://` descriptor.
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        let rest = input
            .strip_prefix(SCHEME)
            .ok_or_else(|| DescriptorError::format(format!("expected '{SCHEME}' prefix")))?;

        let (rest, tag) = match rest.split_once('#') {
            Some((rest, tag)) => (rest, Some(decode_component(tag))),
            None => (rest, None),
        };

        let (rest, options) = match rest.split_once("/?") {
            Some((rest, query)) => (rest, parse_options(query)),
            None => (rest, Vec::new()),
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        let (credentials, server) = rest
            .rsplit_once('@')
            .ok_or_else(|| DescriptorError::format("missing '@' between credentials and server"))?;

        let decoded = CREDENTIALS_ENGINE.decode(credentials)?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| DescriptorError::Decode("credentials are not valid UTF-8".to_string()))?;

        let (cipher, secret) = decoded
            .split_once(':')
            .ok_or_else(|| DescriptorError::format("missing ':' between cipher and secret"))?;

        let mut descriptor = Self::new(cipher, secret, server)?;
        descriptor.options = options;
        descriptor.tag = tag;
        Ok(descriptor)
    }

    /// Canonical `ss://` form of this descriptor.
    ///
    /// Includes the secret; never log the result.
    pub fn to_uri(&self) -> String {
        let credentials = CREDENTIALS_ENGINE.encode(format!("{}:{}", self.cipher, self.secret));
        let mut uri = format!("{SCHEME}{credentials}@{}", self.server);

        if !self.options.is_empty() {
            let query: Vec<String> = self
                .options
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        utf8_percent_encode(k, NON_ALPHANUMERIC),
                        utf8_percent_encode(v, NON_ALPHANUMERIC)
                    )
                })
                .collect();
            uri.push_str("/?");
            uri.push_str(&query.join("&"));
        }
        if let Some(tag) = &self.tag {
            uri.push('#');
            uri.push_str(&utf8_percent_encode(tag, NON_ALPHANUMERIC).to_string());
        }
        uri
    }

    /// Cipher method name as written in the descriptor.
    pub fn cipher(&self) -> &str {
        &self.cipher
    }

    /// Shared secret.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Relay endpoint text (`host:port`), unvalidated.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Host portion of the relay endpoint, without IPv6 brackets.
    pub fn relay_host(&self) -> Option<&str> {
        let (host, _) = self.server.rsplit_once(':')?;
        Some(
            host.strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host),
        )
    }

    /// Port portion of the relay endpoint, if it parses.
    pub fn relay_port(&self) -> Option<u16> {
        let (_, port) = self.server.rsplit_once(':')?;
        port.parse().ok()
    }

    /// Decoded `key=value` pairs from the options segment.
    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    /// Fragment label, if any.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("cipher", &self.cipher)
            .field("secret", &"<redacted>")
            .field("server", &self.server)
            .field("options", &self.options)
            .field("tag", &self.tag)
            .finish()
    }
}

fn decode_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn parse_options(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // chacha20-ietf-poly1305:GQxuENFBlkiLpsTEj9ynjc
    const OUTLINE_KEY: &str = "ss://Y2hhY2hhMjAtaWV0Zi1wb2x5MTMwNTpHUXh1RU5GQmxraUxwc1RFajl5bmpj@194.54.157.166:25338/?outline=1&prefix=POST%20";

    fn encode(plain: &str) -> String {
        CREDENTIALS_ENGINE.encode(plain)
    }

    #[test]
    fn test_parse_outline_key() {
        let d = ConnectionDescriptor::parse(OUTLINE_KEY).unwrap();
        assert_eq!(d.cipher(), "chacha20-ietf-poly1305");
        assert_eq!(d.secret(), "GQxuENFBlkiLpsTEj9ynjc");
        assert_eq!(d.server(), "194.54.157.166:25338");
        assert_eq!(d.relay_host(), Some("194.54.157.166"));
        assert_eq!(d.relay_port(), Some(25338));
        assert_eq!(
            d.options(),
            &[
                ("outline".to_string(), "1".to_string()),
                ("prefix".to_string(), "POST ".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_without_options() {
        let uri = format!("ss://{}@relay.example.com:8388", encode("aes-256-gcm:pw"));
        let d = ConnectionDescriptor::parse(&uri).unwrap();
        assert_eq!(d.cipher(), "aes-256-gcm");
        assert_eq!(d.secret(), "pw");
        assert_eq!(d.server(), "relay.example.com:8388");
        assert!(d.options().is_empty());
        assert!(d.tag().is_none());
    }

    #[test]
    fn test_padded_base64_accepted() {
        // "aes-128-gcm:abcd" encodes to a length that needs padding
        let uri = "ss://YWVzLTEyOC1nY206YWJjZA==@127.0.0.1:8388";
        let d = ConnectionDescriptor::parse(uri).unwrap();
        assert_eq!(d.cipher(), "aes-128-gcm");
        assert_eq!(d.secret(), "abcd");
    }

    #[test]
    fn test_secret_may_contain_colons() {
        let uri = format!("ss://{}@[::1]:8388", encode("aes-256-gcm:a:b:c"));
        let d = ConnectionDescriptor::parse(&uri).unwrap();
        assert_eq!(d.secret(), "a:b:c");
        assert_eq!(d.relay_host(), Some("::1"));
        assert_eq!(d.relay_port(), Some(8388));
    }

    #[test]
    fn test_tag_and_trailing_slash() {
        let uri = format!("ss://{}@10.0.0.1:443/#My%20Relay", encode("aes-256-gcm:pw"));
        let d = ConnectionDescriptor::parse(&uri).unwrap();
        assert_eq!(d.server(), "10.0.0.1:443");
        assert_eq!(d.tag(), Some("My Relay"));
    }

    #[test]
    fn test_server_is_not_validated() {
        let uri = format!("ss://{}@not a host", encode("aes-256-gcm:pw"));
        let d = ConnectionDescriptor::parse(&uri).unwrap();
        assert_eq!(d.server(), "not a host");
        assert_eq!(d.relay_port(), None);
    }

    #[test]
    fn test_missing_scheme() {
        let uri = format!("http://{}@127.0.0.1:8388", encode("aes-256-gcm:pw"));
        let err = ConnectionDescriptor::parse(&uri).unwrap_err();
        assert!(matches!(err, DescriptorError::Format(_)));
    }

    #[test]
    fn test_missing_at() {
        let uri = format!("ss://{}", encode("aes-256-gcm:pw"));
        let err = ConnectionDescriptor::parse(&uri).unwrap_err();
        assert!(matches!(err, DescriptorError::Format(_)));
    }

    #[test]
    fn test_missing_colon_in_credentials() {
        let uri = format!("ss://{}@127.0.0.1:8388", encode("aes-256-gcm"));
        let err = ConnectionDescriptor::parse(&uri).unwrap_err();
        assert!(matches!(err, DescriptorError::Format(_)));
    }

    #[test]
    fn test_empty_cipher_or_secret() {
        let uri = format!("ss://{}@127.0.0.1:8388", encode(":pw"));
        assert!(matches!(
            ConnectionDescriptor::parse(&uri),
            Err(DescriptorError::Format(_))
        ));

        let uri = format!("ss://{}@127.0.0.1:8388", encode("aes-256-gcm:"));
        assert!(matches!(
            ConnectionDescriptor::parse(&uri),
            Err(DescriptorError::Format(_))
        ));
    }

    #[test]
    fn test_invalid_base64() {
        let err = ConnectionDescriptor::parse("ss://!!not*base64!!@127.0.0.1:8388").unwrap_err();
        assert!(matches!(err, DescriptorError::Decode(_)));
    }

    #[test]
    fn test_standard_alphabet_rejected() {
        // '+' and '/' belong to the standard alphabet only
        let err = ConnectionDescriptor::parse("ss://ab+/cd@127.0.0.1:8388").unwrap_err();
        assert!(matches!(err, DescriptorError::Decode(_)));
    }

    #[test]
    fn test_round_trip() {
        let cases = [
            ("aes-256-gcm", "secret", "relay.example.com:8388"),
            ("chacha20-ietf-poly1305", "p:a:s:s", "[2001:db8::1]:443"),
            ("aes-128-gcm", "ünïcødé pass", "127.0.0.1:1"),
            ("dummy", "x", "host:65535"),
        ];

        for (cipher, secret, server) in cases {
            let original = ConnectionDescriptor::new(cipher, secret, server).unwrap();
            let parsed = ConnectionDescriptor::parse(&original.to_uri()).unwrap();
            assert_eq!(parsed, original);
        }
    }

    #[test]
    fn test_round_trip_keeps_options() {
        let d = ConnectionDescriptor::parse(OUTLINE_KEY).unwrap();
        let again = ConnectionDescriptor::parse(&d.to_uri()).unwrap();
        assert_eq!(again, d);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let d = ConnectionDescriptor::parse(OUTLINE_KEY).unwrap();
        let debug = format!("{:?}", d);
        assert!(!debug.contains("GQxuENFBlkiLpsTEj9ynjc"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_from_str() {
        let d: ConnectionDescriptor = OUTLINE_KEY.parse().unwrap();
        assert_eq!(d.relay_port(), Some(25338));
    }
}
