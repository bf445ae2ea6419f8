//! Utility functions for keymesh

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Percent-encoding set for node names embedded as path segments.
/// Everything except unreserved characters is escaped, matching
/// query-string escaping.
const NODE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Add a leading slash if path does not have one.
pub fn slash(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Remove a leading slash from path if it has one.
pub fn unslash(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Normalize a key to exactly one leading slash and no trailing slash.
/// The root key "/" normalizes to itself.
pub fn normalize_key(key: &str) -> String {
    let trimmed = key.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Encode a node name ("host:port") for use as a single path segment in
/// the coordination store. Slashes are first replaced with the literal
/// `%2F`, then the result is query-escaped.
pub fn encode_node(node: &str) -> String {
    let no_slashes = node.replace('/', "%2F");
    utf8_percent_encode(&no_slashes, NODE_ENCODE_SET).to_string()
}

/// Decode a node name previously encoded with [`encode_node`].
pub fn decode_node(encoded: &str) -> crate::Result<String> {
    let unescaped = percent_decode_str(encoded)
        .decode_utf8()
        .map_err(|e| crate::Error::Other(format!("failed to decode node name: {}", e)))?;
    Ok(unescaped.replace("%2F", "/"))
}

/// Validate and canonicalize a node name. Strips an `http://` or
/// `https://` scheme prefix; the remainder must look like an HTTP
/// authority (`host` or `host:port`). A node without a port has `:80`
/// implied for validation, but the original port-less form is kept.
pub fn clean_node_name(name: &str) -> crate::Result<String> {
    let name = name
        .trim_start_matches("http://")
        .trim_start_matches("https://");

    let (host, port) = match name.rsplit_once(':') {
        Some((h, p)) => (h, p),
        None => (name, "80"),
    };
    if host.is_empty() || host.contains('/') || host.contains(':') {
        return Err(crate::Error::InvalidConfig(format!(
            "bad node name {:?} (want host:port)",
            name
        )));
    }
    port.parse::<u16>().map_err(|_| {
        crate::Error::InvalidConfig(format!("bad port in node name {:?}", name))
    })?;

    Ok(name.to_string())
}

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, "ms")
    } else {
        (&s[..s.len() - 1], &s[s.len() - 1..])
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => std::time::Duration::from_millis(num),
        "s" => std::time::Duration::from_secs(num),
        "m" => std::time::Duration::from_secs(num * 60),
        "h" => std::time::Duration::from_secs(num * 3600),
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_unslash() {
        assert_eq!(slash("a/b"), "/a/b");
        assert_eq!(slash("/a/b"), "/a/b");
        assert_eq!(slash(""), "/");
        assert_eq!(unslash("/a/b"), "a/b");
        assert_eq!(unslash("a/b"), "a/b");
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("alice"), "/alice");
        assert_eq!(normalize_key("/alice"), "/alice");
        assert_eq!(normalize_key("//alice"), "/alice");
        assert_eq!(normalize_key("/alice/"), "/alice");
        assert_eq!(normalize_key("/"), "/");
        assert_eq!(normalize_key(""), "/");
        assert_eq!(normalize_key("/a/b/c"), "/a/b/c");
    }

    #[test]
    fn test_encode_decode_node_roundtrip() {
        for name in [
            "example.com:80",
            "10.1.2.3:7070",
            "host-1.internal:8080",
            "example.com/path:80",
            "plain",
        ] {
            let encoded = encode_node(name);
            assert!(!encoded.contains('/'), "encoded {:?} contains a slash", encoded);
            assert_eq!(decode_node(&encoded).unwrap(), name);
        }
    }

    #[test]
    fn test_encode_node_escapes_colon() {
        let encoded = encode_node("example.com:80");
        assert_eq!(encoded, "example.com%3A80");
    }

    #[test]
    fn test_clean_node_name() {
        assert_eq!(clean_node_name("example.com:80").unwrap(), "example.com:80");
        assert_eq!(
            clean_node_name("http://example.com:8080").unwrap(),
            "example.com:8080"
        );
        // Port-less names are preserved as given.
        assert_eq!(clean_node_name("example.com").unwrap(), "example.com");
        assert!(clean_node_name("example.com:notaport").is_err());
        assert!(clean_node_name(":80").is_err());
        assert!(clean_node_name("http://").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("500ms").unwrap(),
            std::time::Duration::from_millis(500)
        );
        assert_eq!(
            parse_duration("30s").unwrap(),
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            parse_duration("5m").unwrap(),
            std::time::Duration::from_secs(300)
        );
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
    }
}
