//! URI components as used by the extension ecosystem.
//!
//! Extension code represents URIs as a plain record of components tagged
//! with `$mid: 1` rather than as a single string. A string is split with
//! the RFC 3986 appendix B expression and its components percent-decoded.
//! Formatting percent-encodes every component again: only unreserved
//! characters (and `/` in the path) are written as-is, the host is
//! lower-cased, and so is a Windows drive letter at the start of the path.

use std::borrow::Cow;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use super::value::{Object, Value};

/// Marker value carried in the `$mid` field of a serialized component record.
pub const URI_MARSHAL_ID: u64 = 1;

static URI_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(([^:/?#]+?):)?(//([^/?#]*))?([^?#]*)(\?([^#]*))?(#(.*))?")
        .expect("URI regex is valid")
});

/// A URI split into its components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UriComponents {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl UriComponents {
    /// Split a URI string into components.
    ///
    /// Never fails: the expression matches every input, missing parts are empty.
    pub fn parse(value: &str) -> Self {
        let Some(caps) = URI_REGEX.captures(value) else {
            return Self {
                path: value.to_string(),
                ..Self::default()
            };
        };
        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        let scheme = group(2).to_string();
        let path = resolve_reference(&scheme, percent_decode(group(5)));

        Self {
            authority: percent_decode(group(4)),
            path,
            query: percent_decode(group(7)),
            fragment: percent_decode(group(9)),
            scheme,
        }
    }

    /// Build components for a `file` URI from an absolute path.
    pub fn file(path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Self {
            scheme: "file".to_string(),
            path,
            ..Self::default()
        }
    }

    /// Read components out of a `$mid: 1` record.
    ///
    /// Returns `None` when the object is not such a record.
    pub fn from_object(object: &Object) -> Option<Self> {
        if object.get("$mid").and_then(|v| v.as_u64()) != Some(URI_MARSHAL_ID) {
            return None;
        }
        let field = |name: &str| {
            object
                .get(name)
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        };

        Some(Self {
            scheme: field("scheme"),
            authority: field("authority"),
            path: field("path"),
            query: field("query"),
            fragment: field("fragment"),
        })
    }

    /// The `$mid: 1` record form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "$mid": URI_MARSHAL_ID,
            "scheme": self.scheme,
            "authority": self.authority,
            "path": self.path,
            "query": self.query,
            "fragment": self.fragment,
        })
    }

    /// The `$mid: 1` record form as a payload object.
    pub fn to_object(&self) -> Object {
        let object = Object::new();
        object.insert("$mid", Value::from(URI_MARSHAL_ID));
        object.insert("scheme", self.scheme.as_str());
        object.insert("authority", self.authority.as_str());
        object.insert("path", self.path.as_str());
        object.insert("query", self.query.as_str());
        object.insert("fragment", self.fragment.as_str());
        object
    }
}

impl fmt::Display for UriComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scheme.is_empty() {
            write!(f, "{}:", self.scheme)?;
        }
        if !self.authority.is_empty() || self.scheme == "file" {
            f.write_str("//")?;
        }
        if !self.authority.is_empty() {
            write_authority(f, &self.authority)?;
        }
        if !self.path.is_empty() {
            f.write_str(&encode_path(&lower_drive_letter(&self.path)))?;
        }
        if !self.query.is_empty() {
            write!(f, "?{}", urlencoding::encode(&self.query))?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", urlencoding::encode(&self.fragment))?;
        }
        Ok(())
    }
}

/// `user:password@host:port`; the port is written as-is.
fn write_authority(f: &mut fmt::Formatter<'_>, authority: &str) -> fmt::Result {
    let host = match authority.split_once('@') {
        Some((userinfo, host)) => {
            match userinfo.split_once(':') {
                Some((user, password)) => write!(
                    f,
                    "{}:{}@",
                    urlencoding::encode(user),
                    urlencoding::encode(password)
                )?,
                None => write!(f, "{}@", urlencoding::encode(userinfo))?,
            }
            host
        }
        None => authority,
    };

    let host = host.to_lowercase();
    match host.split_once(':') {
        Some((name, port)) => write!(f, "{}:{}", urlencoding::encode(name), port),
        None => f.write_str(&urlencoding::encode(&host)),
    }
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// `/C:/x` and `C:/x` become `/c:/x` and `c:/x`.
fn lower_drive_letter(path: &str) -> Cow<'_, str> {
    let bytes = path.as_bytes();
    let drive = if bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' {
        1
    } else if bytes.len() >= 2 && bytes[1] == b':' {
        0
    } else {
        return Cow::Borrowed(path);
    };
    if !bytes[drive].is_ascii_uppercase() {
        return Cow::Borrowed(path);
    }
    let mut lowered = path.to_string();
    lowered[drive..=drive].make_ascii_lowercase();
    Cow::Owned(lowered)
}

/// Decode `%XX` escapes; text that does not decode to UTF-8 is kept as-is.
fn percent_decode(component: &str) -> String {
    urlencoding::decode(component)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| component.to_string())
}

/// `http`, `https` and `file` paths are always absolute.
fn resolve_reference(scheme: &str, path: String) -> String {
    match scheme {
        "http" | "https" | "file" if !path.starts_with('/') => format!("/{}", path),
        _ => path,
    }
}
