use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpe::escape::{escape, percent_decode, split_raw, unescape};

/// Version tag accepted in the formatted-string binding.
pub const FS_VERSION: &str = "2.3";

/// Number of `:`-separated components in a formatted string (`cpe`, `2.3`, part, 10 attributes).
const FS_COMPONENTS: usize = 13;

/// Maximum number of components in the legacy URI binding (part through language).
const URI_COMPONENTS: usize = 7;

/// Number of attributes after `part`.
const ATTRIBUTES: usize = 10;

/// Errors raised while parsing identifier text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("'{0}' is neither a CPE name nor a vendor:product key")]
    Prefix(String),

    #[error("expected {expected} fields, found {found} in '{text}'")]
    FieldCount { expected: usize, found: usize, text: String },

    #[error("unsupported CPE version '{0}'")]
    UnsupportedVersion(String),

    #[error("part '{0}' is not an application")]
    NotApplication(String),

    #[error("'{0}' has no concrete vendor or product")]
    MissingIdentity(String),
}

/// Returned by [`Identifier::set_successor`] when the successor names the same product.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0} cannot be deprecated by itself")]
pub struct SuccessorError(pub ProductKey);

/// Named attribute slots after `part`, in formatted-string order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Vendor,
    Product,
    Version,
    Update,
    Edition,
    Language,
    SwEdition,
    TargetSw,
    TargetHw,
    Other,
}

impl Attribute {
    fn index(self) -> usize {
        match self {
            Attribute::Vendor => 0,
            Attribute::Product => 1,
            Attribute::Version => 2,
            Attribute::Update => 3,
            Attribute::Edition => 4,
            Attribute::Language => 5,
            Attribute::SwEdition => 6,
            Attribute::TargetSw => 7,
            Attribute::TargetHw => 8,
            Attribute::Other => 9,
        }
    }
}

/// Logical value of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Any,
    NotApplicable,
    Value(String),
}

/// Textual encoding an identifier was parsed from; `bind` reproduces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// `cpe:2.3:a:...` with all 13 components.
    FormattedString,
    /// `cpe:/a:...` with `components` components, edition optionally tilde-packed.
    Uri { components: usize, packed: bool },
    /// Bare `vendor:product`.
    ProductKey,
}

/// Case-insensitive `(vendor, product)` identity.
///
/// Values are stored unescaped; `Display` escapes each side and joins with `:`.
/// Case folding is ASCII-only, matching SQLite's `NOCASE` collation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductKey {
    vendor: String,
    product: String,
}

impl ProductKey {
    pub fn new(vendor: impl Into<String>, product: impl Into<String>) -> Self {
        Self { vendor: vendor.into(), product: product.into() }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    fn folded(&self) -> (String, String) {
        (self.vendor.to_ascii_lowercase(), self.product.to_ascii_lowercase())
    }
}

impl PartialEq for ProductKey {
    fn eq(&self, other: &Self) -> bool {
        self.vendor.eq_ignore_ascii_case(&other.vendor)
            && self.product.eq_ignore_ascii_case(&other.product)
    }
}

impl Eq for ProductKey {}

impl Hash for ProductKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vendor.to_ascii_lowercase().hash(state);
        self.product.to_ascii_lowercase().hash(state);
    }
}

impl PartialOrd for ProductKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProductKey {
    /// Vendor first, then product, ignoring ASCII case.
    fn cmp(&self, other: &Self) -> Ordering {
        self.folded().cmp(&other.folded())
    }
}

impl fmt::Display for ProductKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", escape(&self.vendor), escape(&self.product))
    }
}

impl FromStr for ProductKey {
    type Err = ParseError;

    /// Accepts any identifier form and keeps only its identity.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identifier::parse(s).map(|id| id.key().clone())
    }
}

/// One parsed CPE name restricted to applications.
///
/// The attribute text is kept exactly as bound in the source encoding so that
/// `parse(s).bind() == s`. Logical values are derived on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    binding: Binding,
    fields: [String; ATTRIBUTES],
    key: ProductKey,
    successor: Option<ProductKey>,
}

impl Identifier {
    /// Parse a formatted string, a legacy URI, or a bare `vendor:product` key.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        if let Some(rest) = text.strip_prefix("cpe:") {
            if let Some(uri) = rest.strip_prefix('/') {
                return Self::parse_uri(text, uri);
            }
            return Self::parse_formatted(text);
        }

        let parts = split_raw(':', text);
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            let mut fields: [String; ATTRIBUTES] = Default::default();
            fields[0] = parts[0].to_string();
            fields[1] = parts[1].to_string();
            let key = ProductKey::new(unescape(parts[0]), unescape(parts[1]));
            return Ok(Self { binding: Binding::ProductKey, fields, key, successor: None });
        }

        Err(ParseError::Prefix(text.to_string()))
    }

    fn parse_formatted(text: &str) -> Result<Self, ParseError> {
        let parts = split_raw(':', text);
        let tag = parts.get(1).copied().unwrap_or_default();
        if tag != FS_VERSION {
            return Err(ParseError::UnsupportedVersion(tag.to_string()));
        }
        if parts.len() != FS_COMPONENTS {
            return Err(ParseError::FieldCount {
                expected: FS_COMPONENTS,
                found: parts.len(),
                text: text.to_string(),
            });
        }
        if parts[2] != "a" {
            return Err(ParseError::NotApplication(parts[2].to_string()));
        }

        let mut fields: [String; ATTRIBUTES] = Default::default();
        for (slot, raw) in fields.iter_mut().zip(&parts[3..]) {
            *slot = raw.to_string();
        }

        let vendor = fs_value(&fields[0]);
        let product = fs_value(&fields[1]);
        let key = concrete_key(text, vendor, product)?;
        Ok(Self { binding: Binding::FormattedString, fields, key, successor: None })
    }

    fn parse_uri(text: &str, body: &str) -> Result<Self, ParseError> {
        let parts = split_raw(':', body);
        if parts.len() > URI_COMPONENTS {
            return Err(ParseError::FieldCount {
                expected: URI_COMPONENTS,
                found: parts.len(),
                text: text.to_string(),
            });
        }
        if parts[0] != "a" {
            return Err(ParseError::NotApplication(parts[0].to_string()));
        }

        let component = |idx: usize| parts.get(idx).copied().unwrap_or_default().to_string();
        let mut fields: [String; ATTRIBUTES] = Default::default();
        fields[Attribute::Vendor.index()] = component(1);
        fields[Attribute::Product.index()] = component(2);
        fields[Attribute::Version.index()] = component(3);
        fields[Attribute::Update.index()] = component(4);
        fields[Attribute::Language.index()] = component(6);

        let edition = component(5);
        let packed = edition.starts_with('~');
        if packed {
            let packed_parts: Vec<&str> = edition.split('~').collect();
            if packed_parts.len() != 6 {
                return Err(ParseError::FieldCount {
                    expected: 6,
                    found: packed_parts.len(),
                    text: text.to_string(),
                });
            }
            for (attr, raw) in [
                Attribute::Edition,
                Attribute::SwEdition,
                Attribute::TargetSw,
                Attribute::TargetHw,
                Attribute::Other,
            ]
            .into_iter()
            .zip(&packed_parts[1..])
            {
                fields[attr.index()] = raw.to_string();
            }
        } else {
            fields[Attribute::Edition.index()] = edition;
        }

        let vendor = uri_value(&fields[0]);
        let product = uri_value(&fields[1]);
        let key = concrete_key(text, vendor, product)?;
        Ok(Self {
            binding: Binding::Uri { components: parts.len(), packed },
            fields,
            key,
            successor: None,
        })
    }

    /// Build a bare-key identifier from a dictionary identity.
    pub fn from_key(key: ProductKey) -> Self {
        let mut fields: [String; ATTRIBUTES] = Default::default();
        fields[0] = escape(key.vendor());
        fields[1] = escape(key.product());
        Self { binding: Binding::ProductKey, fields, key, successor: None }
    }

    /// Re-encode in the binding this identifier was parsed from.
    pub fn bind(&self) -> String {
        match self.binding {
            Binding::FormattedString => format!("cpe:{FS_VERSION}:a:{}", self.fields.join(":")),
            Binding::ProductKey => format!("{}:{}", self.fields[0], self.fields[1]),
            Binding::Uri { components, packed } => {
                let f = |attr: Attribute| self.fields[attr.index()].as_str();
                let edition = if packed {
                    format!(
                        "~{}~{}~{}~{}~{}",
                        f(Attribute::Edition),
                        f(Attribute::SwEdition),
                        f(Attribute::TargetSw),
                        f(Attribute::TargetHw),
                        f(Attribute::Other)
                    )
                } else {
                    f(Attribute::Edition).to_string()
                };
                let all = [
                    "a".to_string(),
                    f(Attribute::Vendor).to_string(),
                    f(Attribute::Product).to_string(),
                    f(Attribute::Version).to_string(),
                    f(Attribute::Update).to_string(),
                    edition,
                    f(Attribute::Language).to_string(),
                ];
                format!("cpe:/{}", all[..components].join(":"))
            }
        }
    }

    pub fn binding(&self) -> Binding {
        self.binding
    }

    /// Identity used for dictionary lookups and candidate comparisons.
    pub fn key(&self) -> &ProductKey {
        &self.key
    }

    pub fn vendor(&self) -> &str {
        self.key.vendor()
    }

    pub fn product(&self) -> &str {
        self.key.product()
    }

    /// Logical value of an attribute, decoded from its binding.
    pub fn attribute(&self, attr: Attribute) -> AttributeValue {
        let raw = &self.fields[attr.index()];
        match self.binding {
            Binding::FormattedString => match raw.as_str() {
                "*" => AttributeValue::Any,
                "-" => AttributeValue::NotApplicable,
                _ => AttributeValue::Value(unescape(raw)),
            },
            Binding::Uri { .. } => match raw.as_str() {
                "" => AttributeValue::Any,
                "-" => AttributeValue::NotApplicable,
                _ => AttributeValue::Value(percent_decode(raw)),
            },
            Binding::ProductKey => match attr {
                Attribute::Vendor | Attribute::Product => AttributeValue::Value(unescape(raw)),
                _ => AttributeValue::Any,
            },
        }
    }

    /// Record that this identifier is deprecated in favour of `other`.
    ///
    /// Fails without changing anything when `other` has the same identity.
    pub fn set_successor(&mut self, other: &Identifier) -> Result<(), SuccessorError> {
        self.set_successor_key(other.key.clone())
    }

    pub fn set_successor_key(&mut self, key: ProductKey) -> Result<(), SuccessorError> {
        if key == self.key {
            return Err(SuccessorError(key));
        }
        self.successor = Some(key);
        Ok(())
    }

    pub fn successor(&self) -> Option<&ProductKey> {
        self.successor.as_ref()
    }

    pub fn is_deprecated(&self) -> bool {
        self.successor.is_some()
    }

    /// Compare identities by vendor, then product, ASCII case-insensitive.
    pub fn compare(&self, other: &Identifier) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
            .then_with(|| self.bind().cmp(&other.bind()))
            .then_with(|| self.successor.cmp(&other.successor))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bind())
    }
}

impl FromStr for Identifier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Identifier::parse(s)
    }
}

fn fs_value(raw: &str) -> Option<String> {
    match raw {
        "*" | "-" | "" => None,
        _ => Some(unescape(raw)),
    }
}

fn uri_value(raw: &str) -> Option<String> {
    match raw {
        "" | "-" => None,
        _ => Some(percent_decode(raw)),
    }
}

fn concrete_key(
    text: &str,
    vendor: Option<String>,
    product: Option<String>,
) -> Result<ProductKey, ParseError> {
    match (vendor, product) {
        (Some(vendor), Some(product)) => Ok(ProductKey::new(vendor, product)),
        _ => Err(ParseError::MissingIdentity(text.to_string())),
    }
}
