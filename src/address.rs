//! Email address type with optional display name.

use crate::error::HeraldError;
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An email address with an optional display name.
///
/// # Examples
///
/// ```
/// use herald::Address;
///
/// // From email string
/// let addr: Address = "user@example.com".into();
/// assert_eq!(addr.email, "user@example.com");
/// assert_eq!(addr.name, None);
///
/// // From tuple (name, email)
/// let addr: Address = ("Alice", "alice@example.com").into();
/// assert_eq!(addr.email, "alice@example.com");
/// assert_eq!(addr.name, Some("Alice".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Optional display name (e.g., "Alice Smith")
    pub name: Option<String>,
    /// Email address (e.g., "alice@example.com")
    pub email: String,
}

impl Address {
    /// Create a new address with just an email.
    ///
    /// This performs a basic sanity check (non-empty, contains @) and logs
    /// a warning if the email looks invalid. For strict validation, use
    /// [`Address::parse`] instead.
    pub fn new(email: impl Into<String>) -> Self {
        let email = email.into();

        if !Self::basic_sanity_check(&email) {
            tracing::warn!(
                email = %email,
                "Creating address with potentially invalid email. Use Address::parse() for strict validation."
            );
        }

        Self { name: None, email }
    }

    /// Create a new address with a name and email.
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into();

        if !Self::basic_sanity_check(&email) {
            tracing::warn!(
                email = %email,
                "Creating address with potentially invalid email. Use Address::parse_with_name() for strict validation."
            );
        }

        Self {
            name: Some(name.into()),
            email,
        }
    }

    /// Basic sanity check: non-empty, contains @. NOT full validation.
    fn basic_sanity_check(email: &str) -> bool {
        !email.is_empty() && email.contains('@')
    }

    /// Parse and validate an email address.
    ///
    /// Uses RFC 5321/5322 compliant validation. Returns an error if the
    /// email address is invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use herald::Address;
    ///
    /// let addr = Address::parse("user@example.com").unwrap();
    /// assert_eq!(addr.email, "user@example.com");
    ///
    /// assert!(Address::parse("not-an-email").is_err());
    /// assert!(Address::parse("").is_err());
    /// ```
    pub fn parse(email: &str) -> Result<Self, HeraldError> {
        if !EmailAddress::is_valid(email) {
            return Err(HeraldError::InvalidAddress(format!(
                "'{}' is not a valid email address",
                email
            )));
        }

        Ok(Self {
            name: None,
            email: email.to_string(),
        })
    }

    /// Parse and validate an email address with a display name.
    pub fn parse_with_name(name: &str, email: &str) -> Result<Self, HeraldError> {
        let mut addr = Self::parse(email)?;
        if !name.is_empty() {
            addr.name = Some(name.to_string());
        }
        Ok(addr)
    }

    /// Convert the domain part of the email address to ASCII (Punycode).
    ///
    /// Needed for international domain names (IDN) when handing addresses
    /// to protocols that require ASCII. The local part is preserved as-is.
    ///
    /// # Examples
    ///
    /// ```
    /// use herald::Address;
    ///
    /// let addr = Address::new("user@例え.jp");
    /// assert_eq!(addr.to_ascii().unwrap(), "user@xn--r8jz45g.jp");
    ///
    /// let addr = Address::new("user@example.com");
    /// assert_eq!(addr.to_ascii().unwrap(), "user@example.com");
    /// ```
    pub fn to_ascii(&self) -> Result<String, HeraldError> {
        let parts: Vec<&str> = self.email.splitn(2, '@').collect();
        if parts.len() != 2 {
            return Err(HeraldError::InvalidAddress(format!(
                "'{}' is missing @ symbol",
                self.email
            )));
        }

        let local_part = parts[0];
        let domain = parts[1];

        let ascii_domain = idna::domain_to_ascii(domain).map_err(|e| {
            HeraldError::InvalidAddress(format!(
                "Failed to convert domain '{}' to ASCII: {:?}",
                domain, e
            ))
        })?;

        Ok(format!("{}@{}", local_part, ascii_domain))
    }

    /// Format as "Name <email>" or just "email" if no name.
    pub fn formatted(&self) -> String {
        match &self.name {
            Some(name) if name.is_empty() => self.email.clone(),
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

impl From<&str> for Address {
    fn from(email: &str) -> Self {
        Self::new(email)
    }
}

impl From<String> for Address {
    fn from(email: String) -> Self {
        Self::new(email)
    }
}

impl<N: AsRef<str>, E: AsRef<str>> From<(N, E)> for Address {
    fn from((name, email): (N, E)) -> Self {
        Self::with_name(name.as_ref(), email.as_ref())
    }
}

/// Deduplicate a recipient list, keeping first occurrence order.
///
/// Comparison is case-insensitive on the email part only; display names do
/// not distinguish recipients. Used for cc/bcc lists, where duplicates are
/// silently dropped rather than rejected.
pub fn dedup_addresses(addrs: Vec<Address>) -> Vec<Address> {
    let mut seen = std::collections::HashSet::new();
    addrs
        .into_iter()
        .filter(|a| seen.insert(a.email.to_ascii_lowercase()))
        .collect()
}

/// Trait for types that can be converted to an email address.
///
/// Implement this trait for your custom types to use them directly
/// in builder methods.
///
/// # Example
///
/// ```rust
/// use herald::{Address, ToAddress};
///
/// struct Recipient {
///     name: String,
///     email: String,
/// }
///
/// impl ToAddress for Recipient {
///     fn to_address(&self) -> Address {
///         Address::with_name(&self.name, &self.email)
///     }
/// }
/// ```
pub trait ToAddress {
    fn to_address(&self) -> Address;
}

impl<T: ToAddress + ?Sized> ToAddress for &T {
    fn to_address(&self) -> Address {
        (*self).to_address()
    }
}

impl ToAddress for Address {
    fn to_address(&self) -> Address {
        self.clone()
    }
}

impl ToAddress for str {
    fn to_address(&self) -> Address {
        Address::new(self)
    }
}

impl ToAddress for String {
    fn to_address(&self) -> Address {
        Address::new(self)
    }
}

impl<N: AsRef<str>, E: AsRef<str>> ToAddress for (N, E) {
    fn to_address(&self) -> Address {
        Address::with_name(self.0.as_ref(), self.1.as_ref())
    }
}
