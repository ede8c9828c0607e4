use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{Ia5StringRef, OctetString, PrintableStringRef, SetOfVec, Utf8StringRef};
use der::Any;
use time::Duration;
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

use super::extensions::ToAndFromX509Extension;
use crate::error::{CsrForgeError, Result};
use crate::request::Name;

const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const STATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const ORGANIZATION_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");

/// Distinguished name parameters for a CSR or certificate subject.
///
/// # Fields
/// * `common_name` - The common name (CN), omitted from the encoded name when empty.
/// * `names` - Country, state, locality, organization and unit entries.
#[derive(Clone, Debug, Builder, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    #[builder(default)]
    pub common_name: String,
    #[builder(default)]
    pub names: Vec<Name>,
}

impl DistinguishedName {
    /// Converts the distinguished name to an X.509 name.
    ///
    /// Attributes are grouped by type across every `names` entry, in the order C, ST, L, O,
    /// OU, followed by CN. Each value gets its own RDN. Countries are PrintableStrings, all
    /// other values UTF8Strings.
    pub fn as_x509_name(&self) -> Result<x509_cert::name::Name> {
        let mut rdns = Vec::new();

        for name in &self.names {
            if let Some(country) = &name.country {
                let value = PrintableStringRef::new(country).map_err(|_| {
                    CsrForgeError::ValidationError(format!(
                        "country {country:?} is not a printable string"
                    ))
                })?;
                rdns.push(single_attribute(COUNTRY, Any::encode_from(&value)?)?);
            }
        }

        let grouped: [(ObjectIdentifier, Vec<&str>); 4] = [
            (STATE, self.names.iter().filter_map(|n| n.state.as_deref()).collect()),
            (LOCALITY, self.names.iter().filter_map(|n| n.locality.as_deref()).collect()),
            (ORGANIZATION, self.names.iter().filter_map(|n| n.organization.as_deref()).collect()),
            (
                ORGANIZATION_UNIT,
                self.names.iter().filter_map(|n| n.organization_unit.as_deref()).collect(),
            ),
        ];
        for (oid, values) in grouped {
            for value in values {
                rdns.push(utf8_attribute(oid, value)?);
            }
        }

        if !self.common_name.is_empty() {
            rdns.push(utf8_attribute(COMMON_NAME, &self.common_name)?);
        }

        Ok(RdnSequence(rdns))
    }
}

fn utf8_attribute(oid: ObjectIdentifier, value: &str) -> Result<RelativeDistinguishedName> {
    let value = Utf8StringRef::new(value)?;
    single_attribute(oid, Any::encode_from(&value)?)
}

fn single_attribute(oid: ObjectIdentifier, value: Any) -> Result<RelativeDistinguishedName> {
    let set = SetOfVec::try_from(vec![AttributeTypeAndValue { oid, value }])?;
    Ok(RelativeDistinguishedName(set))
}

/// Returns the first common name of an X.509 name, if it has a string value.
pub fn common_name_of(name: &x509_cert::name::Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter(|attr| attr.oid == COMMON_NAME)
        .find_map(|attr| attribute_string(&attr.value))
}

fn attribute_string(value: &Any) -> Option<String> {
    if let Ok(s) = value.decode_as::<Utf8StringRef<'_>>() {
        return Some(s.to_string());
    }
    if let Ok(s) = value.decode_as::<PrintableStringRef<'_>>() {
        return Some(s.to_string());
    }
    value
        .decode_as::<Ia5StringRef<'_>>()
        .ok()
        .map(|s| s.to_string())
}

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period starting now for the given number of days.
    pub fn for_days(days: i64) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            not_before: now,
            not_after: now + Duration::days(days),
        }
    }

    /// Creates a validity period that starts `backdate` before `now` and lasts `lifetime`.
    ///
    /// Sub-second precision is dropped since X.509 times carry whole seconds.
    /// Fails with `ValidationError` when either end falls outside the representable range.
    pub fn starting_at(
        now: OffsetDateTime,
        backdate: Duration,
        lifetime: Duration,
    ) -> Result<Self> {
        let out_of_range = || {
            CsrForgeError::ValidationError(format!(
                "validity window of {lifetime:?} backdated by {backdate:?} is out of range"
            ))
        };
        let not_before = now
            .replace_nanosecond(0)
            .unwrap_or(now)
            .checked_sub(backdate)
            .ok_or_else(out_of_range)?;
        let not_after = not_before.checked_add(lifetime).ok_or_else(out_of_range)?;
        Ok(Self {
            not_before,
            not_after,
        })
    }

    /// Truncates the period so it ends no later than `limit`.
    pub fn clamp_to(self, limit: OffsetDateTime) -> Self {
        Self {
            not_before: self.not_before,
            not_after: self.not_after.min(limit),
        }
    }
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(extension: E, critical: bool) -> Result<Self> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        E::from_x509_extension_value(&self.value)
    }

    pub fn to_x509(&self) -> Result<x509_cert::ext::Extension> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: OctetString::new(self.value.clone())?,
        })
    }

    pub fn from_x509(ext: &x509_cert::ext::Extension) -> Self {
        Self {
            oid: ext.extn_id,
            critical: ext.critical,
            value: ext.extn_value.as_bytes().to_vec(),
        }
    }
}
