//! Device natural keys and identity-fragment resolution.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Natural keys of a physical device. Every field is optional so callers can
/// supply any non-empty subset as a lookup fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub imei: Option<String>,
    pub serial_number: Option<String>,
    pub bssid: Option<String>,
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub msisdn: Option<String>,
    pub ssid: Option<String>,
}

/// One addressable field of a [`DeviceIdentity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityField {
    Bssid,
    Imei,
    SerialNumber,
    Iccid,
    Imsi,
    Msisdn,
    Ssid,
}

impl IdentityField {
    pub const ALL: [IdentityField; 7] = [
        IdentityField::Bssid,
        IdentityField::Imei,
        IdentityField::SerialNumber,
        IdentityField::Iccid,
        IdentityField::Imsi,
        IdentityField::Msisdn,
        IdentityField::Ssid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityField::Bssid => "bssid",
            IdentityField::Imei => "imei",
            IdentityField::SerialNumber => "serial_number",
            IdentityField::Iccid => "iccid",
            IdentityField::Imsi => "imsi",
            IdentityField::Msisdn => "msisdn",
            IdentityField::Ssid => "ssid",
        }
    }
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bssid" => Ok(IdentityField::Bssid),
            "imei" => Ok(IdentityField::Imei),
            "serial" | "serial_number" | "serialnumber" => Ok(IdentityField::SerialNumber),
            "iccid" => Ok(IdentityField::Iccid),
            "imsi" => Ok(IdentityField::Imsi),
            "msisdn" => Ok(IdentityField::Msisdn),
            "ssid" => Ok(IdentityField::Ssid),
            other => Err(format!("unknown identity field '{}'", other)),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl DeviceIdentity {
    pub fn with_imei(imei: impl Into<String>) -> Self {
        Self {
            imei: Some(imei.into()),
            ..Default::default()
        }
    }

    pub fn with_serial(serial: impl Into<String>) -> Self {
        Self {
            serial_number: Some(serial.into()),
            ..Default::default()
        }
    }

    pub fn with_bssid(bssid: impl Into<String>) -> Self {
        Self {
            bssid: Some(bssid.into()),
            ..Default::default()
        }
    }

    /// Value of a field, `None` when absent or blank
    pub fn get(&self, field: IdentityField) -> Option<&str> {
        match field {
            IdentityField::Bssid => non_empty(&self.bssid),
            IdentityField::Imei => non_empty(&self.imei),
            IdentityField::SerialNumber => non_empty(&self.serial_number),
            IdentityField::Iccid => non_empty(&self.iccid),
            IdentityField::Imsi => non_empty(&self.imsi),
            IdentityField::Msisdn => non_empty(&self.msisdn),
            IdentityField::Ssid => non_empty(&self.ssid),
        }
    }

    /// True when no field carries a value
    pub fn is_empty(&self) -> bool {
        IdentityField::ALL.iter().all(|f| self.get(*f).is_none())
    }

    /// Fields that carry a value, in declaration order
    pub fn supplied_fields(&self) -> Vec<IdentityField> {
        IdentityField::ALL
            .iter()
            .copied()
            .filter(|f| self.get(*f).is_some())
            .collect()
    }

    /// Build the store lookup for this fragment.
    ///
    /// The primary key is the first supplied field in `priority`; when none of
    /// the prioritized fields is supplied the first supplied field overall is
    /// used. Every other supplied field becomes a constraint the matching
    /// record must also satisfy.
    pub fn to_query(&self, priority: &[IdentityField]) -> Option<IdentityQuery> {
        let primary = priority
            .iter()
            .copied()
            .find(|f| self.get(*f).is_some())
            .or_else(|| self.supplied_fields().into_iter().next())?;

        let value = self.get(primary)?.to_string();
        let constraints = self
            .supplied_fields()
            .into_iter()
            .filter(|f| *f != primary)
            .filter_map(|f| self.get(f).map(|v| (f, v.to_string())))
            .collect();

        Some(IdentityQuery {
            field: primary,
            value,
            constraints,
        })
    }

    /// Short human readable description for logs, e.g. `imei=I1234`
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .supplied_fields()
            .into_iter()
            .filter_map(|f| self.get(f).map(|v| format!("{}={}", f, v)))
            .collect();
        if parts.is_empty() {
            "<empty>".to_string()
        } else {
            parts.join(",")
        }
    }
}

/// Lookup derived from an identity fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityQuery {
    pub field: IdentityField,
    pub value: String,
    pub constraints: Vec<(IdentityField, String)>,
}

impl IdentityQuery {
    /// Whether a stored identity satisfies this query
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        if identity.get(self.field) != Some(self.value.as_str()) {
            return false;
        }
        self.constraints
            .iter()
            .all(|(field, value)| identity.get(*field) == Some(value.as_str()))
    }
}
