//! Debtor roster import from the billing system's CSV export.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::domain::{Debtor, DebtorId, DebtorStatus, PostalAddress, TenantId};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read debtor export: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid debtor CSV data: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: invalid balance {value:?}")]
    InvalidBalance { row: usize, value: String },
    #[error("row {row}: unknown account status {value:?}")]
    InvalidStatus { row: usize, value: String },
    #[error("row {row}: account number is empty")]
    MissingAccountNumber { row: usize },
}

#[derive(Debug, Clone)]
pub struct DebtorImporter {
    tenant_id: TenantId,
}

impl DebtorImporter {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn from_path(&self, path: impl AsRef<Path>) -> Result<Vec<Debtor>, ImportError> {
        let file = File::open(path)?;
        self.from_reader(file)
    }

    pub fn from_reader<R: Read>(&self, reader: R) -> Result<Vec<Debtor>, ImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut debtors = Vec::new();

        for (index, record) in csv_reader.deserialize::<DebtorRow>().enumerate() {
            // header is line 1
            let row = index + 2;
            let record = record?;
            debtors.push(record.into_debtor(&self.tenant_id, row)?);
        }

        Ok(debtors)
    }
}

#[derive(Debug, Deserialize)]
struct DebtorRow {
    #[serde(rename = "Account Number")]
    account_number: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Email", default, deserialize_with = "empty_string_as_none")]
    email: Option<String>,
    #[serde(rename = "Phone", default, deserialize_with = "empty_string_as_none")]
    phone: Option<String>,
    #[serde(rename = "Street", default, deserialize_with = "empty_string_as_none")]
    street: Option<String>,
    #[serde(rename = "City", default, deserialize_with = "empty_string_as_none")]
    city: Option<String>,
    #[serde(rename = "State", default, deserialize_with = "empty_string_as_none")]
    state: Option<String>,
    #[serde(
        rename = "Postal Code",
        default,
        deserialize_with = "empty_string_as_none"
    )]
    postal_code: Option<String>,
    #[serde(rename = "Balance", default, deserialize_with = "empty_string_as_none")]
    balance: Option<String>,
    #[serde(rename = "Status", default, deserialize_with = "empty_string_as_none")]
    status: Option<String>,
}

impl DebtorRow {
    fn into_debtor(self, tenant_id: &TenantId, row: usize) -> Result<Debtor, ImportError> {
        if self.account_number.is_empty() {
            return Err(ImportError::MissingAccountNumber { row });
        }

        let balance_cents = match self.balance.as_deref() {
            Some(value) => parse_cents(value).ok_or_else(|| ImportError::InvalidBalance {
                row,
                value: value.to_string(),
            })?,
            None => 0,
        };

        let status = match self.status.as_deref() {
            Some(value) => parse_status(value).ok_or_else(|| ImportError::InvalidStatus {
                row,
                value: value.to_string(),
            })?,
            None => DebtorStatus::Active,
        };

        let has_address = self.street.is_some()
            || self.city.is_some()
            || self.state.is_some()
            || self.postal_code.is_some();
        let address = has_address.then(|| PostalAddress {
            street: self.street.unwrap_or_default(),
            street2: None,
            city: self.city.unwrap_or_default(),
            state: self.state.unwrap_or_default(),
            postal_code: self.postal_code.unwrap_or_default(),
        });

        Ok(Debtor {
            id: DebtorId::new(format!("deb-{}", self.account_number)),
            tenant_id: tenant_id.clone(),
            account_number: self.account_number,
            name: self.name,
            email: self.email,
            phone: self.phone,
            address,
            balance_cents,
            status,
        })
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

/// Accepts `1234.5`, `$1,234.56`, and `-25`.
fn parse_cents(value: &str) -> Option<i64> {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    let (negative, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };

    let cents = whole.checked_mul(100)?.checked_add(fraction)?;
    Some(if negative { -cents } else { cents })
}

fn parse_status(value: &str) -> Option<DebtorStatus> {
    match value.trim().to_ascii_lowercase().as_str() {
        "active" | "open" | "delinquent" => Some(DebtorStatus::Active),
        "paid" | "paid in full" | "settled" => Some(DebtorStatus::Paid),
        "escalated" | "legal" | "collections agency" => Some(DebtorStatus::Escalated),
        _ => None,
    }
}
