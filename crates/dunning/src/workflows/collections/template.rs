//! `{{key}}` substitution over a fixed set of debtor and tenant variables.
//!
//! Unknown tokens and missing values render as empty strings; rendering never fails.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::domain::{Debtor, TenantSettings};

/// Every variable a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VariableKey {
    DebtorName,
    FirstName,
    Email,
    Phone,
    Balance,
    AddressLine1,
    AddressLine2,
    City,
    State,
    PostalCode,
    AccountNumber,
    CompanyName,
    CompanyAddress,
    CompanyPhone,
    CompanyEmail,
    LegalFooter,
    Disclaimer,
    CurrentDate,
}

impl VariableKey {
    pub fn from_token(token: &str) -> Option<Self> {
        let key = match token.trim().to_ascii_lowercase().as_str() {
            "name" | "debtor_name" | "full_name" => Self::DebtorName,
            "first_name" => Self::FirstName,
            "email" => Self::Email,
            "phone" => Self::Phone,
            "balance" | "amount_due" => Self::Balance,
            "address_line1" | "street" => Self::AddressLine1,
            "address_line2" => Self::AddressLine2,
            "city" => Self::City,
            "state" => Self::State,
            "postal_code" | "zip" => Self::PostalCode,
            "account_number" => Self::AccountNumber,
            "company_name" => Self::CompanyName,
            "company_address" => Self::CompanyAddress,
            "company_phone" => Self::CompanyPhone,
            "company_email" => Self::CompanyEmail,
            "legal_footer" => Self::LegalFooter,
            "disclaimer" => Self::Disclaimer,
            "current_date" | "date" => Self::CurrentDate,
            _ => return None,
        };
        Some(key)
    }
}

/// Resolved values for one render call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVariables {
    values: BTreeMap<VariableKey, String>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: VariableKey, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: VariableKey, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: VariableKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    pub fn for_debtor(debtor: &Debtor, tenant: &TenantSettings, today: NaiveDate) -> Self {
        let mut vars = Self::new()
            .with(VariableKey::DebtorName, debtor.name.trim())
            .with(
                VariableKey::FirstName,
                debtor.name.split_whitespace().next().unwrap_or_default(),
            )
            .with(VariableKey::Balance, format_currency(debtor.balance_cents))
            .with(VariableKey::AccountNumber, debtor.account_number.as_str())
            .with(VariableKey::CompanyName, tenant.company_name.as_str())
            .with(VariableKey::CompanyAddress, tenant.company_address.as_str())
            .with(VariableKey::CompanyPhone, tenant.company_phone.as_str())
            .with(VariableKey::CompanyEmail, tenant.company_email.as_str())
            .with(VariableKey::LegalFooter, tenant.legal_footer.as_str())
            .with(VariableKey::Disclaimer, tenant.disclaimer.as_str())
            .with(
                VariableKey::CurrentDate,
                today.format("%B %-d, %Y").to_string(),
            );

        if let Some(email) = &debtor.email {
            vars.set(VariableKey::Email, email.as_str());
        }
        if let Some(phone) = &debtor.phone {
            vars.set(VariableKey::Phone, phone.as_str());
        }
        if let Some(address) = &debtor.address {
            vars.set(VariableKey::AddressLine1, address.street.as_str());
            if let Some(street2) = &address.street2 {
                vars.set(VariableKey::AddressLine2, street2.as_str());
            }
            vars.set(VariableKey::City, address.city.as_str());
            vars.set(VariableKey::State, address.state.as_str());
            vars.set(VariableKey::PostalCode, address.postal_code.as_str());
        }

        vars
    }
}

pub fn render(template: &str, variables: &TemplateVariables) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let token = &after_open[..close];
                if let Some(value) = VariableKey::from_token(token).and_then(|k| variables.get(k))
                {
                    output.push_str(value);
                }
                rest = &after_open[close + 2..];
            }
            None => {
                // unterminated token is literal text
                output.push_str(&rest[open..]);
                rest = "";
            }
        }
    }

    output.push_str(rest);
    output
}

/// Formats cents as US dollars, e.g. `123456` -> `$1,234.56`.
pub fn format_currency(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let dollars = (cents / 100).to_string();

    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (idx, digit) in dollars.chars().enumerate() {
        if idx > 0 && (dollars.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{sign}${grouped}.{:02}", cents % 100)
}
