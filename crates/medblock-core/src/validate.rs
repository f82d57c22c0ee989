//! Field validation for patient payloads.
//!
//! Validation takes `today` explicitly so date rules are deterministic under
//! test.

use chrono::{Months, NaiveDate};
use thiserror::Error;

use crate::patient::NewPatient;

/// The oldest age, in years, a date of birth may imply.
pub const MAX_AGE_YEARS: u32 = 120;

pub const BLOOD_TYPES: &[&str] = &["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("{0} is required")]
  Required(&'static str),

  #[error("date of birth {0} is in the future")]
  DateOfBirthInFuture(NaiveDate),

  #[error("date of birth {0} implies an age over {MAX_AGE_YEARS} years")]
  DateOfBirthTooOld(NaiveDate),

  #[error("invalid email address: {0:?}")]
  InvalidEmail(String),

  #[error("invalid phone number: {0:?}")]
  InvalidPhone(String),

  #[error("unknown blood type: {0:?}")]
  InvalidBloodType(String),
}

impl ValidationError {
  /// The camelCase name of the offending field, for inline form messages.
  pub fn field(&self) -> &'static str {
    match self {
      Self::Required(field) => *field,
      Self::DateOfBirthInFuture(_) | Self::DateOfBirthTooOld(_) => "dateOfBirth",
      Self::InvalidEmail(_) => "email",
      Self::InvalidPhone(_) => "phone",
      Self::InvalidBloodType(_) => "bloodType",
    }
  }
}

pub fn validate_date_of_birth(dob: NaiveDate, today: NaiveDate) -> Result<(), ValidationError> {
  if dob > today {
    return Err(ValidationError::DateOfBirthInFuture(dob));
  }
  let earliest = today
    .checked_sub_months(Months::new(MAX_AGE_YEARS * 12))
    .unwrap_or(NaiveDate::MIN);
  if dob < earliest {
    return Err(ValidationError::DateOfBirthTooOld(dob));
  }
  Ok(())
}

/// Accepts `local@domain.tld`: one `@`, non-empty local part, a dot inside the
/// domain, and no whitespace anywhere.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
  let invalid = || ValidationError::InvalidEmail(email.to_owned());
  if email.chars().any(char::is_whitespace) {
    return Err(invalid());
  }
  let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
  let domain_ok = !domain.contains('@')
    && domain
      .split_once('.')
      .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'));
  if local.is_empty() || !domain_ok {
    return Err(invalid());
  }
  Ok(())
}

/// Digits, spaces and `-+()` only.
pub fn validate_phone(phone: &str) -> Result<(), ValidationError> {
  let ok = phone
    .chars()
    .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '+' | '(' | ')'));
  if ok && phone.chars().any(|c| c.is_ascii_digit()) {
    Ok(())
  } else {
    Err(ValidationError::InvalidPhone(phone.to_owned()))
  }
}

impl NewPatient {
  /// Check every field rule against `today`. Expects a payload that has
  /// already been through [`NewPatient::normalized`].
  pub fn validate(&self, today: NaiveDate) -> Result<(), ValidationError> {
    if self.first_name.trim().is_empty() {
      return Err(ValidationError::Required("firstName"));
    }
    if self.last_name.trim().is_empty() {
      return Err(ValidationError::Required("lastName"));
    }
    validate_date_of_birth(self.date_of_birth, today)?;
    if let Some(email) = &self.email {
      validate_email(email)?;
    }
    if let Some(phone) = &self.phone {
      validate_phone(phone)?;
    }
    if let Some(blood) = &self.blood_type
      && !BLOOD_TYPES.contains(&blood.as_str())
    {
      return Err(ValidationError::InvalidBloodType(blood.clone()));
    }
    Ok(())
  }
}
