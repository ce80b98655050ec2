//! Locale resolution for localized content types.

use serde_json::Value;

use crate::{
  document::{ALL_LOCALES, Params, fields},
  filter::Condition,
};

/// Fill in `locale` when the caller did not pick one.
pub fn default_locale(params: &mut Params, default: &str) {
  if params.locale.is_none() {
    params.locale = Some(default.to_owned());
  }
}

fn concrete_locale(params: &Params) -> Option<&str> {
  params.locale.as_deref().filter(|l| *l != ALL_LOCALES)
}

/// Restrict the lookup to the requested locale; `*` matches every locale.
pub fn locale_to_lookup(params: &mut Params) {
  if let Some(locale) = concrete_locale(params).map(str::to_owned) {
    params
      .lookup
      .insert(fields::LOCALE.to_owned(), Condition::Eq(Value::String(locale)));
  }
}

/// Persist the requested locale on written rows.
pub fn locale_to_data(params: &mut Params) {
  if let Some(locale) = concrete_locale(params).map(str::to_owned) {
    params
      .data_mut()
      .insert(fields::LOCALE.to_owned(), Value::String(locale));
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn default_only_fills_missing_locale() {
    let mut p = Params::new();
    default_locale(&mut p, "en");
    assert_eq!(p.locale.as_deref(), Some("en"));

    let mut p = Params::new().locale("fr");
    default_locale(&mut p, "en");
    assert_eq!(p.locale.as_deref(), Some("fr"));
  }

  #[test]
  fn wildcard_adds_no_condition() {
    let mut p = Params::new().locale(ALL_LOCALES);
    locale_to_lookup(&mut p);
    locale_to_data(&mut p);
    assert!(p.lookup.is_empty());
    assert!(p.data.is_none());
  }

  #[test]
  fn concrete_locale_reaches_lookup_and_data() {
    let mut p = Params::new().locale("de");
    locale_to_lookup(&mut p);
    locale_to_data(&mut p);
    assert_eq!(p.lookup[fields::LOCALE], Condition::Eq(json!("de")));
    assert_eq!(p.data.unwrap()[fields::LOCALE], json!("de"));
  }
}
