//! Postal address value object.

use serde::{Deserialize, Serialize};

use shipping_core::{DomainError, DomainResult, ValueObject};

/// Delivery address: zip code, house number and an optional suffix ("3A", "12-bis").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub zip_code: String,
    pub house_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub house_number_addition: Option<String>,
}

impl Address {
    pub fn new(zip_code: impl Into<String>, house_number: u32) -> Self {
        Self {
            zip_code: zip_code.into(),
            house_number,
            house_number_addition: None,
        }
    }

    pub fn with_addition(mut self, addition: impl Into<String>) -> Self {
        self.house_number_addition = Some(addition.into());
        self
    }
}

impl ValueObject for Address {
    fn validate(&self) -> DomainResult<()> {
        if self.zip_code.trim().is_empty() {
            return Err(DomainError::validation("zip_code must not be empty"));
        }
        Ok(())
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.zip_code, self.house_number)?;
        if let Some(addition) = &self.house_number_addition {
            write!(f, "{addition}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_by_value() {
        assert_eq!(Address::new("1234AB", 3), Address::new("1234AB", 3));
        assert_ne!(
            Address::new("1234AB", 3),
            Address::new("1234AB", 3).with_addition("A")
        );
    }

    #[test]
    fn empty_zip_code_is_rejected() {
        assert!(Address::new("1234AB", 3).validate().is_ok());
        assert_eq!(
            Address::new("  ", 3).validate(),
            Err(DomainError::validation("zip_code must not be empty"))
        );
    }

    #[test]
    fn addition_is_optional_on_the_wire() {
        let json = serde_json::json!({ "zip_code": "1234AB", "house_number": 3 });
        let address: Address = serde_json::from_value(json).unwrap();
        assert_eq!(address, Address::new("1234AB", 3));
        assert_eq!(address.to_string(), "1234AB 3");
        assert_eq!(address.with_addition("bis").to_string(), "1234AB 3bis");
    }
}
