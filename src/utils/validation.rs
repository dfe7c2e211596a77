use std::borrow::Cow;

use validator::{ValidationError, ValidationErrors};

/// Rejects strings that are empty once surrounding whitespace is removed.
pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message(Cow::Borrowed("must not be blank")));
    }
    Ok(())
}

/// Flattens field errors into one readable line, ordered by field name.
pub fn describe(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let messages: Vec<String> = fields
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{} is invalid", field),
            })
        })
        .collect();

    if messages.is_empty() {
        "Validation failed".to_string()
    } else {
        messages.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Sample {
        #[validate(custom(function = "not_blank", message = "Name is required"))]
        name: String,
        #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
        rating: i16,
    }

    #[test]
    fn test_blank_strings_are_rejected() {
        assert!(not_blank("ok").is_ok());
        assert!(not_blank("   ").is_err());
        assert!(not_blank("").is_err());
    }

    #[test]
    fn test_describe_is_ordered_by_field() {
        let sample = Sample {
            name: " ".into(),
            rating: 9,
        };
        let errors = sample.validate().unwrap_err();
        assert_eq!(
            describe(&errors),
            "Name is required, Rating must be between 1 and 5"
        );
    }
}
