use crate::{
    error::HandshakeError,
    types::{AuthRequest, CredentialForm},
};

/// Build an [`AuthRequest`] from raw form input.
///
/// Only presence is checked here (plus the integer shape the wire format
/// needs for the application id). Credential correctness and phone format are
/// left to the gateway.
pub fn collect(
    application_id: &str,
    application_secret: &str,
    phone_number: &str,
) -> Result<AuthRequest, HandshakeError> {
    let application_id = required("application id", application_id)?;
    let application_secret = required("application secret", application_secret)?;
    let phone_number = required("phone number", phone_number)?;

    let application_id = application_id
        .parse::<i64>()
        .map_err(|err| HandshakeError::invalid_field("application id", err.to_string()))?;

    Ok(AuthRequest {
        application_id,
        application_secret: application_secret.to_owned(),
        phone_number: phone_number.to_owned(),
    })
}

impl CredentialForm {
    /// Validate the form into a request.
    pub fn collect(&self) -> Result<AuthRequest, HandshakeError> {
        collect(
            &self.application_id,
            &self.application_secret,
            &self.phone_number,
        )
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, HandshakeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HandshakeError::validation_missing(field));
    }
    Ok(trimmed)
}
