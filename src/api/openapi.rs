use utoipa::openapi::{Contact, License, Tag};
use utoipa::OpenApi;

use super::{
    auth::User,
    error::{ErrorBody, FieldError},
    handlers::{
        health, login, rates, recovery, registration, StatusBody,
    },
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        login::login,
        registration::send_code,
        registration::check_code,
        registration::check_user,
        registration::register,
        recovery::send_recovery_code,
        recovery::check_recovery_code,
        recovery::change_password_by_code,
        rates::rates,
    ),
    components(schemas(
        health::Health,
        login::LoginRequest,
        registration::RegistrationRequest,
        recovery::RecoveryRequest,
        rates::Rate,
        rates::Rates,
        User,
        StatusBody,
        ErrorBody,
        FieldError,
    ))
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    // Use Cargo.toml metadata instead of the utoipa crate info defaults.
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc.info.description = optional_str(env!("CARGO_PKG_DESCRIPTION")).map(str::to_string);
    doc.info.contact = cargo_contact();
    doc.info.license = cargo_license();

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Sessions, email codes, registration and recovery".to_string());
    let mut public_tag = Tag::new("public");
    public_tag.description = Some("Unauthenticated reference data".to_string());
    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and database status".to_string());
    doc.tags = Some(vec![auth_tag, public_tag, health_tag]);

    doc
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(':').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let Some(start) = author.find('<') else {
        let name = author.trim();
        return (if name.is_empty() { None } else { Some(name) }, None);
    };
    let name = author[..start].trim();
    let email = author[start + 1..].trim_end_matches('>').trim();
    (
        (!name.is_empty()).then_some(name),
        (!email.is_empty()).then_some(email),
    )
}
