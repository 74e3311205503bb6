use axum::middleware::from_fn;
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::handlers::{admin, auth, health, reminders, subscription, sync, user, vehicles};
use super::middleware;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Three groups: public routes, bearer-protected routes (auth layer), and
/// admin routes (auth layer, then the administrator gate inside it). Add new
/// endpoints here via `.routes(routes!(...))` so they are both served and
/// documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let public = OpenApiRouter::new()
        .routes(routes!(health::health))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::refresh::refresh));

    let protected = OpenApiRouter::new()
        .routes(routes!(auth::logout::logout))
        .routes(routes!(auth::verify::verify))
        .routes(routes!(user::profile))
        .routes(routes!(subscription::status))
        .routes(routes!(vehicles::list))
        .routes(routes!(vehicles::detail))
        .routes(routes!(vehicles::update_odometer))
        .routes(routes!(vehicles::list_reminders))
        .routes(routes!(vehicles::list_reminders_due))
        .routes(routes!(reminders::list))
        .routes(routes!(reminders::due))
        .routes(routes!(reminders::detail))
        .routes(routes!(sync::status))
        .routes(routes!(sync::register_device))
        .routes(routes!(sync::push))
        .layer(from_fn(middleware::auth::auth));

    // Admin gate sits inside the auth layer, so auth runs first
    let admin = OpenApiRouter::new()
        .routes(routes!(admin::stats))
        .routes(routes!(admin::list_users))
        .layer(from_fn(middleware::admin::admin))
        .layer(from_fn(middleware::auth::auth));

    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .merge(public)
        .merge(protected)
        .merge(admin);

    let mut api_tag = Tag::new("garageminder");
    api_tag.description = Some("Mobile API for the GarageMinder garage tracker".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, token refresh and session management".to_string());

    router.get_openapi_mut().tags = Some(vec![api_tag, auth_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
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
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
        }
    }

    #[test]
    fn openapi_covers_route_table() {
        let spec = openapi();
        let paths = &spec.paths.paths;

        for path in [
            "/health",
            "/auth/login",
            "/auth/refresh",
            "/auth/logout",
            "/auth/verify",
            "/user/profile",
            "/subscription/status",
            "/vehicles",
            "/vehicles/{id}",
            "/vehicles/{id}/odometer",
            "/vehicles/{id}/reminders",
            "/vehicles/{id}/reminders/due",
            "/reminders",
            "/reminders/due",
            "/reminders/{id}",
            "/sync/status",
            "/sync/device",
            "/sync/push",
            "/admin/stats",
            "/admin/users",
        ] {
            assert!(paths.contains_key(path), "missing {path} in OpenAPI spec");
        }
    }
}
