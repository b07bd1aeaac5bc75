/// Router Module Index
///
/// Routing is split by access level. Access control is attached per module
/// (via Axum route layers in `create_router`), so a protected endpoint cannot be
/// exposed by registering it in the wrong place silently.

/// Routes open to every client. Identity, when present, only widens visibility.
pub mod public;

/// Routes behind the `auth_middleware`. Requires a valid session token.
pub mod authenticated;

/// Routes behind the `admin_middleware`. Requires role = admin.
pub mod admin;
