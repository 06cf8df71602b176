//! Request authentication
//!
//! Team identity is established upstream by the authentication gateway and
//! arrives as the `X-Team-Id` header. Operator routes use a static bearer
//! token.

pub mod middleware;

pub use middleware::{require_admin, require_team, TeamContext, TEAM_ID_HEADER};
