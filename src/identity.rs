//! Session identity. A usable `token` becomes the user id as-is; anything else
//! gets a fresh anonymous id for the lifetime of the connection.

use uuid::Uuid;

use crate::domain::UserId;

const MAX_TOKEN_LEN: usize = 128;

pub fn resolve_user_id(token: Option<&str>) -> UserId {
  match token.map(str::trim).filter(|t| is_usable(t)) {
    Some(t) => t.to_string(),
    None => format!("anon-{}", Uuid::new_v4().simple()),
  }
}

// Ids double as document keys, so keep them to a plain charset.
fn is_usable(token: &str) -> bool {
  !token.is_empty()
    && token.len() <= MAX_TOKEN_LEN
    && token.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
