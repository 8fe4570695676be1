//! Tracing setup for the duel service.
//!
//! `LOG_LEVEL` takes any `EnvFilter` directive string; when unset the service
//! logs duel flow at debug and everything else at info. `LOG_FORMAT=json`
//! switches to one JSON object per line.
//!
//! Targets: `duel_backend` (lifecycle, sockets, config), `duel` (matchmaking,
//! submission, settlement), `store` (writes, subscriptions), `assistant`.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info,duel=debug,duel_backend=debug,store=info,assistant=info,tower_http=info,axum=info";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Anything other than "json" (case-insensitive) is pretty.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

fn filter_from_env() -> EnvFilter {
    EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

pub fn init_tracing() {
    let format = LogFormat::parse(std::env::var("LOG_FORMAT").ok().as_deref());
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter_from_env())
        .with_target(true)
        .with_line_number(true);

    match format {
        LogFormat::Json => fmt.json().with_current_span(true).init(),
        LogFormat::Pretty => fmt.compact().init(),
    }
    tracing::debug!(target: "duel_backend", ?format, "Tracing initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_json_selects_json_output() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(Some("yaml")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
    }

    #[test]
    fn default_directives_parse() {
        assert!(DEFAULT_DIRECTIVES.parse::<EnvFilter>().is_ok());
    }
}
