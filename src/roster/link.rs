//! Join links handed to patients (QR code or copy/paste)

use super::directory::{Party, RosterError};
use crate::config::JoinLinkConfig;
use url::Url;

/// `<origin>/<join_path>?party=<id>&name=<display_name>`
pub fn build_join_link(
    origin: &str,
    join_path: &str,
    id: &str,
    display_name: &str,
) -> Result<Url, RosterError> {
    let invalid = |reason: String| RosterError::InvalidOrigin {
        origin: origin.to_string(),
        reason,
    };

    let mut url = Url::parse(origin).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    url.set_query(None);
    url.set_fragment(None);

    url.path_segments_mut()
        .map_err(|_| invalid("origin cannot carry a path".to_string()))?
        .pop_if_empty()
        .extend(join_path.split('/').filter(|s| !s.is_empty()));

    url.query_pairs_mut()
        .append_pair("party", id)
        .append_pair("name", display_name);
    Ok(url)
}

/// Join link for a roster entry using the configured origin and path
pub fn join_link_for(config: &JoinLinkConfig, party: &Party) -> Result<Url, RosterError> {
    build_join_link(&config.origin, &config.path, &party.id, &party.display_name)
}
