//! MXC URL translation.

use matrix_sdk::ruma::OwnedMxcUri;

/// Translates an `mxc://server/media` URL into the homeserver download URL.
///
/// Returns `None` if `mxc_url` is not a valid MXC URI.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(
///     mxc_to_http("https://hs.example", "mxc://example.org/abc"),
///     Some("https://hs.example/_matrix/media/v3/download/example.org/abc".to_owned())
/// );
/// ```
pub fn mxc_to_http(homeserver_url: &str, mxc_url: &str) -> Option<String> {
    let mxc = OwnedMxcUri::from(mxc_url);
    let (server_name, media_id) = mxc.parts().ok()?;

    Some(format!(
        "{}/_matrix/media/v3/download/{}/{}",
        homeserver_url.trim_end_matches('/'),
        server_name,
        media_id
    ))
}
