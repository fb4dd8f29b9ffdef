use std::collections::HashMap;

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Parse a raw query string (the part after `?`) into key-value pairs.
///
/// Values are URL-decoded. Repeated keys keep the last value.
///
/// # Example
/// ```
/// use chirp::core::query_params::parse_query_params;
///
/// let params = parse_query_params("user=john%20doe&page=2");
/// assert_eq!(params.get("user"), Some(&"john doe".to_string()));
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// ```
pub fn parse_query_params(query: &str) -> HashMap<String, String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut params = HashMap::new();

    for param in query.split('&').filter(|p| !p.is_empty()) {
        match param.split_once('=') {
            Some((key, encoded_value)) => {
                let decoded = urlencoding::decode(encoded_value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| encoded_value.to_string());
                params.insert(key.to_string(), decoded);
            }
            // Flag parameter without value
            None => {
                params.insert(param.to_string(), String::new());
            }
        }
    }

    params
}

pub fn get_string(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params.get(key).filter(|v| !v.is_empty()).cloned()
}

/// `?all=true` style flag.
pub fn get_bool_flag(params: &HashMap<String, String>, key: &str) -> bool {
    params.get(key).map(|v| v == "true").unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<String>,
    pub limit: usize,
}

/// Reads `cursor` and `limit`, clamping the limit to `1..=MAX_PAGE_SIZE`.
pub fn get_page(params: &HashMap<String, String>) -> PageRequest {
    let limit = params
        .get("limit")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    PageRequest {
        cursor: get_string(params, "cursor"),
        limit,
    }
}
