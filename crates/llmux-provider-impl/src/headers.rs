//! Header list helpers shared by the provider executors.

pub type Headers = Vec<(String, String)>;

pub fn set_header(headers: &mut Headers, name: &str, value: &str) {
    headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

pub fn set_bearer(headers: &mut Headers, token: &str) {
    set_header(headers, "authorization", &format!("Bearer {token}"));
}

pub fn set_accept_json(headers: &mut Headers) {
    set_header(headers, "accept", "application/json");
}

pub fn set_content_type_json(headers: &mut Headers) {
    set_header(headers, "content-type", "application/json");
}

pub fn set_accept_sse(headers: &mut Headers) {
    set_header(headers, "accept", "text/event-stream");
}

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
