//! Python `requests` snippet generation.
//!
//! Output is deterministic for a given request: dict entries follow the
//! request's own field order and the URL is split textually so query values
//! survive byte for byte.

use std::fmt::Write;

use crate::model::{FieldMap, ParsedRequest};

pub fn generate(request: &ParsedRequest) -> String {
    let mut code = String::from("import requests\n\n");

    let headers: Vec<(&String, &String)> = request
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("cookie"))
        .collect();
    if !headers.is_empty() {
        code.push_str("headers = {\n");
        for (name, value) in &headers {
            let _ = writeln!(code, "    \"{}\": \"{}\",", escape(name), escape(value));
        }
        code.push_str("}\n");
    }

    if !request.cookies.is_empty() {
        code.push_str("cookies = {\n");
        for (name, value) in &request.cookies {
            let _ = writeln!(code, "    \"{}\": \"{}\",", escape(name), escape(value));
        }
        code.push_str("}\n");
    }

    let (base_url, params) = split_url(&request.url);
    let _ = writeln!(code, "url = \"{}\"", escape(base_url));

    if !params.is_empty() {
        code.push_str("params = {\n");
        for (name, value) in &params {
            let _ = writeln!(code, "    \"{}\": \"{}\",", escape(name), escape(value));
        }
        code.push_str("}\n");
    }

    let mut data_argument = "";
    if !request.body.is_empty() {
        let trimmed = request.body.trim();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let _ = writeln!(code, "data = {}", request.body);
            data_argument = "json=data";
        } else {
            let _ = writeln!(code, "data = \"{}\"", escape(&request.body));
            data_argument = "data=data";
        }
    }

    let _ = write!(code, "response = requests.{}(url", request.method.to_lowercase());
    if !headers.is_empty() {
        code.push_str(", headers=headers");
    }
    if !request.cookies.is_empty() {
        code.push_str(", cookies=cookies");
    }
    if !params.is_empty() {
        code.push_str(", params=params");
    }
    if !data_argument.is_empty() {
        let _ = write!(code, ", {data_argument}");
    }
    code.push_str(")\n\n");
    code.push_str("print(response.text)\n");
    code.push_str("print(response)");

    code
}

/// Splits the URL on the first `?` and the query on `&`/`=`, with no
/// percent-decoding on either side.
fn split_url(url: &str) -> (&str, FieldMap) {
    let Some((base, query)) = url.split_once('?') else {
        return (url, FieldMap::new());
    };
    let mut params = FieldMap::new();
    for pair in query.split('&') {
        if let Some((name, value)) = pair.split_once('=') {
            if !name.is_empty() && !params.contains_key(name) {
                params.insert(name.to_string(), value.to_string());
            }
        }
    }
    (base, params)
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
