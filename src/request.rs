use std::collections::HashMap;

use url::Url;

use crate::constants::HttpMethod;
use crate::error::DispatchError;

/// A parsed HTTP request, carrying everything the interpolator and
/// session hooks need: the raw query string, HTTP version major/minor,
/// and path parameters bound by route matching (filled in by the
/// dispatcher after `resolve`).
#[derive(Clone, Debug)]
pub struct Request {
    pub method: HttpMethod,
    pub path: String,
    pub raw_target: String,
    pub query_raw: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub params: HashMap<String, String>,
    pub version_major: u8,
    pub version_minor: u8,
    pub content_type: Option<String>,
}

impl Request {
    pub fn get_body_as_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn get_body_as_json<T: for<'a> serde::Deserialize<'a>>(&self) -> Option<T> {
        match serde_json::from_slice::<T>(&self.body) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(error = %err, "failed to deserialise request body as JSON");
                None
            }
        }
    }

    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `[request?name]`: query string first, then `application/x-www-form-urlencoded`
    /// body.
    pub fn request_param(&self, name: &str) -> Option<String> {
        if let Some(v) = self.query.get(name) {
            return Some(v.clone());
        }
        if self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        {
            let body = self.get_body_as_string();
            for (k, v) in url::form_urlencoded::parse(body.as_bytes()) {
                if k == name {
                    return Some(v.into_owned());
                }
            }
        }
        None
    }

    /// All request parameters: query string merged with form body
    /// (query wins on collision), used by `RequestParamHook`.
    pub fn all_request_params(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        if self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        {
            let body = self.get_body_as_string();
            for (k, v) in url::form_urlencoded::parse(body.as_bytes()) {
                out.insert(k.into_owned(), v.into_owned());
            }
        }
        out.extend(self.query.clone());
        out
    }

    /// Value of the named cookie from the `Cookie` header, if present.
    /// Used by the dispatcher to read `Fixd-Session`.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let raw = self.header("cookie")?;
        raw.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k == name).then(|| v.to_string())
        })
    }

    /// `"METHOD PATH HTTP/maj.min"`.
    pub fn request_line(&self) -> String {
        format!(
            "{} {} HTTP/{}.{}",
            self.method, self.raw_target, self.version_major, self.version_minor
        )
    }
}

/// Parses a raw byte buffer read off the socket into a [`Request`].
/// A two-stage `httparse` parse: keeps the raw query string, splits the
/// HTTP version into major/minor, and normalizes headers into a
/// case-preserving map (case-insensitive lookup happens in
/// [`Request::header`]).
pub fn parse_request(buffer: &[u8]) -> Result<Option<Request>, DispatchError> {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut headers);

    let body_offset = match parsed
        .parse(buffer)
        .map_err(|e| DispatchError::InternalError(format!("malformed request: {e}")))?
    {
        httparse::Status::Complete(amt) => amt,
        httparse::Status::Partial => return Ok(None),
    };

    let method = HttpMethod::from_str(
        parsed
            .method
            .ok_or_else(|| DispatchError::InternalError("method not found".into()))?,
    );
    let raw_target = parsed
        .path
        .ok_or_else(|| DispatchError::InternalError("uri not found".into()))?
        .to_string();
    let http_minor = parsed
        .version
        .ok_or_else(|| DispatchError::InternalError("version not found".into()))?;

    let mut headers_map = HashMap::new();
    for header in parsed.headers.iter() {
        let name = header.name.to_string();
        let value = std::str::from_utf8(header.value)
            .map_err(|e| DispatchError::InternalError(format!("bad header value: {e}")))?
            .to_string();
        headers_map.insert(name, value);
    }

    let body = buffer.get(body_offset..).unwrap_or(&[]).to_vec();

    let placeholder_base = "http://fixd.local";
    let url = Url::parse(&format!("{placeholder_base}{raw_target}"))
        .map_err(|e| DispatchError::InternalError(format!("bad request target: {e}")))?;
    let query_raw = url.query().unwrap_or("").to_string();
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let path = url.path().to_string();

    let content_type = headers_map
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.clone());

    Ok(Some(Request {
        method,
        path,
        raw_target,
        query_raw,
        query,
        headers: headers_map,
        body,
        params: HashMap::new(),
        version_major: 1,
        version_minor: http_minor,
        content_type,
    }))
}
