use http::{HeaderName, HeaderValue, StatusCode};

use crate::request::Headers;
use crate::util::log_data;
use crate::Error;

/// Max number of headers accepted in a response head.
pub(crate) const MAX_RESPONSE_HEADERS: usize = 128;

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: StatusCode,
    pub status_text: Option<String>,
    pub headers: Headers,
}

/// Try parsing a full response head.
///
/// `Ok(None)` means more input is needed. On success the number of consumed
/// bytes is returned alongside the head.
pub(crate) fn try_parse_response<const N: usize>(
    input: &[u8],
) -> Result<Option<(usize, ResponseHead)>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; N];
    let mut res = httparse::Response::new(&mut headers);

    let input_used = match res.parse(input)? {
        httparse::Status::Complete(v) => v,
        httparse::Status::Partial => return Ok(None),
    };

    log_data(&input[..input_used]);

    let head = to_head(&res)?;

    Ok(Some((input_used, head)))
}

/// Parse a response head that lacks the final empty line.
///
/// Some broken servers send redirects without the trailing `\r\n`. We accept
/// those only if they are redirects with a `location` header.
pub(crate) fn try_parse_partial_redirect<const N: usize>(
    input: &[u8],
) -> Result<Option<ResponseHead>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; N];
    let mut res = httparse::Response::new(&mut headers);

    // Partial parsing leaves the last header out unless it is terminated.
    let mut terminated = input.to_vec();
    if !terminated.ends_with(b"\r\n\r\n") {
        terminated.extend_from_slice(b"\r\n");
    }

    match res.parse(&terminated)? {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Ok(None),
    }

    let head = to_head(&res)?;

    let is_redirection = head.status.is_redirection() && head.headers.contains("location");
    if !is_redirection {
        return Ok(None);
    }

    debug!("Accepting partial redirect response head");
    Ok(Some(head))
}

fn to_head(res: &httparse::Response<'_, '_>) -> Result<ResponseHead, Error> {
    let code = res.code.ok_or(Error::HttpParseIncomplete)?;
    let status = StatusCode::from_u16(code)
        .map_err(|e| Error::HttpParseFail(format!("status {}: {}", code, e)))?;

    let status_text = res
        .reason
        .filter(|r| !r.is_empty())
        .map(|r| r.to_string());

    let mut headers = Headers::new();
    for h in res.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| Error::BadHeader(e.to_string()))?;
        let value = HeaderValue::from_bytes(h.value).map_err(|e| Error::BadHeader(e.to_string()))?;
        headers.append(name, value);
    }

    Ok(ResponseHead {
        status,
        status_text,
        headers,
    })
}
