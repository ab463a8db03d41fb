use http::{Method, StatusCode};

pub(crate) trait StatusExt {
    /// 3xx that we treat as a redirect.
    fn is_followable_redirect(&self) -> bool;

    /// Redirect codes that require the method to be kept.
    fn is_redirect_retaining_status(&self) -> bool;
}

impl StatusExt for StatusCode {
    fn is_followable_redirect(&self) -> bool {
        // 304 is a redirect code, but it has no location header and
        // thus we don't consider it a redirection.
        self.is_redirection() && *self != StatusCode::NOT_MODIFIED
    }

    fn is_redirect_retaining_status(&self) -> bool {
        *self == StatusCode::TEMPORARY_REDIRECT || *self == StatusCode::PERMANENT_REDIRECT
    }
}

pub(crate) trait MethodExt {
    fn need_request_body(&self) -> bool;
}

impl MethodExt for Method {
    fn need_request_body(&self) -> bool {
        matches!(*self, Method::POST | Method::PUT | Method::PATCH)
    }
}
