use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;

use crate::admission::RespBody;
use crate::error::{GateError, Result};

/// Build HTTP response with status code of 4xx and 5xx
pub(crate) fn synthetic_error_response(status_code: StatusCode) -> Result<Response<RespBody>> {
    let res = Response::builder()
        .status(status_code)
        .body(empty_body())
        .map_err(|e| GateError::Http(format!("Failed to build error response: {e}")))?;
    Ok(res)
}

/// Last-resort 500 used when even the synthetic response cannot be built
pub(crate) fn internal_error_response(reason: String) -> Response<RespBody> {
    let body = Full::new(Bytes::from(reason))
        .map_err(|never| match never {})
        .boxed();
    let mut resp = Response::new(body);
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

fn empty_body() -> RespBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}
