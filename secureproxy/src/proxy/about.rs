use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{Body, Method, Request, Response, StatusCode};

const ABOUT_PAGE: &str = include_str!("../../static/about.html");

/// Origin-form requests for `/about` (or anything under it) are served by the proxy itself.
pub fn is_about_request(req: &Request<Body>) -> bool {
    if req.uri().authority().is_some() || req.method() == Method::CONNECT {
        return false;
    }
    let path = req.uri().path();
    path == "/about" || path.starts_with("/about/")
}

pub fn about_response(method: &Method) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    match *method {
        Method::GET | Method::HEAD => {
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(ABOUT_PAGE.len()));
            if *method == Method::GET {
                *response.body_mut() = Body::from(ABOUT_PAGE);
            }
        }
        _ => {
            *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
            response.headers_mut().insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
    }
    response
}
